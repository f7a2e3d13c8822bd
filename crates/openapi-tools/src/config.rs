use crate::auth::AuthSettings;
use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use toolbridge_http_tools::retry::RetryPolicy;
use toolbridge_http_tools::safety::{OutboundHttpSafety, RedirectPolicy};

/// Default per-attempt timeout for upstream calls.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Proxy configuration: which spec to serve, how to authenticate, and how to call upstream.
///
/// This is the only input to the core. Environment variables and flags are folded in by the
/// CLI before a registry is built.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    /// Path to the `OpenAPI` 3.1 document (JSON or YAML).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<PathBuf>,

    /// Override the document's first server URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer token (mutually exclusive with `header_set`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Explicit credential headers (mutually exclusive with `token`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_set: Option<BTreeMap<String, String>>,

    /// Protocol-mandated headers attached to every call (e.g. an API version header).
    pub fixed_headers: BTreeMap<String, String>,

    /// Header names that must be present in `header_set`.
    pub required_headers: Vec<String>,

    /// Optional spec hash for version detection (`sha256:<hex>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,

    /// Hash policy: warn, fail, or ignore.
    pub spec_hash_policy: HashPolicy,

    /// Which operations become tools.
    pub auto_discover: AutoDiscoverConfig,

    /// Upstream call behavior (timeouts, retries).
    pub call: CallConfig,

    /// Outbound safety policy.
    pub outbound: OutboundConfig,
}

impl ProxyConfig {
    /// Load a config file (YAML or JSON).
    ///
    /// A relative `spec` path is resolved against the config file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ConfigInvalid`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::ConfigInvalid(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let mut cfg: ProxyConfig = serde_yaml::from_str(&content).map_err(|e| {
            ProxyError::ConfigInvalid(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })?;

        if let (Some(spec), Some(dir)) = (&cfg.spec, path.parent())
            && spec.is_relative()
        {
            cfg.spec = Some(dir.join(spec));
        }
        Ok(cfg)
    }

    /// The credential-related subset of this config.
    #[must_use]
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            token: self.token.clone(),
            header_set: self.header_set.clone(),
            fixed_headers: self.fixed_headers.clone(),
            required_headers: self.required_headers.clone(),
        }
    }
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail startup if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

/// Auto-discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AutoDiscoverConfig {
    /// Simple boolean: true = all operations, false = none.
    Enabled(bool),
    /// Glob filters over `"METHOD /path"` (e.g. `"GET /users/*"`). Exclude wins.
    Detailed {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl Default for AutoDiscoverConfig {
    fn default() -> Self {
        AutoDiscoverConfig::Enabled(true)
    }
}

impl AutoDiscoverConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            AutoDiscoverConfig::Enabled(b) => *b,
            AutoDiscoverConfig::Detailed { .. } => true,
        }
    }

    #[must_use]
    pub fn include_patterns(&self) -> &[String] {
        match self {
            AutoDiscoverConfig::Enabled(_) => &[],
            AutoDiscoverConfig::Detailed { include, .. } => include,
        }
    }

    #[must_use]
    pub fn exclude_patterns(&self) -> &[String] {
        match self {
            AutoDiscoverConfig::Enabled(_) => &[],
            AutoDiscoverConfig::Detailed { exclude, .. } => exclude,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CallConfig {
    /// Per-attempt timeout in milliseconds. `0` disables the timeout.
    pub timeout_ms: u64,
    /// Retry policy for transport failures of GET/HEAD calls.
    pub retry: RetryPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl CallConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct OutboundConfig {
    /// If non-empty, only these hosts may be called.
    pub allowed_hosts: Vec<String>,
    /// Allow private/loopback/link-local destinations.
    pub allow_private_networks: bool,
    /// Maximum response body size in bytes (`None` = unlimited).
    pub max_response_bytes: Option<usize>,
    /// Follow same-origin redirects returned by the upstream, re-checking every hop.
    pub follow_redirects: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allow_private_networks: true,
            max_response_bytes: None,
            follow_redirects: true,
        }
    }
}

impl OutboundConfig {
    #[must_use]
    pub fn to_safety(&self) -> OutboundHttpSafety {
        let allowed_hosts = (!self.allowed_hosts.is_empty()).then(|| {
            self.allowed_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect::<HashSet<_>>()
        });
        OutboundHttpSafety {
            allowed_hosts,
            allow_private_networks: self.allow_private_networks,
            max_response_bytes: self.max_response_bytes,
            redirects: if self.follow_redirects {
                RedirectPolicy::Checked
            } else {
                RedirectPolicy::None
            },
        }
    }
}
