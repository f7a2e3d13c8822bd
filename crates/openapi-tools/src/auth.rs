//! Upstream credentials and base URL, resolved once at startup.

use crate::error::{ProxyError, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use toolbridge_http_tools::safety::redact_url;
use url::Url;

/// Operator-provided auth inputs. Exactly one of `token` and `header_set` must be set.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    pub token: Option<String>,
    pub header_set: Option<BTreeMap<String, String>>,
    /// Protocol-mandated headers sent on every call (e.g. `Notion-Version`).
    pub fixed_headers: BTreeMap<String, String>,
    /// Header names the `header_set` must contain.
    pub required_headers: Vec<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field(
                "header_set",
                &self
                    .header_set
                    .as_ref()
                    .map(|h| h.keys().collect::<Vec<_>>()),
            )
            .field("fixed_headers", &self.fixed_headers)
            .field("required_headers", &self.required_headers)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Headers(BTreeMap<String, String>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credentials::Headers(h) => f
                .debug_tuple("Headers")
                .field(&h.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Frozen auth state shared by every call.
#[derive(Debug, Clone)]
pub struct ResolvedAuth {
    credentials: Credentials,
    headers: Arc<HeaderMap>,
}

impl ResolvedAuth {
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Headers attached to every request (credentials plus fixed headers).
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Tool arguments may not replace a protected header unless the parameter is overridable.
    #[must_use]
    pub fn is_protected(&self, name: &HeaderName) -> bool {
        self.headers.contains_key(name)
    }
}

/// Resolve credentials into the header map sent on every request.
///
/// Fixed headers are never replaced: a credential header with the same name is a
/// configuration error.
///
/// # Errors
///
/// Returns [`ProxyError::ConfigInvalid`] if not exactly one credential kind is set, if a
/// credential is empty or collides with a fixed header, if a required header is missing, or
/// if any header name or value is invalid.
pub fn resolve_auth(settings: &AuthSettings) -> Result<ResolvedAuth> {
    let credentials = match (&settings.token, &settings.header_set) {
        (Some(_), Some(_)) => {
            return Err(ProxyError::ConfigInvalid(
                "token and headerSet are mutually exclusive; set exactly one".to_string(),
            ));
        }
        (None, None) => {
            return Err(ProxyError::ConfigInvalid(
                "no credentials configured; set either token or headerSet".to_string(),
            ));
        }
        (Some(token), None) => {
            if token.trim().is_empty() {
                return Err(ProxyError::ConfigInvalid("token is empty".to_string()));
            }
            Credentials::Bearer(token.clone())
        }
        (None, Some(set)) => {
            if set.is_empty() {
                return Err(ProxyError::ConfigInvalid("headerSet is empty".to_string()));
            }
            Credentials::Headers(set.clone())
        }
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &settings.fixed_headers {
        headers.insert(header_name(name)?, header_value(name, value, false)?);
    }

    match &credentials {
        Credentials::Bearer(token) => {
            if headers.contains_key(AUTHORIZATION) {
                return Err(ProxyError::ConfigInvalid(
                    "fixed header 'Authorization' conflicts with the bearer token".to_string(),
                ));
            }
            headers.insert(
                AUTHORIZATION,
                header_value("Authorization", &format!("Bearer {token}"), true)?,
            );
        }
        Credentials::Headers(set) => {
            let fixed: Vec<HeaderName> = headers.keys().cloned().collect();
            let mut named: Vec<HeaderName> = Vec::with_capacity(set.len());
            for (name, value) in set {
                let n = header_name(name)?;
                if fixed.contains(&n) {
                    return Err(ProxyError::ConfigInvalid(format!(
                        "headerSet header '{name}' conflicts with a fixed header"
                    )));
                }
                headers.insert(n.clone(), header_value(name, value, true)?);
                named.push(n);
            }
            for required in &settings.required_headers {
                let n = header_name(required)?;
                if !named.contains(&n) {
                    return Err(ProxyError::ConfigInvalid(format!(
                        "required header '{required}' is missing from headerSet"
                    )));
                }
            }
        }
    }

    tracing::debug!(
        headers = ?headers.keys().map(HeaderName::as_str).collect::<Vec<_>>(),
        "Resolved upstream auth headers"
    );

    Ok(ResolvedAuth {
        credentials,
        headers: Arc::new(headers),
    })
}

/// Pick the upstream base URL: the operator override, else the document's first server.
///
/// # Errors
///
/// Returns [`ProxyError::ConfigInvalid`] if there is no candidate, or if it is not an absolute
/// http(s) URL with a host.
pub fn resolve_base_url(override_url: Option<&str>, servers: &[String]) -> Result<Url> {
    let Some(candidate) = override_url
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| servers.first().map(String::as_str))
    else {
        return Err(ProxyError::ConfigInvalid(
            "no base URL: set baseUrl or declare a server in the document".to_string(),
        ));
    };

    let url = Url::parse(candidate).map_err(|e| {
        ProxyError::ConfigInvalid(format!(
            "base URL must be an absolute http(s) URL ({e}): {candidate}"
        ))
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ProxyError::ConfigInvalid(format!(
            "base URL must be an absolute http(s) URL: {}",
            redact_url(&url)
        )));
    }
    Ok(url)
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| ProxyError::ConfigInvalid(format!("invalid header name '{name}'")))
}

fn header_value(name: &str, value: &str, sensitive: bool) -> Result<HeaderValue> {
    let mut v = HeaderValue::from_str(value)
        .map_err(|_| ProxyError::ConfigInvalid(format!("invalid value for header '{name}'")))?;
    v.set_sensitive(sensitive);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> BTreeMap<String, String> {
        BTreeMap::from([("Notion-Version".to_string(), "2022-06-28".to_string())])
    }

    fn config_message(err: ProxyError) -> String {
        match err {
            ProxyError::ConfigInvalid(msg) => msg,
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn token_mode_sets_bearer_and_fixed_headers() {
        let auth = resolve_auth(&AuthSettings {
            token: Some("abc".to_string()),
            fixed_headers: fixed(),
            ..Default::default()
        })
        .expect("resolve");

        assert_eq!(auth.headers().get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(auth.headers().get(AUTHORIZATION).unwrap().is_sensitive());
        assert_eq!(auth.headers().get("notion-version").unwrap(), "2022-06-28");
        assert!(auth.is_protected(&HeaderName::from_static("notion-version")));
        assert!(!auth.is_protected(&HeaderName::from_static("x-trace")));
        assert_eq!(format!("{:?}", auth.credentials()), "Bearer(<redacted>)");
        assert!(!format!("{auth:?}").contains("abc"));
    }

    #[test]
    fn bearer_token_conflicting_with_fixed_authorization_is_rejected() {
        let err = resolve_auth(&AuthSettings {
            token: Some("abc".to_string()),
            fixed_headers: BTreeMap::from([("Authorization".to_string(), "Basic x".to_string())]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(config_message(err).contains("Authorization"));
    }

    #[test]
    fn header_set_is_merged_with_fixed_headers() {
        let auth = resolve_auth(&AuthSettings {
            header_set: Some(BTreeMap::from([("X-Api-Key".to_string(), "k".to_string())])),
            fixed_headers: BTreeMap::from([
                ("Notion-Version".to_string(), "2022-06-28".to_string()),
                ("X-Client".to_string(), "toolbridge".to_string()),
            ]),
            required_headers: vec!["x-api-key".to_string()],
            ..Default::default()
        })
        .expect("resolve");

        let h = auth.headers();
        assert_eq!(h.len(), 3);
        assert_eq!(h.get("x-api-key").unwrap(), "k");
        assert!(h.get("x-api-key").unwrap().is_sensitive());
        assert_eq!(h.get("notion-version").unwrap(), "2022-06-28");
        assert_eq!(h.get("x-client").unwrap(), "toolbridge");
        assert!(h.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn header_set_never_replaces_a_fixed_header() {
        let err = resolve_auth(&AuthSettings {
            header_set: Some(BTreeMap::from([
                ("X-Api-Key".to_string(), "k".to_string()),
                ("notion-version".to_string(), "1999-01-01".to_string()),
            ])),
            fixed_headers: fixed(),
            ..Default::default()
        })
        .unwrap_err();
        let message = config_message(err);
        assert!(message.contains("notion-version"), "{message}");
        assert!(message.contains("fixed header"), "{message}");
    }

    #[test]
    fn credentials_must_be_exclusive_and_non_empty() {
        let both = resolve_auth(&AuthSettings {
            token: Some("abc".to_string()),
            header_set: Some(BTreeMap::from([("X".to_string(), "y".to_string())])),
            ..Default::default()
        })
        .unwrap_err();
        assert!(config_message(both).contains("mutually exclusive"));

        let neither = resolve_auth(&AuthSettings::default()).unwrap_err();
        assert!(config_message(neither).contains("no credentials"));

        let empty_token = resolve_auth(&AuthSettings {
            token: Some("  ".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(config_message(empty_token).contains("token is empty"));

        let empty_set = resolve_auth(&AuthSettings {
            header_set: Some(BTreeMap::new()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(config_message(empty_set).contains("headerSet is empty"));
    }

    #[test]
    fn missing_required_header_is_named() {
        let err = resolve_auth(&AuthSettings {
            header_set: Some(BTreeMap::from([("X-Api-Key".to_string(), "k".to_string())])),
            required_headers: vec!["X-Tenant".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(config_message(err).contains("X-Tenant"));
    }

    #[test]
    fn invalid_header_names_and_values_are_rejected() {
        let bad_name = resolve_auth(&AuthSettings {
            header_set: Some(BTreeMap::from([("bad header".to_string(), "v".to_string())])),
            ..Default::default()
        })
        .unwrap_err();
        assert!(config_message(bad_name).contains("invalid header name"));

        let bad_value = resolve_auth(&AuthSettings {
            token: Some("line\nbreak".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        let msg = config_message(bad_value);
        assert!(msg.contains("invalid value"));
        assert!(!msg.contains("line"));
    }

    #[test]
    fn settings_debug_redacts_secrets() {
        let settings = AuthSettings {
            token: Some("s3cret".to_string()),
            header_set: Some(BTreeMap::from([("X-Key".to_string(), "hidden".to_string())])),
            ..Default::default()
        };
        let dbg = format!("{settings:?}");
        assert!(!dbg.contains("s3cret"));
        assert!(!dbg.contains("hidden"));
        assert!(dbg.contains("X-Key"));
    }

    #[test]
    fn base_url_override_wins_then_first_server() {
        let servers = vec![
            "https://api.example.com/v2".to_string(),
            "https://backup.example.com".to_string(),
        ];
        assert_eq!(
            resolve_base_url(None, &servers).unwrap().as_str(),
            "https://api.example.com/v2"
        );
        assert_eq!(
            resolve_base_url(Some("http://127.0.0.1:8080"), &servers)
                .unwrap()
                .as_str(),
            "http://127.0.0.1:8080/"
        );
    }

    #[test]
    fn base_url_must_be_absolute_http() {
        assert!(config_message(resolve_base_url(None, &[]).unwrap_err()).contains("no base URL"));
        for bad in ["/relative", "ftp://example.com", "file:///etc/passwd"] {
            let err = resolve_base_url(Some(bad), &[]).unwrap_err();
            assert!(config_message(err).contains("absolute http(s)"), "{bad}");
        }
    }
}
