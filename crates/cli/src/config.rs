use anyhow::Context as _;
use std::collections::BTreeMap;
use std::path::PathBuf;
use toolbridge_openapi_tools::ProxyConfig;

/// Values given on the command line or through the environment, applied over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub spec: Option<PathBuf>,
    pub base_url: Option<String>,
    pub token: Option<String>,
    /// Raw `--headers` value: a JSON object of header names to values.
    pub headers: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

pub fn load_config(overrides: &Overrides) -> anyhow::Result<ProxyConfig> {
    let mut cfg = match &overrides.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(spec) = &overrides.spec {
        cfg.spec = Some(spec.clone());
    }
    if let Some(base_url) = &overrides.base_url {
        cfg.base_url = Some(base_url.clone());
    }

    // Command-line credentials replace the file's as a pair; giving both is left to the
    // registry to reject.
    if overrides.token.is_some() || overrides.headers.is_some() {
        cfg.token = overrides.token.clone();
        cfg.header_set = overrides
            .headers
            .as_deref()
            .map(parse_header_set)
            .transpose()?;
    }

    if let Some(timeout_ms) = overrides.timeout_ms {
        cfg.call.timeout_ms = timeout_ms;
    }
    if let Some(max_retries) = overrides.max_retries {
        cfg.call.retry.max_retries = max_retries;
    }
    Ok(cfg)
}

fn parse_header_set(raw: &str) -> anyhow::Result<BTreeMap<String, String>> {
    serde_json::from_str(raw)
        .context("--headers must be a JSON object mapping header names to string values")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn flags_override_file_values() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("toolbridge.yaml");
        fs::write(
            &path,
            "spec: api.yaml\nbaseUrl: https://file.example.com\ntoken: from-file\ncall:\n  timeoutMs: 1000\n",
        )
        .expect("write");

        let cfg = load_config(&Overrides {
            config: Some(path),
            base_url: Some("https://flag.example.com".to_string()),
            max_retries: Some(0),
            ..Default::default()
        })
        .expect("load");

        assert_eq!(cfg.spec, Some(dir.path().join("api.yaml")));
        assert_eq!(cfg.base_url.as_deref(), Some("https://flag.example.com"));
        assert_eq!(cfg.token.as_deref(), Some("from-file"));
        assert_eq!(cfg.call.timeout_ms, 1000);
        assert_eq!(cfg.call.retry.max_retries, 0);
    }

    #[test]
    fn headers_flag_replaces_file_token() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("toolbridge.json");
        fs::write(&path, r#"{"token": "from-file"}"#).expect("write");

        let cfg = load_config(&Overrides {
            config: Some(path),
            headers: Some(r#"{"X-Api-Key": "k"}"#.to_string()),
            ..Default::default()
        })
        .expect("load");

        assert_eq!(cfg.token, None);
        assert_eq!(
            cfg.header_set,
            Some(BTreeMap::from([("X-Api-Key".to_string(), "k".to_string())]))
        );
    }

    #[test]
    fn malformed_headers_flag_is_rejected() {
        let err = load_config(&Overrides {
            headers: Some("X-Api-Key: k".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("--headers"), "{err}");
    }
}
