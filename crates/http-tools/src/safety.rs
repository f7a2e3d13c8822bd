//! Outbound HTTP safety controls (SSRF protection, limits, redaction).
//!
//! This module is policy-only. The proxy defaults to a permissive policy (it talks to whatever
//! API the operator pointed it at); deployments that accept untrusted specs should restrict it.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tokio::net::lookup_host;
use url::Url;

/// Why an outbound request was refused before it was sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Outbound HTTP blocked: unsupported URL scheme '{0}'")]
    Scheme(String),
    #[error("Outbound HTTP blocked: missing URL host")]
    MissingHost,
    #[error("Outbound HTTP blocked: host '{0}' not in allowlist")]
    HostNotAllowed(String),
    #[error("Outbound HTTP blocked: destination IP '{0}' is not allowed")]
    DeniedIp(IpAddr),
    #[error("Outbound HTTP blocked: host '{host}' resolved to disallowed IP '{ip}'")]
    DeniedResolvedIp { host: String, ip: IpAddr },
    #[error("DNS lookup failed for host '{host}': {message}")]
    Dns { host: String, message: String },
    #[error("Outbound HTTP blocked: redirect from '{from}' to '{to}' leaves the upstream origin")]
    CrossOriginRedirect { from: String, to: String },
    #[error("Outbound HTTP blocked: more than {0} redirects")]
    TooManyRedirects(usize),
    #[error("Response too large: {0}")]
    ResponseTooLarge(String),
}

/// Redirect hops followed before a request is given up.
pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    /// Do not follow redirects.
    None,
    /// Follow redirects, but re-check the destination URL on each hop.
    Checked,
}

#[derive(Debug, Clone)]
pub struct OutboundHttpSafety {
    /// If set, only these hosts are allowed (case-insensitive).
    pub allowed_hosts: Option<HashSet<String>>,
    /// If true, allow private/loopback/link-local/reserved destination IPs.
    pub allow_private_networks: bool,
    /// Maximum response body size (bytes). `None` = unlimited.
    pub max_response_bytes: Option<usize>,
    /// Redirect behavior.
    pub redirects: RedirectPolicy,
}

impl Default for OutboundHttpSafety {
    fn default() -> Self {
        Self::permissive()
    }
}

impl OutboundHttpSafety {
    /// Most permissive policy: any http(s) destination, no size limit, redirects followed.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: true,
            max_response_bytes: None,
            redirects: RedirectPolicy::Checked,
        }
    }

    /// Restrictive policy for deployments where the spec (and thus the destination) is untrusted.
    #[must_use]
    pub fn restrictive() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: false,
            max_response_bytes: Some(1024 * 1024), // 1 MiB
            redirects: RedirectPolicy::None,
        }
    }

    /// Build a `reqwest` client honoring this policy's redirect behavior.
    ///
    /// With [`RedirectPolicy::Checked`] every hop goes through [`Self::check_redirect`]. A
    /// refused hop fails the request with the [`SafetyError`] as the error source.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        let policy = match self.redirects {
            RedirectPolicy::None => reqwest::redirect::Policy::none(),
            RedirectPolicy::Checked => {
                let safety = self.clone();
                reqwest::redirect::Policy::custom(move |attempt| {
                    if attempt.previous().len() > MAX_REDIRECTS {
                        return attempt.error(SafetyError::TooManyRedirects(MAX_REDIRECTS));
                    }
                    let verdict = match attempt.previous().last() {
                        Some(from) => safety.check_redirect(from, attempt.url()),
                        None => Ok(()),
                    };
                    match verdict {
                        Ok(()) => attempt.follow(),
                        Err(e) => attempt.error(e),
                    }
                })
            }
        };
        reqwest::Client::builder().redirect(policy).build()
    }

    /// Validate one redirect hop.
    ///
    /// Only hops that stay on the origin of the previous URL are allowed, plus an `http` to
    /// `https` upgrade on the same host and default ports. Credentials are attached to the
    /// request as plain headers, so any other hop could hand them to a third party.
    ///
    /// # Errors
    ///
    /// Returns an error if the target has an unsupported scheme, no host, a host outside the
    /// allowlist, or a different origin.
    pub fn check_redirect(&self, from: &Url, to: &Url) -> Result<(), SafetyError> {
        let scheme = to.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(SafetyError::Scheme(scheme.to_string()));
        }
        let Some(host) = to.host_str() else {
            return Err(SafetyError::MissingHost);
        };
        if let Some(allowed) = &self.allowed_hosts
            && !allowed.contains(&host.to_ascii_lowercase())
        {
            return Err(SafetyError::HostNotAllowed(host.to_string()));
        }

        let same_origin = from.origin() == to.origin();
        let https_upgrade = from.scheme() == "http"
            && scheme == "https"
            && from.host_str() == Some(host)
            && from.port().is_none()
            && to.port().is_none();
        if !same_origin && !https_upgrade {
            return Err(SafetyError::CrossOriginRedirect {
                from: from.origin().ascii_serialization(),
                to: to.origin().ascii_serialization(),
            });
        }
        Ok(())
    }

    /// Validate a URL before making an outbound request.
    ///
    /// This rejects non-`http(s)` schemes and applies host/IP restrictions.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is disallowed by the policy (unsupported scheme, host not in
    /// allowlist, or hostname resolves to a disallowed IP range).
    pub async fn check_url(&self, url: &Url) -> Result<(), SafetyError> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(SafetyError::Scheme(scheme.to_string()));
        }

        let Some(host) = url.host_str() else {
            return Err(SafetyError::MissingHost);
        };

        if let Some(allowed) = &self.allowed_hosts
            && !allowed.contains(&host.to_ascii_lowercase())
        {
            return Err(SafetyError::HostNotAllowed(host.to_string()));
        }

        if self.allow_private_networks {
            return Ok(());
        }

        // IP literal? (`host_str` keeps the brackets of IPv6 literals.)
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return if is_denied_ip(ip) {
                Err(SafetyError::DeniedIp(ip))
            } else {
                Ok(())
            };
        }

        // Resolve hostname and validate every resolved address.
        let port = url.port_or_known_default().unwrap_or(443);
        let addrs = lookup_host((host, port)).await.map_err(|e| SafetyError::Dns {
            host: host.to_string(),
            message: e.to_string(),
        })?;

        let mut saw_any = false;
        for addr in addrs {
            saw_any = true;
            if is_denied_ip(addr.ip()) {
                return Err(SafetyError::DeniedResolvedIp {
                    host: host.to_string(),
                    ip: addr.ip(),
                });
            }
        }

        if !saw_any {
            return Err(SafetyError::Dns {
                host: host.to_string(),
                message: "no addresses returned".to_string(),
            });
        }

        Ok(())
    }

    /// Check a declared `Content-Length` against the configured limit.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::ResponseTooLarge`] if the declared length exceeds the limit.
    pub fn check_content_length(&self, len: Option<u64>) -> Result<(), SafetyError> {
        if let (Some(max), Some(len)) = (self.max_response_bytes, len)
            && len > max as u64
        {
            return Err(SafetyError::ResponseTooLarge(format!(
                "{len} bytes (limit {max})"
            )));
        }
        Ok(())
    }

    /// Check an accumulated body size against the configured limit.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::ResponseTooLarge`] once `so_far` exceeds the limit.
    pub fn check_body_progress(&self, so_far: usize) -> Result<(), SafetyError> {
        if let Some(max) = self.max_response_bytes
            && so_far > max
        {
            return Err(SafetyError::ResponseTooLarge(format!(
                "exceeded {max} bytes"
            )));
        }
        Ok(())
    }
}

#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    // Best-effort: drop credentials + query + fragment.
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

fn is_denied_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_denied_ipv4(v4),
        IpAddr::V6(v6) => is_denied_ipv6(v6),
    }
}

fn is_denied_ipv4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
    {
        return true;
    }

    // Carrier-grade NAT range.
    let oct = ip.octets();
    if oct[0] == 100 && (64..=127).contains(&oct[1]) {
        return true;
    }

    // Reserved / future use.
    oct[0] >= 240
}

fn is_denied_ipv6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restrictive_policy_blocks_loopback() {
        let safety = OutboundHttpSafety::restrictive();
        let url = Url::parse("http://127.0.0.1:1234/").expect("url");
        let err = safety.check_url(&url).await.unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[tokio::test]
    async fn permissive_policy_allows_loopback() {
        let safety = OutboundHttpSafety::permissive();
        let url = Url::parse("http://127.0.0.1:1234/").expect("url");
        safety.check_url(&url).await.expect("allowed");
    }

    #[tokio::test]
    async fn allowlist_rejects_other_hosts() {
        let safety = OutboundHttpSafety {
            allowed_hosts: Some(HashSet::from(["api.example.com".to_string()])),
            ..OutboundHttpSafety::permissive()
        };
        let ok = Url::parse("https://API.example.com/v1").expect("url");
        safety.check_url(&ok).await.expect("allowed");

        let other = Url::parse("https://evil.example.net/").expect("url");
        assert_eq!(
            safety.check_url(&other).await.unwrap_err(),
            SafetyError::HostNotAllowed("evil.example.net".to_string())
        );
    }

    #[tokio::test]
    async fn non_http_schemes_are_rejected() {
        let safety = OutboundHttpSafety::permissive();
        let url = Url::parse("file:///etc/passwd").expect("url");
        assert!(matches!(
            safety.check_url(&url).await,
            Err(SafetyError::Scheme(s)) if s == "file"
        ));
    }

    #[test]
    fn body_limits() {
        let safety = OutboundHttpSafety {
            max_response_bytes: Some(10),
            ..OutboundHttpSafety::permissive()
        };
        assert!(safety.check_content_length(Some(10)).is_ok());
        assert!(safety.check_content_length(Some(11)).is_err());
        assert!(safety.check_content_length(None).is_ok());
        assert!(safety.check_body_progress(11).is_err());

        let unlimited = OutboundHttpSafety::permissive();
        assert!(unlimited.check_content_length(Some(u64::MAX)).is_ok());
    }

    #[test]
    fn redirects_must_stay_on_the_upstream_origin() {
        let safety = OutboundHttpSafety::permissive();
        let from = Url::parse("http://127.0.0.1:8080/v1/items").expect("url");

        let same = Url::parse("http://127.0.0.1:8080/v2/items").expect("url");
        safety.check_redirect(&from, &same).expect("same origin");

        let other_host = Url::parse("http://localhost:8080/x").expect("url");
        assert_eq!(
            safety.check_redirect(&from, &other_host).unwrap_err(),
            SafetyError::CrossOriginRedirect {
                from: "http://127.0.0.1:8080".to_string(),
                to: "http://localhost:8080".to_string(),
            }
        );

        let other_port = Url::parse("http://127.0.0.1:9090/x").expect("url");
        assert!(matches!(
            safety.check_redirect(&from, &other_port),
            Err(SafetyError::CrossOriginRedirect { .. })
        ));

        let plain = Url::parse("http://api.example.com/v1").expect("url");
        let upgraded = Url::parse("https://api.example.com/v1").expect("url");
        safety.check_redirect(&plain, &upgraded).expect("https upgrade");
        assert!(safety.check_redirect(&upgraded, &plain).is_err());
    }

    #[test]
    fn redirects_honor_scheme_and_allowlist() {
        let safety = OutboundHttpSafety {
            allowed_hosts: Some(HashSet::from(["api.example.com".to_string()])),
            ..OutboundHttpSafety::permissive()
        };
        let from = Url::parse("https://api.example.com/v1").expect("url");

        let file = Url::parse("file:///etc/passwd").expect("url");
        assert!(matches!(
            safety.check_redirect(&from, &file),
            Err(SafetyError::Scheme(s)) if s == "file"
        ));

        let evil = Url::parse("https://evil.example.net/").expect("url");
        assert_eq!(
            safety.check_redirect(&from, &evil).unwrap_err(),
            SafetyError::HostNotAllowed("evil.example.net".to_string())
        );
    }

    #[test]
    fn redact_url_drops_credentials_and_query() {
        let url = Url::parse("https://user:pw@api.example.com/v1/x?token=abc#frag").expect("url");
        assert_eq!(redact_url(&url), "https://api.example.com/v1/x");
    }
}
