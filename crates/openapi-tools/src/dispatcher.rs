//! Tool call dispatch: arguments -> HTTP request -> [`CallToolResult`].
//!
//! Dispatch is data-driven: every tool goes through the same path, parameterized only by its
//! [`OperationBinding`]. Shared state is read-only, so concurrent calls need no locks.

use crate::auth::ResolvedAuth;
use crate::config::CallConfig;
use crate::document::{MediaKind, ParamLocation, QueryStyle};
use crate::error::{DeliveryOutcome, ProxyError, Result, Violation};
use crate::resolver::escape_pointer_token;
use crate::synthesizer::{BodyShape, OperationBinding, ParamBinding};
use base64::Engine as _;
use mime::Mime;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolResult, Content};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolbridge_http_tools::retry::RetryPolicy;
use toolbridge_http_tools::safety::{
    OutboundHttpSafety, SafetyError, redact_url, sanitize_reqwest_error,
};
use toolbridge_http_tools::semantics::is_retry_safe;
use url::Url;

#[derive(Debug)]
pub struct Dispatcher {
    bindings: Arc<HashMap<String, Arc<OperationBinding>>>,
    auth: ResolvedAuth,
    base_url: Url,
    client: reqwest::Client,
    safety: OutboundHttpSafety,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryPair {
    key: String,
    value: String,
    allow_reserved: bool,
}

#[derive(Debug)]
struct RequestParts {
    path: String,
    query: Vec<QueryPair>,
    headers: HeaderMap,
    body: Option<String>,
}

#[derive(Debug)]
struct UpstreamResponse {
    status: StatusCode,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Why a single attempt produced no response.
#[derive(Debug)]
enum AttemptFailure {
    /// Refused by outbound policy; never retried.
    Blocked(String),
    Transport {
        message: String,
        outcome: DeliveryOutcome,
    },
}

impl From<SafetyError> for AttemptFailure {
    fn from(e: SafetyError) -> Self {
        match e {
            SafetyError::Dns { .. } => AttemptFailure::Transport {
                message: e.to_string(),
                outcome: DeliveryOutcome::NotDelivered,
            },
            other => {
                let msg = other.to_string();
                let msg = msg
                    .strip_prefix("Outbound HTTP blocked: ")
                    .map_or_else(|| msg.clone(), str::to_string);
                AttemptFailure::Blocked(msg)
            }
        }
    }
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns [`ProxyError::ConfigInvalid`] if the HTTP client cannot be built.
    pub fn new(
        bindings: impl IntoIterator<Item = OperationBinding>,
        auth: ResolvedAuth,
        base_url: Url,
        safety: OutboundHttpSafety,
        call: &CallConfig,
    ) -> Result<Self> {
        let client = safety.build_client().map_err(|e| {
            ProxyError::ConfigInvalid(format!(
                "failed to build HTTP client: {}",
                sanitize_reqwest_error(&e)
            ))
        })?;
        let bindings = bindings
            .into_iter()
            .map(|b| (b.tool_name.clone(), Arc::new(b)))
            .collect();
        Ok(Self {
            bindings: Arc::new(bindings),
            auth,
            base_url,
            client,
            safety,
            timeout: call.timeout(),
            retry: call.retry.clone(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&OperationBinding> {
        self.bindings.get(name).map(Arc::as_ref)
    }

    /// Execute one tool call.
    ///
    /// Tool-level failures (unknown tool, invalid arguments, upstream 4xx/5xx, blocked
    /// requests) come back as `Ok` with `isError: true`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TransportFailure`] if no response was obtained from the upstream.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        match self.dispatch(name, arguments).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_tool_level() => {
                tracing::debug!(tool = %name, error = %e, "Tool call returned an error result");
                Ok(e.to_call_result())
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| ProxyError::UnknownTool {
                name: name.to_string(),
            })?;

        let args = validate_arguments(binding, arguments)?;
        let parts = build_request_parts(binding, &args, &self.auth)?;
        let url = build_url(&binding.tool_name, &self.base_url, &parts.path, &parts.query)?;
        let response = self.send_with_retry(binding, &url, &parts).await?;
        response_to_result(response)
    }

    async fn send_with_retry(
        &self,
        binding: &OperationBinding,
        url: &Url,
        parts: &RequestParts,
    ) -> Result<UpstreamResponse> {
        let method = binding.method.to_reqwest();
        let max_attempts = self.retry.max_attempts_for(&method);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                tool = %binding.tool_name,
                method = %method,
                url = %redact_url(url),
                attempt,
                "Sending upstream request"
            );

            let (message, outcome) = match self.attempt(&method, url, parts).await {
                Ok(response) => return Ok(response),
                Err(AttemptFailure::Blocked(msg)) => return Err(ProxyError::OutboundBlocked(msg)),
                Err(AttemptFailure::Transport { message, outcome }) => (message, outcome),
            };

            if attempt < max_attempts {
                let delay = self.retry.delay_after(attempt);
                tracing::warn!(
                    tool = %binding.tool_name,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %message,
                    "Upstream call failed; retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let message = if outcome == DeliveryOutcome::Unknown && !is_retry_safe(&method) {
                format!(
                    "{message}; the {method} request may have been processed upstream and was not retried"
                )
            } else {
                message
            };
            return Err(ProxyError::TransportFailure {
                tool: binding.tool_name.clone(),
                message,
                outcome,
                attempts: attempt,
            });
        }
    }

    async fn attempt(
        &self,
        method: &reqwest::Method,
        url: &Url,
        parts: &RequestParts,
    ) -> std::result::Result<UpstreamResponse, AttemptFailure> {
        // Outbound safety checks (SSRF + allowlists), re-evaluated per attempt.
        self.safety.check_url(url).await?;

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .headers(parts.headers.clone());
        if let Some(body) = &parts.body {
            request = request.body(body.clone());
        }
        if let Some(t) = self.timeout {
            request = request.timeout(t);
        }

        let response = request.send().await.map_err(|e| transport_failure(&e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = self.read_body_limited(response).await?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }

    async fn read_body_limited(
        &self,
        mut response: reqwest::Response,
    ) -> std::result::Result<Vec<u8>, AttemptFailure> {
        self.safety.check_content_length(response.content_length())?;

        let mut out: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_failure(&e))?
        {
            self.safety
                .check_body_progress(out.len().saturating_add(chunk.len()))?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

fn transport_failure(e: &reqwest::Error) -> AttemptFailure {
    // A redirect hop refused by the client's redirect policy.
    if let Some(refused) =
        std::error::Error::source(e).and_then(|s| s.downcast_ref::<SafetyError>())
    {
        return AttemptFailure::from(refused.clone());
    }
    let outcome = if e.is_connect() || e.is_builder() {
        DeliveryOutcome::NotDelivered
    } else {
        DeliveryOutcome::Unknown
    };
    let message = sanitize_reqwest_error(e);
    let message = if e.is_timeout() {
        format!("request timed out: {message}")
    } else {
        message
    };
    AttemptFailure::Transport { message, outcome }
}

/// Check arguments against the binding. `null` values count as absent and are dropped.
fn validate_arguments(binding: &OperationBinding, arguments: Value) -> Result<Map<String, Value>> {
    let invalid = |missing: Vec<String>, violations: Vec<Violation>| ProxyError::InvalidArguments {
        tool: binding.tool_name.clone(),
        missing,
        violations,
    };

    let args: Map<String, Value> = match arguments {
        Value::Null => Map::new(),
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        other => {
            return Err(invalid(
                Vec::new(),
                vec![Violation::new(
                    "",
                    format!("arguments must be a JSON object, got {}", json_type(&other)),
                )],
            ));
        }
    };

    let missing: Vec<String> = binding
        .required_args
        .iter()
        .filter(|r| !args.contains_key(r.as_str()))
        .cloned()
        .collect();

    let mut violations: Vec<Violation> = Vec::new();

    // Unknown parameters (suggestions).
    let known: Vec<&str> = binding.known_args.iter().map(String::as_str).collect();
    for k in args.keys() {
        if known.contains(&k.as_str()) {
            continue;
        }
        let suggestions = find_similar_strings(k, &known);
        let message = match suggestions.first() {
            Some(s) => format!("unknown argument '{k}' (did you mean '{s}'?)"),
            None => format!("unknown argument '{k}'"),
        };
        violations.push(Violation::new(format!("/{}", escape_pointer_token(k)), message));
    }

    // JSON Schema validation (types/constraints).
    let instance = Value::Object(args);
    for e in binding.validator().iter_errors(&instance) {
        // Missing fields are already reported above.
        if matches!(
            e.kind(),
            jsonschema::error::ValidationErrorKind::Required { .. }
        ) {
            continue;
        }
        violations.push(Violation::new(e.instance_path().to_string(), e.to_string()));
    }

    if !missing.is_empty() || !violations.is_empty() {
        return Err(invalid(missing, violations));
    }
    match instance {
        Value::Object(args) => Ok(args),
        _ => Ok(Map::new()),
    }
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn build_request_parts(
    binding: &OperationBinding,
    args: &Map<String, Value>,
    auth: &ResolvedAuth,
) -> Result<RequestParts> {
    let mut path = binding.path_template.clone();
    let mut query: Vec<QueryPair> = Vec::new();
    let mut headers = auth.headers().clone();
    let mut cookies: Vec<String> = Vec::new();
    let mut violations: Vec<Violation> = Vec::new();

    for param in &binding.params {
        let Some(value) = args.get(&param.arg_name) else {
            continue;
        };
        let pointer = format!("/{}", escape_pointer_token(&param.arg_name));
        match param.location {
            ParamLocation::Path => {
                let raw = value_to_string(value);
                if raw.is_empty() || raw == "." || raw == ".." {
                    violations.push(Violation::new(
                        pointer,
                        "path argument must be a non-empty segment other than '.' or '..'",
                    ));
                    continue;
                }
                path = path.replace(
                    &format!("{{{}}}", param.wire_name),
                    &encode_path_segment(&raw),
                );
            }
            ParamLocation::Query => query.extend(serialize_query_param(param, value)),
            ParamLocation::Header => {
                let Ok(name) = HeaderName::from_bytes(param.wire_name.as_bytes()) else {
                    violations.push(Violation::new(
                        pointer,
                        format!("'{}' is not a valid header name", param.wire_name),
                    ));
                    continue;
                };
                if auth.is_protected(&name) && !param.overridable {
                    tracing::warn!(
                        tool = %binding.tool_name,
                        header = %name,
                        "Refusing to override protected header from tool arguments"
                    );
                    continue;
                }
                match HeaderValue::from_str(&header_value_string(value)) {
                    Ok(v) => {
                        headers.insert(name, v);
                    }
                    Err(_) => violations.push(Violation::new(pointer, "not a valid header value")),
                }
            }
            ParamLocation::Cookie => cookies.push(format!(
                "{}={}",
                param.wire_name,
                encode_query_component(&value_to_string(value), false)
            )),
        }
    }

    if !cookies.is_empty() {
        if auth.is_protected(&COOKIE) {
            tracing::warn!(
                tool = %binding.tool_name,
                "Refusing to override protected Cookie header from tool arguments"
            );
        } else if let Ok(v) = HeaderValue::from_str(&cookies.join("; ")) {
            headers.insert(COOKIE, v);
        }
    }

    let mut body = None;
    if let Some(b) = &binding.body {
        let payload = match &b.shape {
            BodyShape::Promoted { fields } => {
                let obj: Map<String, Value> = fields
                    .iter()
                    .filter_map(|f| args.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                (!obj.is_empty() || b.required).then_some(Value::Object(obj))
            }
            BodyShape::Nested { arg_name } => args.get(arg_name).cloned(),
        };
        if let Some(payload) = payload {
            match encode_body(b.kind, &payload) {
                Ok(text) => {
                    if auth.is_protected(&CONTENT_TYPE) {
                        tracing::warn!(
                            tool = %binding.tool_name,
                            media_type = %b.media_type,
                            "Keeping configured Content-Type over the request body media type"
                        );
                    } else if let Ok(ct) = HeaderValue::from_str(&b.media_type) {
                        headers.insert(CONTENT_TYPE, ct);
                    }
                    body = Some(text);
                }
                Err(message) => {
                    let pointer = match &b.shape {
                        BodyShape::Nested { arg_name } => {
                            format!("/{}", escape_pointer_token(arg_name))
                        }
                        BodyShape::Promoted { .. } => String::new(),
                    };
                    violations.push(Violation::new(pointer, message));
                }
            }
        }
    }

    if !violations.is_empty() {
        return Err(ProxyError::InvalidArguments {
            tool: binding.tool_name.clone(),
            missing: Vec::new(),
            violations,
        });
    }

    Ok(RequestParts {
        path,
        query,
        headers,
        body,
    })
}

fn encode_body(kind: MediaKind, value: &Value) -> std::result::Result<String, String> {
    match kind {
        MediaKind::Json => Ok(value.to_string()),
        MediaKind::Form => {
            let Value::Object(map) = value else {
                return Err("form-encoded body must be an object".to_string());
            };
            Ok(map
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        encode_query_component(k, false),
                        encode_query_component(&value_to_string(v), false)
                    )
                })
                .collect::<Vec<_>>()
                .join("&"))
        }
        MediaKind::Raw => Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
}

fn build_url(tool: &str, base_url: &Url, path: &str, query: &[QueryPair]) -> Result<Url> {
    let url = format!("{}{}", base_url.as_str().trim_end_matches('/'), path);
    let mut url = Url::parse(&url).map_err(|e| ProxyError::InvalidArguments {
        tool: tool.to_string(),
        missing: Vec::new(),
        violations: vec![Violation::new("", format!("invalid request URL: {e}"))],
    })?;

    if !query.is_empty() {
        let mut q = String::new();
        for (i, p) in query.iter().enumerate() {
            if i > 0 {
                q.push('&');
            }
            q.push_str(&encode_query_component(&p.key, false));
            q.push('=');
            q.push_str(&encode_query_component(&p.value, p.allow_reserved));
        }
        url.set_query(Some(&q));
    }

    Ok(url)
}

fn serialize_query_param(param: &ParamBinding, value: &Value) -> Vec<QueryPair> {
    let name = param.wire_name.as_str();
    let allow_reserved = param.allow_reserved;

    if query_value_is_empty(value) {
        // Optional empty values are omitted.
        return if param.required {
            vec![QueryPair {
                key: name.to_string(),
                value: String::new(),
                allow_reserved,
            }]
        } else {
            Vec::new()
        };
    }

    match value {
        Value::Array(arr) => {
            serialize_query_array(name, arr, param.style, param.explode, allow_reserved)
        }
        Value::Object(map) => {
            serialize_query_object(name, map, param.style, param.explode, allow_reserved)
        }
        _ => vec![QueryPair {
            key: name.to_string(),
            value: value_to_string(value),
            allow_reserved,
        }],
    }
}

fn query_value_is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn serialize_query_array(
    name: &str,
    arr: &[Value],
    style: QueryStyle,
    explode: bool,
    allow_reserved: bool,
) -> Vec<QueryPair> {
    let items: Vec<String> = arr.iter().map(value_to_string).collect();
    let joined = |sep: &str| {
        vec![QueryPair {
            key: name.to_string(),
            value: items.join(sep),
            allow_reserved,
        }]
    };
    match style {
        QueryStyle::Form if explode => items
            .iter()
            .map(|v| QueryPair {
                key: name.to_string(),
                value: v.clone(),
                allow_reserved,
            })
            .collect(),
        QueryStyle::Form | QueryStyle::DeepObject => joined(","),
        QueryStyle::SpaceDelimited => joined(" "),
        QueryStyle::PipeDelimited => joined("|"),
    }
}

fn serialize_query_object(
    name: &str,
    map: &Map<String, Value>,
    style: QueryStyle,
    explode: bool,
    allow_reserved: bool,
) -> Vec<QueryPair> {
    match style {
        QueryStyle::DeepObject => map
            .iter()
            .map(|(k, v)| QueryPair {
                key: format!("{name}[{k}]"),
                value: value_to_string(v),
                allow_reserved,
            })
            .collect(),
        QueryStyle::Form if explode => map
            .iter()
            .map(|(k, v)| QueryPair {
                key: k.clone(),
                value: value_to_string(v),
                allow_reserved,
            })
            .collect(),
        QueryStyle::Form => {
            let mut parts = Vec::with_capacity(map.len() * 2);
            for (k, v) in map {
                parts.push(k.clone());
                parts.push(value_to_string(v));
            }
            vec![QueryPair {
                key: name.to_string(),
                value: parts.join(","),
                allow_reserved,
            }]
        }
        QueryStyle::SpaceDelimited | QueryStyle::PipeDelimited => vec![QueryPair {
            key: name.to_string(),
            value: Value::Object(map.clone()).to_string(),
            allow_reserved,
        }],
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn push_pct(out: &mut String, b: u8) {
    out.push('%');
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 0x0F) as usize] as char);
}

fn encode_query_component(s: &str, allow_reserved: bool) -> String {
    // Percent-encode everything except:
    // - unreserved: ALPHA / DIGIT / "-" / "." / "_" / "~"
    // - if allow_reserved: also keep reserved characters other than the pair separators.
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        let keep = is_unreserved(b) || (allow_reserved && is_reserved_but_safe_in_pairs(b));
        if keep {
            out.push(b as char);
        } else {
            push_pct(&mut out, b);
        }
    }
    out
}

/// Path values are single segments: `/` and every other reserved byte is encoded.
fn encode_path_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            push_pct(&mut out, b);
        }
    }
    out
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

fn is_reserved_but_safe_in_pairs(b: u8) -> bool {
    // RFC3986 reserved minus '&' and '=' (pair separators) and '#' (fragment).
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// `simple` style: arrays as `a,b`, objects as `k,v,k,v`.
fn header_value_string(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(map) => map
            .iter()
            .flat_map(|(k, v)| [k.clone(), value_to_string(v)])
            .collect::<Vec<_>>()
            .join(","),
        other => value_to_string(other),
    }
}

fn is_image_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let Ok(m) = ct.parse::<Mime>() else {
        return false;
    };
    m.type_() == mime::IMAGE
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| MediaKind::of(ct) == MediaKind::Json)
}

fn base64_json(bytes: &[u8], content_type: Option<&str>) -> Value {
    json!({
        "encoding": "base64",
        "mimeType": content_type,
        "data": base64::engine::general_purpose::STANDARD.encode(bytes)
    })
}

fn response_to_result(response: UpstreamResponse) -> Result<CallToolResult> {
    let UpstreamResponse {
        status,
        content_type,
        body,
    } = response;
    let ct = content_type.as_deref();
    let status_line = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );

    if status.is_success() {
        if body.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(status_line)]));
        }
        if is_image_content_type(ct) {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&body);
            let mime_type = content_type.unwrap_or_else(|| "image/*".to_string());
            return Ok(CallToolResult::success(vec![Content::image(b64, mime_type)]));
        }
        let text = match std::str::from_utf8(&body) {
            Ok(s) if is_json_content_type(ct) => serde_json::from_str::<Value>(s)
                .map_or_else(|_| s.to_string(), |v| v.to_string()),
            Ok(s) => s.to_string(),
            Err(_) => base64_json(&body, ct).to_string(),
        };
        return Ok(CallToolResult::success(vec![Content::text(text)]));
    }

    let body = if body.is_empty() {
        Value::Null
    } else if let Ok(s) = std::str::from_utf8(&body) {
        serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
    } else {
        base64_json(&body, ct)
    };
    let message = upstream_message(&body).unwrap_or(status_line);
    Err(ProxyError::UpstreamError {
        status: status.as_u16(),
        message,
        body,
    })
}

/// The human-readable part of an upstream error body.
fn upstream_message(body: &Value) -> Option<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    match body {
        Value::String(s) => non_empty(s),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .and_then(non_empty)
            .or_else(|| match map.get("error") {
                Some(Value::String(s)) => non_empty(s),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .and_then(non_empty),
                _ => None,
            }),
        _ => None,
    }
}
