//! Error types for `toolbridge-openapi-tools`.
//!
//! Variants split into two phases:
//! - startup errors are fatal and returned as `Err` from registry construction;
//! - tool-level errors are rendered into an `isError: true` [`CallToolResult`].
//!
//! [`ProxyError::TransportFailure`] is the exception: it happens at call time but is returned as `Err`,
//! because no response exists to render.

use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

/// A single validation finding, located by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON pointer into the validated document (spec or tool arguments). `""` is the root.
    pub pointer: String,
    pub message: String,
}

impl Violation {
    pub fn new(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.pointer, self.message)
        }
    }
}

/// Whether a failed request may have reached the upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOutcome {
    /// The request provably never left the proxy (connect failure, blocked before send).
    NotDelivered,
    /// The request may have been received and processed (timeout, reset, body read failure).
    Unknown,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::NotDelivered => f.write_str("not delivered"),
            DeliveryOutcome::Unknown => f.write_str("unknown"),
        }
    }
}

/// Main error type for the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to read spec file '{path}': {source}")]
    SpecUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Input is not parseable structured data, or its root is not an object.
    #[error("malformed spec '{location}': {message}")]
    SpecMalformed { location: String, message: String },

    /// Parsed, but does not describe a valid `OpenAPI` 3.1 document.
    #[error("invalid spec '{location}': {}", summarize(.violations))]
    SpecInvalid {
        location: String,
        violations: Vec<Violation>,
    },

    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool '{tool}': {}", describe_invalid(.missing, .violations))]
    InvalidArguments {
        tool: String,
        missing: Vec<String>,
        violations: Vec<Violation>,
    },

    #[error("API returned {status}: {message}")]
    UpstreamError {
        status: u16,
        message: String,
        body: Value,
    },

    #[error("Outbound HTTP blocked: {0}")]
    OutboundBlocked(String),

    #[error("transport failure calling '{tool}' after {attempts} attempt(s) (outcome: {outcome}): {message}")]
    TransportFailure {
        tool: String,
        message: String,
        outcome: DeliveryOutcome,
        attempts: u32,
    },
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Stable variant name, used as the `error` field of rendered tool errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::SpecUnreadable { .. } => "SpecUnreadable",
            ProxyError::SpecMalformed { .. } => "SpecMalformed",
            ProxyError::SpecInvalid { .. } => "SpecInvalid",
            ProxyError::ConfigInvalid(_) => "ConfigInvalid",
            ProxyError::UnknownTool { .. } => "UnknownTool",
            ProxyError::InvalidArguments { .. } => "InvalidArguments",
            ProxyError::UpstreamError { .. } => "UpstreamError",
            ProxyError::OutboundBlocked(_) => "OutboundBlocked",
            ProxyError::TransportFailure { .. } => "TransportFailure",
        }
    }

    /// Errors that abort registry construction.
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            ProxyError::SpecUnreadable { .. }
                | ProxyError::SpecMalformed { .. }
                | ProxyError::SpecInvalid { .. }
                | ProxyError::ConfigInvalid(_)
        )
    }

    /// Errors surfaced to the caller as an `isError` tool result.
    #[must_use]
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            ProxyError::UnknownTool { .. }
                | ProxyError::InvalidArguments { .. }
                | ProxyError::UpstreamError { .. }
                | ProxyError::OutboundBlocked(_)
        )
    }

    /// Structured JSON rendering: `{"error": "<Kind>", "message": ..., <variant fields>}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        let extra = match self {
            ProxyError::SpecUnreadable { path, .. } => json!({ "path": path }),
            ProxyError::SpecMalformed { location, .. } => json!({ "location": location }),
            ProxyError::SpecInvalid {
                location,
                violations,
            } => json!({ "location": location, "violations": violations }),
            ProxyError::ConfigInvalid(_) | ProxyError::OutboundBlocked(_) => json!({}),
            ProxyError::UnknownTool { name } => json!({ "name": name }),
            ProxyError::InvalidArguments {
                tool,
                missing,
                violations,
            } => json!({ "tool": tool, "missing": missing, "violations": violations }),
            ProxyError::UpstreamError { status, body, .. } => json!({ "status": status, "body": body }),
            ProxyError::TransportFailure {
                tool,
                outcome,
                attempts,
                ..
            } => json!({ "tool": tool, "outcome": outcome, "attempts": attempts }),
        };
        if let (Some(obj), Value::Object(extra)) = (out.as_object_mut(), extra) {
            obj.extend(extra);
        }
        out
    }

    /// Render as an MCP error result (`isError: true`, one JSON text block).
    #[must_use]
    pub fn to_call_result(&self) -> CallToolResult {
        let body = self.to_json();
        let text = serde_json::to_string(&body).unwrap_or_else(|_| body.to_string());
        CallToolResult::error(vec![Content::text(text)])
    }
}

fn summarize(violations: &[Violation]) -> String {
    match violations {
        [] => "no details".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

fn describe_invalid(missing: &[String], violations: &[Violation]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required argument(s): {}", missing.join(", ")));
    }
    if !violations.is_empty() {
        parts.push(summarize(violations));
    }
    if parts.is_empty() {
        "no details".to_string()
    } else {
        parts.join("; ")
    }
}
