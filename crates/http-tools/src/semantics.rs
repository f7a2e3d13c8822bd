//! HTTP method semantics (RFC 9110) as they matter to a tool proxy.
//!
//! Three decisions hang off the method:
//! - which MCP `ToolAnnotations` a tool advertises,
//! - whether a failed attempt may be retried automatically,
//! - whether arguments may be sent as a request body.

use reqwest::Method;
use rmcp::model::ToolAnnotations;

/// Coarse classification of a request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// GET / HEAD / OPTIONS / TRACE: no intended side effects.
    Safe,
    /// PUT / DELETE: side effects, but repeating them converges on the same state.
    Idempotent,
    /// POST / PATCH / extension methods: repeating may duplicate side effects.
    Unsafe,
}

impl MethodClass {
    #[must_use]
    pub fn of(method: &Method) -> Self {
        if *method == Method::GET
            || *method == Method::HEAD
            || *method == Method::OPTIONS
            || *method == Method::TRACE
        {
            Self::Safe
        } else if *method == Method::PUT || *method == Method::DELETE {
            Self::Idempotent
        } else {
            Self::Unsafe
        }
    }
}

/// Whether the proxy may transparently re-send a request after a transport failure.
///
/// Only GET and HEAD qualify. PUT/DELETE are idempotent on paper, but a proxy cannot know
/// whether an intermediate write landed, so they get exactly one attempt.
#[must_use]
pub fn is_retry_safe(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Whether tool arguments may be carried in a request body for this method.
#[must_use]
pub fn allows_request_body(method: &Method) -> bool {
    !(*method == Method::GET || *method == Method::HEAD || *method == Method::TRACE)
}

/// Generate MCP tool annotations based on HTTP method semantics.
///
/// `openWorldHint` is always `true`: every HTTP tool talks to an external system.
#[must_use]
pub fn annotations_for_method(method: &Method) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = if *method == Method::PATCH {
        // PATCH may or may not be idempotent; do not guess.
        (Some(false), Some(true), None)
    } else {
        match MethodClass::of(method) {
            MethodClass::Safe => (Some(true), Some(false), Some(true)),
            MethodClass::Idempotent => (Some(false), Some(true), Some(true)),
            MethodClass::Unsafe if *method == Method::POST => {
                (Some(false), Some(false), Some(false))
            }
            MethodClass::Unsafe => (None, None, None),
        }
    };

    ToolAnnotations {
        title: None,
        read_only_hint: read_only,
        destructive_hint: destructive,
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}
