//! Outbound HTTP policy shared by toolbridge tool sources.
//!
//! This crate is intended to be used by `toolbridge-openapi-tools` (and any future tool source
//! that issues HTTP calls on behalf of a tool).
//!
//! It intentionally contains **no** `OpenAPI` knowledge; it only decides *whether* and *how often*
//! an outbound request may be sent.

pub mod retry;
pub mod safety;
pub mod semantics;
