//! `OpenAPI` 3.1 -> MCP tool proxy core.
//!
//! The pipeline is strictly two-phase:
//! - startup: [`loader`] parses and validates a document, [`synthesizer`] derives one tool per
//!   operation, [`auth`] freezes credentials, and [`registry`] ties them together;
//! - calls: [`dispatcher`] turns tool arguments into HTTP requests against the upstream API.
//!
//! The core never reads the environment. Everything arrives through [`config::ProxyConfig`].

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod synthesizer;

pub use config::ProxyConfig;
pub use error::{DeliveryOutcome, ProxyError, Result, Violation};
pub use registry::ToolRegistry;
pub use synthesizer::ToolDescriptor;
