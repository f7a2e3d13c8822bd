//! Tool registry: the one object a server or CLI needs.
//!
//! [`ToolRegistry::build`] runs the whole startup phase (load, validate, synthesize, resolve
//! auth, build the HTTP client) and either returns a complete registry or a fatal error.
//! After that the registry is read-only and cheap to clone.

use crate::auth::{resolve_auth, resolve_base_url};
use crate::config::ProxyConfig;
use crate::dispatcher::Dispatcher;
use crate::document::SpecDocument;
use crate::error::{ProxyError, Result};
use crate::loader::{LoadOptions, load_from_path};
use crate::synthesizer::{ToolDescriptor, ToolFilter, synthesize};
use rmcp::model::{CallToolResult, Tool};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    title: String,
    version: String,
    spec_hash: String,
    operation_count: usize,
    descriptors: Vec<ToolDescriptor>,
    tools: Vec<Tool>,
    dispatcher: Dispatcher,
}

impl ToolRegistry {
    /// Load the configured spec file and build the registry.
    ///
    /// # Errors
    ///
    /// Returns a startup error ([`ProxyError::is_startup`]) if the spec is missing, unreadable
    /// or invalid, or if the configuration is.
    pub fn build(config: &ProxyConfig) -> Result<Self> {
        let Some(spec) = &config.spec else {
            return Err(ProxyError::ConfigInvalid(
                "no spec configured (set `spec` or pass --spec)".to_string(),
            ));
        };
        let doc = load_from_path(spec, &LoadOptions::from_config(config))?;
        Self::from_document(doc, config)
    }

    /// Build the registry from an already loaded document.
    ///
    /// `config.spec` and the hash settings are ignored here.
    ///
    /// # Errors
    ///
    /// See [`ToolRegistry::build`].
    pub fn from_document(doc: SpecDocument, config: &ProxyConfig) -> Result<Self> {
        let filter = ToolFilter::from_config(&config.auto_discover);
        let (descriptors, bindings): (Vec<_>, Vec<_>) = synthesize(&doc, &filter)?.into_iter().unzip();

        let auth = resolve_auth(&config.auth_settings())?;
        let base_url = resolve_base_url(config.base_url.as_deref(), &doc.servers)?;
        let dispatcher = Dispatcher::new(
            bindings,
            auth,
            base_url,
            config.outbound.to_safety(),
            &config.call,
        )?;

        let tools = descriptors.iter().map(ToolDescriptor::to_tool).collect();

        tracing::info!(
            "Discovered {} tools from OpenAPI spec '{}'",
            descriptors.len(),
            doc.title
        );
        if descriptors.len() < doc.operations.len() {
            tracing::debug!(
                skipped = doc.operations.len() - descriptors.len(),
                "Operations filtered out by autoDiscover"
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                title: doc.title,
                version: doc.version,
                spec_hash: doc.hash,
                operation_count: doc.operations.len(),
                descriptors,
                tools,
                dispatcher,
            }),
        })
    }

    /// MCP tool listing, in document order.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.inner.tools.clone()
    }

    #[must_use]
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.inner.descriptors
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.inner.descriptors.iter().find(|d| d.name == name)
    }

    /// Dispatch one tool call. See [`Dispatcher::call`].
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TransportFailure`] if the upstream could not be reached.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.inner.dispatcher.call(name, arguments).await
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.dispatcher.base_url()
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// `sha256:<hex>` of the loaded spec text.
    #[must_use]
    pub fn spec_hash(&self) -> &str {
        &self.inner.spec_hash
    }

    /// Operations in the document, before filtering.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.inner.operation_count
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.inner.descriptors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoDiscoverConfig;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    const SPEC: &str = r#"
openapi: 3.1.0
info:
  title: Items
  version: "2.0"
servers:
  - url: https://{region}.example.com/v1
    variables:
      region:
        default: eu
paths:
  /items:
    get:
      operationId: listItems
    post:
      operationId: createItem
  /items/{id}:
    parameters:
      - { name: id, in: path, required: true, schema: { type: string } }
    get:
      operationId: getItem
"#;

    fn write_spec() -> (tempfile::TempDir, ProxyConfig) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("openapi.yaml");
        fs::write(&path, SPEC).expect("write");
        let config = ProxyConfig {
            spec: Some(path),
            token: Some("abc".to_string()),
            ..Default::default()
        };
        (dir, config)
    }

    #[test]
    fn builds_from_file_with_server_default() {
        let (_dir, config) = write_spec();
        let registry = ToolRegistry::build(&config).expect("build");

        assert_eq!(registry.title(), "Items");
        assert_eq!(registry.version(), "2.0");
        assert_eq!(registry.operation_count(), 3);
        assert_eq!(registry.tool_count(), 3);
        assert_eq!(registry.base_url().as_str(), "https://eu.example.com/v1");
        assert!(registry.spec_hash().starts_with("sha256:"));

        let names: Vec<String> = registry
            .list_tools()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(names, vec!["listItems", "createItem", "getItem"]);
        assert_eq!(
            serde_json::to_string(&registry.list_tools()).expect("json"),
            serde_json::to_string(&registry.list_tools()).expect("json"),
            "listing is stable"
        );
        assert_eq!(
            registry
                .descriptor("getItem")
                .map(|d| d.input_schema["required"].clone()),
            Some(json!(["id"]))
        );
    }

    #[test]
    fn tools_carry_method_annotations() {
        let (_dir, config) = write_spec();
        let registry = ToolRegistry::build(&config).expect("build");
        let tools = registry.list_tools();
        let create = tools
            .iter()
            .find(|t| t.name == "createItem")
            .expect("createItem");
        let annotations = create.annotations.as_ref().expect("annotations");
        assert_eq!(annotations.read_only_hint, Some(false));
        assert_eq!(annotations.idempotent_hint, Some(false));
    }

    #[test]
    fn auto_discover_filters_tools() {
        let (_dir, mut config) = write_spec();
        config.auto_discover = AutoDiscoverConfig::Detailed {
            include: vec!["GET *".to_string()],
            exclude: Vec::new(),
        };
        let registry = ToolRegistry::build(&config).expect("build");
        assert_eq!(registry.operation_count(), 3);
        assert_eq!(registry.tool_count(), 2);
    }

    #[test]
    fn startup_errors_are_fatal() {
        let missing_spec = ToolRegistry::build(&ProxyConfig::default()).unwrap_err();
        assert!(matches!(missing_spec, ProxyError::ConfigInvalid(_)));
        assert!(missing_spec.is_startup());

        let (_dir, mut config) = write_spec();
        config.token = None;
        let no_auth = ToolRegistry::build(&config).unwrap_err();
        assert!(matches!(no_auth, ProxyError::ConfigInvalid(_)), "{no_auth}");

        let (_dir2, mut config) = write_spec();
        config.base_url = Some("ftp://example.com".to_string());
        let bad_base = ToolRegistry::build(&config).unwrap_err();
        assert!(matches!(bad_base, ProxyError::ConfigInvalid(_)), "{bad_base}");

        let (_dir3, mut config) = write_spec();
        config.spec = config.spec.map(|p| p.with_file_name("missing.yaml"));
        let unreadable = ToolRegistry::build(&config).unwrap_err();
        assert!(matches!(unreadable, ProxyError::SpecUnreadable { .. }));
    }

    #[test]
    fn registry_is_shareable() {
        fn assert_shareable<T: Clone + Send + Sync + 'static>() {}
        assert_shareable::<ToolRegistry>();
    }
}
