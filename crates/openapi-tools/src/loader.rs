//! Spec loading and validation.
//!
//! Loading is fail-closed. A document goes through these steps, in order:
//! 1. read (`SpecUnreadable`);
//! 2. parse as JSON or YAML, where the root must be an object (`SpecMalformed`);
//! 3. hash check over the raw text, when configured;
//! 4. validate (`SpecInvalid`, itemized by JSON pointer). This runs the embedded 3.1
//!    structural schema, then checks that local `$ref`s resolve and that path placeholders
//!    are declared;
//! 5. build the typed [`SpecDocument`].

use crate::config::{HashPolicy, ProxyConfig};
use crate::document::{
    METHOD_ORDER, MediaKind, Operation, ParamLocation, Parameter, QueryStyle, RequestBody,
    SpecDocument, path_placeholders,
};
use crate::error::{ProxyError, Result, Violation};
use crate::resolver::{RefResolver, collect_refs, escape_pointer_token};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Structural JSON Schema (draft 2020-12) for `OpenAPI` 3.1 documents.
const OAS_31_SCHEMA: &str = include_str!("../schema/oas-3.1.json");

/// Options for [`load_from_path`] / [`load_from_str`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Expected `sha256:<hex>` of the source text.
    pub expected_hash: Option<String>,
    pub hash_policy: HashPolicy,
}

impl LoadOptions {
    #[must_use]
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            expected_hash: config.spec_hash.clone(),
            hash_policy: config.spec_hash_policy,
        }
    }
}

/// Load and validate a spec file.
///
/// # Errors
///
/// Returns `SpecUnreadable`, `SpecMalformed` or `SpecInvalid`; see the module docs.
pub fn load_from_path(path: &Path, options: &LoadOptions) -> Result<SpecDocument> {
    tracing::info!("Loading OpenAPI spec from {}", path.display());
    let location = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ProxyError::SpecUnreadable {
        path: location.clone(),
        source: e,
    })?;
    load_from_str(&content, &location, options)
}

/// Load and validate a spec held in memory. `location` only labels errors and logs.
///
/// # Errors
///
/// Returns `SpecMalformed` or `SpecInvalid`; see the module docs.
pub fn load_from_str(content: &str, location: &str, options: &LoadOptions) -> Result<SpecDocument> {
    let value = parse_document(content, location)?;

    let hash = compute_spec_hash(content);
    verify_hash(&hash, options, location)?;

    let violations = validate_document(&value)?;
    if !violations.is_empty() {
        tracing::warn!(
            location,
            violations = violations.len(),
            "OpenAPI spec failed validation"
        );
        return Err(ProxyError::SpecInvalid {
            location: location.to_string(),
            violations,
        });
    }

    let doc = build_document(value, hash).map_err(|v| ProxyError::SpecInvalid {
        location: location.to_string(),
        violations: vec![v],
    })?;
    tracing::info!(
        title = %doc.title,
        version = %doc.version,
        operations = doc.operations.len(),
        "Loaded OpenAPI spec"
    );
    Ok(doc)
}

/// `sha256:<hex>` of the spec source text.
#[must_use]
pub fn compute_spec_hash(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

fn verify_hash(actual: &str, options: &LoadOptions, location: &str) -> Result<()> {
    let Some(expected) = &options.expected_hash else {
        return Ok(());
    };
    let normalize = |h: &str| {
        let h = h.trim().to_ascii_lowercase();
        h.strip_prefix("sha256:").map(str::to_string).unwrap_or(h)
    };
    if normalize(expected) == normalize(actual) {
        return Ok(());
    }
    match options.hash_policy {
        HashPolicy::Fail => Err(ProxyError::SpecInvalid {
            location: location.to_string(),
            violations: vec![Violation::new(
                "",
                format!("Spec hash mismatch. Expected: {expected}, Got: {actual}"),
            )],
        }),
        HashPolicy::Warn => {
            tracing::warn!(
                "Spec hash mismatch for '{}'. Expected: {}, Got: {}",
                location,
                expected,
                actual
            );
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}

/// Parse JSON or YAML into a JSON value whose root is an object.
///
/// # Errors
///
/// Returns [`ProxyError::SpecMalformed`] if the text is not structured data or the root is not
/// an object.
pub fn parse_document(content: &str, location: &str) -> Result<Value> {
    let malformed = |message: String| ProxyError::SpecMalformed {
        location: location.to_string(),
        message,
    };

    let trimmed = content.trim_start();
    let value = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str::<Value>(content).map_err(|e| malformed(format!("invalid JSON: {e}")))?
    } else {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| malformed(format!("invalid YAML: {e}")))?;
        yaml_to_json(yaml).map_err(malformed)?
    };

    if !value.is_object() {
        return Err(malformed(format!(
            "document root must be an object, found {}",
            json_type_name(&value)
        )));
    }
    Ok(value)
}

/// Convert YAML to JSON, stringifying scalar mapping keys (YAML `200:` is an integer key).
fn yaml_to_json(value: serde_yaml::Value) -> std::result::Result<Value, String> {
    use serde_yaml::Value as Yaml;
    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("unsupported number '{n}'"))?
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut out = Map::new();
            for (k, v) in mapping {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err("unsupported non-scalar mapping key".to_string()),
                };
                out.insert(key, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate a parsed document. An empty result means the document is usable.
///
/// # Errors
///
/// Only fails if the embedded structural schema itself cannot be compiled.
pub fn validate_document(doc: &Value) -> Result<Vec<Violation>> {
    let mut violations = structural_violations(doc)?;
    violations.extend(reference_violations(doc));
    violations.extend(path_parameter_violations(doc));
    Ok(violations)
}

fn structural_violations(doc: &Value) -> Result<Vec<Violation>> {
    let schema: Value = serde_json::from_str(OAS_31_SCHEMA).map_err(|e| {
        ProxyError::ConfigInvalid(format!("embedded OpenAPI 3.1 schema is not valid JSON: {e}"))
    })?;
    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        ProxyError::ConfigInvalid(format!("embedded OpenAPI 3.1 schema failed to compile: {e}"))
    })?;
    Ok(validator
        .iter_errors(doc)
        .map(|e| Violation::new(e.instance_path().to_string(), e.to_string()))
        .collect())
}

fn reference_violations(doc: &Value) -> Vec<Violation> {
    let resolver = RefResolver::new(doc);
    collect_refs(doc, "")
        .into_iter()
        .filter_map(|(pointer, reference)| {
            resolver
                .resolve_ref(&reference)
                .err()
                .map(|e| Violation::new(pointer, e.to_string()))
        })
        .collect()
}

fn path_parameter_violations(doc: &Value) -> Vec<Violation> {
    let resolver = RefResolver::new(doc);
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (path, item) in paths {
        let placeholders = path_placeholders(path);
        if placeholders.is_empty() {
            continue;
        }
        // Unresolvable path items are reported by `reference_violations`.
        let Ok(item) = resolver.resolve(item) else {
            continue;
        };
        let item_pointer = format!("/paths/{}", escape_pointer_token(path));
        let shared = declared_path_params(&resolver, item.get("parameters"));

        for method in METHOD_ORDER {
            let Some(op) = item.get(method.key()).filter(|v| v.is_object()) else {
                continue;
            };
            let own = declared_path_params(&resolver, op.get("parameters"));
            for name in &placeholders {
                if !shared.contains(*name) && !own.contains(*name) {
                    out.push(Violation::new(
                        format!("{item_pointer}/{}", method.key()),
                        format!(
                            "path placeholder '{{{name}}}' in '{path}' has no matching path parameter"
                        ),
                    ));
                }
            }
        }
    }
    out
}

fn declared_path_params<'a>(
    resolver: &RefResolver<'a>,
    params: Option<&'a Value>,
) -> HashSet<&'a str> {
    params
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|p| resolver.resolve(p).ok())
        .filter(|p| p.get("in").and_then(Value::as_str) == Some("path"))
        .filter_map(|p| p.get("name").and_then(Value::as_str))
        .collect()
}

fn build_document(raw: Value, hash: String) -> std::result::Result<SpecDocument, Violation> {
    let resolver = RefResolver::new(&raw);
    let servers = server_urls(raw.get("servers"));

    let mut operations = Vec::new();
    if let Some(paths) = raw.get("paths").and_then(Value::as_object) {
        for (path, item) in paths {
            if !path.starts_with('/') {
                continue;
            }
            let item_pointer = format!("/paths/{}", escape_pointer_token(path));
            let item = resolver
                .resolve(item)
                .map_err(|e| Violation::new(item_pointer.clone(), e.to_string()))?;

            for method in METHOD_ORDER {
                let Some(op) = item.get(method.key()).filter(|v| v.is_object()) else {
                    continue;
                };
                let op_pointer = format!("{item_pointer}/{}", method.key());
                let parameters = merge_parameters(
                    &resolver,
                    item.get("parameters"),
                    &format!("{item_pointer}/parameters"),
                    op.get("parameters"),
                    &format!("{op_pointer}/parameters"),
                )?;
                let request_body = match op.get("requestBody") {
                    Some(body) => {
                        parse_request_body(&resolver, body, &format!("{op_pointer}/requestBody"))?
                    }
                    None => None,
                };

                operations.push(Operation {
                    operation_id: non_empty_str(op, "operationId"),
                    method,
                    path: path.clone(),
                    summary: non_empty_str(op, "summary"),
                    description: non_empty_str(op, "description"),
                    parameters,
                    request_body,
                });
            }
        }
    }

    Ok(SpecDocument::new(raw, servers, operations, hash))
}

/// Merge path-item and operation parameters; the operation wins on the same `(in, name)`.
fn merge_parameters(
    resolver: &RefResolver<'_>,
    shared: Option<&Value>,
    shared_pointer: &str,
    own: Option<&Value>,
    own_pointer: &str,
) -> std::result::Result<Vec<Parameter>, Violation> {
    let mut merged: Vec<Parameter> = Vec::new();
    let mut index: HashMap<(ParamLocation, String), usize> = HashMap::new();

    for (list, pointer) in [(shared, shared_pointer), (own, own_pointer)] {
        let items = list.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
        for (i, p) in items.iter().enumerate() {
            let param = parse_parameter(resolver, p, &format!("{pointer}/{i}"))?;
            let key = (param.location, param.name.clone());
            if let Some(existing) = index.get(&key).copied() {
                merged[existing] = param;
            } else {
                index.insert(key, merged.len());
                merged.push(param);
            }
        }
    }
    Ok(merged)
}

fn parse_parameter(
    resolver: &RefResolver<'_>,
    value: &Value,
    pointer: &str,
) -> std::result::Result<Parameter, Violation> {
    let p = resolver
        .resolve(value)
        .map_err(|e| Violation::new(pointer, e.to_string()))?;
    let name = p
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Violation::new(pointer, "parameter is missing 'name'"))?;
    let location = p
        .get("in")
        .and_then(Value::as_str)
        .and_then(ParamLocation::parse)
        .ok_or_else(|| Violation::new(pointer, "parameter has no valid 'in'"))?;

    let schema = p
        .get("schema")
        .cloned()
        .or_else(|| {
            p.get("content")
                .and_then(Value::as_object)
                .and_then(|c| c.values().next())
                .and_then(|m| m.get("schema"))
                .cloned()
        })
        .unwrap_or_else(|| json!({}));
    let style = p
        .get("style")
        .and_then(Value::as_str)
        .and_then(QueryStyle::parse)
        .unwrap_or_default();

    Ok(Parameter {
        name: name.to_string(),
        location,
        required: location == ParamLocation::Path
            || p.get("required").and_then(Value::as_bool).unwrap_or(false),
        schema,
        description: non_empty_str(p, "description"),
        style,
        explode: p
            .get("explode")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| style.default_explode()),
        allow_reserved: p
            .get("allowReserved")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        overridable: p
            .get("x-overridable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_request_body(
    resolver: &RefResolver<'_>,
    value: &Value,
    pointer: &str,
) -> std::result::Result<Option<RequestBody>, Violation> {
    let body = resolver
        .resolve(value)
        .map_err(|e| Violation::new(pointer, e.to_string()))?;
    let Some(content) = body.get("content").and_then(Value::as_object) else {
        return Ok(None);
    };
    let Some((media_type, media)) = select_media_type(content) else {
        return Ok(None);
    };

    Ok(Some(RequestBody {
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
        media_type: media_type.clone(),
        schema: media.get("schema").cloned().unwrap_or_else(|| json!({})),
        description: non_empty_str(body, "description"),
    }))
}

/// Prefer JSON, then form encoding, then whatever is listed first.
fn select_media_type(content: &Map<String, Value>) -> Option<(&String, &Value)> {
    content
        .iter()
        .find(|(k, _)| MediaKind::of(k) == MediaKind::Json)
        .or_else(|| {
            content
                .iter()
                .find(|(k, _)| MediaKind::of(k) == MediaKind::Form)
        })
        .or_else(|| content.iter().next())
}

fn server_urls(servers: Option<&Value>) -> Vec<String> {
    servers
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| {
            let mut url = s.get("url")?.as_str()?.to_string();
            if let Some(vars) = s.get("variables").and_then(Value::as_object) {
                for (name, var) in vars {
                    if let Some(default) = var.get("default").and_then(Value::as_str) {
                        url = url.replace(&format!("{{{name}}}"), default);
                    }
                }
            }
            Some(url)
        })
        .collect()
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HttpMethod;
    use std::fs;
    use tempfile::tempdir;

    fn load(doc: &Value) -> Result<SpecDocument> {
        load_from_str(&doc.to_string(), "test.json", &LoadOptions::default())
    }

    fn violations(err: ProxyError) -> Vec<Violation> {
        match err {
            ProxyError::SpecInvalid { violations, .. } => violations,
            other => panic!("expected SpecInvalid, got {other:?}"),
        }
    }

    fn items_spec() -> Value {
        json!({
            "openapi": "3.1.0",
            "info": { "title": "Items", "version": "1.0.0" },
            "servers": [{ "url": "https://{env}.example.com/api", "variables": { "env": { "default": "prod" } } }],
            "paths": {
                "/v1/items/{id}": {
                    "parameters": [
                        { "name": "id", "in": "path", "required": true, "schema": { "type": "string" } },
                        { "name": "verbose", "in": "query", "schema": { "type": "boolean" } }
                    ],
                    "patch": { "operationId": "patchItem", "responses": { "200": { "description": "ok" } } },
                    "get": {
                        "operationId": "getItem",
                        "parameters": [
                            { "name": "verbose", "in": "query", "required": true, "schema": { "type": "integer" } }
                        ],
                        "responses": { "200": { "description": "ok" } }
                    }
                },
                "/v1/items": {
                    "post": {
                        "requestBody": { "$ref": "#/components/requestBodies/NewItem" },
                        "responses": { "201": { "description": "created" } }
                    }
                }
            },
            "components": {
                "schemas": { "NewItem": { "type": "object", "properties": { "name": { "type": "string" } } } },
                "requestBodies": {
                    "NewItem": {
                        "required": true,
                        "content": {
                            "text/plain": { "schema": { "type": "string" } },
                            "application/json": { "schema": { "$ref": "#/components/schemas/NewItem" } }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn loads_operations_in_document_then_method_order() {
        let doc = load(&items_spec()).expect("load");
        assert_eq!(doc.title, "Items");
        assert_eq!(doc.servers, vec!["https://prod.example.com/api".to_string()]);

        let sigs: Vec<String> = doc.operations.iter().map(Operation::signature).collect();
        assert_eq!(
            sigs,
            vec![
                "GET /v1/items/{id}".to_string(),
                "PATCH /v1/items/{id}".to_string(),
                "POST /v1/items".to_string(),
            ]
        );
        assert!(doc.hash.starts_with("sha256:"));
    }

    #[test]
    fn merges_path_item_parameters_and_operation_wins() {
        let doc = load(&items_spec()).expect("load");
        let get = &doc.operations[0];
        assert_eq!(get.method, HttpMethod::Get);
        assert_eq!(get.parameters.len(), 2);
        let verbose = get
            .parameters
            .iter()
            .find(|p| p.name == "verbose")
            .expect("verbose");
        assert!(verbose.required);
        assert_eq!(verbose.schema, json!({ "type": "integer" }));

        let patch = &doc.operations[1];
        let verbose = patch
            .parameters
            .iter()
            .find(|p| p.name == "verbose")
            .expect("verbose");
        assert!(!verbose.required);
    }

    #[test]
    fn resolves_request_body_refs_and_prefers_json() {
        let doc = load(&items_spec()).expect("load");
        let body = doc.operations[2].request_body.as_ref().expect("body");
        assert!(body.required);
        assert_eq!(body.media_type, "application/json");
        assert_eq!(body.schema, json!({ "$ref": "#/components/schemas/NewItem" }));
    }

    #[test]
    fn yaml_with_integer_response_keys_is_accepted() {
        let yaml = r"
openapi: 3.1.0
info: { title: Y, version: '1' }
paths:
  /ping:
    get:
      responses:
        200:
          description: ok
";
        let doc = load_from_str(yaml, "test.yaml", &LoadOptions::default()).expect("load");
        assert_eq!(doc.operations.len(), 1);
    }

    #[test]
    fn malformed_input_is_rejected_before_validation() {
        for content in ["{ not json", "[1, 2]", "42", "", "a: [unclosed"] {
            let err = load_from_str(content, "bad", &LoadOptions::default()).unwrap_err();
            assert!(
                matches!(err, ProxyError::SpecMalformed { .. }),
                "{content:?} => {err:?}"
            );
        }
    }

    #[test]
    fn wrong_version_and_missing_info_are_invalid() {
        let err = load(&json!({ "openapi": "3.0.3", "paths": {} })).unwrap_err();
        let v = violations(err);
        assert!(v.iter().any(|v| v.pointer.is_empty()), "{v:?}");
        assert!(v.iter().any(|v| v.pointer == "/openapi"), "{v:?}");
    }

    #[test]
    fn unresolvable_and_external_refs_are_invalid() {
        let mut spec = items_spec();
        spec["paths"]["/v1/items"]["post"]["requestBody"] =
            json!({ "$ref": "#/components/requestBodies/Missing" });
        spec["paths"]["/v1/items/{id}"]["get"]["parameters"] =
            json!([{ "$ref": "common.yaml#/components/parameters/Verbose" }]);

        let v = violations(load(&spec).unwrap_err());
        assert!(
            v.iter()
                .any(|v| v.pointer == "/paths/~1v1~1items/post/requestBody"
                    && v.message.contains("unresolved")),
            "{v:?}"
        );
        assert!(
            v.iter()
                .any(|v| v.pointer == "/paths/~1v1~1items~1{id}/get/parameters/0"
                    && v.message.contains("external")),
            "{v:?}"
        );
    }

    #[test]
    fn undeclared_path_placeholder_is_invalid() {
        let spec = json!({
            "openapi": "3.1.0",
            "info": { "title": "T", "version": "1" },
            "paths": { "/users/{userId}": { "get": { "responses": {} } } }
        });
        let v = violations(load(&spec).unwrap_err());
        assert_eq!(v.len(), 1, "{v:?}");
        assert_eq!(v[0].pointer, "/paths/~1users~1{userId}/get");
        assert!(v[0].message.contains("{userId}"));
    }

    #[test]
    fn hash_mismatch_follows_policy() {
        let content = items_spec().to_string();
        let mut options = LoadOptions {
            expected_hash: Some("sha256:deadbeef".to_string()),
            hash_policy: HashPolicy::Fail,
        };
        let v = violations(load_from_str(&content, "x", &options).unwrap_err());
        assert_eq!(v[0].pointer, "");
        assert!(v[0].message.contains("hash mismatch"));

        options.hash_policy = HashPolicy::Warn;
        assert!(load_from_str(&content, "x", &options).is_ok());

        options.hash_policy = HashPolicy::Fail;
        options.expected_hash = Some(compute_spec_hash(&content).to_uppercase());
        assert!(load_from_str(&content, "x", &options).is_ok());
    }

    #[test]
    fn malformed_input_is_reported_before_hash_mismatch() {
        let options = LoadOptions {
            expected_hash: Some("sha256:00".to_string()),
            hash_policy: HashPolicy::Fail,
        };
        let err = load_from_str("{ not json", "x", &options).unwrap_err();
        assert!(matches!(err, ProxyError::SpecMalformed { .. }), "{err:?}");
        assert_eq!(err.kind(), "SpecMalformed");
    }

    #[test]
    fn unreadable_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let err = load_from_path(&dir.path().join("missing.json"), &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProxyError::SpecUnreadable { .. }), "{err:?}");
    }

    #[test]
    fn loads_from_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("openapi.json");
        fs::write(&path, items_spec().to_string()).expect("write");
        let doc = load_from_path(&path, &LoadOptions::default()).expect("load");
        assert_eq!(doc.operations.len(), 3);
    }
}
