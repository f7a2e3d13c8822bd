//! Tool synthesis: one MCP tool per selected `OpenAPI` operation.
//!
//! Synthesis is pure and deterministic. The same document and filter always yield the same
//! descriptors, in document order.
//!
//! Naming (first come, first served, in document order):
//! - base name: the sanitized `operationId`, else the canonical `method_path` name;
//! - a later operation whose base name is taken becomes `{base}__{canonical}`;
//! - if that is taken too, `_2`, `_3`, ... is appended.
//!
//! All names are capped at [`MAX_TOOL_NAME_LEN`] characters.
//!
//! Request bodies are promoted to top-level arguments when the body schema is a plain object
//! whose property names don't collide with parameters; otherwise the body is a single `body`
//! (or `requestBody`) argument.

use crate::config::AutoDiscoverConfig;
use crate::document::{
    HttpMethod, MediaKind, Operation, ParamLocation, QueryStyle, RequestBody, SpecDocument,
};
use crate::error::{ProxyError, Result, Violation};
use crate::resolver::{
    RefResolver, escape_pointer_token, is_data_keyword, is_name_map_keyword, local_pointer,
    unescape_pointer_token,
};
use regex::Regex;
use rmcp::model::{JsonObject, Tool, ToolAnnotations};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};
use toolbridge_http_tools::semantics::{allows_request_body, annotations_for_method};

/// Upper bound for tool names (common MCP client limit).
pub const MAX_TOOL_NAME_LEN: usize = 64;

static PATH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("static regex"));
static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static regex"));
static NON_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("static regex"));

/// Read-only description of one tool, as advertised to MCP clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: JsonObject,
    pub method: HttpMethod,
    pub path: String,
}

impl ToolDescriptor {
    #[must_use]
    pub fn annotations(&self) -> ToolAnnotations {
        annotations_for_method(&self.method.to_reqwest())
    }

    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::new(self.input_schema.clone()),
        );
        tool.annotations = Some(self.annotations());
        tool
    }
}

/// How one tool argument maps onto an HTTP parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamBinding {
    /// Property name in the tool's input schema.
    pub arg_name: String,
    /// Parameter name on the wire.
    pub wire_name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    /// Header arguments only: may replace a configured (protected) header.
    pub overridable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "shape")]
pub enum BodyShape {
    /// Each listed argument is one top-level field of the body object.
    Promoted { fields: Vec<String> },
    /// The whole body is the value of one argument.
    Nested { arg_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyBinding {
    pub shape: BodyShape,
    pub media_type: String,
    pub kind: MediaKind,
    pub required: bool,
}

/// Everything the dispatcher needs to turn arguments into a request for one tool.
pub struct OperationBinding {
    pub tool_name: String,
    pub method: HttpMethod,
    pub path_template: String,
    pub params: Vec<ParamBinding>,
    pub body: Option<BodyBinding>,
    /// Argument names that must be present (non-null).
    pub required_args: Vec<String>,
    /// Every argument name the input schema declares.
    pub known_args: Vec<String>,
    validator: jsonschema::Validator,
}

impl OperationBinding {
    /// Compiled validator for the tool's input schema.
    #[must_use]
    pub fn validator(&self) -> &jsonschema::Validator {
        &self.validator
    }
}

impl fmt::Debug for OperationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationBinding")
            .field("tool_name", &self.tool_name)
            .field("method", &self.method)
            .field("path_template", &self.path_template)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("required_args", &self.required_args)
            .field("known_args", &self.known_args)
            .finish_non_exhaustive()
    }
}

// The validator is compiled from the descriptor's input schema, so it carries no extra state.
impl PartialEq for OperationBinding {
    fn eq(&self, other: &Self) -> bool {
        self.tool_name == other.tool_name
            && self.method == other.method
            && self.path_template == other.path_template
            && self.params == other.params
            && self.body == other.body
            && self.required_args == other.required_args
            && self.known_args == other.known_args
    }
}

/// Operator filter over `"METHOD /path"` signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFilter {
    enabled: bool,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Default for ToolFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl ToolFilter {
    #[must_use]
    pub fn all() -> Self {
        Self {
            enabled: true,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AutoDiscoverConfig) -> Self {
        Self {
            enabled: config.is_enabled(),
            include: config.include_patterns().to_vec(),
            exclude: config.exclude_patterns().to_vec(),
        }
    }

    #[must_use]
    pub fn selects(&self, op: &Operation) -> bool {
        if !self.enabled {
            return false;
        }
        let signature = op.signature();

        // Exclude patterns win.
        if self.exclude.iter().any(|p| glob_match(p, &signature)) {
            return false;
        }

        // If include patterns are specified, must match at least one.
        self.include.is_empty() || self.include.iter().any(|p| glob_match(p, &signature))
    }
}

/// Build one `(descriptor, binding)` pair per operation selected by `filter`.
///
/// # Errors
///
/// Returns [`ProxyError::SpecInvalid`] if a synthesized input schema fails to compile.
pub fn synthesize(
    doc: &SpecDocument,
    filter: &ToolFilter,
) -> Result<Vec<(ToolDescriptor, OperationBinding)>> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for op in doc.operations.iter().filter(|op| filter.selects(op)) {
        let canonical = generate_canonical_name(op.method.key(), &op.path);
        let base = op
            .operation_id
            .as_deref()
            .map(sanitize_tool_name)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| canonical.clone());
        let name = reserve_unique_tool_name(&mut taken, &base, &canonical);
        if name != base {
            tracing::debug!(tool = %name, base = %base, "Renamed colliding tool");
        }
        out.push(synthesize_operation(doc, op, name)?);
    }

    Ok(out)
}

fn synthesize_operation<'d>(
    doc: &'d SpecDocument,
    op: &'d Operation,
    name: String,
) -> Result<(ToolDescriptor, OperationBinding)> {
    let mut rewriter = SchemaRewriter::new(doc);
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    let mut params = Vec::new();

    // Path, then query, header, cookie; document order within each location.
    let mut ordered: Vec<_> = op.parameters.iter().collect();
    ordered.sort_by_key(|p| p.location);

    for p in ordered {
        if p.location == ParamLocation::Header && is_ignored_header_param(&p.name) {
            tracing::debug!(tool = %name, header = %p.name, "Ignoring reserved header parameter");
            continue;
        }
        let mut arg_name = p.name.clone();
        if properties.contains_key(&arg_name) {
            arg_name = unique_key(&properties, &format!("{}_{}", p.name, p.location.as_str()));
        }

        let schema = with_description(rewriter.rewrite(&p.schema), p.description.as_deref());
        properties.insert(arg_name.clone(), schema);
        if p.required {
            required.push(arg_name.clone());
        }
        params.push(ParamBinding {
            arg_name,
            wire_name: p.name.clone(),
            location: p.location,
            required: p.required,
            style: p.style,
            explode: p.explode,
            allow_reserved: p.allow_reserved,
            overridable: p.overridable,
        });
    }

    let body = match &op.request_body {
        Some(_) if !allows_request_body(&op.method.to_reqwest()) => {
            tracing::warn!(
                tool = %name,
                "{} declares a request body; it is not exposed",
                op.signature()
            );
            None
        }
        Some(body) => Some(bind_body(
            &mut rewriter,
            body,
            &mut properties,
            &mut required,
        )),
        None => None,
    };

    let known_args: Vec<String> = properties.keys().cloned().collect();
    let mut input_schema = JsonObject::new();
    input_schema.insert("type".to_string(), json!("object"));
    input_schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        input_schema.insert("required".to_string(), json!(required));
    }
    let defs = rewriter.into_defs();
    if !defs.is_empty() {
        input_schema.insert(
            "$defs".to_string(),
            Value::Object(defs.into_iter().collect()),
        );
    }

    let validator = jsonschema::validator_for(&Value::Object(input_schema.clone())).map_err(|e| {
        ProxyError::SpecInvalid {
            location: op.signature(),
            violations: vec![Violation::new(
                format!(
                    "/paths/{}/{}",
                    escape_pointer_token(&op.path),
                    op.method.key()
                ),
                format!("input schema for tool '{name}' does not compile: {e}"),
            )],
        }
    })?;

    let description = op
        .summary
        .clone()
        .or_else(|| op.description.clone())
        .unwrap_or_else(|| format!("Calls {}", op.signature()));

    let descriptor = ToolDescriptor {
        name: name.clone(),
        description,
        input_schema,
        method: op.method,
        path: op.path.clone(),
    };
    let binding = OperationBinding {
        tool_name: name,
        method: op.method,
        path_template: op.path.clone(),
        params,
        body,
        required_args: required,
        known_args,
        validator,
    };
    Ok((descriptor, binding))
}

fn bind_body<'d>(
    rewriter: &mut SchemaRewriter<'d>,
    body: &'d RequestBody,
    properties: &mut Map<String, Value>,
    required: &mut Vec<String>,
) -> BodyBinding {
    let kind = MediaKind::of(&body.media_type);
    let resolved = rewriter
        .resolver
        .resolve(&body.schema)
        .unwrap_or(&body.schema);

    let promotable = (kind != MediaKind::Raw)
        .then(|| promotable_properties(resolved))
        .flatten()
        .filter(|props| props.keys().all(|k| !properties.contains_key(k)));

    let shape = if let Some(props) = promotable {
        let body_required: HashSet<&str> = resolved
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect();
        let mut fields = Vec::with_capacity(props.len());
        for (prop, schema) in props {
            properties.insert(prop.clone(), rewriter.rewrite(schema));
            if body.required && body_required.contains(prop.as_str()) {
                required.push(prop.clone());
            }
            fields.push(prop.clone());
        }
        BodyShape::Promoted { fields }
    } else {
        let arg_name = if properties.contains_key("body") {
            unique_key(properties, "requestBody")
        } else {
            "body".to_string()
        };
        let schema = with_description(rewriter.rewrite(&body.schema), body.description.as_deref());
        properties.insert(arg_name.clone(), schema);
        if body.required {
            required.push(arg_name.clone());
        }
        BodyShape::Nested { arg_name }
    };

    BodyBinding {
        shape,
        media_type: body.media_type.clone(),
        kind,
        required: body.required,
    }
}

/// The `properties` of a plain object schema, if it has any.
fn promotable_properties(schema: &Value) -> Option<&Map<String, Value>> {
    let is_object = match schema.get("type") {
        None => true,
        Some(Value::String(t)) => t == "object",
        Some(_) => false,
    };
    if !is_object {
        return None;
    }
    schema
        .get("properties")
        .and_then(Value::as_object)
        .filter(|p| !p.is_empty())
}

/// `OpenAPI` says `Accept`, `Content-Type` and `Authorization` header parameters are ignored.
fn is_ignored_header_param(name: &str) -> bool {
    ["accept", "content-type", "authorization"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

fn with_description(mut schema: Value, description: Option<&str>) -> Value {
    if let (Some(desc), Some(obj)) = (description, schema.as_object_mut())
        && !obj.contains_key("description")
    {
        obj.insert("description".to_string(), Value::String(desc.to_string()));
    }
    schema
}

fn unique_key(map: &Map<String, Value>, base: &str) -> String {
    if !map.contains_key(base) {
        return base.to_string();
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{base}_{counter}");
        if !map.contains_key(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Rewrites schema references for a self-contained tool input schema.
///
/// - `#/components/schemas/<Name>` becomes `#/$defs/<Name>`, and the component is copied
///   (transitively) into `$defs`.
/// - Any other local reference is inlined; a reference already being inlined becomes `{}`.
struct SchemaRewriter<'a> {
    resolver: RefResolver<'a>,
    components: &'a Map<String, Value>,
    defs: BTreeMap<String, Value>,
    inlining: Vec<String>,
}

impl<'a> SchemaRewriter<'a> {
    fn new(doc: &'a SpecDocument) -> Self {
        Self {
            resolver: RefResolver::new(doc.raw()),
            components: &doc.component_schemas,
            defs: BTreeMap::new(),
            inlining: Vec::new(),
        }
    }

    fn into_defs(self) -> BTreeMap<String, Value> {
        self.defs
    }

    fn rewrite(&mut self, schema: &Value) -> Value {
        match schema {
            Value::Object(map) => match map.get("$ref") {
                Some(Value::String(reference)) => self.rewrite_ref(reference, map),
                _ => self.rewrite_object(map, false),
            },
            Value::Array(items) => Value::Array(items.iter().map(|v| self.rewrite(v)).collect()),
            other => other.clone(),
        }
    }

    fn rewrite_object(&mut self, map: &Map<String, Value>, keys_are_names: bool) -> Value {
        let mut out = Map::new();
        for (k, v) in map {
            let rewritten = if keys_are_names {
                self.rewrite(v)
            } else if is_data_keyword(k) {
                v.clone()
            } else if is_name_map_keyword(k)
                && let Value::Object(inner) = v
            {
                self.rewrite_object(inner, true)
            } else {
                self.rewrite(v)
            };
            out.insert(k.clone(), rewritten);
        }
        Value::Object(out)
    }

    fn rewrite_ref(&mut self, reference: &str, map: &Map<String, Value>) -> Value {
        let siblings_map: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| k.as_str() != "$ref")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let Value::Object(mut siblings) = self.rewrite_object(&siblings_map, false) else {
            return json!({});
        };

        if let Some(name) = component_schema_name(reference)
            && self.components.contains_key(&name)
        {
            self.ensure_def(&name);
            siblings.insert(
                "$ref".to_string(),
                Value::String(format!("#/$defs/{}", escape_pointer_token(&name))),
            );
            return Value::Object(siblings);
        }

        let target = if self.inlining.iter().any(|r| r == reference) {
            json!({})
        } else {
            match self.resolver.lookup(reference) {
                Ok(target) => {
                    self.inlining.push(reference.to_string());
                    let v = self.rewrite(target);
                    self.inlining.pop();
                    v
                }
                Err(_) => json!({}),
            }
        };

        if siblings.is_empty() {
            target
        } else {
            siblings.insert("allOf".to_string(), json!([target]));
            Value::Object(siblings)
        }
    }

    fn ensure_def(&mut self, name: &str) {
        if self.defs.contains_key(name) {
            return;
        }
        let components = self.components;
        let Some(schema) = components.get(name) else {
            return;
        };
        // Placeholder so recursive references terminate.
        self.defs.insert(name.to_string(), Value::Bool(true));
        let rewritten = self.rewrite(schema);
        self.defs.insert(name.to_string(), rewritten);
    }
}

/// `#/components/schemas/<Name>` -> `Name` (decoded).
fn component_schema_name(reference: &str) -> Option<String> {
    let pointer = local_pointer(reference).ok()?;
    let token = pointer.strip_prefix("/components/schemas/")?;
    (!token.is_empty() && !token.contains('/')).then(|| unescape_pointer_token(token))
}

/// Canonical tool name from method and path: `get /v1/items/{id}` -> `get_v1_items_id`.
#[must_use]
pub fn generate_canonical_name(method: &str, path: &str) -> String {
    let name = format!("{}_{}", method.to_lowercase(), path);

    // Replace path params {param} with _param
    let name = PATH_PARAM.replace_all(&name, "_$1");

    // Replace non-alphanumeric runs with a single underscore
    let name = NON_ALNUM.replace_all(&name, "_");

    truncate_name(name.trim_matches('_'), MAX_TOOL_NAME_LEN)
}

/// Restrict an `operationId` to `[A-Za-z0-9_-]`, capped at [`MAX_TOOL_NAME_LEN`].
#[must_use]
pub fn sanitize_tool_name(raw: &str) -> String {
    let name = NON_NAME.replace_all(raw.trim(), "_");
    truncate_name(name.trim_matches('_'), MAX_TOOL_NAME_LEN)
}

fn truncate_name(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}

fn reserve_unique_tool_name(taken: &mut HashSet<String>, base: &str, canonical: &str) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }

    let qualified = truncate_name(&format!("{base}__{canonical}"), MAX_TOOL_NAME_LEN);
    if taken.insert(qualified.clone()) {
        return qualified;
    }

    let mut counter = 2;
    loop {
        let suffix = format!("_{counter}");
        let head = truncate_name(&qualified, MAX_TOOL_NAME_LEN - suffix.len());
        let candidate = format!("{head}{suffix}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    // Simple glob matching on bytes:
    //   * => any sequence
    //   ? => any single character
    let pattern_bytes = pattern.as_bytes();
    let text_bytes = text.as_bytes();

    let mut pattern_index = 0usize;
    let mut text_index = 0usize;

    let mut star_index: Option<usize> = None;
    let mut star_text_index: usize = 0;

    while text_index < text_bytes.len() {
        match pattern_bytes.get(pattern_index) {
            Some(b'*') => {
                star_index = Some(pattern_index);
                pattern_index += 1;
                star_text_index = text_index;
            }
            Some(b'?') => {
                pattern_index += 1;
                text_index += 1;
            }
            Some(&b) if b == text_bytes[text_index] => {
                pattern_index += 1;
                text_index += 1;
            }
            _ => {
                let Some(si) = star_index else {
                    return false;
                };

                pattern_index = si + 1;
                star_text_index += 1;
                text_index = star_text_index;
            }
        }
    }

    while matches!(pattern_bytes.get(pattern_index), Some(b'*')) {
        pattern_index += 1;
    }

    pattern_index == pattern_bytes.len()
}
