//! Typed view of a loaded `OpenAPI` 3.1 document.
//!
//! The loader builds a [`SpecDocument`] once, after validation. Parameter and request-body
//! references are already resolved; schemas are kept as raw JSON, because their `$ref`s are
//! rewritten per tool by the synthesizer.

use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Methods that may appear on a path item, in the order operations are emitted.
pub const METHOD_ORDER: [HttpMethod; 8] = [
    HttpMethod::Get,
    HttpMethod::Put,
    HttpMethod::Post,
    HttpMethod::Delete,
    HttpMethod::Options,
    HttpMethod::Head,
    HttpMethod::Patch,
    HttpMethod::Trace,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    /// Lowercase key used in path items (`"get"`).
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
            HttpMethod::Trace => "trace",
        }
    }

    #[must_use]
    pub fn to_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Options => Method::OPTIONS,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Trace => Method::TRACE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "cookie" => Some(ParamLocation::Cookie),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }
}

/// Query parameter serialization style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryStyle {
    #[default]
    Form,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl QueryStyle {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "form" => Some(QueryStyle::Form),
            "spaceDelimited" => Some(QueryStyle::SpaceDelimited),
            "pipeDelimited" => Some(QueryStyle::PipeDelimited),
            "deepObject" => Some(QueryStyle::DeepObject),
            _ => None,
        }
    }

    #[must_use]
    pub fn default_explode(self) -> bool {
        matches!(self, QueryStyle::Form | QueryStyle::DeepObject)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    /// Always `true` for path parameters.
    pub required: bool,
    pub schema: Value,
    pub description: Option<String>,
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    /// `x-overridable: true` lets a header argument replace a configured header.
    pub overridable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub required: bool,
    pub media_type: String,
    pub schema: Value,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub operation_id: Option<String>,
    pub method: HttpMethod,
    /// Path template, e.g. `/v1/items/{id}`.
    pub path: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    /// Path-item parameters merged with operation parameters (operation wins on `(in, name)`).
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
}

impl Operation {
    /// `"GET /v1/items/{id}"`, the string include/exclude globs match against.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// A loaded, validated `OpenAPI` document.
#[derive(Debug, Clone)]
pub struct SpecDocument {
    pub title: String,
    pub version: String,
    /// Server URLs with variable defaults substituted, in document order.
    pub servers: Vec<String>,
    /// `components.schemas`, the targets of rewritten `#/$defs/...` references.
    pub component_schemas: Map<String, Value>,
    pub operations: Vec<Operation>,
    /// `sha256:<hex>` of the source text.
    pub hash: String,
    raw: Value,
}

impl SpecDocument {
    pub(crate) fn new(
        raw: Value,
        servers: Vec<String>,
        operations: Vec<Operation>,
        hash: String,
    ) -> Self {
        let text = |key: &str| {
            raw.get("info")
                .and_then(|i| i.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let title = text("title");
        let version = text("version");
        let component_schemas = raw
            .pointer("/components/schemas")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self {
            title,
            version,
            servers,
            component_schemas,
            operations,
            hash,
            raw,
        }
    }

    /// The whole document as JSON, for resolving schema references.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// How a request body of a given media type is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    /// `application/json` and `+json` suffixes.
    Json,
    /// `application/x-www-form-urlencoded`.
    Form,
    /// Anything else: strings are sent as-is, other values as JSON text.
    Raw,
}

impl MediaKind {
    #[must_use]
    pub fn of(media_type: &str) -> Self {
        let Ok(m) = media_type.parse::<mime::Mime>() else {
            return MediaKind::Raw;
        };
        if m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON) {
            MediaKind::Json
        } else if m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED {
            MediaKind::Form
        } else {
            MediaKind::Raw
        }
    }
}

/// Names of the `{placeholder}`s in a path template, in order.
#[must_use]
pub fn path_placeholders(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push(&after[..end]);
        rest = &after[end + 1..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_in_order() {
        assert_eq!(
            path_placeholders("/v1/{org}/items/{id}.json"),
            vec!["org", "id"]
        );
        assert!(path_placeholders("/plain").is_empty());
        assert!(path_placeholders("/broken/{id").is_empty());
    }

    #[test]
    fn media_kinds() {
        assert_eq!(MediaKind::of("application/json"), MediaKind::Json);
        assert_eq!(MediaKind::of("application/merge-patch+json"), MediaKind::Json);
        assert_eq!(MediaKind::of("application/json; charset=utf-8"), MediaKind::Json);
        assert_eq!(
            MediaKind::of("application/x-www-form-urlencoded"),
            MediaKind::Form
        );
        assert_eq!(MediaKind::of("text/plain"), MediaKind::Raw);
        assert_eq!(MediaKind::of("not a mime"), MediaKind::Raw);
    }

    #[test]
    fn method_display_is_uppercase() {
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
        assert_eq!(HttpMethod::Get.to_reqwest(), Method::GET);
    }

    #[test]
    fn query_style_defaults() {
        assert!(QueryStyle::Form.default_explode());
        assert!(QueryStyle::DeepObject.default_explode());
        assert!(!QueryStyle::PipeDelimited.default_explode());
        assert_eq!(QueryStyle::parse("spaceDelimited"), Some(QueryStyle::SpaceDelimited));
        assert_eq!(QueryStyle::parse("matrix"), None);
    }
}
