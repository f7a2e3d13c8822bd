//! `OpenAPI` `$ref` resolver.
//!
//! Only document-local references (`#/...`) are supported. The loader rejects any other form
//! up front, so by the time a document reaches the synthesizer every `$ref` it contains resolves
//! within the same JSON value.
//!
//! Resolution follows `$ref` chains (a reference whose target is itself a reference) and
//! detects cycles in them. Recursion *inside* schemas (a schema whose property refers back to
//! the schema) is not a chain cycle and is handled by the synthesizer.

use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("external $ref '{0}' is not supported (only local '#/...' references)")]
    External(String),
    #[error("unsupported $ref fragment (expected JSON pointer starting with '/'): {0}")]
    BadFragment(String),
    #[error("unresolved $ref '{0}'")]
    Unresolved(String),
    #[error("cyclic $ref detected while resolving: {0}")]
    Cycle(String),
}

/// Resolves local references against a root document.
#[derive(Debug, Clone, Copy)]
pub struct RefResolver<'a> {
    root: &'a Value,
}

impl<'a> RefResolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &'a Value {
        self.root
    }

    /// The `$ref` string of `value`, if it is a reference object.
    #[must_use]
    pub fn ref_of(value: &Value) -> Option<&str> {
        value.get("$ref").and_then(Value::as_str)
    }

    /// Look up a single reference (no chain following).
    ///
    /// # Errors
    ///
    /// Returns an error for non-local references and for pointers that do not exist.
    pub fn lookup(&self, reference: &str) -> Result<&'a Value, RefError> {
        let pointer = local_pointer(reference)?;
        self.root
            .pointer(&pointer)
            .ok_or_else(|| RefError::Unresolved(reference.to_string()))
    }

    /// Follow `value` through any chain of references to a non-reference value.
    ///
    /// # Errors
    ///
    /// Returns an error if any reference in the chain is external, unresolved, or revisits an
    /// earlier reference.
    pub fn resolve(&self, value: &'a Value) -> Result<&'a Value, RefError> {
        match Self::ref_of(value) {
            Some(reference) => self.resolve_ref(reference),
            None => Ok(value),
        }
    }

    /// Like [`RefResolver::resolve`], starting from a reference string.
    ///
    /// # Errors
    ///
    /// See [`RefResolver::resolve`].
    pub fn resolve_ref(&self, reference: &str) -> Result<&'a Value, RefError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cur = self.lookup(reference)?;
        while let Some(next) = Self::ref_of(cur) {
            if next == reference || !seen.insert(next) {
                return Err(RefError::Cycle(reference.to_string()));
            }
            cur = self.lookup(next)?;
        }
        Ok(cur)
    }
}

/// Convert a local `$ref` (`#/a/b`) into a JSON pointer (`/a/b`), percent-decoding the fragment.
///
/// # Errors
///
/// Returns an error for references that do not start with `#`, or whose fragment is not a
/// JSON pointer.
pub fn local_pointer(reference: &str) -> Result<String, RefError> {
    let Some(fragment) = reference.strip_prefix('#') else {
        return Err(RefError::External(reference.to_string()));
    };
    if fragment.is_empty() {
        return Ok(String::new());
    }
    if !fragment.starts_with('/') {
        return Err(RefError::BadFragment(reference.to_string()));
    }
    Ok(percent_decode(fragment))
}

/// Escape one reference token for use in a JSON pointer (RFC 6901).
#[must_use]
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Inverse of [`escape_pointer_token`].
#[must_use]
pub fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Walk `value` and collect every `$ref` string, paired with the JSON pointer of the object
/// that holds it. `base` is the pointer of `value` itself.
#[must_use]
pub fn collect_refs(value: &Value, base: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    collect_refs_into(value, base, false, &mut out);
    out
}

/// Keywords whose value is data, not schema or spec structure.
pub(crate) fn is_data_keyword(key: &str) -> bool {
    matches!(key, "example" | "examples" | "const" | "enum")
}

/// Keywords whose value maps user-chosen names to schemas.
pub(crate) fn is_name_map_keyword(key: &str) -> bool {
    matches!(
        key,
        "properties" | "patternProperties" | "$defs" | "definitions" | "dependentSchemas" | "schemas"
    )
}

fn collect_refs_into(
    value: &Value,
    pointer: &str,
    keys_are_names: bool,
    out: &mut Vec<(String, String)>,
) {
    match value {
        Value::Object(map) => {
            if !keys_are_names && let Some(Value::String(r)) = map.get("$ref") {
                out.push((pointer.to_string(), r.clone()));
            }
            for (k, v) in map {
                if !keys_are_names && is_data_keyword(k) {
                    continue;
                }
                let child = format!("{pointer}/{}", escape_pointer_token(k));
                let child_names = !keys_are_names && is_name_map_keyword(k);
                collect_refs_into(v, &child, child_names, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                collect_refs_into(v, &format!("{pointer}/{i}"), false, out);
            }
        }
        _ => {}
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(h), Some(l)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2]))
        {
            out.push((h << 4) | l);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| s.to_string())
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
