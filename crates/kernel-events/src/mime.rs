//! MIME bundles with every payload flattened to a string.
//!
//! Kernels and nbformat files carry payloads as strings, arrays of lines, or
//! (for JSON-ish types) nested values. Rendering only ever wants text, so the
//! bundle normalizes once on the way in.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::EventError;

pub const TEXT_HTML: &str = "text/html";
pub const IMAGE_SVG: &str = "image/svg+xml";
pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_JPEG: &str = "image/jpeg";
pub const TEXT_PLAIN: &str = "text/plain";

/// MIME types whose payload is a script to run rather than display.
pub const SCRIPT_TYPES: [&str; 2] = ["application/javascript", "text/javascript"];

/// MIME type to string content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MimeBundle(BTreeMap<String, String>);

impl MimeBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Arrays are concatenated, other non-string
    /// values are serialized back to JSON text.
    pub fn from_json(value: &Value) -> Result<Self, EventError> {
        let Value::Object(map) = value else {
            return Err(EventError::InvalidBundle(value.to_string()));
        };
        Ok(map
            .iter()
            .map(|(mime, payload)| (mime.clone(), flatten_payload(payload)))
            .collect())
    }

    pub fn insert(&mut self, mime: impl Into<String>, content: impl Into<String>) {
        self.0.insert(mime.into(), content.into());
    }

    pub fn with(mut self, mime: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(mime, content);
        self
    }

    pub fn get(&self, mime: &str) -> Option<&str> {
        self.0.get(mime).map(String::as_str)
    }

    pub fn contains(&self, mime: &str) -> bool {
        self.0.contains_key(mime)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The first script payload, if any.
    pub fn script(&self) -> Option<&str> {
        SCRIPT_TYPES.iter().find_map(|mime| self.get(mime))
    }
}

impl FromIterator<(String, String)> for MimeBundle {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for MimeBundle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(mime, payload)| {
                let content = flatten_payload(&payload);
                (mime, content)
            })
            .collect())
    }
}

/// Flatten one payload to text.
pub fn flatten_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
