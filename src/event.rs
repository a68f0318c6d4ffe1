//! Event abstraction for the hub engine
//!
//! An event is an ordered mapping from string keys to dynamic JSON values.
//! Events are mutable within a single rule evaluation (append/delete) and are
//! copied per downstream edge; two edges never share a writable map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::field::FieldPath;

/// A single event flowing through a project graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, JsonValue>,
}

impl Event {
    /// Create an empty event
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// Create an event from an existing JSON object map
    pub fn from_map(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }

    /// Parse an event from a JSON document; non-object documents are rejected
    pub fn from_json(data: JsonValue) -> crate::Result<Self> {
        match data {
            JsonValue::Object(fields) => Ok(Self { fields }),
            other => Err(crate::HubError::Runtime(format!(
                "event must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Parse an event from a JSON-encoded byte slice
    pub fn from_slice(data: &[u8]) -> crate::Result<Self> {
        let value: JsonValue = serde_json::from_slice(data)?;
        Self::from_json(value)
    }

    /// Serialize the event back to a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }

    /// Borrow the underlying field map
    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    /// Get a top-level field by key
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// Set a top-level field, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.fields.insert(key.into(), value);
    }

    /// Resolve a parsed path against this event
    ///
    /// Returns the rendered leaf and whether the path was found, per the
    /// field-resolver contract.
    pub fn resolve(&self, path: &FieldPath) -> (String, bool) {
        path.resolve(&self.fields)
    }

    /// Remove the field addressed by `path`; nested segments traverse objects
    pub fn remove(&mut self, path: &FieldPath) -> bool {
        path.remove_from(&mut self.fields)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the event has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, JsonValue>> for Event {
    fn from(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
