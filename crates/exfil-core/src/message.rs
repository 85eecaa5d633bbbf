//! Forgiving view over remote-debugging protocol payloads.
//!
//! Responses and event params arrive as loosely-shaped JSON objects. Every
//! accessor on [`Message`] returns a zero value when the key is missing or
//! holds a different type, so handlers can read fields without threading
//! `Option`s through every lookup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object received from (or sent to) the browser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// An empty message.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// String field, or `""`.
    pub fn string(&self, key: &str) -> String {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }

    /// Integer field, or `0`. Floating point values are truncated.
    #[allow(clippy::cast_possible_truncation)]
    pub fn int(&self, key: &str) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default(),
            _ => 0,
        }
    }

    /// Floating point field, or `0.0`.
    pub fn float(&self, key: &str) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or_default()
    }

    /// Boolean field, or `false`.
    pub fn bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or_default()
    }

    /// Nested object field. `None` when absent or not an object.
    pub fn message(&self, key: &str) -> Option<Message> {
        match self.0.get(key) {
            Some(Value::Object(map)) => Some(Self(map.clone())),
            _ => None,
        }
    }

    /// Array-of-objects field. Non-object elements are skipped.
    pub fn messages(&self, key: &str) -> Vec<Message> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().map(|map| Self(map.clone())))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Raw access to a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the key is present (with any value, including `null`).
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Value> for Message {
    /// Objects are wrapped as-is; any other JSON value becomes an empty message.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::new(),
        }
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
