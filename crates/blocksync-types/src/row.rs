//! Local mirror of a remote row.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Row decode failures.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row is not a JSON object")]
    NotAnObject,
    #[error("row has no usable id")]
    MissingKey,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A cached remote row: key, column map, and free-form metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamRow {
    pub key: String,
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub meta: Value,
}

impl StreamRow {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Map::new(),
            meta: Value::Null,
        }
    }

    /// Builder: set one column.
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.fields.insert(column.into(), value);
        self
    }

    /// Decode a full remote row. The key comes from `id` (string or number),
    /// `meta` is lifted out, every other column lands in `fields`.
    pub fn from_remote(row: Value) -> Result<Self, RowError> {
        let Value::Object(mut map) = row else {
            return Err(RowError::NotAnObject);
        };
        let key = match map.remove("id") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(RowError::MissingKey),
        };
        let meta = map.remove("meta").unwrap_or(Value::Null);
        Ok(Self {
            key,
            fields: map,
            meta,
        })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }
}
