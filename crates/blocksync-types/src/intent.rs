//! Write intents: single-field (or delete) remote mutations.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::EnumString;

use crate::collection::Collection;
use crate::ids::Digest;
use crate::now_millis;

/// Who produced a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Origin {
    /// Generated by the engine (e.g. re-indexing after a move).
    System,
    /// Direct user edit.
    #[default]
    User,
}

impl Origin {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::System => "system",
            Origin::User => "user",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a write intent. `Resolved` is terminal for success and
/// failure alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum TxStatus {
    #[default]
    Pending,
    Queued,
    Resolved,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Queued => "queued",
            TxStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the write does to its row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Operation {
    /// Set one column.
    Update { field: String, value: Value },
    /// Remove the row.
    Delete,
}

/// A queued remote mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteIntent {
    pub digest: Digest,
    pub timestamp: u64,
    pub origin: Origin,
    pub collection: Collection,
    /// Row key in the target collection.
    pub row: String,
    #[serde(flatten)]
    pub operation: Operation,
    pub status: TxStatus,
}

impl WriteIntent {
    /// Single-column update, fresh digest, `pending`.
    pub fn update(
        collection: Collection,
        row: impl Into<String>,
        field: impl Into<String>,
        value: Value,
        origin: Origin,
    ) -> Self {
        Self {
            digest: Digest::new(),
            timestamp: now_millis(),
            origin,
            collection,
            row: row.into(),
            operation: Operation::Update {
                field: field.into(),
                value,
            },
            status: TxStatus::Pending,
        }
    }

    /// Row deletion, fresh digest, `pending`.
    pub fn delete(collection: Collection, row: impl Into<String>, origin: Origin) -> Self {
        Self {
            digest: Digest::new(),
            timestamp: now_millis(),
            origin,
            collection,
            row: row.into(),
            operation: Operation::Delete,
            status: TxStatus::Pending,
        }
    }

    /// Column written by an update, `None` for a delete.
    pub fn field(&self) -> Option<&str> {
        match &self.operation {
            Operation::Update { field, .. } => Some(field),
            Operation::Delete => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.operation {
            Operation::Update { value, .. } => Some(value),
            Operation::Delete => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.operation, Operation::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_accessors() {
        let intent = WriteIntent::update(Collection::Blocks, "b", "v_hidden", json!(true), Origin::User);
        assert_eq!(intent.status, TxStatus::Pending);
        assert_eq!(intent.field(), Some("v_hidden"));
        assert_eq!(intent.payload(), Some(&json!(true)));
        assert!(!intent.is_delete());
    }

    #[test]
    fn test_delete_has_no_field() {
        let intent = WriteIntent::delete(Collection::Blocks, "b", Origin::System);
        assert!(intent.is_delete());
        assert_eq!(intent.field(), None);
        assert_eq!(intent.origin.to_string(), "system");
    }

    #[test]
    fn test_serialized_shape_is_flat() {
        let intent = WriteIntent::update(Collection::Responses, "r1", "email", json!("a@b"), Origin::User);
        let value = serde_json::to_value(&intent).unwrap();
        assert_eq!(value["operation"], json!("update"));
        assert_eq!(value["field"], json!("email"));
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["origin"], json!("user"));
    }

    #[test]
    fn test_digests_are_distinct() {
        let a = WriteIntent::delete(Collection::Blocks, "x", Origin::User);
        let b = WriteIntent::delete(Collection::Blocks, "x", Origin::User);
        assert_ne!(a.digest, b.digest);
    }
}
