//! Push notifications from the remote change feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::Collection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One notification. Only the key is trusted; the merger re-fetches the
/// full row for inserts and updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub key: String,
}

impl ChangeEvent {
    pub fn new(collection: Collection, kind: ChangeKind, key: impl Into<String>) -> Self {
        Self {
            collection,
            kind,
            key: key.into(),
        }
    }
}

/// Server-side row filter for a subscription.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "lowercase")]
pub enum ChangeFilter {
    #[default]
    All,
    /// Only rows whose `column` equals `value`.
    Eq { column: String, value: Value },
}

impl ChangeFilter {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::Eq {
            column: column.into(),
            value,
        }
    }

    /// Whether a row (as a JSON object) passes this filter.
    pub fn matches(&self, row: &serde_json::Map<String, Value>) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::Eq { column, value } => row.get(column) == Some(value),
        }
    }
}
