//! Optimistic diff engine.
//!
//! Compares the last-synced snapshot of a collection with the current local
//! state and emits one [`WriteIntent`] per changed, allow-listed column.
//! Replaying the intents against the old snapshot yields the new snapshot's
//! tracked columns. Rows that are new (absent from the old snapshot) or still
//! pending creation are skipped; creation is handled by draft resolution.

use std::collections::HashMap;

use blocksync_types::{Block, Collection, Origin, StreamRow, TRACKED_FIELDS, WriteIntent};
use serde_json::Value;

/// Which columns are diffed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedFields {
    /// Every column present on either side.
    All,
    /// Only these columns, in this order.
    Only(Vec<String>),
}

impl TrackedFields {
    /// The block column allow-list.
    pub fn blocks() -> Self {
        Self::Only(TRACKED_FIELDS.iter().map(|s| s.to_string()).collect())
    }

    pub fn only<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(columns.into_iter().map(Into::into).collect())
    }
}

/// A row the diff engine can compare.
pub trait Tracked {
    fn row_key(&self) -> String;

    /// Columns this row carries, used with [`TrackedFields::All`].
    fn field_names(&self) -> Vec<String>;

    fn tracked_value(&self, field: &str) -> Option<Value>;

    /// Rows awaiting creation are never diffed.
    fn is_pending(&self) -> bool {
        false
    }

    /// Whether a changed value may be written yet.
    fn is_syncable(&self, _field: &str, _value: &Value) -> bool {
        true
    }
}

impl Tracked for Block {
    fn row_key(&self) -> String {
        self.id.to_string()
    }

    fn field_names(&self) -> Vec<String> {
        TRACKED_FIELDS.iter().map(|s| s.to_string()).collect()
    }

    fn tracked_value(&self, field: &str) -> Option<Value> {
        self.field_value(field)
    }

    fn is_pending(&self) -> bool {
        self.is_draft()
    }

    /// A link to a parent that is itself still a draft waits until the
    /// parent resolves; resolution rewrites the link and the next diff
    /// picks it up.
    fn is_syncable(&self, field: &str, value: &Value) -> bool {
        !(field == "parent_id" && self.parent_id.as_ref().is_some_and(|p| p.is_draft()) && !value.is_null())
    }
}

impl Tracked for StreamRow {
    fn row_key(&self) -> String {
        self.key.clone()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn tracked_value(&self, field: &str) -> Option<Value> {
        self.fields.get(field).cloned()
    }
}

/// Emit the minimal ordered set of single-column update intents turning
/// `previous` into `current`. Order follows `current`, then column order.
pub fn diff_snapshots<T: Tracked>(
    collection: &Collection,
    previous: &[T],
    current: &[T],
    fields: &TrackedFields,
    origin: Origin,
) -> Vec<WriteIntent> {
    let before: HashMap<String, &T> = previous.iter().map(|r| (r.row_key(), r)).collect();
    let mut intents = Vec::new();

    for row in current {
        if row.is_pending() {
            continue;
        }
        let key = row.row_key();
        let Some(old) = before.get(&key) else {
            continue;
        };

        let columns = match fields {
            TrackedFields::Only(list) => list.clone(),
            TrackedFields::All => {
                let mut names = row.field_names();
                for name in old.field_names() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                names
            }
        };

        for column in columns {
            let was = old.tracked_value(&column).unwrap_or(Value::Null);
            let now = row.tracked_value(&column).unwrap_or(Value::Null);
            if was == now || !row.is_syncable(&column, &now) {
                continue;
            }
            tracing::trace!(%collection, row = %key, %column, "field changed");
            intents.push(WriteIntent::update(collection.clone(), key.clone(), column, now, origin));
        }
    }

    intents
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_types::{BlockChange, BlockId, BlockKind, Operation};
    use serde_json::json;

    fn block(id: &str, kind: BlockKind, idx: usize) -> Block {
        let mut b = Block::new(BlockId::new(id), kind).at(idx);
        b.created_at = 0;
        b
    }

    #[test]
    fn test_single_field_change_yields_single_intent() {
        let prev = vec![block("a", BlockKind::Section, 0), block("b", BlockKind::Field, 1).with_parent("a")];
        let mut cur = prev.clone();
        cur[1].apply_change(&BlockChange::Hidden(true));

        let intents = diff_snapshots(&Collection::Blocks, &prev, &cur, &TrackedFields::blocks(), Origin::User);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].row, "b");
        assert_eq!(
            intents[0].operation,
            Operation::Update {
                field: "v_hidden".into(),
                value: json!(true)
            }
        );
    }

    #[test]
    fn test_identical_snapshots_yield_nothing() {
        let prev = vec![block("a", BlockKind::Text, 0)];
        let intents = diff_snapshots(&Collection::Blocks, &prev, &prev, &TrackedFields::blocks(), Origin::User);
        assert!(intents.is_empty());
    }

    #[test]
    fn test_untracked_fields_are_ignored() {
        let prev = vec![block("a", BlockKind::Text, 0)];
        let mut cur = prev.clone();
        cur[0].created_at = 99;
        cur[0].data = json!({"note": "x"});
        let intents = diff_snapshots(&Collection::Blocks, &prev, &cur, &TrackedFields::blocks(), Origin::User);
        assert!(intents.is_empty());
    }

    #[test]
    fn test_new_and_draft_rows_are_skipped() {
        let prev = vec![block("a", BlockKind::Section, 0)];
        let mut draft = Block::new(BlockId::draft(), BlockKind::Field).at(2);
        draft.parent_id = Some(BlockId::new("a"));
        let cur = vec![
            block("a", BlockKind::Section, 0),
            block("new", BlockKind::Field, 1).with_parent("a"),
            draft,
        ];
        let intents = diff_snapshots(&Collection::Blocks, &prev, &cur, &TrackedFields::blocks(), Origin::User);
        assert!(intents.is_empty());
    }

    #[test]
    fn test_link_to_draft_parent_is_held_back() {
        let prev = vec![block("x", BlockKind::Field, 0)];
        let draft_parent = BlockId::draft();
        let mut moved = block("x", BlockKind::Field, 1);
        moved.parent_id = Some(draft_parent);
        let intents = diff_snapshots(&Collection::Blocks, &prev, &[moved], &TrackedFields::blocks(), Origin::System);

        let fields: Vec<&str> = intents.iter().filter_map(|i| i.field()).collect();
        assert_eq!(fields, vec!["local_index"]);
        assert_eq!(intents[0].origin, Origin::System);
    }

    #[test]
    fn test_stream_rows_diff_all_columns() {
        let prev = vec![StreamRow::new("r1").with("email", json!("a")).with("age", json!(3))];
        let cur = vec![StreamRow::new("r1").with("email", json!("b")).with("age", json!(3)).with("tag", json!("vip"))];
        let intents = diff_snapshots(&Collection::Responses, &prev, &cur, &TrackedFields::All, Origin::User);
        let fields: Vec<&str> = intents.iter().filter_map(|i| i.field()).collect();
        assert_eq!(fields, vec!["email", "tag"]);

        let only = diff_snapshots(&Collection::Responses, &prev, &cur, &TrackedFields::only(["age", "tag"]), Origin::User);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].payload(), Some(&json!("vip")));
    }
}
