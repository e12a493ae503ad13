//! Row streams: the local mirror of one remote collection.
//!
//! A stream holds the rows as displayed plus the last-synced copy of each
//! row. Local cell edits change only the displayed rows; the diff between
//! the two is what gets written. Rows arriving from the remote (refresh,
//! push, post-write re-fetch) update both, so they are never echoed back.

use std::collections::HashMap;

use blocksync_types::{ChangeFilter, Collection, Origin, StreamRow, WriteIntent};
use serde_json::Value;
use tracing::debug;

use crate::diff::{TrackedFields, diff_snapshots};

#[derive(Debug, Clone)]
pub struct RowStream {
    collection: Collection,
    rows: Vec<StreamRow>,
    synced: HashMap<String, StreamRow>,
    realtime: bool,
    readonly: bool,
    /// Estimated total rows in the remote collection.
    count: usize,
    fields: TrackedFields,
    filter: ChangeFilter,
}

impl RowStream {
    /// Empty, realtime, writable stream tracking every column.
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            rows: Vec::new(),
            synced: HashMap::new(),
            realtime: true,
            readonly: false,
            count: 0,
            fields: TrackedFields::All,
            filter: ChangeFilter::All,
        }
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn tracking(mut self, fields: TrackedFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn filter(mut self, filter: ChangeFilter) -> Self {
        self.filter = filter;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn rows(&self) -> &[StreamRow] {
        &self.rows
    }

    pub fn get(&self, key: &str) -> Option<&StreamRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn change_filter(&self) -> &ChangeFilter {
        &self.filter
    }

    // ── Remote side ──────────────────────────────────────────────────────

    /// Fold remote rows in.
    ///
    /// With `reset`, the stream is replaced and the count set from `count`
    /// (or the number of rows). Otherwise existing keys are replaced in place,
    /// new keys are prepended, and the count grows by the number added unless
    /// `count` overrides it. Returns how many rows were new.
    pub fn feed(&mut self, rows: Vec<StreamRow>, reset: bool, count: Option<usize>) -> usize {
        if reset {
            self.synced = rows.iter().map(|r| (r.key.clone(), r.clone())).collect();
            self.count = count.unwrap_or(rows.len());
            let added = rows.len();
            self.rows = rows;
            return added;
        }

        let mut added = 0;
        for row in rows {
            self.synced.insert(row.key.clone(), row.clone());
            match self.rows.iter_mut().find(|r| r.key == row.key) {
                Some(existing) => *existing = row,
                None => {
                    self.rows.insert(0, row);
                    added += 1;
                }
            }
        }
        self.count = count.unwrap_or(self.count + added);
        added
    }

    /// Drop a row from both the mirror and the synced copy.
    pub fn remove(&mut self, key: &str) -> Option<StreamRow> {
        self.synced.remove(key);
        let pos = self.rows.iter().position(|r| r.key == key)?;
        self.count = self.count.saturating_sub(1);
        Some(self.rows.remove(pos))
    }

    // ── Local side ───────────────────────────────────────────────────────

    /// Optimistically edit one cell. No-op on a readonly stream, a missing
    /// row, or an unchanged value.
    pub fn set_cell(&mut self, key: &str, column: &str, value: Value) -> bool {
        if self.readonly {
            debug!(collection = %self.collection, %key, "edit on readonly stream ignored");
            return false;
        }
        let Some(row) = self.rows.iter_mut().find(|r| r.key == key) else {
            return false;
        };
        if row.fields.get(column) == Some(&value) {
            return false;
        }
        row.fields.insert(column.to_string(), value);
        true
    }

    /// Diff local edits against the synced copy and mark them synced.
    pub fn take_intents(&mut self, origin: Origin) -> Vec<WriteIntent> {
        let previous: Vec<StreamRow> = self
            .rows
            .iter()
            .filter_map(|r| self.synced.get(&r.key).cloned())
            .collect();
        let intents = diff_snapshots(&self.collection, &previous, &self.rows, &self.fields, origin);
        if !intents.is_empty() {
            for row in &self.rows {
                if let Some(synced) = self.synced.get_mut(&row.key) {
                    *synced = row.clone();
                }
            }
        }
        intents
    }
}
