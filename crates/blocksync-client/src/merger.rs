//! Remote change merger.
//!
//! Push notifications carry only a row key. Inserts and updates are
//! re-fetched in full before merging (partial push payloads are never
//! trusted); deletes remove the row directly. Notifications are merged in
//! arrival order without reordering or deduplication, so a late push can
//! overwrite a fresher local value until the next refresh.

use std::time::Duration;

use blocksync_types::{ChangeEvent, ChangeKind, StreamRow};
use tracing::{debug, trace, warn};

use crate::store::{RemoteStore, StoreError};
use crate::stream::RowStream;

/// A notification resolved against the store, ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    Upsert { kind: ChangeKind, row: StreamRow },
    Remove { key: String },
    /// The re-fetch failed; the merge is skipped.
    FetchFailed { kind: ChangeKind, key: String, error: StoreError },
}

impl RemoteChange {
    pub fn key(&self) -> &str {
        match self {
            RemoteChange::Upsert { row, .. } => &row.key,
            RemoteChange::Remove { key } | RemoteChange::FetchFailed { key, .. } => key,
        }
    }
}

/// Resolve a notification into a [`RemoteChange`].
///
/// Inserts wait `insert_delay` first so the remote has committed the row.
pub async fn fetch_change(store: &dyn RemoteStore, event: &ChangeEvent, insert_delay: Duration) -> RemoteChange {
    let kind = event.kind;
    if kind == ChangeKind::Delete {
        return RemoteChange::Remove {
            key: event.key.clone(),
        };
    }
    if kind == ChangeKind::Insert && !insert_delay.is_zero() {
        tokio::time::sleep(insert_delay).await;
    }

    debug!(collection = %event.collection, key = %event.key, ?kind, "re-fetching pushed row");
    let fetched = store
        .fetch_row(&event.collection, &event.key)
        .await
        .and_then(|value| StreamRow::from_remote(value).map_err(StoreError::from));
    match fetched {
        Ok(row) => RemoteChange::Upsert { kind, row },
        Err(error) => RemoteChange::FetchFailed {
            kind,
            key: event.key.clone(),
            error,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeSkip {
    FetchFailed(String),
    /// Delete for a row the stream does not hold.
    UnknownRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Prepended,
    Replaced,
    Removed,
    Skipped { reason: MergeSkip },
}

/// Folds resolved changes into row streams.
#[derive(Debug, Clone, Default)]
pub struct ChangeMerger {
    version: u64,
    failures: u64,
}

impl ChangeMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every merge that changed a stream.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Re-fetches that failed so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn apply(&mut self, stream: &mut RowStream, change: RemoteChange) -> MergeResult {
        let result = match change {
            RemoteChange::Upsert { kind, row } => {
                let existed = stream.contains(&row.key);
                trace!(collection = %stream.collection(), key = %row.key, ?kind, existed, "merging row");
                stream.feed(vec![row], false, None);
                if existed {
                    MergeResult::Replaced
                } else {
                    MergeResult::Prepended
                }
            }
            RemoteChange::Remove { key } => match stream.remove(&key) {
                Some(_) => MergeResult::Removed,
                None => MergeResult::Skipped {
                    reason: MergeSkip::UnknownRow,
                },
            },
            RemoteChange::FetchFailed { kind, key, error } => {
                self.failures += 1;
                warn!(collection = %stream.collection(), %key, ?kind, %error, "re-fetch failed, merge skipped");
                return MergeResult::Skipped {
                    reason: MergeSkip::FetchFailed(error.to_string()),
                };
            }
        };
        if !matches!(result, MergeResult::Skipped { .. }) {
            self.version += 1;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use blocksync_types::Collection;
    use serde_json::json;

    fn run_local<F: std::future::Future<Output = ()>>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(f));
    }

    fn stream_with(keys: &[&str]) -> RowStream {
        let mut s = RowStream::new(Collection::Responses);
        s.feed(keys.iter().map(|k| StreamRow::new(*k).with("n", json!(0))).collect(), true, None);
        s
    }

    #[test]
    fn test_insert_fetches_full_row_and_prepends() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Responses;
            store.seed(&c, vec![json!({"id": "r9", "n": 9, "meta": {"src": "web"}})]);
            let event = ChangeEvent::new(c, ChangeKind::Insert, "r9");

            let change = fetch_change(&store, &event, Duration::ZERO).await;
            let mut stream = stream_with(&["r1"]);
            let mut merger = ChangeMerger::new();
            assert_eq!(merger.apply(&mut stream, change), MergeResult::Prepended);
            assert_eq!(stream.rows()[0].key, "r9");
            assert_eq!(stream.rows()[0].meta, json!({"src": "web"}));
            assert_eq!(merger.version(), 1);
        });
    }

    #[test]
    fn test_update_replaces_in_place() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Responses;
            store.seed(&c, vec![json!({"id": "r2", "n": 5})]);
            let change = fetch_change(&store, &ChangeEvent::new(c, ChangeKind::Update, "r2"), Duration::ZERO).await;

            let mut stream = stream_with(&["r1", "r2", "r3"]);
            assert_eq!(ChangeMerger::new().apply(&mut stream, change), MergeResult::Replaced);
            assert_eq!(stream.rows()[1].get("n"), Some(&json!(5)));
            assert_eq!(stream.rows().len(), 3);
        });
    }

    #[test]
    fn test_delete_needs_no_fetch() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Responses;
            let change = fetch_change(&store, &ChangeEvent::new(c, ChangeKind::Delete, "r1"), Duration::ZERO).await;
            assert!(store.calls().is_empty());

            let mut stream = stream_with(&["r1"]);
            let mut merger = ChangeMerger::new();
            assert_eq!(merger.apply(&mut stream, change.clone()), MergeResult::Removed);
            assert_eq!(
                merger.apply(&mut stream, change),
                MergeResult::Skipped {
                    reason: MergeSkip::UnknownRow
                }
            );
        });
    }

    #[test]
    fn test_failed_fetch_skips_merge() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Responses;
            store.seed(&c, vec![json!({"id": "r1", "n": 1})]);
            store.fail_next(StoreOp::FetchRow, StoreError::Transport("reset".into()));
            let change = fetch_change(&store, &ChangeEvent::new(c, ChangeKind::Update, "r1"), Duration::ZERO).await;

            let mut stream = stream_with(&["r1"]);
            let mut merger = ChangeMerger::new();
            let result = merger.apply(&mut stream, change);
            assert!(matches!(result, MergeResult::Skipped { reason: MergeSkip::FetchFailed(_) }));
            assert_eq!(stream.rows()[0].get("n"), Some(&json!(0)));
            assert_eq!(merger.failures(), 1);
            assert_eq!(merger.version(), 0);
        });
    }
}
