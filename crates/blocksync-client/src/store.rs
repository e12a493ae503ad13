//! The remote store seam.
//!
//! [`RemoteStore`] is everything the engine needs from the persistence
//! collaborator: request/response CRUD plus a push channel of change
//! notifications. Futures are `?Send`; the engine runs on a single-threaded
//! `LocalSet`.

use async_trait::async_trait;
use blocksync_types::{ChangeEvent, ChangeFilter, Collection};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Failures reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<blocksync_types::RowError> for StoreError {
    fn from(e: blocksync_types::RowError) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Half-open row range `[from, end)` for a paged fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub from: usize,
    pub end: usize,
}

impl RowRange {
    /// Page `index` (zero-based) of `limit` rows. A zero limit is empty.
    pub fn page(index: usize, limit: usize) -> Self {
        let from = index.saturating_mul(limit);
        Self {
            from,
            end: from.saturating_add(limit),
        }
    }

    /// The first `limit` rows.
    pub fn first(limit: usize) -> Self {
        Self::page(0, limit)
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.from
    }
}

/// One page of rows plus the collection's estimated total.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPage {
    pub rows: Vec<Value>,
    pub count: usize,
}

/// Live push subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Persistence and change-feed collaborator.
#[async_trait(?Send)]
pub trait RemoteStore {
    /// Create a row; returns the full row including its assigned `id`.
    async fn create(&self, collection: &Collection, payload: Map<String, Value>) -> Result<Value, StoreError>;

    /// Partially update a row; returns the full updated row.
    async fn update(
        &self,
        collection: &Collection,
        key: &str,
        patch: Map<String, Value>,
    ) -> Result<Value, StoreError>;

    async fn delete(&self, collection: &Collection, key: &str) -> Result<(), StoreError>;

    async fn fetch_row(&self, collection: &Collection, key: &str) -> Result<Value, StoreError>;

    /// Fetch a page of rows, newest first.
    async fn fetch_rows(&self, collection: &Collection, range: RowRange) -> Result<RowPage, StoreError>;

    /// Start forwarding change notifications for `collection` to `sink`.
    fn subscribe(
        &self,
        collection: &Collection,
        filter: ChangeFilter,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_row_range_pages() {
        assert_eq!(RowRange::page(0, 100), RowRange { from: 0, end: 100 });
        assert_eq!(RowRange::page(2, 10), RowRange { from: 20, end: 30 });
        assert_eq!(RowRange::first(5).len(), 5);
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let range = RowRange::first(0);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert!(RowRange::page(3, 0).is_empty());
    }

    #[test]
    fn test_subscription_cancels_once() {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = Subscription::new(move || h.set(h.get() + 1));
        sub.unsubscribe();
        assert_eq!(hits.get(), 1);

        let h = hits.clone();
        drop(Subscription::new(move || h.set(h.get() + 1)));
        assert_eq!(hits.get(), 2);
    }
}
