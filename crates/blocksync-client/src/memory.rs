//! In-memory remote store.
//!
//! Used by the demo binary and every async test. All data is ephemeral.
//! Besides plain CRUD it records a call trace (with begin/end phases for
//! writes, so overlap is observable), tracks peak write concurrency, can be
//! told to fail the next call of a given kind, can slow writes down, and can
//! simulate another collaborator's edits arriving over the change feed.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use blocksync_types::{ChangeEvent, ChangeFilter, ChangeKind, Collection};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::store::{RemoteStore, RowPage, RowRange, StoreError, Subscription};

/// Store operation kinds, for failure injection and the call trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Update,
    Delete,
    FetchRow,
    FetchRows,
}

impl StoreOp {
    pub fn is_write(&self) -> bool {
        matches!(self, StoreOp::Create | StoreOp::Update | StoreOp::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Begin,
    End,
}

/// One entry of the call trace.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub collection: Collection,
    pub key: Option<String>,
    /// Columns touched by an update.
    pub columns: Vec<String>,
    pub phase: CallPhase,
}

struct Subscriber {
    id: u64,
    collection: Collection,
    filter: ChangeFilter,
    sink: mpsc::UnboundedSender<ChangeEvent>,
}

struct Inner {
    tables: HashMap<Collection, Vec<Map<String, Value>>>,
    id_prefix: String,
    next_id: u64,
    calls: Vec<StoreCall>,
    writes_in_flight: usize,
    peak_writes: usize,
    failures: VecDeque<(StoreOp, StoreError)>,
    write_delay: Duration,
    echo_writes: bool,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

impl Inner {
    fn table(&mut self, collection: &Collection) -> &mut Vec<Map<String, Value>> {
        self.tables.entry(collection.clone()).or_default()
    }

    fn take_failure(&mut self, op: StoreOp) -> Option<StoreError> {
        let idx = self.failures.iter().position(|(o, _)| *o == op)?;
        self.failures.remove(idx).map(|(_, e)| e)
    }

    fn record(&mut self, op: StoreOp, collection: &Collection, key: Option<&str>, columns: Vec<String>, phase: CallPhase) {
        self.calls.push(StoreCall {
            op,
            collection: collection.clone(),
            key: key.map(str::to_string),
            columns,
            phase,
        });
    }

    fn notify(&mut self, collection: &Collection, kind: ChangeKind, key: &str, row: &Map<String, Value>) {
        self.subscribers.retain(|s| !s.sink.is_closed());
        for sub in &self.subscribers {
            if &sub.collection == collection && sub.filter.matches(row) {
                let _ = sub.sink.send(ChangeEvent::new(collection.clone(), kind, key));
            }
        }
    }
}

fn row_key(row: &Map<String, Value>) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shared-handle in-memory store. Clones see the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Rc<RefCell<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store assigning ids `row_1`, `row_2`, ...
    pub fn new() -> Self {
        Self::with_ids("row_", 1)
    }

    /// Empty store assigning ids `{prefix}{start}`, `{prefix}{start + 1}`, ...
    pub fn with_ids(prefix: impl Into<String>, start: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                tables: HashMap::new(),
                id_prefix: prefix.into(),
                next_id: start,
                calls: Vec::new(),
                writes_in_flight: 0,
                peak_writes: 0,
                failures: VecDeque::new(),
                write_delay: Duration::ZERO,
                echo_writes: true,
                subscribers: Vec::new(),
                next_subscriber: 0,
            })),
        }
    }

    // ── Setup ────────────────────────────────────────────────────────────

    /// Insert rows silently (no change events). Rows must be objects with an `id`.
    pub fn seed(&self, collection: &Collection, rows: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner.borrow_mut();
        let table = inner.table(collection);
        for row in rows {
            if let Value::Object(map) = row {
                table.push(map);
            }
        }
    }

    /// Make the next call of kind `op` fail with `error`.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.inner.borrow_mut().failures.push_back((op, error));
    }

    /// Hold every write for `delay` before applying it.
    pub fn set_write_delay(&self, delay: Duration) {
        self.inner.borrow_mut().write_delay = delay;
    }

    /// Whether our own writes are echoed on the change feed (default on).
    pub fn set_echo_writes(&self, echo: bool) {
        self.inner.borrow_mut().echo_writes = echo;
    }

    // ── Another collaborator ─────────────────────────────────────────────

    /// Insert a row as someone else would, announcing it on the feed.
    pub fn external_insert(&self, collection: &Collection, row: Value) {
        let Value::Object(map) = row else { return };
        let Some(key) = row_key(&map) else { return };
        let mut inner = self.inner.borrow_mut();
        inner.table(collection).push(map.clone());
        inner.notify(collection, ChangeKind::Insert, &key, &map);
    }

    /// Patch a row as someone else would, announcing it on the feed.
    pub fn external_update(&self, collection: &Collection, key: &str, patch: Value) {
        let Value::Object(patch) = patch else { return };
        let mut inner = self.inner.borrow_mut();
        let updated = inner
            .table(collection)
            .iter_mut()
            .find(|r| row_key(r).as_deref() == Some(key))
            .map(|row| {
                row.extend(patch);
                row.clone()
            });
        if let Some(row) = updated {
            inner.notify(collection, ChangeKind::Update, key, &row);
        }
    }

    /// Delete a row as someone else would, announcing it on the feed.
    pub fn external_delete(&self, collection: &Collection, key: &str) {
        let mut inner = self.inner.borrow_mut();
        let table = inner.table(collection);
        if let Some(pos) = table.iter().position(|r| row_key(r).as_deref() == Some(key)) {
            let row = table.remove(pos);
            inner.notify(collection, ChangeKind::Delete, key, &row);
        }
    }

    /// Push a raw event to matching subscribers, without touching data.
    pub fn emit(&self, event: ChangeEvent) {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|s| !s.sink.is_closed());
        for sub in &inner.subscribers {
            if sub.collection == event.collection {
                let _ = sub.sink.send(event.clone());
            }
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn row(&self, collection: &Collection, key: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        inner
            .tables
            .get(collection)?
            .iter()
            .find(|r| row_key(r).as_deref() == Some(key))
            .map(|r| Value::Object(r.clone()))
    }

    pub fn row_count(&self, collection: &Collection) -> usize {
        self.inner.borrow().tables.get(collection).map_or(0, Vec::len)
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.borrow().calls.clone()
    }

    /// Completed calls of kind `op`, in completion order.
    pub fn completed(&self, op: StoreOp) -> Vec<StoreCall> {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|c| c.op == op && c.phase == CallPhase::End)
            .cloned()
            .collect()
    }

    /// Highest number of writes ever in flight at once.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.inner.borrow().peak_writes
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|s| !s.sink.is_closed());
        inner.subscribers.len()
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn begin_write(&self, op: StoreOp, collection: &Collection, key: Option<&str>, columns: Vec<String>) {
        let delay = {
            let mut inner = self.inner.borrow_mut();
            inner.record(op, collection, key, columns, CallPhase::Begin);
            inner.writes_in_flight += 1;
            inner.peak_writes = inner.peak_writes.max(inner.writes_in_flight);
            inner.write_delay
        };
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    fn end_write(&self, op: StoreOp, collection: &Collection, key: Option<&str>) {
        let mut inner = self.inner.borrow_mut();
        inner.writes_in_flight = inner.writes_in_flight.saturating_sub(1);
        inner.record(op, collection, key, Vec::new(), CallPhase::End);
    }
}

#[async_trait(?Send)]
impl RemoteStore for MemoryStore {
    async fn create(&self, collection: &Collection, payload: Map<String, Value>) -> Result<Value, StoreError> {
        self.begin_write(StoreOp::Create, collection, None, Vec::new()).await;
        let result = {
            let mut inner = self.inner.borrow_mut();
            match inner.take_failure(StoreOp::Create) {
                Some(err) => Err(err),
                None => {
                    let key = format!("{}{}", inner.id_prefix, inner.next_id);
                    inner.next_id += 1;
                    let mut row = payload;
                    row.insert("id".to_string(), Value::String(key.clone()));
                    inner.table(collection).push(row.clone());
                    if inner.echo_writes {
                        inner.notify(collection, ChangeKind::Insert, &key, &row);
                    }
                    Ok(Value::Object(row))
                }
            }
        };
        let key = result.as_ref().ok().and_then(|r| r.get("id")).and_then(Value::as_str).map(str::to_string);
        self.end_write(StoreOp::Create, collection, key.as_deref());
        result
    }

    async fn update(
        &self,
        collection: &Collection,
        key: &str,
        patch: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let columns = patch.keys().cloned().collect();
        self.begin_write(StoreOp::Update, collection, Some(key), columns).await;
        let result = {
            let mut inner = self.inner.borrow_mut();
            match inner.take_failure(StoreOp::Update) {
                Some(err) => Err(err),
                None => {
                    let updated = inner
                        .table(collection)
                        .iter_mut()
                        .find(|r| row_key(r).as_deref() == Some(key))
                        .map(|row| {
                            row.extend(patch);
                            row.clone()
                        });
                    match updated {
                        Some(row) => {
                            if inner.echo_writes {
                                inner.notify(collection, ChangeKind::Update, key, &row);
                            }
                            Ok(Value::Object(row))
                        }
                        None => Err(StoreError::NotFound(key.to_string())),
                    }
                }
            }
        };
        self.end_write(StoreOp::Update, collection, Some(key));
        result
    }

    async fn delete(&self, collection: &Collection, key: &str) -> Result<(), StoreError> {
        self.begin_write(StoreOp::Delete, collection, Some(key), Vec::new()).await;
        let result = {
            let mut inner = self.inner.borrow_mut();
            match inner.take_failure(StoreOp::Delete) {
                Some(err) => Err(err),
                None => {
                    let table = inner.table(collection);
                    match table.iter().position(|r| row_key(r).as_deref() == Some(key)) {
                        Some(pos) => {
                            let row = table.remove(pos);
                            if inner.echo_writes {
                                inner.notify(collection, ChangeKind::Delete, key, &row);
                            }
                            Ok(())
                        }
                        None => Err(StoreError::NotFound(key.to_string())),
                    }
                }
            }
        };
        self.end_write(StoreOp::Delete, collection, Some(key));
        result
    }

    async fn fetch_row(&self, collection: &Collection, key: &str) -> Result<Value, StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.borrow_mut();
        inner.record(StoreOp::FetchRow, collection, Some(key), Vec::new(), CallPhase::End);
        if let Some(err) = inner.take_failure(StoreOp::FetchRow) {
            return Err(err);
        }
        inner
            .table(collection)
            .iter()
            .find(|r| row_key(r).as_deref() == Some(key))
            .map(|r| Value::Object(r.clone()))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn fetch_rows(&self, collection: &Collection, range: RowRange) -> Result<RowPage, StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.borrow_mut();
        inner.record(StoreOp::FetchRows, collection, None, Vec::new(), CallPhase::End);
        if let Some(err) = inner.take_failure(StoreOp::FetchRows) {
            return Err(err);
        }
        let table = inner.table(collection);
        let rows = table
            .iter()
            .rev()
            .skip(range.from)
            .take(range.len())
            .map(|r| Value::Object(r.clone()))
            .collect();
        Ok(RowPage {
            rows,
            count: table.len(),
        })
    }

    fn subscribe(
        &self,
        collection: &Collection,
        filter: ChangeFilter,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner.subscribers.push(Subscriber {
                id,
                collection: collection.clone(),
                filter,
                sink,
            });
            id
        };
        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().subscribers.retain(|s| s.id != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_local<F: std::future::Future<Output = ()>>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(f));
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        run_local(async {
            let store = MemoryStore::with_ids("f_", 901);
            let c = Collection::Blocks;
            let a = store.create(&c, obj(json!({"type": "field"}))).await.unwrap();
            let b = store.create(&c, obj(json!({"type": "text"}))).await.unwrap();
            assert_eq!(a["id"], json!("f_901"));
            assert_eq!(b["id"], json!("f_902"));
            assert_eq!(store.row_count(&c), 2);
        });
    }

    #[test]
    fn test_update_merges_and_reports_missing() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Responses;
            store.seed(&c, vec![json!({"id": "r1", "email": "a", "n": 1})]);
            let row = store.update(&c, "r1", obj(json!({"email": "b"}))).await.unwrap();
            assert_eq!(row, json!({"id": "r1", "email": "b", "n": 1}));

            let err = store.update(&c, "zz", obj(json!({"email": "b"}))).await.unwrap_err();
            assert_eq!(err, StoreError::NotFound("zz".into()));
        });
    }

    #[test]
    fn test_injected_failure_applies_once() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Blocks;
            store.fail_next(StoreOp::Create, StoreError::Rejected("quota".into()));
            assert!(store.create(&c, Map::new()).await.is_err());
            assert!(store.create(&c, Map::new()).await.is_ok());
            assert_eq!(store.completed(StoreOp::Create).len(), 2);
        });
    }

    #[test]
    fn test_fetch_rows_newest_first() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::custom("orders");
            store.seed(&c, (1..=5).map(|i| json!({"id": format!("o{i}")})));
            let page = store.fetch_rows(&c, RowRange::first(2)).await.unwrap();
            assert_eq!(page.count, 5);
            let keys: Vec<&str> = page.rows.iter().filter_map(|r| r["id"].as_str()).collect();
            assert_eq!(keys, vec!["o5", "o4"]);

            let none = store.fetch_rows(&c, RowRange::first(0)).await.unwrap();
            assert!(none.rows.is_empty());
            assert_eq!(none.count, 5);
        });
    }

    #[test]
    fn test_subscription_filters_and_unsubscribes() {
        run_local(async {
            let store = MemoryStore::new();
            let c = Collection::Responses;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let sub = store.subscribe(&c, ChangeFilter::eq("form_id", json!("f1")), tx);

            store.external_insert(&c, json!({"id": "r1", "form_id": "f1"}));
            store.external_insert(&c, json!({"id": "r2", "form_id": "f2"}));
            store.external_insert(&Collection::Sessions, json!({"id": "s1", "form_id": "f1"}));

            let ev = rx.try_recv().unwrap();
            assert_eq!(ev, ChangeEvent::new(c.clone(), ChangeKind::Insert, "r1"));
            assert!(rx.try_recv().is_err());

            assert_eq!(store.subscriber_count(), 1);
            sub.unsubscribe();
            assert_eq!(store.subscriber_count(), 0);
        });
    }
}
