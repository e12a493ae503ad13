//! Sync session: one document plus its row streams, kept in step with a
//! remote store.
//!
//! Every entry point applies to local state synchronously, then schedules
//! remote work: creates and writes go through the session's write queue,
//! re-fetches run as local tasks. Completions come back as events, which the
//! owner pumps with [`SyncSession::process_next`] or [`SyncSession::settle`].
//!
//! ```text
//!  insert/move/delete/set ──▶ BlockDocument ──▶ diff ──▶ TransactionLog ──▶ queue ──▶ store
//!                                   ▲                                          │
//!                                   └────────── resolve / discard ◀── events ◀─┘
//!
//!  store change feed ──▶ re-fetch ──▶ ChangeMerger ──▶ RowStream
//! ```
//!
//! Must be created and driven inside a `tokio::task::LocalSet`.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use blocksync_doc::{BlockDocument, MoveOutcome, MoveTarget, ResolveOutcome};
use blocksync_types::{
    Block, BlockChange, BlockId, BlockKind, ChangeEvent, ChangeKind, Collection, Digest, Origin,
    StreamRow, WriteIntent,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::diff::{TrackedFields, diff_snapshots};
use crate::ledger::TransactionLog;
use crate::merger::{ChangeMerger, MergeResult, RemoteChange, fetch_change};
use crate::notice::{NoticeBus, NoticeReceiver, NoticeTopic};
use crate::queue::{QueueError, QueueEvent, QueueHandle, WriteOutcome, spawn_queue};
use crate::store::{RemoteStore, RowRange, StoreError, Subscription};
use crate::stream::RowStream;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no stream attached for {0}")]
    UnknownStream(Collection),
}

/// What one processed event did.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A draft was swapped for its permanent block.
    Resolved { draft: BlockId, block: BlockId, rewritten: usize },
    /// A create was rejected, or its row could not be read back; the draft
    /// was discarded.
    CreateFailed { draft: BlockId, reason: String },
    /// A draft deleted before its create finished; the permanent row is
    /// being deleted.
    Orphaned { block: BlockId },
    WriteStarted { digest: Digest },
    WriteResolved { digest: Digest, success: bool },
    /// A push notification was received and its re-fetch scheduled.
    ChangeReceived { collection: Collection, kind: ChangeKind, key: String },
    Merged { collection: Collection, key: String, result: MergeResult },
    /// A written row was re-fetched to pick up server-side effects.
    Refreshed { collection: Collection, key: String, success: bool },
    /// Nothing to do (no stream for the collection, stale draft).
    Ignored,
}

/// Completions of spawned reads.
enum Fetched {
    Change {
        collection: Collection,
        change: RemoteChange,
    },
    Refresh {
        collection: Collection,
        key: String,
        result: Result<Value, StoreError>,
    },
}

enum Inbound {
    Queue(QueueEvent),
    Change(ChangeEvent),
    Fetched(Fetched),
}

pub struct SyncSession {
    store: Rc<dyn RemoteStore>,
    config: SyncConfig,

    // ── Document ─────────────────────────────────────────────────────────
    doc: BlockDocument,
    /// Last-synced copy of each permanent block.
    synced_blocks: HashMap<BlockId, Block>,
    /// Drafts whose create is queued or running.
    creating: HashSet<BlockId>,
    /// Drafts deleted locally while their create was in flight.
    abandoned: HashSet<BlockId>,

    // ── Streams ──────────────────────────────────────────────────────────
    streams: HashMap<Collection, RowStream>,
    subscriptions: HashMap<Collection, Subscription>,
    merger: ChangeMerger,

    // ── Writes ───────────────────────────────────────────────────────────
    ledger: TransactionLog,
    queue: QueueHandle,
    queue_events: mpsc::UnboundedReceiver<QueueEvent>,

    // ── Plumbing ─────────────────────────────────────────────────────────
    changes_tx: mpsc::UnboundedSender<ChangeEvent>,
    changes_rx: mpsc::UnboundedReceiver<ChangeEvent>,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
    fetched_rx: mpsc::UnboundedReceiver<Fetched>,
    notices: NoticeBus,
    /// Creates, writes and reads scheduled but not yet processed.
    outstanding: usize,
}

impl SyncSession {
    /// New session with an empty document. Spawns the write queue.
    pub fn new(store: Rc<dyn RemoteStore>, config: SyncConfig) -> Self {
        let (queue, queue_events) = spawn_queue(store.clone());
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();
        Self {
            notices: NoticeBus::new(config.notice_capacity),
            ledger: TransactionLog::new(config.max_failed_digests),
            store,
            config,
            doc: BlockDocument::new(),
            synced_blocks: HashMap::new(),
            creating: HashSet::new(),
            abandoned: HashSet::new(),
            streams: HashMap::new(),
            subscriptions: HashMap::new(),
            merger: ChangeMerger::new(),
            queue,
            queue_events,
            changes_tx,
            changes_rx,
            fetched_tx,
            fetched_rx,
            outstanding: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn document(&self) -> &BlockDocument {
        &self.doc
    }

    pub fn blocks(&self) -> &[Block] {
        self.doc.blocks()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn ledger(&self) -> &TransactionLog {
        &self.ledger
    }

    pub fn stream(&self, collection: &Collection) -> Option<&RowStream> {
        self.streams.get(collection)
    }

    pub fn notices(&self) -> NoticeReceiver {
        self.notices.subscribe()
    }

    pub fn merger(&self) -> &ChangeMerger {
        &self.merger
    }

    /// No scheduled remote work left to process.
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replace the document with the remote blocks. Returns the block count.
    pub async fn load(&mut self) -> Result<usize, SessionError> {
        let collection = self.config.blocks_collection.clone();
        let key = collection.to_string();
        self.notices.in_flight(NoticeTopic::Fetch, key.clone());

        let page = match self
            .store
            .fetch_rows(&collection, RowRange::first(self.config.refresh_limit))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.notices.failed(NoticeTopic::Fetch, key, e.to_string());
                return Err(e.into());
            }
        };

        let blocks: Vec<Block> = page
            .rows
            .iter()
            .filter_map(|row| match Block::from_row(row) {
                Ok(block) => Some(block),
                Err(e) => {
                    warn!(%collection, error = %e, "skipping undecodable block row");
                    None
                }
            })
            .collect();

        self.doc = BlockDocument::from_blocks(blocks);
        self.synced_blocks = self
            .doc
            .blocks()
            .iter()
            .map(|b| (b.id.clone(), b.clone()))
            .collect();
        self.notices.succeeded(NoticeTopic::Fetch, key);
        info!(%collection, blocks = self.doc.len(), "document loaded");

        // Loaded rows may have been non-canonical; write back the normalization.
        self.sync_blocks(Origin::System)?;
        Ok(self.doc.len())
    }

    // =========================================================================
    // Document entry points
    // =========================================================================

    pub fn focus(&mut self, id: &BlockId) -> bool {
        self.doc.focus(id)
    }

    pub fn blur(&mut self) {
        self.doc.blur();
    }

    /// Insert a draft block and queue its remote create.
    pub fn insert_block(&mut self, kind: BlockKind) -> Result<Block, SessionError> {
        let draft = self.doc.insert_draft(kind);

        let mut payload = draft.payload();
        if draft.parent_id.as_ref().is_some_and(|p| p.is_draft()) {
            payload.insert("parent_id".to_string(), Value::Null);
        }
        self.queue
            .create(draft.id.to_string(), self.config.blocks_collection.clone(), payload)?;
        self.creating.insert(draft.id.clone());
        self.outstanding += 1;
        self.notices.in_flight(NoticeTopic::Create, draft.id.to_string());
        debug!(draft = %draft.id.short(), %kind, "create queued");

        self.sync_blocks(Origin::System)?;
        Ok(draft)
    }

    pub fn move_block(&mut self, id: &BlockId, target: &MoveTarget) -> Result<MoveOutcome, SessionError> {
        let outcome = self.doc.move_block(id, target);
        if matches!(outcome, MoveOutcome::Moved { .. }) {
            self.sync_blocks(Origin::User)?;
        }
        Ok(outcome)
    }

    /// Delete a block locally and remotely. Deleting a draft sends nothing
    /// now; if its create later succeeds the orphaned row is deleted then.
    pub fn delete_block(&mut self, id: &BlockId) -> Result<Option<Block>, SessionError> {
        let Some(removed) = self.doc.delete_block(id) else {
            return Ok(None);
        };

        if removed.is_draft() {
            if self.creating.contains(id) {
                self.abandoned.insert(id.clone());
            }
        } else {
            self.synced_blocks.remove(id);
            let intent = WriteIntent::delete(self.config.blocks_collection.clone(), id.to_string(), Origin::User);
            self.submit(vec![intent])?;
        }

        self.sync_blocks(Origin::System)?;
        Ok(Some(removed))
    }

    pub fn set_field(&mut self, id: &BlockId, change: &BlockChange) -> Result<bool, SessionError> {
        if !self.doc.set_field(id, change) {
            return Ok(false);
        }
        self.sync_blocks(Origin::User)?;
        Ok(true)
    }

    // ── Form fields ──────────────────────────────────────────────────────

    /// Set the form's field ids. Ids already bound by a block are withheld.
    pub fn set_form_fields<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc.set_form_fields(ids);
    }

    pub fn available_field_ids(&self) -> &[String] {
        self.doc.available_field_ids()
    }

    pub fn add_form_field(&mut self, id: &str) -> bool {
        self.doc.add_form_field(id)
    }

    /// Drop a field from the form and unbind the blocks that used it.
    pub fn remove_form_field(&mut self, id: &str) -> Result<Vec<BlockId>, SessionError> {
        let unbound = self.doc.remove_form_field(id);
        if !unbound.is_empty() {
            self.sync_blocks(Origin::User)?;
        }
        Ok(unbound)
    }

    /// Diff the document against the last-synced blocks and submit the
    /// resulting writes. Returns how many intents were submitted.
    pub fn sync_blocks(&mut self, origin: Origin) -> Result<usize, SessionError> {
        let previous: Vec<Block> = self.synced_blocks.values().cloned().collect();
        let current = self.doc.blocks();
        let intents = diff_snapshots(
            &self.config.blocks_collection,
            &previous,
            current,
            &TrackedFields::blocks(),
            origin,
        );
        for block in current {
            if let Some(synced) = self.synced_blocks.get_mut(&block.id) {
                *synced = block.clone();
            }
        }
        let n = intents.len();
        self.submit(intents)?;
        Ok(n)
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Attach a stream, load it, and subscribe to its change feed if realtime.
    pub async fn attach_stream(&mut self, stream: RowStream) -> Result<usize, SessionError> {
        let collection = stream.collection().clone();
        let realtime = stream.is_realtime();
        let filter = stream.change_filter().clone();
        self.streams.insert(collection.clone(), stream);

        let loaded = self.refresh_stream(&collection).await?;
        if realtime {
            let sub = self.store.subscribe(&collection, filter, self.changes_tx.clone());
            self.subscriptions.insert(collection.clone(), sub);
            debug!(%collection, "subscribed to change feed");
        }
        Ok(loaded)
    }

    pub fn detach_stream(&mut self, collection: &Collection) -> Option<RowStream> {
        if let Some(sub) = self.subscriptions.remove(collection) {
            sub.unsubscribe();
        }
        self.streams.remove(collection)
    }

    /// Full refresh: replace the stream with the first page of rows.
    pub async fn refresh_stream(&mut self, collection: &Collection) -> Result<usize, SessionError> {
        if !self.streams.contains_key(collection) {
            return Err(SessionError::UnknownStream(collection.clone()));
        }
        let key = collection.to_string();
        self.notices.in_flight(NoticeTopic::Refresh, key.clone());

        let page = match self
            .store
            .fetch_rows(collection, RowRange::first(self.config.refresh_limit))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.notices.failed(NoticeTopic::Refresh, key, e.to_string());
                return Err(e.into());
            }
        };

        let rows: Vec<StreamRow> = page
            .rows
            .into_iter()
            .filter_map(|row| StreamRow::from_remote(row).ok())
            .collect();
        let loaded = rows.len();
        let stream = self
            .streams
            .get_mut(collection)
            .ok_or_else(|| SessionError::UnknownStream(collection.clone()))?;
        stream.feed(rows, true, Some(page.count));
        self.notices.succeeded(NoticeTopic::Refresh, key);
        debug!(%collection, loaded, count = page.count, "stream refreshed");
        Ok(loaded)
    }

    /// Optimistically edit one cell and schedule its write.
    pub fn set_cell(&mut self, collection: &Collection, key: &str, column: &str, value: Value) -> Result<bool, SessionError> {
        let stream = self
            .streams
            .get_mut(collection)
            .ok_or_else(|| SessionError::UnknownStream(collection.clone()))?;
        if !stream.set_cell(key, column, value) {
            return Ok(false);
        }
        let intents = stream.take_intents(Origin::User);
        self.submit(intents)?;
        Ok(true)
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Wait for the next completion or push notification and process it.
    ///
    /// Waits indefinitely when nothing is outstanding and no push arrives;
    /// use [`settle`](Self::settle) to drain scheduled work instead.
    pub async fn process_next(&mut self) -> Option<SessionUpdate> {
        let inbound = self.next_inbound().await?;
        Some(self.handle(inbound))
    }

    /// Process everything ready and everything scheduled until the session
    /// is idle. Returns the updates in processing order.
    pub async fn settle(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        loop {
            if let Some(inbound) = self.try_inbound() {
                updates.push(self.handle(inbound));
                continue;
            }
            if self.outstanding == 0 {
                break;
            }
            match self.next_inbound().await {
                Some(inbound) => updates.push(self.handle(inbound)),
                None => break,
            }
        }
        updates
    }

    async fn next_inbound(&mut self) -> Option<Inbound> {
        tokio::select! {
            Some(ev) = self.queue_events.recv() => Some(Inbound::Queue(ev)),
            Some(f) = self.fetched_rx.recv() => Some(Inbound::Fetched(f)),
            Some(ev) = self.changes_rx.recv() => Some(Inbound::Change(ev)),
            else => None,
        }
    }

    fn try_inbound(&mut self) -> Option<Inbound> {
        if let Ok(ev) = self.queue_events.try_recv() {
            return Some(Inbound::Queue(ev));
        }
        if let Ok(f) = self.fetched_rx.try_recv() {
            return Some(Inbound::Fetched(f));
        }
        if let Ok(ev) = self.changes_rx.try_recv() {
            return Some(Inbound::Change(ev));
        }
        None
    }

    fn handle(&mut self, inbound: Inbound) -> SessionUpdate {
        match inbound {
            Inbound::Queue(QueueEvent::Started { digest }) => SessionUpdate::WriteStarted { digest },
            Inbound::Queue(QueueEvent::Finished { intent, outcome }) => self.on_write_finished(intent, outcome),
            Inbound::Queue(QueueEvent::Created { key, result, .. }) => self.on_created(BlockId::new(key), result),
            Inbound::Change(event) => self.on_change(event),
            Inbound::Fetched(Fetched::Change { collection, change }) => self.on_change_fetched(collection, change),
            Inbound::Fetched(Fetched::Refresh { collection, key, result }) => {
                self.on_row_refreshed(collection, key, result)
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────────

    fn on_created(&mut self, draft: BlockId, result: Result<Value, StoreError>) -> SessionUpdate {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.creating.remove(&draft);
        let key = draft.to_string();
        let abandoned = self.abandoned.remove(&draft);

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.notices.failed(NoticeTopic::Create, key, e.to_string());
                if abandoned {
                    return SessionUpdate::Ignored;
                }
                warn!(draft = %draft.short(), error = %e, "create failed, discarding draft");
                return self.fail_create(draft, e.to_string());
            }
        };

        let row = match Block::from_row(&value) {
            Ok(block) => block,
            Err(e) => {
                // The row exists remotely but cannot be tracked here.
                let reason = format!("unreadable created row: {e}");
                self.notices.failed(NoticeTopic::Create, key, reason.clone());
                let remote = StreamRow::from_remote(value).ok().map(|r| r.key);
                warn!(draft = %draft.short(), remote = ?remote, error = %e, "created row undecodable, deleting it");
                if let Some(remote) = remote {
                    let intent = WriteIntent::delete(self.config.blocks_collection.clone(), remote, Origin::System);
                    if let Err(e) = self.submit(vec![intent]) {
                        warn!(error = %e, "could not queue delete of undecodable row");
                    }
                }
                if abandoned {
                    return SessionUpdate::Ignored;
                }
                return self.fail_create(draft, reason);
            }
        };
        self.notices.succeeded(NoticeTopic::Create, key);

        if abandoned {
            debug!(draft = %draft.short(), block = %row.id.short(), "draft deleted during create, removing row");
            let intent = WriteIntent::delete(self.config.blocks_collection.clone(), row.id.to_string(), Origin::System);
            if let Err(e) = self.submit(vec![intent]) {
                warn!(error = %e, "could not queue orphan delete");
            }
            return SessionUpdate::Orphaned { block: row.id };
        }

        let block_id = row.id.clone();
        match self.doc.resolve_draft(&draft, row.clone()) {
            ResolveOutcome::Resolved { rewritten } => {
                self.synced_blocks.insert(block_id.clone(), row);
                self.resync();
                SessionUpdate::Resolved {
                    draft,
                    block: block_id,
                    rewritten,
                }
            }
            ResolveOutcome::Unknown => SessionUpdate::Ignored,
        }
    }

    fn on_write_finished(&mut self, intent: WriteIntent, outcome: WriteOutcome) -> SessionUpdate {
        self.outstanding = self.outstanding.saturating_sub(1);
        let digest = intent.digest;
        self.ledger.resolve(&digest, &outcome);
        if let Err(e) = self.queue.forget(digest) {
            warn!(error = %e, "could not release write digest");
        }

        let success = outcome.is_success();
        match &outcome {
            WriteOutcome::Succeeded(_) => self.notices.succeeded(NoticeTopic::Write, digest.to_string()),
            WriteOutcome::Failed(reason) => self.notices.failed(NoticeTopic::Write, digest.to_string(), reason.clone()),
        }

        if self.config.refresh_on_resolve && !intent.is_delete() && self.streams.contains_key(&intent.collection) {
            self.spawn_refresh(intent.collection.clone(), intent.row.clone());
        }
        SessionUpdate::WriteResolved { digest, success }
    }

    fn on_change(&mut self, event: ChangeEvent) -> SessionUpdate {
        if !self.streams.contains_key(&event.collection) {
            return SessionUpdate::Ignored;
        }
        let update = SessionUpdate::ChangeReceived {
            collection: event.collection.clone(),
            kind: event.kind,
            key: event.key.clone(),
        };
        if event.kind != ChangeKind::Delete {
            self.notices.in_flight(NoticeTopic::Fetch, event.key.clone());
        }

        let store = self.store.clone();
        let tx = self.fetched_tx.clone();
        let delay = self.config.insert_fetch_delay();
        self.outstanding += 1;
        tokio::task::spawn_local(async move {
            let change = fetch_change(store.as_ref(), &event, delay).await;
            let _ = tx.send(Fetched::Change {
                collection: event.collection,
                change,
            });
        });
        update
    }

    fn on_change_fetched(&mut self, collection: Collection, change: RemoteChange) -> SessionUpdate {
        self.outstanding = self.outstanding.saturating_sub(1);
        let key = change.key().to_string();
        match &change {
            RemoteChange::Upsert { .. } => self.notices.succeeded(NoticeTopic::Fetch, key.clone()),
            RemoteChange::FetchFailed { error, .. } => {
                self.notices.failed(NoticeTopic::Fetch, key.clone(), error.to_string())
            }
            RemoteChange::Remove { .. } => {}
        }
        let Some(stream) = self.streams.get_mut(&collection) else {
            return SessionUpdate::Ignored;
        };
        let result = self.merger.apply(stream, change);
        SessionUpdate::Merged { collection, key, result }
    }

    fn on_row_refreshed(&mut self, collection: Collection, key: String, result: Result<Value, StoreError>) -> SessionUpdate {
        self.outstanding = self.outstanding.saturating_sub(1);
        let row = result.and_then(|v| StreamRow::from_remote(v).map_err(StoreError::from));
        let success = match row {
            Ok(row) => {
                if let Some(stream) = self.streams.get_mut(&collection) {
                    if stream.contains(&row.key) {
                        stream.feed(vec![row], false, None);
                    }
                }
                self.notices.succeeded(NoticeTopic::Refresh, key.clone());
                true
            }
            Err(e) => {
                warn!(%collection, %key, error = %e, "post-write refresh failed");
                self.notices.failed(NoticeTopic::Refresh, key.clone(), e.to_string());
                false
            }
        };
        SessionUpdate::Refreshed {
            collection,
            key,
            success,
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn fail_create(&mut self, draft: BlockId, reason: String) -> SessionUpdate {
        self.doc.discard_draft(&draft);
        self.resync();
        SessionUpdate::CreateFailed { draft, reason }
    }

    /// Record intents and hand every newly pending one to the queue.
    fn submit(&mut self, intents: Vec<WriteIntent>) -> Result<(), QueueError> {
        for intent in intents {
            self.ledger.push(intent);
        }
        for intent in self.ledger.admit_pending() {
            let digest = intent.digest;
            self.queue.enqueue(intent)?;
            self.outstanding += 1;
            self.notices.in_flight(NoticeTopic::Write, digest.to_string());
        }
        Ok(())
    }

    /// Sync after an event handler touched the tree. Queue failures here can
    /// only mean the executor is gone; they are logged, not raised.
    fn resync(&mut self) {
        if let Err(e) = self.sync_blocks(Origin::System) {
            warn!(error = %e, "could not schedule block sync");
        }
    }

    fn spawn_refresh(&mut self, collection: Collection, key: String) {
        let store = self.store.clone();
        let tx = self.fetched_tx.clone();
        self.outstanding += 1;
        self.notices.in_flight(NoticeTopic::Refresh, key.clone());
        tokio::task::spawn_local(async move {
            let result = store.fetch_row(&collection, &key).await;
            let _ = tx.send(Fetched::Refresh {
                collection,
                key,
                result,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::notice::NoticeState;
    use serde_json::json;

    fn run_local<F: std::future::Future<Output = ()>>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(f));
    }

    fn config() -> SyncConfig {
        SyncConfig {
            insert_fetch_delay_ms: 0,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_load_normalizes_and_writes_back() {
        run_local(async {
            let store = MemoryStore::new();
            store.seed(
                &Collection::Blocks,
                vec![
                    json!({"id": "s1", "type": "section", "local_index": 0}),
                    json!({"id": "a", "type": "field", "parent_id": "s1", "local_index": 5}),
                ],
            );
            let mut session = SyncSession::new(Rc::new(store.clone()), config());
            assert_eq!(session.load().await.unwrap(), 2);
            session.settle().await;

            assert_eq!(store.row(&Collection::Blocks, "a").unwrap()["local_index"], json!(1));
            assert!(session.ledger().is_idle());
        });
    }

    #[test]
    fn test_create_failure_discards_draft_and_notifies() {
        run_local(async {
            let store = MemoryStore::new();
            store.fail_next(StoreOp::Create, StoreError::Rejected("quota".into()));
            let mut session = SyncSession::new(Rc::new(store.clone()), config());
            let mut notices = session.notices();

            let draft = session.insert_block(BlockKind::Field).unwrap();
            assert_eq!(session.blocks().len(), 1);

            let updates = session.settle().await;
            assert!(updates.contains(&SessionUpdate::CreateFailed {
                draft: draft.id.clone(),
                reason: "rejected by remote: quota".into(),
            }));
            assert!(session.blocks().is_empty());

            let states: Vec<NoticeState> = notices
                .drain()
                .into_iter()
                .filter(|n| n.topic == NoticeTopic::Create)
                .map(|n| n.state)
                .collect();
            assert_eq!(states, vec![NoticeState::InFlight, NoticeState::Failed("rejected by remote: quota".into())]);
        });
    }

    #[test]
    fn test_deleting_pending_draft_removes_orphan_row() {
        run_local(async {
            let store = MemoryStore::with_ids("f_", 1);
            let mut session = SyncSession::new(Rc::new(store.clone()), config());
            let draft = session.insert_block(BlockKind::Text).unwrap();
            session.delete_block(&draft.id).unwrap();

            let updates = session.settle().await;
            assert!(updates.contains(&SessionUpdate::Orphaned {
                block: BlockId::new("f_1")
            }));
            assert!(session.blocks().is_empty());
            assert_eq!(store.row_count(&Collection::Blocks), 0);
        });
    }

    #[test]
    fn test_field_block_create_carries_pool_id() {
        run_local(async {
            let store = MemoryStore::with_ids("f_", 1);
            let mut session = SyncSession::new(Rc::new(store.clone()), config());
            session.set_form_fields(["email", "name"]);

            let draft = session.insert_block(BlockKind::Field).unwrap();
            assert_eq!(draft.field_id.as_deref(), Some("email"));
            session.settle().await;
            assert_eq!(store.row(&Collection::Blocks, "f_1").unwrap()["form_field_id"], json!("email"));

            let unbound = session.remove_form_field("email").unwrap();
            assert_eq!(unbound, vec![BlockId::new("f_1")]);
            session.settle().await;
            assert_eq!(store.row(&Collection::Blocks, "f_1").unwrap()["form_field_id"], json!(null));
            assert_eq!(session.available_field_ids(), &["name"]);
        });
    }

    #[test]
    fn test_unknown_stream_is_an_error() {
        run_local(async {
            let mut session = SyncSession::new(Rc::new(MemoryStore::new()), config());
            let err = session
                .set_cell(&Collection::Responses, "r1", "email", json!("x"))
                .unwrap_err();
            assert!(matches!(err, SessionError::UnknownStream(Collection::Responses)));
        });
    }
}
