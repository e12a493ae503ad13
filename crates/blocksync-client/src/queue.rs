//! Concurrency-1 write executor.
//!
//! One executor per session runs in a `spawn_local` task and processes
//! commands strictly one at a time, in submission order, whatever their
//! target collection, row or column. That serialization is the only
//! guarantee against two writes to the same row racing.
//!
//! ```text
//!   QueueHandle (Clone)        mpsc       TransactionExecutor (spawn_local)
//!   ┌────────────────────┐  ────────▶  ┌───────────────────────────────┐
//!   │ .enqueue(intent)   │             │ Rc<dyn RemoteStore>           │
//!   │ .create(key, ..)   │             │ one command at a time         │
//!   │ .drained()         │  ◀────────  │ digests already executed      │
//!   └────────────────────┘   events    └───────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::rc::Rc;

use blocksync_types::{Collection, Digest, Operation, WriteIntent};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::store::{RemoteStore, StoreError};

// ============================================================================
// Error and event types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("write queue shut down")]
    Shutdown,
}

/// Result of one write. Success and failure both resolve the intent.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The full row as returned by the store (`None` for deletes).
    Succeeded(Option<Value>),
    Failed(String),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Succeeded(_))
    }
}

/// Progress reported by the executor, in execution order.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Started {
        digest: Digest,
    },
    Finished {
        intent: WriteIntent,
        outcome: WriteOutcome,
    },
    /// A create finished. `key` is the caller's correlation key (a draft id).
    Created {
        key: String,
        collection: Collection,
        result: Result<Value, StoreError>,
    },
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum QueueCommand {
    Execute(WriteIntent),
    Create {
        key: String,
        collection: Collection,
        payload: Map<String, Value>,
    },
    /// Drop a resolved digest from the executed set.
    Forget(Digest),
    /// Replies once every earlier command has finished.
    Barrier { reply: oneshot::Sender<()> },
}

// ============================================================================
// QueueHandle
// ============================================================================

/// Submission side of the executor.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl QueueHandle {
    /// Submit a write intent. Intents whose digest already ran are skipped
    /// by the executor.
    pub fn enqueue(&self, intent: WriteIntent) -> Result<(), QueueError> {
        self.tx
            .send(QueueCommand::Execute(intent))
            .map_err(|_| QueueError::Shutdown)
    }

    /// Submit a row creation, serialized with all other writes.
    pub fn create(&self, key: impl Into<String>, collection: Collection, payload: Map<String, Value>) -> Result<(), QueueError> {
        self.tx
            .send(QueueCommand::Create {
                key: key.into(),
                collection,
                payload,
            })
            .map_err(|_| QueueError::Shutdown)
    }

    /// Release a digest once its intent has resolved. Duplicates submitted
    /// before this call are still skipped; later ones run again.
    pub fn forget(&self, digest: Digest) -> Result<(), QueueError> {
        self.tx
            .send(QueueCommand::Forget(digest))
            .map_err(|_| QueueError::Shutdown)
    }

    /// Wait until everything submitted before this call has finished.
    pub async fn drained(&self) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueueCommand::Barrier { reply })
            .map_err(|_| QueueError::Shutdown)?;
        rx.await.map_err(|_| QueueError::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// TransactionExecutor (internal, runs in spawn_local)
// ============================================================================

struct TransactionExecutor {
    store: Rc<dyn RemoteStore>,
    executed: HashSet<Digest>,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl TransactionExecutor {
    /// Process commands until every handle is dropped.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<QueueCommand>) {
        while let Some(cmd) = rx.recv().await {
            self.handle_command(cmd).await;
        }
        log::debug!("write queue shutting down: channel closed");
    }

    async fn handle_command(&mut self, cmd: QueueCommand) {
        match cmd {
            QueueCommand::Execute(intent) => self.execute(intent).await,
            QueueCommand::Create {
                key,
                collection,
                payload,
            } => {
                log::debug!("create {key} in {collection}");
                let result = self.store.create(&collection, payload).await;
                if let Err(e) = &result {
                    log::warn!("create {key} in {collection} failed: {e}");
                }
                self.emit(QueueEvent::Created {
                    key,
                    collection,
                    result,
                });
            }
            QueueCommand::Forget(digest) => {
                self.executed.remove(&digest);
            }
            QueueCommand::Barrier { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn execute(&mut self, intent: WriteIntent) {
        if !self.executed.insert(intent.digest) {
            log::debug!("digest {} already executed, skipping", intent.digest.short());
            return;
        }
        self.emit(QueueEvent::Started {
            digest: intent.digest,
        });

        let result = match &intent.operation {
            Operation::Update { field, value } => {
                log::debug!(
                    "update {}/{} {} (digest {})",
                    intent.collection,
                    intent.row,
                    field,
                    intent.digest.short()
                );
                let mut patch = Map::new();
                patch.insert(field.clone(), value.clone());
                self.store
                    .update(&intent.collection, &intent.row, patch)
                    .await
                    .map(Some)
            }
            Operation::Delete => {
                log::debug!(
                    "delete {}/{} (digest {})",
                    intent.collection,
                    intent.row,
                    intent.digest.short()
                );
                self.store
                    .delete(&intent.collection, &intent.row)
                    .await
                    .map(|_| None)
            }
        };

        let outcome = match result {
            Ok(row) => WriteOutcome::Succeeded(row),
            Err(e) => {
                log::warn!("write {} failed: {e}", intent.digest.short());
                WriteOutcome::Failed(e.to_string())
            }
        };
        self.emit(QueueEvent::Finished { intent, outcome });
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            log::trace!("queue event dropped: no listener");
        }
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn a write executor in the current `LocalSet`.
///
/// Returns the submission handle and the stream of progress events. The
/// executor stops once every [`QueueHandle`] clone is dropped.
///
/// Must be called from within a `tokio::task::LocalSet` context because the
/// store is `!Send`.
pub fn spawn_queue(store: Rc<dyn RemoteStore>) -> (QueueHandle, mpsc::UnboundedReceiver<QueueEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, events_rx) = mpsc::unbounded_channel();
    let executor = TransactionExecutor {
        store,
        executed: HashSet::new(),
        events,
    };
    tokio::task::spawn_local(executor.run(rx));
    (QueueHandle { tx }, events_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CallPhase, MemoryStore, StoreOp};
    use blocksync_types::Origin;
    use serde_json::json;
    use std::time::Duration;

    fn run_local<F: std::future::Future<Output = ()>>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(f));
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            &Collection::Blocks,
            vec![json!({"id": "a", "v_hidden": false}), json!({"id": "b", "v_hidden": false})],
        );
        store
    }

    #[test]
    fn test_writes_run_one_at_a_time_in_order() {
        run_local(async {
            let store = seeded();
            store.set_write_delay(Duration::from_millis(5));
            let (queue, mut events) = spawn_queue(Rc::new(store.clone()));

            let intents: Vec<WriteIntent> = ["a", "b", "a", "b"]
                .iter()
                .enumerate()
                .map(|(n, row)| WriteIntent::update(Collection::Blocks, *row, "title_html", json!(n.to_string()), Origin::User))
                .collect();
            for i in &intents {
                queue.enqueue(i.clone()).unwrap();
            }
            queue.drained().await.unwrap();

            assert_eq!(store.peak_concurrent_writes(), 1);
            let phases: Vec<CallPhase> = store.calls().iter().map(|c| c.phase).collect();
            assert_eq!(phases, [CallPhase::Begin, CallPhase::End].repeat(4));

            let mut finished = Vec::new();
            while let Ok(ev) = events.try_recv() {
                if let QueueEvent::Finished { intent, outcome } = ev {
                    assert!(outcome.is_success());
                    finished.push(intent.digest);
                }
            }
            assert_eq!(finished, intents.iter().map(|i| i.digest).collect::<Vec<_>>());
        });
    }

    #[test]
    fn test_duplicate_digest_runs_once() {
        run_local(async {
            let store = seeded();
            let (queue, _events) = spawn_queue(Rc::new(store.clone()));
            let intent = WriteIntent::update(Collection::Blocks, "a", "v_hidden", json!(true), Origin::User);
            queue.enqueue(intent.clone()).unwrap();
            queue.enqueue(intent).unwrap();
            queue.drained().await.unwrap();
            assert_eq!(store.completed(StoreOp::Update).len(), 1);
        });
    }

    #[test]
    fn test_forgotten_digest_no_longer_deduplicates() {
        run_local(async {
            let store = seeded();
            let (queue, _events) = spawn_queue(Rc::new(store.clone()));
            let intent = WriteIntent::update(Collection::Blocks, "a", "v_hidden", json!(true), Origin::User);
            queue.enqueue(intent.clone()).unwrap();
            queue.enqueue(intent.clone()).unwrap();
            queue.forget(intent.digest).unwrap();
            queue.drained().await.unwrap();
            assert_eq!(store.completed(StoreOp::Update).len(), 1);

            queue.enqueue(intent).unwrap();
            queue.drained().await.unwrap();
            assert_eq!(store.completed(StoreOp::Update).len(), 2);
        });
    }

    #[test]
    fn test_failure_still_finishes() {
        run_local(async {
            let store = seeded();
            store.fail_next(StoreOp::Update, StoreError::Rejected("locked".into()));
            let (queue, mut events) = spawn_queue(Rc::new(store.clone()));
            let intent = WriteIntent::update(Collection::Blocks, "a", "v_hidden", json!(true), Origin::User);
            queue.enqueue(intent.clone()).unwrap();
            queue.drained().await.unwrap();

            let mut outcome = None;
            while let Ok(ev) = events.try_recv() {
                if let QueueEvent::Finished { intent: done, outcome: o } = ev {
                    assert_eq!(done.digest, intent.digest);
                    outcome = Some(o);
                }
            }
            assert_eq!(outcome, Some(WriteOutcome::Failed("rejected by remote: locked".into())));
        });
    }

    #[test]
    fn test_create_and_delete_are_serialized_with_updates() {
        run_local(async {
            let store = seeded();
            store.set_write_delay(Duration::from_millis(2));
            let (queue, mut events) = spawn_queue(Rc::new(store.clone()));

            queue.create("[draft]k", Collection::Blocks, Map::new()).unwrap();
            queue
                .enqueue(WriteIntent::delete(Collection::Blocks, "b", Origin::User))
                .unwrap();
            queue.drained().await.unwrap();

            assert_eq!(store.peak_concurrent_writes(), 1);
            assert!(store.row(&Collection::Blocks, "b").is_none());
            let created = std::iter::from_fn(|| events.try_recv().ok()).find_map(|ev| match ev {
                QueueEvent::Created { key, result, .. } => Some((key, result)),
                _ => None,
            });
            let (key, result) = created.unwrap();
            assert_eq!(key, "[draft]k");
            assert_eq!(result.unwrap()["id"], json!("row_1"));
        });
    }

    #[test]
    fn test_executor_survives_dropped_listener() {
        run_local(async {
            let (queue, events) = spawn_queue(Rc::new(MemoryStore::new()));
            drop(events);
            queue.drained().await.unwrap();
            assert!(!queue.is_closed());
        });
    }
}
