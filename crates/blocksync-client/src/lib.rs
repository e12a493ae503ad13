//! blocksync sync engine
//!
//! Keeps a local block document and any number of row streams in step with
//! a remote store. Edits apply locally at once; the remote catches up through
//! a serialized write queue, and remote changes are merged back in.
//! Everything is single-threaded and must run inside a `tokio::task::LocalSet`.

pub mod config;
pub mod constants;
pub mod diff;
pub mod ledger;
pub mod memory;
pub mod merger;
pub mod notice;
pub mod queue;
pub mod session;
pub mod store;
pub mod stream;

use std::rc::Rc;

pub use config::{ConfigError, SyncConfig};
pub use diff::{Tracked, TrackedFields, diff_snapshots};
pub use ledger::TransactionLog;
pub use memory::{CallPhase, MemoryStore, StoreCall, StoreOp};
pub use merger::{ChangeMerger, MergeResult, MergeSkip, RemoteChange, fetch_change};
pub use notice::{Notice, NoticeBus, NoticeReceiver, NoticeState, NoticeTopic};
pub use queue::{QueueError, QueueEvent, QueueHandle, WriteOutcome, spawn_queue};
pub use session::{SessionError, SessionUpdate, SyncSession};
pub use store::{RemoteStore, RowPage, RowRange, StoreError, Subscription};
pub use stream::RowStream;

/// Create a session against `store` and load its document.
///
/// Must be called within a `tokio::task::LocalSet` context.
pub async fn open_session(store: Rc<dyn RemoteStore>, config: SyncConfig) -> Result<SyncSession, SessionError> {
    let mut session = SyncSession::new(store, config);
    session.load().await?;
    Ok(session)
}
