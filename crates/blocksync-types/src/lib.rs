//! Shared identity and block types for blocksync.
//!
//! This crate is the leaf of the workspace: typed identifiers, the flat
//! `Block` record, collection kinds, write intents, and mirrored remote rows.
//! It has **no internal blocksync dependencies**.
//!
//! # Key Types
//!
//! |-------------------|-----------------------------------------------------|
//! | Type              | Purpose                                             |
//! |-------------------|-----------------------------------------------------|
//! | [`BlockId`]       | Permanent or draft (`[draft]`-prefixed) block id    |
//! | [`Digest`]        | Correlation id for a write intent                   |
//! | [`Block`]         | One node of the flat document                       |
//! | [`BlockKind`]     | Container (`section`, `group`) or leaf kind         |
//! | [`Collection`]    | Built-in collection or a user-defined table         |
//! | [`WriteIntent`]   | Single-field (or delete) remote mutation            |
//! | [`StreamRow`]     | Local mirror of a remote row                        |
//! | [`ChangeEvent`]   | Push notification from the remote change feed       |
//! |-------------------|-----------------------------------------------------|

pub mod block;
pub mod change;
pub mod collection;
pub mod ids;
pub mod intent;
pub mod row;

pub use block::{Block, BlockChange, BlockKind, TRACKED_FIELDS};
pub use change::{ChangeEvent, ChangeFilter, ChangeKind};
pub use collection::Collection;
pub use ids::{BlockId, DRAFT_PREFIX, Digest};
pub use intent::{Operation, Origin, TxStatus, WriteIntent};
pub use row::{RowError, StreamRow};

/// Current time as Unix milliseconds. Used by constructors throughout the crate.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
