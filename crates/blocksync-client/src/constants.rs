//! Sync engine defaults.
//!
//! Centralizes the values [`SyncConfig`](crate::SyncConfig) falls back to.

use std::time::Duration;

pub use blocksync_types::DRAFT_PREFIX;

/// Broadcast capacity of the notice bus.
pub const DEFAULT_NOTICE_CAPACITY: usize = 256;

/// Delay before re-fetching a row announced by a push insert, so the remote
/// has fully committed it.
pub const DEFAULT_INSERT_FETCH_DELAY: Duration = Duration::from_millis(100);

/// Failed write digests kept for inspection. Oldest entries drop first.
pub const DEFAULT_MAX_FAILED_DIGESTS: usize = 64;

/// Rows requested by a full stream refresh when no range is given.
pub const DEFAULT_REFRESH_LIMIT: usize = 500;
