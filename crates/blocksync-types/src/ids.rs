//! Typed identifiers for blocks and write intents.
//!
//! A [`BlockId`] is an opaque string assigned by the remote store. Before the
//! store has answered, the client mints a *draft* id carrying the reserved
//! [`DRAFT_PREFIX`] marker. Drafts are unique (UUIDv4 suffix), are replaced
//! exactly once on resolution, and are never reused.
//!
//! A [`Digest`] correlates one write intent across its lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved marker prefix for client-minted draft ids.
pub const DRAFT_PREFIX: &str = "[draft]";

/// A block identifier: permanent (remote-assigned) or draft (client-minted).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    /// Wrap a permanent id as handed out by the remote store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh draft id (`[draft]` + 32 hex chars).
    pub fn draft() -> Self {
        Self(format!("{DRAFT_PREFIX}{}", uuid::Uuid::new_v4().as_simple()))
    }

    /// Whether this id is still a client-side draft.
    pub fn is_draft(&self) -> bool {
        self.0.starts_with(DRAFT_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines, never used as a lookup key.
    pub fn short(&self) -> String {
        let body = self.0.strip_prefix(DRAFT_PREFIX).unwrap_or(&self.0);
        let head: String = body.chars().take(8).collect();
        if self.is_draft() {
            format!("draft:{head}")
        } else {
            head
        }
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

/// Correlation id for a write intent (UUIDv7, so digests sort by creation).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(uuid::Uuid);

impl Digest {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for display only.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for Digest {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}
