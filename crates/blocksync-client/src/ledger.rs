//! Transaction ledger: the active set of write intents and their status.
//!
//! ```text
//!   push()          admit()            resolve()
//!  ───────▶ pending ───────▶ queued ──────────────▶ (removed; failures kept
//!                                                     in a bounded list)
//! ```
//!
//! An intent is admitted exactly once per digest; pushing a digest already
//! in the active set is a no-op.

use std::collections::VecDeque;

use blocksync_types::{Digest, TxStatus, WriteIntent};
use tracing::{trace, warn};

use crate::queue::WriteOutcome;

#[derive(Debug, Clone)]
pub struct TransactionLog {
    active: Vec<WriteIntent>,
    failed: VecDeque<Digest>,
    max_failed: usize,
}

impl TransactionLog {
    pub fn new(max_failed: usize) -> Self {
        Self {
            active: Vec::new(),
            failed: VecDeque::new(),
            max_failed,
        }
    }

    /// Record a new intent. Returns `false` if its digest is already active.
    pub fn push(&mut self, intent: WriteIntent) -> bool {
        if self.get(&intent.digest).is_some() {
            trace!(digest = %intent.digest.short(), "duplicate digest ignored");
            return false;
        }
        self.active.push(intent);
        true
    }

    pub fn get(&self, digest: &Digest) -> Option<&WriteIntent> {
        self.active.iter().find(|i| &i.digest == digest)
    }

    /// Intents not yet handed to the queue, in submission order.
    pub fn pending(&self) -> Vec<WriteIntent> {
        self.active
            .iter()
            .filter(|i| i.status == TxStatus::Pending)
            .cloned()
            .collect()
    }

    /// Mark every pending intent queued and return them, in order.
    pub fn admit_pending(&mut self) -> Vec<WriteIntent> {
        let mut admitted = Vec::new();
        for intent in self.active.iter_mut().filter(|i| i.status == TxStatus::Pending) {
            intent.status = TxStatus::Queued;
            admitted.push(intent.clone());
        }
        admitted
    }

    pub fn set_status(&mut self, digest: &Digest, status: TxStatus) -> bool {
        match self.active.iter_mut().find(|i| &i.digest == digest) {
            Some(intent) => {
                intent.status = status;
                true
            }
            None => false,
        }
    }

    /// Resolve an intent: drop it from the active set and, if it failed,
    /// remember its digest. Returns the resolved intent.
    pub fn resolve(&mut self, digest: &Digest, outcome: &WriteOutcome) -> Option<WriteIntent> {
        let pos = self.active.iter().position(|i| &i.digest == digest)?;
        let mut intent = self.active.remove(pos);
        intent.status = TxStatus::Resolved;

        if let WriteOutcome::Failed(reason) = outcome {
            warn!(digest = %digest.short(), row = %intent.row, %reason, "write failed");
            if self.max_failed > 0 {
                if self.failed.len() == self.max_failed {
                    self.failed.pop_front();
                }
                self.failed.push_back(*digest);
            }
        }
        Some(intent)
    }

    pub fn active(&self) -> &[WriteIntent] {
        &self.active
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Most recent failures, oldest first.
    pub fn failed_digests(&self) -> impl Iterator<Item = &Digest> {
        self.failed.iter()
    }

    pub fn has_failed(&self, digest: &Digest) -> bool {
        self.failed.contains(digest)
    }
}
