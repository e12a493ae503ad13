//! Form field ids not yet bound to a block.
//!
//! Each form field can back at most one field block. New field blocks take
//! the first free id; deleting or rebinding a block hands its id back.

use std::collections::HashSet;

use tracing::trace;

/// Ordered set of unbound field ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldPool {
    available: Vec<String>,
}

impl FieldPool {
    /// Build a pool from `ids`, dropping repeats but keeping first-seen order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let available = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { available }
    }

    pub fn available(&self) -> &[String] {
        &self.available
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.available.iter().any(|a| a == id)
    }

    /// Hand out the first free id.
    pub fn take(&mut self) -> Option<String> {
        if self.available.is_empty() {
            return None;
        }
        let id = self.available.remove(0);
        trace!(field = %id, left = self.available.len(), "field id taken");
        Some(id)
    }

    /// Mark `id` bound. Returns whether it was free.
    pub fn claim(&mut self, id: &str) -> bool {
        let before = self.available.len();
        self.available.retain(|a| a != id);
        before != self.available.len()
    }

    /// Return `id` to the end of the pool. Already free is a no-op.
    pub fn release(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        trace!(field = %id, "field id released");
        self.available.push(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_take_hands_out_in_order() {
        let mut pool = FieldPool::new(["email", "name", "email", "phone"]);
        assert_eq!(pool.available(), &["email", "name", "phone"]);
        assert_eq!(pool.take().as_deref(), Some("email"));
        assert_eq!(pool.take().as_deref(), Some("name"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_empty_pool_takes_nothing() {
        let mut pool = FieldPool::default();
        assert!(pool.take().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_claim_and_release() {
        let mut pool = FieldPool::new(["email", "name"]);
        assert!(pool.claim("name"));
        assert!(!pool.claim("name"));
        assert!(pool.release("name"));
        assert!(!pool.release("name"));
        assert!(pool.release("phone"));
        assert_eq!(pool.available(), &["email", "name", "phone"]);
    }
}
