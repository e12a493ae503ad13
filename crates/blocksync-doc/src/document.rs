//! The local block document: flat list, focus, and synchronous mutations.
//!
//! Every mutation applies immediately and leaves the list canonical
//! (`local_index` equals position, containers at the root, leaves pointing at
//! their enclosing container). Nothing here fails: a mutation naming a
//! missing id is a no-op and reports so through its outcome.

use blocksync_types::{Block, BlockChange, BlockId};
use tracing::{debug, trace};

use crate::fields::FieldPool;
use crate::tree::{self, TreeNode};

/// Where a dragged block is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveTarget {
    /// Over another block: take its position.
    Over(BlockId),
    /// Onto the document root, outside every container.
    Root,
}

/// Why a move was refused. The document is untouched in every case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveRejection {
    /// Leaving a container for the root is not supported.
    RootDrop,
    /// Containers cannot become children of containers.
    ContainerOverContainer,
    /// The moved leaf would end up outside every container while
    /// containers exist.
    OrphansLeaves,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { from: usize, to: usize },
    Rejected(MoveRejection),
    /// The moved block or the drop target does not exist.
    Missing,
    /// Dropped onto itself, or the result is identical.
    Unchanged,
}

/// Client-held document.
#[derive(Clone, Debug, Default)]
pub struct BlockDocument {
    pub(crate) blocks: Vec<Block>,
    pub(crate) focus: Option<BlockId>,
    pub(crate) fields: FieldPool,
    pub(crate) version: u64,
}

impl BlockDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from remote rows in any order, honoring `parent_id`.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let blocks = tree::flatten(&tree::build_hierarchy(&blocks));
        Self {
            blocks,
            focus: None,
            fields: FieldPool::default(),
            version: 0,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The flat list in display order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bumped on every effective mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| &b.id == id)
    }

    pub fn hierarchy(&self) -> Vec<TreeNode> {
        tree::build_hierarchy(&self.blocks)
    }

    pub fn containers(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.is_container())
    }

    pub fn has_containers(&self) -> bool {
        self.blocks.iter().any(|b| b.is_container())
    }

    /// Ids that reference `id` as their parent.
    pub fn children_of(&self, id: &BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.parent_id.as_ref() == Some(id))
            .map(|b| b.id.clone())
            .collect()
    }

    // =========================================================================
    // Focus
    // =========================================================================

    /// Focus a block. A missing id leaves focus unchanged.
    pub fn focus(&mut self, id: &BlockId) -> bool {
        if self.position(id).is_none() {
            trace!(block = %id.short(), "focus on missing block ignored");
            return false;
        }
        self.focus = Some(id.clone());
        true
    }

    pub fn blur(&mut self) {
        self.focus = None;
    }

    pub fn focused(&self) -> Option<&BlockId> {
        self.focus.as_ref()
    }

    // =========================================================================
    // Structural mutations
    // =========================================================================

    /// Drag `id` over `target`.
    ///
    /// Remove-then-reinsert semantics: the block takes the target's position
    /// and everything in between shifts by one. A moved leaf adopts the
    /// nearest container above its new position; a move that would leave it
    /// outside every container while containers exist is refused.
    pub fn move_block(&mut self, id: &BlockId, target: &MoveTarget) -> MoveOutcome {
        let Some(from) = self.position(id) else {
            return MoveOutcome::Missing;
        };
        let over = match target {
            MoveTarget::Root => {
                debug!(block = %id.short(), "move to root refused");
                return MoveOutcome::Rejected(MoveRejection::RootDrop);
            }
            MoveTarget::Over(over) => over,
        };
        let Some(to) = self.position(over) else {
            return MoveOutcome::Missing;
        };
        if from == to {
            return MoveOutcome::Unchanged;
        }

        let moving_container = self.blocks[from].is_container();
        if moving_container && self.blocks[to].is_container() {
            debug!(block = %id.short(), over = %over.short(), "container over container refused");
            return MoveOutcome::Rejected(MoveRejection::ContainerOverContainer);
        }

        let mut candidate = self.blocks.clone();
        tree::array_move(&mut candidate, from, to);
        for (idx, block) in candidate.iter_mut().enumerate() {
            block.local_index = idx;
        }

        if !moving_container {
            let parent = tree::nearest_container_above(&candidate, to).map(|c| c.id.clone());
            if parent.is_none() && self.has_containers() {
                debug!(block = %id.short(), "move would orphan leaf, reverted");
                return MoveOutcome::Rejected(MoveRejection::OrphansLeaves);
            }
            candidate[to].parent_id = parent;
        }

        let next = tree::flatten(&tree::build_hierarchy(&candidate));
        if next == self.blocks {
            return MoveOutcome::Unchanged;
        }
        self.blocks = next;
        self.version += 1;
        let to = self.position(id).unwrap_or(to);
        debug!(block = %id.short(), from, to, "block moved");
        MoveOutcome::Moved { from, to }
    }

    /// Remove a block and reconcile. Leaves of a removed container move to
    /// the nearest container above them. Focus on the removed block clears,
    /// and a bound field id goes back to the pool.
    pub fn delete_block(&mut self, id: &BlockId) -> Option<Block> {
        let pos = self.position(id)?;
        let removed = self.blocks.remove(pos);
        if let Some(field) = &removed.field_id {
            self.fields.release(field.clone());
        }
        self.blocks = tree::reconcile(std::mem::take(&mut self.blocks));
        if self.focus.as_ref() == Some(id) {
            self.focus = None;
        }
        self.version += 1;
        debug!(block = %id.short(), kind = %removed.kind, "block deleted");
        Some(removed)
    }

    // =========================================================================
    // Payload mutations
    // =========================================================================

    /// Apply a typed payload change. Returns `false` for a missing id, a
    /// change that does not apply to the block's kind, or a no-op value.
    ///
    /// Rebinding a field block claims the new id from the pool and releases
    /// the old one.
    pub fn set_field(&mut self, id: &BlockId, change: &BlockChange) -> bool {
        let Some(block) = self.blocks.iter_mut().find(|b| &b.id == id) else {
            return false;
        };
        let previous = block.field_id.clone();
        let changed = block.apply_change(change);
        if !changed {
            trace!(block = %id.short(), column = change.column(), "set_field had no effect");
            return false;
        }
        if let BlockChange::BindField(next) = change {
            if let Some(next) = next {
                self.fields.claim(next);
            }
            if let Some(previous) = previous {
                self.fields.release(previous);
            }
        }
        self.version += 1;
        true
    }

    /// Replace a block's row wholesale with a fresher remote copy, keeping its
    /// position. Returns `false` if the id is unknown.
    pub fn replace_block(&mut self, block: Block) -> bool {
        let Some(pos) = self.position(&block.id) else {
            return false;
        };
        self.blocks[pos] = block;
        self.blocks = tree::reconcile(std::mem::take(&mut self.blocks));
        self.version += 1;
        true
    }

    // =========================================================================
    // Form fields
    // =========================================================================

    /// Field ids a new field block may bind, in hand-out order.
    pub fn available_field_ids(&self) -> &[String] {
        self.fields.available()
    }

    /// Replace the form's field list. Ids already bound by a block are not
    /// offered again.
    pub fn set_form_fields<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = FieldPool::new(ids);
        for block in &self.blocks {
            if let Some(field) = &block.field_id {
                pool.claim(field);
            }
        }
        debug!(available = pool.len(), "form fields set");
        self.fields = pool;
    }

    /// A field was added to the form. Returns `false` if it is already free
    /// or bound.
    pub fn add_form_field(&mut self, id: &str) -> bool {
        if self.blocks.iter().any(|b| b.field_id.as_deref() == Some(id)) {
            return false;
        }
        self.fields.release(id)
    }

    /// A field was removed from the form: it leaves the pool and every block
    /// bound to it is unbound. Returns the unbound blocks.
    pub fn remove_form_field(&mut self, id: &str) -> Vec<BlockId> {
        self.fields.claim(id);
        let mut unbound = Vec::new();
        for block in self.blocks.iter_mut() {
            if block.field_id.as_deref() == Some(id) {
                block.field_id = None;
                unbound.push(block.id.clone());
            }
        }
        if !unbound.is_empty() {
            self.version += 1;
            debug!(field = %id, blocks = unbound.len(), "form field removed, blocks unbound");
        }
        unbound
    }
}
