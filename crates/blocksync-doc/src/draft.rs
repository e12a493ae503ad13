//! Draft identity: client-minted blocks awaiting their permanent id.
//!
//! A draft is inserted synchronously with a `[draft]` id. When the remote
//! create succeeds the draft is swapped, in place, for the permanent row and
//! every `parent_id` pointing at the draft is rewritten in one pass. When the
//! create fails the draft is discarded and the tree reconciled.

use blocksync_types::{Block, BlockId, BlockKind};
use tracing::debug;

use crate::document::BlockDocument;
use crate::tree;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Replaced; `rewritten` blocks had their `parent_id` retargeted.
    Resolved { rewritten: usize },
    /// No block with that draft id (already resolved or discarded).
    Unknown,
}

impl BlockDocument {
    /// Insert a new draft block of `kind` and return it as placed.
    ///
    /// Placement:
    /// - the first container in a container-free document goes to position 0
    ///   and every existing leaf becomes its member;
    /// - otherwise, with a focused block, right after it, inheriting its
    ///   container (or the focused container itself);
    /// - otherwise at the end, under the last container if any.
    ///
    /// A new leaf takes focus. A field draft binds the first free form field.
    pub fn insert_draft(&mut self, kind: BlockKind) -> Block {
        let mut draft = Block::new(BlockId::draft(), kind);
        if kind == BlockKind::Field {
            draft.field_id = self.fields.take();
        }
        let focus_pos = self.focus.as_ref().and_then(|f| self.position(f));

        let index = if kind.is_container() {
            if !self.has_containers() {
                for block in self.blocks.iter_mut() {
                    block.parent_id = Some(draft.id.clone());
                }
                0
            } else {
                focus_pos.map(|p| p + 1).unwrap_or(self.blocks.len())
            }
        } else {
            match focus_pos {
                Some(p) => {
                    let focused = &self.blocks[p];
                    draft.parent_id = if focused.is_container() {
                        Some(focused.id.clone())
                    } else {
                        focused.parent_id.clone()
                    };
                    p + 1
                }
                None => {
                    draft.parent_id = self.containers().last().map(|c| c.id.clone());
                    self.blocks.len()
                }
            }
        };

        let id = draft.id.clone();
        self.blocks.insert(index, draft.clone());
        self.blocks = tree::reconcile(std::mem::take(&mut self.blocks));
        if !kind.is_container() {
            self.focus = Some(id.clone());
        }
        self.version += 1;
        debug!(block = %id.short(), %kind, index, "draft inserted");

        self.get(&id).cloned().unwrap_or(draft)
    }

    /// Swap a draft for its permanent row.
    ///
    /// The permanent block replaces the draft at the draft's position; every
    /// block whose `parent_id` is the draft is rewritten; focus follows.
    ///
    /// The draft's `parent_id` and field binding are kept over the remote
    /// row's: the create may have been sent with the parent held back, and
    /// both can change locally while it is in flight.
    pub fn resolve_draft(&mut self, draft: &BlockId, permanent: Block) -> ResolveOutcome {
        let Some(pos) = self.position(draft) else {
            debug!(draft = %draft.short(), "resolve for unknown draft ignored");
            return ResolveOutcome::Unknown;
        };
        let permanent_id = permanent.id.clone();

        // A push insert can land the permanent row before the create returns.
        let mut pos = pos;
        if let Some(dup) = self.position(&permanent_id) {
            self.blocks.remove(dup);
            if dup < pos {
                pos -= 1;
            }
        }

        let mut permanent = permanent;
        permanent.parent_id = self.blocks[pos].parent_id.clone();
        permanent.field_id = self.blocks[pos].field_id.clone();
        self.blocks[pos] = permanent;
        let mut rewritten = 0;
        for block in self.blocks.iter_mut() {
            if block.parent_id.as_ref() == Some(draft) {
                block.parent_id = Some(permanent_id.clone());
                rewritten += 1;
            }
        }
        if self.focus.as_ref() == Some(draft) {
            self.focus = Some(permanent_id.clone());
        }

        self.blocks = tree::reconcile(std::mem::take(&mut self.blocks));
        self.version += 1;
        debug!(draft = %draft.short(), block = %permanent_id.short(), rewritten, "draft resolved");
        ResolveOutcome::Resolved { rewritten }
    }

    /// Compensate a failed create: drop the draft and reconcile.
    pub fn discard_draft(&mut self, draft: &BlockId) -> bool {
        let removed = self.delete_block(draft).is_some();
        if removed {
            debug!(draft = %draft.short(), "draft discarded");
        }
        removed
    }

    /// Drafts still awaiting resolution, in display order.
    pub fn draft_ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.is_draft())
            .map(|b| b.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn section(id: &str, idx: usize) -> Block {
        Block::new(BlockId::new(id), BlockKind::Section).at(idx)
    }

    fn field(id: &str, parent: Option<&str>, idx: usize) -> Block {
        let b = Block::new(BlockId::new(id), BlockKind::Field).at(idx);
        match parent {
            Some(p) => b.with_parent(p),
            None => b,
        }
    }

    #[test]
    fn test_scenario_unfocused_draft_appends_and_resolves() {
        let mut doc = BlockDocument::from_blocks(vec![field("x", None, 0), field("y", None, 1)]);
        let draft = doc.insert_draft(BlockKind::Field);

        assert!(draft.is_draft());
        assert_eq!(draft.local_index, 2);
        assert_eq!(draft.parent_id, None);
        assert_eq!(doc.blocks().last().map(|b| &b.id), Some(&draft.id));

        let mut permanent = draft.clone();
        permanent.id = BlockId::new("f_901");
        let outcome = doc.resolve_draft(&draft.id, permanent);
        assert_eq!(outcome, ResolveOutcome::Resolved { rewritten: 0 });
        assert_eq!(doc.blocks()[2].id.as_str(), "f_901");
        assert_eq!(doc.len(), 3);
        assert!(doc.draft_ids().is_empty());
        assert_eq!(doc.focused(), Some(&BlockId::new("f_901")));
    }

    #[test]
    fn test_first_container_adopts_existing_leaves() {
        let mut doc = BlockDocument::from_blocks(vec![field("a", None, 0), field("b", None, 1)]);
        doc.focus(&BlockId::new("b"));
        let section = doc.insert_draft(BlockKind::Section);

        assert_eq!(section.local_index, 0);
        assert_eq!(section.parent_id, None);
        assert_eq!(doc.children_of(&section.id).len(), 2);
        assert_eq!(doc.focused(), Some(&BlockId::new("b")));
    }

    #[test]
    fn test_focused_insert_goes_after_focus_in_same_container() {
        let mut doc = BlockDocument::from_blocks(vec![
            section("s1", 0),
            field("a", Some("s1"), 1),
            field("b", Some("s1"), 2),
            section("s2", 3),
        ]);
        doc.focus(&BlockId::new("a"));
        let draft = doc.insert_draft(BlockKind::Text);
        assert_eq!(draft.local_index, 2);
        assert_eq!(draft.parent_id, Some(BlockId::new("s1")));
        assert!(draft.body_html.is_some());
    }

    #[test]
    fn test_focused_container_receives_leaf() {
        let mut doc = BlockDocument::from_blocks(vec![
            section("s1", 0),
            field("a", Some("s1"), 1),
            section("s2", 2),
        ]);
        doc.focus(&BlockId::new("s2"));
        let draft = doc.insert_draft(BlockKind::Image);
        assert_eq!(draft.parent_id, Some(BlockId::new("s2")));
        assert_eq!(draft.local_index, 3);
    }

    #[test]
    fn test_unfocused_leaf_joins_last_container() {
        let mut doc = BlockDocument::from_blocks(vec![section("s1", 0), section("s2", 1)]);
        let draft = doc.insert_draft(BlockKind::Divider);
        assert_eq!(draft.parent_id, Some(BlockId::new("s2")));
        assert_eq!(draft.local_index, 2);
    }

    #[test]
    fn test_resolve_rewrites_exactly_the_referencing_children() {
        let mut doc = BlockDocument::from_blocks(vec![field("a", None, 0), field("b", None, 1)]);
        let section = doc.insert_draft(BlockKind::Section);
        doc.blur();
        let extra = doc.insert_draft(BlockKind::Field);
        assert_eq!(extra.parent_id, Some(section.id.clone()));

        let before: Vec<Block> = doc.blocks().to_vec();
        let mut permanent = section.clone();
        permanent.id = BlockId::new("s_77");
        let outcome = doc.resolve_draft(&section.id, permanent);
        assert_eq!(outcome, ResolveOutcome::Resolved { rewritten: 3 });

        for (old, new) in before.iter().zip(doc.blocks()) {
            if old.id == section.id {
                assert_eq!(new.id.as_str(), "s_77");
            } else {
                assert_eq!(old.id, new.id);
                assert_eq!(new.parent_id, Some(BlockId::new("s_77")));
            }
        }
    }

    #[test]
    fn test_resolve_twice_is_unknown() {
        let mut doc = BlockDocument::new();
        let draft = doc.insert_draft(BlockKind::Field);
        let mut permanent = draft.clone();
        permanent.id = BlockId::new("f_1");
        doc.resolve_draft(&draft.id, permanent.clone());
        assert_eq!(doc.resolve_draft(&draft.id, permanent), ResolveOutcome::Unknown);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_resolve_drops_pushed_duplicate() {
        let mut doc = BlockDocument::new();
        let draft = doc.insert_draft(BlockKind::Field);
        let mut permanent = draft.clone();
        permanent.id = BlockId::new("f_1");
        doc.blocks.push(permanent.clone().at(1));

        doc.resolve_draft(&draft.id, permanent);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.blocks()[0].id.as_str(), "f_1");
    }

    #[test]
    fn test_resolve_keeps_parent_held_back_from_remote() {
        let mut doc = BlockDocument::new();
        let section = doc.insert_draft(BlockKind::Section);
        let leaf = doc.insert_draft(BlockKind::Field);
        assert_eq!(leaf.parent_id, Some(section.id.clone()));

        let mut remote_section = section.clone();
        remote_section.id = BlockId::new("s_1");
        doc.resolve_draft(&section.id, remote_section);

        // The leaf's row came back without a parent.
        let mut remote_leaf = leaf.clone();
        remote_leaf.id = BlockId::new("f_2");
        remote_leaf.parent_id = None;
        doc.resolve_draft(&leaf.id, remote_leaf);

        assert_eq!(doc.get(&BlockId::new("f_2")).unwrap().parent_id, Some(BlockId::new("s_1")));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_field_draft_takes_and_returns_pool_id() {
        let mut doc = BlockDocument::from_blocks(vec![section("s1", 0)]);
        doc.set_form_fields(["email", "name"]);

        let text = doc.insert_draft(BlockKind::Text);
        assert_eq!(text.field_id, None);
        let draft = doc.insert_draft(BlockKind::Field);
        assert_eq!(draft.field_id.as_deref(), Some("email"));
        assert_eq!(doc.available_field_ids(), &["name"]);

        assert!(doc.discard_draft(&draft.id));
        assert_eq!(doc.available_field_ids(), &["name", "email"]);
    }

    #[test]
    fn test_field_draft_without_free_ids_is_unbound() {
        let mut doc = BlockDocument::new();
        let draft = doc.insert_draft(BlockKind::Field);
        assert_eq!(draft.field_id, None);
    }

    #[test]
    fn test_discard_draft_reconciles() {
        let mut doc = BlockDocument::from_blocks(vec![section("s1", 0), field("a", Some("s1"), 1)]);
        doc.focus(&BlockId::new("s1"));
        let draft = doc.insert_draft(BlockKind::Field);
        assert!(doc.discard_draft(&draft.id));
        assert!(!doc.discard_draft(&draft.id));
        assert_eq!(doc.len(), 2);
        assert!(doc.focused().is_none());
        let indices: Vec<usize> = doc.blocks().iter().map(|b| b.local_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }
}
