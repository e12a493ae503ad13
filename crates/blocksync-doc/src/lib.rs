//! Local block document for blocksync.
//!
//! Pure and synchronous: no I/O, no async, no error type. All edits apply to
//! local state immediately; the client crate diffs the result and schedules
//! remote writes.
//!
//! # Structure
//!
//! - [`tree`]: flat list ⇄ depth-1 hierarchy, reconciliation after edits
//! - [`BlockDocument`]: the flat list plus focus, with move/delete/set entry points
//! - [`FieldPool`]: form field ids not yet bound to a field block
//! - draft identity: [`BlockDocument::insert_draft`], [`BlockDocument::resolve_draft`],
//!   [`BlockDocument::discard_draft`]

mod document;
mod draft;
mod fields;
pub mod tree;

pub use document::{BlockDocument, MoveOutcome, MoveRejection, MoveTarget};
pub use draft::ResolveOutcome;
pub use fields::FieldPool;
pub use tree::TreeNode;
