//! Flat list ⇄ depth-1 hierarchy.
//!
//! The canonical document is a flat list ordered by `local_index`. Containers
//! sit at the root and hold leaves; leaves without a container are root nodes
//! themselves. Containers never nest, so the hierarchy is at most one level
//! deep and no recursion is needed in either direction.

use std::collections::{HashMap, HashSet};

use blocksync_types::{Block, BlockId};

/// One root-level node: a container with its leaves, or a bare leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub block: Block,
    /// Always empty for a leaf node.
    pub children: Vec<Block>,
}

impl TreeNode {
    fn new(block: Block) -> Self {
        Self {
            block,
            children: Vec::new(),
        }
    }
}

/// Build the depth-1 hierarchy, honoring `parent_id`.
///
/// Blocks are visited in `local_index` order (stable for ties). A leaf whose
/// parent is an existing container joins that container wherever it sits in
/// the list. Any other leaf, including one pointing at a missing id or at
/// another leaf, becomes a root node.
pub fn build_hierarchy(blocks: &[Block]) -> Vec<TreeNode> {
    let mut ordered: Vec<&Block> = blocks.iter().collect();
    ordered.sort_by_key(|b| b.local_index);

    let containers: HashSet<&BlockId> = ordered
        .iter()
        .filter(|b| b.is_container())
        .map(|b| &b.id)
        .collect();

    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut slot: HashMap<BlockId, usize> = HashMap::new();

    for block in &ordered {
        let joins_container = !block.is_container()
            && block
                .parent_id
                .as_ref()
                .is_some_and(|p| containers.contains(p));
        if !joins_container {
            if block.is_container() {
                slot.insert(block.id.clone(), nodes.len());
            }
            nodes.push(TreeNode::new((*block).clone()));
        }
    }

    for block in &ordered {
        if block.is_container() {
            continue;
        }
        if let Some(idx) = block.parent_id.as_ref().and_then(|p| slot.get(p)) {
            nodes[*idx].children.push((*block).clone());
        }
    }

    nodes
}

/// Flatten a hierarchy: `local_index` becomes the flattened position and
/// `parent_id` the enclosing container, or `None` at the root.
pub fn flatten(nodes: &[TreeNode]) -> Vec<Block> {
    let mut out = Vec::with_capacity(nodes.iter().map(|n| 1 + n.children.len()).sum());
    for node in nodes {
        let mut head = node.block.clone();
        head.parent_id = None;
        head.local_index = out.len();
        let parent = head.is_container().then(|| head.id.clone());
        out.push(head);

        for child in &node.children {
            let mut child = child.clone();
            child.parent_id = parent.clone();
            child.local_index = out.len();
            out.push(child);
        }
    }
    out
}

/// Normalize a list after a structural mutation.
///
/// The list's current order is authoritative: indices are refreshed from
/// position first. Containers are forced to the root. A leaf whose parent is
/// no longer a live container adopts the nearest container above it (or the
/// root). Root leaves stay at the root, wherever they sit. The result is then
/// re-flattened through the hierarchy, so a list `move_block` produced comes
/// back unchanged.
pub fn reconcile(blocks: Vec<Block>) -> Vec<Block> {
    let containers: HashSet<BlockId> = blocks
        .iter()
        .filter(|b| b.is_container())
        .map(|b| b.id.clone())
        .collect();

    let mut nearest: Option<BlockId> = None;
    let mut positioned = Vec::with_capacity(blocks.len());
    for (idx, mut block) in blocks.into_iter().enumerate() {
        block.local_index = idx;
        if block.is_container() {
            block.parent_id = None;
            nearest = Some(block.id.clone());
        } else if block
            .parent_id
            .as_ref()
            .is_some_and(|p| !containers.contains(p))
        {
            block.parent_id = nearest.clone();
        }
        positioned.push(block);
    }

    flatten(&build_hierarchy(&positioned))
}

/// Remove the element at `from` and reinsert it at `to`, shifting the
/// elements in between by one. Out-of-range indices leave the list as is.
pub fn array_move<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from >= items.len() || to >= items.len() || from == to {
        return;
    }
    let item = items.remove(from);
    items.insert(to, item);
}

/// Nearest container strictly above `position`.
pub fn nearest_container_above(blocks: &[Block], position: usize) -> Option<&Block> {
    blocks[..position.min(blocks.len())]
        .iter()
        .rev()
        .find(|b| b.is_container())
}
