//! Arena of materialized nodes with a deduplication index.

use std::collections::HashMap;

use generational_arena::Arena;
use tracing::{instrument, trace};

use crate::domain::entities::{EntityKey, Item, Node, NodeId, NodeKind, NodeState};
use crate::domain::error::{DomainError, DomainResult};

/// Per-table behaviour taken from the installed generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    pub deduplicate: bool,
    /// Siblings are kept sorted by this column; `None` keeps arrival order
    pub sort_column: Option<usize>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            deduplicate: true,
            sort_column: None,
        }
    }
}

/// All nodes of one generation.
///
/// Uses a generational arena so that ids of removed nodes can never alias
/// a later node. The root sentinel always occupies the first slot.
#[derive(Debug)]
pub struct NodeTable {
    arena: Arena<Node>,
    root: NodeId,
    dedup_index: HashMap<EntityKey, NodeId>,
    generation: u64,
    options: TableOptions,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new(TableOptions::default())
    }
}

impl NodeTable {
    pub fn new(options: TableOptions) -> Self {
        let mut arena = Arena::new();
        let root = NodeId(arena.insert(Self::root_node()));
        Self {
            arena,
            root,
            dedup_index: HashMap::new(),
            generation: 0,
            options,
        }
    }

    fn root_node() -> Node {
        Node::new(Item::default(), None, NodeKind::Generated)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True when only the root sentinel is present.
    pub fn is_empty(&self) -> bool {
        self.arena.len() <= 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id.0)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.arena.get_mut(id.0)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Row of `id` within its parent.
    pub fn row_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.get(id)?.parent?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Insert a generator item below `parent`.
    ///
    /// Items whose key or alias is already indexed become duplicate markers:
    /// `Done`, childless, pointing at the first committed node.
    pub fn insert(&mut self, parent: NodeId, item: Item) -> DomainResult<NodeId> {
        self.insert_with_row(parent, item).map(|(id, _)| id)
    }

    /// [`insert`](Self::insert), also returning the row the node landed on.
    #[instrument(level = "trace", skip(self, item), fields(key = %item.key))]
    pub fn insert_with_row(&mut self, parent: NodeId, item: Item) -> DomainResult<(NodeId, usize)> {
        let canonical = if self.options.deduplicate {
            self.lookup(&item.key)
                .or_else(|| item.alias_key.as_ref().and_then(|a| self.lookup(a)))
        } else {
            None
        };

        let mut node = Node::new(item, Some(parent), NodeKind::Generated);
        if let Some(canonical) = canonical {
            node.duplicate_of = Some(canonical);
            node.state = NodeState::Done;
        }
        let (id, row) = self.attach_at(parent, node)?;

        if canonical.is_none() && self.options.deduplicate {
            self.index(id);
        }
        Ok((id, row))
    }

    fn lookup(&self, key: &EntityKey) -> Option<NodeId> {
        if key.is_null() {
            return None;
        }
        self.dedup_index.get(key).copied()
    }

    fn index(&mut self, id: NodeId) {
        let Some(node) = self.arena.get(id.0) else {
            return;
        };
        let keys: Vec<EntityKey> = std::iter::once(node.item.key.clone())
            .chain(node.item.alias_key.clone())
            .filter(|k| !k.is_null())
            .collect();
        for key in keys {
            self.dedup_index.entry(key).or_insert(id);
        }
    }

    /// Store `node` and link it into `parent` at its sorted row.
    pub(crate) fn attach(&mut self, parent: NodeId, node: Node) -> DomainResult<NodeId> {
        self.attach_at(parent, node).map(|(id, _)| id)
    }

    fn attach_at(&mut self, parent: NodeId, mut node: Node) -> DomainResult<(NodeId, usize)> {
        let parent_node = self
            .arena
            .get(parent.0)
            .ok_or(DomainError::UnknownNode(parent))?;
        if parent_node.is_duplicate() {
            return Err(DomainError::DuplicateParent(parent));
        }
        let row = self.insertion_row(parent_node, &node.item);

        node.parent = Some(parent);
        let id = NodeId(self.arena.insert(node));
        if let Some(parent_node) = self.arena.get_mut(parent.0) {
            parent_node.children.insert(row, id);
        }
        trace!(%parent, %id, row, "attached node");
        Ok((id, row))
    }

    fn insertion_row(&self, parent: &Node, item: &Item) -> usize {
        match self.options.sort_column {
            None => parent.children.len(),
            Some(column) => {
                let value = item.column(column);
                // stable: equal values go after those already present
                parent.children.partition_point(|sibling| {
                    self.arena
                        .get(sibling.0)
                        .map(|s| s.item.column(column) <= value)
                        .unwrap_or(true)
                })
            }
        }
    }

    /// Move `id` (already stored) below `new_parent`.
    pub(crate) fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> DomainResult<()> {
        self.detach(id)?;
        let node = self.arena.get(id.0).ok_or(DomainError::UnknownNode(id))?;
        let parent_node = self
            .arena
            .get(new_parent.0)
            .ok_or(DomainError::UnknownNode(new_parent))?;
        let row = self.insertion_row(parent_node, &node.item);
        if let Some(parent_node) = self.arena.get_mut(new_parent.0) {
            parent_node.children.insert(row, id);
        }
        if let Some(node) = self.arena.get_mut(id.0) {
            node.parent = Some(new_parent);
        }
        Ok(())
    }

    /// Re-sort `id` among its siblings after its item changed.
    pub(crate) fn reposition(&mut self, id: NodeId) -> DomainResult<()> {
        let parent = self
            .get(id)
            .ok_or(DomainError::UnknownNode(id))?
            .parent
            .ok_or(DomainError::UnknownNode(id))?;
        self.reparent(id, parent)
    }

    fn detach(&mut self, id: NodeId) -> DomainResult<()> {
        let parent = self.get(id).ok_or(DomainError::UnknownNode(id))?.parent;
        if let Some(parent_node) = parent.and_then(|p| self.arena.get_mut(p.0)) {
            parent_node.children.retain(|&c| c != id);
        }
        Ok(())
    }

    /// Remove a childless node; its id stays stale forever.
    pub(crate) fn remove(&mut self, id: NodeId) -> DomainResult<Node> {
        if id == self.root {
            return Err(DomainError::UnknownNode(id));
        }
        self.detach(id)?;
        self.dedup_index.retain(|_, v| *v != id);
        self.arena.remove(id.0).ok_or(DomainError::UnknownNode(id))
    }

    /// Canonical node for `id`: itself, or the node a duplicate points at.
    pub fn deduplicate(&self, id: NodeId) -> Option<NodeId> {
        let node = self.get(id)?;
        Some(node.duplicate_of.unwrap_or(id))
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: NodeState) -> bool {
        match self.get_mut(id) {
            Some(node) if !node.is_duplicate() => {
                node.state = state;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_failed(&mut self, id: NodeId, message: String) {
        if let Some(node) = self.get_mut(id) {
            node.failure = Some(message);
        }
    }

    fn is_pristine(&self) -> bool {
        self.is_empty()
            && self.dedup_index.is_empty()
            && self
                .get(self.root)
                .is_some_and(|r| r.state == NodeState::NotStarted && r.failure.is_none())
    }

    /// Drop everything but the root and start a new generation.
    ///
    /// A table that is already root-only is left untouched.
    #[instrument(level = "debug", skip(self), fields(generation = self.generation))]
    pub fn reset(&mut self) {
        if self.is_pristine() {
            return;
        }
        self.clear();
    }

    /// Reset unconditionally and switch to new options.
    pub fn reconfigure(&mut self, options: TableOptions) {
        self.options = options;
        self.clear();
    }

    fn clear(&mut self) {
        self.arena = Arena::new();
        self.root = NodeId(self.arena.insert(Self::root_node()));
        self.dedup_index.clear();
        self.generation += 1;
    }

    /// Continue numbering after a table this one replaces.
    pub(crate) fn succeed(&mut self, previous_generation: u64) {
        self.generation = self.generation.max(previous_generation + 1);
    }

    pub fn iter(&self) -> TreeIterator<'_> {
        TreeIterator::new(self)
    }

    /// Number of levels materialized below the root.
    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            for &child in self.children(id) {
                stack.push((child, depth + 1));
            }
        }
        max_depth
    }

    /// Labels of all childless non-root nodes, in preorder.
    pub fn leaf_nodes(&self) -> Vec<String> {
        self.iter()
            .filter(|(id, node)| *id != self.root && node.children.is_empty())
            .map(|(_, node)| node.label())
            .collect()
    }

    pub fn duplicate_count(&self) -> usize {
        self.arena.iter().filter(|(_, n)| n.is_duplicate()).count()
    }
}

/// Preorder traversal from the root, siblings left to right.
pub struct TreeIterator<'a> {
    table: &'a NodeTable,
    stack: Vec<NodeId>,
}

impl<'a> TreeIterator<'a> {
    fn new(table: &'a NodeTable) -> Self {
        Self {
            table,
            stack: vec![table.root],
        }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.stack.pop() {
            if let Some(node) = self.table.get(current) {
                // reverse push for left-to-right order
                self.stack.extend(node.children.iter().rev());
                return Some((current, node));
            }
        }
        None
    }
}
