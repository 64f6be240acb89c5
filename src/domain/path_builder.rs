//! Synchronous builder of folder trees from flat path lists.
//!
//! The table starts as root + one `/` folder. With collapsing enabled a run
//! of folders that each hold nothing but one sub-folder is shown as a single
//! node; an import that gives a folder in the middle of such a run a second
//! child splits the run again.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::domain::entities::{
    folder_display_name, EntityKey, Item, Node, NodeId, NodeKind, NodeState, Value,
};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::node_table::{NodeTable, TableOptions};

const TOP_FOLDER: &str = "/";

/// Builds a [`NodeTable`] from `(path, payload)` pairs.
pub struct PathTreeBuilder {
    table: NodeTable,
    top: NodeId,
    leaves: HashMap<String, NodeId>,
    collapse: bool,
}

impl PathTreeBuilder {
    pub fn new(collapse: bool) -> Self {
        let mut table = NodeTable::new(TableOptions {
            deduplicate: false,
            sort_column: Some(0),
        });
        let root = table.root();
        table.set_state(root, NodeState::Done);
        let top = Self::folder(vec![TOP_FOLDER.to_string()], TOP_FOLDER.to_string());
        // the root sentinel always accepts children
        let top = table.attach(root, top).unwrap_or(root);
        Self {
            table,
            top,
            leaves: HashMap::new(),
            collapse,
        }
    }

    /// Builder that shows every folder as its own node.
    pub fn flat() -> Self {
        Self::new(false)
    }

    /// Builder that collapses single-child folder chains.
    pub fn collapsing() -> Self {
        Self::new(true)
    }

    fn folder(components: Vec<String>, path: String) -> Node {
        let label = folder_display_name(&components);
        let mut node = Node::new(
            Item::new(EntityKey::from(path), vec![Value::Text(label)]),
            None,
            NodeKind::Folder { components },
        );
        node.state = NodeState::Done;
        node
    }

    fn file(name: &str, payload: EntityKey) -> Node {
        let mut node = Node::new(Item::named(payload, name), None, NodeKind::File);
        node.state = NodeState::Done;
        node
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    pub fn into_table(self) -> NodeTable {
        self.table
    }

    /// The `/` folder node (or the collapsed node that starts with it).
    pub fn top(&self) -> NodeId {
        self.top
    }

    pub fn node_count(&self) -> usize {
        self.table.len()
    }

    /// Leaf node for `path`, if imported.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let components = split_path(path).ok()?;
        self.leaves.get(&join_path(&components)).copied()
    }

    pub fn import_all<I, S>(&mut self, entries: I) -> DomainResult<()>
    where
        I: IntoIterator<Item = (S, EntityKey)>,
        S: AsRef<str>,
    {
        for (path, payload) in entries {
            self.import_path(path.as_ref(), payload)?;
        }
        Ok(())
    }

    /// Create or overwrite the leaf for `path`, creating folders as needed.
    #[instrument(level = "debug", skip(self, payload))]
    pub fn import_path(&mut self, path: &str, payload: EntityKey) -> DomainResult<NodeId> {
        let components = split_path(path)?;
        let full_path = join_path(&components);

        if let Some(&existing) = self.leaves.get(&full_path) {
            if let Some(node) = self.table.get_mut(existing) {
                node.item.key = payload;
                debug!(%existing, "overwrote leaf");
                return Ok(existing);
            }
        }

        let (name, folders) = components
            .split_last()
            .ok_or_else(|| DomainError::InvalidPath(path.to_string()))?;
        let parent = self.ensure_folder(folders)?;
        let id = self.table.attach(parent, Self::file(name, payload))?;
        self.leaves.insert(full_path, id);
        Ok(id)
    }

    /// Node that holds the folder `/<folders...>`, splitting or extending
    /// collapsed chains on the way.
    fn ensure_folder(&mut self, folders: &[String]) -> DomainResult<NodeId> {
        let mut current = self.top;
        // index of the last matched component inside `current`
        let mut pos = 0;
        let mut next = 0;

        while next < folders.len() {
            let components = self.components(current)?;
            if pos + 1 < components.len() {
                if components[pos + 1] == folders[next] {
                    pos += 1;
                    next += 1;
                } else {
                    current = self.split(current, pos + 1)?;
                }
                continue;
            }

            if let Some(child) = self.find_folder_child(current, &folders[next]) {
                current = child;
                pos = 0;
                next += 1;
                continue;
            }

            let rest = &folders[next..];
            if !self.collapse {
                for component in rest {
                    current = self.add_folder(current, vec![component.clone()])?;
                }
                return Ok(current);
            }
            if self.table.children(current).is_empty() {
                self.extend(current, rest)?;
                return Ok(current);
            }
            return self.add_folder(current, rest.to_vec());
        }

        if pos + 1 < self.components(current)?.len() {
            current = self.split(current, pos + 1)?;
        }
        Ok(current)
    }

    fn components(&self, id: NodeId) -> DomainResult<Vec<String>> {
        match self.table.get(id).map(|n| &n.kind) {
            Some(NodeKind::Folder { components }) => Ok(components.clone()),
            _ => Err(DomainError::UnknownNode(id)),
        }
    }

    fn find_folder_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.table.children(parent).iter().copied().find(|&child| {
            matches!(
                self.table.get(child).map(|n| &n.kind),
                Some(NodeKind::Folder { components }) if components.first().map(String::as_str) == Some(name)
            )
        })
    }

    fn add_folder(&mut self, parent: NodeId, components: Vec<String>) -> DomainResult<NodeId> {
        let path = self.path_below(parent, &components);
        self.table.attach(parent, Self::folder(components, path))
    }

    /// Append components to a childless folder.
    fn extend(&mut self, id: NodeId, rest: &[String]) -> DomainResult<()> {
        let mut components = self.components(id)?;
        components.extend(rest.iter().cloned());
        let path = self.path_of(id, &components);
        let replacement = Self::folder(components, path);
        let node = self.table.get_mut(id).ok_or(DomainError::UnknownNode(id))?;
        node.item = replacement.item;
        node.kind = replacement.kind;
        self.table.reposition(id)
    }

    /// Replace collapsed node `id` by a head holding `components[..at]` and
    /// a tail holding the rest; the tail adopts all children.
    #[instrument(level = "debug", skip(self))]
    fn split(&mut self, id: NodeId, at: usize) -> DomainResult<NodeId> {
        let components = self.components(id)?;
        let node = self.table.get(id).ok_or(DomainError::UnknownNode(id))?;
        let parent = node.parent.ok_or(DomainError::UnknownNode(id))?;
        let children = node.children.clone();

        let (head_components, tail_components) = components.split_at(at);
        let head = self.add_folder(parent, head_components.to_vec())?;
        let tail = self.add_folder(head, tail_components.to_vec())?;
        for child in children {
            self.table.reparent(child, tail)?;
        }
        self.table.remove(id)?;
        if self.top == id {
            self.top = head;
        }
        debug!(%id, %head, %tail, "split collapsed folder");
        Ok(head)
    }

    /// Full path of a folder that would hold `components` below `parent`.
    fn path_below(&self, parent: NodeId, components: &[String]) -> String {
        let mut all = self.ancestor_components(parent);
        all.extend(components.iter().cloned());
        join_path(&all)
    }

    /// Full path of folder `id` if it held `components`.
    fn path_of(&self, id: NodeId, components: &[String]) -> String {
        let parent = self.table.get(id).and_then(|n| n.parent);
        match parent {
            Some(parent) => self.path_below(parent, components),
            None => join_path(components),
        }
    }

    fn ancestor_components(&self, id: NodeId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.table.get(current) else {
                break;
            };
            if let NodeKind::Folder { components } = &node.kind {
                chain.push(components.clone());
            }
            cursor = node.parent;
        }
        chain.into_iter().rev().flatten().collect()
    }
}

/// Components of `path` below `/`; empty and `.` segments are dropped.
fn split_path(path: &str) -> DomainResult<Vec<String>> {
    let components: Vec<String> = path
        .trim()
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect();
    if components.is_empty() {
        return Err(DomainError::InvalidPath(path.to_string()));
    }
    Ok(components)
}

fn join_path(components: &[String]) -> String {
    let relative: Vec<&str> = components
        .iter()
        .map(String::as_str)
        .filter(|c| *c != TOP_FOLDER)
        .collect();
    format!("/{}", relative.join("/"))
}
