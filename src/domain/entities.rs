//! Domain entities: keys, items and materialized nodes

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use generational_arena::Index;
use itertools::Itertools;

/// Opaque identifier of a domain object.
///
/// Keys are totally ordered and hashable so they can index the
/// deduplication map. `Null` means "no entity" and is never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EntityKey {
    #[default]
    Null,
    Id(u64),
    Name(Arc<str>),
}

impl EntityKey {
    pub fn is_null(&self) -> bool {
        matches!(self, EntityKey::Null)
    }
}

impl From<u64> for EntityKey {
    fn from(id: u64) -> Self {
        EntityKey::Id(id)
    }
}

impl From<&str> for EntityKey {
    fn from(name: &str) -> Self {
        EntityKey::Name(Arc::from(name))
    }
}

impl From<String> for EntityKey {
    fn from(name: String) -> Self {
        EntityKey::Name(Arc::from(name))
    }
}

impl From<&Path> for EntityKey {
    fn from(path: &Path) -> Self {
        EntityKey::Name(Arc::from(path.to_string_lossy().as_ref()))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Null => write!(f, "<null>"),
            EntityKey::Id(id) => write!(f, "#{}", id),
            EntityKey::Name(name) => write!(f, "{}", name),
        }
    }
}

/// One displayable cell of an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Value {
    #[default]
    Empty,
    Int(i64),
    Text(String),
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Int(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Immutable data for one row, produced once by a generator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    pub key: EntityKey,
    /// Second identity under which the item deduplicates (e.g. a symlink target)
    pub alias_key: Option<EntityKey>,
    pub columns: Vec<Value>,
}

impl Item {
    pub fn new(key: impl Into<EntityKey>, columns: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            alias_key: None,
            columns,
        }
    }

    /// Single-column item, the common case for names.
    pub fn named(key: impl Into<EntityKey>, name: impl Into<Value>) -> Self {
        Self::new(key, vec![name.into()])
    }

    pub fn with_alias(mut self, alias: impl Into<EntityKey>) -> Self {
        self.alias_key = Some(alias.into());
        self
    }

    pub fn column(&self, column: usize) -> Option<&Value> {
        self.columns.get(column)
    }

    /// First column as text, used as the row label.
    pub fn label(&self) -> String {
        self.columns
            .first()
            .map(|v| v.to_string())
            .unwrap_or_default()
    }
}

/// Address of a node inside one table generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) Index);

impl NodeId {
    /// Slot number in the arena.
    pub fn raw(&self) -> usize {
        self.0.into_raw_parts().0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.0.into_raw_parts();
        if generation == 0 {
            write!(f, "{}", slot)
        } else {
            write!(f, "{}v{}", slot, generation)
        }
    }
}

/// Population state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    #[default]
    NotStarted,
    InProgress,
    Done,
    Cancelled,
}

/// What a node stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Row produced by a generator (or the root sentinel)
    Generated,
    /// Path-tree folder; more than one component when collapsed
    Folder { components: Vec<String> },
    /// Path-tree leaf
    File,
}

impl NodeKind {
    pub fn is_folder(&self) -> bool {
        matches!(self, NodeKind::Folder { .. })
    }
}

/// Display name of a (possibly collapsed) folder.
///
/// `["/", "a", "b"]` renders as `/a/b`, `["a", "b"]` as `a/b`.
pub fn folder_display_name(components: &[String]) -> String {
    match components.split_first() {
        Some((first, rest)) if first == "/" => format!("/{}", rest.iter().join("/")),
        _ => components.iter().join("/"),
    }
}

/// Materialized tree node.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) item: Item,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) state: NodeState,
    pub(crate) duplicate_of: Option<NodeId>,
    pub(crate) failure: Option<String>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(item: Item, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            item,
            parent,
            children: Vec::new(),
            state: NodeState::NotStarted,
            duplicate_of: None,
            failure: None,
            kind,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// Canonical node this duplicate refers to.
    pub fn duplicate_of(&self) -> Option<NodeId> {
        self.duplicate_of
    }

    /// Error message when draining this node's children failed mid-stream.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.failure.is_some()
    }

    pub fn label(&self) -> String {
        self.item.label()
    }
}
