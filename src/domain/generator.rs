//! Generator protocol: the pull-based producer behind every lazy tree.

use std::collections::HashMap;

use crate::domain::entities::{EntityKey, Item};
use crate::domain::error::GeneratorError;

/// Depth auto-expanded when a generator is installed.
pub const DEFAULT_INITIAL_EXPANSION_DEPTH: usize = 1;

/// Lazy sequence of items, pulled one at a time by a worker.
pub type ItemStream = Box<dyn Iterator<Item = Result<Item, GeneratorError>> + Send>;

/// Sequence for a parent the generator cannot resolve.
pub fn empty_stream() -> ItemStream {
    Box::new(std::iter::empty())
}

/// Producer of tree rows.
///
/// `children` may block arbitrarily; it only ever runs on pool workers.
/// Implementations must tolerate concurrent calls for different parents and
/// return a fresh, restartable stream on every call.
pub trait TreeGenerator: Send + Sync {
    fn num_columns(&self) -> usize;

    fn column_title(&self, column: usize) -> String;

    /// Title of the view. May block; resolved once after the first population.
    fn name(&self) -> String {
        String::new()
    }

    fn roots(&self) -> ItemStream {
        self.children(&EntityKey::Null)
    }

    fn children(&self, parent: &EntityKey) -> ItemStream;

    fn initial_expansion_depth(&self) -> usize {
        DEFAULT_INITIAL_EXPANSION_DEPTH
    }

    /// Column siblings are kept sorted by, `None` keeps generation order.
    fn sort_column(&self) -> Option<usize> {
        None
    }

    fn enable_deduplication(&self) -> bool {
        true
    }
}

/// Generator over a fixed parent-key -> children map.
///
/// Roots are stored under [`EntityKey::Null`].
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    name: String,
    columns: Vec<String>,
    children: HashMap<EntityKey, Vec<Item>>,
    initial_depth: usize,
    sort_column: Option<usize>,
    deduplicate: bool,
}

impl StaticGenerator {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            name: String::new(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            children: HashMap::new(),
            initial_depth: DEFAULT_INITIAL_EXPANSION_DEPTH,
            sort_column: None,
            deduplicate: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_roots(self, items: Vec<Item>) -> Self {
        self.with_children(EntityKey::Null, items)
    }

    pub fn with_children(mut self, parent: impl Into<EntityKey>, items: Vec<Item>) -> Self {
        self.children.entry(parent.into()).or_default().extend(items);
        self
    }

    pub fn with_initial_depth(mut self, depth: usize) -> Self {
        self.initial_depth = depth;
        self
    }

    pub fn with_sort_column(mut self, column: usize) -> Self {
        self.sort_column = Some(column);
        self
    }

    pub fn without_deduplication(mut self) -> Self {
        self.deduplicate = false;
        self
    }
}

impl TreeGenerator for StaticGenerator {
    fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn column_title(&self, column: usize) -> String {
        self.columns.get(column).cloned().unwrap_or_default()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn children(&self, parent: &EntityKey) -> ItemStream {
        match self.children.get(parent) {
            Some(items) => Box::new(items.clone().into_iter().map(Ok)),
            None => empty_stream(),
        }
    }

    fn initial_expansion_depth(&self) -> usize {
        self.initial_depth
    }

    fn sort_column(&self) -> Option<usize> {
        self.sort_column
    }

    fn enable_deduplication(&self) -> bool {
        self.deduplicate
    }
}
