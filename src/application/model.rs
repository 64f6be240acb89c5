//! Row/column addressing over the population's table.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, instrument};

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::events::TreeEvent;
use crate::application::population::{Population, PopulationOptions, Session};
use crate::domain::{Item, Node, NodeId, NodeState, NodeTable, TreeGenerator, Value};

/// Position of a cell: a node of one generation plus a column.
///
/// Indices from an older generation are stale; reads through them yield
/// `None` and `expand` rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelIndex {
    pub generation: u64,
    pub node: NodeId,
    pub column: usize,
}

impl ModelIndex {
    pub fn sibling(&self, column: usize) -> Self {
        Self { column, ..*self }
    }
}

/// The only surface a view talks to.
pub struct TreeModel {
    population: Population,
}

impl TreeModel {
    pub fn new(options: PopulationOptions) -> ApplicationResult<Self> {
        Ok(Self {
            population: Population::new(options)?,
        })
    }

    pub fn install(&self, generator: Arc<dyn TreeGenerator>) -> u64 {
        self.population.install(generator)
    }

    pub fn install_table(&self, table: NodeTable) -> u64 {
        self.population.install_table(table)
    }

    pub fn reset(&self) -> u64 {
        self.population.reset()
    }

    pub fn generation(&self) -> u64 {
        self.population.generation()
    }

    /// Run `f` against the committed table under the read lock.
    pub fn with_table<R>(&self, f: impl FnOnce(&NodeTable) -> R) -> R {
        f(&self.population.session().table)
    }

    fn with_node<R>(&self, index: &ModelIndex, f: impl FnOnce(&Session, &Node) -> R) -> Option<R> {
        let guard = self.population.session();
        let session = &*guard;
        if session.table.generation() != index.generation {
            return None;
        }
        let node = session.table.get(index.node)?;
        Some(f(session, node))
    }

    pub fn root(&self) -> ModelIndex {
        let session = self.population.session();
        ModelIndex {
            generation: session.table.generation(),
            node: session.table.root(),
            column: 0,
        }
    }

    pub fn is_valid(&self, index: &ModelIndex) -> bool {
        self.with_node(index, |_, _| ()).is_some()
    }

    pub fn index(&self, row: usize, column: usize, parent: &ModelIndex) -> Option<ModelIndex> {
        let session = self.population.session();
        if session.table.generation() != parent.generation || column >= column_count(&session) {
            return None;
        }
        let node = session.table.get(parent.node)?;
        if node.is_duplicate() {
            return None;
        }
        let child = *node.children().get(row)?;
        Some(ModelIndex {
            generation: parent.generation,
            node: child,
            column,
        })
    }

    /// Parent of `index`; `None` for the root.
    pub fn parent(&self, index: &ModelIndex) -> Option<ModelIndex> {
        let parent = self.with_node(index, |_, node| node.parent())??;
        Some(ModelIndex {
            generation: index.generation,
            node: parent,
            column: 0,
        })
    }

    pub fn row(&self, index: &ModelIndex) -> Option<usize> {
        let session = self.population.session();
        if session.table.generation() != index.generation {
            return None;
        }
        session.table.row_of(index.node)
    }

    /// Committed children of `index`; duplicates never have rows.
    pub fn row_count(&self, index: &ModelIndex) -> usize {
        self.with_node(index, |_, node| {
            if node.is_duplicate() {
                0
            } else {
                node.children().len()
            }
        })
        .unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        column_count(&self.population.session())
    }

    pub fn header_data(&self, column: usize) -> Option<String> {
        let session = self.population.session();
        match &session.generator {
            Some(generator) if column < generator.num_columns() => {
                Some(generator.column_title(column))
            }
            Some(_) => None,
            None if column == 0 => Some("Name".to_string()),
            None => None,
        }
    }

    /// Cell value from the node's own item.
    pub fn data(&self, index: &ModelIndex) -> Option<Value> {
        self.with_node(index, |_, node| node.item().column(index.column).cloned())?
    }

    pub fn item(&self, index: &ModelIndex) -> Option<Item> {
        self.with_node(index, |_, node| node.item().clone())
    }

    /// Index of the canonical node; the index itself unless it is a duplicate.
    pub fn canonical(&self, index: &ModelIndex) -> Option<ModelIndex> {
        let node = self.with_node(index, |session, _| session.table.deduplicate(index.node))??;
        Some(ModelIndex { node, ..*index })
    }

    pub fn node_state(&self, index: &ModelIndex) -> Option<NodeState> {
        self.with_node(index, |_, node| node.state())
    }

    pub fn has_error(&self, index: &ModelIndex) -> bool {
        self.with_node(index, |_, node| node.has_error())
            .unwrap_or(false)
    }

    pub fn failure(&self, index: &ModelIndex) -> Option<String> {
        self.with_node(index, |_, node| node.failure().map(str::to_string))?
    }

    pub fn is_duplicate(&self, index: &ModelIndex) -> bool {
        self.with_node(index, |_, node| node.is_duplicate())
            .unwrap_or(false)
    }

    /// Whether expanding could show rows: unexpanded nodes are assumed to.
    pub fn has_children(&self, index: &ModelIndex) -> bool {
        self.with_node(index, |_, node| {
            !node.is_duplicate()
                && (!node.children().is_empty()
                    || matches!(node.state(), NodeState::NotStarted | NodeState::Cancelled))
        })
        .unwrap_or(false)
    }

    /// Expand `index` by `depth` levels in the background.
    #[instrument(level = "debug", skip(self))]
    pub fn expand(&self, index: &ModelIndex, depth: usize) -> ApplicationResult<()> {
        let current = self.generation();
        if index.generation != current {
            return Err(ApplicationError::StaleIndex {
                index: index.generation,
                current,
            });
        }
        debug!(node = %index.node, depth, "expand requested");
        self.population.expand(index.generation, index.node, depth);
        Ok(())
    }

    pub fn cancel_running_request(&self) -> bool {
        self.population.cancel_running_request()
    }

    /// Title reported by the generator once the first population finished.
    pub fn title(&self) -> Option<String> {
        self.population.session().title.clone()
    }

    pub fn subscribe(&self) -> Receiver<TreeEvent> {
        self.population.subscribe()
    }

    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.population.wait_until_idle(timeout)
    }
}

fn column_count(session: &Session) -> usize {
    session
        .generator
        .as_ref()
        .map(|g| g.num_columns())
        .unwrap_or(1)
}
