/*
Rendering of node tables as termtree trees.
Kept as a trait so callers can plug their own labels (the CLI adds colors and state glyphs).
 */
use termtree::Tree;
use tracing::instrument;

use crate::domain::{Node, NodeId, NodeState, NodeTable};

pub trait TreeNodeConvert {
    fn to_tree_string(&self) -> Tree<String>;

    fn to_tree_with<F>(&self, label: F) -> Tree<String>
    where
        F: Fn(NodeId, &Node) -> String;
}

/// Plain label: name plus markers for duplicates, failures and pending work.
pub fn plain_label(_id: NodeId, node: &Node) -> String {
    let mut label = node.label();
    if node.is_duplicate() {
        label.push_str(" (duplicate)");
    }
    if node.has_error() {
        label.push_str(" (failed)");
    }
    match node.state() {
        NodeState::InProgress => label.push_str(" (loading)"),
        NodeState::Cancelled => label.push_str(" (cancelled)"),
        _ => {}
    }
    label
}

impl TreeNodeConvert for NodeTable {
    #[instrument(level = "debug", skip(self))]
    fn to_tree_string(&self) -> Tree<String> {
        self.to_tree_with(plain_label)
    }

    fn to_tree_with<F>(&self, label: F) -> Tree<String>
    where
        F: Fn(NodeId, &Node) -> String,
    {
        fn build_tree<F>(table: &NodeTable, id: NodeId, parent_tree: &mut Tree<String>, label: &F)
        where
            F: Fn(NodeId, &Node) -> String,
        {
            for &child_id in table.children(id) {
                if let Some(child) = table.get(child_id) {
                    let mut child_tree = Tree::new(label(child_id, child));
                    build_tree(table, child_id, &mut child_tree, label);
                    parent_tree.push(child_tree);
                }
            }
        }

        let root = self.root();
        let title = self
            .get(root)
            .map(|r| r.label())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let mut tree = Tree::new(title);
        build_tree(self, root, &mut tree, &label);
        tree
    }
}
