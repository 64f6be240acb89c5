//! Terminal output formatting with colors
//!
//! Respects NO_COLOR, CLICOLOR, CLICOLOR_FORCE automatically.

use colored::Colorize;

use crate::domain::{Node, NodeId, NodeKind, NodeState};

/// Print error (red bold "error:" prefix) to stderr
pub fn error(msg: &(impl std::fmt::Display + ?Sized)) {
    eprintln!("{}: {}", "error".red().bold(), msg);
}

/// Print warning (yellow "Warning:" prefix) to stderr
pub fn warning(msg: &(impl std::fmt::Display + ?Sized)) {
    eprintln!("{}: {}", "Warning".yellow(), msg);
}

/// Print section header (cyan bold)
pub fn header(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}", msg.to_string().cyan().bold());
}

/// Print indented detail (no color)
pub fn detail(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("  {}", msg);
}

/// Print plain output (no color, for data)
pub fn info(msg: &(impl std::fmt::Display + ?Sized)) {
    println!("{}", msg);
}

/// Tree label with state glyphs: `…` loading, `!` failed, `⊘` cancelled,
/// `↪` duplicate.
pub fn node_label(_id: NodeId, node: &Node) -> String {
    let name = node.label();
    let mut label = match node.kind() {
        NodeKind::Folder { .. } => name.blue().bold().to_string(),
        _ if node.item().column(1).is_some_and(|k| k.to_string() == "dir") => {
            name.blue().to_string()
        }
        _ => name,
    };
    if node.is_duplicate() {
        label = format!("{} {}", label.dimmed(), "↪".magenta());
    }
    if let Some(failure) = node.failure() {
        label = format!("{} {} {}", label, "!".red().bold(), failure.red());
    }
    match node.state() {
        NodeState::InProgress => label = format!("{} {}", label, "…".yellow()),
        NodeState::Cancelled => label = format!("{} {}", label, "⊘".yellow()),
        NodeState::NotStarted | NodeState::Done => {}
    }
    label
}
