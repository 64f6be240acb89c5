//! lazytree: an incremental, lazily populated tree model.
//!
//! Generators produce rows on demand; a background population fills a
//! deduplicating node table that views address by row and column.
//!
//! Layers, inner to outer:
//! - [`domain`]: items, nodes, the node table, generators, path trees
//! - [`application`]: background population and the tree model
//! - [`infrastructure`]: filesystem generator and path list input
//! - [`cli`]: the `lazytree` command

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod tree_traits;
pub mod util;
