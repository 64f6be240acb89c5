//! Domain layer: entities, generator protocol, node table and path builder
//!
//! This layer is independent of external concerns (no threads, no I/O, no config).

pub mod entities;
pub mod error;
pub mod generator;
pub mod node_table;
pub mod path_builder;

pub use entities::*;
pub use error::{DomainError, DomainResult, GeneratorError};
pub use generator::{empty_stream, ItemStream, StaticGenerator, TreeGenerator};
pub use node_table::{NodeTable, TableOptions, TreeIterator};
pub use path_builder::PathTreeBuilder;
