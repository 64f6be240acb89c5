//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::entities::NodeId;

/// Domain errors represent violations of the node table's structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("duplicate marker cannot own children: {0}")]
    DuplicateParent(NodeId),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

/// Error raised by a generator while producing a sequence.
///
/// Never fatal for the tree: the draining node keeps what it has and
/// records the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("generator failed: {message}")]
pub struct GeneratorError {
    pub message: String,
}

impl GeneratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for node table operations.
pub type DomainResult<T> = Result<T, DomainError>;
