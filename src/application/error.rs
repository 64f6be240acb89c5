//! Application-level errors (wraps domain errors)

use thiserror::Error;

use crate::domain::DomainError;

/// Application errors wrap domain errors and add scheduling concerns.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("cannot build worker pool")]
    ThreadPool(#[source] rayon::ThreadPoolBuildError),

    #[error("cannot start writer thread")]
    Writer(#[source] std::io::Error),

    #[error("stale index: generation {index} but model is at {current}")]
    StaleIndex { index: u64, current: u64 },
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
