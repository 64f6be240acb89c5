//! CLI-level errors (wraps infrastructure errors)

use thiserror::Error;

use crate::application::ApplicationError;
use crate::infrastructure::InfraError;

/// Exit codes (sysexits.h)
pub mod exitcode {
    pub const OK: i32 = 0;
    /// Command line usage error
    pub const USAGE: i32 = 64;
    /// Input data was incorrect
    pub const DATAERR: i32 = 65;
    /// Cannot open input
    pub const NOINPUT: i32 = 66;
    /// Internal software error
    pub const SOFTWARE: i32 = 70;
    /// Input/output error
    pub const IOERR: i32 = 74;
    /// Configuration error
    pub const CONFIG: i32 = 78;
}

/// CLI errors are the top-level error type.
/// These are what get displayed to the user.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Infra(#[from] InfraError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Usage(String),
}

impl From<ApplicationError> for CliError {
    fn from(e: ApplicationError) -> Self {
        Self::Infra(InfraError::Application(e))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) | CliError::Usage(_) => exitcode::USAGE,
            CliError::Infra(e) => match e {
                InfraError::Io { .. } => exitcode::IOERR,
                InfraError::NotADirectory(_) => exitcode::NOINPUT,
                InfraError::Application(ApplicationError::Config { .. }) => exitcode::CONFIG,
                InfraError::Application(ApplicationError::Domain(_)) => exitcode::DATAERR,
                InfraError::Application(_) => exitcode::SOFTWARE,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;

    #[test]
    fn given_error_kinds_when_mapping_then_uses_sysexits_codes() {
        assert_eq!(CliError::Usage("x".into()).exit_code(), exitcode::USAGE);
        assert_eq!(
            CliError::from(InfraError::NotADirectory("f".into())).exit_code(),
            exitcode::NOINPUT
        );
        assert_eq!(
            CliError::from(InfraError::from(DomainError::InvalidPath(String::new()))).exit_code(),
            exitcode::DATAERR
        );
        assert_eq!(
            CliError::from(ApplicationError::Config { message: "bad".into() }).exit_code(),
            exitcode::CONFIG
        );
        assert_ne!(exitcode::OK, exitcode::SOFTWARE);
    }
}
