//! CLI error type.

use std::fmt;

use locsession::config::ConfigError;
use locsession::logging::LoggingError;
use locsession::{ClientError, LocationResponse};

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    Config(String),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// The client refused an operation.
    Client(ClientError),
    /// The engine answered an operation with a failure.
    Engine {
        operation: &'static str,
        response: LocationResponse,
    },
    /// Nothing came back in time.
    Timeout(&'static str),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging error: {}", e),
            CliError::Client(e) => write!(f, "Client error: {}", e),
            CliError::Engine {
                operation,
                response,
            } => write!(f, "{} failed: {}", operation, response),
            CliError::Timeout(what) => write!(f, "Timed out waiting for {}", what),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<ClientError> for CliError {
    fn from(e: ClientError) -> Self {
        CliError::Client(e)
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Logging(_) => 2,
            _ => 1,
        }
    }
}
