use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ports::streamer::StreamError;

/// Error type for command execution against a backend
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CommandError {
    /// Transport level failure talking to the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend did not answer in time
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected our credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend answered with something we could not decode
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The underlying stream could not be opened
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl CommandError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            CommandError::Io(_) | CommandError::Timeout(_) => true,
            CommandError::Stream(e) => e.is_transient(),
            CommandError::Auth(_) | CommandError::Protocol(_) => false,
        }
    }
}

/// Result type alias for command execution
pub type CommandResult<T> = Result<T, CommandError>;

/// Commander sends one command to a backend and returns its text reply
#[async_trait]
pub trait Commander: Send + Sync + 'static {
    /// Execute `command` and return the full reply
    async fn execute(&self, command: &str) -> CommandResult<String>;
}
