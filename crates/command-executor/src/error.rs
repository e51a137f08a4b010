//! Error types for command execution

use std::time::Duration;
use thiserror::Error;

/// Unified error type for command execution
///
/// These are channel-level failures: the command could not be run or did not
/// finish. A command that ran and exited non-zero is not an error here; callers
/// inspect [`crate::ExitResult`] for that.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Command did not complete within its operation timeout
    #[error("command `{command}` timed out after {timeout:?}")]
    TimedOut {
        /// The command line that timed out
        command: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// SSH connection failed
    #[error("SSH connection failed to {host}: {reason}")]
    SshConnectionFailed {
        /// The hostname or IP address that failed to connect
        host: String,
        /// The detailed reason for the connection failure
        reason: String,
    },

    /// SSH key not found
    #[error("SSH key not found: {path}")]
    SshKeyNotFound {
        /// The path where the SSH key was expected to be found
        path: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Add layer context to an error message
    pub fn with_layer_context(self, layer: impl Into<String>) -> Self {
        match self {
            Error::SpawnFailed { reason } => Error::SpawnFailed {
                reason: format!("in {} layer: {}", layer.into(), reason),
            },
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
