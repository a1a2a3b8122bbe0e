//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Push and pull cycles never propagate these past the loop boundary:
/// they are caught, logged, and reflected only in the reachability
/// flag.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Gateway-class failure (502/503/504 or network); flips the
        /// server-reachable flag.
        gateway: bool,
    },

    /// Protocol error (unusable message content).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Database error during sync.
    #[error("database error: {0}")]
    Core(#[from] docsync_core::CoreError),

    /// JSON encode/decode error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Conflict resolution failed.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// A pulled change targets a table no manager is attached to.
    #[error("no table attached for '{0}'")]
    MissingTable(String),
}

impl SyncError {
    /// Creates a gateway-class transport error.
    pub fn transport_gateway(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            gateway: true,
        }
    }

    /// Creates a non-gateway transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            gateway: false,
        }
    }

    /// Returns true for gateway-class transport failures.
    pub fn is_gateway(&self) -> bool {
        matches!(self, SyncError::Transport { gateway: true, .. })
    }
}
