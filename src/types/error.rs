//! Error types for the progress sync engine

use crate::store::StoreError;

/// Main error type for progress sync operations
///
/// Cloneable so a single in-flight registration can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Malformed wallet address, rejected before any I/O
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    /// Transient read failure for one derived key
    #[error("Lookup failed for key {key}: {reason}")]
    LookupFailure { key: String, reason: String },

    /// The bootstrap write for a new wallet did not land
    #[error("Registration failed for {address}: {reason}")]
    RegistrationFailed { address: String, reason: String },

    /// An autosave or retry write did not land
    #[error("Sync write failed for {address}: {reason}")]
    SyncWriteFailure { address: String, reason: String },

    /// Operation on a wallet that has no live context
    #[error("Wallet not connected: {0}")]
    NotConnected(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session cache error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether retrying the same operation later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LookupFailure { .. } | Self::SyncWriteFailure { .. } => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Session(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Session(err.to_string())
    }
}

/// Result type alias for progress sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
