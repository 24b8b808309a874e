//! Record store - keyed JSON documents, one per wallet
//!
//! The backing store is opaque: no locking, no transactions, eventually
//! consistent. The engine only relies on two calls:
//!
//! - `read(key)` - the document, or `None` when the key is absent
//! - `write(key, document, mode)` - with a create-if-absent / update-existing
//!   precondition reported back as [`StoreError::Conflict`]
//!
//! Backends:
//!
//! - [`HttpRecordStore`] - REST document store over reqwest
//! - [`InMemoryRecordStore`] - process-local, with fault injection
//! - [`TimedStore`] - decorator bounding every call with a request timeout

pub mod http;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub use http::HttpRecordStore;
pub use memory::InMemoryRecordStore;

// ============================================================================
// Errors
// ============================================================================

/// Error types for record store operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Write precondition failed (record exists on create, missing on update)
    #[error("Write conflict on key: {0}")]
    Conflict(String),

    /// Call did not complete within the request timeout
    #[error("Store request timed out after {0:?}")]
    Timeout(Duration),

    /// Store unreachable or returned a server error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store answered with something that is not a JSON document
    #[error("Malformed document: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Conflicts and malformed documents will not fix themselves on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Precondition for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `Conflict` if the key already holds a document
    CreateIfAbsent,
    /// Fail with `Conflict` if the key holds no document
    UpdateExisting,
}

/// Trait for the keyed JSON document store (allows mocking in tests)
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the document stored under `key`
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `document` under `key`, honouring `mode`
    async fn write(&self, key: &str, document: &Value, mode: WriteMode) -> Result<(), StoreError>;
}

// ============================================================================
// Timeout Decorator
// ============================================================================

/// Bounds every call on the wrapped store with a fixed timeout.
///
/// The single-flight registration slot is held for the duration of a store
/// call, so no call may be allowed to hang forever.
pub struct TimedStore {
    inner: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl RecordStore for TimedStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match tokio::time::timeout(self.timeout, self.inner.read(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = key, timeout = ?self.timeout, "Record store read timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }

    async fn write(&self, key: &str, document: &Value, mode: WriteMode) -> Result<(), StoreError> {
        match tokio::time::timeout(self.timeout, self.inner.write(key, document, mode)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = key, mode = ?mode, timeout = ?self.timeout, "Record store write timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}
