//! In-memory record store
//!
//! Process-local backend for development and tests. Supports switching the
//! store "offline" and injecting per-call latency so that unreliable-store
//! behaviour can be exercised deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{RecordStore, StoreError, WriteMode};

/// Simple in-memory document store
pub struct InMemoryRecordStore {
    documents: Arc<RwLock<HashMap<String, Value>>>,
    available: AtomicBool,
    latency: Option<Duration>,

    reads: AtomicU64,
    write_attempts: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
            latency: None,
            reads: AtomicU64::new(0),
            write_attempts: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        }
    }

    /// Delay every call by `latency` (uses tokio time, so paused clocks apply)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Toggle availability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Seed a document directly, bypassing counters and preconditions
    pub async fn insert(&self, key: &str, document: Value) {
        self.documents.write().await.insert(key.to_string(), document);
    }

    /// Inspect a stored document without counting a read
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.documents.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Read calls attempted, including failed ones
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write calls attempted, including failed ones
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::Relaxed)
    }

    /// Successful `CreateIfAbsent` writes
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    /// Successful `UpdateExisting` writes
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    async fn simulate_call(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.simulate_call().await?;
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, document: &Value, mode: WriteMode) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::Relaxed);
        self.simulate_call().await?;

        let mut documents = self.documents.write().await;
        let exists = documents.contains_key(key);
        match (mode, exists) {
            (WriteMode::CreateIfAbsent, true) | (WriteMode::UpdateExisting, false) => {
                debug!(key = key, mode = ?mode, "In-memory write precondition failed");
                return Err(StoreError::Conflict(key.to_string()));
            }
            (WriteMode::CreateIfAbsent, false) => {
                self.creates.fetch_add(1, Ordering::Relaxed);
            }
            (WriteMode::UpdateExisting, true) => {
                self.updates.fetch_add(1, Ordering::Relaxed);
            }
        }
        documents.insert(key.to_string(), document.clone());
        Ok(())
    }
}
