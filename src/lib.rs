//! progress-sync - wallet-keyed learning progress sync
//!
//! Reconciles a device-local snapshot of a user's learning points with the
//! per-wallet record held in a remote JSON document store:
//!
//! - new wallets are registered exactly once, even under concurrent connects
//! - conflicting snapshots merge without losing earned progress (merge-max)
//! - autosave runs on a timer, with a bounded retry queue for failed writes
//! - records written by older clients are normalized on read
//!
//! ## Layout
//!
//! - `store` - [`RecordStore`] trait, HTTP and in-memory backends, timeouts
//! - `session` - [`SessionCache`] local mirror (in-memory or file-backed)
//! - `record` - canonical record schema and wallet address keys
//! - `cache` - existence cache with negative entries
//! - `services` - normalizer, merger, registration and scheduler
//! - `engine` - [`ProgressSync`], one context per connected wallet

pub mod cache;
pub mod config;
pub mod engine;
pub mod logging;
pub mod record;
pub mod services;
pub mod session;
pub mod store;
pub mod types;

pub use cache::{CacheLookup, ExistenceCache};
pub use config::{Args, SyncConfig};
pub use engine::{ProgressSync, WalletContext};
pub use record::{Achievement, PointEvent, Points, ProgressRecord, WalletAddress};
pub use services::{
    ProgressMerger, RegistrationCoordinator, RetryPolicy, SaveOutcome, ScoreNormalizer,
    SyncScheduler, SyncState,
};
pub use session::{FileSessionCache, InMemorySessionCache, SessionCache};
pub use store::{HttpRecordStore, InMemoryRecordStore, RecordStore, StoreError, TimedStore, WriteMode};
pub use types::{Result, SyncError};
