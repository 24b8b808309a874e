//! Sync services
//!
//! - [`ScoreNormalizer`] - legacy/raw documents to canonical records
//! - [`ProgressMerger`] - conflict-free merge of two points snapshots
//! - [`RegistrationCoordinator`] - create-once registration with single-flight
//! - [`SyncScheduler`] - periodic autosave, draining a bounded [`RetryQueue`]

pub mod merger;
pub mod normalizer;
pub mod registration;
pub mod retry;
pub mod scheduler;

pub use merger::{merge_value, ProgressMerger};
pub use normalizer::ScoreNormalizer;
pub use registration::RegistrationCoordinator;
pub use retry::{
    RetryEntry, RetryPolicy, RetryQueue, DEFAULT_DRAIN_INTERVAL, DEFAULT_RETRY_CAPACITY,
    DEFAULT_STALENESS_HORIZON,
};
pub use scheduler::{DrainReport, SaveOutcome, SyncScheduler, SyncState, DEFAULT_AUTOSAVE_INTERVAL};
