//! Registration Coordinator
//!
//! Makes sure every connected wallet has exactly one progress record.
//!
//! 1. Normalize the address (malformed input fails before any I/O)
//! 2. Consult the [`ExistenceCache`]
//! 3. On a miss, read the store under each derived key in order
//! 4. Found: normalize and return it (registration migrates legacy keys
//!    to the canonical key, never overwriting; lookups never write)
//! 5. Absent: write the default record once with `CreateIfAbsent`
//!
//! ## Single-flight
//!
//! Concurrent registrations for the same wallet share one in-flight future,
//! kept in a map keyed by address until it resolves. Only one creating
//! write is ever issued for a wallet, and every waiter sees the same result.
//! Store calls are bounded by the store's request timeout, so a hung call
//! cannot hold the slot forever.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLookup, ExistenceCache};
use crate::record::{derive_keys, KeyStrategy, ProgressRecord, WalletAddress};
use crate::services::normalizer::ScoreNormalizer;
use crate::store::{RecordStore, StoreError, WriteMode};
use crate::types::{Result, SyncError};

type RegistrationFuture = Shared<BoxFuture<'static, Result<ProgressRecord>>>;

/// Outcome of walking the lookup keys
#[derive(Debug)]
enum LookupOutcome {
    Found(ProgressRecord),
    /// `confirmed` is false when some key could not be read
    Absent { confirmed: bool },
}

/// Store-facing half of the coordinator, shared into in-flight futures
struct RecordLookup {
    store: Arc<dyn RecordStore>,
    cache: Arc<ExistenceCache>,
    strategies: Vec<KeyStrategy>,
    normalizer: ScoreNormalizer,
}

impl RecordLookup {
    async fn register(&self, raw: &str, address: &WalletAddress) -> Result<ProgressRecord> {
        let confirmed_absent = match self.cache.get(address) {
            CacheLookup::Hit(Some(record)) => return Ok(record),
            CacheLookup::Hit(None) => true,
            CacheLookup::Miss => match self.find(raw, address, true).await {
                LookupOutcome::Found(record) => return Ok(record),
                LookupOutcome::Absent { confirmed } => confirmed,
            },
        };

        debug!(address = %address, confirmed_absent, "No record found, creating default");
        self.create(address).await
    }

    async fn lookup(&self, raw: &str, address: &WalletAddress) -> Option<ProgressRecord> {
        match self.cache.get(address) {
            CacheLookup::Hit(record) => record,
            CacheLookup::Miss => match self.find(raw, address, false).await {
                LookupOutcome::Found(record) => Some(record),
                LookupOutcome::Absent { .. } => None,
            },
        }
    }

    /// Walk the derived keys. Legacy hits are copied to the canonical key
    /// only when `migrate` is set; otherwise they stay uncached so the next
    /// registration still migrates them.
    async fn find(&self, raw: &str, address: &WalletAddress, migrate: bool) -> LookupOutcome {
        let keys = derive_keys(raw, address, &self.strategies);
        let mut failures = 0usize;

        for key in &keys {
            match self.store.read(key).await {
                Ok(Some(document)) => {
                    let record = self.normalizer.normalize(&document, address);
                    if key != address.canonical_key() {
                        info!(address = %address, key = %key, "Found record under legacy key");
                        if !migrate {
                            return LookupOutcome::Found(record);
                        }
                        self.migrate(&record).await;
                    }
                    self.cache.set(address, Some(record.clone()));
                    return LookupOutcome::Found(record);
                }
                Ok(None) => {}
                Err(e) => {
                    let failure = SyncError::LookupFailure {
                        key: key.clone(),
                        reason: e.to_string(),
                    };
                    warn!(address = %address, error = %failure, "Lookup failed, trying next key");
                    failures += 1;
                }
            }
        }

        let confirmed = failures == 0;
        if confirmed {
            self.cache.set(address, None);
        } else {
            warn!(
                address = %address,
                failures,
                keys = keys.len(),
                "Lookup incomplete, treating as not found without caching"
            );
        }
        LookupOutcome::Absent { confirmed }
    }

    /// Copy a legacy-keyed record to the canonical key, never overwriting
    async fn migrate(&self, record: &ProgressRecord) {
        let document = match record.to_document() {
            Ok(document) => document,
            Err(e) => {
                warn!(address = %record.wallet_address, error = %e, "Could not serialize record for migration");
                return;
            }
        };
        match self
            .store
            .write(record.wallet_address.canonical_key(), &document, WriteMode::CreateIfAbsent)
            .await
        {
            Ok(()) => info!(address = %record.wallet_address, "Migrated record to canonical key"),
            Err(StoreError::Conflict(_)) => {
                debug!(address = %record.wallet_address, "Canonical record already exists")
            }
            Err(e) => warn!(address = %record.wallet_address, error = %e, "Record migration failed"),
        }
    }

    async fn create(&self, address: &WalletAddress) -> Result<ProgressRecord> {
        let key = address.canonical_key();
        let record = ProgressRecord::new(address.clone(), Utc::now());
        let document = record.to_document().map_err(|e| registration_failed(address, &e))?;

        match self.store.write(key, &document, WriteMode::CreateIfAbsent).await {
            Ok(()) => {
                info!(address = %address, "Registered new wallet");
                self.cache.set(address, Some(record.clone()));
                Ok(record)
            }
            Err(StoreError::Conflict(_)) => {
                // Created elsewhere since our lookup; the stored record wins
                debug!(address = %address, "Record appeared during registration, reading it back");
                match self.store.read(key).await {
                    Ok(Some(document)) => {
                        let existing = self.normalizer.normalize(&document, address);
                        self.cache.set(address, Some(existing.clone()));
                        Ok(existing)
                    }
                    Ok(None) => Err(SyncError::RegistrationFailed {
                        address: address.to_string(),
                        reason: "store reported a conflict but holds no record".to_string(),
                    }),
                    Err(e) => Err(registration_failed(address, &e)),
                }
            }
            Err(e) => {
                error!(address = %address, error = %e, "Bootstrap write failed");
                Err(registration_failed(address, &e))
            }
        }
    }
}

fn registration_failed(address: &WalletAddress, err: &StoreError) -> SyncError {
    SyncError::RegistrationFailed {
        address: address.to_string(),
        reason: err.to_string(),
    }
}

/// Creates wallet records at most once, deduplicating concurrent calls
pub struct RegistrationCoordinator {
    inner: Arc<RecordLookup>,
    in_flight: Arc<DashMap<WalletAddress, RegistrationFuture>>,
}

impl RegistrationCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<ExistenceCache>,
        strategies: Vec<KeyStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(RecordLookup {
                store,
                cache,
                strategies,
                normalizer: ScoreNormalizer::new(),
            }),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Coordinator using the default key lookup chain
    pub fn with_default_strategies(store: Arc<dyn RecordStore>, cache: Arc<ExistenceCache>) -> Self {
        Self::new(store, cache, KeyStrategy::default_chain())
    }

    /// Return the wallet's record, creating the default one if none exists
    pub async fn auto_register(&self, raw: &str) -> Result<ProgressRecord> {
        let address = WalletAddress::parse(raw)?;

        let registration = {
            let entry = self.in_flight.entry(address.clone()).or_insert_with(|| {
                let inner = Arc::clone(&self.inner);
                let raw = raw.trim().to_string();
                let address = address.clone();
                async move { inner.register(&raw, &address).await }
                    .boxed()
                    .shared()
            });
            entry.value().clone()
        };

        let result = registration.clone().await;
        self.in_flight
            .remove_if(&address, |_, in_flight| in_flight.ptr_eq(&registration));
        result
    }

    /// Existence check without creating anything
    pub async fn lookup(&self, raw: &str) -> Result<Option<ProgressRecord>> {
        let address = WalletAddress::parse(raw)?;
        Ok(self.inner.lookup(raw, &address).await)
    }

    /// Number of registrations currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn cache(&self) -> &Arc<ExistenceCache> {
        &self.inner.cache
    }
}
