//! Existence cache for wallet records
//!
//! Memoizes "does this wallet have a record" lookups for a fixed TTL. A
//! confirmed absence is cached too, distinct from never having checked, so
//! a wallet that keeps reconnecting before its record exists does not walk
//! every lookup key against the store each time.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with a paused
//! clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::record::{ProgressRecord, WalletAddress};

/// Default time-to-live for cached lookups
pub const DEFAULT_EXISTENCE_TTL: Duration = Duration::from_secs(5 * 60);

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Never checked, or the entry expired
    Miss,
    /// Checked recently; `None` means confirmed absent
    Hit(Option<ProgressRecord>),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

struct ExistenceEntry {
    record: Option<ProgressRecord>,
    expires_at: Instant,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistenceCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub negative_hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub expirations: u64,
}

/// TTL cache of wallet → record-or-absent
pub struct ExistenceCache {
    entries: DashMap<WalletAddress, ExistenceEntry>,
    ttl: Duration,

    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    expirations: AtomicU64,
}

impl ExistenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_EXISTENCE_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a wallet. Expired entries are removed and reported as a miss.
    pub fn get(&self, address: &WalletAddress) -> CacheLookup {
        if let Some(entry) = self.entries.get(address) {
            if Instant::now() < entry.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if entry.record.is_none() {
                    self.negative_hits.fetch_add(1, Ordering::Relaxed);
                }
                debug!(address = %address, present = entry.record.is_some(), "Existence cache hit");
                return CacheLookup::Hit(entry.record.clone());
            }
            drop(entry);
            self.entries.remove(address);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(address = %address, "Existence cache miss");
        CacheLookup::Miss
    }

    /// Record a lookup outcome; `None` caches a confirmed absence
    pub fn set(&self, address: &WalletAddress, record: Option<ProgressRecord>) {
        let entry = ExistenceEntry {
            record,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(address.clone(), entry);
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget a wallet
    pub fn invalidate(&self, address: &WalletAddress) -> bool {
        self.entries.remove(address).is_some()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let purged = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ExistenceCacheStats {
        ExistenceCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for ExistenceCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn address() -> WalletAddress {
        WalletAddress::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_checked_is_a_miss() {
        let cache = ExistenceCache::with_defaults();
        assert_eq!(cache.get(&address()), CacheLookup::Miss);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_result_is_cached() {
        let cache = ExistenceCache::with_defaults();
        cache.set(&address(), None);

        assert_eq!(cache.get(&address()), CacheLookup::Hit(None));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.negative_hits, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_result_is_cached() {
        let cache = ExistenceCache::with_defaults();
        let record = ProgressRecord::new(address(), Utc::now());
        cache.set(&address(), Some(record.clone()));

        assert_eq!(cache.get(&address()), CacheLookup::Hit(Some(record)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ExistenceCache::new(Duration::from_secs(300));
        cache.set(&address(), None);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&address()).is_hit());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&address()), CacheLookup::Miss);
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_invalidate() {
        let cache = ExistenceCache::new(Duration::from_secs(60));
        let other = WalletAddress::parse("0x0000000000000000000000000000000000000001").unwrap();
        cache.set(&address(), None);
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.set(&other, None);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&other));
        assert!(!cache.invalidate(&other));
    }
}
