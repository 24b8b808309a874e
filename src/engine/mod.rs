//! Progress sync engine
//!
//! [`ProgressSync`] is the single entry point the application talks to. It
//! owns the registration coordinator and the scheduler, and one
//! [`WalletContext`] per connected wallet.
//!
//! ## Connect
//!
//! 1. Register the wallet (existing record, or a new default one)
//! 2. Merge any local snapshot left from an earlier session into it
//! 3. Mirror the result locally, writing it back if it adds progress
//! 4. Start the wallet's autosave and drain timers

pub mod context;

pub use context::WalletContext;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::cache::ExistenceCache;
use crate::config::SyncConfig;
use crate::record::{KeyStrategy, PointEvent, Points, ProgressRecord, WalletAddress};
use crate::services::{
    ProgressMerger, RegistrationCoordinator, SaveOutcome, SyncScheduler, SyncState,
};
use crate::session::{self, SessionCache};
use crate::store::{RecordStore, TimedStore};
use crate::types::{Result, SyncError};

pub struct ProgressSync {
    registration: RegistrationCoordinator,
    scheduler: Arc<SyncScheduler>,
    session: Arc<dyn SessionCache>,
    merger: ProgressMerger,
    contexts: DashMap<WalletAddress, Arc<WalletContext>>,
    config: SyncConfig,
}

impl ProgressSync {
    /// Build an engine over `store`; every store call is bounded by the
    /// configured request timeout
    pub fn new(config: SyncConfig, store: Arc<dyn RecordStore>, session: Arc<dyn SessionCache>) -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(TimedStore::new(store, config.request_timeout));
        let cache = Arc::new(ExistenceCache::new(config.existence_ttl));
        let strategies = KeyStrategy::lookup_chain(config.legacy_prefixes.as_slice());

        Self {
            registration: RegistrationCoordinator::new(Arc::clone(&store), cache, strategies),
            scheduler: Arc::new(SyncScheduler::new(
                store,
                Arc::clone(&session),
                config.retry,
                config.autosave_interval,
            )),
            session,
            merger: ProgressMerger::new(),
            contexts: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registration(&self) -> &RegistrationCoordinator {
        &self.registration
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    /// Connect a wallet. Reconnecting returns the live context.
    pub async fn connect(&self, raw: &str) -> Result<Arc<WalletContext>> {
        let address = WalletAddress::parse(raw)?;

        let ctx = match self.contexts.entry(address.clone()) {
            Entry::Occupied(existing) => {
                debug!(address = %address, "Wallet already connected");
                return Ok(Arc::clone(existing.get()));
            }
            Entry::Vacant(slot) => {
                let ctx = Arc::new(WalletContext::new(address.clone(), self.config.retry.capacity));
                slot.insert(Arc::clone(&ctx));
                ctx
            }
        };

        let registered = match self.registration.auto_register(raw).await {
            Ok(record) => self.reconcile(&ctx, record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = registered {
            warn!(address = %address, error = %e, "Connect failed");
            ctx.mark_disconnected();
            self.contexts.remove_if(&address, |_, c| Arc::ptr_eq(c, &ctx));
            return Err(e);
        }

        self.scheduler.start(Arc::clone(&ctx));
        info!(address = %address, state = ?ctx.state(), "Wallet connected");
        Ok(ctx)
    }

    /// Merge a leftover local snapshot with the registered record
    async fn reconcile(&self, ctx: &Arc<WalletContext>, record: ProgressRecord) -> Result<()> {
        let address = ctx.address();
        let remote = record.points;
        ctx.set_last_remote(remote.clone()).await;

        let local = {
            let _mirror = ctx.lock_mirror().await;
            let local = match session::load_points(self.session.as_ref(), address) {
                Ok(local) => local,
                Err(e) => {
                    warn!(address = %address, error = %e, "Unreadable local snapshot, starting from stored record");
                    None
                }
            };
            let mirrored = self.merger.merge(Some(&remote), local.as_ref());
            session::store_points(self.session.as_ref(), address, &mirrored)?;
            local.map(|_| mirrored)
        };

        match local {
            Some(merged) if merged != remote => {
                info!(
                    address = %address,
                    stored_total = remote.total,
                    merged_total = merged.total,
                    "Local progress found on connect, writing back"
                );
                ctx.transition(SyncState::Dirty);
                self.scheduler.autosave(ctx).await?;
            }
            _ => {
                ctx.transition(SyncState::Idle);
            }
        }
        Ok(())
    }

    /// Apply a point-earning event to the wallet's local mirror
    pub async fn record_event(&self, raw: &str, event: PointEvent) -> Result<Points> {
        let ctx = self.context(raw)?;
        let address = ctx.address();

        let points = {
            let _mirror = ctx.lock_mirror().await;
            let mut points = session::load_points(self.session.as_ref(), address)?
                .unwrap_or_else(Points::canonical);
            points.apply(&event);
            session::store_points(self.session.as_ref(), address, &points)?;
            points
        };

        if ctx.state() != SyncState::Queued {
            ctx.transition(SyncState::Dirty);
        }
        debug!(address = %address, ?event, total = points.total, "Recorded point event");
        Ok(points)
    }

    /// Run one autosave for the wallet now
    pub async fn sync_now(&self, raw: &str) -> Result<SaveOutcome> {
        let ctx = self.context(raw)?;
        self.scheduler.autosave(&ctx).await
    }

    /// Current local points for the wallet
    pub async fn snapshot(&self, raw: &str) -> Result<Points> {
        let ctx = self.context(raw)?;
        let _mirror = ctx.lock_mirror().await;
        Ok(session::load_points(self.session.as_ref(), ctx.address())?.unwrap_or_else(Points::canonical))
    }

    /// Tear down a wallet: stop timers, clear the mirror, drop the context
    pub async fn disconnect(&self, raw: &str) -> Result<()> {
        let address = WalletAddress::parse(raw)?;
        let Some((_, ctx)) = self.contexts.remove(&address) else {
            return Err(SyncError::NotConnected(address.to_string()));
        };

        ctx.mark_disconnected();
        self.scheduler.stop(&address);
        ctx.queue().await.clear();
        // the cached record predates this session's saves
        self.registration.cache().invalidate(&address);
        {
            let _mirror = ctx.lock_mirror().await;
            session::clear_points(self.session.as_ref(), &address)?;
        }
        info!(address = %address, "Wallet disconnected");
        Ok(())
    }

    /// Disconnect every wallet
    pub async fn shutdown(&self) {
        let addresses: Vec<String> = self.contexts.iter().map(|e| e.key().to_string()).collect();
        for address in addresses {
            if let Err(e) = self.disconnect(&address).await {
                warn!(address = %address, error = %e, "Disconnect during shutdown failed");
            }
        }
    }

    /// Live context for a connected wallet
    pub fn context(&self, raw: &str) -> Result<Arc<WalletContext>> {
        let address = WalletAddress::parse(raw)?;
        self.contexts
            .get(&address)
            .map(|ctx| Arc::clone(ctx.value()))
            .ok_or_else(|| SyncError::NotConnected(address.to_string()))
    }

    pub fn connected(&self) -> usize {
        self.contexts.len()
    }
}
