//! Sync Scheduler
//!
//! Keeps the record store in step with each connected wallet's session
//! mirror.
//!
//! ## Timers (per wallet)
//!
//! - autosave (default 30s): merge the local snapshot into the store
//! - drain (default 60s): retry failed saves from the wallet's retry queue
//!
//! Both run in one spawned task per wallet and stop on [`SyncScheduler::stop`].
//! A save that is already running when a wallet disconnects is allowed to
//! finish, but its outcome is ignored.
//!
//! ## State machine
//!
//! ```text
//! Disconnected -> Registering -> Idle <-> Dirty
//!                                          | autosave ok   -> Idle
//!                                          | autosave fail -> Queued -> (drain ok) Idle
//! any -> Disconnected
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::WalletContext;
use crate::record::{Points, ProgressRecord, WalletAddress};
use crate::services::merger::ProgressMerger;
use crate::services::normalizer::ScoreNormalizer;
use crate::services::retry::RetryPolicy;
use crate::session::{self, SessionCache};
use crate::store::{RecordStore, StoreError, WriteMode};
use crate::types::{Result, SyncError};

/// Default interval between autosaves
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Sync state of one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Disconnected,
    Registering,
    /// Store and mirror agree
    Idle,
    /// Mirror holds progress the store has not seen
    Dirty,
    /// A save failed and is waiting in the retry queue
    Queued,
}

/// Result of one autosave
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing new to save
    Unchanged,
    /// Merged points written; `total` is the stored total
    Saved { total: u64 },
    /// Write failed, snapshot queued for retry
    Queued { reason: String },
    /// Wallet disconnected while saving; result discarded
    Ignored,
}

/// Result of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub dropped_stale: usize,
    pub remaining: usize,
    pub stopped_on_failure: bool,
}

struct TimerHandle {
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SyncScheduler {
    store: Arc<dyn RecordStore>,
    session: Arc<dyn SessionCache>,
    policy: RetryPolicy,
    autosave_interval: Duration,
    merger: ProgressMerger,
    normalizer: ScoreNormalizer,
    timers: DashMap<WalletAddress, TimerHandle>,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        session: Arc<dyn SessionCache>,
        policy: RetryPolicy,
        autosave_interval: Duration,
    ) -> Self {
        Self {
            store,
            session,
            policy,
            autosave_interval,
            merger: ProgressMerger::new(),
            normalizer: ScoreNormalizer::new(),
            timers: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn autosave_interval(&self) -> Duration {
        self.autosave_interval
    }

    /// Start the autosave and drain timers for a wallet
    pub fn start(self: &Arc<Self>, ctx: Arc<WalletContext>) {
        let address = ctx.address().clone();
        if self.is_running(&address) {
            warn!(address = %address, "Sync timers already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = mpsc::channel::<()>(1);
        let scheduler = Arc::clone(self);
        let autosave_every = self.autosave_interval;
        let drain_every = self.policy.drain_interval;

        info!(
            address = %address,
            autosave = ?autosave_every,
            drain = ?drain_every,
            "Starting sync timers"
        );

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut autosave = interval_at(start + autosave_every, autosave_every);
            autosave.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut drain = interval_at(start + drain_every, drain_every);
            drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(address = %ctx.address(), "Sync timers stopped");
                        break;
                    }
                    _ = autosave.tick() => {
                        if let Err(e) = scheduler.autosave(&ctx).await {
                            warn!(address = %ctx.address(), error = %e, "Autosave failed");
                        }
                    }
                    _ = drain.tick() => {
                        scheduler.drain(&ctx).await;
                    }
                }

                if ctx.is_disconnected() {
                    break;
                }
            }
        });

        self.timers.insert(address, TimerHandle { shutdown, task });
    }

    /// Cancel a wallet's timers. In-flight saves are not aborted.
    pub fn stop(&self, address: &WalletAddress) -> bool {
        match self.timers.remove(address) {
            Some((_, handle)) => {
                let _ = handle.shutdown.try_send(());
                info!(address = %address, "Stopping sync timers");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, address: &WalletAddress) -> bool {
        self.timers
            .get(address)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Stop every wallet's timers
    pub fn stop_all(&self) {
        let addresses: Vec<WalletAddress> = self.timers.iter().map(|e| e.key().clone()).collect();
        for address in addresses {
            self.stop(&address);
        }
    }

    // ========================================================================
    // Autosave
    // ========================================================================

    /// Merge the wallet's session snapshot into the store once
    pub async fn autosave(&self, ctx: &WalletContext) -> Result<SaveOutcome> {
        let _saving = ctx.lock_saves().await;
        if ctx.is_disconnected() {
            return Ok(SaveOutcome::Ignored);
        }
        let address = ctx.address();

        let Some(local) = session::load_points(self.session.as_ref(), address)? else {
            debug!(address = %address, "No local snapshot, nothing to save");
            return Ok(SaveOutcome::Unchanged);
        };

        let last_remote = ctx.last_remote().await;
        if last_remote.as_ref() == Some(&local) {
            if ctx.queued().await == 0 {
                ctx.transition(SyncState::Idle);
            }
            return Ok(SaveOutcome::Unchanged);
        }
        ctx.transition(SyncState::Dirty);

        match self.save(address, &local, last_remote.as_ref()).await {
            Ok(merged) => {
                if ctx.is_disconnected() {
                    debug!(address = %address, "Ignoring save result for disconnected wallet");
                    return Ok(SaveOutcome::Ignored);
                }
                let total = merged.total;
                self.commit(ctx, merged).await?;
                info!(address = %address, total, "Autosaved progress");
                Ok(SaveOutcome::Saved { total })
            }
            Err(e) => {
                if ctx.is_disconnected() {
                    return Ok(SaveOutcome::Ignored);
                }
                warn!(address = %address, error = %e, "Autosave write failed, queueing for retry");
                let evicted = ctx.queue().await.push(address.clone(), local, Instant::now());
                if let Some(evicted) = evicted {
                    warn!(
                        address = %address,
                        total = evicted.points.total,
                        "Retry queue full, evicted oldest snapshot"
                    );
                }
                ctx.transition(SyncState::Queued);
                Ok(SaveOutcome::Queued {
                    reason: e.to_string(),
                })
            }
        }
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Retry queued saves in FIFO order, stopping at the first failure
    pub async fn drain(&self, ctx: &WalletContext) -> DrainReport {
        let _saving = ctx.lock_saves().await;
        let address = ctx.address();
        let mut report = DrainReport::default();

        report.dropped_stale = ctx
            .queue()
            .await
            .drop_stale(self.policy.staleness_horizon, Instant::now());
        if report.dropped_stale > 0 {
            warn!(
                address = %address,
                dropped = report.dropped_stale,
                horizon = ?self.policy.staleness_horizon,
                "Discarded stale queued saves"
            );
        }

        loop {
            if ctx.is_disconnected() {
                break;
            }
            let Some(entry) = ctx.queue().await.front().cloned() else {
                break;
            };

            let last_remote = ctx.last_remote().await;
            match self.save(&entry.address, &entry.points, last_remote.as_ref()).await {
                Ok(merged) => {
                    if ctx.is_disconnected() {
                        break;
                    }
                    ctx.queue().await.complete(entry.seq);
                    if let Err(e) = self.commit(ctx, merged).await {
                        warn!(address = %address, error = %e, "Could not mirror retried save");
                    }
                    report.delivered += 1;
                }
                Err(e) => {
                    debug!(address = %address, error = %e, "Retry failed, ending drain pass");
                    report.stopped_on_failure = true;
                    break;
                }
            }
        }

        report.remaining = ctx.queued().await;
        if report.delivered > 0 {
            info!(
                address = %address,
                delivered = report.delivered,
                remaining = report.remaining,
                "Drained queued saves"
            );
        }
        if report.remaining == 0 && ctx.state() == SyncState::Queued {
            ctx.transition(SyncState::Idle);
        }
        report
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Read, merge and write one snapshot, returning the stored points
    async fn save(
        &self,
        address: &WalletAddress,
        local: &Points,
        last_remote: Option<&Points>,
    ) -> Result<Points> {
        let key = address.canonical_key();

        let (record, remote_points, mode) = match self.store.read(key).await {
            Ok(Some(document)) => {
                let record = self.normalizer.normalize(&document, address);
                let points = record.points.clone();
                (record, Some(points), WriteMode::UpdateExisting)
            }
            Ok(None) => (
                ProgressRecord::new(address.clone(), Utc::now()),
                last_remote.cloned(),
                WriteMode::CreateIfAbsent,
            ),
            // never overwrite a record that was not just read
            Err(e) => {
                debug!(address = %address, error = %e, "Remote read failed, skipping write");
                return Err(write_failure(address, &e));
            }
        };

        let merged = self.merger.merge(remote_points.as_ref(), Some(local));
        let mut record = record;
        record.set_points(merged, Utc::now());
        let document = record
            .to_document()
            .map_err(|e| write_failure(address, &e))?;

        match self.store.write(key, &document, mode).await {
            Ok(()) => Ok(record.points),
            Err(StoreError::Conflict(_)) if mode == WriteMode::UpdateExisting => {
                debug!(address = %address, "Record missing on update, creating it");
                self.store
                    .write(key, &document, WriteMode::CreateIfAbsent)
                    .await
                    .map_err(|e| write_failure(address, &e))?;
                Ok(record.points)
            }
            Err(e) => Err(write_failure(address, &e)),
        }
    }

    /// Adopt stored points as the last known remote and fold them into the mirror
    async fn commit(&self, ctx: &WalletContext, stored: Points) -> Result<()> {
        let address = ctx.address();
        {
            let _mirror = ctx.lock_mirror().await;
            let current = session::load_points(self.session.as_ref(), address)?;
            let mirrored = self.merger.merge(Some(&stored), current.as_ref());
            session::store_points(self.session.as_ref(), address, &mirrored)?;
        }
        ctx.set_last_remote(stored).await;

        if ctx.queued().await == 0 {
            ctx.transition(SyncState::Idle);
        } else {
            ctx.transition(SyncState::Queued);
        }
        Ok(())
    }
}

fn write_failure(address: &WalletAddress, err: &StoreError) -> SyncError {
    SyncError::SyncWriteFailure {
        address: address.to_string(),
        reason: err.to_string(),
    }
}
