//! Per-wallet sync context
//!
//! Created on connect and dropped on disconnect. Holds everything the
//! scheduler needs for one wallet: the last points known to be in the
//! store, the retry queue and the sync state.

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::record::{Points, WalletAddress};
use crate::services::{RetryQueue, SyncState};

pub struct WalletContext {
    address: WalletAddress,
    state: watch::Sender<SyncState>,
    last_remote: Mutex<Option<Points>>,
    queue: Mutex<RetryQueue>,
    /// Serializes saves and drains for this wallet
    save_lock: Mutex<()>,
    /// Serializes read-modify-write of the session mirror
    mirror_lock: Mutex<()>,
}

impl WalletContext {
    pub fn new(address: WalletAddress, queue_capacity: usize) -> Self {
        let (state, _) = watch::channel(SyncState::Registering);
        Self {
            address,
            state,
            last_remote: Mutex::new(None),
            queue: Mutex::new(RetryQueue::new(queue_capacity)),
            save_lock: Mutex::new(()),
            mirror_lock: Mutex::new(()),
        }
    }

    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == SyncState::Disconnected
    }

    /// Move to `next` unless the wallet has been disconnected
    pub fn transition(&self, next: SyncState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SyncState::Disconnected || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        !self.is_disconnected()
    }

    /// Terminal; later results for this context are ignored
    pub fn mark_disconnected(&self) {
        self.state.send_replace(SyncState::Disconnected);
    }

    pub async fn last_remote(&self) -> Option<Points> {
        self.last_remote.lock().await.clone()
    }

    pub async fn set_last_remote(&self, points: Points) {
        *self.last_remote.lock().await = Some(points);
    }

    pub async fn queue(&self) -> MutexGuard<'_, RetryQueue> {
        self.queue.lock().await
    }

    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub(crate) async fn lock_saves(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock().await
    }

    pub(crate) async fn lock_mirror(&self) -> MutexGuard<'_, ()> {
        self.mirror_lock.lock().await
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> WalletContext {
        WalletContext::new(
            WalletAddress::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap(),
            50,
        )
    }

    #[tokio::test]
    async fn test_transitions_until_disconnected() {
        let ctx = context();
        assert_eq!(ctx.state(), SyncState::Registering);

        assert!(ctx.transition(SyncState::Idle));
        assert!(ctx.transition(SyncState::Dirty));
        assert_eq!(ctx.state(), SyncState::Dirty);

        ctx.mark_disconnected();
        assert!(!ctx.transition(SyncState::Idle));
        assert_eq!(ctx.state(), SyncState::Disconnected);
    }

    #[tokio::test]
    async fn test_last_remote_starts_empty() {
        let ctx = context();
        assert!(ctx.last_remote().await.is_none());

        ctx.set_last_remote(Points::canonical()).await;
        assert_eq!(ctx.last_remote().await, Some(Points::canonical()));
        assert_eq!(ctx.queued().await, 0);
    }
}
