//! Local session mirror
//!
//! The device-local copy of a wallet's points, written on every
//! point-earning event and read by autosave. Values are plain strings under
//! `progress_points:{address}`; the helpers here handle the JSON.

pub mod file;
pub mod memory;

pub use file::FileSessionCache;
pub use memory::InMemorySessionCache;

use serde_json::Value;

use crate::record::{Points, WalletAddress};
use crate::services::ScoreNormalizer;
use crate::types::Result;

/// Key prefix of the points mirror
pub const SESSION_KEY_PREFIX: &str = "progress_points:";

/// Synchronous string key-value store local to the device
pub trait SessionCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: String) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Session key of a wallet's points mirror
pub fn session_key(address: &WalletAddress) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, address)
}

/// Read and normalize the mirrored points for a wallet
pub fn load_points(cache: &dyn SessionCache, address: &WalletAddress) -> Result<Option<Points>> {
    let Some(raw) = cache.get(&session_key(address))? else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(&raw)?;
    Ok(Some(ScoreNormalizer::new().normalize_points(&value)))
}

/// Mirror a wallet's points
pub fn store_points(cache: &dyn SessionCache, address: &WalletAddress, points: &Points) -> Result<()> {
    let raw = serde_json::to_string(points)?;
    cache.set(&session_key(address), raw)
}

/// Drop a wallet's mirror
pub fn clear_points(cache: &dyn SessionCache, address: &WalletAddress) -> Result<()> {
    cache.remove(&session_key(address))
}
