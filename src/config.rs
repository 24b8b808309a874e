//! Configuration for progress-sync
//!
//! CLI arguments and environment variable handling using clap. The library
//! itself only sees [`SyncConfig`]; [`Args`] is the binary's view of it.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::cache::DEFAULT_EXISTENCE_TTL;
use crate::record::DEFAULT_LEGACY_PREFIXES;
use crate::services::{RetryPolicy, DEFAULT_AUTOSAVE_INTERVAL};
use crate::store::http::HttpStoreConfig;

/// Default bound on every record store call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// progress-sync - wallet progress bootstrap, merge and autosave
#[derive(Parser, Debug, Clone)]
#[command(name = "progress-sync")]
#[command(about = "Sync wallet learning progress with a JSON record store")]
pub struct Args {
    /// Record store base URL
    #[arg(long, env = "RECORD_STORE_URL", default_value = "http://localhost:8787")]
    pub store_url: String,

    /// API key sent to the record store as a bearer token
    #[arg(long, env = "STORE_API_KEY")]
    pub store_api_key: Option<String>,

    /// Timeout for each record store request, in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Seconds between autosaves
    #[arg(long, env = "AUTOSAVE_INTERVAL_SECS", default_value = "30")]
    pub autosave_interval_secs: u64,

    /// Seconds between retry queue drains
    #[arg(long, env = "RETRY_INTERVAL_SECS", default_value = "60")]
    pub retry_interval_secs: u64,

    /// Queued saves older than this many seconds are discarded
    #[arg(long, env = "STALENESS_HORIZON_SECS", default_value = "300")]
    pub staleness_horizon_secs: u64,

    /// Maximum queued saves per wallet
    #[arg(long, env = "RETRY_QUEUE_CAPACITY", default_value = "50")]
    pub retry_queue_capacity: usize,

    /// Seconds an existence lookup stays cached
    #[arg(long, env = "EXISTENCE_TTL_SECS", default_value = "300")]
    pub existence_ttl_secs: u64,

    /// Comma-separated key prefixes used by older clients
    #[arg(long, env = "LEGACY_PREFIXES", default_value = "user_,wallet_", value_delimiter = ',')]
    pub legacy_prefixes: Vec<String>,

    /// Directory for the file-backed session mirror
    #[arg(long, env = "SESSION_DIR", default_value = ".progress-sync")]
    pub session_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Register a wallet (creating its record if needed) and print it
    Register { address: String },
    /// Check whether a wallet has a record, without creating one
    Lookup { address: String },
    /// Merge two points documents offline and print the result
    Merge { remote: PathBuf, local: PathBuf },
    /// Connect a wallet and keep it synced until Ctrl-C
    Watch { address: String },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.store_url.starts_with("http://") || self.store_url.starts_with("https://")) {
            return Err("RECORD_STORE_URL must be an http(s) URL".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.autosave_interval_secs == 0 || self.retry_interval_secs == 0 {
            return Err("AUTOSAVE_INTERVAL_SECS and RETRY_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.retry_queue_capacity == 0 {
            return Err("RETRY_QUEUE_CAPACITY must be at least 1".to_string());
        }

        if self.legacy_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err("LEGACY_PREFIXES must not contain empty entries".to_string());
        }

        Ok(())
    }

    pub fn store_config(&self) -> HttpStoreConfig {
        HttpStoreConfig {
            base_url: self.store_url.clone(),
            api_key: self.store_api_key.clone(),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::from(self)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub request_timeout: Duration,
    pub autosave_interval: Duration,
    pub retry: RetryPolicy,
    pub existence_ttl: Duration,
    pub legacy_prefixes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            retry: RetryPolicy::default(),
            existence_ttl: DEFAULT_EXISTENCE_TTL,
            legacy_prefixes: DEFAULT_LEGACY_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl From<&Args> for SyncConfig {
    fn from(args: &Args) -> Self {
        Self {
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            autosave_interval: Duration::from_secs(args.autosave_interval_secs),
            retry: RetryPolicy {
                capacity: args.retry_queue_capacity,
                staleness_horizon: Duration::from_secs(args.staleness_horizon_secs),
                drain_interval: Duration::from_secs(args.retry_interval_secs),
            },
            existence_ttl: Duration::from_secs(args.existence_ttl_secs),
            legacy_prefixes: args
                .legacy_prefixes
                .iter()
                .map(|p| p.trim().to_string())
                .collect(),
        }
    }
}
