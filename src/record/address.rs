//! Wallet address normalization and store key derivation
//!
//! Every lookup and write goes through [`WalletAddress::parse`]. Hex
//! addresses (`0x` + 40 hex digits, marker optional) are lowercased; other
//! alphanumeric address formats keep their case.
//!
//! Older clients stored records under a handful of key variants, so reads
//! walk an ordered list of [`KeyStrategy`] values until one finds a
//! document. Writes always use the canonical key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::SyncError;

const HEX_MARKER: &str = "0x";
const HEX_BODY_LEN: usize = 40;
const MAX_ADDRESS_LEN: usize = 128;

/// Legacy key prefixes tried when no explicit list is configured
pub const DEFAULT_LEGACY_PREFIXES: &[&str] = &["user_", "wallet_"];

fn strip_hex_marker(s: &str) -> Option<&str> {
    s.strip_prefix(HEX_MARKER).or_else(|| s.strip_prefix("0X"))
}

fn is_hex_body(s: &str) -> bool {
    s.len() == HEX_BODY_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Canonical wallet address, the primary key of a progress record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Validate and normalize a raw address. Performs no I/O.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidAddress("empty address".to_string()));
        }
        if trimmed.len() > MAX_ADDRESS_LEN {
            return Err(SyncError::InvalidAddress(format!(
                "address longer than {MAX_ADDRESS_LEN} characters"
            )));
        }

        if let Some(body) = strip_hex_marker(trimmed) {
            if !is_hex_body(body) {
                return Err(SyncError::InvalidAddress(format!(
                    "{trimmed}: expected 0x followed by {HEX_BODY_LEN} hex digits"
                )));
            }
            return Ok(Self(format!("{HEX_MARKER}{}", body.to_ascii_lowercase())));
        }

        if is_hex_body(trimmed) {
            return Ok(Self(format!("{HEX_MARKER}{}", trimmed.to_ascii_lowercase())));
        }

        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SyncError::InvalidAddress(format!(
                "{trimmed}: unexpected characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a hex (EVM-style) address
    pub fn is_hex(&self) -> bool {
        self.0.starts_with(HEX_MARKER)
    }

    /// Key under which writes for this wallet land
    pub fn canonical_key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for WalletAddress {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

// ============================================================================
// Key Derivation
// ============================================================================

/// One way of turning an address into a store key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The address exactly as the caller supplied it (trimmed)
    AsIs,
    Lowercase,
    /// Hex body uppercased, `0x` marker kept
    Uppercase,
    /// Canonical address behind a legacy name prefix
    LegacyPrefix(String),
    /// Canonical address without its leading `0x`
    StripMarker,
}

impl KeyStrategy {
    /// Derive a key, or `None` when the strategy does not apply
    pub fn derive(&self, raw: &str, address: &WalletAddress) -> Option<String> {
        let raw = raw.trim();
        match self {
            Self::AsIs => Some(raw.to_string()),
            Self::Lowercase => Some(raw.to_lowercase()),
            Self::Uppercase => Some(match strip_hex_marker(raw) {
                Some(body) => format!("{HEX_MARKER}{}", body.to_uppercase()),
                None => raw.to_uppercase(),
            }),
            Self::LegacyPrefix(prefix) => Some(format!("{prefix}{address}")),
            Self::StripMarker => strip_hex_marker(address.as_str()).map(str::to_string),
        }
    }

    /// The standard lookup order with the given legacy prefixes
    pub fn lookup_chain<S: AsRef<str>>(legacy_prefixes: &[S]) -> Vec<KeyStrategy> {
        let mut chain = vec![Self::AsIs, Self::Lowercase, Self::Uppercase];
        chain.extend(
            legacy_prefixes
                .iter()
                .map(|p| Self::LegacyPrefix(p.as_ref().to_string())),
        );
        chain.push(Self::StripMarker);
        chain
    }

    /// Lookup order with [`DEFAULT_LEGACY_PREFIXES`]
    pub fn default_chain() -> Vec<KeyStrategy> {
        Self::lookup_chain(DEFAULT_LEGACY_PREFIXES)
    }
}

/// Ordered, de-duplicated keys to try for `raw`
pub fn derive_keys(raw: &str, address: &WalletAddress, strategies: &[KeyStrategy]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(strategies.len());
    for key in strategies.iter().filter_map(|s| s.derive(raw, address)) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}
