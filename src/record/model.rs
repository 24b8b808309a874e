//! Canonical progress record schema
//!
//! ```text
//! { walletAddress, createdAt, lastUpdated,
//!   points: { gamingHub: {<category>: n, ...},
//!             storyMode: {<chapter>: n, ..., totalScore: n},
//!             achievements: {<name>: bool | n, ...},
//!             total: n },
//!   progress: { completedNodes: [], currentQuest, level, xp } }
//! ```
//!
//! `storyMode.totalScore`, `points.total` and the whole `progress` block are
//! derived. They are recomputed from the leaves whenever the leaves change
//! and are never trusted as stored. Unknown fields at every object level are
//! carried along in `extra` so newer writers do not lose data to older ones.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::address::WalletAddress;
use crate::store::StoreError;

/// Leaf scores keyed by category or chapter name
pub type ScoreMap = BTreeMap<String, u64>;

/// Gaming hub categories present on every new record
pub const GAMING_HUB_CATEGORIES: &[&str] = &[
    "blockchainBasics",
    "smartContracts",
    "defiProtocols",
    "nftMarketplace",
    "cryptoTrading",
    "web3Security",
];

/// Story mode chapters present on every new record
pub const STORY_CHAPTERS: &[&str] = &["chapter1", "chapter2", "chapter3", "chapter4", "chapter5"];

/// Boolean achievements present on every new record
pub const ACHIEVEMENT_FLAGS: &[&str] = &["firstSteps", "storyComplete", "gamingMaster", "tokenCreator"];

/// Counter achievements present on every new record
pub const ACHIEVEMENT_COUNTERS: &[&str] = &["dailyStreak"];

/// Learning path nodes and the total needed to complete each one
pub const QUEST_PATH: &[(&str, u64)] = &[
    ("genesis", 0),
    ("wallet-setup", 10),
    ("first-transaction", 25),
    ("smart-contracts", 50),
    ("defi-explorer", 100),
    ("nft-creator", 200),
    ("dao-member", 400),
    ("web3-master", 800),
];

// ============================================================================
// Achievements
// ============================================================================

/// An achievement is either unlocked-or-not, or a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Achievement {
    Flag(bool),
    Count(u64),
}

impl Achievement {
    /// Merge-max rule: OR for flags, max for counters.
    ///
    /// A flag meeting a counter resolves to a counter, `true` counting as 1.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Flag(a), Self::Flag(b)) => Self::Flag(a || b),
            (Self::Count(a), Self::Count(b)) => Self::Count(a.max(b)),
            (Self::Flag(f), Self::Count(c)) | (Self::Count(c), Self::Flag(f)) => {
                Self::Count(c.max(u64::from(f)))
            }
        }
    }

    pub fn is_earned(&self) -> bool {
        match self {
            Self::Flag(f) => *f,
            Self::Count(c) => *c > 0,
        }
    }
}

// ============================================================================
// Points
// ============================================================================

/// Story mode chapter scores plus their derived total
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMode {
    #[serde(flatten)]
    pub chapters: ScoreMap,
    #[serde(default)]
    pub total_score: u64,
}

impl StoryMode {
    pub fn chapter_sum(&self) -> u64 {
        self.chapters.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

/// All point leaves for one wallet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Points {
    #[serde(default)]
    pub gaming_hub: ScoreMap,
    #[serde(default)]
    pub story_mode: StoryMode,
    #[serde(default)]
    pub achievements: BTreeMap<String, Achievement>,
    #[serde(default)]
    pub total: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Points {
    /// Every expected leaf at zero/false, totals zero
    pub fn canonical() -> Self {
        let mut points = Self::default();
        points.fill_missing_leaves();
        points
    }

    /// Add any expected leaf that is missing, at its zero/false default
    pub fn fill_missing_leaves(&mut self) {
        for category in GAMING_HUB_CATEGORIES {
            self.gaming_hub.entry(category.to_string()).or_insert(0);
        }
        for chapter in STORY_CHAPTERS {
            self.story_mode.chapters.entry(chapter.to_string()).or_insert(0);
        }
        for name in ACHIEVEMENT_FLAGS {
            self.achievements
                .entry(name.to_string())
                .or_insert(Achievement::Flag(false));
        }
        for name in ACHIEVEMENT_COUNTERS {
            self.achievements
                .entry(name.to_string())
                .or_insert(Achievement::Count(0));
        }
    }

    /// Sum of the leaf categories that make up `total`
    pub fn leaf_total(&self) -> u64 {
        let hub = self
            .gaming_hub
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(*v));
        hub.saturating_add(self.story_mode.chapter_sum())
    }

    /// Recompute `storyMode.totalScore` and `total` from the leaves
    pub fn recompute_totals(&mut self) {
        self.story_mode.total_score = self.story_mode.chapter_sum();
        self.total = self.leaf_total();
    }

    /// Whether the stored totals match the leaves
    pub fn totals_consistent(&self) -> bool {
        self.story_mode.total_score == self.story_mode.chapter_sum() && self.total == self.leaf_total()
    }

    /// Apply a point-earning session event. Leaves only ever go up.
    pub fn apply(&mut self, event: &PointEvent) {
        match event {
            PointEvent::GamingHub { category, points } => {
                let leaf = self.gaming_hub.entry(category.clone()).or_insert(0);
                *leaf = leaf.saturating_add(*points);
            }
            PointEvent::StoryChapter { chapter, score } => {
                let leaf = self.story_mode.chapters.entry(chapter.clone()).or_insert(0);
                *leaf = (*leaf).max(*score);
            }
            PointEvent::Unlock { name } => {
                let current = self
                    .achievements
                    .get(name)
                    .copied()
                    .unwrap_or(Achievement::Flag(false));
                self.achievements
                    .insert(name.clone(), current.merge(Achievement::Flag(true)));
            }
            PointEvent::Increment { name, by } => {
                let next = match self.achievements.get(name) {
                    Some(Achievement::Count(c)) => c.saturating_add(*by),
                    Some(Achievement::Flag(f)) => u64::from(*f).saturating_add(*by),
                    None => *by,
                };
                self.achievements.insert(name.clone(), Achievement::Count(next));
            }
        }
        self.recompute_totals();
    }
}

/// Point-earning event raised by a learning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PointEvent {
    /// Add points to a gaming hub category
    GamingHub { category: String, points: u64 },
    /// Raise a story chapter score to at least `score`
    StoryChapter { chapter: String, score: u64 },
    /// Unlock a boolean achievement
    Unlock { name: String },
    /// Bump a counter achievement
    Increment { name: String, by: u64 },
}

// ============================================================================
// Progress
// ============================================================================

/// Learning path position, derived from `points.total`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub current_quest: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub xp: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Progress {
    pub fn derive(total: u64) -> Self {
        let mut progress = Self {
            completed_nodes: Vec::new(),
            current_quest: String::new(),
            level: 0,
            xp: 0,
            extra: Map::new(),
        };
        progress.refresh(total);
        progress
    }

    /// Recompute the derived fields, keeping `extra`
    pub fn refresh(&mut self, total: u64) {
        self.completed_nodes = QUEST_PATH
            .iter()
            .filter(|(_, threshold)| *threshold <= total)
            .map(|(node, _)| node.to_string())
            .collect();
        self.current_quest = QUEST_PATH
            .iter()
            .find(|(_, threshold)| *threshold > total)
            .or_else(|| QUEST_PATH.last())
            .map(|(node, _)| node.to_string())
            .unwrap_or_default();
        self.level = self.completed_nodes.len() as u32;
        self.xp = total;
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::derive(0)
    }
}

// ============================================================================
// Progress Record
// ============================================================================

/// Canonical per-wallet persisted points/progress document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub wallet_address: WalletAddress,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub points: Points,
    pub progress: Progress,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressRecord {
    /// Default record for a wallet that has never been seen
    pub fn new(wallet_address: WalletAddress, now: DateTime<Utc>) -> Self {
        Self {
            wallet_address,
            created_at: now,
            last_updated: now,
            points: Points::canonical(),
            progress: Progress::derive(0),
            extra: Map::new(),
        }
    }

    /// Replace the points, recomputing every derived field
    pub fn set_points(&mut self, mut points: Points, now: DateTime<Utc>) {
        points.recompute_totals();
        self.progress.refresh(points.total);
        self.points = points;
        self.last_updated = now;
    }

    /// Serialize for the record store
    pub fn to_document(&self) -> Result<Value, StoreError> {
        serde_json::to_value(self)
            .map_err(|e| StoreError::Malformed(format!("{}: {}", self.wallet_address, e)))
    }
}
