//! Progress record schema and wallet addressing

pub mod address;
pub mod model;

pub use address::{derive_keys, KeyStrategy, WalletAddress, DEFAULT_LEGACY_PREFIXES};
pub use model::{
    Achievement, PointEvent, Points, Progress, ProgressRecord, ScoreMap, StoryMode,
    ACHIEVEMENT_COUNTERS, ACHIEVEMENT_FLAGS, GAMING_HUB_CATEGORIES, QUEST_PATH, STORY_CHAPTERS,
};
