//! Score Normalizer
//!
//! Maps whatever a store holds for a wallet into the canonical
//! [`ProgressRecord`] shape. Records written by older clients show up with:
//!
//! - missing categories, chapters or achievements
//! - scores stored as strings, floats or negative numbers
//! - `gamingHub` / `storyMode` / `achievements` at the top level instead of
//!   under `points`, and a `totalPoints` field instead of `points.total`
//! - a `total` of zero next to non-zero leaves (an earlier total formula)
//!
//! Derived values are always recomputed from the leaves. Fields this version
//! does not know about are kept.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::record::{Achievement, Points, Progress, ProgressRecord, ScoreMap, StoryMode, WalletAddress};

/// Top-level fields older clients wrote outside `points`
const LEGACY_POINT_FIELDS: &[&str] = &["gamingHub", "storyMode", "achievements"];

/// Stateless normalizer for raw record and points documents
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreNormalizer;

impl ScoreNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw stored document into a canonical record for `address`
    pub fn normalize(&self, raw: &Value, address: &WalletAddress) -> ProgressRecord {
        let now = Utc::now();
        let Some(object) = raw.as_object() else {
            warn!(address = %address, kind = json_kind(raw), "Stored record is not an object, using defaults");
            return ProgressRecord::new(address.clone(), now);
        };

        let mut extra = object.clone();
        extra.remove("walletAddress");
        let created_at = extra
            .remove("createdAt")
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or(now);
        let last_updated = extra
            .remove("lastUpdated")
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or(created_at);

        let points_raw = match extra.remove("points") {
            Some(Value::Object(points)) => Value::Object(points),
            other => {
                if let Some(value) = other {
                    warn!(address = %address, kind = json_kind(&value), "Ignoring non-object points field");
                }
                let mut lifted = Map::new();
                for field in LEGACY_POINT_FIELDS {
                    if let Some(value) = extra.remove(*field) {
                        lifted.insert(field.to_string(), value);
                    }
                }
                if let Some(total) = extra.remove("totalPoints") {
                    lifted.insert("total".to_string(), total);
                }
                if !lifted.is_empty() {
                    debug!(address = %address, "Lifted legacy top-level point fields");
                }
                Value::Object(lifted)
            }
        };
        let points = self.normalize_points(&points_raw);

        let progress_extra = match extra.remove("progress") {
            Some(Value::Object(mut progress)) => {
                for field in ["completedNodes", "currentQuest", "level", "xp"] {
                    progress.remove(field);
                }
                progress
            }
            _ => Map::new(),
        };
        let mut progress = Progress::derive(points.total);
        progress.extra = progress_extra;

        ProgressRecord {
            wallet_address: address.clone(),
            created_at,
            last_updated,
            points,
            progress,
            extra,
        }
    }

    /// Normalize a raw `points` object (stored or from the session mirror)
    pub fn normalize_points(&self, raw: &Value) -> Points {
        let mut extra = raw.as_object().cloned().unwrap_or_default();

        let gaming_hub = score_map(extra.remove("gamingHub"), "gamingHub");

        let chapters = match extra.remove("storyMode") {
            Some(Value::Object(mut story)) => {
                story.remove("totalScore");
                score_map(Some(Value::Object(story)), "storyMode")
            }
            other => score_map(other, "storyMode"),
        };

        let achievements = match extra.remove("achievements") {
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(name, value)| (name.clone(), coerce_achievement(name, value)))
                .collect(),
            Some(Value::Null) | None => Default::default(),
            Some(other) => {
                warn!(kind = json_kind(&other), "Ignoring non-object achievements field");
                Default::default()
            }
        };

        let stored_total = extra
            .remove("total")
            .as_ref()
            .and_then(coerce_score)
            .unwrap_or(0);

        let mut points = Points {
            gaming_hub,
            story_mode: StoryMode {
                chapters,
                total_score: 0,
            },
            achievements,
            total: stored_total,
            extra,
        };
        points.fill_missing_leaves();

        let leaf_total = points.leaf_total();
        if stored_total == 0 && leaf_total > 0 {
            warn!(leaf_total, "Stored total was zero with non-zero leaves, recomputing");
        } else if stored_total != leaf_total {
            debug!(stored_total, leaf_total, "Stored total disagrees with leaves, recomputing");
        }
        points.recompute_totals();
        points
    }
}

fn score_map(raw: Option<Value>, field: &str) -> ScoreMap {
    match raw {
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(name, value)| {
                let score = coerce_score(value).unwrap_or_else(|| {
                    warn!(field, name = %name, kind = json_kind(value), "Non-numeric score, treating as zero");
                    0
                });
                (name.clone(), score)
            })
            .collect(),
        Some(Value::Null) | None => ScoreMap::new(),
        Some(other) => {
            warn!(field, kind = json_kind(&other), "Ignoring non-object score map");
            ScoreMap::new()
        }
    }
}

/// Coerce a stored score to a non-negative integer
fn coerce_score(value: &Value) -> Option<u64> {
    match value {
        Value::Null => Some(0),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(v)
            } else if n.as_i64().is_some() {
                // negative integer
                Some(0)
            } else {
                n.as_f64().map(clamp_float)
            }
        }
        Value::String(s) => s.trim().parse::<f64>().ok().map(clamp_float),
        _ => None,
    }
}

fn clamp_float(v: f64) -> u64 {
    if v.is_finite() && v > 0.0 {
        v.floor() as u64
    } else {
        0
    }
}

fn coerce_achievement(name: &str, value: &Value) -> Achievement {
    match value {
        Value::Bool(b) => Achievement::Flag(*b),
        Value::Null => Achievement::Flag(false),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Achievement::Flag(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Achievement::Flag(false),
        other => match coerce_score(other) {
            Some(count) => Achievement::Count(count),
            None => {
                warn!(name, kind = json_kind(other), "Unreadable achievement, treating as locked");
                Achievement::Flag(false)
            }
        },
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{GAMING_HUB_CATEGORIES, STORY_CHAPTERS};
    use serde_json::json;

    fn address() -> WalletAddress {
        WalletAddress::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap()
    }

    #[test]
    fn test_empty_object_gets_every_default() {
        let record = ScoreNormalizer::new().normalize(&json!({}), &address());

        assert_eq!(record.wallet_address, address());
        assert_eq!(record.points.gaming_hub.len(), GAMING_HUB_CATEGORIES.len());
        assert_eq!(record.points.story_mode.chapters.len(), STORY_CHAPTERS.len());
        assert_eq!(record.points.total, 0);
        assert_eq!(record.progress.level, 1);
    }

    #[test]
    fn test_zero_total_with_nonzero_leaves_is_recomputed() {
        let raw = json!({
            "walletAddress": "0xABCDEF0123456789abcdef0123456789abcdef01",
            "points": {
                "gamingHub": {"blockchainBasics": 5, "defiProtocols": 7},
                "storyMode": {"chapter1": 10, "totalScore": 0},
                "total": 0
            }
        });

        let record = ScoreNormalizer::new().normalize(&raw, &address());
        assert_eq!(record.points.story_mode.total_score, 10);
        assert_eq!(record.points.total, 22);
        assert_eq!(record.progress.xp, 22);
        assert_eq!(record.wallet_address.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_inflated_total_is_not_trusted() {
        let raw = json!({"points": {"gamingHub": {"blockchainBasics": 5}, "total": 500}});
        let record = ScoreNormalizer::new().normalize(&raw, &address());
        assert_eq!(record.points.total, 5);
    }

    #[test]
    fn test_legacy_value_coercion() {
        let raw = json!({
            "gamingHub": {"blockchainBasics": "12", "smartContracts": -4, "defiProtocols": 3.7, "cryptoTrading": null, "web3Security": [1]},
            "achievements": {"firstSteps": "true", "dailyStreak": 3, "storyComplete": "maybe"},
            "totalPoints": 99
        });

        let points = ScoreNormalizer::new().normalize(&raw, &address()).points;
        assert_eq!(points.gaming_hub["blockchainBasics"], 12);
        assert_eq!(points.gaming_hub["smartContracts"], 0);
        assert_eq!(points.gaming_hub["defiProtocols"], 3);
        assert_eq!(points.gaming_hub["cryptoTrading"], 0);
        assert_eq!(points.gaming_hub["web3Security"], 0);
        assert_eq!(points.achievements["firstSteps"], Achievement::Flag(true));
        assert_eq!(points.achievements["dailyStreak"], Achievement::Count(3));
        assert_eq!(points.achievements["storyComplete"], Achievement::Flag(false));
        assert_eq!(points.total, 15);
    }

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({
            "nickname": "satoshi-fan",
            "points": {
                "gamingHub": {"blockchainBasics": 1, "zkProofs": 4},
                "seasonPass": {"tier": 2}
            },
            "progress": {"level": 99, "badge": "early"}
        });

        let record = ScoreNormalizer::new().normalize(&raw, &address());
        assert_eq!(record.extra["nickname"], "satoshi-fan");
        assert_eq!(record.points.gaming_hub["zkProofs"], 4);
        assert_eq!(record.points.extra["seasonPass"], json!({"tier": 2}));
        assert_eq!(record.progress.extra["badge"], "early");
        // derived, not copied
        assert_eq!(record.progress.level, 1);

        let doc = record.to_document().unwrap();
        assert_eq!(doc["nickname"], "satoshi-fan");
        assert_eq!(doc["points"]["seasonPass"]["tier"], 2);
        assert_eq!(doc["points"]["total"], 5);
    }

    #[test]
    fn test_non_object_record_falls_back_to_default() {
        let record = ScoreNormalizer::new().normalize(&json!("garbage"), &address());
        assert_eq!(record.points, Points::canonical());
    }

    #[test]
    fn test_timestamps_parsed_from_rfc3339_and_millis() {
        let raw = json!({
            "createdAt": "2024-03-01T12:00:00Z",
            "lastUpdated": 1_717_200_000_000i64
        });
        let record = ScoreNormalizer::new().normalize(&raw, &address());
        assert_eq!(record.created_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert_eq!(record.last_updated.timestamp_millis(), 1_717_200_000_000);
    }

    #[test]
    fn test_normalizing_twice_is_stable() {
        let raw = json!({"points": {"gamingHub": {"blockchainBasics": "8"}, "storyMode": {"chapter2": 6}}});
        let normalizer = ScoreNormalizer::new();
        let once = normalizer.normalize(&raw, &address());
        let twice = normalizer.normalize(&once.to_document().unwrap(), &address());
        assert_eq!(once, twice);
    }
}
