//! Progress Merger
//!
//! Reconciles the points held by the record store with the points held in a
//! local session, without ever losing earned progress.
//!
//! ## Merge-max rule
//!
//! - numeric leaves (gaming hub categories, story chapters): `max`
//! - boolean achievements: `OR`; counter achievements: `max`
//! - `storyMode.totalScore` and `total`: recomputed from the merged leaves
//! - unknown fields: union; colliding values merged with [`merge_value`]
//!
//! Every rule is commutative, associative and idempotent, so two devices
//! saving in any order converge on the same record.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::record::{Achievement, Points, ScoreMap, StoryMode};

/// Stateless merger for points snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressMerger;

impl ProgressMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge remote and local points.
    ///
    /// When only one side is present it is returned unchanged; when neither
    /// is, the canonical zero points are returned.
    pub fn merge(&self, remote: Option<&Points>, local: Option<&Points>) -> Points {
        match (remote, local) {
            (None, None) => Points::canonical(),
            (Some(only), None) | (None, Some(only)) => only.clone(),
            (Some(remote), Some(local)) => merge_points(remote, local),
        }
    }
}

fn merge_points(a: &Points, b: &Points) -> Points {
    let mut merged = Points {
        gaming_hub: merge_scores(&a.gaming_hub, &b.gaming_hub),
        story_mode: StoryMode {
            chapters: merge_scores(&a.story_mode.chapters, &b.story_mode.chapters),
            total_score: 0,
        },
        achievements: merge_achievements(&a.achievements, &b.achievements),
        total: 0,
        extra: merge_maps(&a.extra, &b.extra),
    };
    merged.recompute_totals();
    merged
}

fn merge_scores(a: &ScoreMap, b: &ScoreMap) -> ScoreMap {
    let mut merged = a.clone();
    for (name, score) in b {
        merged
            .entry(name.clone())
            .and_modify(|v| *v = (*v).max(*score))
            .or_insert(*score);
    }
    merged
}

fn merge_achievements(
    a: &BTreeMap<String, Achievement>,
    b: &BTreeMap<String, Achievement>,
) -> BTreeMap<String, Achievement> {
    let mut merged = a.clone();
    for (name, achievement) in b {
        merged
            .entry(name.clone())
            .and_modify(|v| *v = v.merge(*achievement))
            .or_insert(*achievement);
    }
    merged
}

fn merge_maps(a: &Map<String, Value>, b: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = a.clone();
    for (key, value) in b {
        let next = match merged.get(key) {
            Some(existing) => merge_value(existing, value),
            None => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

/// Merge two values of an unknown field.
///
/// Numbers take the max, booleans OR, objects merge key by key. Any other
/// pairing keeps the value whose JSON text sorts greater, which keeps the
/// result independent of argument order.
pub fn merge_value(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) if fy > fx => b.clone(),
                (Some(fx), Some(fy)) if fx > fy => a.clone(),
                _ => greater_text(a, b),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(*x || *y),
        (Value::Object(x), Value::Object(y)) => Value::Object(merge_maps(x, y)),
        _ => greater_text(a, b),
    }
}

fn greater_text(a: &Value, b: &Value) -> Value {
    if b.to_string() > a.to_string() {
        b.clone()
    } else {
        a.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PointEvent;
    use serde_json::json;

    fn points(hub: &[(&str, u64)], story: &[(&str, u64)]) -> Points {
        let mut p = Points::canonical();
        for (k, v) in hub {
            p.gaming_hub.insert(k.to_string(), *v);
        }
        for (k, v) in story {
            p.story_mode.chapters.insert(k.to_string(), *v);
        }
        p.recompute_totals();
        p
    }

    #[test]
    fn test_one_side_absent_returns_other_unchanged() {
        let merger = ProgressMerger::new();
        let mut local = points(&[("blockchainBasics", 5)], &[]);
        // deliberately stale total, returned as-is
        local.total = 999;

        assert_eq!(merger.merge(None, Some(&local)), local);
        assert_eq!(merger.merge(Some(&local), None), local);
        assert_eq!(merger.merge(None, None), Points::canonical());
    }

    #[test]
    fn test_numeric_leaves_take_max() {
        let remote = points(&[("blockchainBasics", 5), ("defiProtocols", 9)], &[("chapter1", 2)]);
        let local = points(&[("blockchainBasics", 8), ("defiProtocols", 1)], &[("chapter1", 7)]);

        let merged = ProgressMerger::new().merge(Some(&remote), Some(&local));
        for (name, score) in &merged.gaming_hub {
            assert_eq!(*score, remote.gaming_hub[name].max(local.gaming_hub[name]));
        }
        assert_eq!(merged.gaming_hub["blockchainBasics"], 8);
        assert_eq!(merged.gaming_hub["defiProtocols"], 9);
        assert_eq!(merged.story_mode.chapters["chapter1"], 7);
    }

    #[test]
    fn test_totals_recomputed_not_summed() {
        let mut remote = points(&[("blockchainBasics", 5)], &[("chapter1", 10)]);
        let mut local = points(&[("blockchainBasics", 5)], &[("chapter1", 10)]);
        // stale totals on both sides must not leak through
        remote.total = 40;
        local.total = 0;
        remote.story_mode.total_score = 3;

        let merged = ProgressMerger::new().merge(Some(&remote), Some(&local));
        assert_eq!(merged.story_mode.total_score, 10);
        assert_eq!(merged.total, 15);
        assert_eq!(merged.total, merged.leaf_total());
    }

    #[test]
    fn test_achievements_or_and_max() {
        let mut remote = Points::canonical();
        remote.apply(&PointEvent::Unlock { name: "firstSteps".into() });
        remote.apply(&PointEvent::Increment { name: "dailyStreak".into(), by: 4 });
        let mut local = Points::canonical();
        local.apply(&PointEvent::Unlock { name: "tokenCreator".into() });
        local.apply(&PointEvent::Increment { name: "dailyStreak".into(), by: 2 });

        let merged = ProgressMerger::new().merge(Some(&remote), Some(&local));
        assert_eq!(merged.achievements["firstSteps"], Achievement::Flag(true));
        assert_eq!(merged.achievements["tokenCreator"], Achievement::Flag(true));
        assert_eq!(merged.achievements["gamingMaster"], Achievement::Flag(false));
        assert_eq!(merged.achievements["dailyStreak"], Achievement::Count(4));
    }

    #[test]
    fn test_keys_on_one_side_only_are_kept() {
        let remote = points(&[("zkProofs", 3)], &[]);
        let local = points(&[], &[("bonusChapter", 6)]);

        let merged = ProgressMerger::new().merge(Some(&remote), Some(&local));
        assert_eq!(merged.gaming_hub["zkProofs"], 3);
        assert_eq!(merged.story_mode.chapters["bonusChapter"], 6);
        assert_eq!(merged.total, 9);
    }

    #[test]
    fn test_unknown_fields_preserved_and_merged() {
        let mut remote = Points::canonical();
        remote.extra.insert("seasonPass".into(), json!({"tier": 2, "claimed": false}));
        remote.extra.insert("theme".into(), json!("dark"));
        let mut local = Points::canonical();
        local.extra.insert("seasonPass".into(), json!({"tier": 1, "claimed": true}));
        local.extra.insert("streakFreeze".into(), json!(1));

        let merged = ProgressMerger::new().merge(Some(&remote), Some(&local));
        assert_eq!(merged.extra["seasonPass"], json!({"tier": 2, "claimed": true}));
        assert_eq!(merged.extra["theme"], "dark");
        assert_eq!(merged.extra["streakFreeze"], 1);
    }

    #[test]
    fn test_merge_is_commutative_associative_idempotent() {
        let merger = ProgressMerger::new();
        let mut a = points(&[("blockchainBasics", 5)], &[("chapter2", 1)]);
        a.extra.insert("theme".into(), json!("dark"));
        let mut b = points(&[("smartContracts", 4)], &[("chapter1", 10)]);
        b.extra.insert("theme".into(), json!("light"));
        b.apply(&PointEvent::Unlock { name: "storyComplete".into() });
        let c = points(&[("blockchainBasics", 2), ("smartContracts", 9)], &[]);

        let ab = merger.merge(Some(&a), Some(&b));
        assert_eq!(ab, merger.merge(Some(&b), Some(&a)));
        assert_eq!(merger.merge(Some(&ab), Some(&ab)), ab);

        let ab_c = merger.merge(Some(&ab), Some(&c));
        let bc = merger.merge(Some(&b), Some(&c));
        let a_bc = merger.merge(Some(&a), Some(&bc));
        assert_eq!(ab_c, a_bc);
        assert_eq!(ab_c.total, 5 + 9 + 10 + 1);
    }

    #[test]
    fn test_merge_value_rules() {
        assert_eq!(merge_value(&json!(3), &json!(7.5)), json!(7.5));
        assert_eq!(merge_value(&json!(false), &json!(true)), json!(true));
        assert_eq!(merge_value(&json!("a"), &json!("b")), json!("b"));
        assert_eq!(merge_value(&json!("b"), &json!("a")), json!("b"));
        assert_eq!(merge_value(&json!([1]), &json!(2)), merge_value(&json!(2), &json!([1])));
    }
}
