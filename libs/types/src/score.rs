//! Score records and the rank order
//!
//! A `ScoreEntry` is created on the first submission for an entity and
//! mutated (never deleted) by later submissions. The rank order is total:
//! higher score first, equal scores by ascending entity id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::str::FromStr;

use crate::ids::EntityId;

/// How a submitted value combines with the stored score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    /// Add the submitted value to the current score (atomic in the store).
    #[default]
    Increment,
    /// Overwrite the current score with the submitted value.
    Replace,
}

impl SubmitMode {
    /// Combine a submitted value with the current score, if any.
    pub fn apply(self, current: Option<i64>, value: i64) -> i64 {
        match self {
            SubmitMode::Increment => current.unwrap_or(0).saturating_add(value),
            SubmitMode::Replace => value,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitMode::Increment => "increment",
            SubmitMode::Replace => "replace",
        }
    }
}

impl fmt::Display for SubmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "increment" => Ok(SubmitMode::Increment),
            "replace" => Ok(SubmitMode::Replace),
            other => Err(format!("unknown submit mode: {}", other)),
        }
    }
}

/// Durable score record for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub entity_id: EntityId,
    pub score: i64,
    pub last_updated: DateTime<Utc>,
}

impl ScoreEntry {
    pub fn new(entity_id: EntityId, score: i64, last_updated: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            score,
            last_updated,
        }
    }

    /// Position key of this entry in the rank order.
    pub fn rank_key(&self) -> RankKey {
        RankKey::new(self.entity_id.clone(), self.score)
    }
}

/// Sort key whose ascending order is the rank order (best first).
///
/// Derived `Ord` compares the reversed score first, then the entity id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankKey {
    score: Reverse<i64>,
    entity_id: EntityId,
}

impl RankKey {
    pub fn new(entity_id: EntityId, score: i64) -> Self {
        Self {
            score: Reverse(score),
            entity_id,
        }
    }

    pub fn score(&self) -> i64 {
        self.score.0
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Whether this key ranks strictly ahead of `other`.
    pub fn outranks(&self, other: &RankKey) -> bool {
        self < other
    }
}

/// Comparator placing higher scores first and breaking ties by ascending id.
pub fn rank_order(a: &ScoreEntry, b: &ScoreEntry) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// Sort entries into rank order and keep the best `k`.
pub fn top_k(mut entries: Vec<ScoreEntry>, k: usize) -> Vec<ScoreEntry> {
    entries.sort_by(rank_order);
    entries.truncate(k);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, score: i64) -> ScoreEntry {
        ScoreEntry::new(EntityId::try_new(id).unwrap(), score, Utc::now())
    }

    #[test]
    fn test_submit_mode_apply() {
        assert_eq!(SubmitMode::Increment.apply(None, 10), 10);
        assert_eq!(SubmitMode::Increment.apply(Some(10), 10), 20);
        assert_eq!(SubmitMode::Replace.apply(Some(10), 3), 3);
        assert_eq!(SubmitMode::Increment.apply(Some(i64::MAX), 1), i64::MAX);
    }

    #[test]
    fn test_submit_mode_parse() {
        assert_eq!("increment".parse::<SubmitMode>(), Ok(SubmitMode::Increment));
        assert_eq!(" Replace ".parse::<SubmitMode>(), Ok(SubmitMode::Replace));
        assert!("sum".parse::<SubmitMode>().is_err());
    }

    #[test]
    fn test_rank_order_descending_with_tie_break() {
        let ranked = top_k(
            vec![entry("b", 10), entry("c", 30), entry("a", 10), entry("d", 5)],
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_top_k_truncates() {
        let ranked = top_k(vec![entry("a", 1), entry("b", 2), entry("c", 3)], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entity_id.as_str(), "c");
    }

    #[test]
    fn test_rank_key_order_matches_comparator() {
        let high = RankKey::new(EntityId::try_new("z").unwrap(), 50);
        let tie_low_id = RankKey::new(EntityId::try_new("a").unwrap(), 10);
        let tie_high_id = RankKey::new(EntityId::try_new("b").unwrap(), 10);

        assert!(high.outranks(&tie_low_id));
        assert!(tie_low_id.outranks(&tie_high_id));
        assert!(!tie_high_id.outranks(&tie_high_id));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_rank_key_agrees_with_comparator(
                a in -100i64..100,
                b in -100i64..100,
                x in "[a-c]{1,3}",
                y in "[a-c]{1,3}",
            ) {
                let ea = entry(&x, a);
                let eb = entry(&y, b);
                prop_assert_eq!(ea.rank_key().cmp(&eb.rank_key()), rank_order(&ea, &eb));
            }

            #[test]
            fn prop_top_k_is_sorted_and_bounded(
                scores in prop::collection::vec(0i64..50, 0..30),
                k in 0usize..10,
            ) {
                let entries: Vec<ScoreEntry> = scores
                    .iter()
                    .enumerate()
                    .map(|(i, s)| entry(&format!("e{:02}", i), *s))
                    .collect();
                let ranked = top_k(entries, k);

                prop_assert!(ranked.len() <= k);
                for pair in ranked.windows(2) {
                    prop_assert_eq!(rank_order(&pair[0], &pair[1]), Ordering::Less);
                }
            }
        }
    }
}
