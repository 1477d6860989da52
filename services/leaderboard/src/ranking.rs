//! Bounded top-K ranking table
//!
//! Mirrors scores in-process and keeps the K best-ranked entities in an
//! ordered set. Every tracked entity has its score in `tracked`, which
//! doubles as the entity → position index: the entity's `RankKey` in the
//! ordered sets is rebuilt from it in O(1), so locating and repositioning an
//! entity is O(log K).
//!
//! Ordering uses `RankKey` (score descending, entity id ascending), so the
//! first key of `held` is the leader and the last key is the minimum that a
//! newcomer has to beat.
//!
//! Entities that are tracked but not visible wait in `reserve`. A visible
//! entity whose score drops (replace mode) is demoted as soon as a reserve
//! entity outranks it, so the table never shows a lower score while hiding a
//! strictly higher one.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use types::ids::EntityId;
use types::score::{RankKey, ScoreEntry};

/// Latest known score of a tracked entity.
#[derive(Debug, Clone, Copy)]
struct Tracked {
    score: i64,
    last_updated: DateTime<Utc>,
}

/// Top-K structure over entity → score.
#[derive(Debug, Clone)]
pub struct RankingTable {
    /// Maximum number of visible entries (K).
    capacity: usize,
    /// Every entity ever seen, visible or not.
    tracked: HashMap<EntityId, Tracked>,
    /// Visible top-K keys; first = best, last = current minimum.
    held: BTreeSet<RankKey>,
    /// Tracked entities outside the top K.
    reserve: BTreeSet<RankKey>,
}

impl RankingTable {
    /// Create an empty table showing at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tracked: HashMap::new(),
            held: BTreeSet::new(),
            reserve: BTreeSet::new(),
        }
    }

    /// Build a table from durable records (e.g. a full store scan).
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = ScoreEntry>) -> Self {
        let mut table = Self::new(capacity);
        for entry in entries {
            table.apply(&entry);
        }
        table
    }

    /// Set the tracked score for `entity_id`, stamped with the current time.
    ///
    /// Returns whether the visible top-K content changed.
    pub fn update(&mut self, entity_id: EntityId, new_score: i64) -> bool {
        self.update_at(entity_id, new_score, Utc::now())
    }

    /// Mirror a durable record, keeping its timestamp.
    pub fn apply(&mut self, entry: &ScoreEntry) -> bool {
        self.update_at(entry.entity_id.clone(), entry.score, entry.last_updated)
    }

    fn update_at(&mut self, entity_id: EntityId, new_score: i64, at: DateTime<Utc>) -> bool {
        let previous = self.tracked.insert(
            entity_id.clone(),
            Tracked {
                score: new_score,
                last_updated: at,
            },
        );

        if self.capacity == 0 {
            return false;
        }

        let new_key = RankKey::new(entity_id.clone(), new_score);

        if let Some(prev) = previous {
            let old_key = RankKey::new(entity_id, prev.score);

            if self.held.remove(&old_key) {
                // Reposition in place
                self.held.insert(new_key);
                if prev.score == new_score {
                    return false;
                }
                self.rebalance();
                return true;
            }

            self.reserve.remove(&old_key);
        }

        if self.held.len() < self.capacity {
            self.held.insert(new_key);
            return true;
        }

        let beats_minimum = self
            .held
            .last()
            .is_some_and(|minimum| new_key.outranks(minimum));

        if beats_minimum {
            if let Some(evicted) = self.held.pop_last() {
                self.reserve.insert(evicted);
            }
            self.held.insert(new_key);
            true
        } else {
            self.reserve.insert(new_key);
            false
        }
    }

    /// Swap the visible minimum with the best reserve entry while the
    /// reserve entry ranks ahead of it.
    fn rebalance(&mut self) {
        loop {
            let should_swap = match (self.held.last(), self.reserve.first()) {
                (Some(minimum), Some(candidate)) => candidate.outranks(minimum),
                _ => false,
            };
            if !should_swap {
                break;
            }
            if let (Some(demoted), Some(promoted)) = (self.held.pop_last(), self.reserve.pop_first()) {
                self.held.insert(promoted);
                self.reserve.insert(demoted);
            }
        }
    }

    /// Current ranked view, best first. Does not mutate the table.
    pub fn snapshot(&self) -> Vec<ScoreEntry> {
        self.held
            .iter()
            .map(|key| {
                let last_updated = self
                    .tracked
                    .get(key.entity_id())
                    .map(|t| t.last_updated)
                    .unwrap_or_else(Utc::now);
                ScoreEntry::new(key.entity_id().clone(), key.score(), last_updated)
            })
            .collect()
    }

    /// Lowest visible entry, the one a newcomer must outrank once full.
    pub fn minimum(&self) -> Option<(&EntityId, i64)> {
        self.held.last().map(|key| (key.entity_id(), key.score()))
    }

    /// Tracked score of an entity, visible or not.
    pub fn score_of(&self, entity_id: &EntityId) -> Option<i64> {
        self.tracked.get(entity_id).map(|t| t.score)
    }

    /// Whether an entity is currently in the visible top K.
    pub fn is_ranked(&self, entity_id: &EntityId) -> bool {
        self.tracked
            .get(entity_id)
            .is_some_and(|t| self.held.contains(&RankKey::new(entity_id.clone(), t.score)))
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of distinct entities seen.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::score::top_k;

    fn id(s: &str) -> EntityId {
        EntityId::try_new(s).unwrap()
    }

    fn ranked(table: &RankingTable) -> Vec<(String, i64)> {
        table
            .snapshot()
            .into_iter()
            .map(|e| (e.entity_id.into_inner(), e.score))
            .collect()
    }

    #[test]
    fn test_empty_table() {
        let table = RankingTable::new(3);
        assert!(table.is_empty());
        assert!(table.minimum().is_none());
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn test_top_three_scenario() {
        let mut table = RankingTable::new(3);

        assert!(table.update(id("A"), 10));
        assert!(table.update(id("B"), 20));
        assert!(table.update(id("C"), 5));
        assert!(table.update(id("D"), 30)); // evicts C

        assert_eq!(
            ranked(&table),
            vec![("D".into(), 30), ("B".into(), 20), ("A".into(), 10)]
        );
        assert!(!table.is_ranked(&id("C")));
        assert_eq!(table.score_of(&id("C")), Some(5));
    }

    #[test]
    fn test_update_below_minimum_is_invisible() {
        let mut table = RankingTable::new(2);
        table.update(id("A"), 10);
        table.update(id("B"), 20);

        assert!(!table.update(id("C"), 9));
        assert_eq!(table.minimum(), Some((&id("A"), 10)));
        assert_eq!(table.tracked_count(), 3);
    }

    #[test]
    fn test_duplicate_submission_single_slot() {
        let mut table = RankingTable::new(5);
        table.update(id("A"), 10);
        assert!(!table.update(id("A"), 10));
        assert_eq!(table.len(), 1);

        assert!(table.update(id("A"), 20));
        assert_eq!(ranked(&table), vec![("A".into(), 20)]);
    }

    #[test]
    fn test_reposition_held_entry() {
        let mut table = RankingTable::new(3);
        table.update(id("A"), 10);
        table.update(id("B"), 20);
        table.update(id("C"), 30);

        assert!(table.update(id("A"), 40));
        assert_eq!(
            ranked(&table),
            vec![("A".into(), 40), ("C".into(), 30), ("B".into(), 20)]
        );
    }

    #[test]
    fn test_tie_break_by_entity_id() {
        let mut table = RankingTable::new(2);
        table.update(id("b"), 10);
        table.update(id("c"), 10);

        // Ties the minimum score with a smaller id: ranks ahead of "c".
        assert!(table.update(id("a"), 10));
        assert_eq!(ranked(&table), vec![("a".into(), 10), ("b".into(), 10)]);
    }

    #[test]
    fn test_demoted_entry_yields_to_reserve() {
        let mut table = RankingTable::new(2);
        table.update(id("A"), 50);
        table.update(id("B"), 40);
        table.update(id("C"), 30); // reserve

        // Replace-mode drop: A falls below C.
        assert!(table.update(id("A"), 1));
        assert_eq!(ranked(&table), vec![("B".into(), 40), ("C".into(), 30)]);
        assert!(!table.is_ranked(&id("A")));
    }

    #[test]
    fn test_reserve_entry_returns_when_raised() {
        let mut table = RankingTable::new(1);
        table.update(id("A"), 10);
        table.update(id("B"), 5);

        assert!(table.update(id("B"), 11));
        assert_eq!(ranked(&table), vec![("B".into(), 11)]);
        assert_eq!(table.score_of(&id("A")), Some(10));
    }

    #[test]
    fn test_zero_capacity() {
        let mut table = RankingTable::new(0);
        assert!(!table.update(id("A"), 100));
        assert!(table.snapshot().is_empty());
        assert_eq!(table.score_of(&id("A")), Some(100));
    }

    #[test]
    fn test_snapshot_is_non_destructive() {
        let mut table = RankingTable::new(3);
        table.update(id("A"), 1);
        table.update(id("B"), 2);

        let first = ranked(&table);
        let second = ranked(&table);
        assert_eq!(first, second);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_from_entries_keeps_timestamps() {
        let at = Utc::now() - chrono::Duration::hours(1);
        let table = RankingTable::from_entries(
            2,
            vec![
                ScoreEntry::new(id("A"), 3, at),
                ScoreEntry::new(id("B"), 7, at),
                ScoreEntry::new(id("C"), 1, at),
            ],
        );
        let snap = table.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].last_updated, at);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_matches_brute_force_top_k(
                capacity in 0usize..6,
                ops in prop::collection::vec((0u8..12, -50i64..50), 0..80),
            ) {
                let mut table = RankingTable::new(capacity);
                let mut truth: HashMap<EntityId, i64> = HashMap::new();

                for (n, score) in ops {
                    let entity = id(&format!("e{}", n));
                    table.update(entity.clone(), score);
                    truth.insert(entity, score);

                    let snap = table.snapshot();
                    prop_assert!(snap.len() <= capacity);

                    for pair in snap.windows(2) {
                        let ordered = pair[0].score > pair[1].score
                            || (pair[0].score == pair[1].score
                                && pair[0].entity_id < pair[1].entity_id);
                        prop_assert!(ordered, "snapshot out of rank order");
                    }

                    let expected = top_k(
                        truth
                            .iter()
                            .map(|(e, s)| ScoreEntry::new(e.clone(), *s, Utc::now()))
                            .collect(),
                        capacity,
                    );
                    let got: Vec<(EntityId, i64)> =
                        snap.into_iter().map(|e| (e.entity_id, e.score)).collect();
                    let want: Vec<(EntityId, i64)> =
                        expected.into_iter().map(|e| (e.entity_id, e.score)).collect();
                    prop_assert_eq!(got, want);
                }
            }

            #[test]
            fn prop_changed_flag_tracks_visible_content(
                ops in prop::collection::vec((0u8..8, 0i64..20), 1..60),
            ) {
                let mut table = RankingTable::new(3);
                for (n, score) in ops {
                    let before = ranked(&table);
                    let changed = table.update(id(&format!("e{}", n)), score);
                    let after = ranked(&table);
                    prop_assert_eq!(changed, before != after);
                }
            }
        }
    }
}
