//! Process-lifetime ripeness counters.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::ripeness::RipenessCategory;

/// Running per-category counts, shared by every request.
///
/// Increments and snapshots go through the same lock, so a snapshot always
/// reflects a whole prefix of increments. Counts only grow; they reset only
/// when the process restarts.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    counts: Mutex<[u64; 4]>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, category: RipenessCategory) {
        // A poisoned guard still holds valid counts: the critical section is a
        // single add.
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts[category.index()] += 1;
    }

    pub fn snapshot(&self) -> RipenessStats {
        let counts = *self.counts.lock().unwrap_or_else(|e| e.into_inner());
        RipenessStats::from_counts(counts)
    }
}

/// Point-in-time copy of the counters. Categories never seen are absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RipenessStats {
    counts: BTreeMap<RipenessCategory, u64>,
}

impl RipenessStats {
    fn from_counts(counts: [u64; 4]) -> Self {
        let counts = RipenessCategory::ALL
            .iter()
            .filter(|c| counts[c.index()] > 0)
            .map(|c| (*c, counts[c.index()]))
            .collect();
        Self { counts }
    }

    pub fn count(&self, category: RipenessCategory) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_empty() {
        let stats = StatsAggregator::new();
        assert!(stats.snapshot().is_empty());
        assert_eq!(serde_json::to_string(&stats.snapshot()).unwrap(), "{}");
    }

    #[test]
    fn increments_only_touch_their_category() {
        let stats = StatsAggregator::new();
        for _ in 0..5 {
            stats.increment(RipenessCategory::Ripe);
        }
        stats.increment(RipenessCategory::Unripe);
        let snap = stats.snapshot();
        assert_eq!(snap.count(RipenessCategory::Ripe), 5);
        assert_eq!(snap.count(RipenessCategory::Unripe), 1);
        assert_eq!(snap.count(RipenessCategory::Overripe), 0);
        assert_eq!(snap.total(), 6);
    }

    #[test]
    fn snapshot_is_a_copy_and_idempotent() {
        let stats = StatsAggregator::new();
        stats.increment(RipenessCategory::Overripe);
        let first = stats.snapshot();
        let second = stats.snapshot();
        assert_eq!(first, second);
        stats.increment(RipenessCategory::Overripe);
        assert_eq!(first.count(RipenessCategory::Overripe), 1);
        assert_eq!(stats.snapshot().count(RipenessCategory::Overripe), 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatsAggregator::new());
        let threads: Vec<_> = RipenessCategory::ALL
            .iter()
            .copied()
            .flat_map(|category| {
                let stats = stats.clone();
                (0..2).map(move |_| {
                    let stats = stats.clone();
                    std::thread::spawn(move || {
                        for _ in 0..1000 {
                            stats.increment(category);
                        }
                    })
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.total(), 8000);
        for category in RipenessCategory::ALL {
            assert_eq!(snap.count(category), 2000);
        }
    }

    #[test]
    fn serializes_as_category_map() {
        let stats = StatsAggregator::new();
        stats.increment(RipenessCategory::Unripe);
        stats.increment(RipenessCategory::NotAFruit);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert_eq!(json, r#"{"unripe":1,"not_a_fruit":1}"#);
    }
}
