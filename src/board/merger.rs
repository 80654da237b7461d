// =============================================================================
// Stream Merger — ordered, deduplicated, capacity-bounded working set
// =============================================================================
//
// Invariants held after every public call:
//   - records are in ascending `time` order (stable for equal times),
//   - no two records share a `dedup_key`,
//   - `len() <= capacity`, keeping the most recent entries.
// =============================================================================

use std::collections::HashMap;

use tracing::debug;

use crate::board::record::CandleRecord;

/// What [`WorkingSet::apply_update`] did with the incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A record with the same key was overwritten in place.
    Replaced,
    /// The record was new and has been appended.
    Inserted,
    /// The record was new but older than everything retained at capacity.
    Evicted,
}

/// The session-lived, time-ordered set of candles the board is drawn from.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    records: Vec<CandleRecord>,
    capacity: usize,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CandleRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Replace the whole set with `records`.
    ///
    /// Duplicate keys within the batch collapse to the last occurrence.
    pub fn load_snapshot(&mut self, records: Vec<CandleRecord>) {
        let mut positions: HashMap<i64, usize> = HashMap::with_capacity(records.len());
        let mut deduped: Vec<CandleRecord> = Vec::with_capacity(records.len());

        for record in records {
            match positions.get(&record.dedup_key()) {
                Some(&idx) => deduped[idx] = record,
                None => {
                    positions.insert(record.dedup_key(), deduped.len());
                    deduped.push(record);
                }
            }
        }

        let received = deduped.len();
        self.records = deduped;
        self.sort_and_truncate();
        debug!(
            received,
            retained = self.records.len(),
            capacity = self.capacity,
            "working set replaced from snapshot"
        );
    }

    /// Merge one record: replace by key, or append; then re-sort and trim.
    pub fn apply_update(&mut self, record: CandleRecord) -> MergeOutcome {
        let key = record.dedup_key();
        let time = record.time;

        let outcome = match self.records.iter().position(|r| r.dedup_key() == key) {
            Some(idx) => {
                self.records[idx] = record;
                MergeOutcome::Replaced
            }
            None => {
                self.records.push(record);
                MergeOutcome::Inserted
            }
        };

        self.sort_and_truncate();

        if outcome == MergeOutcome::Inserted && !self.records.iter().any(|r| r.time == time) {
            return MergeOutcome::Evicted;
        }
        outcome
    }

    fn sort_and_truncate(&mut self) {
        self.records.sort_by_key(|r| r.time);
        if self.records.len() > self.capacity {
            let excess = self.records.len() - self.capacity;
            self.records.drain(..excess);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::record::{BaccaratResult, Timestamp};

    const MINUTE: i64 = 60_000;
    const BASE: i64 = 1_704_067_260_000; // 2024-01-01T00:01:00Z

    fn rec(minute: i64, close: f64) -> CandleRecord {
        CandleRecord {
            time: Timestamp::from_millis(BASE + minute * MINUTE).unwrap(),
            close_time: None,
            open: 100.0,
            high: close.max(100.0),
            low: close.min(100.0),
            close: Some(close),
            price: close,
            volume: 1.0,
            result: if close >= 100.0 {
                BaccaratResult::Banker
            } else {
                BaccaratResult::Player
            },
        }
    }

    fn minutes(ws: &WorkingSet) -> Vec<i64> {
        ws.records()
            .iter()
            .map(|r| (r.time.as_millis() - BASE) / MINUTE)
            .collect()
    }

    #[test]
    fn snapshot_is_sorted_and_truncated_to_most_recent() {
        let mut ws = WorkingSet::new(3);
        ws.load_snapshot(vec![rec(4, 101.0), rec(0, 99.0), rec(2, 101.0), rec(1, 99.0), rec(3, 99.0)]);
        assert_eq!(minutes(&ws), vec![2, 3, 4]);
    }

    #[test]
    fn snapshot_replaces_previous_contents() {
        let mut ws = WorkingSet::new(10);
        ws.load_snapshot(vec![rec(0, 99.0), rec(1, 99.0)]);
        ws.load_snapshot(vec![rec(7, 101.0)]);
        assert_eq!(minutes(&ws), vec![7]);
    }

    #[test]
    fn snapshot_duplicates_keep_last_occurrence() {
        let mut ws = WorkingSet::new(10);
        ws.load_snapshot(vec![rec(1, 99.0), rec(2, 99.0), rec(1, 105.0)]);
        assert_eq!(minutes(&ws), vec![1, 2]);
        assert_eq!(ws.records()[0].close, Some(105.0));
    }

    #[test]
    fn update_with_same_key_replaces_in_place() {
        let mut ws = WorkingSet::new(10);
        ws.load_snapshot(vec![rec(0, 99.0), rec(1, 99.0), rec(2, 99.0)]);
        let outcome = ws.apply_update(rec(1, 103.0));
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert_eq!(minutes(&ws), vec![0, 1, 2]);
        assert_eq!(ws.records()[1].close, Some(103.0));
        assert_eq!(ws.records()[1].result, BaccaratResult::Banker);
    }

    #[test]
    fn identical_update_twice_is_idempotent() {
        let mut ws = WorkingSet::new(10);
        ws.load_snapshot(vec![rec(0, 99.0), rec(1, 99.0)]);
        ws.apply_update(rec(2, 101.0));
        let before = ws.records().to_vec();
        assert_eq!(ws.apply_update(rec(2, 101.0)), MergeOutcome::Replaced);
        assert_eq!(ws.records(), before.as_slice());
        assert_eq!(ws.records().iter().filter(|r| r.dedup_key() == rec(2, 0.0).dedup_key()).count(), 1);
    }

    #[test]
    fn out_of_order_update_is_sorted_into_place() {
        let mut ws = WorkingSet::new(10);
        ws.load_snapshot(vec![rec(0, 99.0), rec(2, 99.0), rec(3, 99.0)]);
        assert_eq!(ws.apply_update(rec(1, 101.0)), MergeOutcome::Inserted);
        assert_eq!(minutes(&ws), vec![0, 1, 2, 3]);
    }

    #[test]
    fn sequential_updates_past_capacity_drop_oldest() {
        let capacity = 156;
        let mut ws = WorkingSet::new(capacity);
        for m in 0..(capacity as i64 + 5) {
            ws.apply_update(rec(m, 101.0));
        }
        assert_eq!(ws.len(), capacity);
        assert_eq!(minutes(&ws).first(), Some(&5));
        assert_eq!(minutes(&ws).last(), Some(&(capacity as i64 + 4)));
    }

    #[test]
    fn stale_update_at_capacity_is_evicted_immediately() {
        let mut ws = WorkingSet::new(2);
        ws.load_snapshot(vec![rec(5, 99.0), rec(6, 99.0)]);
        assert_eq!(ws.apply_update(rec(1, 101.0)), MergeOutcome::Evicted);
        assert_eq!(minutes(&ws), vec![5, 6]);
    }

    #[test]
    fn same_minute_different_seconds_dedups() {
        let mut ws = WorkingSet::new(10);
        ws.apply_update(rec(0, 99.0));
        let mut later = rec(0, 101.0);
        later.time = Timestamp::from_millis(BASE + 59_999).unwrap();
        assert_eq!(ws.apply_update(later), MergeOutcome::Replaced);
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut ws = WorkingSet::new(4);
        ws.load_snapshot(vec![rec(0, 99.0)]);
        ws.clear();
        assert!(ws.is_empty());
        assert!(ws.records().is_empty());
    }
}
