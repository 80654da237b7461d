// =============================================================================
// Board Windower — selects "today's board" from the working set
// =============================================================================
//
// A board starts at the daily anchor, 00:01 local time. Selection order
// (first match wins):
//
//   1. Exact scan: newest-to-oldest, the first record whose local time-of-day
//      is 00:01.
//   2. Per-date scan: group by local calendar date, newest date first, and
//      within each date take the first 00:01 record in original order.
//   3. Fallback: the most recent `capacity` records.
//
// The chosen start is sliced to at most `capacity` records. A short slice
// with `start > 0` is backfilled with the records immediately preceding the
// anchor, so a working set of at least `capacity` records always yields a
// full board. Every window is a contiguous range of the input.
// =============================================================================

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{FixedOffset, NaiveDate, Timelike};
use serde::Serialize;

use crate::board::record::CandleRecord;

/// Local hour of the daily board anchor.
pub const ANCHOR_HOUR: u32 = 0;
/// Local minute of the daily board anchor.
pub const ANCHOR_MINUTE: u32 = 1;

/// Which rule picked the window start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorSource {
    Exact,
    PerDate,
    Fallback,
}

/// Result of window selection, as indices into the working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSelection {
    /// Contiguous range of the input that forms the board.
    pub range: Range<usize>,
    /// Index the board was aligned to (the anchor, or the fallback start).
    pub start: usize,
    pub source: AnchorSource,
}

impl WindowSelection {
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Number of pre-anchor records prepended to fill the board.
    pub fn backfilled(&self) -> usize {
        self.start - self.range.start
    }
}

/// Anchor-aligned window selection over an ascending record slice.
#[derive(Debug, Clone, Copy)]
pub struct BoardWindower {
    capacity: usize,
    zone: FixedOffset,
}

impl BoardWindower {
    /// `zone` is the offset in which the 00:01 anchor is evaluated.
    pub fn new(capacity: usize, zone: FixedOffset) -> Self {
        Self { capacity, zone }
    }

    pub fn select(&self, records: &[CandleRecord]) -> WindowSelection {
        let len = records.len();
        let (start, source) = if let Some(idx) = self.exact_anchor(records) {
            (idx, AnchorSource::Exact)
        } else if let Some(idx) = self.per_date_anchor(records) {
            (idx, AnchorSource::PerDate)
        } else {
            (len.saturating_sub(self.capacity), AnchorSource::Fallback)
        };

        let end = start.saturating_add(self.capacity).min(len);
        let taken = end - start;
        let mut begin = start;
        if taken < self.capacity && start > 0 {
            let deficit = self.capacity - taken;
            // Only when the set holds a full board's worth before the anchor.
            if start >= deficit {
                begin = start - deficit;
            }
        }

        WindowSelection {
            range: begin..end,
            start,
            source,
        }
    }

    fn is_anchor(&self, record: &CandleRecord) -> bool {
        let local = record.time.in_zone(self.zone);
        local.hour() == ANCHOR_HOUR && local.minute() == ANCHOR_MINUTE
    }

    fn exact_anchor(&self, records: &[CandleRecord]) -> Option<usize> {
        records.iter().rposition(|r| self.is_anchor(r))
    }

    fn per_date_anchor(&self, records: &[CandleRecord]) -> Option<usize> {
        let mut by_date: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_date
                .entry(record.time.in_zone(self.zone).date_naive())
                .or_default()
                .push(idx);
        }

        by_date.values().rev().find_map(|indices| {
            indices
                .iter()
                .copied()
                .find(|&idx| self.is_anchor(&records[idx]))
        })
    }
}
