// =============================================================================
// Board Session — the explicit, single-owner board state
// =============================================================================
//
// Holds the working set and everything needed to render it, and applies the
// error policy for snapshot loads:
//
//   - transport failure   -> working set untouched, retryable error recorded;
//                            shown as an error placeholder only if nothing has
//                            ever loaded.
//   - empty / rejected    -> working set untouched, "empty result" recorded.
//   - malformed record    -> that record is dropped and counted.
//
// The last good board therefore stays visible across transient failures.
// =============================================================================

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::{info, warn};

use crate::board::layout::{Grid, BOARD_COLS, BOARD_ROWS};
use crate::board::merger::{MergeOutcome, WorkingSet};
use crate::board::record::{CandleRecord, RecordError};
use crate::board::view::{
    BoardErrorKind, BoardErrorView, BoardSnapshot, BoardStatus, ChartSeries, CHART_LEN,
};
use crate::board::window::BoardWindower;
use crate::market_data::source::{FetchError, FetchedBatch};
use crate::types::Interval;

/// Geometry and zone of a board.
#[derive(Debug, Clone, Copy)]
pub struct BoardSettings {
    pub rows: usize,
    pub cols: usize,
    pub chart_len: usize,
    /// Offset in which the daily anchor and display times are evaluated.
    pub zone: FixedOffset,
}

impl BoardSettings {
    pub fn capacity(&self) -> usize {
        self.rows * self.cols
    }
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            rows: BOARD_ROWS,
            cols: BOARD_COLS,
            chart_len: CHART_LEN,
            zone: Utc.fix(),
        }
    }
}

/// What a completed snapshot fetch did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(usize),
    EmptyResult,
    Failed,
}

#[derive(Debug)]
pub struct BoardSession {
    settings: BoardSettings,
    working_set: WorkingSet,
    windower: BoardWindower,
    interval: Interval,
    error: Option<BoardErrorView>,
    loaded_once: bool,
    last_update: Option<DateTime<Utc>>,
    rejected_records: u64,
}

impl BoardSession {
    pub fn new(settings: BoardSettings, interval: Interval) -> Self {
        let capacity = settings.capacity();
        Self {
            settings,
            working_set: WorkingSet::new(capacity),
            windower: BoardWindower::new(capacity, settings.zone),
            interval,
            error: None,
            loaded_once: false,
            last_update: None,
            rejected_records: 0,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.settings
    }

    /// Apply the outcome of a full reload.
    pub fn apply_fetch(&mut self, result: Result<FetchedBatch, FetchError>) -> LoadOutcome {
        match result {
            Ok(batch) => {
                self.rejected_records += batch.rejected as u64;
                if batch.rejected > 0 {
                    warn!(
                        rejected = batch.rejected,
                        interval = %self.interval,
                        "dropped malformed records from snapshot"
                    );
                }
                if batch.records.is_empty() {
                    self.set_error(BoardErrorKind::EmptyResult, "No data available from source");
                    return LoadOutcome::EmptyResult;
                }
                let received = batch.records.len();
                self.working_set.load_snapshot(batch.records);
                self.loaded_once = true;
                self.error = None;
                self.last_update = Some(Utc::now());
                info!(
                    received,
                    retained = self.working_set.len(),
                    capacity = self.working_set.capacity(),
                    interval = %self.interval,
                    "board snapshot loaded"
                );
                LoadOutcome::Loaded(self.working_set.len())
            }
            Err(FetchError::Rejected(msg)) => {
                self.set_error(BoardErrorKind::EmptyResult, &msg);
                LoadOutcome::EmptyResult
            }
            Err(FetchError::Transport(msg)) => {
                self.set_error(BoardErrorKind::Transport, &msg);
                LoadOutcome::Failed
            }
        }
    }

    /// Merge one pushed record. A record failing validation changes nothing
    /// except the rejection counter.
    pub fn apply_update(&mut self, record: CandleRecord) -> Result<MergeOutcome, RecordError> {
        if let Err(e) = record.validate() {
            self.rejected_records += 1;
            return Err(e);
        }
        let outcome = self.working_set.apply_update(record);
        if outcome != MergeOutcome::Evicted {
            self.last_update = Some(Utc::now());
        }
        Ok(outcome)
    }

    /// Switch timeframe. Clears the board; the caller is expected to reload.
    pub fn switch_interval(&mut self, interval: Interval) -> bool {
        if interval == self.interval {
            return false;
        }
        info!(from = %self.interval, to = %interval, "board interval switched");
        self.interval = interval;
        self.working_set.clear();
        self.error = None;
        self.loaded_once = false;
        self.last_update = None;
        true
    }

    pub fn status(&self) -> BoardStatus {
        if !self.working_set.is_empty() {
            return BoardStatus::Ready;
        }
        match &self.error {
            Some(err) if err.kind == BoardErrorKind::Transport && !self.loaded_once => {
                BoardStatus::Error
            }
            Some(_) => BoardStatus::Empty,
            None if self.loaded_once => BoardStatus::Empty,
            None => BoardStatus::Loading,
        }
    }

    /// One render pass: window, layout, and presentation payloads.
    pub fn render(&self, version: u64, auto_refresh: bool) -> BoardSnapshot {
        let zone = self.settings.zone;
        let records = self.working_set.records();
        let selection = self.windower.select(records);
        let window = &records[selection.range.clone()];
        let grid = Grid::layout(window, self.settings.rows, self.settings.cols);

        BoardSnapshot {
            version,
            status: self.status(),
            empty: selection.is_empty(),
            interval: self.interval,
            auto_refresh,
            rows: self.settings.rows,
            cols: self.settings.cols,
            cells: BoardSnapshot::cells_for(&grid, zone),
            chart: ChartSeries::from_window(window, self.settings.chart_len, zone),
            window_len: grid.occupied(),
            working_set_len: records.len(),
            anchor: selection.source,
            backfilled: selection.backfilled(),
            last_update: self.last_update.map(|t| t.to_rfc3339()),
            error: self.error.clone(),
            rejected_records: self.rejected_records,
            window: window.to_vec(),
            zone,
        }
    }

    fn set_error(&mut self, kind: BoardErrorKind, message: &str) {
        warn!(kind = ?kind, detail = message, interval = %self.interval, "board load did not update data");
        self.error = Some(BoardErrorView {
            kind,
            message: message.to_string(),
            retryable: true,
        });
    }
}

impl Default for BoardSession {
    fn default() -> Self {
        Self::new(BoardSettings::default(), Interval::default())
    }
}
