// =============================================================================
// Presentation payloads — what the board UI and the chart consume
// =============================================================================
//
// Nothing here is stored between renders. A `BoardSnapshot` is rebuilt from
// the working set on every publish and carries the window it was built from
// so that per-cell detail can be answered without touching the session.
// =============================================================================

use chrono::FixedOffset;
use serde::Serialize;

use crate::board::layout::Grid;
use crate::board::record::{BaccaratResult, CandleRecord};
use crate::board::window::AnchorSource;
use crate::types::Interval;

/// Default number of candles drawn on the price chart.
pub const CHART_LEN: usize = 50;

/// Fraction of the price range added above and below the chart.
const CHART_PADDING: f64 = 0.1;

// =============================================================================
// Cells
// =============================================================================

/// Compact per-cell payload for drawing the board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellView {
    pub row: usize,
    pub col: usize,
    /// Display index, `row * cols + col`.
    pub index: usize,
    pub label: &'static str,
    pub category: &'static str,
    pub time: String,
}

/// Full detail for a selected cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellDetail {
    pub position: String,
    pub row: usize,
    pub col: usize,
    pub time: String,
    pub result: BaccaratResult,
    pub result_text: &'static str,
    pub color: &'static str,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CellDetail {
    pub fn new(record: &CandleRecord, row: usize, col: usize, zone: FixedOffset) -> Self {
        Self {
            position: format!("{col}x{row}"),
            row,
            col,
            time: record.time.format_in(zone),
            result: record.result,
            result_text: record.result.description(),
            color: record.result.color(),
            price: record.price,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close_or_price(),
            volume: record.volume,
        }
    }
}

// =============================================================================
// Chart
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartCandle {
    /// `HH:MM` axis label.
    pub label: String,
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub is_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub candles: Vec<ChartCandle>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
}

impl ChartSeries {
    /// The last `len` records of `window`, oldest first.
    pub fn from_window(window: &[CandleRecord], len: usize, zone: FixedOffset) -> Self {
        let recent = &window[window.len().saturating_sub(len)..];
        let candles: Vec<ChartCandle> = recent
            .iter()
            .map(|r| ChartCandle {
                label: r.time.in_zone(zone).format("%H:%M").to_string(),
                time: r.time.as_millis(),
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close_or_price(),
                is_up: r.is_up(),
            })
            .collect();

        let (y_min, y_max) = match price_range(recent) {
            Some((lo, hi)) => {
                let pad = (hi - lo) * CHART_PADDING;
                (Some(lo - pad), Some(hi + pad))
            }
            None => (None, None),
        };

        Self {
            candles,
            y_min,
            y_max,
        }
    }
}

fn price_range(records: &[CandleRecord]) -> Option<(f64, f64)> {
    records.iter().fold(None, |acc, r| match acc {
        None => Some((r.low, r.high)),
        Some((lo, hi)) => Some((lo.min(r.low), hi.max(r.high))),
    })
}

// =============================================================================
// Board snapshot
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    /// No load has completed yet.
    Loading,
    Ready,
    /// Loaded, but there is nothing to draw.
    Empty,
    /// The first load failed; nothing to fall back to.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardErrorKind {
    Transport,
    EmptyResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardErrorView {
    pub kind: BoardErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// A fully rendered board, published after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct BoardSnapshot {
    pub version: u64,
    pub status: BoardStatus,
    /// Explicit empty-state signal for the UI.
    pub empty: bool,
    pub interval: Interval,
    pub auto_refresh: bool,
    pub rows: usize,
    pub cols: usize,
    /// `rows` x `cols`, row-major.
    pub cells: Vec<Vec<Option<CellView>>>,
    pub chart: ChartSeries,
    pub window_len: usize,
    pub working_set_len: usize,
    pub anchor: AnchorSource,
    /// Pre-anchor records prepended to fill the board.
    pub backfilled: usize,
    pub last_update: Option<String>,
    pub error: Option<BoardErrorView>,
    pub rejected_records: u64,
    #[serde(skip)]
    pub window: Vec<CandleRecord>,
    #[serde(skip)]
    pub zone: FixedOffset,
}

impl BoardSnapshot {
    /// Row-major cell views for `grid`.
    pub fn cells_for(grid: &Grid<'_>, zone: FixedOffset) -> Vec<Vec<Option<CellView>>> {
        let cols = grid.cols();
        let mut cells = vec![vec![None; cols]; grid.rows()];
        for (row, col, rec) in grid.occupied_cells() {
            cells[row][col] = Some(CellView {
                row,
                col,
                index: row * cols + col,
                label: rec.result.code(),
                category: rec.result.category(),
                time: rec.time.format_in(zone),
            });
        }
        cells
    }

    /// Detail for the cell at (`col`, `row`), if occupied.
    pub fn cell_detail(&self, col: usize, row: usize) -> Option<CellDetail> {
        Grid::layout(&self.window, self.rows, self.cols)
            .get(row, col)
            .map(|rec| CellDetail::new(rec, row, col, self.zone))
    }
}
