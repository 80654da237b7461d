// =============================================================================
// Grid Layout Engine — column-major placement of a board window
// =============================================================================

use crate::board::record::CandleRecord;

/// Rows per board column.
pub const BOARD_ROWS: usize = 6;
/// Columns per board.
pub const BOARD_COLS: usize = 26;
/// Cells per board.
pub const BOARD_CAPACITY: usize = BOARD_ROWS * BOARD_COLS;

/// Dense `rows x cols` board of borrowed records.
///
/// Cell `(row, col)` holds window entry `col * rows + row`; entries past
/// `rows * cols` are dropped and unfilled cells are `None`.
#[derive(Debug, Clone)]
pub struct Grid<'a> {
    rows: usize,
    cols: usize,
    cells: Vec<Option<&'a CandleRecord>>,
}

impl<'a> Grid<'a> {
    pub fn layout(window: &'a [CandleRecord], rows: usize, cols: usize) -> Self {
        let mut cells = vec![None; rows * cols];
        for (flat, record) in window.iter().take(rows * cols).enumerate() {
            cells[flat] = Some(record);
        }
        Self { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&'a CandleRecord> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells[col * self.rows + row]
    }

    /// Number of non-empty cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Occupied cells as `(row, col, record)` in fill order.
    pub fn occupied_cells(&self) -> impl Iterator<Item = (usize, usize, &'a CandleRecord)> + '_ {
        let rows = self.rows;
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(flat, cell)| cell.map(|rec| (flat % rows, flat / rows, rec)))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::record::{BaccaratResult, Timestamp};
    use crate::board::window::BoardWindower;
    use chrono::FixedOffset;

    const MINUTE: i64 = 60_000;
    // 2024-01-01T00:01:00Z
    const ANCHOR: i64 = 1_704_067_260_000;

    fn board(window: &[CandleRecord]) -> Grid<'_> {
        Grid::layout(window, BOARD_ROWS, BOARD_COLS)
    }

    fn select_window(records: &[CandleRecord], capacity: usize, zone: FixedOffset) -> &[CandleRecord] {
        &records[BoardWindower::new(capacity, zone).select(records).range]
    }

    fn records(count: usize) -> Vec<CandleRecord> {
        (0..count as i64)
            .map(|i| CandleRecord {
                time: Timestamp::from_millis(ANCHOR + i * MINUTE).unwrap(),
                close_time: None,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: None,
                price: 1.0,
                volume: 0.0,
                result: BaccaratResult::Tie,
            })
            .collect()
    }

    #[test]
    fn fills_columns_top_to_bottom() {
        let recs = records(8);
        let grid = board(&recs);
        assert_eq!(grid.get(0, 0), Some(&recs[0]));
        assert_eq!(grid.get(5, 0), Some(&recs[5]));
        assert_eq!(grid.get(0, 1), Some(&recs[6]));
        assert_eq!(grid.get(1, 1), Some(&recs[7]));
        assert_eq!(grid.get(2, 1), None);
        assert_eq!(grid.occupied(), 8);
    }

    #[test]
    fn full_day_board_corners() {
        let recs = records(BOARD_CAPACITY);
        let window = select_window(&recs, BOARD_CAPACITY, FixedOffset::east_opt(0).unwrap());
        let grid = board(window);
        assert_eq!(grid.get(0, 0), Some(&recs[0]));
        assert_eq!(grid.get(5, 25), Some(&recs[155]));
        assert_eq!(grid.occupied(), BOARD_CAPACITY);
    }

    #[test]
    fn occupied_count_matches_small_windows() {
        let utc = FixedOffset::east_opt(0).unwrap();
        for n in [0, 1, 5, 6, 7, 100, BOARD_CAPACITY] {
            let recs = records(n);
            let grid = board(select_window(&recs, BOARD_CAPACITY, utc));
            assert_eq!(grid.occupied(), n, "window of {n}");
        }
    }

    #[test]
    fn overflow_is_dropped() {
        let recs = records(20);
        let grid = Grid::layout(&recs, 2, 3);
        assert_eq!(grid.occupied(), 6);
        assert_eq!(grid.get(1, 2), Some(&recs[5]));
    }

    #[test]
    fn empty_window_gives_all_empty_cells() {
        let grid = board(&[]);
        assert_eq!(grid.occupied(), 0);
        assert_eq!(grid.rows(), BOARD_ROWS);
        assert_eq!(grid.cols(), BOARD_COLS);
        assert!((0..BOARD_ROWS).all(|r| (0..BOARD_COLS).all(|c| grid.get(r, c).is_none())));
    }

    #[test]
    fn out_of_bounds_lookup_is_none() {
        let recs = records(BOARD_CAPACITY);
        let grid = board(&recs);
        assert_eq!(grid.get(BOARD_ROWS, 0), None);
        assert_eq!(grid.get(0, BOARD_COLS), None);
    }

    #[test]
    fn occupied_cells_report_coordinates() {
        let recs = records(7);
        let grid = board(&recs);
        let coords: Vec<(usize, usize)> = grid.occupied_cells().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(coords.last(), Some(&(0, 1)));
        assert_eq!(coords.len(), 7);
    }
}
