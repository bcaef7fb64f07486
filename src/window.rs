//! Rowset window bookkeeping
//!
//! A scrollable cursor caches the rows of the last rowset it fetched. The
//! window records which absolute rows those are, which cached row the
//! cursor is on, and where the server-side cursor was left.

use crate::constants::FetchOrientation;
use crate::row::FetchedRow;

/// The cached rowset and the cursor's offset into it
///
/// Row numbers are 1-based absolute row numbers. `first_row_in_rowset ==
/// last_row_in_rowset == 0` means the window is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowsetWindow {
    /// Absolute number of the first cached row
    pub first_row_in_rowset: i64,
    /// Absolute number of the last cached row
    pub last_row_in_rowset: i64,
    /// Rows returned by the last fetch
    pub rows_received_in_current_rowset: i64,
    /// Offset of the current row from `first_row_in_rowset` (-1 = before window)
    pub current_row_in_rowset: i64,
    /// Row the server-side cursor is positioned on
    pub absolute_position: i64,
    rows: Vec<FetchedRow>,
}

impl RowsetWindow {
    /// An empty window positioned before the first row
    pub fn new() -> Self {
        Self {
            current_row_in_rowset: -1,
            ..Default::default()
        }
    }

    /// Check if no rows are cached
    pub fn is_empty(&self) -> bool {
        self.first_row_in_rowset == 0 && self.last_row_in_rowset == 0
    }

    /// Check if an absolute row number is cached
    pub fn contains(&self, row_number: i64) -> bool {
        !self.is_empty()
            && row_number >= self.first_row_in_rowset
            && row_number <= self.last_row_in_rowset
    }

    /// Absolute number of the current row
    pub fn current_row_number(&self) -> i64 {
        self.first_row_in_rowset + self.current_row_in_rowset
    }

    /// Cached rows
    pub fn rows(&self) -> &[FetchedRow] {
        &self.rows
    }

    /// Drop cached rows before a new fetch
    pub fn clear_rows(&mut self) {
        self.rows.clear();
        self.rows_received_in_current_rowset = 0;
    }

    /// Install the rows returned by a fetch
    pub fn load(&mut self, rows: Vec<FetchedRow>) {
        self.rows_received_in_current_rowset = rows.len() as i64;
        self.rows = rows;
    }

    /// The cached row the cursor is on
    pub fn current_row(&self) -> Option<&FetchedRow> {
        if self.current_row_in_rowset < 0 {
            return None;
        }
        self.rows.get(self.current_row_in_rowset as usize)
    }

    /// Mutable access to the cached row the cursor is on
    pub fn current_row_mut(&mut self) -> Option<&mut FetchedRow> {
        if self.current_row_in_rowset < 0 {
            return None;
        }
        self.rows.get_mut(self.current_row_in_rowset as usize)
    }

    /// Mark the current cache slot as deleted
    pub fn mark_hole(&mut self) {
        if let Some(row) = self.current_row_mut() {
            let columns = row.row.len();
            *row = FetchedRow::hole(columns);
        }
    }

    // =========================================================================
    // Window Events
    // =========================================================================

    /// Position after the last row
    ///
    /// `row_count` is the effective count, already clipped to max rows.
    pub fn set_after_last(&mut self, row_count: i64) {
        self.first_row_in_rowset = 0;
        self.last_row_in_rowset = 0;
        self.absolute_position = row_count + 1;
        self.current_row_in_rowset = 0;
        self.clear_rows();
    }

    /// Position before the first row
    pub fn set_before_first(&mut self) {
        self.first_row_in_rowset = 0;
        self.last_row_in_rowset = 0;
        self.absolute_position = 0;
        self.current_row_in_rowset = -1;
        self.clear_rows();
    }

    /// The result turned out to be empty
    pub fn set_no_rows(&mut self) {
        self.set_before_first();
    }

    // =========================================================================
    // Adjustments After a Fetch
    // =========================================================================

    /// Server position after a fetch: one past the window if the source is
    /// exhausted, otherwise the last row returned
    pub fn set_absolute_position_based_on_all_rows_received(&mut self, all_rows_received: bool) {
        self.absolute_position = if all_rows_received {
            self.last_row_in_rowset + 1
        } else {
            self.last_row_in_rowset
        };
    }

    /// After a NEXT fetch
    pub fn adjust_next(&mut self, all_rows_received: bool) {
        self.first_row_in_rowset = self.last_row_in_rowset + 1;
        self.last_row_in_rowset += self.rows_received_in_current_rowset;
        self.set_absolute_position_based_on_all_rows_received(all_rows_received);
    }

    /// After a backward fetch
    ///
    /// An ABSOLUTE 1 fetch means the rowset was clipped at the start of the
    /// result; the current row is recomputed from where the cursor came from.
    pub fn adjust_previous(
        &mut self,
        orientation: FetchOrientation,
        row_number: i64,
        was_after_last: bool,
        row_count: i64,
    ) {
        if orientation == FetchOrientation::Absolute && row_number == 1 {
            self.current_row_in_rowset = if was_after_last {
                self.absolute_position - 2
            } else {
                self.first_row_in_rowset - 2
            };
            self.first_row_in_rowset = 1;
            self.last_row_in_rowset = self.rows_received_in_current_rowset;
            self.absolute_position = if was_after_last {
                self.last_row_in_rowset + 1
            } else {
                self.last_row_in_rowset
            };
        } else {
            self.last_row_in_rowset = if was_after_last {
                row_count
            } else {
                self.first_row_in_rowset - 1
            };
            self.first_row_in_rowset =
                self.last_row_in_rowset - self.rows_received_in_current_rowset + 1;
            self.absolute_position = self.last_row_in_rowset;
            self.current_row_in_rowset = self.last_row_in_rowset - self.first_row_in_rowset;
        }
    }

    /// After an ABSOLUTE fetch
    pub fn adjust_absolute(&mut self, row_number: i64, all_rows_received: bool) {
        self.first_row_in_rowset = row_number;
        self.last_row_in_rowset = row_number + self.rows_received_in_current_rowset - 1;
        self.set_absolute_position_based_on_all_rows_received(all_rows_received);
    }

    /// After a RELATIVE fetch from the server position
    pub fn adjust_relative(&mut self, offset: i64, all_rows_received: bool) {
        self.first_row_in_rowset = self.absolute_position + offset;
        self.last_row_in_rowset = self.first_row_in_rowset + self.rows_received_in_current_rowset - 1;
        self.set_absolute_position_based_on_all_rows_received(all_rows_received);
    }

    /// After a FIRST fetch (or the block returned at open)
    pub fn adjust_first(&mut self, all_rows_received: bool) {
        self.first_row_in_rowset = 1;
        self.last_row_in_rowset = self.rows_received_in_current_rowset;
        self.set_absolute_position_based_on_all_rows_received(all_rows_received);
    }

    /// After a LAST fetch ending at `row`
    pub fn adjust_last(&mut self, row: i64, all_rows_received: bool) {
        self.last_row_in_rowset = row;
        self.first_row_in_rowset = (row - self.rows_received_in_current_rowset + 1).max(1);
        self.set_absolute_position_based_on_all_rows_received(all_rows_received);
        self.current_row_in_rowset = self.last_row_in_rowset - self.first_row_in_rowset;
    }

    /// After refetching the current rowset
    pub fn adjust_refresh(&mut self, all_rows_received: bool) {
        self.set_absolute_position_based_on_all_rows_received(all_rows_received);
    }
}

/// Terminal and boundary flags maintained by navigation
///
/// Sensitive dynamic cursors rely on these directly; the other kinds derive
/// their position from the window and the row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionFlags {
    /// Cursor is before the first row
    pub is_before_first: bool,
    /// Cursor is after the last row
    pub is_after_last: bool,
    /// Cursor is on the first row
    pub is_first: bool,
    /// Cursor is on the last row
    pub is_last: bool,
}

impl PositionFlags {
    /// Clear all flags
    pub fn reset(&mut self) {
        *self = PositionFlags::default();
    }
}
