//! Fetch engines
//!
//! [`RowsetFetchEngine`] drives scrollable cursors: it issues scrollable and
//! positioning fetches, fills the rowset window and tracks the row count.
//! [`ForwardFetcher`] drives forward-only cursors, which read blocks of rows
//! in order and never revisit them.

use std::collections::VecDeque;

use crate::constants::FetchOrientation;
use crate::error::{Error, Result};
use crate::row::FetchedRow;
use crate::sensitivity::SensitivityPolicy;
use crate::status::{self, RowStatusBatch, StatusRecord, WarningChain};
use crate::transport::{CursorId, FetchReply, RequestOwner, Transport};
use crate::window::{PositionFlags, RowsetWindow};

/// Row count value meaning "not yet known"
pub const ROW_COUNT_UNKNOWN: i64 = -1;

/// Where the server left a rowset cursor
///
/// NEXT and PRIOR rowset fetches are resolved against the server's current
/// rowset, so the window only stands for it while a fetch put it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPosition {
    /// On the rowset held in the window
    OnWindow,
    /// Before the first row
    BeforeFirst,
    /// After the last row
    AfterLast,
    /// The window moved without a round trip
    Unknown,
}

// =============================================================================
// Rowset Fetch Engine
// =============================================================================

/// Window cache and fetch logic for a scrollable cursor
#[derive(Debug, Clone)]
pub struct RowsetFetchEngine {
    cursor_id: CursorId,
    policy: SensitivityPolicy,
    rowset_cursor: bool,
    fetch_size: u32,
    max_rows: i64,
    has_lob_columns: bool,
    /// Cached rowset
    pub window: RowsetWindow,
    /// Boundary flags
    pub flags: PositionFlags,
    row_count: i64,
    all_rows_received: bool,
    open_on_server: bool,
    termination: Option<StatusRecord>,
    batch: RowStatusBatch,
    /// Highest window offset handed to the application since the last fetch
    highest_visited_offset: i64,
    server_position: ServerPosition,
}

impl RowsetFetchEngine {
    /// Create an engine for a freshly opened cursor
    pub fn new(
        cursor_id: CursorId,
        policy: SensitivityPolicy,
        rowset_cursor: bool,
        fetch_size: u32,
        max_rows: u64,
        has_lob_columns: bool,
    ) -> Self {
        Self {
            cursor_id,
            policy,
            rowset_cursor,
            fetch_size,
            max_rows: max_rows as i64,
            has_lob_columns,
            window: RowsetWindow::new(),
            flags: PositionFlags::default(),
            row_count: ROW_COUNT_UNKNOWN,
            all_rows_received: false,
            open_on_server: true,
            termination: None,
            batch: RowStatusBatch::default(),
            highest_visited_offset: -1,
            server_position: ServerPosition::Unknown,
        }
    }

    /// Caching policy
    pub fn policy(&self) -> SensitivityPolicy {
        self.policy
    }

    /// Server fetches whole rowsets for this cursor
    pub fn is_rowset_cursor(&self) -> bool {
        self.rowset_cursor
    }

    /// Rows per fetch
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Change the rows per fetch; applies from the next fetch on
    pub fn set_fetch_size(&mut self, fetch_size: u32) {
        self.fetch_size = fetch_size;
    }

    /// Maximum rows the cursor may expose (0 = unlimited)
    pub fn max_rows(&self) -> i64 {
        self.max_rows
    }

    /// Known row count, or [`ROW_COUNT_UNKNOWN`]
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    /// Check if the row count still has to be fetched
    pub fn row_count_is_unknown(&self) -> bool {
        self.row_count == ROW_COUNT_UNKNOWN
    }

    /// Last fetch reached the end of the source
    pub fn all_rows_received(&self) -> bool {
        self.all_rows_received
    }

    /// The query is still open on the server
    pub fn is_open_on_server(&self) -> bool {
        self.open_on_server
    }

    /// Mark the query closed on the server
    pub fn mark_closed_on_server(&mut self) {
        self.open_on_server = false;
    }

    /// Take the status the server ended the query with
    pub fn take_termination(&mut self) -> Option<StatusRecord> {
        self.termination.take()
    }

    /// Status batch of the last fetch
    pub fn batch(&self) -> &RowStatusBatch {
        &self.batch
    }

    /// Where the server cursor was last known to be
    pub fn server_position(&self) -> ServerPosition {
        self.server_position
    }

    fn is_dynamic(&self) -> bool {
        self.policy.is_dynamic()
    }

    fn set_row_count_event(&mut self, row_count: i64) {
        if self.row_count_is_unknown() {
            self.row_count = if self.max_rows > 0 {
                row_count.min(self.max_rows)
            } else {
                row_count
            };
        }
    }

    /// Install the block delivered with the open reply
    pub fn absorb_first_block(&mut self, reply: FetchReply, warnings: &mut WarningChain) -> Result<()> {
        self.absorb(reply, warnings)?;
        if self.window.rows_received_in_current_rowset > 0 {
            self.server_position = ServerPosition::OnWindow;
            self.window.adjust_first(self.all_rows_received);
        } else if self.all_rows_received {
            self.set_no_rows_event();
        }
        Ok(())
    }

    fn absorb(&mut self, reply: FetchReply, warnings: &mut WarningChain) -> Result<()> {
        let FetchReply { rows, status } = reply;
        self.window.load(rows);
        self.highest_visited_offset = -1;

        if let Some(warning) = &status.batch_warning {
            if warning.is_end_of_data() {
                self.all_rows_received = true;
            } else {
                status::check(warning, warnings)?;
            }
        }
        if status.end_of_data.is_some() {
            self.all_rows_received = true;
        }
        let terminated = status.query_terminated.clone();
        self.batch = status;

        if let Some(record) = terminated {
            tracing::debug!(cursor_id = self.cursor_id, code = record.code, "query ended by server");
            self.open_on_server = false;
            self.all_rows_received = true;
            self.termination = Some(record);
        }
        Ok(())
    }

    /// One scrollable fetch round trip
    ///
    /// Discards the cached rows and any partial block before the request.
    pub async fn flow_get_rowset(
        &mut self,
        transport: &mut dyn Transport,
        orientation: FetchOrientation,
        row: i64,
        warnings: &mut WarningChain,
    ) -> Result<()> {
        self.all_rows_received = false;
        self.window.clear_rows();
        self.batch = RowStatusBatch::default();

        let cursor_id = self.cursor_id;
        let fetch_size = self.fetch_size;
        transport.begin_request(RequestOwner::Cursor(cursor_id))?;
        let result = async {
            transport.write_scrollable_fetch(cursor_id, orientation, row, fetch_size, true)?;
            transport.send().await?;
            transport.read_scrollable_fetch().await
        }
        .await;
        transport.end_request();
        let reply = result?;

        tracing::trace!(
            cursor_id,
            orientation = ?orientation,
            row,
            rows_received = reply.rows.len(),
            "scrollable fetch"
        );
        self.server_position = if reply.rows.is_empty() {
            ServerPosition::Unknown
        } else {
            ServerPosition::OnWindow
        };
        self.absorb(reply, warnings)
    }

    /// One positioning fetch round trip (no rows)
    pub async fn flow_positioning_fetch(
        &mut self,
        transport: &mut dyn Transport,
        orientation: FetchOrientation,
        row: i64,
        warnings: &mut WarningChain,
    ) -> Result<()> {
        let cursor_id = self.cursor_id;
        transport.begin_request(RequestOwner::Cursor(cursor_id))?;
        let result = async {
            transport.write_positioning_fetch(cursor_id, orientation, row)?;
            transport.send().await?;
            transport.read_positioning_fetch().await
        }
        .await;
        transport.end_request();
        let reply = result?;
        tracing::trace!(cursor_id, orientation = ?orientation, row, "positioning fetch");
        self.server_position = match orientation {
            FetchOrientation::Before => ServerPosition::BeforeFirst,
            FetchOrientation::After => ServerPosition::AfterLast,
            _ => ServerPosition::Unknown,
        };
        status::check(&reply.status, warnings)?;
        if let Some(count) = reply.status.row_count {
            self.set_row_count_event(count as i64);
        }
        Ok(())
    }

    /// Resolve the row count
    ///
    /// Positions the server cursor after the last row to read the total.
    /// A rowset cursor that was inside the result is put back on its rowset
    /// in the same round trip.
    pub async fn get_row_count(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<()> {
        let cursor_id = self.cursor_id;
        let first = self.window.first_row_in_rowset;
        let restore = self.rowset_cursor && self.policy.requires_row_count() && first != 0;

        transport.begin_request(RequestOwner::Cursor(cursor_id))?;
        let result = async {
            transport.write_positioning_fetch(cursor_id, FetchOrientation::After, 0)?;
            if restore {
                transport.write_positioning_fetch(cursor_id, FetchOrientation::Absolute, first)?;
            }
            transport.send().await?;
            let after = transport.read_positioning_fetch().await?;
            let restored = if restore {
                Some(transport.read_positioning_fetch().await?)
            } else {
                None
            };
            Ok::<_, Error>((after, restored))
        }
        .await;
        transport.end_request();
        let (after, restored) = result?;
        self.server_position = if restore {
            ServerPosition::OnWindow
        } else {
            ServerPosition::AfterLast
        };

        status::check(&after.status, warnings)?;
        if let Some(restored) = &restored {
            status::check(&restored.status, warnings)?;
        }
        let count = after.status.row_count.ok_or_else(|| {
            Error::Protocol("AFTER positioning reply carried no row count".to_string())
        })?;
        self.set_row_count_event(count as i64);
        tracing::trace!(cursor_id, row_count = self.row_count, "row count resolved");

        self.window.absolute_position = if restore {
            first
        } else {
            self.row_count + 1
        };
        Ok(())
    }

    /// Check if the result is known to be empty, fetching the count if needed
    pub async fn result_set_contains_no_rows(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.row_count_is_unknown() && self.policy.requires_row_count() {
            self.get_row_count(transport, warnings).await?;
        }
        Ok(self.row_count == 0)
    }

    // =========================================================================
    // Window Events
    // =========================================================================

    /// Window becomes after-last
    pub fn set_rowset_after_last_event(&mut self) {
        self.window.set_after_last(self.row_count);
        self.batch = RowStatusBatch::default();
        self.leave_window();
    }

    /// Window becomes before-first
    pub fn set_rowset_before_first_event(&mut self) {
        self.window.set_before_first();
        self.batch = RowStatusBatch::default();
        self.leave_window();
    }

    fn leave_window(&mut self) {
        if self.server_position == ServerPosition::OnWindow {
            self.server_position = ServerPosition::Unknown;
        }
    }

    /// An empty fetch left the server after the last row
    fn fetched_past_end(&mut self) {
        self.flags.is_after_last = true;
        self.set_rowset_after_last_event();
        self.server_position = ServerPosition::AfterLast;
    }

    /// An empty fetch left the server before the first row
    fn fetched_before_start(&mut self) {
        self.flags.is_before_first = true;
        self.set_rowset_before_first_event();
        self.server_position = ServerPosition::BeforeFirst;
    }

    /// The result is empty
    pub fn set_no_rows_event(&mut self) {
        self.row_count = 0;
        self.window.set_no_rows();
        self.batch = RowStatusBatch::default();
    }

    // =========================================================================
    // Position Queries
    // =========================================================================

    /// The cursor moved past a rowset followed by an end-of-data marker
    /// without a round trip; the window is kept so PRIOR can be served
    /// from it.
    pub fn is_past_end_of_window(&self) -> bool {
        !self.window.is_empty()
            && self.window.rows_received_in_current_rowset > 0
            && self.window.current_row_in_rowset == self.window.rows_received_in_current_rowset
    }

    /// Before the first row
    pub async fn is_before_first(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.is_dynamic() {
            return Ok(self.flags.is_before_first);
        }
        Ok(self.window.current_row_in_rowset == -1
            && !self.result_set_contains_no_rows(transport, warnings).await?)
    }

    /// After the last row
    pub async fn is_after_last(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.is_dynamic() {
            return Ok(self.flags.is_after_last);
        }
        if self.result_set_contains_no_rows(transport, warnings).await? {
            return Ok(false);
        }
        let w = &self.window;
        let after_last_event = w.first_row_in_rowset == 0
            && w.current_row_in_rowset == 0
            && w.last_row_in_rowset == 0
            && w.absolute_position == self.row_count + 1;
        Ok(after_last_event || self.is_past_end_of_window())
    }

    /// On the first row
    pub fn is_first(&self) -> bool {
        if self.is_dynamic() {
            return self.flags.is_first;
        }
        self.window.first_row_in_rowset == 1 && self.window.current_row_in_rowset == 0
    }

    /// On the last row
    pub async fn is_last(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.is_dynamic() {
            return Ok(self.flags.is_last);
        }
        if self.result_set_contains_no_rows(transport, warnings).await? {
            return Ok(false);
        }
        Ok(self.window.current_row_number() == self.row_count)
    }

    /// The server cursor is known to sit before the first row
    pub async fn is_server_position_before_first(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.rowset_cursor {
            return Ok(self.server_position == ServerPosition::BeforeFirst);
        }
        Ok(self.is_before_first(transport, warnings).await?
            && self.window.first_row_in_rowset == 0
            && self.window.last_row_in_rowset == 0
            && self.window.absolute_position == 0)
    }

    /// The server cursor is known to sit after the last row
    pub fn is_server_position_after_last(&self) -> bool {
        if self.rowset_cursor {
            return self.server_position == ServerPosition::AfterLast;
        }
        self.window.absolute_position == self.row_count + 1
    }

    /// Run the per-row status check for the current row
    pub fn check_current_row_status(&self, warnings: &mut WarningChain) -> Result<()> {
        let current = self.window.current_row_in_rowset;
        if current >= 0 {
            self.batch.check_row(current as usize, warnings)?;
        }
        Ok(())
    }

    // =========================================================================
    // Rowset Fetches
    // =========================================================================

    /// Fetch the rowset after the window; false when past the end
    pub async fn get_next_rowset(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.rowset_cursor || self.is_dynamic() {
            if !self.is_dynamic()
                && self.window.is_empty()
                && self.window.current_row_in_rowset == -1
                && self.server_position != ServerPosition::BeforeFirst
            {
                tracing::trace!(cursor_id = self.cursor_id, "server not before first, fetching row 1");
                return self.get_first_rowset(transport, warnings).await;
            }
            let next_offset = self.window.current_row_in_rowset + 1;
            if next_offset >= self.window.rows_received_in_current_rowset
                && self.batch.reached_end()
            {
                tracing::trace!(cursor_id = self.cursor_id, "end of data already received");
                self.flags.is_after_last = true;
                if !self.is_dynamic() {
                    let last = self.window.last_row_in_rowset;
                    self.set_row_count_event(last);
                }
                self.window.current_row_in_rowset = self.window.rows_received_in_current_rowset;
                return Ok(false);
            }
            let last_before_fetch = self.window.last_row_in_rowset;
            self.flow_get_rowset(transport, FetchOrientation::Next, 0, warnings)
                .await?;
            if self.window.rows_received_in_current_rowset == 0 && self.all_rows_received {
                if !self.is_dynamic() {
                    self.set_row_count_event(last_before_fetch);
                }
                self.fetched_past_end();
                return Ok(false);
            }
        } else {
            if self.result_set_contains_no_rows(transport, warnings).await?
                || self.is_after_last(transport, warnings).await?
            {
                return Ok(false);
            }
            if self.window.current_row_number() == self.window.last_row_in_rowset
                && self.all_rows_received
            {
                self.flags.is_after_last = true;
                self.set_rowset_after_last_event();
                return Ok(false);
            }

            let last = self.window.last_row_in_rowset;
            let position = self.window.absolute_position;
            let (orientation, row) = if position < last {
                self.window.absolute_position = last;
                (FetchOrientation::Relative, last - position + 1)
            } else if position > last {
                (FetchOrientation::Absolute, last + 1)
            } else {
                (FetchOrientation::Relative, 1)
            };
            self.flow_get_rowset(transport, orientation, row, warnings).await?;
            if self.window.rows_received_in_current_rowset == 0 && self.all_rows_received {
                self.fetched_past_end();
                return Ok(false);
            }
        }

        if !self.is_dynamic() {
            self.window.adjust_next(self.all_rows_received);
        }
        self.window.current_row_in_rowset = 0;
        Ok(true)
    }

    /// Fetch the rowset before the window; false when before the start
    pub async fn get_previous_rowset(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        let mut orientation = FetchOrientation::Relative;
        let mut row = 0;
        let mut was_after_last = false;

        if self.rowset_cursor || self.is_dynamic() {
            if !self.is_dynamic() {
                if self.window.current_row_in_rowset == -1 {
                    self.flags.is_before_first = true;
                    return Ok(false);
                }
                if self.is_past_end_of_window() || self.is_after_last(transport, warnings).await? {
                    let last = self.row_count;
                    return self.get_last_rowset(transport, last, warnings).await;
                }
            }
            if self.window.current_row_in_rowset == 0 && self.batch.reached_start() {
                tracing::trace!(cursor_id = self.cursor_id, "start of result already reached");
                self.flags.is_before_first = true;
                self.set_rowset_before_first_event();
                return Ok(false);
            }
            orientation = FetchOrientation::Prior;
            self.flow_get_rowset(transport, orientation, 0, warnings).await?;
        } else {
            if self.result_set_contains_no_rows(transport, warnings).await?
                || self.is_before_first(transport, warnings).await?
            {
                return Ok(false);
            }
            let fetch_size = self.fetch_size as i64;
            let position = self.window.absolute_position;
            row = self.window.first_row_in_rowset - position - fetch_size;
            was_after_last = self.is_after_last(transport, warnings).await?;
            if self.is_first() {
                row = 0;
                orientation = FetchOrientation::Absolute;
            } else if was_after_last {
                row = -fetch_size;
            }
            if -row >= position {
                row = 1;
                orientation = FetchOrientation::Absolute;
            }
            self.flow_get_rowset(transport, orientation, row, warnings).await?;
        }

        if self.window.rows_received_in_current_rowset == 0 && self.all_rows_received {
            self.fetched_before_start();
            return Ok(false);
        }
        if self.is_dynamic() {
            self.window.current_row_in_rowset = self.window.rows_received_in_current_rowset - 1;
        } else {
            self.window
                .adjust_previous(orientation, row, was_after_last, self.row_count);
        }
        Ok(true)
    }

    /// Fetch the rowset starting at an absolute row
    pub async fn get_absolute_rowset(
        &mut self,
        transport: &mut dyn Transport,
        row: i64,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        let mut row = row;
        let mut orientation = FetchOrientation::Absolute;
        if self.rowset_cursor && row == 0 {
            orientation = FetchOrientation::Before;
        } else if !self.is_dynamic() && row < 0 {
            row = 0;
        }

        self.flow_get_rowset(transport, orientation, row, warnings).await?;
        if (self.window.rows_received_in_current_rowset == 0 && self.all_rows_received)
            || orientation == FetchOrientation::Before
        {
            if row > 0 {
                self.fetched_past_end();
            } else {
                self.fetched_before_start();
            }
            return Ok(false);
        }
        if !self.is_dynamic() {
            self.window.adjust_absolute(row, self.all_rows_received);
        }
        self.window.current_row_in_rowset = 0;
        Ok(true)
    }

    /// Fetch the rowset `rows` away from the server position
    pub async fn get_relative_rowset(
        &mut self,
        transport: &mut dyn Transport,
        rows: i64,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if rows == 0
            && (self.all_rows_received || self.window.absolute_position > self.row_count)
        {
            self.set_rowset_after_last_event();
            self.flags.is_after_last = true;
            return Ok(false);
        }

        self.flow_get_rowset(transport, FetchOrientation::Relative, rows, warnings)
            .await?;
        if self.window.rows_received_in_current_rowset == 0 && self.all_rows_received {
            if rows > 0 {
                self.fetched_past_end();
            } else {
                self.fetched_before_start();
            }
            return Ok(false);
        }
        if !self.is_dynamic() {
            self.window.adjust_relative(rows, self.all_rows_received);
        }
        self.window.current_row_in_rowset = 0;
        Ok(true)
    }

    /// Fetch the first rowset
    pub async fn get_first_rowset(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        self.flow_get_rowset(transport, FetchOrientation::Absolute, 1, warnings)
            .await?;
        if self.window.rows_received_in_current_rowset == 0 && self.all_rows_received {
            self.flags.reset();
            self.set_no_rows_event();
            return Ok(false);
        }
        if !self.is_dynamic() {
            self.window.adjust_first(self.all_rows_received);
        }
        self.window.current_row_in_rowset = 0;
        Ok(true)
    }

    /// Fetch the rowset ending at `row` (the effective last row)
    pub async fn get_last_rowset(
        &mut self,
        transport: &mut dyn Transport,
        row: i64,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if !self.is_dynamic() && self.row_count == 0 {
            self.flags.is_after_last = false;
            self.flags.is_before_first = false;
            self.set_no_rows_event();
            return Ok(false);
        }
        if self.rowset_cursor || self.is_dynamic() {
            self.flow_get_rowset(transport, FetchOrientation::Last, 0, warnings)
                .await?;
        } else {
            let fetch_size = self.fetch_size as i64;
            let start = if fetch_size < row { -fetch_size } else { 1 };
            self.flow_get_rowset(transport, FetchOrientation::Absolute, start, warnings)
                .await?;
        }

        if self.window.rows_received_in_current_rowset == 0 && self.all_rows_received {
            self.fetched_past_end();
            return Ok(false);
        }
        if self.is_dynamic() {
            self.window.current_row_in_rowset = self.window.rows_received_in_current_rowset - 1;
        } else {
            self.window.adjust_last(row, self.all_rows_received);
        }
        Ok(true)
    }

    /// Refetch the current rowset
    pub async fn get_refresh_rowset(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.rowset_cursor {
            self.flow_get_rowset(transport, FetchOrientation::Current, 0, warnings)
                .await?;
        } else {
            let back = -(self.window.absolute_position - self.window.first_row_in_rowset);
            self.flow_get_rowset(transport, FetchOrientation::Relative, back, warnings)
                .await?;
        }
        if !self.is_dynamic() {
            self.window.adjust_refresh(self.all_rows_received);
        }
        Ok(true)
    }

    /// Stop serving any cached row; the locators they carry are gone
    pub fn expire_window(&mut self) {
        self.highest_visited_offset = self.window.rows_received_in_current_rowset - 1;
    }

    /// Record that the current row was handed to the application
    pub fn note_visit(&mut self) {
        self.highest_visited_offset = self
            .highest_visited_offset
            .max(self.window.current_row_in_rowset);
    }

    /// Check whether a move can be served from the window
    ///
    /// Rows of a LOB result that were never visited since they were fetched
    /// still carry valid locators, so moving onto them needs no round trip.
    pub fn is_row_in_window(&self, target: i64, orientation: FetchOrientation) -> bool {
        if self.has_lob_columns && !self.is_dynamic() && self.window.contains(target) {
            return target - self.window.first_row_in_rowset > self.highest_visited_offset;
        }
        self.policy.is_row_in_window(
            &self.window,
            target,
            orientation,
            &self.flags,
            self.has_lob_columns,
        )
    }
}

// =============================================================================
// Forward Fetcher
// =============================================================================

/// Block reader for forward-only cursors
#[derive(Debug, Clone)]
pub struct ForwardFetcher {
    cursor_id: CursorId,
    fetch_size: u32,
    buffer: VecDeque<FetchedRow>,
    current: Option<FetchedRow>,
    rows_read: i64,
    all_rows_received: bool,
    open_on_server: bool,
    termination: Option<StatusRecord>,
}

impl ForwardFetcher {
    /// Create a fetcher for a freshly opened cursor
    pub fn new(cursor_id: CursorId, fetch_size: u32) -> Self {
        Self {
            cursor_id,
            fetch_size,
            buffer: VecDeque::new(),
            current: None,
            rows_read: 0,
            all_rows_received: false,
            open_on_server: true,
            termination: None,
        }
    }

    /// Rows per fetch
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Change the rows per fetch; applies from the next fetch on
    pub fn set_fetch_size(&mut self, fetch_size: u32) {
        self.fetch_size = fetch_size;
    }

    /// Rows handed out so far
    pub fn rows_read(&self) -> i64 {
        self.rows_read
    }

    /// The server has sent its last row
    pub fn all_rows_received(&self) -> bool {
        self.all_rows_received
    }

    /// The query is still open on the server
    pub fn is_open_on_server(&self) -> bool {
        self.open_on_server
    }

    /// Mark the query closed on the server
    pub fn mark_closed_on_server(&mut self) {
        self.open_on_server = false;
    }

    /// Take the status the server ended the query with
    pub fn take_termination(&mut self) -> Option<StatusRecord> {
        self.termination.take()
    }

    /// Current row, if positioned on one
    pub fn current_row(&self) -> Option<&FetchedRow> {
        self.current.as_ref()
    }

    /// Mutable current row
    pub fn current_row_mut(&mut self) -> Option<&mut FetchedRow> {
        self.current.as_mut()
    }

    /// Row number of the current row; 0 once the cursor ran off the end
    pub fn get_row(&self) -> i64 {
        if self.all_rows_received && self.current.is_none() && self.buffer.is_empty() {
            0
        } else {
            self.rows_read
        }
    }

    /// Install a block of rows
    pub fn absorb(&mut self, reply: FetchReply, warnings: &mut WarningChain) -> Result<()> {
        let FetchReply { rows, status } = reply;
        tracing::trace!(cursor_id = self.cursor_id, rows = rows.len(), "forward fetch block");
        self.buffer.extend(rows);

        if let Some(warning) = &status.batch_warning {
            status::check(warning, warnings)?;
        }
        if status.end_of_data.is_some() {
            self.all_rows_received = true;
        }
        if let Some(record) = status.query_terminated {
            tracing::debug!(cursor_id = self.cursor_id, code = record.code, "query ended by server");
            self.open_on_server = false;
            self.all_rows_received = true;
            self.termination = Some(record);
        }
        Ok(())
    }

    /// Advance one row, fetching the next block when the buffer runs dry
    pub async fn next(
        &mut self,
        transport: &mut dyn Transport,
        warnings: &mut WarningChain,
    ) -> Result<bool> {
        if self.buffer.is_empty() && !self.all_rows_received && self.open_on_server {
            let cursor_id = self.cursor_id;
            let fetch_size = self.fetch_size;
            transport.begin_request(RequestOwner::Cursor(cursor_id))?;
            let result = async {
                transport.write_fetch(cursor_id, fetch_size)?;
                transport.send().await?;
                transport.read_fetch().await
            }
            .await;
            transport.end_request();
            self.absorb(result?, warnings)?;
        }

        match self.buffer.pop_front() {
            Some(row) => {
                self.current = Some(row);
                self.rows_read += 1;
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Forget the current row (it is no longer addressable)
    pub fn clear_current(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Row, Value};

    fn reply(rows: usize, end: bool) -> FetchReply {
        FetchReply {
            rows: (0..rows)
                .map(|i| FetchedRow::new(Row::new(vec![Value::Integer(i as i64)])))
                .collect(),
            status: RowStatusBatch {
                end_of_data: end.then(StatusRecord::end_of_data),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_first_block_sets_window() {
        let mut engine = RowsetFetchEngine::new(1, SensitivityPolicy::Insensitive, true, 3, 0, false);
        let mut warnings = WarningChain::new();
        engine.absorb_first_block(reply(3, false), &mut warnings).unwrap();
        assert_eq!(engine.window.first_row_in_rowset, 1);
        assert_eq!(engine.window.last_row_in_rowset, 3);
        assert_eq!(engine.window.current_row_in_rowset, -1);
        assert!(engine.row_count_is_unknown());
        assert!(engine.is_row_in_window(1, FetchOrientation::Next));
    }

    #[test]
    fn test_empty_first_block_is_no_rows() {
        let mut engine = RowsetFetchEngine::new(1, SensitivityPolicy::Insensitive, true, 3, 0, false);
        let mut warnings = WarningChain::new();
        engine.absorb_first_block(reply(0, true), &mut warnings).unwrap();
        assert_eq!(engine.row_count(), 0);
        assert!(engine.window.is_empty());
    }

    #[test]
    fn test_termination_is_recorded() {
        let mut engine = RowsetFetchEngine::new(1, SensitivityPolicy::Insensitive, true, 3, 0, false);
        let mut warnings = WarningChain::new();
        let mut terminated = reply(0, false);
        terminated.status.query_terminated = Some(StatusRecord::with_message(-1, "killed"));
        engine.absorb_first_block(terminated, &mut warnings).unwrap();
        assert!(!engine.is_open_on_server());
        assert!(engine.all_rows_received());
        assert_eq!(engine.take_termination().map(|t| t.code), Some(-1));
        assert!(engine.take_termination().is_none());
    }

    #[test]
    fn test_row_count_clipped_to_max_rows() {
        let mut engine = RowsetFetchEngine::new(1, SensitivityPolicy::Insensitive, false, 3, 4, false);
        engine.set_row_count_event(10);
        assert_eq!(engine.row_count(), 4);
        engine.set_row_count_event(2);
        assert_eq!(engine.row_count(), 4);
    }

    #[test]
    fn test_forward_get_row_after_exhaustion() {
        let mut fetcher = ForwardFetcher::new(1, 10);
        let mut warnings = WarningChain::new();
        fetcher.absorb(reply(2, true), &mut warnings).unwrap();
        assert_eq!(fetcher.get_row(), 0);

        fetcher.current = fetcher.buffer.pop_front();
        fetcher.rows_read = 1;
        assert_eq!(fetcher.get_row(), 1);
    }
}
