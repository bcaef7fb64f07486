//! Client-side cursor state
//!
//! [`CursorState`] is everything the client knows about one open result:
//! the fetch engine that owns the cached rows, the boundary flags, pending
//! column updates, positioned statements and tracked LOB locators. Every
//! operation takes the transport it may use for round trips; the
//! connection serializes access by holding its lock for the whole call.
//!
//! Navigation follows the same outline for every move: leave the insert
//! row, drop pending updates, release locators of the row being left, then
//! try to serve the move from the window before asking the server.

use crate::config::{validate_fetch_size, CursorOptions, StatementContext};
use crate::constants::{
    Concurrency, FetchDirection, FetchOrientation, ResultSetType, DEFAULT_FETCH_SIZE,
};
use crate::error::{Error, Result};
use crate::fetch::{ForwardFetcher, RowsetFetchEngine};
use crate::lob::LobLocatorTracker;
use crate::metadata::ResultMetadata;
use crate::positioned::PositionedStatementSet;
use crate::registry::{BoundaryOutcome, UnitOfWorkListener};
use crate::row::{FetchedRow, Value};
use crate::sensitivity::SensitivityPolicy;
use crate::status::{self, Completion, Warning, WarningChain};
use crate::transport::{CursorId, OpenQueryReply, OpenQueryRequest, RequestOwner, Transport};
use crate::updates::UpdatedColumnSet;

/// How rows are traversed
#[derive(Debug, Clone)]
pub(crate) enum Traversal {
    /// Forward-only block reader
    Forward(ForwardFetcher),
    /// Scrollable rowset window
    Windowed(RowsetFetchEngine),
}

/// Which row the cursor addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowMode {
    OnCurrentRow,
    OnInsertRow,
}

/// A cached row that may not be handed out again and must be refetched
/// where it is, rather than with a NEXT or PRIOR rowset fetch
fn stale_cached_row(engine: &RowsetFetchEngine, target: i64, hit: bool) -> Option<i64> {
    let stale = !hit && !engine.policy().is_dynamic() && engine.window.contains(target);
    stale.then_some(target)
}

fn current_row_of(traversal: &Traversal) -> Option<&FetchedRow> {
    match traversal {
        Traversal::Forward(fetcher) => fetcher.current_row(),
        Traversal::Windowed(engine) => engine.window.current_row(),
    }
}

/// State of one open cursor
#[derive(Debug)]
pub struct CursorState {
    pub(crate) id: CursorId,
    pub(crate) name: String,
    pub(crate) metadata: ResultMetadata,
    pub(crate) result_set_type: ResultSetType,
    pub(crate) concurrency: Concurrency,
    pub(crate) context: StatementContext,
    pub(crate) traversal: Traversal,
    pub(crate) open_on_client: bool,
    pub(crate) is_valid_cursor_position: bool,
    pub(crate) saved_valid_position: bool,
    pub(crate) row_mode: RowMode,
    pub(crate) updates: UpdatedColumnSet,
    pub(crate) update_row_called: bool,
    pub(crate) statements: PositionedStatementSet,
    pub(crate) lobs: LobLocatorTracker,
    pub(crate) lob_accessed: Vec<usize>,
    pub(crate) warnings: WarningChain,
    pub(crate) auto_committed: bool,
    pub(crate) unpositioned_on_server: bool,
    pub(crate) commit_requested: bool,
    fetch_direction: FetchDirection,
}

impl CursorState {
    /// Open a query and build the cursor from the reply
    pub async fn open(
        transport: &mut dyn Transport,
        sql: &str,
        options: &CursorOptions,
        context: StatementContext,
        lob_locators: bool,
    ) -> Result<Self> {
        let request = OpenQueryRequest {
            sql: sql.to_string(),
            result_set_type: options.result_set_type,
            concurrency: options.concurrency,
            sensitivity: options.sensitivity,
            holdability: context.holdability,
            fetch_size: context.fetch_size,
            max_rows: context.max_rows,
            lob_locators,
        };

        transport.begin_request(RequestOwner::Connection)?;
        let result = async {
            transport.write_open_query(&request)?;
            transport.send().await?;
            transport.read_open_query().await
        }
        .await;
        transport.end_request();

        Self::from_reply(result?, options, context)
    }

    fn from_reply(
        reply: OpenQueryReply,
        options: &CursorOptions,
        context: StatementContext,
    ) -> Result<Self> {
        let metadata = ResultMetadata::new(reply.columns);
        let policy = SensitivityPolicy::for_cursor(options.result_set_type, reply.sensitivity);
        let mut warnings = WarningChain::new();

        let traversal = if options.result_set_type.is_scrollable() {
            let mut engine = RowsetFetchEngine::new(
                reply.cursor_id,
                policy,
                reply.rowset_cursor,
                context.fetch_size,
                context.max_rows,
                metadata.has_lob_columns(),
            );
            engine.absorb_first_block(reply.first_block, &mut warnings)?;
            engine.flags.is_before_first = true;
            Traversal::Windowed(engine)
        } else {
            let mut fetcher = ForwardFetcher::new(reply.cursor_id, context.fetch_size);
            fetcher.absorb(reply.first_block, &mut warnings)?;
            Traversal::Forward(fetcher)
        };

        tracing::debug!(
            cursor_id = reply.cursor_id,
            cursor_name = %reply.cursor_name,
            result_set_type = ?options.result_set_type,
            policy = ?policy,
            rowset = reply.rowset_cursor,
            fetch_size = context.fetch_size,
            "cursor opened"
        );

        let mut cursor = Self {
            id: reply.cursor_id,
            name: reply.cursor_name,
            updates: UpdatedColumnSet::new(metadata.column_count()),
            lobs: LobLocatorTracker::for_result(&metadata, reply.locators_enabled),
            metadata,
            result_set_type: options.result_set_type,
            concurrency: options.concurrency,
            context,
            traversal,
            open_on_client: true,
            is_valid_cursor_position: false,
            saved_valid_position: false,
            row_mode: RowMode::OnCurrentRow,
            update_row_called: false,
            statements: PositionedStatementSet::new(),
            lob_accessed: Vec::new(),
            warnings,
            auto_committed: false,
            unpositioned_on_server: false,
            commit_requested: false,
            fetch_direction: FetchDirection::Forward,
        };
        if matches!(cursor.traversal, Traversal::Windowed(_)) {
            cursor.check_received_termination()?;
        }
        Ok(cursor)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Server cursor id
    pub fn id(&self) -> CursorId {
        self.id
    }

    /// Cursor name used by positioned statements
    pub fn cursor_name(&self) -> &str {
        &self.name
    }

    /// Column descriptions
    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    /// Scrollability
    pub fn result_set_type(&self) -> ResultSetType {
        self.result_set_type
    }

    /// Concurrency
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Caching policy in effect
    pub fn policy(&self) -> SensitivityPolicy {
        match &self.traversal {
            Traversal::Forward(_) => SensitivityPolicy::ForwardOnly,
            Traversal::Windowed(engine) => engine.policy(),
        }
    }

    /// Check if the cursor is closed on the client
    pub fn is_closed(&self) -> bool {
        !self.open_on_client
    }

    /// Check if the query is still open on the server
    pub fn is_open_on_server(&self) -> bool {
        match &self.traversal {
            Traversal::Forward(fetcher) => fetcher.is_open_on_server(),
            Traversal::Windowed(engine) => engine.is_open_on_server(),
        }
    }

    /// Resolved settings
    pub fn context(&self) -> &StatementContext {
        &self.context
    }

    /// Follow a connection auto-commit change
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.context.auto_commit = auto_commit;
    }

    /// Take a pending auto-commit request raised by this cursor
    pub fn take_commit_request(&mut self) -> bool {
        std::mem::take(&mut self.commit_requested)
    }

    /// Warnings collected since the last move
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.to_vec()
    }

    /// Drop collected warnings
    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// Current fetch direction hint
    pub fn fetch_direction(&self) -> FetchDirection {
        self.fetch_direction
    }

    /// Current fetch size
    pub fn fetch_size(&self) -> u32 {
        match &self.traversal {
            Traversal::Forward(fetcher) => fetcher.fetch_size(),
            Traversal::Windowed(engine) => engine.fetch_size(),
        }
    }

    pub(crate) fn is_updatable(&self) -> bool {
        self.concurrency == Concurrency::Updatable
    }

    pub(crate) fn is_dynamic(&self) -> bool {
        self.policy().is_dynamic()
    }

    pub(crate) fn current_fetched_row(&self) -> Option<&FetchedRow> {
        current_row_of(&self.traversal)
    }

    // =========================================================================
    // Preconditions
    // =========================================================================

    pub(crate) fn check_open(&self, operation: &str) -> Result<()> {
        if self.open_on_client {
            Ok(())
        } else {
            Err(Error::ClosedResultSet(operation.to_string()))
        }
    }

    fn check_scrollable(&self, operation: &str) -> Result<()> {
        self.check_open(operation)?;
        if self.result_set_type.is_scrollable() {
            Ok(())
        } else {
            Err(Error::NotScrollable)
        }
    }

    pub(crate) fn check_updatable(&self, operation: &str) -> Result<()> {
        self.check_open(operation)?;
        if self.is_updatable() {
            Ok(())
        } else {
            Err(Error::NotUpdatable(operation.to_string()))
        }
    }

    fn engine(&mut self) -> Result<(&mut RowsetFetchEngine, &mut WarningChain)> {
        match &mut self.traversal {
            Traversal::Windowed(engine) => Ok((engine, &mut self.warnings)),
            Traversal::Forward(_) => Err(Error::NotScrollable),
        }
    }

    /// Act on a termination status delivered with the last fetch
    ///
    /// A negative code closes the cursor before the error is raised.
    fn check_received_termination(&mut self) -> Result<()> {
        let termination = match &mut self.traversal {
            Traversal::Forward(fetcher) => fetcher.take_termination(),
            Traversal::Windowed(engine) => engine.take_termination(),
        };
        match termination.as_ref().map(status::interpret) {
            Some(Completion::Error(record)) => {
                tracing::warn!(cursor_id = self.id, code = record.code, "query terminated by server");
                self.mark_closed();
                Err(Error::server_terminated(&record))
            }
            Some(Completion::Warning(record)) => {
                self.warnings.push(record);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close locally without a round trip
    pub(crate) fn mark_closed(&mut self) {
        if !self.open_on_client {
            return;
        }
        self.open_on_client = false;
        self.is_valid_cursor_position = false;
        match &mut self.traversal {
            Traversal::Forward(fetcher) => {
                fetcher.clear_current();
                fetcher.mark_closed_on_server();
            }
            Traversal::Windowed(engine) => {
                engine.window.clear_rows();
                engine.mark_closed_on_server();
            }
        }
        self.statements.tear_down();
        self.lobs.discard_all();
        self.updates.reset();
        tracing::debug!(cursor_id = self.id, "cursor closed");
    }

    fn request_commit(&mut self) {
        if self.context.auto_commit && !self.auto_committed {
            self.commit_requested = true;
        }
    }

    /// Close the cursor
    ///
    /// A cursor still open on the server is closed together with the
    /// auto-commit in one round trip. Returns `true` when a commit was
    /// flowed.
    pub async fn close(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        if !self.open_on_client {
            return Ok(false);
        }
        let owner = RequestOwner::Cursor(self.id);
        let released = self.lobs.release_unpublished(transport, owner).await;

        let mut committed = false;
        if self.is_open_on_server() {
            let commit = self.context.auto_commit && !self.auto_committed;
            let id = self.id;
            transport.begin_request(owner)?;
            let result = async {
                transport.write_cursor_close(id)?;
                if commit {
                    transport.write_commit()?;
                }
                transport.send().await?;
                let closed = transport.read_cursor_close().await?;
                let commit_status = if commit {
                    Some(transport.read_commit().await?)
                } else {
                    None
                };
                Ok::<_, Error>((closed, commit_status))
            }
            .await;
            transport.end_request();

            let (closed, commit_status) = match result {
                Ok(replies) => replies,
                Err(e) => {
                    self.mark_closed();
                    return Err(e);
                }
            };
            self.mark_closed();
            if let Some(commit_status) = commit_status {
                status::check(&commit_status, &mut self.warnings)?;
                self.auto_committed = true;
                committed = true;
            }
            // the server may already have closed it
            if closed.is_error() {
                tracing::debug!(cursor_id = id, code = closed.code, "server cursor already closed");
            }
        } else {
            self.request_commit();
            self.mark_closed();
        }
        released?;
        Ok(committed)
    }

    // =========================================================================
    // Move Preparation
    // =========================================================================

    fn leave_insert_row(&mut self) {
        if self.row_mode == RowMode::OnInsertRow {
            self.row_mode = RowMode::OnCurrentRow;
            self.is_valid_cursor_position = self.saved_valid_position;
        }
    }

    async fn prepare_move(&mut self, transport: &mut dyn Transport) -> Result<()> {
        self.warnings.clear();
        self.leave_insert_row();
        self.updates.reset();
        self.update_row_called = false;
        self.lob_accessed.clear();
        self.lobs
            .release_unpublished(transport, RequestOwner::Cursor(self.id))
            .await
    }

    /// Bookkeeping after the cursor lands on a row
    pub(crate) fn land(&mut self) -> Result<()> {
        if let Traversal::Windowed(engine) = &mut self.traversal {
            engine.check_current_row_status(&mut self.warnings)?;
            engine.note_visit();
        }
        if let Some(row) = current_row_of(&self.traversal) {
            self.lobs.track_row(&row.row);
        }
        Ok(())
    }

    fn finish_move(&mut self, valid: bool) -> Result<bool> {
        self.is_valid_cursor_position = valid;
        if valid {
            self.land()?;
        }
        Ok(valid)
    }

    /// Invalid once the window is past the row limit
    fn beyond_max_rows(&self) -> bool {
        match &self.traversal {
            Traversal::Windowed(engine) => {
                !engine.policy().is_dynamic()
                    && engine.max_rows() > 0
                    && engine.window.current_row_number() > engine.max_rows()
            }
            Traversal::Forward(_) => false,
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Move to the next row
    pub async fn next(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_open("next")?;
        self.prepare_move(transport).await?;
        let valid = match self.traversal {
            Traversal::Forward(_) => self.next_forward(transport).await?,
            Traversal::Windowed(_) => self.next_windowed(transport).await?,
        };
        self.finish_move(valid)
    }

    async fn next_forward(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        let max_rows = self.context.max_rows as i64;
        let Traversal::Forward(fetcher) = &mut self.traversal else {
            return Err(Error::Internal("forward move on a scrollable cursor".to_string()));
        };
        let mut valid = fetcher.next(transport, &mut self.warnings).await?;
        if valid && max_rows > 0 && fetcher.rows_read() > max_rows {
            fetcher.clear_current();
            valid = false;
        }
        if valid {
            return Ok(true);
        }

        let termination = fetcher.take_termination();
        self.request_commit();
        if let Some(record) = termination {
            match status::interpret(&record) {
                Completion::Error(record) => {
                    self.mark_closed();
                    return Err(Error::server_terminated(&record));
                }
                Completion::Warning(record) => self.warnings.push(record),
                _ => {}
            }
        }
        tracing::trace!(cursor_id = self.id, "forward-only cursor exhausted");
        Ok(false)
    }

    async fn next_windowed(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        let (in_window, refetch_at) = {
            let (engine, _) = self.engine()?;
            engine.flags.is_after_last = false;
            engine.flags.is_last = false;
            let target = engine.window.current_row_number() + 1;
            let hit = engine.is_row_in_window(target, FetchOrientation::Next);
            (hit, stale_cached_row(engine, target, hit))
        };

        let valid = if in_window {
            let (engine, _) = self.engine()?;
            engine.window.current_row_in_rowset += 1;
            true
        } else if let Some(target) = refetch_at {
            self.refetch_at(transport, target).await?
        } else {
            self.check_received_termination()?;
            let valid = {
                let (engine, warnings) = self.engine()?;
                engine.get_next_rowset(transport, warnings).await?
            };
            self.check_received_termination()?;
            valid
        };

        let (engine, _) = self.engine()?;
        if !valid {
            engine.flags.is_first = false;
            return Ok(false);
        }
        if engine.flags.is_before_first {
            engine.flags.is_first = true;
        }
        engine.flags.is_before_first = false;
        Ok(!self.beyond_max_rows())
    }

    /// Move to the previous row
    pub async fn previous(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_scrollable("previous")?;
        self.prepare_move(transport).await?;
        let valid = self.previous_windowed(transport).await?;
        self.finish_move(valid)
    }

    async fn previous_windowed(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        let (in_window, refetch_at) = {
            let (engine, _) = self.engine()?;
            engine.flags.is_before_first = false;
            engine.flags.is_first = false;
            let target = engine.window.current_row_number() - 1;
            let hit = engine.is_row_in_window(target, FetchOrientation::Prior);
            (hit, stale_cached_row(engine, target, hit))
        };

        let valid = if in_window {
            let (engine, _) = self.engine()?;
            engine.window.current_row_in_rowset -= 1;
            true
        } else if let Some(target) = refetch_at {
            self.refetch_at(transport, target).await?
        } else {
            self.check_received_termination()?;
            let valid = {
                let (engine, warnings) = self.engine()?;
                engine.get_previous_rowset(transport, warnings).await?
            };
            self.check_received_termination()?;
            valid
        };

        let (engine, _) = self.engine()?;
        if !valid {
            return Ok(false);
        }
        if engine.flags.is_after_last {
            engine.flags.is_last = true;
        }
        engine.flags.is_after_last = false;
        Ok(!self.beyond_max_rows())
    }

    /// Move to the first row
    pub async fn first(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_scrollable("first")?;
        self.prepare_move(transport).await?;

        let in_window = {
            let (engine, _) = self.engine()?;
            engine.flags.reset();
            engine.is_row_in_window(1, FetchOrientation::First)
        };
        let valid = if in_window {
            let (engine, _) = self.engine()?;
            engine.window.current_row_in_rowset = 1 - engine.window.first_row_in_rowset;
            true
        } else {
            self.check_received_termination()?;
            let valid = {
                let (engine, warnings) = self.engine()?;
                engine.get_first_rowset(transport, warnings).await?
            };
            self.check_received_termination()?;
            valid
        };
        if valid {
            let (engine, _) = self.engine()?;
            engine.flags.is_first = true;
        }
        self.finish_move(valid)
    }

    /// Move to the last row
    pub async fn last(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_scrollable("last")?;
        self.prepare_move(transport).await?;

        let dynamic = self.is_dynamic();
        let row = {
            let (engine, warnings) = self.engine()?;
            engine.flags.reset();
            if engine.policy().requires_row_count() && engine.row_count_is_unknown() {
                engine.get_row_count(transport, warnings).await?;
            }
            engine.row_count()
        };
        let in_window = {
            let (engine, _) = self.engine()?;
            !dynamic && engine.is_row_in_window(row, FetchOrientation::Last)
        };

        let valid = if in_window {
            let (engine, _) = self.engine()?;
            engine.window.current_row_in_rowset = row - engine.window.first_row_in_rowset;
            true
        } else {
            self.check_received_termination()?;
            let valid = {
                let (engine, warnings) = self.engine()?;
                engine.get_last_rowset(transport, row, warnings).await?
            };
            self.check_received_termination()?;
            valid
        };
        if valid {
            let (engine, _) = self.engine()?;
            engine.flags.is_last = true;
        }
        self.finish_move(valid)
    }

    async fn refetch_at(&mut self, transport: &mut dyn Transport, target: i64) -> Result<bool> {
        self.check_received_termination()?;
        tracing::trace!(cursor_id = self.id, row = target, "refetching cached row");
        let valid = {
            let (engine, warnings) = self.engine()?;
            engine.get_absolute_rowset(transport, target, warnings).await?
        };
        self.check_received_termination()?;
        Ok(valid)
    }

    /// Move before the first row
    pub async fn before_first(&mut self, transport: &mut dyn Transport) -> Result<()> {
        self.check_scrollable("beforeFirst")?;
        self.prepare_move(transport).await?;
        self.before_first_move(transport).await
    }

    async fn before_first_move(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let dynamic = self.is_dynamic();
        let (engine, warnings) = self.engine()?;
        engine.flags.reset();
        let needs_positioning = dynamic
            || (!engine.result_set_contains_no_rows(transport, warnings).await?
                && !engine.is_server_position_before_first(transport, warnings).await?);
        if needs_positioning {
            engine
                .flow_positioning_fetch(transport, FetchOrientation::Before, 0, warnings)
                .await?;
        }
        engine.flags.is_before_first = true;
        engine.set_rowset_before_first_event();
        self.is_valid_cursor_position = false;
        Ok(())
    }

    /// Move after the last row
    pub async fn after_last(&mut self, transport: &mut dyn Transport) -> Result<()> {
        self.check_scrollable("afterLast")?;
        self.prepare_move(transport).await?;
        self.after_last_move(transport).await
    }

    async fn after_last_move(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let dynamic = self.is_dynamic();
        let (engine, warnings) = self.engine()?;
        engine.flags.reset();
        let needs_positioning = dynamic
            || (!engine.result_set_contains_no_rows(transport, warnings).await?
                && !engine.is_server_position_after_last());
        if needs_positioning {
            engine
                .flow_positioning_fetch(transport, FetchOrientation::After, 0, warnings)
                .await?;
        }
        engine.flags.is_after_last = true;
        engine.set_rowset_after_last_event();
        self.is_valid_cursor_position = false;
        Ok(())
    }

    /// Move to an absolute row; negative rows count back from the end
    pub async fn absolute(&mut self, transport: &mut dyn Transport, row: i64) -> Result<bool> {
        self.check_scrollable("absolute")?;
        let dynamic = self.is_dynamic();
        if dynamic && row < 0 {
            return Err(Error::InvalidForSensitiveDynamic);
        }
        self.prepare_move(transport).await?;

        let max_rows = self.context.max_rows as i64;
        if max_rows > 0 {
            if row > max_rows {
                self.after_last_move(transport).await?;
                return Ok(false);
            }
            if row <= 0 && row.unsigned_abs() > self.context.max_rows {
                self.before_first_move(transport).await?;
                return Ok(false);
            }
        }

        let target = {
            let (engine, warnings) = self.engine()?;
            engine.flags.reset();
            if engine.policy().requires_row_count() && engine.row_count_is_unknown() {
                engine.get_row_count(transport, warnings).await?;
            }
            if dynamic || row >= 0 {
                row
            } else {
                engine.row_count() + row + 1
            }
        };

        let in_window = {
            let (engine, _) = self.engine()?;
            !dynamic && target > 0 && engine.is_row_in_window(target, FetchOrientation::Absolute)
        };
        let valid = if in_window {
            let (engine, _) = self.engine()?;
            engine.window.current_row_in_rowset = target - engine.window.first_row_in_rowset;
            true
        } else {
            self.check_received_termination()?;
            let valid = {
                let (engine, warnings) = self.engine()?;
                engine.get_absolute_rowset(transport, target, warnings).await?
            };
            self.check_received_termination()?;
            valid
        };

        if valid {
            let (engine, _) = self.engine()?;
            if row == 1 {
                engine.flags.is_first = true;
            }
            if row == -1 {
                engine.flags.is_last = true;
            }
        }
        self.finish_move(valid)
    }

    /// Move `rows` rows from the current position
    pub async fn relative(&mut self, transport: &mut dyn Transport, rows: i64) -> Result<bool> {
        self.check_scrollable("relative")?;
        self.prepare_move(transport).await?;

        let dynamic = self.is_dynamic();
        let mut rows = rows;
        let mut stepped = false;
        loop {
            let empty = {
                let (engine, warnings) = self.engine()?;
                engine.result_set_contains_no_rows(transport, warnings).await?
            };
            if empty {
                self.is_valid_cursor_position = false;
                return Ok(false);
            }

            let (before_first, after_last) = {
                let (engine, warnings) = self.engine()?;
                (
                    engine.is_before_first(transport, warnings).await?,
                    engine.is_after_last(transport, warnings).await?,
                )
            };
            if rows == 0 {
                let valid = !(before_first || after_last);
                if stepped {
                    self.is_valid_cursor_position = valid;
                    return Ok(valid);
                }
                if valid && self.refetch_on_zero_move() {
                    let (engine, warnings) = self.engine()?;
                    engine.get_refresh_rowset(transport, warnings).await?;
                    self.check_received_termination()?;
                }
                return self.finish_move(valid);
            }
            if before_first {
                if rows < 0 {
                    self.is_valid_cursor_position = false;
                    return Ok(false);
                }
                let valid = self.next_windowed(transport).await?;
                self.finish_move(valid)?;
                rows -= 1;
                stepped = true;
                continue;
            }
            if after_last {
                if rows > 0 {
                    self.is_valid_cursor_position = false;
                    return Ok(false);
                }
                let valid = self.previous_windowed(transport).await?;
                self.finish_move(valid)?;
                rows += 1;
                stepped = true;
                continue;
            }
            break;
        }

        let max_rows = self.context.max_rows as i64;
        let (current_absolute, current_offset) = {
            let (engine, _) = self.engine()?;
            engine.flags.reset();
            (
                engine.window.current_row_number(),
                engine.window.current_row_in_rowset,
            )
        };
        // a target beyond i64 is past either end of any result
        let Some(target) = current_absolute.checked_add(rows) else {
            if rows > 0 {
                self.after_last_move(transport).await?;
            } else {
                self.before_first_move(transport).await?;
            }
            return Ok(false);
        };
        if !dynamic && max_rows > 0 && rows > 0 && target > max_rows {
            self.after_last_move(transport).await?;
            return Ok(false);
        }
        let offset = current_offset.saturating_add(rows);

        let in_window = {
            let (engine, _) = self.engine()?;
            if dynamic {
                engine.is_row_in_window(offset, FetchOrientation::Relative)
            } else {
                target > 0 && engine.is_row_in_window(target, FetchOrientation::Relative)
            }
        };

        let valid = if in_window {
            let (engine, _) = self.engine()?;
            engine.window.current_row_in_rowset += rows;
            true
        } else {
            self.check_received_termination()?;
            let valid = {
                let (engine, warnings) = self.engine()?;
                if dynamic {
                    engine.get_relative_rowset(transport, offset, warnings).await?
                } else if engine.is_rowset_cursor() {
                    engine
                        .get_absolute_rowset(transport, target.max(0), warnings)
                        .await?
                } else {
                    let from_server = target.saturating_sub(engine.window.absolute_position);
                    engine.get_relative_rowset(transport, from_server, warnings).await?
                }
            };
            self.check_received_termination()?;
            valid
        };
        self.finish_move(valid)
    }

    /// An insensitive updatable cursor re-reads its rowset on `relative(0)`
    /// so the row shows the cursor's own changes.
    fn refetch_on_zero_move(&self) -> bool {
        self.policy() == SensitivityPolicy::Insensitive && self.is_updatable()
    }

    // =========================================================================
    // Position Queries
    // =========================================================================

    /// Current row number, 0 when not on a row
    pub async fn get_row(&mut self, transport: &mut dyn Transport) -> Result<i64> {
        self.check_open("getRow")?;
        if self.is_dynamic() {
            return Err(Error::InvalidForSensitiveDynamic);
        }
        match &mut self.traversal {
            Traversal::Forward(fetcher) => Ok(fetcher.get_row()),
            Traversal::Windowed(engine) => {
                if engine.row_count_is_unknown() {
                    engine.get_row_count(transport, &mut self.warnings).await?;
                }
                if engine.row_count() == 0
                    || engine.window.current_row_in_rowset < 0
                    || engine.is_past_end_of_window()
                    || engine.window.first_row_in_rowset == 0
                {
                    Ok(0)
                } else {
                    Ok(engine.window.current_row_number())
                }
            }
        }
    }

    /// Before the first row
    pub async fn is_before_first(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_scrollable("isBeforeFirst")?;
        let (engine, warnings) = self.engine()?;
        engine.is_before_first(transport, warnings).await
    }

    /// After the last row
    pub async fn is_after_last(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_scrollable("isAfterLast")?;
        let (engine, warnings) = self.engine()?;
        engine.is_after_last(transport, warnings).await
    }

    /// On the first row
    pub fn is_first(&mut self) -> Result<bool> {
        self.check_scrollable("isFirst")?;
        let valid = self.is_valid_cursor_position;
        let (engine, _) = self.engine()?;
        Ok(valid && engine.is_first())
    }

    /// On the last row
    pub async fn is_last(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_scrollable("isLast")?;
        let valid = self.is_valid_cursor_position;
        let (engine, warnings) = self.engine()?;
        Ok(valid && engine.is_last(transport, warnings).await?)
    }

    // =========================================================================
    // Row Access
    // =========================================================================

    /// Value of a column (1-based) in the current row
    ///
    /// A pending update of the column is returned in place of the fetched
    /// value. On the insert row, columns not yet set read as null.
    pub fn get_value(&self, column: usize) -> Result<Value> {
        self.check_open("getValue")?;
        self.metadata.check_index(column)?;
        if let Some(value) = self.updates.get(column).and_then(|u| u.value()) {
            return Ok(value.clone());
        }
        if self.row_mode == RowMode::OnInsertRow {
            return Ok(Value::Null);
        }
        if !self.is_valid_cursor_position {
            return Err(Error::InvalidCursorPosition);
        }
        let row = self
            .current_fetched_row()
            .ok_or(Error::InvalidCursorPosition)?;
        Ok(row.row.get(column - 1).cloned().unwrap_or(Value::Null))
    }

    /// LOB value of a column, handed out at most once per row
    ///
    /// With locators the returned value is the locator, which from then on
    /// is the application's to use; it is not released when the cursor
    /// moves.
    pub fn get_lob(&mut self, column: usize) -> Result<Value> {
        self.check_open("getLob")?;
        self.metadata.check_index(column)?;
        if !self.metadata.column(column)?.is_lob() {
            return Err(Error::NotALobColumn(column));
        }
        if self.lob_accessed.contains(&column) {
            return Err(Error::LobAlreadyStreamed(column));
        }
        let value = self.get_value(column)?;
        self.lobs.mark_published(column)?;
        self.lob_accessed.push(column);
        Ok(value)
    }

    /// Current row was deleted (a hole)
    ///
    /// Only scroll-insensitive cursors report holes.
    pub fn row_deleted(&self) -> Result<bool> {
        self.check_open("rowDeleted")?;
        if self.result_set_type != ResultSetType::ScrollInsensitive {
            return Ok(false);
        }
        Ok(self.current_fetched_row().map(|r| r.hole).unwrap_or(false))
    }

    /// Current row was updated through this cursor
    pub fn row_updated(&self) -> Result<bool> {
        self.check_open("rowUpdated")?;
        Ok(self.current_fetched_row().map(|r| r.updated).unwrap_or(false))
    }

    // =========================================================================
    // Fetch Hints
    // =========================================================================

    /// Change the fetch size; 0 selects the default
    pub fn set_fetch_size(&mut self, rows: i32) -> Result<()> {
        self.check_open("setFetchSize")?;
        validate_fetch_size(rows as i64, self.context.max_rows)?;
        let size = if rows == 0 {
            DEFAULT_FETCH_SIZE
        } else {
            rows as u32
        };
        let updatable = self.is_updatable();
        match &mut self.traversal {
            // updatable forward-only cursors stay on single-row fetches
            Traversal::Forward(fetcher) => {
                if !updatable {
                    fetcher.set_fetch_size(size);
                }
            }
            Traversal::Windowed(engine) => engine.set_fetch_size(size),
        }
        self.context.fetch_size = self.fetch_size();
        Ok(())
    }

    /// Change the fetch direction hint
    pub fn set_fetch_direction(&mut self, direction: FetchDirection) -> Result<()> {
        self.check_open("setFetchDirection")?;
        if !self.result_set_type.is_scrollable() && direction != FetchDirection::Forward {
            return Err(Error::InvalidFetchDirectionOrSize(format!(
                "fetch direction {} on a forward-only cursor",
                direction
            )));
        }
        self.fetch_direction = direction;
        Ok(())
    }
}

impl UnitOfWorkListener for CursorState {
    fn complete_local_commit(&mut self) -> BoundaryOutcome {
        if self.lobs.is_enabled() {
            if let Traversal::Windowed(engine) = &mut self.traversal {
                engine.expire_window();
            }
        }
        self.lobs.discard_all();
        self.lob_accessed.clear();
        self.auto_committed = true;
        self.unpositioned_on_server = true;
        if self.context.holdability.is_holdable() && self.open_on_client {
            tracing::trace!(cursor_id = self.id, "holdable cursor kept across commit");
            BoundaryOutcome::Retain
        } else {
            self.mark_closed();
            BoundaryOutcome::Deregister
        }
    }

    fn complete_local_rollback(&mut self) -> BoundaryOutcome {
        self.lobs.discard_all();
        self.auto_committed = true;
        self.mark_closed();
        BoundaryOutcome::Deregister
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metadata::ColumnInfo;
    use crate::transport::MemoryServer;

    fn server(rows: i64) -> MemoryServer {
        let server = MemoryServer::new();
        server.add_table(
            "SELECT * FROM T",
            vec![ColumnInfo::new("ID").with_table("APP", "T")],
            (1..=rows).map(|i| vec![Value::Integer(i)]).collect(),
        );
        server
    }

    async fn open(
        transport: &mut dyn Transport,
        options: CursorOptions,
    ) -> CursorState {
        let context = StatementContext::resolve(&Config::new(), &options).unwrap();
        CursorState::open(transport, "SELECT * FROM T", &options, context, true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_forward_iteration() {
        let server = server(5);
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::new().with_fetch_size(2)).await;
        let mut seen = Vec::new();
        while cursor.next(&mut t).await.unwrap() {
            seen.push(cursor.get_value(1).unwrap().as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(cursor.get_row(&mut t).await.unwrap(), 0);
        assert!(cursor.take_commit_request());
        assert!(!cursor.take_commit_request());
    }

    #[tokio::test]
    async fn test_scroll_ops_rejected_on_forward_only() {
        let server = server(3);
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::new()).await;
        assert_eq!(cursor.previous(&mut t).await, Err(Error::NotScrollable));
        assert_eq!(cursor.absolute(&mut t, 1).await, Err(Error::NotScrollable));
        assert!(matches!(
            cursor.set_fetch_direction(FetchDirection::Reverse),
            Err(Error::InvalidFetchDirectionOrSize(_))
        ));
    }

    #[tokio::test]
    async fn test_previous_from_after_last() {
        let server = server(4);
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive().with_fetch_size(3)).await;
        cursor.after_last(&mut t).await.unwrap();
        assert!(cursor.is_after_last(&mut t).await.unwrap());
        assert!(cursor.previous(&mut t).await.unwrap());
        assert_eq!(cursor.get_value(1).unwrap(), Value::Integer(4));
        assert!(cursor.is_last(&mut t).await.unwrap());
        assert!(cursor.previous(&mut t).await.unwrap());
        assert_eq!(cursor.get_row(&mut t).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_value_requires_position() {
        let server = server(2);
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive()).await;
        assert_eq!(cursor.get_value(1), Err(Error::InvalidCursorPosition));
        assert!(matches!(
            cursor.get_value(2),
            Err(Error::InvalidColumnIndex { index: 2, count: 1 })
        ));
        cursor.before_first(&mut t).await.unwrap();
        assert!(cursor.is_before_first(&mut t).await.unwrap());
        assert!(!cursor.is_first().unwrap());
    }

    #[tokio::test]
    async fn test_commit_closes_non_holdable() {
        let server = server(2);
        let mut t = server.transport();
        let options = CursorOptions::scroll_insensitive()
            .with_holdability(crate::constants::Holdability::CloseCursorsAtCommit);
        let mut cursor = open(&mut t, options).await;
        assert_eq!(cursor.complete_local_commit(), BoundaryOutcome::Deregister);
        assert!(cursor.is_closed());
        assert!(matches!(
            cursor.next(&mut t).await,
            Err(Error::ClosedResultSet(_))
        ));
    }
}
