//! In-process transport backed by in-memory tables
//!
//! [`MemoryServer`] holds tables keyed by the query text that selects them,
//! plus the server side of every open cursor. [`MemoryTransport`] is one
//! request channel onto it. Requests are buffered by the `write_*` calls
//! and executed together on `send`, so a chained request (for example a
//! positioning fetch followed by a positioned update) costs one round trip
//! just like it would over the network.
//!
//! The server can inject failures: a query terminated by the server, a
//! failing positioned statement, or a lost connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::constants::{status_code, FetchOrientation, ResultSetType, Sensitivity};
use crate::error::{Error, Result};
use crate::lob::LobLocator;
use crate::metadata::ColumnInfo;
use crate::positioned::{PositionedStatement, StatementKind};
use crate::row::{FetchedRow, Row, Value};
use crate::status::{RowStatusBatch, StatusRecord};

use super::{
    CursorId, ExecuteReply, FetchReply, OpenQueryReply, OpenQueryRequest, PositioningReply,
    RequestOwner, Transport,
};

const SERVER_DEFAULT_FETCH_SIZE: usize = 64;

// =============================================================================
// Server State
// =============================================================================

#[derive(Debug, Clone)]
struct StoredRow {
    id: u64,
    values: Vec<Value>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Clone)]
struct SnapshotRow {
    id: u64,
    values: Vec<Value>,
    deleted: bool,
    updated: bool,
}

#[derive(Debug)]
struct ServerCursor {
    name: String,
    table: String,
    columns: Vec<ColumnInfo>,
    rows: Vec<SnapshotRow>,
    rowset: bool,
    holdable: bool,
    locators: bool,
    /// 0 = before first, count + 1 = after last
    position: i64,
    rowset_start: i64,
    rowset_len: i64,
    /// Size of the last non-empty rowset, used when a rowset is restored
    rowset_size: i64,
}

impl ServerCursor {
    fn count(&self) -> i64 {
        self.rows.len() as i64
    }

    fn clamp(&self, target: i64) -> i64 {
        target.clamp(0, self.count() + 1)
    }

    fn set_rowset(&mut self, start: i64, len: i64) {
        self.rowset_start = start;
        self.rowset_len = len;
        if len > 0 {
            self.rowset_size = len;
        }
    }
}

#[derive(Debug, Default)]
struct LocatorIssuer {
    next_id: u32,
    live: HashSet<u32>,
    released: u64,
}

impl LocatorIssuer {
    fn issue(&mut self) -> u32 {
        self.next_id += 1;
        self.live.insert(self.next_id);
        self.next_id
    }
}

#[derive(Debug)]
struct ServerState {
    tables: HashMap<String, MemoryTable>,
    committed: HashMap<String, MemoryTable>,
    cursors: HashMap<CursorId, ServerCursor>,
    next_cursor_id: CursorId,
    next_row_id: u64,
    locators: LocatorIssuer,
    rowset_cursors: bool,
    locators_supported: bool,
    pending_terminations: HashMap<CursorId, i32>,
    failing_execute: Option<StatusRecord>,
    disconnected: bool,
    round_trips: u64,
    commits: u64,
    rollbacks: u64,
    executed: Vec<String>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            committed: HashMap::new(),
            cursors: HashMap::new(),
            next_cursor_id: 0,
            next_row_id: 0,
            locators: LocatorIssuer::default(),
            rowset_cursors: true,
            locators_supported: true,
            pending_terminations: HashMap::new(),
            failing_execute: None,
            disconnected: false,
            round_trips: 0,
            commits: 0,
            rollbacks: 0,
            executed: Vec::new(),
        }
    }
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cursor_not_open(cursor: CursorId) -> StatusRecord {
    StatusRecord::with_message(
        status_code::CURSOR_NOT_OPEN,
        format!("cursor {} is not open", cursor),
    )
}

/// Rows `from..=to` of a cursor snapshot as delivered to the client
fn deliver(
    locators: &mut LocatorIssuer,
    cursor: &ServerCursor,
    from: i64,
    to: i64,
) -> (Vec<FetchedRow>, Vec<StatusRecord>) {
    let mut rows = Vec::new();
    let mut statuses = Vec::new();
    for number in from..=to {
        let Some(snapshot) = cursor.rows.get((number - 1) as usize) else {
            break;
        };
        if snapshot.deleted {
            rows.push(FetchedRow::hole(cursor.columns.len()));
            statuses.push(StatusRecord::with_message(
                status_code::HOLE_DETECTED,
                "row was deleted",
            ));
            continue;
        }
        let values = snapshot
            .values
            .iter()
            .enumerate()
            .map(|(i, value)| match cursor.columns.get(i).and_then(|c| c.lob) {
                Some(kind) if cursor.locators && !value.is_null() => {
                    Value::Lob(LobLocator::new(locators.issue(), kind, i + 1))
                }
                _ => value.clone(),
            })
            .collect();
        rows.push(FetchedRow {
            row: Row::new(values),
            hole: false,
            updated: snapshot.updated,
        });
        statuses.push(StatusRecord::success());
    }
    (rows, statuses)
}

impl ServerState {
    fn open_query(&mut self, request: &OpenQueryRequest) -> Result<OpenQueryReply> {
        let table = self.tables.get(&request.sql).ok_or_else(|| {
            Error::server_terminated(&StatusRecord::with_message(
                status_code::UNDEFINED_OBJECT,
                format!("no table for query: {}", request.sql),
            ))
        })?;

        let mut rows: Vec<SnapshotRow> = table
            .rows
            .iter()
            .map(|r| SnapshotRow {
                id: r.id,
                values: r.values.clone(),
                deleted: false,
                updated: false,
            })
            .collect();
        if request.max_rows > 0 {
            rows.truncate(request.max_rows as usize);
        }

        let scrollable = request.result_set_type.is_scrollable();
        let sensitivity = match request.result_set_type {
            ResultSetType::ForwardOnly => Sensitivity::Unknown,
            ResultSetType::ScrollInsensitive => Sensitivity::Insensitive,
            ResultSetType::ScrollSensitive => match request.sensitivity {
                Sensitivity::SensitiveDynamic => Sensitivity::SensitiveDynamic,
                _ => Sensitivity::SensitiveStatic,
            },
        };
        let rowset = scrollable
            && (self.rowset_cursors || sensitivity == Sensitivity::SensitiveDynamic);
        let locators = request.lob_locators && self.locators_supported;

        self.next_cursor_id += 1;
        let cursor_id = self.next_cursor_id;
        let cursor = ServerCursor {
            name: format!("SQL_CUR{}", cursor_id),
            table: request.sql.clone(),
            columns: table.columns.clone(),
            rows,
            rowset,
            holdable: request.holdability.is_holdable(),
            locators,
            position: 0,
            rowset_start: 0,
            rowset_len: 0,
            rowset_size: 0,
        };
        let cursor_name = cursor.name.clone();
        let columns = cursor.columns.clone();
        self.cursors.insert(cursor_id, cursor);

        let first_block = if scrollable {
            self.scrollable_fetch(cursor_id, FetchOrientation::Next, 0, request.fetch_size)
        } else {
            self.forward_fetch(cursor_id, request.fetch_size)
        };

        Ok(OpenQueryReply {
            cursor_id,
            cursor_name,
            columns,
            sensitivity,
            rowset_cursor: rowset,
            locators_enabled: locators,
            first_block,
        })
    }

    fn take_termination(&mut self, cursor_id: CursorId) -> Option<FetchReply> {
        let code = self.pending_terminations.remove(&cursor_id)?;
        self.cursors.remove(&cursor_id);
        Some(FetchReply {
            rows: Vec::new(),
            status: RowStatusBatch {
                query_terminated: Some(StatusRecord::with_message(code, "query terminated by server")),
                ..Default::default()
            },
        })
    }

    fn forward_fetch(&mut self, cursor_id: CursorId, fetch_size: u32) -> FetchReply {
        if let Some(reply) = self.take_termination(cursor_id) {
            return reply;
        }
        let Some(cursor) = self.cursors.get_mut(&cursor_id) else {
            return FetchReply {
                rows: Vec::new(),
                status: RowStatusBatch {
                    query_terminated: Some(cursor_not_open(cursor_id)),
                    ..Default::default()
                },
            };
        };

        let n = effective_fetch_size(fetch_size);
        let from = cursor.position + 1;
        let to = (from + n - 1).min(cursor.count());
        let (rows, row_statuses) = deliver(&mut self.locators, cursor, from, to);
        let delivered = rows.len() as i64;
        cursor.position = if delivered > 0 { from + delivered - 1 } else { cursor.position };

        let mut status = RowStatusBatch {
            row_statuses,
            ..Default::default()
        };
        if delivered < n {
            status.query_terminated = Some(StatusRecord::end_of_data());
            self.cursors.remove(&cursor_id);
        }
        FetchReply { rows, status }
    }

    fn scrollable_fetch(
        &mut self,
        cursor_id: CursorId,
        orientation: FetchOrientation,
        row: i64,
        fetch_size: u32,
    ) -> FetchReply {
        if let Some(reply) = self.take_termination(cursor_id) {
            return reply;
        }
        let Some(cursor) = self.cursors.get_mut(&cursor_id) else {
            return FetchReply {
                rows: Vec::new(),
                status: RowStatusBatch {
                    query_terminated: Some(cursor_not_open(cursor_id)),
                    ..Default::default()
                },
            };
        };
        let n = effective_fetch_size(fetch_size);
        let count = cursor.count();

        if cursor.rowset && orientation == FetchOrientation::Prior {
            let start = cursor.rowset_start;
            if start <= 1 {
                cursor.set_rowset(0, 0);
                cursor.position = 0;
                return FetchReply {
                    rows: Vec::new(),
                    status: RowStatusBatch {
                        end_of_data: Some(StatusRecord::new(status_code::ROWSET_START_REACHED)),
                        ..Default::default()
                    },
                };
            }
            let s = start - n;
            let (from, warning) = if s < 1 {
                (1, Some(StatusRecord::new(status_code::ROWSET_START_REACHED)))
            } else {
                (s, None)
            };
            let to = start - 1;
            let (rows, row_statuses) = deliver(&mut self.locators, cursor, from, to);
            cursor.set_rowset(from, rows.len() as i64);
            cursor.position = to;
            return FetchReply {
                rows,
                status: RowStatusBatch {
                    row_statuses,
                    batch_warning: warning,
                    ..Default::default()
                },
            };
        }

        let target = if cursor.rowset {
            let start = cursor.rowset_start;
            match orientation {
                FetchOrientation::Next if start == 0 => 1,
                FetchOrientation::Next => start + cursor.rowset_len,
                FetchOrientation::Relative => start.saturating_add(row),
                FetchOrientation::Current => start,
                FetchOrientation::Last => (count - n + 1).max(1).min(count),
                _ => absolute_target(orientation, row, cursor.position, count),
            }
        } else {
            absolute_target(orientation, row, cursor.position, count)
        };

        let end_of_data = Some(StatusRecord::end_of_data());
        if target < 1 || orientation == FetchOrientation::Before {
            cursor.position = 0;
            cursor.set_rowset(0, 0);
            return FetchReply {
                rows: Vec::new(),
                status: RowStatusBatch {
                    end_of_data,
                    ..Default::default()
                },
            };
        }
        if target > count {
            cursor.position = count + 1;
            cursor.set_rowset(count + 1, 0);
            return FetchReply {
                rows: Vec::new(),
                status: RowStatusBatch {
                    end_of_data,
                    ..Default::default()
                },
            };
        }

        let to = (target + n - 1).min(count);
        let (rows, row_statuses) = deliver(&mut self.locators, cursor, target, to);
        let delivered = rows.len() as i64;
        cursor.set_rowset(target, delivered);
        let mut status = RowStatusBatch {
            row_statuses,
            ..Default::default()
        };
        if delivered < n {
            cursor.position = count + 1;
            status.end_of_data = end_of_data;
        } else {
            cursor.position = target + delivered - 1;
        }
        FetchReply { rows, status }
    }

    fn positioning_fetch(
        &mut self,
        cursor_id: CursorId,
        orientation: FetchOrientation,
        row: i64,
    ) -> PositioningReply {
        let Some(cursor) = self.cursors.get_mut(&cursor_id) else {
            return PositioningReply {
                status: cursor_not_open(cursor_id),
            };
        };
        let count = cursor.count();
        let target = cursor.clamp(absolute_target(orientation, row, cursor.position, count));
        cursor.position = target;
        let size = cursor.rowset_size;
        match orientation {
            FetchOrientation::After => cursor.set_rowset(count + 1, 0),
            FetchOrientation::Before => cursor.set_rowset(0, 0),
            _ => cursor.set_rowset(target, size.min(count - target + 1).max(0)),
        }
        let status = if orientation == FetchOrientation::After {
            StatusRecord::success().with_row_count(count as u64)
        } else {
            StatusRecord::success()
        };
        PositioningReply { status }
    }

    fn execute(&mut self, statement: &PositionedStatement, params: &[Value]) -> ExecuteReply {
        self.executed.push(statement.sql.clone());
        if let Some(status) = self.failing_execute.take() {
            return ExecuteReply {
                update_count: 0,
                status,
            };
        }
        if params.len() != statement.parameter_count() {
            return ExecuteReply {
                update_count: 0,
                status: StatusRecord::with_message(-313, "wrong number of parameters"),
            };
        }

        let Some(cursor) = self.cursors.get_mut(&statement.cursor) else {
            return ExecuteReply {
                update_count: 0,
                status: cursor_not_open(statement.cursor),
            };
        };
        let Some(table) = self.tables.get_mut(&cursor.table) else {
            return ExecuteReply {
                update_count: 0,
                status: cursor_not_open(statement.cursor),
            };
        };

        if statement.kind == StatementKind::Insert {
            let mut values = vec![Value::Null; table.columns.len()];
            for (column, value) in statement.columns.iter().zip(params) {
                if let Some(slot) = values.get_mut(column - 1) {
                    *slot = value.clone();
                }
            }
            self.next_row_id += 1;
            table.rows.push(StoredRow {
                id: self.next_row_id,
                values,
            });
            return ExecuteReply {
                update_count: 1,
                status: StatusRecord::success(),
            };
        }

        let target = if statement.rowset_row {
            let offset = params.last().and_then(Value::as_i64).unwrap_or(0);
            cursor.rowset_start + offset - 1
        } else {
            cursor.position
        };
        let not_positioned = ExecuteReply {
            update_count: 0,
            status: StatusRecord::with_message(
                status_code::CURSOR_NOT_POSITIONED,
                "cursor is not positioned on a row",
            ),
        };
        if target < 1 || target > cursor.count() {
            return not_positioned;
        }
        let Some(snapshot) = cursor.rows.get_mut((target - 1) as usize) else {
            return not_positioned;
        };
        let Some(index) = table.rows.iter().position(|r| r.id == snapshot.id) else {
            return not_positioned;
        };
        if snapshot.deleted {
            return not_positioned;
        }

        match statement.kind {
            StatementKind::Update => {
                for (column, value) in statement.columns.iter().zip(params) {
                    if let Some(slot) = snapshot.values.get_mut(column - 1) {
                        *slot = value.clone();
                    }
                    if let Some(slot) = table.rows[index].values.get_mut(column - 1) {
                        *slot = value.clone();
                    }
                }
                snapshot.updated = true;
            }
            StatementKind::Delete => {
                snapshot.deleted = true;
                table.rows.remove(index);
            }
            StatementKind::Insert => {}
        }
        ExecuteReply {
            update_count: 1,
            status: StatusRecord::success(),
        }
    }

    fn close_cursor(&mut self, cursor_id: CursorId) -> StatusRecord {
        self.pending_terminations.remove(&cursor_id);
        match self.cursors.remove(&cursor_id) {
            Some(_) => StatusRecord::success(),
            None => cursor_not_open(cursor_id),
        }
    }

    fn release_locators(&mut self, ids: &[u32]) -> StatusRecord {
        let mut status = StatusRecord::success();
        for id in ids {
            if self.locators.live.remove(id) {
                self.locators.released += 1;
            } else {
                status = StatusRecord::with_message(
                    status_code::INVALID_LOCATOR,
                    format!("locator {} is not valid", id),
                );
            }
        }
        status
    }

    fn commit(&mut self) -> StatusRecord {
        self.commits += 1;
        self.committed = self.tables.clone();
        self.cursors.retain(|_, c| c.holdable);
        self.locators.live.clear();
        StatusRecord::success()
    }

    fn rollback(&mut self) -> StatusRecord {
        self.rollbacks += 1;
        self.tables = self.committed.clone();
        self.cursors.clear();
        self.locators.live.clear();
        StatusRecord::success()
    }

    fn process(&mut self, request: Request) -> Reply {
        match request {
            Request::OpenQuery(request) => Reply::OpenQuery(self.open_query(&request)),
            Request::Fetch { cursor, fetch_size } => {
                Reply::Fetch(self.forward_fetch(cursor, fetch_size))
            }
            Request::ScrollableFetch {
                cursor,
                orientation,
                row,
                fetch_size,
            } => Reply::ScrollableFetch(self.scrollable_fetch(cursor, orientation, row, fetch_size)),
            Request::PositioningFetch {
                cursor,
                orientation,
                row,
            } => Reply::PositioningFetch(self.positioning_fetch(cursor, orientation, row)),
            Request::CursorClose(cursor) => Reply::CursorClose(self.close_cursor(cursor)),
            Request::Execute { statement, params } => {
                Reply::Execute(self.execute(&statement, &params))
            }
            Request::ReleaseLocators(ids) => Reply::ReleaseLocators(self.release_locators(&ids)),
            Request::Commit => Reply::Commit(self.commit()),
            Request::Rollback => Reply::Rollback(self.rollback()),
        }
    }
}

fn effective_fetch_size(fetch_size: u32) -> i64 {
    if fetch_size == 0 {
        SERVER_DEFAULT_FETCH_SIZE as i64
    } else {
        fetch_size as i64
    }
}

/// Target row of a positioned move relative to the server position
fn absolute_target(orientation: FetchOrientation, row: i64, position: i64, count: i64) -> i64 {
    match orientation {
        FetchOrientation::Next => position + 1,
        FetchOrientation::Prior => position - 1,
        FetchOrientation::First => 1,
        FetchOrientation::Last => count,
        FetchOrientation::Before => 0,
        FetchOrientation::After => count + 1,
        FetchOrientation::Absolute if row >= 0 => row,
        FetchOrientation::Absolute => (count + 1).saturating_add(row),
        FetchOrientation::Relative => position.saturating_add(row),
        FetchOrientation::Current => position,
    }
}

// =============================================================================
// Memory Server
// =============================================================================

/// Handle onto a shared in-memory server
///
/// Clones share the same state. Tables are registered under the exact query
/// text a cursor will be opened with.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    /// Create an empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table; `sql` is the query that selects it
    ///
    /// The data counts as committed.
    pub fn add_table(&self, sql: impl Into<String>, columns: Vec<ColumnInfo>, rows: Vec<Vec<Value>>) {
        let mut state = lock(&self.state);
        let rows = rows
            .into_iter()
            .map(|values| {
                state.next_row_id += 1;
                StoredRow {
                    id: state.next_row_id,
                    values,
                }
            })
            .collect();
        let sql = sql.into();
        let table = MemoryTable { columns, rows };
        state.committed.insert(sql.clone(), table.clone());
        state.tables.insert(sql, table);
    }

    /// Open a new request channel
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            state: Arc::clone(&self.state),
            owner: None,
            requests: Vec::new(),
            replies: VecDeque::new(),
        }
    }

    /// Grant rowset semantics to scrollable cursors (default true)
    ///
    /// Sensitive dynamic cursors always get rowset semantics.
    pub fn set_rowset_cursors(&self, enabled: bool) {
        lock(&self.state).rowset_cursors = enabled;
    }

    /// Deliver LOB columns as locators when the client asks (default true)
    pub fn set_locators_supported(&self, supported: bool) {
        lock(&self.state).locators_supported = supported;
    }

    /// End a cursor's query with `code` on its next fetch
    pub fn terminate_query(&self, cursor: CursorId, code: i32) {
        lock(&self.state).pending_terminations.insert(cursor, code);
    }

    /// Make the next positioned statement fail with `code`
    pub fn fail_next_execute(&self, code: i32, message: impl Into<String>) {
        lock(&self.state).failing_execute = Some(StatusRecord::with_message(code, message));
    }

    /// Drop the connection; every later request fails
    pub fn disconnect(&self) {
        lock(&self.state).disconnected = true;
    }

    /// Round trips served so far
    pub fn round_trips(&self) -> u64 {
        lock(&self.state).round_trips
    }

    /// Commits served so far
    pub fn commit_count(&self) -> u64 {
        lock(&self.state).commits
    }

    /// Rollbacks served so far
    pub fn rollback_count(&self) -> u64 {
        lock(&self.state).rollbacks
    }

    /// Cursors open on the server
    pub fn open_cursor_count(&self) -> usize {
        lock(&self.state).cursors.len()
    }

    /// Locators issued and not yet released or invalidated
    pub fn live_locator_count(&self) -> usize {
        lock(&self.state).locators.live.len()
    }

    /// Locators released by explicit request
    pub fn released_locator_count(&self) -> u64 {
        lock(&self.state).locators.released
    }

    /// SQL text of every positioned statement executed, in order
    pub fn executed_statements(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    /// Current rows of a table
    pub fn table_rows(&self, sql: &str) -> Vec<Vec<Value>> {
        lock(&self.state)
            .tables
            .get(sql)
            .map(|t| t.rows.iter().map(|r| r.values.clone()).collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// Memory Transport
// =============================================================================

#[derive(Debug)]
enum Request {
    OpenQuery(OpenQueryRequest),
    Fetch {
        cursor: CursorId,
        fetch_size: u32,
    },
    ScrollableFetch {
        cursor: CursorId,
        orientation: FetchOrientation,
        row: i64,
        fetch_size: u32,
    },
    PositioningFetch {
        cursor: CursorId,
        orientation: FetchOrientation,
        row: i64,
    },
    CursorClose(CursorId),
    Execute {
        statement: PositionedStatement,
        params: Vec<Value>,
    },
    ReleaseLocators(Vec<u32>),
    Commit,
    Rollback,
}

#[derive(Debug)]
enum Reply {
    OpenQuery(Result<OpenQueryReply>),
    Fetch(FetchReply),
    ScrollableFetch(FetchReply),
    PositioningFetch(PositioningReply),
    CursorClose(StatusRecord),
    Execute(ExecuteReply),
    ReleaseLocators(StatusRecord),
    Commit(StatusRecord),
    Rollback(StatusRecord),
}

/// One request channel onto a [`MemoryServer`]
#[derive(Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<ServerState>>,
    owner: Option<RequestOwner>,
    requests: Vec<Request>,
    replies: VecDeque<Reply>,
}

impl MemoryTransport {
    fn queue(&mut self, request: Request) -> Result<()> {
        if self.owner.is_none() {
            return Err(Error::Protocol("write outside of a request".to_string()));
        }
        self.requests.push(request);
        Ok(())
    }

    fn next_reply(&mut self, expected: &str) -> Result<Reply> {
        self.replies
            .pop_front()
            .ok_or_else(|| Error::Protocol(format!("no reply left, expected {}", expected)))
    }

    fn process(&mut self) -> Result<()> {
        if self.owner.is_none() {
            return Err(Error::Protocol("send outside of a request".to_string()));
        }
        let mut state = lock(&self.state);
        if state.disconnected {
            return Err(Error::Disconnect("connection to server lost".to_string()));
        }
        state.round_trips += 1;
        for request in std::mem::take(&mut self.requests) {
            let reply = state.process(request);
            self.replies.push_back(reply);
        }
        Ok(())
    }
}

fn unexpected(expected: &str, reply: &Reply) -> Error {
    Error::Protocol(format!("expected {} reply, got {:?}", expected, reply))
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn begin_request(&mut self, owner: RequestOwner) -> Result<()> {
        if let Some(current) = self.owner {
            return Err(Error::Protocol(format!(
                "request for {:?} started while {:?} is still in progress",
                owner, current
            )));
        }
        self.owner = Some(owner);
        Ok(())
    }

    fn write_open_query(&mut self, request: &OpenQueryRequest) -> Result<()> {
        self.queue(Request::OpenQuery(request.clone()))
    }

    fn write_fetch(&mut self, cursor: CursorId, fetch_size: u32) -> Result<()> {
        self.queue(Request::Fetch { cursor, fetch_size })
    }

    fn write_scrollable_fetch(
        &mut self,
        cursor: CursorId,
        orientation: FetchOrientation,
        row: i64,
        fetch_size: u32,
        _reset_blocks: bool,
    ) -> Result<()> {
        self.queue(Request::ScrollableFetch {
            cursor,
            orientation,
            row,
            fetch_size,
        })
    }

    fn write_positioning_fetch(
        &mut self,
        cursor: CursorId,
        orientation: FetchOrientation,
        row: i64,
    ) -> Result<()> {
        self.queue(Request::PositioningFetch {
            cursor,
            orientation,
            row,
        })
    }

    fn write_cursor_close(&mut self, cursor: CursorId) -> Result<()> {
        self.queue(Request::CursorClose(cursor))
    }

    fn write_execute(&mut self, statement: &PositionedStatement, params: &[Value]) -> Result<()> {
        self.queue(Request::Execute {
            statement: statement.clone(),
            params: params.to_vec(),
        })
    }

    fn write_release_locators(&mut self, locators: &[u32]) -> Result<()> {
        self.queue(Request::ReleaseLocators(locators.to_vec()))
    }

    fn write_commit(&mut self) -> Result<()> {
        self.queue(Request::Commit)
    }

    fn write_rollback(&mut self) -> Result<()> {
        self.queue(Request::Rollback)
    }

    async fn send(&mut self) -> Result<()> {
        self.process()
    }

    async fn read_open_query(&mut self) -> Result<OpenQueryReply> {
        match self.next_reply("open query")? {
            Reply::OpenQuery(reply) => reply,
            other => Err(unexpected("open query", &other)),
        }
    }

    async fn read_fetch(&mut self) -> Result<FetchReply> {
        match self.next_reply("fetch")? {
            Reply::Fetch(reply) => Ok(reply),
            other => Err(unexpected("fetch", &other)),
        }
    }

    async fn read_scrollable_fetch(&mut self) -> Result<FetchReply> {
        match self.next_reply("scrollable fetch")? {
            Reply::ScrollableFetch(reply) => Ok(reply),
            other => Err(unexpected("scrollable fetch", &other)),
        }
    }

    async fn read_positioning_fetch(&mut self) -> Result<PositioningReply> {
        match self.next_reply("positioning fetch")? {
            Reply::PositioningFetch(reply) => Ok(reply),
            other => Err(unexpected("positioning fetch", &other)),
        }
    }

    async fn read_cursor_close(&mut self) -> Result<StatusRecord> {
        match self.next_reply("cursor close")? {
            Reply::CursorClose(status) => Ok(status),
            other => Err(unexpected("cursor close", &other)),
        }
    }

    async fn read_execute(&mut self) -> Result<ExecuteReply> {
        match self.next_reply("execute")? {
            Reply::Execute(reply) => Ok(reply),
            other => Err(unexpected("execute", &other)),
        }
    }

    async fn read_release_locators(&mut self) -> Result<StatusRecord> {
        match self.next_reply("release locators")? {
            Reply::ReleaseLocators(status) => Ok(status),
            other => Err(unexpected("release locators", &other)),
        }
    }

    async fn read_commit(&mut self) -> Result<StatusRecord> {
        match self.next_reply("commit")? {
            Reply::Commit(status) => Ok(status),
            other => Err(unexpected("commit", &other)),
        }
    }

    async fn read_rollback(&mut self) -> Result<StatusRecord> {
        match self.next_reply("rollback")? {
            Reply::Rollback(status) => Ok(status),
            other => Err(unexpected("rollback", &other)),
        }
    }

    fn end_request(&mut self) {
        self.owner = None;
        self.requests.clear();
        self.replies.clear();
    }
}
