//! Connection and result set handles
//!
//! A [`Connection`] owns the transport and every cursor opened on it. All
//! of that lives behind one `tokio::sync::Mutex`, shared with each
//! [`ResultSet`] handle, so operations on any cursor of a connection run
//! one at a time and never interleave their round trips.
//!
//! # Example
//!
//! ```rust
//! use netcursor::{ColumnInfo, Config, Connection, CursorOptions, MemoryServer, Value};
//!
//! # async fn example() -> netcursor::Result<()> {
//! let server = MemoryServer::new();
//! server.add_table(
//!     "SELECT ID FROM APP.T",
//!     vec![ColumnInfo::new("ID").with_table("APP", "T")],
//!     (1..=10).map(|i| vec![Value::Integer(i)]).collect(),
//! );
//!
//! let conn = Connection::new(Box::new(server.transport()), Config::new());
//! let rs = conn
//!     .open_cursor("SELECT ID FROM APP.T", CursorOptions::scroll_insensitive())
//!     .await?;
//! assert!(rs.absolute(4).await?);
//! assert_eq!(rs.get_value(1).await?, Value::Integer(4));
//! rs.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::config::{Config, CursorOptions, StatementContext};
use crate::constants::{FetchDirection, ResultSetType};
use crate::cursor::CursorState;
use crate::error::{Error, Result};
use crate::metadata::ResultMetadata;
use crate::registry::TransactionBoundaryRegistry;
use crate::row::Value;
use crate::sensitivity::SensitivityPolicy;
use crate::status::Warning;
use crate::transport::{CursorId, RequestOwner, Transport};

// Connection ID counter
static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// State shared by a connection and its result sets
struct ConnectionInner {
    transport: Box<dyn Transport>,
    cursors: HashMap<CursorId, CursorState>,
    registry: TransactionBoundaryRegistry,
    config: Config,
    broken: bool,
}

impl ConnectionInner {
    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(Error::Disconnect("connection is no longer usable".to_string()));
        }
        Ok(())
    }

    /// The cursor and the transport it runs its round trips on
    fn split(&mut self, id: CursorId, operation: &str) -> Result<(&mut CursorState, &mut dyn Transport)> {
        self.ensure_usable()?;
        let cursor = self
            .cursors
            .get_mut(&id)
            .ok_or_else(|| Error::ClosedResultSet(operation.to_string()))?;
        Ok((cursor, self.transport.as_mut()))
    }

    /// Forget a cursor whose handle is gone
    fn forget(&mut self, id: CursorId) {
        if let Some(mut cursor) = self.cursors.remove(&id) {
            if !cursor.is_closed() {
                tracing::debug!(cursor_id = id, "result set dropped while open");
                cursor.mark_closed();
            }
        }
        self.registry.deregister(id);
    }

    fn cursor(&self, id: CursorId, operation: &str) -> Result<&CursorState> {
        self.cursors
            .get(&id)
            .ok_or_else(|| Error::ClosedResultSet(operation.to_string()))
    }

    fn cursor_mut(&mut self, id: CursorId, operation: &str) -> Result<&mut CursorState> {
        self.cursors
            .get_mut(&id)
            .ok_or_else(|| Error::ClosedResultSet(operation.to_string()))
    }

    /// Bookkeeping after a cursor call
    ///
    /// Applies a commit the call chained, flows a commit the cursor asked
    /// for under auto-commit, and keeps the cursor's registration in step
    /// with whether it is still open.
    async fn after_cursor_call<T>(&mut self, id: CursorId, result: &Result<T>, committed: bool) -> Result<()> {
        if let Err(e) = result {
            if e.is_connection_error() {
                tracing::warn!(error = %e, "connection failed");
                self.broken = true;
                return Ok(());
            }
        }
        if committed {
            self.complete_commit();
        }
        let requested = self
            .cursors
            .get_mut(&id)
            .map(CursorState::take_commit_request)
            .unwrap_or(false);
        if requested && self.config.auto_commit {
            self.flow_commit().await?;
        }
        match self.cursors.get(&id) {
            Some(cursor) if !cursor.is_closed() => self.registry.register(id),
            _ => self.registry.deregister(id),
        }
        Ok(())
    }

    async fn flow_commit(&mut self) -> Result<()> {
        let transport = self.transport.as_mut();
        transport.begin_request(RequestOwner::Connection)?;
        let result = async {
            transport.write_commit()?;
            transport.send().await?;
            transport.read_commit().await
        }
        .await;
        transport.end_request();
        let status = result?;
        if status.is_error() {
            return Err(Error::server_terminated(&status));
        }
        self.complete_commit();
        Ok(())
    }

    fn complete_commit(&mut self) {
        let closed = self.registry.notify_commit(&mut self.cursors);
        tracing::debug!(closed_cursors = closed.len(), "commit completed");
    }

    async fn flow_rollback(&mut self) -> Result<()> {
        let transport = self.transport.as_mut();
        transport.begin_request(RequestOwner::Connection)?;
        let result = async {
            transport.write_rollback()?;
            transport.send().await?;
            transport.read_rollback().await
        }
        .await;
        transport.end_request();
        let status = result?;
        if status.is_error() {
            return Err(Error::server_terminated(&status));
        }
        let closed = self.registry.notify_rollback(&mut self.cursors);
        tracing::debug!(closed_cursors = closed.len(), "rollback completed");
        Ok(())
    }
}

/// Connection state plus the result sets dropped while it was locked
struct Shared {
    state: Mutex<ConnectionInner>,
    dropped: std::sync::Mutex<Vec<CursorId>>,
}

impl Shared {
    fn new(inner: ConnectionInner) -> Self {
        Self {
            state: Mutex::new(inner),
            dropped: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Take the connection lock, then forget every result set dropped
    /// while someone else held it
    async fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        let mut inner = self.state.lock().await;
        let dropped = std::mem::take(
            &mut *self.dropped.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for id in dropped {
            inner.forget(id);
        }
        inner
    }
}

/// A connection carrying cursors
///
/// # Thread Safety
///
/// `Connection` and [`ResultSet`] are `Send` and `Sync`. Every operation
/// takes the connection lock for its whole duration, including its round
/// trip, so calls on different result sets of one connection are
/// serialized.
pub struct Connection {
    inner: Arc<Shared>,
    id: u32,
}

impl Connection {
    /// Create a connection over an established transport
    pub fn new(transport: Box<dyn Transport>, config: Config) -> Self {
        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, auto_commit = config.auto_commit, "connection created");
        let inner = ConnectionInner {
            transport,
            cursors: HashMap::new(),
            registry: TransactionBoundaryRegistry::new(),
            config,
            broken: false,
        };
        Self {
            inner: Arc::new(Shared::new(inner)),
            id,
        }
    }

    /// Get the connection ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Open a cursor over a query
    pub async fn open_cursor(&self, sql: &str, options: CursorOptions) -> Result<ResultSet> {
        let mut inner = self.inner.lock().await;
        inner.ensure_usable()?;
        let context = StatementContext::resolve(&inner.config, &options)?;
        let lob_locators = inner.config.lob_locators;

        let result =
            CursorState::open(inner.transport.as_mut(), sql, &options, context, lob_locators).await;
        let cursor = match result {
            Ok(cursor) => cursor,
            Err(e) => {
                if e.is_connection_error() {
                    inner.broken = true;
                }
                return Err(e);
            }
        };

        let id = cursor.id();
        inner.cursors.insert(id, cursor);
        inner.registry.register(id);
        Ok(ResultSet {
            inner: Arc::clone(&self.inner),
            id,
        })
    }

    /// Commit the current transaction
    ///
    /// Non-holdable cursors are closed; holdable cursors stay open but lose
    /// their LOB locators.
    pub async fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_usable()?;
        inner.flow_commit().await
    }

    /// Roll back the current transaction, closing every cursor
    pub async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_usable()?;
        inner.flow_rollback().await
    }

    /// Turn auto-commit on or off
    pub async fn set_auto_commit(&self, auto_commit: bool) {
        let mut inner = self.inner.lock().await;
        inner.config.auto_commit = auto_commit;
        for cursor in inner.cursors.values_mut() {
            cursor.set_auto_commit(auto_commit);
        }
    }

    /// Current auto-commit setting
    pub async fn auto_commit(&self) -> bool {
        self.inner.lock().await.config.auto_commit
    }

    /// Number of cursors still open on the client
    pub async fn active_cursor_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.cursors.values().filter(|c| !c.is_closed()).count()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

// =============================================================================
// Result Set
// =============================================================================

/// Handle onto one open cursor
///
/// Column indexes are 1-based.
pub struct ResultSet {
    inner: Arc<Shared>,
    id: CursorId,
}

/// Run an async cursor operation under the connection lock
macro_rules! cursor_call {
    ($self:ident, $op:literal, |$cursor:ident, $transport:ident| $body:expr) => {{
        let mut guard = $self.inner.lock().await;
        let inner = &mut *guard;
        let result = match inner.split($self.id, $op) {
            Ok(($cursor, $transport)) => $body.await,
            Err(e) => Err(e),
        };
        inner.after_cursor_call($self.id, &result, false).await?;
        result
    }};
}

/// Run a mutation that may chain a commit, under the connection lock
macro_rules! committing_call {
    ($self:ident, $op:literal, |$cursor:ident, $transport:ident| $body:expr) => {{
        let mut guard = $self.inner.lock().await;
        let inner = &mut *guard;
        let result = match inner.split($self.id, $op) {
            Ok(($cursor, $transport)) => $body.await,
            Err(e) => Err(e),
        };
        let committed = matches!(result, Ok(true));
        inner.after_cursor_call($self.id, &result, committed).await?;
        result.map(|_| ())
    }};
}

impl ResultSet {
    /// Server cursor id
    pub fn id(&self) -> CursorId {
        self.id
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Move to the next row; false once past the last row
    pub async fn next(&self) -> Result<bool> {
        cursor_call!(self, "next", |cursor, transport| cursor.next(transport))
    }

    /// Move to the previous row; false once before the first row
    pub async fn previous(&self) -> Result<bool> {
        cursor_call!(self, "previous", |cursor, transport| cursor.previous(transport))
    }

    /// Move to the first row
    pub async fn first(&self) -> Result<bool> {
        cursor_call!(self, "first", |cursor, transport| cursor.first(transport))
    }

    /// Move to the last row
    pub async fn last(&self) -> Result<bool> {
        cursor_call!(self, "last", |cursor, transport| cursor.last(transport))
    }

    /// Move before the first row
    pub async fn before_first(&self) -> Result<()> {
        cursor_call!(self, "beforeFirst", |cursor, transport| cursor.before_first(transport))
    }

    /// Move after the last row
    pub async fn after_last(&self) -> Result<()> {
        cursor_call!(self, "afterLast", |cursor, transport| cursor.after_last(transport))
    }

    /// Move to row `row`; negative values count back from the last row
    pub async fn absolute(&self, row: i64) -> Result<bool> {
        cursor_call!(self, "absolute", |cursor, transport| cursor.absolute(transport, row))
    }

    /// Move `rows` rows forward (or back, when negative)
    pub async fn relative(&self, rows: i64) -> Result<bool> {
        cursor_call!(self, "relative", |cursor, transport| cursor.relative(transport, rows))
    }

    /// Current row number, 0 when not on a row
    pub async fn get_row(&self) -> Result<i64> {
        cursor_call!(self, "getRow", |cursor, transport| cursor.get_row(transport))
    }

    // =========================================================================
    // Position Queries
    // =========================================================================

    /// Check if the cursor is before the first row
    pub async fn is_before_first(&self) -> Result<bool> {
        cursor_call!(self, "isBeforeFirst", |cursor, transport| cursor.is_before_first(transport))
    }

    /// Check if the cursor is after the last row
    pub async fn is_after_last(&self) -> Result<bool> {
        cursor_call!(self, "isAfterLast", |cursor, transport| cursor.is_after_last(transport))
    }

    /// Check if the cursor is on the first row
    pub async fn is_first(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "isFirst")?.is_first()
    }

    /// Check if the cursor is on the last row
    pub async fn is_last(&self) -> Result<bool> {
        cursor_call!(self, "isLast", |cursor, transport| cursor.is_last(transport))
    }

    // =========================================================================
    // Row Data
    // =========================================================================

    /// Value of a column in the current row
    pub async fn get_value(&self, column: usize) -> Result<Value> {
        let inner = self.inner.lock().await;
        inner.cursor(self.id, "getValue")?.get_value(column)
    }

    /// Value of the column with the given name
    pub async fn get_by_name(&self, name: &str) -> Result<Value> {
        let inner = self.inner.lock().await;
        let cursor = inner.cursor(self.id, "getValue")?;
        let column = cursor.metadata().find_column(name).ok_or_else(|| {
            Error::InvalidColumnIndex {
                index: 0,
                count: cursor.metadata().column_count(),
            }
        })?;
        cursor.get_value(column)
    }

    /// LOB value of a column; each LOB column can be read once per row
    pub async fn get_lob(&self, column: usize) -> Result<Value> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "getLob")?.get_lob(column)
    }

    /// Check if the current row is a hole left by a delete
    pub async fn row_deleted(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        inner.cursor(self.id, "rowDeleted")?.row_deleted()
    }

    /// Check if the current row was updated through this cursor
    pub async fn row_updated(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        inner.cursor(self.id, "rowUpdated")?.row_updated()
    }

    /// Column descriptions
    pub async fn metadata(&self) -> Result<ResultMetadata> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getMetaData")?.metadata().clone())
    }

    /// Name positioned statements use for this cursor
    pub async fn cursor_name(&self) -> Result<String> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getCursorName")?.cursor_name().to_string())
    }

    /// Scrollability
    pub async fn result_set_type(&self) -> Result<ResultSetType> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getType")?.result_set_type())
    }

    /// Caching policy the cursor runs under
    pub async fn sensitivity(&self) -> Result<SensitivityPolicy> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getSensitivity")?.policy())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Stage a value for a column of the current or insert row
    pub async fn update_value(&self, column: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "updateValue")?.update_value(column, value)
    }

    /// Stage a null for a column
    pub async fn update_null(&self, column: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "updateNull")?.update_null(column)
    }

    /// Switch to the insert row
    pub async fn move_to_insert_row(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "moveToInsertRow")?.move_to_insert_row()
    }

    /// Return from the insert row
    pub async fn move_to_current_row(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "moveToCurrentRow")?.move_to_current_row()
    }

    /// Insert the staged insert row
    pub async fn insert_row(&self) -> Result<()> {
        cursor_call!(self, "insertRow", |cursor, transport| cursor.insert_row(transport))
    }

    /// Write staged values to the current row
    pub async fn update_row(&self) -> Result<()> {
        committing_call!(self, "updateRow", |cursor, transport| cursor.update_row(transport))
    }

    /// Delete the current row
    pub async fn delete_row(&self) -> Result<()> {
        committing_call!(self, "deleteRow", |cursor, transport| cursor.delete_row(transport))
    }

    /// Discard staged values
    pub async fn cancel_row_updates(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "cancelRowUpdates")?.cancel_row_updates()
    }

    /// Reload the current row from the server
    pub async fn refresh_row(&self) -> Result<()> {
        cursor_call!(self, "refreshRow", |cursor, transport| cursor.refresh_row(transport))
    }

    // =========================================================================
    // Tuning
    // =========================================================================

    /// Change the number of rows fetched per round trip; 0 selects the default
    pub async fn set_fetch_size(&self, rows: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "setFetchSize")?.set_fetch_size(rows)
    }

    /// Rows fetched per round trip
    pub async fn fetch_size(&self) -> Result<u32> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getFetchSize")?.fetch_size())
    }

    /// Change the fetch direction hint
    pub async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .cursor_mut(self.id, "setFetchDirection")?
            .set_fetch_direction(direction)
    }

    /// Fetch direction hint
    pub async fn fetch_direction(&self) -> Result<FetchDirection> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getFetchDirection")?.fetch_direction())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Warnings collected since the last navigation
    pub async fn warnings(&self) -> Result<Vec<Warning>> {
        let inner = self.inner.lock().await;
        Ok(inner.cursor(self.id, "getWarnings")?.warnings())
    }

    /// Drop collected warnings
    pub async fn clear_warnings(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cursor_mut(self.id, "clearWarnings")?.clear_warnings();
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the cursor; closing twice is a no-op
    pub async fn close(&self) -> Result<()> {
        committing_call!(self, "close", |cursor, transport| cursor.close(transport))
    }

    /// Check if the cursor is closed
    pub async fn is_closed(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.cursors.get(&self.id).map(CursorState::is_closed).unwrap_or(true)
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet").field("id", &self.id).finish()
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        // Can't do async cleanup in Drop; the server cursor goes away with
        // the transaction or the connection
        match self.inner.state.try_lock() {
            Ok(mut inner) => inner.forget(self.id),
            Err(_) => {
                tracing::debug!(cursor_id = self.id, "connection busy, result set forgotten on next use");
                self.inner
                    .dropped
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::Holdability;
    use crate::metadata::ColumnInfo;
    use crate::transport::MemoryServer;

    const EMP: &str = "SELECT ID FROM APP.EMP";

    fn connect(server: &MemoryServer) -> Connection {
        server.add_table(
            EMP,
            vec![ColumnInfo::new("ID").with_table("APP", "EMP")],
            (1..=3).map(|id| vec![Value::Integer(id)]).collect(),
        );
        Connection::new(
            Box::new(server.transport()),
            Config::new()
                .with_auto_commit(false)
                .with_holdability(Holdability::HoldCursorsOverCommit),
        )
    }

    #[tokio::test]
    async fn test_drop_while_locked_is_applied_later() {
        let server = MemoryServer::new();
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        let id = rs.id();

        let guard = conn.inner.state.lock().await;
        drop(rs);
        assert!(guard.cursors.contains_key(&id));
        drop(guard);

        assert_eq!(conn.active_cursor_count().await, 0);
        conn.commit().await.unwrap();
        let inner = conn.inner.lock().await;
        assert!(inner.cursors.is_empty());
    }

    #[tokio::test]
    async fn test_drop_when_idle_forgets_at_once() {
        let server = MemoryServer::new();
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        drop(rs);
        assert!(conn.inner.state.lock().await.cursors.is_empty());
        assert!(conn.inner.dropped.lock().unwrap().is_empty());
    }
}
