//! Transport contract for cursor round trips
//!
//! The cursor engine never encodes protocol messages itself. It writes
//! typed requests into a [`Transport`], flushes them with one `send`, reads
//! the typed replies back in the same order and ends the request. Exactly
//! one begin/send/end cycle makes one round trip.

pub mod memory;

pub use memory::{MemoryServer, MemoryTransport};

use crate::constants::{Concurrency, FetchOrientation, Holdability, ResultSetType, Sensitivity};
use crate::error::Result;
use crate::metadata::ColumnInfo;
use crate::positioned::PositionedStatement;
use crate::row::{FetchedRow, Value};
use crate::status::{RowStatusBatch, StatusRecord};

/// Server-assigned cursor identifier
pub type CursorId = u32;

/// Who a round trip is performed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOwner {
    /// Connection-level work (commit, rollback, opening a query)
    Connection,
    /// Work on behalf of one cursor
    Cursor(CursorId),
}

/// Request to open a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenQueryRequest {
    /// Query text
    pub sql: String,
    /// Requested scrollability
    pub result_set_type: ResultSetType,
    /// Requested concurrency
    pub concurrency: Concurrency,
    /// Requested sensitivity
    pub sensitivity: Sensitivity,
    /// Requested holdability
    pub holdability: Holdability,
    /// Rows to return per block
    pub fetch_size: u32,
    /// Maximum rows the result may expose (0 = unlimited)
    pub max_rows: u64,
    /// Deliver LOB columns as locators
    pub lob_locators: bool,
}

/// Rows returned by a fetch, with their statuses
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchReply {
    /// Rows in result order
    pub rows: Vec<FetchedRow>,
    /// Per-row and batch status
    pub status: RowStatusBatch,
}

/// Reply to an open query request
#[derive(Debug, Clone, PartialEq)]
pub struct OpenQueryReply {
    /// Cursor id for subsequent requests
    pub cursor_id: CursorId,
    /// Cursor name used by positioned statements
    pub cursor_name: String,
    /// Column descriptions
    pub columns: Vec<ColumnInfo>,
    /// Sensitivity the server granted
    pub sensitivity: Sensitivity,
    /// Server fetches whole rowsets for this cursor
    pub rowset_cursor: bool,
    /// LOB columns arrive as locators
    pub locators_enabled: bool,
    /// First block of rows
    pub first_block: FetchReply,
}

/// Reply to a positioning fetch (no rows)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PositioningReply {
    /// Completion status; an AFTER positioning carries the total row count
    pub status: StatusRecord,
}

/// Reply to a positioned statement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecuteReply {
    /// Rows affected
    pub update_count: u64,
    /// Completion status
    pub status: StatusRecord,
}

/// Request/reply channel to the server
///
/// Writes only buffer a request; nothing reaches the server before
/// [`Transport::send`]. Replies are read in the order the requests were
/// written. Implementations must reject a `begin_request` while another
/// request is still open.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Start a request chain
    fn begin_request(&mut self, owner: RequestOwner) -> Result<()>;

    /// Queue an open query request
    fn write_open_query(&mut self, request: &OpenQueryRequest) -> Result<()>;

    /// Queue a forward-only continuation fetch of up to `fetch_size` rows
    fn write_fetch(&mut self, cursor: CursorId, fetch_size: u32) -> Result<()>;

    /// Queue a scrollable fetch
    ///
    /// `reset_blocks` discards any partially received block left over from
    /// an earlier fetch.
    fn write_scrollable_fetch(
        &mut self,
        cursor: CursorId,
        orientation: FetchOrientation,
        row: i64,
        fetch_size: u32,
        reset_blocks: bool,
    ) -> Result<()>;

    /// Queue a positioning fetch (moves the server cursor, returns no rows)
    fn write_positioning_fetch(
        &mut self,
        cursor: CursorId,
        orientation: FetchOrientation,
        row: i64,
    ) -> Result<()>;

    /// Queue a cursor close
    fn write_cursor_close(&mut self, cursor: CursorId) -> Result<()>;

    /// Queue a positioned statement with its parameters
    fn write_execute(&mut self, statement: &PositionedStatement, params: &[Value]) -> Result<()>;

    /// Queue a release of LOB locators
    fn write_release_locators(&mut self, locators: &[u32]) -> Result<()>;

    /// Queue a commit
    fn write_commit(&mut self) -> Result<()>;

    /// Queue a rollback
    fn write_rollback(&mut self) -> Result<()>;

    /// Flush the queued requests
    async fn send(&mut self) -> Result<()>;

    /// Read an open query reply
    async fn read_open_query(&mut self) -> Result<OpenQueryReply>;

    /// Read a forward-only fetch reply
    async fn read_fetch(&mut self) -> Result<FetchReply>;

    /// Read a scrollable fetch reply
    async fn read_scrollable_fetch(&mut self) -> Result<FetchReply>;

    /// Read a positioning fetch reply
    async fn read_positioning_fetch(&mut self) -> Result<PositioningReply>;

    /// Read a cursor close reply
    async fn read_cursor_close(&mut self) -> Result<StatusRecord>;

    /// Read a positioned statement reply
    async fn read_execute(&mut self) -> Result<ExecuteReply>;

    /// Read a locator release reply
    async fn read_release_locators(&mut self) -> Result<StatusRecord>;

    /// Read a commit reply
    async fn read_commit(&mut self) -> Result<StatusRecord>;

    /// Read a rollback reply
    async fn read_rollback(&mut self) -> Result<StatusRecord>;

    /// Finish the request chain, discarding any unread replies
    fn end_request(&mut self);
}
