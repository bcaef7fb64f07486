//! Error types for the cursor engine
//!
//! This module defines every error a cursor operation can raise, from local
//! precondition failures (closed result set, wrong cursor type) to errors
//! reported by the server and transport failures.

use thiserror::Error;

use crate::status::StatusRecord;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cursor engine
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Structural Preconditions
    // =========================================================================
    /// Operation attempted on a closed result set
    #[error("invalid operation '{0}': result set is closed")]
    ClosedResultSet(String),

    /// Operation requires the cursor to be on a valid row
    #[error("invalid operation at current cursor position")]
    InvalidCursorPosition,

    /// Operation requires a scrollable cursor
    #[error("the cursor must be scrollable for this operation")]
    NotScrollable,

    /// Operation requires an updatable result set
    #[error("'{0}' not allowed because the result set is not updatable")]
    NotUpdatable(String),

    /// Column is not updatable through this cursor
    #[error("column {0} is not updatable")]
    ColumnNotUpdatable(usize),

    /// Column index out of range (indexes are 1-based)
    #[error("column index {index} out of range, result has {count} columns")]
    InvalidColumnIndex { index: usize, count: usize },

    /// insertRow called while positioned on the current row
    #[error("cursor is not positioned on the insert row")]
    NotOnInsertRow,

    /// Operation requires a current row (not the insert row)
    #[error("there is no current row")]
    NoCurrentRow,

    /// Fetch size or fetch direction rejected
    #[error("invalid fetch direction or size: {0}")]
    InvalidFetchDirectionOrSize(String),

    /// Operation needs an exact row count, which sensitive dynamic cursors lack
    #[error("operation is not valid for a sensitive dynamic cursor")]
    InvalidForSensitiveDynamic,

    /// LOB column already retrieved for the current row
    #[error("stream or LOB for column {0} has already been retrieved")]
    LobAlreadyStreamed(usize),

    /// LOB access on a column that does not hold LOB values
    #[error("column {0} is not a LOB column")]
    NotALobColumn(usize),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// The server terminated the query with a negative status code
    #[error("query terminated by server (code {code}): {message}")]
    ServerTerminatedQuery { code: i32, message: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Transport failure, fatal to the owning connection
    #[error("disconnected: {0}")]
    Disconnect(String),

    /// Reply did not match the request that was written
    #[error("protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration string could not be parsed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `ServerTerminatedQuery` error from a status record
    pub fn server_terminated(status: &StatusRecord) -> Self {
        Error::ServerTerminatedQuery {
            code: status.code,
            message: status
                .message
                .clone()
                .unwrap_or_else(|| "no message".to_string()),
        }
    }

    /// Server status code carried by this error, if any
    pub fn sql_code(&self) -> Option<i32> {
        match self {
            Error::ServerTerminatedQuery { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this is a connection-related error
    ///
    /// Connection errors are fatal: the cursor layer never retries them.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Disconnect(_) | Error::Protocol(_))
    }

    /// Check if this error was raised locally, before any network call
    pub fn is_precondition_error(&self) -> bool {
        matches!(
            self,
            Error::ClosedResultSet(_)
                | Error::InvalidCursorPosition
                | Error::NotScrollable
                | Error::NotUpdatable(_)
                | Error::ColumnNotUpdatable(_)
                | Error::InvalidColumnIndex { .. }
                | Error::NotOnInsertRow
                | Error::NoCurrentRow
                | Error::InvalidFetchDirectionOrSize(_)
                | Error::InvalidForSensitiveDynamic
                | Error::LobAlreadyStreamed(_)
                | Error::NotALobColumn(_)
        )
    }
}
