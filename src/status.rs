//! Completion status handling
//!
//! Every round trip returns one or more status records. This module turns
//! them into a [`Completion`] and keeps the warning chain a cursor exposes
//! to the application.

use std::fmt;

use crate::constants::status_code;
use crate::error::{Error, Result};

/// A server completion record: a code plus an optional message
///
/// Code 0 is success, positive codes are warnings or end-of-data, negative
/// codes are errors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusRecord {
    /// Completion code
    pub code: i32,
    /// Message text supplied by the server
    pub message: Option<String>,
    /// Row count carried by the record (total rows for an AFTER fetch,
    /// affected rows for DML)
    pub row_count: Option<u64>,
}

impl StatusRecord {
    /// Create a record with just a code
    pub fn new(code: i32) -> Self {
        Self {
            code,
            message: None,
            row_count: None,
        }
    }

    /// Create a record with a code and message
    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            row_count: None,
        }
    }

    /// Attach a row count
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }

    /// Success record
    pub fn success() -> Self {
        Self::new(status_code::SUCCESS)
    }

    /// End-of-data record
    pub fn end_of_data() -> Self {
        Self::new(status_code::END_OF_DATA)
    }

    /// Interpret the code
    pub fn interpret(&self) -> Completion {
        interpret(self)
    }

    /// True for the two "no more rows" sentinels
    pub fn is_end_of_data(&self) -> bool {
        is_end_of_data_code(self.code)
    }

    /// True for any negative code
    pub fn is_error(&self) -> bool {
        self.code < 0
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "[{}] {}", self.code, msg),
            None => write!(f, "[{}]", self.code),
        }
    }
}

/// Decoded outcome of a status record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Code 0
    Success,
    /// No more rows in the requested direction
    EndOfData,
    /// Positive, non-terminal code
    Warning(StatusRecord),
    /// Negative code
    Error(StatusRecord),
}

fn is_end_of_data_code(code: i32) -> bool {
    code == status_code::END_OF_DATA || code == status_code::ROWSET_START_REACHED
}

/// Classify a status record
pub fn interpret(status: &StatusRecord) -> Completion {
    match status.code {
        status_code::SUCCESS => Completion::Success,
        code if is_end_of_data_code(code) => Completion::EndOfData,
        code if code > 0 => Completion::Warning(status.clone()),
        _ => Completion::Error(status.clone()),
    }
}

/// Raise an error for a negative status, collect a warning for a positive one
///
/// Returns `true` when the record signals end of data.
pub fn check(status: &StatusRecord, warnings: &mut WarningChain) -> Result<bool> {
    match interpret(status) {
        Completion::Success => Ok(false),
        Completion::EndOfData => Ok(true),
        Completion::Warning(record) => {
            warnings.push(record);
            Ok(false)
        }
        Completion::Error(record) => Err(Error::server_terminated(&record)),
    }
}

// =============================================================================
// Warning Chain
// =============================================================================

/// A warning accumulated on a cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Warning code (always positive)
    pub code: i32,
    /// Warning text
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning {}: {}", self.code, self.message)
    }
}

/// Ordered list of warnings on a cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningChain {
    warnings: Vec<Warning>,
}

impl WarningChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a server warning
    pub fn push(&mut self, status: StatusRecord) {
        tracing::warn!(code = status.code, message = ?status.message, "server warning");
        self.warnings.push(Warning {
            code: status.code,
            message: status.message.unwrap_or_default(),
        });
    }

    /// Remove all warnings
    pub fn clear(&mut self) {
        self.warnings.clear();
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Number of warnings
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// Snapshot of the chain
    pub fn to_vec(&self) -> Vec<Warning> {
        self.warnings.clone()
    }

    /// Iterate over warnings, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter()
    }
}

// =============================================================================
// Row Status Batch
// =============================================================================

/// Status information returned alongside a block of rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowStatusBatch {
    /// One record per row returned, in row order
    pub row_statuses: Vec<StatusRecord>,
    /// Batch-level warning (for example start-of-rowset reached)
    pub batch_warning: Option<StatusRecord>,
    /// End-of-data marker following the last returned row
    pub end_of_data: Option<StatusRecord>,
    /// The server ended the query; the cursor is no longer open there
    pub query_terminated: Option<StatusRecord>,
}

impl RowStatusBatch {
    /// Batch with `rows` success records and nothing else
    pub fn all_success(rows: usize) -> Self {
        Self {
            row_statuses: vec![StatusRecord::success(); rows],
            ..Default::default()
        }
    }

    /// Status of the row at `offset` within the batch
    pub fn row(&self, offset: usize) -> Option<&StatusRecord> {
        self.row_statuses.get(offset)
    }

    /// True when the batch-level warning is the start-of-rowset sentinel
    pub fn reached_start(&self) -> bool {
        self.batch_warning
            .as_ref()
            .map(|w| w.code == status_code::ROWSET_START_REACHED)
            .unwrap_or(false)
    }

    /// True when an end-of-data marker followed the returned rows
    pub fn reached_end(&self) -> bool {
        self.end_of_data.is_some()
    }

    /// Run a per-row status check for the row at `offset`
    ///
    /// Negative codes raise, positive codes other than the two end-of-data
    /// sentinels become warnings.
    pub fn check_row(&self, offset: usize, warnings: &mut WarningChain) -> Result<()> {
        if let Some(status) = self.row(offset) {
            check(status, warnings)?;
        }
        Ok(())
    }
}
