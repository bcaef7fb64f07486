//! Cursor protocol constants
//!
//! Fetch orientations, status codes and the enums describing the kind of
//! cursor a query was opened with.

use std::fmt;

use crate::error::Error;

/// Fetch size used when the caller leaves it at 0
pub const DEFAULT_FETCH_SIZE: u32 = 64;

// =============================================================================
// Fetch Orientation
// =============================================================================

/// Fetch orientation for positioning and scrollable fetch requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FetchOrientation {
    /// Fetch the rowset following the current one (default)
    #[default]
    Next = 0,
    /// Relative to the server cursor position
    Relative = 1,
    /// Absolute row number (negative counts back from the end)
    Absolute = 2,
    /// Position after the last row
    After = 3,
    /// Position before the first row
    Before = 4,
    /// Fetch the rowset preceding the current one
    Prior = 5,
    /// Fetch the first rowset
    First = 6,
    /// Fetch the last rowset
    Last = 7,
    /// Refetch the current rowset
    Current = 8,
}

impl FetchOrientation {
    /// Orientations that move relative to where the cursor already is
    pub fn is_relative_move(self) -> bool {
        matches!(
            self,
            FetchOrientation::Next | FetchOrientation::Prior | FetchOrientation::Relative
        )
    }
}

impl TryFrom<u8> for FetchOrientation {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FetchOrientation::Next),
            1 => Ok(FetchOrientation::Relative),
            2 => Ok(FetchOrientation::Absolute),
            3 => Ok(FetchOrientation::After),
            4 => Ok(FetchOrientation::Before),
            5 => Ok(FetchOrientation::Prior),
            6 => Ok(FetchOrientation::First),
            7 => Ok(FetchOrientation::Last),
            8 => Ok(FetchOrientation::Current),
            _ => Err(Error::Protocol(format!("invalid fetch orientation: {}", value))),
        }
    }
}

// =============================================================================
// Status Codes
// =============================================================================

/// Completion codes carried by status records
#[allow(missing_docs)]
pub mod status_code {
    pub const SUCCESS: i32 = 0;
    /// No more rows in the requested direction
    pub const END_OF_DATA: i32 = 100;
    /// Row was deleted after the cursor was opened
    pub const HOLE_DETECTED: i32 = 222;
    /// Rowset fetch reached the start of the result
    pub const ROWSET_START_REACHED: i32 = 20237;
    /// Query text does not name a known table
    pub const UNDEFINED_OBJECT: i32 = -204;
    /// Positioned statement issued while the server cursor is not on a row
    pub const CURSOR_NOT_POSITIONED: i32 = -508;
    /// Statement refers to a cursor that is not open
    pub const CURSOR_NOT_OPEN: i32 = -501;
    /// LOB locator id is unknown to the server
    pub const INVALID_LOCATOR: i32 = -423;
}

// =============================================================================
// Cursor Kinds
// =============================================================================

/// Scrollability of a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSetType {
    /// Single-row forward traversal only
    #[default]
    ForwardOnly,
    /// Scrollable, does not see concurrent changes
    ScrollInsensitive,
    /// Scrollable, sees concurrent changes
    ScrollSensitive,
}

impl ResultSetType {
    /// Check if the cursor may move backwards or jump
    pub fn is_scrollable(self) -> bool {
        !matches!(self, ResultSetType::ForwardOnly)
    }
}

/// Whether positioned mutation is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Read-only result set
    #[default]
    ReadOnly,
    /// Positioned UPDATE/DELETE/INSERT allowed
    Updatable,
}

/// How a cursor observes concurrent changes to its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sensitivity {
    /// Not reported by the server
    #[default]
    Unknown,
    /// Materialized result, changes invisible
    Insensitive,
    /// Fixed membership, row contents visible
    SensitiveStatic,
    /// Membership and contents visible, row count never known
    SensitiveDynamic,
}

/// Whether a cursor survives a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Holdability {
    /// Cursor stays open across commit
    #[default]
    HoldCursorsOverCommit,
    /// Cursor is closed by commit
    CloseCursorsAtCommit,
}

impl Holdability {
    /// Check if the cursor stays open across commit
    pub fn is_holdable(self) -> bool {
        matches!(self, Holdability::HoldCursorsOverCommit)
    }
}

/// Fetch direction hint supplied by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDirection {
    /// Rows processed first to last (default)
    #[default]
    Forward,
    /// Rows processed last to first
    Reverse,
    /// Processing order unknown
    Unknown,
}

impl fmt::Display for FetchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchDirection::Forward => write!(f, "forward"),
            FetchDirection::Reverse => write!(f, "reverse"),
            FetchDirection::Unknown => write!(f, "unknown"),
        }
    }
}
