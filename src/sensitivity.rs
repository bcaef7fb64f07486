//! Per-cursor-kind caching rules
//!
//! Which rows may be served from the cached window, whether the row count
//! can be known, and whether a cached row may be reused all depend on how
//! the cursor observes concurrent changes.

use crate::constants::{FetchOrientation, ResultSetType, Sensitivity};
use crate::window::{PositionFlags, RowsetWindow};

/// Caching rules for one cursor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityPolicy {
    /// Single-row forward traversal, no window
    ForwardOnly,
    /// Scrollable, changes invisible
    Insensitive,
    /// Scrollable, fixed membership
    SensitiveStatic,
    /// Scrollable, membership may change; no absolute positions
    SensitiveDynamic,
}

impl SensitivityPolicy {
    /// Select the policy for an opened cursor
    ///
    /// `sensitivity` is what the server reported at open; a scroll-sensitive
    /// cursor with unknown sensitivity is treated as static.
    pub fn for_cursor(result_set_type: ResultSetType, sensitivity: Sensitivity) -> Self {
        match (result_set_type, sensitivity) {
            (ResultSetType::ForwardOnly, _) => SensitivityPolicy::ForwardOnly,
            (_, Sensitivity::SensitiveDynamic) => SensitivityPolicy::SensitiveDynamic,
            (_, Sensitivity::SensitiveStatic) => SensitivityPolicy::SensitiveStatic,
            (ResultSetType::ScrollSensitive, Sensitivity::Unknown) => {
                SensitivityPolicy::SensitiveStatic
            }
            _ => SensitivityPolicy::Insensitive,
        }
    }

    /// Check if this is the dynamic variant
    pub fn is_dynamic(self) -> bool {
        matches!(self, SensitivityPolicy::SensitiveDynamic)
    }

    /// Check if the row count is knowable and used for positioning
    pub fn requires_row_count(self) -> bool {
        matches!(
            self,
            SensitivityPolicy::Insensitive | SensitivityPolicy::SensitiveStatic
        )
    }

    /// Check if a cached row may be handed out again on revisit
    ///
    /// Rows with LOB columns are always refetched: a locator delivered with
    /// the earlier copy may since have been released.
    pub fn can_reuse_cached_row(self, has_lob_columns: bool) -> bool {
        match self {
            SensitivityPolicy::ForwardOnly => false,
            SensitivityPolicy::SensitiveDynamic => true,
            SensitivityPolicy::Insensitive | SensitivityPolicy::SensitiveStatic => {
                !has_lob_columns
            }
        }
    }

    /// Decide whether a move can be served from the cached window
    ///
    /// For the dynamic variant `target` is ignored for NEXT and PRIOR, and
    /// for RELATIVE it is the offset from the start of the window.
    pub fn is_row_in_window(
        self,
        window: &RowsetWindow,
        target: i64,
        orientation: FetchOrientation,
        flags: &PositionFlags,
        has_lob_columns: bool,
    ) -> bool {
        match self {
            SensitivityPolicy::ForwardOnly => false,
            SensitivityPolicy::SensitiveDynamic => {
                let current = window.current_row_in_rowset;
                let received = window.rows_received_in_current_rowset;
                match orientation {
                    FetchOrientation::Next => !flags.is_after_last && current + 1 < received,
                    FetchOrientation::Prior => !flags.is_before_first && current - 1 >= 0,
                    FetchOrientation::Relative => target >= 0 && target < received,
                    _ => false,
                }
            }
            SensitivityPolicy::Insensitive | SensitivityPolicy::SensitiveStatic => {
                self.can_reuse_cached_row(has_lob_columns) && window.contains(target)
            }
        }
    }
}
