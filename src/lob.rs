//! LOB locator tracking
//!
//! When the server supports locators, LOB columns arrive as handles to
//! server-side values instead of the data itself. The cursor tracks the
//! handles delivered with its current row so that the ones the application
//! never asked for can be released when the cursor moves on.

use crate::error::{Error, Result};
use crate::metadata::ResultMetadata;
use crate::row::{Row, Value};
use crate::transport::{RequestOwner, Transport};

/// Large object flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    /// Binary large object
    Blob,
    /// Character large object
    Clob,
}

/// Handle to a LOB value held by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    /// Server-assigned locator id
    pub locator_id: u32,
    /// Blob or Clob
    pub kind: LobKind,
    /// 1-based column the locator was delivered in
    pub column: usize,
}

impl LobLocator {
    /// Create a locator handle
    pub fn new(locator_id: u32, kind: LobKind, column: usize) -> Self {
        Self {
            locator_id,
            kind,
            column,
        }
    }
}

/// A locator delivered with the current row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedLocator {
    /// 1-based column
    pub column: usize,
    /// Server-assigned locator id
    pub locator_id: u32,
    /// Blob or Clob
    pub kind: LobKind,
    /// Handed to the application; exempt from implicit release
    pub published: bool,
}

/// Locators opened against the current row
///
/// The `Disabled` variant is used when the result has no LOB columns or
/// locators are off, so call sites never need to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobLocatorTracker {
    /// Nothing to track
    Disabled,
    /// Locators for the current row
    Tracking(Vec<TrackedLocator>),
}

impl LobLocatorTracker {
    /// Create a tracker for a result
    pub fn for_result(metadata: &ResultMetadata, locators_enabled: bool) -> Self {
        if locators_enabled && metadata.has_lob_columns() {
            LobLocatorTracker::Tracking(Vec::new())
        } else {
            LobLocatorTracker::Disabled
        }
    }

    /// Check if locators are being tracked
    pub fn is_enabled(&self) -> bool {
        matches!(self, LobLocatorTracker::Tracking(_))
    }

    /// Start tracking a locator
    pub fn open(&mut self, column: usize, locator_id: u32, kind: LobKind) {
        if let LobLocatorTracker::Tracking(locators) = self {
            if locators.iter().any(|l| l.locator_id == locator_id) {
                return;
            }
            locators.push(TrackedLocator {
                column,
                locator_id,
                kind,
                published: false,
            });
        }
    }

    /// Track every locator carried by a row
    pub fn track_row(&mut self, row: &Row) {
        for value in row.values() {
            if let Value::Lob(locator) = value {
                self.open(locator.column, locator.locator_id, locator.kind);
            }
        }
    }

    /// Mark the locator in `column` as handed to the application
    pub fn mark_published(&mut self, column: usize) -> Result<()> {
        if let LobLocatorTracker::Tracking(locators) = self {
            if let Some(locator) = locators.iter_mut().find(|l| l.column == column) {
                if locator.published {
                    return Err(Error::LobAlreadyStreamed(column));
                }
                locator.published = true;
            }
        }
        Ok(())
    }

    /// Ids of locators not yet handed out
    pub fn unpublished_ids(&self) -> Vec<u32> {
        match self {
            LobLocatorTracker::Disabled => Vec::new(),
            LobLocatorTracker::Tracking(locators) => locators
                .iter()
                .filter(|l| !l.published)
                .map(|l| l.locator_id)
                .collect(),
        }
    }

    /// Number of tracked locators
    pub fn len(&self) -> usize {
        match self {
            LobLocatorTracker::Disabled => 0,
            LobLocatorTracker::Tracking(locators) => locators.len(),
        }
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every unpublished locator in one round trip, then forget all
    ///
    /// Published locators stay valid on the server until the application
    /// frees them or the transaction ends.
    pub async fn release_unpublished(
        &mut self,
        transport: &mut dyn Transport,
        owner: RequestOwner,
    ) -> Result<()> {
        let ids = self.unpublished_ids();
        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "releasing LOB locators");
            transport.begin_request(owner)?;
            let result = async {
                transport.write_release_locators(&ids)?;
                transport.send().await?;
                transport.read_release_locators().await
            }
            .await;
            transport.end_request();
            let status = result?;
            if status.is_error() {
                return Err(Error::server_terminated(&status));
            }
        }
        self.discard_all();
        Ok(())
    }

    /// Forget all locators without a round trip
    ///
    /// Used at transaction boundaries, where the server has already
    /// invalidated them.
    pub fn discard_all(&mut self) {
        if let LobLocatorTracker::Tracking(locators) = self {
            locators.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracking() -> LobLocatorTracker {
        LobLocatorTracker::Tracking(Vec::new())
    }

    #[test]
    fn test_disabled_is_noop() {
        let mut tracker = LobLocatorTracker::Disabled;
        tracker.open(1, 10, LobKind::Blob);
        assert!(tracker.is_empty());
        assert!(tracker.mark_published(1).is_ok());
        assert!(tracker.unpublished_ids().is_empty());
    }

    #[test]
    fn test_publish_once() {
        let mut tracker = tracking();
        tracker.open(2, 11, LobKind::Clob);
        tracker.open(2, 11, LobKind::Clob);
        assert_eq!(tracker.len(), 1);

        tracker.mark_published(2).unwrap();
        assert_eq!(
            tracker.mark_published(2).unwrap_err(),
            Error::LobAlreadyStreamed(2)
        );
        assert!(tracker.unpublished_ids().is_empty());
    }

    #[test]
    fn test_track_row_and_discard() {
        let mut tracker = tracking();
        let row = Row::new(vec![
            Value::Integer(1),
            Value::Lob(LobLocator::new(20, LobKind::Blob, 2)),
            Value::Lob(LobLocator::new(21, LobKind::Clob, 3)),
        ]);
        tracker.track_row(&row);
        tracker.mark_published(3).unwrap();
        assert_eq!(tracker.unpublished_ids(), vec![20]);

        tracker.discard_all();
        assert!(tracker.is_empty());
        assert!(tracker.is_enabled());
    }
}
