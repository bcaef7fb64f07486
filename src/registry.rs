//! Transaction boundary notifications
//!
//! Cursors that hold state tied to the current transaction register with
//! the connection's [`TransactionBoundaryRegistry`]. On commit or rollback
//! every registered cursor is told about the boundary and answers whether
//! it stays registered. Deregistrations are collected first and applied
//! after all cursors have been notified.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::transport::CursorId;

/// What a cursor wants after a transaction boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryOutcome {
    /// Keep listening
    Retain,
    /// The cursor closed; remove it
    Deregister,
}

/// Receiver of transaction boundary events
pub trait UnitOfWorkListener {
    /// A commit completed
    fn complete_local_commit(&mut self) -> BoundaryOutcome;

    /// A rollback completed
    fn complete_local_rollback(&mut self) -> BoundaryOutcome;
}

/// Cursors to notify at commit and rollback, in registration order
#[derive(Debug, Clone, Default)]
pub struct TransactionBoundaryRegistry {
    members: IndexSet<CursorId>,
}

impl TransactionBoundaryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cursor; registering twice has no effect
    pub fn register(&mut self, cursor: CursorId) {
        if self.members.insert(cursor) {
            tracing::trace!(cursor_id = cursor, "registered for transaction events");
        }
    }

    /// Remove a cursor
    pub fn deregister(&mut self, cursor: CursorId) {
        self.members.shift_remove(&cursor);
    }

    /// Check if a cursor is registered
    pub fn contains(&self, cursor: CursorId) -> bool {
        self.members.contains(&cursor)
    }

    /// Number of registered cursors
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if no cursor is registered
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Notify every registered cursor of a commit
    ///
    /// Returns the cursors that deregistered.
    pub fn notify_commit<L: UnitOfWorkListener>(
        &mut self,
        listeners: &mut HashMap<CursorId, L>,
    ) -> Vec<CursorId> {
        self.notify(listeners, L::complete_local_commit)
    }

    /// Notify every registered cursor of a rollback
    ///
    /// Returns the cursors that deregistered.
    pub fn notify_rollback<L: UnitOfWorkListener>(
        &mut self,
        listeners: &mut HashMap<CursorId, L>,
    ) -> Vec<CursorId> {
        self.notify(listeners, L::complete_local_rollback)
    }

    fn notify<L>(
        &mut self,
        listeners: &mut HashMap<CursorId, L>,
        event: impl Fn(&mut L) -> BoundaryOutcome,
    ) -> Vec<CursorId> {
        let snapshot: Vec<CursorId> = self.members.iter().copied().collect();
        let mut removed = Vec::new();
        for cursor in snapshot {
            let outcome = match listeners.get_mut(&cursor) {
                Some(listener) => event(listener),
                None => BoundaryOutcome::Deregister,
            };
            if outcome == BoundaryOutcome::Deregister {
                removed.push(cursor);
            }
        }
        for cursor in &removed {
            self.deregister(*cursor);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Listener {
        holdable: bool,
        commits: usize,
        rollbacks: usize,
    }

    impl UnitOfWorkListener for Listener {
        fn complete_local_commit(&mut self) -> BoundaryOutcome {
            self.commits += 1;
            if self.holdable {
                BoundaryOutcome::Retain
            } else {
                BoundaryOutcome::Deregister
            }
        }

        fn complete_local_rollback(&mut self) -> BoundaryOutcome {
            self.rollbacks += 1;
            BoundaryOutcome::Deregister
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = TransactionBoundaryRegistry::new();
        registry.register(1);
        registry.register(1);
        assert_eq!(registry.len(), 1);
        registry.deregister(1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_commit_removes_non_holdable() {
        let mut registry = TransactionBoundaryRegistry::new();
        let mut listeners = HashMap::new();
        listeners.insert(1, Listener { holdable: true, ..Default::default() });
        listeners.insert(2, Listener::default());
        listeners.insert(3, Listener::default());
        for id in 1..=3 {
            registry.register(id);
        }

        let removed = registry.notify_commit(&mut listeners);
        assert_eq!(removed, vec![2, 3]);
        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);
        assert!(listeners.values().all(|l| l.commits == 1));
    }

    #[test]
    fn test_rollback_removes_all() {
        let mut registry = TransactionBoundaryRegistry::new();
        let mut listeners = HashMap::new();
        listeners.insert(1, Listener { holdable: true, ..Default::default() });
        registry.register(1);
        // registered but already gone from the connection
        registry.register(9);

        let removed = registry.notify_rollback(&mut listeners);
        assert_eq!(removed, vec![1, 9]);
        assert!(registry.is_empty());
        assert_eq!(listeners[&1].rollbacks, 1);
    }
}
