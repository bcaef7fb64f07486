//! Positioned mutation through a cursor
//!
//! Updates and deletes run as `WHERE CURRENT OF` statements. Rowset and
//! dynamic cursors name the row inside the rowset and may chain the
//! auto-commit into the same round trip; other scrollable cursors first
//! move the server cursor onto the row the application sees with a
//! RELATIVE positioning fetch, also in the same round trip.
//!
//! Whatever happens, a failed mutation leaves no pending column updates
//! behind.

use crate::constants::{FetchOrientation, ResultSetType};
use crate::cursor::{CursorState, RowMode, Traversal};
use crate::error::{Error, Result};
use crate::positioned::StatementKind;
use crate::row::Value;
use crate::sensitivity::SensitivityPolicy;
use crate::status;
use crate::transport::{ExecuteReply, RequestOwner, Transport};

/// Outcome of a positioned statement round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Executed {
    update_count: u64,
    committed: bool,
}

impl CursorState {
    // =========================================================================
    // Column Updates
    // =========================================================================

    /// Stage a new value for a column (1-based) of the current or insert row
    pub fn update_value(&mut self, column: usize, value: Value) -> Result<()> {
        self.check_updatable("updateValue")?;
        if !self.is_valid_cursor_position {
            return Err(Error::InvalidCursorPosition);
        }
        self.updates.set(&self.metadata, column, value)
    }

    /// Stage a null for a column
    pub fn update_null(&mut self, column: usize) -> Result<()> {
        self.update_value(column, Value::Null)
    }

    /// Discard staged values for the current row
    pub fn cancel_row_updates(&mut self) -> Result<()> {
        self.check_updatable("cancelRowUpdates")?;
        if self.row_mode == RowMode::OnInsertRow {
            return Err(Error::NoCurrentRow);
        }
        if !self.is_valid_cursor_position {
            return Err(Error::InvalidCursorPosition);
        }
        if !self.update_row_called {
            self.updates.reset();
        }
        Ok(())
    }

    // =========================================================================
    // Insert Row
    // =========================================================================

    /// Switch to the insert row
    pub fn move_to_insert_row(&mut self) -> Result<()> {
        self.check_updatable("moveToInsertRow")?;
        self.updates.reset();
        if self.row_mode == RowMode::OnCurrentRow {
            self.saved_valid_position = self.is_valid_cursor_position;
        }
        self.row_mode = RowMode::OnInsertRow;
        self.is_valid_cursor_position = true;
        Ok(())
    }

    /// Return from the insert row to the row the cursor was on
    pub fn move_to_current_row(&mut self) -> Result<()> {
        self.check_updatable("moveToCurrentRow")?;
        if self.row_mode == RowMode::OnInsertRow {
            self.updates.reset();
            self.row_mode = RowMode::OnCurrentRow;
            self.is_valid_cursor_position = self.saved_valid_position;
        }
        Ok(())
    }

    /// Insert the staged insert row
    ///
    /// Columns never set are inserted as `DEFAULT`.
    pub async fn insert_row(&mut self, transport: &mut dyn Transport) -> Result<()> {
        self.check_updatable("insertRow")?;
        if self.row_mode != RowMode::OnInsertRow {
            return Err(Error::NotOnInsertRow);
        }

        let columns = self.updates.updated_columns();
        let params = self.updates.updated_values();
        let result = self
            .execute_positioned(transport, StatementKind::Insert, &columns, params, false)
            .await;
        self.updates.reset();
        let executed = result?;
        tracing::debug!(cursor_id = self.id, rows = executed.update_count, "row inserted");
        Ok(())
    }

    // =========================================================================
    // Update / Delete
    // =========================================================================

    fn check_mutable_current_row(&self, operation: &str) -> Result<()> {
        self.check_updatable(operation)?;
        if self.row_mode == RowMode::OnInsertRow {
            return Err(Error::NoCurrentRow);
        }
        if !self.is_valid_cursor_position {
            return Err(Error::InvalidCursorPosition);
        }
        Ok(())
    }

    fn uses_rowset_statements(&self) -> bool {
        match &self.traversal {
            Traversal::Forward(_) => false,
            Traversal::Windowed(engine) => engine.is_rowset_cursor() || engine.policy().is_dynamic(),
        }
    }

    /// Write staged values to the current row
    ///
    /// Returns `true` when a commit was chained to the update. Does nothing
    /// when no column was staged.
    pub async fn update_row(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.check_mutable_current_row("updateRow")?;
        if !self.updates.any_updated() {
            return Ok(false);
        }

        let columns = self.updates.updated_columns();
        let params = self.updates.updated_values();
        let result = self
            .execute_positioned(transport, StatementKind::Update, &columns, params, true)
            .await;
        self.updates.reset();
        let executed = result?;
        self.update_row_called = true;

        if self.result_set_type == ResultSetType::ForwardOnly {
            self.is_valid_cursor_position = false;
        } else if executed.update_count > 0
            && self.policy() == SensitivityPolicy::Insensitive
            && !executed.committed
        {
            self.refetch_current_row(transport).await?;
        }
        tracing::debug!(cursor_id = self.id, rows = executed.update_count, "row updated");
        Ok(executed.committed)
    }

    /// Delete the current row
    ///
    /// The row stays in the cache as a hole and the row count is unchanged.
    /// Returns `true` when a commit was chained to the delete.
    pub async fn delete_row(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.updates.reset();
        self.check_mutable_current_row("deleteRow")?;

        let executed = self
            .execute_positioned(transport, StatementKind::Delete, &[], Vec::new(), true)
            .await?;
        if executed.update_count > 0 {
            match &mut self.traversal {
                Traversal::Forward(fetcher) => {
                    let columns = self.metadata.column_count();
                    if let Some(row) = fetcher.current_row_mut() {
                        *row = crate::row::FetchedRow::hole(columns);
                    }
                }
                Traversal::Windowed(engine) => engine.window.mark_hole(),
            }
        }
        self.is_valid_cursor_position = false;
        tracing::debug!(cursor_id = self.id, rows = executed.update_count, "row deleted");
        Ok(executed.committed)
    }

    /// Reload the current row from the server
    ///
    /// Only scroll-sensitive cursors see changes; on insensitive cursors
    /// this does nothing.
    pub async fn refresh_row(&mut self, transport: &mut dyn Transport) -> Result<()> {
        self.check_open("refreshRow")?;
        if !self.result_set_type.is_scrollable() {
            return Err(Error::NotScrollable);
        }
        if self.row_mode == RowMode::OnInsertRow {
            return Err(Error::NoCurrentRow);
        }
        if !self.is_updatable() {
            return Err(Error::NotUpdatable("refreshRow".to_string()));
        }
        let (before_first, after_last) = match &mut self.traversal {
            Traversal::Windowed(engine) => (
                engine.is_before_first(transport, &mut self.warnings).await?,
                engine.is_after_last(transport, &mut self.warnings).await?,
            ),
            Traversal::Forward(_) => return Err(Error::NotScrollable),
        };
        if before_first || after_last || !self.is_valid_cursor_position {
            return Err(Error::InvalidCursorPosition);
        }
        if self.result_set_type != ResultSetType::ScrollSensitive {
            return Ok(());
        }

        self.lobs
            .release_unpublished(transport, RequestOwner::Cursor(self.id))
            .await?;
        self.lob_accessed.clear();
        if let Traversal::Windowed(engine) = &mut self.traversal {
            engine.get_refresh_rowset(transport, &mut self.warnings).await?;
        }
        self.updates.reset();
        self.land()
    }

    // =========================================================================
    // Round Trips
    // =========================================================================

    /// Re-read the current row so it shows this cursor's own change
    async fn refetch_current_row(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if let Traversal::Windowed(engine) = &mut self.traversal {
            let row = engine.window.current_row_number();
            tracing::trace!(cursor_id = self.id, row, "refetching updated row");
            let valid = engine
                .get_absolute_rowset(transport, row, &mut self.warnings)
                .await?;
            self.is_valid_cursor_position = valid;
            if valid {
                self.land()?;
            }
        }
        Ok(())
    }

    /// Run one positioned statement in a single round trip
    ///
    /// `on_current_row` statements are preceded by a repositioning fetch or
    /// carry the rowset row number, and may chain the auto-commit.
    async fn execute_positioned(
        &mut self,
        transport: &mut dyn Transport,
        kind: StatementKind,
        columns: &[usize],
        mut params: Vec<Value>,
        on_current_row: bool,
    ) -> Result<Executed> {
        let rowset_statement = on_current_row && self.uses_rowset_statements();
        let rowset_row = rowset_statement
            && matches!(&self.traversal, Traversal::Windowed(e) if e.is_rowset_cursor());

        let (reposition, rowset_offset) = match &self.traversal {
            Traversal::Windowed(engine) if on_current_row => {
                let delta = engine.window.current_row_number() - engine.window.absolute_position;
                let reposition = !rowset_statement && (delta != 0 || self.unpositioned_on_server);
                (
                    reposition.then_some(delta),
                    engine.window.current_row_in_rowset + 1,
                )
            }
            _ => (None, 0),
        };
        if rowset_row {
            params.push(Value::Integer(rowset_offset));
        }
        let chain_commit = rowset_statement && self.context.auto_commit;

        let statement = match kind {
            StatementKind::Insert => self.statements.insert(&self.metadata, self.id, columns)?,
            StatementKind::Update => self.statements.update(
                &self.metadata,
                self.id,
                &self.name,
                columns,
                rowset_row,
            )?,
            StatementKind::Delete => {
                self.statements
                    .delete(&self.metadata, self.id, &self.name, rowset_row)?
            }
        };

        let id = self.id;
        transport.begin_request(RequestOwner::Cursor(id))?;
        let result = async {
            if let Some(delta) = reposition {
                transport.write_positioning_fetch(id, FetchOrientation::Relative, delta)?;
            }
            transport.write_execute(statement, &params)?;
            if chain_commit {
                transport.write_commit()?;
            }
            transport.send().await?;
            let positioned = match reposition {
                Some(_) => Some(transport.read_positioning_fetch().await?),
                None => None,
            };
            let executed = transport.read_execute().await?;
            let committed = if chain_commit {
                Some(transport.read_commit().await?)
            } else {
                None
            };
            Ok::<_, Error>((positioned, executed, committed))
        }
        .await;
        transport.end_request();
        let (positioned, executed, committed) = result?;

        if let Some(positioned) = positioned {
            status::check(&positioned.status, &mut self.warnings)?;
            if let (Some(delta), Traversal::Windowed(engine)) = (reposition, &mut self.traversal) {
                engine.window.absolute_position += delta;
            }
            self.unpositioned_on_server = false;
        }
        let ExecuteReply {
            update_count,
            status,
        } = executed;
        status::check(&status, &mut self.warnings)?;
        self.auto_committed = false;

        let committed = match committed {
            Some(commit_status) => {
                status::check(&commit_status, &mut self.warnings)?;
                true
            }
            None => false,
        };
        Ok(Executed {
            update_count,
            committed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, CursorOptions, StatementContext};
    use crate::metadata::ColumnInfo;
    use crate::transport::MemoryServer;

    fn server() -> MemoryServer {
        let server = MemoryServer::new();
        server.add_table(
            "SELECT ID, NAME FROM APP.EMP",
            vec![
                ColumnInfo::new("ID").with_table("APP", "EMP").with_updatable(false),
                ColumnInfo::new("NAME").with_table("APP", "EMP"),
            ],
            (1..=4)
                .map(|i| vec![Value::Integer(i), Value::from(format!("e{}", i))])
                .collect(),
        );
        server
    }

    async fn open(transport: &mut dyn Transport, options: CursorOptions) -> CursorState {
        let config = Config::new().with_auto_commit(false);
        let context = StatementContext::resolve(&config, &options).unwrap();
        CursorState::open(transport, "SELECT ID, NAME FROM APP.EMP", &options, context, true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutation() {
        let server = server();
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive()).await;
        assert!(cursor.next(&mut t).await.unwrap());
        assert!(matches!(
            cursor.update_value(2, Value::from("x")),
            Err(Error::NotUpdatable(_))
        ));
        assert!(matches!(cursor.delete_row(&mut t).await, Err(Error::NotUpdatable(_))));
        assert!(matches!(cursor.move_to_insert_row(), Err(Error::NotUpdatable(_))));
    }

    #[tokio::test]
    async fn test_column_not_updatable() {
        let server = server();
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive().updatable()).await;
        assert!(cursor.next(&mut t).await.unwrap());
        assert_eq!(
            cursor.update_value(1, Value::Integer(9)),
            Err(Error::ColumnNotUpdatable(1))
        );
    }

    #[tokio::test]
    async fn test_update_row_refetches_insensitive() {
        let server = server();
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive().updatable()).await;
        assert!(cursor.absolute(&mut t, 2).await.unwrap());
        cursor.update_value(2, Value::from("renamed")).unwrap();
        assert_eq!(cursor.get_value(2).unwrap(), Value::from("renamed"));
        assert!(!cursor.update_row(&mut t).await.unwrap());
        assert_eq!(cursor.get_value(2).unwrap(), Value::from("renamed"));
        assert!(cursor.row_updated().unwrap());
        assert_eq!(cursor.get_row(&mut t).await.unwrap(), 2);
        assert_eq!(server.table_rows("SELECT ID, NAME FROM APP.EMP")[1][1], Value::from("renamed"));
    }

    #[tokio::test]
    async fn test_failed_update_drops_staged_values() {
        let server = server();
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive().updatable()).await;
        assert!(cursor.next(&mut t).await.unwrap());
        cursor.update_value(2, Value::from("x")).unwrap();
        server.fail_next_execute(-803, "duplicate key");
        let err = cursor.update_row(&mut t).await.unwrap_err();
        assert_eq!(err.sql_code(), Some(-803));
        assert_eq!(cursor.get_value(2).unwrap(), Value::from("e1"));
        assert!(!cursor.update_row(&mut t).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_row_round_trip() {
        let server = server();
        let mut t = server.transport();
        let mut cursor = open(&mut t, CursorOptions::scroll_insensitive().updatable()).await;
        assert!(cursor.next(&mut t).await.unwrap());

        let before = server.round_trips();
        assert_eq!(cursor.insert_row(&mut t).await, Err(Error::NotOnInsertRow));
        assert_eq!(server.round_trips(), before);

        cursor.move_to_insert_row().unwrap();
        assert_eq!(cursor.get_value(2).unwrap(), Value::Null);
        cursor.update_value(2, Value::from("new")).unwrap();
        cursor.insert_row(&mut t).await.unwrap();
        assert_eq!(server.round_trips(), before + 1);
        assert_eq!(server.table_rows("SELECT ID, NAME FROM APP.EMP").len(), 5);
        assert!(server
            .executed_statements()
            .iter()
            .any(|sql| sql.starts_with("INSERT INTO \"APP\".\"EMP\"")));

        cursor.move_to_current_row().unwrap();
        assert_eq!(cursor.get_value(1).unwrap(), Value::Integer(1));
    }
}
