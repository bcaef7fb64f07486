//! Positioned statements
//!
//! Updates, deletes and inserts through a cursor are executed as separate
//! statements built from the result metadata:
//!
//! ```text
//! INSERT INTO "S"."T" ("A", "B") VALUES (?, DEFAULT)
//! UPDATE "S"."T" SET "A" = ? WHERE CURRENT OF "C1" [FOR ROW ? OF ROWSET]
//! DELETE FROM "S"."T" WHERE CURRENT OF "C1" [FOR ROW ? OF ROWSET]
//! ```
//!
//! Statements are cached per cursor by shape and rebuilt when the set of
//! updated columns changes.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::metadata::{quote_identifier, ResultMetadata};
use crate::transport::CursorId;

/// Statements kept per cursor before the oldest is dropped
const MAX_CACHED_STATEMENTS: usize = 8;

/// Kind of positioned statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// INSERT of the insert row
    Insert,
    /// UPDATE ... WHERE CURRENT OF
    Update,
    /// DELETE ... WHERE CURRENT OF
    Delete,
}

/// A statement executed against the cursor's current row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedStatement {
    /// Statement kind
    pub kind: StatementKind,
    /// SQL text
    pub sql: String,
    /// Cursor the statement is positioned on
    pub cursor: CursorId,
    /// 1-based columns bound as parameters, in parameter order
    pub columns: Vec<usize>,
    /// Last parameter is the 1-based row within the current rowset
    pub rowset_row: bool,
}

impl PositionedStatement {
    /// Number of parameters the statement expects
    pub fn parameter_count(&self) -> usize {
        self.columns.len() + usize::from(self.rowset_row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatementKey {
    kind: StatementKind,
    columns: Vec<usize>,
    rowset_row: bool,
}

/// Per-cursor cache of positioned statements
#[derive(Debug, Clone, Default)]
pub struct PositionedStatementSet {
    statements: IndexMap<StatementKey, PositionedStatement>,
}

impl PositionedStatementSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached statements
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// INSERT for the given set of supplied columns
    ///
    /// Columns not listed get `DEFAULT`.
    pub fn insert(
        &mut self,
        metadata: &ResultMetadata,
        cursor: CursorId,
        columns: &[usize],
    ) -> Result<&PositionedStatement> {
        let key = StatementKey {
            kind: StatementKind::Insert,
            columns: columns.to_vec(),
            rowset_row: false,
        };
        self.get_or_build(key, cursor, || {
            let table = metadata.table_name()?;
            let names: Vec<String> = metadata
                .columns()
                .iter()
                .map(|c| quote_identifier(&c.name))
                .collect();
            let values: Vec<&str> = (1..=metadata.column_count())
                .map(|i| if columns.contains(&i) { "?" } else { "DEFAULT" })
                .collect();
            Ok(format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                values.join(", ")
            ))
        })
    }

    /// UPDATE of the given columns at the cursor's current row
    pub fn update(
        &mut self,
        metadata: &ResultMetadata,
        cursor: CursorId,
        cursor_name: &str,
        columns: &[usize],
        rowset_row: bool,
    ) -> Result<&PositionedStatement> {
        let key = StatementKey {
            kind: StatementKind::Update,
            columns: columns.to_vec(),
            rowset_row,
        };
        self.get_or_build(key, cursor, || {
            let table = metadata.table_name()?;
            let mut assignments = Vec::with_capacity(columns.len());
            for &column in columns {
                let info = metadata.column(column)?;
                assignments.push(format!("{} = ?", quote_identifier(&info.name)));
            }
            Ok(format!(
                "UPDATE {} SET {} WHERE CURRENT OF {}{}",
                table,
                assignments.join(", "),
                quote_identifier(cursor_name),
                rowset_suffix(rowset_row)
            ))
        })
    }

    /// DELETE of the cursor's current row
    pub fn delete(
        &mut self,
        metadata: &ResultMetadata,
        cursor: CursorId,
        cursor_name: &str,
        rowset_row: bool,
    ) -> Result<&PositionedStatement> {
        let key = StatementKey {
            kind: StatementKind::Delete,
            columns: Vec::new(),
            rowset_row,
        };
        self.get_or_build(key, cursor, || {
            Ok(format!(
                "DELETE FROM {} WHERE CURRENT OF {}{}",
                metadata.table_name()?,
                quote_identifier(cursor_name),
                rowset_suffix(rowset_row)
            ))
        })
    }

    fn get_or_build(
        &mut self,
        key: StatementKey,
        cursor: CursorId,
        build: impl FnOnce() -> Result<String>,
    ) -> Result<&PositionedStatement> {
        if self.statements.contains_key(&key) {
            tracing::trace!(cursor, kind = ?key.kind, "positioned statement cache hit");
        } else {
            let sql = build()?;
            tracing::trace!(cursor, kind = ?key.kind, sql = %sql, "built positioned statement");
            if self.statements.len() >= MAX_CACHED_STATEMENTS {
                self.statements.shift_remove_index(0);
            }
            let statement = PositionedStatement {
                kind: key.kind,
                sql,
                cursor,
                columns: key.columns.clone(),
                rowset_row: key.rowset_row,
            };
            self.statements.insert(key.clone(), statement);
        }
        self.statements
            .get(&key)
            .ok_or_else(|| Error::Internal("positioned statement vanished".to_string()))
    }

    /// Drop every cached statement
    pub fn tear_down(&mut self) {
        if !self.statements.is_empty() {
            tracing::debug!(count = self.statements.len(), "tearing down positioned statements");
        }
        self.statements.clear();
    }
}

fn rowset_suffix(rowset_row: bool) -> &'static str {
    if rowset_row {
        " FOR ROW ? OF ROWSET"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnInfo;

    fn metadata() -> ResultMetadata {
        ResultMetadata::new(vec![
            ColumnInfo::new("ID").with_table("APP", "EMP"),
            ColumnInfo::new("NAME").with_table("APP", "EMP"),
            ColumnInfo::new("SALARY").with_table("APP", "EMP"),
        ])
    }

    #[test]
    fn test_update_sql() {
        let mut set = PositionedStatementSet::new();
        let stmt = set.update(&metadata(), 7, "SQL_CUR", &[2, 3], false).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"APP\".\"EMP\" SET \"NAME\" = ?, \"SALARY\" = ? WHERE CURRENT OF \"SQL_CUR\""
        );
        assert_eq!(stmt.parameter_count(), 2);

        let stmt = set.update(&metadata(), 7, "SQL_CUR", &[2], true).unwrap();
        assert!(stmt.sql.ends_with("WHERE CURRENT OF \"SQL_CUR\" FOR ROW ? OF ROWSET"));
        assert_eq!(stmt.parameter_count(), 2);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_insert_uses_default_for_unset_columns() {
        let mut set = PositionedStatementSet::new();
        let stmt = set.insert(&metadata(), 1, &[1, 3]).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"APP\".\"EMP\" (\"ID\", \"NAME\", \"SALARY\") VALUES (?, DEFAULT, ?)"
        );
    }

    #[test]
    fn test_delete_and_cache_reuse() {
        let mut set = PositionedStatementSet::new();
        set.delete(&metadata(), 1, "C", false).unwrap();
        set.delete(&metadata(), 1, "C", false).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.delete(&metadata(), 1, "C", false).unwrap().sql,
            "DELETE FROM \"APP\".\"EMP\" WHERE CURRENT OF \"C\""
        );
        set.tear_down();
        assert!(set.is_empty());
    }

    #[test]
    fn test_no_base_table() {
        let mut set = PositionedStatementSet::new();
        let meta = ResultMetadata::new(vec![ColumnInfo::new("N")]);
        assert!(matches!(
            set.delete(&meta, 1, "C", false),
            Err(Error::NotUpdatable(_))
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn test_cache_is_bounded() {
        let mut set = PositionedStatementSet::new();
        for column in 1..=3 {
            for rowset in [false, true] {
                set.update(&metadata(), 1, "C", &[column], rowset).unwrap();
                set.update(&metadata(), 1, "C", &[1, column], rowset).unwrap();
            }
        }
        assert_eq!(set.len(), MAX_CACHED_STATEMENTS);
    }
}
