//! Result metadata
//!
//! Column descriptions delivered when a query is opened. The cursor uses
//! them to validate column indexes, to decide whether LOB rules apply and
//! to synthesize positioned DML against the base table.

use crate::error::{Error, Result};
use crate::lob::LobKind;

/// Metadata for a single result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Whether NULL values are allowed
    pub nullable: bool,
    /// Whether the column can be changed through a positioned update
    pub updatable: bool,
    /// Schema of the base table
    pub schema: Option<String>,
    /// Base table name (None for computed columns)
    pub base_table: Option<String>,
    /// LOB kind, if this is a LOB column
    pub lob: Option<LobKind>,
}

impl ColumnInfo {
    /// Create a new nullable, updatable column with minimal info
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            updatable: true,
            schema: None,
            base_table: None,
            lob: None,
        }
    }

    /// Set the base table and schema
    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self.base_table = Some(table.into());
        self
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set updatability
    pub fn with_updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    /// Mark as a LOB column
    pub fn with_lob(mut self, kind: LobKind) -> Self {
        self.lob = Some(kind);
        self
    }

    /// Check if this column is a LOB type
    pub fn is_lob(&self) -> bool {
        self.lob.is_some()
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column descriptions for one result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultMetadata {
    columns: Vec<ColumnInfo>,
}

impl ResultMetadata {
    /// Create metadata from column descriptions
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// All columns, in order
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column by 1-based index
    pub fn column(&self, index: usize) -> Result<&ColumnInfo> {
        self.check_index(index)?;
        Ok(&self.columns[index - 1])
    }

    /// Validate a 1-based column index
    pub fn check_index(&self, index: usize) -> Result<()> {
        if index == 0 || index > self.columns.len() {
            return Err(Error::InvalidColumnIndex {
                index,
                count: self.columns.len(),
            });
        }
        Ok(())
    }

    /// 1-based index of a column by name (case-insensitive)
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .map(|i| i + 1)
    }

    /// Check if any column is a LOB
    pub fn has_lob_columns(&self) -> bool {
        self.columns.iter().any(ColumnInfo::is_lob)
    }

    /// 1-based indexes of the LOB columns
    pub fn lob_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_lob())
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Quoted `"schema"."table"` of the first column with a base table
    pub fn table_name(&self) -> Result<String> {
        let column = self
            .columns
            .iter()
            .find(|c| c.base_table.is_some())
            .ok_or_else(|| Error::NotUpdatable("result has no base table".to_string()))?;

        let table = column.base_table.as_deref().unwrap_or_default();
        Ok(match column.schema.as_deref() {
            Some(schema) if !schema.is_empty() => {
                format!("{}.{}", quote_identifier(schema), quote_identifier(table))
            }
            _ => quote_identifier(table),
        })
    }
}
