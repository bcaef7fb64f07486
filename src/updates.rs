//! Pending column updates
//!
//! Values set through `update_value`/`update_null` are held here until the
//! row is written with `update_row` or `insert_row`, or the updates are
//! cancelled.

use crate::error::{Error, Result};
use crate::metadata::ResultMetadata;
use crate::row::Value;

/// Update state of one column
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ColumnUpdate {
    /// Column keeps its current value
    #[default]
    NotUpdated,
    /// Column is set to this value (which may be NULL)
    UpdatedTo(Value),
}

impl ColumnUpdate {
    /// Check if the column has a pending value
    pub fn is_updated(&self) -> bool {
        matches!(self, ColumnUpdate::UpdatedTo(_))
    }

    /// Pending value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            ColumnUpdate::NotUpdated => None,
            ColumnUpdate::UpdatedTo(value) => Some(value),
        }
    }
}

/// Pending updates for every column of the current (or insert) row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdatedColumnSet {
    columns: Vec<ColumnUpdate>,
}

impl UpdatedColumnSet {
    /// An empty set for a result with `column_count` columns
    pub fn new(column_count: usize) -> Self {
        Self {
            columns: vec![ColumnUpdate::NotUpdated; column_count],
        }
    }

    /// Record a pending value for a 1-based column
    ///
    /// The column must exist and be updatable.
    pub fn set(&mut self, metadata: &ResultMetadata, column: usize, value: Value) -> Result<()> {
        let info = metadata.column(column)?;
        if !info.updatable {
            return Err(Error::ColumnNotUpdatable(column));
        }
        if self.columns.len() < metadata.column_count() {
            self.columns
                .resize(metadata.column_count(), ColumnUpdate::NotUpdated);
        }
        self.columns[column - 1] = ColumnUpdate::UpdatedTo(value);
        Ok(())
    }

    /// Update state of a 1-based column
    pub fn get(&self, column: usize) -> Option<&ColumnUpdate> {
        column.checked_sub(1).and_then(|i| self.columns.get(i))
    }

    /// Check if any column has a pending value
    pub fn any_updated(&self) -> bool {
        self.columns.iter().any(ColumnUpdate::is_updated)
    }

    /// 1-based indexes of the updated columns, in column order
    pub fn updated_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_updated())
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Pending values of the updated columns, in column order
    pub fn updated_values(&self) -> Vec<Value> {
        self.columns
            .iter()
            .filter_map(|c| c.value().cloned())
            .collect()
    }

    /// Drop all pending values
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            *column = ColumnUpdate::NotUpdated;
        }
    }
}
