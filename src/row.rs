//! Row data held in the rowset cache
//!
//! This module provides:
//! - [`Value`], the column value representation handed to the application
//! - [`Row`], one row of values
//! - [`FetchedRow`], a cached row plus the per-row flags the cursor tracks

use bytes::Bytes;

use crate::lob::LobLocator;

/// A column value.
///
/// Per-SQL-type conversion is left to the layer above; the cursor only needs
/// to move values between the transport, the cache and positioned statements.
///
/// # Example
///
/// ```rust
/// use netcursor::Value;
///
/// let value = Value::from(42);
/// assert_eq!(value.as_i64(), Some(42));
/// assert!(Value::Null.is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Character data
    String(String),
    /// Binary data
    Bytes(Bytes),
    /// Boolean value
    Boolean(bool),
    /// Server-side LOB locator
    Lob(LobLocator),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as a LOB locator
    pub fn as_lob(&self) -> Option<&LobLocator> {
        match self {
            Value::Lob(l) => Some(l),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Lob(lob) => write!(f, "<{:?} locator {}>", lob.kind, lob.locator_id),
        }
    }
}

/// A row of column values (0-based internally; the result set API is 1-based)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a new row with values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by 0-based column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Replace a value by 0-based column index
    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Get all values as a slice
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// A row as received from the server, with its cache flags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchedRow {
    /// Column values
    pub row: Row,
    /// Row was deleted after it was fetched; no data is available
    pub hole: bool,
    /// Server reports the row was updated through this cursor
    pub updated: bool,
}

impl FetchedRow {
    /// Wrap a row with no flags set
    pub fn new(row: Row) -> Self {
        Self {
            row,
            hole: false,
            updated: false,
        }
    }

    /// A deleted row
    pub fn hole(columns: usize) -> Self {
        Self {
            row: Row::new(vec![Value::Null; columns]),
            hole: true,
            updated: false,
        }
    }
}

impl From<Row> for FetchedRow {
    fn from(row: Row) -> Self {
        FetchedRow::new(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(7i64).as_i64(), Some(7));
        assert_eq!(Value::Float(2.5).as_i64(), Some(2));
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::from(&b"xy"[..]).as_bytes(), Some(&b"xy"[..]));
        assert_eq!(Value::Integer(1).as_bool(), Some(true));
        assert!(Value::from(None::<i64>).is_null());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Null), "NULL");
        assert_eq!(format!("{}", Value::Integer(42)), "42");
        assert_eq!(format!("{}", Value::String("test".into())), "test");
        assert_eq!(format!("{}", Value::Boolean(true)), "true");
        assert_eq!(
            format!("{}", Value::Bytes(Bytes::from_static(&[1, 2, 3]))),
            "<3 bytes>"
        );
    }

    #[test]
    fn test_row_set_and_get() {
        let mut row = Row::new(vec![Value::Integer(1), Value::Null]);
        row.set(1, Value::from("x"));
        row.set(5, Value::from("ignored"));
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(1).and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn test_hole_row() {
        let hole = FetchedRow::hole(3);
        assert!(hole.hole);
        assert_eq!(hole.row.len(), 3);
        assert!(hole.row.values().iter().all(Value::is_null));
    }
}
