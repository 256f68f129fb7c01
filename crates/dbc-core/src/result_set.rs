//! Rows and forward-only result sets.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Zero-based column index.
    pub index: usize,
    /// Backend type name.
    pub type_name: String,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl Column {
    /// Create column metadata.
    pub fn new(name: impl Into<String>, index: usize, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index,
            type_name: type_name.into(),
            nullable: true,
        }
    }
}

/// A row from a query result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Get a value by zero-based column index.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        self.values
            .get(index)
            .ok_or_else(|| Error::ColumnNotFound(format!("index {index}")))
            .and_then(T::from_value)
    }

    /// Get a value by column name (case-insensitive).
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .position(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        self.get(index)
    }

    /// Try to get a value by index, returning `None` if NULL or not found.
    pub fn try_get<T: FromValue>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_value_nullable(v).ok().flatten())
    }

    /// Get the raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Iterate over (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.columns.iter().zip(self.values.iter())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// A forward-only cursor over the rows of a query.
///
/// The cursor starts before the first row; call [`next()`](Self::next) to
/// advance it, then read the current row with [`get()`](Self::get).
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Arc<[Column]>,
    rows: Vec<Row>,
    position: Option<usize>,
}

impl ResultSet {
    /// Build a result set from column metadata and row values.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        let columns: Arc<[Column]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Row {
                columns: Arc::clone(&columns),
                values,
            })
            .collect();
        Self {
            columns,
            rows,
            position: None,
        }
    }

    /// A result set with no columns and no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Advance to the next row. Returns `false` once past the last row.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.rows.len());
            false
        }
    }

    /// The row the cursor is positioned on.
    #[must_use]
    pub fn current(&self) -> Option<&Row> {
        self.position.and_then(|p| self.rows.get(p))
    }

    /// Read a column of the current row by index.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        self.current().ok_or(Error::NoCurrentRow)?.get(index)
    }

    /// Read a column of the current row by name.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        self.current().ok_or(Error::NoCurrentRow)?.get_by_name(name)
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Total number of rows, independent of the cursor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result set has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the result set, returning all rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
