use std::collections::HashMap;

use super::value::Value;

/// One record of a tabular query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful for tests and decoders
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.cells.insert(column.into(), value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.cells.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Text view of a cell. Missing and null cells read as the empty string.
    pub fn string(&self, column: &str) -> String {
        self.cells
            .get(column)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    /// Strict int64 read
    pub fn int64(&self, column: &str) -> Result<i64, CellError> {
        let value = self.required(column)?;
        value.as_i64().ok_or_else(|| CellError::unexpected(column, "int64", value))
    }

    /// Timestamp read in unix nanoseconds. Int64 cells are accepted as well.
    pub fn timestamp(&self, column: &str) -> Result<i64, CellError> {
        let value = self.required(column)?;
        value
            .as_timestamp()
            .ok_or_else(|| CellError::unexpected(column, "timestamp", value))
    }

    /// Int64 or float64 read, widened to f64
    pub fn number(&self, column: &str) -> Result<f64, CellError> {
        let value = self.required(column)?;
        value
            .as_f64()
            .ok_or_else(|| CellError::unexpected(column, "int64 or float64", value))
    }

    fn required(&self, column: &str) -> Result<&Value, CellError> {
        self.cells
            .get(column)
            .ok_or_else(|| CellError::Missing(column.to_string()))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CellError {
    #[error("Column not found: {0}")]
    Missing(String),

    #[error("Column {column} has type {found}, expected {expected}")]
    UnexpectedType {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl CellError {
    fn unexpected(column: &str, expected: &'static str, value: &Value) -> Self {
        CellError::UnexpectedType {
            column: column.to_string(),
            expected,
            found: value.type_name(),
        }
    }
}
