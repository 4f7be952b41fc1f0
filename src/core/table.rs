//! In-memory tabular data.
//!
//! A [`Table`] is a timestamp axis plus any number of named numeric columns.
//! Missing values are explicit (`None`) rather than NaN, so every consumer
//! decides its own missing-value policy.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors raised when a table does not have the expected shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("missing required column '{column}' (available: {})", available.join(", "))]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
}

/// Result type for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// A named column of optional numeric values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Build a column where every value is present.
    pub fn from_values(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|&v| Some(v)).collect())
    }

    /// Number of missing entries.
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Time-indexed table. Row identity is positional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a table with a timestamp axis and no measurement columns.
    pub fn new(timestamps: Vec<NaiveDateTime>) -> Self {
        Self {
            timestamps,
            columns: Vec::new(),
        }
    }

    /// Create a table from a timestamp axis and a set of columns.
    ///
    /// Every column must have one value per timestamp and column names
    /// must be unique.
    pub fn from_columns(timestamps: Vec<NaiveDateTime>, columns: Vec<Column>) -> Result<Self> {
        let mut table = Self::new(timestamps);
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column names prefixed by the timestamp axis, as shown in schema errors.
    fn available(&self) -> Vec<String> {
        std::iter::once("timestamp".to_string())
            .chain(self.columns.iter().map(|c| c.name.clone()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with a schema error that lists what is present.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| TableError::MissingColumn {
            column: name.to_string(),
            available: self.available(),
        })
    }

    /// Append a column.
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if column.values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                column: column.name,
                expected: self.len(),
                actual: column.values.len(),
            });
        }
        if self.has_column(&column.name) {
            return Err(TableError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Append a column, replacing any existing column with the same name.
    pub fn set_column(&mut self, column: Column) -> Result<()> {
        if column.values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                column: column.name,
                expected: self.len(),
                actual: column.values.len(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Rename a column in place. Unknown names are a schema error.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return self.require(from).map(|_| ());
        }
        if self.has_column(to) {
            return Err(TableError::DuplicateColumn(to.to_string()));
        }
        let available = self.available();
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == from)
            .ok_or_else(|| TableError::MissingColumn {
                column: from.to_string(),
                available,
            })?;
        column.name = to.to_string();
        Ok(())
    }

    /// Build a new table from the given row indices, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> Table {
        let timestamps = indices.iter().map(|&i| self.timestamps[i]).collect();
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), indices.iter().map(|&i| c.values[i]).collect()))
            .collect();
        Table {
            timestamps,
            columns,
        }
    }

    /// Keep only the rows where `mask` is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Table {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.take_rows(&indices)
    }

    /// Return a copy sorted ascending by timestamp. The sort is stable, so
    /// rows sharing a timestamp keep their relative order.
    pub fn sorted_by_time(&self) -> Table {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        self.take_rows(&order)
    }

    /// Whether the timestamp axis is non-decreasing.
    pub fn is_time_sorted(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] <= w[1])
    }

    /// Stack tables with identical column sets on top of each other.
    ///
    /// Columns present in only some tables are filled with missing values
    /// for the rows of the other tables.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut names: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !names.contains(&column.name) {
                    names.push(column.name.clone());
                }
            }
        }

        let total: usize = tables.iter().map(|t| t.len()).sum();
        let mut timestamps = Vec::with_capacity(total);
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(total)))
            .collect();

        for table in tables {
            let rows = table.len();
            timestamps.extend(table.timestamps.iter().copied());
            for column in columns.iter_mut() {
                match table.column(&column.name) {
                    Some(src) => column.values.extend(src.values.iter().copied()),
                    None => column.values.extend(std::iter::repeat(None).take(rows)),
                }
            }
        }

        Table {
            timestamps,
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, sec)
            .unwrap()
    }

    #[test]
    fn test_require_reports_available_columns() {
        let table = Table::from_columns(
            vec![ts(0)],
            vec![Column::from_values("depth", &[4.0])],
        )
        .unwrap();

        let err = table.require("latitude").unwrap_err();
        match &err {
            TableError::MissingColumn { column, available } => {
                assert_eq!(column, "latitude");
                assert_eq!(available, &vec!["timestamp".to_string(), "depth".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_push_column_length_mismatch() {
        let mut table = Table::new(vec![ts(0), ts(1)]);
        let err = table
            .push_column(Column::from_values("depth", &[1.0]))
            .unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_sorted_by_time_is_stable() {
        let table = Table::from_columns(
            vec![ts(2), ts(1), ts(1), ts(0)],
            vec![Column::from_values("v", &[1.0, 2.0, 3.0, 4.0])],
        )
        .unwrap();

        let sorted = table.sorted_by_time();
        assert_eq!(sorted.timestamps, vec![ts(0), ts(1), ts(1), ts(2)]);
        assert_eq!(
            sorted.column("v").unwrap().values,
            vec![Some(4.0), Some(2.0), Some(3.0), Some(1.0)]
        );
        assert!(sorted.is_time_sorted());
    }

    #[test]
    fn test_concat_fills_missing_columns() {
        let a = Table::from_columns(vec![ts(0)], vec![Column::from_values("a", &[1.0])]).unwrap();
        let b = Table::from_columns(vec![ts(1)], vec![Column::from_values("b", &[2.0])]).unwrap();

        let joined = Table::concat(vec![a, b]);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.column("a").unwrap().values, vec![Some(1.0), None]);
        assert_eq!(joined.column("b").unwrap().values, vec![None, Some(2.0)]);
    }

    #[test]
    fn test_filter_rows() {
        let table = Table::from_columns(
            vec![ts(0), ts(1), ts(2)],
            vec![Column::from_values("v", &[1.0, 2.0, 3.0])],
        )
        .unwrap();
        let kept = table.filter_rows(&[true, false, true]);
        assert_eq!(kept.timestamps, vec![ts(0), ts(2)]);
        assert_eq!(kept.column("v").unwrap().values, vec![Some(1.0), Some(3.0)]);
    }
}
