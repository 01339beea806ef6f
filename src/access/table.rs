//! Tables: named columns of equal length.

use crate::access::{AccessError, AccessResult, Column, DataType};

/// Read-only table surface the expression engine binds against.
///
/// The source must not change while an evaluation borrows it.
pub trait TableSource: Send + Sync {
    fn column_count(&self) -> usize;

    fn row_count(&self) -> usize;

    /// Position of the column called `name`
    fn resolve_name(&self, name: &str) -> Option<usize>;

    fn column_name(&self, index: usize) -> Option<&str>;

    /// Handle to the column at `index`; a shallow copy of the stored column
    fn column(&self, index: usize) -> Option<Column>;
}

/// Information about a column in a table schema
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// In-memory table
#[derive(Debug, Clone, Default)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    nrows: usize,
}

impl Table {
    /// Build a table; every column must have the same length and every
    /// name must be unique.
    pub fn new<S: Into<String>>(columns: Vec<(S, Column)>) -> AccessResult<Self> {
        let mut table = Table::default();
        for (name, column) in columns {
            table.add_column(name, column)?;
        }
        Ok(table)
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> AccessResult<()> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(AccessError::DuplicateColumn { name });
        }
        if self.columns.is_empty() {
            self.nrows = column.len();
        } else if column.len() != self.nrows {
            return Err(AccessError::RaggedTable {
                column: name,
                expected: self.nrows,
                actual: column.len(),
            });
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    pub fn schema(&self) -> Vec<ColumnInfo> {
        self.names
            .iter()
            .zip(&self.columns)
            .map(|(name, col)| ColumnInfo::new(name.clone(), col.data_type()))
            .collect()
    }
}

impl TableSource for Table {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn row_count(&self) -> usize {
        self.nrows
    }

    fn resolve_name(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn column_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    fn column(&self, index: usize) -> Option<Column> {
        self.columns.get(index).cloned()
    }
}
