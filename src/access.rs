//! Column storage surface consumed by the expression engine.
//!
//! - **Value / DataType**: scalar values and the closed element type set
//! - **Bitmap**: per-element validity
//! - **Column**: immutable, shareable, optionally row-indexed column handle
//! - **ColumnBuilder**: pre-sized, write-once kernel output
//! - **TableSource / Table**: named columns of a single table snapshot

pub mod bitmap;
pub mod column;
pub mod table;
pub mod value;

pub use bitmap::Bitmap;
pub use column::{Column, ColumnBuilder, ColumnData, ColumnView, Element, NativeType, RowIndex};
pub use table::{ColumnInfo, Table, TableSource};
pub use value::{DataType, LogicalType, Value};

use thiserror::Error;

/// Errors raised while building columns and tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Column has {values} values but {validity} validity bits")]
    LengthMismatch { values: usize, validity: usize },

    #[error("Column '{column}' has {actual} rows, table has {expected}")]
    RaggedTable {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column name: {name}")]
    DuplicateColumn { name: String },

    #[error("Row {row} out of bounds for column with {len} rows")]
    RowOutOfBounds { row: usize, len: usize },
}

pub type AccessResult<T> = Result<T, AccessError>;
