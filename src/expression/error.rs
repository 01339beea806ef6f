//! Error types for expression binding and evaluation.

use crate::access::{AccessError, DataType};
use crate::expression::NodeId;
use thiserror::Error;

/// Errors that can occur while binding or evaluating an expression.
///
/// Everything except `Access` is raised while binding, before any column
/// is computed.
///
/// Type mismatches come in two variants. `InvalidOperandTypes` is raised
/// when an operator or reducer rejects its operand types, such as `str + int`
/// or `mean(bool)`. `TypeMismatch` is raised when a position requires one
/// specific type, such as the boolean row filter. Callers that only need the
/// kind can match both variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Selector names a column the table does not have
    #[error("Column not found: {name}")]
    ColumnNotFound { name: String },

    /// Selector index outside `-ncols..ncols`
    #[error("Column index {index} is invalid for a table with {column_count} columns")]
    ColumnIndexOutOfBounds { index: i64, column_count: usize },

    /// Position requires a specific type, e.g. a non-boolean row filter
    #[error("Type mismatch in {context}: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: DataType,
        actual: DataType,
        context: String,
    },

    /// Operator or reducer applied to operand types it does not accept
    #[error("Invalid operand types for operator {operator}: left={left_type}, right={}", .right_type.map(|t| t.name()).unwrap_or("-"))]
    InvalidOperandTypes {
        operator: String,
        left_type: DataType,
        right_type: Option<DataType>,
    },

    /// Two non-scalar operands of different lengths
    #[error("Shape mismatch for operator {operator}: {left_len} rows vs {right_len} rows")]
    ShapeMismatch {
        operator: String,
        left_len: usize,
        right_len: usize,
    },

    /// Node was evaluated without being bound in this context
    #[error("Node {0} is not bound in this evaluation context")]
    UnboundReference(NodeId),

    /// Node id does not belong to the arena, or references a later node
    #[error("Node {0} does not exist in the expression arena")]
    UnknownNode(NodeId),

    #[error("Column storage error: {0}")]
    Access(#[from] AccessError),
}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;
