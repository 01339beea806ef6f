//! Columnar expression engine.
//!
//! This module provides:
//! - Arena-allocated expression trees built through factory functions
//! - Binding: column resolution, type promotion and shape checks
//! - Chunked elementwise kernels with three-valued null propagation
//! - Streaming, mergeable reducers
//! - A memoizing evaluation context with an optional row filter

pub mod datum;
pub mod error;
pub mod eval;
pub mod expr;
pub mod kernel;
pub mod operator;
pub mod reducer;
pub mod type_checker;

pub use datum::Datum;
pub use error::{ExpressionError, ExpressionResult};
pub use eval::{evaluate, EvalStats, EvaluationContext, NodeState};
pub use expr::{ColumnSelector, ExprArena, ExprNode, Literal, NodeId};
pub use operator::{BinaryOperator, ReduceFunction, RelationalOperator, UnaryOperator};
pub use type_checker::{type_check_expression, Binding, BoundNode, Shape, TypeChecker};
