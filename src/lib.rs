pub mod access;
pub mod config;
pub mod expression;

pub use access::{Column, DataType, Table, TableSource, Value};
pub use config::EvalConfig;
pub use expression::{evaluate, Datum, EvaluationContext, ExprArena, ExpressionError, NodeId};
