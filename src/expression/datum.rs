//! Result of evaluating a node: a broadcastable scalar or a column.

use crate::access::{Column, Value};

#[derive(Debug, Clone)]
pub enum Datum {
    /// Single value, repeated against any length on demand
    Scalar(Value),
    Column(Column),
}

impl Datum {
    /// Number of rows, `None` for scalars
    pub fn len(&self) -> Option<usize> {
        match self {
            Datum::Scalar(_) => None,
            Datum::Column(col) => Some(col.len()),
        }
    }

    /// Element `i`; scalars return their value for every position
    pub fn value(&self, i: usize) -> Value {
        match self {
            Datum::Scalar(v) => v.clone(),
            Datum::Column(col) => col.value(i),
        }
    }

    /// Materialized values; a scalar yields one element
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Datum::Scalar(v) => vec![v.clone()],
            Datum::Column(col) => col.values(),
        }
    }

    pub fn as_column(&self) -> Option<&Column> {
        match self {
            Datum::Column(col) => Some(col),
            Datum::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Datum::Scalar(v) => Some(v),
            Datum::Column(_) => None,
        }
    }

    pub fn into_scalar(self) -> Option<Value> {
        match self {
            Datum::Scalar(v) => Some(v),
            Datum::Column(_) => None,
        }
    }
}

impl From<Column> for Datum {
    fn from(col: Column) -> Self {
        Datum::Column(col)
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum::Scalar(value)
    }
}
