use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types a column can hold
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    Int64 = 3,
    Float32 = 4,
    Float64 = 5,
    Str = 6,
}

/// Family a `DataType` belongs to; promotion only happens inside a family
/// or from `Integer` to `Real`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    Integer,
    Real,
    String,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "bool",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Str => "str",
        }
    }

    pub fn logical_type(&self) -> LogicalType {
        match self {
            DataType::Boolean => LogicalType::Boolean,
            DataType::Int32 | DataType::Int64 => LogicalType::Integer,
            DataType::Float32 | DataType::Float64 => LogicalType::Real,
            DataType::Str => LogicalType::String,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.logical_type(),
            LogicalType::Integer | LogicalType::Real
        )
    }

    /// Byte width of one element, `None` for variable-width strings
    pub fn width(&self) -> Option<usize> {
        match self {
            DataType::Boolean => Some(1),
            DataType::Int32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::Float64 => Some(8),
            DataType::Str => None,
        }
    }

    /// Narrowest common numeric supertype of two types.
    ///
    /// - integer with integer widens to the wider operand
    /// - integer with real is always `Float64`
    /// - real with real widens to the wider operand
    ///
    /// Returns `None` when either side is not numeric.
    pub fn promote(left: DataType, right: DataType) -> Option<DataType> {
        use LogicalType::*;
        match (left.logical_type(), right.logical_type()) {
            (Integer, Integer) | (Real, Real) => {
                if left.width() >= right.width() {
                    Some(left)
                } else {
                    Some(right)
                }
            }
            (Integer, Real) | (Real, Integer) => Some(DataType::Float64),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single scalar value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
}

impl Value {
    /// Get the data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float32(_) => Some(DataType::Float32),
            Value::Float64(_) => Some(DataType::Float64),
            Value::String(_) => Some(DataType::Str),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Narrowest type that represents the value exactly.
    ///
    /// Integers that fit in 32 bits become `Int32`, floats that survive a
    /// round trip through `f32` become `Float32`.
    pub fn narrowest(self) -> Value {
        match self {
            Value::Int64(v) => match i32::try_from(v) {
                Ok(narrow) => Value::Int32(narrow),
                Err(_) => Value::Int64(v),
            },
            Value::Float64(v) => {
                let narrow = v as f32;
                if (narrow as f64) == v || v.is_nan() {
                    Value::Float32(narrow)
                } else {
                    Value::Float64(v)
                }
            }
            other => other,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NA"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_table() {
        use DataType::*;
        assert_eq!(DataType::promote(Int32, Int32), Some(Int32));
        assert_eq!(DataType::promote(Int32, Int64), Some(Int64));
        assert_eq!(DataType::promote(Int64, Int32), Some(Int64));
        assert_eq!(DataType::promote(Int32, Float32), Some(Float64));
        assert_eq!(DataType::promote(Float32, Int64), Some(Float64));
        assert_eq!(DataType::promote(Float32, Float32), Some(Float32));
        assert_eq!(DataType::promote(Float32, Float64), Some(Float64));

        assert_eq!(DataType::promote(Str, Int32), None);
        assert_eq!(DataType::promote(Boolean, Int32), None);
        assert_eq!(DataType::promote(Str, Str), None);
    }

    #[test]
    fn test_narrowest_literal_type() {
        assert_eq!(Value::Int64(7).narrowest(), Value::Int32(7));
        assert_eq!(
            Value::Int64(i64::from(i32::MAX) + 1).narrowest(),
            Value::Int64(2_147_483_648)
        );
        assert_eq!(Value::Float64(0.5).narrowest(), Value::Float32(0.5));
        assert_eq!(Value::Float64(0.1).narrowest(), Value::Float64(0.1));
        assert_eq!(
            Value::String("a".into()).narrowest(),
            Value::String("a".into())
        );
    }

    #[test]
    fn test_names_and_display() {
        assert_eq!(DataType::Float64.to_string(), "float64");
        assert_eq!(DataType::Str.logical_type(), LogicalType::String);
        assert_eq!(Value::Null.to_string(), "NA");
        assert_eq!(Value::from(Some(3)).to_string(), "3");
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }
}
