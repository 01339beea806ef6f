//! Elementwise kernels over typed, nullable columns.
//!
//! Every kernel writes into a pre-allocated [`ColumnBuilder`]. Large inputs
//! are split into chunks of `EvalConfig::chunk_len` rows (a multiple of 8),
//! so each worker owns a disjoint slice of the values and whole bytes of the
//! validity bitmap. Scalars are broadcast element by element and never
//! expanded into full columns.

use crate::access::bitmap::set_bit;
use crate::access::{Column, ColumnBuilder, ColumnView, DataType, Element, NativeType, RowIndex, Value};
use crate::config::EvalConfig;
use crate::expression::{
    BinaryOperator, Datum, ExpressionError, ExpressionResult, RelationalOperator, UnaryOperator,
};
use log::trace;
use rayon::prelude::*;

/// Run `$body` with `$T` bound to the Rust type of a numeric `DataType`
macro_rules! with_numeric_type {
    ($dt:expr, $T:ident => $body:expr) => {
        match $dt {
            DataType::Int32 => {
                type $T = i32;
                $body
            }
            DataType::Int64 => {
                type $T = i64;
                $body
            }
            DataType::Float32 => {
                type $T = f32;
                $body
            }
            DataType::Float64 => {
                type $T = f64;
                $body
            }
            other => {
                return Err(ExpressionError::InvalidOperandTypes {
                    operator: "numeric kernel".to_string(),
                    left_type: other,
                    right_type: None,
                })
            }
        }
    };
}

pub(crate) use with_numeric_type;

/// Numeric element operations. Integers wrap on overflow, floats follow
/// IEEE 754.
pub trait Arithmetic: NativeType {
    fn arith_add(self, other: Self) -> Self;
    fn arith_sub(self, other: Self) -> Self;
    fn arith_mul(self, other: Self) -> Self;
    /// `None` when the quotient is not representable (integer division by
    /// zero)
    fn arith_div(self, other: Self) -> Option<Self>;
    fn arith_neg(self) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! integer_arithmetic {
    ($($ty:ty),*) => {
        $(
            impl Arithmetic for $ty {
                fn arith_add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }
                fn arith_sub(self, other: Self) -> Self {
                    self.wrapping_sub(other)
                }
                fn arith_mul(self, other: Self) -> Self {
                    self.wrapping_mul(other)
                }
                fn arith_div(self, other: Self) -> Option<Self> {
                    self.checked_div(other)
                }
                fn arith_neg(self) -> Self {
                    self.wrapping_neg()
                }
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

macro_rules! float_arithmetic {
    ($($ty:ty),*) => {
        $(
            impl Arithmetic for $ty {
                fn arith_add(self, other: Self) -> Self {
                    self + other
                }
                fn arith_sub(self, other: Self) -> Self {
                    self - other
                }
                fn arith_mul(self, other: Self) -> Self {
                    self * other
                }
                fn arith_div(self, other: Self) -> Option<Self> {
                    Some(self / other)
                }
                fn arith_neg(self) -> Self {
                    -self
                }
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

integer_arithmetic!(i32, i64);
float_arithmetic!(f32, f64);

/// One input of an elementwise kernel
pub enum Operand<'a, T> {
    Scalar(Option<&'a T>),
    Array(ColumnView<'a, T>),
}

impl<'a, T: Element> Operand<'a, T> {
    pub fn from_datum(datum: &'a Datum) -> ExpressionResult<Self> {
        match datum {
            Datum::Scalar(Value::Null) => Ok(Operand::Scalar(None)),
            Datum::Scalar(value) => T::value_ref(value)
                .map(|v| Operand::Scalar(Some(v)))
                .ok_or_else(|| wrong_type(value.data_type(), T::DATA_TYPE)),
            Datum::Column(col) => col
                .view::<T>()
                .map(Operand::Array)
                .ok_or_else(|| wrong_type(Some(col.data_type()), T::DATA_TYPE)),
        }
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&'a T> {
        match self {
            Operand::Scalar(value) => *value,
            Operand::Array(view) => view.get(i),
        }
    }
}

fn wrong_type(actual: Option<DataType>, expected: DataType) -> ExpressionError {
    ExpressionError::InvalidOperandTypes {
        operator: format!("cast to {}", expected),
        left_type: actual.unwrap_or(expected),
        right_type: None,
    }
}

/// Fill a new column of `len` elements with `f(i)`; `None` marks a null.
pub fn fill<O, F>(len: usize, config: &EvalConfig, f: F) -> Column
where
    O: NativeType,
    F: Fn(usize) -> Option<O> + Sync,
{
    let mut out = ColumnBuilder::<O>::allocate_output(len);
    let chunk = config.chunk_len();
    let (values, validity) = out.parts_mut();

    let write = |(chunk_index, (values, bits)): (usize, (&mut [O], &mut [u8]))| {
        let base = chunk_index * chunk;
        for (offset, slot) in values.iter_mut().enumerate() {
            if let Some(v) = f(base + offset) {
                *slot = v;
                set_bit(bits, offset, true);
            }
        }
    };

    if config.is_parallel(len) {
        trace!("kernel: {} rows in {} chunks", len, len.div_ceil(chunk));
        values
            .par_chunks_mut(chunk)
            .zip(validity.par_chunks_mut(chunk / 8))
            .enumerate()
            .for_each(write);
    } else {
        values
            .chunks_mut(chunk)
            .zip(validity.chunks_mut(chunk / 8))
            .enumerate()
            .for_each(write);
    }
    out.finish()
}

/// Length of an elementwise result; `None` when both inputs are scalars
fn output_len(operator: &str, left: &Datum, right: &Datum) -> ExpressionResult<Option<usize>> {
    match (left.len(), right.len()) {
        (None, n) | (n, None) => Ok(n),
        (Some(a), Some(b)) if a == b => Ok(Some(a)),
        (Some(a), Some(b)) => Err(ExpressionError::ShapeMismatch {
            operator: operator.to_string(),
            left_len: a,
            right_len: b,
        }),
    }
}

/// Scalar-only inputs run the kernel once and stay scalar
fn wrap(len: Option<usize>, col: Column) -> Datum {
    match len {
        Some(_) => Datum::Column(col),
        None => Datum::Scalar(col.value(0)),
    }
}

/// Convert a datum to `to`. Same-type columns are returned as-is.
pub fn cast(datum: &Datum, to: DataType, config: &EvalConfig) -> ExpressionResult<Datum> {
    match datum {
        Datum::Scalar(value) => cast_value(value, to).map(Datum::Scalar),
        Datum::Column(col) if col.data_type() == to => Ok(datum.clone()),
        Datum::Column(col) => cast_column(col, to, config).map(Datum::Column),
    }
}

fn cast_value(value: &Value, to: DataType) -> ExpressionResult<Value> {
    let out = match (value, to) {
        (Value::Null, _) => Value::Null,
        (v, to) if v.data_type() == Some(to) => v.clone(),
        (Value::Int32(v), DataType::Int64) => Value::Int64(*v as i64),
        (Value::Int32(v), DataType::Float32) => Value::Float32(*v as f32),
        (Value::Int32(v), DataType::Float64) => Value::Float64(*v as f64),
        (Value::Int64(v), DataType::Float32) => Value::Float32(*v as f32),
        (Value::Int64(v), DataType::Float64) => Value::Float64(*v as f64),
        (Value::Float32(v), DataType::Float64) => Value::Float64(*v as f64),
        (other, to) => return Err(wrong_type(other.data_type(), to)),
    };
    Ok(out)
}

fn cast_column(col: &Column, to: DataType, config: &EvalConfig) -> ExpressionResult<Column> {
    macro_rules! convert {
        ($src:ty, $dst:ty) => {{
            let view = col
                .view::<$src>()
                .ok_or_else(|| wrong_type(Some(col.data_type()), to))?;
            fill::<$dst, _>(col.len(), config, |i| view.get(i).map(|v| *v as $dst))
        }};
    }

    let out = match (col.data_type(), to) {
        (DataType::Int32, DataType::Int64) => convert!(i32, i64),
        (DataType::Int32, DataType::Float32) => convert!(i32, f32),
        (DataType::Int32, DataType::Float64) => convert!(i32, f64),
        (DataType::Int64, DataType::Float32) => convert!(i64, f32),
        (DataType::Int64, DataType::Float64) => convert!(i64, f64),
        (DataType::Float32, DataType::Float64) => convert!(f32, f64),
        (from, to) => return Err(wrong_type(Some(from), to)),
    };
    Ok(out)
}

/// Elementwise unary operator. `operand_type` is the bound input type,
/// needed when the input is an untyped null scalar.
pub fn unary(
    op: UnaryOperator,
    operand_type: DataType,
    input: &Datum,
    config: &EvalConfig,
) -> ExpressionResult<Datum> {
    let n = input.len();
    let len = n.unwrap_or(1);
    let col = match op {
        UnaryOperator::IsNa => match input {
            Datum::Scalar(value) => return Ok(Datum::Scalar(Value::Boolean(value.is_null()))),
            Datum::Column(col) => fill::<bool, _>(len, config, |i| Some(!col.is_valid(i))),
        },
        UnaryOperator::Not => {
            let operand = Operand::<bool>::from_datum(input)?;
            fill::<bool, _>(len, config, |i| operand.get(i).map(|v| !v))
        }
        UnaryOperator::Neg => with_numeric_type!(operand_type, T => {
            let operand = Operand::<T>::from_datum(input)?;
            fill::<T, _>(len, config, |i| operand.get(i).map(|v| v.arith_neg()))
        }),
    };
    Ok(wrap(n, col))
}

/// Elementwise arithmetic or logical operator. Both inputs are first cast
/// to `operand_type`; a null on either side yields null.
pub fn binary(
    op: BinaryOperator,
    operand_type: DataType,
    left: &Datum,
    right: &Datum,
    config: &EvalConfig,
) -> ExpressionResult<Datum> {
    let n = output_len(op.as_str(), left, right)?;
    let len = n.unwrap_or(1);
    let left = cast(left, operand_type, config)?;
    let right = cast(right, operand_type, config)?;

    let col = match op {
        BinaryOperator::And | BinaryOperator::Or => {
            let l = Operand::<bool>::from_datum(&left)?;
            let r = Operand::<bool>::from_datum(&right)?;
            let is_and = op == BinaryOperator::And;
            fill::<bool, _>(len, config, |i| {
                let (a, b) = (*l.get(i)?, *r.get(i)?);
                Some(if is_and { a && b } else { a || b })
            })
        }
        _ => with_numeric_type!(operand_type, T => {
            arithmetic::<T>(op, &left, &right, len, config)?
        }),
    };
    Ok(wrap(n, col))
}

fn arithmetic<T: Arithmetic>(
    op: BinaryOperator,
    left: &Datum,
    right: &Datum,
    len: usize,
    config: &EvalConfig,
) -> ExpressionResult<Column> {
    let l = Operand::<T>::from_datum(left)?;
    let r = Operand::<T>::from_datum(right)?;
    let col = match op {
        BinaryOperator::Add => fill::<T, _>(len, config, |i| Some(l.get(i)?.arith_add(*r.get(i)?))),
        BinaryOperator::Sub => fill::<T, _>(len, config, |i| Some(l.get(i)?.arith_sub(*r.get(i)?))),
        BinaryOperator::Mul => fill::<T, _>(len, config, |i| Some(l.get(i)?.arith_mul(*r.get(i)?))),
        BinaryOperator::Div => fill::<T, _>(len, config, |i| l.get(i)?.arith_div(*r.get(i)?)),
        BinaryOperator::And | BinaryOperator::Or => {
            return Err(ExpressionError::InvalidOperandTypes {
                operator: op.as_str().to_string(),
                left_type: T::DATA_TYPE,
                right_type: Some(T::DATA_TYPE),
            })
        }
    };
    Ok(col)
}

/// Comparison producing booleans; null on either side yields null.
pub fn relational(
    op: RelationalOperator,
    operand_type: DataType,
    left: &Datum,
    right: &Datum,
    config: &EvalConfig,
) -> ExpressionResult<Datum> {
    let n = output_len(op.as_str(), left, right)?;
    let len = n.unwrap_or(1);
    let left = cast(left, operand_type, config)?;
    let right = cast(right, operand_type, config)?;

    let col = match operand_type {
        DataType::Str => compare::<String>(op, &left, &right, len, config)?,
        DataType::Boolean => compare::<bool>(op, &left, &right, len, config)?,
        numeric => with_numeric_type!(numeric, T => compare::<T>(op, &left, &right, len, config)?),
    };
    Ok(wrap(n, col))
}

fn compare<T: Element + PartialOrd>(
    op: RelationalOperator,
    left: &Datum,
    right: &Datum,
    len: usize,
    config: &EvalConfig,
) -> ExpressionResult<Column> {
    let l = Operand::<T>::from_datum(left)?;
    let r = Operand::<T>::from_datum(right)?;
    Ok(fill::<bool, _>(len, config, |i| {
        Some(op.compare(l.get(i)?, r.get(i)?))
    }))
}

/// Rows where a boolean mask is true; null and false rows are dropped.
pub fn selection(mask: &Datum, nrows: usize) -> ExpressionResult<RowIndex> {
    let operand = Operand::<bool>::from_datum(mask)?;
    let rows = match operand {
        Operand::Scalar(Some(true)) => (0..nrows).collect(),
        Operand::Scalar(_) => Vec::new(),
        Operand::Array(view) => (0..view.len())
            .filter(|&i| view.get(i).copied().unwrap_or(false))
            .collect(),
    };
    Ok(RowIndex::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: Vec<Option<i32>>) -> Datum {
        Datum::Column(Column::from_options(values))
    }

    fn tiny_chunks() -> EvalConfig {
        EvalConfig::default()
            .with_chunk_size(8)
            .with_parallel_threshold(0)
    }

    #[test]
    fn test_fill_parallel_matches_sequential() {
        let f = |i: usize| if i % 3 == 0 { None } else { Some(i as i64 * 2) };
        let parallel = fill::<i64, _>(100, &tiny_chunks(), f);
        let sequential = fill::<i64, _>(100, &EvalConfig::sequential(), f);
        assert_eq!(parallel.values(), sequential.values());
        assert_eq!(parallel.null_count(), 34);
        assert_eq!(parallel.value(5), Value::Int64(10));
    }

    #[test]
    fn test_deserialized_chunk_size_is_rounded() {
        let config: EvalConfig =
            serde_json::from_str(r#"{"chunk_size": 4, "parallel_threshold": 0}"#).unwrap();
        let x = ints((0..50).map(|i| (i % 5 != 0).then_some(i)).collect());
        let one = Datum::Scalar(Value::Int32(1));
        let out = binary(BinaryOperator::Add, DataType::Int32, &x, &one, &config).unwrap();
        let expected: Vec<Value> = (0..50)
            .map(|i| if i % 5 == 0 { Value::Null } else { Value::Int32(i + 1) })
            .collect();
        assert_eq!(out.to_values(), expected);

        let config: EvalConfig =
            serde_json::from_str(r#"{"chunk_size": 12, "parallel_threshold": 0}"#).unwrap();
        let out = fill::<i64, _>(100, &config, |i| Some(i as i64));
        assert_eq!(out.value(99), Value::Int64(99));
        assert_eq!(out.null_count(), 0);
    }

    #[test]
    fn test_add_propagates_nulls() {
        let x = ints(vec![Some(1), Some(2), None, Some(4)]);
        let y = ints(vec![Some(10), None, Some(30), Some(40)]);
        let out = binary(BinaryOperator::Add, DataType::Int32, &x, &y, &tiny_chunks()).unwrap();
        assert_eq!(
            out.to_values(),
            vec![Value::Int32(11), Value::Null, Value::Null, Value::Int32(44)]
        );
    }

    #[test]
    fn test_integer_overflow_wraps() {
        let x = ints(vec![Some(i32::MAX), Some(i32::MIN)]);
        let one = Datum::Scalar(Value::Int32(1));
        let sum = binary(BinaryOperator::Add, DataType::Int32, &x, &one, &EvalConfig::default())
            .unwrap();
        assert_eq!(sum.to_values(), vec![Value::Int32(i32::MIN), Value::Int32(i32::MIN + 1)]);

        let neg = unary(UnaryOperator::Neg, DataType::Int32, &x, &EvalConfig::default()).unwrap();
        assert_eq!(neg.to_values(), vec![Value::Int32(-i32::MAX), Value::Int32(i32::MIN)]);
    }

    #[test]
    fn test_division_is_float() {
        let x = ints(vec![Some(7), Some(1), Some(0)]);
        let zero = Datum::Scalar(Value::Int32(0));
        let two = Datum::Scalar(Value::Int32(2));
        let config = EvalConfig::default();

        let halves = binary(BinaryOperator::Div, DataType::Float64, &x, &two, &config).unwrap();
        assert_eq!(
            halves.to_values(),
            vec![Value::Float64(3.5), Value::Float64(0.5), Value::Float64(0.0)]
        );

        let by_zero = binary(BinaryOperator::Div, DataType::Float64, &x, &zero, &config).unwrap();
        let col = by_zero.as_column().unwrap();
        assert_eq!(col.value(0), Value::Float64(f64::INFINITY));
        match col.value(2) {
            Value::Float64(v) => assert!(v.is_nan()),
            other => panic!("expected NaN, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_inputs_stay_scalar() {
        let a = Datum::Scalar(Value::Int32(2));
        let b = Datum::Scalar(Value::Float32(0.5));
        let out = binary(BinaryOperator::Mul, DataType::Float64, &a, &b, &EvalConfig::default())
            .unwrap();
        assert_eq!(out.as_scalar(), Some(&Value::Float64(1.0)));

        let null = Datum::Scalar(Value::Null);
        let out = unary(UnaryOperator::Neg, DataType::Float64, &null, &EvalConfig::default())
            .unwrap();
        assert_eq!(out.as_scalar(), Some(&Value::Null));
    }

    #[test]
    fn test_isna_never_null() {
        let x = ints(vec![Some(1), None, Some(3)]);
        let out = unary(UnaryOperator::IsNa, DataType::Int32, &x, &tiny_chunks()).unwrap();
        assert_eq!(
            out.to_values(),
            vec![Value::Boolean(false), Value::Boolean(true), Value::Boolean(false)]
        );
        assert_eq!(out.as_column().unwrap().null_count(), 0);

        let out = unary(UnaryOperator::IsNa, DataType::Int32, &Datum::Scalar(Value::Null), &tiny_chunks())
            .unwrap();
        assert_eq!(out.as_scalar(), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_logical_strict_nulls() {
        let a = Datum::Column(Column::from_options(vec![Some(true), Some(false), None, None]));
        let b = Datum::Column(Column::from_options(vec![Some(true), None, Some(false), Some(true)]));
        let config = EvalConfig::default();

        let and = binary(BinaryOperator::And, DataType::Boolean, &a, &b, &config).unwrap();
        assert_eq!(
            and.to_values(),
            vec![Value::Boolean(true), Value::Null, Value::Null, Value::Null]
        );
        let or = binary(BinaryOperator::Or, DataType::Boolean, &a, &b, &config).unwrap();
        assert_eq!(or.value(0), Value::Boolean(true));
        assert_eq!(or.value(3), Value::Null);

        let not = unary(UnaryOperator::Not, DataType::Boolean, &a, &config).unwrap();
        assert_eq!(
            not.to_values(),
            vec![Value::Boolean(false), Value::Boolean(true), Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_relational_three_valued() {
        let x = ints(vec![Some(1), Some(2), None, Some(4)]);
        let two = Datum::Scalar(Value::Int32(2));
        let out = relational(RelationalOperator::Gt, DataType::Int32, &x, &two, &tiny_chunks())
            .unwrap();
        assert_eq!(
            out.to_values(),
            vec![Value::Boolean(false), Value::Boolean(false), Value::Null, Value::Boolean(true)]
        );
    }

    #[test]
    fn test_relational_promotes_and_compares_strings() {
        let x = ints(vec![Some(1), Some(3)]);
        let half = Datum::Scalar(Value::Float32(2.5));
        let out = relational(RelationalOperator::Le, DataType::Float64, &x, &half, &EvalConfig::default())
            .unwrap();
        assert_eq!(out.to_values(), vec![Value::Boolean(true), Value::Boolean(false)]);

        let s = Datum::Column(Column::from_strings(vec![Some("apple"), Some("pear"), None]));
        let m = Datum::Scalar(Value::String("banana".into()));
        let out = relational(RelationalOperator::Lt, DataType::Str, &s, &m, &EvalConfig::default())
            .unwrap();
        assert_eq!(
            out.to_values(),
            vec![Value::Boolean(true), Value::Boolean(false), Value::Null]
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let a = ints(vec![Some(1), Some(2)]);
        let b = ints(vec![Some(1)]);
        assert!(matches!(
            binary(BinaryOperator::Sub, DataType::Int32, &a, &b, &EvalConfig::default()),
            Err(ExpressionError::ShapeMismatch { left_len: 2, right_len: 1, .. })
        ));
    }

    #[test]
    fn test_cast() {
        let config = EvalConfig::default();
        let x = ints(vec![Some(1), None]);
        let wide = cast(&x, DataType::Int64, &config).unwrap();
        assert_eq!(wide.to_values(), vec![Value::Int64(1), Value::Null]);

        let same = cast(&x, DataType::Int32, &config).unwrap();
        assert!(same.as_column().unwrap().shares_buffer(x.as_column().unwrap()));

        assert!(cast(&x, DataType::Str, &config).is_err());
        assert_eq!(
            cast(&Datum::Scalar(Value::Float32(1.5)), DataType::Float64, &config)
                .unwrap()
                .as_scalar(),
            Some(&Value::Float64(1.5))
        );
    }

    #[test]
    fn test_selection() {
        let mask = Datum::Column(Column::from_options(vec![Some(true), None, Some(false), Some(true)]));
        assert_eq!(selection(&mask, 4).unwrap().as_slice(), &[0, 3]);
        assert_eq!(selection(&Datum::Scalar(Value::Boolean(true)), 3).unwrap().len(), 3);
        assert!(selection(&Datum::Scalar(Value::Null), 3).unwrap().is_empty());
    }
}
