//! Streaming, mergeable reductions.
//!
//! Each reducer keeps a small partial state that can absorb values one at a
//! time and be merged with the state of a later range of rows. Chunked
//! evaluation builds one partial per chunk and folds them left to right, so
//! the parallel result matches a sequential scan up to floating-point
//! rounding.

use crate::access::{DataType, NativeType, Value};
use crate::config::EvalConfig;
use crate::expression::kernel::{with_numeric_type, Arithmetic, Operand};
use crate::expression::{Datum, ExpressionError, ExpressionResult, ReduceFunction};
use rayon::prelude::*;
use std::ops::Range;

/// Partial state of a reduction
pub trait Accumulator: Default + Send {
    type Item;

    fn update(&mut self, value: Self::Item);

    /// Combine with the state of rows that come after this one
    fn merge(self, later: Self) -> Self;

    fn finish(self) -> Value;
}

/// Number of non-null values
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Count {
    n: i64,
}

impl Accumulator for Count {
    type Item = ();

    fn update(&mut self, _: ()) {
        self.n += 1;
    }

    fn merge(self, later: Self) -> Self {
        Count { n: self.n + later.n }
    }

    fn finish(self) -> Value {
        Value::Int64(self.n)
    }
}

/// Integer sum, wrapping on overflow; null when no value was seen
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct IntegerSum {
    n: u64,
    sum: i64,
}

impl Accumulator for IntegerSum {
    type Item = i64;

    fn update(&mut self, value: i64) {
        self.n += 1;
        self.sum = self.sum.wrapping_add(value);
    }

    fn merge(self, later: Self) -> Self {
        IntegerSum {
            n: self.n + later.n,
            sum: self.sum.wrapping_add(later.sum),
        }
    }

    fn finish(self) -> Value {
        if self.n == 0 {
            Value::Null
        } else {
            Value::Int64(self.sum)
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RealSum {
    n: u64,
    sum: f64,
}

impl Accumulator for RealSum {
    type Item = f64;

    fn update(&mut self, value: f64) {
        self.n += 1;
        self.sum += value;
    }

    fn merge(self, later: Self) -> Self {
        RealSum {
            n: self.n + later.n,
            sum: self.sum + later.sum,
        }
    }

    fn finish(self) -> Value {
        if self.n == 0 {
            Value::Null
        } else {
            Value::Float64(self.sum)
        }
    }
}

/// Arithmetic mean; null when no value was seen
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Mean {
    n: u64,
    sum: f64,
}

impl Accumulator for Mean {
    type Item = f64;

    fn update(&mut self, value: f64) {
        self.n += 1;
        self.sum += value;
    }

    fn merge(self, later: Self) -> Self {
        Mean {
            n: self.n + later.n,
            sum: self.sum + later.sum,
        }
    }

    fn finish(self) -> Value {
        if self.n == 0 {
            Value::Null
        } else {
            Value::Float64(self.sum / self.n as f64)
        }
    }
}

/// Running minimum (`MAX = false`) or maximum (`MAX = true`).
///
/// Only a strictly better value replaces the current one, so the earliest
/// of equal values wins. NaN is never selected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum<T, const MAX: bool> {
    best: Option<T>,
}

pub type Min<T> = Extremum<T, false>;
pub type Max<T> = Extremum<T, true>;

impl<T, const MAX: bool> Default for Extremum<T, MAX> {
    fn default() -> Self {
        Self { best: None }
    }
}

impl<T: NativeType, const MAX: bool> Extremum<T, MAX> {
    fn improves(candidate: &T, current: &T) -> bool {
        if MAX {
            candidate > current
        } else {
            candidate < current
        }
    }
}

impl<T: NativeType, const MAX: bool> Accumulator for Extremum<T, MAX> {
    type Item = T;

    fn update(&mut self, value: T) {
        if value.partial_cmp(&value).is_none() {
            return;
        }
        let replace = match &self.best {
            Some(current) => Self::improves(&value, current),
            None => true,
        };
        if replace {
            self.best = Some(value);
        }
    }

    fn merge(mut self, later: Self) -> Self {
        if let Some(value) = later.best {
            self.update(value);
        }
        self
    }

    fn finish(self) -> Value {
        self.best.map(T::into_value).unwrap_or(Value::Null)
    }
}

/// Welford's online mean and variance.
///
/// `finish` yields the sample standard deviation (n - 1 denominator), null
/// with fewer than two values. Partials combine with Chan's pairwise update.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Welford {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }

    pub fn variance(&self) -> Option<f64> {
        (self.n > 1).then(|| self.m2 / (self.n - 1) as f64)
    }
}

impl Accumulator for Welford {
    type Item = f64;

    fn update(&mut self, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn merge(self, later: Self) -> Self {
        if self.n == 0 {
            return later;
        }
        if later.n == 0 {
            return self;
        }
        let n = self.n + later.n;
        let (na, nb, nf) = (self.n as f64, later.n as f64, n as f64);
        let delta = later.mean - self.mean;
        Welford {
            n,
            mean: self.mean + delta * nb / nf,
            m2: self.m2 + later.m2 + delta * delta * na * nb / nf,
        }
    }

    fn finish(self) -> Value {
        self.variance()
            .map(|v| Value::Float64(v.sqrt()))
            .unwrap_or(Value::Null)
    }
}

/// Run `step` over rows `0..len`, one partial per chunk when the input is
/// large enough, and merge the partials in row order.
pub fn accumulate<A, F>(len: usize, config: &EvalConfig, step: F) -> A
where
    A: Accumulator,
    F: Fn(&mut A, usize) + Sync,
{
    let partial = |rows: Range<usize>| {
        let mut acc = A::default();
        for i in rows {
            step(&mut acc, i);
        }
        acc
    };

    if config.is_parallel(len) {
        let chunk = config.chunk_len();
        (0..len.div_ceil(chunk))
            .into_par_iter()
            .map(|c| partial(c * chunk..((c + 1) * chunk).min(len)))
            .reduce(A::default, A::merge)
    } else {
        partial(0..len)
    }
}

/// Reduce `input` to a single value. Nulls are skipped; a scalar input
/// stands for `rows` copies of itself.
pub fn reduce(
    function: ReduceFunction,
    input_type: DataType,
    input: &Datum,
    rows: usize,
    config: &EvalConfig,
) -> ExpressionResult<Value> {
    let len = input.len().unwrap_or(rows);

    let value = match function {
        ReduceFunction::Count => match input {
            Datum::Scalar(value) if value.is_null() => Value::Int64(0),
            Datum::Scalar(_) => Value::Int64(i64::try_from(rows).unwrap_or(i64::MAX)),
            Datum::Column(col) => accumulate::<Count, _>(len, config, |acc, i| {
                if col.is_valid(i) {
                    acc.update(())
                }
            })
            .finish(),
        },
        ReduceFunction::Mean => with_numeric_type!(input_type, T => {
            real::<T, Mean>(input, len, config)?
        }),
        ReduceFunction::Sd => with_numeric_type!(input_type, T => {
            real::<T, Welford>(input, len, config)?
        }),
        ReduceFunction::Min => with_numeric_type!(input_type, T => {
            native::<T, Min<T>>(input, len, config)?
        }),
        ReduceFunction::Max => with_numeric_type!(input_type, T => {
            native::<T, Max<T>>(input, len, config)?
        }),
        ReduceFunction::Sum => match input_type {
            DataType::Int32 => integer_sum::<i32>(input, len, config)?,
            DataType::Int64 => integer_sum::<i64>(input, len, config)?,
            DataType::Float32 => real::<f32, RealSum>(input, len, config)?,
            DataType::Float64 => real::<f64, RealSum>(input, len, config)?,
            other => {
                return Err(ExpressionError::InvalidOperandTypes {
                    operator: function.name().to_string(),
                    left_type: other,
                    right_type: None,
                })
            }
        },
    };
    Ok(value)
}

fn real<T, A>(input: &Datum, len: usize, config: &EvalConfig) -> ExpressionResult<Value>
where
    T: Arithmetic,
    A: Accumulator<Item = f64>,
{
    let operand = Operand::<T>::from_datum(input)?;
    Ok(accumulate::<A, _>(len, config, |acc, i| {
        if let Some(v) = operand.get(i) {
            acc.update(v.to_f64())
        }
    })
    .finish())
}

fn native<T, A>(input: &Datum, len: usize, config: &EvalConfig) -> ExpressionResult<Value>
where
    T: NativeType,
    A: Accumulator<Item = T>,
{
    let operand = Operand::<T>::from_datum(input)?;
    Ok(accumulate::<A, _>(len, config, |acc, i| {
        if let Some(v) = operand.get(i) {
            acc.update(*v)
        }
    })
    .finish())
}

fn integer_sum<T>(input: &Datum, len: usize, config: &EvalConfig) -> ExpressionResult<Value>
where
    T: NativeType + Into<i64>,
{
    let operand = Operand::<T>::from_datum(input)?;
    Ok(accumulate::<IntegerSum, _>(len, config, |acc, i| {
        if let Some(v) = operand.get(i) {
            acc.update((*v).into())
        }
    })
    .finish())
}
