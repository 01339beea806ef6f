//! Immutable, typed, nullable columns.
//!
//! A `Column` is a cheap handle: cloning it shares the underlying buffer.
//! Row selection is expressed by attaching a `RowIndex` instead of copying
//! values, so selecting columns and filtering rows never touch the data.

use crate::access::{AccessError, AccessResult, Bitmap, DataType, Value};
use std::sync::Arc;

/// Raw element storage
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Boolean(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Str(Vec<String>),
}

impl ColumnData {
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Boolean(_) => DataType::Boolean,
            ColumnData::Int32(_) => DataType::Int32,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Float32(_) => DataType::Float32,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Str(_) => DataType::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn value(&self, i: usize) -> Value {
        match self {
            ColumnData::Boolean(v) => Value::Boolean(v[i]),
            ColumnData::Int32(v) => Value::Int32(v[i]),
            ColumnData::Int64(v) => Value::Int64(v[i]),
            ColumnData::Float32(v) => Value::Float32(v[i]),
            ColumnData::Float64(v) => Value::Float64(v[i]),
            ColumnData::Str(v) => Value::String(v[i].clone()),
        }
    }

    /// Allocated bytes of the value buffer
    fn data_size(&self) -> usize {
        match self {
            ColumnData::Str(v) => v.iter().map(|s| s.len()).sum::<usize>(),
            other => other.len() * other.data_type().width().unwrap_or(0),
        }
    }
}

/// Element types that can be borrowed out of a `ColumnData` as a slice
pub trait Element: Send + Sync + Sized + 'static {
    const DATA_TYPE: DataType;

    fn slice(data: &ColumnData) -> Option<&[Self]>;

    /// Borrow the payload of a scalar of the same type
    fn value_ref(value: &Value) -> Option<&Self>;
}

/// Fixed-width element types produced by kernels
pub trait NativeType: Element + Copy + Default + PartialOrd {
    fn into_data(values: Vec<Self>) -> ColumnData;
    fn into_value(self) -> Value;
}

macro_rules! native_type {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn slice(data: &ColumnData) -> Option<&[Self]> {
                match data {
                    ColumnData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn value_ref(value: &Value) -> Option<&Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl NativeType for $ty {
            fn into_data(values: Vec<Self>) -> ColumnData {
                ColumnData::$variant(values)
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

native_type!(bool, Boolean);
native_type!(i32, Int32);
native_type!(i64, Int64);
native_type!(f32, Float32);
native_type!(f64, Float64);

impl Element for String {
    const DATA_TYPE: DataType = DataType::Str;

    fn slice(data: &ColumnData) -> Option<&[Self]> {
        match data {
            ColumnData::Str(values) => Some(values),
            _ => None,
        }
    }

    fn value_ref(value: &Value) -> Option<&Self> {
        match value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Physical row positions selected out of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIndex(Arc<[usize]>);

impl RowIndex {
    pub fn new(rows: Vec<usize>) -> Self {
        Self(rows.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Compose two selections: row `i` of the result is `inner[self[i]]`.
    pub fn product(&self, inner: &RowIndex) -> AccessResult<RowIndex> {
        let rows = self
            .0
            .iter()
            .map(|&i| {
                inner.0.get(i).copied().ok_or(AccessError::RowOutOfBounds {
                    row: i,
                    len: inner.len(),
                })
            })
            .collect::<AccessResult<Vec<_>>>()?;
        Ok(RowIndex::new(rows))
    }
}

#[derive(Debug)]
struct ColumnBuffer {
    data: ColumnData,
    validity: Bitmap,
}

/// Shareable handle to an immutable column, optionally viewed through a
/// `RowIndex`
#[derive(Debug, Clone)]
pub struct Column {
    buffer: Arc<ColumnBuffer>,
    rows: Option<RowIndex>,
}

impl Column {
    /// Create a column from raw storage; validity must cover every element.
    pub fn new(data: ColumnData, validity: Bitmap) -> AccessResult<Self> {
        if data.len() != validity.len() {
            return Err(AccessError::LengthMismatch {
                values: data.len(),
                validity: validity.len(),
            });
        }
        Ok(Self {
            buffer: Arc::new(ColumnBuffer { data, validity }),
            rows: None,
        })
    }

    /// Column without nulls
    pub fn from_values<T: NativeType>(values: Vec<T>) -> Self {
        let validity = Bitmap::new_valid(values.len());
        Self::from_parts(T::into_data(values), validity)
    }

    /// Column where `None` marks a null element
    pub fn from_options<T: NativeType>(values: Vec<Option<T>>) -> Self {
        let validity = Bitmap::from_bools(&values.iter().map(Option::is_some).collect::<Vec<_>>());
        let values = values.into_iter().map(Option::unwrap_or_default).collect();
        Self::from_parts(T::into_data(values), validity)
    }

    pub fn from_strings<S: AsRef<str>>(values: Vec<Option<S>>) -> Self {
        let validity = Bitmap::from_bools(&values.iter().map(Option::is_some).collect::<Vec<_>>());
        let values = values
            .into_iter()
            .map(|v| v.map(|s| s.as_ref().to_string()).unwrap_or_default())
            .collect();
        Self::from_parts(ColumnData::Str(values), validity)
    }

    pub(crate) fn from_parts(data: ColumnData, validity: Bitmap) -> Self {
        debug_assert_eq!(data.len(), validity.len());
        Self {
            buffer: Arc::new(ColumnBuffer { data, validity }),
            rows: None,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.buffer.data.data_type()
    }

    /// Logical length: the row index length if one is attached
    pub fn len(&self) -> usize {
        match &self.rows {
            Some(rows) => rows.len(),
            None => self.buffer.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &ColumnData {
        &self.buffer.data
    }

    pub fn validity(&self) -> &Bitmap {
        &self.buffer.validity
    }

    pub fn row_index(&self) -> Option<&RowIndex> {
        self.rows.as_ref()
    }

    #[inline]
    pub fn physical_row(&self, i: usize) -> usize {
        match &self.rows {
            Some(rows) => rows.as_slice()[i],
            None => i,
        }
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.buffer.validity.get(self.physical_row(i))
    }

    pub fn null_count(&self) -> usize {
        match &self.rows {
            None => self.buffer.validity.null_count(),
            Some(_) => (0..self.len()).filter(|&i| !self.is_valid(i)).count(),
        }
    }

    /// Element `i` as a scalar; allocates for strings
    pub fn value(&self, i: usize) -> Value {
        if !self.is_valid(i) {
            return Value::Null;
        }
        self.buffer.data.value(self.physical_row(i))
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    /// View of this column restricted to `rows`, composed with any row
    /// index already attached. The buffer is shared, not copied.
    pub fn with_rows(&self, rows: &RowIndex) -> AccessResult<Column> {
        let rows = match &self.rows {
            Some(current) => rows.product(current)?,
            None => {
                let len = self.buffer.data.len();
                if let Some(&bad) = rows.as_slice().iter().find(|&&r| r >= len) {
                    return Err(AccessError::RowOutOfBounds { row: bad, len });
                }
                rows.clone()
            }
        };
        Ok(Column {
            buffer: Arc::clone(&self.buffer),
            rows: Some(rows),
        })
    }

    /// Borrow the column as a typed view, `None` if `T` is the wrong type
    pub fn view<T: Element>(&self) -> Option<ColumnView<'_, T>> {
        Some(ColumnView {
            values: T::slice(&self.buffer.data)?,
            validity: &self.buffer.validity,
            rows: self.rows.as_ref().map(RowIndex::as_slice),
        })
    }

    /// Number of handles sharing the buffer, this one excluded
    pub fn buffer_refcount(&self) -> usize {
        Arc::strong_count(&self.buffer) - 1
    }

    pub fn shares_buffer(&self, other: &Column) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Allocated bytes of the value buffer
    pub fn data_size(&self) -> usize {
        self.buffer.data.data_size()
    }
}

/// Typed borrow of a column used by kernels
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a, T> {
    values: &'a [T],
    validity: &'a Bitmap,
    rows: Option<&'a [usize]>,
}

impl<'a, T> ColumnView<'a, T> {
    pub fn len(&self) -> usize {
        match self.rows {
            Some(rows) => rows.len(),
            None => self.values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&'a T> {
        let row = match self.rows {
            Some(rows) => rows[i],
            None => i,
        };
        if self.validity.get(row) {
            Some(&self.values[row])
        } else {
            None
        }
    }
}

/// Write-once, pre-sized output column for kernels.
///
/// Every slot starts null; writers fill disjoint ranges through
/// [`ColumnBuilder::parts_mut`] and the result is frozen with
/// [`ColumnBuilder::finish`].
#[derive(Debug)]
pub struct ColumnBuilder<T: NativeType> {
    values: Vec<T>,
    validity: Bitmap,
}

impl<T: NativeType> ColumnBuilder<T> {
    pub fn allocate_output(len: usize) -> Self {
        Self {
            values: vec![T::default(); len],
            validity: Bitmap::new_null(len),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn parts_mut(&mut self) -> (&mut [T], &mut [u8]) {
        (&mut self.values, self.validity.bytes_mut())
    }

    pub fn finish(self) -> Column {
        Column::from_parts(T::into_data(self.values), self.validity)
    }
}
