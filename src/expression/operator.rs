//! Operator definitions and their type rules.

use crate::access::{DataType, LogicalType};

/// Elementwise arithmetic and logical operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Logical
    And,
    Or,
}

impl BinaryOperator {
    /// Type both operands are converted to before the kernel runs
    pub fn operand_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        match self {
            BinaryOperator::Add | BinaryOperator::Sub | BinaryOperator::Mul => {
                DataType::promote(left, right)
            }
            // Division never truncates: any numeric pair divides as float64
            BinaryOperator::Div => {
                DataType::promote(left, right).map(|_| DataType::Float64)
            }
            BinaryOperator::And | BinaryOperator::Or => match (left, right) {
                (DataType::Boolean, DataType::Boolean) => Some(DataType::Boolean),
                _ => None,
            },
        }
    }

    /// Get the output type of this operator given input types
    pub fn output_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        self.operand_type(left, right)
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        }
    }
}

/// Comparison operators; always produce booleans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationalOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelationalOperator {
    /// Common type the operands are compared in.
    ///
    /// Numbers compare after promotion, strings lexicographically, booleans
    /// with `false < true`. Any other pairing is rejected.
    pub fn operand_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        match (left.logical_type(), right.logical_type()) {
            (LogicalType::String, LogicalType::String) => Some(DataType::Str),
            (LogicalType::Boolean, LogicalType::Boolean) => Some(DataType::Boolean),
            _ => DataType::promote(left, right),
        }
    }

    pub fn output_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        self.operand_type(left, right).map(|_| DataType::Boolean)
    }

    /// Apply the comparison with IEEE semantics, so NaN compares unequal to
    /// everything and `Ne` is the only operator that holds for it.
    #[inline]
    pub fn compare<T: PartialOrd + ?Sized>(&self, left: &T, right: &T) -> bool {
        match self {
            RelationalOperator::Eq => left == right,
            RelationalOperator::Ne => left != right,
            RelationalOperator::Lt => left < right,
            RelationalOperator::Le => left <= right,
            RelationalOperator::Gt => left > right,
            RelationalOperator::Ge => left >= right,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationalOperator::Eq => "==",
            RelationalOperator::Ne => "!=",
            RelationalOperator::Lt => "<",
            RelationalOperator::Le => "<=",
            RelationalOperator::Gt => ">",
            RelationalOperator::Ge => ">=",
        }
    }
}

/// Unary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// Arithmetic negation
    Neg,
    /// Logical negation
    Not,
    /// Null test; the only operator whose result is never null
    IsNa,
}

impl UnaryOperator {
    /// Get the output type of this operator given input type
    pub fn output_type(&self, operand: DataType) -> Option<DataType> {
        match self {
            UnaryOperator::Neg => operand.is_numeric().then_some(operand),
            UnaryOperator::Not => match operand {
                DataType::Boolean => Some(DataType::Boolean),
                _ => None,
            },
            UnaryOperator::IsNa => Some(DataType::Boolean),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Neg => "-",
            UnaryOperator::Not => "NOT",
            UnaryOperator::IsNa => "ISNA",
        }
    }
}

/// Reducers collapsing a column to one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceFunction {
    Mean,
    Min,
    Max,
    /// Sample standard deviation (n - 1 denominator)
    Sd,
    /// Number of non-null values
    Count,
    Sum,
}

impl ReduceFunction {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceFunction::Mean => "mean",
            ReduceFunction::Min => "min",
            ReduceFunction::Max => "max",
            ReduceFunction::Sd => "sd",
            ReduceFunction::Count => "count",
            ReduceFunction::Sum => "sum",
        }
    }

    /// Returns the output data type for this reducer given the input type
    pub fn output_type(&self, input: DataType) -> Option<DataType> {
        match self {
            ReduceFunction::Count => Some(DataType::Int64),
            ReduceFunction::Mean | ReduceFunction::Sd => {
                input.is_numeric().then_some(DataType::Float64)
            }
            ReduceFunction::Min | ReduceFunction::Max => input.is_numeric().then_some(input),
            ReduceFunction::Sum => match input.logical_type() {
                LogicalType::Integer => Some(DataType::Int64),
                LogicalType::Real => Some(DataType::Float64),
                _ => None,
            },
        }
    }
}
