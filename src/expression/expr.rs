//! Expression nodes and the arena that owns them.
//!
//! Nodes are plain data. They are appended to an [`ExprArena`] and addressed
//! by [`NodeId`]; a node can only reference nodes created before it, so every
//! arena is acyclic by construction. Passing the same `NodeId` to two
//! parents shares the subexpression, and the evaluation context computes it
//! once.

use crate::access::{DataType, Value};
use crate::expression::operator::{
    BinaryOperator, ReduceFunction, RelationalOperator, UnaryOperator,
};
use std::fmt;

/// Stable index of a node inside its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to a table column, by name or by position.
///
/// Negative positions count from the last column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnSelector {
    Name(String),
    Index(i64),
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSelector::Name(name) => f.write_str(name),
            ColumnSelector::Index(index) => write!(f, "[{}]", index),
        }
    }
}

impl From<&str> for ColumnSelector {
    fn from(name: &str) -> Self {
        ColumnSelector::Name(name.to_string())
    }
}

impl From<String> for ColumnSelector {
    fn from(name: String) -> Self {
        ColumnSelector::Name(name)
    }
}

impl From<i64> for ColumnSelector {
    fn from(index: i64) -> Self {
        ColumnSelector::Index(index)
    }
}

impl From<i32> for ColumnSelector {
    fn from(index: i32) -> Self {
        ColumnSelector::Index(index.into())
    }
}

/// Constant scalar with its type fixed at construction
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub value: Value,
    pub data_type: DataType,
}

impl Literal {
    /// Literal typed with the narrowest type that holds `value` exactly.
    /// An untyped null becomes a boolean null.
    pub fn new(value: impl Into<Value>) -> Self {
        let value = value.into().narrowest();
        let data_type = value.data_type().unwrap_or(DataType::Boolean);
        Self { value, data_type }
    }

    /// Null literal of a given type
    pub fn null(data_type: DataType) -> Self {
        Self {
            value: Value::Null,
            data_type,
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    /// Literal constant value
    Literal(Literal),

    /// Column reference, resolved at bind time
    Column(ColumnSelector),

    /// Negation, logical not, null test
    Unary { op: UnaryOperator, operand: NodeId },

    /// Arithmetic and logical combination
    Binary {
        op: BinaryOperator,
        left: NodeId,
        right: NodeId,
    },

    /// Comparison producing booleans
    Relational {
        op: RelationalOperator,
        left: NodeId,
        right: NodeId,
    },

    /// Terminal aggregation to a single value
    Reduce {
        function: ReduceFunction,
        operand: NodeId,
    },
}

impl ExprNode {
    pub fn arity(&self) -> usize {
        self.children().len()
    }

    pub fn children(&self) -> Vec<NodeId> {
        match self {
            ExprNode::Literal(_) | ExprNode::Column(_) => vec![],
            ExprNode::Unary { operand, .. } | ExprNode::Reduce { operand, .. } => vec![*operand],
            ExprNode::Binary { left, right, .. } | ExprNode::Relational { left, right, .. } => {
                vec![*left, *right]
            }
        }
    }

    /// Whether the node collapses its input to a single row
    pub fn is_reduction(&self) -> bool {
        matches!(self, ExprNode::Reduce { .. })
    }
}

/// Owner of expression nodes.
///
/// Factory methods append a node and return its id. The arena is
/// append-only, so ids stay valid and nodes never change once created.
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&ExprNode> {
        self.nodes.get(id.index())
    }

    /// Append a node
    pub fn push(&mut self, node: ExprNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Create a literal node
    pub fn lit(&mut self, value: impl Into<Value>) -> NodeId {
        self.push(ExprNode::Literal(Literal::new(value)))
    }

    /// Create a typed null literal
    pub fn lit_null(&mut self, data_type: DataType) -> NodeId {
        self.push(ExprNode::Literal(Literal::null(data_type)))
    }

    /// Create a column reference by name or index
    pub fn col(&mut self, selector: impl Into<ColumnSelector>) -> NodeId {
        self.push(ExprNode::Column(selector.into()))
    }

    pub fn unary(&mut self, op: UnaryOperator, operand: NodeId) -> NodeId {
        self.push(ExprNode::Unary { op, operand })
    }

    pub fn binary(&mut self, op: BinaryOperator, left: NodeId, right: NodeId) -> NodeId {
        self.push(ExprNode::Binary { op, left, right })
    }

    pub fn relational(&mut self, op: RelationalOperator, left: NodeId, right: NodeId) -> NodeId {
        self.push(ExprNode::Relational { op, left, right })
    }

    pub fn reduce(&mut self, function: ReduceFunction, operand: NodeId) -> NodeId {
        self.push(ExprNode::Reduce { function, operand })
    }

    pub fn neg(&mut self, operand: NodeId) -> NodeId {
        self.unary(UnaryOperator::Neg, operand)
    }

    pub fn not(&mut self, operand: NodeId) -> NodeId {
        self.unary(UnaryOperator::Not, operand)
    }

    pub fn isna(&mut self, operand: NodeId) -> NodeId {
        self.unary(UnaryOperator::IsNa, operand)
    }

    pub fn add(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOperator::Add, left, right)
    }

    pub fn sub(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOperator::Sub, left, right)
    }

    pub fn mul(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOperator::Mul, left, right)
    }

    pub fn div(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOperator::Div, left, right)
    }

    pub fn and(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOperator::And, left, right)
    }

    pub fn or(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOperator::Or, left, right)
    }

    pub fn eq(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.relational(RelationalOperator::Eq, left, right)
    }

    pub fn ne(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.relational(RelationalOperator::Ne, left, right)
    }

    pub fn lt(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.relational(RelationalOperator::Lt, left, right)
    }

    pub fn le(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.relational(RelationalOperator::Le, left, right)
    }

    pub fn gt(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.relational(RelationalOperator::Gt, left, right)
    }

    pub fn ge(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.relational(RelationalOperator::Ge, left, right)
    }

    pub fn mean(&mut self, operand: NodeId) -> NodeId {
        self.reduce(ReduceFunction::Mean, operand)
    }

    pub fn min(&mut self, operand: NodeId) -> NodeId {
        self.reduce(ReduceFunction::Min, operand)
    }

    pub fn max(&mut self, operand: NodeId) -> NodeId {
        self.reduce(ReduceFunction::Max, operand)
    }

    pub fn sd(&mut self, operand: NodeId) -> NodeId {
        self.reduce(ReduceFunction::Sd, operand)
    }

    pub fn count(&mut self, operand: NodeId) -> NodeId {
        self.reduce(ReduceFunction::Count, operand)
    }

    pub fn sum(&mut self, operand: NodeId) -> NodeId {
        self.reduce(ReduceFunction::Sum, operand)
    }

    /// Check if a node is constant (reaches no column reference)
    pub fn is_constant(&self, id: NodeId) -> bool {
        match self.get(id) {
            Some(ExprNode::Literal(_)) => true,
            Some(ExprNode::Column(_)) | None => false,
            Some(node) => node.children().into_iter().all(|c| self.is_constant(c)),
        }
    }

    /// Render a node as an infix string, for logs and error messages
    pub fn display(&self, id: NodeId) -> String {
        match self.get(id) {
            None => id.to_string(),
            Some(ExprNode::Literal(lit)) => lit.value.to_string(),
            Some(ExprNode::Column(selector)) => selector.to_string(),
            Some(ExprNode::Unary { op, operand }) => match op {
                UnaryOperator::IsNa => format!("isna({})", self.display(*operand)),
                _ => format!("{}{}", op.as_str(), self.display(*operand)),
            },
            Some(ExprNode::Binary { op, left, right }) => format!(
                "({} {} {})",
                self.display(*left),
                op.as_str(),
                self.display(*right)
            ),
            Some(ExprNode::Relational { op, left, right }) => format!(
                "({} {} {})",
                self.display(*left),
                op.as_str(),
                self.display(*right)
            ),
            Some(ExprNode::Reduce { function, operand }) => {
                format!("{}({})", function.name(), self.display(*operand))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_inference() {
        assert_eq!(Literal::new(42i64).data_type, DataType::Int32);
        assert_eq!(Literal::new(5_000_000_000i64).data_type, DataType::Int64);
        assert_eq!(Literal::new(2.5f64).data_type, DataType::Float32);
        assert_eq!(Literal::new(0.1f64).data_type, DataType::Float64);
        assert_eq!(Literal::new("hi").data_type, DataType::Str);
        assert_eq!(Literal::new(true).data_type, DataType::Boolean);
        assert_eq!(Literal::new(Value::Null).data_type, DataType::Boolean);
        assert_eq!(Literal::null(DataType::Float64).value, Value::Null);
    }

    #[test]
    fn test_factories_append_in_order() {
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let two = arena.lit(2);
        let sum = arena.add(x, two);
        let m = arena.mean(sum);

        assert_eq!(arena.len(), 4);
        assert_eq!((x, two, sum, m), (NodeId(0), NodeId(1), NodeId(2), NodeId(3)));
        assert_eq!(arena.get(sum).unwrap().children(), vec![x, two]);
        assert!(arena.get(m).unwrap().is_reduction());
        assert!(!arena.get(sum).unwrap().is_reduction());
        assert_eq!(arena.get(m).unwrap().arity(), 1);
        assert_eq!(arena.get(x).unwrap().arity(), 0);
    }

    #[test]
    fn test_selectors() {
        let mut arena = ExprArena::new();
        let by_name = arena.col("price");
        let by_index = arena.col(-1);
        assert_eq!(
            arena.get(by_name),
            Some(&ExprNode::Column(ColumnSelector::Name("price".into())))
        );
        assert_eq!(
            arena.get(by_index),
            Some(&ExprNode::Column(ColumnSelector::Index(-1)))
        );
    }

    #[test]
    fn test_is_constant() {
        let mut arena = ExprArena::new();
        let one = arena.lit(1);
        let two = arena.lit(2);
        let x = arena.col("x");
        let const_sum = arena.add(one, two);
        let col_sum = arena.add(x, one);
        let negated = arena.neg(const_sum);

        assert!(arena.is_constant(const_sum));
        assert!(arena.is_constant(negated));
        assert!(!arena.is_constant(col_sum));
        assert!(!arena.is_constant(NodeId(99)));
    }

    #[test]
    fn test_display() {
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let y = arena.col(1);
        let two = arena.lit(2);
        let sum = arena.add(x, y);
        let gt = arena.gt(sum, two);
        let na = arena.isna(x);
        let sd = arena.sd(x);

        assert_eq!(arena.display(gt), "((x + [1]) > 2)");
        assert_eq!(arena.display(na), "isna(x)");
        assert_eq!(arena.display(sd), "sd(x)");
    }
}
