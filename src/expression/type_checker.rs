//! Binding: resolving selectors, output types and shapes against a table.
//!
//! Types flow bottom-up from the leaves. Each reachable node is resolved
//! exactly once per binding, and the first failure aborts the whole bind.

use crate::access::{DataType, TableSource};
use crate::expression::{
    ColumnSelector, ExprArena, ExprNode, ExpressionError, ExpressionResult, NodeId,
};
use log::{debug, trace};

/// Cardinality of a node's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One value, broadcast against any length
    Scalar,
    /// A column of the given length
    Rows(usize),
}

impl Shape {
    /// Shape of an elementwise combination, `None` when lengths differ
    pub fn broadcast(self, other: Shape) -> Option<Shape> {
        match (self, other) {
            (Shape::Scalar, s) | (s, Shape::Scalar) => Some(s),
            (Shape::Rows(a), Shape::Rows(b)) if a == b => Some(Shape::Rows(a)),
            _ => None,
        }
    }
}

/// Resolution result for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundNode {
    /// Output type of the node
    pub data_type: DataType,
    /// Type the operands are converted to before the kernel runs
    pub operand_type: Option<DataType>,
    pub shape: Shape,
    /// Physical column position, for selectors
    pub column_index: Option<usize>,
}

/// Per-node resolution table, indexed by `NodeId`
#[derive(Debug, Clone, Default)]
pub struct Binding {
    nodes: Vec<Option<BoundNode>>,
}

impl Binding {
    pub fn new(node_count: usize) -> Self {
        Self {
            nodes: vec![None; node_count],
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&BoundNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn is_bound(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn bound_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }
}

/// Type checker for expressions over one table
pub struct TypeChecker<'a> {
    arena: &'a ExprArena,
    table: &'a dyn TableSource,
}

impl<'a> TypeChecker<'a> {
    pub fn new(arena: &'a ExprArena, table: &'a dyn TableSource) -> Self {
        Self { arena, table }
    }

    /// Resolve `root` and everything below it into `binding`
    pub fn bind(&self, root: NodeId, binding: &mut Binding) -> ExpressionResult<BoundNode> {
        if binding.nodes.len() < self.arena.len() {
            binding.nodes.resize(self.arena.len(), None);
        }
        let bound = self.resolve(root, binding)?;
        debug!(
            "bound {} -> {} ({} nodes resolved)",
            self.arena.display(root),
            bound.data_type,
            binding.bound_count()
        );
        Ok(bound)
    }

    /// Resolve a row filter; it must produce booleans
    pub fn bind_filter(&self, filter: NodeId, binding: &mut Binding) -> ExpressionResult<BoundNode> {
        let bound = self.bind(filter, binding)?;
        if bound.data_type != DataType::Boolean {
            return Err(ExpressionError::TypeMismatch {
                expected: DataType::Boolean,
                actual: bound.data_type,
                context: "row filter".to_string(),
            });
        }
        let nrows = self.table.row_count();
        match bound.shape {
            Shape::Rows(len) if len != nrows => {
                return Err(ExpressionError::ShapeMismatch {
                    operator: "row filter".to_string(),
                    left_len: len,
                    right_len: nrows,
                })
            }
            _ => {}
        }
        Ok(bound)
    }

    fn resolve(&self, id: NodeId, binding: &mut Binding) -> ExpressionResult<BoundNode> {
        if let Some(bound) = binding.get(id) {
            return Ok(*bound);
        }
        let node = self.arena.get(id).ok_or(ExpressionError::UnknownNode(id))?;
        for child in node.children() {
            // Children always precede their parent in the arena
            if child >= id {
                return Err(ExpressionError::UnknownNode(child));
            }
        }

        let bound = match node {
            ExprNode::Literal(lit) => BoundNode {
                data_type: lit.data_type,
                operand_type: None,
                shape: Shape::Scalar,
                column_index: None,
            },

            ExprNode::Column(selector) => self.resolve_column(selector)?,

            ExprNode::Unary { op, operand } => {
                let input = self.resolve(*operand, binding)?;
                let data_type = op.output_type(input.data_type).ok_or_else(|| {
                    ExpressionError::InvalidOperandTypes {
                        operator: op.as_str().to_string(),
                        left_type: input.data_type,
                        right_type: None,
                    }
                })?;
                BoundNode {
                    data_type,
                    operand_type: Some(input.data_type),
                    shape: input.shape,
                    column_index: None,
                }
            }

            ExprNode::Binary { op, left, right } => {
                let (l, r) = (self.resolve(*left, binding)?, self.resolve(*right, binding)?);
                let invalid = || ExpressionError::InvalidOperandTypes {
                    operator: op.as_str().to_string(),
                    left_type: l.data_type,
                    right_type: Some(r.data_type),
                };
                let operand_type = op.operand_type(l.data_type, r.data_type).ok_or_else(invalid)?;
                let data_type = op.output_type(l.data_type, r.data_type).ok_or_else(invalid)?;
                BoundNode {
                    data_type,
                    operand_type: Some(operand_type),
                    shape: broadcast(op.as_str(), l.shape, r.shape)?,
                    column_index: None,
                }
            }

            ExprNode::Relational { op, left, right } => {
                let (l, r) = (self.resolve(*left, binding)?, self.resolve(*right, binding)?);
                let operand_type = op.operand_type(l.data_type, r.data_type).ok_or_else(|| {
                    ExpressionError::InvalidOperandTypes {
                        operator: op.as_str().to_string(),
                        left_type: l.data_type,
                        right_type: Some(r.data_type),
                    }
                })?;
                BoundNode {
                    data_type: DataType::Boolean,
                    operand_type: Some(operand_type),
                    shape: broadcast(op.as_str(), l.shape, r.shape)?,
                    column_index: None,
                }
            }

            ExprNode::Reduce { function, operand } => {
                let input = self.resolve(*operand, binding)?;
                let data_type = function.output_type(input.data_type).ok_or_else(|| {
                    ExpressionError::InvalidOperandTypes {
                        operator: function.name().to_string(),
                        left_type: input.data_type,
                        right_type: None,
                    }
                })?;
                BoundNode {
                    data_type,
                    operand_type: Some(input.data_type),
                    shape: Shape::Scalar,
                    column_index: None,
                }
            }
        };

        trace!("resolved {} as {} {:?}", id, bound.data_type, bound.shape);
        binding.nodes[id.index()] = Some(bound);
        Ok(bound)
    }

    fn resolve_column(&self, selector: &ColumnSelector) -> ExpressionResult<BoundNode> {
        let column_count = self.table.column_count();
        let index = match selector {
            ColumnSelector::Name(name) => self
                .table
                .resolve_name(name)
                .ok_or_else(|| ExpressionError::ColumnNotFound { name: name.clone() })?,
            ColumnSelector::Index(index) => {
                let ncols = column_count as i64;
                if *index < -ncols || *index >= ncols {
                    return Err(ExpressionError::ColumnIndexOutOfBounds {
                        index: *index,
                        column_count,
                    });
                }
                if *index < 0 {
                    (*index + ncols) as usize
                } else {
                    *index as usize
                }
            }
        };
        let column = self
            .table
            .column(index)
            .ok_or_else(|| ExpressionError::ColumnNotFound {
                name: selector.to_string(),
            })?;
        Ok(BoundNode {
            data_type: column.data_type(),
            operand_type: None,
            shape: Shape::Rows(column.len()),
            column_index: Some(index),
        })
    }
}

fn broadcast(operator: &str, left: Shape, right: Shape) -> ExpressionResult<Shape> {
    left.broadcast(right).ok_or_else(|| {
        let len = |s: Shape| match s {
            Shape::Rows(n) => n,
            Shape::Scalar => 1,
        };
        ExpressionError::ShapeMismatch {
            operator: operator.to_string(),
            left_len: len(left),
            right_len: len(right),
        }
    })
}

/// Helper function to resolve the output type of an expression
pub fn type_check_expression(
    arena: &ExprArena,
    root: NodeId,
    table: &dyn TableSource,
) -> ExpressionResult<DataType> {
    let mut binding = Binding::new(arena.len());
    TypeChecker::new(arena, table)
        .bind(root, &mut binding)
        .map(|b| b.data_type)
}
