//! Table-bound evaluation with memoization and row filtering.
//!
//! An [`EvaluationContext`] binds one expression tree (one or more roots
//! plus an optional boolean row filter) to one table. Binding resolves
//! every reachable node up front and fails on the first error. Evaluation
//! then walks the tree recursively, computing each node at most once: the
//! result is cached by `NodeId` for the lifetime of the context. Threads
//! sharing a context wait on a node another thread is computing.
//!
//! With a row filter, the filter is evaluated first over the full table and
//! turned into a selection. Column selectors under the roots then yield
//! views restricted to the selected rows, so reducers only ever see
//! selected rows. A reduced scalar stands for one value per selected row.

use crate::access::{DataType, RowIndex, TableSource};
use crate::config::EvalConfig;
use crate::expression::type_checker::{Binding, TypeChecker};
use crate::expression::{kernel, reducer};
use crate::expression::{Datum, ExprArena, ExprNode, ExpressionError, ExpressionResult, NodeId};
use dashmap::DashMap;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// Lifecycle of a node within one context. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Unbound,
    /// Type and shape resolved, selectors linked to columns
    Bound,
    /// Result cached
    Evaluated,
}

/// Which rows a cached result covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    /// Every row of the table; used for the filter itself
    Unfiltered,
    /// Only rows selected by the filter
    Filtered,
}

/// Evaluation counters for one context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Nodes computed (cache misses)
    pub evaluations: usize,
    /// Requests answered from the memo table
    pub cache_hits: usize,
}

#[derive(Debug, Clone, Copy)]
struct NodeRecord {
    state: NodeState,
    evaluations: usize,
}

/// Memo entry; the first caller computes, concurrent callers wait for it
type Slot<T> = Arc<OnceLock<ExpressionResult<T>>>;

/// Expression tree bound to a single table snapshot
pub struct EvaluationContext<'a> {
    arena: &'a ExprArena,
    table: &'a dyn TableSource,
    roots: Vec<NodeId>,
    filter: Option<NodeId>,
    binding: Binding,
    config: EvalConfig,
    pool: Option<rayon::ThreadPool>,
    memo: DashMap<(Scope, NodeId), Slot<Datum>>,
    selection: OnceLock<ExpressionResult<RowIndex>>,
    nodes: Mutex<Vec<NodeRecord>>,
    stats: Mutex<EvalStats>,
}

impl<'a> EvaluationContext<'a> {
    /// Bind `roots` and `filter` to `table` with the default configuration
    pub fn bind(
        arena: &'a ExprArena,
        table: &'a dyn TableSource,
        roots: &[NodeId],
        filter: Option<NodeId>,
    ) -> ExpressionResult<Self> {
        Self::bind_with_config(arena, table, roots, filter, EvalConfig::default())
    }

    pub fn bind_with_config(
        arena: &'a ExprArena,
        table: &'a dyn TableSource,
        roots: &[NodeId],
        filter: Option<NodeId>,
        config: EvalConfig,
    ) -> ExpressionResult<Self> {
        let config = config.normalized();
        let checker = TypeChecker::new(arena, table);
        let mut binding = Binding::new(arena.len());

        if let Some(filter) = filter {
            checker.bind_filter(filter, &mut binding)?;
        }
        for &root in roots {
            checker.bind(root, &mut binding)?;
        }

        let nodes = (0..arena.len())
            .map(|i| NodeRecord {
                state: if binding.is_bound(NodeId(i as u32)) {
                    NodeState::Bound
                } else {
                    NodeState::Unbound
                },
                evaluations: 0,
            })
            .collect();

        let pool = config.num_threads.and_then(|n| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| warn!("Failed to build {}-thread pool, using global pool: {}", n, e))
                .ok()
        });

        debug!(
            "bound {} root(s) to table with {} rows, {} columns (filter: {})",
            roots.len(),
            table.row_count(),
            table.column_count(),
            filter.map_or("none".to_string(), |f| arena.display(f))
        );

        Ok(Self {
            arena,
            table,
            roots: roots.to_vec(),
            filter,
            binding,
            config,
            pool,
            memo: DashMap::new(),
            selection: OnceLock::new(),
            nodes: Mutex::new(nodes),
            stats: Mutex::new(EvalStats::default()),
        })
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn filter(&self) -> Option<NodeId> {
        self.filter
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Row count of the bound table, before filtering
    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    /// Resolved output type of a bound node
    pub fn output_type(&self, id: NodeId) -> ExpressionResult<DataType> {
        self.binding
            .get(id)
            .map(|b| b.data_type)
            .ok_or(ExpressionError::UnboundReference(id))
    }

    pub fn node_state(&self, id: NodeId) -> NodeState {
        self.nodes
            .lock()
            .get(id.index())
            .map_or(NodeState::Unbound, |r| r.state)
    }

    /// Number of times `id` was computed in this context
    pub fn evaluation_count(&self, id: NodeId) -> usize {
        self.nodes.lock().get(id.index()).map_or(0, |r| r.evaluations)
    }

    pub fn stats(&self) -> EvalStats {
        *self.stats.lock()
    }

    /// Evaluate every root, in order
    pub fn evaluate(&self) -> ExpressionResult<Vec<Datum>> {
        self.install(|| {
            debug!("evaluating {} root(s)", self.roots.len());
            self.roots
                .iter()
                .map(|&root| self.evaluate_in(self.root_scope(), root))
                .collect()
        })
    }

    /// Evaluate a single bound node over the filtered rows
    pub fn evaluate_node(&self, id: NodeId) -> ExpressionResult<Datum> {
        self.install(|| self.evaluate_in(self.root_scope(), id))
    }

    /// Rows selected by the filter, `None` without a filter
    pub fn selection(&self) -> ExpressionResult<Option<RowIndex>> {
        let Some(filter) = self.filter else {
            return Ok(None);
        };
        self.selection
            .get_or_init(|| {
                let mask = self.install(|| self.evaluate_in(Scope::Unfiltered, filter))?;
                let rows = kernel::selection(&mask, self.table.row_count())?;
                debug!(
                    "row filter {} selected {} of {} rows",
                    self.arena.display(filter),
                    rows.len(),
                    self.table.row_count()
                );
                Ok(rows)
            })
            .clone()
            .map(Some)
    }

    /// Rows a scalar operand stands for when it is reduced in `scope`
    fn scope_rows(&self, scope: Scope) -> ExpressionResult<usize> {
        match scope {
            Scope::Unfiltered => Ok(self.table.row_count()),
            Scope::Filtered => Ok(self
                .selection()?
                .map_or(self.table.row_count(), |rows| rows.len())),
        }
    }

    fn root_scope(&self) -> Scope {
        match self.filter {
            Some(_) => Scope::Filtered,
            None => Scope::Unfiltered,
        }
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn evaluate_in(&self, scope: Scope, id: NodeId) -> ExpressionResult<Datum> {
        // The shard guard is released before the slot is initialized, so
        // children (always lower ids) can take their own slots.
        let slot = Arc::clone(self.memo.entry((scope, id)).or_default().value());

        let mut computed = false;
        let result = slot.get_or_init(|| {
            computed = true;
            let result = self.compute(scope, id);
            if result.is_ok() {
                if let Some(record) = self.nodes.lock().get_mut(id.index()) {
                    record.state = NodeState::Evaluated;
                    record.evaluations += 1;
                }
                self.stats.lock().evaluations += 1;
            }
            result
        });
        if !computed {
            trace!("cache hit for {} ({:?})", id, scope);
            self.stats.lock().cache_hits += 1;
        }
        result.clone()
    }

    fn compute(&self, scope: Scope, id: NodeId) -> ExpressionResult<Datum> {
        let bound = *self
            .binding
            .get(id)
            .ok_or(ExpressionError::UnboundReference(id))?;
        let node = self.arena.get(id).ok_or(ExpressionError::UnknownNode(id))?;
        let operand_type = bound.operand_type.unwrap_or(bound.data_type);

        let result = match node {
            ExprNode::Literal(lit) => Datum::Scalar(lit.value.clone()),

            ExprNode::Column(selector) => {
                let index = bound
                    .column_index
                    .ok_or(ExpressionError::UnboundReference(id))?;
                let column = self
                    .table
                    .column(index)
                    .ok_or_else(|| ExpressionError::ColumnNotFound {
                        name: selector.to_string(),
                    })?;
                match scope {
                    Scope::Unfiltered => Datum::Column(column),
                    Scope::Filtered => match self.selection()? {
                        Some(rows) => Datum::Column(column.with_rows(&rows)?),
                        None => Datum::Column(column),
                    },
                }
            }

            ExprNode::Unary { op, operand } => {
                let input = self.evaluate_in(scope, *operand)?;
                kernel::unary(*op, operand_type, &input, &self.config)?
            }

            ExprNode::Binary { op, left, right } => {
                let l = self.evaluate_in(scope, *left)?;
                let r = self.evaluate_in(scope, *right)?;
                kernel::binary(*op, operand_type, &l, &r, &self.config)?
            }

            ExprNode::Relational { op, left, right } => {
                let l = self.evaluate_in(scope, *left)?;
                let r = self.evaluate_in(scope, *right)?;
                kernel::relational(*op, operand_type, &l, &r, &self.config)?
            }

            ExprNode::Reduce { function, operand } => {
                let input = self.evaluate_in(scope, *operand)?;
                let rows = self.scope_rows(scope)?;
                Datum::Scalar(reducer::reduce(
                    *function,
                    operand_type,
                    &input,
                    rows,
                    &self.config,
                )?)
            }
        };

        trace!(
            "evaluated {} = {} ({:?}, {} rows)",
            id,
            self.arena.display(id),
            scope,
            result.len().map_or("scalar".to_string(), |n| n.to_string())
        );
        Ok(result)
    }
}

/// Bind `root` to `table` and evaluate it, optionally over the rows
/// selected by the boolean expression `filter`.
pub fn evaluate(
    arena: &ExprArena,
    root: NodeId,
    table: &dyn TableSource,
    filter: Option<NodeId>,
) -> ExpressionResult<Datum> {
    let context = EvaluationContext::bind(arena, table, &[root], filter)?;
    context.evaluate_node(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Column, Table, Value};

    fn table() -> Table {
        Table::new(vec![
            ("x", Column::from_options(vec![Some(1i32), Some(2), None, Some(4)])),
            ("y", Column::from_options(vec![Some(10i32), None, Some(30), Some(40)])),
        ])
        .unwrap()
    }

    fn float(datum: &Datum) -> f64 {
        match datum.as_scalar() {
            Some(Value::Float64(v)) => *v,
            other => panic!("expected float64 scalar, got {:?}", other),
        }
    }

    fn bools(values: &[Option<bool>]) -> Vec<Value> {
        values.iter().map(|&v| v.into()).collect()
    }

    #[test]
    fn test_elementwise_results() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let y = arena.col("y");
        let sum = arena.add(x, y);
        let isna = arena.isna(x);
        let two = arena.lit(2);
        let gt = arena.gt(x, two);

        let context = EvaluationContext::bind(&arena, &table, &[sum, isna, gt], None).unwrap();
        let results = context.evaluate().unwrap();
        assert_eq!(
            results[0].to_values(),
            vec![Value::Int32(11), Value::Null, Value::Null, Value::Int32(44)]
        );
        assert_eq!(
            results[1].to_values(),
            bools(&[Some(false), Some(false), Some(true), Some(false)])
        );
        assert_eq!(
            results[2].to_values(),
            bools(&[Some(false), Some(false), None, Some(true)])
        );
    }

    #[test]
    fn test_reductions() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let mean = arena.mean(x);
        let sd = arena.sd(x);
        let min = arena.min(x);
        let max = arena.max(x);

        let context = EvaluationContext::bind(&arena, &table, &[mean, sd, min, max], None).unwrap();
        let results = context.evaluate().unwrap();
        assert!((float(&results[0]) - 2.333_333_333).abs() < 1e-6);
        assert!((float(&results[1]) - 1.527_525).abs() < 1e-6);
        assert_eq!(results[2].as_scalar(), Some(&Value::Int32(1)));
        assert_eq!(results[3].as_scalar(), Some(&Value::Int32(4)));
        assert_eq!(context.output_type(mean).unwrap(), DataType::Float64);
    }

    #[test]
    fn test_shared_subexpression_evaluated_once() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let y = arena.col("y");
        let shared = arena.add(x, y);
        let squared = arena.mul(shared, shared);
        let total = arena.sum(squared);

        let context = EvaluationContext::bind(&arena, &table, &[squared, total], None).unwrap();
        let results = context.evaluate().unwrap();
        assert_eq!(
            results[0].to_values(),
            vec![Value::Int32(121), Value::Null, Value::Null, Value::Int32(1936)]
        );
        assert_eq!(results[1].as_scalar(), Some(&Value::Int64(2057)));

        assert_eq!(context.evaluation_count(shared), 1);
        assert_eq!(context.evaluation_count(squared), 1);
        // x, y, shared, squared, total
        assert_eq!(context.stats().evaluations, 5);
        assert_eq!(context.stats().cache_hits, 2);

        context.evaluate().unwrap();
        assert_eq!(context.stats().evaluations, 5);
    }

    #[test]
    fn test_node_lifecycle() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let neg = arena.neg(x);
        let unrelated = arena.col("y");

        let context = EvaluationContext::bind(&arena, &table, &[neg], None).unwrap();
        assert_eq!(context.node_state(neg), NodeState::Bound);
        assert_eq!(context.node_state(unrelated), NodeState::Unbound);

        context.evaluate().unwrap();
        assert_eq!(context.node_state(x), NodeState::Evaluated);
        assert_eq!(context.node_state(neg), NodeState::Evaluated);

        assert_eq!(
            context.evaluate_node(unrelated).unwrap_err(),
            ExpressionError::UnboundReference(unrelated)
        );
        assert_eq!(
            context.output_type(unrelated).unwrap_err(),
            ExpressionError::UnboundReference(unrelated)
        );
    }

    #[test]
    fn test_bind_fails_fast() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let missing = arena.col("z");
        let sum = arena.add(x, missing);

        let err = EvaluationContext::bind(&arena, &table, &[sum], None)
            .err()
            .unwrap();
        assert_eq!(
            err,
            ExpressionError::ColumnNotFound {
                name: "z".to_string()
            }
        );

        let s = arena.lit("a");
        let bad = arena.add(x, s);
        assert!(matches!(
            evaluate(&arena, bad, &table, None),
            Err(ExpressionError::InvalidOperandTypes { .. })
        ));
    }

    #[test]
    fn test_filter_applies_before_reduction() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let one = arena.lit(1);
        let keep = arena.gt(x, one);
        let mean = arena.mean(x);
        let count = arena.count(x);

        let context = EvaluationContext::bind(&arena, &table, &[mean, count, x], Some(keep)).unwrap();
        let results = context.evaluate().unwrap();
        assert!((float(&results[0]) - 3.0).abs() < 1e-12);
        assert_eq!(results[1].as_scalar(), Some(&Value::Int64(2)));
        assert_eq!(results[2].to_values(), vec![Value::Int32(2), Value::Int32(4)]);
        assert_eq!(context.selection().unwrap().unwrap().as_slice(), &[1, 3]);

        // Filtered selector is a view over the stored column
        let stored = table.column(0).unwrap();
        assert!(results[2].as_column().unwrap().shares_buffer(&stored));
    }

    #[test]
    fn test_filter_must_be_boolean() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let mean = arena.mean(x);
        assert!(matches!(
            evaluate(&arena, mean, &table, Some(x)),
            Err(ExpressionError::TypeMismatch {
                expected: DataType::Boolean,
                actual: DataType::Int32,
                ..
            })
        ));

        let no = arena.lit(false);
        let count = arena.count(x);
        assert_eq!(
            evaluate(&arena, count, &table, Some(no)).unwrap().as_scalar(),
            Some(&Value::Int64(0))
        );
        assert_eq!(
            evaluate(&arena, mean, &table, Some(no)).unwrap().as_scalar(),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_reduce_literal_over_selected_rows() {
        let table = table();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let five = arena.lit(5);
        let mean = arena.mean(five);
        let count = arena.count(five);
        let sd = arena.sd(five);
        let sum = arena.sum(five);

        let context = EvaluationContext::bind(&arena, &table, &[mean, count, sd, sum], None).unwrap();
        let results = context.evaluate().unwrap();
        assert!((float(&results[0]) - 5.0).abs() < 1e-12);
        assert_eq!(results[1].as_scalar(), Some(&Value::Int64(4)));
        assert!(float(&results[2]).abs() < 1e-12);
        assert_eq!(results[3].as_scalar(), Some(&Value::Int64(20)));

        let one = arena.lit(1);
        let keep = arena.gt(x, one);
        let results = EvaluationContext::bind(&arena, &table, &[count, sum], Some(keep))
            .unwrap()
            .evaluate()
            .unwrap();
        assert_eq!(results[0].as_scalar(), Some(&Value::Int64(2)));
        assert_eq!(results[1].as_scalar(), Some(&Value::Int64(10)));

        let none = arena.lit(false);
        let results = EvaluationContext::bind(&arena, &table, &[mean, count, sd], Some(none))
            .unwrap()
            .evaluate()
            .unwrap();
        assert_eq!(results[0].as_scalar(), Some(&Value::Null));
        assert_eq!(results[1].as_scalar(), Some(&Value::Int64(0)));
        assert_eq!(results[2].as_scalar(), Some(&Value::Null));
    }

    #[test]
    fn test_shared_context_evaluates_once_across_threads() {
        use std::sync::Barrier;

        let values: Vec<f64> = (0..200_000).map(|i| (i % 1000) as f64 * 0.5).collect();
        let table = Table::new(vec![("x", Column::from_values(values))]).unwrap();
        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let one = arena.lit(1);
        let keep = arena.gt(x, one);
        let squared = arena.mul(x, x);
        let sd = arena.sd(squared);

        let context = EvaluationContext::bind_with_config(
            &arena,
            &table,
            &[sd, squared],
            Some(keep),
            EvalConfig::default()
                .with_chunk_size(4096)
                .with_parallel_threshold(0),
        )
        .unwrap();

        let threads = 4;
        let barrier = Barrier::new(threads);
        let results: Vec<Vec<Datum>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        context.evaluate().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for node in [one, keep, squared, sd] {
            assert_eq!(context.evaluation_count(node), 1, "node {}", node);
        }
        // Once for the filter, once over the selected rows
        assert_eq!(context.evaluation_count(x), 2);
        assert_eq!(context.stats().evaluations, 6);

        let expected = float(&results[0][0]);
        for result in &results {
            assert_eq!(float(&result[0]), expected);
            assert_eq!(result[1].len(), Some(199_400));
        }
    }

    #[test]
    fn test_literal_root_stays_scalar() {
        let table = table();
        let mut arena = ExprArena::new();
        let a = arena.lit(1.5);
        let b = arena.lit(2);
        let prod = arena.mul(a, b);
        let result = evaluate(&arena, prod, &table, None).unwrap();
        assert_eq!(result.as_scalar(), Some(&Value::Float64(3.0)));
    }

    #[test]
    fn test_independent_contexts() {
        let first = table();
        let second = Table::new(vec![
            ("x", Column::from_values(vec![100i32, 200])),
            ("y", Column::from_values(vec![1i32, 2])),
        ])
        .unwrap();

        let mut arena = ExprArena::new();
        let x = arena.col("x");
        let y = arena.col("y");
        let sum = arena.add(x, y);

        let a = EvaluationContext::bind(&arena, &first, &[sum], None).unwrap();
        let b = EvaluationContext::bind(&arena, &second, &[sum], None).unwrap();
        let rb = b.evaluate().unwrap();
        let ra = a.evaluate().unwrap();
        assert_eq!(rb[0].to_values(), vec![Value::Int32(101), Value::Int32(202)]);
        assert_eq!(ra[0].len(), Some(4));
        assert_eq!(a.stats().evaluations, 3);
        assert_eq!(b.stats().evaluations, 3);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let n = 10_000;
        let values: Vec<Option<f64>> = (0..n)
            .map(|i| if i % 11 == 0 { None } else { Some(1e8 + (i % 97) as f64 * 0.5) })
            .collect();
        let table = Table::new(vec![("v", Column::from_options(values))]).unwrap();

        let mut arena = ExprArena::new();
        let v = arena.col("v");
        let k = arena.lit(3);
        let scaled = arena.mul(v, k);
        let sd = arena.sd(scaled);
        let mean = arena.mean(v);

        let parallel = EvalConfig::default()
            .with_chunk_size(256)
            .with_parallel_threshold(0)
            .with_threads(2);
        let a = EvaluationContext::bind_with_config(&arena, &table, &[scaled, sd, mean], None, parallel)
            .unwrap()
            .evaluate()
            .unwrap();
        let b = EvaluationContext::bind_with_config(
            &arena,
            &table,
            &[scaled, sd, mean],
            None,
            EvalConfig::sequential(),
        )
        .unwrap()
        .evaluate()
        .unwrap();

        assert_eq!(a[0].to_values(), b[0].to_values());
        let (sd_a, sd_b) = (float(&a[1]), float(&b[1]));
        assert!((sd_a - sd_b).abs() <= 1e-6 * sd_b);
        let (mean_a, mean_b) = (float(&a[2]), float(&b[2]));
        assert!((mean_a - mean_b).abs() <= 1e-9 * mean_b);
    }
}
