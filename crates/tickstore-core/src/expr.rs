//! Expression trees for filter and projection clauses.
//!
//! Trees are a node table with child *indices* rather than pointer-linked
//! objects: builders append nodes bottom-up, so children always precede
//! parents and cycles cannot be expressed. The table serializes with the
//! rest of a query plan.
//!
//! Evaluation over one processing unit yields a [`EvalValue`]: a bitset
//! (comparisons, logic, `isin`, null checks), a column (arithmetic), or a
//! scalar (constant folding). Null semantics follow the engine-wide rule:
//! a comparison involving null is false, arithmetic involving null is
//! null.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::frame::{Column, DType, Scalar};

/// Errors raised while building or evaluating expressions.
#[derive(Debug, Snafu)]
pub enum ExprError {
    /// A node references a column the slice does not carry.
    #[snafu(display("unknown column {name} in expression"))]
    UnknownColumn {
        /// The missing column.
        name: String,
    },

    /// Operand kinds do not fit the operator.
    #[snafu(display("operator {op} cannot combine {detail}"))]
    IncompatibleOperands {
        /// The operator.
        op: String,
        /// What was combined.
        detail: String,
    },

    /// A child index points at or past its parent.
    #[snafu(display("malformed expression: node {node} references child {child}"))]
    MalformedTree {
        /// Parent node index.
        node: u32,
        /// Offending child index.
        child: u32,
    },

    /// The tree is empty or the root is out of range.
    #[snafu(display("malformed expression: bad root {root}"))]
    BadRoot {
        /// Offending root index.
        root: u32,
    },
}

/// Binary operators.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BinaryOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// Logical AND of two bitsets.
    And,
    /// Logical OR of two bitsets.
    Or,
}

impl BinaryOp {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    fn is_logic(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnaryOp {
    /// Bitset complement.
    Not,
    /// Numeric negation.
    Neg,
    /// Rows where the operand is null.
    IsNull,
    /// Rows where the operand is present.
    NotNull,
}

/// One node in the table; children are indices of earlier nodes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ExprNode {
    /// Column leaf.
    Column(String),
    /// Constant leaf.
    Value(Scalar),
    /// Binary application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left child index.
        lhs: u32,
        /// Right child index.
        rhs: u32,
    },
    /// Unary application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Child index.
        child: u32,
    },
    /// Membership test against a literal set.
    IsIn {
        /// Child index.
        child: u32,
        /// Member values.
        values: Vec<Scalar>,
        /// Invert to `isnotin`.
        negated: bool,
    },
}

/// A validated expression: node table plus root index.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExprTree {
    nodes: Vec<ExprNode>,
    root: u32,
}

impl ExprTree {
    /// Validate and seal a node table.
    pub fn new(nodes: Vec<ExprNode>, root: u32) -> Result<ExprTree, ExprError> {
        ensure!(
            (root as usize) < nodes.len(),
            BadRootSnafu { root }
        );
        for (i, node) in nodes.iter().enumerate() {
            let children: Vec<u32> = match node {
                ExprNode::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
                ExprNode::Unary { child, .. } | ExprNode::IsIn { child, .. } => vec![*child],
                _ => Vec::new(),
            };
            for child in children {
                ensure!(
                    (child as usize) < i,
                    MalformedTreeSnafu {
                        node: i as u32,
                        child,
                    }
                );
            }
        }
        Ok(ExprTree { nodes, root })
    }

    /// Start a bottom-up builder.
    pub fn builder() -> ExprBuilder {
        ExprBuilder::default()
    }

    /// Column names this expression reads.
    pub fn input_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if let ExprNode::Column(name) = node {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
        out
    }

    /// The root node.
    pub fn root_node(&self) -> &ExprNode {
        &self.nodes[self.root as usize]
    }

    /// The node table, children before parents.
    pub fn nodes(&self) -> &[ExprNode] {
        &self.nodes
    }

    /// True when the root can only yield a bitset (filter-shaped).
    pub fn yields_bitset(&self) -> bool {
        match self.root_node() {
            ExprNode::Binary { op, .. } => op.is_comparison() || op.is_logic(),
            ExprNode::Unary { op, .. } => {
                matches!(op, UnaryOp::Not | UnaryOp::IsNull | UnaryOp::NotNull)
            }
            ExprNode::IsIn { .. } => true,
            _ => false,
        }
    }

    /// Evaluate over `rows` rows, resolving column leaves via `resolve`.
    ///
    /// `compact_bitsets` trades evaluation time for memory by run-length
    /// compressing every intermediate bitset.
    pub fn evaluate<F>(
        &self,
        rows: usize,
        compact_bitsets: bool,
        resolve: F,
    ) -> Result<EvalValue, ExprError>
    where
        F: Fn(&str) -> Option<Column>,
    {
        let mut values: Vec<EvalValue> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match node {
                ExprNode::Column(name) => {
                    let col = resolve(name).context(UnknownColumnSnafu {
                        name: name.clone(),
                    })?;
                    EvalValue::Column(col)
                }
                ExprNode::Value(s) => EvalValue::Scalar(s.clone()),
                ExprNode::Binary { op, lhs, rhs } => {
                    let l = values[*lhs as usize].clone();
                    let r = values[*rhs as usize].clone();
                    eval_binary(*op, l, r, rows)?
                }
                ExprNode::Unary { op, child } => {
                    let c = values[*child as usize].clone();
                    eval_unary(*op, c, rows)?
                }
                ExprNode::IsIn {
                    child,
                    values: set,
                    negated,
                } => {
                    let c = values[*child as usize].clone();
                    eval_isin(c, set, *negated, rows)?
                }
            };
            let value = if compact_bitsets {
                value.compacted()
            } else {
                value
            };
            values.push(value);
        }
        Ok(values.swap_remove(self.root as usize))
    }
}

/// Incremental bottom-up construction of an [`ExprTree`].
#[derive(Debug, Default)]
pub struct ExprBuilder {
    nodes: Vec<ExprNode>,
}

impl ExprBuilder {
    fn push(&mut self, node: ExprNode) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    /// Column leaf.
    pub fn column(&mut self, name: impl Into<String>) -> u32 {
        self.push(ExprNode::Column(name.into()))
    }

    /// Constant leaf.
    pub fn value(&mut self, value: Scalar) -> u32 {
        self.push(ExprNode::Value(value))
    }

    /// Binary application.
    pub fn binary(&mut self, op: BinaryOp, lhs: u32, rhs: u32) -> u32 {
        self.push(ExprNode::Binary { op, lhs, rhs })
    }

    /// Unary application.
    pub fn unary(&mut self, op: UnaryOp, child: u32) -> u32 {
        self.push(ExprNode::Unary { op, child })
    }

    /// Membership test.
    pub fn isin(&mut self, child: u32, values: Vec<Scalar>, negated: bool) -> u32 {
        self.push(ExprNode::IsIn {
            child,
            values,
            negated,
        })
    }

    /// Seal the tree with `root`.
    pub fn build(self, root: u32) -> Result<ExprTree, ExprError> {
        ExprTree::new(self.nodes, root)
    }
}

/// Result of evaluating a (sub)expression.
#[derive(Clone, Debug)]
pub enum EvalValue {
    /// Kept-row positions within the slice.
    Bitset(RoaringBitmap),
    /// Per-row values.
    Column(Column),
    /// A constant.
    Scalar(Scalar),
}

impl EvalValue {
    fn kind(&self) -> &'static str {
        match self {
            EvalValue::Bitset(_) => "bitset",
            EvalValue::Column(_) => "column",
            EvalValue::Scalar(_) => "scalar",
        }
    }

    fn compacted(self) -> EvalValue {
        self
    }

    /// The bitset, if this value is one.
    pub fn into_bitset(self) -> Option<RoaringBitmap> {
        match self {
            EvalValue::Bitset(b) => Some(b),
            _ => None,
        }
    }

    /// Materialize as a column of `rows` values (scalars broadcast).
    pub fn into_column(self, rows: usize) -> Option<Column> {
        match self {
            EvalValue::Column(c) => Some(c),
            EvalValue::Scalar(s) => Some(broadcast(&s, rows)),
            EvalValue::Bitset(_) => None,
        }
    }
}

fn broadcast(s: &Scalar, rows: usize) -> Column {
    match s {
        Scalar::F64(v) => Column::from_f64(vec![*v; rows]),
        Scalar::U64(v) => Column::from_u64(DType::UInt64, vec![*v; rows]),
        Scalar::Bool(v) => Column::from_bool(vec![*v; rows]),
        Scalar::Utf8(v) => Column::from_utf8(vec![v.clone(); rows]),
        Scalar::I64(v) => Column::from_i64(DType::Int64, vec![*v; rows]),
        Scalar::Null => Column::nulls(DType::Float64, rows),
    }
}

fn compare_satisfied(op: BinaryOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinaryOp::Eq => ord == Equal,
        BinaryOp::Ne => ord != Equal,
        BinaryOp::Lt => ord == Less,
        BinaryOp::Le => ord != Greater,
        BinaryOp::Gt => ord == Greater,
        BinaryOp::Ge => ord != Less,
        _ => false,
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: EvalValue,
    rhs: EvalValue,
    rows: usize,
) -> Result<EvalValue, ExprError> {
    if op.is_logic() {
        let (EvalValue::Bitset(l), EvalValue::Bitset(r)) = (&lhs, &rhs) else {
            return IncompatibleOperandsSnafu {
                op: format!("{op:?}"),
                detail: format!("{} and {}", lhs.kind(), rhs.kind()),
            }
            .fail();
        };
        let out = match op {
            BinaryOp::And => l & r,
            _ => l | r,
        };
        return Ok(EvalValue::Bitset(out));
    }

    if op.is_comparison() {
        let at = |v: &EvalValue, i: usize| -> Option<Scalar> {
            match v {
                EvalValue::Column(c) => c.scalar_at(i),
                EvalValue::Scalar(s) => Some(s.clone()),
                EvalValue::Bitset(_) => None,
            }
        };
        if matches!(lhs, EvalValue::Bitset(_)) || matches!(rhs, EvalValue::Bitset(_)) {
            return IncompatibleOperandsSnafu {
                op: format!("{op:?}"),
                detail: "bitset operand in comparison".to_string(),
            }
            .fail();
        }
        let mut out = RoaringBitmap::new();
        for i in 0..rows {
            let (Some(a), Some(b)) = (at(&lhs, i), at(&rhs, i)) else {
                continue;
            };
            if let Some(ord) = a.partial_cmp_value(&b) {
                if compare_satisfied(op, ord) {
                    out.insert(i as u32);
                }
            }
        }
        return Ok(EvalValue::Bitset(out));
    }

    // Arithmetic.
    arith(op, lhs, rhs, rows)
}

fn arith(
    op: BinaryOp,
    lhs: EvalValue,
    rhs: EvalValue,
    rows: usize,
) -> Result<EvalValue, ExprError> {
    // Constant folding keeps scalar/scalar arithmetic a scalar.
    if let (EvalValue::Scalar(a), EvalValue::Scalar(b)) = (&lhs, &rhs) {
        return Ok(EvalValue::Scalar(scalar_arith(op, a, b)));
    }
    let (Some(l), Some(r)) = (lhs.into_column(rows), rhs.into_column(rows)) else {
        return IncompatibleOperandsSnafu {
            op: format!("{op:?}"),
            detail: "bitset operand in arithmetic".to_string(),
        }
        .fail();
    };

    let integer_result = l.dtype().is_integer()
        && r.dtype().is_integer()
        && op != BinaryOp::Div;

    let mut present = RoaringBitmap::new();
    if integer_result {
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            match (
                l.scalar_at(i).and_then(|s| s.as_i64()),
                r.scalar_at(i).and_then(|s| s.as_i64()),
            ) {
                (Some(a), Some(b)) => {
                    let v = match op {
                        BinaryOp::Add => a.wrapping_add(b),
                        BinaryOp::Sub => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    };
                    present.insert(i as u32);
                    out.push(v);
                }
                _ => out.push(0),
            }
        }
        Ok(EvalValue::Column(
            Column::from_i64(DType::Int64, out).with_present(present),
        ))
    } else {
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            match (
                l.scalar_at(i).and_then(|s| s.as_f64()),
                r.scalar_at(i).and_then(|s| s.as_f64()),
            ) {
                (Some(a), Some(b)) => {
                    let v = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        _ => a / b,
                    };
                    present.insert(i as u32);
                    out.push(v);
                }
                _ => out.push(f64::NAN),
            }
        }
        Ok(EvalValue::Column(
            Column::from_f64(out).with_present(present),
        ))
    }
}

fn scalar_arith(op: BinaryOp, a: &Scalar, b: &Scalar) -> Scalar {
    match (a.as_i64(), b.as_i64(), op) {
        (Some(x), Some(y), BinaryOp::Add) => return Scalar::I64(x.wrapping_add(y)),
        (Some(x), Some(y), BinaryOp::Sub) => return Scalar::I64(x.wrapping_sub(y)),
        (Some(x), Some(y), BinaryOp::Mul) => return Scalar::I64(x.wrapping_mul(y)),
        _ => {}
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Scalar::F64(match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            _ => x / y,
        }),
        _ => Scalar::Null,
    }
}

fn eval_unary(op: UnaryOp, child: EvalValue, rows: usize) -> Result<EvalValue, ExprError> {
    match op {
        UnaryOp::Not => {
            let EvalValue::Bitset(b) = child else {
                return IncompatibleOperandsSnafu {
                    op: "Not".to_string(),
                    detail: child.kind().to_string(),
                }
                .fail();
            };
            let mut all = RoaringBitmap::new();
            if rows > 0 {
                all.insert_range(0..rows as u32);
            }
            Ok(EvalValue::Bitset(all - b))
        }
        UnaryOp::Neg => {
            let col = child.into_column(rows).context(IncompatibleOperandsSnafu {
                op: "Neg".to_string(),
                detail: "bitset".to_string(),
            })?;
            let zero = EvalValue::Scalar(Scalar::I64(0));
            arith(BinaryOp::Sub, zero, EvalValue::Column(col), rows)
        }
        UnaryOp::IsNull | UnaryOp::NotNull => {
            let col = match child {
                EvalValue::Column(c) => c,
                EvalValue::Scalar(s) => broadcast(&s, rows),
                EvalValue::Bitset(_) => {
                    return IncompatibleOperandsSnafu {
                        op: format!("{op:?}"),
                        detail: "bitset".to_string(),
                    }
                    .fail();
                }
            };
            let mut out = RoaringBitmap::new();
            for i in 0..rows {
                let null = col.is_null(i);
                if (op == UnaryOp::IsNull && null) || (op == UnaryOp::NotNull && !null) {
                    out.insert(i as u32);
                }
            }
            Ok(EvalValue::Bitset(out))
        }
    }
}

fn eval_isin(
    child: EvalValue,
    set: &[Scalar],
    negated: bool,
    rows: usize,
) -> Result<EvalValue, ExprError> {
    let col = child.into_column(rows).context(IncompatibleOperandsSnafu {
        op: "IsIn".to_string(),
        detail: "bitset".to_string(),
    })?;
    let mut out = RoaringBitmap::new();
    for i in 0..rows {
        let Some(v) = col.scalar_at(i) else { continue };
        if matches!(v, Scalar::Null) {
            // Nulls are members of nothing, including the complement.
            continue;
        }
        let member = set
            .iter()
            .any(|m| matches!(v.partial_cmp_value(m), Some(std::cmp::Ordering::Equal)));
        if member != negated {
            out.insert(i as u32);
        }
    }
    Ok(EvalValue::Bitset(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_xy(name: &str) -> Option<Column> {
        match name {
            "x" => Some(Column::from_i64(DType::Int64, vec![1, 5, 9, 13])),
            "y" => Some(Column::from_f64(vec![0.5, 1.5, 2.5, 3.5])),
            "tag" => Some(Column::from_utf8(vec![
                "a".to_string(),
                "b".to_string(),
                "a".to_string(),
                "c".to_string(),
            ])),
            _ => None,
        }
    }

    #[test]
    fn comparison_yields_bitset() {
        let mut b = ExprTree::builder();
        let x = b.column("x");
        let five = b.value(Scalar::I64(5));
        let root = b.binary(BinaryOp::Gt, x, five);
        let tree = b.build(root).expect("tree");
        assert!(tree.yields_bitset());
        assert_eq!(tree.input_columns(), vec!["x".to_string()]);

        let out = tree.evaluate(4, false, resolve_xy).expect("eval");
        let bits = out.into_bitset().expect("bitset");
        assert_eq!(bits.iter().collect::<Vec<u32>>(), vec![2, 3]);
    }

    #[test]
    fn logic_and_not_compose() {
        let mut b = ExprTree::builder();
        let x = b.column("x");
        let lo = b.value(Scalar::I64(3));
        let hi = b.value(Scalar::I64(10));
        let gt = b.binary(BinaryOp::Gt, x, lo);
        let lt = b.binary(BinaryOp::Lt, x, hi);
        let both = b.binary(BinaryOp::And, gt, lt);
        let root = b.unary(UnaryOp::Not, both);
        let tree = b.build(root).expect("tree");

        let bits = tree
            .evaluate(4, true, resolve_xy)
            .expect("eval")
            .into_bitset()
            .expect("bitset");
        assert_eq!(bits.iter().collect::<Vec<u32>>(), vec![0, 3]);
    }

    #[test]
    fn arithmetic_promotes_to_float() {
        let mut b = ExprTree::builder();
        let x = b.column("x");
        let y = b.column("y");
        let root = b.binary(BinaryOp::Add, x, y);
        let tree = b.build(root).expect("tree");
        assert!(!tree.yields_bitset());

        let col = tree
            .evaluate(4, false, resolve_xy)
            .expect("eval")
            .into_column(4)
            .expect("column");
        assert_eq!(col.dtype(), DType::Float64);
        assert_eq!(col.f64_values(), Some(&[1.5, 6.5, 11.5, 16.5][..]));
    }

    #[test]
    fn isin_matches_strings() {
        let mut b = ExprTree::builder();
        let tag = b.column("tag");
        let root = b.isin(
            tag,
            vec![Scalar::Utf8("a".to_string()), Scalar::Utf8("c".to_string())],
            false,
        );
        let tree = b.build(root).expect("tree");

        let bits = tree
            .evaluate(4, false, resolve_xy)
            .expect("eval")
            .into_bitset()
            .expect("bitset");
        assert_eq!(bits.iter().collect::<Vec<u32>>(), vec![0, 2, 3]);
    }

    #[test]
    fn null_checks_track_presence() {
        let resolve = |name: &str| -> Option<Column> {
            (name == "n").then(|| {
                let present: RoaringBitmap = [0u32, 2].into_iter().collect();
                Column::from_i64(DType::Int64, vec![1, 0, 3]).with_present(present)
            })
        };
        let mut b = ExprTree::builder();
        let n = b.column("n");
        let root = b.unary(UnaryOp::IsNull, n);
        let tree = b.build(root).expect("tree");

        let bits = tree
            .evaluate(3, false, resolve)
            .expect("eval")
            .into_bitset()
            .expect("bitset");
        assert_eq!(bits.iter().collect::<Vec<u32>>(), vec![1]);
    }

    #[test]
    fn unknown_column_is_user_error() {
        let mut b = ExprTree::builder();
        let c = b.column("ghost");
        let v = b.value(Scalar::I64(0));
        let root = b.binary(BinaryOp::Eq, c, v);
        let tree = b.build(root).expect("tree");
        let err = tree.evaluate(4, false, resolve_xy).expect_err("missing");
        assert!(matches!(err, ExprError::UnknownColumn { .. }));
    }

    #[test]
    fn forward_references_rejected() {
        let nodes = vec![ExprNode::Binary {
            op: BinaryOp::Add,
            lhs: 0,
            rhs: 0,
        }];
        let err = ExprTree::new(nodes, 0).expect_err("self reference");
        assert!(matches!(err, ExprError::MalformedTree { .. }));
    }
}
