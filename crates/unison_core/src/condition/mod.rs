//! Boolean conditions over property paths.
//!
//! A condition leaf compares the value at a dotted property path with a
//! constant. Leaves combine with `And`, `Or` and `Not`. These are what get
//! pushed down into access points.

pub mod simplify;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unison_error::{Result, UnisonError};

use crate::expr::evaluate::compare_values;
use crate::expr::{self, ComparisonOperator, EvalContext, Expression, Operator};
use crate::scalar::ScalarValue;

/// Dot-separated sequence of property and relation names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        PropertyPath {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Errors if the path or any of its segments is empty.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() || self.segments.iter().any(|s| s.is_empty()) {
            return Err(UnisonError::bad_query(
                self.to_string(),
                "property paths cannot have empty segments",
            ));
        }
        Ok(())
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> PropertyPath {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        PropertyPath { segments }
    }

    /// Removes `prefix` from the start of this path.
    pub fn strip_prefix(&self, prefix: &PropertyPath) -> Option<PropertyPath> {
        self.segments
            .strip_prefix(prefix.segments.as_slice())
            .map(|rest| PropertyPath::new(rest.iter().cloned()))
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for PropertyPath {
    fn from(value: &str) -> Self {
        PropertyPath::new(value.split('.'))
    }
}

impl From<String> for PropertyPath {
    fn from(value: String) -> Self {
        PropertyPath::from(value.as_str())
    }
}

impl From<PropertyPath> for String {
    fn from(value: PropertyPath) -> Self {
        value.to_string()
    }
}

impl FromStr for PropertyPath {
    type Err = UnisonError;

    fn from_str(s: &str) -> Result<Self> {
        let path = PropertyPath::from(s);
        path.validate()?;
        Ok(path)
    }
}

/// A single `path operator value` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub path: PropertyPath,
    pub op: ComparisonOperator,
    pub value: ScalarValue,
}

impl Condition {
    pub fn new(
        path: impl Into<PropertyPath>,
        op: ComparisonOperator,
        value: impl Into<ScalarValue>,
    ) -> Self {
        Condition {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    pub fn evaluate(&self, context: &dyn EvalContext) -> Result<bool> {
        let name = self.path.to_string();
        let value = context
            .get(&name)
            .ok_or(UnisonError::MissingVariable(name))?;
        compare_values(self.op, value, &self.value)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.op, self.value)
    }
}

/// Boolean tree of conditions.
///
/// `And()` is always true and `Or()` is always false. Equality treats the
/// children of `And` and `Or` as sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BooleanNode {
    Condition(Condition),
    And(Vec<BooleanNode>),
    Or(Vec<BooleanNode>),
    Not(Box<BooleanNode>),
}

impl BooleanNode {
    pub fn condition(
        path: impl Into<PropertyPath>,
        op: ComparisonOperator,
        value: impl Into<ScalarValue>,
    ) -> Self {
        BooleanNode::Condition(Condition::new(path, op, value))
    }

    pub fn always_true() -> Self {
        BooleanNode::And(Vec::new())
    }

    pub fn always_false() -> Self {
        BooleanNode::Or(Vec::new())
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self, BooleanNode::And(children) if children.is_empty())
    }

    pub fn is_always_false(&self) -> bool {
        matches!(self, BooleanNode::Or(children) if children.is_empty())
    }

    pub fn evaluate(&self, context: &dyn EvalContext) -> Result<bool> {
        match self {
            BooleanNode::Condition(cond) => cond.evaluate(context),
            BooleanNode::And(children) => {
                for child in children {
                    if !child.evaluate(context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            BooleanNode::Or(children) => {
                for child in children {
                    if child.evaluate(context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            BooleanNode::Not(child) => Ok(!child.evaluate(context)?),
        }
    }

    /// Visit every leaf condition.
    pub fn for_each_condition<F>(&self, f: &mut F) -> Result<()>
    where
        F: FnMut(&Condition) -> Result<()>,
    {
        match self {
            BooleanNode::Condition(cond) => f(cond),
            BooleanNode::And(children) | BooleanNode::Or(children) => {
                for child in children {
                    child.for_each_condition(f)?;
                }
                Ok(())
            }
            BooleanNode::Not(child) => child.for_each_condition(f),
        }
    }

    /// Rebuild the tree with every leaf replaced by `f(leaf)`.
    pub fn map_conditions<F>(&self, f: &mut F) -> BooleanNode
    where
        F: FnMut(&Condition) -> Condition,
    {
        match self {
            BooleanNode::Condition(cond) => BooleanNode::Condition(f(cond)),
            BooleanNode::And(children) => {
                BooleanNode::And(children.iter().map(|c| c.map_conditions(f)).collect())
            }
            BooleanNode::Or(children) => {
                BooleanNode::Or(children.iter().map(|c| c.map_conditions(f)).collect())
            }
            BooleanNode::Not(child) => BooleanNode::Not(Box::new(child.map_conditions(f))),
        }
    }

    /// Tree of the property paths referenced by this condition, keyed by first
    /// segment.
    pub fn properties_tree(&self) -> PropertiesTree {
        let mut tree = PropertiesTree::default();
        // Infallible visitor.
        let _ = self.for_each_condition(&mut |cond| {
            tree.insert(cond.path.segments());
            Ok(())
        });
        tree
    }

    pub fn to_expression(&self) -> Expression {
        match self {
            BooleanNode::Condition(cond) => expr::compare(
                cond.op,
                expr::var(cond.path.to_string()),
                expr::lit(cond.value.clone()),
            ),
            BooleanNode::And(children) => children
                .iter()
                .fold(expr::lit(true), |acc, c| expr::and(acc, c.to_expression())),
            BooleanNode::Or(children) => children
                .iter()
                .fold(expr::lit(false), |acc, c| expr::or(acc, c.to_expression())),
            BooleanNode::Not(child) => expr::not(child.to_expression()),
        }
    }
}

/// Recursively split a condition on AND, putting the conjuncts in `out`.
pub fn split_conjunction(node: BooleanNode, out: &mut Vec<BooleanNode>) {
    match node {
        BooleanNode::And(children) => {
            for child in children {
                split_conjunction(child, out);
            }
        }
        other => out.push(other),
    }
}

fn hash_child(node: &BooleanNode) -> u64 {
    let mut hasher = DefaultHasher::new();
    node.hash(&mut hasher);
    hasher.finish()
}

fn same_set(a: &[BooleanNode], b: &[BooleanNode]) -> bool {
    a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
}

impl PartialEq for BooleanNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BooleanNode::Condition(a), BooleanNode::Condition(b)) => a == b,
            (BooleanNode::And(a), BooleanNode::And(b)) => same_set(a, b),
            (BooleanNode::Or(a), BooleanNode::Or(b)) => same_set(a, b),
            (BooleanNode::Not(a), BooleanNode::Not(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for BooleanNode {}

impl Hash for BooleanNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            BooleanNode::Condition(cond) => cond.hash(state),
            BooleanNode::And(children) | BooleanNode::Or(children) => {
                // Order and duplicates must not change the hash.
                let mut hashes: Vec<u64> = children.iter().map(hash_child).collect();
                hashes.sort_unstable();
                hashes.dedup();
                hashes.hash(state);
            }
            BooleanNode::Not(child) => child.hash(state),
        }
    }
}

impl fmt::Display for BooleanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_children(
            f: &mut fmt::Formatter<'_>,
            children: &[BooleanNode],
            sep: &str,
        ) -> fmt::Result {
            write!(f, "(")?;
            for (idx, child) in children.iter().enumerate() {
                if idx > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match self {
            BooleanNode::Condition(cond) => write!(f, "{cond}"),
            BooleanNode::And(children) if children.is_empty() => write!(f, "True"),
            BooleanNode::Or(children) if children.is_empty() => write!(f, "False"),
            BooleanNode::And(children) => write_children(f, children, "AND"),
            BooleanNode::Or(children) => write_children(f, children, "OR"),
            BooleanNode::Not(child) => write!(f, "NOT {child}"),
        }
    }
}

impl From<Condition> for BooleanNode {
    fn from(value: Condition) -> Self {
        BooleanNode::Condition(value)
    }
}

impl From<BooleanNode> for Expression {
    fn from(value: BooleanNode) -> Self {
        value.to_expression()
    }
}

impl From<&BooleanNode> for Expression {
    fn from(value: &BooleanNode) -> Self {
        value.to_expression()
    }
}

impl TryFrom<&Expression> for BooleanNode {
    type Error = UnisonError;

    /// Convert comparison, boolean and literal shapes back into a condition.
    fn try_from(expr: &Expression) -> Result<Self> {
        let not_a_condition = || {
            UnisonError::InvalidOperation(format!("Expression is not a condition: {expr}"))
        };

        match expr {
            Expression::Literal(v) if v.is_truthy() => Ok(BooleanNode::always_true()),
            Expression::Literal(_) => Ok(BooleanNode::always_false()),
            Expression::Variable(_) => Err(not_a_condition()),
            Expression::Operation(op) => match (op.op, op.args.as_slice()) {
                (Operator::Comparison(cmp), [Expression::Variable(name), Expression::Literal(v)]) => {
                    Ok(BooleanNode::condition(name.as_str(), cmp, v.clone()))
                }
                (Operator::Comparison(cmp), [Expression::Literal(v), Expression::Variable(name)]) => {
                    let cmp = cmp.flip().ok_or_else(not_a_condition)?;
                    Ok(BooleanNode::condition(name.as_str(), cmp, v.clone()))
                }
                (Operator::And, args) => Ok(BooleanNode::And(
                    args.iter()
                        .map(BooleanNode::try_from)
                        .collect::<Result<Vec<_>>>()?,
                )),
                (Operator::Or, args) => Ok(BooleanNode::Or(
                    args.iter()
                        .map(BooleanNode::try_from)
                        .collect::<Result<Vec<_>>>()?,
                )),
                (Operator::Not, [arg]) => Ok(BooleanNode::Not(Box::new(BooleanNode::try_from(arg)?))),
                _ => Err(not_a_condition()),
            },
        }
    }
}

impl std::ops::BitAnd for BooleanNode {
    type Output = BooleanNode;

    fn bitand(self, rhs: BooleanNode) -> BooleanNode {
        BooleanNode::And(vec![self, rhs])
    }
}

impl std::ops::BitOr for BooleanNode {
    type Output = BooleanNode;

    fn bitor(self, rhs: BooleanNode) -> BooleanNode {
        BooleanNode::Or(vec![self, rhs])
    }
}

impl std::ops::Not for BooleanNode {
    type Output = BooleanNode;

    fn not(self) -> BooleanNode {
        BooleanNode::Not(Box::new(self))
    }
}

/// Nested property names referenced by a condition.
///
/// `a.b = 1 AND a.c = 2 AND d = 3` gives `{a: {b: {}, c: {}}, d: {}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesTree {
    pub children: BTreeMap<String, PropertiesTree>,
}

impl PropertiesTree {
    pub fn insert(&mut self, segments: &[String]) {
        if let Some((first, rest)) = segments.split_first() {
            self.children
                .entry(first.clone())
                .or_default()
                .insert(rest);
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropertiesTree> {
        self.children.get(name)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
