//! Symbolic expressions.
//!
//! Expressions are immutable trees of literals, variables and operations.
//! Building one never evaluates anything; see [`Expression::evaluate`].

pub mod evaluate;

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use evaluate::EvalContext;

use crate::scalar::ScalarValue;

/// Comparison operators shared by expressions and conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    /// Regular expression match.
    Match,
    /// Regular expression non-match.
    NotMatch,
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 8] = [
        ComparisonOperator::Eq,
        ComparisonOperator::NotEq,
        ComparisonOperator::Gt,
        ComparisonOperator::GtEq,
        ComparisonOperator::Lt,
        ComparisonOperator::LtEq,
        ComparisonOperator::Match,
        ComparisonOperator::NotMatch,
    ];

    pub const fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::NotEq => "!=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::GtEq => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::LtEq => "<=",
            ComparisonOperator::Match => "~=",
            ComparisonOperator::NotMatch => "~!=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// Operator to use when the operands are swapped.
    ///
    /// Regex operators are not symmetric and have no flipped form.
    pub const fn flip(&self) -> Option<Self> {
        Some(match self {
            ComparisonOperator::Eq => ComparisonOperator::Eq,
            ComparisonOperator::NotEq => ComparisonOperator::NotEq,
            ComparisonOperator::Gt => ComparisonOperator::Lt,
            ComparisonOperator::GtEq => ComparisonOperator::LtEq,
            ComparisonOperator::Lt => ComparisonOperator::Gt,
            ComparisonOperator::LtEq => ComparisonOperator::GtEq,
            ComparisonOperator::Match | ComparisonOperator::NotMatch => return None,
        })
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Comparison(ComparisonOperator),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Negate,
    And,
    Or,
    Not,
    Upper,
    Lower,
    Len,
}

impl Operator {
    /// Binary operators print infix, the rest print as function calls.
    const fn infix_symbol(&self) -> Option<&'static str> {
        Some(match self {
            Operator::Comparison(op) => op.symbol(),
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Rem => "%",
            Operator::And => "AND",
            Operator::Or => "OR",
            _ => return None,
        })
    }

    const fn name(&self) -> &'static str {
        match self {
            Operator::Negate => "-",
            Operator::Not => "NOT ",
            Operator::Upper => "upper",
            Operator::Lower => "lower",
            Operator::Len => "len",
            _ => "",
        }
    }
}

/// An operator applied to argument expressions.
#[derive(Debug)]
pub struct OperationExpr {
    pub op: Operator,
    pub args: Vec<Expression>,
    affected: OnceLock<BTreeSet<String>>,
    pattern: OnceLock<Option<Result<Regex, regex::Error>>>,
}

impl OperationExpr {
    pub fn new(op: Operator, args: Vec<Expression>) -> Self {
        OperationExpr {
            op,
            args,
            affected: OnceLock::new(),
            pattern: OnceLock::new(),
        }
    }

    /// Compiled pattern of a regex comparison against a string literal.
    ///
    /// Compiled on first use, `None` when the pattern is not a literal.
    pub(crate) fn literal_pattern(&self) -> Option<&Result<Regex, regex::Error>> {
        self.pattern
            .get_or_init(|| match (self.op, self.args.as_slice()) {
                (
                    Operator::Comparison(ComparisonOperator::Match | ComparisonOperator::NotMatch),
                    [_, Expression::Literal(ScalarValue::Utf8(pattern))],
                ) => Some(Regex::new(pattern)),
                _ => None,
            })
            .as_ref()
    }

    /// Union of all variable names found below this operation.
    ///
    /// Computed on first use and cached for the life of the node.
    pub fn affected_variables(&self) -> &BTreeSet<String> {
        self.affected.get_or_init(|| {
            let mut names = BTreeSet::new();
            for arg in &self.args {
                arg.collect_variables(&mut names);
            }
            names
        })
    }
}

impl PartialEq for OperationExpr {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.args == other.args
    }
}

impl Eq for OperationExpr {}

impl Hash for OperationExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.op.hash(state);
        self.args.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Literal(ScalarValue),
    Variable(String),
    Operation(Arc<OperationExpr>),
}

impl Expression {
    pub fn operation(op: Operator, args: Vec<Expression>) -> Self {
        Expression::Operation(Arc::new(OperationExpr::new(op, args)))
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expression::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true if this is a literal with a truthy value.
    pub fn is_true_literal(&self) -> bool {
        self.as_literal().is_some_and(|v| v.is_truthy())
    }

    /// Returns true if this is a literal with a falsy value.
    pub fn is_false_literal(&self) -> bool {
        self.as_literal().is_some_and(|v| !v.is_truthy())
    }

    pub fn affected_variables(&self) -> BTreeSet<String> {
        match self {
            Expression::Literal(_) => BTreeSet::new(),
            Expression::Variable(name) => [name.clone()].into(),
            Expression::Operation(op) => op.affected_variables().clone(),
        }
    }

    /// Checks if every variable in the expression is in `names`.
    pub fn only_references(&self, names: &BTreeSet<String>) -> bool {
        match self {
            Expression::Literal(_) => true,
            Expression::Variable(name) => names.contains(name),
            Expression::Operation(op) => op.affected_variables().is_subset(names),
        }
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Literal(_) => (),
            Expression::Variable(name) => {
                out.insert(name.clone());
            }
            Expression::Operation(op) => out.extend(op.affected_variables().iter().cloned()),
        }
    }

    /// Splits a top-level `AND` into its two sides.
    pub fn as_and(&self) -> Option<&[Expression]> {
        match self {
            Expression::Operation(op) if op.op == Operator::And => Some(&op.args),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{v}"),
            Expression::Variable(name) => write!(f, "{name}"),
            Expression::Operation(op) => match (op.op.infix_symbol(), op.args.as_slice()) {
                (Some(symbol), [left, right]) => write!(f, "({left} {symbol} {right})"),
                (_, [arg]) if matches!(op.op, Operator::Negate | Operator::Not) => {
                    write!(f, "{}{arg}", op.op.name())
                }
                (_, args) => {
                    let name = op.op.infix_symbol().unwrap_or(op.op.name());
                    write!(f, "{name}(")?;
                    for (idx, arg) in args.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ")")
                }
            },
        }
    }
}

macro_rules! impl_from_for_literal {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expression {
                fn from(value: $ty) -> Self {
                    Expression::Literal(value.into())
                }
            }
        )*
    };
}

impl_from_for_literal!(
    bool,
    i32,
    i64,
    f64,
    &str,
    String,
    NaiveDate,
    NaiveDateTime,
    ScalarValue
);

/// Factory for variables.
///
/// `Root.attr("price")` is the same as `var("price")`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Root;

impl Root {
    pub fn attr(&self, name: impl Into<String>) -> Expression {
        var(name)
    }
}

pub fn lit(value: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(value.into())
}

pub fn var(name: impl Into<String>) -> Expression {
    Expression::Variable(name.into())
}

pub fn compare(
    op: ComparisonOperator,
    left: impl Into<Expression>,
    right: impl Into<Expression>,
) -> Expression {
    Expression::operation(Operator::Comparison(op), vec![left.into(), right.into()])
}

pub fn eq(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::Eq, left, right)
}

pub fn not_eq(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::NotEq, left, right)
}

pub fn gt(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::Gt, left, right)
}

pub fn gt_eq(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::GtEq, left, right)
}

pub fn lt(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::Lt, left, right)
}

pub fn lt_eq(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::LtEq, left, right)
}

pub fn matches(left: impl Into<Expression>, pattern: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::Match, left, pattern)
}

pub fn not_matches(left: impl Into<Expression>, pattern: impl Into<Expression>) -> Expression {
    compare(ComparisonOperator::NotMatch, left, pattern)
}

pub fn add(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Add, vec![left.into(), right.into()])
}

pub fn sub(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Sub, vec![left.into(), right.into()])
}

pub fn mul(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Mul, vec![left.into(), right.into()])
}

pub fn div(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Div, vec![left.into(), right.into()])
}

pub fn rem(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Rem, vec![left.into(), right.into()])
}

pub fn negate(expr: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Negate, vec![expr.into()])
}

pub fn upper(expr: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Upper, vec![expr.into()])
}

pub fn lower(expr: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Lower, vec![expr.into()])
}

pub fn len(expr: impl Into<Expression>) -> Expression {
    Expression::operation(Operator::Len, vec![expr.into()])
}

/// Conjunction, simplified when either side is a literal.
///
/// `x AND <truthy>` is `x`, `x AND <falsy>` is `False`, in either operand
/// order.
pub fn and(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    let (left, right) = (left.into(), right.into());
    match simplify_and(left, right) {
        Ok(simplified) => simplified,
        Err((left, right)) => match simplify_and(right, left) {
            Ok(simplified) => simplified,
            Err((right, left)) => Expression::operation(Operator::And, vec![left, right]),
        },
    }
}

fn simplify_and(
    expr: Expression,
    other: Expression,
) -> Result<Expression, (Expression, Expression)> {
    match other.as_literal() {
        Some(v) if v.is_truthy() => Ok(expr),
        Some(_) => Ok(lit(false)),
        None => Err((expr, other)),
    }
}

/// Disjunction, simplified when either side is a literal.
///
/// `x OR <truthy>` is `True`, `x OR <falsy>` is `x`, in either operand order.
pub fn or(left: impl Into<Expression>, right: impl Into<Expression>) -> Expression {
    let (left, right) = (left.into(), right.into());
    match simplify_or(left, right) {
        Ok(simplified) => simplified,
        Err((left, right)) => match simplify_or(right, left) {
            Ok(simplified) => simplified,
            Err((right, left)) => Expression::operation(Operator::Or, vec![left, right]),
        },
    }
}

fn simplify_or(
    expr: Expression,
    other: Expression,
) -> Result<Expression, (Expression, Expression)> {
    match other.as_literal() {
        Some(v) if v.is_truthy() => Ok(lit(true)),
        Some(_) => Ok(expr),
        None => Err((expr, other)),
    }
}

/// Negation. Literals are negated immediately.
pub fn not(expr: impl Into<Expression>) -> Expression {
    match expr.into() {
        Expression::Literal(v) => lit(!v.is_truthy()),
        other => Expression::operation(Operator::Not, vec![other]),
    }
}

/// Conjunction of any number of expressions. Empty input is `True`.
pub fn and_all(exprs: impl IntoIterator<Item = Expression>) -> Expression {
    exprs.into_iter().fold(lit(true), and)
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $func:ident) => {
        impl<T: Into<Expression>> std::ops::$trait<T> for Expression {
            type Output = Expression;

            fn $method(self, rhs: T) -> Expression {
                $func(self, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, add);
impl_binary_op!(Sub, sub, sub);
impl_binary_op!(Mul, mul, mul);
impl_binary_op!(Div, div, div);
impl_binary_op!(Rem, rem, rem);
impl_binary_op!(BitAnd, bitand, and);
impl_binary_op!(BitOr, bitor, or);

impl std::ops::Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        negate(self)
    }
}

impl std::ops::Not for Expression {
    type Output = Expression;

    fn not(self) -> Expression {
        not(self)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn affected_variables_are_collected() {
        let expr = (var("price") * var("tax")) + var("price") - 3;
        let expected: BTreeSet<String> = ["price".to_string(), "tax".to_string()].into();
        assert_eq!(expected, expr.affected_variables());
        assert!(lit(4).affected_variables().is_empty());
    }

    #[test]
    fn only_references_subset() {
        let expr = and(eq(var("a"), 1), gt(var("b"), 2));
        let ab: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        let a: BTreeSet<String> = ["a".to_string()].into();
        assert!(expr.only_references(&ab));
        assert!(!expr.only_references(&a));
    }

    #[test]
    fn structural_equality() {
        let a = eq(var("foo"), 4) & gt(var("bar"), "x");
        let b = eq(Root.attr("foo"), lit(4)) & gt(Root.attr("bar"), lit("x"));
        assert_eq!(a, b);
        assert_ne!(a, eq(var("foo"), 5) & gt(var("bar"), "x"));
    }

    #[rstest]
    #[case::bool_true(lit(true))]
    #[case::one(lit(1))]
    #[case::string(lit("a"))]
    #[case::float(lit(0.5))]
    fn and_or_with_truthy_literal(#[case] t: Expression) {
        let e = eq(var("x"), 3);
        assert_eq!(e, e.clone() & t.clone());
        assert_eq!(e, t.clone() & e.clone());
        assert_eq!(lit(true), e.clone() | t.clone());
        assert_eq!(lit(true), t.clone() | e.clone());
        assert_eq!(lit(false), !t);
    }

    #[rstest]
    #[case::bool_false(lit(false))]
    #[case::zero(lit(0))]
    #[case::empty_string(lit(""))]
    #[case::null(lit(ScalarValue::Null))]
    fn and_or_with_falsy_literal(#[case] f: Expression) {
        let e = eq(var("x"), 3);
        assert_eq!(lit(false), e.clone() & f.clone());
        assert_eq!(lit(false), f.clone() & e.clone());
        assert_eq!(e, e.clone() | f.clone());
        assert_eq!(e, f.clone() | e.clone());
        assert_eq!(lit(true), !f);
    }

    #[test]
    fn and_without_literals_builds_operation() {
        let expr = var("a") & var("b");
        assert_eq!(Some(&[var("a"), var("b")][..]), expr.as_and());
    }

    #[test]
    fn not_of_operation_is_kept() {
        let expr = !eq(var("a"), 1);
        assert_eq!("NOT (a = 1)", expr.to_string());
    }

    #[test]
    fn display() {
        let expr = (var("price") * var("tax")) | matches(upper(var("name")), "^A");
        assert_eq!("((price * tax) OR (upper(name) ~= '^A'))", expr.to_string());
        assert_eq!("-x", negate(var("x")).to_string());
    }

    #[test]
    fn comparison_operator_symbols() {
        for op in ComparisonOperator::ALL {
            assert_eq!(Some(op), ComparisonOperator::from_symbol(op.symbol()));
        }
        assert_eq!(Some(ComparisonOperator::Lt), ComparisonOperator::Gt.flip());
        assert_eq!(None, ComparisonOperator::Match.flip());
    }
}
