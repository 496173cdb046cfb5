use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use regex::Regex;
use unison_error::{Result, UnisonError};

use super::{ComparisonOperator, Expression, Operator};
use crate::scalar::ScalarValue;

/// Resolves variable names while evaluating an expression.
pub trait EvalContext {
    fn get(&self, name: &str) -> Option<&ScalarValue>;
}

impl EvalContext for IndexMap<String, ScalarValue> {
    fn get(&self, name: &str) -> Option<&ScalarValue> {
        IndexMap::get(self, name)
    }
}

impl EvalContext for BTreeMap<String, ScalarValue> {
    fn get(&self, name: &str) -> Option<&ScalarValue> {
        BTreeMap::get(self, name)
    }
}

impl EvalContext for HashMap<String, ScalarValue> {
    fn get(&self, name: &str) -> Option<&ScalarValue> {
        HashMap::get(self, name)
    }
}

impl Expression {
    /// Evaluate against a context.
    ///
    /// Errors with `MissingVariable` if the context doesn't contain a
    /// referenced name.
    pub fn evaluate(&self, context: &dyn EvalContext) -> Result<ScalarValue> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Variable(name) => context
                .get(name)
                .cloned()
                .ok_or_else(|| UnisonError::MissingVariable(name.clone())),
            Expression::Operation(op) => match (op.op, op.args.as_slice()) {
                // Short-circuiting, the right side may not be evaluated.
                (Operator::And, args) => {
                    for arg in args {
                        if !arg.evaluate(context)?.is_truthy() {
                            return Ok(ScalarValue::Boolean(false));
                        }
                    }
                    Ok(ScalarValue::Boolean(true))
                }
                (Operator::Or, args) => {
                    for arg in args {
                        if arg.evaluate(context)?.is_truthy() {
                            return Ok(ScalarValue::Boolean(true));
                        }
                    }
                    Ok(ScalarValue::Boolean(false))
                }
                (Operator::Not, [arg]) => {
                    Ok(ScalarValue::Boolean(!arg.evaluate(context)?.is_truthy()))
                }
                (Operator::Negate, [arg]) => negate(arg.evaluate(context)?),
                (Operator::Upper, [arg]) => map_string(arg.evaluate(context)?, |s| s.to_uppercase()),
                (Operator::Lower, [arg]) => map_string(arg.evaluate(context)?, |s| s.to_lowercase()),
                (Operator::Len, [arg]) => length(arg.evaluate(context)?),
                (Operator::Comparison(cmp), [left, right]) => {
                    let left = left.evaluate(context)?;
                    if let Some(pattern) = op.literal_pattern() {
                        if left.is_null() {
                            return Ok(ScalarValue::Boolean(false));
                        }
                        let pattern = pattern
                            .as_ref()
                            .map_err(|e| UnisonError::InvalidRegex(e.clone()))?;
                        return Ok(ScalarValue::Boolean(regex_match(cmp, &left, pattern)?));
                    }
                    let right = right.evaluate(context)?;
                    Ok(ScalarValue::Boolean(compare_values(cmp, &left, &right)?))
                }
                (op, [left, right]) => {
                    let left = left.evaluate(context)?;
                    let right = right.evaluate(context)?;
                    arithmetic(op, left, right)
                }
                (op, args) => Err(UnisonError::InvalidOperation(format!(
                    "Operator {op:?} cannot take {} argument(s)",
                    args.len()
                ))),
            },
        }
    }
}

/// Apply a comparison operator to two values.
///
/// Equality is structural, `Null = Null` holds. Ordering comparisons and regex
/// matches against `Null` are false.
pub fn compare_values(
    op: ComparisonOperator,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<bool> {
    match op {
        ComparisonOperator::Eq => return Ok(left == right),
        ComparisonOperator::NotEq => return Ok(left != right),
        _ => (),
    }

    if left.is_null() || right.is_null() {
        return Ok(false);
    }

    match op {
        ComparisonOperator::Match | ComparisonOperator::NotMatch => {
            let pattern = Regex::new(right.try_as_str()?)?;
            regex_match(op, left, &pattern)
        }
        _ => {
            let comparable = left.as_f64().is_some() && right.as_f64().is_some()
                || std::mem::discriminant(left) == std::mem::discriminant(right);
            if !comparable {
                return Err(UnisonError::InvalidOperation(format!(
                    "Cannot compare {left} {op} {right}"
                )));
            }
            let ord = left.cmp(right);
            Ok(match op {
                ComparisonOperator::Gt => ord.is_gt(),
                ComparisonOperator::GtEq => ord.is_ge(),
                ComparisonOperator::Lt => ord.is_lt(),
                ComparisonOperator::LtEq => ord.is_le(),
                _ => unreachable!("equality and regex handled above"),
            })
        }
    }
}

/// `left ~= pattern` or `left ~!= pattern`. A `Null` never matches.
fn regex_match(op: ComparisonOperator, left: &ScalarValue, pattern: &Regex) -> Result<bool> {
    if left.is_null() {
        return Ok(false);
    }
    let is_match = pattern.is_match(left.try_as_str()?);
    Ok(is_match == (op == ComparisonOperator::Match))
}

fn negate(value: ScalarValue) -> Result<ScalarValue> {
    match value {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Int64(v) => v
            .checked_neg()
            .map(ScalarValue::Int64)
            .ok_or_else(|| UnisonError::InvalidOperation(format!("Overflow negating {v}"))),
        ScalarValue::Float64(v) => Ok(ScalarValue::Float64(-v)),
        other => Err(UnisonError::InvalidOperation(format!(
            "Cannot negate {other}"
        ))),
    }
}

fn map_string(value: ScalarValue, f: impl Fn(&str) -> String) -> Result<ScalarValue> {
    match value {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Utf8(s) => Ok(ScalarValue::Utf8(f(&s))),
        other => Err(UnisonError::InvalidOperation(format!(
            "Expected a string, got {other}"
        ))),
    }
}

fn length(value: ScalarValue) -> Result<ScalarValue> {
    match value {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Utf8(s) => Ok(ScalarValue::Int64(s.chars().count() as i64)),
        ScalarValue::List(vals) => Ok(ScalarValue::Int64(vals.len() as i64)),
        other => Err(UnisonError::InvalidOperation(format!(
            "Cannot take the length of {other}"
        ))),
    }
}

/// Apply an arithmetic operator.
///
/// Integer operations stay integral and are checked, except division which
/// always produces a float. Any `Null` operand produces `Null`.
pub fn arithmetic(op: Operator, left: ScalarValue, right: ScalarValue) -> Result<ScalarValue> {
    use ScalarValue::*;

    let overflow = || UnisonError::InvalidOperation(format!("Overflow evaluating {op:?}"));

    Ok(match (op, left, right) {
        (_, Null, _) | (_, _, Null) => Null,
        (Operator::Add, Utf8(a), Utf8(b)) => Utf8(a + &b),
        (Operator::Add, Int64(a), Int64(b)) => Int64(a.checked_add(b).ok_or_else(overflow)?),
        (Operator::Sub, Int64(a), Int64(b)) => Int64(a.checked_sub(b).ok_or_else(overflow)?),
        (Operator::Mul, Int64(a), Int64(b)) => Int64(a.checked_mul(b).ok_or_else(overflow)?),
        (Operator::Rem, Int64(a), Int64(b)) => {
            if b == 0 {
                return Err(UnisonError::InvalidOperation(
                    "Division by zero".to_string(),
                ));
            }
            Int64(a.checked_rem(b).ok_or_else(overflow)?)
        }
        (op, left, right) => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(UnisonError::InvalidOperation(format!(
                        "Cannot apply {op:?} to {left} and {right}"
                    )));
                }
            };
            match op {
                Operator::Add => Float64(a + b),
                Operator::Sub => Float64(a - b),
                Operator::Mul => Float64(a * b),
                Operator::Div | Operator::Rem if b == 0.0 => {
                    return Err(UnisonError::InvalidOperation(
                        "Division by zero".to_string(),
                    ));
                }
                Operator::Div => Float64(a / b),
                Operator::Rem => Float64(a % b),
                other => {
                    return Err(UnisonError::InvalidOperation(format!(
                        "{other:?} is not an arithmetic operator"
                    )));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{and, div, eq, gt, len, lit, lower, matches, not_matches, or, var};

    fn context() -> IndexMap<String, ScalarValue> {
        [
            ("name".to_string(), ScalarValue::from("Alice")),
            ("price".to_string(), ScalarValue::from(10)),
            ("tax".to_string(), ScalarValue::from(1.5)),
            ("missing".to_string(), ScalarValue::Null),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn arithmetic_types() {
        let ctx = context();
        assert_eq!(ScalarValue::from(15.0), (var("price") * var("tax")).evaluate(&ctx).unwrap());
        assert_eq!(ScalarValue::from(12), (var("price") + 2).evaluate(&ctx).unwrap());
        assert_eq!(ScalarValue::from(2.5), div(var("price"), 4).evaluate(&ctx).unwrap());
        assert_eq!(ScalarValue::from("Alice!"), (var("name") + "!").evaluate(&ctx).unwrap());
        assert_eq!(ScalarValue::Null, (var("missing") + 1).evaluate(&ctx).unwrap());
    }

    #[test]
    fn arithmetic_errors() {
        let ctx = context();
        assert!(matches!(
            (var("name") * 2).evaluate(&ctx),
            Err(UnisonError::InvalidOperation(_))
        ));
        assert!(matches!(
            (var("price") % 0).evaluate(&ctx),
            Err(UnisonError::InvalidOperation(_))
        ));
        assert!(matches!(
            (lit(i64::MAX) + 1).evaluate(&ctx),
            Err(UnisonError::InvalidOperation(_))
        ));
    }

    #[test]
    fn missing_variable() {
        let ctx = context();
        let err = gt(var("toto"), 3).evaluate(&ctx).unwrap_err();
        assert!(matches!(err, UnisonError::MissingVariable(name) if name == "toto"));
    }

    #[test]
    fn short_circuit_skips_missing() {
        let ctx = context();
        let expr = Expression::operation(
            Operator::And,
            vec![eq(var("price"), 11), eq(var("nope"), 1)],
        );
        assert_eq!(ScalarValue::Boolean(false), expr.evaluate(&ctx).unwrap());
    }

    #[test]
    fn null_comparisons() {
        let ctx = context();
        assert_eq!(
            ScalarValue::Boolean(true),
            eq(var("missing"), ScalarValue::Null).evaluate(&ctx).unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(false),
            gt(var("missing"), 3).evaluate(&ctx).unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(false),
            not_matches(var("missing"), "x").evaluate(&ctx).unwrap()
        );
    }

    #[test]
    fn incomparable_types() {
        let ctx = context();
        assert!(gt(var("name"), 3).evaluate(&ctx).is_err());
        // Mixed numeric types compare fine.
        assert_eq!(
            ScalarValue::Boolean(true),
            gt(var("price"), var("tax")).evaluate(&ctx).unwrap()
        );
    }

    #[test]
    fn regex_match() {
        let ctx = context();
        assert_eq!(
            ScalarValue::Boolean(true),
            matches(lower(var("name")), "^ali").evaluate(&ctx).unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(false),
            not_matches(var("name"), "lic").evaluate(&ctx).unwrap()
        );
        assert!(matches!(
            matches(var("name"), "(").evaluate(&ctx),
            Err(UnisonError::InvalidRegex(_))
        ));
    }

    #[test]
    fn literal_pattern_compiled_once() {
        let ctx = context();
        let expr = matches(var("name"), "^Al");
        let Expression::Operation(op) = &expr else {
            panic!("expected an operation");
        };
        let compiled = op.literal_pattern().unwrap().as_ref().unwrap() as *const Regex;

        for _ in 0..3 {
            assert_eq!(ScalarValue::Boolean(true), expr.evaluate(&ctx).unwrap());
        }
        let reused = expr.clone();
        let Expression::Operation(op) = &reused else {
            panic!("expected an operation");
        };
        assert!(std::ptr::eq(compiled, op.literal_pattern().unwrap().as_ref().unwrap()));

        assert_eq!(
            ScalarValue::Boolean(false),
            matches(var("missing"), "(").evaluate(&ctx).unwrap()
        );
        let Expression::Operation(op) = matches(var("name"), var("name")) else {
            panic!("expected an operation");
        };
        assert!(op.literal_pattern().is_none());
    }

    #[test]
    fn boolean_results() {
        let ctx = context();
        let expr = or(and(var("price"), var("missing")), eq(len(var("name")), 5));
        assert_eq!(ScalarValue::Boolean(true), expr.evaluate(&ctx).unwrap());
    }
}
