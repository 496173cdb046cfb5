//! Splitting filters into a part some backend can answer and a remainder.
//!
//! Isolation only descends through `AND`. An `OR` or `NOT` spanning local and
//! foreign names stays whole in the remainder.

use std::collections::{BTreeMap, BTreeSet};

use crate::expr::{ComparisonOperator, Expression, Operator, and, and_all, lit};
use crate::query::{Query, Stage};
use crate::scalar::ScalarValue;

/// Split `expr` into `(local, remainder)` where `local` only references
/// `names`.
///
/// `local AND remainder` is equivalent to `expr` for every context.
pub fn isolate_expression(expr: &Expression, names: &BTreeSet<String>) -> (Expression, Expression) {
    if expr.only_references(names) {
        return (expr.clone(), lit(true));
    }

    match expr.as_and() {
        Some(args) => args
            .iter()
            .map(|arg| isolate_expression(arg, names))
            .fold((lit(true), lit(true)), |(local, remainder), (l, r)| {
                (and(local, l), and(remainder, r))
            }),
        None => (lit(true), expr.clone()),
    }
}

/// Pull the isolatable part out of the leading run of `Where` stages.
///
/// Scanning stops at the first stage that is not a `Where`; later filters are
/// never moved ahead of a projection or sort.
pub fn isolate_query(query: &Query, names: &BTreeSet<String>) -> (Expression, Query) {
    let mut local = lit(true);
    let mut remaining = Vec::with_capacity(query.stages().len());

    let mut stages = query.stages().iter();
    for stage in stages.by_ref() {
        match stage {
            Stage::Where(condition) => {
                let (pushed, kept) = isolate_expression(condition, names);
                local = and(local, pushed);
                if !kept.is_true_literal() {
                    remaining.push(Stage::Where(kept));
                }
            }
            other => {
                remaining.push(other.clone());
                break;
            }
        }
    }
    remaining.extend(stages.cloned());

    (local, Query::from_stages(remaining))
}

/// Extract `variable = literal` bindings from the top-level conjunction.
///
/// Binding the same variable to two different values is a contradiction and
/// yields `({}, False)`.
pub fn isolate_values(expr: &Expression) -> (BTreeMap<String, ScalarValue>, Expression) {
    let mut conjuncts = Vec::new();
    collect_conjuncts(expr, &mut conjuncts);

    let mut bindings: BTreeMap<String, ScalarValue> = BTreeMap::new();
    let mut remainder = Vec::new();

    for conjunct in conjuncts {
        match as_binding(conjunct) {
            Some((name, value)) => match bindings.get(name) {
                Some(existing) if existing != value => return (BTreeMap::new(), lit(false)),
                Some(_) => (),
                None => {
                    bindings.insert(name.to_string(), value.clone());
                }
            },
            None => remainder.push(conjunct.clone()),
        }
    }

    (bindings, and_all(remainder))
}

fn collect_conjuncts<'a>(expr: &'a Expression, out: &mut Vec<&'a Expression>) {
    match expr.as_and() {
        Some(args) => {
            for arg in args {
                collect_conjuncts(arg, out);
            }
        }
        None => out.push(expr),
    }
}

fn as_binding(expr: &Expression) -> Option<(&str, &ScalarValue)> {
    let Expression::Operation(op) = expr else {
        return None;
    };
    if op.op != Operator::Comparison(ComparisonOperator::Eq) {
        return None;
    }
    match op.args.as_slice() {
        [Expression::Variable(name), Expression::Literal(value)]
        | [Expression::Literal(value), Expression::Variable(name)] => Some((name, value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::expr::{eq, gt, lt, not, or, var};
    use crate::query::SortKey;

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fully_local() {
        let expr = eq(var("a"), 1) & gt(var("b"), 2);
        let (local, remainder) = isolate_expression(&expr, &names(&["a", "b", "c"]));
        assert_eq!(expr, local);
        assert_eq!(lit(true), remainder);
    }

    #[test]
    fn split_conjunction() {
        let expr = eq(var("a"), 1) & gt(var("b"), 2) & lt(var("a"), 5);
        let (local, remainder) = isolate_expression(&expr, &names(&["a"]));
        assert_eq!(eq(var("a"), 1) & lt(var("a"), 5), local);
        assert_eq!(gt(var("b"), 2), remainder);
    }

    #[test]
    fn disjunction_is_not_split() {
        let expr = or(eq(var("a"), 1), eq(var("b"), 2));
        let (local, remainder) = isolate_expression(&expr, &names(&["a"]));
        assert_eq!(lit(true), local);
        assert_eq!(expr, remainder);

        let negated = not(eq(var("a"), 1) & eq(var("b"), 2));
        let (local, remainder) = isolate_expression(&negated, &names(&["a"]));
        assert_eq!(lit(true), local);
        assert_eq!(negated, remainder);
    }

    #[test]
    fn isolation_preserves_meaning() {
        let exprs = [
            eq(var("a"), 1) & or(eq(var("b"), 1), eq(var("a"), 0)),
            (gt(var("a"), 0) & gt(var("b"), 0)) & not(eq(var("c"), 1)),
            or(eq(var("a"), 1) & eq(var("b"), 1), eq(var("c"), 1)),
        ];

        for expr in exprs {
            for local_names in [names(&["a"]), names(&["a", "b"]), names(&["c"]), names(&[])] {
                let (local, remainder) = isolate_expression(&expr, &local_names);
                assert!(local.only_references(&local_names));
                let recombined = and(local.clone(), remainder.clone());

                for bits in 0..8_i64 {
                    let context: IndexMap<String, ScalarValue> = [
                        ("a".to_string(), ScalarValue::from(bits & 1)),
                        ("b".to_string(), ScalarValue::from((bits >> 1) & 1)),
                        ("c".to_string(), ScalarValue::from((bits >> 2) & 1)),
                    ]
                    .into_iter()
                    .collect();
                    assert_eq!(
                        expr.evaluate(&context).unwrap().is_truthy(),
                        recombined.evaluate(&context).unwrap().is_truthy(),
                        "{expr} split as {local} / {remainder}"
                    );
                }
            }
        }
    }

    #[test]
    fn query_leading_wheres_only() {
        let query = Query::new()
            .filter(eq(var("a"), 1) & eq(var("b"), 2))
            .filter(gt(var("a"), 0))
            .sort([SortKey::asc(var("a"))])
            .filter(eq(var("a"), 3));

        let (local, remaining) = isolate_query(&query, &names(&["a"]));
        assert_eq!(eq(var("a"), 1) & gt(var("a"), 0), local);
        assert_eq!(
            Query::new()
                .filter(eq(var("b"), 2))
                .sort([SortKey::asc(var("a"))])
                .filter(eq(var("a"), 3)),
            remaining
        );
    }

    #[test]
    fn query_without_leading_where() {
        let query = Query::new().limit(3).filter(eq(var("a"), 1));
        let (local, remaining) = isolate_query(&query, &names(&["a"]));
        assert_eq!(lit(true), local);
        assert_eq!(query, remaining);
    }

    #[test]
    fn values_bindings() {
        let expr = eq(var("foo"), 4) & eq("bar", var("name")) & gt(var("x"), 1);
        let (bindings, remainder) = isolate_values(&expr);
        assert_eq!(
            BTreeMap::from([
                ("foo".to_string(), ScalarValue::from(4)),
                ("name".to_string(), ScalarValue::from("bar")),
            ]),
            bindings
        );
        assert_eq!(gt(var("x"), 1), remainder);
    }

    #[test]
    fn values_contradiction() {
        let expr = eq(var("foo"), 4) & eq(5, var("foo"));
        let (bindings, remainder) = isolate_values(&expr);
        assert!(bindings.is_empty());
        assert_eq!(lit(false), remainder);
    }

    #[test]
    fn values_repeated_binding() {
        let expr = eq(var("foo"), 4) & eq(4, var("foo"));
        let (bindings, remainder) = isolate_values(&expr);
        assert_eq!(BTreeMap::from([("foo".to_string(), ScalarValue::from(4))]), bindings);
        assert_eq!(lit(true), remainder);
    }
}
