use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use unison_error::{Result, UnisonError};

use crate::expr::evaluate::arithmetic;
use crate::expr::{Expression, Operator};
use crate::record::Record;
use crate::scalar::ScalarValue;

/// Group-by keys by alias. Empty means a single group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct By {
    pub keys: IndexMap<String, Expression>,
}

impl By {
    pub fn new<K, E>(keys: impl IntoIterator<Item = (K, E)>) -> Self
    where
        K: Into<String>,
        E: Into<Expression>,
    {
        By {
            keys: keys
                .into_iter()
                .map(|(k, e)| (k.into(), e.into()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Sum,
    Min,
    Max,
    Count,
    Avg,
}

impl AggregateKind {
    pub const fn name(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Count => "count",
            AggregateKind::Avg => "avg",
        }
    }
}

impl FromStr for AggregateKind {
    type Err = UnisonError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "sum" => AggregateKind::Sum,
            "min" => AggregateKind::Min,
            "max" => AggregateKind::Max,
            "count" => AggregateKind::Count,
            "avg" => AggregateKind::Avg,
            other => {
                return Err(UnisonError::InvalidOperation(format!(
                    "Unknown aggregate function: '{other}'"
                )));
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateFunction {
    pub kind: AggregateKind,
    /// Ignored by `Count`, which counts group members.
    pub expr: Expression,
}

impl AggregateFunction {
    pub fn new(kind: AggregateKind, expr: impl Into<Expression>) -> Self {
        AggregateFunction {
            kind,
            expr: expr.into(),
        }
    }

    pub fn sum(expr: impl Into<Expression>) -> Self {
        Self::new(AggregateKind::Sum, expr)
    }

    pub fn min(expr: impl Into<Expression>) -> Self {
        Self::new(AggregateKind::Min, expr)
    }

    pub fn max(expr: impl Into<Expression>) -> Self {
        Self::new(AggregateKind::Max, expr)
    }

    pub fn count() -> Self {
        Self::new(AggregateKind::Count, ScalarValue::Null)
    }

    pub fn avg(expr: impl Into<Expression>) -> Self {
        Self::new(AggregateKind::Avg, expr)
    }

    fn new_state(&self) -> AggregateState {
        match self.kind {
            AggregateKind::Sum => AggregateState::Sum(ScalarValue::Int64(0)),
            AggregateKind::Min => AggregateState::Min(None),
            AggregateKind::Max => AggregateState::Max(None),
            AggregateKind::Count => AggregateState::Count(0),
            AggregateKind::Avg => AggregateState::Avg {
                sum: ScalarValue::Int64(0),
                count: 0,
            },
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AggregateKind::Count => write!(f, "count()"),
            kind => write!(f, "{}({})", kind.name(), self.expr),
        }
    }
}

/// Running state for one aggregate in one group.
///
/// Null inputs are skipped by everything except `Count`.
#[derive(Debug)]
enum AggregateState {
    Sum(ScalarValue),
    Min(Option<ScalarValue>),
    Max(Option<ScalarValue>),
    Count(i64),
    Avg { sum: ScalarValue, count: i64 },
}

impl AggregateState {
    fn update(&mut self, func: &AggregateFunction, record: &Record) -> Result<()> {
        if let AggregateState::Count(count) = self {
            *count += 1;
            return Ok(());
        }

        let value = func.expr.evaluate(record)?;
        if value.is_null() {
            return Ok(());
        }

        match self {
            AggregateState::Sum(sum) => {
                *sum = arithmetic(Operator::Add, std::mem::replace(sum, ScalarValue::Null), value)?;
            }
            AggregateState::Min(min) => {
                if min.as_ref().is_none_or(|m| value < *m) {
                    *min = Some(value);
                }
            }
            AggregateState::Max(max) => {
                if max.as_ref().is_none_or(|m| value > *m) {
                    *max = Some(value);
                }
            }
            AggregateState::Avg { sum, count } => {
                *sum = arithmetic(Operator::Add, std::mem::replace(sum, ScalarValue::Null), value)?;
                *count += 1;
            }
            AggregateState::Count(_) => (),
        }

        Ok(())
    }

    fn finish(self) -> Result<ScalarValue> {
        Ok(match self {
            AggregateState::Sum(sum) => sum,
            AggregateState::Min(v) | AggregateState::Max(v) => v.unwrap_or(ScalarValue::Null),
            AggregateState::Count(count) => ScalarValue::Int64(count),
            AggregateState::Avg { count: 0, .. } => ScalarValue::Null,
            AggregateState::Avg { sum, count } => {
                arithmetic(Operator::Div, sum, ScalarValue::Int64(count))?
            }
        })
    }
}

/// Group records and reduce each group.
///
/// Groups are emitted in order of first appearance. An empty input with an
/// empty `By` still produces one record.
pub fn aggregate(
    by: &By,
    aggregates: &IndexMap<String, AggregateFunction>,
    input: impl Iterator<Item = Result<Record>>,
) -> Result<Vec<Record>> {
    let mut groups: IndexMap<Vec<ScalarValue>, Vec<AggregateState>> = IndexMap::new();

    for record in input {
        let record = record?;
        let key = by
            .keys
            .values()
            .map(|expr| expr.evaluate(&record))
            .collect::<Result<Vec<_>>>()?;

        let states = groups
            .entry(key)
            .or_insert_with(|| aggregates.values().map(|f| f.new_state()).collect());
        for (state, func) in states.iter_mut().zip(aggregates.values()) {
            state.update(func, &record)?;
        }
    }

    if groups.is_empty() && by.keys.is_empty() {
        groups.insert(
            Vec::new(),
            aggregates.values().map(|f| f.new_state()).collect(),
        );
    }

    groups
        .into_iter()
        .map(|(key, states)| {
            let mut out = Record::with_capacity(key.len() + states.len());
            for (alias, value) in by.keys.keys().zip(key) {
                out.insert(alias.clone(), value);
            }
            for (alias, state) in aggregates.keys().zip(states) {
                out.insert(alias.clone(), state.finish()?);
            }
            Ok(out)
        })
        .collect()
}
