//! Immutable query pipelines.
//!
//! A [`Query`] is an ordered list of stages. Builder methods return a new
//! query and leave the receiver untouched; `q1 + q2` concatenates stages.

pub mod aggregate;
pub mod execute;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

pub use aggregate::{AggregateFunction, AggregateKind, By};
pub use execute::RecordStream;

use crate::expr::Expression;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub expr: Expression,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(expr: impl Into<Expression>) -> Self {
        SortKey {
            expr: expr.into(),
            ascending: true,
        }
    }

    pub fn desc(expr: impl Into<Expression>) -> Self {
        SortKey {
            expr: expr.into(),
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Replace the visible properties with the given aliases.
    Select(IndexMap<String, Expression>),
    /// Add the given aliases to the visible properties.
    SelectAlso(IndexMap<String, Expression>),
    /// Keep records for which the expression is truthy.
    Where(Expression),
    /// Stable sort, the first key is the primary key.
    Sort(Vec<SortKey>),
    /// Group by `by` and reduce each group with the named aggregates.
    Aggregate {
        by: By,
        aggregates: IndexMap<String, AggregateFunction>,
    },
    /// Python-style slice, negative bounds count from the end.
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
    },
    /// Drop records equal to a previous record.
    Distinct,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_mapping<A: fmt::Display, B: fmt::Display>(
            f: &mut fmt::Formatter<'_>,
            mapping: impl Iterator<Item = (A, B)>,
        ) -> fmt::Result {
            for (idx, (alias, expr)) in mapping.enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{alias}={expr}")?;
            }
            Ok(())
        }

        match self {
            Stage::Select(mapping) => {
                write!(f, "Select(")?;
                write_mapping(f, mapping.iter())?;
                write!(f, ")")
            }
            Stage::SelectAlso(mapping) => {
                write!(f, "SelectAlso(")?;
                write_mapping(f, mapping.iter())?;
                write!(f, ")")
            }
            Stage::Where(expr) => write!(f, "Where({expr})"),
            Stage::Sort(keys) => {
                write!(f, "Sort(")?;
                for (idx, key) in keys.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    let dir = if key.ascending { "ASC" } else { "DESC" };
                    write!(f, "{} {dir}", key.expr)?;
                }
                write!(f, ")")
            }
            Stage::Aggregate { by, aggregates } => {
                write!(f, "Aggregate(By(")?;
                write_mapping(f, by.keys.iter())?;
                write!(f, "), ")?;
                write_mapping(f, aggregates.iter())?;
                write!(f, ")")
            }
            Stage::Slice { start, stop } => {
                let fmt_bound = |b: &Option<i64>| b.map(|b| b.to_string()).unwrap_or_default();
                write!(f, "Slice({}:{})", fmt_bound(start), fmt_bound(stop))
            }
            Stage::Distinct => write!(f, "Distinct"),
        }
    }
}

fn mapping<K, E>(entries: impl IntoIterator<Item = (K, E)>) -> IndexMap<String, Expression>
where
    K: Into<String>,
    E: Into<Expression>,
{
    entries
        .into_iter()
        .map(|(k, e)| (k.into(), e.into()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    stages: Arc<[Stage]>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stages(stages: impl IntoIterator<Item = Stage>) -> Self {
        Query {
            stages: stages.into_iter().collect(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// New query with `stage` appended.
    pub fn then(&self, stage: Stage) -> Query {
        Query::from_stages(self.stages.iter().cloned().chain([stage]))
    }

    pub fn select<K, E>(&self, entries: impl IntoIterator<Item = (K, E)>) -> Query
    where
        K: Into<String>,
        E: Into<Expression>,
    {
        self.then(Stage::Select(mapping(entries)))
    }

    pub fn select_also<K, E>(&self, entries: impl IntoIterator<Item = (K, E)>) -> Query
    where
        K: Into<String>,
        E: Into<Expression>,
    {
        self.then(Stage::SelectAlso(mapping(entries)))
    }

    pub fn filter(&self, condition: impl Into<Expression>) -> Query {
        self.then(Stage::Where(condition.into()))
    }

    pub fn sort(&self, keys: impl IntoIterator<Item = SortKey>) -> Query {
        self.then(Stage::Sort(keys.into_iter().collect()))
    }

    pub fn aggregate<K>(
        &self,
        by: By,
        aggregates: impl IntoIterator<Item = (K, AggregateFunction)>,
    ) -> Query
    where
        K: Into<String>,
    {
        self.then(Stage::Aggregate {
            by,
            aggregates: aggregates
                .into_iter()
                .map(|(k, agg)| (k.into(), agg))
                .collect(),
        })
    }

    pub fn slice(&self, start: Option<i64>, stop: Option<i64>) -> Query {
        self.then(Stage::Slice { start, stop })
    }

    /// At most `count` records. Counts past `i64::MAX` mean no limit.
    pub fn limit(&self, count: usize) -> Query {
        self.slice(None, Some(i64::try_from(count).unwrap_or(i64::MAX)))
    }

    pub fn distinct(&self) -> Query {
        self.then(Stage::Distinct)
    }
}

impl std::ops::Add for Query {
    type Output = Query;

    fn add(self, rhs: Query) -> Query {
        Query::from_stages(self.stages.iter().chain(rhs.stages.iter()).cloned())
    }
}

impl std::ops::Add<&Query> for &Query {
    type Output = Query;

    fn add(self, rhs: &Query) -> Query {
        Query::from_stages(self.stages.iter().chain(rhs.stages.iter()).cloned())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}
