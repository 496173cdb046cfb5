//! Stage interpreter.
//!
//! Each stage wraps the stream produced by the previous one. Streaming stages
//! (`Select`, `SelectAlso`, `Where`, `Distinct`, non-negative `Slice`) pull one
//! record at a time. Materializing stages (`Sort`, `Aggregate`, negative
//! `Slice`) read their whole input on the first pull.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::trace;
use unison_error::{Result, UnisonError};

use super::aggregate::aggregate;
use super::{Query, SortKey, Stage};
use crate::expr::Expression;
use crate::record::Record;
use crate::scalar::ScalarValue;

pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

impl Query {
    /// Lazily run every stage over `input`.
    ///
    /// Nothing is read from `input` until the returned stream is polled.
    pub fn execute<'a, I>(&self, input: I) -> RecordStream<'a>
    where
        I: IntoIterator<Item = Result<Record>>,
        I::IntoIter: 'a,
    {
        let source: RecordStream<'a> = Box::new(input.into_iter());
        self.stages()
            .iter()
            .fold(source, |stream, stage| execute_stage(stage.clone(), stream))
    }

    /// Run the query and collect every record. The first error wins.
    pub fn collect<I>(&self, input: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        self.execute(input).collect()
    }

    /// Run the query and return its single record.
    pub fn one<I>(&self, input: I) -> Result<Record>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let mut stream = self.execute(input);
        let first = match stream.next() {
            Some(record) => record?,
            None => return Err(UnisonError::NotFound(self.to_string())),
        };
        match stream.next() {
            None => Ok(first),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => Err(UnisonError::MultipleResults(self.to_string())),
        }
    }
}

fn execute_stage<'a>(stage: Stage, input: RecordStream<'a>) -> RecordStream<'a> {
    match stage {
        Stage::Select(mapping) => Box::new(input.map(move |record| project(&mapping, &record?))),
        Stage::SelectAlso(mapping) => Box::new(input.map(move |record| {
            let mut record = record?;
            let extra = project(&mapping, &record)?;
            record.extend(extra);
            Ok(record)
        })),
        Stage::Where(condition) => Box::new(input.filter_map(move |record| {
            let record = match record {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            match condition.evaluate(&record) {
                Ok(value) if value.is_truthy() => Some(Ok(record)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        })),
        Stage::Distinct => {
            let mut seen: HashSet<Vec<(String, ScalarValue)>> = HashSet::new();
            Box::new(input.filter(move |record| match record {
                Ok(record) => seen.insert(
                    record
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ),
                Err(_) => true,
            }))
        }
        Stage::Sort(keys) => Box::new(Deferred::Pending(input, move |input: RecordStream<'a>| {
            sort(&keys, input.collect::<Result<Vec<_>>>()?)
        })),
        Stage::Aggregate { by, aggregates } => {
            Box::new(Deferred::Pending(input, move |input: RecordStream<'a>| {
                aggregate(&by, &aggregates, input)
            }))
        }
        Stage::Slice { start, stop } => {
            if start.unwrap_or(0) >= 0 && stop.unwrap_or(0) >= 0 {
                Box::new(StreamingSlice {
                    input,
                    position: 0,
                    start: usize::try_from(start.unwrap_or(0)).unwrap_or(usize::MAX),
                    stop: stop.map(|s| usize::try_from(s).unwrap_or(usize::MAX)),
                })
            } else {
                Box::new(Deferred::Pending(input, move |input: RecordStream<'a>| {
                    let records = input.collect::<Result<Vec<_>>>()?;
                    Ok(slice_materialized(records, start, stop))
                }))
            }
        }
    }
}

fn project(mapping: &IndexMap<String, Expression>, record: &Record) -> Result<Record> {
    mapping
        .iter()
        .map(|(alias, expr)| Ok((alias.clone(), expr.evaluate(record)?)))
        .collect()
}

/// Stable multi-key sort.
///
/// Keys are applied last to first so the first key ends up primary.
fn sort(keys: &[SortKey], records: Vec<Record>) -> Result<Vec<Record>> {
    let mut keyed = records
        .into_iter()
        .map(|record| {
            let values = keys
                .iter()
                .map(|key| key.expr.evaluate(&record))
                .collect::<Result<Vec<_>>>()?;
            Ok((values, record))
        })
        .collect::<Result<Vec<_>>>()?;

    for (idx, key) in keys.iter().enumerate().rev() {
        if key.ascending {
            keyed.sort_by(|(a, _), (b, _)| a[idx].cmp(&b[idx]));
        } else {
            keyed.sort_by(|(a, _), (b, _)| b[idx].cmp(&a[idx]));
        }
    }

    Ok(keyed.into_iter().map(|(_, record)| record).collect())
}

fn slice_materialized(mut records: Vec<Record>, start: Option<i64>, stop: Option<i64>) -> Vec<Record> {
    let len = records.len() as i64;
    let resolve = |bound: i64| {
        if bound < 0 {
            (len + bound).max(0)
        } else {
            bound.min(len)
        }
    };
    let start = start.map(resolve).unwrap_or(0) as usize;
    let stop = stop.map(resolve).unwrap_or(len) as usize;
    if start >= stop {
        return Vec::new();
    }
    records.truncate(stop);
    records.drain(..start);
    records
}

/// Bounded read over a possibly unbounded stream.
struct StreamingSlice<'a> {
    input: RecordStream<'a>,
    position: usize,
    start: usize,
    stop: Option<usize>,
}

impl Iterator for StreamingSlice<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stop.is_some_and(|stop| self.position >= stop) {
                return None;
            }
            let record = match self.input.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            self.position += 1;
            if self.position > self.start {
                return Some(Ok(record));
            }
        }
    }
}

/// A stage that needs its entire input, run on first pull.
enum Deferred<'a, F> {
    Pending(RecordStream<'a>, F),
    Ready(std::vec::IntoIter<Record>),
    Done,
}

impl<'a, F> Iterator for Deferred<'a, F>
where
    F: FnOnce(RecordStream<'a>) -> Result<Vec<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(self, Deferred::Done) {
            Deferred::Pending(input, materialize) => match materialize(input) {
                Ok(records) => {
                    trace!(records = records.len(), "materialized stage input");
                    *self = Deferred::Ready(records.into_iter());
                    self.next()
                }
                Err(e) => Some(Err(e)),
            },
            Deferred::Ready(mut records) => {
                let next = records.next()?;
                *self = Deferred::Ready(records);
                Some(Ok(next))
            }
            Deferred::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::expr::{eq, var};
    use crate::query::{AggregateFunction, By};
    use crate::record::record;

    fn rows() -> Vec<Result<Record>> {
        vec![
            Ok(record([
                ("toto", "foo".into()),
                ("tata", 42.into()),
                ("price", 10.into()),
                ("tax", 1.196.into()),
            ])),
            Ok(record([
                ("toto", "foo".into()),
                ("tata", 6.into()),
                ("price", 12.into()),
                ("tax", 1.into()),
            ])),
            Ok(record([
                ("toto", "bar".into()),
                ("tata", 42.into()),
                ("price", 5.into()),
                ("tax", 1.196.into()),
            ])),
        ]
    }

    fn approx(value: &ScalarValue) -> f64 {
        value.as_f64().unwrap()
    }

    #[test]
    fn select_replaces_properties() {
        let query = Query::new().select([("toto", var("toto")), ("price", var("price") * var("tax"))]);
        let out = query.collect(rows()).unwrap();

        assert_eq!(3, out.len());
        let expected = [("foo", 11.96), ("foo", 12.0), ("bar", 5.98)];
        for (record, (toto, price)) in out.iter().zip(expected) {
            assert_eq!(vec!["toto", "price"], record.keys().collect::<Vec<_>>());
            assert_eq!(ScalarValue::from(toto), record["toto"]);
            assert!((approx(&record["price"]) - price).abs() < 1e-9);
        }
    }

    #[test]
    fn select_also_merges() {
        let query = Query::new().select_also([("double", var("price") * 2)]);
        let out = query.collect(rows()).unwrap();
        assert_eq!(5, out[0].len());
        assert_eq!(ScalarValue::from(20), out[0]["double"]);
        assert_eq!(ScalarValue::from(42), out[0]["tata"]);
    }

    #[test]
    fn aggregate_example() {
        let query = Query::new().aggregate(
            By::new([("toto", var("toto"))]),
            [("price", AggregateFunction::sum(var("price") * 2))],
        );
        assert_eq!(
            vec![
                record([("toto", "foo".into()), ("price", 44.into())]),
                record([("toto", "bar".into()), ("price", 10.into())]),
            ],
            query.collect(rows()).unwrap()
        );
    }

    #[test]
    fn negative_slice_keeps_relative_order() {
        let query = Query::new()
            .sort([SortKey::desc(var("price"))])
            .slice(Some(-2), None);
        let out = query.collect(rows()).unwrap();
        let prices: Vec<_> = out.iter().map(|r| r["price"].clone()).collect();
        assert_eq!(vec![ScalarValue::from(10), ScalarValue::from(5)], prices);
    }

    #[test]
    fn slice_bounds() {
        let prices = |query: Query| -> Vec<ScalarValue> {
            query
                .collect(rows())
                .unwrap()
                .into_iter()
                .map(|r| r["price"].clone())
                .collect()
        };
        assert_eq!(vec![ScalarValue::from(12)], prices(Query::new().slice(Some(1), Some(2))));
        assert_eq!(vec![ScalarValue::from(10), ScalarValue::from(12)], prices(Query::new().slice(None, Some(-1))));
        assert!(prices(Query::new().slice(Some(2), Some(1))).is_empty());
        assert!(prices(Query::new().slice(Some(-1), Some(-2))).is_empty());
        assert_eq!(3, prices(Query::new().slice(Some(-10), None)).len());
        assert_eq!(3, prices(Query::new().limit(10)).len());
        assert_eq!(3, prices(Query::new().limit(usize::MAX)).len());
    }

    #[test]
    fn select_then_filter_fails() {
        let query = Query::new()
            .select([("price", var("price"))])
            .filter(eq(var("toto"), "foo"));
        let err = query.collect(rows()).unwrap_err();
        assert!(matches!(err, UnisonError::MissingVariable(name) if name == "toto"));
    }

    #[test]
    fn multi_key_sort() {
        let query = Query::new().sort([SortKey::desc(var("tata")), SortKey::asc(var("price"))]);
        let out = query.collect(rows()).unwrap();
        let prices: Vec<_> = out.iter().map(|r| r["price"].clone()).collect();
        assert_eq!(
            vec![ScalarValue::from(5), ScalarValue::from(10), ScalarValue::from(12)],
            prices
        );
    }

    #[test]
    fn distinct_drops_repeats() {
        let query = Query::new().select([("toto", var("toto"))]).distinct();
        assert_eq!(
            vec![record([("toto", "foo".into())]), record([("toto", "bar".into())])],
            query.collect(rows()).unwrap()
        );
    }

    #[test]
    fn one_result() {
        let query = Query::new().filter(eq(var("price"), 12));
        assert_eq!(ScalarValue::from(6), query.one(rows()).unwrap()["tata"]);

        let none = Query::new().filter(eq(var("price"), 99));
        assert!(matches!(none.one(rows()), Err(UnisonError::NotFound(_))));

        let many = Query::new().filter(eq(var("toto"), "foo"));
        assert!(matches!(many.one(rows()), Err(UnisonError::MultipleResults(_))));
    }

    #[test]
    fn streaming_stages_are_lazy() {
        let pulled = Rc::new(Cell::new(0));
        let counter = pulled.clone();
        let source = (0..).map(move |i: i64| {
            counter.set(counter.get() + 1);
            Ok(record([("n", i.into())]))
        });

        let query = Query::new().filter(var("n") % 2).limit(3);
        let mut stream = query.execute(source);
        assert_eq!(0, pulled.get());

        assert_eq!(ScalarValue::from(1), stream.next().unwrap().unwrap()["n"]);
        assert_eq!(2, pulled.get());

        // Abandoning the stream midway is fine.
        drop(stream);
        assert_eq!(2, pulled.get());
    }

    #[test]
    fn materializing_stages_defer_reading() {
        let pulled = Rc::new(Cell::new(0));
        let counter = pulled.clone();
        let source = (0..4).map(move |i: i64| {
            counter.set(counter.get() + 1);
            Ok(record([("n", i.into())]))
        });

        let query = Query::new().sort([SortKey::desc(var("n"))]);
        let mut stream = query.execute(source);
        assert_eq!(0, pulled.get());
        assert_eq!(ScalarValue::from(3), stream.next().unwrap().unwrap()["n"]);
        assert_eq!(4, pulled.get());
    }

    #[test]
    fn errors_pass_through() {
        let source: Vec<Result<Record>> = vec![
            Ok(record([("n", 1.into())])),
            Err(UnisonError::NotFound("boom".to_string())),
        ];
        let query = Query::new().slice(Some(1), None);
        assert!(matches!(query.collect(source), Err(UnisonError::NotFound(_))));
    }
}
