use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use unison_error::{Result, UnisonError};

/// A single value flowing through expressions, conditions and records.
///
/// `Null` is also the "missing" marker used when a relation has no related
/// item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Ordered values, used for composite identity keys.
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Truthiness used by boolean combinators and filters.
    pub fn is_truthy(&self) -> bool {
        match self {
            ScalarValue::Null => false,
            ScalarValue::Boolean(b) => *b,
            ScalarValue::Int64(v) => *v != 0,
            ScalarValue::Float64(v) => *v != 0.0,
            ScalarValue::Utf8(s) => !s.is_empty(),
            ScalarValue::Date(_) | ScalarValue::Timestamp(_) => true,
            ScalarValue::List(vals) => !vals.is_empty(),
        }
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            ScalarValue::Utf8(s) => Ok(s),
            other => Err(UnisonError::InvalidOperation(format!(
                "Expected a string, got {other}"
            ))),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            ScalarValue::Int64(v) => Ok(*v),
            other => Err(UnisonError::InvalidOperation(format!(
                "Expected an integer, got {other}"
            ))),
        }
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            ScalarValue::Boolean(v) => Ok(*v),
            other => Err(UnisonError::InvalidOperation(format!(
                "Expected a boolean, got {other}"
            ))),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Rank of the value's type in the total order.
    const fn type_rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Boolean(_) => 1,
            ScalarValue::Int64(_) | ScalarValue::Float64(_) => 2,
            ScalarValue::Utf8(_) => 3,
            ScalarValue::Date(_) => 4,
            ScalarValue::Timestamp(_) => 5,
            ScalarValue::List(_) => 6,
        }
    }
}

/// Returns the float as an integer when it holds an exact, in-range integral
/// value.
fn integral(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    // Treats 0.0 and -0.0 as equal, NaN falls back to the total order.
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

fn cmp_int_float(a: i64, b: f64) -> Ordering {
    match integral(b) {
        Some(b) => a.cmp(&b),
        None => cmp_f64(a as f64, b),
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use ScalarValue::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Int64(a), Float64(b)) => cmp_int_float(*a, *b),
            (Float64(a), Int64(b)) => cmp_int_float(*b, *a).reverse(),
            (Float64(a), Float64(b)) => cmp_f64(*a, *b),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            ScalarValue::Null => (),
            ScalarValue::Boolean(v) => v.hash(state),
            ScalarValue::Int64(v) => v.hash(state),
            // Integral floats must hash like the equal integer.
            ScalarValue::Float64(v) => match integral(*v) {
                Some(i) => i.hash(state),
                None => v.to_bits().hash(state),
            },
            ScalarValue::Utf8(v) => v.hash(state),
            ScalarValue::Date(v) => v.hash(state),
            ScalarValue::Timestamp(v) => v.hash(state),
            ScalarValue::List(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "None"),
            ScalarValue::Boolean(true) => write!(f, "True"),
            ScalarValue::Boolean(false) => write!(f, "False"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v:?}"),
            ScalarValue::Utf8(s) => {
                write!(f, "'")?;
                for c in s.chars() {
                    if c == '\'' || c == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "'")
            }
            ScalarValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            ScalarValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            ScalarValue::List(vals) => {
                write!(f, "(")?;
                for (idx, val) in vals.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{val}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl From<NaiveDate> for ScalarValue {
    fn from(value: NaiveDate) -> Self {
        ScalarValue::Date(value)
    }
}

impl From<NaiveDateTime> for ScalarValue {
    fn from(value: NaiveDateTime) -> Self {
        ScalarValue::Timestamp(value)
    }
}

impl From<Vec<ScalarValue>> for ScalarValue {
    fn from(value: Vec<ScalarValue>) -> Self {
        ScalarValue::List(value)
    }
}

impl<T> From<Option<T>> for ScalarValue
where
    T: Into<ScalarValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => ScalarValue::Null,
        }
    }
}
