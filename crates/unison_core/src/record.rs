use indexmap::IndexMap;

use crate::scalar::ScalarValue;

/// A flat record keyed by property (or alias) name, in insertion order.
pub type Record = IndexMap<String, ScalarValue>;

/// Build a record from `(name, value)` pairs.
pub fn record<K: Into<String>>(entries: impl IntoIterator<Item = (K, ScalarValue)>) -> Record {
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
