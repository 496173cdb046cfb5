use std::fmt::Debug;
use std::sync::Arc;

use unison_core::condition::BooleanNode;
use unison_core::record::Record;
use unison_error::{Result, UnisonError};

use crate::descriptor::AccessPointDescriptor;

/// An item as stored by an access point, keyed by property name.
///
/// Many-to-one relation properties hold the remote identity key.
pub type Item = Record;

pub type ItemStream<'a> = Box<dyn Iterator<Item = Result<Item>> + 'a>;

/// How much of a condition an access point evaluates natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pushdown {
    /// Matching items are exactly the items satisfying the condition.
    Exact,
    /// The access point may return extra items, the condition is re-checked.
    Inexact,
    /// The condition is evaluated in memory only.
    Unsupported,
}

/// A named collection backed by some storage.
pub trait AccessPoint: Debug + Sync + Send {
    fn descriptor(&self) -> &AccessPointDescriptor;

    /// Asked once per top-level conjunct before searching.
    fn supports_condition(&self, _condition: &BooleanNode) -> Pushdown {
        Pushdown::Unsupported
    }

    /// Items matching `condition`.
    ///
    /// Only conditions previously accepted by `supports_condition` are passed
    /// in, `And()` means every item.
    fn search(&self, condition: &BooleanNode) -> Result<ItemStream<'_>>;

    fn save(&self, _item: Item) -> Result<()> {
        Err(UnisonError::InvalidOperation(format!(
            "Access point '{}' does not support saves",
            self.descriptor().name
        )))
    }

    fn delete(&self, _item: &Item) -> Result<()> {
        Err(UnisonError::InvalidOperation(format!(
            "Access point '{}' does not support deletes",
            self.descriptor().name
        )))
    }

    /// Delete every item matching `condition`, returning how many were deleted.
    fn delete_many(&self, condition: &BooleanNode) -> Result<usize> {
        let items = self.search(condition)?.collect::<Result<Vec<_>>>()?;
        for item in &items {
            self.delete(item)?;
        }
        Ok(items.len())
    }
}

impl<A: AccessPoint + ?Sized> AccessPoint for Arc<A> {
    fn descriptor(&self) -> &AccessPointDescriptor {
        self.as_ref().descriptor()
    }

    fn supports_condition(&self, condition: &BooleanNode) -> Pushdown {
        self.as_ref().supports_condition(condition)
    }

    fn search(&self, condition: &BooleanNode) -> Result<ItemStream<'_>> {
        self.as_ref().search(condition)
    }

    fn save(&self, item: Item) -> Result<()> {
        self.as_ref().save(item)
    }

    fn delete(&self, item: &Item) -> Result<()> {
        self.as_ref().delete(item)
    }

    fn delete_many(&self, condition: &BooleanNode) -> Result<usize> {
        self.as_ref().delete_many(condition)
    }
}
