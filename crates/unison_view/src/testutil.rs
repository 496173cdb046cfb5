//! In-memory access point for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use unison_core::condition::BooleanNode;
use unison_core::scalar::ScalarValue;
use unison_error::{Result, UnisonError};

use crate::access_point::{AccessPoint, Item, ItemStream, Pushdown};
use crate::descriptor::AccessPointDescriptor;

/// Access point over a vector of items.
///
/// Pushdown support is configurable per property. A search with a condition
/// it only supports inexactly returns every item, leaving filtering to the
/// caller.
#[derive(Debug)]
pub struct MemoryAccessPoint {
    descriptor: AccessPointDescriptor,
    items: RwLock<Vec<Item>>,
    default_pushdown: Pushdown,
    pushdown: HashMap<String, Pushdown>,
    searches: AtomicUsize,
}

impl MemoryAccessPoint {
    pub fn new(descriptor: AccessPointDescriptor) -> Self {
        MemoryAccessPoint {
            descriptor,
            items: RwLock::new(Vec::new()),
            default_pushdown: Pushdown::Exact,
            pushdown: HashMap::new(),
            searches: AtomicUsize::new(0),
        }
    }

    pub fn with_items(self, items: impl IntoIterator<Item = Item>) -> Self {
        {
            let mut stored = self.items.write();
            for item in items {
                stored.push(self.normalize(item));
            }
        }
        self
    }

    /// Pushdown answer for properties without a specific override.
    pub fn with_default_pushdown(mut self, pushdown: Pushdown) -> Self {
        self.default_pushdown = pushdown;
        self
    }

    pub fn with_pushdown(mut self, property: impl Into<String>, pushdown: Pushdown) -> Self {
        self.pushdown.insert(property.into(), pushdown);
        self
    }

    /// Number of `search` calls so far.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.read().clone()
    }

    /// Fill undeclared stored properties with `Null`.
    fn normalize(&self, mut item: Item) -> Item {
        for prop in self.descriptor.stored_properties() {
            if !item.contains_key(&prop.name) {
                item.insert(prop.name.clone(), ScalarValue::Null);
            }
        }
        item
    }

    fn identity_of(&self, item: &Item) -> Vec<ScalarValue> {
        self.descriptor
            .identity_properties
            .iter()
            .map(|name| item.get(name).cloned().unwrap_or(ScalarValue::Null))
            .collect()
    }

    fn pushdown_for(&self, property: &str) -> Pushdown {
        self.pushdown
            .get(property)
            .copied()
            .unwrap_or(self.default_pushdown)
    }
}

impl AccessPoint for MemoryAccessPoint {
    fn descriptor(&self) -> &AccessPointDescriptor {
        &self.descriptor
    }

    fn supports_condition(&self, condition: &BooleanNode) -> Pushdown {
        let mut support = Pushdown::Exact;
        // Infallible visitor.
        let _ = condition.for_each_condition(&mut |cond| {
            let prop = cond.path.first().unwrap_or_default();
            support = match (support, self.pushdown_for(prop)) {
                (Pushdown::Unsupported, _) | (_, Pushdown::Unsupported) => Pushdown::Unsupported,
                (Pushdown::Inexact, _) | (_, Pushdown::Inexact) => Pushdown::Inexact,
                _ => Pushdown::Exact,
            };
            Ok(())
        });
        support
    }

    fn search(&self, condition: &BooleanNode) -> Result<ItemStream<'_>> {
        self.searches.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.items.read().clone();
        if self.supports_condition(condition) != Pushdown::Exact {
            return Ok(Box::new(snapshot.into_iter().map(Ok)));
        }

        let condition = condition.clone();
        Ok(Box::new(snapshot.into_iter().filter_map(move |item| {
            match condition.evaluate(&item) {
                Ok(true) => Some(Ok(item)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            }
        })))
    }

    fn save(&self, item: Item) -> Result<()> {
        let item = self.normalize(item);
        let identity = self.identity_of(&item);

        let mut items = self.items.write();
        match items.iter_mut().find(|existing| self.identity_of(existing) == identity) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        Ok(())
    }

    fn delete(&self, item: &Item) -> Result<()> {
        let identity = self.identity_of(item);

        let mut items = self.items.write();
        let before = items.len();
        items.retain(|existing| self.identity_of(existing) != identity);
        if items.len() == before {
            return Err(UnisonError::NotFound(format!(
                "{} item {}",
                self.descriptor.name,
                ScalarValue::List(identity)
            )));
        }
        Ok(())
    }
}
