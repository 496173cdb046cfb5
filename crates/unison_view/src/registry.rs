use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::debug;
use unison_core::condition::{BooleanNode, split_conjunction};
use unison_core::config::SessionConfig;
use unison_core::expr::{Expression, and, lit};
use unison_core::isolate::isolate_query;
use unison_core::query::{Query, RecordStream};
use unison_error::{Result, UnisonError};

use crate::access_point::{AccessPoint, Item, ItemStream, Pushdown};
use crate::descriptor::{AccessPointDescriptor, validate_relations};
use crate::view::{ViewRequest, resolve_view};

/// A condition split by what the access point agreed to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Sent to `search`.
    pub pushed: BooleanNode,
    /// Checked in memory on every returned item.
    pub residual: BooleanNode,
}

/// Ask `access_point` about each top-level conjunct of `condition`.
///
/// A conjunct is never dropped: it is pushed, checked in memory, or both.
pub fn negotiate(
    access_point: &dyn AccessPoint,
    condition: &BooleanNode,
    config: &SessionConfig,
) -> Negotiated {
    let mut conjuncts = Vec::new();
    split_conjunction(condition.simplify(), &mut conjuncts);

    let mut pushed = Vec::new();
    let mut residual = Vec::new();
    for conjunct in conjuncts {
        let support = if config.enable_pushdown {
            access_point.supports_condition(&conjunct)
        } else {
            Pushdown::Unsupported
        };

        match support {
            Pushdown::Exact if !config.verify_pushdown => pushed.push(conjunct),
            Pushdown::Exact | Pushdown::Inexact => {
                pushed.push(conjunct.clone());
                residual.push(conjunct);
            }
            Pushdown::Unsupported => residual.push(conjunct),
        }
    }

    Negotiated {
        pushed: BooleanNode::And(pushed).simplify(),
        residual: BooleanNode::And(residual).simplify(),
    }
}

/// Search with the pushed part and filter out items failing the residual.
pub(crate) fn negotiated_search<'a>(
    access_point: &'a dyn AccessPoint,
    negotiated: &Negotiated,
) -> Result<ItemStream<'a>> {
    debug!(
        access_point = %access_point.descriptor().name,
        pushed = %negotiated.pushed,
        residual = %negotiated.residual,
        "searching access point"
    );

    let items = access_point.search(&negotiated.pushed)?;
    if negotiated.residual.is_always_true() {
        return Ok(items);
    }

    // Evaluated as an expression so regex patterns are compiled once.
    let residual = negotiated.residual.to_expression();
    Ok(Box::new(items.filter_map(move |item| {
        let item = match item {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        };
        match residual.evaluate(&item) {
            Ok(value) if value.is_truthy() => Some(Ok(item)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    })))
}

/// Owns every access point of a schema by name.
#[derive(Debug, Default)]
pub struct Registry {
    access_points: IndexMap<String, Box<dyn AccessPoint>>,
    config: SessionConfig,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    /// Register an access point. Names must be unique.
    pub fn with_access_point(mut self, access_point: impl AccessPoint + 'static) -> Result<Self> {
        let descriptor = access_point.descriptor();
        descriptor.validate()?;

        let name = descriptor.name.clone();
        if self.access_points.contains_key(&name) {
            return Err(UnisonError::InvalidOperation(format!(
                "Duplicate access point '{name}'"
            )));
        }
        self.access_points.insert(name, Box::new(access_point));
        Ok(self)
    }

    /// Check that every relation targets a registered access point.
    pub fn validate(&self) -> Result<()> {
        validate_relations(
            self.access_points.values().map(|ap| ap.descriptor()),
            |name| self.access_points.get(name).map(|ap| ap.descriptor()),
        )
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.access_points.keys().map(|s| s.as_str())
    }

    pub fn access_point(&self, name: &str) -> Result<&dyn AccessPoint> {
        self.access_points
            .get(name)
            .map(|ap| ap.as_ref())
            .ok_or_else(|| UnisonError::UnknownAccessPoint(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Result<&AccessPointDescriptor> {
        Ok(self.access_point(name)?.descriptor())
    }

    /// Items of one access point matching `condition`.
    ///
    /// Condition paths must name stored properties of the access point.
    pub fn search(&self, name: &str, condition: &BooleanNode) -> Result<ItemStream<'_>> {
        let access_point = self.access_point(name)?;
        check_local_condition(access_point.descriptor(), condition)?;
        let negotiated = negotiate(access_point, condition, &self.config);
        negotiated_search(access_point, &negotiated)
    }

    /// The only item matching `condition`.
    pub fn open(&self, name: &str, condition: &BooleanNode) -> Result<Item> {
        let mut items = self.search(name, condition)?;
        let describe = || format!("{name} where {condition}");

        let item = match items.next() {
            Some(item) => item?,
            None => return Err(UnisonError::NotFound(describe())),
        };
        match items.next() {
            None => Ok(item),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => Err(UnisonError::MultipleResults(describe())),
        }
    }

    /// Run `query` over the items of one access point.
    ///
    /// Filters in the leading run of `Where` stages that only reference stored
    /// properties are negotiated with the access point.
    pub fn query(&self, name: &str, query: &Query) -> Result<RecordStream<'_>> {
        let access_point = self.access_point(name)?;
        let names: BTreeSet<String> = access_point
            .descriptor()
            .stored_properties()
            .map(|p| p.name.clone())
            .collect();

        let (local, remaining) = isolate_query(query, &names);
        let (condition, leftover) = split_convertible(&local);
        let remaining = if leftover.is_true_literal() {
            remaining
        } else {
            Query::new().filter(leftover) + remaining
        };

        debug!(access_point = %name, %condition, %remaining, "running query");

        let negotiated = negotiate(access_point, &condition, &self.config);
        let items = negotiated_search(access_point, &negotiated)?;
        Ok(remaining.execute(items))
    }

    pub fn save(&self, name: &str, item: Item) -> Result<()> {
        let access_point = self.access_point(name)?;
        let descriptor = access_point.descriptor();
        for key in item.keys() {
            if !descriptor.property(key).is_some_and(|p| p.is_stored()) {
                return Err(UnisonError::bad_query(
                    format!("{name}.{key}"),
                    format!("'{key}' is not a stored property of '{name}'"),
                ));
            }
        }
        debug!(access_point = %name, "saving item");
        access_point.save(item)
    }

    pub fn delete(&self, name: &str, item: &Item) -> Result<()> {
        debug!(access_point = %name, "deleting item");
        self.access_point(name)?.delete(item)
    }

    /// Delete every item matching `condition`, returning the count.
    pub fn delete_many(&self, name: &str, condition: &BooleanNode) -> Result<usize> {
        let access_point = self.access_point(name)?;
        check_local_condition(access_point.descriptor(), condition)?;
        let negotiated = negotiate(access_point, condition, &self.config);

        if negotiated.residual.is_always_true() {
            debug!(access_point = %name, pushed = %negotiated.pushed, "deleting matching items");
            return access_point.delete_many(&negotiated.pushed);
        }

        let items = negotiated_search(access_point, &negotiated)?.collect::<Result<Vec<_>>>()?;
        for item in &items {
            access_point.delete(item)?;
        }
        Ok(items.len())
    }

    /// Resolve a view across access points.
    pub fn view(&self, request: &ViewRequest) -> Result<RecordStream<'_>> {
        resolve_view(self, request)
    }
}

fn check_local_condition(descriptor: &AccessPointDescriptor, condition: &BooleanNode) -> Result<()> {
    condition.for_each_condition(&mut |cond| {
        cond.path.validate()?;
        let stored = match cond.path.segments() {
            [name] => descriptor.property(name).is_some_and(|p| p.is_stored()),
            _ => false,
        };
        if !stored {
            return Err(UnisonError::bad_query(
                cond.to_string(),
                format!("no stored property '{}' on '{}'", cond.path, descriptor.name),
            ));
        }
        Ok(())
    })
}

/// Split a conjunction into the conjuncts expressible as conditions and the
/// rest.
fn split_convertible(expr: &Expression) -> (BooleanNode, Expression) {
    match expr.as_and() {
        Some(args) => {
            let mut conditions = Vec::new();
            let mut leftover = lit(true);
            for arg in args {
                let (condition, rest) = split_convertible(arg);
                conditions.push(condition);
                leftover = and(leftover, rest);
            }
            (BooleanNode::And(conditions).simplify(), leftover)
        }
        None => match BooleanNode::try_from(expr) {
            Ok(condition) => (condition, lit(true)),
            Err(_) => (BooleanNode::always_true(), expr.clone()),
        },
    }
}
