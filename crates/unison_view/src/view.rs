//! Views spanning several access points.
//!
//! A view maps aliases to dotted property paths starting at a root access
//! point. Resolution walks the paths into a tree with one node per relation,
//! isolates the part of the condition each node can answer, then searches the
//! root and resolves every branch for each root item. One-to-many branches
//! multiply rows; a branch without any related item contributes a single row
//! of `Null` values. The rows produced are the same whether a condition
//! fragment is pushed into a branch or evaluated on the flattened row.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::{debug, trace};
use unison_core::condition::{BooleanNode, Condition, PropertiesTree, PropertyPath};
use unison_core::config::SessionConfig;
use unison_core::expr::{ComparisonOperator, EvalContext, Expression};
use unison_core::isolate::isolate_expression;
use unison_core::query::{Query, RecordStream};
use unison_core::record::Record;
use unison_core::scalar::ScalarValue;
use unison_error::{Result, UnisonError, internal};

use crate::access_point::{AccessPoint, Item, ItemStream};
use crate::descriptor::{AccessPointDescriptor, Cardinality};
use crate::registry::{Registry, negotiate, negotiated_search};

/// What to resolve: aliases and a condition over paths from `access_point`,
/// followed by a query over the aliased records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRequest {
    pub access_point: String,
    /// Alias to dotted path. A path ending in `*` expands to every stored
    /// property reached by its prefix, each aliased as `alias` + name.
    pub aliases: IndexMap<String, String>,
    pub condition: BooleanNode,
    pub query: Query,
}

impl ViewRequest {
    pub fn new(access_point: impl Into<String>) -> Self {
        ViewRequest {
            access_point: access_point.into(),
            aliases: IndexMap::new(),
            condition: BooleanNode::always_true(),
            query: Query::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>, path: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), path.into());
        self
    }

    /// Conjoin `condition` with the current condition.
    pub fn filter(mut self, condition: BooleanNode) -> Self {
        self.condition = if self.condition.is_always_true() {
            condition
        } else {
            BooleanNode::And(vec![self.condition, condition])
        };
        self
    }

    /// Append `query` to the stages run on the aliased records.
    pub fn then(mut self, query: &Query) -> Self {
        self.query = &self.query + query;
        self
    }
}

impl fmt::Display for ViewRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({}", self.access_point)?;
        for (alias, path) in &self.aliases {
            write!(f, ", {alias}={path}")?;
        }
        write!(f, " WHERE {}", self.condition)?;
        if !self.query.is_empty() {
            write!(f, " | {}", self.query)?;
        }
        write!(f, ")")
    }
}

/// How a branch hangs off its parent.
#[derive(Debug, Clone)]
struct Link {
    /// Relation property on the parent access point.
    property: String,
    cardinality: Cardinality,
    remote_property: Option<String>,
}

#[derive(Debug)]
struct ViewNode<'r> {
    access_point: &'r dyn AccessPoint,
    /// Relation names from the root to this node, empty for the root.
    prefix: PropertyPath,
    link: Option<Link>,
    /// Stored properties copied into the flattened row.
    columns: BTreeSet<String>,
    children: IndexMap<String, ViewNode<'r>>,
    /// Condition fragment answered by this node, with local property names.
    local: BooleanNode,
}

impl<'r> ViewNode<'r> {
    fn new(access_point: &'r dyn AccessPoint, prefix: PropertyPath, link: Option<Link>) -> Self {
        ViewNode {
            access_point,
            prefix,
            link,
            columns: BTreeSet::new(),
            children: IndexMap::new(),
            local: BooleanNode::always_true(),
        }
    }

    fn descriptor(&self) -> &'r AccessPointDescriptor {
        let access_point: &'r dyn AccessPoint = self.access_point;
        access_point.descriptor()
    }

    /// Name of a local property in the flattened row.
    fn qualify(&self, name: &str) -> String {
        self.prefix.child(name).to_string()
    }

    /// Whether a condition fragment was pushed into this subtree.
    fn is_filtered(&self) -> bool {
        !self.local.is_always_true() || self.children.values().any(ViewNode::is_filtered)
    }

    /// Whether the fragments of this subtree hold for a row of `Null`.
    fn accepts_missing(&self) -> Result<bool> {
        if !self.local.evaluate(&MissingItem)? {
            return Ok(false);
        }
        for child in self.children.values() {
            if !child.accepts_missing()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Validate `segments` from this node and record what they need.
    ///
    /// Relations along the way become child nodes, the last segment becomes a
    /// column.
    fn insert(
        &mut self,
        registry: &'r Registry,
        segments: &[String],
        subject: &str,
        max_depth: u64,
    ) -> Result<()> {
        let descriptor = self.descriptor();
        let Some((first, rest)) = segments.split_first() else {
            return Err(UnisonError::bad_query(subject, "empty property path"));
        };
        let Some(prop) = descriptor.property(first) else {
            return Err(UnisonError::bad_query(
                subject,
                format!("no property '{first}' on '{}'", descriptor.name),
            ));
        };

        if rest.is_empty() {
            if !prop.is_stored() {
                return Err(UnisonError::bad_query(
                    subject,
                    format!(
                        "'{first}' is a one-to-many relation of '{}' and has no value",
                        descriptor.name
                    ),
                ));
            }
            self.columns.insert(first.clone());
            return Ok(());
        }

        let Some(relation) = &prop.relation else {
            return Err(UnisonError::bad_query(
                subject,
                format!("'{first}' on '{}' is not a relation", descriptor.name),
            ));
        };
        if self.prefix.len() as u64 + 1 > max_depth {
            return Err(UnisonError::bad_query(
                subject,
                format!("path follows more than {max_depth} relations"),
            ));
        }

        // Columns the parent needs to find related items.
        match relation.cardinality {
            Cardinality::ManyToOne => {
                self.columns.insert(first.clone());
            }
            Cardinality::OneToMany => {
                self.columns
                    .extend(descriptor.identity_properties.iter().cloned());
            }
        }

        let child = match self.children.entry(first.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let remote = registry.access_point(&relation.remote_access_point)?;
                let link = Link {
                    property: first.clone(),
                    cardinality: relation.cardinality,
                    remote_property: relation.remote_property.clone(),
                };
                entry.insert(ViewNode::new(remote, self.prefix.child(first), Some(link)))
            }
        };
        child.insert(registry, rest, subject, max_depth)
    }

    /// Take the part of `condition` this subtree can answer, returning what is
    /// left.
    ///
    /// Each node gets the fragment referencing only its own properties. The
    /// root is served first, then the branches `tree` names, depth-first.
    fn partition(&mut self, condition: Expression, tree: &PropertiesTree) -> Result<Expression> {
        let names: BTreeSet<String> = self
            .descriptor()
            .stored_properties()
            .map(|p| self.qualify(&p.name))
            .collect();
        let (local, remainder) = isolate_expression(&condition, &names);

        let local = BooleanNode::try_from(&local)
            .map_err(|e| internal!("isolated fragment is not a condition: {e}"))?;
        let prefix = self.prefix.clone();
        self.local = local
            .map_conditions(&mut |cond| Condition {
                path: cond.path.strip_prefix(&prefix).unwrap_or_else(|| cond.path.clone()),
                op: cond.op,
                value: cond.value.clone(),
            })
            .simplify();

        let mut remainder = remainder;
        for (name, child) in self.children.iter_mut() {
            if let Some(subtree) = tree.get(name) {
                remainder = child.partition(remainder, subtree)?;
            }
        }
        Ok(remainder)
    }

    fn log_plan(&self, config: &SessionConfig) {
        let negotiated = negotiate(self.access_point, &self.local, config);
        debug!(
            node = %self.prefix,
            access_point = %self.descriptor().name,
            columns = ?self.columns,
            pushed = %negotiated.pushed,
            residual = %negotiated.residual,
            "view node"
        );
        for child in self.children.values() {
            child.log_plan(config);
        }
    }

    /// Flattened rows for one item of this node.
    fn resolve(&self, item: &Item, config: &SessionConfig) -> Result<Vec<Record>> {
        let mut base = Record::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = item.get(column).cloned().unwrap_or(ScalarValue::Null);
            base.insert(self.qualify(column), value);
        }

        let mut rows = vec![base];
        for (name, child) in &self.children {
            let mut branch = child.resolve_branch(self, item, config)?;
            if branch.is_empty() {
                // A row of nulls stands for "no related item at all". Pushed
                // fragments must hold for it, and related items rejected by
                // them must not exist.
                if !child.accepts_missing()? {
                    trace!(relation = %name, "dropping row, missing item fails the condition");
                    return Ok(Vec::new());
                }
                if child.is_filtered() && child.has_related(self, item, config)? {
                    trace!(relation = %name, "dropping row, no related item matches");
                    return Ok(Vec::new());
                }
                trace!(relation = %name, "no related item, filling with nulls");
                branch.push(child.missing_row());
            }

            rows = rows
                .iter()
                .flat_map(|row| {
                    branch.iter().map(move |other| {
                        let mut combined = row.clone();
                        combined.extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
                        combined
                    })
                })
                .collect();
        }

        Ok(rows)
    }

    /// Condition selecting the items of this branch related to
    /// `parent_item`, `None` when the parent holds no key.
    fn link_condition(
        &self,
        parent: &ViewNode<'r>,
        parent_item: &Item,
    ) -> Result<Option<BooleanNode>> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| internal!("branch '{}' without a link", self.prefix))?;

        match link.cardinality {
            Cardinality::ManyToOne => {
                let key = parent_item
                    .get(&link.property)
                    .cloned()
                    .unwrap_or(ScalarValue::Null);
                if key.is_null() {
                    return Ok(None);
                }
                identity_condition(self.descriptor(), key).map(Some)
            }
            Cardinality::OneToMany => {
                let remote_property = link.remote_property.as_ref().ok_or_else(|| {
                    internal!("one-to-many relation '{}' without remote property", link.property)
                })?;
                let key = identity_key(parent.descriptor(), parent_item);
                if key.is_null() {
                    return Ok(None);
                }
                Ok(Some(BooleanNode::condition(
                    remote_property.as_str(),
                    ComparisonOperator::Eq,
                    key,
                )))
            }
        }
    }

    /// Rows of this branch related to `parent_item`.
    fn resolve_branch(
        &self,
        parent: &ViewNode<'r>,
        parent_item: &Item,
        config: &SessionConfig,
    ) -> Result<Vec<Record>> {
        let Some(link_condition) = self.link_condition(parent, parent_item)? else {
            return Ok(Vec::new());
        };

        let mut items = self.search(link_condition, config)?;
        if self.is_many_to_one() {
            let Some(item) = items.next().transpose()? else {
                return Ok(Vec::new());
            };
            if items.next().transpose()?.is_some() {
                return Err(UnisonError::MultipleResults(format!(
                    "{} by identity from '{}'",
                    self.descriptor().name,
                    self.prefix
                )));
            }
            return self.resolve(&item, config);
        }

        let mut rows = Vec::new();
        for item in items {
            rows.extend(self.resolve(&item?, config)?);
        }
        Ok(rows)
    }

    /// Whether any item is related to `parent_item`, ignoring pushed
    /// fragments.
    fn has_related(
        &self,
        parent: &ViewNode<'r>,
        parent_item: &Item,
        config: &SessionConfig,
    ) -> Result<bool> {
        let Some(link_condition) = self.link_condition(parent, parent_item)? else {
            return Ok(false);
        };
        let negotiated = negotiate(self.access_point, &link_condition, config);
        let mut items = negotiated_search(self.access_point, &negotiated)?;
        Ok(items.next().transpose()?.is_some())
    }

    fn is_many_to_one(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.cardinality == Cardinality::ManyToOne)
    }

    fn search(
        &self,
        link_condition: BooleanNode,
        config: &SessionConfig,
    ) -> Result<ItemStream<'r>> {
        let condition = BooleanNode::And(vec![link_condition, self.local.clone()]);
        let negotiated = negotiate(self.access_point, &condition, config);
        negotiated_search(self.access_point, &negotiated)
    }

    /// A row of `Null` for every column of this subtree.
    fn missing_row(&self) -> Record {
        let mut row = Record::new();
        self.fill_missing(&mut row);
        row
    }

    fn fill_missing(&self, row: &mut Record) {
        for column in &self.columns {
            row.insert(self.qualify(column), ScalarValue::Null);
        }
        for child in self.children.values() {
            child.fill_missing(row);
        }
    }
}

/// Context of an item that does not exist, every property is `Null`.
struct MissingItem;

static MISSING: ScalarValue = ScalarValue::Null;

impl EvalContext for MissingItem {
    fn get(&self, _name: &str) -> Option<&ScalarValue> {
        Some(&MISSING)
    }
}

/// Identity key of an item: the single identity value, or a list of them.
fn identity_key(descriptor: &AccessPointDescriptor, item: &Item) -> ScalarValue {
    let mut values: Vec<ScalarValue> = descriptor
        .identity_properties
        .iter()
        .map(|name| item.get(name).cloned().unwrap_or(ScalarValue::Null))
        .collect();
    if values.len() == 1 {
        values.remove(0)
    } else if values.iter().any(|v| v.is_null()) {
        ScalarValue::Null
    } else {
        ScalarValue::List(values)
    }
}

/// Condition selecting the item identified by `key`.
///
/// Errors with `AmbiguousLookup` when the key has fewer values than the
/// identity properties.
fn identity_condition(descriptor: &AccessPointDescriptor, key: ScalarValue) -> Result<BooleanNode> {
    let identity = &descriptor.identity_properties;
    let values = match key {
        ScalarValue::List(values) => values,
        single => vec![single],
    };

    let got = values.iter().filter(|v| !v.is_null()).count();
    if got != identity.len() || values.len() != identity.len() {
        return Err(UnisonError::AmbiguousLookup {
            access_point: descriptor.name.clone(),
            expected: identity.len(),
            got,
        });
    }

    Ok(BooleanNode::And(
        identity
            .iter()
            .zip(values)
            .map(|(name, value)| BooleanNode::condition(name.as_str(), ComparisonOperator::Eq, value))
            .collect(),
    ))
}

/// Alias to full path, with wildcards expanded.
fn expand_aliases(
    registry: &Registry,
    root: &dyn AccessPoint,
    request: &ViewRequest,
) -> Result<IndexMap<String, PropertyPath>> {
    let default_aliases: IndexMap<String, String> = [(String::new(), "*".to_string())].into();
    let aliases = if request.aliases.is_empty() {
        &default_aliases
    } else {
        &request.aliases
    };

    let mut expanded = IndexMap::new();
    for (alias, raw) in aliases {
        let subject = format!("{alias}: {raw}");

        let Some(prefix) = raw.strip_suffix('*') else {
            let path: PropertyPath = raw
                .parse()
                .map_err(|_| UnisonError::bad_query(&subject, "malformed property path"))?;
            expanded.insert(alias.clone(), path);
            continue;
        };

        let prefix = match prefix.strip_suffix('.') {
            Some(prefix) => prefix
                .parse::<PropertyPath>()
                .map_err(|_| UnisonError::bad_query(&subject, "malformed property path"))?,
            None if prefix.is_empty() => PropertyPath::new(Vec::<String>::new()),
            None => return Err(UnisonError::bad_query(&subject, "'*' must follow a '.'")),
        };

        let target = access_point_at(registry, root, &prefix, &subject)?;
        for prop in target.descriptor().stored_properties() {
            expanded.insert(format!("{alias}{}", prop.name), prefix.child(&prop.name));
        }
    }

    Ok(expanded)
}

/// Follow relation names from `root`.
fn access_point_at<'r>(
    registry: &'r Registry,
    root: &'r dyn AccessPoint,
    path: &PropertyPath,
    subject: &str,
) -> Result<&'r dyn AccessPoint> {
    let mut current = root;
    for segment in path.segments() {
        let descriptor = current.descriptor();
        let relation = descriptor
            .property(segment)
            .and_then(|p| p.relation.as_ref())
            .ok_or_else(|| {
                UnisonError::bad_query(
                    subject,
                    format!("no relation '{segment}' on '{}'", descriptor.name),
                )
            })?;
        current = registry.access_point(&relation.remote_access_point)?;
    }
    Ok(current)
}

/// Resolve `request` into a lazy stream of aliased records.
///
/// Every path is validated before anything is searched.
pub(crate) fn resolve_view<'r>(
    registry: &'r Registry,
    request: &ViewRequest,
) -> Result<RecordStream<'r>> {
    let config = registry.config().clone();
    let root_access_point = registry.access_point(&request.access_point)?;
    let mut root = ViewNode::new(root_access_point, PropertyPath::new(Vec::<String>::new()), None);

    let aliases = expand_aliases(registry, root_access_point, request)?;
    for (alias, path) in &aliases {
        let subject = format!("{alias}: {path}");
        root.insert(registry, path.segments(), &subject, config.max_relation_depth)?;
    }

    let condition = request.condition.simplify();
    condition.for_each_condition(&mut |cond| {
        let subject = cond.to_string();
        cond.path.validate()?;
        root.insert(registry, cond.path.segments(), &subject, config.max_relation_depth)
    })?;

    let remainder = root.partition(condition.to_expression(), &condition.properties_tree())?;
    debug!(view = %request, %remainder, "resolving view");
    root.log_plan(&config);

    let root_negotiated = negotiate(root.access_point, &root.local, &config);
    let items = negotiated_search(root.access_point, &root_negotiated)?;

    let rows = items.flat_map(move |item| -> RecordStream<'r> {
        match item.and_then(|item| root.resolve(&item, &config)) {
            Ok(rows) => Box::new(rows.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    });

    let filtered: RecordStream<'r> = if remainder.is_true_literal() {
        Box::new(rows)
    } else {
        Box::new(rows.filter_map(move |row| {
            let row = match row {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            match remainder.evaluate(&row) {
                Ok(value) if value.is_truthy() => Some(Ok(row)),
                Ok(_) => {
                    trace!("row rejected by remainder");
                    None
                }
                Err(e) => Some(Err(e)),
            }
        }))
    };

    let projection: HashMap<String, String> = aliases
        .iter()
        .map(|(alias, path)| (alias.clone(), path.to_string()))
        .collect();
    let order: Vec<String> = aliases.keys().cloned().collect();
    let projected = filtered.map(move |row| {
        let row = row?;
        Ok(order
            .iter()
            .map(|alias| {
                let value = projection
                    .get(alias)
                    .and_then(|path| row.get(path))
                    .cloned()
                    .unwrap_or(ScalarValue::Null);
                (alias.clone(), value)
            })
            .collect::<Record>())
    });

    Ok(request.query.execute(projected))
}

#[cfg(test)]
mod tests {
    use unison_core::record::record;

    use super::*;
    use crate::access_point::Pushdown;
    use crate::descriptor::RelationDescriptor;
    use crate::testutil::MemoryAccessPoint;

    fn registry() -> Registry {
        let parent = AccessPointDescriptor::new("parent")
            .with_property("id")
            .with_property("label")
            .with_relation("children", RelationDescriptor::one_to_many("child", "parent"))
            .with_identity(["id"]);
        let child = AccessPointDescriptor::new("child")
            .with_property("id")
            .with_property("label")
            .with_relation("parent", RelationDescriptor::many_to_one("parent"))
            .with_identity(["id"]);

        Registry::new()
            .with_access_point(MemoryAccessPoint::new(parent).with_items([
                record([("id", 1.into()), ("label", "p1".into())]),
                record([("id", 2.into()), ("label", "p2".into())]),
            ]))
            .unwrap()
            .with_access_point(
                MemoryAccessPoint::new(child)
                    .with_default_pushdown(Pushdown::Inexact)
                    .with_items([
                        record([("id", 10.into()), ("label", "c10".into()), ("parent", 1.into())]),
                        record([("id", 11.into()), ("label", "c11".into()), ("parent", 1.into())]),
                        record([("id", 12.into()), ("label", "c12".into()), ("parent", ScalarValue::Null)]),
                    ]),
            )
            .unwrap()
    }

    fn collect(registry: &Registry, request: &ViewRequest) -> Vec<Record> {
        registry
            .view(request)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn identity_key_shapes() {
        let descriptor = AccessPointDescriptor::new("pair")
            .with_property("a")
            .with_property("b")
            .with_identity(["a", "b"]);
        let item = record([("a", 1.into()), ("b", "x".into())]);
        assert_eq!(
            ScalarValue::List(vec![1.into(), "x".into()]),
            identity_key(&descriptor, &item)
        );
        assert!(identity_condition(&descriptor, ScalarValue::List(vec![1.into(), "x".into()])).is_ok());

        let err = identity_condition(&descriptor, 1.into()).unwrap_err();
        assert!(matches!(
            err,
            UnisonError::AmbiguousLookup { expected: 2, got: 1, .. }
        ));
    }

    #[test]
    fn wildcard_skips_one_to_many() {
        let registry = registry();
        let aliases = expand_aliases(
            &registry,
            registry.access_point("parent").unwrap(),
            &ViewRequest::new("parent").alias("", "*").alias("c_", "children.*"),
        )
        .unwrap();
        let keys: Vec<_> = aliases.keys().map(|s| s.as_str()).collect();
        assert_eq!(vec!["id", "label", "c_id", "c_label", "c_parent"], keys);
        assert_eq!(PropertyPath::from("children.parent"), aliases["c_parent"]);
    }

    #[test]
    fn left_join_fills_nulls() {
        let registry = registry();
        let request = ViewRequest::new("parent")
            .alias("name", "label")
            .alias("child", "children.label");
        assert_eq!(
            vec![
                record([("name", "p1".into()), ("child", "c10".into())]),
                record([("name", "p1".into()), ("child", "c11".into())]),
                record([("name", "p2".into()), ("child", ScalarValue::Null)]),
            ],
            collect(&registry, &request)
        );
    }

    #[test]
    fn pushed_branch_condition_drops_parent() {
        let registry = registry();
        let request = ViewRequest::new("parent")
            .alias("name", "label")
            .alias("child", "children.label")
            .filter(BooleanNode::condition("children.label", ComparisonOperator::Eq, "c11"));
        assert_eq!(
            vec![record([("name", "p1".into()), ("child", "c11".into())])],
            collect(&registry, &request)
        );
    }

    #[test]
    fn pushed_and_evaluated_fragments_agree() {
        let registry = registry();
        let label = |op, value: &str| BooleanNode::condition("children.label", op, value);
        let conditions = [
            label(ComparisonOperator::NotEq, "c10"),
            !label(ComparisonOperator::Eq, "c10"),
            label(ComparisonOperator::Eq, "c11"),
            !label(ComparisonOperator::Match, "^c1"),
            BooleanNode::condition("children.label", ComparisonOperator::Eq, ScalarValue::Null),
        ];

        for condition in conditions {
            let request = |condition: BooleanNode| {
                ViewRequest::new("parent")
                    .alias("name", "label")
                    .alias("child", "children.label")
                    .filter(condition)
            };
            // The disjunction spans both nodes, so nothing is pushed.
            let unpushable =
                condition.clone() | BooleanNode::condition("id", ComparisonOperator::Eq, 999);
            assert_eq!(
                collect(&registry, &request(unpushable)),
                collect(&registry, &request(condition.clone())),
                "{condition}"
            );
        }

        let request = ViewRequest::new("parent")
            .alias("name", "label")
            .alias("child", "children.label")
            .filter(label(ComparisonOperator::NotEq, "c10"));
        assert_eq!(
            vec![
                record([("name", "p1".into()), ("child", "c11".into())]),
                record([("name", "p2".into()), ("child", ScalarValue::Null)]),
            ],
            collect(&registry, &request)
        );
    }

    fn chain() -> Registry {
        let a = AccessPointDescriptor::new("a")
            .with_property("id")
            .with_relation("b", RelationDescriptor::many_to_one("b"))
            .with_identity(["id"]);
        let b = AccessPointDescriptor::new("b")
            .with_property("id")
            .with_relation("c", RelationDescriptor::many_to_one("c"))
            .with_identity(["id"]);
        let c = AccessPointDescriptor::new("c")
            .with_property("id")
            .with_property("name")
            .with_identity(["id"]);

        Registry::new()
            .with_access_point(MemoryAccessPoint::new(a).with_items([
                record([("id", 1.into()), ("b", 2.into())]),
                record([("id", 4.into()), ("b", ScalarValue::Null)]),
            ]))
            .unwrap()
            .with_access_point(
                MemoryAccessPoint::new(b).with_items([record([("id", 2.into()), ("c", 3.into())])]),
            )
            .unwrap()
            .with_access_point(
                MemoryAccessPoint::new(c)
                    .with_items([record([("id", 3.into()), ("name", "y".into())])]),
            )
            .unwrap()
    }

    #[test]
    fn grandchild_condition_filters_root() {
        let registry = chain();
        let request = |op, value: &str| {
            ViewRequest::new("a")
                .alias("id", "id")
                .alias("cname", "b.c.name")
                .filter(BooleanNode::condition("b.c.name", op, value))
        };

        assert!(collect(&registry, &request(ComparisonOperator::Eq, "x")).is_empty());
        assert_eq!(
            vec![record([("id", 1.into()), ("cname", "y".into())])],
            collect(&registry, &request(ComparisonOperator::Eq, "y"))
        );
        assert_eq!(
            vec![
                record([("id", 1.into()), ("cname", "y".into())]),
                record([("id", 4.into()), ("cname", ScalarValue::Null)]),
            ],
            collect(&registry, &request(ComparisonOperator::NotEq, "x"))
        );
        assert_eq!(
            vec![record([("id", 4.into()), ("cname", ScalarValue::Null)])],
            collect(&registry, &request(ComparisonOperator::NotEq, "y"))
        );
    }

    #[test]
    fn many_to_one_missing_is_null() {
        let registry = registry();
        let request = ViewRequest::new("child")
            .alias("name", "label")
            .alias("parent", "parent.label");
        assert_eq!(
            vec![
                record([("name", "c10".into()), ("parent", "p1".into())]),
                record([("name", "c11".into()), ("parent", "p1".into())]),
                record([("name", "c12".into()), ("parent", ScalarValue::Null)]),
            ],
            collect(&registry, &request)
        );
    }

    #[test]
    fn remainder_spans_nodes() {
        let registry = registry();
        let request = ViewRequest::new("child")
            .alias("name", "label")
            .filter(
                BooleanNode::condition("label", ComparisonOperator::Eq, "c12")
                    | BooleanNode::condition("parent.label", ComparisonOperator::Eq, "p1"),
            )
            .then(&Query::new().limit(2));
        let names: Vec<_> = collect(&registry, &request)
            .into_iter()
            .map(|r| r["name"].clone())
            .collect();
        assert_eq!(vec![ScalarValue::from("c10"), ScalarValue::from("c11")], names);
    }

    #[test]
    fn bad_paths() {
        let registry = registry();
        let bad = [
            ViewRequest::new("parent").alias("label", "children.nope"),
            ViewRequest::new("parent").alias("x", "label.id"),
            ViewRequest::new("parent").alias("x", "children"),
            ViewRequest::new("parent").alias("x", "label*"),
            ViewRequest::new("parent")
                .filter(BooleanNode::condition("children.size", ComparisonOperator::Gt, 1)),
        ];
        for request in bad {
            let err = registry.view(&request).err().unwrap();
            assert!(matches!(err, UnisonError::BadQuery { .. }), "{request}: {err}");
        }

        let err = registry
            .view(&ViewRequest::new("parent").alias("label", "children.nope"))
            .err()
            .unwrap();
        assert_eq!(
            "Bad query in 'label: children.nope': no property 'nope' on 'child'",
            err.to_string()
        );
    }

    #[test]
    fn relation_depth_limit() {
        let mut registry = registry();
        registry.config_mut().max_relation_depth = 1;
        let request = ViewRequest::new("child").alias("x", "parent.children.label");
        assert!(matches!(
            registry.view(&request).err().unwrap(),
            UnisonError::BadQuery { .. }
        ));
    }
}
