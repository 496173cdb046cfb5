//! Schema of access points and the relations linking them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use unison_error::{Result, UnisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    /// The item stores the identity key of one remote item.
    ManyToOne,
    /// Remote items reference this item through `remote_property`.
    OneToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub cardinality: Cardinality,
    pub remote_access_point: String,
    /// For one-to-many, the many-to-one property on the remote access point
    /// pointing back here. Optional for many-to-one, where it names the
    /// reverse relation if there is one.
    #[serde(default)]
    pub remote_property: Option<String>,
}

impl RelationDescriptor {
    pub fn many_to_one(remote_access_point: impl Into<String>) -> Self {
        RelationDescriptor {
            cardinality: Cardinality::ManyToOne,
            remote_access_point: remote_access_point.into(),
            remote_property: None,
        }
    }

    pub fn one_to_many(
        remote_access_point: impl Into<String>,
        remote_property: impl Into<String>,
    ) -> Self {
        RelationDescriptor {
            cardinality: Cardinality::OneToMany,
            remote_access_point: remote_access_point.into(),
            remote_property: Some(remote_property.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub relation: Option<RelationDescriptor>,
}

impl PropertyDescriptor {
    /// Properties whose value lives on the item itself. One-to-many relations
    /// are resolved from the remote side and are not stored.
    pub fn is_stored(&self) -> bool {
        !matches!(
            &self.relation,
            Some(RelationDescriptor {
                cardinality: Cardinality::OneToMany,
                ..
            })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointDescriptor {
    pub name: String,
    /// Declared properties, in declaration order.
    pub properties: Vec<PropertyDescriptor>,
    /// Ordered names that identify a single item.
    pub identity_properties: Vec<String>,
}

impl AccessPointDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        AccessPointDescriptor {
            name: name.into(),
            properties: Vec::new(),
            identity_properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.into(),
            relation: None,
        });
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, relation: RelationDescriptor) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.into(),
            relation: Some(relation),
        });
        self
    }

    pub fn with_identity<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.identity_properties = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn stored_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_stored())
    }

    /// Checks the descriptor on its own, without looking at relation targets.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            Err(UnisonError::InvalidOperation(format!(
                "Invalid access point '{}': {reason}",
                self.name
            )))
        };

        if self.name.is_empty() {
            return invalid("empty name".to_string());
        }

        let mut seen = HashSet::new();
        for prop in &self.properties {
            if prop.name.is_empty() || prop.name.contains('.') || prop.name == "*" {
                return invalid(format!("bad property name '{}'", prop.name));
            }
            if !seen.insert(prop.name.as_str()) {
                return invalid(format!("duplicate property '{}'", prop.name));
            }
            if let Some(RelationDescriptor {
                cardinality: Cardinality::OneToMany,
                remote_property: None,
                ..
            }) = &prop.relation
            {
                return invalid(format!(
                    "one-to-many relation '{}' needs a remote property",
                    prop.name
                ));
            }
        }

        if self.identity_properties.is_empty() {
            return invalid("no identity properties".to_string());
        }
        for name in &self.identity_properties {
            match self.property(name) {
                Some(prop) if prop.is_stored() => (),
                Some(_) => return invalid(format!("identity property '{name}' is not stored")),
                None => return invalid(format!("undeclared identity property '{name}'")),
            }
        }

        Ok(())
    }
}

/// A whole schema, as loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub access_points: Vec<AccessPointDescriptor>,
}

impl SchemaDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: SchemaDefinition = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<&AccessPointDescriptor> {
        self.access_points.iter().find(|ap| ap.name == name)
    }

    /// Validates every descriptor and every relation target.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for ap in &self.access_points {
            ap.validate()?;
            if !seen.insert(ap.name.as_str()) {
                return Err(UnisonError::InvalidOperation(format!(
                    "Duplicate access point '{}'",
                    ap.name
                )));
            }
        }
        validate_relations(self.access_points.iter(), |name| self.get(name))
    }
}

/// Checks that relations point at declared access points and that one-to-many
/// relations have a many-to-one counterpart pointing back.
pub(crate) fn validate_relations<'a, F>(
    descriptors: impl Iterator<Item = &'a AccessPointDescriptor>,
    lookup: F,
) -> Result<()>
where
    F: Fn(&str) -> Option<&'a AccessPointDescriptor>,
{
    for ap in descriptors {
        for prop in &ap.properties {
            let Some(relation) = &prop.relation else {
                continue;
            };
            let invalid = |reason: &str| {
                Err(UnisonError::InvalidOperation(format!(
                    "Invalid relation '{}.{}': {reason}",
                    ap.name, prop.name
                )))
            };

            let Some(remote) = lookup(&relation.remote_access_point) else {
                return invalid(&format!(
                    "unknown access point '{}'",
                    relation.remote_access_point
                ));
            };

            let Some(remote_name) = &relation.remote_property else {
                continue;
            };
            let Some(remote_prop) = remote.property(remote_name) else {
                return invalid(&format!(
                    "no property '{remote_name}' on '{}'",
                    remote.name
                ));
            };

            if relation.cardinality == Cardinality::OneToMany {
                match &remote_prop.relation {
                    Some(back)
                        if back.cardinality == Cardinality::ManyToOne
                            && back.remote_access_point == ap.name => {}
                    _ => {
                        return invalid(&format!(
                            "'{}.{remote_name}' is not a many-to-one relation to '{}'",
                            remote.name, ap.name
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}
