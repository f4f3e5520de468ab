//! # Resource Graph
//!
//! Static metadata describing resource types, their attributes and
//! relationships, and the capability flags that decide which query
//! operations are legal against each field.
//!
//! The graph is built once at startup (see [`ResourceGraphBuilder`]) and is
//! read-only afterwards; it is `Send + Sync` and shared behind an `Arc`.

pub mod builder;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expr::ast::{FieldChain, SortElement, SortExpression, SortTarget};
use crate::model::ValueType;
use crate::Result;

pub use builder::{ResourceGraphBuilder, ResourceTypeBuilder, SchemaDefinition};

// ============================================================================
// Capabilities
// ============================================================================

/// A single per-field permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Filter,
    Sort,
    Change,
    Include,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Capability::View => 1,
            Capability::Filter => 1 << 1,
            Capability::Sort => 1 << 2,
            Capability::Change => 1 << 3,
            Capability::Include => 1 << 4,
        }
    }

    /// Verb used in error messages ("Filtering on attribute 'x' is not allowed").
    pub fn verb(self) -> &'static str {
        match self {
            Capability::View => "Retrieving",
            Capability::Filter => "Filtering on",
            Capability::Sort => "Sorting on",
            Capability::Change => "Changing",
            Capability::Include => "Including",
        }
    }
}

/// Set of capability flags on a field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Default for attributes: view, filter, sort, change.
    pub const ATTRIBUTE: Capabilities = Capabilities(
        Capability::View.bit() | Capability::Filter.bit() | Capability::Sort.bit() | Capability::Change.bit(),
    );
    /// Default for relationships: include, filter, sort.
    pub const RELATIONSHIP: Capabilities = Capabilities(
        Capability::Include.bit() | Capability::Filter.bit() | Capability::Sort.bit(),
    );

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    pub fn without(self, capability: Capability) -> Self {
        Capabilities(self.0 & !capability.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        [Capability::View, Capability::Filter, Capability::Sort, Capability::Change, Capability::Include]
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl From<Vec<Capability>> for Capabilities {
    fn from(list: Vec<Capability>) -> Self {
        list.into_iter().fold(Capabilities::NONE, Capabilities::with)
    }
}

impl From<Capabilities> for Vec<Capability> {
    fn from(caps: Capabilities) -> Self {
        caps.iter().collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ============================================================================
// Fields
// ============================================================================

/// An attribute exposed on a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrField {
    /// Public name used in query strings.
    pub name: String,
    /// Internal property name used by queryable sources.
    pub property: String,
    pub value_type: ValueType,
    pub capabilities: Capabilities,
}

impl AttrField {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            property: name.clone(),
            name,
            value_type,
            capabilities: Capabilities::ATTRIBUTE,
        }
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// A relationship from one resource type to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipField {
    pub name: String,
    pub property: String,
    pub cardinality: Cardinality,
    /// Public name of the related resource type.
    pub target: String,
    pub capabilities: Capabilities,
}

impl RelationshipField {
    pub fn new(name: impl Into<String>, cardinality: Cardinality, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            property: name.clone(),
            name,
            cardinality,
            target: target.into(),
            capabilities: Capabilities::RELATIONSHIP,
        }
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

/// Either kind of field, as returned by [`ResourceGraph::resolve_field`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceField {
    Attribute(Arc<AttrField>),
    Relationship(Arc<RelationshipField>),
}

impl ResourceField {
    pub fn name(&self) -> &str {
        match self {
            ResourceField::Attribute(a) => &a.name,
            ResourceField::Relationship(r) => &r.name,
        }
    }

    pub fn property(&self) -> &str {
        match self {
            ResourceField::Attribute(a) => &a.property,
            ResourceField::Relationship(r) => &r.property,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            ResourceField::Attribute(a) => a.capabilities,
            ResourceField::Relationship(r) => r.capabilities,
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    pub fn as_attribute(&self) -> Option<&Arc<AttrField>> {
        match self {
            ResourceField::Attribute(a) => Some(a),
            ResourceField::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Arc<RelationshipField>> {
        match self {
            ResourceField::Relationship(r) => Some(r),
            ResourceField::Attribute(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceField::Attribute(_) => "attribute",
            ResourceField::Relationship(_) => "relationship",
        }
    }
}

// ============================================================================
// Resource types
// ============================================================================

/// A declared default sort key (resolved when the graph is built).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultSortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A resource type: identity, attributes, relationships and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceType {
    pub name: String,
    pub identity: Arc<AttrField>,
    pub attributes: Vec<Arc<AttrField>>,
    pub relationships: Vec<Arc<RelationshipField>>,
    /// Declared base type; fields not found on this type are looked up there.
    pub base: Option<String>,
    pub default_sort: Vec<DefaultSortKey>,
    pub default_page_size: Option<u32>,
}

impl ResourceType {
    pub fn identity_type(&self) -> &ValueType {
        &self.identity.value_type
    }

    fn own_field(&self, name: &str) -> Option<ResourceField> {
        if self.identity.name == name {
            return Some(ResourceField::Attribute(self.identity.clone()));
        }
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| ResourceField::Attribute(a.clone()))
            .or_else(|| {
                self.relationships
                    .iter()
                    .find(|r| r.name == name)
                    .map(|r| ResourceField::Relationship(r.clone()))
            })
    }
}

// ============================================================================
// ResourceGraph
// ============================================================================

/// The complete set of resource types.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    types: Vec<Arc<ResourceType>>,
    by_name: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn builder() -> ResourceGraphBuilder {
        ResourceGraphBuilder::new()
    }

    /// Build a graph from a JSON schema description.
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: SchemaDefinition = serde_json::from_str(json)
            .map_err(|e| crate::Error::Schema(format!("invalid schema file: {e}")))?;
        definition.into_builder().build()
    }

    pub(crate) fn from_types(types: Vec<ResourceType>) -> Self {
        let by_name = types.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
        Self {
            types: types.into_iter().map(Arc::new).collect(),
            by_name,
        }
    }

    pub fn resource_type(&self, name: &str) -> Option<&Arc<ResourceType>> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &Arc<ResourceType>> {
        self.types.iter()
    }

    /// The target type of a relationship.
    ///
    /// Targets are validated when the graph is built, so this only fails for
    /// relationships constructed outside the graph.
    pub fn target_of(&self, relationship: &RelationshipField) -> Option<&Arc<ResourceType>> {
        self.resource_type(&relationship.target)
    }

    /// Base types of `resource_type`, nearest first.
    pub fn ancestors<'g>(&'g self, resource_type: &'g ResourceType) -> impl Iterator<Item = &'g Arc<ResourceType>> {
        let mut next = resource_type.base.as_deref();
        std::iter::from_fn(move || {
            let base = self.resource_type(next?)?;
            next = base.base.as_deref();
            Some(base)
        })
    }

    /// Resolve a public field name on a type, then on its declared base types.
    pub fn resolve_field(&self, resource_type: &ResourceType, public_name: &str) -> Option<ResourceField> {
        resource_type
            .own_field(public_name)
            .or_else(|| self.ancestors(resource_type).find_map(|base| base.own_field(public_name)))
    }

    /// True when `derived` is `base` or inherits from it.
    pub fn is_assignable(&self, derived: &ResourceType, base: &str) -> bool {
        derived.name == base || self.ancestors(derived).any(|t| t.name == base)
    }

    /// Attributes including inherited ones (own first), identity excluded.
    pub fn attributes(&self, resource_type: &ResourceType) -> Vec<Arc<AttrField>> {
        let mut seen: Vec<Arc<AttrField>> = resource_type.attributes.clone();
        for base in self.ancestors(resource_type) {
            for attr in &base.attributes {
                if !seen.iter().any(|a| a.name == attr.name) {
                    seen.push(attr.clone());
                }
            }
        }
        seen
    }

    /// Relationships including inherited ones (own first).
    pub fn relationships(&self, resource_type: &ResourceType) -> Vec<Arc<RelationshipField>> {
        let mut seen: Vec<Arc<RelationshipField>> = resource_type.relationships.clone();
        for base in self.ancestors(resource_type) {
            for rel in &base.relationships {
                if !seen.iter().any(|r| r.name == rel.name) {
                    seen.push(rel.clone());
                }
            }
        }
        seen
    }

    /// Declared default sort, resolved to a sort expression.
    ///
    /// Keys are validated at build time; unresolvable keys are skipped.
    pub fn default_sort(&self, resource_type: &ResourceType) -> Option<SortExpression> {
        let elements: Vec<SortElement> = resource_type
            .default_sort
            .iter()
            .filter_map(|key| {
                let field = self.resolve_field(resource_type, &key.field)?;
                Some(SortElement {
                    target: SortTarget::Field(FieldChain::single(field)),
                    descending: key.descending,
                })
            })
            .collect();
        SortExpression::new(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ResourceGraph {
        ResourceGraph::builder()
            .resource("identities", ValueType::Int, |r| r.attr("createdAt", ValueType::DateTime))
            .resource("people", ValueType::Int, |r| {
                r.inherits("identities")
                    .attr("name", ValueType::String)
                    .has_many("friends", "people")
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_capability_set() {
        let caps = Capabilities::ATTRIBUTE.without(Capability::Sort);
        assert!(caps.contains(Capability::Filter));
        assert!(!caps.contains(Capability::Sort));
        assert!(!caps.contains(Capability::Include));
    }

    #[test]
    fn test_capabilities_serde() {
        let caps: Capabilities = serde_json::from_str(r#"["view","filter"]"#).unwrap();
        assert!(caps.contains(Capability::View));
        assert!(!caps.contains(Capability::Sort));
        assert_eq!(serde_json::to_string(&caps).unwrap(), r#"["view","filter"]"#);
    }

    #[test]
    fn test_resolve_own_field() {
        let g = graph();
        let people = g.resource_type("people").unwrap();
        assert!(matches!(g.resolve_field(people, "name"), Some(ResourceField::Attribute(_))));
        assert!(matches!(g.resolve_field(people, "friends"), Some(ResourceField::Relationship(_))));
        assert!(matches!(g.resolve_field(people, "id"), Some(ResourceField::Attribute(_))));
        assert!(g.resolve_field(people, "missing").is_none());
    }

    #[test]
    fn test_resolve_walks_base_types() {
        let g = graph();
        let people = g.resource_type("people").unwrap();
        let field = g.resolve_field(people, "createdAt").unwrap();
        assert_eq!(field.name(), "createdAt");
        assert!(g.is_assignable(people, "identities"));
        assert_eq!(g.attributes(people).len(), 2);
    }
}
