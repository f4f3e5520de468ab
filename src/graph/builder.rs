//! Declarative construction of a [`ResourceGraph`], either through the
//! builder API or from a JSON schema file.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use super::{
    AttrField, Capabilities, Capability, Cardinality, DefaultSortKey, RelationshipField,
    ResourceGraph, ResourceType,
};
use crate::model::ValueType;
use crate::{Error, Result};

/// Name of the identity field on every resource type.
pub const IDENTITY_FIELD: &str = "id";

/// Collects resource type declarations and validates them into a graph.
#[derive(Debug, Default)]
pub struct ResourceGraphBuilder {
    types: Vec<ResourceTypeBuilder>,
}

impl ResourceGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource type with the given identity type.
    pub fn resource(
        mut self,
        name: impl Into<String>,
        identity_type: ValueType,
        configure: impl FnOnce(ResourceTypeBuilder) -> ResourceTypeBuilder,
    ) -> Self {
        self.types.push(configure(ResourceTypeBuilder::new(name, identity_type)));
        self
    }

    pub fn add(mut self, resource: ResourceTypeBuilder) -> Self {
        self.types.push(resource);
        self
    }

    /// Validate all declarations and freeze them into a graph.
    pub fn build(self) -> Result<ResourceGraph> {
        let mut names = HashSet::new();
        for t in &self.types {
            if !names.insert(t.name.as_str()) {
                return Err(Error::Schema(format!("Resource type '{}' is declared twice.", t.name)));
            }
        }

        for t in &self.types {
            let mut fields = HashSet::from([IDENTITY_FIELD]);
            for name in t.attributes.iter().map(|a| a.name.as_str()).chain(t.relationships.iter().map(|r| r.name.as_str())) {
                if !fields.insert(name) {
                    return Err(Error::Schema(format!(
                        "Field '{name}' is declared twice on resource type '{}'.",
                        t.name
                    )));
                }
            }
            for rel in &t.relationships {
                if !names.contains(rel.target.as_str()) {
                    return Err(Error::Schema(format!(
                        "Relationship '{}' on resource type '{}' targets unknown resource type '{}'.",
                        rel.name, t.name, rel.target
                    )));
                }
            }
            if let Some(base) = &t.base {
                if !names.contains(base.as_str()) {
                    return Err(Error::Schema(format!(
                        "Resource type '{}' inherits from unknown resource type '{base}'.",
                        t.name
                    )));
                }
            }
        }

        self.check_base_cycles()?;

        let types: Vec<ResourceType> = self.types.into_iter().map(ResourceTypeBuilder::finish).collect();
        let graph = ResourceGraph::from_types(types);

        for t in graph.resource_types() {
            for key in &t.default_sort {
                let attr = graph
                    .resolve_field(t, &key.field)
                    .and_then(|f| f.as_attribute().cloned())
                    .ok_or_else(|| Error::Schema(format!(
                        "Default sort field '{}' is not an attribute of resource type '{}'.",
                        key.field, t.name
                    )))?;
                if !attr.allows(Capability::Sort) {
                    return Err(Error::Schema(format!(
                        "Default sort field '{}' on resource type '{}' is not sortable.",
                        key.field, t.name
                    )));
                }
            }
        }

        tracing::debug!(types = graph.resource_types().count(), "resource graph built");
        Ok(graph)
    }

    fn check_base_cycles(&self) -> Result<()> {
        for t in &self.types {
            let mut seen = HashSet::from([t.name.as_str()]);
            let mut next = t.base.as_deref();
            while let Some(base) = next {
                if !seen.insert(base) {
                    return Err(Error::Schema(format!(
                        "Resource type '{}' has a cyclic base type chain.",
                        t.name
                    )));
                }
                next = self.types.iter().find(|b| b.name == base).and_then(|b| b.base.as_deref());
            }
        }
        Ok(())
    }
}

/// Declaration of one resource type.
#[derive(Debug)]
pub struct ResourceTypeBuilder {
    name: String,
    identity: AttrField,
    attributes: Vec<AttrField>,
    relationships: Vec<RelationshipField>,
    base: Option<String>,
    default_sort: Vec<DefaultSortKey>,
    default_page_size: Option<u32>,
}

impl ResourceTypeBuilder {
    pub fn new(name: impl Into<String>, identity_type: ValueType) -> Self {
        Self {
            name: name.into(),
            identity: AttrField::new(IDENTITY_FIELD, identity_type)
                .capabilities(Capabilities::ATTRIBUTE.without(Capability::Change)),
            attributes: Vec::new(),
            relationships: Vec::new(),
            base: None,
            default_sort: Vec::new(),
            default_page_size: None,
        }
    }

    /// Storage property backing the identity (defaults to `id`).
    pub fn identity_property(mut self, property: impl Into<String>) -> Self {
        self.identity = self.identity.property(property);
        self
    }

    pub fn attr(self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.attribute(AttrField::new(name, value_type))
    }

    pub fn attribute(mut self, attr: AttrField) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn has_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipField::new(name, Cardinality::ToOne, target))
    }

    pub fn has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipField::new(name, Cardinality::ToMany, target))
    }

    pub fn relationship(mut self, relationship: RelationshipField) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn inherits(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn default_sort(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.default_sort.push(DefaultSortKey { field: field.into(), descending });
        self
    }

    pub fn default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = Some(size);
        self
    }

    fn finish(self) -> ResourceType {
        ResourceType {
            name: self.name,
            identity: Arc::new(self.identity),
            attributes: self.attributes.into_iter().map(Arc::new).collect(),
            relationships: self.relationships.into_iter().map(Arc::new).collect(),
            base: self.base,
            default_sort: self.default_sort,
            default_page_size: self.default_page_size,
        }
    }
}

// ============================================================================
// Schema file
// ============================================================================

/// JSON schema file: `{ "resources": [ ... ] }`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDefinition {
    pub resources: Vec<ResourceDefinitionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDefinitionEntry {
    pub name: String,
    pub identity: ValueType,
    #[serde(default)]
    pub identity_property: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
    #[serde(default)]
    pub relationships: Vec<RelationshipEntry>,
    #[serde(default)]
    pub default_sort: Vec<DefaultSortKey>,
    #[serde(default)]
    pub default_page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipEntry {
    pub name: String,
    pub cardinality: Cardinality,
    pub target: String,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

impl SchemaDefinition {
    pub fn into_builder(self) -> ResourceGraphBuilder {
        self.resources.into_iter().fold(ResourceGraphBuilder::new(), |builder, entry| {
            let mut t = ResourceTypeBuilder::new(entry.name, entry.identity);
            if let Some(property) = entry.identity_property {
                t = t.identity_property(property);
            }
            if let Some(base) = entry.base {
                t = t.inherits(base);
            }
            for a in entry.attributes {
                let mut attr = AttrField::new(a.name, a.value_type);
                if let Some(property) = a.property {
                    attr = attr.property(property);
                }
                if let Some(caps) = a.capabilities {
                    attr = attr.capabilities(caps);
                }
                t = t.attribute(attr);
            }
            for r in entry.relationships {
                let mut rel = RelationshipField::new(r.name, r.cardinality, r.target);
                if let Some(property) = r.property {
                    rel = rel.property(property);
                }
                if let Some(caps) = r.capabilities {
                    rel = rel.capabilities(caps);
                }
                t = t.relationship(rel);
            }
            for key in entry.default_sort {
                t = t.default_sort(key.field, key.descending);
            }
            if let Some(size) = entry.default_page_size {
                t = t.default_page_size(size);
            }
            builder.add(t)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceField;

    #[test]
    fn test_unknown_relationship_target() {
        let err = ResourceGraph::builder()
            .resource("todoItems", ValueType::Int, |r| r.has_one("owner", "people"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown resource type 'people'"));
    }

    #[test]
    fn test_duplicate_field() {
        let err = ResourceGraph::builder()
            .resource("tags", ValueType::Int, |r| {
                r.attr("name", ValueType::String).attr("name", ValueType::String)
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_base_cycle_rejected() {
        let err = ResourceGraph::builder()
            .resource("a", ValueType::Int, |r| r.inherits("b"))
            .resource("b", ValueType::Int, |r| r.inherits("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_default_sort_must_be_sortable() {
        let err = ResourceGraph::builder()
            .resource("tags", ValueType::Int, |r| {
                r.attribute(
                    AttrField::new("name", ValueType::String)
                        .capabilities(Capabilities::ATTRIBUTE.without(Capability::Sort)),
                )
                .default_sort("name", false)
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not sortable"));
    }

    #[test]
    fn test_schema_file() {
        let graph = ResourceGraph::from_json(
            r#"{
                "resources": [
                    {
                        "name": "todoItems",
                        "identity": "int",
                        "attributes": [
                            { "name": "description", "type": "string" },
                            { "name": "priority", "type": { "enum": ["Low", "High"] }, "capabilities": ["view", "sort"] }
                        ],
                        "relationships": [
                            { "name": "owner", "cardinality": "to_one", "target": "people", "property": "owner_id" }
                        ],
                        "default_sort": [ { "field": "priority", "descending": true } ],
                        "default_page_size": 5
                    },
                    { "name": "people", "identity": "int", "attributes": [ { "name": "firstName", "type": "string" } ] }
                ]
            }"#,
        )
        .unwrap();

        let todo = graph.resource_type("todoItems").unwrap();
        assert_eq!(todo.default_page_size, Some(5));
        let Some(ResourceField::Attribute(priority)) = graph.resolve_field(todo, "priority") else {
            panic!("Expected attribute");
        };
        assert!(!priority.allows(Capability::Filter));
        let Some(ResourceField::Relationship(owner)) = graph.resolve_field(todo, "owner") else {
            panic!("Expected relationship");
        };
        assert_eq!(owner.property, "owner_id");
        assert!(graph.default_sort(todo).is_some());
    }
}
