//! Result rows produced by executing a compiled plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use super::{PropertyMap, Value};

/// One resource in a result set, shaped by the plan's projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub resource_type: String,
    pub id: Value,
    /// Projected attributes, keyed by storage property name.
    pub attributes: PropertyMap,
    /// Projected relationships, keyed by storage property name.
    pub relationships: BTreeMap<String, Related>,
    /// Values of the plan's order keys, filled in for root rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_key: Vec<Value>,
}

/// Related data attached to a parent row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Related {
    One(Option<Box<Row>>),
    Many(Vec<Row>),
}

impl Row {
    pub fn new(resource_type: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: PropertyMap::new(),
            relationships: BTreeMap::new(),
            sort_key: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Related rows of a projected relationship (empty for a missing to-one).
    pub fn related(&self, relationship: &str) -> Vec<&Row> {
        match self.relationships.get(relationship) {
            Some(Related::One(Some(row))) => vec![row.as_ref()],
            Some(Related::Many(rows)) => rows.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl Related {
    pub fn len(&self) -> usize {
        match self {
            Related::One(row) => usize::from(row.is_some()),
            Related::Many(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
