//! Backend-neutral query instructions.
//!
//! Field chains are lowered to storage property paths; every instruction
//! here is expressible by a [`QueryableSource`](crate::source::QueryableSource)
//! without access to the resource graph.

use std::fmt;

use crate::expr::ast::{ComparisonOp, TextMatchKind};
use crate::graph::RelationshipField;
use crate::model::Value;

/// A relationship navigation step in storage terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hop {
    /// Public relationship name.
    pub name: String,
    /// Storage property of the relationship.
    pub property: String,
    /// Resource type reached by the hop.
    pub target: String,
    pub to_many: bool,
}

impl From<&RelationshipField> for Hop {
    fn from(rel: &RelationshipField) -> Self {
        Self {
            name: rel.name.clone(),
            property: rel.property.clone(),
            target: rel.target.clone(),
            to_many: rel.is_to_many(),
        }
    }
}

/// Navigate `hops`, then read `attribute` (or stop at the last hop).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    pub hops: Vec<Hop>,
    pub attribute: Option<String>,
}

impl PropertyPath {
    pub fn attribute(property: impl Into<String>) -> Self {
        Self { hops: Vec::new(), attribute: Some(property.into()) }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = self.hops.iter().map(|h| h.property.as_str()).collect();
        parts.extend(self.attribute.as_deref());
        f.write_str(&parts.join("."))
    }
}

/// A single-valued operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Value at the end of a to-one path.
    Property(PropertyPath),
    /// Number of rows reached through a path ending in a to-many hop.
    Count(PropertyPath),
    Value(Value),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Property(path) => write!(f, "{path}"),
            Scalar::Count(path) => write!(f, "count({path})"),
            Scalar::Value(value) => write!(f, "{value:?}"),
        }
    }
}

/// Boolean instruction over one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { op: ComparisonOp, left: Scalar, right: Scalar },
    IsNull(Scalar),
    Text { kind: TextMatchKind, path: PropertyPath, text: String },
    In { path: PropertyPath, values: Vec<Value> },
    /// Some row reached through `path` (ending in a to-many hop) matches `filter`.
    Exists { path: PropertyPath, filter: Option<Box<Predicate>> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Matches nothing.
    False,
}

impl Predicate {
    /// Conjunction, flattening nested `And`s.
    pub fn and(predicates: Vec<Predicate>) -> Predicate {
        let mut flat = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Predicate::And(flat)
        }
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub key: Scalar,
    pub descending: bool,
}

/// Bounded row window.
#[derive(Debug, Clone, PartialEq)]
pub enum Window {
    Offset { skip: u64, take: u64 },
    /// Rows strictly after `after` in the plan's order. Only handed to
    /// sources that advertise cursor support.
    Cursor { after: Option<Vec<Value>>, take: u64 },
}

impl Window {
    pub fn take(&self) -> u64 {
        match self {
            Window::Offset { take, .. } | Window::Cursor { take, .. } => *take,
        }
    }
}

/// What to shape into result rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub identity: String,
    /// Attribute storage properties, identity excluded.
    pub attributes: Vec<String>,
    /// Selected but not included relationships: related identities only.
    pub linkage: Vec<Hop>,
}

/// Everything needed to fetch one resource type's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub resource: String,
    pub predicate: Option<Predicate>,
    pub order: Vec<OrderKey>,
    pub window: Option<Window>,
    pub projection: Projection,
    /// Included relationships, each shaped per parent row.
    pub nested: Vec<NestedPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedPlan {
    pub hop: Hop,
    pub plan: QueryPlan,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        if let Some(predicate) = &self.predicate {
            write!(f, " where {predicate:?}")?;
        }
        if !self.order.is_empty() {
            let keys: Vec<String> = self
                .order
                .iter()
                .map(|k| format!("{}{}", k.key, if k.descending { " desc" } else { "" }))
                .collect();
            write!(f, " order by {}", keys.join(", "))?;
        }
        if let Some(window) = &self.window {
            write!(f, " {window:?}")?;
        }
        for nested in &self.nested {
            write!(f, " [{}: {}]", nested.hop.name, nested.plan)?;
        }
        Ok(())
    }
}
