//! In-memory queryable source.
//!
//! The reference implementation of `QueryableSource`. Entities live in
//! per-resource-type collections behind a `RwLock`; relationships are stored
//! as lists of target identities. Compiled instructions are lowered into
//! closures evaluated against a read snapshot of the store.
//!
//! ## Limitations
//!
//! - **Linear scans**: every lookup walks its collection. There are no indexes.
//! - **Case-sensitive text matching**, like `LIKE` on most SQL databases.
//!
//! Use this source for:
//! - Testing the reader, composer and compiler end to end
//! - Embedding the engine over data that already lives in memory

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{QueryableSource, SourceCapabilities};
use crate::compiler::plan::{Hop, OrderKey, Predicate, Projection, PropertyPath, Scalar, Window};
use crate::error::CompileError;
use crate::expr::ast::{ComparisonOp, TextMatchKind};
use crate::graph::ResourceGraph;
use crate::model::{PropertyMap, Related, Row, Value};
use crate::{Error, Result};

// ============================================================================
// Store
// ============================================================================

/// One stored resource.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub properties: PropertyMap,
    /// Relationship property → related identities.
    pub links: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Default)]
struct Collection {
    identity: String,
    entities: Vec<Entity>,
}

impl Collection {
    fn find(&self, id: &Value) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.properties.get(&self.identity).is_some_and(|v| v.compare(id) == Some(Ordering::Equal)))
    }

    fn find_mut(&mut self, id: &Value) -> Option<&mut Entity> {
        let identity = &self.identity;
        self.entities
            .iter_mut()
            .find(|e| e.properties.get(identity).is_some_and(|v| v.compare(id) == Some(Ordering::Equal)))
    }
}

#[derive(Debug, Default)]
struct Store {
    collections: HashMap<String, Collection>,
}

impl Store {
    /// Entities reached from `entity` by following `hops`.
    fn navigate<'s>(&'s self, entity: &'s Entity, hops: &[Hop]) -> Vec<&'s Entity> {
        let mut current = vec![entity];
        for hop in hops {
            let Some(target) = self.collections.get(&hop.target) else {
                return Vec::new();
            };
            current = current
                .into_iter()
                .flat_map(|e| e.links.get(&hop.property).into_iter().flatten())
                .filter_map(|id| target.find(id))
                .collect();
        }
        current
    }
}

// ============================================================================
// MemorySource
// ============================================================================

/// In-memory entity store.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<RwLock<Store>>,
}

impl MemorySource {
    /// An empty store with one collection per resource type of the graph.
    pub fn new(graph: &ResourceGraph) -> Self {
        let collections = graph
            .resource_types()
            .map(|rt| {
                let collection = Collection { identity: rt.identity.property.clone(), entities: Vec::new() };
                (rt.name.clone(), collection)
            })
            .collect();
        Self { inner: Arc::new(RwLock::new(Store { collections })) }
    }

    /// Store an entity. `properties` must hold the type's identity property.
    pub fn insert(&self, resource_type: &str, properties: PropertyMap) -> Result<()> {
        let mut store = self.inner.write();
        let collection = store
            .collections
            .get_mut(resource_type)
            .ok_or_else(|| Error::Execution(format!("unknown resource type '{resource_type}'")))?;
        if !properties.contains_key(&collection.identity) {
            return Err(Error::Execution(format!(
                "entity of '{resource_type}' lacks identity property '{}'",
                collection.identity
            )));
        }
        collection.entities.push(Entity { properties, links: HashMap::new() });
        Ok(())
    }

    /// Add `target` to the relationship property of an entity.
    pub fn link(
        &self,
        resource_type: &str,
        id: impl Into<Value>,
        relationship: &str,
        target: impl Into<Value>,
    ) -> Result<()> {
        let id = id.into();
        let mut store = self.inner.write();
        let entity = store
            .collections
            .get_mut(resource_type)
            .and_then(|c| c.find_mut(&id))
            .ok_or_else(|| Error::Execution(format!("no '{resource_type}' with identity {id}")))?;
        entity.links.entry(relationship.to_owned()).or_default().push(target.into());
        Ok(())
    }

    pub fn len(&self, resource_type: &str) -> usize {
        self.inner.read().collections.get(resource_type).map_or(0, |c| c.entities.len())
    }

    pub fn is_empty(&self, resource_type: &str) -> bool {
        self.len(resource_type) == 0
    }
}

// ============================================================================
// Lowered form
// ============================================================================

type Matcher = Arc<dyn Fn(&Store, &Entity) -> bool + Send + Sync>;
type Extractor = Arc<dyn Fn(&Store, &Entity) -> Value + Send + Sync>;

/// A query lowered into closures over the store.
pub struct MemoryQuery {
    resource: String,
    filter: Option<Matcher>,
    order: Vec<(Extractor, bool)>,
    window: Option<Window>,
    projection: Option<Projection>,
    nested: Vec<(Hop, MemoryQuery)>,
}

impl fmt::Debug for MemoryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQuery")
            .field("resource", &self.resource)
            .field("filtered", &self.filter.is_some())
            .field("order_keys", &self.order.len())
            .field("window", &self.window)
            .field("projection", &self.projection)
            .field("nested", &self.nested)
            .finish()
    }
}

fn path_value(path: PropertyPath) -> Extractor {
    Arc::new(move |store: &Store, entity: &Entity| {
        let reached = store.navigate(entity, &path.hops);
        match (reached.first(), &path.attribute) {
            (Some(e), Some(attribute)) => e.properties.get(attribute).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    })
}

fn scalar(scalar: Scalar) -> Extractor {
    match scalar {
        Scalar::Property(path) => path_value(path),
        Scalar::Count(path) => Arc::new(move |store: &Store, entity: &Entity| {
            Value::Int(store.navigate(entity, &path.hops).len() as i64)
        }),
        Scalar::Value(value) => Arc::new(move |_: &Store, _: &Entity| value.clone()),
    }
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    let Some(ordering) = left.compare(right) else {
        return false;
    };
    match op {
        ComparisonOp::Equals => ordering == Ordering::Equal,
        ComparisonOp::LessThan => ordering == Ordering::Less,
        ComparisonOp::LessOrEqual => ordering != Ordering::Greater,
        ComparisonOp::GreaterThan => ordering == Ordering::Greater,
        ComparisonOp::GreaterOrEqual => ordering != Ordering::Less,
    }
}

fn matcher(predicate: &Predicate) -> Matcher {
    match predicate.clone() {
        Predicate::Compare { op, left, right } => {
            let (left, right) = (scalar(left), scalar(right));
            Arc::new(move |s: &Store, e: &Entity| compare(op, &left(s, e), &right(s, e)))
        }
        Predicate::IsNull(operand) => {
            let operand = scalar(operand);
            Arc::new(move |s: &Store, e: &Entity| operand(s, e).is_null())
        }
        Predicate::Text { kind, path, text } => {
            let value = path_value(path);
            Arc::new(move |s: &Store, e: &Entity| match value(s, e) {
                Value::String(v) => match kind {
                    TextMatchKind::Contains => v.contains(&text),
                    TextMatchKind::StartsWith => v.starts_with(&text),
                    TextMatchKind::EndsWith => v.ends_with(&text),
                },
                _ => false,
            })
        }
        Predicate::In { path, values } => {
            let value = path_value(path);
            Arc::new(move |s: &Store, e: &Entity| {
                let v = value(s, e);
                values.iter().any(|candidate| compare(ComparisonOp::Equals, &v, candidate))
            })
        }
        Predicate::Exists { path, filter } => {
            let filter = filter.as_deref().map(matcher);
            Arc::new(move |s: &Store, e: &Entity| {
                s.navigate(e, &path.hops)
                    .into_iter()
                    .any(|related| filter.as_ref().is_none_or(|f| f(s, related)))
            })
        }
        Predicate::And(parts) => {
            let parts: Vec<Matcher> = parts.iter().map(matcher).collect();
            Arc::new(move |s: &Store, e: &Entity| parts.iter().all(|p| p(s, e)))
        }
        Predicate::Or(parts) => {
            let parts: Vec<Matcher> = parts.iter().map(matcher).collect();
            Arc::new(move |s: &Store, e: &Entity| parts.iter().any(|p| p(s, e)))
        }
        Predicate::Not(inner) => {
            let inner = matcher(&inner);
            Arc::new(move |s: &Store, e: &Entity| !inner(s, e))
        }
        Predicate::False => Arc::new(|_: &Store, _: &Entity| false),
    }
}

fn compare_keys(left: &[Value], right: &[Value], order: &[(Extractor, bool)]) -> Ordering {
    for ((l, r), (_, descending)) in left.iter().zip(right).zip(order) {
        let ordering = l.sort_cmp(r);
        let ordering = if *descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// ============================================================================
// QueryableSource impl
// ============================================================================

impl MemorySource {
    fn run(&self, store: &Store, query: &MemoryQuery, candidates: Vec<&Entity>) -> Vec<Row> {
        let mut keyed: Vec<(Vec<Value>, &Entity)> = candidates
            .into_iter()
            .filter(|e| query.filter.as_ref().is_none_or(|f| f(store, *e)))
            .map(|e| (query.order.iter().map(|(key, _)| key(store, e)).collect(), e))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &query.order));

        let windowed: Vec<(Vec<Value>, &Entity)> = match &query.window {
            None => keyed,
            Some(Window::Offset { skip, take }) => keyed
                .into_iter()
                .skip(usize::try_from(*skip).unwrap_or(usize::MAX))
                .take(usize::try_from(*take).unwrap_or(usize::MAX))
                .collect(),
            Some(Window::Cursor { after, take }) => keyed
                .into_iter()
                .filter(|(key, _)| {
                    after.as_ref().is_none_or(|after| compare_keys(key, after, &query.order) == Ordering::Greater)
                })
                .take(usize::try_from(*take).unwrap_or(usize::MAX))
                .collect(),
        };

        windowed
            .into_iter()
            .map(|(sort_key, entity)| self.shape(store, query, entity, sort_key))
            .collect()
    }

    fn shape(&self, store: &Store, query: &MemoryQuery, entity: &Entity, sort_key: Vec<Value>) -> Row {
        let identity = store.collections.get(&query.resource).map(|c| c.identity.as_str()).unwrap_or_default();
        let id = entity.properties.get(identity).cloned().unwrap_or(Value::Null);
        let mut row = Row::new(query.resource.clone(), id);
        row.sort_key = sort_key;

        let Some(projection) = &query.projection else {
            return row;
        };
        for attribute in &projection.attributes {
            let value = entity.properties.get(attribute).cloned().unwrap_or(Value::Null);
            row.attributes.insert(attribute.clone(), value);
        }
        for hop in &projection.linkage {
            let target_identity = store.collections.get(&hop.target).map(|c| c.identity.as_str()).unwrap_or_default();
            let rows = store
                .navigate(entity, std::slice::from_ref(hop))
                .into_iter()
                .map(|e| Row::new(hop.target.clone(), e.properties.get(target_identity).cloned().unwrap_or(Value::Null)))
                .collect();
            row.relationships.insert(hop.property.clone(), related(hop, rows));
        }
        for (hop, nested) in &query.nested {
            let candidates = store.navigate(entity, std::slice::from_ref(hop));
            let rows = self.run(store, nested, candidates);
            row.relationships.insert(hop.property.clone(), related(hop, rows));
        }
        row
    }
}

fn related(hop: &Hop, rows: Vec<Row>) -> Related {
    if hop.to_many {
        Related::Many(rows)
    } else {
        Related::One(rows.into_iter().next().map(Box::new))
    }
}

#[async_trait]
impl QueryableSource for MemorySource {
    type Query = MemoryQuery;

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities { supports_cursor: true, supports_nested_window: true }
    }

    fn root(&self, resource: &str) -> std::result::Result<MemoryQuery, CompileError> {
        if !self.inner.read().collections.contains_key(resource) {
            return Err(CompileError::UnknownMapping(format!("no collection for resource type '{resource}'")));
        }
        Ok(MemoryQuery {
            resource: resource.to_owned(),
            filter: None,
            order: Vec::new(),
            window: None,
            projection: None,
            nested: Vec::new(),
        })
    }

    fn apply_predicate(&self, mut query: MemoryQuery, predicate: &Predicate) -> std::result::Result<MemoryQuery, CompileError> {
        let next = matcher(predicate);
        query.filter = Some(match query.filter.take() {
            Some(existing) => Arc::new(move |s: &Store, e: &Entity| existing(s, e) && next(s, e)),
            None => next,
        });
        Ok(query)
    }

    fn apply_order(&self, mut query: MemoryQuery, keys: &[OrderKey]) -> std::result::Result<MemoryQuery, CompileError> {
        query.order = keys.iter().map(|k| (scalar(k.key.clone()), k.descending)).collect();
        Ok(query)
    }

    fn apply_window(&self, mut query: MemoryQuery, window: &Window) -> std::result::Result<MemoryQuery, CompileError> {
        query.window = Some(window.clone());
        Ok(query)
    }

    fn apply_projection(
        &self,
        mut query: MemoryQuery,
        projection: &Projection,
        nested: Vec<(Hop, MemoryQuery)>,
    ) -> std::result::Result<MemoryQuery, CompileError> {
        query.projection = Some(projection.clone());
        query.nested = nested;
        Ok(query)
    }

    async fn execute(&self, query: &MemoryQuery) -> Result<Vec<Row>> {
        let store = self.inner.read();
        let collection = store
            .collections
            .get(&query.resource)
            .ok_or_else(|| Error::Execution(format!("unknown resource type '{}'", query.resource)))?;
        let candidates = collection.entities.iter().collect();
        Ok(self.run(&store, query, candidates))
    }
}
