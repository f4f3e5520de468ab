//! Per-resource-type override callbacks.
//!
//! A [`ResourceDefinition`] receives the expression read from the request (or
//! the built-in default) and returns the expression that is frozen into the
//! query layer. Every hook defaults to returning its input unchanged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::expr::ast::{FieldChain, FilterExpression, IncludeExpression, Pagination, SortExpression, SparseFieldSet};
use crate::expr::{parse_filter, parse_sort, ParseError};
use crate::graph::{ResourceGraph, ResourceType};
use crate::model::{PropertyMap, Value};

// ============================================================================
// Request context
// ============================================================================

/// Ambient per-request data handed to override callbacks, such as the
/// current user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub properties: PropertyMap,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

// ============================================================================
// Callback context
// ============================================================================

/// What a callback may look at while deciding.
pub struct DefinitionContext<'a> {
    pub graph: &'a ResourceGraph,
    pub resource_type: &'a ResourceType,
    pub request: &'a RequestContext,
    /// Relationship names leading to this layer, empty for the primary resource.
    pub scope: &'a [String],
}

impl DefinitionContext<'_> {
    pub fn is_primary(&self) -> bool {
        self.scope.is_empty()
    }

    /// Resolve a dotted field path on this layer's type without capability
    /// checks; callbacks are trusted to reference fields the graph knows.
    pub fn chain(&self, path: &str) -> Option<FieldChain> {
        let mut current = self.resource_type;
        let mut fields = Vec::new();
        for name in path.split('.') {
            let field = self.graph.resolve_field(current, name)?;
            if let Some(rel) = field.as_relationship() {
                current = self.graph.target_of(rel).map(Arc::as_ref)?;
            }
            fields.push(field);
        }
        FieldChain::from_fields(fields)
    }

    /// Parse a filter in the query-string grammar against this layer's type.
    pub fn parse_filter(&self, text: &str) -> Result<FilterExpression, ParseError> {
        parse_filter(self.graph, self.resource_type, text, 0).map(|parsed| parsed.expression)
    }

    /// Parse a sort in the query-string grammar against this layer's type.
    pub fn parse_sort(&self, text: &str) -> Result<SortExpression, ParseError> {
        parse_sort(self.graph, self.resource_type, text, 0).map(|parsed| parsed.expression)
    }
}

// ============================================================================
// ResourceDefinition
// ============================================================================

/// Override hooks for one resource type.
///
/// Implementations must not mutate engine-wide state; they run once per
/// layer of every request.
pub trait ResourceDefinition: Send + Sync {
    fn on_apply_filter(&self, existing: Option<FilterExpression>, _ctx: &DefinitionContext<'_>) -> Option<FilterExpression> {
        existing
    }

    fn on_apply_sort(&self, existing: Option<SortExpression>, _ctx: &DefinitionContext<'_>) -> Option<SortExpression> {
        existing
    }

    fn on_apply_pagination(&self, existing: Option<Pagination>, _ctx: &DefinitionContext<'_>) -> Option<Pagination> {
        existing
    }

    fn on_apply_sparse_fieldset(
        &self,
        existing: Option<SparseFieldSet>,
        _ctx: &DefinitionContext<'_>,
    ) -> Option<SparseFieldSet> {
        existing
    }

    fn on_apply_includes(&self, existing: IncludeExpression, _ctx: &DefinitionContext<'_>) -> IncludeExpression {
        existing
    }
}

// ============================================================================
// DefinitionRegistry
// ============================================================================

/// Explicit map from resource type name to its override hooks.
#[derive(Clone, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<dyn ResourceDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, resource_type: impl Into<String>, definition: impl ResourceDefinition + 'static) -> Self {
        self.definitions.insert(resource_type.into(), Arc::new(definition));
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn ResourceDefinition>> {
        self.definitions.get(resource_type)
    }

    /// The definition for a type, falling back to the nearest base type.
    pub fn for_type(&self, graph: &ResourceGraph, resource_type: &ResourceType) -> Option<&Arc<dyn ResourceDefinition>> {
        self.get(&resource_type.name)
            .or_else(|| graph.ancestors(resource_type).find_map(|base| self.get(&base.name)))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.definitions.keys().collect();
        names.sort();
        f.debug_struct("DefinitionRegistry").field("resource_types", &names).finish()
    }
}
