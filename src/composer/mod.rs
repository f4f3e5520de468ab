//! # Query layer composition
//!
//! Merges everything read from a request into one [`QueryLayer`] per
//! resource type reached through `include`, applies defaults and the
//! registered [`ResourceDefinition`] overrides, and guarantees a stable
//! order whenever a layer is paginated.
//!
//! Errors produced here are collected like reader errors. Expressions
//! returned by override callbacks are re-validated; problems with them are
//! configuration errors, logged at `error` level and reported as server faults.

pub mod definitions;
mod validate;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::QueryOptions;
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::{
    FieldChain, FilterExpression, IncludeElement, IncludeExpression, Pagination, SortElement, SortExpression,
    SparseFieldSet,
};
use crate::graph::{Capability, RelationshipField, ResourceField, ResourceGraph, ResourceType};
use crate::reader::ParsedQuery;

pub use definitions::{DefinitionContext, DefinitionRegistry, RequestContext, ResourceDefinition};
use validate::Validator;

// ============================================================================
// QueryLayer
// ============================================================================

/// The validated query intent for one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLayer {
    pub resource_type: Arc<ResourceType>,
    pub filter: Option<FilterExpression>,
    pub sort: Option<SortExpression>,
    pub pagination: Option<Pagination>,
    /// None projects every viewable attribute.
    pub selection: Option<SparseFieldSet>,
    /// Included relationships, in include order.
    pub nested: Vec<NestedLayer>,
}

/// An included relationship and the layer that shapes its related rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedLayer {
    pub relationship: Arc<RelationshipField>,
    pub layer: QueryLayer,
}

impl QueryLayer {
    /// An unrestricted layer for a resource type.
    pub fn new(resource_type: Arc<ResourceType>) -> Self {
        Self {
            resource_type,
            filter: None,
            sort: None,
            pagination: None,
            selection: None,
            nested: Vec::new(),
        }
    }

    /// The nested layer of an included relationship.
    pub fn nested(&self, relationship: &str) -> Option<&QueryLayer> {
        self.nested.iter().find(|n| n.relationship.name == relationship).map(|n| &n.layer)
    }

    /// The include tree this layer was composed from.
    pub fn includes(&self) -> IncludeExpression {
        fn elements(layer: &QueryLayer) -> Vec<IncludeElement> {
            layer
                .nested
                .iter()
                .map(|n| IncludeElement { relationship: n.relationship.clone(), children: elements(&n.layer) })
                .collect()
        }
        IncludeExpression { elements: elements(self) }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, label: &str, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{label}", "", indent = depth * 2)?;
        if let Some(filter) = &self.filter {
            write!(f, " filter={filter}")?;
        }
        if let Some(sort) = &self.sort {
            write!(f, " sort={sort}")?;
        }
        if let Some(pagination) = &self.pagination {
            write!(f, " page=[{pagination}]")?;
        }
        if let Some(selection) = &self.selection {
            write!(f, " fields={selection}")?;
        }
        for nested in &self.nested {
            writeln!(f)?;
            let label = format!("{} -> {}", nested.relationship.name, nested.layer.resource_type.name);
            nested.layer.write_tree(f, &label, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for QueryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, &self.resource_type.name, 0)
    }
}

// ============================================================================
// Composer
// ============================================================================

/// Builds query layers for one request.
pub struct Composer<'a> {
    graph: &'a ResourceGraph,
    options: &'a QueryOptions,
    definitions: &'a DefinitionRegistry,
    request: &'a RequestContext,
}

impl<'a> Composer<'a> {
    pub fn new(
        graph: &'a ResourceGraph,
        options: &'a QueryOptions,
        definitions: &'a DefinitionRegistry,
        request: &'a RequestContext,
    ) -> Self {
        Self { graph, options, definitions, request }
    }

    /// Compose the root layer and every included layer below it.
    #[tracing::instrument(skip_all, fields(resource_type = %resource_type.name))]
    pub fn compose(&self, resource_type: &Arc<ResourceType>, query: &ParsedQuery) -> Result<QueryLayer, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let requested = query.includes.clone().unwrap_or_default();
        let layer = self.layer(
            resource_type,
            &mut Vec::new(),
            &mut Vec::new(),
            query,
            &requested.elements,
            requested.clone(),
            &mut errors,
        );
        if errors.is_empty() {
            debug!(layer = %layer, "composed query layer");
        }
        errors.into_result(layer)
    }

    #[allow(clippy::too_many_arguments)]
    fn layer(
        &self,
        resource_type: &Arc<ResourceType>,
        scope: &mut Vec<String>,
        ancestry: &mut Vec<Arc<RelationshipField>>,
        query: &ParsedQuery,
        requested: &[IncludeElement],
        includes: IncludeExpression,
        errors: &mut ValidationErrors,
    ) -> QueryLayer {
        let mut filter = query.filter_for(scope);
        let mut sort = query.sort_for(scope).cloned().or_else(|| self.graph.default_sort(resource_type));
        let mut pagination = match self.pagination(resource_type, scope, query) {
            Ok(pagination) => pagination,
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let mut selection = query.fields_for(&resource_type.name).cloned();
        let mut includes = includes;

        if let Some(definition) = self.definitions.for_type(self.graph, resource_type) {
            let ctx = DefinitionContext {
                graph: self.graph,
                resource_type,
                request: self.request,
                scope: scope.as_slice(),
            };
            filter = definition.on_apply_filter(filter, &ctx);
            sort = definition.on_apply_sort(sort, &ctx);
            pagination = definition.on_apply_pagination(pagination, &ctx);
            selection = definition.on_apply_sparse_fieldset(selection, &ctx);
            includes = definition.on_apply_includes(includes, &ctx);

            let mut validator = Validator::new(self.graph);
            if let Some(filter) = &filter {
                validator.filter(resource_type, filter);
            }
            if let Some(sort) = &sort {
                validator.sort(resource_type, sort);
            }
            if let Some(selection) = &selection {
                validator.fields(resource_type, selection);
            }
            for problem in validator.into_problems() {
                self.configuration_error(resource_type, problem, errors);
            }
        }

        // Requested pages were range-checked by the reader; this holds type
        // defaults and override output to the same limits.
        if let Some(page) = &pagination {
            for problem in self.page_problems(page) {
                self.configuration_error(resource_type, problem, errors);
            }
        }

        if pagination.is_some() {
            sort = Some(with_tie_break(resource_type, sort));
        }

        let mut nested = Vec::new();
        for element in includes.elements {
            let relationship = element.relationship;
            let from_request = requested.iter().find(|e| e.relationship.name == relationship.name);

            let resolved = self.graph.resolve_field(resource_type, &relationship.name);
            if resolved.as_ref().and_then(ResourceField::as_relationship) != Some(&relationship) {
                let problem = format!(
                    "Included relationship '{}' does not exist on resource type '{}'.",
                    relationship.name, resource_type.name
                );
                self.configuration_error(resource_type, problem, errors);
                continue;
            }
            if !relationship.allows(Capability::Include) {
                let problem = format!("{} relationship '{}' is not allowed.", Capability::Include.verb(), relationship.name);
                self.configuration_error(resource_type, problem, errors);
                continue;
            }
            // Requested chains were already checked by the include reader; this catches override-added ones.
            if ancestry.iter().any(|a| **a == *relationship) {
                let problem = format!("Included relationship '{}' revisits its own ancestry.", relationship.name);
                self.configuration_error(resource_type, problem, errors);
                continue;
            }
            let Some(target) = self.graph.target_of(&relationship).cloned() else {
                let problem = format!("Relationship '{}' has no target type.", relationship.name);
                self.configuration_error(resource_type, problem, errors);
                continue;
            };

            scope.push(relationship.name.clone());
            ancestry.push(relationship.clone());
            let requested_children = from_request.map(|e| e.children.as_slice()).unwrap_or_default();
            let layer = self.layer(
                &target,
                scope,
                ancestry,
                query,
                requested_children,
                IncludeExpression { elements: element.children },
                errors,
            );
            ancestry.pop();
            scope.pop();
            nested.push(NestedLayer { relationship, layer });
        }

        QueryLayer {
            resource_type: resource_type.clone(),
            filter,
            sort,
            pagination,
            selection,
            nested,
        }
    }

    /// Root layers always get a window when any page size applies; nested
    /// layers only when the request scoped a page parameter to them.
    fn pagination(
        &self,
        resource_type: &ResourceType,
        scope: &[String],
        query: &ParsedQuery,
    ) -> Result<Option<Pagination>, QueryError> {
        let request = query.page_for(scope);
        if !scope.is_empty() && request.is_none() {
            return Ok(None);
        }
        let request = request.cloned().unwrap_or_default();
        let size = request.size.or(resource_type.default_page_size).or(self.options.default_page_size);
        let Some(size) = size else {
            if request.number.is_some() || request.after.is_some() {
                return Err(QueryError::semantic(
                    "page[size]",
                    None,
                    "A page size is required when requesting a page number or cursor.",
                ));
            }
            return Ok(None);
        };
        Ok(Some(match request.after {
            Some(after) => Pagination::Cursor { size, after: Some(after) },
            None => Pagination::Offset { size, number: request.number.unwrap_or(1) },
        }))
    }

    fn page_problems(&self, page: &Pagination) -> Vec<String> {
        let mut problems = Vec::new();
        let size = page.size();
        if size == 0 {
            problems.push("Page size must be 1 or greater.".to_owned());
        }
        if let Some(max) = self.options.max_page_size().filter(|max| size > *max) {
            problems.push(format!("Page size {size} cannot be higher than {max}."));
        }
        if let Pagination::Offset { number, .. } = page {
            if *number == 0 {
                problems.push("Page number must be 1 or greater.".to_owned());
            }
            if let Some(max) = self.options.max_page_number().filter(|max| number > max) {
                problems.push(format!("Page number {number} cannot be higher than {max}."));
            }
        }
        problems
    }

    fn configuration_error(&self, resource_type: &ResourceType, problem: String, errors: &mut ValidationErrors) {
        error!(resource_type = %resource_type.name, %problem, "server-side configuration produced an invalid query expression");
        errors.push(QueryError::configuration(&resource_type.name, problem));
    }
}

/// Append the identity ascending unless the sort already orders by it.
fn with_tie_break(resource_type: &ResourceType, sort: Option<SortExpression>) -> SortExpression {
    let identity = &resource_type.identity;
    let key = SortElement::ascending(FieldChain::single(ResourceField::Attribute(identity.clone())));
    match sort {
        Some(mut sort) => {
            if !sort.elements.iter().any(|e| e.is_field(&identity.name)) {
                sort.elements.push(key);
            }
            sort
        }
        None => SortExpression { elements: vec![key] },
    }
}
