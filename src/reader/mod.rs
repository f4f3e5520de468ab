//! # Per-parameter readers
//!
//! [`QueryStringReader`] splits raw query parameters by kind, hands each to
//! its reader, and collects every error instead of stopping at the first one.
//! Readers resolve relationship scopes (`sort[tags]`), enforce field
//! capabilities and configured limits, and produce typed expressions.

pub mod fields;
pub mod filter;
pub mod include;
pub mod page;
pub mod sort;

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::QueryOptions;
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::{ExpressionInScope, FieldChain, FilterExpression, IncludeExpression, SortExpression, SparseFieldSet};
use crate::expr::{parse_scope, ChainSite, ParameterKind};
use crate::graph::{Capability, ResourceGraph, ResourceType};

pub use page::PageRequest;

// ============================================================================
// Parameter names
// ============================================================================

/// A query parameter name split into its base and bracketed parts,
/// e.g. `filter[owner.tags][eq]` is `filter` with `["owner.tags", "eq"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterName {
    pub raw: String,
    pub base: String,
    pub brackets: Vec<String>,
}

impl ParameterName {
    /// Returns None for names with unbalanced brackets.
    pub fn parse(raw: &str) -> Option<Self> {
        let (base, mut rest) = match raw.find('[') {
            Some(i) => (&raw[..i], &raw[i..]),
            None => (raw, ""),
        };
        if base.is_empty() {
            return None;
        }
        let mut brackets = Vec::new();
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[')?;
            let close = inner.find(']')?;
            brackets.push(inner[..close].to_owned());
            rest = &inner[close + 1..];
        }
        Some(Self { raw: raw.to_owned(), base: base.to_owned(), brackets })
    }
}

// ============================================================================
// Reader output
// ============================================================================

/// Everything read from one request's query string, before composition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub filters: Vec<ExpressionInScope<FilterExpression>>,
    pub sorts: Vec<ExpressionInScope<SortExpression>>,
    pub includes: Option<IncludeExpression>,
    pub sparse_fields: Vec<SparseFieldSet>,
    pub pages: Vec<ExpressionInScope<PageRequest>>,
}

impl ParsedQuery {
    /// Conjunction of all filters for a scope (empty path = primary resource).
    pub fn filter_for(&self, scope: &[String]) -> Option<FilterExpression> {
        let matching = self
            .filters
            .iter()
            .filter(|f| f.scope_path() == scope)
            .map(|f| f.expression.clone())
            .collect();
        FilterExpression::and(matching)
    }

    pub fn sort_for(&self, scope: &[String]) -> Option<&SortExpression> {
        self.sorts.iter().find(|s| s.scope_path() == scope).map(|s| &s.expression)
    }

    pub fn page_for(&self, scope: &[String]) -> Option<&PageRequest> {
        self.pages.iter().find(|p| p.scope_path() == scope).map(|p| &p.expression)
    }

    pub fn fields_for(&self, resource_type: &str) -> Option<&SparseFieldSet> {
        self.sparse_fields.iter().find(|f| f.resource_type == resource_type)
    }
}

// ============================================================================
// Shared reader plumbing
// ============================================================================

/// What every reader needs: the graph, options and the primary resource type.
#[derive(Clone, Copy)]
pub struct ReadContext<'a> {
    pub graph: &'a ResourceGraph,
    pub options: &'a QueryOptions,
    pub resource_type: &'a ResourceType,
}

impl<'a> ReadContext<'a> {
    /// Resolve a bracketed relationship scope to its chain and target type.
    pub fn scope(&self, name: &ParameterName, text: &str) -> Result<(FieldChain, &'a ResourceType), QueryError> {
        let parsed = parse_scope(self.graph, self.resource_type, text, 0)
            .map_err(|e| QueryError::semantic(&name.raw, None, e.message))?;
        let chain = parsed.expression;
        let target = chain
            .last()
            .as_relationship()
            .and_then(|rel| self.graph.target_of(rel))
            .map(Arc::as_ref)
            .ok_or_else(|| QueryError::semantic(&name.raw, None, format!("Scope '{chain}' has no target type.")))?;
        Ok((chain, target))
    }
}

/// Check `capability` on every field of every referenced chain.
///
/// Positions are reported only when the chains were parsed from the value.
pub fn check_capabilities(
    parameter: &str,
    chains: &[ChainSite],
    capability: Capability,
    with_positions: bool,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    for site in chains {
        for (field, position) in site.chain.fields().iter().zip(&site.positions) {
            if !field.allows(capability) {
                errors.push(QueryError::semantic(
                    parameter,
                    with_positions.then_some(*position),
                    format!("{} {} '{}' is not allowed.", capability.verb(), field.kind_name(), field.name()),
                ));
            }
        }
    }
    errors.into_result(())
}

fn is_included(includes: Option<&IncludeExpression>, scope: &FieldChain) -> bool {
    let Some(includes) = includes else {
        return false;
    };
    let mut level = &includes.elements;
    for field in scope.fields() {
        match level.iter().find(|e| e.relationship.name == field.name()) {
            Some(element) => level = &element.children,
            None => return false,
        }
    }
    true
}

fn collect<T>(result: Result<T, ValidationErrors>, errors: &mut ValidationErrors) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            errors.extend(e);
            None
        }
    }
}

// ============================================================================
// QueryStringReader
// ============================================================================

/// Reads all query parameters of a request for one primary resource type.
pub struct QueryStringReader<'a> {
    graph: &'a ResourceGraph,
    options: &'a QueryOptions,
}

impl<'a> QueryStringReader<'a> {
    pub fn new(graph: &'a ResourceGraph, options: &'a QueryOptions) -> Self {
        Self { graph, options }
    }

    /// Read raw `(name, value)` parameters.
    ///
    /// All problems are collected and returned together.
    #[tracing::instrument(skip_all, fields(resource_type = %resource_type.name))]
    pub fn read<K, V>(
        &self,
        resource_type: &ResourceType,
        parameters: impl IntoIterator<Item = (K, V)>,
    ) -> Result<ParsedQuery, ValidationErrors>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let ctx = ReadContext { graph: self.graph, options: self.options, resource_type };
        let mut query = ParsedQuery::default();
        let mut errors = ValidationErrors::default();
        let mut seen = HashSet::new();
        let mut scoped: Vec<(String, FieldChain)> = Vec::new();

        for (raw_name, value) in parameters {
            let (raw_name, value) = (raw_name.as_ref(), value.as_ref());
            let kind = ParameterName::parse(raw_name).and_then(|name| {
                ParameterKind::from_name(&name.base).map(|kind| (kind, name))
            });
            let Some((kind, name)) = kind else {
                if !self.options.allow_unknown_query_parameters {
                    errors.push(QueryError::semantic(
                        raw_name,
                        None,
                        format!("Unknown query parameter '{raw_name}'."),
                    ));
                }
                continue;
            };
            if self.options.is_disabled(kind) {
                errors.push(QueryError::semantic(
                    raw_name,
                    None,
                    format!("Usage of the parameter '{kind}' is not allowed."),
                ));
                continue;
            }
            // fields repeat per resource type, checked once the type is resolved
            if !matches!(kind, ParameterKind::Filter | ParameterKind::Fields) && !seen.insert(raw_name.to_owned()) {
                errors.push(QueryError::semantic(
                    raw_name,
                    None,
                    format!("Parameter '{raw_name}' can only be specified once."),
                ));
                continue;
            }
            tracing::debug!(parameter = raw_name, value, "reading query parameter");

            match kind {
                ParameterKind::Filter => {
                    if let Some(filter) = collect(filter::read(&ctx, &name, value), &mut errors) {
                        if let Some(scope) = &filter.scope {
                            scoped.push((name.raw.clone(), scope.clone()));
                        }
                        query.filters.push(filter);
                    }
                }
                ParameterKind::Sort => {
                    if let Some(sort) = collect(sort::read(&ctx, &name, value), &mut errors) {
                        if let Some(scope) = &sort.scope {
                            scoped.push((name.raw.clone(), scope.clone()));
                        }
                        query.sorts.push(sort);
                    }
                }
                ParameterKind::Include => {
                    if let Some(includes) = collect(include::read(&ctx, &name, value), &mut errors) {
                        query.includes = Some(includes);
                    }
                }
                ParameterKind::Fields => {
                    for set in collect(fields::read(&ctx, &name, value), &mut errors).unwrap_or_default() {
                        if query.fields_for(&set.resource_type).is_some() {
                            errors.push(QueryError::semantic(
                                raw_name,
                                None,
                                format!("Fields for resource type '{}' are specified more than once.", set.resource_type),
                            ));
                        } else {
                            query.sparse_fields.push(set);
                        }
                    }
                }
                ParameterKind::Page => {
                    if let Some(scopes) = collect(page::read(&ctx, &name, value, &mut query.pages), &mut errors) {
                        scoped.extend(scopes.into_iter().map(|scope| (name.raw.clone(), scope)));
                    }
                }
            }
        }

        for (parameter, scope) in &scoped {
            if !is_included(query.includes.as_ref(), scope) {
                errors.push(QueryError::semantic(
                    parameter,
                    None,
                    format!("Relationship scope '{scope}' must also be included, e.g. include={scope}."),
                ));
            }
        }
        for request in &query.pages {
            if request.expression.after.is_some() && request.expression.number.is_some() {
                errors.push(QueryError::semantic(
                    "page[after]",
                    None,
                    "Parameters 'page[number]' and 'page[after]' cannot be combined.",
                ));
            }
        }

        if !errors.is_empty() {
            tracing::warn!(errors = errors.len(), "rejected query parameters");
            return Err(errors);
        }
        tracing::debug!(
            filters = query.filters.len(),
            sorts = query.sorts.len(),
            includes = %query.includes.as_ref().map(|i| i.to_string()).unwrap_or_default(),
            "query parameters read"
        );
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueType;

    #[test]
    fn test_parameter_name() {
        let name = ParameterName::parse("filter[owner.tags][eq]").unwrap();
        assert_eq!(name.base, "filter");
        assert_eq!(name.brackets, vec!["owner.tags".to_owned(), "eq".to_owned()]);
        assert_eq!(ParameterName::parse("sort").unwrap().brackets.len(), 0);
        assert!(ParameterName::parse("page[size").is_none());
        assert!(ParameterName::parse("[size]").is_none());
    }

    fn graph() -> ResourceGraph {
        ResourceGraph::builder()
            .resource("todoItems", ValueType::Int, |r| {
                r.attr("description", ValueType::String).has_many("tags", "tags")
            })
            .resource("tags", ValueType::Int, |r| r.attr("name", ValueType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn test_errors_are_collected() {
        let g = graph();
        let options = QueryOptions::default();
        let todo = g.resource_type("todoItems").unwrap();
        let errors = QueryStringReader::new(&g, &options)
            .read(todo, [("sort", "nope"), ("filter", "equals(x,'1')"), ("foo", "bar")])
            .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.iter().filter_map(QueryError::parameter).collect::<Vec<_>>(), vec!["sort", "filter", "foo"]);
    }

    #[test]
    fn test_unknown_parameters_allowed() {
        let g = graph();
        let options = QueryOptions { allow_unknown_query_parameters: true, ..QueryOptions::default() };
        let todo = g.resource_type("todoItems").unwrap();
        assert!(QueryStringReader::new(&g, &options).read(todo, [("foo", "bar")]).is_ok());
    }

    #[test]
    fn test_scope_must_be_included() {
        let g = graph();
        let options = QueryOptions::default();
        let todo = g.resource_type("todoItems").unwrap();
        let reader = QueryStringReader::new(&g, &options);
        let errors = reader.read(todo, [("sort[tags]", "name")]).unwrap_err();
        assert!(errors.iter().next().unwrap().message().contains("must also be included"));
        let query = reader.read(todo, [("sort[tags]", "name"), ("include", "tags")]).unwrap();
        assert!(query.sort_for(&["tags".to_owned()]).is_some());
    }

    #[test]
    fn test_multiple_filters_are_anded() {
        let g = graph();
        let options = QueryOptions::default();
        let todo = g.resource_type("todoItems").unwrap();
        let query = QueryStringReader::new(&g, &options)
            .read(todo, [("filter", "equals(description,'a')"), ("filter", "has(tags)")])
            .unwrap();
        assert_eq!(query.filter_for(&[]).unwrap().to_string(), "and(equals(description,'a'),has(tags))");
    }

    #[test]
    fn test_duplicate_and_disabled_parameters() {
        let g = graph();
        let options = QueryOptions { disabled_parameters: vec![ParameterKind::Include], ..QueryOptions::default() };
        let todo = g.resource_type("todoItems").unwrap();
        let errors = QueryStringReader::new(&g, &options)
            .read(todo, [("sort", "id"), ("sort", "description"), ("include", "tags")])
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message().contains("only be specified once")));
        assert!(errors.iter().any(|e| e.message().contains("'include' is not allowed")));
    }

    #[test]
    fn test_fields_repeat_per_resource_type() {
        let g = graph();
        let options = QueryOptions::default();
        let todo = g.resource_type("todoItems").unwrap();
        let reader = QueryStringReader::new(&g, &options);

        let query = reader.read(todo, [("fields", "todoItems:description,tags:name")]).unwrap();
        assert!(query.fields_for("todoItems").is_some());
        assert!(query.fields_for("tags").is_some());

        let query = reader.read(todo, [("fields", "description"), ("fields", "tags:name")]).unwrap();
        assert_eq!(query.sparse_fields.len(), 2);

        let errors = reader.read(todo, [("fields", "description"), ("fields[todoItems]", "tags")]).unwrap_err();
        assert_eq!(errors.iter().next().unwrap().message(), "Fields for resource type 'todoItems' are specified more than once.");
    }
}
