//! End-to-end tests for the full query pipeline.
//!
//! Each test exercises: read -> compose -> compile -> execute against MemorySource.

mod common;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use resource_query::compiler::plan::{Hop, OrderKey, Predicate, Projection, Window};
use resource_query::source::memory::MemoryQuery;
use resource_query::{
    CompileError, DefinitionContext, DefinitionRegistry, Error, FilterExpression, MemorySource, QueryEngine,
    QueryOptions, QueryResult, QueryableSource, RequestContext, ResourceDefinition, Row, SourceCapabilities, Value,
};
use tokio_util::sync::CancellationToken;

use common::{engine, engine_with, ids, source};

async fn run(engine: &QueryEngine, resource_type: &str, params: &[(&str, &str)]) -> QueryResult {
    engine
        .query(resource_type, params.iter().copied(), &RequestContext::new(), &source(), &CancellationToken::new())
        .await
        .unwrap()
}

async fn todo_ids(filter: &str) -> Vec<i64> {
    ids(&run(&engine(), "todoItems", &[("filter", filter)]).await.rows)
}

// ============================================================================
// 1. Filters
// ============================================================================

#[tokio::test]
async fn test_filter_comparisons() {
    assert_eq!(todo_ids("equals(priority,'3')").await, vec![1, 4]);
    assert_eq!(todo_ids("greaterOrEqual(priority,'2')").await, vec![1, 3, 4]);
    assert_eq!(todo_ids("lessThan(priority,'2')").await, vec![2]);
    assert_eq!(todo_ids("equals(priority,null)").await, vec![5]);
}

#[tokio::test]
async fn test_filter_across_to_one() {
    assert_eq!(todo_ids("equals(owner.firstName,'John')").await, vec![1, 2]);
}

#[tokio::test]
async fn test_filter_text_and_sets() {
    assert_eq!(todo_ids("contains(description,'o')").await, vec![3, 4]);
    assert_eq!(todo_ids("startsWith(description,'Bu')").await, vec![1, 2]);
    assert_eq!(todo_ids("endsWith(description,'disk')").await, vec![5]);
    assert_eq!(todo_ids("any(priority,'1','2')").await, vec![2, 3]);
}

#[tokio::test]
async fn test_filter_logical() {
    assert_eq!(todo_ids("or(equals(priority,'3'),equals(priority,null))").await, vec![1, 4, 5]);
    assert_eq!(
        todo_ids("and(not(equals(priority,'3')),not(equals(priority,null)))").await,
        vec![2, 3]
    );
}

#[tokio::test]
async fn test_filter_on_to_many_aggregates() {
    assert_eq!(todo_ids("has(tags)").await, vec![1, 2, 4]);
    assert_eq!(todo_ids("has(tags,equals(name,'work'))").await, vec![2, 4]);
    assert_eq!(todo_ids("greaterThan(count(tags),'1')").await, vec![2]);
    assert_eq!(todo_ids("equals(count(tags),'0')").await, vec![3, 5]);
}

#[tokio::test]
async fn test_multiple_filters_are_and_ed() {
    let result = run(&engine(), "todoItems", &[("filter", "has(tags)"), ("filter", "equals(priority,'3')")]).await;
    assert_eq!(ids(&result.rows), vec![1, 4]);
}

#[tokio::test]
async fn test_bare_to_many_hop_is_a_client_error() {
    let error = engine()
        .query(
            "todoItems",
            [("filter", "equals(tags.name,'home')")],
            &RequestContext::new(),
            &source(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    let Error::Validation(errors) = &error else {
        panic!("Expected validation errors, got {error}");
    };
    assert!(errors.iter().next().is_some_and(|e| e.message().contains("failed to match the pattern")));
    assert_eq!(error.status_code(), 400);
}

// ============================================================================
// 2. Sorting and pagination
// ============================================================================

#[tokio::test]
async fn test_sort_descending_nulls_last() {
    let result = run(&engine(), "todoItems", &[("sort", "-priority")]).await;
    assert_eq!(ids(&result.rows), vec![1, 4, 3, 2, 5]);
}

#[tokio::test]
async fn test_sort_ascending_nulls_first() {
    let result = run(&engine(), "todoItems", &[("sort", "priority,-description")]).await;
    assert_eq!(ids(&result.rows), vec![5, 2, 3, 4, 1]);
}

#[tokio::test]
async fn test_sort_by_count() {
    let result = run(&engine(), "todoItems", &[("sort", "-count(tags)")]).await;
    assert_eq!(ids(&result.rows), vec![2, 1, 4, 3, 5]);
}

#[tokio::test]
async fn test_sort_across_to_one() {
    let result = run(&engine(), "todoItems", &[("sort", "owner.firstName"), ("filter", "has(tags)")]).await;
    // Jane before John; ties broken by id.
    assert_eq!(ids(&result.rows), vec![4, 1, 2]);
}

#[tokio::test]
async fn test_offset_pages_are_stable() {
    let engine = engine();
    let mut seen = Vec::new();
    for number in ["1", "2", "3"] {
        let result = run(&engine, "todoItems", &[("sort", "-priority"), ("page[size]", "2"), ("page[number]", number)]).await;
        seen.push(ids(&result.rows));
    }
    assert_eq!(seen, vec![vec![1, 4], vec![3, 2], vec![5]]);
}

#[tokio::test]
async fn test_default_page_size_applies_to_primary() {
    let options = QueryOptions { default_page_size: Some(3), ..QueryOptions::default() };
    let result = run(&engine_with(options), "todoItems", &[]).await;
    assert_eq!(ids(&result.rows), vec![1, 2, 3]);
    assert!(result.next_cursor.is_some());
}

/// MemorySource without native cursor support, so the compiler has to
/// emulate cursors with keyset predicates.
struct KeysetOnly(MemorySource);

#[async_trait]
impl QueryableSource for KeysetOnly {
    type Query = MemoryQuery;

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities { supports_cursor: false, supports_nested_window: true }
    }

    fn root(&self, resource: &str) -> Result<MemoryQuery, CompileError> {
        self.0.root(resource)
    }

    fn apply_predicate(&self, query: MemoryQuery, predicate: &Predicate) -> Result<MemoryQuery, CompileError> {
        self.0.apply_predicate(query, predicate)
    }

    fn apply_order(&self, query: MemoryQuery, keys: &[OrderKey]) -> Result<MemoryQuery, CompileError> {
        self.0.apply_order(query, keys)
    }

    fn apply_window(&self, query: MemoryQuery, window: &Window) -> Result<MemoryQuery, CompileError> {
        assert!(matches!(window, Window::Offset { .. }), "cursor window handed to a source without cursor support");
        self.0.apply_window(query, window)
    }

    fn apply_projection(
        &self,
        query: MemoryQuery,
        projection: &Projection,
        nested: Vec<(Hop, MemoryQuery)>,
    ) -> Result<MemoryQuery, CompileError> {
        self.0.apply_projection(query, projection, nested)
    }

    async fn execute(&self, query: &MemoryQuery) -> resource_query::Result<Vec<Row>> {
        self.0.execute(query).await
    }
}

async fn walk_cursor_pages<S: QueryableSource>(source: &S, sort: &str) -> Vec<Vec<i64>> {
    let engine = engine();
    let mut pages = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let mut params = vec![("sort", sort.to_owned()), ("page[size]", "2".to_owned())];
        if let Some(cursor) = &after {
            params.push(("page[after]", cursor.clone()));
        }
        let result = engine
            .query("todoItems", params, &RequestContext::new(), source, &CancellationToken::new())
            .await
            .unwrap();
        if !result.rows.is_empty() {
            pages.push(ids(&result.rows));
        }
        match result.next_cursor {
            Some(cursor) => after = Some(cursor.encode()),
            None => break,
        }
        assert!(pages.len() <= 5, "cursor paging does not terminate");
    }
    pages
}

#[tokio::test]
async fn test_cursor_paging_native_and_emulated_agree() {
    for sort in ["priority", "-priority", "-count(tags),description"] {
        let native = walk_cursor_pages(&source(), sort).await;
        let emulated = walk_cursor_pages(&KeysetOnly(source()), sort).await;
        assert_eq!(native, emulated, "sort={sort}");
        assert_eq!(native.concat().len(), 5, "sort={sort}");
    }
    assert_eq!(walk_cursor_pages(&source(), "priority").await, vec![vec![5, 2], vec![3, 1], vec![4]]);
}

// ============================================================================
// 3. Includes and sparse fields
// ============================================================================

#[tokio::test]
async fn test_scoped_filter_restricts_only_related_rows() {
    let result = run(
        &engine(),
        "people",
        &[("include", "todoItems"), ("filter[todoItems]", "equals(priority,'3')")],
    )
    .await;
    assert_eq!(ids(&result.rows), vec![1, 2, 3]);
    let related: Vec<Vec<i64>> = result
        .rows
        .iter()
        .map(|person| person.related("todoItems").into_iter().filter_map(|r| r.id.as_int()).collect())
        .collect();
    assert_eq!(related, vec![vec![1], vec![4], vec![]]);
}

#[tokio::test]
async fn test_nested_include_with_scoped_sort_and_page() {
    let result = run(
        &engine(),
        "people",
        &[
            ("include", "todoItems.tags"),
            ("sort[todoItems]", "-priority"),
            ("page[size]", "todoItems:1"),
            ("filter", "equals(firstName,'John')"),
        ],
    )
    .await;
    let john = &result.rows[0];
    let todos = john.related("todoItems");
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].id, Value::Int(1));
    let tags: Vec<&Value> = todos[0].related("tags").into_iter().map(|t| &t.id).collect();
    assert_eq!(tags, vec![&Value::Int(10)]);
    assert_eq!(todos[0].related("tags")[0].get("name"), Some(&Value::from("home")));
}

#[tokio::test]
async fn test_sparse_fields_and_linkage() {
    let result = run(
        &engine(),
        "todoItems",
        &[("fields[todoItems]", "description,owner"), ("filter", "equals(id,'1')")],
    )
    .await;
    let row = &result.rows[0];
    assert_eq!(row.get("description"), Some(&Value::from("Buy milk")));
    assert_eq!(row.get("priority"), None);
    let owner = row.related("owner");
    assert_eq!(owner[0].id, Value::Int(1));
    assert!(owner[0].attributes.is_empty());
    assert!(!row.relationships.contains_key("tags"));
}

#[tokio::test]
async fn test_attribute_storage_property_is_projected() {
    let result = run(&engine(), "todoItems", &[("filter", "equals(id,'2')")]).await;
    assert_eq!(result.rows[0].get("internal_note"), Some(&Value::from("note 2")));
}

// ============================================================================
// 4. Resource definitions
// ============================================================================

/// Hides todo items without a priority unless the request opts in.
struct HideUnprioritized;

impl ResourceDefinition for HideUnprioritized {
    fn on_apply_filter(&self, existing: Option<FilterExpression>, ctx: &DefinitionContext<'_>) -> Option<FilterExpression> {
        if ctx.request.get("showAll") == Some(&Value::Bool(true)) {
            return existing;
        }
        let Ok(forced) = ctx.parse_filter("not(equals(priority,null))") else {
            return existing;
        };
        match existing {
            Some(existing) => FilterExpression::and(vec![existing, forced]),
            None => Some(forced),
        }
    }
}

#[tokio::test]
async fn test_definition_filter_applies_to_primary_and_nested_layers() {
    let engine = engine().with_definitions(DefinitionRegistry::new().register("todoItems", HideUnprioritized));
    let result = engine
        .query("todoItems", [("sort", "id")], &RequestContext::new(), &source(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids(&result.rows), vec![1, 2, 3, 4]);

    let request = RequestContext::new().with("showAll", true);
    let result = engine
        .query("todoItems", [("sort", "id")], &request, &source(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids(&result.rows), vec![1, 2, 3, 4, 5]);

    let layer = engine.read_query("people", [("include", "todoItems")], &RequestContext::new()).unwrap();
    assert!(layer.nested("todoItems").and_then(|l| l.filter.as_ref()).is_some());
}

// ============================================================================
// 5. Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_query_returns_no_rows() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = engine()
        .query("todoItems", Vec::<(&str, &str)>::new(), &RequestContext::new(), &source(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Cancelled));
}
