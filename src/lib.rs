//! # resource-query: Resource Query Engine
//!
//! Turns the query parameters of a resource request (`filter`, `sort`,
//! `fields`, `include`, `page`) into validated query layers, and compiles
//! those layers into backend-neutral plans that a [`QueryableSource`] lowers
//! into its native query form.
//!
//! ## Design Principles
//!
//! 1. **Metadata-driven**: every field reference is resolved against a
//!    [`ResourceGraph`] and checked against its capability flags
//! 2. **Collect, then report**: reading and composing gather every problem
//!    into [`ValidationErrors`] instead of stopping at the first
//! 3. **Backend-agnostic compiler**: plans know nothing about storage; each
//!    source lowers them itself
//! 4. **Explicit overrides**: per-type [`ResourceDefinition`]s are passed in
//!    through a [`DefinitionRegistry`], never looked up globally
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resource_query::{MemorySource, QueryEngine, QueryOptions, RequestContext, ResourceGraph, ValueType};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> resource_query::Result<()> {
//! let graph = ResourceGraph::builder()
//!     .resource("people", ValueType::Int, |r| r.attr("name", ValueType::String))
//!     .build()?;
//! let source = MemorySource::new(&graph);
//! let engine = QueryEngine::new(graph, QueryOptions::default());
//!
//! let result = engine
//!     .query("people", [("filter", "startsWith(name,'A')"), ("sort", "-name")], &RequestContext::new(), &source, &CancellationToken::new())
//!     .await?;
//! for row in &result.rows {
//!     println!("{:?}", row.get("name"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Read | `reader` | `ParsedQuery` |
//! | Compose | `composer` | `QueryLayer` |
//! | Compile | `compiler` | `QueryPlan`, `ExecutablePlan` |
//! | Execute | `source` | `Row`s |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod graph;
pub mod expr;
pub mod reader;
pub mod composer;
pub mod compiler;
pub mod source;
pub mod config;
pub mod error;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{props, PropertyMap, Related, Row, Value, ValueType};

// ============================================================================
// Re-exports: Graph, expressions, errors
// ============================================================================

pub use graph::{
    AttrField, Capabilities, Capability, Cardinality, RelationshipField, ResourceGraph, ResourceType,
};
pub use expr::ast::{Cursor, FilterExpression, IncludeExpression, Pagination, SortExpression, SparseFieldSet};
pub use error::{CompileError, ErrorKind, QueryError, ValidationErrors};
pub use config::QueryOptions;

// ============================================================================
// Re-exports: Pipeline stages
// ============================================================================

pub use reader::{ParsedQuery, QueryStringReader};
pub use composer::{Composer, DefinitionContext, DefinitionRegistry, QueryLayer, RequestContext, ResourceDefinition};
pub use compiler::{Compiler, ExecutablePlan};
pub use compiler::plan::QueryPlan;
pub use source::{MemorySource, QueryableSource, SourceCapabilities, SqlConnection, SqlMapping, SqlSource};

// ============================================================================
// QueryEngine
// ============================================================================

/// The primary entry point. Owns the resource graph, options and override
/// registry; shared read-only across requests.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    graph: Arc<ResourceGraph>,
    options: QueryOptions,
    definitions: DefinitionRegistry,
}

/// Rows of one executed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// `page[after]` value for the next page; None when the page was not
    /// full or the query was not paginated.
    pub next_cursor: Option<Cursor>,
}

impl QueryEngine {
    pub fn new(graph: ResourceGraph, options: QueryOptions) -> Self {
        Self { graph: Arc::new(graph), options, definitions: DefinitionRegistry::default() }
    }

    pub fn with_definitions(mut self, definitions: DefinitionRegistry) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Read and compose the query parameters of a request on `resource_type`.
    #[tracing::instrument(skip(self, parameters, request))]
    pub fn read_query<K, V>(
        &self,
        resource_type: &str,
        parameters: impl IntoIterator<Item = (K, V)>,
        request: &RequestContext,
    ) -> Result<QueryLayer>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let resource = self
            .graph
            .resource_type(resource_type)
            .ok_or_else(|| Error::UnknownResourceType(resource_type.to_owned()))?;

        let parsed = QueryStringReader::new(&self.graph, &self.options)
            .read(resource, parameters)?;

        Composer::new(&self.graph, &self.options, &self.definitions, request)
            .compose(resource, &parsed)
            .map_err(Error::from)
    }

    /// Compile a composed layer for `source`.
    #[tracing::instrument(skip_all, fields(resource_type = %layer.resource_type.name))]
    pub fn compile<'s, S: QueryableSource>(&self, layer: &QueryLayer, source: &'s S) -> Result<ExecutablePlan<'s, S>> {
        Ok(Compiler::new(&self.graph).compile(layer, source)?)
    }

    /// Read, compile and execute in one step.
    #[tracing::instrument(skip(self, parameters, request, source, cancel))]
    pub async fn query<K, V, S>(
        &self,
        resource_type: &str,
        parameters: impl IntoIterator<Item = (K, V)>,
        request: &RequestContext,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<QueryResult>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        S: QueryableSource,
    {
        let layer = self.read_query(resource_type, parameters, request)?;
        let plan = self.compile(&layer, source)?;
        let rows = plan.execute(cancel).await?;
        let next_cursor = plan.next_cursor(&rows);
        Ok(QueryResult { rows, next_cursor })
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Resource type '{0}' does not exist.")]
    UnknownResourceType(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Query execution was cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(errors) => errors.status_code(),
            Error::Compile(e) if e.kind() == ErrorKind::ClientInput => 400,
            Error::UnknownResourceType(_) => 404,
            Error::Cancelled => 499,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
