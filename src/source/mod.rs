//! # Queryable Source Trait
//!
//! The contract between the compiler and a data backend. The compiler
//! emits backend-neutral instructions ([`Predicate`], [`OrderKey`],
//! [`Window`], [`Projection`]) and each source lowers them into its own
//! native query form, then executes that form.
//!
//! ## Implementations
//!
//! | Source | Module | Description |
//! |--------|--------|-------------|
//! | `MemorySource` | `memory` | Closures over an in-memory entity store |
//! | `SqlSource` | `sql` | PostgreSQL text with `$n` parameters |

pub mod memory;
pub mod sql;

use async_trait::async_trait;

use crate::compiler::plan::{Hop, OrderKey, Predicate, Projection, Window};
use crate::error::CompileError;
use crate::model::Row;
use crate::Result;

pub use memory::MemorySource;
pub use sql::{JoinMapping, RenderedQuery, SqlConnection, SqlMapping, SqlSource, TableMapping};

// ============================================================================
// Source capabilities
// ============================================================================

/// What a source can do natively; the compiler rewrites around the rest.
///
/// All fields default to false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCapabilities {
    /// Accepts `Window::Cursor`. Otherwise cursors become keyset predicates.
    pub supports_cursor: bool,
    /// Can bound included collections per parent row.
    pub supports_nested_window: bool,
}

// ============================================================================
// QueryableSource Trait
// ============================================================================

/// A backend that can lower and run compiled query instructions.
///
/// Lowering is synchronous and does no I/O; only [`execute`](Self::execute)
/// suspends.
#[async_trait]
pub trait QueryableSource: Send + Sync {
    /// The native, executable query form.
    type Query: Send + Sync + std::fmt::Debug;

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }

    /// Start a query over all rows of a resource type.
    fn root(&self, resource: &str) -> std::result::Result<Self::Query, CompileError>;

    fn apply_predicate(&self, query: Self::Query, predicate: &Predicate) -> std::result::Result<Self::Query, CompileError>;

    fn apply_order(&self, query: Self::Query, keys: &[OrderKey]) -> std::result::Result<Self::Query, CompileError>;

    fn apply_window(&self, query: Self::Query, window: &Window) -> std::result::Result<Self::Query, CompileError>;

    /// Shape result rows; `nested` holds one compiled query per included
    /// relationship, to be evaluated per parent row.
    fn apply_projection(
        &self,
        query: Self::Query,
        projection: &Projection,
        nested: Vec<(Hop, Self::Query)>,
    ) -> std::result::Result<Self::Query, CompileError>;

    /// Run a lowered query.
    async fn execute(&self, query: &Self::Query) -> Result<Vec<Row>>;
}
