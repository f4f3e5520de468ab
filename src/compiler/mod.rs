//! # Queryable compiler
//!
//! Turns a composed [`QueryLayer`] into a backend-neutral [`QueryPlan`], then
//! lowers the plan through a [`QueryableSource`] into an [`ExecutablePlan`].
//!
//! Field chains become property paths here. A to-many hop is only legal at
//! the end of a chain wrapped by `count()` or `has()`; anywhere else it is a
//! cardinality error. Compile errors fail fast.

pub mod plan;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::composer::QueryLayer;
use crate::error::CompileError;
use crate::expr::ast::{
    ComparisonOp, Cursor, FieldChain, FilterExpression, LogicalOp, Operand, Pagination, SortTarget,
};
use crate::graph::{Capability, ResourceField, ResourceGraph};
use crate::model::{Row, Value};
use crate::source::{QueryableSource, SourceCapabilities};
use crate::{Error, Result};

use plan::{Hop, NestedPlan, OrderKey, Predicate, Projection, PropertyPath, QueryPlan, Scalar, Window};

// ============================================================================
// Compiler
// ============================================================================

/// Compiles layers against a resource graph.
pub struct Compiler<'g> {
    graph: &'g ResourceGraph,
}

impl<'g> Compiler<'g> {
    pub fn new(graph: &'g ResourceGraph) -> Self {
        Self { graph }
    }

    /// Compile and lower a layer into an executable plan for `source`.
    pub fn compile<'s, S: QueryableSource>(
        &self,
        layer: &QueryLayer,
        source: &'s S,
    ) -> std::result::Result<ExecutablePlan<'s, S>, CompileError> {
        let plan = self.plan(layer, source.capabilities())?;
        let query = lower(source, &plan)?;
        debug!(plan = %plan, "compiled query plan");
        Ok(ExecutablePlan { plan, query, source })
    }

    /// The backend-neutral plan for a layer.
    pub fn plan(&self, layer: &QueryLayer, capabilities: SourceCapabilities) -> std::result::Result<QueryPlan, CompileError> {
        let mut predicate = layer.filter.as_ref().map(lower_filter).transpose()?;

        let order = match &layer.sort {
            Some(sort) => sort
                .elements
                .iter()
                .map(|element| {
                    let key = match &element.target {
                        SortTarget::Field(chain) => Scalar::Property(scalar_path(chain)?),
                        SortTarget::Count(chain) => Scalar::Count(collection_path(chain)?),
                    };
                    Ok(OrderKey { key, descending: element.descending })
                })
                .collect::<std::result::Result<Vec<_>, CompileError>>()?,
            None => Vec::new(),
        };

        let window = match &layer.pagination {
            Some(pagination) => {
                let (keyset, window) = lower_pagination(pagination, &order, capabilities)?;
                if let Some(keyset) = keyset {
                    predicate = Some(match predicate {
                        Some(existing) => Predicate::and(vec![existing, keyset]),
                        None => keyset,
                    });
                }
                Some(window)
            }
            None => None,
        };

        let mut nested = Vec::with_capacity(layer.nested.len());
        for child in &layer.nested {
            if child.layer.pagination.is_some() && !capabilities.supports_nested_window {
                return Err(CompileError::Unsupported(format!(
                    "pagination of included relationship '{}'",
                    child.relationship.name
                )));
            }
            nested.push(NestedPlan {
                hop: Hop::from(child.relationship.as_ref()),
                plan: self.plan(&child.layer, capabilities)?,
            });
        }

        Ok(QueryPlan {
            resource: layer.resource_type.name.clone(),
            predicate,
            order,
            window,
            projection: self.projection(layer),
            nested,
        })
    }

    fn projection(&self, layer: &QueryLayer) -> Projection {
        let resource_type = &layer.resource_type;
        let identity = &resource_type.identity;
        let (attributes, linkage) = match &layer.selection {
            None => (
                self.graph
                    .attributes(resource_type)
                    .iter()
                    .filter(|a| a.allows(Capability::View))
                    .map(|a| a.property.clone())
                    .collect(),
                Vec::new(),
            ),
            Some(selection) => (
                selection
                    .attributes()
                    .filter(|a| a.name != identity.name)
                    .map(|a| a.property.clone())
                    .collect(),
                selection
                    .relationships()
                    .filter(|r| layer.nested(&r.name).is_none())
                    .map(|r| Hop::from(r.as_ref()))
                    .collect(),
            ),
        };
        Projection { identity: identity.property.clone(), attributes, linkage }
    }
}

/// Lower a plan through a source's `apply_*` steps, nested plans first.
fn lower<S: QueryableSource>(source: &S, plan: &QueryPlan) -> std::result::Result<S::Query, CompileError> {
    let mut query = source.root(&plan.resource)?;
    if let Some(predicate) = &plan.predicate {
        query = source.apply_predicate(query, predicate)?;
    }
    if !plan.order.is_empty() {
        query = source.apply_order(query, &plan.order)?;
    }
    if let Some(window) = &plan.window {
        query = source.apply_window(query, window)?;
    }
    let nested = plan
        .nested
        .iter()
        .map(|n| Ok((n.hop.clone(), lower(source, &n.plan)?)))
        .collect::<std::result::Result<Vec<_>, CompileError>>()?;
    source.apply_projection(query, &plan.projection, nested)
}

// ============================================================================
// Field chains
// ============================================================================

fn hops(chain: &FieldChain) -> Vec<Hop> {
    chain.relationships().map(|r| Hop::from(r.as_ref())).collect()
}

/// A chain that must yield one value: to-one hops, then an attribute.
fn scalar_path(chain: &FieldChain) -> std::result::Result<PropertyPath, CompileError> {
    if let Some(rel) = chain.inner_to_many() {
        return Err(CompileError::Cardinality { chain: chain.to_string(), relationship: rel.name.clone() });
    }
    match chain.last() {
        ResourceField::Attribute(attr) => Ok(PropertyPath { hops: hops(chain), attribute: Some(attr.property.clone()) }),
        ResourceField::Relationship(rel) if rel.is_to_many() => {
            Err(CompileError::Cardinality { chain: chain.to_string(), relationship: rel.name.clone() })
        }
        ResourceField::Relationship(rel) => Err(CompileError::Unsupported(format!(
            "field chain '{chain}' ends in relationship '{}' where a value is required",
            rel.name
        ))),
    }
}

/// A chain that names a related collection: to-one hops, then a to-many hop.
fn collection_path(chain: &FieldChain) -> std::result::Result<PropertyPath, CompileError> {
    if let Some(rel) = chain.inner_to_many() {
        return Err(CompileError::Cardinality { chain: chain.to_string(), relationship: rel.name.clone() });
    }
    match chain.last() {
        ResourceField::Relationship(rel) if rel.is_to_many() => Ok(PropertyPath { hops: hops(chain), attribute: None }),
        _ => Err(CompileError::Unsupported(format!(
            "field chain '{chain}' does not end in a to-many relationship"
        ))),
    }
}

// ============================================================================
// Filters
// ============================================================================

fn lower_operand(operand: &Operand) -> std::result::Result<Scalar, CompileError> {
    Ok(match operand {
        Operand::Field(chain) => Scalar::Property(scalar_path(chain)?),
        Operand::Count(chain) => Scalar::Count(collection_path(chain)?),
        Operand::Literal(literal) => Scalar::Value(literal.value.clone()),
    })
}

fn lower_filter(filter: &FilterExpression) -> std::result::Result<Predicate, CompileError> {
    Ok(match filter {
        FilterExpression::Comparison { op, left, right } => {
            let left = lower_operand(left)?;
            let right = lower_operand(right)?;
            match (op, left, right) {
                (ComparisonOp::Equals, scalar, Scalar::Value(Value::Null))
                | (ComparisonOp::Equals, Scalar::Value(Value::Null), scalar) => Predicate::IsNull(scalar),
                (op, left, right) => Predicate::Compare { op: *op, left, right },
            }
        }
        FilterExpression::Logical { op, operands } => {
            let lowered = operands.iter().map(lower_filter).collect::<std::result::Result<Vec<_>, _>>()?;
            match op {
                LogicalOp::And => Predicate::and(lowered),
                LogicalOp::Or => Predicate::Or(lowered),
                LogicalOp::Not => Predicate::Not(Box::new(Predicate::and(lowered))),
            }
        }
        FilterExpression::TextMatch { kind, field, text } => Predicate::Text {
            kind: *kind,
            path: scalar_path(field)?,
            text: text.value.to_plain_string(),
        },
        FilterExpression::Any { field, values } => Predicate::In {
            path: scalar_path(field)?,
            values: values.iter().map(|l| l.value.clone()).collect(),
        },
        FilterExpression::Has { relationship, filter } => Predicate::Exists {
            path: collection_path(relationship)?,
            filter: filter.as_deref().map(lower_filter).transpose()?.map(Box::new),
        },
    })
}

// ============================================================================
// Pagination
// ============================================================================

/// The window for a layer, plus a keyset predicate when a cursor has to be
/// emulated for a source without native cursor support.
fn lower_pagination(
    pagination: &Pagination,
    order: &[OrderKey],
    capabilities: SourceCapabilities,
) -> std::result::Result<(Option<Predicate>, Window), CompileError> {
    match pagination {
        Pagination::Offset { size, number } => {
            let take = u64::from(*size);
            let skip = u64::from(number.saturating_sub(1)) * take;
            Ok((None, Window::Offset { skip, take }))
        }
        Pagination::Cursor { size, after } => {
            let take = u64::from(*size);
            let after = after.as_ref().map(|c| c.0.clone());
            if let Some(values) = &after {
                if values.len() != order.len() {
                    return Err(CompileError::InvalidCursor(format!(
                        "expected {} sort values, found {}",
                        order.len(),
                        values.len()
                    )));
                }
            }
            if capabilities.supports_cursor {
                return Ok((None, Window::Cursor { after, take }));
            }
            let keyset = after.map(|values| keyset(order, &values));
            Ok((keyset, Window::Offset { skip: 0, take }))
        }
    }
}

/// Rows strictly after `values` in `order`, with nulls first ascending and
/// last descending.
fn keyset(order: &[OrderKey], values: &[Value]) -> Predicate {
    let mut disjuncts = Vec::new();
    for (i, (key, value)) in order.iter().zip(values).enumerate() {
        let Some(after) = after_key(key, value) else {
            continue;
        };
        let mut conjuncts: Vec<Predicate> = order[..i]
            .iter()
            .zip(values)
            .map(|(k, v)| equal_key(&k.key, v))
            .collect();
        conjuncts.push(after);
        disjuncts.push(Predicate::and(conjuncts));
    }
    match disjuncts.len() {
        0 => Predicate::False,
        1 => disjuncts.remove(0),
        _ => Predicate::Or(disjuncts),
    }
}

fn equal_key(key: &Scalar, value: &Value) -> Predicate {
    if value.is_null() {
        Predicate::IsNull(key.clone())
    } else {
        Predicate::Compare { op: ComparisonOp::Equals, left: key.clone(), right: Scalar::Value(value.clone()) }
    }
}

fn after_key(key: &OrderKey, value: &Value) -> Option<Predicate> {
    let scalar = key.key.clone();
    let bound = Scalar::Value(value.clone());
    match (key.descending, value.is_null()) {
        (false, true) => Some(Predicate::Not(Box::new(Predicate::IsNull(scalar)))),
        (false, false) => Some(Predicate::Compare { op: ComparisonOp::GreaterThan, left: scalar, right: bound }),
        (true, true) => None,
        (true, false) => Some(Predicate::Or(vec![
            Predicate::Compare { op: ComparisonOp::LessThan, left: scalar.clone(), right: bound },
            Predicate::IsNull(scalar),
        ])),
    }
}

impl Cursor {
    /// Cursor pointing just past `row`, taken from its order key values.
    pub fn from_row(row: &Row) -> Self {
        Cursor(row.sort_key.clone())
    }
}

// ============================================================================
// ExecutablePlan
// ============================================================================

/// A plan lowered into a source's native form, ready to run.
pub struct ExecutablePlan<'s, S: QueryableSource> {
    plan: QueryPlan,
    query: S::Query,
    source: &'s S,
}

impl<S: QueryableSource> ExecutablePlan<'_, S> {
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// The source-native query.
    pub fn native(&self) -> &S::Query {
        &self.query
    }

    /// Run the plan. Cancellation aborts the run and discards partial rows.
    #[tracing::instrument(skip_all, fields(resource = %self.plan.resource))]
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<Vec<Row>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("query execution cancelled");
                Err(Error::Cancelled)
            }
            rows = self.source.execute(&self.query) => {
                let rows = rows?;
                trace!(rows = rows.len(), "query executed");
                Ok(rows)
            }
        }
    }

    /// Cursor for the page after `rows`, or None when `rows` was the last page.
    pub fn next_cursor(&self, rows: &[Row]) -> Option<Cursor> {
        let take = self.plan.window.as_ref()?.take();
        if (rows.len() as u64) < take {
            return None;
        }
        rows.last().map(Cursor::from_row)
    }
}

impl<S: QueryableSource> std::fmt::Debug for ExecutablePlan<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutablePlan").field("plan", &self.plan).field("query", &self.query).finish()
    }
}
