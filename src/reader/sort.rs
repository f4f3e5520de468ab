//! `sort` and `sort[scope]`.
//!
//! No default ordering is added here; tie-breaking belongs to the composer.

use super::{check_capabilities, ParameterName, ReadContext};
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::{ExpressionInScope, SortExpression};
use crate::expr::parse_sort;
use crate::graph::Capability;

pub fn read(
    ctx: &ReadContext<'_>,
    name: &ParameterName,
    value: &str,
) -> Result<ExpressionInScope<SortExpression>, ValidationErrors> {
    let (scope, resource_type) = match name.brackets.as_slice() {
        [] => (None, ctx.resource_type),
        [scope] => {
            let (chain, target) = ctx.scope(name, scope)?;
            (Some(chain), target)
        }
        _ => {
            return Err(QueryError::semantic(&name.raw, None, format!("Parameter '{}' is not a valid sort parameter.", name.raw)).into());
        }
    };

    let parsed = parse_sort(ctx.graph, resource_type, value, 0).map_err(|e| QueryError::from_parse(&name.raw, e))?;
    check_capabilities(&name.raw, &parsed.chains, Capability::Sort, true)?;
    Ok(ExpressionInScope { scope, expression: parsed.expression })
}
