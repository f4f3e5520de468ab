//! `filter`, `filter[scope]` and, when enabled, the legacy
//! `filter[field]=value` / `filter[field][op]=value` notation.

use super::{check_capabilities, ParameterName, ReadContext};
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::{ExpressionInScope, FilterExpression};
use crate::expr::legacy::{parse_legacy_filter, LegacySite};
use crate::expr::{is_function_call, parse_filter};
use crate::graph::{Capability, ResourceType};

pub fn read(
    ctx: &ReadContext<'_>,
    name: &ParameterName,
    value: &str,
) -> Result<ExpressionInScope<FilterExpression>, ValidationErrors> {
    let legacy = ctx.options.legacy_filter_syntax_enabled();
    match name.brackets.as_slice() {
        [] => {
            let expression = read_expression(ctx, ctx.resource_type, name, value)?;
            Ok(ExpressionInScope::primary(expression))
        }
        [field] if legacy && !is_function_call(value) => read_legacy(ctx, name, field, None, value),
        [scope] => {
            let (chain, target) = ctx.scope(name, scope)?;
            let expression = read_expression(ctx, target, name, value)?;
            Ok(ExpressionInScope { scope: Some(chain), expression })
        }
        [field, operator] if legacy => read_legacy(ctx, name, field, Some(operator.as_str()), value),
        [_, _] => Err(QueryError::semantic(
            &name.raw,
            None,
            format!("Parameter '{}' uses the legacy filter notation, which is not enabled.", name.raw),
        )
        .into()),
        _ => Err(QueryError::semantic(&name.raw, None, format!("Parameter '{}' is not a valid filter parameter.", name.raw)).into()),
    }
}

fn read_expression(
    ctx: &ReadContext<'_>,
    resource_type: &ResourceType,
    name: &ParameterName,
    value: &str,
) -> Result<FilterExpression, ValidationErrors> {
    let parsed = parse_filter(ctx.graph, resource_type, value, 0).map_err(|e| QueryError::from_parse(&name.raw, e))?;
    check_capabilities(&name.raw, &parsed.chains, Capability::Filter, true)?;
    Ok(parsed.expression)
}

fn read_legacy(
    ctx: &ReadContext<'_>,
    name: &ParameterName,
    field: &str,
    operator: Option<&str>,
    value: &str,
) -> Result<ExpressionInScope<FilterExpression>, ValidationErrors> {
    let parsed = parse_legacy_filter(ctx.graph, ctx.resource_type, field, operator, value).map_err(|e| match e.site {
        LegacySite::Name => QueryError::semantic(&name.raw, None, e.error.message),
        LegacySite::Value => QueryError::from_parse(&name.raw, e.error),
    })?;
    check_capabilities(&name.raw, &parsed.chains, Capability::Filter, false)?;
    Ok(ExpressionInScope::primary(parsed.expression))
}
