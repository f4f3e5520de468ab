//! `page[size]`, `page[number]` and `page[after]`.
//!
//! Size and number accept scoped values, e.g. `page[size]=10,tags:5`.
//! Values outside `[1, maximum]` are rejected, never clamped.

use super::{ParameterName, ReadContext};
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::{Cursor, ExpressionInScope, FieldChain};
use crate::expr::{parse_page_values, PageValue};

/// Requested pagination for one scope, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    pub size: Option<u32>,
    pub number: Option<u32>,
    pub after: Option<Cursor>,
}

fn entry<'p>(
    pages: &'p mut Vec<ExpressionInScope<PageRequest>>,
    scope: Option<&FieldChain>,
) -> &'p mut PageRequest {
    let index = match pages.iter().position(|p| p.scope.as_ref() == scope) {
        Some(i) => i,
        None => {
            pages.push(ExpressionInScope { scope: scope.cloned(), expression: PageRequest::default() });
            pages.len() - 1
        }
    };
    &mut pages[index].expression
}

/// Read one page parameter into `pages`, returning the scopes it used.
pub fn read(
    ctx: &ReadContext<'_>,
    name: &ParameterName,
    value: &str,
    pages: &mut Vec<ExpressionInScope<PageRequest>>,
) -> Result<Vec<FieldChain>, ValidationErrors> {
    let invalid = || {
        QueryError::semantic(
            &name.raw,
            None,
            format!("Parameter '{}' is not a valid page parameter; use page[size], page[number] or page[after].", name.raw),
        )
    };
    let [field] = name.brackets.as_slice() else {
        return Err(invalid().into());
    };

    match field.as_str() {
        "after" => {
            let cursor = Cursor::decode(value)
                .ok_or_else(|| QueryError::semantic(&name.raw, Some(0), "The value is not a valid pagination cursor."))?;
            entry(pages, None).after = Some(cursor);
            Ok(Vec::new())
        }
        "size" | "number" => {
            let is_size = field == "size";
            let parsed = parse_page_values(ctx.graph, ctx.resource_type, value, 0)
                .map_err(|e| QueryError::from_parse(&name.raw, e))?;

            let mut errors = ValidationErrors::default();
            let mut scopes = Vec::new();
            for page_value in parsed.expression {
                let checked = if is_size { check_size(ctx, name, &page_value) } else { check_number(ctx, name, &page_value) };
                let n = match checked {
                    Ok(n) => n,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                };
                let request = entry(pages, page_value.scope.as_ref());
                let slot = if is_size { &mut request.size } else { &mut request.number };
                if slot.is_some() {
                    let scope = page_value.scope.as_ref().map(|s| format!(" of '{s}'")).unwrap_or_default();
                    errors.push(QueryError::semantic(
                        &name.raw,
                        Some(page_value.position),
                        format!("Page {field}{scope} is specified more than once."),
                    ));
                    continue;
                }
                *slot = Some(n);
                scopes.extend(page_value.scope);
            }
            errors.into_result(scopes)
        }
        _ => Err(invalid().into()),
    }
}

fn check_size(ctx: &ReadContext<'_>, name: &ParameterName, page: &PageValue) -> Result<u32, QueryError> {
    let out_of_range = |message: String| QueryError::semantic(&name.raw, Some(page.position), message);
    if page.value < 1 {
        return Err(out_of_range("Page size must be 1 or greater.".into()));
    }
    let size = u32::try_from(page.value).map_err(|_| out_of_range(format!("Page size {} is too large.", page.value)))?;
    if let Some(max) = ctx.options.max_page_size() {
        if size > max {
            return Err(out_of_range(format!("Page size cannot be higher than {max}.")));
        }
    }
    Ok(size)
}

fn check_number(ctx: &ReadContext<'_>, name: &ParameterName, page: &PageValue) -> Result<u32, QueryError> {
    let out_of_range = |message: String| QueryError::semantic(&name.raw, Some(page.position), message);
    if page.value < 1 {
        return Err(out_of_range("Page number must be 1 or greater.".into()));
    }
    let number = u32::try_from(page.value).map_err(|_| out_of_range(format!("Page number {} is too large.", page.value)))?;
    if let Some(max) = ctx.options.max_page_number() {
        if number > max {
            return Err(out_of_range(format!("Page number cannot be higher than {max}.")));
        }
    }
    Ok(number)
}
