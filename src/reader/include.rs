//! `include=a.b,c`: relationship chains, de-duplicated into a tree.

use super::{check_capabilities, ParameterName, ReadContext};
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::IncludeExpression;
use crate::expr::parse_include;
use crate::graph::{Capability, ResourceField};

pub fn read(ctx: &ReadContext<'_>, name: &ParameterName, value: &str) -> Result<IncludeExpression, ValidationErrors> {
    if !name.brackets.is_empty() {
        return Err(QueryError::semantic(&name.raw, None, format!("Parameter '{}' is not a valid include parameter.", name.raw)).into());
    }

    let parsed = parse_include(ctx.graph, ctx.resource_type, value, 0).map_err(|e| QueryError::from_parse(&name.raw, e))?;
    let mut errors = ValidationErrors::default();
    if let Err(e) = check_capabilities(&name.raw, &parsed.chains, Capability::Include, true) {
        errors.extend(e);
    }
    for site in &parsed.chains {
        if let Some((index, field)) = revisited(site.chain.fields()) {
            errors.push(QueryError::semantic(
                &name.raw,
                site.positions.get(index).copied(),
                format!("Including '{}' revisits relationship '{}' within the same chain.", site.chain, field.name()),
            ));
        }
    }
    if let Some(max) = ctx.options.max_include_depth() {
        for site in parsed.chains.iter().filter(|s| s.chain.len() > max) {
            errors.push(QueryError::semantic(
                &name.raw,
                site.positions.first().copied(),
                format!("Including '{}' exceeds the maximum inclusion depth of {max}.", site.chain),
            ));
        }
    }
    errors.into_result(parsed.expression)
}

/// The first segment that repeats a relationship earlier in its chain.
fn revisited(fields: &[ResourceField]) -> Option<(usize, &ResourceField)> {
    fields.iter().enumerate().skip(1).find(|(index, field)| fields[..*index].contains(*field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryOptions;
    use crate::graph::{Capabilities, Cardinality, RelationshipField, ResourceGraph};
    use crate::model::ValueType;

    fn graph() -> ResourceGraph {
        ResourceGraph::builder()
            .resource("todoItems", ValueType::Int, |r| r.has_many("tags", "tags").has_one("owner", "people"))
            .resource("tags", ValueType::Int, |r| {
                r.relationship(
                    RelationshipField::new("todoItem", Cardinality::ToOne, "todoItems")
                        .capabilities(Capabilities::RELATIONSHIP.without(Capability::Include)),
                )
            })
            .resource("people", ValueType::Int, |r| r.has_many("todoItems", "todoItems"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_not_includable() {
        let g = graph();
        let options = QueryOptions::default();
        let ctx = ReadContext { graph: &g, options: &options, resource_type: g.resource_type("todoItems").unwrap() };
        let errors = read(&ctx, &ParameterName::parse("include").unwrap(), "tags.todoItem").unwrap_err();
        let error = errors.iter().next().unwrap();
        assert_eq!(error.position(), Some(5));
        assert_eq!(error.message(), "Including relationship 'todoItem' is not allowed.");
    }

    #[test]
    fn test_chain_may_not_revisit_itself() {
        let g = graph();
        let options = QueryOptions::default();
        let ctx = ReadContext { graph: &g, options: &options, resource_type: g.resource_type("todoItems").unwrap() };
        let name = ParameterName::parse("include").unwrap();
        let errors = read(&ctx, &name, "tags,owner.todoItems.owner").unwrap_err();
        let error = errors.iter().next().unwrap();
        assert_eq!(error.position(), Some(21));
        assert_eq!(error.message(), "Including 'owner.todoItems.owner' revisits relationship 'owner' within the same chain.");
        assert_eq!(errors.status_code(), 400);

        assert!(read(&ctx, &name, "owner,owner.todoItems.tags").is_ok());
    }

    #[test]
    fn test_max_depth() {
        let g = graph();
        let options = QueryOptions { max_include_depth: Some(2), ..QueryOptions::default() };
        let ctx = ReadContext { graph: &g, options: &options, resource_type: g.resource_type("todoItems").unwrap() };
        let name = ParameterName::parse("include").unwrap();
        assert!(read(&ctx, &name, "owner.todoItems").is_ok());
        let errors = read(&ctx, &name, "owner.todoItems.tags").unwrap_err();
        assert!(errors.iter().next().unwrap().message().contains("maximum inclusion depth of 2"));
    }
}
