//! Sparse fieldsets: `fields[type]=a,b`, `fields=type:a,b,other:c` or `fields=a,b`.
//!
//! An empty value selects no attributes at all, which differs from not
//! sending the parameter (all viewable attributes).

use super::{ParameterName, ReadContext};
use crate::error::{QueryError, ValidationErrors};
use crate::expr::ast::SparseFieldSet;
use crate::expr::parse_sparse_fields;
use crate::graph::Capability;

pub fn read(ctx: &ReadContext<'_>, name: &ParameterName, value: &str) -> Result<Vec<SparseFieldSet>, ValidationErrors> {
    let parsed = match name.brackets.as_slice() {
        [] => parse_sparse_fields(ctx.graph, ctx.resource_type, value, 0, true),
        [type_name] => {
            let resource_type = ctx.graph.resource_type(type_name).ok_or_else(|| {
                QueryError::semantic(&name.raw, None, format!("Resource type '{type_name}' does not exist."))
            })?;
            parse_sparse_fields(ctx.graph, resource_type, value, 0, false)
        }
        _ => {
            return Err(QueryError::semantic(&name.raw, None, format!("Parameter '{}' is not a valid fields parameter.", name.raw)).into());
        }
    }
    .map_err(|e| QueryError::from_parse(&name.raw, e))?;

    let mut errors = ValidationErrors::default();
    for site in &parsed.chains {
        if let (Some(attr), Some(position)) = (site.chain.first().as_attribute(), site.positions.first()) {
            if !attr.allows(Capability::View) {
                errors.push(QueryError::semantic(
                    &name.raw,
                    Some(*position),
                    format!("{} attribute '{}' is not allowed.", Capability::View.verb(), attr.name),
                ));
            }
        }
    }
    errors.into_result(parsed.expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryOptions;
    use crate::graph::{AttrField, Capabilities, ResourceGraph};
    use crate::model::ValueType;

    fn graph() -> ResourceGraph {
        ResourceGraph::builder()
            .resource("people", ValueType::Int, |r| {
                r.attr("name", ValueType::String)
                    .attribute(AttrField::new("password", ValueType::String).capabilities(Capabilities::NONE))
                    .has_many("todoItems", "todoItems")
            })
            .resource("todoItems", ValueType::Int, |r| r.attr("description", ValueType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn test_syntaxes() {
        let g = graph();
        let options = QueryOptions::default();
        let ctx = ReadContext { graph: &g, options: &options, resource_type: g.resource_type("people").unwrap() };

        let bare = read(&ctx, &ParameterName::parse("fields").unwrap(), "name,todoItems").unwrap();
        assert_eq!(bare[0].resource_type, "people");
        assert_eq!(bare[0].relationships().count(), 1);

        let typed = read(&ctx, &ParameterName::parse("fields").unwrap(), "todoItems:description").unwrap();
        assert_eq!(typed[0].resource_type, "todoItems");

        let bracketed = read(&ctx, &ParameterName::parse("fields[todoItems]").unwrap(), "").unwrap();
        assert!(bracketed[0].fields.is_empty());
    }

    #[test]
    fn test_several_type_groups() {
        let g = graph();
        let options = QueryOptions::default();
        let ctx = ReadContext { graph: &g, options: &options, resource_type: g.resource_type("people").unwrap() };

        let sets = read(&ctx, &ParameterName::parse("fields").unwrap(), "todoItems:description,people:name").unwrap();
        let types: Vec<&str> = sets.iter().map(|s| s.resource_type.as_str()).collect();
        assert_eq!(types, vec!["todoItems", "people"]);

        // a type prefix is data, not a group, inside a bracketed parameter
        assert!(read(&ctx, &ParameterName::parse("fields[people]").unwrap(), "name,todoItems:description").is_err());
    }

    #[test]
    fn test_unviewable_and_unknown() {
        let g = graph();
        let options = QueryOptions::default();
        let ctx = ReadContext { graph: &g, options: &options, resource_type: g.resource_type("people").unwrap() };

        let errors = read(&ctx, &ParameterName::parse("fields").unwrap(), "name,password").unwrap_err();
        assert_eq!(errors.iter().next().unwrap().message(), "Retrieving attribute 'password' is not allowed.");

        let errors = read(&ctx, &ParameterName::parse("fields[nope]").unwrap(), "a").unwrap_err();
        assert!(errors.iter().next().unwrap().message().contains("'nope'"));
    }
}
