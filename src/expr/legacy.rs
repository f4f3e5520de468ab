//! Legacy flat filter notation.
//!
//! Accepts `filter[field]=value`, `filter[field]=op:value` and
//! `filter[field][op]=value` and translates them into the same
//! [`FilterExpression`] nodes the function syntax produces.
//!
//! Operators: `eq`, `ne`, `lt`, `le`, `gt`, `ge`, `like` (contains),
//! `in`, `nin`, `isnull`, `isnotnull`.

use super::ast::{ComparisonOp, FilterExpression, Literal, Operand, TextMatchKind};
use super::parser::{coerce, parse_attribute_chain};
use super::{ParseError, Parsed};
use crate::graph::{ResourceGraph, ResourceType};
use crate::model::{Value, ValueType};

/// Operators of the flat notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    In,
    Nin,
    IsNull,
    IsNotNull,
}

impl LegacyOperator {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "eq" => LegacyOperator::Eq,
            "ne" => LegacyOperator::Ne,
            "lt" => LegacyOperator::Lt,
            "le" => LegacyOperator::Le,
            "gt" => LegacyOperator::Gt,
            "ge" => LegacyOperator::Ge,
            "like" => LegacyOperator::Like,
            "in" => LegacyOperator::In,
            "nin" => LegacyOperator::Nin,
            "isnull" => LegacyOperator::IsNull,
            "isnotnull" => LegacyOperator::IsNotNull,
            _ => return None,
        })
    }

    fn comparison(self) -> Option<ComparisonOp> {
        match self {
            LegacyOperator::Eq | LegacyOperator::Ne => Some(ComparisonOp::Equals),
            LegacyOperator::Lt => Some(ComparisonOp::LessThan),
            LegacyOperator::Le => Some(ComparisonOp::LessOrEqual),
            LegacyOperator::Gt => Some(ComparisonOp::GreaterThan),
            LegacyOperator::Ge => Some(ComparisonOp::GreaterOrEqual),
            _ => None,
        }
    }
}

/// Part of the parameter a legacy filter error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacySite {
    /// The bracketed field or operator in the parameter name.
    Name,
    /// The parameter value; positions are offsets into it.
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct LegacyError {
    pub site: LegacySite,
    pub error: ParseError,
}

impl LegacyError {
    fn name(error: ParseError) -> Self {
        Self { site: LegacySite::Name, error }
    }

    fn value(error: ParseError) -> Self {
        Self { site: LegacySite::Value, error }
    }
}

/// Split `op:rest` when `op` is a known operator; otherwise `eq` on the whole value.
fn split_operator(value: &str) -> (LegacyOperator, &str, usize) {
    if let Some((prefix, rest)) = value.split_once(':') {
        if let Some(op) = LegacyOperator::from_keyword(prefix) {
            return (op, rest, prefix.chars().count() + 1);
        }
    }
    (LegacyOperator::Eq, value, 0)
}

/// Translate one legacy filter parameter.
///
/// `field` is the bracketed field chain, `operator` the optional second
/// bracket of `filter[field][op]`.
pub fn parse_legacy_filter(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    field: &str,
    operator: Option<&str>,
    value: &str,
) -> Result<Parsed<FilterExpression>, LegacyError> {
    let parsed = parse_attribute_chain(graph, resource_type, field, 0).map_err(LegacyError::name)?;
    let chain = parsed.expression.clone();
    let value_type = chain.attribute().map(|a| a.value_type.clone()).unwrap_or(ValueType::String);

    let (op, text, offset) = match operator {
        Some(keyword) => {
            let op = LegacyOperator::from_keyword(keyword).ok_or_else(|| {
                LegacyError::name(ParseError::syntax(0, format!("Unknown filter operator '{keyword}'.")))
            })?;
            (op, value, 0)
        }
        None => split_operator(value),
    };

    let literal = |text: &str, position: usize| {
        coerce(Value::String(text.to_owned()), &value_type, position).map_err(LegacyError::value)
    };

    let expression = match op {
        LegacyOperator::IsNull => FilterExpression::equals(chain, Literal::null(value_type.clone())),
        LegacyOperator::IsNotNull => {
            FilterExpression::not(FilterExpression::equals(chain, Literal::null(value_type.clone())))
        }
        LegacyOperator::Like => {
            if !value_type.is_text() {
                return Err(LegacyError::value(ParseError::resolution(
                    offset,
                    format!("Operator 'like' requires a text attribute, but '{chain}' is of type '{value_type}'."),
                )));
            }
            FilterExpression::TextMatch {
                kind: TextMatchKind::Contains,
                field: chain,
                text: Literal::new(text, ValueType::String),
            }
        }
        LegacyOperator::In | LegacyOperator::Nin => {
            let mut values = Vec::new();
            let mut position = offset;
            for piece in text.split(',') {
                values.push(literal(piece, position)?);
                position += piece.chars().count() + 1;
            }
            let any = FilterExpression::Any { field: chain, values };
            if op == LegacyOperator::Nin { FilterExpression::not(any) } else { any }
        }
        _ => {
            let comparison = op.comparison().unwrap_or(ComparisonOp::Equals);
            let expression = FilterExpression::compare(
                comparison,
                Operand::Field(chain),
                Operand::Literal(literal(text, offset)?),
            );
            if op == LegacyOperator::Ne { FilterExpression::not(expression) } else { expression }
        }
    };

    tracing::trace!(%expression, "translated legacy filter");
    Ok(Parsed { expression, chains: parsed.chains })
}
