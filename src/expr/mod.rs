//! Query expression language: AST, lexer, parser and the legacy filter notation.
//!
//! Every parameter kind has its own entry point in [`parser`]; [`parse`] is a
//! single dispatching contract over all of them.

pub mod ast;
pub mod legacy;
pub mod lexer;
pub mod parser;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::{ResourceGraph, ResourceType};
use ast::{FieldChain, FilterExpression, IncludeExpression, SortExpression, SparseFieldSet};

pub use parser::{
    parse_filter, parse_include, parse_page_values, parse_scope, parse_sort, parse_sparse_fields,
    PageValue,
};

/// The query parameter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Filter,
    Sort,
    Include,
    Fields,
    Page,
}

impl ParameterKind {
    pub fn name(self) -> &'static str {
        match self {
            ParameterKind::Filter => "filter",
            ParameterKind::Sort => "sort",
            ParameterKind::Include => "include",
            ParameterKind::Fields => "fields",
            ParameterKind::Page => "page",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "filter" => Some(ParameterKind::Filter),
            "sort" => Some(ParameterKind::Sort),
            "include" => Some(ParameterKind::Include),
            "fields" => Some(ParameterKind::Fields),
            "page" => Some(ParameterKind::Page),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a parse failure is malformed text or text that does not fit the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Tokenizer or grammar failure.
    Syntax,
    /// Unknown field, wrong field kind, failed literal coercion.
    Resolution,
}

/// A parse failure at a character offset of the parameter value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self { kind: ParseErrorKind::Syntax, position, message: message.into() }
    }

    pub fn resolution(position: usize, message: impl Into<String>) -> Self {
        Self { kind: ParseErrorKind::Resolution, position, message: message.into() }
    }
}

/// A resolved field chain and the offset of each of its segments.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSite {
    pub chain: FieldChain,
    pub positions: Vec<usize>,
}

/// Parser output: the expression plus every chain it referenced, so that
/// readers can check capabilities with precise positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub expression: T,
    pub chains: Vec<ChainSite>,
}

impl<T> Parsed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed { expression: f(self.expression), chains: self.chains }
    }
}

/// Any parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Filter(FilterExpression),
    Sort(SortExpression),
    Include(IncludeExpression),
    Fields(Vec<SparseFieldSet>),
    Page(Vec<PageValue>),
}

/// Parse one parameter value of the given kind against `resource_type`.
///
/// `offset` is added to every reported position.
pub fn parse(
    kind: ParameterKind,
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<AstNode>, ParseError> {
    match kind {
        ParameterKind::Filter => parse_filter(graph, resource_type, text, offset).map(|p| p.map(AstNode::Filter)),
        ParameterKind::Sort => parse_sort(graph, resource_type, text, offset).map(|p| p.map(AstNode::Sort)),
        ParameterKind::Include => parse_include(graph, resource_type, text, offset).map(|p| p.map(AstNode::Include)),
        ParameterKind::Fields => {
            parse_sparse_fields(graph, resource_type, text, offset, true).map(|p| p.map(AstNode::Fields))
        }
        ParameterKind::Page => parse_page_values(graph, resource_type, text, offset).map(|p| p.map(AstNode::Page)),
    }
}

/// True when `text` starts with a known filter function call, e.g. `equals(`.
pub fn is_function_call(text: &str) -> bool {
    let Ok(tokens) = lexer::tokenize(text, 0) else {
        return false;
    };
    matches!(
        tokens.as_slice(),
        [name, open, ..] if name.kind == lexer::TokenKind::Text
            && open.kind == lexer::TokenKind::OpenParen
            && parser::FILTER_FUNCTIONS.contains(&name.text.as_str())
    )
}
