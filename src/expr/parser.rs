//! Recursive descent parser for query parameter values.
//!
//! Parses token streams into resolved AST nodes. Field chains are resolved
//! against the resource graph while parsing, so every node that comes out of
//! here refers to real fields and carries coerced literals. Supports:
//! - filter functions (comparisons, text matching, `any`, `has`, `count`, logic)
//! - sort lists, optionally descending and by `count(...)`
//! - include chains, sparse fieldsets, relationship scopes, page values

use std::sync::Arc;

use super::ast::*;
use super::lexer::{tokenize, Token, TokenKind};
use super::{ChainSite, ParseError, Parsed};
use crate::graph::{Cardinality, ResourceField, ResourceGraph, ResourceType};
use crate::model::{Value, ValueType};

/// Function names accepted at the start of a filter expression.
pub(crate) const FILTER_FUNCTIONS: &[&str] = &[
    "not", "and", "or", "equals", "lessThan", "lessOrEqual", "greaterThan", "greaterOrEqual",
    "contains", "startsWith", "endsWith", "any", "has", "count",
];

/// A value of a `page[size]` / `page[number]` parameter, optionally scoped.
#[derive(Debug, Clone, PartialEq)]
pub struct PageValue {
    pub scope: Option<FieldChain>,
    pub value: i64,
    pub position: usize,
}

// ============================================================================
// Chain patterns
// ============================================================================

/// What a single chain segment must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Attribute,
    ToOne,
    ToMany,
    Relationship,
}

impl Expected {
    fn describe(self) -> &'static str {
        match self {
            Expected::Attribute => "Attribute",
            Expected::ToOne => "To-one relationship",
            Expected::ToMany => "To-many relationship",
            Expected::Relationship => "Relationship",
        }
    }

    fn accepts(self, field: &ResourceField) -> bool {
        match (self, field) {
            (Expected::Attribute, ResourceField::Attribute(_)) => true,
            (Expected::Relationship, ResourceField::Relationship(_)) => true,
            (Expected::ToOne, ResourceField::Relationship(r)) => r.cardinality == Cardinality::ToOne,
            (Expected::ToMany, ResourceField::Relationship(r)) => r.cardinality == Cardinality::ToMany,
            _ => false,
        }
    }
}

/// Shapes a field chain may take, depending on where it appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainPattern {
    /// Comparisons, text matching, `any`, sort keys.
    ToOnesThenAttribute,
    /// `has` and `count`.
    ToOnesThenToMany,
    /// Include chains.
    Relationships,
    /// Relationship scopes of `filter[...]`, `sort[...]`, `page[...]`.
    RelationshipsThenToMany,
}

impl ChainPattern {
    fn expected(self, is_last: bool) -> Expected {
        match (self, is_last) {
            (ChainPattern::ToOnesThenAttribute, true) => Expected::Attribute,
            (ChainPattern::ToOnesThenToMany, true) | (ChainPattern::RelationshipsThenToMany, true) => {
                Expected::ToMany
            }
            (ChainPattern::ToOnesThenAttribute | ChainPattern::ToOnesThenToMany, false) => Expected::ToOne,
            (ChainPattern::Relationships, _) | (ChainPattern::RelationshipsThenToMany, false) => {
                Expected::Relationship
            }
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ChainPattern::ToOnesThenAttribute => "zero or more to-one relationships, followed by an attribute",
            ChainPattern::ToOnesThenToMany => "zero or more to-one relationships, followed by a to-many relationship",
            ChainPattern::Relationships => "one or more relationships",
            ChainPattern::RelationshipsThenToMany => "one or more relationships, ending in a to-many relationship",
        }
    }
}

// ============================================================================
// Parser state
// ============================================================================

/// Parser state: the token stream, a cursor, and the chains seen so far.
struct Parser<'g> {
    tokens: Vec<Token>,
    pos: usize,
    graph: &'g ResourceGraph,
    chains: Vec<ChainSite>,
}

impl<'g> Parser<'g> {
    fn new(graph: &'g ResourceGraph, text: &str, offset: usize) -> Result<Self, ParseError> {
        let tokens = tokenize(text, offset)?;
        tracing::trace!(tokens = tokens.len(), text, "tokenized parameter value");
        Ok(Self { tokens, pos: 0, graph, chains: Vec::new() })
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_call(&self, name: &str) -> bool {
        self.at(TokenKind::Text) && self.peek().text == name && self.peek_at(1).kind == TokenKind::OpenParen
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("{} expected, found {}.", kind.describe(), self.found())))
        }
    }

    fn found(&self) -> String {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Eof => "end of expression".to_owned(),
            TokenKind::QuotedText => format!("'{}'", tok.text.replace('\'', "''")),
            _ => format!("'{}'", tok.text),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError::syntax(self.peek().span.start, message)
    }

    fn finish<T>(self, expression: T) -> Result<Parsed<T>, ParseError> {
        if !self.at(TokenKind::Eof) {
            return Err(self.error(format!("End of expression expected, found {}.", self.found())));
        }
        Ok(Parsed { expression, chains: self.chains })
    }

    // ========================================================================
    // Field chains
    // ========================================================================

    /// Resolve a dotted chain whose first segment has already been consumed.
    fn chain(
        &mut self,
        resource_type: &ResourceType,
        first: (String, usize),
        pattern: ChainPattern,
    ) -> Result<FieldChain, ParseError> {
        let mut segments = vec![first];
        while self.eat(TokenKind::Period) {
            let tok = self.expect(TokenKind::Text)?;
            segments.push((tok.text, tok.span.start));
        }

        let graph = self.graph;
        let mut current: &ResourceType = resource_type;
        let mut fields = Vec::with_capacity(segments.len());
        let mut positions = Vec::with_capacity(segments.len());
        let last = segments.len() - 1;

        for (i, (name, position)) in segments.iter().enumerate() {
            let expected = pattern.expected(i == last);
            let field = graph.resolve_field(current, name).ok_or_else(|| {
                let kind = if expected == Expected::Attribute { "Field" } else { "Relationship" };
                ParseError::resolution(
                    *position,
                    format!("{kind} '{name}' does not exist on resource type '{}'.", current.name),
                )
            })?;
            if !expected.accepts(&field) {
                return Err(ParseError::resolution(
                    *position,
                    format!(
                        "Field chain on resource type '{}' failed to match the pattern: {}. {} expected at '{name}' on resource type '{}'.",
                        resource_type.name,
                        pattern.describe(),
                        expected.describe(),
                        current.name,
                    ),
                ));
            }
            if let ResourceField::Relationship(rel) = &field {
                current = graph.target_of(rel).map(Arc::as_ref).ok_or_else(|| {
                    ParseError::resolution(
                        *position,
                        format!("Resource type '{}' of relationship '{name}' does not exist.", rel.target),
                    )
                })?;
            }
            fields.push(field);
            positions.push(*position);
        }

        let chain = FieldChain::from_fields(fields)
            .ok_or_else(|| ParseError::syntax(segments[0].1, "Field name expected."))?;
        self.chains.push(ChainSite { chain: chain.clone(), positions });
        Ok(chain)
    }

    /// Consume a name token and resolve the chain that starts with it.
    fn named_chain(&mut self, resource_type: &ResourceType, pattern: ChainPattern) -> Result<FieldChain, ParseError> {
        let tok = self.expect(TokenKind::Text)?;
        self.chain(resource_type, (tok.text, tok.span.start), pattern)
    }

    /// `count(toManyChain)`
    fn count(&mut self, resource_type: &ResourceType) -> Result<FieldChain, ParseError> {
        self.advance();
        self.expect(TokenKind::OpenParen)?;
        let chain = self.named_chain(resource_type, ChainPattern::ToOnesThenToMany)?;
        self.expect(TokenKind::CloseParen)?;
        Ok(chain)
    }

    // ========================================================================
    // Filters
    // ========================================================================

    fn filter(&mut self, resource_type: &ResourceType) -> Result<FilterExpression, ParseError> {
        if !(self.at(TokenKind::Text) && self.peek_at(1).kind == TokenKind::OpenParen) {
            return Err(self.error(format!("Filter function expected, found {}.", self.found())));
        }
        let name = self.advance();
        self.advance();

        let expression = match name.text.as_str() {
            "not" => FilterExpression::not(self.filter(resource_type)?),
            "and" | "or" => {
                let mut operands = vec![self.filter(resource_type)?];
                while self.eat(TokenKind::Comma) {
                    operands.push(self.filter(resource_type)?);
                }
                if operands.len() < 2 {
                    return Err(self.error(format!("Function '{}' requires at least two operands.", name.text)));
                }
                let op = if name.text == "and" { LogicalOp::And } else { LogicalOp::Or };
                FilterExpression::Logical { op, operands }
            }
            "any" => self.any(resource_type)?,
            "has" => self.has(resource_type)?,
            "count" => {
                return Err(ParseError::resolution(
                    name.span.start,
                    "Function 'count' returns a number; a boolean filter function is expected.",
                ));
            }
            text => {
                if let Some(op) = ComparisonOp::from_keyword(text) {
                    self.comparison(resource_type, op)?
                } else if let Some(kind) = TextMatchKind::from_keyword(text) {
                    self.text_match(resource_type, kind)?
                } else {
                    return Err(ParseError::syntax(name.span.start, format!("Unknown filter function '{text}'.")));
                }
            }
        };

        self.expect(TokenKind::CloseParen)?;
        Ok(expression)
    }

    fn comparison(&mut self, resource_type: &ResourceType, op: ComparisonOp) -> Result<FilterExpression, ParseError> {
        let left = if self.at_call("count") {
            Operand::Count(self.count(resource_type)?)
        } else if self.at(TokenKind::Text) {
            Operand::Field(self.named_chain(resource_type, ChainPattern::ToOnesThenAttribute)?)
        } else {
            return Err(self.error(format!("Field name or count function expected, found {}.", self.found())));
        };
        let left_type = left.value_type().unwrap_or(ValueType::String);

        self.expect(TokenKind::Comma)?;

        let tok = self.peek().clone();
        let right = match tok.kind {
            TokenKind::QuotedText => {
                self.advance();
                Operand::Literal(coerce(Value::String(tok.text), &left_type, tok.span.start)?)
            }
            TokenKind::Text if self.at_call("count") => Operand::Count(self.count(resource_type)?),
            TokenKind::Text => {
                self.advance();
                match Value::infer(&tok.text) {
                    Value::String(_)
                        if self.at(TokenKind::Period) || self.graph.resolve_field(resource_type, &tok.text).is_some() =>
                    {
                        let chain = self.chain(resource_type, (tok.text, tok.span.start), ChainPattern::ToOnesThenAttribute)?;
                        Operand::Field(chain)
                    }
                    Value::Null if op != ComparisonOp::Equals => {
                        return Err(ParseError::resolution(
                            tok.span.start,
                            format!("Function '{}' does not accept null.", op.keyword()),
                        ));
                    }
                    value => Operand::Literal(coerce(value, &left_type, tok.span.start)?),
                }
            }
            _ => {
                return Err(self.error(format!("Value, field name or count function expected, found {}.", self.found())));
            }
        };

        if let Some(right_type) = right.value_type() {
            if !matches!(right, Operand::Literal(_)) && !comparable(&left_type, &right_type) {
                return Err(ParseError::resolution(
                    tok.span.start,
                    format!("Cannot compare '{left}' of type '{left_type}' with '{right}' of type '{right_type}'."),
                ));
            }
        }

        Ok(FilterExpression::Comparison { op, left, right })
    }

    fn text_match(&mut self, resource_type: &ResourceType, kind: TextMatchKind) -> Result<FilterExpression, ParseError> {
        let position = self.peek().span.start;
        let field = self.named_chain(resource_type, ChainPattern::ToOnesThenAttribute)?;
        if let Some(attr) = field.attribute() {
            if !attr.value_type.is_text() {
                return Err(ParseError::resolution(
                    position,
                    format!(
                        "Function '{}' requires a text attribute, but '{field}' is of type '{}'.",
                        kind.keyword(),
                        attr.value_type
                    ),
                ));
            }
        }
        self.expect(TokenKind::Comma)?;
        let tok = self.advance();
        if !matches!(tok.kind, TokenKind::QuotedText | TokenKind::Text) {
            return Err(ParseError::syntax(tok.span.start, "Text value expected."));
        }
        Ok(FilterExpression::TextMatch { kind, field, text: Literal::new(tok.text, ValueType::String) })
    }

    fn any(&mut self, resource_type: &ResourceType) -> Result<FilterExpression, ParseError> {
        let field = self.named_chain(resource_type, ChainPattern::ToOnesThenAttribute)?;
        let value_type = field.attribute().map(|a| a.value_type.clone()).unwrap_or(ValueType::String);
        self.expect(TokenKind::Comma)?;

        let mut values = Vec::new();
        loop {
            let tok = self.advance();
            let value = match tok.kind {
                TokenKind::QuotedText => Value::String(tok.text),
                TokenKind::Text => Value::infer(&tok.text),
                _ => {
                    return Err(ParseError::syntax(tok.span.start, "Value expected."));
                }
            };
            values.push(coerce(value, &value_type, tok.span.start)?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(FilterExpression::Any { field, values })
    }

    fn has(&mut self, resource_type: &ResourceType) -> Result<FilterExpression, ParseError> {
        let position = self.peek().span.start;
        let relationship = self.named_chain(resource_type, ChainPattern::ToOnesThenToMany)?;
        let filter = if self.eat(TokenKind::Comma) {
            let graph = self.graph;
            let target = relationship
                .last()
                .as_relationship()
                .and_then(|rel| graph.target_of(rel))
                .ok_or_else(|| ParseError::resolution(position, format!("Relationship '{relationship}' has no target type.")))?;
            Some(Box::new(self.filter(target)?))
        } else {
            None
        };
        Ok(FilterExpression::Has { relationship, filter })
    }

    // ========================================================================
    // Sort
    // ========================================================================

    fn sort(&mut self, resource_type: &ResourceType) -> Result<SortExpression, ParseError> {
        let mut elements = Vec::new();
        loop {
            elements.push(self.sort_element(resource_type)?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        SortExpression::new(elements).ok_or_else(|| self.error("Sort element expected.".to_owned()))
    }

    fn sort_element(&mut self, resource_type: &ResourceType) -> Result<SortElement, ParseError> {
        if !self.at(TokenKind::Text) {
            return Err(self.error(format!("Field name or count function expected, found {}.", self.found())));
        }
        let tok = self.advance();
        let (descending, name, position) = match tok.text.strip_prefix('-') {
            Some(rest) => (true, rest.to_owned(), tok.span.start + 1),
            None => (false, tok.text.clone(), tok.span.start),
        };
        if name.is_empty() {
            return Err(ParseError::syntax(position, "Field name expected."));
        }

        let target = if name == "count" && self.at(TokenKind::OpenParen) {
            self.advance();
            let chain = self.named_chain(resource_type, ChainPattern::ToOnesThenToMany)?;
            self.expect(TokenKind::CloseParen)?;
            SortTarget::Count(chain)
        } else {
            SortTarget::Field(self.chain(resource_type, (name, position), ChainPattern::ToOnesThenAttribute)?)
        };
        Ok(SortElement { target, descending })
    }

    // ========================================================================
    // Include, fields, scopes, page values
    // ========================================================================

    fn include(&mut self, resource_type: &ResourceType) -> Result<IncludeExpression, ParseError> {
        let mut includes = IncludeExpression::default();
        if self.at(TokenKind::Eof) {
            return Ok(includes);
        }
        loop {
            let chain = self.named_chain(resource_type, ChainPattern::Relationships)?;
            let relationships: Vec<_> = chain.relationships().cloned().collect();
            includes.add_chain(&relationships);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(includes)
    }

    /// With `allow_type_prefix`, every `type:` starts a new group, so
    /// `a,people:b,c` yields one set for `resource_type` and one for `people`.
    fn sparse_fields(&mut self, resource_type: &ResourceType, allow_type_prefix: bool) -> Result<Vec<SparseFieldSet>, ParseError> {
        let graph = self.graph;
        let mut target: &ResourceType = resource_type;
        if allow_type_prefix && self.at_type_prefix() {
            target = self.type_prefix()?;
        }

        let mut sets = vec![SparseFieldSet::new(target.name.clone())];
        if self.at(TokenKind::Eof) {
            return Ok(sets);
        }
        loop {
            let tok = self.expect(TokenKind::Text)?;
            let field = graph.resolve_field(target, &tok.text).ok_or_else(|| {
                ParseError::resolution(
                    tok.span.start,
                    format!("Field '{}' does not exist on resource type '{}'.", tok.text, target.name),
                )
            })?;
            self.chains.push(ChainSite { chain: FieldChain::single(field.clone()), positions: vec![tok.span.start] });
            if let Some(set) = sets.last_mut() {
                set.insert(field);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
            if allow_type_prefix && self.at_type_prefix() {
                target = self.type_prefix()?;
                sets.push(SparseFieldSet::new(target.name.clone()));
            }
        }
        Ok(sets)
    }

    fn at_type_prefix(&self) -> bool {
        self.at(TokenKind::Text) && self.peek_at(1).kind == TokenKind::Colon
    }

    fn type_prefix(&mut self) -> Result<&'g ResourceType, ParseError> {
        let graph = self.graph;
        let tok = self.advance();
        self.advance();
        graph.resource_type(&tok.text).map(Arc::as_ref).ok_or_else(|| {
            ParseError::resolution(tok.span.start, format!("Resource type '{}' does not exist.", tok.text))
        })
    }

    fn page_values(&mut self, resource_type: &ResourceType) -> Result<Vec<PageValue>, ParseError> {
        let mut values = Vec::new();
        loop {
            let scope = if self.at(TokenKind::Text)
                && matches!(self.peek_at(1).kind, TokenKind::Colon | TokenKind::Period)
            {
                let chain = self.named_chain(resource_type, ChainPattern::RelationshipsThenToMany)?;
                self.expect(TokenKind::Colon)?;
                Some(chain)
            } else {
                None
            };
            let tok = self.expect(TokenKind::Text)?;
            let value = tok.text.parse::<i64>().map_err(|_| {
                ParseError::syntax(tok.span.start, format!("Integer value expected, found '{}'.", tok.text))
            })?;
            values.push(PageValue { scope, value, position: tok.span.start });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(values)
    }
}

pub(super) fn coerce(value: Value, target: &ValueType, position: usize) -> Result<Literal, ParseError> {
    value
        .coerce(target)
        .map(|value| Literal { value, value_type: target.clone() })
        .map_err(|e| ParseError::resolution(position, e.to_string()))
}

fn comparable(a: &ValueType, b: &ValueType) -> bool {
    use ValueType::*;
    a == b
        || matches!((a, b), (Int | Float, Int | Float) | (Date | DateTime, Date | DateTime))
        || (a.is_text() && b.is_text())
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse a `filter` value against `resource_type`.
pub fn parse_filter(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<FilterExpression>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.filter(resource_type)?;
    p.finish(expression)
}

/// Parse a `sort` value.
pub fn parse_sort(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<SortExpression>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.sort(resource_type)?;
    p.finish(expression)
}

/// Parse an `include` value. An empty value includes nothing.
pub fn parse_include(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<IncludeExpression>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.include(resource_type)?;
    p.finish(expression)
}

/// Parse sparse fieldsets. With `allow_type_prefix`, `type:field,...`
/// groups select the resource type their fields belong to; fields before
/// the first group belong to `resource_type`.
pub fn parse_sparse_fields(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
    allow_type_prefix: bool,
) -> Result<Parsed<Vec<SparseFieldSet>>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.sparse_fields(resource_type, allow_type_prefix)?;
    p.finish(expression)
}

/// Parse the relationship scope of a bracketed parameter name, e.g. `owner.tags`.
pub fn parse_scope(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<FieldChain>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.named_chain(resource_type, ChainPattern::RelationshipsThenToMany)?;
    p.finish(expression)
}

/// Parse a chain of to-one relationships ending in an attribute, e.g. `owner.firstName`.
pub fn parse_attribute_chain(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<FieldChain>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.named_chain(resource_type, ChainPattern::ToOnesThenAttribute)?;
    p.finish(expression)
}

/// Parse a `page[size]` or `page[number]` value: `10` or `10,tags:5`.
pub fn parse_page_values(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    text: &str,
    offset: usize,
) -> Result<Parsed<Vec<PageValue>>, ParseError> {
    let mut p = Parser::new(graph, text, offset)?;
    let expression = p.page_values(resource_type)?;
    p.finish(expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ParseErrorKind;
    use crate::graph::Capabilities;

    fn graph() -> ResourceGraph {
        ResourceGraph::builder()
            .resource("todoItems", ValueType::Int, |r| {
                r.attr("description", ValueType::String)
                    .attr("priority", ValueType::Int)
                    .attr("dueAt", ValueType::DateTime)
                    .attr("status", ValueType::Enum(vec!["Open".into(), "Done".into()]))
                    .has_one("owner", "people")
                    .has_many("tags", "tags")
            })
            .resource("people", ValueType::Int, |r| {
                r.attr("firstName", ValueType::String)
                    .attr("age", ValueType::Int)
                    .has_many("todoItems", "todoItems")
            })
            .resource("tags", ValueType::Int, |r| r.attr("name", ValueType::String).has_one("todoItem", "todoItems"))
            .build()
            .unwrap()
    }

    fn filter(text: &str) -> Result<FilterExpression, ParseError> {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap().clone();
        parse_filter(&g, &todo, text, 0).map(|p| p.expression)
    }

    #[test]
    fn test_equals_literal() {
        let expr = filter("equals(description,'Jane')").unwrap();
        let FilterExpression::Comparison { op, left, right } = &expr else {
            panic!("Expected comparison");
        };
        assert_eq!(*op, ComparisonOp::Equals);
        assert_eq!(left.to_string(), "description");
        assert_eq!(*right, Operand::Literal(Literal::new("Jane", ValueType::String)));
    }

    #[test]
    fn test_literal_coerced_to_field_type() {
        let expr = filter("greaterThan(priority,'5')").unwrap();
        let FilterExpression::Comparison { right: Operand::Literal(lit), .. } = &expr else {
            panic!("Expected literal");
        };
        assert_eq!(lit.value, Value::Int(5));
        assert_eq!(lit.value_type, ValueType::Int);
    }

    #[test]
    fn test_coercion_failure_names_types() {
        let err = filter("equals(priority,'high')").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Resolution);
        assert_eq!(err.position, 16);
        assert!(err.message.contains("'high'"));
        assert!(err.message.contains("'Integer'"));
    }

    #[test]
    fn test_to_one_chain() {
        let expr = filter("equals(owner.firstName,'John')").unwrap();
        let FilterExpression::Comparison { left: Operand::Field(chain), .. } = &expr else {
            panic!("Expected field operand");
        };
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.attribute().unwrap().name, "firstName");
    }

    #[test]
    fn test_to_many_hop_rejected() {
        let err = filter("equals(tags.name,'x')").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Resolution);
        assert_eq!(err.position, 7);
        assert!(err.message.contains("To-one relationship expected at 'tags'"));
    }

    #[test]
    fn test_unknown_field_position() {
        let err = filter("and(equals(description,'a'),equals(nope,'b'))").unwrap_err();
        assert_eq!(err.position, 35);
        assert!(err.message.contains("'nope'"));
    }

    #[test]
    fn test_field_to_field_and_null() {
        assert!(filter("equals(description,owner.firstName)").is_ok());
        let expr = filter("equals(dueAt,null)").unwrap();
        let FilterExpression::Comparison { right: Operand::Literal(lit), .. } = &expr else {
            panic!("Expected literal");
        };
        assert!(lit.value.is_null());
        assert!(filter("lessThan(dueAt,null)").is_err());
    }

    #[test]
    fn test_unquoted_text_literal() {
        let expr = filter("equals(status,done)").unwrap();
        assert_eq!(expr.to_string(), "equals(status,'Done')");
    }

    #[test]
    fn test_logical_arity() {
        let err = filter("and(equals(priority,1))").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains("at least two"));
        assert!(filter("not(equals(priority,1),equals(priority,2))").is_err());
    }

    #[test]
    fn test_has_with_nested_filter() {
        let expr = filter("has(tags,equals(name,'home'))").unwrap();
        assert_eq!(expr.to_string(), "has(tags,equals(name,'home'))");
        assert!(filter("has(owner)").is_err());
    }

    #[test]
    fn test_count_comparison() {
        let expr = filter("greaterThan(count(tags),'2')").unwrap();
        let FilterExpression::Comparison { left, right, .. } = &expr else {
            panic!("Expected comparison");
        };
        assert!(matches!(left, Operand::Count(_)));
        assert_eq!(*right, Operand::Literal(Literal::new(2, ValueType::Int)));
    }

    #[test]
    fn test_count_is_not_boolean() {
        let err = filter("count(tags)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Resolution);
    }

    #[test]
    fn test_text_match_requires_text() {
        assert!(filter("startsWith(description,'Bu')").is_ok());
        let err = filter("contains(priority,'1')").unwrap_err();
        assert!(err.message.contains("requires a text attribute"));
    }

    #[test]
    fn test_any_values() {
        let expr = filter("any(priority,1,'2',3)").unwrap();
        let FilterExpression::Any { values, .. } = &expr else {
            panic!("Expected any");
        };
        assert_eq!(values.iter().map(|v| v.value.clone()).collect::<Vec<_>>(), vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3)
        ]);
    }

    #[test]
    fn test_unknown_function_and_unbalanced() {
        let err = filter("matches(description,'x')").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        let err = filter("equals(description,'x'").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains(") expected"));
        let err = filter("equals(description,'x'))").unwrap_err();
        assert!(err.message.contains("End of expression expected"));
    }

    #[test]
    fn test_sort_elements() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let parsed = parse_sort(&g, todo, "-priority,owner.firstName,-count(tags)", 0).unwrap();
        assert_eq!(parsed.expression.to_string(), "-priority,owner.firstName,-count(tags)");
        assert_eq!(parsed.chains[0].positions, vec![1]);
        assert_eq!(parsed.expression.elements.len(), 3);
    }

    #[test]
    fn test_include_chains_dedupe() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let parsed = parse_include(&g, todo, "owner.todoItems,owner,tags.todoItem", 0).unwrap();
        assert_eq!(parsed.expression.to_string(), "owner.todoItems,tags.todoItem");
        assert_eq!(parsed.chains[2].positions, vec![22, 27]);
    }

    #[test]
    fn test_include_attribute_rejected() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let err = parse_include(&g, todo, "owner.firstName", 0).unwrap_err();
        assert_eq!(err.position, 6);
    }

    #[test]
    fn test_sparse_fields_with_type_prefix() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let parsed = parse_sparse_fields(&g, todo, "people:firstName,age", 0, true).unwrap();
        assert_eq!(parsed.expression.len(), 1);
        assert_eq!(parsed.expression[0].resource_type, "people");
        assert_eq!(parsed.expression[0].fields.len(), 2);
        let empty = parse_sparse_fields(&g, todo, "", 0, false).unwrap();
        assert!(empty.expression[0].fields.is_empty());
    }

    #[test]
    fn test_sparse_fields_multiple_groups() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let parsed = parse_sparse_fields(&g, todo, "description,people:firstName,age", 0, true).unwrap();
        let types: Vec<&str> = parsed.expression.iter().map(|s| s.resource_type.as_str()).collect();
        assert_eq!(types, vec!["todoItems", "people"]);
        assert_eq!(parsed.expression[1].fields.len(), 2);

        let err = parse_sparse_fields(&g, todo, "description,nope:x", 0, true).unwrap_err();
        assert_eq!(err.position, 12);
    }

    #[test]
    fn test_scope_must_end_in_to_many() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        assert!(parse_scope(&g, todo, "owner.todoItems", 0).is_ok());
        let err = parse_scope(&g, todo, "owner", 0).unwrap_err();
        assert!(err.message.contains("To-many relationship expected"));
        let err = parse_scope(&g, todo, "doesNotExist", 0).unwrap_err();
        assert_eq!(err.message, "Relationship 'doesNotExist' does not exist on resource type 'todoItems'.");
    }

    #[test]
    fn test_page_values() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let parsed = parse_page_values(&g, todo, "10,tags:5", 0).unwrap();
        assert_eq!(parsed.expression.len(), 2);
        assert!(parsed.expression[0].scope.is_none());
        assert_eq!(parsed.expression[1].value, 5);
        assert_eq!(parsed.expression[1].position, 8);
        assert!(parse_page_values(&g, todo, "ten", 0).is_err());
    }

    #[test]
    fn test_capabilities_do_not_affect_parsing() {
        let g = ResourceGraph::builder()
            .resource("tags", ValueType::Int, |r| {
                r.attribute(crate::graph::AttrField::new("name", ValueType::String).capabilities(Capabilities::NONE))
            })
            .build()
            .unwrap();
        let tags = g.resource_type("tags").unwrap();
        assert!(parse_filter(&g, tags, "equals(name,'x')", 0).is_ok());
    }

    #[test]
    fn test_offset_shifts_positions() {
        let g = graph();
        let todo = g.resource_type("todoItems").unwrap();
        let err = parse_sort(&g, todo, "nope", 10).unwrap_err();
        assert_eq!(err.position, 10);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let text = "or(has(tags),and(equals(owner.firstName,'A'),lessThan(priority,3)))";
        assert_eq!(filter(text).unwrap(), filter(text).unwrap());
        assert_eq!(filter(text).unwrap().to_string(), text.replace("3)", "'3')"));
    }
}
