//! Query expression AST.
//!
//! These types represent parsed and resolved query parameters. They are pure
//! data: field chains hold the resolved graph fields, literals are already
//! coerced to the declared type of the field they are compared with.
//! Every node renders back to the textual grammar through `Display`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::{Cardinality, RelationshipField, ResourceField};
use crate::model::{Value, ValueType};

// ============================================================================
// Field chains and operands
// ============================================================================

/// An ordered, non-empty sequence of resolved fields, e.g. `owner.firstName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldChain {
    fields: SmallVec<[ResourceField; 2]>,
}

impl FieldChain {
    pub fn single(field: ResourceField) -> Self {
        let mut fields = SmallVec::new();
        fields.push(field);
        Self { fields }
    }

    /// Returns None for an empty sequence.
    pub fn from_fields(fields: impl IntoIterator<Item = ResourceField>) -> Option<Self> {
        let fields: SmallVec<[ResourceField; 2]> = fields.into_iter().collect();
        (!fields.is_empty()).then_some(Self { fields })
    }

    pub fn push(&mut self, field: ResourceField) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[ResourceField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first(&self) -> &ResourceField {
        &self.fields[0]
    }

    pub fn last(&self) -> &ResourceField {
        &self.fields[self.fields.len() - 1]
    }

    /// The attribute at the end of the chain, if it ends in one.
    pub fn attribute(&self) -> Option<&Arc<crate::graph::AttrField>> {
        self.last().as_attribute()
    }

    /// Relationships traversed by this chain, in order.
    pub fn relationships(&self) -> impl Iterator<Item = &Arc<RelationshipField>> {
        self.fields.iter().filter_map(ResourceField::as_relationship)
    }

    /// First to-many relationship that is not the last element.
    pub fn inner_to_many(&self) -> Option<&Arc<RelationshipField>> {
        self.fields[..self.fields.len() - 1]
            .iter()
            .filter_map(ResourceField::as_relationship)
            .find(|r| r.cardinality == Cardinality::ToMany)
    }

    /// True when every element is a relationship (include / scope chains).
    pub fn is_relationship_path(&self) -> bool {
        self.fields.iter().all(|f| f.as_relationship().is_some())
    }
}

impl fmt::Display for FieldChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(field.name())?;
        }
        Ok(())
    }
}

/// A constant, coerced to the type it is compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub value: Value,
    pub value_type: ValueType,
}

impl Literal {
    pub fn new(value: impl Into<Value>, value_type: ValueType) -> Self {
        Self { value: value.into(), value_type }
    }

    pub fn null(value_type: ValueType) -> Self {
        Self { value: Value::Null, value_type }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Null => f.write_str("null"),
            v => write!(f, "'{}'", v.to_plain_string().replace('\'', "''")),
        }
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(FieldChain),
    Literal(Literal),
    /// `count(toManyChain)`, an integer.
    Count(FieldChain),
}

impl Operand {
    /// Static type of the operand.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Operand::Field(chain) => chain.attribute().map(|a| a.value_type.clone()),
            Operand::Literal(lit) => Some(lit.value_type.clone()),
            Operand::Count(_) => Some(ValueType::Int),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(chain) => write!(f, "{chain}"),
            Operand::Literal(lit) => write!(f, "{lit}"),
            Operand::Count(chain) => write!(f, "count({chain})"),
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl ComparisonOp {
    pub fn keyword(self) -> &'static str {
        match self {
            ComparisonOp::Equals => "equals",
            ComparisonOp::LessThan => "lessThan",
            ComparisonOp::LessOrEqual => "lessOrEqual",
            ComparisonOp::GreaterThan => "greaterThan",
            ComparisonOp::GreaterOrEqual => "greaterOrEqual",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "equals" => Some(ComparisonOp::Equals),
            "lessThan" => Some(ComparisonOp::LessThan),
            "lessOrEqual" => Some(ComparisonOp::LessOrEqual),
            "greaterThan" => Some(ComparisonOp::GreaterThan),
            "greaterOrEqual" => Some(ComparisonOp::GreaterOrEqual),
            _ => None,
        }
    }
}

/// Logical operators. `Not` takes exactly one operand, `And`/`Or` two or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

impl LogicalOp {
    pub fn keyword(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Not => "not",
        }
    }
}

/// Text matching functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextMatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl TextMatchKind {
    pub fn keyword(self) -> &'static str {
        match self {
            TextMatchKind::Contains => "contains",
            TextMatchKind::StartsWith => "startsWith",
            TextMatchKind::EndsWith => "endsWith",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "contains" => Some(TextMatchKind::Contains),
            "startsWith" => Some(TextMatchKind::StartsWith),
            "endsWith" => Some(TextMatchKind::EndsWith),
            _ => None,
        }
    }
}

/// A boolean-valued filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Comparison { op: ComparisonOp, left: Operand, right: Operand },
    Logical { op: LogicalOp, operands: Vec<FilterExpression> },
    /// `contains(field,'text')`, `startsWith(...)`, `endsWith(...)`
    TextMatch { kind: TextMatchKind, field: FieldChain, text: Literal },
    /// `any(field,'a','b')`: set membership.
    Any { field: FieldChain, values: Vec<Literal> },
    /// `has(toMany[,filter])`: at least one related resource (matching the filter).
    Has { relationship: FieldChain, filter: Option<Box<FilterExpression>> },
}

impl FilterExpression {
    pub fn compare(op: ComparisonOp, left: Operand, right: Operand) -> Self {
        FilterExpression::Comparison { op, left, right }
    }

    pub fn equals(field: FieldChain, literal: Literal) -> Self {
        Self::compare(ComparisonOp::Equals, Operand::Field(field), Operand::Literal(literal))
    }

    pub fn not(operand: FilterExpression) -> Self {
        FilterExpression::Logical { op: LogicalOp::Not, operands: vec![operand] }
    }

    /// Conjunction of all operands; a single operand is returned as-is.
    pub fn and(operands: Vec<FilterExpression>) -> Option<Self> {
        Self::combine(LogicalOp::And, operands)
    }

    /// Disjunction of all operands; a single operand is returned as-is.
    pub fn or(operands: Vec<FilterExpression>) -> Option<Self> {
        Self::combine(LogicalOp::Or, operands)
    }

    fn combine(op: LogicalOp, mut operands: Vec<FilterExpression>) -> Option<Self> {
        match operands.len() {
            0 => None,
            1 => operands.pop(),
            _ => Some(FilterExpression::Logical { op, operands }),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Comparison { op, left, right } => {
                write!(f, "{}({left},{right})", op.keyword())
            }
            FilterExpression::Logical { op, operands } => {
                write!(f, "{}(", op.keyword())?;
                write_list(f, operands)?;
                f.write_str(")")
            }
            FilterExpression::TextMatch { kind, field, text } => {
                write!(f, "{}({field},{text})", kind.keyword())
            }
            FilterExpression::Any { field, values } => {
                write!(f, "any({field},")?;
                write_list(f, values)?;
                f.write_str(")")
            }
            FilterExpression::Has { relationship, filter } => match filter {
                Some(inner) => write!(f, "has({relationship},{inner})"),
                None => write!(f, "has({relationship})"),
            },
        }
    }
}

// ============================================================================
// Sorting
// ============================================================================

/// What a sort key orders by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SortTarget {
    Field(FieldChain),
    Count(FieldChain),
}

/// A single sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortElement {
    pub target: SortTarget,
    pub descending: bool,
}

impl SortElement {
    pub fn ascending(chain: FieldChain) -> Self {
        Self { target: SortTarget::Field(chain), descending: false }
    }

    pub fn descending(chain: FieldChain) -> Self {
        Self { target: SortTarget::Field(chain), descending: true }
    }

    /// True when this key orders directly by the given attribute.
    pub fn is_field(&self, name: &str) -> bool {
        matches!(&self.target, SortTarget::Field(chain) if chain.len() == 1 && chain.first().name() == name)
    }
}

impl fmt::Display for SortElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_str("-")?;
        }
        match &self.target {
            SortTarget::Field(chain) => write!(f, "{chain}"),
            SortTarget::Count(chain) => write!(f, "count({chain})"),
        }
    }
}

/// A non-empty ordered list of sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortExpression {
    pub elements: Vec<SortElement>,
}

impl SortExpression {
    pub fn new(elements: Vec<SortElement>) -> Option<Self> {
        (!elements.is_empty()).then_some(Self { elements })
    }
}

impl fmt::Display for SortExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.elements)
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Opaque keyset cursor: the sort-key values of the last row of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor(pub Vec<Value>);

impl Cursor {
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok().map(Cursor)
    }
}

/// Requested page window.
#[derive(Debug, Clone, PartialEq)]
pub enum Pagination {
    /// 1-based page number of `size` rows.
    Offset { size: u32, number: u32 },
    /// `size` rows following the cursor (or from the start).
    Cursor { size: u32, after: Option<Cursor> },
}

impl Pagination {
    pub fn first_page(size: u32) -> Self {
        Pagination::Offset { size, number: 1 }
    }

    pub fn size(&self) -> u32 {
        match self {
            Pagination::Offset { size, .. } | Pagination::Cursor { size, .. } => *size,
        }
    }
}

impl fmt::Display for Pagination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pagination::Offset { size, number } => write!(f, "page {number} of size {size}"),
            Pagination::Cursor { size, after: Some(cursor) } => {
                write!(f, "{size} after {}", cursor.encode())
            }
            Pagination::Cursor { size, after: None } => write!(f, "first {size}"),
        }
    }
}

// ============================================================================
// Sparse fieldsets and includes
// ============================================================================

/// The fields to return for one resource type.
///
/// An empty set means "no attributes", distinct from an absent set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparseFieldSet {
    pub resource_type: String,
    pub fields: Vec<ResourceField>,
}

impl SparseFieldSet {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self { resource_type: resource_type.into(), fields: Vec::new() }
    }

    /// Adds a field unless already present.
    pub fn insert(&mut self, field: ResourceField) {
        if !self.contains(field.name()) {
            self.fields.push(field);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Arc<crate::graph::AttrField>> {
        self.fields.iter().filter_map(ResourceField::as_attribute)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Arc<RelationshipField>> {
        self.fields.iter().filter_map(ResourceField::as_relationship)
    }
}

impl fmt::Display for SparseFieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(ResourceField::name).collect();
        write!(f, "{}:{}", self.resource_type, names.join(","))
    }
}

/// One node of the include tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncludeElement {
    pub relationship: Arc<RelationshipField>,
    pub children: Vec<IncludeElement>,
}

impl IncludeElement {
    pub fn new(relationship: Arc<RelationshipField>) -> Self {
        Self { relationship, children: Vec::new() }
    }
}

/// De-duplicated tree of relationship chains to include.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IncludeExpression {
    pub elements: Vec<IncludeElement>,
}

impl IncludeExpression {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Merge a relationship chain into the tree; existing prefixes are reused.
    pub fn add_chain(&mut self, chain: &[Arc<RelationshipField>]) {
        let mut level = &mut self.elements;
        for rel in chain {
            let index = match level.iter().position(|e| e.relationship.name == rel.name) {
                Some(i) => i,
                None => {
                    level.push(IncludeElement::new(rel.clone()));
                    level.len() - 1
                }
            };
            level = &mut level[index].children;
        }
    }

    /// All root-to-leaf chains.
    pub fn chains(&self) -> Vec<Vec<Arc<RelationshipField>>> {
        fn walk(
            elements: &[IncludeElement],
            prefix: &mut Vec<Arc<RelationshipField>>,
            out: &mut Vec<Vec<Arc<RelationshipField>>>,
        ) {
            for e in elements {
                prefix.push(e.relationship.clone());
                if e.children.is_empty() {
                    out.push(prefix.clone());
                } else {
                    walk(&e.children, prefix, out);
                }
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        walk(&self.elements, &mut Vec::new(), &mut out);
        out
    }

    /// Longest chain length.
    pub fn depth(&self) -> usize {
        fn depth_of(elements: &[IncludeElement]) -> usize {
            elements.iter().map(|e| 1 + depth_of(&e.children)).max().unwrap_or(0)
        }
        depth_of(&self.elements)
    }
}

impl fmt::Display for IncludeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains: Vec<String> = self
            .chains()
            .iter()
            .map(|chain| chain.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join("."))
            .collect();
        f.write_str(&chains.join(","))
    }
}

/// An expression that applies to a nested relationship scope, or to the
/// primary resource when `scope` is None.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionInScope<T> {
    pub scope: Option<FieldChain>,
    pub expression: T,
}

impl<T> ExpressionInScope<T> {
    pub fn primary(expression: T) -> Self {
        Self { scope: None, expression }
    }

    /// Relationship names of the scope, empty for the primary resource.
    pub fn scope_path(&self) -> Vec<String> {
        self.scope
            .iter()
            .flat_map(|chain| chain.fields().iter().map(|f| f.name().to_owned()))
            .collect()
    }
}
