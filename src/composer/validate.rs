//! Re-validation of expressions returned by override callbacks.
//!
//! Callbacks can construct chains by hand, so every field is checked again
//! against the graph: it must resolve on the type reached so far and carry
//! the capability the expression needs. To-many hops are left to the
//! compiler, which knows where an aggregate is required.

use std::sync::Arc;

use crate::expr::ast::{FieldChain, FilterExpression, LogicalOp, Operand, SortExpression, SortTarget, SparseFieldSet};
use crate::graph::{Capability, ResourceGraph, ResourceType};

pub(super) struct Validator<'g> {
    graph: &'g ResourceGraph,
    problems: Vec<String>,
}

impl<'g> Validator<'g> {
    pub(super) fn new(graph: &'g ResourceGraph) -> Self {
        Self { graph, problems: Vec::new() }
    }

    pub(super) fn into_problems(self) -> Vec<String> {
        self.problems
    }

    /// Walk `chain` from `resource_type`, returning the type reached by its
    /// last relationship (or `resource_type` itself).
    fn chain(&mut self, resource_type: &'g ResourceType, chain: &FieldChain, capability: Capability) -> Option<&'g ResourceType> {
        let mut current = resource_type;
        for field in chain.fields() {
            match self.graph.resolve_field(current, field.name()) {
                Some(resolved) if resolved == *field => {}
                _ => {
                    self.problems.push(format!(
                        "Field '{}' in '{chain}' does not exist on resource type '{}'.",
                        field.name(),
                        current.name
                    ));
                    return None;
                }
            }
            if !field.allows(capability) {
                self.problems.push(format!(
                    "{} {} '{}' is not allowed.",
                    capability.verb(),
                    field.kind_name(),
                    field.name()
                ));
            }
            if let Some(rel) = field.as_relationship() {
                current = self.graph.target_of(rel).map(Arc::as_ref)?;
            }
        }
        Some(current)
    }

    fn operand(&mut self, resource_type: &'g ResourceType, operand: &Operand) {
        match operand {
            Operand::Field(chain) | Operand::Count(chain) => {
                self.chain(resource_type, chain, Capability::Filter);
            }
            Operand::Literal(_) => {}
        }
    }

    pub(super) fn filter(&mut self, resource_type: &'g ResourceType, filter: &FilterExpression) {
        match filter {
            FilterExpression::Comparison { left, right, .. } => {
                self.operand(resource_type, left);
                self.operand(resource_type, right);
            }
            FilterExpression::Logical { op, operands } => {
                let arity_ok = match op {
                    LogicalOp::Not => operands.len() == 1,
                    LogicalOp::And | LogicalOp::Or => operands.len() >= 2,
                };
                if !arity_ok {
                    self.problems.push(format!("'{}' has {} operands.", op.keyword(), operands.len()));
                }
                for operand in operands {
                    self.filter(resource_type, operand);
                }
            }
            FilterExpression::TextMatch { field, .. } | FilterExpression::Any { field, .. } => {
                self.chain(resource_type, field, Capability::Filter);
            }
            FilterExpression::Has { relationship, filter } => {
                let target = self.chain(resource_type, relationship, Capability::Filter);
                if let (Some(target), Some(inner)) = (target, filter) {
                    self.filter(target, inner);
                }
            }
        }
    }

    pub(super) fn sort(&mut self, resource_type: &'g ResourceType, sort: &SortExpression) {
        for element in &sort.elements {
            match &element.target {
                SortTarget::Field(chain) | SortTarget::Count(chain) => {
                    self.chain(resource_type, chain, Capability::Sort);
                }
            }
        }
    }

    pub(super) fn fields(&mut self, resource_type: &ResourceType, set: &SparseFieldSet) {
        if set.resource_type != resource_type.name {
            self.problems.push(format!(
                "Sparse fieldset for '{}' applied to resource type '{}'.",
                set.resource_type, resource_type.name
            ));
            return;
        }
        for field in &set.fields {
            if self.graph.resolve_field(resource_type, field.name()).as_ref() != Some(field) {
                self.problems.push(format!(
                    "Field '{}' does not exist on resource type '{}'.",
                    field.name(),
                    resource_type.name
                ));
            } else if field.as_attribute().is_some() && !field.allows(Capability::View) {
                self.problems.push(format!("{} attribute '{}' is not allowed.", Capability::View.verb(), field.name()));
            }
        }
    }
}
