use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::path::{ArrayIndexPathView, PathComponent};
use crate::projection::node::DocumentNode;
use crate::projection::ProjectionPolicies;
use bson::{Bson, Document};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A projection level applied to an array rather than a document. Children
/// and expressions are keyed by element index. May set individual elements
/// to the result of an expression, or apply document sub-projections to
/// elements that are documents.
///
/// Applying projections to a non-array leaves the value untouched (a
/// projection like `a.$[0].b` against `{a: "foo"}` must not error, because
/// the same trees are used for oplog application against mixed-shape
/// collections). Applying expressions to a non-array replaces it with an
/// array, null-padded up to the highest tracked index.
#[derive(Debug)]
pub struct ArrayNode {
    policies: ProjectionPolicies,
    include_leaves: bool,
    path_to_node: String,
    // Children are always document nodes: arrays directly nested in arrays
    // are not addressable through this path syntax.
    children: BTreeMap<usize, DocumentNode>,
    expressions: BTreeMap<usize, Arc<dyn Expression>>,
    // Transformations run in the order they were requested, matching the
    // behavior of document-level additions.
    order: Vec<usize>,
    max_index: usize,
}

impl ArrayNode {
    pub fn new(policies: ProjectionPolicies, include_leaves: bool, path_to_node: String) -> Self {
        ArrayNode {
            policies,
            include_leaves,
            path_to_node,
            children: BTreeMap::new(),
            expressions: BTreeMap::new(),
            order: Vec::new(),
            max_index: 0,
        }
    }

    pub(crate) fn has_computed(&self) -> bool {
        !self.expressions.is_empty()
            || self.children.values().any(|c| c.subtree_has_computed)
    }

    pub(crate) fn add_projection_for_array_index_path(
        &mut self,
        path: ArrayIndexPathView,
    ) -> Result<()> {
        // Projections of bare array elements are not a thing; the path must
        // continue below the index.
        if path.len() < 2 {
            return Err(Error::Internal(format!(
                "projection path under '{}' ends on an array element",
                self.path_to_node
            )));
        }
        let index = self.expect_index(path)?;
        self.add_or_get_child(index)?
            .add_projection_for_array_index_path(path.tail())
    }

    pub(crate) fn add_expression_for_array_index_path(
        &mut self,
        path: ArrayIndexPathView,
        expr: Arc<dyn Expression>,
    ) -> Result<()> {
        let index = self.expect_index(path)?;
        if path.len() == 1 {
            if self.children.contains_key(&index) {
                return Err(Error::Internal(format!(
                    "projection tree conflict at index {} under '{}'",
                    index, self.path_to_node
                )));
            }
            self.track(index);
            self.expressions.insert(index, expr);
            return Ok(());
        }
        self.add_or_get_child(index)?
            .add_expression_for_array_index_path(path.tail(), expr)
    }

    pub(crate) fn optimize(&mut self) {
        for expr in self.expressions.values_mut() {
            *expr = Arc::clone(expr).optimize();
        }
        for child in self.children.values_mut() {
            child.optimize();
        }
    }

    /// Applies child projections element-wise. Only indices actually present
    /// in the array are touched; everything else passes through, and a
    /// non-array input is returned unmodified.
    pub(crate) fn apply_projections_to_value(&self, value: &Bson) -> Option<Bson> {
        let elements = match value {
            Bson::Array(elements) => elements,
            _ => return Some(value.clone()),
        };

        let mut output = elements.clone();
        for index in &self.order {
            if *index >= output.len() {
                continue;
            }
            if let Some(child) = self.children.get(index) {
                if let Some(projected) = child.apply_projections_to_value(&output[*index]) {
                    output[*index] = projected;
                }
                // An element the child would drop entirely stays as it was:
                // in-place index targeting never removes elements.
            }
        }
        Some(Bson::Array(output))
    }

    /// Applies expressions element-wise. Always produces an array: non-array
    /// input is discarded, and short arrays are padded with nulls up to the
    /// highest tracked index.
    pub(crate) fn apply_expressions_to_value(&self, root: &Document, value: Option<&Bson>) -> Bson {
        let mut output: Vec<Bson> = match value {
            Some(Bson::Array(elements)) => elements.clone(),
            _ => Vec::new(),
        };
        if output.len() < self.max_index + 1 {
            output.resize(self.max_index + 1, Bson::Null);
        }

        for index in &self.order {
            if let Some(expr) = self.expressions.get(index) {
                output[*index] = expr.evaluate(root);
            } else if let Some(child) = self.children.get(index) {
                if !child.subtree_has_computed {
                    continue;
                }
                let current = std::mem::replace(&mut output[*index], Bson::Null);
                output[*index] = child.apply_expressions_to_value(root, Some(&current));
            }
        }
        Bson::Array(output)
    }

    /// Debug rendering: children and expressions under `$[i]` keys.
    pub(crate) fn serialize(&self) -> Document {
        let mut output = Document::new();
        for index in &self.order {
            let key = format!("$[{}]", index);
            if let Some(child) = self.children.get(index) {
                output.insert(key, Bson::Document(child.serialize()));
            } else if let Some(expr) = self.expressions.get(index) {
                output.insert(key, expr.serialize());
            }
        }
        output
    }

    fn expect_index(&self, path: ArrayIndexPathView) -> Result<usize> {
        match path.first() {
            PathComponent::ArrayIndex(index) => Ok(*index),
            PathComponent::FieldName(name) => Err(Error::Internal(format!(
                "expected an array index under '{}', found field '{}'",
                self.path_to_node, name
            ))),
        }
    }

    fn add_or_get_child(&mut self, index: usize) -> Result<&mut DocumentNode> {
        if self.expressions.contains_key(&index) {
            return Err(Error::Internal(format!(
                "projection tree conflict at index {} under '{}'",
                index, self.path_to_node
            )));
        }
        let policies = self.policies;
        let include_leaves = self.include_leaves;
        let child_path = format!("{}.$[{}]", self.path_to_node, index);
        if !self.children.contains_key(&index) {
            self.track(index);
        }
        Ok(self
            .children
            .entry(index)
            .or_insert_with(|| DocumentNode::new(policies, include_leaves, child_path)))
    }

    fn track(&mut self, index: usize) {
        self.max_index = self.max_index.max(index);
        self.order.push(index);
    }
}
