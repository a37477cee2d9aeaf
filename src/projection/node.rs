use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::path::{format_path, ArrayIndexPathView, PathComponent};
use crate::projection::array_node::ArrayNode;
use crate::projection::{ArrayRecursionPolicy, ComputedFieldsPolicy, ProjectionPolicies, ID_FIELD};
use bson::{Bson, Document};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A child of a document node: either another document level or an
/// array-index level. Closed set, no dynamic dispatch.
#[derive(Debug)]
pub(crate) enum ChildNode {
    Document(DocumentNode),
    Array(ArrayNode),
}

impl ChildNode {
    fn optimize(&mut self) {
        match self {
            ChildNode::Document(node) => node.optimize(),
            ChildNode::Array(node) => node.optimize(),
        }
    }

    pub(crate) fn has_computed(&self) -> bool {
        match self {
            ChildNode::Document(node) => node.subtree_has_computed,
            ChildNode::Array(node) => node.has_computed(),
        }
    }

    fn apply_projections_to_value(&self, value: &Bson) -> Option<Bson> {
        match self {
            ChildNode::Document(node) => node.apply_projections_to_value(value),
            ChildNode::Array(node) => node.apply_projections_to_value(value),
        }
    }

    fn apply_expressions_to_value(&self, root: &Document, value: Option<&Bson>) -> Bson {
        match self {
            ChildNode::Document(node) => node.apply_expressions_to_value(root, value),
            ChildNode::Array(node) => node.apply_expressions_to_value(root, value),
        }
    }

    fn serialize_value(&self) -> Bson {
        match self {
            ChildNode::Document(node) => Bson::Document(node.serialize()),
            ChildNode::Array(node) => Bson::Document(node.serialize()),
        }
    }
}

/// One level of a parsed projection. The root node represents all top-level
/// projections and additions; child nodes represent dotted or nested ones.
///
/// `include_leaves` selects the leaf policy: `true` keeps projected fields
/// (inclusion, output starts empty), `false` drops them (exclusion, output
/// starts as the full input).
#[derive(Debug)]
pub struct DocumentNode {
    policies: ProjectionPolicies,
    include_leaves: bool,
    path_to_node: String,
    // Fields projected verbatim at this level.
    projected_fields: BTreeSet<String>,
    children: BTreeMap<String, ChildNode>,
    expressions: BTreeMap<String, Arc<dyn Expression>>,
    // Additions are processed in the order specified, not in map order. For
    // {a: <expr>, "b.c": <expr>, d: <expr>} the top-level order is
    // ["a", "b", "d"], even though "b.c" lives in `children` and the others
    // in `expressions`.
    order: Vec<String>,
    // Whether this node or any descendant carries a computed field.
    pub(crate) subtree_has_computed: bool,
    // Early-exit bound for `apply_projections`, recomputed by `optimize()`.
    max_fields: Option<usize>,
}

impl DocumentNode {
    pub fn new(policies: ProjectionPolicies, include_leaves: bool, path_to_node: String) -> Self {
        DocumentNode {
            policies,
            include_leaves,
            path_to_node,
            projected_fields: BTreeSet::new(),
            children: BTreeMap::new(),
            expressions: BTreeMap::new(),
            order: Vec::new(),
            subtree_has_computed: false,
            max_fields: None,
        }
    }

    /// Recursively adds `path` as a projected field, creating document
    /// children as needed. The path must not contain array indexes and is
    /// assumed not to conflict with paths already in the tree; conflicts that
    /// slipped past specification validation are internal errors.
    pub fn add_projection_for_path(&mut self, path: &[PathComponent]) -> Result<()> {
        if path.iter().any(|c| c.is_index()) {
            return Err(Error::Internal(format!(
                "array index in plain projection path '{}'",
                format_path(path)
            )));
        }
        self.add_projection_for_array_index_path(ArrayIndexPathView { components: path })
    }

    /// Same as `add_projection_for_path`, but the path may address array
    /// elements; array children are created whenever the component after the
    /// current field is an index.
    pub fn add_projection_for_array_index_path(&mut self, path: ArrayIndexPathView) -> Result<()> {
        if path.is_empty() {
            return Err(Error::Internal("empty projection path".to_string()));
        }
        self.make_optimizations_stale();
        let field = self.expect_field_name(path)?;

        if path.len() == 1 {
            if self.children.contains_key(&field) || self.expressions.contains_key(&field) {
                return Err(self.conflict(&field));
            }
            self.projected_fields.insert(field);
            return Ok(());
        }

        if self.projected_fields.contains(&field) || self.expressions.contains_key(&field) {
            return Err(self.conflict(&field));
        }
        if path.components[1].is_index() {
            self.add_or_get_array_child(field)?
                .add_projection_for_array_index_path(path.tail())
        } else {
            self.add_or_get_document_child(field)?
                .add_projection_for_array_index_path(path.tail())
        }
    }

    /// Recursively adds `path` as a computed field. Marks every node on the
    /// way down as containing computed fields, which gates the
    /// expression-application pass.
    pub fn add_expression_for_path(
        &mut self,
        path: &[PathComponent],
        expr: Arc<dyn Expression>,
    ) -> Result<()> {
        if path.iter().any(|c| c.is_index()) {
            return Err(Error::Internal(format!(
                "array index in plain expression path '{}'",
                format_path(path)
            )));
        }
        self.add_expression_for_array_index_path(ArrayIndexPathView { components: path }, expr)
    }

    /// Same as `add_expression_for_path`, but the path may address array
    /// elements.
    pub fn add_expression_for_array_index_path(
        &mut self,
        path: ArrayIndexPathView,
        expr: Arc<dyn Expression>,
    ) -> Result<()> {
        if path.is_empty() {
            return Err(Error::Internal("empty expression path".to_string()));
        }
        if self.policies.computed_fields == ComputedFieldsPolicy::BanComputedFields {
            return Err(Error::Internal(
                "computed fields are banned by the projection policies".to_string(),
            ));
        }
        self.make_optimizations_stale();
        self.subtree_has_computed = true;
        let field = self.expect_field_name(path)?;

        if path.len() == 1 {
            if self.children.contains_key(&field) || self.projected_fields.contains(&field) {
                return Err(self.conflict(&field));
            }
            self.order.push(field.clone());
            self.expressions.insert(field, expr);
            return Ok(());
        }

        if self.projected_fields.contains(&field) || self.expressions.contains_key(&field) {
            return Err(self.conflict(&field));
        }
        if path.components[1].is_index() {
            self.add_or_get_array_child(field)?
                .add_expression_for_array_index_path(path.tail(), expr)
        } else {
            self.add_or_get_document_child(field)?
                .add_expression_for_array_index_path(path.tail(), expr)
        }
    }

    /// Returns the expression registered at `path`, if any.
    pub fn get_expression_for_path(&self, path: &[PathComponent]) -> Option<&Arc<dyn Expression>> {
        let (first, rest) = path.split_first()?;
        let field = match first {
            PathComponent::FieldName(name) => name,
            PathComponent::ArrayIndex(_) => return None,
        };
        if rest.is_empty() {
            return self.expressions.get(field);
        }
        match self.children.get(field) {
            Some(ChildNode::Document(child)) => child.get_expression_for_path(rest),
            _ => None,
        }
    }

    /// Optimizes every expression and child, then caches the early-exit
    /// bound: an inclusion node with no computed fields anywhere below it can
    /// stop scanning the input once all of its leaves and children have been
    /// matched. No other node shape can prove that further fields won't
    /// match.
    pub fn optimize(&mut self) {
        for expr in self.expressions.values_mut() {
            *expr = Arc::clone(expr).optimize();
        }
        for child in self.children.values_mut() {
            child.optimize();
        }
        self.max_fields = self.max_fields_to_project();
    }

    fn max_fields_to_project(&self) -> Option<usize> {
        if self.include_leaves && !self.subtree_has_computed {
            Some(self.projected_fields.len() + self.children.len())
        } else {
            None
        }
    }

    fn make_optimizations_stale(&mut self) {
        self.max_fields = None;
    }

    /// Applies all projections and expressions and returns the resulting
    /// document.
    pub fn apply_to_document(&self, input: &Document) -> Document {
        let mut output = self.initialize_output_document(input);
        self.apply_projections(input, &mut output);
        if self.subtree_has_computed {
            self.apply_expressions(input, &mut output);
        }
        output
    }

    // Inclusion starts from nothing and copies fields in; exclusion starts
    // from the whole input and removes fields.
    fn initialize_output_document(&self, input: &Document) -> Document {
        if self.include_leaves {
            Document::new()
        } else {
            input.clone()
        }
    }

    // Iterates the *input* document's fields so that pass-through fields
    // retain the input's ordering, never the specification's.
    fn apply_projections(&self, input: &Document, output: &mut Document) {
        let mut projected_count = 0usize;
        for (name, value) in input.iter() {
            if self.projected_fields.contains(name.as_str()) {
                if self.include_leaves {
                    output.insert(name.clone(), value.clone());
                } else {
                    output.remove(name);
                }
                projected_count += 1;
            } else if let Some(child) = self.children.get(name.as_str()) {
                match child.apply_projections_to_value(value) {
                    Some(projected) => {
                        output.insert(name.clone(), projected);
                    }
                    None => {
                        output.remove(name);
                    }
                }
                projected_count += 1;
            }

            if let Some(max) = self.max_fields {
                if projected_count >= max {
                    break;
                }
            }
        }
    }

    pub(crate) fn apply_projections_to_value(&self, value: &Bson) -> Option<Bson> {
        match value {
            Bson::Document(doc) => {
                let mut output = self.initialize_output_document(doc);
                self.apply_projections(doc, &mut output);
                Some(Bson::Document(output))
            }
            Bson::Array(elements) => {
                let mut output = Vec::with_capacity(elements.len());
                for element in elements {
                    // A nested array is either skipped or descended into,
                    // depending on the recursion policy.
                    let skip_nested = element.as_array().is_some()
                        && self.policies.array_recursion
                            == ArrayRecursionPolicy::DoNotRecurseNestedArrays;
                    let transformed = if skip_nested {
                        self.transform_skipped_value(element)
                    } else {
                        self.apply_projections_to_value(element)
                    };
                    if let Some(v) = transformed {
                        output.push(v);
                    }
                }
                Some(Bson::Array(output))
            }
            scalar => {
                // Projecting children of a childless value, e.g. {"a.b": 1}
                // against {a: 2}: inclusion drops it, exclusion keeps it.
                self.transform_skipped_value(scalar)
            }
        }
    }

    fn transform_skipped_value(&self, value: &Bson) -> Option<Bson> {
        if self.include_leaves {
            None
        } else {
            Some(value.clone())
        }
    }

    // Additions run in specification order, against the *current* partial
    // output value, with expressions evaluated against the original root.
    pub(crate) fn apply_expressions(&self, root: &Document, output: &mut Document) {
        for field in &self.order {
            if let Some(child) = self.children.get(field) {
                if !child.has_computed() {
                    continue;
                }
                let computed = child.apply_expressions_to_value(root, output.get(field));
                output.insert(field.clone(), computed);
            } else if let Some(expr) = self.expressions.get(field) {
                output.insert(field.clone(), expr.evaluate(root));
            }
        }
    }

    pub(crate) fn apply_expressions_to_value(&self, root: &Document, value: Option<&Bson>) -> Bson {
        match value {
            Some(Bson::Document(doc)) => {
                let mut output = doc.clone();
                self.apply_expressions(root, &mut output);
                Bson::Document(output)
            }
            Some(Bson::Array(elements)) => Bson::Array(
                elements
                    .iter()
                    .map(|element| self.apply_expressions_to_value(root, Some(element)))
                    .collect(),
            ),
            _ => {
                // Scalar or missing: replace it with a document of just the
                // computed fields. {"a.b": {$literal: 1}} applied to {a: 1}
                // yields {a: {b: 1}}.
                let mut output = Document::new();
                self.apply_expressions(root, &mut output);
                Bson::Document(output)
            }
        }
    }

    /// Renders this level of the tree back into specification shape: `_id`
    /// first if projected, remaining leaves as booleans, then children and
    /// expressions in insertion order.
    pub fn serialize(&self) -> Document {
        let mut output = Document::new();
        let leaf_value = Bson::Boolean(self.include_leaves);

        if self.projected_fields.contains(ID_FIELD) {
            output.insert(ID_FIELD, leaf_value.clone());
        }
        for field in &self.projected_fields {
            if field != ID_FIELD {
                output.insert(field.clone(), leaf_value.clone());
            }
        }
        for field in &self.order {
            if let Some(child) = self.children.get(field) {
                output.insert(field.clone(), child.serialize_value());
            } else if let Some(expr) = self.expressions.get(field) {
                output.insert(field.clone(), expr.serialize());
            }
        }
        output
    }

    fn expect_field_name(&self, path: ArrayIndexPathView) -> Result<String> {
        match path.first() {
            PathComponent::FieldName(name) => Ok(name.clone()),
            PathComponent::ArrayIndex(index) => Err(Error::Internal(format!(
                "expected a field name under '{}', found array index {}",
                self.path_to_node, index
            ))),
        }
    }

    fn add_or_get_document_child(&mut self, field: String) -> Result<&mut DocumentNode> {
        if !self.children.contains_key(&field) {
            let child = DocumentNode::new(
                self.policies,
                self.include_leaves,
                self.child_path(&field),
            );
            self.order.push(field.clone());
            self.children
                .insert(field.clone(), ChildNode::Document(child));
        }
        let mismatch = self.mixed_addressing(&field);
        match self.children.get_mut(&field) {
            Some(ChildNode::Document(child)) => Ok(child),
            _ => Err(mismatch),
        }
    }

    fn add_or_get_array_child(&mut self, field: String) -> Result<&mut ArrayNode> {
        if !self.children.contains_key(&field) {
            let child = ArrayNode::new(
                self.policies,
                self.include_leaves,
                self.child_path(&field),
            );
            self.order.push(field.clone());
            self.children.insert(field.clone(), ChildNode::Array(child));
        }
        let mismatch = self.mixed_addressing(&field);
        match self.children.get_mut(&field) {
            Some(ChildNode::Array(child)) => Ok(child),
            _ => Err(mismatch),
        }
    }

    fn mixed_addressing(&self, field: &str) -> Error {
        Error::Internal(format!(
            "projection path '{}' mixes document and array addressing",
            self.child_path(field)
        ))
    }

    fn child_path(&self, field: &str) -> String {
        if self.path_to_node.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path_to_node, field)
        }
    }

    fn conflict(&self, field: &str) -> Error {
        Error::Internal(format!(
            "projection tree conflict at '{}'; the specification should have been rejected",
            self.child_path(field)
        ))
    }
}
