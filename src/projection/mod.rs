pub(crate) mod array_node;
pub(crate) mod node;
mod parse;

pub use node::DocumentNode;
pub use parse::{parse_add_fields, parse_projection};

use crate::error::Result;
use crate::expression::Expression;
use crate::path::ArrayIndexPath;
use bson::{Bson, Document};
use std::sync::Arc;

/// The `_id` field, which inclusion projections retain by default.
pub const ID_FIELD: &str = "_id";

/// Whether an inclusion projection retains `_id` when the specification does
/// not mention it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultIdPolicy {
    IncludeId,
    ExcludeId,
}

/// Whether projections descend into arrays directly nested inside arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayRecursionPolicy {
    RecurseNestedArrays,
    DoNotRecurseNestedArrays,
}

/// Whether the specification may contain computed (expression) fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedFieldsPolicy {
    AllowComputedFields,
    BanComputedFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionPolicies {
    pub default_id: DefaultIdPolicy,
    pub array_recursion: ArrayRecursionPolicy,
    pub computed_fields: ComputedFieldsPolicy,
}

impl Default for ProjectionPolicies {
    fn default() -> Self {
        ProjectionPolicies {
            default_id: DefaultIdPolicy::IncludeId,
            array_recursion: ArrayRecursionPolicy::RecurseNestedArrays,
            computed_fields: ComputedFieldsPolicy::AllowComputedFields,
        }
    }
}

impl ProjectionPolicies {
    /// Policies for the `$addFields` family: every field is computed and the
    /// whole input document always passes through.
    pub fn add_fields_policies() -> Self {
        ProjectionPolicies::default()
    }
}

/// Per-document metadata carried alongside the fields (text score, sort key,
/// ...). Projections never touch it: whatever the input document carries is
/// copied to the output verbatim, regardless of the projection policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetadata {
    pub text_score: Option<f64>,
    pub rand_val: Option<f64>,
    pub sort_key: Option<Bson>,
    pub geo_near_distance: Option<f64>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        self.text_score.is_none()
            && self.rand_val.is_none()
            && self.sort_key.is_none()
            && self.geo_near_distance.is_none()
    }
}

/// A document paired with its metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaDocument {
    pub doc: Document,
    pub metadata: DocumentMetadata,
}

/// A compiled projection: a tree of document/array nodes built once from a
/// specification and then applied read-only to any number of documents.
///
/// Construction methods require `&mut self`; application takes `&self`, so
/// the borrow checker enforces the build-then-apply protocol.
#[derive(Debug)]
pub struct ProjectionExecutor {
    root: DocumentNode,
}

impl ProjectionExecutor {
    /// An empty inclusion projection (output starts empty, projected fields
    /// are copied in).
    pub fn inclusion(policies: ProjectionPolicies) -> Self {
        ProjectionExecutor {
            root: DocumentNode::new(policies, true, String::new()),
        }
    }

    /// An empty exclusion projection (output starts as the full input,
    /// projected fields are removed).
    pub fn exclusion(policies: ProjectionPolicies) -> Self {
        ProjectionExecutor {
            root: DocumentNode::new(policies, false, String::new()),
        }
    }

    /// An empty `$addFields`-style transform: pass-through semantics plus
    /// computed fields.
    pub fn add_fields() -> Self {
        Self::exclusion(ProjectionPolicies::add_fields_policies())
    }

    pub(crate) fn from_root(root: DocumentNode) -> Self {
        ProjectionExecutor { root }
    }

    pub fn root(&self) -> &DocumentNode {
        &self.root
    }

    pub fn add_projection_for_path(&mut self, path: &ArrayIndexPath) -> Result<()> {
        self.root.add_projection_for_path(path.components())
    }

    pub fn add_expression_for_path(
        &mut self,
        path: &ArrayIndexPath,
        expr: Arc<dyn Expression>,
    ) -> Result<()> {
        self.root.add_expression_for_path(path.components(), expr)
    }

    /// Adds a projection whose path may address specific array elements
    /// (`a.$[2].b`).
    pub fn add_projection_for_array_index_path(&mut self, path: &ArrayIndexPath) -> Result<()> {
        self.root
            .add_projection_for_array_index_path(path.view())
    }

    /// Adds a computed field whose path may address specific array elements.
    pub fn add_expression_for_array_index_path(
        &mut self,
        path: &ArrayIndexPath,
        expr: Arc<dyn Expression>,
    ) -> Result<()> {
        self.root
            .add_expression_for_array_index_path(path.view(), expr)
    }

    /// Optimizes every expression in the tree and recomputes the early-exit
    /// field bound. Must be re-run after further construction calls.
    pub fn optimize(&mut self) {
        self.root.optimize();
    }

    /// Applies the projection to a document.
    pub fn apply(&self, input: &Document) -> Document {
        self.root.apply_to_document(input)
    }

    /// Applies the projection, copying the input's metadata to the output
    /// verbatim.
    pub fn apply_with_metadata(&self, input: &MetaDocument) -> MetaDocument {
        MetaDocument {
            doc: self.root.apply_to_document(&input.doc),
            metadata: input.metadata.clone(),
        }
    }

    /// Renders the projection back into specification shape, for debugging
    /// and explain-style output.
    pub fn serialize(&self) -> Document {
        self.root.serialize()
    }
}
