use crate::diff::codec::{Diff, DiffWriter};
use crate::error::{Error, Result};
use crate::path::{ArrayIndexPath, PathComponent};
use bson::{Bson, Document};
use std::collections::BTreeMap;

/// A pending mutation discovered while applying an update to one document.
#[derive(Debug)]
enum Node {
    Document(DocumentNode),
    Array(ArrayNode),
    Update(Bson),
    Insert(Bson),
    Delete,
}

#[derive(Debug, Default)]
struct DocumentNode {
    children: BTreeMap<String, Node>,
    // Created fields serialize last, in creation order; everything else in
    // this node targets existing fields and is order-independent.
    created: Vec<String>,
}

#[derive(Debug, Default)]
struct ArrayNode {
    children: BTreeMap<usize, Node>,
}

/// Accumulates the field-level effects of a single update operation into a
/// tree mirroring the document's shape, then serializes the tree into a
/// binary [`Diff`] in one walk. Built once per update, then discarded.
#[derive(Debug, Default)]
pub struct V2LogBuilder {
    root: DocumentNode,
}

impl V2LogBuilder {
    pub fn new() -> Self {
        V2LogBuilder::default()
    }

    /// Records that the existing field at `path` now holds `value`.
    pub fn log_updated_field(&mut self, path: &ArrayIndexPath, value: Bson) -> Result<()> {
        add_to_document(&mut self.root, path.components(), Node::Update(value))
    }

    /// Records that a new field was created at `path`.
    /// `index_of_first_new_component` says where the existing document ends:
    /// components past it did not exist before and collapse into a single
    /// inserted value (documents for field names, null-padded arrays for
    /// indexes).
    pub fn log_created_field(
        &mut self,
        path: &ArrayIndexPath,
        index_of_first_new_component: usize,
        value: Bson,
    ) -> Result<()> {
        let components = path.components();
        if index_of_first_new_component >= components.len() {
            return Err(Error::Internal(format!(
                "created-field split point {} is outside the path '{}'",
                index_of_first_new_component, path
            )));
        }
        let wrapped = wrap_new_value(&components[index_of_first_new_component + 1..], value);
        add_to_document(
            &mut self.root,
            &components[..=index_of_first_new_component],
            Node::Insert(wrapped),
        )
    }

    /// Records that the field at `path` was removed. Array elements cannot
    /// be deleted this way; arrays shrink through whole-array updates.
    pub fn log_deleted_field(&mut self, path: &ArrayIndexPath) -> Result<()> {
        add_to_document(&mut self.root, path.components(), Node::Delete)
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Serializes the accumulated mutations into the binary diff format.
    pub fn serialize(&self) -> Result<Diff> {
        let mut writer = DiffWriter::new();
        writer.start_object_section();
        serialize_document(&self.root, &mut writer)?;
        writer.end_section()?;
        writer.finish()
    }
}

// Wraps `value` in the not-yet-existing suffix of a created path, right to
// left: field names become single-field documents, array indexes become
// null-padded arrays.
fn wrap_new_value(suffix: &[PathComponent], value: Bson) -> Bson {
    let mut wrapped = value;
    for component in suffix.iter().rev() {
        wrapped = match component {
            PathComponent::FieldName(name) => {
                let mut doc = Document::new();
                doc.insert(name.clone(), wrapped);
                Bson::Document(doc)
            }
            PathComponent::ArrayIndex(index) => {
                let mut elements = vec![Bson::Null; *index];
                elements.push(wrapped);
                Bson::Array(elements)
            }
        };
    }
    wrapped
}

fn add_to_document(node: &mut DocumentNode, path: &[PathComponent], to_add: Node) -> Result<()> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| Error::Internal("empty update log path".to_string()))?;
    let name = match first {
        PathComponent::FieldName(name) => name,
        PathComponent::ArrayIndex(index) => {
            return Err(Error::Internal(format!(
                "array index {} where a field name was expected",
                index
            )))
        }
    };

    if rest.is_empty() {
        if node.children.contains_key(name) {
            return Err(Error::Internal(format!(
                "conflicting update log entries for field '{}'",
                name
            )));
        }
        if matches!(to_add, Node::Insert(_)) {
            node.created.push(name.clone());
        }
        node.children.insert(name.clone(), to_add);
        return Ok(());
    }

    let child = node.children.entry(name.clone()).or_insert_with(|| {
        if rest[0].is_index() {
            Node::Array(ArrayNode::default())
        } else {
            Node::Document(DocumentNode::default())
        }
    });
    match (child, rest[0].is_index()) {
        (Node::Document(doc), false) => add_to_document(doc, rest, to_add),
        (Node::Array(arr), true) => add_to_array(arr, rest, to_add),
        _ => Err(Error::Internal(format!(
            "conflicting update log entries under field '{}'",
            name
        ))),
    }
}

fn add_to_array(node: &mut ArrayNode, path: &[PathComponent], to_add: Node) -> Result<()> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| Error::Internal("empty update log path".to_string()))?;
    let index = match first {
        PathComponent::ArrayIndex(index) => *index,
        PathComponent::FieldName(name) => {
            return Err(Error::Internal(format!(
                "field name '{}' where an array index was expected",
                name
            )))
        }
    };

    if rest.is_empty() {
        if matches!(to_add, Node::Delete) {
            return Err(Error::Internal(
                "array elements cannot be deleted; log a whole-array update".to_string(),
            ));
        }
        if node.children.contains_key(&index) {
            return Err(Error::Internal(format!(
                "conflicting update log entries for array index {}",
                index
            )));
        }
        node.children.insert(index, to_add);
        return Ok(());
    }

    let child = node.children.entry(index).or_insert_with(|| {
        if rest[0].is_index() {
            Node::Array(ArrayNode::default())
        } else {
            Node::Document(DocumentNode::default())
        }
    });
    match (child, rest[0].is_index()) {
        (Node::Document(doc), false) => add_to_document(doc, rest, to_add),
        (Node::Array(arr), true) => add_to_array(arr, rest, to_add),
        _ => Err(Error::Internal(format!(
            "conflicting update log entries under array index {}",
            index
        ))),
    }
}

fn serialize_document(node: &DocumentNode, writer: &mut DiffWriter) -> Result<()> {
    for (name, child) in &node.children {
        match child {
            Node::Insert(_) => continue, // created fields go last
            Node::Delete => {
                writer.append_field_name(name)?;
                writer.append_exclude();
            }
            Node::Update(value) => {
                writer.append_field_name(name)?;
                writer.append_update(value)?;
            }
            Node::Document(sub) => {
                writer.append_field_name(name)?;
                writer.start_sub_diff_object();
                serialize_document(sub, writer)?;
                writer.end_section()?;
            }
            Node::Array(sub) => {
                writer.append_field_name(name)?;
                writer.start_sub_diff_array();
                serialize_array(sub, writer)?;
                writer.end_section()?;
            }
        }
    }
    for name in &node.created {
        if let Some(Node::Insert(value)) = node.children.get(name) {
            writer.append_field_name(name)?;
            writer.append_insert(value)?;
        }
    }
    Ok(())
}

fn serialize_array(node: &ArrayNode, writer: &mut DiffWriter) -> Result<()> {
    for (index, child) in &node.children {
        writer.append_index(*index as u32);
        match child {
            Node::Update(value) => writer.append_update(value)?,
            Node::Insert(value) => writer.append_insert(value)?,
            Node::Document(sub) => {
                writer.start_sub_diff_object();
                serialize_document(sub, writer)?;
                writer.end_section()?;
            }
            Node::Array(sub) => {
                writer.start_sub_diff_array();
                serialize_array(sub, writer)?;
                writer.end_section()?;
            }
            Node::Delete => {
                return Err(Error::Internal(
                    "delete node in an array diff".to_string(),
                ))
            }
        }
    }
    Ok(())
}
