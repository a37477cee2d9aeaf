use crate::path::PathComponent;
use bson::{Bson, Document};
use std::fmt;
use std::sync::Arc;

/// A computed-field expression, evaluated at apply time against the full
/// original root document. The projection engine treats expressions as
/// opaque: it only evaluates, optimizes and serializes them.
pub trait Expression: fmt::Debug + Send + Sync {
    /// Evaluates the expression. `root` is always the original top-level
    /// input document, never a partially projected sub-document.
    fn evaluate(&self, root: &Document) -> Bson;

    /// Returns an equivalent, possibly simpler expression.
    fn optimize(self: Arc<Self>) -> Arc<dyn Expression>;

    /// Renders the expression back into specification syntax.
    fn serialize(&self) -> Bson;
}

/// A constant value, wrapped so it is never re-interpreted as a field path
/// or operator (`{$literal: <value>}`).
#[derive(Debug, Clone)]
pub struct Literal {
    value: Bson,
}

impl Literal {
    pub fn new(value: Bson) -> Arc<Self> {
        Arc::new(Literal { value })
    }
}

impl Expression for Literal {
    fn evaluate(&self, _root: &Document) -> Bson {
        self.value.clone()
    }

    fn optimize(self: Arc<Self>) -> Arc<dyn Expression> {
        self
    }

    fn serialize(&self) -> Bson {
        Bson::Document(bson::doc! { "$literal": self.value.clone() })
    }
}

/// A field-path reference (`"$a.b"`): copies the value at the given dotted
/// path out of the root document, or `null` when the path is missing.
#[derive(Debug, Clone)]
pub struct FieldPath {
    path: Vec<PathComponent>,
}

impl FieldPath {
    pub fn new(path: Vec<PathComponent>) -> Arc<Self> {
        Arc::new(FieldPath { path })
    }
}

impl Expression for FieldPath {
    fn evaluate(&self, root: &Document) -> Bson {
        get_path_value(root, &self.path)
            .cloned()
            .unwrap_or(Bson::Null)
    }

    fn optimize(self: Arc<Self>) -> Arc<dyn Expression> {
        self
    }

    fn serialize(&self) -> Bson {
        let dotted = self
            .path
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Bson::String(format!("${}", dotted))
    }
}

/// Extracts a BSON value from a document given a path.
pub fn get_path_value<'a>(doc: &'a Document, path: &[PathComponent]) -> Option<&'a Bson> {
    let mut current = match path.first()? {
        PathComponent::FieldName(name) => doc.get(name)?,
        PathComponent::ArrayIndex(_) => return None,
    };

    for component in path.iter().skip(1) {
        current = match (component, current) {
            (PathComponent::FieldName(name), Bson::Document(d)) => d.get(name)?,
            (PathComponent::ArrayIndex(index), Bson::Array(a)) => a.get(*index)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_literal_evaluates_to_its_value() {
        let expr = Literal::new(Bson::String("FIRST".to_string()));
        assert_eq!(
            expr.evaluate(&doc! {"anything": 1}),
            Bson::String("FIRST".to_string())
        );
    }

    #[test]
    fn test_literal_serialization() {
        let expr = Literal::new(Bson::Int32(5));
        assert_eq!(expr.serialize(), Bson::Document(doc! {"$literal": 5}));
    }

    #[test]
    fn test_field_path_copies_from_root() {
        let expr = FieldPath::new(vec!["a".into(), "b".into()]);
        let root = doc! {"a": {"b": 42}, "c": 1};
        assert_eq!(expr.evaluate(&root), Bson::Int32(42));
    }

    #[test]
    fn test_field_path_missing_is_null() {
        let expr = FieldPath::new(vec!["a".into(), "x".into()]);
        assert_eq!(expr.evaluate(&doc! {"a": {"b": 1}}), Bson::Null);
    }

    #[test]
    fn test_field_path_through_array_index() {
        let expr = FieldPath::new(vec!["a".into(), 1.into(), "b".into()]);
        let root = doc! {"a": [{"b": 1}, {"b": 2}]};
        assert_eq!(expr.evaluate(&root), Bson::Int32(2));
    }

    #[test]
    fn test_field_path_serialization() {
        let expr = FieldPath::new(vec!["a".into(), "b".into()]);
        assert_eq!(expr.serialize(), Bson::String("$a.b".to_string()));
    }
}
