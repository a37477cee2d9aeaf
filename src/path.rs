use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Represents a component in a field path
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum PathComponent {
    FieldName(String), // A named field (e.g., "b" in "a.b")
    ArrayIndex(usize), // An array index (e.g., "1" in "a.$[1].b")
}

impl PathComponent {
    pub fn is_index(&self) -> bool {
        matches!(self, PathComponent::ArrayIndex(_))
    }
}

impl PartialOrd for PathComponent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathComponent {
    fn cmp(&self, other: &Self) -> Ordering {
        use PathComponent::*;
        match (self, other) {
            (FieldName(a), FieldName(b)) => a.cmp(b),
            (ArrayIndex(a), ArrayIndex(b)) => a.cmp(b),
            (FieldName(_), ArrayIndex(_)) => Ordering::Less,
            (ArrayIndex(_), FieldName(_)) => Ordering::Greater,
        }
    }
}

impl From<&str> for PathComponent {
    fn from(value: &str) -> Self {
        PathComponent::FieldName(value.to_string())
    }
}

impl From<usize> for PathComponent {
    fn from(index: usize) -> Self {
        PathComponent::ArrayIndex(index)
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathComponent::FieldName(name) => write!(f, "{}", name),
            PathComponent::ArrayIndex(index) => write!(f, "$[{}]", index),
        }
    }
}

/// A path which may interleave field names and array indexes. On the document
/// `{a: [{b: "foo"}]}`, the value `"foo"` sits at the path `a.$[0].b`.
///
/// Built once (parsed from a string or assembled by appending components) and
/// then consumed through read-only slice views during recursive tree walks.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ArrayIndexPath {
    components: Vec<PathComponent>,
}

impl ArrayIndexPath {
    pub fn new(components: Vec<PathComponent>) -> Self {
        ArrayIndexPath { components }
    }

    /// Parses a dotted path. A component of the form `$[<digits>]` becomes an
    /// `ArrayIndex`; anything else is a field name.
    pub fn parse(input: &str) -> Result<Self> {
        let mut out = ArrayIndexPath::default();
        for part in input.split('.') {
            out.append(parse_component(part)?);
        }
        Ok(out)
    }

    pub fn append(&mut self, component: PathComponent) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn view(&self) -> ArrayIndexPathView<'_> {
        ArrayIndexPathView {
            components: &self.components,
        }
    }
}

impl fmt::Display for ArrayIndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_path(&self.components))
    }
}

fn parse_component(part: &str) -> Result<PathComponent> {
    if let Some(rest) = part.strip_prefix("$[") {
        let digits = rest.strip_suffix(']').ok_or_else(|| {
            Error::InvalidSpecification(format!("bad array index component: '{}'", part))
        })?;
        let index = digits.parse::<usize>().map_err(|_| {
            Error::InvalidSpecification(format!("bad array index component: '{}'", part))
        })?;
        Ok(PathComponent::ArrayIndex(index))
    } else {
        Ok(PathComponent::FieldName(part.to_string()))
    }
}

/// Unowned view over an `ArrayIndexPath`, used for recursion. Stripping the
/// first component with `tail()` is O(1) and never touches the owning path.
#[derive(Debug, Clone, Copy)]
pub struct ArrayIndexPathView<'a> {
    pub components: &'a [PathComponent],
}

impl<'a> ArrayIndexPathView<'a> {
    pub fn first(&self) -> &'a PathComponent {
        &self.components[0]
    }

    pub fn tail(&self) -> ArrayIndexPathView<'a> {
        assert!(self.components.len() > 1, "tail() of a single-component path");
        ArrayIndexPathView {
            components: &self.components[1..],
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl<'a> From<&'a ArrayIndexPath> for ArrayIndexPathView<'a> {
    fn from(path: &'a ArrayIndexPath) -> Self {
        path.view()
    }
}

pub fn format_path(path: &[PathComponent]) -> String {
    path.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_fields() {
        let path = ArrayIndexPath::parse("a.b.c").unwrap();
        assert_eq!(
            path.components(),
            &["a".into(), "b".into(), "c".into()] as &[PathComponent]
        );
    }

    #[test]
    fn test_parse_array_indexes() {
        let path = ArrayIndexPath::parse("a.$[2].b").unwrap();
        assert_eq!(
            path.components(),
            &["a".into(), 2usize.into(), "b".into()] as &[PathComponent]
        );
    }

    #[test]
    fn test_parse_missing_bracket() {
        assert!(ArrayIndexPath::parse("a.$[2.b").is_err());
    }

    #[test]
    fn test_parse_non_numeric_index() {
        assert!(ArrayIndexPath::parse("a.$[x]").is_err());
    }

    #[test]
    fn test_round_trip_display() {
        let path = ArrayIndexPath::parse("a.$[0].b.$[12]").unwrap();
        assert_eq!(path.to_string(), "a.$[0].b.$[12]");
    }

    #[test]
    fn test_view_tail() {
        let path = ArrayIndexPath::parse("a.$[1].b").unwrap();
        let view = path.view();
        assert_eq!(view.len(), 3);
        let tail = view.tail();
        assert_eq!(tail.first(), &PathComponent::ArrayIndex(1));
        assert_eq!(tail.tail().first(), &PathComponent::FieldName("b".into()));
    }

    #[test]
    fn test_equality_is_component_wise() {
        let a = ArrayIndexPath::parse("a.$[1]").unwrap();
        let b = ArrayIndexPath::new(vec!["a".into(), 1.into()]);
        assert_eq!(a, b);
        let c = ArrayIndexPath::new(vec!["a".into(), "1".into()]);
        assert_ne!(a, c);
    }
}
