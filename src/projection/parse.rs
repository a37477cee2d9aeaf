use crate::error::{Error, Result};
use crate::expression::{Expression, FieldPath, Literal};
use crate::field_tree::FieldTree;
use crate::path::{format_path, PathComponent};
use crate::projection::node::DocumentNode;
use crate::projection::{DefaultIdPolicy, ProjectionExecutor, ProjectionPolicies, ID_FIELD};
use bson::{Bson, Document};
use std::sync::Arc;

/// What a single specification leaf asks for.
#[derive(Debug, Clone)]
enum SpecLeaf {
    Include,
    Exclude,
    Computed(Arc<dyn Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecStyle {
    // find()/$project: booleans select fields, everything else is computed.
    Project,
    // $addFields: every value is computed, booleans included.
    AddFields,
}

/// Parses a find/`$project`-style specification into an executor.
///
/// - Truthy numeric or `true` leaves are inclusions; zero or `false` leaves
///   are exclusions. Mixing the two (other than for `_id`) is an error.
/// - A string starting with `$` is a field-path expression; a sub-document
///   with a single `$`-operator is an expression; any other literal becomes a
///   computed field (which makes the projection an inclusion).
/// - Nested sub-documents without operators are equivalent to dotted paths.
/// - Inclusion projections retain `_id` unless the specification or the
///   policies say otherwise.
///
/// All validation happens here, before any node tree is built.
pub fn parse_projection(
    spec: &Document,
    policies: ProjectionPolicies,
) -> Result<ProjectionExecutor> {
    if spec.is_empty() {
        return Err(Error::InvalidSpecification(
            "projection document cannot be empty".to_string(),
        ));
    }
    let leaves = flatten(spec, SpecStyle::Project)?;

    // Classify, exempting _id, which may disagree with the rest of the
    // specification.
    let mut includes = 0usize;
    let mut excludes = 0usize;
    let mut computed = 0usize;
    let mut id_leaf: Option<&SpecLeaf> = None;
    for (path, leaf) in &leaves {
        if path.len() == 1 && path[0] == PathComponent::FieldName(ID_FIELD.to_string()) {
            id_leaf = Some(leaf);
            continue;
        }
        match leaf {
            SpecLeaf::Include => includes += 1,
            SpecLeaf::Exclude => excludes += 1,
            SpecLeaf::Computed(_) => computed += 1,
        }
    }
    if excludes > 0 && includes + computed > 0 {
        return Err(Error::InvalidSpecification(
            "projection cannot have a mix of inclusion and exclusion".to_string(),
        ));
    }

    let inclusion = if includes + computed > 0 {
        true
    } else if excludes > 0 {
        false
    } else {
        // Only _id was specified.
        !matches!(id_leaf, Some(SpecLeaf::Exclude))
    };

    validate_conflicts(&leaves)?;

    let mut root = DocumentNode::new(policies, inclusion, String::new());
    let mut id_mentioned = false;
    for (path, leaf) in &leaves {
        let is_id = path.len() == 1 && path[0] == PathComponent::FieldName(ID_FIELD.to_string());
        id_mentioned |= is_id;
        match leaf {
            SpecLeaf::Include => {
                // In an exclusion projection an inclusion can only be _id,
                // which is kept by default anyway.
                if inclusion {
                    root.add_projection_for_path(path)?;
                }
            }
            SpecLeaf::Exclude => {
                // In an inclusion projection an exclusion can only be _id;
                // not adding it is all that is needed.
                if !inclusion {
                    root.add_projection_for_path(path)?;
                }
            }
            SpecLeaf::Computed(expr) => {
                root.add_expression_for_path(path, Arc::clone(expr))?;
            }
        }
    }

    if inclusion && !id_mentioned && policies.default_id == DefaultIdPolicy::IncludeId {
        root.add_projection_for_path(&[PathComponent::FieldName(ID_FIELD.to_string())])?;
    }

    Ok(ProjectionExecutor::from_root(root))
}

/// Parses an `$addFields`-style specification: the whole input passes
/// through and every leaf is a computed field (booleans and numbers are
/// literals here, not selectors).
pub fn parse_add_fields(spec: &Document) -> Result<ProjectionExecutor> {
    if spec.is_empty() {
        return Err(Error::InvalidSpecification(
            "field addition specification cannot be empty".to_string(),
        ));
    }
    let leaves = flatten(spec, SpecStyle::AddFields)?;
    validate_conflicts(&leaves)?;

    let mut root = DocumentNode::new(
        ProjectionPolicies::add_fields_policies(),
        false,
        String::new(),
    );
    for (path, leaf) in &leaves {
        match leaf {
            SpecLeaf::Computed(expr) => root.add_expression_for_path(path, Arc::clone(expr))?,
            _ => {
                return Err(Error::Internal(
                    "field addition leaves must all be computed".to_string(),
                ))
            }
        }
    }
    Ok(ProjectionExecutor::from_root(root))
}

fn validate_conflicts(leaves: &[(Vec<PathComponent>, SpecLeaf)]) -> Result<()> {
    let mut tree: FieldTree<()> = FieldTree::new();
    for (path, _) in leaves {
        tree.insert(path, ())?;
    }
    Ok(())
}

/// Walks the (possibly nested) specification document and produces the flat
/// list of (path, leaf) pairs in specification order.
fn flatten(spec: &Document, style: SpecStyle) -> Result<Vec<(Vec<PathComponent>, SpecLeaf)>> {
    let mut out = Vec::new();
    flatten_into(spec, style, &mut Vec::new(), &mut out)?;
    Ok(out)
}

fn flatten_into(
    spec: &Document,
    style: SpecStyle,
    prefix: &mut Vec<PathComponent>,
    out: &mut Vec<(Vec<PathComponent>, SpecLeaf)>,
) -> Result<()> {
    for (key, value) in spec.iter() {
        let depth = parse_spec_key(key, prefix)?;
        let leaf = classify(value, style, prefix, out)?;
        if let Some(leaf) = leaf {
            out.push((prefix.clone(), leaf));
        }
        prefix.truncate(prefix.len() - depth);
    }
    Ok(())
}

// Splits a specification key into components, pushing them onto `prefix` and
// returning how many were pushed.
fn parse_spec_key(key: &str, prefix: &mut Vec<PathComponent>) -> Result<usize> {
    let mut pushed = 0;
    for segment in key.split('.') {
        if segment.is_empty() {
            prefix.truncate(prefix.len() - pushed);
            return Err(Error::InvalidSpecification(format!(
                "field names may not be empty in path '{}'",
                key
            )));
        }
        if segment.starts_with('$') {
            prefix.truncate(prefix.len() - pushed);
            return Err(Error::InvalidSpecification(format!(
                "field names may not start with '$' in path '{}'",
                key
            )));
        }
        prefix.push(PathComponent::FieldName(segment.to_string()));
        pushed += 1;
    }
    Ok(pushed)
}

// Returns the leaf for `value`, or None if `value` was a nested
// sub-specification that was flattened in place.
fn classify(
    value: &Bson,
    style: SpecStyle,
    prefix: &mut Vec<PathComponent>,
    out: &mut Vec<(Vec<PathComponent>, SpecLeaf)>,
) -> Result<Option<SpecLeaf>> {
    if style == SpecStyle::Project {
        match value {
            Bson::Boolean(true) => return Ok(Some(SpecLeaf::Include)),
            Bson::Boolean(false) => return Ok(Some(SpecLeaf::Exclude)),
            Bson::Int32(n) => {
                return Ok(Some(if *n == 0 {
                    SpecLeaf::Exclude
                } else {
                    SpecLeaf::Include
                }))
            }
            Bson::Int64(n) => {
                return Ok(Some(if *n == 0 {
                    SpecLeaf::Exclude
                } else {
                    SpecLeaf::Include
                }))
            }
            Bson::Double(n) => {
                return Ok(Some(if *n == 0.0 {
                    SpecLeaf::Exclude
                } else {
                    SpecLeaf::Include
                }))
            }
            _ => {}
        }
    }

    match value {
        Bson::String(s) if s.starts_with('$') => {
            Ok(Some(SpecLeaf::Computed(parse_field_path_expression(s)?)))
        }
        Bson::Document(doc) => {
            if let Some((op, _)) = doc.iter().next() {
                if op.starts_with('$') {
                    return Ok(Some(SpecLeaf::Computed(parse_operator_expression(
                        doc, prefix,
                    )?)));
                }
            }
            if doc.is_empty() {
                return Err(Error::InvalidSpecification(format!(
                    "an empty sub-specification is not valid at '{}'",
                    format_path(prefix)
                )));
            }
            flatten_into(doc, style, prefix, out)?;
            Ok(None)
        }
        other => Ok(Some(SpecLeaf::Computed(Literal::new(other.clone())))),
    }
}

fn parse_operator_expression(
    doc: &Document,
    prefix: &[PathComponent],
) -> Result<Arc<dyn Expression>> {
    if doc.len() != 1 {
        return Err(Error::InvalidSpecification(format!(
            "an expression specification must have exactly one operator, found {} at '{}'",
            doc.len(),
            format_path(prefix)
        )));
    }
    let (op, value) = doc.iter().next().ok_or_else(|| {
        Error::Internal("expression specification cannot be empty here".to_string())
    })?;
    match op.as_str() {
        "$literal" => Ok(Literal::new(value.clone())),
        _ => Err(Error::InvalidSpecification(format!(
            "unknown expression operator: {}",
            op
        ))),
    }
}

fn parse_field_path_expression(s: &str) -> Result<Arc<dyn Expression>> {
    let dotted = &s[1..];
    if dotted.is_empty() {
        return Err(Error::InvalidSpecification(
            "a field path expression must name a field".to_string(),
        ));
    }
    let mut components = Vec::new();
    for segment in dotted.split('.') {
        if segment.is_empty() {
            return Err(Error::InvalidSpecification(format!(
                "field names may not be empty in field path '{}'",
                s
            )));
        }
        // Numeric segments navigate into arrays.
        if let Ok(index) = segment.parse::<usize>() {
            components.push(PathComponent::ArrayIndex(index));
        } else {
            components.push(PathComponent::FieldName(segment.to_string()));
        }
    }
    Ok(FieldPath::new(components))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    mod validation {
        use super::*;

        #[test]
        fn test_empty_spec_rejected() {
            assert!(parse_projection(&doc! {}, ProjectionPolicies::default()).is_err());
            assert!(parse_add_fields(&doc! {}).is_err());
        }

        #[test]
        fn test_mixed_inclusion_exclusion_rejected() {
            let err =
                parse_projection(&doc! {"a": 1, "b": 0}, ProjectionPolicies::default())
                    .unwrap_err();
            assert!(err.to_string().contains("mix"));
        }

        #[test]
        fn test_id_is_exempt_from_mixing() {
            assert!(
                parse_projection(&doc! {"a": 1, "_id": 0}, ProjectionPolicies::default()).is_ok()
            );
            assert!(
                parse_projection(&doc! {"a": 0, "_id": 1}, ProjectionPolicies::default()).is_ok()
            );
        }

        #[test]
        fn test_conflicting_paths_rejected() {
            let err = parse_projection(&doc! {"a": 1, "a.b": 1}, ProjectionPolicies::default())
                .unwrap_err();
            assert!(err.to_string().contains("a.b"));
        }

        #[test]
        fn test_conflicting_paths_rejected_for_add_fields() {
            assert!(parse_add_fields(&doc! {"a": "X", "a.b": "Y"}).is_err());
            assert!(parse_add_fields(&doc! {"a.b": "Y", "a": "X"}).is_err());
        }

        #[test]
        fn test_nested_spec_conflicts_with_dotted_path() {
            let spec = doc! {"a": {"b": 1}, "a.b": 1};
            assert!(parse_projection(&spec, ProjectionPolicies::default()).is_err());
        }

        #[test]
        fn test_dollar_field_names_rejected() {
            assert!(parse_projection(&doc! {"$a": 1}, ProjectionPolicies::default()).is_err());
            assert!(
                parse_projection(&doc! {"a.$[1]": 1}, ProjectionPolicies::default()).is_err()
            );
        }

        #[test]
        fn test_empty_path_segment_rejected() {
            assert!(parse_projection(&doc! {"a..b": 1}, ProjectionPolicies::default()).is_err());
        }

        #[test]
        fn test_unknown_operator_rejected() {
            let err = parse_projection(&doc! {"a": {"$nope": 1}}, ProjectionPolicies::default())
                .unwrap_err();
            assert!(err.to_string().contains("$nope"));
        }
    }

    mod classification {
        use super::*;

        #[test]
        fn test_truthy_and_falsy_values() {
            for spec in [doc! {"a": 1}, doc! {"a": true}, doc! {"a": 0.5_f64}] {
                let executor = parse_projection(&spec, ProjectionPolicies::default()).unwrap();
                let out = executor.apply(&doc! {"a": 7, "b": 8});
                assert_eq!(out, doc! {"a": 7});
            }
            for spec in [doc! {"a": 0}, doc! {"a": false}, doc! {"a": 0.0_f64}] {
                let executor = parse_projection(&spec, ProjectionPolicies::default()).unwrap();
                let out = executor.apply(&doc! {"a": 7, "b": 8});
                assert_eq!(out, doc! {"b": 8});
            }
        }

        #[test]
        fn test_nested_spec_equivalent_to_dotted() {
            let nested = parse_projection(&doc! {"a": {"b": 1}}, ProjectionPolicies::default())
                .unwrap();
            let dotted =
                parse_projection(&doc! {"a.b": 1}, ProjectionPolicies::default()).unwrap();
            let input = doc! {"_id": 9, "a": {"b": 1, "c": 2}, "d": 3};
            assert_eq!(nested.apply(&input), dotted.apply(&input));
        }

        #[test]
        fn test_literal_string_is_computed() {
            let executor =
                parse_projection(&doc! {"tag": "FIRST"}, ProjectionPolicies::default()).unwrap();
            let out = executor.apply(&doc! {"x": 1});
            assert_eq!(out, doc! {"tag": "FIRST"});
        }

        #[test]
        fn test_dollar_string_is_a_field_path() {
            let executor =
                parse_projection(&doc! {"copy": "$a.b"}, ProjectionPolicies::default()).unwrap();
            let out = executor.apply(&doc! {"a": {"b": 42}});
            assert_eq!(out, doc! {"copy": 42});
        }

        #[test]
        fn test_add_fields_treats_booleans_as_literals() {
            let executor = parse_add_fields(&doc! {"flag": true}).unwrap();
            let out = executor.apply(&doc! {"a": 1});
            assert_eq!(out, doc! {"a": 1, "flag": true});
        }
    }
}
