use crate::diff::applier::apply_diff;
use crate::diff::codec::Diff;
use crate::error::{Error, Result};
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};

pub const VERSION_FIELD: &str = "$v";
pub const DIFF_FIELD: &str = "diff";
pub const SET_OPERATOR: &str = "$set";
pub const UNSET_OPERATOR: &str = "$unset";

/// The wire shape of an update oplog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOplogEntryVersion {
    /// `{"$v": 1, "$set": {...}, "$unset": {...}}` modifier style. Entries
    /// written before versioning carry no `$v` at all and are recognized by
    /// their leading `$`-prefixed operator.
    V1Modifier,
    /// `{"$v": 2, "diff": <binary diff>}` delta style.
    V2Delta,
    /// A plain replacement document (no `$v`, no operators).
    Replacement,
}

/// Wraps a binary diff into a v2 update oplog entry.
pub fn make_delta_oplog_entry(diff: &Diff) -> Document {
    let mut entry = Document::new();
    entry.insert(VERSION_FIELD, Bson::Int32(2));
    entry.insert(
        DIFF_FIELD,
        Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: diff.as_bytes().to_vec(),
        }),
    );
    entry
}

/// Determines which update format `entry` carries. `$v` is authoritative
/// when present; without it, a leading `$`-prefixed field marks a legacy v1
/// modifier entry and anything else is a replacement document.
pub fn extract_version(entry: &Document) -> Result<UpdateOplogEntryVersion> {
    match entry.get(VERSION_FIELD) {
        Some(Bson::Int32(1)) | Some(Bson::Int64(1)) => Ok(UpdateOplogEntryVersion::V1Modifier),
        Some(Bson::Int32(2)) | Some(Bson::Int64(2)) => {
            if !entry.contains_key(DIFF_FIELD) {
                return Err(Error::InvalidSpecification(
                    "delta oplog entry has no 'diff' field".to_string(),
                ));
            }
            Ok(UpdateOplogEntryVersion::V2Delta)
        }
        Some(other) => Err(Error::InvalidSpecification(format!(
            "unrecognized update oplog entry version: {}",
            other
        ))),
        None => match entry.keys().next() {
            Some(first) if first.starts_with('$') => Ok(UpdateOplogEntryVersion::V1Modifier),
            _ => Ok(UpdateOplogEntryVersion::Replacement),
        },
    }
}

/// Applies an update oplog entry of any supported version to `pre`.
pub fn apply_update_oplog_entry(pre: &Document, entry: &Document) -> Result<Document> {
    match extract_version(entry)? {
        UpdateOplogEntryVersion::V2Delta => {
            let bytes = match entry.get(DIFF_FIELD) {
                Some(Bson::Binary(binary)) => binary.bytes.clone(),
                _ => {
                    return Err(Error::InvalidSpecification(
                        "delta oplog entry 'diff' field must be binary".to_string(),
                    ))
                }
            };
            let diff = Diff::from_bytes(bytes)?;
            apply_diff(pre, &diff)
        }
        UpdateOplogEntryVersion::V1Modifier => apply_modifier_update(pre, entry),
        UpdateOplogEntryVersion::Replacement => {
            // The entry is the post-image; the pre-image's _id survives when
            // the replacement does not name one.
            let mut output = entry.clone();
            if !output.contains_key("_id") {
                if let Some(id) = pre.get("_id") {
                    // Rebuild so _id lands first, as stored documents keep it.
                    let mut with_id = Document::new();
                    with_id.insert("_id", id.clone());
                    for (name, value) in output.iter() {
                        with_id.insert(name.clone(), value.clone());
                    }
                    output = with_id;
                }
            }
            Ok(output)
        }
    }
}

fn apply_modifier_update(pre: &Document, entry: &Document) -> Result<Document> {
    let mut output = pre.clone();
    for (operator, spec) in entry.iter() {
        if operator == VERSION_FIELD {
            continue;
        }
        let spec = match spec {
            Bson::Document(doc) => doc,
            _ => {
                return Err(Error::InvalidSpecification(format!(
                    "modifier '{}' takes a document argument",
                    operator
                )))
            }
        };
        match operator.as_str() {
            SET_OPERATOR => {
                for (path, value) in spec.iter() {
                    set_dotted(&mut output, &split_dotted(path), value.clone())?;
                }
            }
            UNSET_OPERATOR => {
                for (path, _) in spec.iter() {
                    unset_dotted(&mut output, &split_dotted(path));
                }
            }
            other => {
                return Err(Error::InvalidSpecification(format!(
                    "unsupported update modifier: {}",
                    other
                )))
            }
        }
    }
    Ok(output)
}

fn split_dotted(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

// Sets a dotted path, creating intermediate documents for missing segments.
// A numeric segment indexes into an existing array (null-padding if short);
// against a document it is an ordinary field name.
fn set_dotted(doc: &mut Document, path: &[&str], value: Bson) -> Result<()> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| Error::InvalidSpecification("empty update path".to_string()))?;
    if rest.is_empty() {
        doc.insert(first.to_string(), value);
        return Ok(());
    }
    if !matches!(
        doc.get(*first),
        Some(Bson::Document(_)) | Some(Bson::Array(_))
    ) {
        doc.insert(first.to_string(), Bson::Document(Document::new()));
    }
    match doc.get_mut(*first) {
        Some(container) => set_in_value(container, rest, value),
        None => Err(Error::Internal(
            "intermediate container vanished during $set".to_string(),
        )),
    }
}

fn set_in_value(current: &mut Bson, path: &[&str], value: Bson) -> Result<()> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| Error::InvalidSpecification("empty update path".to_string()))?;
    match current {
        Bson::Document(doc) => set_dotted(doc, path, value),
        Bson::Array(elements) => {
            let index = first.parse::<usize>().map_err(|_| {
                Error::InvalidSpecification(format!(
                    "cannot create field '{}' in an array element",
                    first
                ))
            })?;
            if elements.len() <= index {
                elements.resize(index + 1, Bson::Null);
            }
            if rest.is_empty() {
                elements[index] = value;
                return Ok(());
            }
            if !matches!(elements[index], Bson::Document(_) | Bson::Array(_)) {
                elements[index] = Bson::Document(Document::new());
            }
            set_in_value(&mut elements[index], rest, value)
        }
        _ => Err(Error::Internal(
            "set_in_value called on a scalar".to_string(),
        )),
    }
}

// Removes a dotted path. Missing segments are a no-op; unsetting an array
// element nulls it out rather than shifting its neighbors.
fn unset_dotted(doc: &mut Document, path: &[&str]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        doc.remove(*first);
        return;
    }
    match doc.get_mut(*first) {
        Some(Bson::Document(sub)) => unset_dotted(sub, rest),
        Some(Bson::Array(elements)) => unset_in_array(elements, rest),
        _ => {}
    }
}

fn unset_in_array(elements: &mut Vec<Bson>, path: &[&str]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let Ok(index) = first.parse::<usize>() else {
        return;
    };
    let Some(element) = elements.get_mut(index) else {
        return;
    };
    if rest.is_empty() {
        *element = Bson::Null;
        return;
    }
    match element {
        Bson::Document(sub) => unset_dotted(sub, rest),
        Bson::Array(nested) => unset_in_array(nested, rest),
        _ => {}
    }
}
