use crate::diff::codec::{
    Diff, DiffReader, ARRAY_DIFF_MARKER, EXCLUDE_MARKER, INDEX_MARKER, INSERT_MARKER,
    OBJECT_DIFF_MARKER, RESIZE_MARKER, SUB_DIFF_MARKER, TERMINATOR, UPDATE_MARKER,
};
use crate::diff::MAX_DIFF_DEPTH;
use crate::error::{Error, Result};
use bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

/// Applies `diff` to a pre-image and returns the post-image.
///
/// The pre-image may have drifted from the one the diff was computed
/// against; re-application against a document that has since moved on must
/// still succeed. Whenever the diff's expectations no longer match the
/// actual shape (a sub-diff pointed at a field that is no longer an
/// object/array, an array shorter than an indexed entry expects), the
/// fallback is to leave the field untouched or pad with null, and a later
/// operation is trusted to reconcile the value. This function never fails
/// on a well-formed diff, whatever the pre-image looks like.
pub fn apply_diff(pre: &Document, diff: &Diff) -> Result<Document> {
    apply_object_section(pre, diff.as_bytes(), 0)
}

// Per-section lookup tables, built in one pass over the entries before the
// pre-image is consulted. Names borrow from the diff buffer.
#[derive(Default)]
struct ObjectTables<'a> {
    // Fields dropped from their current position: excludes, plus inserts
    // (which re-appear at the end).
    skip: HashSet<&'a str>,
    // Fields overwritten in place when encountered.
    set: HashMap<&'a str, Bson>,
    // Fields with a nested sub-diff: expected section kind + section bytes.
    sub_diffs: HashMap<&'a str, (u8, &'a [u8])>,
    // Fields appended after the scan unless already written: updates that
    // never matched plus all inserts, in diff order.
    append: Vec<(&'a str, Bson)>,
}

fn build_object_tables<'a>(reader: &DiffReader<'a>) -> Result<ObjectTables<'a>> {
    let mut tables = ObjectTables::default();
    loop {
        if reader.peek_byte()? == TERMINATOR {
            return Ok(tables);
        }
        let name = reader.next_cstr()?;
        let marker = reader.next_byte()?;
        match marker {
            UPDATE_MARKER => {
                let value = reader.next_value()?;
                tables.set.insert(name, value.clone());
                tables.append.push((name, value));
            }
            INSERT_MARKER => {
                let value = reader.next_value()?;
                tables.skip.insert(name);
                tables.append.push((name, value));
            }
            SUB_DIFF_MARKER => {
                let section = reader.sub_section()?;
                tables.sub_diffs.insert(name, (section[4], section));
            }
            EXCLUDE_MARKER => {
                tables.skip.insert(name);
            }
            other => {
                return Err(Error::CorruptedDiff(format!(
                    "unknown entry marker {} for field '{}'",
                    other, name
                )))
            }
        }
    }
}

fn apply_object_section(pre: &Document, section: &[u8], depth: usize) -> Result<Document> {
    if depth > MAX_DIFF_DEPTH {
        return Err(Error::Internal(format!(
            "diff nesting exceeds {} levels",
            MAX_DIFF_DEPTH
        )));
    }
    let reader = DiffReader::for_section(section)?;
    if reader.marker() != OBJECT_DIFF_MARKER {
        return Err(Error::CorruptedDiff(
            "expected an object-diff section".to_string(),
        ));
    }
    let tables = build_object_tables(&reader)?;

    let mut output = Document::new();
    for (name, value) in pre.iter() {
        if tables.skip.contains(name.as_str()) {
            continue;
        }
        if let Some(new_value) = tables.set.get(name.as_str()) {
            output.insert(name.clone(), new_value.clone());
            continue;
        }
        if let Some((kind, sub)) = tables.sub_diffs.get(name.as_str()) {
            match (*kind, value) {
                (OBJECT_DIFF_MARKER, Bson::Document(doc)) => {
                    output.insert(
                        name.clone(),
                        Bson::Document(apply_object_section(doc, sub, depth + 1)?),
                    );
                }
                (ARRAY_DIFF_MARKER, Bson::Array(arr)) => {
                    output.insert(
                        name.clone(),
                        Bson::Array(apply_array_section(arr, sub, depth + 1)?),
                    );
                }
                _ => {
                    // The field no longer has the shape the sub-diff was
                    // computed against. Leave it exactly as it is.
                    trace!(field = name.as_str(), "sub-diff type mismatch, field left unmodified");
                    output.insert(name.clone(), value.clone());
                }
            }
            continue;
        }
        output.insert(name.clone(), value.clone());
    }

    for (name, value) in tables.append {
        if !output.contains_key(name) {
            output.insert(name.to_string(), value);
        }
    }
    Ok(output)
}

enum ArrayOp<'a> {
    Set(Bson),
    SubDiff(u8, &'a [u8]),
}

struct ArrayTables<'a> {
    ops: BTreeMap<usize, ArrayOp<'a>>,
    resize: Option<usize>,
}

fn build_array_tables<'a>(reader: &DiffReader<'a>) -> Result<ArrayTables<'a>> {
    let mut tables = ArrayTables {
        ops: BTreeMap::new(),
        resize: None,
    };
    loop {
        let marker = reader.next_byte()?;
        match marker {
            TERMINATOR => return Ok(tables),
            INDEX_MARKER => {
                let index = reader.next_u32()? as usize;
                let op = match reader.next_byte()? {
                    UPDATE_MARKER | INSERT_MARKER => ArrayOp::Set(reader.next_value()?),
                    SUB_DIFF_MARKER => {
                        let section = reader.sub_section()?;
                        ArrayOp::SubDiff(section[4], section)
                    }
                    other => {
                        return Err(Error::CorruptedDiff(format!(
                            "unknown entry marker {} at array index {}",
                            other, index
                        )))
                    }
                };
                tables.ops.insert(index, op);
            }
            RESIZE_MARKER => {
                tables.resize = Some(reader.next_u32()? as usize);
                if reader.peek_byte()? != TERMINATOR {
                    return Err(Error::CorruptedDiff(
                        "resize must be the last entry of an array diff".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::CorruptedDiff(format!(
                    "unknown array entry marker {}",
                    other
                )))
            }
        }
    }
}

fn apply_array_section(pre: &[Bson], section: &[u8], depth: usize) -> Result<Vec<Bson>> {
    if depth > MAX_DIFF_DEPTH {
        return Err(Error::Internal(format!(
            "diff nesting exceeds {} levels",
            MAX_DIFF_DEPTH
        )));
    }
    let reader = DiffReader::for_section(section)?;
    if reader.marker() != ARRAY_DIFF_MARKER {
        return Err(Error::CorruptedDiff(
            "expected an array-diff section".to_string(),
        ));
    }
    let tables = build_array_tables(&reader)?;

    // A resize is authoritative for the final length; otherwise the array
    // keeps its length, extended to cover any entry beyond it.
    let target_len = tables.resize.unwrap_or_else(|| {
        let touched = tables.ops.keys().next_back().map_or(0, |i| i + 1);
        pre.len().max(touched)
    });

    let mut output = Vec::with_capacity(target_len);
    for index in 0..target_len {
        let existing = pre.get(index);
        match tables.ops.get(&index) {
            Some(ArrayOp::Set(value)) => output.push(value.clone()),
            Some(ArrayOp::SubDiff(kind, sub)) => match (*kind, existing) {
                (OBJECT_DIFF_MARKER, Some(Bson::Document(doc))) => {
                    output.push(Bson::Document(apply_object_section(doc, sub, depth + 1)?));
                }
                (ARRAY_DIFF_MARKER, Some(Bson::Array(arr))) => {
                    output.push(Bson::Array(apply_array_section(arr, sub, depth + 1)?));
                }
                (_, Some(value)) => {
                    trace!(index, "sub-diff type mismatch, array element left unmodified");
                    output.push(value.clone());
                }
                (_, None) => {
                    // The stale pre-image is shorter than the diff expects.
                    trace!(index, "sub-diff beyond the end of the array, padding with null");
                    output.push(Bson::Null);
                }
            },
            None => output.push(existing.cloned().unwrap_or(Bson::Null)),
        }
    }
    Ok(output)
}
