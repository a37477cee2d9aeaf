use crate::diff::codec::{Diff, DiffWriter};
use crate::diff::MAX_DIFF_DEPTH;
use crate::error::{Error, Result};
use crate::util::bson_utils;
use bson::{Bson, Document};

/// Computes the binary diff turning `pre` into `post`. The result is always
/// a single object-diff section; identical inputs produce an empty section.
///
/// Deterministic: the same input pair always yields byte-identical output,
/// which makes the diff safe to persist and replicate.
pub fn compute_diff(pre: &Document, post: &Document) -> Result<Diff> {
    let mut writer = DiffWriter::new();
    writer.start_object_section();
    compute_object_diff(pre, post, &mut writer, 0)?;
    writer.end_section()?;
    writer.finish()
}

fn compute_object_diff(
    pre: &Document,
    post: &Document,
    writer: &mut DiffWriter,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DIFF_DEPTH {
        return Err(Error::Internal(format!(
            "document nesting exceeds {} levels",
            MAX_DIFF_DEPTH
        )));
    }

    let pre_fields: Vec<(&String, &Bson)> = pre.iter().collect();
    let post_fields: Vec<(&String, &Bson)> = post.iter().collect();

    // Walk both field sequences in lockstep while the names line up. The
    // first divergence ends the matched run for good: everything left on the
    // post side is inserted, everything left on the pre side is removed.
    let mut matched = 0;
    while matched < pre_fields.len()
        && matched < post_fields.len()
        && pre_fields[matched].0 == post_fields[matched].0
    {
        let (name, pre_value) = pre_fields[matched];
        let post_value = post_fields[matched].1;
        matched += 1;

        if bson_utils::binary_eq(pre_value, post_value)? {
            continue;
        }
        match (pre_value, post_value) {
            (Bson::Document(pre_doc), Bson::Document(post_doc)) => {
                writer.append_field_name(name)?;
                writer.start_sub_diff_object();
                compute_object_diff(pre_doc, post_doc, writer, depth + 1)?;
                writer.end_section()?;
            }
            (Bson::Array(pre_arr), Bson::Array(post_arr)) => {
                writer.append_field_name(name)?;
                writer.start_sub_diff_array();
                compute_array_diff(pre_arr, post_arr, writer, depth + 1)?;
                writer.end_section()?;
            }
            _ => {
                // Overwrite in place; an update entry never moves a field.
                writer.append_field_name(name)?;
                writer.append_update(post_value)?;
            }
        }
    }

    // Insertions render in post order, deletions batched at the end of the
    // section (their relative order is immaterial to the applier).
    for (name, value) in &post_fields[matched..] {
        writer.append_field_name(name)?;
        writer.append_insert(value)?;
    }
    for (name, _) in &pre_fields[matched..] {
        writer.append_field_name(name)?;
        writer.append_exclude();
    }
    Ok(())
}

fn compute_array_diff(
    pre: &[Bson],
    post: &[Bson],
    writer: &mut DiffWriter,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DIFF_DEPTH {
        return Err(Error::Internal(format!(
            "document nesting exceeds {} levels",
            MAX_DIFF_DEPTH
        )));
    }

    let common = pre.len().min(post.len());
    for index in 0..common {
        let (pre_value, post_value) = (&pre[index], &post[index]);
        if bson_utils::binary_eq(pre_value, post_value)? {
            continue;
        }
        writer.append_index(index as u32);
        match (pre_value, post_value) {
            (Bson::Document(pre_doc), Bson::Document(post_doc)) => {
                writer.start_sub_diff_object();
                compute_object_diff(pre_doc, post_doc, writer, depth + 1)?;
                writer.end_section()?;
            }
            _ => writer.append_update(post_value)?,
        }
    }

    if pre.len() > post.len() {
        writer.append_resize(post.len() as u32);
    } else {
        for index in common..post.len() {
            writer.append_index(index as u32);
            writer.append_insert(&post[index])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::codec::{
        DiffReader, EXCLUDE_MARKER, INDEX_MARKER, INSERT_MARKER, RESIZE_MARKER, SUB_DIFF_MARKER,
        TERMINATOR, UPDATE_MARKER,
    };
    use bson::doc;

    #[test]
    fn test_identical_documents_produce_a_noop_diff() {
        let d = doc! {"a": 1, "b": {"c": [1, 2, 3]}};
        let diff = compute_diff(&d, &d).unwrap();
        assert!(diff.is_noop());
    }

    #[test]
    fn test_determinism() {
        let pre = doc! {"a": 1, "b": [1, 2], "c": {"d": 1}};
        let post = doc! {"a": 2, "b": [1, 5, 6], "c": {"d": 2}, "e": "new"};
        let first = compute_diff(&pre, &post).unwrap();
        let second = compute_diff(&pre, &post).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_scalar_update_entry() {
        let diff = compute_diff(&doc! {"a": 1}, &doc! {"a": 2}).unwrap();
        let reader = DiffReader::for_section(diff.as_bytes()).unwrap();
        assert_eq!(reader.next_cstr().unwrap(), "a");
        assert_eq!(reader.next_byte().unwrap(), UPDATE_MARKER);
        assert_eq!(reader.next_value().unwrap(), bson::Bson::Int32(2));
        assert_eq!(reader.next_byte().unwrap(), TERMINATOR);
    }

    #[test]
    fn test_numeric_type_change_is_an_update() {
        // Int32(1) and Int64(1) compare equal as numbers but not as bytes.
        let diff = compute_diff(&doc! {"a": 1_i32}, &doc! {"a": 1_i64}).unwrap();
        assert!(!diff.is_noop());
    }

    #[test]
    fn test_name_mismatch_ends_the_run() {
        // After "a", names diverge: everything remaining in post is inserted
        // and everything remaining in pre is excluded, even field "c" which
        // both sides carry at different positions.
        let pre = doc! {"a": 1, "b": 2, "c": 3};
        let post = doc! {"a": 1, "c": 3, "b": 2};
        let diff = compute_diff(&pre, &post).unwrap();

        let reader = DiffReader::for_section(diff.as_bytes()).unwrap();
        assert_eq!(reader.next_cstr().unwrap(), "c");
        assert_eq!(reader.next_byte().unwrap(), INSERT_MARKER);
        reader.next_value().unwrap();
        assert_eq!(reader.next_cstr().unwrap(), "b");
        assert_eq!(reader.next_byte().unwrap(), INSERT_MARKER);
        reader.next_value().unwrap();
        assert_eq!(reader.next_cstr().unwrap(), "b");
        assert_eq!(reader.next_byte().unwrap(), EXCLUDE_MARKER);
        assert_eq!(reader.next_cstr().unwrap(), "c");
        assert_eq!(reader.next_byte().unwrap(), EXCLUDE_MARKER);
        assert_eq!(reader.next_byte().unwrap(), TERMINATOR);
    }

    #[test]
    fn test_nested_object_becomes_a_sub_diff() {
        let pre = doc! {"a": {"x": 1, "y": 2}};
        let post = doc! {"a": {"x": 1, "y": 3}};
        let diff = compute_diff(&pre, &post).unwrap();

        let reader = DiffReader::for_section(diff.as_bytes()).unwrap();
        assert_eq!(reader.next_cstr().unwrap(), "a");
        assert_eq!(reader.next_byte().unwrap(), SUB_DIFF_MARKER);
        let sub = reader.sub_section().unwrap();
        let sub_reader = DiffReader::for_section(sub).unwrap();
        assert_eq!(sub_reader.next_cstr().unwrap(), "y");
        assert_eq!(sub_reader.next_byte().unwrap(), UPDATE_MARKER);
        assert_eq!(sub_reader.next_value().unwrap(), bson::Bson::Int32(3));
    }

    #[test]
    fn test_array_shrink_emits_resize() {
        let pre = doc! {"a": [1, 2, 3, 4]};
        let post = doc! {"a": [1, 9]};
        let diff = compute_diff(&pre, &post).unwrap();

        let reader = DiffReader::for_section(diff.as_bytes()).unwrap();
        assert_eq!(reader.next_cstr().unwrap(), "a");
        assert_eq!(reader.next_byte().unwrap(), SUB_DIFF_MARKER);
        let sub = reader.sub_section().unwrap();
        let sub_reader = DiffReader::for_section(sub).unwrap();
        assert_eq!(sub_reader.next_byte().unwrap(), INDEX_MARKER);
        assert_eq!(sub_reader.next_u32().unwrap(), 1);
        assert_eq!(sub_reader.next_byte().unwrap(), UPDATE_MARKER);
        sub_reader.next_value().unwrap();
        assert_eq!(sub_reader.next_byte().unwrap(), RESIZE_MARKER);
        assert_eq!(sub_reader.next_u32().unwrap(), 2);
        assert_eq!(sub_reader.next_byte().unwrap(), TERMINATOR);
    }

    #[test]
    fn test_array_growth_emits_indexed_inserts() {
        let pre = doc! {"a": [1]};
        let post = doc! {"a": [1, 2, 3]};
        let diff = compute_diff(&pre, &post).unwrap();

        let reader = DiffReader::for_section(diff.as_bytes()).unwrap();
        reader.next_cstr().unwrap();
        reader.next_byte().unwrap();
        let sub = reader.sub_section().unwrap();
        let sub_reader = DiffReader::for_section(sub).unwrap();
        for expected in [1u32, 2u32] {
            assert_eq!(sub_reader.next_byte().unwrap(), INDEX_MARKER);
            assert_eq!(sub_reader.next_u32().unwrap(), expected);
            assert_eq!(sub_reader.next_byte().unwrap(), INSERT_MARKER);
            sub_reader.next_value().unwrap();
        }
        assert_eq!(sub_reader.next_byte().unwrap(), TERMINATOR);
    }

    #[test]
    fn test_deep_nesting_is_refused() {
        let mut pre = doc! {"leaf": 1};
        let mut post = doc! {"leaf": 2};
        for _ in 0..(MAX_DIFF_DEPTH + 1) {
            pre = doc! {"n": pre};
            post = doc! {"n": post};
        }
        assert!(compute_diff(&pre, &post).is_err());
    }
}
