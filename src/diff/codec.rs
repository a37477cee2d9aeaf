use crate::error::{Error, Result};
use crate::util::bson_utils;
use crate::util::ZeroCopy;
use bson::Bson;
use std::cell::Cell;
use std::fmt;

/*
 * Binary diff format. This format is persisted and replicated, so the byte
 * values below are fixed.
 *
 * section      := <uint32 LE: total section length, including these 4 bytes>
 *                 <1 byte marker: object-diff | array-diff>
 *                 entry*
 *                 <1 byte: 0x00 terminator>
 * objEntry     := <null-terminated field name> <valueOrExclude>
 * valueOrExclude := <update marker> <raw element> | <insert marker> <raw element>
 *                 | <sub-diff marker> <nested section> | <exclude marker>
 * arrEntry     := <index marker> <uint32 LE index> <valueOrExclude minus exclude>
 *               | <resize marker> <uint32 LE new length>      (must be last)
 * raw element  := BSON element with an empty field name
 */

pub const OBJECT_DIFF_MARKER: u8 = 1;
pub const ARRAY_DIFF_MARKER: u8 = 2;
pub const INDEX_MARKER: u8 = 50;
pub const RESIZE_MARKER: u8 = 51;
pub const SUB_DIFF_MARKER: u8 = 149;
pub const UPDATE_MARKER: u8 = 150;
pub const INSERT_MARKER: u8 = 151;
pub const EXCLUDE_MARKER: u8 = 152;
pub const TERMINATOR: u8 = 0;

// Smallest well-formed section: length prefix, marker, terminator.
const MIN_SECTION_LEN: usize = 6;

/// An encoded document diff: a single validated object-diff section. Owns
/// its bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Diff {
    bytes: Vec<u8>,
}

impl Diff {
    /// Takes ownership of `bytes`, validating the top-level framing (length
    /// prefix, section marker and terminator). Deeper corruption is caught
    /// lazily while reading.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        validate_section_framing(&bytes)?;
        if bytes[4] != OBJECT_DIFF_MARKER {
            return Err(Error::CorruptedDiff(
                "a document diff must start with an object-diff section".to_string(),
            ));
        }
        Ok(Diff { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// True when applying this diff cannot change any document.
    pub fn is_noop(&self) -> bool {
        self.bytes.len() == MIN_SECTION_LEN
    }
}

impl fmt::Debug for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Diff({} bytes)", self.bytes.len())
    }
}

fn validate_section_framing(bytes: &[u8]) -> Result<()> {
    if bytes.len() < MIN_SECTION_LEN {
        return Err(Error::CorruptedDiff(format!(
            "diff section too short: {} bytes",
            bytes.len()
        )));
    }
    let declared = bytes.read_u32_le(0) as usize;
    if declared != bytes.len() {
        return Err(Error::CorruptedDiff(format!(
            "diff section length mismatch: declared {}, actual {}",
            declared,
            bytes.len()
        )));
    }
    if bytes[bytes.len() - 1] != TERMINATOR {
        return Err(Error::CorruptedDiff(
            "diff section is not null-terminated".to_string(),
        ));
    }
    if bytes[4] != OBJECT_DIFF_MARKER && bytes[4] != ARRAY_DIFF_MARKER {
        return Err(Error::CorruptedDiff(format!(
            "unknown diff section marker: {}",
            bytes[4]
        )));
    }
    Ok(())
}

/// Serializes diff sections into a single growable buffer. Each
/// `start_*_section` reserves a 4-byte length placeholder which
/// `end_section` backpatches; nested sub-sections share the buffer through a
/// stack of open placeholders, so an inner section is always closed before
/// its parent.
#[derive(Debug, Default)]
pub struct DiffWriter {
    buf: Vec<u8>,
    open_sections: Vec<usize>,
}

impl DiffWriter {
    pub fn new() -> Self {
        DiffWriter::default()
    }

    pub fn start_object_section(&mut self) {
        self.start_section(OBJECT_DIFF_MARKER);
    }

    pub fn start_array_section(&mut self) {
        self.start_section(ARRAY_DIFF_MARKER);
    }

    fn start_section(&mut self, marker: u8) {
        self.open_sections.push(self.buf.len());
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.buf.push(marker);
    }

    /// Writes the terminator and backpatches the section's length prefix.
    pub fn end_section(&mut self) -> Result<()> {
        let start = self.open_sections.pop().ok_or_else(|| {
            Error::Internal("end_section without a matching start_section".to_string())
        })?;
        self.buf.push(TERMINATOR);
        let total = (self.buf.len() - start) as u32;
        self.buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
        Ok(())
    }

    pub fn append_field_name(&mut self, name: &str) -> Result<()> {
        // An empty name would be indistinguishable from the section
        // terminator, and an interior NUL would truncate the name.
        if name.is_empty() || name.as_bytes().contains(&0) {
            return Err(Error::Internal(format!(
                "field name not representable in a diff: {:?}",
                name
            )));
        }
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    pub fn append_index(&mut self, index: u32) {
        self.buf.push(INDEX_MARKER);
        self.buf.extend_from_slice(&index.to_le_bytes());
    }

    /// Must be the last entry of its array section.
    pub fn append_resize(&mut self, new_len: u32) {
        self.buf.push(RESIZE_MARKER);
        self.buf.extend_from_slice(&new_len.to_le_bytes());
    }

    pub fn append_update(&mut self, value: &Bson) -> Result<()> {
        self.buf.push(UPDATE_MARKER);
        bson_utils::append_value_element(&mut self.buf, value)
    }

    pub fn append_insert(&mut self, value: &Bson) -> Result<()> {
        self.buf.push(INSERT_MARKER);
        bson_utils::append_value_element(&mut self.buf, value)
    }

    pub fn append_exclude(&mut self) {
        self.buf.push(EXCLUDE_MARKER);
    }

    pub fn start_sub_diff_object(&mut self) {
        self.buf.push(SUB_DIFF_MARKER);
        self.start_object_section();
    }

    pub fn start_sub_diff_array(&mut self) {
        self.buf.push(SUB_DIFF_MARKER);
        self.start_array_section();
    }

    pub fn finish(self) -> Result<Diff> {
        if !self.open_sections.is_empty() {
            return Err(Error::Internal(format!(
                "{} diff section(s) left open",
                self.open_sections.len()
            )));
        }
        Diff::from_bytes(self.buf)
    }
}

/// Cursor over a single diff section. Constructed over the complete section
/// slice (length prefix included) and positioned on the first entry;
/// validates the framing up front so the primitive reads can stay simple.
#[derive(Debug)]
pub struct DiffReader<'a> {
    buf: &'a [u8],
    position: Cell<usize>,
}

impl<'a> DiffReader<'a> {
    pub fn for_section(buf: &'a [u8]) -> Result<Self> {
        validate_section_framing(buf)?;
        Ok(DiffReader {
            buf,
            position: Cell::new(5),
        })
    }

    /// The section kind marker (object-diff or array-diff).
    pub fn marker(&self) -> u8 {
        self.buf[4]
    }

    pub fn peek_byte(&self) -> Result<u8> {
        let pos = self.position.get();
        self.buf
            .get(pos)
            .copied()
            .ok_or_else(|| Error::CorruptedDiff("unexpected end of diff section".to_string()))
    }

    pub fn next_byte(&self) -> Result<u8> {
        let byte = self.peek_byte()?;
        self.position.set(self.position.get() + 1);
        Ok(byte)
    }

    /// Reads a null-terminated field name.
    pub fn next_cstr(&self) -> Result<&'a str> {
        let pos = self.position.get();
        let nul = self.buf[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::CorruptedDiff("unterminated field name".to_string()))?;
        let bytes = &self.buf[pos..pos + nul];
        self.position.set(pos + nul + 1);
        std::str::from_utf8(bytes)
            .map_err(|e| Error::CorruptedDiff(format!("field name is not UTF-8: {}", e)))
    }

    pub fn next_u32(&self) -> Result<u32> {
        let pos = self.position.get();
        if pos + 4 > self.buf.len() {
            return Err(Error::CorruptedDiff(
                "unexpected end of diff section".to_string(),
            ));
        }
        let value = self.buf.read_u32_le(pos);
        self.position.set(pos + 4);
        Ok(value)
    }

    /// Reads a raw typed value (a BSON element with an empty field name) and
    /// materializes it.
    pub fn next_value(&self) -> Result<Bson> {
        let pos = self.position.get();
        let (value, consumed) = bson_utils::read_value_element(&self.buf[pos..])?;
        self.position.set(pos + consumed);
        Ok(value)
    }

    /// Returns the complete nested section starting at the cursor and
    /// advances past it without parsing its entries. This is what lets the
    /// applier skip a sub-diff it has decided not to interpret.
    pub fn sub_section(&self) -> Result<&'a [u8]> {
        let pos = self.position.get();
        if pos + 4 > self.buf.len() {
            return Err(Error::CorruptedDiff(
                "truncated sub-section length".to_string(),
            ));
        }
        let len = self.buf.read_u32_le(pos) as usize;
        if len < MIN_SECTION_LEN || pos + len > self.buf.len() {
            return Err(Error::CorruptedDiff(format!(
                "sub-section length {} overruns the enclosing section",
                len
            )));
        }
        let section = &self.buf[pos..pos + len];
        self.position.set(pos + len);
        Ok(section)
    }

    pub fn skip(&self, bytes: usize) -> Result<()> {
        let pos = self.position.get() + bytes;
        if pos > self.buf.len() {
            return Err(Error::CorruptedDiff(
                "skip past the end of the diff section".to_string(),
            ));
        }
        self.position.set(pos);
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.position.get()
    }

    pub fn has_remaining(&self) -> bool {
        self.position.get() < self.buf.len()
    }
}
