//! BAM optional tags (auxiliary data).
//!
//! Each tag is a two-character name, a type byte, and a type-dependent
//! value:
//!
//! - `A` printable character
//! - `c`/`C`/`s`/`S`/`i`/`I` integers of width 1/2/4, signed/unsigned
//! - `f` IEEE 754 single-precision float
//! - `Z` NUL-terminated string, `H` NUL-terminated hex text
//! - `B` typed numeric array (element type byte + u32 count + elements)
//!
//! The container keeps the raw bytes and parses on demand; the `Display`
//! impls render the SAM text encoding (`NM:i:5`, `XB:B:i,1,2,3`, ...).

use super::error::BamDecodeError;
use std::collections::HashSet;
use std::fmt;
use std::io;

/// A decoded tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Printable character (A)
    Char(u8),
    /// Integer of any stored width (c, C, s, S, i, I)
    Int(i64),
    /// Single-precision float (f)
    Float(f32),
    /// NUL-terminated string (Z)
    String(String),
    /// Hex-encoded text (H)
    Hex(String),
    /// Typed numeric array (B)
    Array(ArrayValue),
}

/// Element storage of a `B` array tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// Signed 8-bit elements (c)
    Int8(Vec<i8>),
    /// Unsigned 8-bit elements (C)
    UInt8(Vec<u8>),
    /// Signed 16-bit elements (s)
    Int16(Vec<i16>),
    /// Unsigned 16-bit elements (S)
    UInt16(Vec<u16>),
    /// Signed 32-bit elements (i)
    Int32(Vec<i32>),
    /// Unsigned 32-bit elements (I)
    UInt32(Vec<u32>),
    /// Float elements (f)
    Float(Vec<f32>),
}

impl ArrayValue {
    /// SAM element-type character for this array.
    pub fn elem_char(&self) -> char {
        match self {
            ArrayValue::Int8(_) => 'c',
            ArrayValue::UInt8(_) => 'C',
            ArrayValue::Int16(_) => 's',
            ArrayValue::UInt16(_) => 'S',
            ArrayValue::Int32(_) => 'i',
            ArrayValue::UInt32(_) => 'I',
            ArrayValue::Float(_) => 'f',
        }
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.elem_char())?;
        fn join<T: ToString>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
            for v in values {
                write!(f, ",{}", v.to_string())?;
            }
            Ok(())
        }
        match self {
            ArrayValue::Int8(v) => join(f, v),
            ArrayValue::UInt8(v) => join(f, v),
            ArrayValue::Int16(v) => join(f, v),
            ArrayValue::UInt16(v) => join(f, v),
            ArrayValue::Int32(v) => join(f, v),
            ArrayValue::UInt32(v) => join(f, v),
            ArrayValue::Float(v) => join(f, v),
        }
    }
}

/// A single tag: two-character name plus value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Two-character tag name (e.g. "NM", "RG")
    pub name: [u8; 2],
    /// The tag's value
    pub value: TagValue,
}

impl Tag {
    /// Tag name as a string slice.
    pub fn name_str(&self) -> &str {
        std::str::from_utf8(&self.name).unwrap_or("??")
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name_str())?;
        match &self.value {
            TagValue::Char(c) => write!(f, "A:{}", *c as char),
            TagValue::Int(i) => write!(f, "i:{i}"),
            TagValue::Float(fl) => write!(f, "f:{fl}"),
            TagValue::String(s) => write!(f, "Z:{s}"),
            TagValue::Hex(h) => write!(f, "H:{h}"),
            TagValue::Array(arr) => write!(f, "B:{arr}"),
        }
    }
}

/// Container for a record's optional tags.
///
/// Stores the raw bytes from the record and decodes lazily; `get` stops at
/// the first match, `iter` decodes everything and rejects duplicate names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    data: Vec<u8>,
}

impl Tags {
    /// Create an empty tag container.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a container from raw BAM tag bytes.
    pub fn from_raw(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// The raw tag bytes.
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// True when the record carries no tags.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the raw tag data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Find a tag by name.
    pub fn get(&self, name: &[u8; 2]) -> io::Result<Option<Tag>> {
        for tag in TagWalker::new(&self.data) {
            let tag = tag?;
            if &tag.name == name {
                return Ok(Some(tag));
            }
        }
        Ok(None)
    }

    /// Decode all tags in record order.
    ///
    /// # Errors
    ///
    /// Malformed values and duplicate tag names are errors.
    pub fn iter(&self) -> io::Result<Vec<Tag>> {
        let mut tags = Vec::new();
        let mut seen = HashSet::new();

        for tag in TagWalker::new(&self.data) {
            let tag = tag?;
            if !seen.insert(tag.name) {
                return Err(BamDecodeError::DuplicateTag { tag: tag.name }.into());
            }
            tags.push(tag);
        }

        Ok(tags)
    }
}

/// Parse tags from the tail of a BAM record.
pub fn parse_tags(data: &[u8]) -> io::Result<Tags> {
    Ok(Tags::from_raw(data.to_vec()))
}

struct TagWalker<'a> {
    data: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> TagWalker<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            cursor: 0,
            failed: false,
        }
    }

    fn next_tag(&mut self) -> io::Result<Option<Tag>> {
        if self.cursor >= self.data.len() {
            return Ok(None);
        }
        if self.cursor + 3 > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Incomplete tag header at offset {}", self.cursor),
            ));
        }

        let name = [self.data[self.cursor], self.data[self.cursor + 1]];
        let type_code = self.data[self.cursor + 2];
        self.cursor += 3;

        let (value, consumed) = parse_tag_value(&self.data[self.cursor..], type_code)?;
        self.cursor += consumed;

        Ok(Some(Tag { name, value }))
    }
}

impl Iterator for TagWalker<'_> {
    type Item = io::Result<Tag>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_tag() {
            Ok(Some(tag)) => Some(Ok(tag)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn need(data: &[u8], bytes: usize, what: &str) -> io::Result<()> {
    if data.len() < bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Insufficient data for {what}"),
        ));
    }
    Ok(())
}

/// Parse one tag value; returns the value and the bytes consumed.
fn parse_tag_value(data: &[u8], type_code: u8) -> io::Result<(TagValue, usize)> {
    match type_code {
        b'A' => {
            need(data, 1, "character tag")?;
            Ok((TagValue::Char(data[0]), 1))
        }
        b'c' => {
            need(data, 1, "int8 tag")?;
            Ok((TagValue::Int(i64::from(data[0] as i8)), 1))
        }
        b'C' => {
            need(data, 1, "uint8 tag")?;
            Ok((TagValue::Int(i64::from(data[0])), 1))
        }
        b's' => {
            need(data, 2, "int16 tag")?;
            Ok((
                TagValue::Int(i64::from(i16::from_le_bytes([data[0], data[1]]))),
                2,
            ))
        }
        b'S' => {
            need(data, 2, "uint16 tag")?;
            Ok((
                TagValue::Int(i64::from(u16::from_le_bytes([data[0], data[1]]))),
                2,
            ))
        }
        b'i' => {
            need(data, 4, "int32 tag")?;
            let value = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok((TagValue::Int(i64::from(value)), 4))
        }
        b'I' => {
            need(data, 4, "uint32 tag")?;
            let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok((TagValue::Int(i64::from(value)), 4))
        }
        b'f' => {
            need(data, 4, "float tag")?;
            let value = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok((TagValue::Float(value), 4))
        }
        b'Z' | b'H' => {
            let nul = data.iter().position(|&b| b == 0).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Missing NUL terminator in string tag",
                )
            })?;
            let text = String::from_utf8(data[..nul].to_vec()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "Invalid UTF-8 in string tag")
            })?;
            let value = if type_code == b'Z' {
                TagValue::String(text)
            } else {
                TagValue::Hex(text)
            };
            Ok((value, nul + 1))
        }
        b'B' => parse_array_value(data),
        _ => Err(BamDecodeError::InvalidTagType { type_code }.into()),
    }
}

fn parse_array_value(data: &[u8]) -> io::Result<(TagValue, usize)> {
    need(data, 5, "array tag header")?;
    let elem_type = data[0];
    let count_u32 = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    let count = usize::try_from(count_u32)
        .map_err(|_| BamDecodeError::ArrayCountOverflow { count: count_u32 })?;
    let data = &data[5..];

    fn elems<T>(
        data: &[u8],
        count: usize,
        width: usize,
        what: &str,
        decode: impl Fn(&[u8]) -> T,
    ) -> io::Result<(Vec<T>, usize)> {
        let bytes = count
            .checked_mul(width)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Array size overflow"))?;
        need(data, bytes, what)?;
        Ok((data[..bytes].chunks_exact(width).map(decode).collect(), bytes))
    }

    let (value, consumed) = match elem_type {
        b'c' => {
            let (v, n) = elems(data, count, 1, "int8 array", |b| b[0] as i8)?;
            (ArrayValue::Int8(v), n)
        }
        b'C' => {
            let (v, n) = elems(data, count, 1, "uint8 array", |b| b[0])?;
            (ArrayValue::UInt8(v), n)
        }
        b's' => {
            let (v, n) = elems(data, count, 2, "int16 array", |b| {
                i16::from_le_bytes([b[0], b[1]])
            })?;
            (ArrayValue::Int16(v), n)
        }
        b'S' => {
            let (v, n) = elems(data, count, 2, "uint16 array", |b| {
                u16::from_le_bytes([b[0], b[1]])
            })?;
            (ArrayValue::UInt16(v), n)
        }
        b'i' => {
            let (v, n) = elems(data, count, 4, "int32 array", |b| {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })?;
            (ArrayValue::Int32(v), n)
        }
        b'I' => {
            let (v, n) = elems(data, count, 4, "uint32 array", |b| {
                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })?;
            (ArrayValue::UInt32(v), n)
        }
        b'f' => {
            let (v, n) = elems(data, count, 4, "float array", |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })?;
            (ArrayValue::Float(v), n)
        }
        subtype => return Err(BamDecodeError::InvalidArraySubtype { subtype }.into()),
    };

    Ok((TagValue::Array(value), 5 + consumed))
}
