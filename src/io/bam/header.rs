//! BAM header parsing.
//!
//! The header carries the SAM header text and the reference sequence
//! dictionary that record reference ids point into.
//!
//! # Format
//!
//! ```text
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Name length (l_name, int32, includes NUL)
//!   - l_name bytes: Name (NUL-terminated)
//!   - 4 bytes: Reference length (int32)
//! ```

use std::io::{self, Read};

/// BAM magic bytes.
const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// One reference sequence (chromosome/contig) from the header dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name (e.g. "chr1")
    pub name: String,
    /// Reference sequence length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: String, length: u32) -> Self {
        Self { name, length }
    }
}

/// BAM file header: SAM text plus the reference dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// SAM header text (@HD, @SQ, @RG, @PG lines)
    pub text: String,
    /// Reference sequences in id order
    pub references: Vec<Reference>,
}

impl Header {
    /// Create a new header.
    pub fn new(text: String, references: Vec<Reference>) -> Self {
        Self { text, references }
    }

    /// Get a reference by id.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Get a reference name by id.
    pub fn reference_name(&self, id: usize) -> Option<&str> {
        self.reference(id).map(|r| r.name.as_str())
    }

    /// Look up the id of a reference by name.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.references.iter().position(|r| r.name == name)
    }

    /// Number of reference sequences.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

/// Read and validate the BAM magic bytes.
pub fn read_magic<R: Read>(reader: &mut R) -> io::Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if &magic != BAM_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid BAM magic: expected {BAM_MAGIC:?}, got {magic:?}"),
        ));
    }

    Ok(())
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Read the SAM header text (length-prefixed UTF-8).
pub fn read_header_text<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = read_i32(reader)?;
    if len < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid SAM header length: {len}"),
        ));
    }

    let mut text = vec![0u8; len as usize];
    reader.read_exact(&mut text)?;

    String::from_utf8(text).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid UTF-8 in SAM header: {e}"),
        )
    })
}

/// Read one reference dictionary entry.
pub fn read_reference<R: Read>(reader: &mut R) -> io::Result<Reference> {
    let name_len = read_i32(reader)?;
    if name_len <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid reference name length: {name_len}"),
        ));
    }

    let mut name_bytes = vec![0u8; name_len as usize];
    reader.read_exact(&mut name_bytes)?;

    if name_bytes.pop() != Some(0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Reference name not NUL-terminated",
        ));
    }

    let name = String::from_utf8(name_bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid UTF-8 in reference name: {e}"),
        )
    })?;

    let length = read_i32(reader)?;
    if length < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid reference length: {length}"),
        ));
    }

    Ok(Reference::new(name, length as u32))
}

/// Read the reference dictionary.
pub fn read_references<R: Read>(reader: &mut R) -> io::Result<Vec<Reference>> {
    let count = read_i32(reader)?;
    if count < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid reference count: {count}"),
        ));
    }

    let mut references = Vec::with_capacity(count as usize);
    for i in 0..count {
        let reference = read_reference(reader).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Error reading reference {i}: {e}"),
            )
        })?;
        references.push(reference);
    }

    Ok(references)
}

/// Read a complete BAM header: magic, SAM text, references.
pub fn read_header<R: Read>(reader: &mut R) -> io::Result<Header> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let references = read_references(reader)?;
    Ok(Header::new(text, references))
}
