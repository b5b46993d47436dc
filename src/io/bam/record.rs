//! BAM record structure and parsing.
//!
//! # Binary format (little-endian)
//!
//! ```text
//! - block_size (int32): record size in bytes, excluding this field
//! - refID (int32): reference id, -1 for unmapped
//! - pos (int32): 0-based leftmost position, -1 for unmapped
//! - l_read_name (uint8): read name length including NUL
//! - mapq (uint8): mapping quality, 255 = unavailable
//! - bin (uint16): BAI bin of the alignment
//! - n_cigar_op (uint16): number of CIGAR operations
//! - flag (uint16): bitwise FLAGS
//! - l_seq (int32): sequence length
//! - next_refID (int32): mate reference id
//! - next_pos (int32): mate position
//! - tlen (int32): template length
//! - read_name (char[l_read_name]): NUL-terminated
//! - cigar (uint32[n_cigar_op])
//! - seq (uint8[(l_seq+1)/2]): 4-bit packed
//! - qual (char[l_seq]): raw Phred scores (no +33 offset)
//! - tags: remaining bytes
//! ```

use super::cigar::{parse_cigar, CigarOp};
use super::error::BamDecodeError;
use super::sequence::decode_sequence;
use super::tags::{parse_tags, Tags};
use std::io;

fn read_i32_le(data: &[u8], cursor: &mut usize) -> io::Result<i32> {
    if *cursor + 4 > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Insufficient data at offset {}: need 4 bytes for i32", *cursor),
        ));
    }
    let value = i32::from_le_bytes([
        data[*cursor],
        data[*cursor + 1],
        data[*cursor + 2],
        data[*cursor + 3],
    ]);
    *cursor += 4;
    Ok(value)
}

fn read_u16_le(data: &[u8], cursor: &mut usize) -> io::Result<u16> {
    if *cursor + 2 > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Insufficient data at offset {}: need 2 bytes for u16", *cursor),
        ));
    }
    let value = u16::from_le_bytes([data[*cursor], data[*cursor + 1]]);
    *cursor += 2;
    Ok(value)
}

fn read_u8(data: &[u8], cursor: &mut usize) -> io::Result<u8> {
    if *cursor >= data.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Insufficient data at offset {}: need 1 byte", *cursor),
        ));
    }
    let value = data[*cursor];
    *cursor += 1;
    Ok(value)
}

/// Validate a stored reference id: only -1 (unmapped) and >= 0 are legal.
fn parse_reference_id(ref_id: i32, field: &'static str) -> io::Result<Option<usize>> {
    match ref_id {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as usize)),
        value => Err(BamDecodeError::InvalidReferenceId { value, field }.into()),
    }
}

/// A single alignment record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Read (query) name
    pub name: String,
    /// Reference id, `None` when unmapped (stored -1)
    pub reference_id: Option<usize>,
    /// 0-based leftmost position, `None` when unplaced (stored -1)
    pub position: Option<i32>,
    /// Mapping quality, `None` when unavailable (stored 255)
    pub mapq: Option<u8>,
    /// Bitwise FLAGS
    pub flags: u16,
    /// Mate reference id, `None` when unavailable
    pub mate_reference_id: Option<usize>,
    /// Mate position, `None` when unavailable
    pub mate_position: Option<i32>,
    /// Template length (TLEN)
    pub template_length: i32,
    /// Decoded sequence bases (ASCII)
    pub sequence: Vec<u8>,
    /// Raw Phred quality scores (no +33 offset applied)
    pub quality: Vec<u8>,
    /// CIGAR operations
    pub cigar: Vec<CigarOp>,
    /// Optional tags
    pub tags: Tags,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            reference_id: None,
            position: None,
            mapq: None,
            flags: 0,
            mate_reference_id: None,
            mate_position: None,
            template_length: 0,
            sequence: Vec::new(),
            quality: Vec::new(),
            cigar: Vec::new(),
            tags: Tags::new(),
        }
    }

    /// True when the unmapped flag (0x4) is set.
    pub fn is_unmapped(&self) -> bool {
        self.flags & 0x4 != 0
    }

    /// True when the paired flag (0x1) is set.
    pub fn is_paired(&self) -> bool {
        self.flags & 0x1 != 0
    }

    /// True when the reverse-complement flag (0x10) is set.
    pub fn is_reverse_complement(&self) -> bool {
        self.flags & 0x10 != 0
    }

    /// Number of reference bases this alignment spans.
    pub fn reference_span(&self) -> u32 {
        super::cigar::bases_covered(&self.cigar)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a BAM record from its binary encoding.
///
/// `data` must hold the complete record including the leading block_size
/// field.
pub fn parse_record(data: &[u8]) -> io::Result<Record> {
    if data.len() < 36 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Record too short: {} bytes (minimum 36)", data.len()),
        ));
    }

    let mut cursor = 0;
    let _block_size = read_i32_le(data, &mut cursor)?;
    let ref_id = read_i32_le(data, &mut cursor)?;
    let pos = read_i32_le(data, &mut cursor)?;

    let l_read_name = read_u8(data, &mut cursor)? as usize;
    if l_read_name == 0 {
        return Err(BamDecodeError::InvalidReadNameLength { offset: cursor - 1 }.into());
    }

    let mapq = read_u8(data, &mut cursor)?;
    let _bin = read_u16_le(data, &mut cursor)?;
    let n_cigar_op = read_u16_le(data, &mut cursor)? as usize;
    let flags = read_u16_le(data, &mut cursor)?;

    let l_seq = read_i32_le(data, &mut cursor)?;
    if l_seq < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid sequence length: {l_seq}"),
        ));
    }
    let l_seq = l_seq as usize;

    let next_ref_id = read_i32_le(data, &mut cursor)?;
    let next_pos = read_i32_le(data, &mut cursor)?;
    let tlen = read_i32_le(data, &mut cursor)?;

    if cursor + l_read_name > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Insufficient data for read name at offset {cursor}"),
        ));
    }
    let name_bytes = &data[cursor..cursor + l_read_name];
    if name_bytes.last() != Some(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Read name not NUL-terminated at offset {cursor}"),
        ));
    }
    let name = String::from_utf8(name_bytes[..name_bytes.len() - 1].to_vec()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid UTF-8 in read name: {e}"),
        )
    })?;
    cursor += l_read_name;

    let cigar_bytes = n_cigar_op.checked_mul(4).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("CIGAR operation count too large: {n_cigar_op}"),
        )
    })?;
    if cursor + cigar_bytes > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Insufficient data for {n_cigar_op} CIGAR operations at offset {cursor}"),
        ));
    }
    let cigar = parse_cigar(&data[cursor..cursor + cigar_bytes], n_cigar_op)?;
    cursor += cigar_bytes;

    let seq_bytes = l_seq.div_ceil(2);
    if cursor + seq_bytes > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Insufficient data for {l_seq} sequence bases at offset {cursor}"),
        ));
    }
    let sequence = decode_sequence(&data[cursor..cursor + seq_bytes], l_seq)?;
    cursor += seq_bytes;

    if cursor + l_seq > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Insufficient data for {l_seq} quality scores at offset {cursor}"),
        ));
    }
    let quality = data[cursor..cursor + l_seq].to_vec();
    cursor += l_seq;

    let tags = if cursor < data.len() {
        parse_tags(&data[cursor..])?
    } else {
        Tags::new()
    };

    Ok(Record {
        name,
        reference_id: parse_reference_id(ref_id, "read")?,
        position: if pos >= 0 { Some(pos) } else { None },
        mapq: if mapq != 255 { Some(mapq) } else { None },
        flags,
        mate_reference_id: parse_reference_id(next_ref_id, "mate")?,
        mate_position: if next_pos >= 0 { Some(next_pos) } else { None },
        template_length: tlen,
        sequence,
        quality,
        cigar,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a record the way a BAM writer would.
    pub(crate) fn encode_record(
        name: &str,
        ref_id: i32,
        pos: i32,
        cigar: &[(u32, u32)],
        seq_len: usize,
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&ref_id.to_le_bytes());
        body.extend_from_slice(&pos.to_le_bytes());
        body.push((name.len() + 1) as u8);
        body.push(40); // mapq
        body.extend_from_slice(&0u16.to_le_bytes()); // bin
        body.extend_from_slice(&(cigar.len() as u16).to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.extend_from_slice(&(seq_len as i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        for &(len, op) in cigar {
            body.extend_from_slice(&((len << 4) | op).to_le_bytes());
        }
        body.extend(std::iter::repeat(0x11).take(seq_len.div_ceil(2))); // "AA.."
        body.extend(std::iter::repeat(30).take(seq_len));

        let mut data = Vec::with_capacity(body.len() + 4);
        data.extend_from_slice(&(body.len() as i32).to_le_bytes());
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn test_parse_minimal_unmapped() {
        let data = encode_record("read", -1, -1, &[], 0);
        let record = parse_record(&data).unwrap();
        assert_eq!(record.name, "read");
        assert_eq!(record.reference_id, None);
        assert_eq!(record.position, None);
        assert!(record.cigar.is_empty());
        assert!(record.sequence.is_empty());
    }

    #[test]
    fn test_parse_mapped_record() {
        let data = encode_record("r1", 0, 100, &[(4, 0)], 4);
        let record = parse_record(&data).unwrap();
        assert_eq!(record.reference_id, Some(0));
        assert_eq!(record.position, Some(100));
        assert_eq!(record.mapq, Some(40));
        assert_eq!(record.cigar, vec![CigarOp::Match(4)]);
        assert_eq!(record.sequence, b"AAAA");
        assert_eq!(record.quality, vec![30; 4]);
        assert_eq!(record.reference_span(), 4);
    }

    #[test]
    fn test_reference_span_mixed_ops() {
        // 10M 5I 3D 2S spans 13 reference bases
        let data = encode_record("r1", 0, 0, &[(10, 0), (5, 1), (3, 2), (2, 4)], 0);
        let record = parse_record(&data).unwrap();
        assert_eq!(record.reference_span(), 13);
    }

    #[test]
    fn test_truncated_record() {
        let data = encode_record("r1", 0, 100, &[(4, 0)], 4);
        assert!(parse_record(&data[..20]).is_err());
    }

    #[test]
    fn test_record_claims_more_cigar_than_present() {
        let mut data = encode_record("r1", 0, 100, &[], 0);
        // Raise n_cigar_op without appending data.
        data[16] = 10;
        assert!(parse_record(&data).is_err());
    }

    #[test]
    fn test_invalid_reference_ids() {
        for invalid in [-2i32, -100, i32::MIN] {
            let data = encode_record("r", invalid, 0, &[], 0);
            let err = parse_record(&data).unwrap_err();
            assert!(err.to_string().contains("reference ID"), "{err}");
        }
    }

    #[test]
    fn test_zero_read_name_length() {
        let mut data = encode_record("r", 0, 0, &[], 0);
        data[12] = 0; // l_read_name
        assert!(parse_record(&data).is_err());
    }

    #[test]
    fn test_missing_name_terminator() {
        let mut data = encode_record("rr", 0, 0, &[], 0);
        // Overwrite the NUL with a printable byte.
        let nul_at = 4 + 32 + 2;
        data[nul_at] = b'x';
        assert!(parse_record(&data).is_err());
    }

    #[test]
    fn test_record_flags() {
        let mut record = Record::new();
        record.flags = 0x4;
        assert!(record.is_unmapped());
        record.flags = 0x1;
        assert!(record.is_paired());
        record.flags = 0x10;
        assert!(record.is_reverse_complement());
    }
}
