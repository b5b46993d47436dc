//! SAM text emission.
//!
//! Renders one alignment record as a SAM line: the 11 mandatory
//! tab-separated fields, then every optional tag. This is the boundary
//! format the test oracles compare against; the field encodings follow the
//! SAM specification exactly:
//!
//! - POS and PNEXT are 1-based (stored 0-based + 1, 0 when absent)
//! - RNAME/RNEXT are `*` for -1, and RNEXT is `=` when the mate shares the
//!   record's reference
//! - QUAL bytes are stored Phred scores printed at +33, `*` when absent
//! - tags render as `NAME:TYPE:value` with integers of every stored width
//!   as `i`, arrays as `B:<elem-type>,<v1>,<v2>,...`

use super::header::Header;
use super::record::Record;
use crate::error::Result;
use std::fmt::Write;

/// Render a record as a SAM line (no trailing newline).
///
/// # Errors
///
/// Fails only when the record's tag bytes do not decode.
pub fn format_record(record: &Record, header: &Header) -> Result<String> {
    let mut line = String::with_capacity(128 + record.sequence.len() * 2);

    // QNAME, FLAG
    line.push_str(&record.name);
    let _ = write!(line, "\t{}", record.flags);

    // RNAME
    line.push('\t');
    line.push_str(reference_name(record.reference_id, header));

    // POS (1-based), MAPQ
    let pos = record.position.map_or(0, |p| i64::from(p) + 1);
    let _ = write!(line, "\t{}\t{}", pos, record.mapq.unwrap_or(255));

    // CIGAR
    line.push('\t');
    if record.cigar.is_empty() {
        line.push('*');
    } else {
        for op in &record.cigar {
            let _ = write!(line, "{op}");
        }
    }

    // RNEXT
    line.push('\t');
    match record.mate_reference_id {
        None => line.push('*'),
        Some(id) if record.reference_id == Some(id) => line.push('='),
        Some(id) => line.push_str(reference_name(Some(id), header)),
    }

    // PNEXT (1-based), TLEN
    let pnext = record.mate_position.map_or(0, |p| i64::from(p) + 1);
    let _ = write!(line, "\t{}\t{}", pnext, record.template_length);

    // SEQ
    line.push('\t');
    if record.sequence.is_empty() {
        line.push('*');
    } else {
        for &base in &record.sequence {
            line.push(base as char);
        }
    }

    // QUAL
    line.push('\t');
    if record.quality.is_empty() || record.quality.first() == Some(&0xFF) {
        line.push('*');
    } else {
        for &q in &record.quality {
            line.push((q.saturating_add(33)) as char);
        }
    }

    // Tags
    for tag in record.tags.iter()? {
        let _ = write!(line, "\t{tag}");
    }

    Ok(line)
}

fn reference_name(id: Option<usize>, header: &Header) -> &str {
    id.and_then(|id| header.reference_name(id)).unwrap_or("*")
}
