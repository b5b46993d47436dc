//! CIGAR parsing and reference-span arithmetic.
//!
//! In BAM a CIGAR operation is one 32-bit little-endian integer: the low 4
//! bits are the operation code (0-8), the high 28 bits the length.

use super::error::BamDecodeError;
use std::io;

/// One CIGAR operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    /// Alignment match or mismatch (M)
    Match(u32),
    /// Insertion to the reference (I)
    Insertion(u32),
    /// Deletion from the reference (D)
    Deletion(u32),
    /// Skipped region of the reference, e.g. an intron (N)
    RefSkip(u32),
    /// Soft clipping: bases present in the read but not aligned (S)
    SoftClip(u32),
    /// Hard clipping: bases absent from the read (H)
    HardClip(u32),
    /// Padding (P)
    Padding(u32),
    /// Sequence match (=)
    SeqMatch(u32),
    /// Sequence mismatch (X)
    SeqMismatch(u32),
}

impl CigarOp {
    /// Length of this operation.
    pub fn length(&self) -> u32 {
        match self {
            CigarOp::Match(len)
            | CigarOp::Insertion(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SoftClip(len)
            | CigarOp::HardClip(len)
            | CigarOp::Padding(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len) => *len,
        }
    }

    /// Number of reference bases this operation consumes.
    ///
    /// M, D, N, = and X advance the reference; I, S, H and P do not.
    pub fn reference_length(&self) -> u32 {
        match self {
            CigarOp::Match(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len) => *len,
            CigarOp::Insertion(_)
            | CigarOp::SoftClip(_)
            | CigarOp::HardClip(_)
            | CigarOp::Padding(_) => 0,
        }
    }

    /// The operation type as its SAM character.
    pub fn as_char(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Insertion(_) => 'I',
            CigarOp::Deletion(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Padding(_) => 'P',
            CigarOp::SeqMatch(_) => '=',
            CigarOp::SeqMismatch(_) => 'X',
        }
    }
}

impl std::fmt::Display for CigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.length(), self.as_char())
    }
}

/// Total reference bases covered by an alignment's CIGAR.
///
/// The sum of the lengths of the reference-consuming operations; a read of
/// nothing but insertions and clips covers zero bases.
pub fn bases_covered(cigar: &[CigarOp]) -> u32 {
    cigar.iter().map(|op| op.reference_length()).sum()
}

/// Parse BAM CIGAR operations from their binary encoding.
///
/// # Errors
///
/// Returns an error when `data` is shorter than `n_ops * 4` or when an
/// operation code outside 0-8 appears.
pub fn parse_cigar(data: &[u8], n_ops: usize) -> io::Result<Vec<CigarOp>> {
    let required_bytes = n_ops * 4;
    if data.len() < required_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Insufficient CIGAR data: need {} bytes for {} operations, got {}",
                required_bytes,
                n_ops,
                data.len()
            ),
        ));
    }

    let mut ops = Vec::with_capacity(n_ops);

    for chunk in data[..required_bytes].chunks_exact(4) {
        let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let length = value >> 4;

        let op = match value & 0x0F {
            0 => CigarOp::Match(length),
            1 => CigarOp::Insertion(length),
            2 => CigarOp::Deletion(length),
            3 => CigarOp::RefSkip(length),
            4 => CigarOp::SoftClip(length),
            5 => CigarOp::HardClip(length),
            6 => CigarOp::Padding(length),
            7 => CigarOp::SeqMatch(length),
            8 => CigarOp::SeqMismatch(length),
            code => return Err(BamDecodeError::InvalidCigarOp { code }.into()),
        };

        ops.push(op);
    }

    Ok(ops)
}
