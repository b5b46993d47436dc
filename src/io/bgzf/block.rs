//! BGZF block framing.
//!
//! A BGZF file is a concatenation of independent gzip members, each carrying
//! a `BC` extra subfield whose 2-byte little-endian value is the total block
//! size minus one. That length field is what makes random access possible:
//! a reader positioned at any block boundary can walk block to block without
//! inflating anything.
//!
//! # Block layout
//!
//! ```text
//! 0   1F 8B 08 04    gzip magic, deflate, FEXTRA
//! 4   00 00 00 00    MTIME
//! 8   00 FF          XFL, OS
//! 10  XLEN (u16 LE)  extra field length (6 for a bare BC subfield)
//! 12  'B' 'C' 02 00  BC subfield, SLEN=2
//! 16  BSIZE (u16 LE) total block size - 1
//! ..  deflate payload
//! -8  CRC32 (u32 LE) of the decompressed payload
//! -4  ISIZE (u32 LE) decompressed size, <= 65536
//! ```

use crate::error::{BamseekError, Result};
use super::virtual_offset::VirtualOffset;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Leading bytes of every BGZF block: gzip magic, deflate method, FEXTRA set.
pub const BGZF_MAGIC: [u8; 4] = [0x1f, 0x8b, 0x08, 0x04];

/// Size of the fixed gzip header preceding the extra field.
pub const BGZF_FIXED_HEADER_SIZE: usize = 12;

/// Size of the CRC32 + ISIZE footer trailing the deflate payload.
pub const BGZF_FOOTER_SIZE: usize = 8;

/// Maximum decompressed payload size of a single block.
pub const MAX_UNCOMPRESSED_SIZE: usize = 65536;

/// Canonical 28-byte empty block terminating a well-formed BGZF file.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// One raw (still compressed) BGZF block and its position in the file.
#[derive(Debug, Clone)]
pub struct RawBlock {
    /// File offset of the block's first byte
    pub offset: u64,
    /// Complete block bytes, header and footer included
    pub data: Vec<u8>,
}

/// Walks a byte stream block by block, tracking absolute file offsets.
///
/// The reader itself never inflates anything; it only consumes the framing
/// needed to find each block's extent.
pub struct BlockReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> BlockReader<R> {
    /// Create a block reader over `inner`, whose cursor currently sits at
    /// absolute file position `offset`.
    pub fn new(inner: R, offset: u64) -> Self {
        Self { inner, offset }
    }

    /// Absolute file position of the next block to be read.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Read the next block.
    ///
    /// Returns `Ok(None)` on a clean end of stream (no bytes at all).
    /// A stream that ends partway through a block is `UnexpectedEof`;
    /// framing violations are `CorruptBlock`.
    pub fn read_block(&mut self) -> Result<Option<RawBlock>> {
        let start = self.offset;

        let mut header = [0u8; BGZF_FIXED_HEADER_SIZE];
        match read_exact_or_start_eof(&mut self.inner, &mut header)? {
            ReadOutcome::CleanEof => return Ok(None),
            ReadOutcome::Truncated(got) => {
                return Err(BamseekError::UnexpectedEof {
                    msg: format!("block header at offset {start}: got {got} of 12 bytes"),
                })
            }
            ReadOutcome::Full => {}
        }

        if header[..4] != BGZF_MAGIC {
            return Err(BamseekError::CorruptBlock {
                offset: start,
                msg: format!(
                    "bad magic [{:#04x}, {:#04x}, {:#04x}, {:#04x}]",
                    header[0], header[1], header[2], header[3]
                ),
            });
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        self.inner.read_exact(&mut extra).map_err(|e| map_eof(e, start, "extra field"))?;

        let block_size = match find_bsize(&extra) {
            Some(bsize) => bsize as usize + 1,
            None => {
                return Err(BamseekError::CorruptBlock {
                    offset: start,
                    msg: "missing BC subfield".to_string(),
                })
            }
        };

        let already_read = BGZF_FIXED_HEADER_SIZE + xlen;
        if block_size < already_read + BGZF_FOOTER_SIZE {
            return Err(BamseekError::CorruptBlock {
                offset: start,
                msg: format!("declared size {block_size} smaller than its own framing"),
            });
        }

        let mut data = Vec::with_capacity(block_size);
        data.extend_from_slice(&header);
        data.extend_from_slice(&extra);
        data.resize(block_size, 0);
        self.inner
            .read_exact(&mut data[already_read..])
            .map_err(|e| map_eof(e, start, "block payload"))?;

        self.offset = start + block_size as u64;
        Ok(Some(RawBlock { offset: start, data }))
    }

    /// Turn the reader into an iterator over blocks.
    pub fn into_blocks(self) -> Blocks<R> {
        Blocks { reader: self }
    }
}

impl<R: Read + Seek> BlockReader<R> {
    /// Reposition the reader at an absolute file offset.
    ///
    /// The offset must be a block boundary; the next `read_block` call
    /// starts parsing there.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }
}

/// Iterator over raw blocks, created by [`BlockReader::into_blocks`].
pub struct Blocks<R> {
    reader: BlockReader<R>,
}

impl<R: Read> Iterator for Blocks<R> {
    type Item = Result<RawBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_block().transpose()
    }
}

/// Scan a gzip extra field for the BC subfield and return its BSIZE value.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

        if si1 == b'B' && si2 == b'C' && slen == 2 {
            if pos + 6 > extra.len() {
                return None;
            }
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }

        pos += 4 + slen;
    }
    None
}

enum ReadOutcome {
    Full,
    CleanEof,
    Truncated(usize),
}

/// `read_exact` that distinguishes "no bytes at all" from a mid-buffer EOF.
fn read_exact_or_start_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::CleanEof
                } else {
                    ReadOutcome::Truncated(filled)
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full)
}

fn map_eof(e: io::Error, offset: u64, context: &str) -> BamseekError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        BamseekError::UnexpectedEof {
            msg: format!("{context} of block at offset {offset}"),
        }
    } else {
        BamseekError::Io(e)
    }
}

/// Check whether the file ends with the canonical 28-byte empty block.
pub fn has_eof_block<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size < BGZF_EOF.len() as u64 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))?;
    let mut tail = [0u8; 28];
    file.read_exact(&mut tail)?;
    Ok(tail == BGZF_EOF)
}

/// Virtual offset of the end of alignment data.
///
/// When the canonical EOF block is present this points at it, bounding a
/// sequential scan to `(file_size - 28, 0)`; otherwise it points at the end
/// of the file.
pub fn eof_virtual_offset<P: AsRef<Path>>(path: P) -> Result<VirtualOffset> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    if has_eof_block(path)? {
        Ok(VirtualOffset::new(size - BGZF_EOF.len() as u64, 0))
    } else {
        Ok(VirtualOffset::new(size, 0))
    }
}
