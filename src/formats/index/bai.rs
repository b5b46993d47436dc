//! BAI (BAM Index) support for random access queries.
//!
//! A BAI index pairs, per reference sequence, a hierarchical binning index
//! with a linear index:
//!
//! - **Bins** follow the UCSC scheme (37,450 bins over 512 Mbp, six levels
//!   from one 512 Mbp bin down to 32,768 bins of 16 Kbp). Each bin lists
//!   the file chunks holding alignments assigned to it.
//! - The **linear index** gives, for every 16,384 bp window, a lower-bound
//!   virtual offset for any alignment overlapping that window. It prunes
//!   chunks a bin query would otherwise visit.
//!
//! # File format
//!
//! ```text
//! magic[4]     "BAI\1"
//! n_ref[4]     Number of reference sequences (int32)
//! For each reference:
//!   n_bin[4]   Number of bins (int32)
//!   For each bin:
//!     bin[4]        Bin number (uint32)
//!     n_chunk[4]    Number of chunks (int32)
//!     For each chunk:
//!       chunk_beg[8]  Virtual offset (uint64)
//!       chunk_end[8]  Virtual offset (uint64)
//!   n_intv[4]  Number of 16 Kbp intervals (int32)
//!   For each interval:
//!     ioffset[8]  Virtual offset (uint64)
//! n_no_coor[8] Number of unplaced reads (uint64, optional)
//! ```

use crate::error::{BamseekError, Result};
use crate::io::bgzf::VirtualOffset;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// BAI file magic bytes.
const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Width of a linear-index window in base pairs, as a shift.
const LINEAR_INDEX_SHIFT: u32 = 14;

/// A contiguous range of the BAM file, in virtual offsets.
///
/// Chunks are the units of retrieval for a region query: the index answers
/// "which chunks may hold overlapping alignments", and the reader splices
/// exactly those ranges out of the compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Virtual offset of the first record in the chunk
    pub start: VirtualOffset,
    /// Virtual offset just past the last record in the chunk
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// A bin in the hierarchical binning index.
#[derive(Debug, Clone)]
pub struct Bin {
    /// Bin number (0-37449)
    pub id: u32,
    /// Chunks of data assigned to this bin
    pub chunks: Vec<Chunk>,
}

impl Bin {
    /// Create an empty bin.
    pub fn new(id: u32) -> Self {
        Bin {
            id,
            chunks: Vec::new(),
        }
    }
}

/// Index data for one reference sequence.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    /// Bins for this reference
    pub bins: Vec<Bin>,
    /// Linear index: one lower-bound virtual offset per 16 Kbp window
    pub intervals: Vec<VirtualOffset>,
}

impl ReferenceIndex {
    /// Create an empty reference index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower bound on the virtual offset of any alignment overlapping the
    /// window containing `beg`.
    ///
    /// Positions past the end of the linear index get a zero offset, which
    /// prunes nothing.
    pub fn min_offset(&self, beg: u32) -> VirtualOffset {
        let window = (beg >> LINEAR_INDEX_SHIFT) as usize;
        self.intervals
            .get(window)
            .copied()
            .unwrap_or(VirtualOffset::from_raw(0))
    }
}

/// BAI index over a coordinate-sorted BAM file.
///
/// Immutable after parse; share by reference across concurrent queries.
#[derive(Debug, Clone, Default)]
pub struct BaiIndex {
    /// Index data for each reference sequence, in header order
    pub references: Vec<ReferenceIndex>,
    /// Number of unplaced reads, when the index records it
    pub unmapped_count: Option<u64>,
}

impl BaiIndex {
    /// Load a BAI index from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Ok(Self::read(&mut reader)?)
    }

    /// Load the sidecar index (`<bam>.bai`) next to a BAM file.
    ///
    /// # Errors
    ///
    /// `IndexMissing` when no sidecar exists; parse errors otherwise.
    pub fn for_bam<P: AsRef<Path>>(bam_path: P) -> Result<Self> {
        let mut os = bam_path.as_ref().as_os_str().to_os_string();
        os.push(".bai");
        let path = PathBuf::from(os);
        if !path.exists() {
            return Err(BamseekError::IndexMissing {
                path: path.display().to_string(),
            });
        }
        Self::from_path(path)
    }

    /// Parse a BAI index from a reader.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != BAI_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid BAI magic: expected {BAI_MAGIC:?}, got {magic:?}"),
            ));
        }

        let n_ref = read_i32_le(reader)?;
        if n_ref < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid reference count: {n_ref}"),
            ));
        }

        let mut references = Vec::with_capacity(n_ref as usize);
        for _ in 0..n_ref {
            references.push(Self::read_reference_index(reader)?);
        }

        // Trailing unplaced-read count is optional.
        let unmapped_count = read_u64_le(reader).ok();

        Ok(BaiIndex {
            references,
            unmapped_count,
        })
    }

    fn read_reference_index<R: Read>(reader: &mut R) -> io::Result<ReferenceIndex> {
        let n_bin = read_i32_le(reader)?;
        if n_bin < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid bin count: {n_bin}"),
            ));
        }

        let mut bins = Vec::with_capacity(n_bin as usize);
        for _ in 0..n_bin {
            let id = read_u32_le(reader)?;
            let n_chunk = read_i32_le(reader)?;
            if n_chunk < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid chunk count: {n_chunk}"),
                ));
            }

            let mut bin = Bin::new(id);
            for _ in 0..n_chunk {
                let start = VirtualOffset::from_raw(read_u64_le(reader)?);
                let end = VirtualOffset::from_raw(read_u64_le(reader)?);
                bin.chunks.push(Chunk::new(start, end));
            }
            bins.push(bin);
        }

        let n_intv = read_i32_le(reader)?;
        if n_intv < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid interval count: {n_intv}"),
            ));
        }

        let mut intervals = Vec::with_capacity(n_intv as usize);
        for _ in 0..n_intv {
            intervals.push(VirtualOffset::from_raw(read_u64_le(reader)?));
        }

        Ok(ReferenceIndex { bins, intervals })
    }

    /// Resolve a region query to a minimal set of file chunks.
    ///
    /// Collects the chunks of every bin overlapping `[beg, end)`, prunes and
    /// clamps them against the linear index lower bound, then sorts and
    /// merges the survivors into a disjoint list. Returns `None` when the
    /// index does not cover `ref_id`.
    pub fn query_chunks(&self, ref_id: usize, beg: u32, end: u32) -> Option<Vec<Chunk>> {
        let ref_index = self.references.get(ref_id)?;
        if beg >= end {
            return Some(Vec::new());
        }

        let bin_ids = reg2bins(beg, end);
        let min_offset = ref_index.min_offset(beg);

        let mut chunks = Vec::new();
        for bin in &ref_index.bins {
            if !bin_ids.contains(&bin.id) {
                continue;
            }
            for chunk in &bin.chunks {
                // A chunk ending at or before the linear-index bound cannot
                // hold an overlapping read.
                if chunk.end <= min_offset {
                    continue;
                }
                // Any overlapping read in this chunk starts at or after the
                // bound, so the chunk start can be raised to it.
                chunks.push(Chunk::new(chunk.start.max(min_offset), chunk.end));
            }
        }

        chunks.sort_by_key(|c| (c.start, c.end));
        Some(merge_chunks(chunks))
    }
}

/// Bin ids whose genomic interval intersects `[beg, end)`.
///
/// One constant-depth range of ids per level of the binning hierarchy.
/// Requires `beg < end`.
fn reg2bins(beg: u32, end: u32) -> Vec<u32> {
    let mut bins = Vec::with_capacity(16);
    let end = end - 1;

    // Level 0 covers the whole reference.
    bins.push(0);

    for shift in [26u32, 23, 20, 17, 14] {
        let offset = ((1u32 << (29 - shift)) - 1) / 7;
        for bin in (offset + (beg >> shift))..=(offset + (end >> shift)) {
            bins.push(bin);
        }
    }

    bins
}

/// Merge a sorted chunk list into a minimal disjoint set.
///
/// Adjacent chunks `(a, b)` and `(c, d)` with `c <= b` combine into
/// `(a, max(b, d))`, so the splicer never reads the same compressed region
/// twice.
fn merge_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut iter = chunks.into_iter();
    let mut current = match iter.next() {
        Some(chunk) => chunk,
        None => return Vec::new(),
    };

    let mut merged = Vec::new();
    for chunk in iter {
        if chunk.start <= current.end {
            current.end = current.end.max(chunk.end);
        } else {
            merged.push(current);
            current = chunk;
        }
    }
    merged.push(current);

    merged
}

fn read_i32_le<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vo(compressed: u64, uncompressed: u16) -> VirtualOffset {
        VirtualOffset::new(compressed, uncompressed)
    }

    #[test]
    fn test_reg2bins_single_point() {
        let bins = reg2bins(1000, 1001);
        assert!(bins.contains(&0));
        assert_eq!(bins.len(), 6); // one bin per level
        assert!(bins.contains(&4681)); // finest level, window 0
    }

    #[test]
    fn test_reg2bins_spanning_windows() {
        let bins = reg2bins(0, 100_000);
        assert!(bins.contains(&0));
        // 100 kb spans windows 0..=6 at the 16 Kbp level.
        for fine in 4681..=4687 {
            assert!(bins.contains(&fine));
        }
        assert!(!bins.contains(&4688));
    }

    #[test]
    fn test_reg2bins_sorted() {
        let bins = reg2bins(123_456, 7_890_123);
        for pair in bins.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_merge_chunks_overlapping() {
        let merged = merge_chunks(vec![
            Chunk::new(vo(100, 0), vo(200, 0)),
            Chunk::new(vo(150, 0), vo(250, 0)),
            Chunk::new(vo(300, 0), vo(400, 0)),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], Chunk::new(vo(100, 0), vo(250, 0)));
        assert_eq!(merged[1], Chunk::new(vo(300, 0), vo(400, 0)));
    }

    #[test]
    fn test_merge_chunks_touching() {
        // A chunk starting exactly at the previous end merges.
        let merged = merge_chunks(vec![
            Chunk::new(vo(100, 0), vo(200, 64)),
            Chunk::new(vo(200, 64), vo(300, 0)),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], Chunk::new(vo(100, 0), vo(300, 0)));
    }

    #[test]
    fn test_merge_chunks_contained() {
        let merged = merge_chunks(vec![
            Chunk::new(vo(100, 0), vo(500, 0)),
            Chunk::new(vo(200, 0), vo(300, 0)),
        ]);
        assert_eq!(merged, vec![Chunk::new(vo(100, 0), vo(500, 0))]);
    }

    #[test]
    fn test_merge_chunks_empty() {
        assert!(merge_chunks(Vec::new()).is_empty());
    }

    #[test]
    fn test_min_offset() {
        let reference = ReferenceIndex {
            bins: Vec::new(),
            intervals: vec![vo(10, 0), vo(20, 0), vo(30, 0)],
        };
        assert_eq!(reference.min_offset(0), vo(10, 0));
        assert_eq!(reference.min_offset(16_383), vo(10, 0));
        assert_eq!(reference.min_offset(16_384), vo(20, 0));
        assert_eq!(reference.min_offset(40_000), vo(30, 0));
        // Past the linear index: no pruning.
        assert_eq!(reference.min_offset(1_000_000), VirtualOffset::from_raw(0));
    }

    fn sample_index() -> BaiIndex {
        // One reference; chunks scattered over bin 0 and two fine bins.
        let mut bin0 = Bin::new(0);
        bin0.chunks.push(Chunk::new(vo(50, 0), vo(150, 0)));

        let mut fine0 = Bin::new(4681); // window 0: positions 0..16384
        fine0.chunks.push(Chunk::new(vo(100, 0), vo(200, 0)));

        let mut fine1 = Bin::new(4682); // window 1: positions 16384..32768
        fine1.chunks.push(Chunk::new(vo(190, 0), vo(300, 0)));

        BaiIndex {
            references: vec![ReferenceIndex {
                bins: vec![bin0, fine0, fine1],
                intervals: vec![vo(100, 0), vo(190, 0)],
            }],
            unmapped_count: None,
        }
    }

    #[test]
    fn test_query_chunks_prunes_by_linear_index() {
        let index = sample_index();
        // Window 1's lower bound is 190: bin 0's chunk (50..150) ends
        // before it and is dropped entirely.
        let chunks = index.query_chunks(0, 20_000, 21_000).unwrap();
        assert_eq!(chunks, vec![Chunk::new(vo(190, 0), vo(300, 0))]);
    }

    #[test]
    fn test_query_chunks_clamps_start() {
        let index = sample_index();
        // Window 0's lower bound is 100: bin 0's chunk is clamped up from
        // 50 to 100, then merges with the fine bin's chunk.
        let chunks = index.query_chunks(0, 0, 1000).unwrap();
        assert_eq!(chunks, vec![Chunk::new(vo(100, 0), vo(200, 0))]);
    }

    #[test]
    fn test_query_chunks_empty_interval() {
        let index = sample_index();
        assert!(index.query_chunks(0, 500, 500).unwrap().is_empty());
    }

    #[test]
    fn test_query_chunks_unknown_reference() {
        let index = sample_index();
        assert!(index.query_chunks(7, 0, 1000).is_none());
    }

    fn serialize(index: &BaiIndex) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BAI_MAGIC);
        out.extend_from_slice(&(index.references.len() as i32).to_le_bytes());
        for reference in &index.references {
            out.extend_from_slice(&(reference.bins.len() as i32).to_le_bytes());
            for bin in &reference.bins {
                out.extend_from_slice(&bin.id.to_le_bytes());
                out.extend_from_slice(&(bin.chunks.len() as i32).to_le_bytes());
                for chunk in &bin.chunks {
                    out.extend_from_slice(&chunk.start.as_raw().to_le_bytes());
                    out.extend_from_slice(&chunk.end.as_raw().to_le_bytes());
                }
            }
            out.extend_from_slice(&(reference.intervals.len() as i32).to_le_bytes());
            for interval in &reference.intervals {
                out.extend_from_slice(&interval.as_raw().to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn test_parse_roundtrip() {
        let index = sample_index();
        let bytes = serialize(&index);
        let parsed = BaiIndex::read(&mut bytes.as_slice()).unwrap();

        assert_eq!(parsed.references.len(), 1);
        assert_eq!(parsed.references[0].bins.len(), 3);
        assert_eq!(parsed.references[0].intervals, index.references[0].intervals);
        assert_eq!(parsed.unmapped_count, None);
        assert_eq!(
            parsed.query_chunks(0, 0, 1000),
            index.query_chunks(0, 0, 1000)
        );
    }

    #[test]
    fn test_parse_bad_magic() {
        let bytes = b"TBI\x01\x00\x00\x00\x00".to_vec();
        assert!(BaiIndex::read(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_parse_trailing_unmapped_count() {
        let mut bytes = serialize(&BaiIndex {
            references: Vec::new(),
            unmapped_count: None,
        });
        bytes.extend_from_slice(&42u64.to_le_bytes());
        let parsed = BaiIndex::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(parsed.unmapped_count, Some(42));
    }
}
