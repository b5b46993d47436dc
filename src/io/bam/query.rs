//! Indexed region queries.
//!
//! The random-access engine. A query resolves a genomic interval against
//! the BAI index, then runs a pull-driven pipeline over exactly the file
//! regions the index named:
//!
//! ```text
//! chunks -> BlockSplicer -> InflatePipeline -> TrimmedBlocks
//!        -> BlockByteStream -> record decode -> overlap filter
//! ```
//!
//! Every stage is an iterator; nothing is materialized. Blocks and records
//! come out in file order, which for a coordinate-sorted BAM is
//! `(reference id, position)` order, so the filter can stop early at the
//! first record past the interval.

use super::cigar::bases_covered;
use super::header::Header;
use super::reader::BamReader;
use super::record::{parse_record, Record};
use crate::error::{BamseekError, Result};
use crate::formats::index::{BaiIndex, Chunk};
use crate::io::bgzf::block::{BlockReader, RawBlock};
use crate::io::bgzf::inflate::{BlockCache, InflatePipeline, InflatedBlock};
use crate::io::bgzf::VirtualOffset;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Tuning knobs for a region query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Parallel block-decompression look-ahead; 0 or 1 inflates
    /// synchronously on the consuming thread
    pub workers: usize,
    /// Optional shared cache of decompressed blocks
    pub cache: Option<Arc<BlockCache>>,
}

impl QueryOptions {
    /// Default options: synchronous decompression, no cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the parallel decompression look-ahead.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Attach a shared decompressed-block cache.
    pub fn with_cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// Yields the raw blocks covering a disjoint, sorted chunk list.
///
/// For each chunk the reader seeks to `start.compressed_offset()` and
/// yields successive blocks through the block at `end.compressed_offset()`
/// inclusive; bytes inside that final block are still in range up to
/// `end.uncompressed_offset()`. Segments are concatenated in chunk order,
/// so emitted offsets are monotonically non-decreasing.
struct BlockSplicer {
    reader: BlockReader<BufReader<File>>,
    chunks: Vec<Chunk>,
    next_chunk: usize,
    segment_end: Option<VirtualOffset>,
}

impl BlockSplicer {
    fn new(file: File, chunks: Vec<Chunk>) -> Self {
        Self {
            reader: BlockReader::new(BufReader::new(file), 0),
            chunks,
            next_chunk: 0,
            segment_end: None,
        }
    }
}

impl Iterator for BlockSplicer {
    type Item = Result<RawBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let end = match self.segment_end {
                Some(end) => end,
                None => {
                    let chunk = *self.chunks.get(self.next_chunk)?;
                    self.next_chunk += 1;
                    if let Err(e) = self.reader.seek_to(chunk.start.compressed_offset()) {
                        self.next_chunk = self.chunks.len();
                        return Some(Err(e));
                    }
                    self.segment_end = Some(chunk.end);
                    chunk.end
                }
            };

            if self.reader.position() > end.compressed_offset() {
                self.segment_end = None;
                continue;
            }

            match self.reader.read_block() {
                Ok(Some(block)) => {
                    if self.reader.position() > end.compressed_offset() {
                        // That was the block holding the chunk end.
                        self.segment_end = None;
                    }
                    return Some(Ok(block));
                }
                // Clean EOF ends the segment: a chunk may run to the file's
                // end-of-data virtual offset.
                Ok(None) => {
                    self.segment_end = None;
                }
                Err(e) => {
                    self.segment_end = None;
                    self.next_chunk = self.chunks.len();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// A decompressed block with the trim amounts its chunk imposes.
#[derive(Debug, Clone)]
struct TrimmedBlock {
    offset: u64,
    data: Arc<Vec<u8>>,
    skip_start: usize,
    skip_end: usize,
}

impl TrimmedBlock {
    fn payload_start(&self) -> usize {
        self.skip_start.min(self.data.len())
    }

    fn payload_end(&self) -> usize {
        self.data.len().saturating_sub(self.skip_end).max(self.payload_start())
    }
}

/// Walks the decompressed stream in lockstep with the chunk list,
/// assigning `skip_start`/`skip_end` on chunk boundary blocks.
///
/// The block at a chunk's start offset skips the bytes before
/// `start.uncompressed_offset()`; the block at its end offset skips the
/// bytes from `end.uncompressed_offset()` on, and advances the walk to the
/// next chunk. Both can land on the same block when a chunk sits entirely
/// inside one block. A chunk end at uncompressed offset 0 trims the whole
/// block.
struct TrimmedBlocks<I> {
    source: I,
    chunks: Vec<Chunk>,
    current: usize,
}

impl<I> TrimmedBlocks<I> {
    fn new(source: I, chunks: Vec<Chunk>) -> Self {
        Self {
            source,
            chunks,
            current: 0,
        }
    }
}

impl<I> Iterator for TrimmedBlocks<I>
where
    I: Iterator<Item = Result<InflatedBlock>>,
{
    type Item = Result<TrimmedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = match self.source.next()? {
            Ok(block) => block,
            Err(e) => return Some(Err(e)),
        };

        let mut skip_start = 0;
        let mut skip_end = 0;
        if let Some(chunk) = self.chunks.get(self.current) {
            if block.offset == chunk.start.compressed_offset() {
                skip_start = chunk.start.uncompressed_offset() as usize;
            }
            if block.offset == chunk.end.compressed_offset() {
                skip_end = block
                    .data
                    .len()
                    .saturating_sub(chunk.end.uncompressed_offset() as usize);
                self.current += 1;
            }
        }

        Some(Ok(TrimmedBlock {
            offset: block.offset,
            data: block.data,
            skip_start,
            skip_end,
        }))
    }
}

/// Linear byte reader over the trimmed block stream.
///
/// Reads span blocks; skipped bytes are never exposed. Between records,
/// [`BlockByteStream::virtual_offset`] reports the BAI-style address of the
/// next byte to be read: the current block's file offset paired with the
/// number of decompressed bytes consumed within it (skip included).
struct BlockByteStream<I> {
    blocks: I,
    current: Option<TrimmedBlock>,
    pos: usize,
    last_offset: u64,
    last_pos: usize,
    finished: bool,
}

impl<I> BlockByteStream<I>
where
    I: Iterator<Item = Result<TrimmedBlock>>,
{
    fn new(blocks: I) -> Self {
        Self {
            blocks,
            current: None,
            pos: 0,
            last_offset: 0,
            last_pos: 0,
            finished: false,
        }
    }

    /// Advance past exhausted (or fully trimmed) blocks. Returns false at
    /// the true end of the stream.
    fn ensure_data(&mut self) -> Result<bool> {
        loop {
            if let Some(current) = &self.current {
                if self.pos < current.payload_end() {
                    return Ok(true);
                }
                self.last_offset = current.offset;
                self.last_pos = self.pos;
            }
            if self.finished {
                return Ok(false);
            }
            match self.blocks.next() {
                Some(Ok(block)) => {
                    self.pos = block.payload_start();
                    self.current = Some(block);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => {
                    self.finished = true;
                    self.current = None;
                    return Ok(false);
                }
            }
        }
    }

    /// True when no readable byte remains.
    fn at_end(&mut self) -> Result<bool> {
        Ok(!self.ensure_data()?)
    }

    /// Virtual offset of the next byte to be read.
    fn virtual_offset(&mut self) -> Result<VirtualOffset> {
        if self.ensure_data()? {
            match &self.current {
                Some(current) => Ok(VirtualOffset::new(
                    current.offset,
                    self.pos.min(u16::MAX as usize) as u16,
                )),
                None => Ok(VirtualOffset::new(self.last_offset, self.last_pos as u16)),
            }
        } else {
            Ok(VirtualOffset::new(
                self.last_offset,
                self.last_pos.min(u16::MAX as usize) as u16,
            ))
        }
    }

    /// Pull exactly `buf.len()` bytes, spanning blocks as needed.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if !self.ensure_data()? {
                return Err(BamseekError::UnexpectedEof {
                    msg: format!("needed {} more bytes", buf.len() - filled),
                });
            }
            if let Some(current) = &self.current {
                let available = current.payload_end() - self.pos;
                let n = available.min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&current.data[self.pos..self.pos + n]);
                self.pos += n;
                filled += n;
            }
        }
        Ok(())
    }
}

/// A record together with the virtual offset range it was decoded from.
#[derive(Debug, Clone)]
pub struct LocatedRecord {
    /// The decoded alignment record
    pub record: Record,
    /// Virtual offset of the record's first byte
    pub start: VirtualOffset,
    /// Virtual offset just past the record's last byte
    pub end: VirtualOffset,
}

enum Overlap {
    Emit,
    Skip,
    Stop,
}

/// The interval overlap predicate over a coordinate-sorted stream.
///
/// Sorting lets two branches terminate the scan outright: a record on a
/// later reference, or at/after the interval end. A record at or before
/// `beg` overlaps only if its alignment extends strictly past `beg`, so a
/// zero-length read ending exactly at `beg` is excluded.
fn classify(record: &Record, ref_id: usize, beg: u32, end: u32) -> Overlap {
    let rec_ref = match record.reference_id {
        Some(id) => id,
        None => return Overlap::Skip,
    };
    if rec_ref > ref_id {
        return Overlap::Stop;
    }
    if rec_ref < ref_id {
        return Overlap::Skip;
    }

    let pos = match record.position {
        Some(p) if p >= 0 => i64::from(p),
        _ => return Overlap::Skip,
    };
    if pos >= i64::from(end) {
        return Overlap::Stop;
    }
    if pos > i64::from(beg) {
        return Overlap::Emit;
    }
    if pos + i64::from(bases_covered(&record.cigar)) <= i64::from(beg) {
        return Overlap::Skip;
    }
    Overlap::Emit
}

type QueryStream = BlockByteStream<TrimmedBlocks<InflatePipeline<BlockSplicer>>>;

/// Iterator over the records of one reference interval.
///
/// Created by [`RegionQuery::open`]. Yields records overlapping
/// `[beg, end)` in file order; the stream reads only the blocks the index
/// named and stops at the first record past the interval.
pub struct RegionQuery {
    stream: QueryStream,
    header: Header,
    ref_id: usize,
    beg: u32,
    end: u32,
    buffer: Vec<u8>,
    done: bool,
}

impl RegionQuery {
    /// Open a query with default options.
    ///
    /// `beg == end` denotes an empty interval and yields nothing;
    /// `end < beg` is an `InvalidQuery` error, as is a reference id the
    /// file does not declare.
    pub fn open<P: AsRef<Path>>(
        path: P,
        index: &BaiIndex,
        ref_id: usize,
        beg: u32,
        end: u32,
    ) -> Result<Self> {
        Self::open_with(path, index, ref_id, beg, end, QueryOptions::default())
    }

    /// Open a query with explicit options.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        index: &BaiIndex,
        ref_id: usize,
        beg: u32,
        end: u32,
        options: QueryOptions,
    ) -> Result<Self> {
        let header = read_bam_header(path.as_ref())?;
        if ref_id >= header.reference_count() {
            return Err(BamseekError::InvalidQuery {
                msg: format!(
                    "reference id {ref_id} out of range (file has {} references)",
                    header.reference_count()
                ),
            });
        }
        Self::build(path.as_ref(), index, header, ref_id, beg, end, options)
    }

    /// Open a query by reference name.
    pub fn by_name<P: AsRef<Path>>(
        path: P,
        index: &BaiIndex,
        name: &str,
        beg: u32,
        end: u32,
    ) -> Result<Self> {
        Self::by_name_with(path, index, name, beg, end, QueryOptions::default())
    }

    /// Open a query by reference name with explicit options.
    pub fn by_name_with<P: AsRef<Path>>(
        path: P,
        index: &BaiIndex,
        name: &str,
        beg: u32,
        end: u32,
        options: QueryOptions,
    ) -> Result<Self> {
        let header = read_bam_header(path.as_ref())?;
        let ref_id = header
            .reference_id(name)
            .ok_or_else(|| BamseekError::InvalidQuery {
                msg: format!("unknown reference '{name}'"),
            })?;
        Self::build(path.as_ref(), index, header, ref_id, beg, end, options)
    }

    fn build(
        path: &Path,
        index: &BaiIndex,
        header: Header,
        ref_id: usize,
        beg: u32,
        end: u32,
        options: QueryOptions,
    ) -> Result<Self> {
        if end < beg {
            return Err(BamseekError::InvalidQuery {
                msg: format!("interval end {end} precedes start {beg}"),
            });
        }

        let chunks = if beg == end {
            Vec::new()
        } else {
            index.query_chunks(ref_id, beg, end).unwrap_or_default()
        };

        let file = File::open(path)?;
        let splicer = BlockSplicer::new(file, chunks.clone());
        let mut pipeline = InflatePipeline::new(splicer, options.workers, options.cache.clone());
        if options.cache.is_some() {
            // Repeated queries of one file must share a cache keyspace.
            pipeline = pipeline.with_file_id(crate::io::bgzf::inflate::file_cache_id(path));
        }
        let stream = BlockByteStream::new(TrimmedBlocks::new(pipeline, chunks));

        Ok(Self {
            stream,
            header,
            ref_id,
            beg,
            end,
            buffer: Vec::with_capacity(512),
            done: false,
        })
    }

    /// The header of the queried BAM file.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Convert into an iterator that also reports each record's virtual
    /// offset range.
    pub fn located(self) -> LocatedRecords {
        LocatedRecords { inner: self }
    }

    fn next_overlapping(&mut self) -> Result<Option<LocatedRecord>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let located = match read_located_record(&mut self.stream, &mut self.buffer)? {
                Some(located) => located,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            match classify(&located.record, self.ref_id, self.beg, self.end) {
                Overlap::Emit => return Ok(Some(located)),
                Overlap::Skip => continue,
                Overlap::Stop => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for RegionQuery {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_overlapping() {
            Ok(Some(located)) => Some(Ok(located.record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over located records, created by [`RegionQuery::located`].
pub struct LocatedRecords {
    inner: RegionQuery,
}

impl Iterator for LocatedRecords {
    type Item = Result<LocatedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next_overlapping() {
            Ok(Some(located)) => Some(Ok(located)),
            Ok(None) => None,
            Err(e) => {
                self.inner.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_bam_header(path: &Path) -> Result<Header> {
    let reader = BamReader::from_path(path)?;
    Ok(reader.header().clone())
}

/// Decode one record from the stream, capturing its virtual offset range.
///
/// `Ok(None)` when the stream is cleanly exhausted at a record boundary.
fn read_located_record(
    stream: &mut QueryStream,
    buffer: &mut Vec<u8>,
) -> Result<Option<LocatedRecord>> {
    if stream.at_end()? {
        return Ok(None);
    }
    let start = stream.virtual_offset()?;

    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf)?;
    let block_size = i32::from_le_bytes(size_buf);
    if block_size < 0 {
        return Err(BamseekError::CorruptRecord {
            msg: format!("negative record size {block_size} at {start}"),
        });
    }

    buffer.clear();
    buffer.extend_from_slice(&size_buf);
    buffer.resize(block_size as usize + 4, 0);
    stream.read_exact(&mut buffer[4..]).map_err(|e| match e {
        BamseekError::UnexpectedEof { .. } => BamseekError::CorruptRecord {
            msg: format!("record at {start} extends past the data in range"),
        },
        other => other,
    })?;

    let record = parse_record(buffer).map_err(|e| BamseekError::CorruptRecord {
        msg: format!("record at {start}: {e}"),
    })?;
    let end = stream.virtual_offset()?;

    Ok(Some(LocatedRecord { record, start, end }))
}
