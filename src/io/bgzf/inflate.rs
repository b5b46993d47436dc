//! BGZF block decompression.
//!
//! Each block is an independent deflate stream, so blocks can be inflated in
//! parallel. The [`InflatePipeline`] batches up to `workers` raw blocks at a
//! time through rayon and drains results strictly in submission order: the
//! consumer always sees blocks in file order, whatever order the workers
//! finished in.
//!
//! An optional [`BlockCache`] memoizes decompressed blocks by
//! `(file_id, offset)`. The cache is purely an optimization; hit or miss
//! never changes the byte stream a consumer observes.

use super::block::{RawBlock, BGZF_FIXED_HEADER_SIZE, BGZF_FOOTER_SIZE, MAX_UNCOMPRESSED_SIZE};
use crate::error::{BamseekError, Result};
use flate2::read::DeflateDecoder;
use lru::LruCache;
use rayon::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Default capacity of a [`BlockCache`], in blocks.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// Hand out a process-unique id so cache keys from different files never
/// collide.
pub(crate) fn next_file_id() -> u64 {
    NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)
}

static FILE_IDS: OnceLock<Mutex<HashMap<PathBuf, u64>>> = OnceLock::new();

/// Stable id for a file path, so repeated queries of the same file share
/// cache entries. Unknown paths (or a poisoned registry) fall back to a
/// fresh id, which only costs hit rate, never correctness.
pub(crate) fn file_cache_id(path: &Path) -> u64 {
    let registry = FILE_IDS.get_or_init(|| Mutex::new(HashMap::new()));
    match registry.lock() {
        Ok(mut ids) => *ids.entry(path.to_path_buf()).or_insert_with(next_file_id),
        Err(_) => next_file_id(),
    }
}

/// One decompressed block and the file offset it came from.
#[derive(Debug, Clone)]
pub struct InflatedBlock {
    /// File offset of the source block
    pub offset: u64,
    /// Decompressed payload
    pub data: Arc<Vec<u8>>,
}

/// Inflate one block and verify its footer.
///
/// The CRC32 and ISIZE fields must match the decompressed payload, and the
/// payload must not exceed the 64 KiB the format allows.
pub fn inflate_block(block: &RawBlock) -> Result<Vec<u8>> {
    let data = &block.data;
    let corrupt = |msg: String| BamseekError::CorruptBlock {
        offset: block.offset,
        msg,
    };

    if data.len() < BGZF_FIXED_HEADER_SIZE + BGZF_FOOTER_SIZE {
        return Err(corrupt(format!("block too small: {} bytes", data.len())));
    }

    let xlen = u16::from_le_bytes([data[10], data[11]]) as usize;
    let payload_start = BGZF_FIXED_HEADER_SIZE + xlen;
    if payload_start + BGZF_FOOTER_SIZE > data.len() {
        return Err(corrupt("extra field overruns block".to_string()));
    }

    let footer = &data[data.len() - BGZF_FOOTER_SIZE..];
    let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let expected_len = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;
    if expected_len > MAX_UNCOMPRESSED_SIZE {
        return Err(corrupt(format!("declared decompressed size {expected_len} > 65536")));
    }

    let payload = &data[payload_start..data.len() - BGZF_FOOTER_SIZE];
    let mut decompressed = Vec::with_capacity(expected_len);
    DeflateDecoder::new(payload)
        .read_to_end(&mut decompressed)
        .map_err(|e| corrupt(format!("deflate failed: {e}")))?;

    if decompressed.len() != expected_len {
        return Err(corrupt(format!(
            "decompressed size mismatch: got {}, header says {expected_len}",
            decompressed.len()
        )));
    }
    if crc32fast::hash(&decompressed) != expected_crc {
        return Err(corrupt("CRC32 mismatch".to_string()));
    }

    Ok(decompressed)
}

/// Bounded, thread-safe cache of decompressed blocks.
///
/// Shared across queries via `Arc`; keyed by `(file_id, block offset)` so
/// entries from different files cannot alias. Capacity-bounded with least
/// recently used eviction.
pub struct BlockCache {
    blocks: Mutex<LruCache<(u64, u64), Arc<Vec<u8>>>>,
}

impl BlockCache {
    /// Create a cache holding up to `capacity` decompressed blocks.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            blocks: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, file_id: u64, offset: u64) -> Option<Arc<Vec<u8>>> {
        self.blocks.lock().ok()?.get(&(file_id, offset)).cloned()
    }

    fn put(&self, file_id: u64, offset: u64, data: Arc<Vec<u8>>) {
        if let Ok(mut blocks) = self.blocks.lock() {
            blocks.put((file_id, offset), data);
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache").field("len", &self.len()).finish()
    }
}

/// Decompresses a raw-block stream, preserving order.
///
/// With `workers <= 1` every block is inflated synchronously on the calling
/// thread. With `workers >= 2` the pipeline pulls up to `workers` blocks
/// ahead of the consumer, inflates the batch with rayon, and yields results
/// in submission order behind a FIFO queue.
///
/// Dropping the pipeline drops any batched results; no work is outstanding
/// between calls.
pub struct InflatePipeline<I> {
    source: I,
    workers: usize,
    cache: Option<Arc<BlockCache>>,
    file_id: u64,
    ready: VecDeque<InflatedBlock>,
    pending_err: Option<BamseekError>,
    exhausted: bool,
}

impl<I> InflatePipeline<I>
where
    I: Iterator<Item = Result<RawBlock>>,
{
    /// Create a pipeline over `source` with the given look-ahead.
    ///
    /// The pipeline gets a fresh cache keyspace; use [`Self::with_file_id`]
    /// to share cache entries across pipelines reading the same file.
    pub fn new(source: I, workers: usize, cache: Option<Arc<BlockCache>>) -> Self {
        Self {
            source,
            workers: workers.max(1),
            cache,
            file_id: next_file_id(),
            ready: VecDeque::new(),
            pending_err: None,
            exhausted: false,
        }
    }

    /// Use an explicit cache keyspace id. Pipelines reading the same file
    /// should share one id so cached blocks are found again.
    pub fn with_file_id(mut self, file_id: u64) -> Self {
        self.file_id = file_id;
        self
    }

    fn fill(&mut self) {
        let mut batch = Vec::with_capacity(self.workers);
        while batch.len() < self.workers {
            match self.source.next() {
                Some(Ok(block)) => batch.push(block),
                Some(Err(e)) => {
                    self.pending_err = Some(e);
                    self.exhausted = true;
                    break;
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        let cache = self.cache.clone();
        let file_id = self.file_id;
        let inflate_one = |raw: &RawBlock| -> Result<InflatedBlock> {
            if let Some(cache) = cache.as_deref() {
                if let Some(data) = cache.get(file_id, raw.offset) {
                    return Ok(InflatedBlock {
                        offset: raw.offset,
                        data,
                    });
                }
            }
            let data = Arc::new(inflate_block(raw)?);
            if let Some(cache) = cache.as_deref() {
                cache.put(file_id, raw.offset, Arc::clone(&data));
            }
            Ok(InflatedBlock {
                offset: raw.offset,
                data,
            })
        };

        let inflated: Vec<Result<InflatedBlock>> = if self.workers >= 2 {
            batch.par_iter().map(inflate_one).collect()
        } else {
            batch.iter().map(inflate_one).collect()
        };

        for item in inflated {
            match item {
                Ok(block) => self.ready.push_back(block),
                Err(e) => {
                    // Blocks before the fault still yield; the fault itself
                    // supersedes any error the source produced after it.
                    self.pending_err = Some(e);
                    self.exhausted = true;
                    break;
                }
            }
        }
    }
}

impl<I> Iterator for InflatePipeline<I>
where
    I: Iterator<Item = Result<RawBlock>>,
{
    type Item = Result<InflatedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ready.is_empty() && !self.exhausted {
            self.fill();
        }
        if let Some(block) = self.ready.pop_front() {
            return Some(Ok(block));
        }
        self.pending_err.take().map(Err)
    }
}
