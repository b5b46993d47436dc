//! Sequential BGZF reading.
//!
//! [`BgzfReader`] exposes a BGZF stream as a plain `Read`/`BufRead`,
//! inflating blocks through the same pipeline the random-access path uses.
//! Linear scans and BAM header reads go through here.

use super::block::{BlockReader, Blocks};
use super::inflate::{InflatePipeline, InflatedBlock};
use std::io::{self, BufRead, Read};

/// Decompressing reader over a whole BGZF stream.
///
/// Blocks are inflated on demand; with `workers >= 2` up to that many blocks
/// are inflated ahead of the consumer in parallel. Memory stays bounded by
/// the look-ahead, not the file size.
pub struct BgzfReader<R: Read> {
    pipeline: InflatePipeline<Blocks<R>>,
    current: Option<InflatedBlock>,
    pos: usize,
}

impl<R: Read> BgzfReader<R> {
    /// Create a reader that inflates blocks synchronously.
    pub fn new(inner: R) -> Self {
        Self::with_workers(inner, 1)
    }

    /// Create a reader with a parallel inflate look-ahead of `workers`.
    pub fn with_workers(inner: R, workers: usize) -> Self {
        Self {
            pipeline: InflatePipeline::new(BlockReader::new(inner, 0).into_blocks(), workers, None),
            current: None,
            pos: 0,
        }
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for BgzfReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self
            .current
            .as_ref()
            .map_or(true, |c| self.pos >= c.data.len())
        {
            match self.pipeline.next() {
                Some(Ok(block)) => {
                    self.current = Some(block);
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.current = None;
                    return Ok(&[]);
                }
            }
        }
        match &self.current {
            Some(block) => Ok(&block.data[self.pos..]),
            None => Ok(&[]),
        }
    }

    fn consume(&mut self, amt: usize) {
        self.pos += amt;
    }
}
