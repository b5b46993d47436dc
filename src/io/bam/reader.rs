//! BAM streaming reader.
//!
//! Sequential, constant-memory reading: the header is parsed once during
//! construction, then records stream through a reusable buffer. Random
//! access lives in [`super::query`]; this reader is the linear-scan path
//! and is what the query machinery uses to read the header.

use super::header::{read_header, Header};
use super::record::{parse_record, Record};
use crate::io::bgzf::BgzfReader;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Streaming BAM reader over any buffered byte source.
///
/// The internal record buffer grows to the largest record seen and is
/// reused across reads.
pub struct BamReader<R> {
    reader: R,
    header: Header,
    buffer: Vec<u8>,
}

impl<R: BufRead> BamReader<R> {
    /// Create a reader, parsing and validating the header immediately.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let header = read_header(&mut reader)?;
        Ok(Self {
            reader,
            header,
            buffer: Vec::with_capacity(512),
        })
    }

    /// The BAM header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Iterate over all records.
    pub fn records(&mut self) -> Records<'_, R> {
        Records { reader: self }
    }

    /// Read a single record; `Ok(None)` at end of stream.
    pub fn read_record(&mut self) -> io::Result<Option<Record>> {
        let mut size_buf = [0u8; 4];
        match self.reader.read_exact(&mut size_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let block_size = i32::from_le_bytes(size_buf);
        if block_size < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid record size: {block_size}"),
            ));
        }
        let block_size = block_size as usize;

        self.buffer.clear();
        self.buffer.extend_from_slice(&size_buf);
        self.buffer.resize(block_size + 4, 0);
        self.reader.read_exact(&mut self.buffer[4..])?;

        parse_record(&self.buffer).map(Some)
    }
}

impl BamReader<BgzfReader<BufReader<File>>> {
    /// Open a BGZF-compressed BAM file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Self::from_path_with_workers(path, 1)
    }

    /// Open a BAM file with a parallel block-decompression look-ahead.
    pub fn from_path_with_workers<P: AsRef<Path>>(path: P, workers: usize) -> crate::Result<Self> {
        let file = File::open(path)?;
        let reader = BgzfReader::with_workers(BufReader::new(file), workers);
        Ok(Self::new(reader)?)
    }
}

/// Iterator over BAM records, created by [`BamReader::records`].
pub struct Records<'a, R> {
    reader: &'a mut BamReader<R>,
}

impl<R: BufRead> Iterator for Records<'_, R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}
