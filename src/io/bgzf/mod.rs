//! BGZF container support.
//!
//! BGZF is block-gzip: a concatenation of gzip members each holding at most
//! 64 KiB of uncompressed data, with a length subfield in every header. The
//! per-block framing is what makes random access into compressed BAM
//! possible; a [`VirtualOffset`] addresses any byte as (block offset within
//! the file, byte offset within the decompressed block).

pub mod block;
pub mod inflate;
pub mod reader;
pub mod virtual_offset;

pub use block::{
    eof_virtual_offset, has_eof_block, BlockReader, RawBlock, BGZF_EOF, MAX_UNCOMPRESSED_SIZE,
};
pub use inflate::{inflate_block, BlockCache, InflatePipeline, InflatedBlock, DEFAULT_CACHE_CAPACITY};
pub use reader::BgzfReader;
pub use virtual_offset::VirtualOffset;
