//! bamseek: indexed random access to BAM alignments
//!
//! # Overview
//!
//! bamseek reads genomic alignment data stored in the BAM format, a
//! block-compressed binary container (BGZF) of SAM alignment records. Its
//! center of gravity is the random-access engine: given a reference
//! sequence and a half-open coordinate interval, return every alignment
//! record overlapping it while reading only the portions of the file the
//! BAI index names, with optional parallel block decompression.
//!
//! ## Quick start
//!
//! ```no_run
//! use bamseek::{BaiIndex, RegionQuery};
//!
//! # fn main() -> bamseek::Result<()> {
//! let index = BaiIndex::for_bam("alignments.bam")?;
//!
//! for result in RegionQuery::by_name("alignments.bam", &index, "chr1", 1_000_000, 2_000_000)? {
//!     let record = result?;
//!     println!("{} at {}", record.name, record.position.unwrap_or(-1));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module organization
//!
//! - [`io::bgzf`]: BGZF framing, virtual offsets, block decompression
//! - [`io::bam`]: BAM header/record parsing, streaming and indexed reading
//! - [`formats::index`]: BAI index parsing and interval-to-chunk resolution
//!
//! Sequential scans and region queries yield records in file order, which
//! for coordinate-sorted input is `(reference id, position)` order. All
//! pipeline stages are lazy; memory stays bounded by the decompression
//! look-ahead, never the file or region size.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod formats;
pub mod io;

pub use error::{BamseekError, Result};
pub use formats::index::{BaiIndex, Bin, Chunk, ReferenceIndex};
pub use io::bam::{
    BamReader, Header, LocatedRecord, QueryOptions, Record, Reference, RegionQuery,
};
pub use io::bgzf::{eof_virtual_offset, has_eof_block, BgzfReader, BlockCache, VirtualOffset};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
