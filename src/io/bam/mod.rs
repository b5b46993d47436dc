//! BAM (Binary Alignment Map) reading.
//!
//! A BAM file is a BGZF-compressed stream: header (magic, SAM text,
//! reference dictionary) followed by length-prefixed binary alignment
//! records. Two reading surfaces live here:
//!
//! - [`BamReader`]: sequential streaming over the whole file with constant
//!   memory.
//! - [`RegionQuery`]: indexed random access — resolve an interval against a
//!   BAI index and iterate only the records overlapping it, reading only
//!   the file regions the index names.
//!
//! [`sam`] renders records back into SAM text, the boundary format tests
//! and downstream tools compare against.

pub mod cigar;
pub mod error;
pub mod header;
pub mod query;
pub mod reader;
pub mod record;
pub mod sam;
pub mod sequence;
pub mod tags;

pub use cigar::{bases_covered, parse_cigar, CigarOp};
pub use error::BamDecodeError;
pub use header::{read_header, Header, Reference};
pub use query::{LocatedRecord, LocatedRecords, QueryOptions, RegionQuery};
pub use reader::{BamReader, Records};
pub use record::{parse_record, Record};
pub use sequence::decode_sequence;
pub use tags::{parse_tags, ArrayValue, Tag, TagValue, Tags};
