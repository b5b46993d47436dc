//! I/O layers: BGZF container handling and BAM parsing.

pub mod bam;
pub mod bgzf;

pub use bam::{BamReader, RegionQuery};
pub use bgzf::{BgzfReader, VirtualOffset};
