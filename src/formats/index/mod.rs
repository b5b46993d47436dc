//! Index formats for random access into coordinate-sorted files.

pub mod bai;

pub use bai::{BaiIndex, Bin, Chunk, ReferenceIndex};
