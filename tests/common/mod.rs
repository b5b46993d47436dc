//! Shared fixtures: synthesize BGZF-compressed BAM bytes and a matching
//! BAI index so the random-access path can be checked against ground truth
//! without shipping binary test data.

#![allow(dead_code)]

use bamseek::io::bgzf::BGZF_EOF;
use bamseek::{BaiIndex, Bin, Chunk, ReferenceIndex, VirtualOffset};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

/// Wrap a payload in a single BGZF block.
pub fn bgzf_block(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 65536, "payload exceeds one BGZF block");
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut block = Vec::with_capacity(compressed.len() + 26);
    block.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff]);
    block.extend_from_slice(&6u16.to_le_bytes());
    block.extend_from_slice(&[b'B', b'C']);
    block.extend_from_slice(&2u16.to_le_bytes());
    block.extend_from_slice(&((compressed.len() + 25) as u16).to_le_bytes());
    block.extend_from_slice(&compressed);
    block.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    block
}

/// Description of one synthetic alignment.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub name: String,
    pub ref_id: i32,
    pub pos: i32,
    /// (length, SAM op char) pairs
    pub cigar: Vec<(u32, char)>,
    pub seq_len: usize,
    pub flags: u16,
}

/// A mapped record with the given CIGAR.
pub fn rec(name: &str, ref_id: i32, pos: i32, cigar: &[(u32, char)]) -> RecordSpec {
    let seq_len = cigar
        .iter()
        .filter(|(_, op)| matches!(op, 'M' | 'I' | 'S' | '=' | 'X'))
        .map(|(len, _)| *len as usize)
        .sum();
    RecordSpec {
        name: name.to_string(),
        ref_id,
        pos,
        cigar: cigar.to_vec(),
        seq_len,
        flags: 0,
    }
}

fn cigar_op_code(op: char) -> u32 {
    match op {
        'M' => 0,
        'I' => 1,
        'D' => 2,
        'N' => 3,
        'S' => 4,
        'H' => 5,
        'P' => 6,
        '=' => 7,
        'X' => 8,
        other => panic!("unknown CIGAR op {other}"),
    }
}

/// Reference bases covered by a spec's CIGAR.
pub fn ref_span(spec: &RecordSpec) -> u32 {
    spec.cigar
        .iter()
        .filter(|(_, op)| matches!(op, 'M' | 'D' | 'N' | '=' | 'X'))
        .map(|(len, _)| *len)
        .sum()
}

/// Encode one record in BAM binary form, leading block_size included.
pub fn encode_record(spec: &RecordSpec) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&spec.ref_id.to_le_bytes());
    body.extend_from_slice(&spec.pos.to_le_bytes());
    body.push((spec.name.len() + 1) as u8);
    body.push(40); // mapq
    body.extend_from_slice(&0u16.to_le_bytes()); // bin (unused by the reader)
    body.extend_from_slice(&(spec.cigar.len() as u16).to_le_bytes());
    body.extend_from_slice(&spec.flags.to_le_bytes());
    body.extend_from_slice(&(spec.seq_len as i32).to_le_bytes());
    body.extend_from_slice(&(-1i32).to_le_bytes()); // next_refID
    body.extend_from_slice(&(-1i32).to_le_bytes()); // next_pos
    body.extend_from_slice(&0i32.to_le_bytes()); // tlen
    body.extend_from_slice(spec.name.as_bytes());
    body.push(0);
    for &(len, op) in &spec.cigar {
        body.extend_from_slice(&((len << 4) | cigar_op_code(op)).to_le_bytes());
    }
    // All-A sequence, constant quality.
    body.extend(std::iter::repeat(0x11).take(spec.seq_len.div_ceil(2)));
    body.extend(std::iter::repeat(30).take(spec.seq_len));

    let mut data = Vec::with_capacity(body.len() + 4);
    data.extend_from_slice(&(body.len() as i32).to_le_bytes());
    data.extend_from_slice(&body);
    data
}

/// Encode a BAM header for the given (name, length) references.
pub fn encode_bam_header(refs: &[(&str, u32)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"BAM\x01");

    let text = "@HD\tVN:1.6\tSO:coordinate\n";
    data.extend_from_slice(&(text.len() as i32).to_le_bytes());
    data.extend_from_slice(text.as_bytes());

    data.extend_from_slice(&(refs.len() as i32).to_le_bytes());
    for (name, length) in refs {
        data.extend_from_slice(&((name.len() + 1) as i32).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&length.to_le_bytes());
    }
    data
}

/// Smallest bin containing `[beg, end)` under the UCSC hierarchy.
pub fn reg2bin(beg: u32, end: u32) -> u32 {
    let end = end - 1;
    if beg >> 14 == end >> 14 {
        return 4681 + (beg >> 14);
    }
    if beg >> 17 == end >> 17 {
        return 585 + (beg >> 17);
    }
    if beg >> 20 == end >> 20 {
        return 73 + (beg >> 20);
    }
    if beg >> 23 == end >> 23 {
        return 9 + (beg >> 23);
    }
    if beg >> 26 == end >> 26 {
        return 1 + (beg >> 26);
    }
    0
}

/// A synthesized BAM file plus its matching in-memory index.
pub struct SyntheticBam {
    /// Complete BGZF file bytes (header block, record blocks, EOF block)
    pub data: Vec<u8>,
    /// Index equivalent to what an indexer would produce for `data`
    pub index: BaiIndex,
}

/// Build a BGZF BAM file from coordinate-sorted record specs, packing
/// `records_per_block` records into each compressed block, and derive the
/// BAI for it (real binning, 16 kbp linear index).
pub fn build_bam(
    refs: &[(&str, u32)],
    records: &[RecordSpec],
    records_per_block: usize,
) -> SyntheticBam {
    assert!(records_per_block > 0);

    // Group encoded records into block payloads, remembering where each
    // record lands: (group index, offset within payload, encoded length).
    let mut groups: Vec<Vec<u8>> = Vec::new();
    let mut placements = Vec::with_capacity(records.len());
    for chunk in records.chunks(records_per_block) {
        let mut payload = Vec::new();
        for spec in chunk {
            let encoded = encode_record(spec);
            placements.push((groups.len(), payload.len(), encoded.len()));
            payload.extend_from_slice(&encoded);
        }
        groups.push(payload);
    }

    // Compress: header block, record blocks, EOF block.
    let mut data = bgzf_block(&encode_bam_header(refs));
    let mut block_offsets = Vec::with_capacity(groups.len());
    for payload in &groups {
        block_offsets.push(data.len() as u64);
        data.extend_from_slice(&bgzf_block(payload));
    }
    let eof_offset = data.len() as u64;
    data.extend_from_slice(&BGZF_EOF);

    // Virtual offset range of each record. A record ending flush with its
    // block gets the next block's (offset, 0) form, exercising the
    // whole-block-skip path on chunk ends.
    let located: Vec<(VirtualOffset, VirtualOffset)> = placements
        .iter()
        .map(|&(group, uoffset, len)| {
            let start = VirtualOffset::new(block_offsets[group], uoffset as u16);
            let end_uoffset = uoffset + len;
            let end = if end_uoffset == groups[group].len() {
                let next = block_offsets.get(group + 1).copied().unwrap_or(eof_offset);
                VirtualOffset::new(next, 0)
            } else {
                VirtualOffset::new(block_offsets[group], end_uoffset as u16)
            };
            (start, end)
        })
        .collect();

    // Derive the index: one chunk per record in its alignment's bin, plus
    // per-window minimum start offsets for the linear index.
    let mut bins: Vec<BTreeMap<u32, Vec<Chunk>>> = refs.iter().map(|_| BTreeMap::new()).collect();
    let mut intervals: Vec<Vec<VirtualOffset>> = refs.iter().map(|_| Vec::new()).collect();

    for (spec, &(start, end)) in records.iter().zip(&located) {
        if spec.ref_id < 0 {
            continue;
        }
        let ref_id = spec.ref_id as usize;
        let beg = spec.pos as u32;
        let span = ref_span(spec).max(1);

        let bin = reg2bin(beg, beg + span);
        bins[ref_id]
            .entry(bin)
            .or_default()
            .push(Chunk::new(start, end));

        let first_window = (beg >> 14) as usize;
        let last_window = ((beg + span - 1) >> 14) as usize;
        let windows = &mut intervals[ref_id];
        if windows.len() <= last_window {
            windows.resize(last_window + 1, VirtualOffset::from_raw(0));
        }
        for entry in windows[first_window..=last_window].iter_mut() {
            if entry.as_raw() == 0 || start < *entry {
                *entry = start;
            }
        }
    }

    let references = bins
        .into_iter()
        .zip(intervals)
        .map(|(bins, intervals)| ReferenceIndex {
            bins: bins
                .into_iter()
                .map(|(id, chunks)| Bin { id, chunks })
                .collect(),
            intervals,
        })
        .collect();

    SyntheticBam {
        data,
        index: BaiIndex {
            references,
            unmapped_count: None,
        },
    }
}

/// Serialize an index in BAI binary form.
pub fn serialize_bai(index: &BaiIndex) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"BAI\x01");
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

/// Write bytes into a fresh temp dir; keep the dir alive with the path.
pub fn write_to_temp(data: &[u8], file_name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(file_name);
    std::fs::write(&path, data).unwrap();
    (dir, path)
}
