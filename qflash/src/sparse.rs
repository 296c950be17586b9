// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Android sparse image recognition. This crate doesn't dechunk sparse
//! images -- it only probes whether one is sparse and how big it would
//! be unsparsed, so upstream tooling can decide whether to inflate
//! before flashing.

const SPARSE_MAGIC: u32 = 0xED26FF3A;

pub struct SparseHeader {
    pub magic: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_hdr_sz: u16,
    pub chunk_hdr_sz: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

fn parse_header(bytes: &[u8]) -> Option<SparseHeader> {
    if bytes.len() < 28 {
        return None;
    }
    Some(SparseHeader {
        magic: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        major_version: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
        minor_version: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
        file_hdr_sz: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
        chunk_hdr_sz: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
        block_size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        total_blocks: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        total_chunks: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        image_checksum: u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
    })
}

/// Whether `bytes` begins with the Android sparse image magic.
pub fn is_sparse(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && u32::from_le_bytes(bytes[0..4].try_into().unwrap()) == SPARSE_MAGIC
}

/// The size the image would be once fully unsparsed, or 0 if `bytes`
/// isn't a sparse image.
pub fn unsparsed_size(bytes: &[u8]) -> u64 {
    match parse_header(bytes) {
        Some(h) if h.magic == SPARSE_MAGIC => h.block_size as u64 * h.total_blocks as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(block_size: u32, total_blocks: u32) -> Vec<u8> {
        let mut b = vec![0u8; 28];
        b[0..4].copy_from_slice(&SPARSE_MAGIC.to_le_bytes());
        b[4..6].copy_from_slice(&1u16.to_le_bytes());
        b[8..10].copy_from_slice(&28u16.to_le_bytes());
        b[10..12].copy_from_slice(&12u16.to_le_bytes());
        b[12..16].copy_from_slice(&block_size.to_le_bytes());
        b[16..20].copy_from_slice(&total_blocks.to_le_bytes());
        b
    }

    #[test]
    fn detects_sparse_magic() {
        let img = fixture(4096, 10);
        assert!(is_sparse(&img));
        assert!(!is_sparse(b"ANDROID!"));
    }

    #[test]
    fn computes_unsparsed_size() {
        let img = fixture(4096, 10);
        assert_eq!(unsparsed_size(&img), 40960);
        assert_eq!(unsparsed_size(b"not sparse at all......"), 0);
    }
}
