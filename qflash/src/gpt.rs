// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! GUID Partition Table header and entry-array parsing.

use crate::error::{QflashError, Result};
use crate::types::PartitionInfo;

/// "EFI PART" as a little-endian u64.
const GPT_SIGNATURE: u64 = 0x5452415020494645;
const NAME_LEN_CODE_UNITS: usize = 36;

#[derive(Debug, Clone)]
pub struct GptHeader {
    pub signature: u64,
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub partition_entry_lba: u64,
    pub num_partition_entries: u32,
    pub size_of_partition_entry: u32,
    pub partition_entries_crc32: u32,
}

fn read_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap())
}

/// Parse and validate the primary GPT header out of a 512-byte LBA.
///
/// Checks the "EFI PART" signature and recomputes the header CRC32 over
/// the header with the stored CRC field zeroed, per the UEFI spec.
pub fn parse_header(bytes: &[u8]) -> Result<GptHeader> {
    if bytes.len() < 92 {
        return Err(QflashError::Format("GPT header shorter than 92 bytes".into()));
    }

    let signature = read_u64(bytes, 0);
    if signature != GPT_SIGNATURE {
        return Err(QflashError::Format(format!(
            "bad GPT signature: {signature:#018x}"
        )));
    }

    let header_size = read_u32(bytes, 12) as usize;
    let stored_crc = read_u32(bytes, 16);

    let mut crc_buf = bytes[..header_size.min(bytes.len())].to_vec();
    crc_buf[16..20].fill(0);
    let computed_crc = crc32fast::hash(&crc_buf);
    if computed_crc != stored_crc {
        return Err(QflashError::Format(format!(
            "GPT header CRC mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let mut disk_guid = [0u8; 16];
    disk_guid.copy_from_slice(&bytes[56..72]);

    Ok(GptHeader {
        signature,
        revision: read_u32(bytes, 8),
        header_size: header_size as u32,
        header_crc32: stored_crc,
        current_lba: read_u64(bytes, 24),
        backup_lba: read_u64(bytes, 32),
        first_usable_lba: read_u64(bytes, 40),
        last_usable_lba: read_u64(bytes, 48),
        disk_guid,
        partition_entry_lba: read_u64(bytes, 72),
        num_partition_entries: read_u32(bytes, 80),
        size_of_partition_entry: read_u32(bytes, 84),
        partition_entries_crc32: read_u32(bytes, 88),
    })
}

/// Decode a fixed 36-code-unit UTF-16LE name field, stopping at the first
/// NUL. Handles surrogate pairs correctly (the original C++ this was
/// ported from truncated anything above the BMP).
fn decode_name(field: &[u8]) -> String {
    let code_units: Vec<u16> = field
        .chunks_exact(2)
        .take(NAME_LEN_CODE_UNITS)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();

    char::decode_utf16(code_units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Parse `header.num_partition_entries` records of
/// `header.size_of_partition_entry` bytes each, validating them against
/// the header's entries CRC32 first.
///
/// All-zero type GUIDs are empty slots and are skipped. An entry whose
/// `end_lba < start_lba` has its size saturated to zero and is dropped
/// with the caller expected to log a warning (the codec itself doesn't
/// log -- that's a CLI/engine concern).
pub fn parse_entries(
    bytes: &[u8],
    header: &GptHeader,
    sector_size: u64,
) -> Result<Vec<PartitionInfo>> {
    let entry_size = header.size_of_partition_entry as usize;
    let count = header.num_partition_entries as usize;
    let needed = entry_size.saturating_mul(count);
    if bytes.len() < needed {
        return Err(QflashError::Format(format!(
            "partition entry array truncated: need {needed} bytes, have {}",
            bytes.len()
        )));
    }

    let table = &bytes[..needed];
    let computed_crc = crc32fast::hash(table);
    if computed_crc != header.partition_entries_crc32 {
        return Err(QflashError::Format(format!(
            "GPT entries CRC mismatch: stored {:#010x}, computed {computed_crc:#010x}",
            header.partition_entries_crc32
        )));
    }

    let mut out = Vec::with_capacity(count);
    for entry in table.chunks_exact(entry_size) {
        let type_guid = &entry[0..16];
        if type_guid.iter().all(|&b| b == 0) {
            continue;
        }

        let start_lba = read_u64(entry, 32);
        let end_lba = read_u64(entry, 40);
        let name = decode_name(&entry[56..56 + NAME_LEN_CODE_UNITS * 2]);

        let size_in_bytes = match end_lba.checked_sub(start_lba) {
            Some(span) => (span + 1).saturating_mul(sector_size),
            None => 0,
        };
        if size_in_bytes == 0 {
            continue;
        }

        out.push(PartitionInfo {
            name,
            start_lba,
            end_lba,
            size_in_bytes,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(entry_count: u32, entry_size: u32, entries_crc: u32) -> Vec<u8> {
        let mut h = vec![0u8; 92];
        h[0..8].copy_from_slice(&GPT_SIGNATURE.to_le_bytes());
        h[8..12].copy_from_slice(&1u32.to_le_bytes());
        h[12..16].copy_from_slice(&92u32.to_le_bytes());
        // CRC field (16..20) left zero for the compute pass.
        h[24..32].copy_from_slice(&1u64.to_le_bytes());
        h[32..40].copy_from_slice(&63u64.to_le_bytes());
        h[40..48].copy_from_slice(&34u64.to_le_bytes());
        h[48..56].copy_from_slice(&30u64.to_le_bytes());
        h[72..80].copy_from_slice(&2u64.to_le_bytes());
        h[80..84].copy_from_slice(&entry_count.to_le_bytes());
        h[84..88].copy_from_slice(&entry_size.to_le_bytes());
        h[88..92].copy_from_slice(&entries_crc.to_le_bytes());

        let crc = crc32fast::hash(&h);
        h[16..20].copy_from_slice(&crc.to_le_bytes());
        h
    }

    fn build_entry(name: &str, start_lba: u64, end_lba: u64) -> Vec<u8> {
        let mut e = vec![0u8; 128];
        e[0..16].copy_from_slice(&[1u8; 16]); // non-zero type GUID
        e[32..40].copy_from_slice(&start_lba.to_le_bytes());
        e[40..48].copy_from_slice(&end_lba.to_le_bytes());
        let utf16: Vec<u16> = name.encode_utf16().collect();
        for (i, u) in utf16.iter().enumerate().take(36) {
            e[56 + i * 2..58 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        e
    }

    #[test]
    fn rejects_bad_signature() {
        let mut h = build_header(0, 128, 0);
        h[0] ^= 0xFF;
        assert!(matches!(parse_header(&h), Err(QflashError::Format(_))));
    }

    #[test]
    fn header_crc_round_trips() {
        let h = build_header(1, 128, 0);
        let parsed = parse_header(&h).unwrap();
        assert_eq!(parsed.num_partition_entries, 1);
    }

    #[test]
    fn decodes_boot_partition_name_and_size() {
        let entry = build_entry("boot", 64, 127);
        let entries_crc = crc32fast::hash(&entry);
        let header_bytes = build_header(1, 128, entries_crc);
        let header = parse_header(&header_bytes).unwrap();

        let parts = parse_entries(&entry, &header, 512).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "boot");
        assert_eq!(parts[0].size_in_bytes, 64 * 512);
    }

    #[test]
    fn decodes_supplementary_plane_name_via_surrogate_pair() {
        // U+1F600 requires a surrogate pair; confirm it isn't truncated.
        let name = "\u{1F600}";
        let entry = build_entry(name, 0, 0);
        let decoded = decode_name(&entry[56..56 + 72]);
        assert_eq!(decoded, name);
    }

    #[test]
    fn skips_empty_slot() {
        let mut entry = build_entry("unused", 0, 1);
        entry[0..16].fill(0);
        let entries_crc = crc32fast::hash(&entry);
        let header_bytes = build_header(1, 128, entries_crc);
        let header = parse_header(&header_bytes).unwrap();

        let parts = parse_entries(&entry, &header, 512).unwrap();
        assert!(parts.is_empty());
    }
}
