// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Android boot image container, versions 0 through 4.
//!
//! The on-disk layouts for v0-v2 and v3-v4 are different structs in the
//! original AOSP headers, related by inheritance. Rather than mirror
//! that with a trait hierarchy, this is one flat record tagged by
//! `version`; fields that don't apply to a given version sit at their
//! zero value and the codec only reads/writes the ones a version uses.

use std::fs;
use std::path::Path;

use crate::error::{QflashError, Result};

const MAGIC: &[u8; 8] = b"ANDROID!";
const V0_2_PAGE_SIZE_DEFAULT: u32 = 2048;
const V3_4_PAGE_SIZE: u32 = 4096;
const V0_CMDLINE_LEN: usize = 512;
const V3_CMDLINE_LEN: usize = 1536;

#[derive(Debug, Clone, Default)]
pub struct BootImage {
    pub version: u32,
    pub page_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_addr: u32,
    pub tags_addr: u32,
    pub os_version: u32,
    pub dtb_addr: u64,
    pub signature_size: u32,
    pub cmdline: String,
    pub kernel: Vec<u8>,
    pub ramdisk: Vec<u8>,
    /// Device tree blob payload. Only meaningful at v2; empty otherwise.
    pub dtb: Vec<u8>,
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn read_u32(b: &[u8], off: usize) -> Result<u32> {
    b.get(off..off + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| QflashError::Format("boot image header truncated".into()))
}

fn read_u64(b: &[u8], off: usize) -> Result<u64> {
    b.get(off..off + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| QflashError::Format("boot image header truncated".into()))
}

fn read_cstr(b: &[u8], off: usize, len: usize) -> Result<String> {
    let field = b
        .get(off..off + len)
        .ok_or_else(|| QflashError::Format("boot image header truncated".into()))?;
    let end = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

/// Probe the header version the way the real loader does: both the
/// v0-v2 and v3-v4 layouts happen to carry this field at byte offset 40.
/// A value above the highest version we know means the image is either
/// corrupt or legacy-v0 garbage; fall back to reading offset 36 (the
/// v0-v2 `page_size` slot lines up suspiciously with version 0 in
/// practice) before giving up.
fn probe_version(bytes: &[u8]) -> Result<u32> {
    let v = read_u32(bytes, 40)?;
    if v <= 4 {
        return Ok(v);
    }
    let fallback = read_u32(bytes, 36)?;
    if fallback <= 4 {
        Ok(fallback)
    } else {
        Err(QflashError::Format(format!(
            "unsupported boot image header version: {v}"
        )))
    }
}

fn load_v0_2(bytes: &[u8], version: u32) -> Result<BootImage> {
    let kernel_size = read_u32(bytes, 8)? as usize;
    let kernel_addr = read_u32(bytes, 12)?;
    let ramdisk_size = read_u32(bytes, 16)? as usize;
    let ramdisk_addr = read_u32(bytes, 20)?;
    let second_size = read_u32(bytes, 24)? as usize;
    let tags_addr = read_u32(bytes, 32)?;
    let page_size = read_u32(bytes, 36)?;
    let page_size = if page_size == 0 {
        V0_2_PAGE_SIZE_DEFAULT
    } else {
        page_size
    };
    let os_version = read_u32(bytes, 44)?;
    let cmdline = read_cstr(bytes, 64, V0_CMDLINE_LEN)?;

    let kernel_offset = page_size;
    let ramdisk_offset = align_up(kernel_offset + kernel_size as u32, page_size);
    let second_offset = align_up(ramdisk_offset + ramdisk_size as u32, page_size);
    let dtb_offset = align_up(second_offset + second_size as u32, page_size);

    let kernel = slice_at(bytes, kernel_offset as usize, kernel_size)?;
    let ramdisk = slice_at(bytes, ramdisk_offset as usize, ramdisk_size)?;

    let (dtb_addr, dtb) = if version == 2 {
        let dtb_size = read_u32(bytes, 1648).unwrap_or(0) as usize;
        let dtb_addr = read_u64(bytes, 1652).unwrap_or(0);
        (dtb_addr, slice_at(bytes, dtb_offset as usize, dtb_size)?)
    } else {
        (0, Vec::new())
    };

    Ok(BootImage {
        version,
        page_size,
        kernel_addr,
        ramdisk_addr,
        tags_addr,
        os_version,
        dtb_addr,
        signature_size: 0,
        cmdline,
        kernel,
        ramdisk,
        dtb,
    })
}

fn load_v3_4(bytes: &[u8], version: u32) -> Result<BootImage> {
    let kernel_size = read_u32(bytes, 8)? as usize;
    let ramdisk_size = read_u32(bytes, 12)? as usize;
    let os_version = read_u32(bytes, 16)?;
    let cmdline = read_cstr(bytes, 44, V3_CMDLINE_LEN)?;
    let signature_size = if version == 4 {
        read_u32(bytes, 44 + V3_CMDLINE_LEN)?
    } else {
        0
    };

    let kernel_offset = V3_4_PAGE_SIZE;
    let ramdisk_offset = align_up(kernel_offset + kernel_size as u32, V3_4_PAGE_SIZE);

    let kernel = slice_at(bytes, kernel_offset as usize, kernel_size)?;
    let ramdisk = slice_at(bytes, ramdisk_offset as usize, ramdisk_size)?;

    Ok(BootImage {
        version,
        page_size: V3_4_PAGE_SIZE,
        kernel_addr: 0,
        ramdisk_addr: 0,
        tags_addr: 0,
        os_version,
        dtb_addr: 0,
        signature_size,
        cmdline,
        kernel,
        ramdisk,
        dtb: Vec::new(),
    })
}

fn slice_at(bytes: &[u8], offset: usize, len: usize) -> Result<Vec<u8>> {
    bytes
        .get(offset..offset + len)
        .map(|s| s.to_vec())
        .ok_or_else(|| QflashError::Format("boot image section truncated".into()))
}

/// Load a boot image from `path`, dispatching on its header version.
pub fn load(path: impl AsRef<Path>) -> Result<BootImage> {
    let bytes = fs::read(path)?;
    if bytes.len() < 8 || &bytes[0..8] != MAGIC {
        return Err(QflashError::Format("missing ANDROID! magic".into()));
    }
    let version = probe_version(&bytes)?;
    match version {
        0..=2 => load_v0_2(&bytes, version),
        3 | 4 => load_v3_4(&bytes, version),
        v => Err(QflashError::Format(format!(
            "unsupported boot image header version: {v}"
        ))),
    }
}

fn write_cstr(buf: &mut [u8], off: usize, len: usize, s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len - 1);
    buf[off..off + n].copy_from_slice(&bytes[..n]);
}

fn save_v0_2(img: &BootImage) -> Vec<u8> {
    let page_size = if img.page_size == 0 {
        V0_2_PAGE_SIZE_DEFAULT
    } else {
        img.page_size
    };
    let mut header = vec![0u8; 1660];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&(img.kernel.len() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&img.kernel_addr.to_le_bytes());
    header[16..20].copy_from_slice(&(img.ramdisk.len() as u32).to_le_bytes());
    header[20..24].copy_from_slice(&img.ramdisk_addr.to_le_bytes());
    header[24..28].copy_from_slice(&0u32.to_le_bytes()); // second_size
    header[32..36].copy_from_slice(&img.tags_addr.to_le_bytes());
    header[36..40].copy_from_slice(&page_size.to_le_bytes());
    header[40..44].copy_from_slice(&img.version.to_le_bytes());
    header[44..48].copy_from_slice(&img.os_version.to_le_bytes());
    write_cstr(&mut header, 64, V0_CMDLINE_LEN, &img.cmdline);
    if img.version == 2 {
        header[1648..1652].copy_from_slice(&(img.dtb.len() as u32).to_le_bytes());
        header[1652..1660].copy_from_slice(&img.dtb_addr.to_le_bytes());
    }

    let mut out = header;
    out.resize(page_size as usize, 0);

    append_padded(&mut out, &img.kernel, page_size);
    append_padded(&mut out, &img.ramdisk, page_size);
    if img.version == 2 {
        append_padded(&mut out, &img.dtb, page_size);
    }
    out
}

fn save_v3_4(img: &BootImage) -> Vec<u8> {
    let header_len = if img.version == 4 {
        44 + V3_CMDLINE_LEN + 4
    } else {
        44 + V3_CMDLINE_LEN
    };
    let mut header = vec![0u8; header_len];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&(img.kernel.len() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&(img.ramdisk.len() as u32).to_le_bytes());
    header[16..20].copy_from_slice(&img.os_version.to_le_bytes());
    header[20..24].copy_from_slice(&(header_len as u32).to_le_bytes());
    header[40..44].copy_from_slice(&img.version.to_le_bytes());
    write_cstr(&mut header, 44, V3_CMDLINE_LEN, &img.cmdline);
    if img.version == 4 {
        header[44 + V3_CMDLINE_LEN..48 + V3_CMDLINE_LEN]
            .copy_from_slice(&img.signature_size.to_le_bytes());
    }

    let mut out = header;
    out.resize(V3_4_PAGE_SIZE as usize, 0);

    append_padded(&mut out, &img.kernel, V3_4_PAGE_SIZE);
    append_padded(&mut out, &img.ramdisk, V3_4_PAGE_SIZE);
    out
}

fn append_padded(out: &mut Vec<u8>, section: &[u8], page_size: u32) {
    out.extend_from_slice(section);
    let padded_len = align_up(out.len() as u32, page_size) as usize;
    out.resize(padded_len, 0);
}

/// Serialize `img` back to an on-disk boot image and write it to `path`.
///
/// Unlike the implementation this was ported from -- which silently
/// dropped the DTB and the padding between sections for v2 images --
/// this writes the DTB payload and pads every section boundary to the
/// page size.
pub fn save(img: &BootImage, path: impl AsRef<Path>) -> Result<()> {
    let bytes = match img.version {
        0..=2 => save_v0_2(img),
        3 | 4 => save_v3_4(img),
        v => return Err(QflashError::Format(format!("unsupported boot image version: {v}"))),
    };
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn sample_v2() -> BootImage {
        BootImage {
            version: 2,
            page_size: 2048,
            kernel_addr: 0x1080_0000,
            ramdisk_addr: 0x0100_0000,
            tags_addr: 0x0000_0100,
            os_version: 0,
            dtb_addr: 0x0f00_0000,
            signature_size: 0,
            cmdline: "console=ttyMSM0".into(),
            kernel: vec![0xAA; 3],
            ramdisk: vec![0xBB; 5],
            dtb: vec![0xCC; 1],
        }
    }

    #[test]
    fn v2_round_trips_kernel_ramdisk_and_dtb() {
        let img = sample_v2();
        let bytes = save_v0_2(&img);

        // offsets per the 2048-byte page size used above.
        assert_eq!(&bytes[2048..2048 + 3], &[0xAA; 3]);
        assert_eq!(&bytes[4096..4096 + 5], &[0xBB; 5]);
        assert_eq!(&bytes[6144..6144 + 1], &[0xCC; 1]);

        let mut tmp = std::env::temp_dir();
        tmp.push(format!("qflash-boot-test-{}.img", std::process::id()));
        let mut f = fs::File::create(&tmp).unwrap();
        f.write_all(&bytes).unwrap();
        drop(f);

        let loaded = load(&tmp).unwrap();
        let _ = fs::remove_file(&tmp);

        assert_eq!(loaded.kernel, img.kernel);
        assert_eq!(loaded.ramdisk, img.ramdisk);
        assert_eq!(loaded.dtb, img.dtb);
        assert_eq!(loaded.cmdline, img.cmdline);
    }

    #[test]
    fn v3_drops_per_section_load_addresses() {
        let img = BootImage {
            version: 3,
            cmdline: "androidboot.hardware=qcom".into(),
            kernel: vec![1, 2, 3],
            ramdisk: vec![4, 5],
            ..Default::default()
        };
        let bytes = save_v3_4(&img);
        assert_eq!(&bytes[4096..4096 + 3], &[1, 2, 3]);
        assert_eq!(&bytes[8192..8192 + 2], &[4, 5]);
    }

    #[test]
    fn rejects_missing_magic() {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("qflash-boot-bad-{}.img", std::process::id()));
        fs::write(&tmp, b"NOTANDROID!!!!!!").unwrap();
        let res = load(&tmp);
        let _ = fs::remove_file(&tmp);
        assert!(matches!(res, Err(QflashError::Format(_))));
    }
}
