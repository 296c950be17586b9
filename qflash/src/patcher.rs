// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Boot image patcher: unpack a boot image, hand its ramdisk to an
//! external rooting collaborator, repack. The collaborator that
//! actually rewrites ramdisk contents for a given method is out of
//! scope here; this only owns the extract/repack lifecycle around it.

use std::path::Path;

use crate::bootimg::{self, BootImage};
use crate::error::Result;
use crate::types::PatchMethod;

/// Implemented by whatever knows how to inject a given rooting payload
/// into a ramdisk cpio. This crate doesn't ship one.
pub trait RamdiskPatcher {
    fn patch_ramdisk(&self, ramdisk: &[u8], method: PatchMethod) -> Result<Vec<u8>>;
}

/// Load `input_path` as a boot image, returning the parsed container
/// for a caller to inspect or modify before repacking.
pub fn extract_boot(input_path: impl AsRef<Path>) -> Result<BootImage> {
    bootimg::load(input_path)
}

/// Write `img` back out to `output_path`.
pub fn repack_boot(img: &BootImage, output_path: impl AsRef<Path>) -> Result<()> {
    bootimg::save(img, output_path)
}

/// Full round trip: extract, hand the ramdisk to `patcher`, repack.
pub fn patch(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    method: PatchMethod,
    patcher: &dyn RamdiskPatcher,
) -> Result<()> {
    let mut img = extract_boot(input_path)?;
    img.ramdisk = patcher.patch_ramdisk(&img.ramdisk, method)?;
    repack_boot(&img, output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;
    impl RamdiskPatcher for Passthrough {
        fn patch_ramdisk(&self, ramdisk: &[u8], _method: PatchMethod) -> Result<Vec<u8>> {
            Ok(ramdisk.to_vec())
        }
    }

    #[test]
    fn patch_round_trips_through_a_passthrough_collaborator() {
        let img = BootImage {
            version: 2,
            page_size: 2048,
            cmdline: "console=ttyMSM0".into(),
            kernel: vec![1; 4],
            ramdisk: vec![2; 6],
            dtb: vec![3; 2],
            ..Default::default()
        };

        let mut in_path = std::env::temp_dir();
        in_path.push(format!("qflash-patch-in-{}.img", std::process::id()));
        let mut out_path = std::env::temp_dir();
        out_path.push(format!("qflash-patch-out-{}.img", std::process::id()));

        bootimg::save(&img, &in_path).unwrap();
        patch(&in_path, &out_path, PatchMethod::Magisk, &Passthrough).unwrap();

        let reloaded = bootimg::load(&out_path).unwrap();
        let _ = std::fs::remove_file(&in_path);
        let _ = std::fs::remove_file(&out_path);

        assert_eq!(reloaded.ramdisk, img.ramdisk);
        assert_eq!(reloaded.kernel, img.kernel);
    }
}
