// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

use owo_colors::OwoColorize;
use qflash::PartitionInfo;

pub fn print_partition_table(partitions: &[PartitionInfo]) {
    for p in partitions {
        println!(
            " - {} ({} KB)",
            p.name.bright_blue(),
            p.size_in_bytes / 1024
        );
    }
}

pub fn find_part<'a>(partitions: &'a [PartitionInfo], name: &str) -> Option<&'a PartitionInfo> {
    partitions.iter().find(|p| p.name == name)
}
