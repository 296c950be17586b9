// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Firehose: the XML-over-USB command dialect spoken by the Qualcomm
//! programmer once Sahara has delivered it.

use indexmap::IndexMap;
use xmltree::Element;

use crate::error::Result;

pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_048_576;
const DEFAULT_SECTOR_SIZE: u32 = 512;

/// A parsed Firehose response: whether it ACKed, and the flat attribute
/// set off whichever element carried the verdict.
#[derive(Debug, Clone)]
pub struct FirehoseResponse {
    pub success: bool,
    pub attributes: IndexMap<String, String>,
    pub raw: String,
}

fn wrap(inner: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n<data>\n{inner}\n</data>\n")
}

/// `<configure>` -- establishes max payload size and target memory type.
pub fn build_configure(memory_name: &str, target_name: &str, max_payload_size: u32) -> String {
    wrap(format!(
        "<configure MemoryName=\"{memory_name}\" Verbose=\"0\" AlwaysValidate=\"0\" \
         MaxPayloadSizeToTargetInBytes=\"{max_payload_size}\" ZlpAwareHost=\"1\" \
         SkipStorageInit=\"0\" TargetName=\"{target_name}\" />",
    ))
}

/// `<read>` -- pull `num_sectors` sectors starting at `start_sector` off
/// `physical_partition_number`.
pub fn build_read(physical_partition_number: u32, start_sector: u64, num_sectors: u64) -> String {
    wrap(format!(
        "<read SECTOR_SIZE_IN_BYTES=\"{DEFAULT_SECTOR_SIZE}\" num_partition_sectors=\"{num_sectors}\" \
         physical_partition_number=\"{physical_partition_number}\" start_sector=\"{start_sector}\" />",
    ))
}

/// `<program>` -- push `num_sectors` sectors of `filename` starting at
/// `start_sector`.
pub fn build_program(
    physical_partition_number: u32,
    start_sector: u64,
    num_sectors: u64,
    filename: &str,
) -> String {
    wrap(format!(
        "<program SECTOR_SIZE_IN_BYTES=\"{DEFAULT_SECTOR_SIZE}\" num_partition_sectors=\"{num_sectors}\" \
         physical_partition_number=\"{physical_partition_number}\" start_sector=\"{start_sector}\" \
         filename=\"{filename}\" />",
    ))
}

/// `<erase>` -- erase `partition_name` outright.
pub fn build_erase(physical_partition_number: u32, partition_name: &str) -> String {
    wrap(format!(
        "<erase physical_partition_number=\"{physical_partition_number}\" partition_name=\"{partition_name}\" />",
    ))
}

/// `<getGpt>` -- ask the device to report its own GPT view (used as a
/// sanity cross-check; the primary GPT parse still goes through
/// [`crate::gpt`]).
pub fn build_get_gpt(physical_partition_number: u32) -> String {
    wrap(format!(
        "<getGpt physical_partition_number=\"{physical_partition_number}\" />",
    ))
}

/// Parse a response XML document. Ad-hoc attribute tokenization is
/// avoided in favor of a real XML parser (`xmltree`); the source this
/// was ported from scanned for `" name=\""` substrings, which breaks on
/// benign whitespace changes.
///
/// No schema validation is performed. A document that doesn't parse, or
/// that parses but carries no child element, is not a protocol error at
/// this layer -- it's reported as a plain `success = false` with the raw
/// text preserved so the caller can log it.
pub fn parse_response(xml: &str) -> Result<FirehoseResponse> {
    let unacked = || FirehoseResponse {
        success: false,
        attributes: IndexMap::new(),
        raw: xml.to_string(),
    };

    let Ok(root) = Element::parse(xml.as_bytes()) else {
        return Ok(unacked());
    };
    let Some(child) = root.children.iter().find_map(|n| n.as_element()) else {
        return Ok(unacked());
    };

    let mut attributes = IndexMap::new();
    for (k, v) in &child.attributes {
        attributes.insert(k.clone(), v.clone());
    }

    let success = attributes
        .get("value")
        .map(|v| v.eq_ignore_ascii_case("ack"))
        .unwrap_or(false);

    Ok(FirehoseResponse {
        success,
        attributes,
        raw: xml.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_carries_max_payload_size() {
        let xml = build_configure("UFS", "8generic", DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(xml.contains("MaxPayloadSizeToTargetInBytes=\"1048576\""));
        assert!(xml.contains("TargetName=\"8generic\""));
    }

    #[test]
    fn parses_ack_case_insensitively() {
        let xml = wrap("<response value=\"ack\" />".into());
        let resp = parse_response(&xml).unwrap();
        assert!(resp.success);
    }

    #[test]
    fn parses_nak_with_attributes() {
        let xml = wrap(
            "<response value=\"NAK\" MaxPayloadSizeToTargetInBytes=\"65536\" />".into(),
        );
        let resp = parse_response(&xml).unwrap();
        assert!(!resp.success);
        assert_eq!(
            resp.attributes.get("MaxPayloadSizeToTargetInBytes").map(String::as_str),
            Some("65536")
        );
    }

    #[test]
    fn malformed_xml_reports_failure_without_erroring() {
        let resp = parse_response("<data><oops></data>").unwrap();
        assert!(!resp.success);
        assert!(resp.attributes.is_empty());
    }
}
