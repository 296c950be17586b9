// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! EDL manager: composes Sahara (handshake + programmer upload) and
//! Firehose (XML command session) into partition-level read/write/erase.

use owo_colors::OwoColorize;

use crate::error::{QflashError, Result};
use crate::firehose::{self, FirehoseResponse};
use crate::sahara::{self, SaharaState};
use crate::transport::{self, Transport};

const HELLO_TIMEOUT_MS: u64 = 3000;
const XML_TIMEOUT_MS: u64 = 5000;
const DATA_TIMEOUT_MS: u64 = 10000;
const DEFAULT_MEMORY_NAME: &str = "UFS";
const DEFAULT_TARGET_NAME: &str = "8generic";

/// A byte-counted progress bar for a partition-sized payload transfer.
fn progress_bar(total_bytes: u64) -> pbr::ProgressBar<std::io::Stdout> {
    let mut bar = pbr::ProgressBar::new(total_bytes);
    bar.set_units(pbr::Units::Bytes);
    bar
}

pub struct EdlManager {
    max_payload_size: u32,
}

impl Default for EdlManager {
    fn default() -> Self {
        Self {
            max_payload_size: firehose::DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl EdlManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the Sahara handshake and stream `programmer` up to the device.
    pub fn connect_sahara<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        programmer: &[u8],
    ) -> Result<()> {
        let state = sahara::connect(t, HELLO_TIMEOUT_MS)?;
        if state != SaharaState::HelloResponseSent {
            return Err(QflashError::Protocol(format!(
                "unexpected sahara state after hello: {state:?}"
            )));
        }
        let final_state = sahara::stream_programmer(t, programmer, DATA_TIMEOUT_MS)?;
        if final_state != SaharaState::Done {
            return Err(QflashError::Protocol(
                "programmer upload did not reach Done".into(),
            ));
        }
        println!("{}", "Sahara handshake complete, programmer uploaded".green());
        Ok(())
    }

    /// Send `<configure>` and require the device to ACK it.
    pub fn firehose_handshake<T: Transport + ?Sized>(&mut self, t: &mut T) -> Result<()> {
        let xml = firehose::build_configure(
            DEFAULT_MEMORY_NAME,
            DEFAULT_TARGET_NAME,
            self.max_payload_size,
        );
        transport::send_all(t, xml.as_bytes(), XML_TIMEOUT_MS)?;
        let resp = self.read_xml(t)?;
        if !resp.success {
            return Err(QflashError::Protocol(format!(
                "configure was NAKed: {:?}",
                resp.attributes
            )));
        }
        Ok(())
    }

    fn read_xml<T: Transport + ?Sized>(&self, t: &mut T) -> Result<FirehoseResponse> {
        let mut buf = vec![0u8; 8192];
        let n = t.receive(&mut buf, XML_TIMEOUT_MS)?;
        if n == 0 {
            return Err(QflashError::Transport("no firehose response received".into()));
        }
        let text = String::from_utf8_lossy(&buf[..n]);
        firehose::parse_response(&text)
    }

    /// Pull `num_sectors` sectors starting at `start_sector` off LUN
    /// `physical_partition_number`. The response XML arrives only after
    /// the payload -- a response observed earlier is a protocol error.
    pub fn read_partition<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        physical_partition_number: u32,
        start_sector: u64,
        num_sectors: u64,
    ) -> Result<Vec<u8>> {
        let xml = firehose::build_read(physical_partition_number, start_sector, num_sectors);
        transport::send_all(t, xml.as_bytes(), XML_TIMEOUT_MS)?;

        let mut data = vec![0u8; (num_sectors * 512) as usize];
        let mut bar = progress_bar(data.len() as u64);
        transport::receive_exact_with_progress(t, &mut data, DATA_TIMEOUT_MS, &mut bar)?;
        bar.finish();

        let resp = self.read_xml(t)?;
        if !resp.success {
            return Err(QflashError::Protocol(format!(
                "read was NAKed: {:?}",
                resp.attributes
            )));
        }
        Ok(data)
    }

    /// Push `data` to `num_sectors` sectors starting at `start_sector`.
    pub fn write_partition<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        physical_partition_number: u32,
        start_sector: u64,
        data: &[u8],
    ) -> Result<()> {
        let num_sectors = data.len() as u64 / 512;
        let xml = firehose::build_program(
            physical_partition_number,
            start_sector,
            num_sectors,
            "data",
        );
        transport::send_all(t, xml.as_bytes(), XML_TIMEOUT_MS)?;
        let mut bar = progress_bar(data.len() as u64);
        transport::send_all_with_progress(t, data, DATA_TIMEOUT_MS, &mut bar)?;
        bar.finish();

        let resp = self.read_xml(t)?;
        if !resp.success {
            return Err(QflashError::Protocol(format!(
                "write was NAKed: {:?}",
                resp.attributes
            )));
        }
        Ok(())
    }

    /// Erase `partition_name` outright on `physical_partition_number`.
    pub fn erase_partition<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        physical_partition_number: u32,
        partition_name: &str,
    ) -> Result<()> {
        let xml = firehose::build_erase(physical_partition_number, partition_name);
        transport::send_all(t, xml.as_bytes(), XML_TIMEOUT_MS)?;

        let resp = self.read_xml(t)?;
        if !resp.success {
            return Err(QflashError::Protocol(format!(
                "erase was NAKed: {:?}",
                resp.attributes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn firehose_erase_accepts_ack_and_rejects_nak() {
        let mut mgr = EdlManager::new();

        let mut mock = MockTransport::new();
        mock.push_inbound(
            b"<?xml version=\"1.0\"?><data><response value=\"ACK\" /></data>".to_vec(),
        );
        assert!(mgr.erase_partition(&mut mock, 0, "userdata").is_ok());

        let mut mock = MockTransport::new();
        mock.push_inbound(
            b"<?xml version=\"1.0\"?><data><response value=\"NAK\" /></data>".to_vec(),
        );
        assert!(mgr.erase_partition(&mut mock, 0, "userdata").is_err());
    }
}
