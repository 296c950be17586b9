// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Direct-enumeration USB bulk transport for Qualcomm EDL and MediaTek
//! BROM devices.

use std::time::Duration;

use nusb::{
    self, Device, DeviceInfo, MaybeFuture,
    io::{EndpointRead, EndpointWrite},
};

use crate::error::{QflashError, Result};
use crate::transport::{CancelToken, Transport};

const USB_VID_QCOM: u16 = 0x05c6;
const USB_PID_EDL: [u16; 2] = [0x9008 /* EDL */, 0x900e /* Ramdump */];
const USB_VID_MTK: u16 = 0x0e8d;
const USB_PID_BROM: [u16; 2] = [0x0003 /* BROM */, 0x2000 /* preloader */];
const INTF_DESC_PROTO_CODES: [u8; 3] = [0x10, 0x11, 0xFF];

pub struct UsbTransport {
    _dev: Device,
    reader: EndpointRead<nusb::transfer::Bulk>,
    writer: EndpointWrite<nusb::transfer::Bulk>,
    cancel: CancelToken,
}

impl Transport for UsbTransport {
    fn send(&mut self, buf: &[u8], timeout_ms: u64) -> Result<usize> {
        use std::io::Write;
        self.writer
            .set_write_timeout(Duration::from_millis(timeout_ms));
        let n = self
            .writer
            .write(buf)
            .map_err(|e| QflashError::Transport(e.to_string()))?;
        self.writer.submit_end();
        Ok(n)
    }

    fn receive(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        use std::io::Read;
        self.reader
            .set_read_timeout(Duration::from_millis(timeout_ms));
        match self.reader.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(QflashError::Transport(e.to_string())),
        }
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

fn find_usb_handle_by_sn(
    devices: &mut dyn Iterator<Item = DeviceInfo>,
    serial_no: &str,
) -> Result<Device> {
    for d in devices {
        if let Some(prod_str) = d.product_string() {
            if let Some(idx) = prod_str.find("_SN:") {
                let sn = &prod_str[idx + "_SN:".len()..];
                if sn.eq_ignore_ascii_case(serial_no) {
                    return d
                        .open()
                        .wait()
                        .map_err(|e| QflashError::Transport(e.to_string()));
                }
            }
        }
    }
    Err(QflashError::Transport(format!(
        "found no device with serial number {serial_no}"
    )))
}

fn claim_bulk_pair(dev: Device) -> Result<UsbTransport> {
    let cfg_desc = dev
        .active_configuration()
        .map_err(|e| QflashError::Transport(e.to_string()))?;
    let intf_desc = cfg_desc
        .interface_alt_settings()
        .find(|d| {
            d.class() == 0xFF
                && d.subclass() == 0xFF
                && INTF_DESC_PROTO_CODES.contains(&d.protocol())
                && d.num_endpoints() >= 2
        })
        .ok_or_else(|| QflashError::Transport("no matching bulk interface".into()))?;

    let in_ep = intf_desc
        .endpoints()
        .find(|e| {
            e.direction() == nusb::transfer::Direction::In
                && e.transfer_type() == nusb::descriptors::TransferType::Bulk
        })
        .ok_or_else(|| QflashError::Transport("no bulk IN endpoint".into()))?
        .address();
    let out_ep = intf_desc
        .endpoints()
        .find(|e| {
            e.direction() == nusb::transfer::Direction::Out
                && e.transfer_type() == nusb::descriptors::TransferType::Bulk
        })
        .ok_or_else(|| QflashError::Transport("no bulk OUT endpoint".into()))?
        .address();

    let intf = dev
        .detach_and_claim_interface(intf_desc.interface_number())
        .wait()
        .map_err(|e| QflashError::Transport(format!("couldn't claim interface: {e}")))?;

    let mut rd = intf
        .endpoint(in_ep)
        .map_err(|e| QflashError::Transport(e.to_string()))?
        .reader(1024 * 1024);
    let mut wr = intf
        .endpoint(out_ep)
        .map_err(|e| QflashError::Transport(e.to_string()))?
        .writer(1024 * 1024);

    rd.set_read_timeout(Duration::from_secs(10));
    wr.set_write_timeout(Duration::from_secs(10));

    Ok(UsbTransport {
        _dev: dev,
        reader: rd,
        writer: wr,
        cancel: CancelToken::new(),
    })
}

/// Enumerate a device in Qualcomm EDL mode (VID 0x05c6) and claim its bulk pipe.
pub fn open_edl(serial_no: Option<&str>) -> Result<UsbTransport> {
    let mut devices = nusb::list_devices()
        .wait()
        .map_err(|e| QflashError::Transport(e.to_string()))?
        .filter(|d| d.vendor_id() == USB_VID_QCOM && USB_PID_EDL.contains(&d.product_id()));

    let dev = match serial_no {
        Some(s) => find_usb_handle_by_sn(&mut devices, s)?,
        None => devices
            .next()
            .ok_or_else(|| QflashError::Transport("found no devices in EDL mode".into()))?
            .open()
            .wait()
            .map_err(|e| QflashError::Transport(e.to_string()))?,
    };

    claim_bulk_pair(dev)
}

/// Enumerate a device sitting in the MediaTek BROM/preloader and claim its bulk pipe.
pub fn open_brom(serial_no: Option<&str>) -> Result<UsbTransport> {
    let mut devices = nusb::list_devices()
        .wait()
        .map_err(|e| QflashError::Transport(e.to_string()))?
        .filter(|d| d.vendor_id() == USB_VID_MTK && USB_PID_BROM.contains(&d.product_id()));

    let dev = match serial_no {
        Some(s) => find_usb_handle_by_sn(&mut devices, s)?,
        None => devices
            .next()
            .ok_or_else(|| QflashError::Transport("found no devices in BROM mode".into()))?
            .open()
            .wait()
            .map_err(|e| QflashError::Transport(e.to_string()))?,
    };

    claim_bulk_pair(dev)
}
