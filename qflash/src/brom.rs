// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! MediaTek BROM: the byte-level handshake spoken by the boot ROM, plus
//! the Download Agent command stream that follows once a DA has been
//! uploaded and jumped into.

use crate::error::{QflashError, Result};
use crate::transport::{self, Transport};

const HANDSHAKE_OUT: [u8; 4] = [0xA1, 0xA2, 0xA3, 0xA4];
const DA_ACK: u8 = 0x5A;

const OP_READ32: u8 = 0xD1;
const OP_WRITE32: u8 = 0xD4;
const OP_JUMP_DA: u8 = 0xD5;
const OP_SEND_DA: u8 = 0xD7;

const DA_OP_READ_ERASE_FAMILY: u8 = 0xBD;
const DA_OP_WRITE_FAMILY: u8 = 0xD0;
const DA_SUBOP_READ: u8 = 0x00;
const DA_SUBOP_ERASE: u8 = 0x01;

/// Send one command byte and require it echoed back unmodified before
/// any argument bytes follow.
fn echo_cmd<T: Transport + ?Sized>(t: &mut T, cmd: u8, timeout_ms: u64) -> Result<()> {
    transport::send_all(t, &[cmd], timeout_ms)?;
    let mut echo = [0u8; 1];
    transport::receive_exact(t, &mut echo, timeout_ms)?;
    if echo[0] != cmd {
        return Err(QflashError::Protocol(format!(
            "echo mismatch for command {cmd:#04x}: got {:#04x}",
            echo[0]
        )));
    }
    Ok(())
}

/// The four-byte handshake: send `A1 A2 A3 A4`, expect the bitwise
/// complement of each byte echoed back in turn.
pub fn handshake<T: Transport + ?Sized>(t: &mut T, timeout_ms: u64) -> Result<()> {
    for &byte in &HANDSHAKE_OUT {
        transport::send_all(t, &[byte], timeout_ms)?;
        let mut echo = [0u8; 1];
        transport::receive_exact(t, &mut echo, timeout_ms)?;
        if echo[0] != !byte {
            return Err(QflashError::Protocol(format!(
                "brom handshake mismatch: sent {byte:#04x}, expected echo {:#04x}, got {:#04x}",
                !byte, echo[0]
            )));
        }
    }
    Ok(())
}

/// Read a 32-bit device register.
pub fn read32<T: Transport + ?Sized>(t: &mut T, addr: u32, timeout_ms: u64) -> Result<u32> {
    echo_cmd(t, OP_READ32, timeout_ms)?;
    transport::send_all(t, &addr.to_le_bytes(), timeout_ms)?;
    let mut buf = [0u8; 4];
    transport::receive_exact(t, &mut buf, timeout_ms)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a 32-bit device register.
pub fn write32<T: Transport + ?Sized>(
    t: &mut T,
    addr: u32,
    value: u32,
    timeout_ms: u64,
) -> Result<()> {
    echo_cmd(t, OP_WRITE32, timeout_ms)?;
    transport::send_all(t, &addr.to_le_bytes(), timeout_ms)?;
    transport::send_all(t, &value.to_le_bytes(), timeout_ms)?;
    Ok(())
}

/// Upload a Download Agent to `load_addr` (commonly `0x4000_0000`).
pub fn send_da<T: Transport + ?Sized>(
    t: &mut T,
    load_addr: u32,
    payload: &[u8],
    sig_size: u32,
    timeout_ms: u64,
) -> Result<()> {
    echo_cmd(t, OP_SEND_DA, timeout_ms)?;
    transport::send_all(t, &load_addr.to_le_bytes(), timeout_ms)?;
    transport::send_all(t, &(payload.len() as u32).to_le_bytes(), timeout_ms)?;
    transport::send_all(t, &sig_size.to_le_bytes(), timeout_ms)?;
    transport::send_all(t, payload, timeout_ms)?;
    Ok(())
}

/// Jump to a previously uploaded DA at `addr`. After this call only
/// DA-level commands (below) are valid on the wire.
pub fn jump_da<T: Transport + ?Sized>(t: &mut T, addr: u32, timeout_ms: u64) -> Result<()> {
    echo_cmd(t, OP_JUMP_DA, timeout_ms)?;
    transport::send_all(t, &addr.to_le_bytes(), timeout_ms)?;
    Ok(())
}

fn da_command_packet(opcode: u8, sub_op: u8, offset: u64, count: u32) -> [u8; 16] {
    let mut pkt = [0u8; 16];
    pkt[0] = opcode;
    pkt[1] = sub_op;
    pkt[2..10].copy_from_slice(&offset.to_le_bytes());
    pkt[10..14].copy_from_slice(&count.to_le_bytes());
    pkt
}

fn expect_da_ack<T: Transport + ?Sized>(t: &mut T, timeout_ms: u64) -> Result<()> {
    let mut status = [0u8; 1];
    transport::receive_exact(t, &mut status, timeout_ms)?;
    if status[0] != DA_ACK {
        return Err(QflashError::Protocol(format!(
            "DA status {:#04x}, expected ACK",
            status[0]
        )));
    }
    Ok(())
}

/// Read `count` 512-byte sectors starting at `offset` through the DA.
pub fn da_read<T: Transport + ?Sized>(
    t: &mut T,
    offset: u64,
    count: u32,
    timeout_ms: u64,
) -> Result<Vec<u8>> {
    let pkt = da_command_packet(DA_OP_READ_ERASE_FAMILY, DA_SUBOP_READ, offset, count);
    transport::send_all(t, &pkt, timeout_ms)?;
    let mut buf = vec![0u8; count as usize * 512];
    let mut bar = pbr::ProgressBar::new(buf.len() as u64);
    bar.set_units(pbr::Units::Bytes);
    transport::receive_exact_with_progress(t, &mut buf, timeout_ms, &mut bar)?;
    bar.finish();
    Ok(buf)
}

/// Write `data` starting at sector `offset` through the DA.
pub fn da_write<T: Transport + ?Sized>(
    t: &mut T,
    offset: u64,
    data: &[u8],
    timeout_ms: u64,
) -> Result<()> {
    let count = (data.len() / 512) as u32;
    let pkt = da_command_packet(DA_OP_WRITE_FAMILY, 0, offset, count);
    transport::send_all(t, &pkt, timeout_ms)?;
    let mut bar = pbr::ProgressBar::new(data.len() as u64);
    bar.set_units(pbr::Units::Bytes);
    transport::send_all_with_progress(t, data, timeout_ms, &mut bar)?;
    bar.finish();
    expect_da_ack(t, timeout_ms)
}

/// Erase `count` sectors starting at `offset` through the DA.
pub fn da_erase<T: Transport + ?Sized>(
    t: &mut T,
    offset: u64,
    count: u32,
    timeout_ms: u64,
) -> Result<()> {
    let pkt = da_command_packet(DA_OP_READ_ERASE_FAMILY, DA_SUBOP_ERASE, offset, count);
    transport::send_all(t, &pkt, timeout_ms)?;
    expect_da_ack(t, timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn handshake_succeeds_on_correct_complement() {
        let mut mock = MockTransport::new();
        for b in HANDSHAKE_OUT {
            mock.push_inbound(vec![!b]);
        }
        assert!(handshake(&mut mock, 1000).is_ok());
    }

    #[test]
    fn handshake_fails_and_stops_on_second_byte_mismatch() {
        let mut mock = MockTransport::new();
        mock.push_inbound(vec![!HANDSHAKE_OUT[0]]);
        mock.push_inbound(vec![0x00]); // wrong
        let res = handshake(&mut mock, 1000);
        assert!(res.is_err());
        // Only the first two bytes were ever sent.
        assert_eq!(mock.outbound.len(), 2);
    }

    #[test]
    fn da_write_requires_ack_status() {
        let mut mock = MockTransport::new();
        mock.push_inbound(vec![DA_ACK]);
        let data = vec![0u8; 512];
        assert!(da_write(&mut mock, 0, &data, 1000).is_ok());
    }
}
