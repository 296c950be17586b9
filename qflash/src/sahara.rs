// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Sahara: the framed protocol Qualcomm EDL devices speak before a
//! Firehose programmer has been uploaded.

use crate::error::{QflashError, Result};
use crate::transport::{self, Transport};

const FRAME_HEADER_LEN: usize = 8;
const HELLO_RESPONSE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SaharaCommand {
    Hello = 0x01,
    HelloResponse = 0x02,
    Read = 0x03,
    Write = 0x04,
    Done = 0x05,
    Reset = 0x07,
}

impl SaharaCommand {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloResponse),
            0x03 => Some(Self::Read),
            0x04 => Some(Self::Write),
            0x05 => Some(Self::Done),
            0x07 => Some(Self::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaharaState {
    Idle,
    AwaitingHello,
    HelloReceived,
    HelloResponseSent,
    ProgrammerStreaming,
    Done,
}

pub struct SaharaFrame {
    pub command: SaharaCommand,
    pub body: Vec<u8>,
}

fn read_frame<T: Transport + ?Sized>(t: &mut T, timeout_ms: u64) -> Result<SaharaFrame> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    transport::receive_exact(t, &mut header, timeout_ms)?;

    let cmd = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let total_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    if total_len < FRAME_HEADER_LEN {
        return Err(QflashError::Protocol(format!(
            "sahara frame length {total_len} shorter than header"
        )));
    }

    let command = SaharaCommand::from_u32(cmd)
        .ok_or_else(|| QflashError::Protocol(format!("unknown sahara command {cmd:#x}")))?;

    let mut body = vec![0u8; total_len - FRAME_HEADER_LEN];
    transport::receive_exact(t, &mut body, timeout_ms)?;

    Ok(SaharaFrame { command, body })
}

fn write_frame<T: Transport + ?Sized>(
    t: &mut T,
    command: SaharaCommand,
    body: &[u8],
    timeout_ms: u64,
) -> Result<()> {
    let total_len = (FRAME_HEADER_LEN + body.len()) as u32;
    let mut frame = Vec::with_capacity(total_len as usize);
    frame.extend_from_slice(&(command as u32).to_le_bytes());
    frame.extend_from_slice(&total_len.to_le_bytes());
    frame.extend_from_slice(body);
    transport::send_all(t, &frame, timeout_ms)?;
    Ok(())
}

/// The fixed 8-word HelloResponse body every device expects, regardless
/// of what it advertised in its Hello.
fn hello_response_body() -> [u8; HELLO_RESPONSE_LEN] {
    let mut body = [0u8; HELLO_RESPONSE_LEN];
    body[0..4].copy_from_slice(&1u32.to_le_bytes()); // version
    body[4..8].copy_from_slice(&1u32.to_le_bytes()); // version_min
    body[8..12].copy_from_slice(&0x30u32.to_le_bytes()); // max_len
    body[12..16].copy_from_slice(&2u32.to_le_bytes()); // mode
    // reserved[4] stays zero.
    body
}

/// Run the handshake through to `HelloResponseSent`. Returns the final
/// state reached; callers that need to stream a programmer continue
/// servicing `Read` requests themselves via [`stream_programmer`].
pub fn connect<T: Transport + ?Sized>(t: &mut T, timeout_ms: u64) -> Result<SaharaState> {
    let frame = read_frame(t, timeout_ms)?;
    if frame.command != SaharaCommand::Hello {
        return Err(QflashError::Protocol(format!(
            "expected Hello, got {:?}",
            frame.command
        )));
    }

    write_frame(
        t,
        SaharaCommand::HelloResponse,
        &hello_response_body(),
        timeout_ms,
    )?;

    Ok(SaharaState::HelloResponseSent)
}

/// Service `Read` requests against `programmer`, sending the bytes the
/// device asks for until it signals `Done`.
pub fn stream_programmer<T: Transport + ?Sized>(
    t: &mut T,
    programmer: &[u8],
    timeout_ms: u64,
) -> Result<SaharaState> {
    loop {
        let frame = read_frame(t, timeout_ms)?;
        match frame.command {
            SaharaCommand::Read => {
                if frame.body.len() < 8 {
                    return Err(QflashError::Protocol("malformed Read request".into()));
                }
                let offset = u32::from_le_bytes(frame.body[0..4].try_into().unwrap()) as usize;
                let length = u32::from_le_bytes(frame.body[4..8].try_into().unwrap()) as usize;
                let end = (offset + length).min(programmer.len());
                let chunk = if offset < programmer.len() {
                    &programmer[offset..end]
                } else {
                    &[]
                };
                transport::send_all(t, chunk, timeout_ms)?;
            }
            SaharaCommand::Done => {
                write_frame(t, SaharaCommand::Done, &[], timeout_ms)?;
                return Ok(SaharaState::Done);
            }
            other => {
                return Err(QflashError::Protocol(format!(
                    "unexpected sahara command during streaming: {other:?}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn hello_frame() -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&1u32.to_le_bytes());
        f.extend_from_slice(&(FRAME_HEADER_LEN as u32).to_le_bytes());
        f
    }

    #[test]
    fn hello_response_is_exactly_40_bytes() {
        let mut mock = MockTransport::new();
        mock.push_inbound(hello_frame());

        let state = connect(&mut mock, 1000).unwrap();
        assert_eq!(state, SaharaState::HelloResponseSent);

        let sent = &mock.outbound[0];
        assert_eq!(sent.len(), FRAME_HEADER_LEN + HELLO_RESPONSE_LEN);
    }

    #[test]
    fn rejects_non_hello_first_frame() {
        let mut mock = MockTransport::new();
        let mut f = Vec::new();
        f.extend_from_slice(&(SaharaCommand::Done as u32).to_le_bytes());
        f.extend_from_slice(&(FRAME_HEADER_LEN as u32).to_le_bytes());
        mock.push_inbound(f);

        assert!(matches!(connect(&mut mock, 1000), Err(QflashError::Protocol(_))));
    }

    #[test]
    fn hello_timeout_leaves_session_unidentified() {
        let mut mock = MockTransport::new();
        assert!(matches!(connect(&mut mock, 1000), Err(QflashError::Transport(_))));
    }
}
