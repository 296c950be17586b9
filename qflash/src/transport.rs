// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! The abstract byte pipe every protocol driver talks over.
//!
//! Real devices show up as a bulk USB endpoint pair; tests use an
//! in-memory queue. Both sides of a session only ever see this trait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{QflashError, Result};

/// Chunk size above which `send`/`receive` split a transfer internally.
pub const MAX_CHUNK: usize = 16 * 1024;

/// Cooperative cancellation handle for one device session. Cloning
/// shares the same underlying flag -- a caller holding one can call
/// [`CancelToken::cancel`] while another thread or callback is deep in
/// a chunked transfer; the next chunk boundary inside `send_all`/
/// `receive_exact` observes it and aborts with `QflashError::Cancelled`.
///
/// There's no partial-commit story here: per the session's concurrency
/// model, a cancelled flash just stops where it is.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session cancelled. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Transport {
    /// Write `buf` to the device, honoring `timeout_ms`. Returns the number
    /// of bytes actually transferred; a short write is not retried here.
    fn send(&mut self, buf: &[u8], timeout_ms: u64) -> Result<usize>;

    /// Read up to `buf.len()` bytes from the device. Returns 0 on timeout
    /// (not an error at this layer -- callers decide what a timeout means).
    fn receive(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;

    /// Release any device-held resources (e.g. a claimed USB interface).
    fn close(&mut self) -> Result<()>;

    /// This session's cancellation handle. Cloning it out and calling
    /// `cancel()` on the clone is how a caller aborts an in-flight
    /// chunked transfer from outside the call that's blocked in it.
    fn cancel_token(&self) -> CancelToken;
}

/// Send the whole buffer, chunked at [`MAX_CHUNK`], surfacing a short
/// final transfer as-is (no retry). Aborts with `Cancelled` if `t`'s
/// cancel token is set at a chunk boundary.
pub fn send_all<T: Transport + ?Sized>(t: &mut T, buf: &[u8], timeout_ms: u64) -> Result<usize> {
    let cancel = t.cancel_token();
    let mut sent = 0;
    for chunk in buf.chunks(MAX_CHUNK) {
        if cancel.is_cancelled() {
            return Err(QflashError::Cancelled);
        }
        let n = t.send(chunk, timeout_ms)?;
        sent += n;
        if n < chunk.len() {
            break;
        }
    }
    Ok(sent)
}

/// Read exactly `buf.len()` bytes, chunked at [`MAX_CHUNK`]. Returns
/// `Transport` error if the device stops producing data before the
/// buffer is filled, or `Cancelled` if `t`'s cancel token is set at a
/// chunk boundary.
pub fn receive_exact<T: Transport + ?Sized>(
    t: &mut T,
    buf: &mut [u8],
    timeout_ms: u64,
) -> Result<()> {
    let cancel = t.cancel_token();
    let mut filled = 0;
    while filled < buf.len() {
        if cancel.is_cancelled() {
            return Err(QflashError::Cancelled);
        }
        let end = std::cmp::min(filled + MAX_CHUNK, buf.len());
        let n = t.receive(&mut buf[filled..end], timeout_ms)?;
        if n == 0 {
            return Err(QflashError::Transport(format!(
                "short read: wanted {} more bytes, device stopped",
                buf.len() - filled
            )));
        }
        filled += n;
    }
    Ok(())
}

/// Like [`send_all`], but advances `bar` by every chunk sent. Used for
/// partition-sized payloads (`edl::write_partition`, `brom::da_write`)
/// where a human is watching; framing-sized sends (a few bytes of
/// Sahara/BROM header) go through the plain `send_all` instead.
pub fn send_all_with_progress<T: Transport + ?Sized>(
    t: &mut T,
    buf: &[u8],
    timeout_ms: u64,
    bar: &mut pbr::ProgressBar<std::io::Stdout>,
) -> Result<usize> {
    let cancel = t.cancel_token();
    let mut sent = 0;
    for chunk in buf.chunks(MAX_CHUNK) {
        if cancel.is_cancelled() {
            return Err(QflashError::Cancelled);
        }
        let n = t.send(chunk, timeout_ms)?;
        sent += n;
        bar.add(n as u64);
        if n < chunk.len() {
            break;
        }
    }
    Ok(sent)
}

/// Like [`receive_exact`], but advances `bar` by every chunk received.
pub fn receive_exact_with_progress<T: Transport + ?Sized>(
    t: &mut T,
    buf: &mut [u8],
    timeout_ms: u64,
    bar: &mut pbr::ProgressBar<std::io::Stdout>,
) -> Result<()> {
    let cancel = t.cancel_token();
    let mut filled = 0;
    while filled < buf.len() {
        if cancel.is_cancelled() {
            return Err(QflashError::Cancelled);
        }
        let end = std::cmp::min(filled + MAX_CHUNK, buf.len());
        let n = t.receive(&mut buf[filled..end], timeout_ms)?;
        if n == 0 {
            return Err(QflashError::Transport(format!(
                "short read: wanted {} more bytes, device stopped",
                buf.len() - filled
            )));
        }
        filled += n;
        bar.add(n as u64);
    }
    Ok(())
}

/// An in-memory transport for unit tests: a scripted sequence of inbound
/// frames and a recording of everything sent to it.
#[derive(Default)]
pub struct MockTransport {
    pub inbound: std::collections::VecDeque<Vec<u8>>,
    pub outbound: Vec<Vec<u8>>,
    pub closed: bool,
    cancel: CancelToken,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be handed back on the next `receive` call(s).
    pub fn push_inbound(&mut self, frame: impl Into<Vec<u8>>) {
        self.inbound.push_back(frame.into());
    }
}

impl Transport for MockTransport {
    fn send(&mut self, buf: &[u8], _timeout_ms: u64) -> Result<usize> {
        self.outbound.push(buf.to_vec());
        Ok(buf.len())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout_ms: u64) -> Result<usize> {
        let Some(front) = self.inbound.front_mut() else {
            return Ok(0);
        };
        let n = std::cmp::min(buf.len(), front.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            self.inbound.pop_front();
        }
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_all_aborts_at_the_next_chunk_boundary_once_cancelled() {
        let mut mock = MockTransport::new();
        let token = mock.cancel_token();
        token.cancel();

        let buf = vec![0u8; MAX_CHUNK * 3];
        let result = send_all(&mut mock, &buf, 1000);
        assert!(matches!(result, Err(QflashError::Cancelled)));
        assert!(mock.outbound.is_empty());
    }

    #[test]
    fn receive_exact_aborts_once_cancelled() {
        let mut mock = MockTransport::new();
        mock.push_inbound(vec![0u8; 8]);
        let token = mock.cancel_token();
        token.cancel();

        let mut buf = vec![0u8; 8];
        let result = receive_exact(&mut mock, &mut buf, 1000);
        assert!(matches!(result, Err(QflashError::Cancelled)));
    }

    #[test]
    fn uncancelled_transfers_proceed_normally() {
        let mut mock = MockTransport::new();
        mock.push_inbound(vec![1, 2, 3, 4]);
        let mut buf = vec![0u8; 4];
        receive_exact(&mut mock, &mut buf, 1000).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }
}
