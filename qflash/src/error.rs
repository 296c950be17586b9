// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

use std::fmt;

/// Everything a caller of this crate can get back. Kept as a flat enum
/// rather than per-module types so the CLI and FFI edges have one thing
/// to match on.
#[derive(Debug)]
pub enum QflashError {
    /// The bulk pipe itself misbehaved: timeout, short transfer, lost handle.
    Transport(String),
    /// A protocol state machine saw something it didn't expect. Always
    /// session-fatal: the caller must close and reopen.
    Protocol(String),
    /// A binary structure failed to parse: bad magic, bad CRC, truncated,
    /// unsupported version. Never session-fatal.
    Format(String),
    /// Called a partition operation before `identify()` succeeded.
    NotIdentified,
    /// Cooperative cancellation took effect at a chunk boundary.
    Cancelled,
    /// Local filesystem I/O (boot images, dump/flash targets) failed.
    Io(std::io::Error),
}

impl fmt::Display for QflashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QflashError::Transport(msg) => write!(f, "transport: {msg}"),
            QflashError::Protocol(msg) => write!(f, "protocol: {msg}"),
            QflashError::Format(msg) => write!(f, "format: {msg}"),
            QflashError::NotIdentified => write!(f, "device not identified"),
            QflashError::Cancelled => write!(f, "operation cancelled"),
            QflashError::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for QflashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QflashError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QflashError {
    fn from(e: std::io::Error) -> Self {
        QflashError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, QflashError>;
