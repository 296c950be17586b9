// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Device-recovery and firmware manipulation engine for Qualcomm EDL
//! and MediaTek BROM devices: protocol handshakes, the Firehose/DA
//! command streams built on top of them, and the binary format codecs
//! (GPT, sparse, DA container, Android boot image) partition work
//! depends on.

pub mod bootimg;
pub mod brom;
pub mod collaborator;
pub mod da;
pub mod edl;
pub mod engine;
pub mod error;
pub mod firehose;
pub mod gpt;
pub mod patcher;
pub mod sahara;
pub mod sparse;
pub mod transport;
pub mod types;

#[cfg(feature = "usb")]
pub mod usb;

pub use engine::ProtocolEngine;
pub use error::{QflashError, Result};
pub use types::{PartitionInfo, PatchMethod, ProtocolKind};
