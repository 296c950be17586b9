// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Protocol engine: probes a freshly attached device, decides whether
//! it's speaking Qualcomm EDL or MediaTek BROM, and presents one
//! partition-level API regardless of which it picked.

use crate::edl::EdlManager;
use crate::error::{QflashError, Result};
use crate::gpt;
use crate::transport::Transport;
use crate::types::{PartitionInfo, ProtocolKind};

const GPT_SECTOR_SIZE: u64 = 512;
const HANDSHAKE_TIMEOUT_MS: u64 = 1500;
const DEFAULT_DA_LOAD_ADDR: u32 = 0x4000_0000;

pub struct ProtocolEngine {
    kind: Option<ProtocolKind>,
    edl: EdlManager,
    partitions: Option<Vec<PartitionInfo>>,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self {
            kind: None,
            edl: EdlManager::new(),
            partitions: None,
        }
    }
}

impl ProtocolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> Option<ProtocolKind> {
        self.kind
    }

    /// Probe BROM first, then Sahara. This order is load-bearing: a
    /// failed Sahara probe can leave a Qualcomm device hung mid-hello,
    /// whereas a failed BROM handshake is synchronous and harmless to
    /// retry, so it goes first.
    pub fn identify<T: Transport + ?Sized>(&mut self, t: &mut T) -> Result<bool> {
        if crate::brom::handshake(t, HANDSHAKE_TIMEOUT_MS).is_ok() {
            self.kind = Some(ProtocolKind::MediaTek);
            return Ok(true);
        }

        if crate::sahara::connect(t, HANDSHAKE_TIMEOUT_MS).is_ok() {
            self.kind = Some(ProtocolKind::Qualcomm);
            return Ok(true);
        }

        Ok(false)
    }

    /// Complete the Qualcomm side of identification: stream the
    /// Firehose programmer over the already-established Sahara channel
    /// and perform the Firehose `<configure>` handshake.
    pub fn load_qualcomm_programmer<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        programmer: &[u8],
    ) -> Result<()> {
        self.require_kind(ProtocolKind::Qualcomm)?;
        let final_state = crate::sahara::stream_programmer(t, programmer, 10_000)?;
        if final_state != crate::sahara::SaharaState::Done {
            return Err(QflashError::Protocol("programmer upload incomplete".into()));
        }
        self.edl.firehose_handshake(t)
    }

    /// Complete the MediaTek side: upload a DA to `load_addr` and jump
    /// to it. Only DA-level commands are valid afterwards.
    pub fn load_mediatek_da<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        da_image: &[u8],
        load_addr: Option<u32>,
    ) -> Result<()> {
        self.require_kind(ProtocolKind::MediaTek)?;
        if !crate::da::validate(da_image) {
            return Err(QflashError::Format("not a valid DA container".into()));
        }
        let addr = load_addr.unwrap_or(DEFAULT_DA_LOAD_ADDR);
        crate::brom::send_da(t, addr, da_image, 0, 10_000)?;
        crate::brom::jump_da(t, addr, 1500)?;
        Ok(())
    }

    fn require_kind(&self, expected: ProtocolKind) -> Result<()> {
        match self.kind {
            Some(k) if k == expected => Ok(()),
            Some(_) => Err(QflashError::Protocol(
                "operation doesn't match identified protocol".into(),
            )),
            None => Err(QflashError::NotIdentified),
        }
    }

    fn require_identified(&self) -> Result<ProtocolKind> {
        self.kind.ok_or(QflashError::NotIdentified)
    }

    /// Read the primary GPT header and entry array and cache the result.
    pub fn get_partitions<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
    ) -> Result<&[PartitionInfo]> {
        let kind = self.require_identified()?;

        let header_bytes = match kind {
            ProtocolKind::Qualcomm => self.edl.read_partition(t, 0, 1, 1)?,
            ProtocolKind::MediaTek => crate::brom::da_read(t, 1, 1, 10_000)?,
        };
        let header = gpt::parse_header(&header_bytes)?;

        let entry_sectors =
            (header.num_partition_entries as u64 * header.size_of_partition_entry as u64)
                .div_ceil(GPT_SECTOR_SIZE);
        let entry_bytes = match kind {
            ProtocolKind::Qualcomm => {
                self.edl
                    .read_partition(t, 0, header.partition_entry_lba, entry_sectors)?
            }
            ProtocolKind::MediaTek => {
                crate::brom::da_read(t, header.partition_entry_lba, entry_sectors as u32, 10_000)?
            }
        };

        let partitions = gpt::parse_entries(&entry_bytes, &header, GPT_SECTOR_SIZE)?;
        self.partitions = Some(partitions);
        Ok(self.partitions.as_deref().unwrap())
    }

    fn find_partition(&self, name: &str) -> Result<&PartitionInfo> {
        self.partitions
            .as_ref()
            .and_then(|p| p.iter().find(|p| p.name == name))
            .ok_or_else(|| QflashError::Format(format!("no such partition: {name}")))
    }

    /// Dump `name` in full.
    pub fn dump_partition<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        name: &str,
    ) -> Result<Vec<u8>> {
        let kind = self.require_identified()?;
        let part = self.find_partition(name)?.clone();
        let sectors = part.sector_count(GPT_SECTOR_SIZE);

        match kind {
            ProtocolKind::Qualcomm => self.edl.read_partition(t, 0, part.start_lba, sectors),
            ProtocolKind::MediaTek => crate::brom::da_read(t, part.start_lba, sectors as u32, 10_000),
        }
    }

    /// Overwrite `name` with `data`. `data` must not exceed the
    /// partition's size.
    pub fn flash_partition<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        name: &str,
        data: &[u8],
    ) -> Result<()> {
        let kind = self.require_identified()?;
        let part = self.find_partition(name)?.clone();
        if data.len() as u64 > part.size_in_bytes {
            return Err(QflashError::Format(format!(
                "image is {} bytes, partition {name} is only {} bytes",
                data.len(),
                part.size_in_bytes
            )));
        }

        match kind {
            ProtocolKind::Qualcomm => self.edl.write_partition(t, 0, part.start_lba, data),
            ProtocolKind::MediaTek => crate::brom::da_write(t, part.start_lba, data, 10_000),
        }
    }

    /// Erase `name` outright.
    pub fn erase_partition<T: Transport + ?Sized>(&mut self, t: &mut T, name: &str) -> Result<()> {
        let kind = self.require_identified()?;
        let part = self.find_partition(name)?.clone();

        match kind {
            ProtocolKind::Qualcomm => self.edl.erase_partition(t, 0, name),
            ProtocolKind::MediaTek => {
                let sectors = part.sector_count(GPT_SECTOR_SIZE) as u32;
                crate::brom::da_erase(t, part.start_lba, sectors, 10_000)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn unidentified_session_rejects_partition_ops_without_transport_traffic() {
        let mut engine = ProtocolEngine::new();
        let mut mock = MockTransport::new();

        let result = engine.dump_partition(&mut mock, "boot");
        assert!(matches!(result, Err(QflashError::NotIdentified)));
        assert!(mock.outbound.is_empty());
    }

    #[test]
    fn identify_prefers_brom_over_sahara() {
        let mut engine = ProtocolEngine::new();
        let mut mock = MockTransport::new();
        for b in [0xA1u8, 0xA2, 0xA3, 0xA4] {
            mock.push_inbound(vec![!b]);
        }

        assert!(engine.identify(&mut mock).unwrap());
        assert_eq!(engine.kind(), Some(ProtocolKind::MediaTek));
    }
}
