/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Persisted partition descriptor layout.
//!
//! The table lives at device offset 0 and is itself partition 0.  Each entry
//! is [`DESCRIPTOR_SIZE`] bytes, little-endian:
//!
//! | Offset | Field | Type |
//! |---|---|---|
//! | 0 | id | u16 |
//! | 2 | flags | u16 |
//! | 4 | address | u32 |
//! | 8 | size | u32 |
//! | 12 | free | u32 |
//! | 16 | checksum | u16 |
//! | 18 | reserved | u16 |

use super::PartitionId;

pub const DESCRIPTOR_SIZE: u32 = 20;

/// Set in `flags` of every allocated descriptor.
pub const FLAG_ALLOCATED: u16 = 0x8000;

/// One partition table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionDescriptor {
    pub id: PartitionId,
    pub flags: u16,
    /// Device offset of the first content byte.
    pub address: u32,
    /// Content size in bytes.
    pub size: u32,
    /// Unallocated bytes directly following the content.
    pub free: u32,
    pub checksum: u16,
}

impl PartitionDescriptor {
    /// A zeroed descriptor marks a reusable table slot.
    pub fn is_free(&self) -> bool {
        self.size == 0 && self.flags == 0
    }

    /// Device offset one past the content.
    pub fn end(&self) -> u32 {
        self.address + self.size
    }

    /// Device offset one past the trailing free gap.
    pub fn end_with_free(&self) -> u32 {
        self.address + self.size + self.free
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE as usize] {
        let mut raw = [0u8; DESCRIPTOR_SIZE as usize];
        raw[0..2].copy_from_slice(&self.id.to_le_bytes());
        raw[2..4].copy_from_slice(&self.flags.to_le_bytes());
        raw[4..8].copy_from_slice(&self.address.to_le_bytes());
        raw[8..12].copy_from_slice(&self.size.to_le_bytes());
        raw[12..16].copy_from_slice(&self.free.to_le_bytes());
        raw[16..18].copy_from_slice(&self.checksum.to_le_bytes());
        raw
    }

    pub fn decode(raw: &[u8; DESCRIPTOR_SIZE as usize]) -> Self {
        let u16_at = |o: usize| u16::from_le_bytes([raw[o], raw[o + 1]]);
        let u32_at = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
        Self {
            id: u16_at(0),
            flags: u16_at(2),
            address: u32_at(4),
            size: u32_at(8),
            free: u32_at(12),
            checksum: u16_at(16),
        }
    }
}
