/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Checksummed partition storage on raw non-volatile memory.
//!
//! Each function module instance owns one named partition, identified by
//! `module_id << 8 | instance`.  The partition table is partition 0 at
//! device offset 0 and is mirrored into RAM at mount time.
//!
//! # Layout
//! ```text
//! 0                                                             device size
//! ┌────────┬──────┬──────────┬──────┬──────────┬──────────────────────────┐
//! │ table  │ free │ part A   │ free │ part B   │ free                     │
//! └────────┴──────┴──────────┴──────┴──────────┴──────────────────────────┘
//! ```
//! Every allocated partition is immediately followed by its own free gap, so
//! `address + size + free` of one partition is the address of the next.
//! Allocation is first-fit over these gaps in table order; deleting a
//! partition folds its size and gap into the gap of its predecessor.
//!
//! # Checksums
//! See [`checksum`].  Handles opened with [`PartitionMode::CHECKSUM_ON_WRITE`]
//! update the stored checksum on every write; other handles recompute it on
//! [`flush`](PartitionStorage::flush) / [`close`](PartitionStorage::close).
//! A mismatch found at open time sets a sticky per-handle flag that blocks
//! reads and writes until [`repair`](PartitionStorage::repair) or
//! [`erase`](PartitionStorage::erase).
//!
//! # Write protection
//! Independent sources ([`WriteProtect`]) are OR-ed together; while any is
//! asserted every mutating operation fails with
//! [`BaseError::StorageProtected`] before touching the device.  Reads are
//! never blocked.

pub mod checksum;
pub mod table;

use std::ops::BitOr;

use tracing::{debug, error, info, warn};

use crate::error::BaseError;
use crate::hal::StorageDevice;
use crate::scheduler::ModuleId;
use table::{PartitionDescriptor, DESCRIPTOR_SIZE, FLAG_ALLOCATED};

/// `module_id << 8 | instance`.
pub type PartitionId = u16;

/// The partition table itself.
pub const TABLE_PARTITION: PartitionId = 0x0000;

/// Scratch id used while a partition is being reallocated.
pub const TEMP_PARTITION: PartitionId = 0xFFFF;

/// Chunk size for checksum scans and partition copies.
const SCAN_CHUNK: usize = 64;

/// Build the partition id of a module instance.
pub fn partition_id(module: ModuleId, instance: u8) -> PartitionId {
    (module as PartitionId) << 8 | instance as PartitionId
}

// ── PartitionMode ─────────────────────────────────────────────────────────────

/// Open / create flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionMode(pub u16);

impl PartitionMode {
    pub const CLOSED: PartitionMode = PartitionMode(0);
    pub const READ: PartitionMode = PartitionMode(0x01);
    pub const WRITE: PartitionMode = PartitionMode(0x02);
    pub const READ_WRITE: PartitionMode = PartitionMode(0x03);
    /// `create`: reuse the partition if it already exists.
    pub const OPEN_EXISTING: PartitionMode = PartitionMode(0x04);
    /// Keep the stored checksum current on every write.
    pub const CHECKSUM_ON_WRITE: PartitionMode = PartitionMode(0x08);

    const ALL: u16 = 0x0F;

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: PartitionMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: PartitionMode) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_valid(self) -> bool {
        self.0 & !Self::ALL == 0
    }
}

impl BitOr for PartitionMode {
    type Output = PartitionMode;

    fn bitor(self, rhs: PartitionMode) -> PartitionMode {
        PartitionMode(self.0 | rhs.0)
    }
}

// ── WriteProtect ──────────────────────────────────────────────────────────────

/// Independent write-protect sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProtect {
    /// External power-loss signal.
    PowerFail = 0x01,
    /// Local supply under-voltage.
    UnderVoltage = 0x02,
    /// Node entering standby.
    Standby = 0x04,
}

// ── Handles ───────────────────────────────────────────────────────────────────

/// Handle of an open partition (its table slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionHandle(u16);

impl PartitionHandle {
    pub fn index(self) -> u16 {
        self.0
    }
}

/// RAM-only state next to each persisted descriptor.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    desc: PartitionDescriptor,
    open: PartitionMode,
    checksum_error: bool,
    modified: bool,
}

impl Slot {
    fn is_active(&self) -> bool {
        !self.desc.is_free()
    }

    fn is_open(&self) -> bool {
        self.open != PartitionMode::CLOSED
    }
}

// ── PartitionStorage ──────────────────────────────────────────────────────────

/// Partition manager over one [`StorageDevice`].
pub struct PartitionStorage {
    device: Box<dyn StorageDevice>,
    slots: Vec<Slot>,
    protection: u8,
}

impl std::fmt::Debug for PartitionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStorage")
            .field("device_size", &self.device.size())
            .field("table_capacity", &self.slots.len())
            .field("protection", &self.protection)
            .finish()
    }
}

impl PartitionStorage {
    // ── Mount / format ────────────────────────────────────────────────────────

    /// Load the partition table from `device`.
    ///
    /// A device without a valid table header is formatted with
    /// `default_partitions` table entries.
    ///
    /// # Errors
    /// [`BaseError::TableCorrupt`] if the header is valid but the partitions
    /// do not tile the device even after free gaps left by an interrupted
    /// table update are repaired; device errors are passed through.
    pub fn mount(
        device: Box<dyn StorageDevice>,
        default_partitions: u16,
    ) -> Result<Self, BaseError> {
        let mut storage = Self {
            device,
            slots: Vec::new(),
            protection: 0,
        };

        let header = storage.read_descriptor(0)?;
        if !storage.header_valid(&header) {
            info!(
                device_size = storage.device.size(),
                partitions = default_partitions,
                "no valid partition table found, formatting"
            );
            storage.format(default_partitions)?;
            return Ok(storage);
        }

        let count = header.size / DESCRIPTOR_SIZE;
        let mut slots = Vec::with_capacity(count as usize);
        for index in 0..count {
            slots.push(Slot {
                desc: storage.read_descriptor(index)?,
                ..Default::default()
            });
        }
        storage.slots = slots;
        storage.recover_layout()?;
        storage.verify_layout()?;

        info!(
            device_size = storage.device.size(),
            table_capacity = count,
            partitions = storage.partitions().len(),
            free = storage.free_space(),
            "partition table mounted"
        );
        Ok(storage)
    }

    /// Erase the whole device and write an empty table with room for
    /// `partition_count` descriptors (the table's own entry included).
    pub fn format(&mut self, partition_count: u16) -> Result<(), BaseError> {
        self.check_writable()?;
        if let Some(slot) = self.slots.iter().find(|s| s.is_open()) {
            return Err(BaseError::PartitionIsOpen { id: slot.desc.id });
        }

        let device_size = self.device.size();
        let table_size = partition_count.max(1) as u32 * DESCRIPTOR_SIZE;
        if table_size > device_size {
            return Err(BaseError::TableTooLarge {
                required: table_size,
                device: device_size,
            });
        }

        self.device.erase(0, device_size)?;
        self.slots = vec![Slot::default(); partition_count.max(1) as usize];
        self.slots[0].desc = PartitionDescriptor {
            id: TABLE_PARTITION,
            flags: FLAG_ALLOCATED,
            address: 0,
            size: table_size,
            free: device_size - table_size,
            checksum: 0,
        };
        self.persist(0)?;

        info!(
            device_size,
            table_capacity = self.slots.len(),
            "storage formatted"
        );
        Ok(())
    }

    /// Give the device back (e.g. to remount it).
    pub fn into_device(self) -> Box<dyn StorageDevice> {
        self.device
    }

    // ── Create / open / close ─────────────────────────────────────────────────

    /// Allocate a zero-filled partition of `size` bytes.
    ///
    /// With [`PartitionMode::OPEN_EXISTING`] an existing partition is
    /// accepted instead, provided it could be opened with `mode` and is at
    /// least `size` bytes; the partition is left closed either way.
    pub fn create(
        &mut self,
        id: PartitionId,
        mode: PartitionMode,
        size: u32,
    ) -> Result<(), BaseError> {
        self.check_writable()?;
        if !mode.is_valid() {
            return Err(BaseError::InvalidMode { mode: mode.bits() });
        }
        if id == TABLE_PARTITION || id == TEMP_PARTITION {
            return Err(BaseError::ReservedPartition { id });
        }

        if self.find(id).is_some() {
            if !mode.contains(PartitionMode::OPEN_EXISTING) {
                return Err(BaseError::PartitionExists { id });
            }
            let handle = self.open(id, mode, size)?;
            return self.close(handle);
        }

        self.allocate(id, size).map(|_| ())
    }

    /// Open an existing partition of at least `min_size` bytes.
    ///
    /// A content checksum mismatch does not fail the call; it marks the
    /// handle (see [`checksum_error`](Self::checksum_error)).
    pub fn open(
        &mut self,
        id: PartitionId,
        mode: PartitionMode,
        min_size: u32,
    ) -> Result<PartitionHandle, BaseError> {
        if !mode.is_valid() || !mode.intersects(PartitionMode::READ_WRITE) {
            return Err(BaseError::InvalidMode { mode: mode.bits() });
        }
        if id == TABLE_PARTITION || id == TEMP_PARTITION {
            return Err(BaseError::ReservedPartition { id });
        }
        let index = self.find(id).ok_or(BaseError::PartitionNotExists { id })?;

        let slot = self.slots[index];
        if slot.is_open() {
            return Err(BaseError::PartitionAlreadyOpen { id });
        }
        if slot.desc.size < min_size {
            return Err(BaseError::PartitionTooSmall {
                id,
                size: slot.desc.size,
                required: min_size,
            });
        }

        let actual = self.compute_checksum(index)?;
        let checksum_error = actual != slot.desc.checksum;
        if checksum_error {
            warn!(
                partition = format_args!("0x{id:04X}"),
                stored = slot.desc.checksum,
                actual,
                "partition checksum mismatch"
            );
        }

        let slot = &mut self.slots[index];
        slot.open = PartitionMode(mode.bits() & !PartitionMode::OPEN_EXISTING.bits());
        slot.checksum_error = checksum_error;
        slot.modified = false;

        debug!(partition = format_args!("0x{id:04X}"), mode = mode.bits(), "partition opened");
        Ok(PartitionHandle(index as u16))
    }

    /// Close `handle`, writing the fresh checksum in lazy mode.
    ///
    /// The handle is closed even if the checksum cannot be written.  While
    /// write protection is asserted that write is refused with
    /// [`BaseError::StorageProtected`], so lazy-mode data written before the
    /// protection reopens with a checksum error.  Call
    /// [`flush`](Self::flush) before protection can hit if that matters.
    pub fn close(&mut self, handle: PartitionHandle) -> Result<(), BaseError> {
        let index = self.open_index(handle)?;
        let result = self.write_lazy_checksum(index);

        let slot = &mut self.slots[index];
        slot.open = PartitionMode::CLOSED;
        slot.modified = false;
        slot.checksum_error = false;
        debug!(partition = format_args!("0x{:04X}", slot.desc.id), "partition closed");
        result
    }

    /// Write the fresh checksum of a lazy-mode handle without closing it.
    pub fn flush(&mut self, handle: PartitionHandle) -> Result<(), BaseError> {
        let index = self.open_index(handle)?;
        self.write_lazy_checksum(index)
    }

    fn write_lazy_checksum(&mut self, index: usize) -> Result<(), BaseError> {
        let slot = self.slots[index];
        if slot.open.contains(PartitionMode::CHECKSUM_ON_WRITE)
            || !slot.modified
            || slot.checksum_error
        {
            return Ok(());
        }
        self.check_writable()?;

        self.slots[index].desc.checksum = self.compute_checksum(index)?;
        self.persist(index)?;
        self.slots[index].modified = false;
        Ok(())
    }

    // ── Content access ────────────────────────────────────────────────────────

    /// Read `buf.len()` bytes at partition offset `address`.
    pub fn read(
        &mut self,
        handle: PartitionHandle,
        address: u32,
        buf: &mut [u8],
    ) -> Result<usize, BaseError> {
        let index = self.open_index(handle)?;
        let slot = self.slots[index];
        if !slot.open.contains(PartitionMode::READ) {
            return Err(BaseError::AccessDenied);
        }
        if slot.checksum_error {
            return Err(BaseError::ChecksumError { id: slot.desc.id });
        }
        Self::check_range(&slot.desc, address, buf.len())?;

        self.device.read(slot.desc.address + address, buf)?;
        Ok(buf.len())
    }

    /// Write `data` at partition offset `address`.
    pub fn write(
        &mut self,
        handle: PartitionHandle,
        address: u32,
        data: &[u8],
    ) -> Result<usize, BaseError> {
        self.check_writable()?;
        let index = self.open_index(handle)?;
        let slot = self.slots[index];
        if !slot.open.contains(PartitionMode::WRITE) {
            return Err(BaseError::AccessDenied);
        }
        if slot.checksum_error {
            return Err(BaseError::ChecksumError { id: slot.desc.id });
        }
        Self::check_range(&slot.desc, address, data.len())?;

        let target = slot.desc.address + address;
        if slot.open.contains(PartitionMode::CHECKSUM_ON_WRITE) {
            let mut old = vec![0u8; data.len()];
            self.device.read(target, &mut old)?;
            self.device.write(target, data)?;
            self.slots[index].desc.checksum =
                checksum::update(slot.desc.checksum, address, &old, data);
            self.persist(index)?;
        } else {
            self.device.write(target, data)?;
        }

        self.slots[index].modified = true;
        Ok(data.len())
    }

    /// Zero the whole partition and store the matching checksum.
    ///
    /// Clears a pending checksum error.
    pub fn erase(&mut self, handle: PartitionHandle) -> Result<(), BaseError> {
        self.check_writable()?;
        let index = self.open_index(handle)?;
        if !self.slots[index].open.contains(PartitionMode::WRITE) {
            return Err(BaseError::AccessDenied);
        }

        let desc = self.slots[index].desc;
        self.device.erase(desc.address, desc.size)?;
        self.slots[index].desc.checksum = checksum::checksum(&[]);
        self.persist(index)?;

        let slot = &mut self.slots[index];
        slot.checksum_error = false;
        slot.modified = false;
        info!(partition = format_args!("0x{:04X}", desc.id), "partition erased");
        Ok(())
    }

    /// Accept the current content: store its checksum and clear the error.
    pub fn repair(&mut self, handle: PartitionHandle) -> Result<(), BaseError> {
        self.check_writable()?;
        let index = self.open_index(handle)?;
        if !self.slots[index].open.contains(PartitionMode::WRITE) {
            return Err(BaseError::AccessDenied);
        }

        self.slots[index].desc.checksum = self.compute_checksum(index)?;
        self.persist(index)?;

        let slot = &mut self.slots[index];
        slot.checksum_error = false;
        slot.modified = false;
        info!(partition = format_args!("0x{:04X}", slot.desc.id), "partition checksum repaired");
        Ok(())
    }

    /// `true` if `handle` carries a sticky checksum error.
    pub fn checksum_error(&self, handle: PartitionHandle) -> Result<bool, BaseError> {
        let index = self.open_index(handle)?;
        Ok(self.slots[index].checksum_error)
    }

    // ── Delete / resize ───────────────────────────────────────────────────────

    /// Remove a closed partition, returning its space to its predecessor.
    pub fn delete(&mut self, id: PartitionId) -> Result<(), BaseError> {
        self.check_writable()?;
        let index = self.closed_index(id)?;
        self.release(index)?;
        info!(partition = format_args!("0x{id:04X}"), "partition deleted");
        Ok(())
    }

    /// Change the size of a closed partition.
    ///
    /// Shrinking always happens in place and fails with
    /// [`BaseError::ChecksumError`] while the stored checksum does not match
    /// the content; repair or erase the partition first.  Growing uses the trailing free
    /// gap when it is large enough and otherwise moves the partition.
    /// Content up to the smaller of both sizes is preserved; added bytes are
    /// zero.
    pub fn resize(&mut self, id: PartitionId, new_size: u32) -> Result<(), BaseError> {
        self.check_writable()?;
        let index = self.closed_index(id)?;
        let desc = self.slots[index].desc;

        if new_size <= desc.size {
            // A mismatch must stay visible after the truncation.
            if self.compute_checksum(index)? != desc.checksum {
                warn!(
                    partition = format_args!("0x{id:04X}"),
                    "refusing to shrink partition with checksum error"
                );
                return Err(BaseError::ChecksumError { id });
            }
            let slot = &mut self.slots[index];
            slot.desc.free += desc.size - new_size;
            slot.desc.size = new_size;
            self.slots[index].desc.checksum = self.compute_checksum(index)?;
            self.persist(index)?;
        } else if desc.free >= new_size - desc.size {
            let grow = new_size - desc.size;
            self.device.erase(desc.end(), grow)?;
            let slot = &mut self.slots[index];
            slot.desc.size = new_size;
            slot.desc.free -= grow;
            self.persist(index)?;
        } else {
            self.reallocate(index, new_size)?;
        }

        info!(
            partition = format_args!("0x{id:04X}"),
            old_size = desc.size,
            new_size,
            "partition resized"
        );
        Ok(())
    }

    /// Move a partition into a fresh allocation of `new_size` bytes.
    fn reallocate(&mut self, index: usize, new_size: u32) -> Result<(), BaseError> {
        let old = self.slots[index].desc;

        // Left over from an interrupted reallocation.
        if let Some(stale) = self.find(TEMP_PARTITION) {
            warn!("removing stale temporary partition");
            self.release(stale)?;
        }

        let temp = self.allocate(TEMP_PARTITION, new_size)?;
        let target = self.slots[temp].desc.address;

        let mut buf = [0u8; SCAN_CHUNK];
        let mut offset = 0;
        while offset < old.size {
            let n = (old.size - offset).min(SCAN_CHUNK as u32) as usize;
            self.device.read(old.address + offset, &mut buf[..n])?;
            self.device.write(target + offset, &buf[..n])?;
            offset += n as u32;
        }

        // Same bytes at the same offsets plus zeros: same checksum.
        self.slots[temp].desc.checksum = old.checksum;
        self.persist(temp)?;

        self.release(index)?;

        self.slots[temp].desc.id = old.id;
        self.persist(temp)?;
        debug!(
            partition = format_args!("0x{:04X}", old.id),
            from = old.address,
            to = target,
            "partition reallocated"
        );
        Ok(())
    }

    // ── Write protection ──────────────────────────────────────────────────────

    pub fn set_write_protect(&mut self, source: WriteProtect, asserted: bool) {
        let before = self.protection;
        if asserted {
            self.protection |= source as u8;
        } else {
            self.protection &= !(source as u8);
        }
        if before != self.protection {
            info!(?source, asserted, mask = self.protection, "storage write protection changed");
        }
    }

    pub fn is_protected(&self) -> bool {
        self.protection != 0
    }

    /// OR of all asserted [`WriteProtect`] sources.
    pub fn write_protection(&self) -> u8 {
        self.protection
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn partition_info(&self, id: PartitionId) -> Option<PartitionDescriptor> {
        self.find(id).map(|i| self.slots[i].desc)
    }

    /// All allocated partitions (table included), in table order.
    pub fn partitions(&self) -> Vec<PartitionDescriptor> {
        self.slots
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.desc)
            .collect()
    }

    pub fn is_open(&self, id: PartitionId) -> bool {
        self.find(id).is_some_and(|i| self.slots[i].is_open())
    }

    /// Total unallocated bytes (not necessarily contiguous).
    pub fn free_space(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.desc.free)
            .sum()
    }

    pub fn device_size(&self) -> u32 {
        self.device.size()
    }

    /// Number of descriptors the table can hold.
    pub fn table_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Recompute the checksum of a partition from its content.
    pub fn content_checksum(&mut self, id: PartitionId) -> Result<u16, BaseError> {
        let index = self.find(id).ok_or(BaseError::PartitionNotExists { id })?;
        self.compute_checksum(index)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn check_writable(&self) -> Result<(), BaseError> {
        if self.is_protected() {
            return Err(BaseError::StorageProtected);
        }
        Ok(())
    }

    fn check_range(desc: &PartitionDescriptor, address: u32, length: usize) -> Result<(), BaseError> {
        if address as u64 + length as u64 > desc.size as u64 {
            return Err(BaseError::OutOfRange {
                address,
                length: length as u32,
                size: desc.size,
            });
        }
        Ok(())
    }

    fn find(&self, id: PartitionId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.is_active() && s.desc.id == id)
    }

    fn open_index(&self, handle: PartitionHandle) -> Result<usize, BaseError> {
        let index = handle.0 as usize;
        match self.slots.get(index) {
            Some(slot) if slot.is_active() && slot.is_open() => Ok(index),
            _ => Err(BaseError::PartitionNotOpen { handle: handle.0 }),
        }
    }

    /// Index of an existing, closed, non-reserved partition.
    fn closed_index(&self, id: PartitionId) -> Result<usize, BaseError> {
        if id == TABLE_PARTITION || id == TEMP_PARTITION {
            return Err(BaseError::ReservedPartition { id });
        }
        let index = self.find(id).ok_or(BaseError::PartitionNotExists { id })?;
        if self.slots[index].is_open() {
            return Err(BaseError::PartitionIsOpen { id });
        }
        Ok(index)
    }

    /// First-fit allocation; returns the new table slot.
    fn allocate(&mut self, id: PartitionId, size: u32) -> Result<usize, BaseError> {
        let slot_index = self
            .slots
            .iter()
            .position(|s| s.desc.is_free())
            .ok_or(BaseError::TableFull)?;
        let donor = self
            .slots
            .iter()
            .position(|s| s.is_active() && s.desc.free >= size)
            .ok_or(BaseError::MemoryFull { size })?;

        let gap = self.slots[donor].desc;
        self.slots[slot_index] = Slot {
            desc: PartitionDescriptor {
                id,
                flags: FLAG_ALLOCATED,
                address: gap.end(),
                size,
                free: gap.free - size,
                checksum: 0,
            },
            ..Default::default()
        };

        // New descriptor first, then shrink the donor.
        self.persist(slot_index)?;
        self.slots[donor].desc.free = 0;
        self.persist(donor)?;
        self.device.erase(gap.end(), size)?;

        info!(
            partition = format_args!("0x{id:04X}"),
            address = gap.end(),
            size,
            "partition created"
        );
        Ok(slot_index)
    }

    /// Drop a descriptor and merge its space into the predecessor.
    fn release(&mut self, index: usize) -> Result<(), BaseError> {
        let desc = self.slots[index].desc;
        let prev = self
            .slots
            .iter()
            .position(|s| s.is_active() && s.desc.end_with_free() == desc.address)
            .ok_or_else(|| {
                error!(
                    partition = format_args!("0x{:04X}", desc.id),
                    "no predecessor found, partition table corrupt"
                );
                BaseError::TableCorrupt
            })?;

        self.slots[index] = Slot::default();
        self.persist(index)?;
        self.slots[prev].desc.free += desc.size + desc.free;
        self.persist(prev)?;
        Ok(())
    }

    fn compute_checksum(&mut self, index: usize) -> Result<u16, BaseError> {
        let desc = self.slots[index].desc;
        let mut buf = [0u8; SCAN_CHUNK];
        let mut sum = 0u16;
        let mut offset = 0;
        while offset < desc.size {
            let n = (desc.size - offset).min(SCAN_CHUNK as u32) as usize;
            self.device.read(desc.address + offset, &mut buf[..n])?;
            sum = sum.wrapping_add(checksum::weight(&buf[..n], offset));
            offset += n as u32;
        }
        Ok(sum)
    }

    fn read_descriptor(&mut self, index: u32) -> Result<PartitionDescriptor, BaseError> {
        let mut raw = [0u8; DESCRIPTOR_SIZE as usize];
        self.device.read(index * DESCRIPTOR_SIZE, &mut raw)?;
        Ok(PartitionDescriptor::decode(&raw))
    }

    fn persist(&mut self, index: usize) -> Result<(), BaseError> {
        let raw = self.slots[index].desc.encode();
        self.device.write(index as u32 * DESCRIPTOR_SIZE, &raw)
    }

    fn header_valid(&self, header: &PartitionDescriptor) -> bool {
        let device_size = self.device.size() as u64;
        header.id == TABLE_PARTITION
            && header.flags & FLAG_ALLOCATED != 0
            && header.address == 0
            && header.size >= DESCRIPTOR_SIZE
            && header.size % DESCRIPTOR_SIZE == 0
            && header.size as u64 + header.free as u64 <= device_size
    }

    /// Repair the free gaps a power loss between two descriptor writes
    /// leaves behind.
    ///
    /// An interrupted allocation leaves the new partition inside its donor's
    /// stale free gap; an interrupted release leaves a hole after the
    /// predecessor.  In both cases the free gap of the lower partition is
    /// set to end where the next partition (or the device) begins.
    /// Overlapping content is left for [`verify_layout`](Self::verify_layout).
    fn recover_layout(&mut self) -> Result<(), BaseError> {
        let mut order: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].is_active())
            .collect();
        order.sort_by_key(|&i| self.slots[i].desc.address);

        let device_size = self.device.size() as u64;
        for (pos, &index) in order.iter().enumerate() {
            let desc = self.slots[index].desc;
            let content_end = desc.address as u64 + desc.size as u64;
            let next_start = order
                .get(pos + 1)
                .map_or(device_size, |&n| self.slots[n].desc.address as u64);
            let end = content_end + desc.free as u64;
            if next_start < content_end || end == next_start {
                continue;
            }

            let free = (next_start - content_end) as u32;
            warn!(
                partition = format_args!("0x{:04X}", desc.id),
                stale_free = desc.free,
                free,
                "repairing free gap left by an interrupted table update"
            );
            self.slots[index].desc.free = free;
            self.persist(index)?;
        }
        Ok(())
    }

    /// Check that the allocated partitions tile the device exactly.
    fn verify_layout(&self) -> Result<(), BaseError> {
        let mut active: Vec<&PartitionDescriptor> = self
            .slots
            .iter()
            .filter(|s| s.is_active())
            .map(|s| &s.desc)
            .collect();
        active.sort_by_key(|d| d.address);

        let mut expected = 0u64;
        for desc in &active {
            if desc.address as u64 != expected {
                error!(
                    partition = format_args!("0x{:04X}", desc.id),
                    address = desc.address,
                    expected,
                    "partition table layout broken"
                );
                return Err(BaseError::TableCorrupt);
            }
            expected = desc.address as u64 + desc.size as u64 + desc.free as u64;
        }
        if expected != self.device.size() as u64 {
            error!(end = expected, device_size = self.device.size(), "partitions do not cover the device");
            return Err(BaseError::TableCorrupt);
        }

        let mut ids: Vec<PartitionId> = active.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != active.len() {
            error!("duplicate partition ids in table");
            return Err(BaseError::TableCorrupt);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::RamStorage;

    const DEVICE_SIZE: u32 = 1024;
    const SLOTS: u16 = 8;
    const TABLE_SIZE: u32 = SLOTS as u32 * DESCRIPTOR_SIZE;
    const RW: PartitionMode = PartitionMode::READ_WRITE;

    fn storage() -> PartitionStorage {
        PartitionStorage::mount(Box::new(RamStorage::new(DEVICE_SIZE)), SLOTS).unwrap()
    }

    fn remount(storage: PartitionStorage) -> PartitionStorage {
        PartitionStorage::mount(storage.into_device(), SLOTS).unwrap()
    }

    fn read_all(s: &mut PartitionStorage, id: PartitionId) -> Vec<u8> {
        let size = s.partition_info(id).unwrap().size;
        let h = s.open(id, PartitionMode::READ, 0).unwrap();
        let mut buf = vec![0u8; size as usize];
        s.read(h, 0, &mut buf).unwrap();
        s.close(h).unwrap();
        buf
    }

    fn assert_tiles_device(s: &PartitionStorage) {
        assert_eq!(s.verify_layout(), Ok(()));
    }

    // ── mount / format ────────────────────────────────────────────────────────

    #[test]
    fn blank_device_is_formatted_on_mount() {
        let s = storage();
        let parts = s.partitions();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].id, TABLE_PARTITION);
        assert_eq!(parts[0].size, TABLE_SIZE);
        assert_eq!(s.free_space(), DEVICE_SIZE - TABLE_SIZE);
        assert_eq!(s.table_capacity(), SLOTS as usize);
    }

    #[test]
    fn table_survives_remount() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        s.create(0x0601, RW, 48).unwrap();
        let before = s.partitions();

        let s = remount(s);
        assert_eq!(s.partitions(), before);
        assert_tiles_device(&s);
    }

    #[test]
    fn broken_address_chain_is_reported_as_corrupt() {
        let mut dev = RamStorage::new(DEVICE_SIZE);
        let header = PartitionDescriptor {
            id: TABLE_PARTITION,
            flags: FLAG_ALLOCATED,
            address: 0,
            size: TABLE_SIZE,
            free: 0,
            checksum: 0,
        };
        // starts inside the table's content
        let orphan = PartitionDescriptor {
            id: 0x0101,
            flags: FLAG_ALLOCATED,
            address: TABLE_SIZE - 8,
            size: 16,
            free: DEVICE_SIZE - TABLE_SIZE - 8,
            checksum: 0,
        };
        dev.write(0, &header.encode()).unwrap();
        dev.write(DESCRIPTOR_SIZE, &orphan.encode()).unwrap();

        let res = PartitionStorage::mount(Box::new(dev), SLOTS);
        assert_eq!(res.err(), Some(BaseError::TableCorrupt));
    }

    #[test]
    fn mount_recovers_allocation_interrupted_before_donor_update() {
        let mut s = storage();
        let table_before = s.partition_info(TABLE_PARTITION).unwrap();
        s.create(0x0501, RW, 32).unwrap();

        // power lost after the new descriptor, before the donor shrank
        let mut dev = s.into_device();
        dev.write(0, &table_before.encode()).unwrap();

        let s = PartitionStorage::mount(dev, SLOTS).unwrap();
        assert_tiles_device(&s);
        assert_eq!(s.partition_info(TABLE_PARTITION).unwrap().free, 0);
        let part = s.partition_info(0x0501).unwrap();
        assert_eq!(part.address, TABLE_SIZE);
        assert_eq!(part.free, DEVICE_SIZE - TABLE_SIZE - 32);

        // the repair is persisted
        let mut s = remount(s);
        assert_eq!(s.partition_info(TABLE_PARTITION).unwrap().free, 0);
        let h = s.open(0x0501, RW, 32).unwrap();
        assert!(!s.checksum_error(h).unwrap());
    }

    #[test]
    fn mount_recovers_release_interrupted_before_predecessor_update() {
        let mut s = storage();
        s.create(0x0101, RW, 40).unwrap();
        s.create(0x0102, RW, 24).unwrap();
        s.create(0x0103, RW, 16).unwrap();
        let b_index = s.find(0x0102).unwrap();

        // power lost after the descriptor was zeroed, before the merge
        let mut dev = s.into_device();
        dev.write(b_index as u32 * DESCRIPTOR_SIZE, &PartitionDescriptor::default().encode())
            .unwrap();

        let s = PartitionStorage::mount(dev, SLOTS).unwrap();
        assert_tiles_device(&s);
        assert!(s.partition_info(0x0102).is_none());
        assert_eq!(s.partition_info(0x0101).unwrap().free, 24);
        assert_eq!(s.free_space(), DEVICE_SIZE - TABLE_SIZE - 40 - 16);
    }

    #[test]
    fn format_rejects_table_larger_than_device() {
        let mut s = storage();
        let count = (DEVICE_SIZE / DESCRIPTOR_SIZE + 1) as u16;
        assert_eq!(
            s.format(count),
            Err(BaseError::TableTooLarge {
                required: count as u32 * DESCRIPTOR_SIZE,
                device: DEVICE_SIZE
            })
        );
        assert_eq!(s.table_capacity(), SLOTS as usize);
    }

    #[test]
    fn format_discards_partitions() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        s.format(4).unwrap();
        assert_eq!(s.partitions().len(), 1);
        assert_eq!(s.table_capacity(), 4);
        assert_eq!(s.free_space(), DEVICE_SIZE - 4 * DESCRIPTOR_SIZE);
    }

    #[test]
    fn format_refuses_while_partition_open() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let _h = s.open(0x0501, RW, 0).unwrap();
        assert_eq!(s.format(4), Err(BaseError::PartitionIsOpen { id: 0x0501 }));
    }

    // ── create ────────────────────────────────────────────────────────────────

    #[test]
    fn create_then_open_has_no_checksum_error() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();

        let h = s.open(0x0501, RW, 32).unwrap();
        assert!(!s.checksum_error(h).unwrap());
        s.close(h).unwrap();

        let h = s.open(0x0501, RW, 32).unwrap();
        assert!(!s.checksum_error(h).unwrap());
    }

    #[test]
    fn create_places_partition_first_fit_and_keeps_tiling() {
        let mut s = storage();
        s.create(0x0101, RW, 100).unwrap();
        s.create(0x0102, RW, 50).unwrap();

        let a = s.partition_info(0x0101).unwrap();
        let b = s.partition_info(0x0102).unwrap();
        let table = s.partition_info(TABLE_PARTITION).unwrap();
        assert_eq!(a.address, TABLE_SIZE);
        assert_eq!(table.free, 0);
        assert_eq!(b.address, a.end());
        assert_eq!(a.free, 0);
        assert_eq!(b.free, DEVICE_SIZE - TABLE_SIZE - 150);
        assert_tiles_device(&s);
    }

    #[test]
    fn create_zero_fills_recycled_space() {
        let mut s = storage();
        s.create(0x0101, RW, 16).unwrap();
        let h = s.open(0x0101, RW, 0).unwrap();
        s.write(h, 0, &[0xAA; 16]).unwrap();
        s.close(h).unwrap();
        s.delete(0x0101).unwrap();

        s.create(0x0102, RW, 16).unwrap();
        assert_eq!(read_all(&mut s, 0x0102), vec![0u8; 16]);
    }

    #[test]
    fn create_existing_fails_without_open_existing() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        assert_eq!(
            s.create(0x0501, RW, 32),
            Err(BaseError::PartitionExists { id: 0x0501 })
        );
        assert!(s
            .create(0x0501, RW | PartitionMode::OPEN_EXISTING, 16)
            .is_ok());
        assert!(!s.is_open(0x0501));
        assert_eq!(
            s.create(0x0501, RW | PartitionMode::OPEN_EXISTING, 64),
            Err(BaseError::PartitionTooSmall {
                id: 0x0501,
                size: 32,
                required: 64
            })
        );
    }

    #[test]
    fn create_reports_memory_full_and_table_full() {
        let mut s = storage();
        assert_eq!(
            s.create(0x0101, RW, DEVICE_SIZE),
            Err(BaseError::MemoryFull { size: DEVICE_SIZE })
        );
        for n in 1..SLOTS {
            s.create(0x0100 + n, RW, 8).unwrap();
        }
        assert_eq!(s.create(0x0200, RW, 8), Err(BaseError::TableFull));
        assert_tiles_device(&s);
    }

    #[test]
    fn reserved_ids_cannot_be_created_or_opened() {
        let mut s = storage();
        assert_eq!(
            s.create(TABLE_PARTITION, RW, 8),
            Err(BaseError::ReservedPartition { id: 0 })
        );
        assert_eq!(
            s.open(TEMP_PARTITION, RW, 0),
            Err(BaseError::ReservedPartition { id: 0xFFFF })
        );
        assert_eq!(
            s.delete(TABLE_PARTITION),
            Err(BaseError::ReservedPartition { id: 0 })
        );
    }

    // ── open / close ──────────────────────────────────────────────────────────

    #[test]
    fn second_open_fails_until_closed() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let h = s.open(0x0501, PartitionMode::READ, 0).unwrap();
        assert_eq!(
            s.open(0x0501, RW, 0),
            Err(BaseError::PartitionAlreadyOpen { id: 0x0501 })
        );
        s.close(h).unwrap();
        assert!(s.open(0x0501, RW, 0).is_ok());
    }

    #[test]
    fn closed_handle_is_rejected() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();
        s.close(h).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            s.read(h, 0, &mut buf),
            Err(BaseError::PartitionNotOpen { handle: h.index() })
        );
        assert!(s.close(h).is_err());
    }

    #[test]
    fn open_validates_mode_and_existence() {
        let mut s = storage();
        assert_eq!(
            s.open(0x0501, RW, 0),
            Err(BaseError::PartitionNotExists { id: 0x0501 })
        );
        s.create(0x0501, RW, 32).unwrap();
        assert_eq!(
            s.open(0x0501, PartitionMode::CHECKSUM_ON_WRITE, 0),
            Err(BaseError::InvalidMode { mode: 0x08 })
        );
        assert_eq!(
            s.open(0x0501, PartitionMode(0x40 | 0x01), 0),
            Err(BaseError::InvalidMode { mode: 0x41 })
        );
    }

    // ── read / write ──────────────────────────────────────────────────────────

    #[test]
    fn write_close_open_read_round_trip() {
        let mut s = storage();
        s.create(0x0501, RW, 64).unwrap();

        let cases: [(u32, &[u8]); 3] = [(0, b"abc"), (60, &[1, 2, 3, 4]), (17, &[0xFF; 9])];
        for (addr, data) in cases {
            let h = s.open(0x0501, RW, 0).unwrap();
            s.write(h, addr, data).unwrap();
            s.close(h).unwrap();

            let h = s.open(0x0501, RW, 0).unwrap();
            assert!(!s.checksum_error(h).unwrap());
            let mut back = vec![0u8; data.len()];
            s.read(h, addr, &mut back).unwrap();
            assert_eq!(back, data);
            s.close(h).unwrap();

            let content = read_all(&mut s, 0x0501);
            assert_eq!(
                s.partition_info(0x0501).unwrap().checksum,
                checksum::checksum(&content)
            );
        }
    }

    #[test]
    fn checksum_on_write_keeps_stored_checksum_current() {
        let mut s = storage();
        s.create(0x0501, RW, 100).unwrap();
        let h = s
            .open(0x0501, RW | PartitionMode::CHECKSUM_ON_WRITE, 0)
            .unwrap();

        s.write(h, 10, &[9, 8, 7]).unwrap();
        s.write(h, 11, &[0x55; 20]).unwrap();
        s.write(h, 99, &[1]).unwrap();

        let stored = s.partition_info(0x0501).unwrap().checksum;
        assert_eq!(stored, s.content_checksum(0x0501).unwrap());
        assert_ne!(stored, 0);
    }

    #[test]
    fn lazy_checksum_is_written_on_flush_and_close() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();

        s.write(h, 0, &[1, 2, 3]).unwrap();
        assert_eq!(s.partition_info(0x0501).unwrap().checksum, 0);

        s.flush(h).unwrap();
        let expected = checksum::checksum(&[1, 2, 3]);
        assert_eq!(s.partition_info(0x0501).unwrap().checksum, expected);

        s.write(h, 3, &[4]).unwrap();
        s.close(h).unwrap();
        assert_eq!(
            s.partition_info(0x0501).unwrap().checksum,
            checksum::checksum(&[1, 2, 3, 4])
        );
    }

    #[test]
    fn access_outside_partition_is_out_of_range() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();
        assert_eq!(
            s.write(h, 30, &[0; 3]),
            Err(BaseError::OutOfRange {
                address: 30,
                length: 3,
                size: 32
            })
        );
        let mut buf = [0u8; 1];
        assert!(s.read(h, 32, &mut buf).is_err());
        assert!(s.read(h, 31, &mut buf).is_ok());
    }

    #[test]
    fn access_mode_is_enforced() {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let h = s.open(0x0501, PartitionMode::READ, 0).unwrap();
        assert_eq!(s.write(h, 0, &[1]), Err(BaseError::AccessDenied));
        assert_eq!(s.erase(h), Err(BaseError::AccessDenied));
        s.close(h).unwrap();

        let h = s.open(0x0501, PartitionMode::WRITE, 0).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(s.read(h, 0, &mut buf), Err(BaseError::AccessDenied));
    }

    // ── checksum errors ───────────────────────────────────────────────────────

    fn corrupted_storage() -> PartitionStorage {
        let mut s = storage();
        s.create(0x0501, RW, 32).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();
        s.write(h, 0, &[1, 2, 3, 4]).unwrap();
        s.close(h).unwrap();

        let address = s.partition_info(0x0501).unwrap().address;
        let mut dev = s.into_device();
        // transpose two bytes
        dev.write(address, &[2, 1]).unwrap();
        PartitionStorage::mount(dev, SLOTS).unwrap()
    }

    #[test]
    fn checksum_error_is_sticky_and_blocks_io() {
        let mut s = corrupted_storage();
        let h = s.open(0x0501, RW, 0).unwrap();
        assert!(s.checksum_error(h).unwrap());

        let mut buf = [0u8; 4];
        let err = BaseError::ChecksumError { id: 0x0501 };
        assert_eq!(s.read(h, 0, &mut buf), Err(err));
        assert_eq!(s.write(h, 0, &[0]), Err(err));
        assert!(s.checksum_error(h).unwrap());

        // close must not paper over the error with a fresh checksum
        s.close(h).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();
        assert!(s.checksum_error(h).unwrap());
    }

    #[test]
    fn repair_accepts_current_content() {
        let mut s = corrupted_storage();
        let h = s.open(0x0501, RW, 0).unwrap();
        s.repair(h).unwrap();
        assert!(!s.checksum_error(h).unwrap());

        let mut buf = [0u8; 4];
        s.read(h, 0, &mut buf).unwrap();
        assert_eq!(buf, [2, 1, 3, 4]);
        s.close(h).unwrap();

        let h = s.open(0x0501, RW, 0).unwrap();
        assert!(!s.checksum_error(h).unwrap());
    }

    #[test]
    fn erase_zeroes_content_and_clears_error() {
        let mut s = corrupted_storage();
        let h = s.open(0x0501, RW, 0).unwrap();
        s.erase(h).unwrap();
        assert!(!s.checksum_error(h).unwrap());
        s.close(h).unwrap();

        assert_eq!(read_all(&mut s, 0x0501), vec![0u8; 32]);
        assert_eq!(s.partition_info(0x0501).unwrap().checksum, 0);
    }

    // ── delete ────────────────────────────────────────────────────────────────

    #[test]
    fn delete_merges_space_into_predecessor() {
        let mut s = storage();
        s.create(0x0101, RW, 100).unwrap();
        s.create(0x0102, RW, 50).unwrap();
        s.create(0x0103, RW, 10).unwrap();

        s.delete(0x0102).unwrap();
        let a = s.partition_info(0x0101).unwrap();
        let c = s.partition_info(0x0103).unwrap();
        assert_eq!(a.free, 50);
        assert_eq!(a.end_with_free(), c.address);
        assert!(s.partition_info(0x0102).is_none());
        assert_tiles_device(&s);

        // the freed gap is reused first-fit
        s.create(0x0104, RW, 40).unwrap();
        assert_eq!(s.partition_info(0x0104).unwrap().address, a.end());
        assert_tiles_device(&s);
    }

    #[test]
    fn delete_requires_closed_partition() {
        let mut s = storage();
        s.create(0x0101, RW, 8).unwrap();
        let h = s.open(0x0101, RW, 0).unwrap();
        assert_eq!(
            s.delete(0x0101),
            Err(BaseError::PartitionIsOpen { id: 0x0101 })
        );
        s.close(h).unwrap();
        s.delete(0x0101).unwrap();
        assert_eq!(s.free_space(), DEVICE_SIZE - TABLE_SIZE);
    }

    // ── resize ────────────────────────────────────────────────────────────────

    fn filled(s: &mut PartitionStorage, id: PartitionId, size: u32) -> Vec<u8> {
        s.create(id, RW, size).unwrap();
        let content: Vec<u8> = (0..size).map(|n| (n % 200 + 1) as u8).collect();
        let h = s.open(id, RW, 0).unwrap();
        s.write(h, 0, &content).unwrap();
        s.close(h).unwrap();
        content
    }

    #[test]
    fn shrink_in_place_recomputes_checksum() {
        let mut s = storage();
        let content = filled(&mut s, 0x0101, 40);
        let before = s.partition_info(0x0101).unwrap();

        s.resize(0x0101, 10).unwrap();
        let after = s.partition_info(0x0101).unwrap();
        assert_eq!(after.address, before.address);
        assert_eq!(after.free, before.free + 30);
        assert_eq!(after.checksum, checksum::checksum(&content[..10]));
        assert_eq!(read_all(&mut s, 0x0101), &content[..10]);
        assert_tiles_device(&s);
    }

    #[test]
    fn shrink_keeps_checksum_error_visible() {
        let mut s = corrupted_storage();
        let before = s.partition_info(0x0501).unwrap();
        assert_eq!(
            s.resize(0x0501, 31),
            Err(BaseError::ChecksumError { id: 0x0501 })
        );
        assert_eq!(s.partition_info(0x0501).unwrap(), before);

        let h = s.open(0x0501, RW, 0).unwrap();
        assert!(s.checksum_error(h).unwrap());
        s.repair(h).unwrap();
        s.close(h).unwrap();

        s.resize(0x0501, 31).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();
        assert!(!s.checksum_error(h).unwrap());
        s.close(h).unwrap();
    }

    #[test]
    fn close_under_protection_drops_lazy_checksum() {
        let mut s = storage();
        s.create(0x0501, RW, 16).unwrap();
        let h = s.open(0x0501, RW, 0).unwrap();
        s.write(h, 0, &[5, 6, 7]).unwrap();

        s.set_write_protect(WriteProtect::PowerFail, true);
        assert_eq!(s.close(h), Err(BaseError::StorageProtected));
        assert!(!s.is_open(0x0501));
        s.set_write_protect(WriteProtect::PowerFail, false);

        let h = s.open(0x0501, RW, 0).unwrap();
        assert!(s.checksum_error(h).unwrap());
        s.close(h).unwrap();
    }

    #[test]
    fn grow_in_place_uses_trailing_gap() {
        let mut s = storage();
        let content = filled(&mut s, 0x0101, 20);
        s.resize(0x0101, 10).unwrap();
        s.resize(0x0101, 30).unwrap();

        let after = s.partition_info(0x0101).unwrap();
        assert_eq!(after.address, TABLE_SIZE);
        let mut expected = content[..10].to_vec();
        expected.resize(30, 0);
        assert_eq!(read_all(&mut s, 0x0101), expected);

        let h = s.open(0x0101, RW, 0).unwrap();
        assert!(!s.checksum_error(h).unwrap());
        s.close(h).unwrap();
        assert_tiles_device(&s);
    }

    #[test]
    fn grow_beyond_gap_reallocates_and_keeps_id_and_content() {
        let mut s = storage();
        let content = filled(&mut s, 0x0101, 20);
        s.create(0x0102, RW, 20).unwrap();
        let old = s.partition_info(0x0101).unwrap();

        s.resize(0x0101, 100).unwrap();

        let moved = s.partition_info(0x0101).unwrap();
        assert_ne!(moved.address, old.address);
        assert_eq!(moved.size, 100);
        assert!(s.partition_info(TEMP_PARTITION).is_none());

        let mut expected = content.clone();
        expected.resize(100, 0);
        assert_eq!(read_all(&mut s, 0x0101), expected);
        let h = s.open(0x0101, RW, 0).unwrap();
        assert!(!s.checksum_error(h).unwrap());
        s.close(h).unwrap();

        assert_tiles_device(&s);
        let s = remount(s);
        assert_eq!(s.partition_info(0x0101).unwrap().address, moved.address);
    }

    #[test]
    fn resize_fails_without_space() {
        let mut s = storage();
        s.create(0x0101, RW, 10).unwrap();
        s.create(0x0102, RW, 10).unwrap();
        assert_eq!(
            s.resize(0x0101, DEVICE_SIZE),
            Err(BaseError::MemoryFull { size: DEVICE_SIZE })
        );
        assert_eq!(s.partition_info(0x0101).unwrap().size, 10);
        assert_tiles_device(&s);
    }

    // ── write protection ──────────────────────────────────────────────────────

    #[test]
    fn protection_blocks_every_mutation_but_not_reads() {
        let mut s = storage();
        filled(&mut s, 0x0101, 16);
        let h = s.open(0x0101, RW, 0).unwrap();

        s.set_write_protect(WriteProtect::UnderVoltage, true);
        let table_before = s.partitions();
        let content_before = {
            let mut buf = vec![0u8; 16];
            s.read(h, 0, &mut buf).unwrap();
            buf
        };

        let p = Err(BaseError::StorageProtected);
        assert_eq!(s.create(0x0102, RW, 8), p);
        assert_eq!(s.write(h, 0, &[0xEE]).map(|_| ()), p);
        assert_eq!(s.erase(h), p);
        assert_eq!(s.repair(h), p);
        assert_eq!(s.delete(0x0101), p);
        assert_eq!(s.resize(0x0101, 4), p);
        assert_eq!(s.format(4), p);

        let mut buf = vec![0u8; 16];
        assert_eq!(s.read(h, 0, &mut buf), Ok(16));
        assert_eq!(buf, content_before);
        assert_eq!(s.partitions(), table_before);

        s.set_write_protect(WriteProtect::UnderVoltage, false);
        assert!(s.write(h, 0, &[0xEE]).is_ok());
    }

    #[test]
    fn protection_sources_are_independent() {
        let mut s = storage();
        s.set_write_protect(WriteProtect::PowerFail, true);
        s.set_write_protect(WriteProtect::Standby, true);
        assert_eq!(s.write_protection(), 0x05);

        s.set_write_protect(WriteProtect::PowerFail, false);
        assert!(s.is_protected());
        s.set_write_protect(WriteProtect::Standby, false);
        assert!(!s.is_protected());
    }

    #[test]
    fn partition_id_packs_module_and_instance() {
        assert_eq!(partition_id(5, 1), 0x0501);
        assert_eq!(partition_id(0xAB, 0xCD), 0xABCD);
    }
}
