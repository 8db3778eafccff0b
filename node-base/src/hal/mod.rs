/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Hardware abstraction consumed by the base module.
//!
//! Only the surface the base module needs is modelled: raw CAN frame I/O with
//! a transmit-ready interrupt, raw byte-addressed non-volatile storage, and a
//! monotonic millisecond clock.  [`sim`] provides hosted implementations used
//! by the simulator binary and the tests.

pub mod sim;

use crate::can::CanMessage;
use crate::error::BaseError;

// ── CAN controller ────────────────────────────────────────────────────────────

/// One hardware acceptance filter.
///
/// A frame passes when `frame.id & mask == id & mask`; with `remote_only`
/// set, only remote-request frames pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptanceFilter {
    pub id: u32,
    pub mask: u32,
    pub remote_only: bool,
}

impl AcceptanceFilter {
    pub fn matches(&self, msg: &CanMessage) -> bool {
        (msg.id.raw() & self.mask) == (self.id & self.mask) && (!self.remote_only || msg.remote)
    }
}

/// Raw CAN controller.
///
/// Called from both the main loop and interrupt context; the transport
/// serialises every access.
pub trait CanController: Send {
    /// Replace the acceptance filter set.
    fn set_filters(&mut self, filters: &[AcceptanceFilter]) -> Result<(), BaseError>;

    /// `true` while received frames wait in the hardware FIFO.
    fn rx_pending(&self) -> bool;

    /// Take the oldest received frame from the hardware FIFO.
    fn receive(&mut self) -> Option<CanMessage>;

    /// `true` if the transmit mailbox can take another frame.
    fn tx_ready(&self) -> bool;

    /// `true` once every frame handed to the mailbox has left it.
    fn tx_idle(&self) -> bool;

    /// Hand a frame to the transmit mailbox; `false` if it is full.
    fn transmit(&mut self, msg: &CanMessage) -> bool;

    /// Enable or disable the transmit-ready interrupt.
    fn set_tx_interrupt(&mut self, enabled: bool);

    fn tx_interrupt_enabled(&self) -> bool;
}

// ── Storage device ────────────────────────────────────────────────────────────

/// Raw byte-addressed non-volatile storage.
///
/// Erased bytes read back as zero.
pub trait StorageDevice: Send {
    /// Device capacity in bytes.
    fn size(&self) -> u32;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), BaseError>;

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), BaseError>;

    fn erase(&mut self, address: u32, length: u32) -> Result<(), BaseError>;
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
