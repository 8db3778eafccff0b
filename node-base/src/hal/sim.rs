/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Hosted HAL back-ends.
//!
//! * [`SimCanController`] – in-memory controller; clones share one state so
//!   a test (or the simulator) can inject frames and inspect transmissions
//!   while the transport owns another clone.
//! * [`RamStorage`] / [`FileStorage`] – volatile and file-backed storage.
//! * [`SystemClock`] / [`ManualClock`] – real and test-driven time.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::{AcceptanceFilter, CanController, Clock, StorageDevice};
use crate::can::CanMessage;
use crate::error::BaseError;

// ── SimCanController ──────────────────────────────────────────────────────────

/// Receive FIFO depth of the simulated controller.
pub const SIM_RX_FIFO_DEPTH: usize = 32;

/// Transmit mailbox depth of the simulated controller.
pub const SIM_TX_MAILBOXES: usize = 3;

/// Acceptance filter banks of the simulated controller.
pub const SIM_FILTER_BANKS: usize = 4;

#[derive(Debug, Default)]
struct SimCanState {
    filters: Vec<AcceptanceFilter>,
    rx_fifo: VecDeque<CanMessage>,
    mailbox: VecDeque<CanMessage>,
    stalled: bool,
    sent: Vec<CanMessage>,
    tx_interrupt: bool,
    rx_overruns: u64,
}

/// Simulated CAN controller.
///
/// While not stalled, frames handed to the mailbox go straight onto the
/// "bus" (the sent log).  While stalled they wait in the mailbox, which
/// holds at most [`SIM_TX_MAILBOXES`] frames.
#[derive(Debug, Clone, Default)]
pub struct SimCanController {
    state: Arc<Mutex<SimCanState>>,
}

impl SimCanController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a frame from the bus.  Returns `false` if the acceptance
    /// filters rejected it or the hardware FIFO overran.
    pub fn inject(&self, msg: CanMessage) -> bool {
        let mut st = self.state.lock();
        if !st.filters.is_empty() && !st.filters.iter().any(|f| f.matches(&msg)) {
            debug!(id = %msg.id, "sim: frame rejected by acceptance filters");
            return false;
        }
        if st.rx_fifo.len() >= SIM_RX_FIFO_DEPTH {
            st.rx_overruns += 1;
            return false;
        }
        st.rx_fifo.push_back(msg);
        true
    }

    /// Hold transmitted frames in the mailbox (`true`) or release them.
    pub fn set_stalled(&self, stalled: bool) {
        let mut st = self.state.lock();
        st.stalled = stalled;
        if !stalled {
            let released: Vec<CanMessage> = st.mailbox.drain(..).collect();
            st.sent.extend(released);
        }
    }

    /// Remove and return every frame that reached the bus so far.
    pub fn take_sent(&self) -> Vec<CanMessage> {
        std::mem::take(&mut self.state.lock().sent)
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn filters(&self) -> Vec<AcceptanceFilter> {
        self.state.lock().filters.clone()
    }

    pub fn rx_overruns(&self) -> u64 {
        self.state.lock().rx_overruns
    }
}

impl CanController for SimCanController {
    fn set_filters(&mut self, filters: &[AcceptanceFilter]) -> Result<(), BaseError> {
        if filters.len() > SIM_FILTER_BANKS {
            error!(
                requested = filters.len(),
                banks = SIM_FILTER_BANKS,
                "sim: not enough acceptance filter banks"
            );
            return Err(BaseError::FilterSetup);
        }
        self.state.lock().filters = filters.to_vec();
        Ok(())
    }

    fn rx_pending(&self) -> bool {
        !self.state.lock().rx_fifo.is_empty()
    }

    fn receive(&mut self) -> Option<CanMessage> {
        self.state.lock().rx_fifo.pop_front()
    }

    fn tx_ready(&self) -> bool {
        self.state.lock().mailbox.len() < SIM_TX_MAILBOXES
    }

    fn tx_idle(&self) -> bool {
        self.state.lock().mailbox.is_empty()
    }

    fn transmit(&mut self, msg: &CanMessage) -> bool {
        let mut st = self.state.lock();
        if st.mailbox.len() >= SIM_TX_MAILBOXES {
            return false;
        }
        if st.stalled {
            st.mailbox.push_back(*msg);
        } else {
            st.sent.push(*msg);
        }
        true
    }

    fn set_tx_interrupt(&mut self, enabled: bool) {
        self.state.lock().tx_interrupt = enabled;
    }

    fn tx_interrupt_enabled(&self) -> bool {
        self.state.lock().tx_interrupt
    }
}

// ── RamStorage ────────────────────────────────────────────────────────────────

fn check_bounds(size: u32, address: u32, length: usize) -> Result<(), BaseError> {
    let end = address as u64 + length as u64;
    if end > size as u64 {
        return Err(BaseError::Device { address });
    }
    Ok(())
}

/// Volatile storage device, zero-initialised.
#[derive(Debug, Clone)]
pub struct RamStorage {
    bytes: Vec<u8>,
}

impl RamStorage {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

}

impl StorageDevice for RamStorage {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), BaseError> {
        check_bounds(self.size(), address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), BaseError> {
        check_bounds(self.size(), address, data.len())?;
        let start = address as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), BaseError> {
        check_bounds(self.size(), address, length as usize)?;
        let start = address as usize;
        self.bytes[start..start + length as usize].fill(0);
        Ok(())
    }
}

// ── FileStorage ───────────────────────────────────────────────────────────────

/// File-backed storage device so partitions survive simulator restarts.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    size: u32,
}

impl FileStorage {
    /// Open `path`, creating it (zero-filled) or extending it to `size`.
    pub fn open(path: &Path, size: u32) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < size as u64 {
            file.set_len(size as u64)?;
        }
        Ok(Self { file, size })
    }

    fn io_error(address: u32, err: std::io::Error) -> BaseError {
        error!(address, error = %err, "storage file access failed");
        BaseError::Device { address }
    }
}

impl StorageDevice for FileStorage {
    fn size(&self) -> u32 {
        self.size
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), BaseError> {
        check_bounds(self.size, address, buf.len())?;
        self.file
            .seek(SeekFrom::Start(address as u64))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|e| Self::io_error(address, e))
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), BaseError> {
        check_bounds(self.size, address, data.len())?;
        self.file
            .seek(SeekFrom::Start(address as u64))
            .and_then(|_| self.file.write_all(data))
            .map_err(|e| Self::io_error(address, e))
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), BaseError> {
        self.write(address, &vec![0u8; length as usize])
    }
}

// ── Clocks ────────────────────────────────────────────────────────────────────

/// Monotonic clock starting at zero when created.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
