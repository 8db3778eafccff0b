/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Queued CAN I/O between interrupt context and the main loop.
//!
//! ```text
//!   main loop                      interrupt context
//!   ─────────                      ─────────────────
//!   write_message ──► send queue ──► on_transmit_interrupt ──► mailbox
//!   read_message  ◄── recv queue ◄── on_receive_interrupt  ◄── rx FIFO
//! ```
//!
//! The queues are the only state shared with interrupt context.  Each main
//! loop access holds the queue's lock for the duration of one push or pop,
//! the hosted equivalent of masking that interrupt source around the access.
//!
//! # Backpressure
//! Neither queue ever overwrites.  When a queue is full the newest frame is
//! dropped and a sticky lost flag is set.  The periodic [`task`] reports
//! each *transition* of a lost flag (one blink code and one event on the
//! rising edge, the same on the falling edge), never individual frames, so a
//! sustained overload produces one notification instead of a flood.
//!
//! [`task`]: CanTransport::task

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{CanMessage, CanQueue, NodeAddress, ADDRESS_MASK, MASTER_BIT, MAX_CHANNEL};
use crate::error::{BaseError, ErrorClass};
use crate::hal::{AcceptanceFilter, CanController, Clock};
use crate::node::{BlinkCode, BlinkIndicator};
use crate::scheduler::TaskId;

/// Channel used for transport notifications (the base module).
const TRANSPORT_CHANNEL: TaskId = 0;

// ── Statistics ────────────────────────────────────────────────────────────────

/// Snapshot of the transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames handed to the hardware mailbox.
    pub sent: u64,
    /// Frames moved from the hardware FIFO into the receive queue.
    pub received: u64,
    pub send_dropped: u64,
    pub recv_dropped: u64,
    /// Rising edges of either lost flag.
    pub loss_reports: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    send_dropped: AtomicU64,
    recv_dropped: AtomicU64,
    loss_reports: AtomicU64,
}

// ── Loss monitor ──────────────────────────────────────────────────────────────

/// Main-loop-only state of the periodic loss monitor.
#[derive(Debug, Default)]
struct LossMonitor {
    send_reported: bool,
    recv_reported: bool,
    /// Notifications waiting for room in the send queue.
    pending: VecDeque<CanMessage>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Send,
    Receive,
}

impl Direction {
    fn error(self) -> BaseError {
        match self {
            Direction::Send => BaseError::SendMessageLost,
            Direction::Receive => BaseError::RecvMessageLost,
        }
    }

    fn blink_code(self) -> BlinkCode {
        match self {
            Direction::Send => BlinkCode::CanSendLost,
            Direction::Receive => BlinkCode::CanRecvLost,
        }
    }
}

// ── CanTransport ──────────────────────────────────────────────────────────────

struct Shared {
    address: NodeAddress,
    hal: Mutex<Box<dyn CanController>>,
    send: Mutex<CanQueue>,
    recv: Mutex<CanQueue>,
    send_lost: AtomicBool,
    recv_lost: AtomicBool,
    counters: Counters,
    monitor: Mutex<LossMonitor>,
    clock: Arc<dyn Clock>,
}

/// Handle to the node's CAN transport.
///
/// Cheap to clone; the main loop keeps one clone and the interrupt side
/// (a thread or task calling [`poll_interrupts`](Self::poll_interrupts))
/// another.
#[derive(Clone)]
pub struct CanTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CanTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanTransport")
            .field("address", &self.shared.address)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CanTransport {
    /// Create the transport for the node at `address`.
    pub fn new(
        address: NodeAddress,
        controller: Box<dyn CanController>,
        send_queue_size: usize,
        recv_queue_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                address,
                hal: Mutex::new(controller),
                send: Mutex::new(CanQueue::new(send_queue_size)),
                recv: Mutex::new(CanQueue::new(recv_queue_size)),
                send_lost: AtomicBool::new(false),
                recv_lost: AtomicBool::new(false),
                counters: Counters::default(),
                monitor: Mutex::new(LossMonitor::default()),
                clock,
            }),
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.shared.address
    }

    // ── Setup ─────────────────────────────────────────────────────────────────

    /// The three acceptance filters this node listens on.
    pub fn acceptance_filters(&self) -> [AcceptanceFilter; 3] {
        let addressed = ADDRESS_MASK | MASTER_BIT;
        [
            // unicast: addressed to this node by the master
            AcceptanceFilter {
                id: self.shared.address.bits() | MASTER_BIT,
                mask: addressed,
                remote_only: false,
            },
            // remote requests from the master
            AcceptanceFilter {
                id: MASTER_BIT,
                mask: MASTER_BIT,
                remote_only: true,
            },
            // broadcast: address field 0
            AcceptanceFilter {
                id: MASTER_BIT,
                mask: addressed,
                remote_only: false,
            },
        ]
    }

    /// Program the acceptance filters into the controller.
    pub fn configure_filters(&self) -> Result<(), BaseError> {
        let filters = self.acceptance_filters();
        self.shared.hal.lock().set_filters(&filters)?;
        debug!(address = %self.shared.address, "CAN acceptance filters configured");
        Ok(())
    }

    // ── Main loop side ────────────────────────────────────────────────────────

    /// Queue `msg` for transmission on `channel`.
    ///
    /// The node address and `channel` are stamped into the identifier,
    /// overriding whatever the template carried.  A full send queue does not
    /// fail the call: the frame is dropped and the send-lost flag is set.
    pub fn write_message(&self, channel: TaskId, msg: &CanMessage) -> Result<(), BaseError> {
        if channel > MAX_CHANNEL {
            return Err(BaseError::ChannelOutOfRange { channel });
        }

        let mut frame = *msg;
        frame.id = msg
            .id
            .without_broadcast()
            .with_address(self.shared.address)
            .with_channel(channel);

        {
            let mut send = self.shared.send.lock();
            if send.push(frame).is_err() {
                self.shared.send_lost.store(true, Ordering::SeqCst);
                self.shared
                    .counters
                    .send_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        self.transmit_one();
        Ok(())
    }

    /// Pop the oldest received frame together with its channel.
    pub fn read_message(&self) -> Option<(TaskId, CanMessage)> {
        let msg = self.shared.recv.lock().pop()?;
        Some((msg.id.channel(), msg))
    }

    /// Wait until the send queue and the hardware mailbox are empty.
    ///
    /// Busy-waits, so only meant for shutdown and format paths.
    pub fn flush_messages(&self, timeout_ms: u64) -> Result<(), BaseError> {
        let start = self.shared.clock.now_ms();
        loop {
            // Hosted targets have no free-running interrupt; service the
            // transmit path from here while waiting.
            self.on_transmit_interrupt();

            let queued = !self.shared.send.lock().is_empty();
            if !queued && self.shared.hal.lock().tx_idle() {
                return Ok(());
            }
            if self.shared.clock.now_ms().saturating_sub(start) >= timeout_ms {
                warn!(timeout_ms, "CAN flush timed out");
                return Err(BaseError::Timeout { timeout_ms });
            }
            std::thread::yield_now();
        }
    }

    /// Hand at most one queued frame to the mailbox and arm the
    /// transmit-ready interrupt if frames remain.
    fn transmit_one(&self) {
        let mut send = self.shared.send.lock();
        let mut hal = self.shared.hal.lock();
        if hal.tx_ready() {
            if let Some(frame) = send.peek() {
                if hal.transmit(frame) {
                    send.pop();
                    self.shared.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if !send.is_empty() {
            hal.set_tx_interrupt(true);
        }
    }

    // ── Interrupt side ────────────────────────────────────────────────────────

    /// Receive interrupt: move every pending hardware frame into the receive
    /// queue, dropping the newest on overflow.
    pub fn on_receive_interrupt(&self) {
        let mut hal = self.shared.hal.lock();
        let mut recv = self.shared.recv.lock();
        while let Some(frame) = hal.receive() {
            if recv.push(frame).is_err() {
                self.shared.recv_lost.store(true, Ordering::SeqCst);
                self.shared
                    .counters
                    .recv_dropped
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                self.shared.counters.received.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Transmit interrupt: fill the mailbox from the send queue; disarm the
    /// interrupt once the queue is empty.
    pub fn on_transmit_interrupt(&self) {
        let mut send = self.shared.send.lock();
        let mut hal = self.shared.hal.lock();
        while hal.tx_ready() {
            let Some(frame) = send.peek() else { break };
            if !hal.transmit(frame) {
                break;
            }
            send.pop();
            self.shared.counters.sent.fetch_add(1, Ordering::Relaxed);
        }
        if send.is_empty() {
            hal.set_tx_interrupt(false);
        }
    }

    /// Stand-in for the interrupt controller: run whichever ISR the
    /// hardware would currently trigger.
    pub fn poll_interrupts(&self) {
        let (rx, tx) = {
            let hal = self.shared.hal.lock();
            (
                hal.rx_pending(),
                hal.tx_interrupt_enabled() && hal.tx_ready(),
            )
        };
        if rx {
            self.on_receive_interrupt();
        }
        if tx {
            self.on_transmit_interrupt();
        }
    }

    // ── Periodic task ─────────────────────────────────────────────────────────

    /// Report lost-frame flag transitions and flush pending notifications.
    pub fn task(&self, indicator: &mut BlinkIndicator) {
        let mut guard = self.shared.monitor.lock();
        let monitor = &mut *guard;

        for direction in [Direction::Send, Direction::Receive] {
            let (flag, queue, reported) = match direction {
                Direction::Send => (
                    &self.shared.send_lost,
                    &self.shared.send,
                    &mut monitor.send_reported,
                ),
                Direction::Receive => (
                    &self.shared.recv_lost,
                    &self.shared.recv,
                    &mut monitor.recv_reported,
                ),
            };

            let lost = flag.load(Ordering::SeqCst);
            let code = direction.error().code();
            let notification = if lost && !*reported {
                *reported = true;
                indicator.assert(direction.blink_code());
                self.shared
                    .counters
                    .loss_reports
                    .fetch_add(1, Ordering::Relaxed);
                warn!(?direction, "CAN messages lost");
                Some(CanMessage::event(code, 0))
            } else if !lost && *reported {
                *reported = false;
                indicator.deassert(direction.blink_code());
                info!(?direction, "CAN message loss cleared");
                Some(CanMessage::event(code.with_class(ErrorClass::Info), 0))
            } else {
                None
            };

            // The episode ends once the queue has room again.
            if lost && !queue.lock().is_full() {
                flag.store(false, Ordering::SeqCst);
            }

            if let Some(event) = notification {
                monitor.pending.push_back(event);
            }
        }

        while let Some(event) = monitor.pending.front().copied() {
            if self.shared.send.lock().is_full() {
                break;
            }
            monitor.pending.pop_front();
            // Channel 0 is always in range.
            let _ = self.write_message(TRANSPORT_CHANNEL, &event);
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn stats(&self) -> TransportStats {
        let c = &self.shared.counters;
        TransportStats {
            sent: c.sent.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            send_dropped: c.send_dropped.load(Ordering::Relaxed),
            recv_dropped: c.recv_dropped.load(Ordering::Relaxed),
            loss_reports: c.loss_reports.load(Ordering::Relaxed),
        }
    }

    pub fn send_queue_len(&self) -> usize {
        self.shared.send.lock().count()
    }

    pub fn recv_queue_len(&self) -> usize {
        self.shared.recv.lock().count()
    }

    pub fn send_lost(&self) -> bool {
        self.shared.send_lost.load(Ordering::SeqCst)
    }

    pub fn recv_lost(&self) -> bool {
        self.shared.recv_lost.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
