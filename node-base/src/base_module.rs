/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The base module: module id 0, task 0, CAN channel 0.
//!
//! Its task runs the transport loss monitor on every scheduled cycle, in
//! every node state.  Its commands are accepted unicast or broadcast:
//!
//! | Class | Code | Command | Payload | Reply |
//! |---|---|---|---|---|
//! | System | `0x01` | emergency stop | `[0]` != 0 asserts, 0 releases | none |
//! | System | `0x02` | request node state | none | `NODE_STATE` |
//! | System | `0x03` | request memory info | none | `MEMORY_INFO` |
//! | Service | `0x10` | format memory | `[0]` partition count | `FORMAT_MEMORY` |
//!
//! Format first flushes the send queue; if that times out the storage is
//! left untouched and the timeout is reported as an event.

use tracing::{info, warn};

use crate::can::{CanId, CanMessage, MessageClass};
use crate::dispatch::MessageEntry;
use crate::error::BaseError;
use crate::node::NodeServices;
use crate::scheduler::{FunctionModule, ModuleControl, ModuleState, TaskId};

pub const EMERGENCY_STOP: u8 = 0x01;
pub const REQUEST_NODE_STATE: u8 = 0x02;
pub const REQUEST_MEMORY_INFO: u8 = 0x03;
pub const FORMAT_MEMORY: u8 = 0x10;

/// Reply codes (sent without the master bit).
pub const NODE_STATE: u8 = 0x02;
pub const MEMORY_INFO: u8 = 0x03;

/// Status ids answered by [`BaseModule::status`](FunctionModule::status).
pub const STATUS_NODE_STATE: u16 = 0;
pub const STATUS_FREE_MEMORY: u16 = 1;
pub const STATUS_SEND_QUEUE: u16 = 2;

/// Task of the base module.
#[derive(Debug, Default)]
pub struct BaseModule;

impl BaseModule {
    pub fn new() -> Self {
        Self
    }
}

impl FunctionModule for BaseModule {
    fn task(&mut self, services: &mut NodeServices, _instance: u8) -> Result<ModuleState, BaseError> {
        services.transport.task(&mut services.indicator);

        if services.transport.send_queue_len() > 0 || services.transport.recv_queue_len() > 0 {
            Ok(ModuleState::Busy)
        } else {
            Ok(ModuleState::Idle)
        }
    }

    fn control(
        &mut self,
        services: &mut NodeServices,
        _instance: u8,
        control: ModuleControl,
    ) -> Result<(), BaseError> {
        if control == ModuleControl::Shutdown {
            // Push pending events out before the node goes quiet.
            if let Err(e) = services.transport.flush_messages(services.flush_timeout_ms()) {
                warn!(error = %e, "send queue not flushed on shutdown");
            }
        }
        Ok(())
    }

    fn status(
        &mut self,
        services: &mut NodeServices,
        _instance: u8,
        status: u16,
    ) -> Result<i32, BaseError> {
        match status {
            STATUS_NODE_STATE => Ok(services.node_state() as i32),
            STATUS_FREE_MEMORY => Ok(services.storage.free_space() as i32),
            STATUS_SEND_QUEUE => Ok(services.transport.send_queue_len() as i32),
            _ => Err(BaseError::UnsupportedStatus { status }),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Handler table of the base module.
pub fn messages() -> Vec<MessageEntry> {
    vec![
        MessageEntry::new(
            CanId::command(MessageClass::System, EMERGENCY_STOP),
            emergency_stop,
        ),
        MessageEntry::new(
            CanId::command(MessageClass::System, REQUEST_NODE_STATE),
            request_node_state,
        ),
        MessageEntry::new(
            CanId::command(MessageClass::System, REQUEST_MEMORY_INFO),
            request_memory_info,
        ),
        MessageEntry::new(
            CanId::command(MessageClass::Service, FORMAT_MEMORY),
            format_memory,
        ),
    ]
}

fn first_byte(msg: &CanMessage) -> Result<u8, BaseError> {
    msg.payload()
        .first()
        .copied()
        .ok_or(BaseError::InvalidMessage {
            can_id: msg.id.raw(),
        })
}

fn emergency_stop(
    services: &mut NodeServices,
    _channel: TaskId,
    msg: &CanMessage,
) -> Result<(), BaseError> {
    let asserted = first_byte(msg)? != 0;
    services.set_emergency_stop(asserted);
    Ok(())
}

fn request_node_state(
    services: &mut NodeServices,
    channel: TaskId,
    _msg: &CanMessage,
) -> Result<(), BaseError> {
    let mut payload = [0u8; 6];
    payload[0] = services.node_state() as u8;
    payload[1] = services.emergency_stop() as u8;
    payload[2..].copy_from_slice(&(services.uptime_ms() as u32).to_be_bytes());
    services.transport.write_message(
        channel,
        &CanMessage::new(CanId::response(MessageClass::System, NODE_STATE), &payload),
    )
}

fn request_memory_info(
    services: &mut NodeServices,
    channel: TaskId,
    _msg: &CanMessage,
) -> Result<(), BaseError> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&services.storage.device_size().to_be_bytes());
    payload[4..].copy_from_slice(&services.storage.free_space().to_be_bytes());
    services.transport.write_message(
        channel,
        &CanMessage::new(CanId::response(MessageClass::System, MEMORY_INFO), &payload),
    )
}

fn format_memory(
    services: &mut NodeServices,
    channel: TaskId,
    msg: &CanMessage,
) -> Result<(), BaseError> {
    let count = first_byte(msg)?;
    // Frames queued before the command leave before the device is wiped.
    services
        .transport
        .flush_messages(services.flush_timeout_ms())?;
    services.storage.format(count as u16)?;
    info!(partitions = count, "storage formatted on request");
    services.transport.write_message(
        channel,
        &CanMessage::new(CanId::response(MessageClass::Service, FORMAT_MEMORY), &[count]),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
