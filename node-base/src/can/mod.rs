/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! CAN frame model shared by the transport and the dispatcher.
//!
//! The 29-bit extended identifier is bit-exact with the rest of the bus:
//!
//! ```text
//!  31       28..26  25..19  18..12   11..8      7..1      0
//! ┌─────────┬───────┬───────┬────────┬──────────┬─────────┬────────┐
//! │broadcast│ class │ code  │channel │node index│node type│ master │
//! └─────────┴───────┴───────┴────────┴──────────┴─────────┴────────┘
//! ```
//!
//! Bit 31 never goes on the wire; the dispatcher sets it on frames that
//! arrived on the broadcast address so handler tables can tell them apart.

pub mod queue;
pub mod transport;

pub use queue::CanQueue;
pub use transport::{CanTransport, TransportStats};

use crate::error::ErrorCode;
use crate::scheduler::TaskId;

// ── Bit layout ────────────────────────────────────────────────────────────────

pub const MASTER_BIT: u32 = 1;
pub const NODE_TYPE_SHIFT: u32 = 1;
pub const NODE_TYPE_MASK: u32 = 0x7F << NODE_TYPE_SHIFT;
pub const NODE_INDEX_SHIFT: u32 = 8;
pub const NODE_INDEX_MASK: u32 = 0x0F << NODE_INDEX_SHIFT;
/// Node type and node index together form the node address.
pub const ADDRESS_MASK: u32 = NODE_TYPE_MASK | NODE_INDEX_MASK;
pub const CHANNEL_SHIFT: u32 = 12;
pub const CHANNEL_MASK: u32 = 0x7F << CHANNEL_SHIFT;
pub const CODE_SHIFT: u32 = 19;
pub const CODE_MASK: u32 = 0x7F << CODE_SHIFT;
pub const CLASS_SHIFT: u32 = 26;
pub const CLASS_MASK: u32 = 0x07 << CLASS_SHIFT;
pub const BROADCAST_BIT: u32 = 1 << 31;
/// Bits that are transmitted on the bus.
pub const WIRE_MASK: u32 = 0x1FFF_FFFF;

/// Highest channel number the identifier can carry.
pub const MAX_CHANNEL: TaskId = 0x7F;

/// Maximum classic CAN payload.
pub const MAX_PAYLOAD: usize = 8;

// ── MessageClass ──────────────────────────────────────────────────────────────

/// Command class (3-bit field).  Admission control is keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Events and errors sent by nodes.
    Event = 0,
    /// Always admitted, even during emergency stop.
    System = 1,
    Process = 2,
    Service = 3,
    Diagnostic = 4,
    /// Admitted only while the node is in Assembly state.
    Assembly = 5,
    Test = 6,
    Boot = 7,
}

impl MessageClass {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x07 {
            0 => MessageClass::Event,
            1 => MessageClass::System,
            2 => MessageClass::Process,
            3 => MessageClass::Service,
            4 => MessageClass::Diagnostic,
            5 => MessageClass::Assembly,
            6 => MessageClass::Test,
            _ => MessageClass::Boot,
        }
    }
}

// ── NodeAddress ───────────────────────────────────────────────────────────────

/// Address of one node on the bus (node type + node index).
///
/// The all-zero address is the broadcast address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeAddress {
    /// 7-bit node type.
    pub node_type: u8,
    /// 4-bit node index.
    pub node_index: u8,
}

impl NodeAddress {
    pub const BROADCAST: NodeAddress = NodeAddress {
        node_type: 0,
        node_index: 0,
    };

    pub fn new(node_type: u8, node_index: u8) -> Self {
        Self {
            node_type: node_type & 0x7F,
            node_index: node_index & 0x0F,
        }
    }

    /// Address bits as they appear inside a [`CanId`].
    pub fn bits(self) -> u32 {
        (self.node_index as u32) << NODE_INDEX_SHIFT | (self.node_type as u32) << NODE_TYPE_SHIFT
    }

    pub fn from_bits(raw: u32) -> Self {
        Self {
            node_type: ((raw & NODE_TYPE_MASK) >> NODE_TYPE_SHIFT) as u8,
            node_index: ((raw & NODE_INDEX_MASK) >> NODE_INDEX_SHIFT) as u8,
        }
    }

    pub fn is_broadcast(self) -> bool {
        self.bits() == 0
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node_type, self.node_index)
    }
}

// ── CanId ─────────────────────────────────────────────────────────────────────

/// Extended CAN identifier plus the local broadcast flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CanId(pub u32);

impl CanId {
    /// Identifier template for a command sent by the master.
    pub const fn command(class: MessageClass, code: u8) -> Self {
        CanId((class as u32) << CLASS_SHIFT | ((code as u32) & 0x7F) << CODE_SHIFT | MASTER_BIT)
    }

    /// Identifier template for a message sent by a node (no master bit).
    pub const fn response(class: MessageClass, code: u8) -> Self {
        CanId((class as u32) << CLASS_SHIFT | ((code as u32) & 0x7F) << CODE_SHIFT)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn class(self) -> MessageClass {
        MessageClass::from_bits((self.0 & CLASS_MASK) >> CLASS_SHIFT)
    }

    pub fn code(self) -> u8 {
        ((self.0 & CODE_MASK) >> CODE_SHIFT) as u8
    }

    pub fn channel(self) -> TaskId {
        ((self.0 & CHANNEL_MASK) >> CHANNEL_SHIFT) as TaskId
    }

    pub fn address(self) -> NodeAddress {
        NodeAddress::from_bits(self.0)
    }

    pub fn is_master(self) -> bool {
        self.0 & MASTER_BIT != 0
    }

    pub fn is_broadcast(self) -> bool {
        self.0 & BROADCAST_BIT != 0
    }

    pub fn with_channel(self, channel: TaskId) -> Self {
        CanId(self.0 & !CHANNEL_MASK | ((channel as u32) << CHANNEL_SHIFT) & CHANNEL_MASK)
    }

    pub fn with_address(self, address: NodeAddress) -> Self {
        CanId(self.0 & !ADDRESS_MASK | address.bits())
    }

    /// Identifier with address and channel removed, as used for matching.
    pub fn routing_key(self) -> Self {
        CanId(self.0 & !(ADDRESS_MASK | CHANNEL_MASK))
    }

    pub fn with_broadcast(self) -> Self {
        CanId(self.0 | BROADCAST_BIT)
    }

    pub fn without_broadcast(self) -> Self {
        CanId(self.0 & !BROADCAST_BIT)
    }

    /// Class and code packed as `class << 7 | code` (event payloads).
    pub fn command_word(self) -> u16 {
        (self.class() as u16) << 7 | self.code() as u16
    }
}

impl std::fmt::Display for CanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// ── CanMessage ────────────────────────────────────────────────────────────────

/// One classic CAN frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanMessage {
    pub id: CanId,
    /// Payload length, `0..=8`.
    pub length: u8,
    pub data: [u8; MAX_PAYLOAD],
    /// Remote transmission request.
    pub remote: bool,
}

impl CanMessage {
    /// Build a data frame; payloads longer than 8 bytes are truncated.
    pub fn new(id: CanId, payload: &[u8]) -> Self {
        let length = payload.len().min(MAX_PAYLOAD);
        let mut data = [0u8; MAX_PAYLOAD];
        data[..length].copy_from_slice(&payload[..length]);
        Self {
            id,
            length: length as u8,
            data,
            remote: false,
        }
    }

    /// Build a remote request frame.
    pub fn remote(id: CanId) -> Self {
        Self {
            id,
            remote: true,
            ..Default::default()
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.length as usize).min(MAX_PAYLOAD)]
    }

    /// Event frame reporting `code`.
    ///
    /// The event code is the severity (`1` info … `4` fatal); the payload is
    /// the packed error code followed by the command word of the frame that
    /// caused it (`0` when there is none).
    pub fn event(code: ErrorCode, command_word: u16) -> Self {
        let mut payload = [0u8; 6];
        payload[..4].copy_from_slice(&code.to_wire().to_be_bytes());
        payload[4..].copy_from_slice(&command_word.to_be_bytes());
        CanMessage::new(
            CanId::response(MessageClass::Event, code.class as u8 + 1),
            &payload,
        )
    }

    /// Decode an event frame built by [`CanMessage::event`].
    pub fn parse_event(&self) -> Option<(ErrorCode, u16)> {
        if self.id.class() != MessageClass::Event || self.length < 6 {
            return None;
        }
        let raw = u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
        let word = u16::from_be_bytes([self.data[4], self.data[5]]);
        Some((ErrorCode::from_wire(raw)?, word))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
