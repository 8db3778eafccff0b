/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error type shared by every base-module subsystem.
//!
//! Errors on the bus are packed 32-bit codes carrying a severity class, the
//! id of the module that raised them and a module-local number.  Inside the
//! node they travel as [`BaseError`] variants with named fields; the packed
//! form only exists at the one boundary that still needs it, the outbound
//! event frame (see [`ErrorCode::to_wire`]).
//!
//! | Range | Subsystem |
//! |---|---|
//! | `0x01..=0x0F` | task scheduler |
//! | `0x10..=0x1F` | CAN transport |
//! | `0x20..=0x2F` | message dispatcher |
//! | `0x30..=0x4F` | partition storage |
//!
//! Function modules report their own codes through [`BaseError::Module`].

use thiserror::Error;

use crate::scheduler::{ModuleId, TaskId};
use crate::storage::PartitionId;

/// Module id of the base module itself.
pub const BASE_MODULE_ID: ModuleId = 0;

// ── ErrorClass ────────────────────────────────────────────────────────────────

/// Severity class of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorClass {
    Info = 0,
    Warning = 1,
    Error = 2,
    Fatal = 3,
}

impl ErrorClass {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(ErrorClass::Info),
            1 => Some(ErrorClass::Warning),
            2 => Some(ErrorClass::Error),
            3 => Some(ErrorClass::Fatal),
            _ => None,
        }
    }
}

// ── ErrorCode ─────────────────────────────────────────────────────────────────

/// Explicit (class, module, number) triple behind every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub class: ErrorClass,
    pub module: ModuleId,
    pub number: u16,
}

impl ErrorCode {
    const FAILURE_BIT: u32 = 0x8000_0000;

    pub const fn new(class: ErrorClass, module: ModuleId, number: u16) -> Self {
        Self {
            class,
            module,
            number,
        }
    }

    /// Encode as `0x8000_0000 | class << 24 | module << 16 | number`.
    ///
    /// Read as an `i32` the result is always negative, which is what the
    /// rest of the bus expects from a failure code.
    pub fn to_wire(self) -> u32 {
        Self::FAILURE_BIT
            | (self.class as u32) << 24
            | (self.module as u32) << 16
            | self.number as u32
    }

    /// Decode a packed code; `None` if the failure bit or class is invalid.
    pub fn from_wire(raw: u32) -> Option<Self> {
        if raw & Self::FAILURE_BIT == 0 {
            return None;
        }
        let class = ErrorClass::from_bits((raw >> 24) & 0x7F)?;
        Some(Self {
            class,
            module: ((raw >> 16) & 0xFF) as ModuleId,
            number: (raw & 0xFFFF) as u16,
        })
    }

    /// Same code with a different severity (used for "condition cleared").
    pub fn with_class(self, class: ErrorClass) -> Self {
        Self { class, ..self }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} module={} number=0x{:04X}",
            self.class, self.module, self.number
        )
    }
}

// ── BaseError ─────────────────────────────────────────────────────────────────

/// Every failure the base module can report.
///
/// Failed calls leave state unchanged unless the variant documents
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BaseError {
    // ── Scheduler ─────────────────────────────────────────────────────────────
    #[error("module table full")]
    ModuleTableFull,

    #[error("task table full")]
    TaskTableFull,

    #[error("module {module} already registered")]
    ModuleExists { module: ModuleId },

    #[error("task {task} does not exist")]
    TaskNotExists { task: TaskId },

    #[error("module {module} registered with zero instances")]
    InvalidInstanceCount { module: ModuleId },

    #[error("status {status} not supported")]
    UnsupportedStatus { status: u16 },

    // ── CAN transport ─────────────────────────────────────────────────────────
    #[error("CAN channel {channel} out of range")]
    ChannelOutOfRange { channel: TaskId },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("CAN controller rejected the acceptance filter configuration")]
    FilterSetup,

    /// Reported as an event only; a full send queue never fails the call.
    #[error("CAN send queue overflow, messages lost")]
    SendMessageLost,

    /// Reported as an event only.
    #[error("CAN receive queue overflow, messages lost")]
    RecvMessageLost,

    // ── Dispatcher ────────────────────────────────────────────────────────────
    #[error("no handler for CAN id 0x{can_id:08X}")]
    UnknownMessage { can_id: u32 },

    #[error("command 0x{can_id:08X} rejected in the current node state")]
    CommandRejected { can_id: u32 },

    #[error("malformed payload for CAN id 0x{can_id:08X}")]
    InvalidMessage { can_id: u32 },

    // ── Partition storage ─────────────────────────────────────────────────────
    #[error("storage is write protected")]
    StorageProtected,

    #[error("no contiguous free block of {size} bytes")]
    MemoryFull { size: u32 },

    #[error("partition table full")]
    TableFull,

    #[error("partition 0x{id:04X} does not exist")]
    PartitionNotExists { id: PartitionId },

    #[error("partition 0x{id:04X} already exists")]
    PartitionExists { id: PartitionId },

    #[error("partition 0x{id:04X} already open")]
    PartitionAlreadyOpen { id: PartitionId },

    #[error("partition handle {handle} is not open")]
    PartitionNotOpen { handle: u16 },

    #[error("partition 0x{id:04X} is open")]
    PartitionIsOpen { id: PartitionId },

    #[error("partition opened without the required access mode")]
    AccessDenied,

    #[error("access [{address}, {address}+{length}) outside partition of {size} bytes")]
    OutOfRange { address: u32, length: u32, size: u32 },

    /// Sticky per-handle condition; cleared only by erase or repair.
    #[error("checksum error on partition 0x{id:04X}")]
    ChecksumError { id: PartitionId },

    #[error("partition 0x{id:04X} has {size} bytes, {required} required")]
    PartitionTooSmall {
        id: PartitionId,
        size: u32,
        required: u32,
    },

    #[error("partition table of {required} bytes exceeds device size {device}")]
    TableTooLarge { required: u32, device: u32 },

    #[error("partition table is corrupt")]
    TableCorrupt,

    #[error("invalid partition mode 0x{mode:04X}")]
    InvalidMode { mode: u16 },

    #[error("partition 0x{id:04X} is reserved")]
    ReservedPartition { id: PartitionId },

    #[error("storage device access failed at {address}")]
    Device { address: u32 },

    // ── Function modules ──────────────────────────────────────────────────────
    #[error("module error ({0})")]
    Module(ErrorCode),
}

impl BaseError {
    /// Severity class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            BaseError::Module(code) => code.class,
            BaseError::SendMessageLost
            | BaseError::RecvMessageLost
            | BaseError::StorageProtected
            | BaseError::Timeout { .. } => ErrorClass::Warning,
            BaseError::TableCorrupt | BaseError::Device { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Error,
        }
    }

    /// Module-local error number (stable across releases).
    pub fn number(&self) -> u16 {
        match self {
            BaseError::ModuleTableFull => 0x01,
            BaseError::TaskTableFull => 0x02,
            BaseError::ModuleExists { .. } => 0x03,
            BaseError::TaskNotExists { .. } => 0x04,
            BaseError::InvalidInstanceCount { .. } => 0x05,
            BaseError::UnsupportedStatus { .. } => 0x06,

            BaseError::ChannelOutOfRange { .. } => 0x10,
            BaseError::Timeout { .. } => 0x11,
            BaseError::FilterSetup => 0x12,
            BaseError::SendMessageLost => 0x13,
            BaseError::RecvMessageLost => 0x14,

            BaseError::UnknownMessage { .. } => 0x20,
            BaseError::CommandRejected { .. } => 0x21,
            BaseError::InvalidMessage { .. } => 0x22,

            BaseError::StorageProtected => 0x30,
            BaseError::MemoryFull { .. } => 0x31,
            BaseError::TableFull => 0x32,
            BaseError::PartitionNotExists { .. } => 0x33,
            BaseError::PartitionExists { .. } => 0x34,
            BaseError::PartitionAlreadyOpen { .. } => 0x35,
            BaseError::PartitionNotOpen { .. } => 0x36,
            BaseError::PartitionIsOpen { .. } => 0x37,
            BaseError::AccessDenied => 0x38,
            BaseError::OutOfRange { .. } => 0x39,
            BaseError::ChecksumError { .. } => 0x3A,
            BaseError::PartitionTooSmall { .. } => 0x3B,
            BaseError::TableTooLarge { .. } => 0x3C,
            BaseError::TableCorrupt => 0x3D,
            BaseError::InvalidMode { .. } => 0x3E,
            BaseError::ReservedPartition { .. } => 0x3F,
            BaseError::Device { .. } => 0x40,

            BaseError::Module(code) => code.number,
        }
    }

    /// Packed code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BaseError::Module(code) => *code,
            other => ErrorCode::new(other.class(), BASE_MODULE_ID, other.number()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
