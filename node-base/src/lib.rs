/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! node-base – runtime kernel of a CAN-bus instrument node
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── error/         – BaseError, packed error codes
//! ├── config/        – YAML runtime configuration
//! ├── hal/           – CAN controller / storage device / clock traits
//! │   └── sim        – hosted implementations
//! ├── can/           – identifiers, frames, queues, transport
//! ├── dispatch/      – per-module handler tables, admission control
//! ├── scheduler/     – module / task registry, superloop
//! ├── storage/       – checksummed partition storage
//! ├── node           – NodeServices, NodeRuntime
//! └── base_module    – module 0: loss monitor and node commands
//! ```

pub mod base_module;
pub mod can;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hal;
pub mod node;
pub mod scheduler;
pub mod storage;

pub use error::{BaseError, ErrorClass, ErrorCode};
pub use node::{NodeRuntime, NodeServices, NodeState};
