/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Inbound CAN message routing.
//!
//! Every module owns a table of `(CanId, handler)` entries.  Once per
//! scheduler cycle [`Dispatcher::dispatch_messages`] drains the receive
//! queue and, for each frame:
//!
//! 1. normalises the identifier:
//!    - addressed to this node: address and channel bits are stripped;
//!    - addressed to the broadcast address: the broadcast bit is set and the
//!      channel is forced to 0 (the base module);
//!    - anything else is dropped;
//! 2. resolves the table of the module owning the channel;
//! 3. finds the entry matching the normalised identifier.  Channel-0
//!    entries ignore the broadcast bit, so base module commands may arrive
//!    unicast or broadcast;
//! 4. checks [`command_acceptable`];
//! 5. calls the handler.
//!
//! There is no caller to return a failure to, so every failure of steps 2–5
//! becomes an event frame on the channel that would have owned the command.

pub mod admission;

pub use admission::command_acceptable;

use std::rc::Rc;

use tracing::{debug, warn};

use crate::can::{CanId, CanMessage};
use crate::error::BaseError;
use crate::node::NodeServices;
use crate::scheduler::{ModuleId, TaskId, TaskScheduler};

/// Initial entries per module table.
const INITIAL_CAPACITY: usize = 10;

/// Entries added whenever a table runs full.
const CAPACITY_STEP: usize = 5;

/// Handler for one command.  Receives the channel the frame arrived on.
pub type MessageHandler =
    Rc<dyn Fn(&mut NodeServices, TaskId, &CanMessage) -> Result<(), BaseError>>;

/// One `(CanId, handler)` pair.
#[derive(Clone)]
pub struct MessageEntry {
    /// Identifier template without address or channel bits.
    pub id: CanId,
    pub handler: MessageHandler,
}

impl MessageEntry {
    pub fn new(
        id: CanId,
        handler: impl Fn(&mut NodeServices, TaskId, &CanMessage) -> Result<(), BaseError> + 'static,
    ) -> Self {
        Self {
            id,
            handler: Rc::new(handler),
        }
    }
}

impl std::fmt::Debug for MessageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEntry").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
struct CallbackTable {
    module: ModuleId,
    entries: Vec<MessageEntry>,
    capacity: usize,
}

impl CallbackTable {
    fn new(module: ModuleId) -> Self {
        Self {
            module,
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            capacity: INITIAL_CAPACITY,
        }
    }

    fn push(&mut self, entry: MessageEntry) {
        if self.entries.len() == self.capacity {
            self.entries.reserve_exact(CAPACITY_STEP);
            self.capacity += CAPACITY_STEP;
        }
        self.entries.push(entry);
    }

    fn find(&self, key: CanId, ignore_broadcast: bool) -> Option<&MessageEntry> {
        self.entries.iter().find(|e| {
            if ignore_broadcast {
                e.id.without_broadcast() == key.without_broadcast()
            } else {
                e.id == key
            }
        })
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Per-module handler tables.
#[derive(Debug, Default)]
pub struct Dispatcher {
    tables: Vec<CallbackTable>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entries` to the table of `module`, creating it if needed.
    pub fn register_messages(&mut self, module: ModuleId, entries: &[MessageEntry]) {
        let index = match self.tables.iter().position(|t| t.module == module) {
            Some(i) => i,
            None => {
                self.tables.push(CallbackTable::new(module));
                self.tables.len() - 1
            }
        };
        let table = &mut self.tables[index];
        for entry in entries {
            table.push(entry.clone());
        }
        debug!(
            module,
            added = entries.len(),
            total = table.entries.len(),
            "message handlers registered"
        );
    }

    /// Register `entries` under every module known to `scheduler`.
    pub fn register_broadcast(&mut self, scheduler: &TaskScheduler, entries: &[MessageEntry]) {
        for module in scheduler.module_ids() {
            self.register_messages(module, entries);
        }
    }

    /// Number of entries registered for `module`.
    pub fn entry_count(&self, module: ModuleId) -> usize {
        self.table(module).map_or(0, |t| t.entries.len())
    }

    /// Current table capacity of `module`.
    pub fn table_capacity(&self, module: ModuleId) -> usize {
        self.table(module).map_or(0, |t| t.capacity)
    }

    fn table(&self, module: ModuleId) -> Option<&CallbackTable> {
        self.tables.iter().find(|t| t.module == module)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Drain the receive queue; returns the number of frames processed.
    pub fn dispatch_messages(&self, services: &mut NodeServices, scheduler: &TaskScheduler) -> usize {
        let mut processed = 0;
        while let Some((channel, msg)) = services.transport.read_message() {
            processed += 1;

            let own = services.transport.address();
            let address = msg.id.address();
            let (channel, key) = if address == own {
                (channel, msg.id.routing_key())
            } else if address.is_broadcast() {
                (0, msg.id.routing_key().with_broadcast())
            } else {
                debug!(id = %msg.id, %address, "frame for another node dropped");
                continue;
            };

            if let Err(e) = self.route(services, scheduler, channel, key, &msg) {
                match e {
                    BaseError::UnknownMessage { .. } | BaseError::CommandRejected { .. } => {
                        warn!(id = %msg.id, channel, error = %e, "CAN command not executed");
                    }
                    _ => debug!(id = %msg.id, channel, error = %e, "CAN command failed"),
                }
                services.report(channel, &e, key.command_word());
            }
        }
        processed
    }

    fn route(
        &self,
        services: &mut NodeServices,
        scheduler: &TaskScheduler,
        channel: TaskId,
        key: CanId,
        msg: &CanMessage,
    ) -> Result<(), BaseError> {
        let task = scheduler
            .task(channel)
            .ok_or(BaseError::TaskNotExists { task: channel })?;
        let table = self
            .table(task.module_id)
            .ok_or(BaseError::TaskNotExists { task: channel })?;
        let entry = table
            .find(key, channel == 0)
            .ok_or(BaseError::UnknownMessage { can_id: key.raw() })?;

        if !command_acceptable(key, services.node_state(), services.emergency_stop()) {
            return Err(BaseError::CommandRejected { can_id: key.raw() });
        }
        (entry.handler)(services, channel, msg)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
