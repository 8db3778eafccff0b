/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node runtime: owns every table, queue and device of one node.
//!
//! ```text
//! NodeRuntime
//! ├── TaskScheduler   – module / task registry, superloop driver
//! ├── Dispatcher      – per-module CAN handler tables
//! └── NodeServices    – what modules and handlers get to touch
//!     ├── CanTransport
//!     ├── PartitionStorage
//!     ├── BlinkIndicator
//!     └── node state, emergency stop, clock
//! ```
//!
//! Nothing here is process-global, so any number of simulated nodes can run
//! side by side in one test.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::base_module::{self, BaseModule};
use crate::can::{CanMessage, CanTransport, NodeAddress};
use crate::config::RuntimeConfig;
use crate::dispatch::{Dispatcher, MessageEntry};
use crate::error::{BaseError, BASE_MODULE_ID};
use crate::hal::{CanController, Clock, StorageDevice};
use crate::scheduler::{FunctionModule, ModuleControl, ModuleId, TaskId, TaskScheduler};
use crate::storage::{PartitionStorage, WriteProtect};

// ── NodeState ─────────────────────────────────────────────────────────────────

/// Coarse lifecycle phase of the node.
///
/// The order of the variants is significant: function module tasks only run
/// in states after [`NodeState::Identify`] (except `Standby`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum NodeState {
    #[default]
    Startup = 0,
    Identify = 1,
    Configure = 2,
    Normal = 3,
    Assembly = 4,
    Shutdown = 5,
    Standby = 6,
}

impl NodeState {
    /// `true` if function module tasks may run in this state.
    pub fn runs_tasks(self) -> bool {
        self > NodeState::Identify && self != NodeState::Standby
    }
}

// ── Blink indicator ───────────────────────────────────────────────────────────

/// Conditions signalled on the node's status LED.
///
/// Lower discriminants win when several are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkCode {
    EmergencyStop = 0,
    CanSendLost = 1,
    CanRecvLost = 2,
}

impl BlinkCode {
    const ALL: [BlinkCode; 3] = [
        BlinkCode::EmergencyStop,
        BlinkCode::CanSendLost,
        BlinkCode::CanRecvLost,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of currently asserted [`BlinkCode`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlinkIndicator {
    active: u8,
}

impl BlinkIndicator {
    pub fn assert(&mut self, code: BlinkCode) {
        if self.active & code.bit() == 0 {
            debug!(?code, "blink code asserted");
        }
        self.active |= code.bit();
    }

    pub fn deassert(&mut self, code: BlinkCode) {
        if self.active & code.bit() != 0 {
            debug!(?code, "blink code deasserted");
        }
        self.active &= !code.bit();
    }

    pub fn is_active(&self, code: BlinkCode) -> bool {
        self.active & code.bit() != 0
    }

    /// The code the LED currently shows.
    pub fn current(&self) -> Option<BlinkCode> {
        BlinkCode::ALL.into_iter().find(|c| self.is_active(*c))
    }
}

// ── NodeServices ──────────────────────────────────────────────────────────────

/// Everything a function module or message handler may use.
pub struct NodeServices {
    pub transport: CanTransport,
    pub storage: PartitionStorage,
    pub indicator: BlinkIndicator,
    clock: Arc<dyn Clock>,
    state: NodeState,
    emergency_stop: bool,
    started_ms: u64,
    flush_timeout_ms: u64,
}

impl std::fmt::Debug for NodeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServices")
            .field("address", &self.transport.address())
            .field("state", &self.state)
            .field("emergency_stop", &self.emergency_stop)
            .field("storage", &self.storage)
            .finish()
    }
}

impl NodeServices {
    pub fn new(
        transport: CanTransport,
        storage: PartitionStorage,
        clock: Arc<dyn Clock>,
        flush_timeout_ms: u64,
    ) -> Self {
        let started_ms = clock.now_ms();
        Self {
            transport,
            storage,
            indicator: BlinkIndicator::default(),
            clock,
            state: NodeState::Startup,
            emergency_stop: false,
            started_ms,
            flush_timeout_ms,
        }
    }

    pub fn node_state(&self) -> NodeState {
        self.state
    }

    /// Change the node state.
    ///
    /// Entering [`NodeState::Standby`] write-protects the storage; leaving it
    /// lifts that protection source again.
    pub fn set_node_state(&mut self, state: NodeState) {
        if state == self.state {
            return;
        }
        info!(from = ?self.state, to = ?state, "node state changed");
        self.state = state;
        self.storage
            .set_write_protect(WriteProtect::Standby, state == NodeState::Standby);
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop
    }

    pub fn set_emergency_stop(&mut self, asserted: bool) {
        if asserted != self.emergency_stop {
            if asserted {
                warn!("emergency stop asserted");
                self.indicator.assert(BlinkCode::EmergencyStop);
            } else {
                info!("emergency stop released");
                self.indicator.deassert(BlinkCode::EmergencyStop);
            }
        }
        self.emergency_stop = asserted;
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Milliseconds since the services were created.
    pub fn uptime_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.started_ms)
    }

    pub fn flush_timeout_ms(&self) -> u64 {
        self.flush_timeout_ms
    }

    /// Report `error` on the bus as an event frame on `channel`.
    ///
    /// `command_word` identifies the command that caused it, `0` if none.
    pub fn report(&self, channel: TaskId, error: &BaseError, command_word: u16) {
        debug!(channel, %error, command_word, "reporting error event");
        let event = CanMessage::event(error.code(), command_word);
        if let Err(e) = self.transport.write_message(channel, &event) {
            warn!(channel, error = %e, "failed to queue error event");
        }
    }
}

// ── NodeRuntime ───────────────────────────────────────────────────────────────

/// One complete node: services, scheduler and dispatcher.
pub struct NodeRuntime {
    services: NodeServices,
    scheduler: TaskScheduler,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("services", &self.services)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl NodeRuntime {
    /// Build a node from its configuration and hardware.
    ///
    /// Configures the CAN acceptance filters, mounts the storage (formatting
    /// a blank device) and registers the base module as module 0 / task 0.
    pub fn new(
        config: &RuntimeConfig,
        can: Box<dyn CanController>,
        device: Box<dyn StorageDevice>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BaseError> {
        let address = NodeAddress::new(config.node.node_type, config.node.node_index);
        let transport = CanTransport::new(
            address,
            can,
            config.can.send_queue_size,
            config.can.recv_queue_size,
            clock.clone(),
        );
        transport.configure_filters()?;

        let storage = PartitionStorage::mount(device, config.storage.partition_count)?;
        let services = NodeServices::new(transport, storage, clock, config.can.flush_timeout_ms);

        let mut runtime = Self {
            services,
            scheduler: TaskScheduler::new(config.scheduler.max_modules, config.scheduler.max_tasks),
            dispatcher: Dispatcher::new(),
        };
        runtime.register_module(BASE_MODULE_ID, 1, Box::new(BaseModule::new()))?;
        runtime.register_messages(BASE_MODULE_ID, &base_module::messages());

        info!(%address, "node runtime initialised");
        Ok(runtime)
    }

    /// Register a function module; returns the task id of instance 0.
    pub fn register_module(
        &mut self,
        id: ModuleId,
        instances: u8,
        module: Box<dyn FunctionModule>,
    ) -> Result<TaskId, BaseError> {
        self.scheduler.register_module(id, instances, module)
    }

    pub fn register_messages(&mut self, module: ModuleId, entries: &[MessageEntry]) {
        self.dispatcher.register_messages(module, entries);
    }

    /// Register `entries` under every module registered so far.
    pub fn register_broadcast(&mut self, entries: &[MessageEntry]) {
        self.dispatcher.register_broadcast(&self.scheduler, entries);
    }

    /// Run one superloop cycle.
    pub fn schedule_tasks(&mut self) {
        self.scheduler
            .schedule_tasks(&mut self.services, &mut self.dispatcher);
    }

    pub fn set_module_control(
        &mut self,
        task: TaskId,
        control: ModuleControl,
    ) -> Result<(), BaseError> {
        self.scheduler
            .set_module_control(&mut self.services, task, control)
    }

    pub fn get_module_status(&mut self, task: TaskId, status: u16, default: i32) -> i32 {
        self.scheduler
            .get_module_status(&mut self.services, task, status, default)
    }

    pub fn set_task_priority(&mut self, task: TaskId, priority: u8) -> Result<(), BaseError> {
        self.scheduler.set_task_priority(task, priority)
    }

    /// Enter [`NodeState::Shutdown`] and ask every task to shut down.
    ///
    /// The scheduler moves the node on to `Standby` once every function
    /// module has suspended itself.
    pub fn begin_shutdown(&mut self) {
        self.services.set_node_state(NodeState::Shutdown);
        if let Err(e) = self
            .scheduler
            .broadcast_control(&mut self.services, ModuleControl::Shutdown)
        {
            warn!(error = %e, "shutdown request not accepted by every module");
        }
    }

    pub fn services(&self) -> &NodeServices {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut NodeServices {
        &mut self.services
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Clone of the transport handle, for the interrupt side.
    pub fn transport(&self) -> CanTransport {
        self.services.transport.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
