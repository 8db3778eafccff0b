/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task descriptors and the values exchanged with function modules.
//!
//! One [`TaskDescriptor`] exists per module instance.  Its index in the task
//! table is its [`TaskId`](super::TaskId), which doubles as the CAN channel
//! of that instance.

use super::ModuleId;

// ── Module-reported state ─────────────────────────────────────────────────────

/// State returned by a module's `task()` call.
///
/// Drives auto-priority and the shutdown handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Work pending; poll on every cycle.
    Busy,
    Idle,
    /// Nothing to do until re-enabled; polled rarely.
    Disabled,
    /// Ready for node standby.
    Standby,
}

impl ModuleState {
    /// Run divisor used in auto-priority mode.
    ///
    /// `None` (the task failed) counts like any other non-busy state.
    pub fn auto_divisor(state: Option<ModuleState>) -> u8 {
        match state {
            Some(ModuleState::Busy) => 1,
            Some(ModuleState::Disabled) => 6,
            _ => 3,
        }
    }

    /// `true` if a task in shutdown may be suspended after returning this.
    pub fn allows_suspend(self) -> bool {
        matches!(self, ModuleState::Disabled | ModuleState::Standby)
    }
}

// ── Control requests ──────────────────────────────────────────────────────────

/// Control request forwarded to a module's `control()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleControl {
    /// Node is shutting down; the module should wind down and report
    /// `Disabled` or `Standby`.
    Shutdown,
    /// Leave shutdown / suspension.
    Wakeup,
    /// Stop motion or output; observed on the next `task()` call.
    Stop,
    Resume,
    /// Module-specific control id.
    Custom(u16),
}

// ── Task descriptor ───────────────────────────────────────────────────────────

/// Scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Runnable,
    /// Asked to shut down; still scheduled until it reports it is done.
    Shutdown,
    /// Excluded from scheduling until woken up.
    Suspend,
}

/// One schedulable module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub module_id: ModuleId,
    /// Index into the scheduler's module table.
    pub module_index: usize,
    pub instance: u8,
    /// Run every `priority`-th cycle; `0` never runs.
    pub priority: u8,
    /// Recompute `priority` from the returned [`ModuleState`].
    pub auto_priority: bool,
    pub state: TaskState,
}

impl TaskDescriptor {
    pub(crate) fn new(module_id: ModuleId, module_index: usize, instance: u8) -> Self {
        Self {
            module_id,
            module_index,
            instance,
            priority: 1,
            auto_priority: true,
            state: TaskState::Runnable,
        }
    }

    /// `true` if this task is due on `cycle`.
    pub fn is_due(&self, cycle: u32) -> bool {
        self.priority != 0 && cycle % self.priority as u32 == 0
    }
}
