/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cooperative task scheduler (the superloop).
//!
//! [`TaskScheduler`] owns the module and task tables and is the only driver
//! of control flow.  Each call to [`schedule_tasks`](TaskScheduler::schedule_tasks)
//! is one superloop cycle:
//!
//! 1. every due, runnable task is invoked once, in registration order;
//! 2. the dispatcher drains the receive queue;
//! 3. the cycle counter advances (wrapping).
//!
//! # Priority
//! A task's priority is a *run divisor*: the task is due when
//! `cycle % priority == 0`.  It tunes how often a task is polled, never how
//! long it may run.  In auto mode the divisor follows the state the task
//! returned last:
//!
//! | Returned state | Divisor |
//! |---|---|
//! | `Busy` | 1 |
//! | `Disabled` | 6 |
//! | anything else, or an error | 3 |
//!
//! # Runnability
//! The base module task always runs.  Function module tasks run only while
//! they are not suspended and the node state is past `Identify` and not
//! `Standby`.

pub mod task;

pub use task::{ModuleControl, ModuleState, TaskDescriptor, TaskState};

use tracing::{debug, info, warn};

use crate::can::MAX_CHANNEL;
use crate::dispatch::Dispatcher;
use crate::error::{BaseError, BASE_MODULE_ID};
use crate::node::{NodeServices, NodeState};

/// Function module type id.
pub type ModuleId = u8;

/// Index into the task table; also the CAN channel of the task.
pub type TaskId = u16;

// ── Module interface ──────────────────────────────────────────────────────────

/// The three-call interface every function module implements.
pub trait FunctionModule {
    /// Periodic work for one instance.  Must not block.
    fn task(
        &mut self,
        services: &mut NodeServices,
        instance: u8,
    ) -> Result<ModuleState, BaseError>;

    /// Handle a control request.  The default accepts and ignores it.
    fn control(
        &mut self,
        _services: &mut NodeServices,
        _instance: u8,
        _control: ModuleControl,
    ) -> Result<(), BaseError> {
        Ok(())
    }

    /// Report a module-defined status value.
    fn status(
        &mut self,
        _services: &mut NodeServices,
        _instance: u8,
        status: u16,
    ) -> Result<i32, BaseError> {
        Err(BaseError::UnsupportedStatus { status })
    }
}

struct ModuleDescriptor {
    id: ModuleId,
    instances: u8,
    first_task: TaskId,
    interface: Box<dyn FunctionModule>,
}

// ── TaskScheduler ─────────────────────────────────────────────────────────────

/// Module / task registry and superloop driver.
pub struct TaskScheduler {
    modules: Vec<ModuleDescriptor>,
    tasks: Vec<TaskDescriptor>,
    max_modules: usize,
    max_tasks: usize,
    cycle: u32,
    active_tasks: usize,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("modules", &self.modules.len())
            .field("tasks", &self.tasks)
            .field("cycle", &self.cycle)
            .finish()
    }
}

impl TaskScheduler {
    /// Create an empty scheduler.
    ///
    /// `max_tasks` is capped at the number of addressable CAN channels.
    pub fn new(max_modules: usize, max_tasks: usize) -> Self {
        let max_tasks = max_tasks.min(MAX_CHANNEL as usize + 1);
        Self {
            modules: Vec::with_capacity(max_modules),
            tasks: Vec::with_capacity(max_tasks),
            max_modules,
            max_tasks,
            cycle: 0,
            active_tasks: 0,
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Register a module with `instances` tasks.
    ///
    /// Returns the task id of instance 0; the other instances follow
    /// densely.
    pub fn register_module(
        &mut self,
        id: ModuleId,
        instances: u8,
        interface: Box<dyn FunctionModule>,
    ) -> Result<TaskId, BaseError> {
        if instances == 0 {
            return Err(BaseError::InvalidInstanceCount { module: id });
        }
        if self.modules.iter().any(|m| m.id == id) {
            return Err(BaseError::ModuleExists { module: id });
        }
        if self.modules.len() >= self.max_modules {
            return Err(BaseError::ModuleTableFull);
        }
        if self.tasks.len() + instances as usize > self.max_tasks {
            return Err(BaseError::TaskTableFull);
        }

        let module_index = self.modules.len();
        let first_task = self.tasks.len() as TaskId;
        self.tasks
            .extend((0..instances).map(|instance| TaskDescriptor::new(id, module_index, instance)));
        self.modules.push(ModuleDescriptor {
            id,
            instances,
            first_task,
            interface,
        });

        info!(module = id, instances, first_task, "module registered");
        Ok(first_task)
    }

    /// Task id of `(module, instance)`.
    pub fn get_task_id(&self, module: ModuleId, instance: u8) -> Option<TaskId> {
        self.tasks
            .iter()
            .position(|t| t.module_id == module && t.instance == instance)
            .map(|i| i as TaskId)
    }

    /// Pin the run divisor of `task`; `0` returns it to auto mode.
    pub fn set_task_priority(&mut self, task: TaskId, priority: u8) -> Result<(), BaseError> {
        let t = self.task_mut(task)?;
        if priority == 0 {
            t.auto_priority = true;
            t.priority = 1;
        } else {
            t.auto_priority = false;
            t.priority = priority;
        }
        debug!(task, priority, "task priority set");
        Ok(())
    }

    // ── Control / status ──────────────────────────────────────────────────────

    /// Apply `control` to the task state and forward it to the module.
    ///
    /// `Shutdown` and `Wakeup` are idempotent.
    pub fn set_module_control(
        &mut self,
        services: &mut NodeServices,
        task: TaskId,
        control: ModuleControl,
    ) -> Result<(), BaseError> {
        let t = self.task_mut(task)?;
        match control {
            ModuleControl::Shutdown if t.state == TaskState::Runnable => {
                t.state = TaskState::Shutdown;
            }
            ModuleControl::Wakeup => t.state = TaskState::Runnable,
            _ => {}
        }
        let (module_index, instance) = (t.module_index, t.instance);
        debug!(task, ?control, "module control");
        self.modules[module_index]
            .interface
            .control(services, instance, control)
    }

    /// Send `control` to every task; returns the first failure.
    pub fn broadcast_control(
        &mut self,
        services: &mut NodeServices,
        control: ModuleControl,
    ) -> Result<(), BaseError> {
        let mut first_error = None;
        for task in 0..self.tasks.len() as TaskId {
            if let Err(e) = self.set_module_control(services, task, control) {
                warn!(task, ?control, error = %e, "module control failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Query a module status value, falling back to `default` on an unknown
    /// task or any failure.
    pub fn get_module_status(
        &mut self,
        services: &mut NodeServices,
        task: TaskId,
        status: u16,
        default: i32,
    ) -> i32 {
        let Some(t) = self.tasks.get(task as usize).copied() else {
            return default;
        };
        self.modules[t.module_index]
            .interface
            .status(services, t.instance, status)
            .unwrap_or(default)
    }

    // ── Superloop ─────────────────────────────────────────────────────────────

    /// Run one cycle: due tasks, then message dispatch.
    pub fn schedule_tasks(&mut self, services: &mut NodeServices, dispatcher: &mut Dispatcher) {
        let cycle = self.cycle;

        for index in 0..self.tasks.len() {
            let task = self.tasks[index];
            let id = index as TaskId;
            if !task.is_due(cycle) || !self.is_runnable(&task, services.node_state()) {
                continue;
            }

            let state = match self.modules[task.module_index]
                .interface
                .task(services, task.instance)
            {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(task = id, module = task.module_id, error = %e, "task failed");
                    services.report(id, &e, 0);
                    None
                }
            };

            let t = &mut self.tasks[index];
            if t.auto_priority {
                t.priority = ModuleState::auto_divisor(state);
            }
            if t.state == TaskState::Shutdown && state.is_some_and(ModuleState::allows_suspend) {
                t.state = TaskState::Suspend;
                info!(task = id, module = t.module_id, "task suspended");
            }
        }

        self.active_tasks = self
            .tasks
            .iter()
            .filter(|t| t.module_id != BASE_MODULE_ID && t.state != TaskState::Suspend)
            .count();
        if services.node_state() == NodeState::Shutdown && self.active_tasks == 0 {
            services.set_node_state(NodeState::Standby);
        }

        dispatcher.dispatch_messages(services, self);
        self.cycle = self.cycle.wrapping_add(1);
    }

    fn is_runnable(&self, task: &TaskDescriptor, node_state: NodeState) -> bool {
        task.module_id == BASE_MODULE_ID
            || (task.state != TaskState::Suspend && node_state.runs_tasks())
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Registered module ids, in registration order.
    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.iter().map(|m| m.id)
    }

    /// `(first task, instance count)` of a registered module.
    pub fn module_tasks(&self, module: ModuleId) -> Option<(TaskId, u8)> {
        self.modules
            .iter()
            .find(|m| m.id == module)
            .map(|m| (m.first_task, m.instances))
    }

    pub fn task(&self, task: TaskId) -> Option<&TaskDescriptor> {
        self.tasks.get(task as usize)
    }

    pub fn cycle_counter(&self) -> u32 {
        self.cycle
    }

    /// Function module tasks not suspended, as of the last cycle.
    pub fn active_task_count(&self) -> usize {
        self.active_tasks
    }

    fn task_mut(&mut self, task: TaskId) -> Result<&mut TaskDescriptor, BaseError> {
        self.tasks
            .get_mut(task as usize)
            .ok_or(BaseError::TaskNotExists { task })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::can::{CanMessage, CanTransport, NodeAddress};
    use crate::hal::sim::{ManualClock, RamStorage, SimCanController};
    use crate::storage::PartitionStorage;

    type Calls = Rc<RefCell<Vec<(u32, u8)>>>;

    /// Records every call and answers with a scripted state.
    struct Scripted {
        calls: Calls,
        cycle: Rc<RefCell<u32>>,
        script: Box<dyn FnMut(u32) -> Result<ModuleState, BaseError>>,
        controls: Rc<RefCell<Vec<ModuleControl>>>,
    }

    impl FunctionModule for Scripted {
        fn task(
            &mut self,
            _services: &mut NodeServices,
            instance: u8,
        ) -> Result<ModuleState, BaseError> {
            let cycle = *self.cycle.borrow();
            self.calls.borrow_mut().push((cycle, instance));
            (self.script)(cycle)
        }

        fn control(
            &mut self,
            _services: &mut NodeServices,
            _instance: u8,
            control: ModuleControl,
        ) -> Result<(), BaseError> {
            self.controls.borrow_mut().push(control);
            Ok(())
        }

        fn status(
            &mut self,
            _services: &mut NodeServices,
            instance: u8,
            status: u16,
        ) -> Result<i32, BaseError> {
            match status {
                1 => Ok(100 + instance as i32),
                _ => Err(BaseError::UnsupportedStatus { status }),
            }
        }
    }

    struct Fixture {
        scheduler: TaskScheduler,
        dispatcher: Dispatcher,
        services: NodeServices,
        can: SimCanController,
        cycle: Rc<RefCell<u32>>,
    }

    impl Fixture {
        fn new() -> Self {
            let can = SimCanController::new();
            let clock = Arc::new(ManualClock::new());
            let transport = CanTransport::new(
                NodeAddress::new(3, 1),
                Box::new(can.clone()),
                16,
                16,
                clock.clone(),
            );
            let storage = PartitionStorage::mount(Box::new(RamStorage::new(1024)), 8).unwrap();
            let mut services = NodeServices::new(transport, storage, clock, 100);
            services.set_node_state(NodeState::Normal);
            Self {
                scheduler: TaskScheduler::new(4, 8),
                dispatcher: Dispatcher::new(),
                services,
                can,
                cycle: Rc::new(RefCell::new(0)),
            }
        }

        fn module(
            &mut self,
            id: ModuleId,
            instances: u8,
            script: impl FnMut(u32) -> Result<ModuleState, BaseError> + 'static,
        ) -> (Calls, Rc<RefCell<Vec<ModuleControl>>>) {
            let calls = Calls::default();
            let controls = Rc::new(RefCell::new(Vec::new()));
            self.scheduler
                .register_module(
                    id,
                    instances,
                    Box::new(Scripted {
                        calls: calls.clone(),
                        cycle: self.cycle.clone(),
                        script: Box::new(script),
                        controls: controls.clone(),
                    }),
                )
                .unwrap();
            (calls, controls)
        }

        fn run(&mut self, cycles: u32) {
            for _ in 0..cycles {
                *self.cycle.borrow_mut() = self.scheduler.cycle_counter();
                self.scheduler
                    .schedule_tasks(&mut self.services, &mut self.dispatcher);
            }
        }
    }

    fn cycles_of(calls: &Calls) -> Vec<u32> {
        calls.borrow().iter().map(|(c, _)| *c).collect()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn module_with_two_instances_gets_two_task_ids() {
        let mut f = Fixture::new();
        f.module(5, 2, |_| Ok(ModuleState::Idle));

        let t0 = f.scheduler.get_task_id(5, 0).unwrap();
        let t1 = f.scheduler.get_task_id(5, 1).unwrap();
        assert_ne!(t0, t1);
        assert_eq!(f.scheduler.get_task_id(5, 2), None);
    }

    #[test]
    fn task_ids_are_dense_and_unique() {
        let mut f = Fixture::new();
        f.module(1, 3, |_| Ok(ModuleState::Idle));
        f.module(2, 1, |_| Ok(ModuleState::Idle));
        f.module(7, 4, |_| Ok(ModuleState::Idle));

        let mut seen = HashSet::new();
        for (module, instances) in [(1, 3), (2, 1), (7, 4)] {
            for instance in 0..instances {
                let id = f.scheduler.get_task_id(module, instance).unwrap();
                assert!(seen.insert(id));
                let t = f.scheduler.task(id).unwrap();
                assert_eq!((t.module_id, t.instance), (module, instance));
            }
        }
        assert_eq!(seen, (0..8).collect::<HashSet<TaskId>>());
        assert_eq!(f.scheduler.module_tasks(7), Some((4, 4)));
    }

    #[test]
    fn registration_failures_leave_tables_unchanged() {
        let mut f = Fixture::new();
        f.module(1, 6, |_| Ok(ModuleState::Idle));

        let idle = || -> Box<dyn FunctionModule> {
            Box::new(Scripted {
                calls: Calls::default(),
                cycle: Rc::new(RefCell::new(0)),
                script: Box::new(|_| Ok(ModuleState::Idle)),
                controls: Rc::new(RefCell::new(Vec::new())),
            })
        };

        assert_eq!(
            f.scheduler.register_module(1, 1, idle()),
            Err(BaseError::ModuleExists { module: 1 })
        );
        assert_eq!(
            f.scheduler.register_module(2, 3, idle()),
            Err(BaseError::TaskTableFull)
        );
        assert_eq!(
            f.scheduler.register_module(2, 0, idle()),
            Err(BaseError::InvalidInstanceCount { module: 2 })
        );
        assert_eq!(f.scheduler.task_count(), 6);

        f.scheduler.register_module(2, 1, idle()).unwrap();
        f.scheduler.register_module(3, 1, idle()).unwrap();
        f.scheduler.register_module(4, 1, idle()).unwrap_err();
        assert_eq!(f.scheduler.module_count(), 3);
    }

    #[test]
    fn module_table_full() {
        let mut f = Fixture::new();
        for id in 1..=4 {
            f.module(id, 1, |_| Ok(ModuleState::Idle));
        }
        let extra = Box::new(Scripted {
            calls: Calls::default(),
            cycle: Rc::new(RefCell::new(0)),
            script: Box::new(|_| Ok(ModuleState::Idle)),
            controls: Rc::new(RefCell::new(Vec::new())),
        });
        assert_eq!(
            f.scheduler.register_module(9, 1, extra),
            Err(BaseError::ModuleTableFull)
        );
    }

    // ── Auto priority ─────────────────────────────────────────────────────────

    #[test]
    fn busy_task_runs_again_on_next_cycle() {
        let mut f = Fixture::new();
        let (calls, _) = f.module(1, 1, |cycle| {
            Ok(if cycle == 3 {
                ModuleState::Busy
            } else {
                ModuleState::Idle
            })
        });
        f.run(8);
        assert_eq!(cycles_of(&calls), vec![0, 3, 4, 6]);
    }

    #[test]
    fn disabled_task_waits_six_cycles() {
        let mut f = Fixture::new();
        let (calls, _) = f.module(1, 1, |cycle| {
            Ok(if cycle < 6 {
                ModuleState::Busy
            } else {
                ModuleState::Disabled
            })
        });
        f.run(19);
        assert_eq!(cycles_of(&calls), vec![0, 1, 2, 3, 4, 5, 6, 12, 18]);
    }

    #[test]
    fn failing_task_is_polled_every_third_cycle_and_reported() {
        let mut f = Fixture::new();
        let (calls, _) = f.module(1, 1, |_| Err(BaseError::AccessDenied));
        f.run(7);
        assert_eq!(cycles_of(&calls), vec![0, 3, 6]);

        let events = f
            .can
            .take_sent()
            .iter()
            .filter_map(CanMessage::parse_event)
            .filter(|(code, _)| *code == BaseError::AccessDenied.code())
            .count();
        assert_eq!(events, 3);
    }

    #[test]
    fn pinned_priority_ignores_returned_state() {
        let mut f = Fixture::new();
        let (calls, _) = f.module(1, 1, |_| Ok(ModuleState::Busy));
        f.scheduler.set_task_priority(0, 4).unwrap();
        f.run(9);
        assert_eq!(cycles_of(&calls), vec![0, 4, 8]);

        f.scheduler.set_task_priority(0, 0).unwrap();
        f.run(3);
        assert_eq!(cycles_of(&calls), vec![0, 4, 8, 9, 10, 11]);
        assert_eq!(
            f.scheduler.set_task_priority(42, 1),
            Err(BaseError::TaskNotExists { task: 42 })
        );
    }

    #[test]
    fn instances_run_in_registration_order() {
        let mut f = Fixture::new();
        let (calls, _) = f.module(1, 3, |_| Ok(ModuleState::Busy));
        f.run(1);
        assert_eq!(*calls.borrow(), vec![(0, 0), (0, 1), (0, 2)]);
    }

    // ── Runnability / shutdown ────────────────────────────────────────────────

    #[test]
    fn function_modules_wait_for_node_state() {
        let mut f = Fixture::new();
        f.services.set_node_state(NodeState::Identify);
        let (calls, _) = f.module(1, 1, |_| Ok(ModuleState::Busy));
        f.run(3);
        assert!(calls.borrow().is_empty());

        f.services.set_node_state(NodeState::Configure);
        f.run(1);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn shutdown_suspends_task_and_enters_standby() {
        let mut f = Fixture::new();
        let (calls, controls) = f.module(1, 1, |cycle| {
            Ok(if cycle < 2 {
                ModuleState::Busy
            } else {
                ModuleState::Standby
            })
        });
        f.run(2);

        f.services.set_node_state(NodeState::Shutdown);
        f.scheduler
            .set_module_control(&mut f.services, 0, ModuleControl::Shutdown)
            .unwrap();
        // idempotent
        f.scheduler
            .set_module_control(&mut f.services, 0, ModuleControl::Shutdown)
            .unwrap();
        assert_eq!(f.scheduler.task(0).unwrap().state, TaskState::Shutdown);
        assert_eq!(f.scheduler.active_task_count(), 1);

        f.run(1);
        assert_eq!(f.scheduler.task(0).unwrap().state, TaskState::Suspend);
        assert_eq!(f.scheduler.active_task_count(), 0);
        assert_eq!(f.services.node_state(), NodeState::Standby);

        let before = calls.borrow().len();
        f.run(12);
        assert_eq!(calls.borrow().len(), before);
        assert_eq!(
            *controls.borrow(),
            vec![ModuleControl::Shutdown, ModuleControl::Shutdown]
        );
    }

    #[test]
    fn wakeup_resumes_suspended_task() {
        let mut f = Fixture::new();
        let (calls, _) = f.module(1, 1, |_| Ok(ModuleState::Disabled));
        f.scheduler
            .set_module_control(&mut f.services, 0, ModuleControl::Shutdown)
            .unwrap();
        f.run(1);
        assert_eq!(f.scheduler.task(0).unwrap().state, TaskState::Suspend);
        // Normal state: no standby transition
        assert_eq!(f.services.node_state(), NodeState::Normal);

        f.scheduler
            .set_module_control(&mut f.services, 0, ModuleControl::Wakeup)
            .unwrap();
        f.run(6);
        assert_eq!(cycles_of(&calls), vec![0, 6]);
    }

    #[test]
    fn control_for_unknown_task_fails() {
        let mut f = Fixture::new();
        assert_eq!(
            f.scheduler
                .set_module_control(&mut f.services, 3, ModuleControl::Stop),
            Err(BaseError::TaskNotExists { task: 3 })
        );
    }

    #[test]
    fn broadcast_control_reaches_every_task() {
        let mut f = Fixture::new();
        let (_, a) = f.module(1, 2, |_| Ok(ModuleState::Idle));
        let (_, b) = f.module(2, 1, |_| Ok(ModuleState::Idle));
        f.scheduler
            .broadcast_control(&mut f.services, ModuleControl::Custom(0x42))
            .unwrap();
        assert_eq!(a.borrow().len(), 2);
        assert_eq!(*b.borrow(), vec![ModuleControl::Custom(0x42)]);
    }

    #[test]
    fn status_falls_back_to_default() {
        let mut f = Fixture::new();
        f.module(1, 2, |_| Ok(ModuleState::Idle));
        let s = &mut f.scheduler;
        assert_eq!(s.get_module_status(&mut f.services, 1, 1, -1), 101);
        assert_eq!(s.get_module_status(&mut f.services, 1, 2, -1), -1);
        assert_eq!(s.get_module_status(&mut f.services, 9, 1, -7), -7);
    }

    #[test]
    fn cycle_counter_advances_once_per_cycle() {
        let mut f = Fixture::new();
        f.run(5);
        assert_eq!(f.scheduler.cycle_counter(), 5);
    }
}
