// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cooperative priority scheduler.
//!
//! Tasks are message driven and background interrupts (bg-ints) are edge driven. Both live in per-priority lists and
//! are dispatched strictly by priority: a send or a raise that targets a priority above the one currently running
//! pre-empts synchronously, by re-entering [SharedScheduler::check_context_switch] from inside the sender.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::SchedulerConfig,
    runtime::{
        fail::Fail,
        limits::{
            MIN_TIMER_DELAY_US,
            NUM_PRIORITIES,
        },
        scheduler::{
            message::{
                Message,
                MessageId,
                MessageIdGenerator,
                MessageQueue,
                Payload,
                RoutingInfo,
            },
            queue::{
                Member,
                PriorityList,
            },
            task::{
                Priority,
                StaticTask,
                TaskHandler,
                TaskId,
                TaskKind,
            },
        },
        timer::Timer,
        SharedObject,
    },
};
use ::slab::Slab;
use ::std::{
    cmp,
    mem,
    ops::{
        Deref,
        DerefMut,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Longest time the scheduler sleeps when there is nothing to do and no timer pending.
const SCHED_MAX_DELAY: Duration = Duration::from_millis(100);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Which of the two per-priority lists an operation applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ListKind {
    Task,
    BgInt,
}

#[derive(Clone, Copy)]
enum EntryPoint {
    Init,
    Message,
    Kick,
}

pub(super) struct TaskPart {
    pub(super) id: TaskId,
    pub(super) queue: MessageQueue,
    pub(super) prunable: bool,
}

pub(super) struct BgIntPart {
    pub(super) id: TaskId,
    pub(super) raised: bool,
    pub(super) prunable: bool,
}

/// Arena slot shared by a task and/or bg-int. A coupled pair is a single entity with both parts present.
pub(super) struct Entity {
    /// Generation of the slot. Handles captured before the slot was recycled no longer match.
    pub(super) serial: u64,
    /// Taken out of the slot while it runs.
    pub(super) handler: Option<Box<dyn TaskHandler>>,
    pub(super) task: Option<TaskPart>,
    pub(super) bg_int: Option<BgIntPart>,
    pub(super) run_init: bool,
}

/// Generation-checked reference to a background interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BgIntHandle {
    key: usize,
    serial: u64,
    id: TaskId,
}

struct TimedMessage {
    task: TaskId,
    tag: u16,
    payload: Option<Payload>,
    routing: RoutingInfo,
}

/// Scheduler state of one core.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) entities: Slab<Entity>,
    next_serial: u64,
    pub(super) tasks_in_priority: [PriorityList; NUM_PRIORITIES],
    pub(super) bg_ints_in_priority: [PriorityList; NUM_PRIORITIES],
    /// Bit `p` is set while priority `p` may have runnable work.
    current_priority_mask: u32,
    /// Queued messages plus raised bg-ints across every priority.
    total_num_messages: usize,
    current: Option<(TaskId, usize)>,
    interrupt_depth: usize,
    msg_ids: MessageIdGenerator,
    timer: Timer<TimedMessage>,
    initialised: bool,
    init_done: bool,
    stop_requested: bool,
    num_dispatched: u64,
}

#[derive(Clone)]
pub struct SharedScheduler(SharedObject<Scheduler>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl BgIntHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, now: Instant) -> Self {
        Self {
            config,
            entities: Slab::new(),
            next_serial: 1,
            tasks_in_priority: Default::default(),
            bg_ints_in_priority: Default::default(),
            current_priority_mask: 0,
            total_num_messages: 0,
            current: None,
            interrupt_depth: 0,
            msg_ids: MessageIdGenerator::new(),
            timer: Timer::new(now),
            initialised: false,
            init_done: false,
            stop_requested: false,
            num_dispatched: 0,
        }
    }

    /// Populates the priority lists from static task descriptors. Descriptors whose processor mask does not include
    /// this processor are skipped.
    pub fn init_sched(&mut self, static_tasks: Vec<StaticTask>) -> Result<(), Fail> {
        if self.initialised {
            let cause: &str = "scheduler is already initialised";
            error!("init_sched(): {}", cause);
            return Err(Fail::new(libc::EBUSY, cause));
        }
        self.initialised = true;

        let processor_bit: u32 = 1 << self.config.processor_id;
        for static_task in static_tasks {
            if static_task.proc_mask & processor_bit == 0 {
                continue;
            }
            if static_task.index == 0 {
                let cause: String = format!("static task uses reserved index (priority={:?})", static_task.priority);
                error!("init_sched(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            }
            if self.index_in_use(static_task.index) {
                panic!("init_sched(): duplicate static task index {}", static_task.index);
            }
            self.insert_entity(
                static_task.priority,
                static_task.index,
                static_task.kind,
                static_task.handler,
                static_task.kind != TaskKind::BgInt,
            );
        }
        Ok(())
    }

    /// Links a new entity into the lists of its priority and returns its identifier.
    pub(super) fn insert_entity(
        &mut self,
        priority: Priority,
        index: u8,
        kind: TaskKind,
        handler: Box<dyn TaskHandler>,
        run_init: bool,
    ) -> TaskId {
        let base: TaskId = match kind {
            TaskKind::Coupled => TaskId::pack(priority, index).as_coupled(),
            _ => TaskId::pack(priority, index),
        };
        let serial: u64 = self.next_serial;
        self.next_serial += 1;

        let entity: Entity = Entity {
            serial,
            handler: Some(handler),
            task: match kind {
                TaskKind::BgInt => None,
                _ => Some(TaskPart {
                    id: base,
                    queue: MessageQueue::default(),
                    prunable: false,
                }),
            },
            bg_int: match kind {
                TaskKind::Task => None,
                _ => Some(BgIntPart {
                    id: base.as_bg_int(),
                    raised: false,
                    prunable: false,
                }),
            },
            run_init,
        };
        let has_task: bool = entity.task.is_some();
        let has_bg_int: bool = entity.bg_int.is_some();
        let key: usize = self.entities.insert(entity);
        let member: Member = Member { index, key };
        if has_task {
            self.tasks_in_priority[priority.level()].insert(member);
        }
        if has_bg_int {
            self.bg_ints_in_priority[priority.level()].insert(member);
        }

        match kind {
            TaskKind::BgInt => base.as_bg_int(),
            _ => base,
        }
    }

    pub(super) fn list(&self, kind: ListKind, level: usize) -> &PriorityList {
        match kind {
            ListKind::Task => &self.tasks_in_priority[level],
            ListKind::BgInt => &self.bg_ints_in_priority[level],
        }
    }

    pub(super) fn list_mut(&mut self, kind: ListKind, level: usize) -> &mut PriorityList {
        match kind {
            ListKind::Task => &mut self.tasks_in_priority[level],
            ListKind::BgInt => &mut self.bg_ints_in_priority[level],
        }
    }

    /// Whether `index` is used by any task or bg-int at any priority.
    pub(super) fn index_in_use(&self, index: u8) -> bool {
        self.tasks_in_priority
            .iter()
            .chain(self.bg_ints_in_priority.iter())
            .any(|list| list.contains_index(index))
    }

    /// Finds the arena slot of the task or bg-int named by `id`. The full identifier, flags included, must match.
    pub(super) fn find(&self, kind: ListKind, id: TaskId) -> Option<usize> {
        let level: usize = id.priority_level();
        if level >= NUM_PRIORITIES {
            return None;
        }
        let member: Member = self.list(kind, level).find_by_index(id.index())?;
        let entity: &Entity = self.entities.get(member.key)?;
        let found: bool = match kind {
            ListKind::Task => entity.task.as_ref().map_or(false, |t| t.id == id),
            ListKind::BgInt => entity.bg_int.as_ref().map_or(false, |b| b.id == id),
        };
        if found {
            Some(member.key)
        } else {
            None
        }
    }

    /// Returns a handle to the bg-int paired with `task_id`.
    pub fn sched_find_bgint(&self, task_id: TaskId) -> Option<BgIntHandle> {
        let id: TaskId = task_id.as_bg_int();
        let key: usize = self.find(ListKind::BgInt, id)?;
        let serial: u64 = self.entities.get(key)?.serial;
        Some(BgIntHandle { key, serial, id })
    }

    /// Packs a priority and an index into a task identifier.
    pub fn sched_pack_taskid(priority: Priority, index: u8) -> TaskId {
        TaskId::pack(priority, index)
    }

    /// Whether `id` names a live task or bg-int that may still receive work.
    pub fn is_live(&self, id: TaskId) -> bool {
        match self.lookup_part(id) {
            Some(prunable) => !prunable,
            None => false,
        }
    }

    /// Whether `id` has been deleted but not yet freed. Returns `None` if `id` does not exist at all.
    pub fn is_prunable(&self, id: TaskId) -> Option<bool> {
        self.lookup_part(id)
    }

    fn lookup_part(&self, id: TaskId) -> Option<bool> {
        if id.is_bg_int() {
            let key: usize = self.find(ListKind::BgInt, id)?;
            self.entities.get(key)?.bg_int.as_ref().map(|b| b.prunable)
        } else {
            let key: usize = self.find(ListKind::Task, id)?;
            self.entities.get(key)?.task.as_ref().map(|t| t.prunable)
        }
    }

    /// Number of messages queued on task `id`.
    pub fn queued_messages(&self, id: TaskId) -> Option<usize> {
        let key: usize = self.find(ListKind::Task, id.as_task())?;
        self.entities.get(key)?.task.as_ref().map(|t| t.queue.len())
    }

    /// Number of arena slots in use.
    pub fn num_allocated(&self) -> usize {
        self.entities.len()
    }

    pub fn num_messages(&self) -> usize {
        self.total_num_messages
    }

    /// Number of handler invocations since the scheduler was created.
    pub fn num_dispatched(&self) -> u64 {
        self.num_dispatched
    }

    pub fn sched_busy(&self) -> bool {
        self.total_num_messages > 0
    }

    pub fn get_current_task(&self) -> Option<TaskId> {
        self.current.map(|(id, _)| id)
    }

    pub fn get_current_priority(&self) -> Option<Priority> {
        self.current.and_then(|(id, _)| id.priority())
    }

    /// Priority of the running task or bg-int. Code running outside any handler runs at the lowest priority.
    pub fn current_task_priority(&self) -> Priority {
        self.get_current_priority().unwrap_or(Priority::Lowest)
    }

    pub fn is_current_context_interrupt(&self) -> bool {
        self.interrupt_depth > 0
    }

    /// Marks entry into interrupt context. While in interrupt context sends and raises never pre-empt.
    pub fn enter_irq(&mut self) {
        self.interrupt_depth += 1;
    }

    /// Requests the scheduler loop to return once the current pass unwinds.
    pub fn sched_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn now(&self) -> Instant {
        self.timer.now()
    }

    pub fn num_timers(&self) -> usize {
        self.timer.len()
    }

    pub fn processor_id(&self) -> u8 {
        self.config.processor_id
    }

    pub(super) fn increment_total(&mut self) {
        if self.total_num_messages >= self.config.max_messages {
            panic!(
                "increment_total(): too many messages (max_messages={:?})",
                self.config.max_messages
            );
        }
        self.total_num_messages += 1;
    }

    pub(super) fn decrement_total(&mut self, count: usize) {
        self.total_num_messages = match self.total_num_messages.checked_sub(count) {
            Some(total) => total,
            None => panic!("decrement_total(): message count underflow"),
        };
    }

    /// Pops the next message of the running task.
    pub fn get_message_with_routing(&mut self) -> Option<Message> {
        let (id, key): (TaskId, usize) = match self.current {
            Some((id, key)) if !id.is_bg_int() => (id, key),
            _ => panic!("get_message_with_routing(): only a task may read its own queue"),
        };
        let message: Option<Message> = self
            .entities
            .get_mut(key)
            .and_then(|entity| entity.task.as_mut())
            .and_then(|task| task.queue.pop_front());
        if message.is_some() {
            self.tasks_in_priority[id.priority_level()].sub_pending(1);
            self.decrement_total(1);
        }
        message
    }

    /// Pops the next message of the running task, discarding its routing information.
    pub fn get_message(&mut self) -> Option<(u16, Option<Payload>)> {
        self.get_message_with_routing().map(|msg| (msg.tag, msg.payload))
    }
}

impl SharedScheduler {
    pub fn new(config: SchedulerConfig, now: Instant) -> Self {
        Self(SharedObject::<Scheduler>::new(Scheduler::new(config, now)))
    }

    /// Runs the scheduler loop. Static task initialisers run on the first call. The loop returns when
    /// [Scheduler::sched_stop] is requested or, if so configured, once there is no work and no timer left.
    pub fn sched(&mut self) {
        if !self.init_done {
            self.run_init_functions();
        }
        self.stop_requested = false;

        loop {
            while self.total_num_messages > 0 && !self.stop_requested {
                self.check_context_switch(0);
                if self.total_num_messages > 0 && self.current_priority_mask == 0 {
                    panic!("sched(): outstanding messages but no ready priority");
                }
            }
            if self.stop_requested {
                break;
            }

            match self.timer.next_deadline() {
                Some(deadline) => {
                    let now: Instant = cmp::max(deadline, self.timer.now());
                    self.service_timers(now);
                },
                None if self.config.exit_when_idle => break,
                None => {
                    thread::sleep(SCHED_MAX_DELAY);
                    let now: Instant = self.timer.now() + SCHED_MAX_DELAY;
                    self.service_timers(now);
                },
            }
        }
    }

    fn run_init_functions(&mut self) {
        self.init_done = true;
        let pending: Vec<(usize, u64, TaskId)> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.run_init)
            .filter_map(|(key, entity)| entity.task.as_ref().map(|task| (key, entity.serial, task.id)))
            .collect();
        for (key, serial, id) in pending {
            trace!("run_init_functions(): initialising {:?}", id);
            let saved: Option<(TaskId, usize)> = self.current;
            self.current = Some((id, key));
            self.invoke(key, serial, id, EntryPoint::Init);
            self.current = saved;
        }
    }

    /// Runs every bg-int and task of a priority above `mask`, highest priority first.
    pub fn check_context_switch(&mut self, mask: u32) {
        let saved: Option<(TaskId, usize)> = self.current;

        while self.current_priority_mask > mask {
            let level: usize = (31 - self.current_priority_mask.leading_zeros()) as usize;
            loop {
                if self.bg_ints_in_priority[level].pending() > 0 {
                    self.service_bg_ints(level);
                }
                if self.tasks_in_priority[level].pending() > 0 {
                    self.service_tasks(level);
                }
                if self.bg_ints_in_priority[level].pending() == 0 && self.tasks_in_priority[level].pending() == 0 {
                    break;
                }
            }
            self.current_priority_mask &= !(1 << level);
        }

        self.current = saved;
    }

    fn service_bg_ints(&mut self, level: usize) {
        self.bg_ints_in_priority[level].lock();
        for member in self.bg_ints_in_priority[level].snapshot() {
            let (id, serial): (TaskId, u64) = match self.entities.get_mut(member.key) {
                Some(entity) => match entity.bg_int.as_mut() {
                    Some(bg_int) if bg_int.raised && !bg_int.prunable => {
                        bg_int.raised = false;
                        (bg_int.id, entity.serial)
                    },
                    _ => continue,
                },
                None => continue,
            };
            self.decrement_total(1);
            self.current = Some((id, member.key));
            self.invoke(member.key, serial, id, EntryPoint::Kick);
            self.bg_ints_in_priority[level].sub_pending(1);
            if self.bg_ints_in_priority[level].pending() == 0 {
                break;
            }
        }
        self.unlock_list(ListKind::BgInt, level);
    }

    fn service_tasks(&mut self, level: usize) {
        self.tasks_in_priority[level].lock();
        for member in self.tasks_in_priority[level].snapshot() {
            let (id, serial): (TaskId, u64) = match self.entities.get(member.key) {
                Some(entity) => match entity.task.as_ref() {
                    Some(task) if !task.queue.is_empty() && !task.prunable => (task.id, entity.serial),
                    _ => continue,
                },
                None => continue,
            };
            self.current = Some((id, member.key));
            self.invoke(member.key, serial, id, EntryPoint::Message);
        }
        self.unlock_list(ListKind::Task, level);
    }

    /// Runs one entry point of the handler stored in slot `key`. The handler is moved out of its slot for the
    /// duration of the call and moved back only if the slot still holds the same generation.
    fn invoke(&mut self, key: usize, serial: u64, id: TaskId, entry: EntryPoint) {
        let mut handler: Box<dyn TaskHandler> = match self.entities.get_mut(key).and_then(|e| e.handler.take()) {
            Some(handler) => handler,
            None => panic!("invoke(): no handler for {:?}", id),
        };
        self.num_dispatched += 1;
        match entry {
            EntryPoint::Init => handler.init(self, id),
            EntryPoint::Message => handler.on_message(self, id),
            EntryPoint::Kick => handler.on_kick(self, id),
        }
        match self.entities.get_mut(key) {
            Some(entity) if entity.serial == serial => entity.handler = Some(handler),
            _ => trace!("invoke(): {:?} was freed while running", id),
        }
    }

    /// Pre-empts the running task if work at `level` has a strictly higher priority.
    fn preempt_if_higher(&mut self, level: usize) {
        if self.is_current_context_interrupt() {
            return;
        }
        if let Some((current, _)) = self.current {
            let current_level: usize = current.priority_level();
            if current_level < level {
                self.check_context_switch((1u32 << (current_level + 1)) - 1);
            }
        }
    }

    /// Appends a message to the queue of `task_id`. A message for a task that is being deleted is discarded and
    /// [MessageId::DISCARDED] is returned.
    pub fn put_message_with_routing(
        &mut self,
        task_id: TaskId,
        tag: u16,
        payload: Option<Payload>,
        routing: RoutingInfo,
    ) -> MessageId {
        let level: usize = task_id.priority_level();
        if level >= NUM_PRIORITIES {
            panic!("put_message_with_routing(): invalid priority in {:?}", task_id);
        }

        self.tasks_in_priority[level].lock();
        let key: usize = match self.find(ListKind::Task, task_id) {
            Some(key) => key,
            None => panic!("put_message_with_routing(): invalid task id {:?}", task_id),
        };
        let prunable: bool = self.entities[key].task.as_ref().map_or(true, |t| t.prunable);
        let msg_id: MessageId = if prunable {
            debug!("put_message_with_routing(): discarding message for {:?}", task_id);
            MessageId::DISCARDED
        } else {
            self.increment_total();
            let msg_id: MessageId = self.msg_ids.next_id();
            if let Some(task) = self.entities[key].task.as_mut() {
                task.queue.push_back(Message {
                    tag,
                    payload,
                    id: msg_id,
                    routing,
                });
            }
            self.tasks_in_priority[level].add_pending(1);
            self.current_priority_mask |= 1 << level;
            msg_id
        };
        self.unlock_list(ListKind::Task, level);

        if msg_id != MessageId::DISCARDED {
            self.preempt_if_higher(level);
        }
        msg_id
    }

    pub fn put_message(&mut self, task_id: TaskId, tag: u16, payload: Option<Payload>) -> MessageId {
        self.put_message_with_routing(task_id, tag, payload, RoutingInfo::default())
    }

    /// Raises the bg-int paired with `task_id`. Raising an already raised or prunable bg-int does nothing.
    pub fn raise_bg_int(&mut self, task_id: TaskId) {
        let id: TaskId = task_id.as_bg_int();
        let level: usize = id.priority_level();
        if level >= NUM_PRIORITIES {
            panic!("raise_bg_int(): invalid priority in {:?}", task_id);
        }
        let key: usize = match self.find(ListKind::BgInt, id) {
            Some(key) => key,
            None => panic!("raise_bg_int(): invalid bg-int id {:?}", id),
        };
        self.raise_at(key, level);
    }

    /// Raises a bg-int through a handle. A handle to a bg-int that has since been freed is ignored.
    pub fn raise_bg_int_with_bgint(&mut self, handle: BgIntHandle) {
        match self.entities.get(handle.key) {
            Some(entity) if entity.serial == handle.serial && entity.bg_int.is_some() => {
                self.raise_at(handle.key, handle.id.priority_level())
            },
            _ => debug!("raise_bg_int_with_bgint(): stale handle for {:?}", handle.id),
        }
    }

    fn raise_at(&mut self, key: usize, level: usize) {
        self.bg_ints_in_priority[level].lock();
        let raised: bool = match self.entities[key].bg_int.as_ref() {
            Some(bg_int) => !bg_int.raised && !bg_int.prunable,
            None => false,
        };
        if raised {
            self.increment_total();
            if let Some(bg_int) = self.entities[key].bg_int.as_mut() {
                bg_int.raised = true;
            }
            self.bg_ints_in_priority[level].add_pending(1);
            self.current_priority_mask |= 1 << level;
        }
        self.unlock_list(ListKind::BgInt, level);

        if raised {
            self.preempt_if_higher(level);
        }
    }

    /// Leaves interrupt context. Leaving the outermost interrupt runs whatever became ready above the interrupted
    /// task.
    pub fn exit_irq_check_context_switch(&mut self) {
        if self.interrupt_depth == 0 {
            panic!("exit_irq_check_context_switch(): not in interrupt context");
        }
        self.interrupt_depth -= 1;
        if self.interrupt_depth == 0 {
            if let Some((current, _)) = self.current {
                self.check_context_switch((1u32 << (current.priority_level() + 1)) - 1);
            }
        }
    }

    /// Delivers a message after `delay`. Delays below the timer resolution are delivered immediately.
    pub fn put_message_in(&mut self, delay: Duration, task_id: TaskId, tag: u16, payload: Option<Payload>) {
        if delay < Duration::from_micros(MIN_TIMER_DELAY_US) {
            self.put_message(task_id, tag, payload);
            return;
        }
        let expiry: Instant = self.timer.now() + delay;
        self.put_message_at(expiry, task_id, tag, payload);
    }

    /// Delivers a message at `expiry`.
    pub fn put_message_at(&mut self, expiry: Instant, task_id: TaskId, tag: u16, payload: Option<Payload>) {
        if expiry <= self.timer.now() + Duration::from_micros(MIN_TIMER_DELAY_US) {
            self.put_message(task_id, tag, payload);
            return;
        }
        let event: TimedMessage = TimedMessage {
            task: task_id,
            tag,
            payload,
            routing: RoutingInfo::default(),
        };
        self.timer.schedule_at(expiry, event);
    }

    /// Delivers a message some time between `earliest` and `latest` from now, coalesced with other wake ups.
    pub fn put_message_casual_in(
        &mut self,
        earliest: Duration,
        latest: Duration,
        task_id: TaskId,
        tag: u16,
        payload: Option<Payload>,
    ) {
        let now: Instant = self.timer.now();
        let event: TimedMessage = TimedMessage {
            task: task_id,
            tag,
            payload,
            routing: RoutingInfo::default(),
        };
        self.timer.schedule_window(now + earliest, now + latest, event);
    }

    /// Moves the scheduler clock forward, delivering every timed message that became due.
    pub fn advance_clock(&mut self, now: Instant) {
        self.service_timers(now);
    }

    fn service_timers(&mut self, now: Instant) {
        for event in self.timer.advance_clock(now) {
            if self.is_live(event.task) {
                self.put_message_with_routing(event.task, event.tag, event.payload, event.routing);
            } else {
                debug!("service_timers(): dropping timed message for {:?}", event.task);
            }
        }
    }

    /// Drops every task, bg-int and pending timer. Handlers are dropped after the scheduler state is cleared, which
    /// also breaks any reference cycle between handlers and the scheduler.
    pub fn shutdown(&mut self) {
        self.timer.clear();
        let entities: Slab<Entity> = mem::take(&mut self.entities);
        self.tasks_in_priority = Default::default();
        self.bg_ints_in_priority = Default::default();
        self.current_priority_mask = 0;
        self.total_num_messages = 0;
        self.current = None;
        self.interrupt_depth = 0;
        debug!("shutdown(): dropping {} tasks", entities.len());
        drop(entities);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

impl Default for SharedScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default(), Instant::now())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
