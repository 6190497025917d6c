// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::kymera::{
    ensure_eq,
    runtime::scheduler::{
        MessageId,
        Priority,
        SharedScheduler,
        TaskHandler,
        TaskId,
        TaskKind,
    },
    SchedulerConfig,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    cell::RefCell,
    collections::HashSet,
    rc::Rc,
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

type Trace = Rc<RefCell<Vec<String>>>;

/// Records every message and kick, tagging entries with its name.
struct Probe {
    name: String,
    trace: Trace,
}

/// Deletes `victim` while its priority list is being serviced.
struct Reaper {
    victim: Rc<RefCell<Option<TaskId>>>,
    trace: Trace,
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TaskHandler for Probe {
    fn on_message(&mut self, sched: &mut SharedScheduler, _id: TaskId) {
        while let Some(message) = sched.get_message_with_routing() {
            self.trace.borrow_mut().push(format!("{}:{}", self.name, message.tag));
        }
    }

    fn on_kick(&mut self, _sched: &mut SharedScheduler, _id: TaskId) {
        self.trace.borrow_mut().push(format!("{}:kick", self.name));
    }
}

impl TaskHandler for Reaper {
    fn on_message(&mut self, sched: &mut SharedScheduler, _id: TaskId) {
        while sched.get_message().is_some() {
            if let Some(victim) = self.victim.borrow_mut().take() {
                sched.delete_task(victim);
                self.trace.borrow_mut().push(format!(
                    "reaped live={} prunable={:?} discarded={}",
                    sched.is_live(victim),
                    sched.is_prunable(victim),
                    sched.put_message(victim, 99, None) == MessageId::DISCARDED
                ));
            }
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn scheduler() -> SharedScheduler {
    SharedScheduler::new(SchedulerConfig::default(), Instant::now())
}

fn probe(name: &str, trace: &Trace) -> Box<Probe> {
    Box::new(Probe {
        name: name.to_string(),
        trace: trace.clone(),
    })
}

fn entries(trace: &Trace) -> Vec<String> {
    trace.borrow().clone()
}

//======================================================================================================================
// Tests
//======================================================================================================================

/// Work that became ready before the loop was entered runs strictly by priority, bg-ints ahead of tasks.
#[test]
fn ready_work_runs_highest_priority_first() -> Result<()> {
    let trace: Trace = Trace::default();
    let mut sched: SharedScheduler = scheduler();

    let mut tasks: Vec<TaskId> = Vec::new();
    for priority in Priority::ALL {
        let name: String = format!("p{}", priority.level());
        tasks.push(sched.create_task(priority, TaskKind::Coupled, probe(&name, &trace))?);
    }
    for (tag, task) in tasks.iter().enumerate() {
        sched.put_message(*task, tag as u16, None);
        sched.raise_bg_int(*task);
    }
    sched.sched();

    let expected: Vec<String> = (0..Priority::ALL.len())
        .rev()
        .flat_map(|level| vec![format!("p{}:kick", level), format!("p{}:{}", level, level)])
        .collect();
    ensure_eq!(entries(&trace), expected);
    ensure_eq!(sched.num_messages(), 0);
    Ok(())
}

/// Messages interleaved across two tasks keep their per-task order.
#[test]
fn each_task_sees_its_messages_in_send_order() -> Result<()> {
    let trace: Trace = Trace::default();
    let mut sched: SharedScheduler = scheduler();
    let a: TaskId = sched.create_task(Priority::Low, TaskKind::Task, probe("a", &trace))?;
    let b: TaskId = sched.create_task(Priority::Low, TaskKind::Task, probe("b", &trace))?;

    for tag in 0..4 {
        sched.put_message(b, tag, None);
        sched.put_message(a, 10 + tag, None);
    }
    sched.sched();

    let seen: Vec<String> = entries(&trace);
    let of = |name: &str| -> Vec<String> {
        seen.iter()
            .filter(|entry| entry.starts_with(name))
            .cloned()
            .collect()
    };
    ensure_eq!(of("a:"), vec!["a:10", "a:11", "a:12", "a:13"]);
    ensure_eq!(of("b:"), vec!["b:0", "b:1", "b:2", "b:3"]);
    Ok(())
}

/// Random create and delete sequences never hand out an identifier that is still live.
#[test]
fn interleaved_create_delete_keeps_ids_unique() -> Result<()> {
    let trace: Trace = Trace::default();
    let mut sched: SharedScheduler = scheduler();
    let mut rng: SmallRng = SmallRng::seed_from_u64(0x6b79_6d65);
    let mut live: Vec<TaskId> = Vec::new();

    for _ in 0..2000 {
        let create: bool = live.is_empty() || (live.len() < 200 && rng.gen_bool(0.6));
        if create {
            let priority: Priority = Priority::ALL[rng.gen_range(0..Priority::ALL.len())];
            let kind: TaskKind = match rng.gen_range(0..3) {
                0 => TaskKind::Task,
                1 => TaskKind::BgInt,
                _ => TaskKind::Coupled,
            };
            let id: TaskId = sched.create_task(priority, kind, probe("r", &trace))?;
            ensure_eq!(live.iter().any(|other| other.index() == id.index()), false);
            live.push(id);
        } else {
            let id: TaskId = live.swap_remove(rng.gen_range(0..live.len()));
            sched.delete_task(id);
            ensure_eq!(sched.is_live(id), false);
        }
    }

    let indices: HashSet<u8> = live.iter().map(|id| id.index()).collect();
    ensure_eq!(indices.len(), live.len());
    ensure_eq!(sched.num_allocated(), live.len());
    for id in live.iter() {
        ensure_eq!(sched.is_live(*id), true);
    }
    Ok(())
}

/// A task deleted by a peer of the same priority mid-dispatch is never run and is freed exactly once.
#[test]
fn peer_deleted_mid_dispatch_is_skipped() -> Result<()> {
    let trace: Trace = Trace::default();
    let mut sched: SharedScheduler = scheduler();
    let victim_slot: Rc<RefCell<Option<TaskId>>> = Rc::new(RefCell::new(None));
    // The reaper gets the lower index, so it is serviced first.
    let reaper: TaskId = sched.create_task(
        Priority::Medium,
        TaskKind::Task,
        Box::new(Reaper {
            victim: victim_slot.clone(),
            trace: trace.clone(),
        }),
    )?;
    let victim: TaskId = sched.create_task(Priority::Medium, TaskKind::Task, probe("victim", &trace))?;
    *victim_slot.borrow_mut() = Some(victim);

    sched.put_message(victim, 1, None);
    sched.put_message(reaper, 2, None);
    ensure_eq!(sched.num_messages(), 2);
    sched.sched();

    ensure_eq!(entries(&trace), vec!["reaped live=false prunable=Some(true) discarded=true"]);
    ensure_eq!(sched.is_prunable(victim), None);
    ensure_eq!(sched.num_allocated(), 1);
    ensure_eq!(sched.num_messages(), 0);

    // The freed index is handed out again.
    let reuse: TaskId = sched.create_task(Priority::Low, TaskKind::Task, probe("reuse", &trace))?;
    ensure_eq!(reuse.index(), victim.index());
    Ok(())
}

/// A bg-int deleted before it is serviced drops its pending raise.
#[test]
fn deleted_bg_int_is_not_kicked() -> Result<()> {
    let trace: Trace = Trace::default();
    let mut sched: SharedScheduler = scheduler();
    let bg: TaskId = sched.create_task(Priority::High, TaskKind::BgInt, probe("bg", &trace))?;
    sched.raise_bg_int(bg);
    ensure_eq!(sched.num_messages(), 1);
    sched.delete_task(bg);
    ensure_eq!(sched.num_messages(), 0);
    sched.sched();
    ensure_eq!(entries(&trace).len(), 0);
    Ok(())
}

/// Sending to an identifier that was never created is a programming error.
#[test]
#[should_panic(expected = "invalid task id")]
fn message_to_unknown_task_is_fatal() {
    let mut sched: SharedScheduler = scheduler();
    sched.put_message(TaskId::pack(Priority::Medium, 42), 1, None);
}

/// Exceeding the message bound is fatal.
#[test]
#[should_panic(expected = "too many messages")]
fn message_bound_is_enforced() {
    let trace: Trace = Trace::default();
    let config: SchedulerConfig = SchedulerConfig {
        max_messages: 2,
        ..Default::default()
    };
    let mut sched: SharedScheduler = SharedScheduler::new(config, Instant::now());
    let task: TaskId = match sched.create_task(Priority::Low, TaskKind::Task, probe("t", &trace)) {
        Ok(task) => task,
        Err(e) => panic!("create_task() failed: {:?}", e),
    };
    for tag in 0..3 {
        sched.put_message(task, tag, None);
    }
}
