// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    limits,
    scheduler::scheduler::SharedScheduler,
};
use ::std::fmt;

//==============================================================================
// Constants
//==============================================================================

/// Bit position of the priority field in a packed task identifier.
const PRIORITY_LSB_POS: u32 = 16;
/// Width mask of the priority field.
const PRIORITY_FIELD_MASK: u32 = 0x3f;
/// Mask of the index field.
const INDEX_MASK: u32 = 0xff;
/// Set on identifiers that name a background interrupt.
const BG_INT_FLAG_BIT: u32 = 1 << 22;
/// Set on identifiers that name one half of a coupled task/bg-int pair.
const COUPLED_FLAG_BIT: u32 = 1 << 23;

//==============================================================================
// Structures
//==============================================================================

/// Scheduling priority. Higher priorities pre-empt lower ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Highest = 4,
}

/// Packed 24-bit task identifier.
///
/// The least significant octet holds the small-integer index, the low six bits of the most significant octet hold
/// the priority and the two top bits flag background interrupts and coupled pairs. The middle octet is always zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u32);

/// Entry points requested from the dynamic task factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// A message-driven task only.
    Task,
    /// A background interrupt only.
    BgInt,
    /// A task and a background interrupt sharing one index and one handler.
    Coupled,
}

/// Handler owned by a task, a bg-int, or a coupled pair.
///
/// A coupled pair shares a single handler object: messages arrive through [TaskHandler::on_message] and raised
/// background interrupts through [TaskHandler::on_kick].
pub trait TaskHandler {
    /// Runs once, the first time the scheduler loop is entered. Only static tasks are initialised.
    fn init(&mut self, _sched: &mut SharedScheduler, _id: TaskId) {}

    /// Runs when the task has at least one queued message. The handler must drain its own queue.
    fn on_message(&mut self, sched: &mut SharedScheduler, id: TaskId) {
        while sched.get_message().is_some() {
            warn!("on_message(): task {:?} dropped an unhandled message", id);
        }
    }

    /// Runs when the background interrupt has been raised.
    fn on_kick(&mut self, _sched: &mut SharedScheduler, id: TaskId) {
        warn!("on_kick(): bg-int {:?} has no kick handler", id);
    }
}

/// Compile-time task descriptor used to populate the scheduler at start up.
pub struct StaticTask {
    pub index: u8,
    pub priority: Priority,
    /// Bit `n` set means the task exists on processor `n`.
    pub proc_mask: u32,
    pub kind: TaskKind,
    pub handler: Box<dyn TaskHandler>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Priority {
    pub const ALL: [Priority; limits::NUM_PRIORITIES] = [
        Priority::Lowest,
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Highest,
    ];

    pub fn level(self) -> usize {
        self as usize
    }

    /// Mask with the bits of this priority and every lower one set.
    pub fn priority_mask(self) -> u32 {
        (1u32 << (self.level() + 1)) - 1
    }

    pub fn from_level(level: usize) -> Option<Priority> {
        Self::ALL.get(level).copied()
    }
}

impl TaskId {
    /// Builds a plain task identifier from a priority and an index.
    pub fn pack(priority: Priority, index: u8) -> Self {
        Self(((priority as u32) << PRIORITY_LSB_POS) | index as u32)
    }

    /// Rebuilds an identifier from its raw 24-bit representation.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & limits::MAX_SCHED_ID)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> u8 {
        (self.0 & INDEX_MASK) as u8
    }

    /// Priority level encoded in the identifier, which may be out of range for a forged identifier.
    pub fn priority_level(self) -> usize {
        ((self.0 >> PRIORITY_LSB_POS) & PRIORITY_FIELD_MASK) as usize
    }

    pub fn priority(self) -> Option<Priority> {
        Priority::from_level(self.priority_level())
    }

    pub fn is_bg_int(self) -> bool {
        self.0 & BG_INT_FLAG_BIT != 0
    }

    pub fn is_coupled(self) -> bool {
        self.0 & COUPLED_FLAG_BIT != 0
    }

    /// The bg-int identifier paired with this one.
    pub fn as_bg_int(self) -> Self {
        Self(self.0 | BG_INT_FLAG_BIT)
    }

    /// The task identifier paired with this one.
    pub fn as_task(self) -> Self {
        Self(self.0 & !BG_INT_FLAG_BIT)
    }

    pub fn as_coupled(self) -> Self {
        Self(self.0 | COUPLED_FLAG_BIT)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl TryFrom<u32> for Priority {
    type Error = Fail;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match Priority::from_level(value as usize) {
            Some(priority) => Ok(priority),
            None => {
                let cause: String = format!("invalid priority (priority={:?})", value);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:#08x})", self.0)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
