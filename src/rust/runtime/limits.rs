// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Number of scheduler priority levels.
pub const NUM_PRIORITIES: usize = 5;

/// Largest small-integer index a task or bg-int may use. Index zero is reserved.
pub const MAX_TASK_INDEX: usize = 255;

/// Default bound on the number of outstanding messages plus raised bg-ints.
pub const DEFAULT_MAX_MESSAGES: usize = 512;

/// Default number of task blocks available to the dynamic task factory.
pub const DEFAULT_TASK_POOL_CAPACITY: usize = 256;

/// Largest message identifier. Also returned as the sentinel for a discarded message.
pub const MAX_SCHED_ID: u32 = 0x00ff_ffff;

/// Timed messages scheduled closer than this many microseconds are delivered immediately.
pub const MIN_TIMER_DELAY_US: u64 = 10;

/// Largest internal operator identifier.
pub const MAX_OPID: u16 = 127;

/// Largest number of processors addressable by a connection id.
pub const MAX_PROCESSORS: usize = 8;

/// Largest number of concurrently in-flight command aggregates. The aggregate id travels in a 5-bit client field.
pub const MAX_AGGREGATES: usize = 31;

/// Default number of concurrently in-flight command aggregates.
pub const DEFAULT_NUM_AGGREGATES: usize = 1;

/// Largest number of operators accepted in one list command.
pub const MAX_OPS_PER_LIST_CMD: usize = 64;
