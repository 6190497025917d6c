// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod factory;
mod queue;

//==============================================================================
// Exports
//==============================================================================

pub mod message;
pub mod scheduler;
pub mod task;

pub use self::{
    message::{
        Message,
        MessageId,
        Payload,
        RoutingInfo,
    },
    scheduler::{
        BgIntHandle,
        Scheduler,
        SharedScheduler,
    },
    task::{
        Priority,
        StaticTask,
        TaskHandler,
        TaskId,
        TaskKind,
    },
};
