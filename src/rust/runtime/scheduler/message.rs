// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::limits::MAX_SCHED_ID;
use ::std::{
    any::Any,
    collections::VecDeque,
    fmt,
};

//==============================================================================
// Structures
//==============================================================================

/// Opaque message payload. Ownership moves to the receiving task.
pub type Payload = Box<dyn Any>;

/// Source and destination identifiers used by higher layers. The scheduler never interprets them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoutingInfo {
    pub src_id: u32,
    pub dest_id: u32,
}

/// Scheduler-assigned message identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(u32);

/// One unit of inter-task communication.
pub struct Message {
    pub tag: u16,
    pub payload: Option<Payload>,
    pub id: MessageId,
    pub routing: RoutingInfo,
}

/// Allocates message identifiers, skipping the sentinel value.
pub struct MessageIdGenerator {
    next: u32,
}

/// FIFO of messages queued on one task.
#[derive(Default)]
pub struct MessageQueue {
    messages: VecDeque<Message>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl MessageId {
    /// Returned when a message is discarded instead of being queued.
    pub const DISCARDED: MessageId = MessageId(MAX_SCHED_ID);

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Message {
    /// Takes the payload out of the message and downcasts it to its concrete type.
    pub fn take_payload<T: Any>(&mut self) -> Option<Box<T>> {
        match self.payload.take()?.downcast::<T>() {
            Ok(payload) => Some(payload),
            Err(payload) => {
                self.payload = Some(payload);
                None
            },
        }
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> MessageId {
        let id: u32 = self.next;
        self.next += 1;
        if self.next >= MAX_SCHED_ID {
            self.next = MAX_SCHED_ID / 32;
        }
        MessageId(id)
    }
}

impl MessageQueue {
    pub fn push_back(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every queued message and its payload, returning how many were dropped.
    pub fn flush(&mut self) -> usize {
        let count: usize = self.messages.len();
        self.messages.clear();
        count
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .field("routing", &self.routing)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
