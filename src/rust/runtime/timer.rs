// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::core::cmp::Reverse;
use ::std::{
    collections::BinaryHeap,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

struct TimerQueueEntry<E> {
    /// Earliest instant at which the event may fire.
    earliest: Instant,
    /// Instant by which the event must have fired.
    latest: Instant,
    /// Insertion order, used to keep events with equal deadlines in FIFO order.
    seq: u64,
    event: E,
}

/// Timer that holds one or more events for future wake up. Strict events have a single expiry instant; casual events
/// carry a window and are coalesced with whatever wake up happens first inside that window.
pub struct Timer<E> {
    now: Instant,
    next_seq: u64,
    // Use a reverse to get a min heap on the latest deadline.
    heap: BinaryHeap<Reverse<TimerQueueEntry<E>>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<E> Timer<E> {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            next_seq: 0,
            heap: BinaryHeap::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Schedules `event` to fire exactly at `expiry`.
    pub fn schedule_at(&mut self, expiry: Instant, event: E) {
        self.schedule_window(expiry, expiry, event);
    }

    /// Schedules `event` to fire after `delay` has elapsed on the timer's clock.
    pub fn schedule_in(&mut self, delay: Duration, event: E) {
        let expiry: Instant = self.now + delay;
        self.schedule_at(expiry, event);
    }

    /// Schedules `event` to fire at any point between `earliest` and `latest`.
    pub fn schedule_window(&mut self, earliest: Instant, latest: Instant, event: E) {
        let latest: Instant = if latest < earliest { earliest } else { latest };
        let entry: TimerQueueEntry<E> = TimerQueueEntry {
            earliest,
            latest,
            seq: self.next_seq,
            event,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(entry));
    }

    /// Returns the instant by which the next event must fire, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.latest)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Moves the clock forward to `now` and returns every event whose window has opened, in expiry order.
    pub fn advance_clock(&mut self, now: Instant) -> Vec<E> {
        assert!(self.now <= now);
        self.now = now;

        let entries: Vec<TimerQueueEntry<E>> = self.heap.drain().map(|Reverse(entry)| entry).collect();
        let (mut due, pending): (Vec<TimerQueueEntry<E>>, Vec<TimerQueueEntry<E>>) =
            entries.into_iter().partition(|entry| entry.earliest <= now);
        self.heap.extend(pending.into_iter().map(Reverse));

        due.sort_by(|a, b| a.earliest.cmp(&b.earliest).then(a.seq.cmp(&b.seq)));
        due.into_iter().map(|entry| entry.event).collect()
    }

    /// Drops every pending event.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<E> PartialEq for TimerQueueEntry<E> {
    fn eq(&self, other: &TimerQueueEntry<E>) -> bool {
        self.latest == other.latest && self.seq == other.seq
    }
}

impl<E> Eq for TimerQueueEntry<E> {}

impl<E> PartialOrd for TimerQueueEntry<E> {
    fn partial_cmp(&self, other: &TimerQueueEntry<E>) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for TimerQueueEntry<E> {
    fn cmp(&self, other: &TimerQueueEntry<E>) -> core::cmp::Ordering {
        self.latest.cmp(&other.latest).then(self.seq.cmp(&other.seq))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
