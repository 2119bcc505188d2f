// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fixed-capacity run queue owned by a single worker.
//!
//! Only the owning worker ever touches its queue, so there is no locking and
//! no atomics; rebalancing happens by moving whole fibers through the
//! injector queue instead of letting other workers reach in here. Fibers are
//! popped from the front for dispatch and from the back when shedding
//! overload to the injector.

use static_assertions::const_assert;

use crate::fiber::FiberRef;

pub(crate) const LOCAL_QUEUE_CAPACITY: usize = 256;
const MASK: u32 = (LOCAL_QUEUE_CAPACITY - 1) as u32;

// The wrapping index arithmetic below relies on this.
const_assert!(LOCAL_QUEUE_CAPACITY.is_power_of_two());

/// The worker-local run queue.
///
/// Indices wrap freely through the full `u32` range and are masked on
/// access, so `tail - head` is always the number of live entries.
pub(crate) struct Local {
    head: u32,
    tail: u32,
    buffer: Box<[Option<FiberRef>; LOCAL_QUEUE_CAPACITY]>,
}

impl Local {
    pub(crate) fn new() -> Self {
        let buffer: Box<[Option<FiberRef>]> =
            (0..LOCAL_QUEUE_CAPACITY).map(|_| None).collect();

        Self {
            head: 0,
            tail: 0,
            buffer: buffer.try_into().expect("buffer length matches capacity"),
        }
    }

    /// Returns the number of fibers in the queue.
    pub(crate) fn len(&self) -> usize {
        self.tail.wrapping_sub(self.head) as usize
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Enqueues a fiber at the back. Hands the fiber back when the queue is
    /// full; the caller decides where it overflows to.
    pub(crate) fn push_back(&mut self, fiber: FiberRef) -> Result<(), FiberRef> {
        if self.len() == LOCAL_QUEUE_CAPACITY {
            return Err(fiber);
        }

        let slot = &mut self.buffer[(self.tail & MASK) as usize];
        debug_assert!(slot.is_none());
        *slot = Some(fiber);
        self.tail = self.tail.wrapping_add(1);
        Ok(())
    }

    /// Dequeues the fiber next in line for dispatch.
    pub(crate) fn pop_front(&mut self) -> Option<FiberRef> {
        if self.is_empty() {
            return None;
        }

        let fiber = self.buffer[(self.head & MASK) as usize].take();
        debug_assert!(fiber.is_some());
        self.head = self.head.wrapping_add(1);
        fiber
    }

    /// Dequeues the most recently enqueued fiber. Used when shedding excess
    /// load to the injector, so the fibers closest to dispatch keep their
    /// position.
    pub(crate) fn pop_back(&mut self) -> Option<FiberRef> {
        if self.is_empty() {
            return None;
        }

        self.tail = self.tail.wrapping_sub(1);
        let fiber = self.buffer[(self.tail & MASK) as usize].take();
        debug_assert!(fiber.is_some());
        fiber
    }
}

impl std::fmt::Debug for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Local").field("len", &self.len()).finish()
    }
}
