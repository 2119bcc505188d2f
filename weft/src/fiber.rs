// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The fiber record: identity, lifecycle state, and the execution cell
//! holding the underlying stackful coroutine.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;
use weft_fiber::Suspend;
use weft_fiber::stack::GuardedStack;

use crate::park::Parker;

/// Shared handle to a fiber record.
///
/// References live in at most one ready queue (or waiter list, or the dead
/// list) at a time, plus any number of passive observers: join handles and
/// the dispatcher currently running the fiber.
pub(crate) type FiberRef = Arc<Fiber>;

/// The stackful coroutine a started fiber runs on.
pub(crate) type RawFiber = weft_fiber::Fiber<(), Pause, (), GuardedStack>;
pub(crate) type RawSuspend = Suspend<(), Pause>;

/// The join target's state lock, still held while the joiner's context is
/// being saved. See [`Pause::Blocked`].
pub(crate) type StateGuard = parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, State>;

/// Why a fiber handed control back to its dispatcher.
pub(crate) enum Pause {
    /// Cooperative yield; goes to the back of the worker's run queue.
    Yielded,
    /// Parked on another fiber's waiter list. The payload is the join
    /// target's state lock, which must stay held until the joiner's context
    /// is fully saved: were it released on the fiber stack before the
    /// switch, the target could terminate and re-enqueue the joiner while
    /// the joiner is still running. The dispatcher drops the guard after
    /// `resume` returns.
    Blocked(StateGuard),
}

/// Fiber lifecycle states.
///
/// `New → Running` at first dispatch, `Running ⇄ Waiting` through join and
/// wake-up, `Running → Dead` when the entry function returns. `Dead` is
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    /// Spawned, never dispatched; no stack exists yet.
    New,
    /// Has a stack: either executing right now or suspended resumable.
    Running,
    /// Parked on some fiber's waiter list; in no ready queue.
    Waiting,
    /// Entry function returned; resides in the dead list until shutdown.
    Dead,
}

/// A joiner parked on a fiber's completion.
pub(crate) enum Waiter {
    Fiber(FiberRef),
    Thread(Arc<Parker>),
}

/// Everything guarded by the fiber's state lock.
pub(crate) struct State {
    pub(crate) status: Status,
    pub(crate) waiters: Vec<Waiter>,
}

/// What the execution cell holds across the fiber's lifetime.
pub(crate) enum Exec {
    /// Entry closure, waiting for first dispatch.
    New(Box<dyn FnOnce() + Send>),
    /// Live coroutine with an allocated stack.
    Started(RawFiber),
    /// Terminated; the coroutine and its stack are gone.
    Done,
}

pub(crate) struct Fiber {
    name: String,
    /// Status and waiter list, under the one lock every cross-thread
    /// observer takes ("status lock" throughout). Kept in an `Arc` of its
    /// own so a join can hold the lock across a context switch via
    /// [`StateGuard`].
    pub(crate) state: Arc<Mutex<State>>,
    /// Execution cell. Not locked: only the dispatcher holding the sole
    /// ready-queue reference to this fiber may touch it.
    exec: UnsafeCell<Exec>,
    /// Address of the coroutine's suspend handle, published by the first
    /// frame on the fiber's stack and stable until termination. Read by
    /// `yield`/`join` running on the fiber's own stack.
    suspend: AtomicPtr<RawSuspend>,
}

// Safety: `state` is lock-protected and `suspend` atomic; `exec` is confined
// to whichever worker currently holds dispatch rights (the unique ready-queue
// reference), which the queue residency invariant makes exclusive. The entry
// closure is `Send`, and the coroutine only ever runs on one thread at a
// time.
unsafe impl Send for Fiber {}
// Safety: see above.
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a fiber in status [`Status::New`]. Placement on a ready queue
    /// and live-count accounting are the scheduler's job.
    pub(crate) fn new(name: String, entry: Box<dyn FnOnce() + Send>) -> FiberRef {
        Arc::new(Self {
            name,
            state: Arc::new(Mutex::new(State {
                status: Status::New,
                waiters: Vec::new(),
            })),
            exec: UnsafeCell::new(Exec::New(entry)),
            suspend: AtomicPtr::new(ptr::null_mut()),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn status(&self) -> Status {
        self.state.lock().status
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.status() == Status::Dead
    }

    /// Grants access to the execution cell.
    ///
    /// # Safety
    ///
    /// The caller must hold dispatch rights for this fiber: it popped the
    /// sole ready-queue reference (or is constructing/destroying the cell
    /// around a dispatch). No other access may exist concurrently.
    #[expect(clippy::mut_from_ref, reason = "confinement is the caller's contract")]
    pub(crate) unsafe fn exec(&self) -> &mut Exec {
        // Safety: exclusivity ensured by the caller per above.
        unsafe { &mut *self.exec.get() }
    }

    /// Publishes the coroutine's suspend handle. Called once, from the first
    /// frame on the fiber's own stack.
    pub(crate) fn publish_suspend(&self, suspend: &RawSuspend) {
        self.suspend
            .store(ptr::from_ref(suspend).cast_mut(), Ordering::Release);
    }

    /// Suspends the calling fiber with the given reason, transferring
    /// control to its dispatcher. Returns when the fiber is next dispatched.
    ///
    /// # Safety
    ///
    /// Must be called from code currently executing on *this* fiber's stack.
    pub(crate) unsafe fn pause(&self, why: Pause) {
        let suspend = self.suspend.load(Ordering::Acquire);
        debug_assert!(!suspend.is_null(), "fiber has not started");
        // Safety: the suspend handle lives at the fiber's stack base and
        // stays valid while the fiber executes; we are on that stack per the
        // caller's contract.
        unsafe { (*suspend).suspend(why) };
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Fiber, Status};

    #[test]
    fn new_fiber_is_new() {
        let fiber = Fiber::new("probe".to_owned(), Box::new(|| {}));
        assert_eq!(fiber.name(), "probe");
        assert_eq!(fiber.status(), Status::New);
        assert!(!fiber.is_dead());
    }
}
