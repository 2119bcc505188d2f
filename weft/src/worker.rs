// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The dispatcher: one OS thread per worker, each cycling through refill,
//! dispatch, and termination bookkeeping.
//!
//! Control returns to the dispatch loop in exactly three ways: a fiber
//! yields, a fiber parks itself on a join target, or a fiber's entry
//! function returns. All three arrive as the result of the `resume` call,
//! on the worker thread's own stack, which is what lets the dispatcher free
//! a terminated fiber's stack and release a join target's handed-off lock
//! safely.

use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use weft_fiber::FiberResult;
use weft_fiber::stack::GuardedStack;

use crate::fiber::{Exec, FiberRef, Pause, RawFiber, Status};
use crate::scheduler::{STACK_SIZE, Scheduler};
use crate::context;

/// A worker's mutable half: only ever touched from its own thread.
pub(crate) struct Core {
    pub(crate) run_queue: crate::queue::Local,
}

/// Per-worker state, installed in thread-local scope for the lifetime of the
/// worker thread so that `spawn` from fiber code can find its home queue.
pub(crate) struct WorkerContext {
    pub(crate) scheduler: &'static Scheduler,
    pub(crate) index: usize,
    pub(crate) core: RefCell<Core>,
}

/// Body of a worker thread.
pub(crate) fn run(scheduler: &'static Scheduler, index: usize) {
    let cx = WorkerContext {
        scheduler,
        index,
        core: RefCell::new(Core {
            run_queue: crate::queue::Local::new(),
        }),
    };

    tracing::trace!(worker = index, "worker online");
    context::set_worker(&cx, || dispatch_loop(&cx));
}

fn dispatch_loop(cx: &WorkerContext) {
    loop {
        let target = cx.scheduler.refill_target();

        {
            let mut core = cx.core.borrow_mut();
            // Top up from the injector once the local queue has drained to
            // half its fair share; this is also how fibers submitted by
            // other threads become dispatchable here.
            if core.run_queue.len() <= target / 2 {
                cx.scheduler.refill(&mut core.run_queue, target);
            }
        }

        let next = cx.core.borrow_mut().run_queue.pop_front();
        match next {
            Some(fiber) => dispatch(cx, fiber),
            None => {
                // Nothing runnable; sleep until the injector fills or the
                // runtime stops.
                if !cx.scheduler.park_for_work() {
                    tracing::trace!(worker = cx.index, "worker shutting down");
                    return;
                }
            }
        }
    }
}

/// Runs one fiber until it hands control back, then files the outcome.
fn dispatch(cx: &WorkerContext, fiber: FiberRef) {
    // Safety: we popped the sole ready-queue reference, so this worker holds
    // dispatch rights until the fiber is re-enqueued.
    let exec = unsafe { fiber.exec() };

    let raw = match exec {
        Exec::New(_) => first_dispatch(&fiber, exec),
        Exec::Started(raw) => {
            let status = fiber.status();
            if status != Status::Running {
                fatal!(
                    "dispatched fiber '{}' in state {status:?}",
                    fiber.name()
                );
            }
            raw
        }
        Exec::Done => fatal!("dispatched dead fiber '{}'", fiber.name()),
    };

    let result = context::set_current(&fiber, || raw.resume(()));

    match result {
        FiberResult::Yield(Pause::Yielded) => {
            // Rotate to the back of the local queue; a full queue spills
            // into the injector.
            let mut core = cx.core.borrow_mut();
            if let Err(fiber) = core.run_queue.push_back(fiber) {
                drop(core);
                cx.scheduler.submit_remote(fiber);
            }
        }
        FiberResult::Yield(Pause::Blocked(guard)) => {
            // The fiber parked itself on a join target and handed us the
            // target's still-held state lock. Its context is saved now, so
            // the target may die (and re-enqueue the fiber) from here on.
            drop(guard);
        }
        FiberResult::Return(()) => complete(cx, fiber),
    }
}

/// First dispatch of a fiber: allocate its stack and stand up the coroutine
/// around the entry closure.
fn first_dispatch<'a>(fiber: &FiberRef, exec: &'a mut Exec) -> &'a mut RawFiber {
    let status = fiber.status();
    if status != Status::New {
        fatal!(
            "fiber '{}' has no stack but is in state {status:?}",
            fiber.name()
        );
    }

    let Exec::New(entry) = mem::replace(exec, Exec::Done) else {
        unreachable!()
    };

    fiber.state.lock().status = Status::Running;

    let stack = GuardedStack::new(STACK_SIZE)
        .unwrap_or_else(|err| fatal!("failed to allocate fiber stack: {err}"));

    let handle = FiberRef::clone(fiber);
    *exec = Exec::Started(RawFiber::with_stack(stack, move |(), suspend| {
        // First frame on the fiber's own stack: make the suspend handle
        // reachable from `yield_now`/`join`, then run user code.
        handle.publish_suspend(suspend);

        tracing::trace!(fiber = handle.name(), "fiber started");

        // An unwind must not cross the stack switch; treat an escaping
        // panic as fatal right here, still on the fiber stack.
        if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
            fatal!("fiber '{}' panicked", handle.name());
        }
    }));

    match exec {
        Exec::Started(raw) => raw,
        _ => unreachable!(),
    }
}

/// Termination bookkeeping, run on the worker stack after the final switch
/// out of the fiber.
fn complete(cx: &WorkerContext, fiber: FiberRef) {
    // Free the fiber's stack first. The coroutine has finished, nothing
    // lives on that stack anymore, and we are not standing on it.
    {
        // Safety: dispatch rights are still ours; the fiber is in no queue.
        let exec = unsafe { fiber.exec() };
        *exec = Exec::Done;
    }

    let scheduler = cx.scheduler;

    let mut state = fiber.state.lock();
    state.status = Status::Dead;
    // Under the state lock, so whoever observes Dead also observes the
    // decrement.
    scheduler.decrement_live();

    let waiters = mem::take(&mut state.waiters);
    scheduler.wake_waiters(waiters);
    drop(state);

    scheduler.retain_dead(fiber);
}
