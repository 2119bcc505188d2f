// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The coordinator: process-wide singleton owning the worker pool, the
//! injector queue, the dead list and the runtime lifecycle.
//!
//! Lock order, outermost first: fiber state locks (join target before
//! waiter) → injector mutex → parker mutex. The injector mutex is a leaf
//! with respect to state locks; it is never held while taking one, except
//! for the waiter state locks taken inside the termination drain, which is
//! the one sanctioned nesting.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Once, OnceLock};
use std::{env, thread};

use parking_lot::{Condvar, Mutex};
use static_assertions::const_assert;
use weft_fiber::stack::MIN_STACK_SIZE;

use crate::fiber::{FiberRef, Pause, Status, Waiter};
use crate::park::Parker;
use crate::queue::{LOCAL_QUEUE_CAPACITY, Local};
use crate::{context, worker};

/// Fixed stack size of every fiber.
pub(crate) const STACK_SIZE: usize = 32 * 1024;
const_assert!(STACK_SIZE >= MIN_STACK_SIZE);

/// Hard cap on concurrently live fibers.
pub(crate) const MAX_LIVE_FIBERS: usize = 15_000;

/// Upper bound on the worker pool, whatever the machine reports.
const MAX_WORKERS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RunState {
    Init = 0,
    Running = 1,
    Stopped = 2,
}

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

/// Returns the runtime, creating it (and its worker pool) on first use.
pub(crate) fn get() -> &'static Scheduler {
    static START: Once = Once::new();

    let scheduler = SCHEDULER.get_or_init(Scheduler::new);
    // Workers borrow the scheduler for 'static, so they can only be spawned
    // once the singleton is in place.
    START.call_once(|| scheduler.start());
    scheduler
}

pub(crate) struct Scheduler {
    /// Size of the worker pool, fixed at startup.
    workers: usize,
    /// The injector queue: overflow, submissions from non-worker threads,
    /// and waiter wake-ups.
    injector: Mutex<VecDeque<FiberRef>>,
    /// Signalled whenever the injector becomes non-empty, broadcast on
    /// shutdown.
    injector_ready: Condvar,
    /// Terminated fibers, retained until shutdown so that late joiners can
    /// always read terminal status.
    dead: Mutex<Vec<FiberRef>>,
    run_state: AtomicU8,
    /// Fibers spawned and not yet dead.
    live: AtomicUsize,
    /// Worker thread handles, joined at shutdown.
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            workers: pool_size(),
            injector: Mutex::new(VecDeque::new()),
            injector_ready: Condvar::new(),
            dead: Mutex::new(Vec::new()),
            run_state: AtomicU8::new(RunState::Init as u8),
            live: AtomicUsize::new(0),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Brings the worker pool up and registers the exit hook.
    fn start(&'static self) {
        self.run_state
            .store(RunState::Running as u8, Ordering::Release);

        let mut threads = self.threads.lock();
        for index in 0..self.workers {
            let handle = thread::Builder::new()
                .name(format!("weft-worker-{index}"))
                .spawn(move || worker::run(self, index))
                .unwrap_or_else(|err| fatal!("failed to spawn worker thread: {err}"));
            threads.push(handle);
        }
        drop(threads);

        // Safety: registering a plain extern "C" fn with no preconditions.
        let rc = unsafe { libc::atexit(shutdown_at_exit) };
        if rc != 0 {
            fatal!("failed to register the runtime exit hook");
        }

        tracing::debug!(workers = self.workers, "runtime started");
    }

    pub(crate) fn run_state(&self) -> RunState {
        match self.run_state.load(Ordering::Acquire) {
            0 => RunState::Init,
            1 => RunState::Running,
            2 => RunState::Stopped,
            _ => unreachable!(),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Records a termination. Must be called with the dead fiber's state
    /// lock held, so observers that saw `Dead` also see the decrement.
    pub(crate) fn decrement_live(&self) {
        self.live.fetch_sub(1, Ordering::Release);
    }

    /// The per-worker run-queue length the load balancer steers towards:
    /// an even share of the live fibers, clamped to the queue capacity.
    pub(crate) fn refill_target(&self) -> usize {
        (self.live() / self.workers + 1).min(LOCAL_QUEUE_CAPACITY)
    }

    /// Places a freshly spawned fiber on a ready queue.
    pub(crate) fn submit(&self, fiber: FiberRef) {
        let live = self.live.fetch_add(1, Ordering::AcqRel);
        if live >= MAX_LIVE_FIBERS {
            fatal!("live fiber limit exceeded ({MAX_LIVE_FIBERS})");
        }

        context::with_worker(|w| match w {
            Some(worker) => self.submit_local(worker, fiber),
            None => self.submit_remote(fiber),
        });
    }

    /// Spawn placement for worker callers: keep it local while the local
    /// queue is near its fair share, shed the excess to the injector in one
    /// batch otherwise.
    fn submit_local(&self, worker: &worker::WorkerContext, fiber: FiberRef) {
        let target = self.refill_target();
        let mut core = worker.core.borrow_mut();
        let queue = &mut core.run_queue;

        // len >= 1.5 * target, kept in integer arithmetic.
        if queue.len().saturating_mul(2) >= target.saturating_mul(3) {
            // Overloaded: the new fiber and everything above the target go
            // to the injector under a single lock hold, so observers see
            // one monotonic batch.
            let mut shed = 1usize;
            let mut injector = self.injector.lock();
            injector.push_back(fiber);
            while queue.len() > target {
                let Some(excess) = queue.pop_back() else { break };
                injector.push_back(excess);
                shed += 1;
            }
            drop(injector);
            self.injector_ready.notify_all();

            tracing::trace!(worker = worker.index, shed, target, "shed load to injector");
        } else if let Err(fiber) = queue.push_back(fiber) {
            // Full local queue; fall back to the injector.
            drop(core);
            self.submit_remote(fiber);
        }
    }

    /// Pushes a fiber onto the injector and wakes one sleeping worker.
    pub(crate) fn submit_remote(&self, fiber: FiberRef) {
        self.injector.lock().push_back(fiber);
        self.injector_ready.notify_one();
    }

    /// Moves fibers from the injector into `queue` until it holds `target`
    /// fibers or the injector runs dry.
    pub(crate) fn refill(&self, queue: &mut Local, target: usize) {
        let mut injector = self.injector.lock();
        while queue.len() < target {
            let Some(fiber) = injector.pop_front() else {
                break;
            };
            if let Err(fiber) = queue.push_back(fiber) {
                injector.push_front(fiber);
                break;
            }
        }
    }

    /// Blocks the calling worker until the injector has work. Returns
    /// `false` when woken for shutdown instead.
    pub(crate) fn park_for_work(&self) -> bool {
        let mut injector = self.injector.lock();
        loop {
            if self.run_state() == RunState::Stopped {
                return false;
            }
            if !injector.is_empty() {
                return true;
            }
            self.injector_ready.wait(&mut injector);
        }
    }

    /// Blocks the caller until `target` is dead.
    pub(crate) fn join(&self, target: &FiberRef) {
        match context::current() {
            Some(caller) => {
                if Arc::ptr_eq(&caller, target) {
                    fatal!("fiber '{}' joined itself", caller.name());
                }

                let mut state = target.state.lock_arc();
                if state.status == Status::Dead {
                    return;
                }

                // Target state lock first, then the waiter's own: the same
                // order the termination drain uses.
                caller.state.lock().status = Status::Waiting;
                state.waiters.push(Waiter::Fiber(Arc::clone(&caller)));

                // Suspend while still holding the target's state lock; it
                // travels to the dispatcher inside the pause reason and is
                // released there, after this context is fully saved.
                //
                // Safety: `caller` is the fiber executing on this stack.
                unsafe { caller.pause(Pause::Blocked(state)) };

                debug_assert!(target.is_dead());
            }
            None => {
                let mut state = target.state.lock();
                if state.status == Status::Dead {
                    return;
                }

                let parker = Arc::new(Parker::new());
                state.waiters.push(Waiter::Thread(Arc::clone(&parker)));
                drop(state);

                parker.park();
                debug_assert!(target.is_dead());
            }
        }
    }

    /// Wakes every joiner of a fiber that just died. Called with the dead
    /// fiber's state lock still held; the whole drain and every re-enqueue
    /// happen under one injector critical section so a joiner cannot be
    /// observed partly woken.
    pub(crate) fn wake_waiters(&self, waiters: Vec<Waiter>) {
        if waiters.is_empty() {
            return;
        }

        let mut injector = self.injector.lock();
        for waiter in waiters {
            match waiter {
                Waiter::Fiber(fiber) => {
                    fiber.state.lock().status = Status::Running;
                    injector.push_back(fiber);
                }
                Waiter::Thread(parker) => parker.unpark(),
            }
        }
        drop(injector);
        self.injector_ready.notify_all();
    }

    /// Retains a terminated fiber until shutdown.
    pub(crate) fn retain_dead(&self, fiber: FiberRef) {
        self.dead.lock().push(fiber);
    }

    /// Tears the runtime down: only legal once every fiber is dead.
    fn shutdown(&self) {
        let live = self.live();
        if live != 0 {
            fatal!("runtime shut down with {live} live fibers");
        }

        // Publish the stop under the injector lock so no worker can slip
        // between its state check and the condvar wait, then wake them all.
        {
            let _injector = self.injector.lock();
            self.run_state
                .store(RunState::Stopped as u8, Ordering::Release);
        }
        self.injector_ready.notify_all();

        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }

        // Workers are gone; release the shared queues, injector first.
        self.injector.lock().clear();
        self.dead.lock().clear();

        tracing::debug!("runtime stopped");
    }
}

extern "C" fn shutdown_at_exit() {
    if let Some(scheduler) = SCHEDULER.get() {
        scheduler.shutdown();
    }
}

/// Size of the worker pool: one thread per logical core minus one for the
/// main thread, overridable through `WEFT_WORKERS`.
fn pool_size() -> usize {
    if let Ok(value) = env::var("WEFT_WORKERS") {
        match value.parse::<usize>() {
            Ok(n) if n > 0 => return n.min(MAX_WORKERS),
            _ => tracing::warn!(%value, "ignoring invalid WEFT_WORKERS"),
        }
    }

    let cores = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(2);
    cores.saturating_sub(1).clamp(1, MAX_WORKERS)
}
