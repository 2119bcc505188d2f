//! A cooperative M:N fiber runtime.
//!
//! Many lightweight, named fibers are multiplexed onto a fixed pool of
//! worker threads, one per logical core (minus one for the thread that
//! started it all). Fibers schedule cooperatively: a fiber holds its worker
//! until it calls [`yield_now`], blocks in [`JoinHandle::join`], or returns
//! from its entry function. Each worker owns a lock-free local run queue;
//! a shared injector queue carries overflow, submissions from non-worker
//! threads, and join wake-ups.
//!
//! The whole public surface is three operations:
//!
//! ```
//! let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
//!
//! let fibers: Vec<_> = (0..4)
//!     .map(|i| {
//!         let counter = counter.clone();
//!         weft::spawn(format!("worker-{i}"), move || {
//!             counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!             weft::yield_now();
//!             counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         })
//!     })
//!     .collect();
//!
//! for fiber in &fibers {
//!     fiber.join();
//! }
//! assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 8);
//! ```
//!
//! # Caveats
//!
//! Fibers must cooperate: a fiber that spins without yielding starves its
//! worker. Entry functions must return normally; panics are fatal to the
//! process. Cyclic joins deadlock and are not detected. Every spawned fiber
//! must be allowed to finish before the process exits.

use std::fmt;

/// Aborts the process with a diagnostic. The runtime has no recoverable
/// errors: every failure here is either a violated invariant or resource
/// exhaustion, and limping on would corrupt user programs far from the
/// cause.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        eprintln!(
            "weft runtime fatal error at {}:{}: {}",
            file!(),
            line!(),
            format_args!($($arg)*)
        );
        std::process::abort()
    }};
}
pub(crate) use fatal;

mod context;
mod fiber;
mod park;
mod queue;
mod scheduler;
mod worker;

use crate::fiber::{Fiber, FiberRef, Pause};

/// Starts a new fiber executing `f`.
///
/// The fiber becomes runnable immediately: on the spawning worker's own
/// run queue when called from fiber code, through the shared injector queue
/// otherwise. The runtime (worker pool included) is created on first use.
///
/// `name` is a human-readable label carried through logging and available
/// from the returned handle. Names need not be unique.
///
/// # Aborts
///
/// Aborts the process if more than 15,000 fibers are live at once.
pub fn spawn<F>(name: impl Into<String>, f: F) -> JoinHandle
where
    F: FnOnce() + Send + 'static,
{
    let scheduler = scheduler::get();

    let fiber = Fiber::new(name.into(), Box::new(f));
    tracing::trace!(fiber = fiber.name(), "spawn");

    scheduler.submit(FiberRef::clone(&fiber));
    JoinHandle { fiber }
}

/// Yields the calling fiber, letting every other ready fiber on its worker
/// run before it is dispatched again.
///
/// Called from the main thread (or any other non-worker thread) this is a
/// no-op, apart from initializing the runtime if it does not exist yet.
pub fn yield_now() {
    let _ = scheduler::get();

    if let Some(current) = context::current() {
        // Safety: `current` is the fiber executing on this stack.
        unsafe { current.pause(Pause::Yielded) };
    }
}

/// Returns the number of live (spawned and not yet terminated) fibers.
pub fn live_fibers() -> usize {
    scheduler::get().live()
}

/// Handle to a spawned fiber, returned by [`spawn`].
///
/// The handle is shareable; any number of fibers and threads may join the
/// same fiber, concurrently or after the fact. Dropping the handle does not
/// affect the fiber.
#[derive(Clone)]
pub struct JoinHandle {
    fiber: FiberRef,
}

impl JoinHandle {
    /// Blocks until the fiber has terminated.
    ///
    /// Fiber callers are suspended and their worker dispatches other work;
    /// non-worker threads block on a condition variable. Returns
    /// immediately if the fiber is already done, no matter how long ago.
    pub fn join(&self) {
        scheduler::get().join(&self.fiber);
    }

    /// The name the fiber was spawned with.
    pub fn name(&self) -> &str {
        self.fiber.name()
    }

    /// Whether the fiber has terminated.
    ///
    /// `true` means a subsequent [`join`](JoinHandle::join) returns without
    /// blocking.
    pub fn is_finished(&self) -> bool {
        self.fiber.is_dead()
    }
}

impl fmt::Debug for JoinHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("name", &self.name())
            .field("finished", &self.is_finished())
            .finish()
    }
}
