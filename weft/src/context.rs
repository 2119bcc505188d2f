// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Thread-scoped bindings from an OS thread to its runtime surroundings.
//!
//! Two bindings live here: which worker (if any) the current thread is, and
//! which fiber (if any) the current thread is executing right now. Both are
//! scoped rather than stored: a pointer is valid exactly for the duration of
//! the closure that installed it.
//!
//! The fiber binding is installed by the *dispatcher* around each resume,
//! never by code on a fiber stack. A frame on a fiber stack can be frozen at
//! any suspension point, which would leave a scope-reset guard in limbo;
//! dispatcher frames only run between switches and always unwind normally.

use std::cell::Cell;
use std::ptr;

use crate::fiber::FiberRef;
use crate::worker::WorkerContext;

thread_local! {
    static WORKER: Scoped<WorkerContext> = const { Scoped::new() };
    static CURRENT: Scoped<FiberRef> = const { Scoped::new() };
}

/// Marks the current thread as worker `cx` for the duration of `f`.
pub(crate) fn set_worker<R>(cx: &WorkerContext, f: impl FnOnce() -> R) -> R {
    WORKER.with(|slot| slot.set(cx, f))
}

/// Calls `f` with the current thread's worker context, or `None` when called
/// from the main thread or any other foreign thread.
pub(crate) fn with_worker<R>(f: impl FnOnce(Option<&WorkerContext>) -> R) -> R {
    WORKER.with(|slot| slot.with(f))
}

/// Marks `fiber` as executing on the current thread for the duration of `f`.
pub(crate) fn set_current<R>(fiber: &FiberRef, f: impl FnOnce() -> R) -> R {
    CURRENT.with(|slot| slot.set(fiber, f))
}

/// Returns the fiber currently executing on this thread, if any.
pub(crate) fn current() -> Option<FiberRef> {
    CURRENT.with(|slot| slot.with(|fiber| fiber.cloned()))
}

/// Scoped thread-local storage.
struct Scoped<T> {
    inner: Cell<*const T>,
}

impl<T> Scoped<T> {
    const fn new() -> Scoped<T> {
        Scoped {
            inner: Cell::new(ptr::null()),
        }
    }

    /// Inserts a value into the scoped cell for the duration of the closure.
    fn set<F, R>(&self, t: &T, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        struct Reset<'a, T> {
            cell: &'a Cell<*const T>,
            prev: *const T,
        }

        impl<T> Drop for Reset<'_, T> {
            fn drop(&mut self) {
                self.cell.set(self.prev);
            }
        }

        let prev = self.inner.get();
        self.inner.set(ptr::from_ref(t));

        let _reset = Reset {
            cell: &self.inner,
            prev,
        };

        f()
    }

    /// Gets the value out of the scoped cell.
    fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Option<&T>) -> R,
    {
        let val = self.inner.get();

        if val.is_null() {
            f(None)
        } else {
            // Safety: a non-null pointer was installed by `set` and stays
            // valid until the closure that installed it returns.
            unsafe { f(Some(&*val)) }
        }
    }
}
