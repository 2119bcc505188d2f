// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stack allocation for fibers.
//!
//! Fiber stacks are `mmap`ed with an inaccessible guard page below the usable
//! region, so running off the end of a stack faults instead of silently
//! corrupting whatever happens to be mapped there.

use std::io::Error;
use std::num::NonZeroUsize;
use std::ptr;

#[cfg(not(unix))]
compile_error!("fiber stacks are only implemented for unix targets");

/// An address within some fiber stack.
pub type StackPointer = NonZeroUsize;

/// Minimum size of a stack, excluding guard pages.
pub const MIN_STACK_SIZE: usize = 4096;

pub use crate::arch::STACK_ALIGNMENT;

/// A memory region usable as a fiber stack.
///
/// # Safety
///
/// Both addresses must be aligned to [`STACK_ALIGNMENT`] and must stay valid
/// and stable for as long as any fiber is executing on the stack.
pub unsafe trait FiberStack {
    /// Returns the highest address (start address) of the stack.
    fn top(&self) -> StackPointer;

    /// Returns the lowest address (maximum limit) of the stack, including any
    /// guard pages.
    fn bottom(&self) -> StackPointer;
}

/// A mutable reference to a stack can be used as a stack. The lifetime of the
/// resulting fiber will be bound to that of the reference.
// Safety: forwards to the underlying stack.
unsafe impl<S: FiberStack> FiberStack for &mut S {
    #[inline]
    fn top(&self) -> StackPointer {
        (**self).top()
    }

    #[inline]
    fn bottom(&self) -> StackPointer {
        (**self).bottom()
    }
}

/// An owned, guard-paged stack allocation.
#[derive(Debug)]
pub struct GuardedStack {
    top: StackPointer,
    mmap_len: usize,
}

impl GuardedStack {
    /// Allocates a stack with at least `size` usable bytes plus one guard
    /// page below them.
    pub fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(MIN_STACK_SIZE);

        // One extra page for the guard, then round up to a page boundary.
        let page_size = page_size();
        let mmap_len = size
            .checked_add(page_size + page_size - 1)
            .expect("integer overflow while calculating stack size")
            & !(page_size - 1);

        // OpenBSD requires MAP_STACK on anything that is used as a stack.
        cfg_if::cfg_if! {
            if #[cfg(target_os = "openbsd")] {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_STACK;
            } else {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
            }
        }

        // Safety: anonymous mapping, then mprotect within its bounds.
        unsafe {
            let mmap = libc::mmap(ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
            if mmap == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            // Construct the value first so the mapping is released if the
            // mprotect below fails.
            let out = Self {
                top: StackPointer::new(mmap as usize + mmap_len).unwrap(),
                mmap_len,
            };

            // Make everything except the lowest page writable.
            if libc::mprotect(
                mmap.cast::<u8>().add(page_size).cast(),
                mmap_len - page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            ) != 0
            {
                return Err(Error::last_os_error());
            }

            Ok(out)
        }
    }
}

impl Default for GuardedStack {
    fn default() -> Self {
        Self::new(64 * 1024).expect("failed to allocate stack")
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        let mmap = self.top.get() - self.mmap_len;
        // Safety: unmapping the exact region returned by mmap in `new`.
        let ret = unsafe { libc::munmap(mmap as _, self.mmap_len) };
        debug_assert_eq!(ret, 0);
    }
}

// Safety: top/bottom delimit the live mapping, which mmap aligns to at least
// a page boundary.
unsafe impl FiberStack for GuardedStack {
    fn top(&self) -> StackPointer {
        self.top
    }

    fn bottom(&self) -> StackPointer {
        StackPointer::new(self.top.get() - self.mmap_len).unwrap()
    }
}

fn page_size() -> usize {
    // Safety: sysconf(_SC_PAGESIZE) has no preconditions.
    let pagesize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    assert!(pagesize.is_power_of_two());
    pagesize
}
