//! Allocation primitives with a replaceable out-of-memory policy.
//!
//! Every buffer the handle core builds on behalf of a session goes through
//! an [`Allocator`]. Allocation failure is never returned to the caller:
//! the session's [`OutOfMemoryHandler`] runs instead, and the default
//! handler aborts the process.
//!
//! ## Handler contract
//!
//! - Default: `std::process::abort()`
//! - Replacement: may unwind (panic) to turn the failure into something the
//!   embedding code can catch at its own boundary
//! - A replacement that returns normally falls through to
//!   [`std::alloc::handle_alloc_error`], so no primitive ever hands back a
//!   short or missing buffer

use std::alloc::Layout;
use std::sync::Arc;

/// Invoked with the failed layout when an allocation cannot be satisfied.
pub type OutOfMemoryHandler = Arc<dyn Fn(Layout) + Send + Sync>;

/// The built-in handler: abort the process.
pub fn default_out_of_memory_handler() -> OutOfMemoryHandler {
    Arc::new(|_layout: Layout| std::process::abort())
}

/// Allocation front-end bound to one out-of-memory policy.
#[derive(Clone)]
pub struct Allocator {
    oom: OutOfMemoryHandler,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator").finish_non_exhaustive()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    /// Create an allocator using the aborting handler.
    pub fn new() -> Self {
        Self {
            oom: default_out_of_memory_handler(),
        }
    }

    pub fn with_handler(handler: OutOfMemoryHandler) -> Self {
        Self { oom: handler }
    }

    pub fn set_out_of_memory_handler(&mut self, handler: OutOfMemoryHandler) {
        self.oom = handler;
    }

    pub fn out_of_memory_handler(&self) -> OutOfMemoryHandler {
        Arc::clone(&self.oom)
    }

    /// Run the out-of-memory policy for `layout`. Never returns.
    pub fn fail(&self, layout: Layout) -> ! {
        tracing::error!(
            size = layout.size(),
            align = layout.align(),
            "allocation failed, invoking out-of-memory handler"
        );
        (self.oom)(layout);
        std::alloc::handle_alloc_error(layout)
    }

    /// Grow `buf` so it can hold `additional` more elements, or fail.
    pub fn reserve<T>(&self, buf: &mut Vec<T>, additional: usize) {
        if buf.try_reserve_exact(additional).is_err() {
            let wanted = buf.len().saturating_add(additional);
            self.fail(Layout::array::<T>(wanted).unwrap_or_else(|_| oversized_layout()));
        }
    }

    /// Empty buffer with room for `nbytes` bytes.
    pub fn malloc(&self, nbytes: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        if nbytes > 0 {
            self.reserve(&mut buf, nbytes);
        }
        buf
    }

    /// Zero-filled buffer of `count * size` bytes.
    ///
    /// Overflow in the multiplication is treated as allocation failure.
    pub fn calloc(&self, count: usize, size: usize) -> Vec<u8> {
        let Some(nbytes) = count.checked_mul(size) else {
            self.fail(oversized_layout());
        };
        let mut buf = self.malloc(nbytes);
        buf.resize(nbytes, 0);
        buf
    }

    /// Resize `buf` to exactly `nbytes` bytes, zero-filling any new tail.
    pub fn realloc(&self, mut buf: Vec<u8>, nbytes: usize) -> Vec<u8> {
        if nbytes > buf.len() {
            let additional = nbytes - buf.len();
            self.reserve(&mut buf, additional);
            buf.resize(nbytes, 0);
        } else {
            buf.truncate(nbytes);
            buf.shrink_to(nbytes);
        }
        buf
    }

    pub fn strdup(&self, s: &str) -> String {
        self.strndup(s, s.len())
    }

    /// Copy at most `n` bytes of `s`, cut back to the nearest char boundary.
    pub fn strndup(&self, s: &str, n: usize) -> String {
        let mut end = n.min(s.len());
        while !s.is_char_boundary(end) {
            end -= 1;
        }

        let mut out = String::new();
        if out.try_reserve_exact(end).is_err() {
            self.fail(Layout::array::<u8>(end).unwrap_or_else(|_| oversized_layout()));
        }
        out.push_str(&s[..end]);
        out
    }

    pub fn memdup(&self, src: &[u8]) -> Vec<u8> {
        let mut buf = self.malloc(src.len());
        buf.extend_from_slice(src);
        buf
    }
}

/// Layout describing a request no allocator can satisfy.
fn oversized_layout() -> Layout {
    Layout::from_size_align(isize::MAX as usize, 1).unwrap_or_else(|_| Layout::new::<u8>())
}
