//! Small synchronization building blocks that aren't already covered by
//! the `spin` crate the rest of the engine leans on (see [`diag`] and
//! [`sim`] for `spin::Mutex` usage). Reference counting a block's
//! storage isn't something `spin` provides, and it's small enough to
//! own directly here.
//!
//! [`diag`]: crate::diag
//! [`sim`]: crate::sim

use core::sync::atomic::{AtomicU32, Ordering};

/// Atomic reference count for block storage (component E). A block's
/// storage must outlive every other block that has a `call-block`
/// embedded pointing at it; this is the counter that tracks that,
/// independent of however many `Rust` values happen to reference the
/// [`crate::block::BlockHandle`] itself.
pub struct AtomicRefCount {
    count: AtomicU32,
}

impl AtomicRefCount {
    pub const fn new(initial: u32) -> Self {
        Self { count: AtomicU32::new(initial) }
    }

    #[inline]
    pub fn inc(&self) -> u32 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement and return the count after decrementing. Acquire-fences
    /// on the transition to zero so the caller's subsequent free of the
    /// storage observes every write made before the last reference was
    /// dropped.
    #[inline]
    pub fn dec(&self) -> u32 {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            core::sync::atomic::fence(Ordering::Acquire);
        }
        prev - 1
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dec_reaches_zero_after_matching_inc_calls() {
        let rc = AtomicRefCount::new(1);
        rc.inc();
        assert_eq!(rc.get(), 2);
        assert_eq!(rc.dec(), 1);
        assert_eq!(rc.dec(), 0);
    }
}
