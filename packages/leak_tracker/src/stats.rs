use std::sync::atomic::{AtomicU64, Ordering};

/// Allocation counters of a [`Recorder`][crate::Recorder] at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct MemStats {
    /// Allocations recorded since the recorder was created. Reallocations are not counted.
    pub allocations: u64,

    /// Recorded allocations that have not been freed.
    pub active_allocations: u64,

    /// Bytes reserved by recorded allocations, adjusted down when a reallocation replaces an
    /// allocation.
    pub reserved_bytes: u64,

    /// Bytes reserved by recorded allocations that have not been freed.
    pub active_reserved_bytes: u64,

    /// Frees of addresses the recorder had no record of.
    pub untracked_frees: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    allocations: AtomicU64,
    active_allocations: AtomicU64,
    reserved_bytes: AtomicU64,
    active_reserved_bytes: AtomicU64,
    untracked_frees: AtomicU64,
}

// Relaxed is sufficient: each counter is independent and only needs atomicity. A snapshot taken
// during concurrent activity may mix counts from before and after an operation.
impl Counters {
    pub(crate) fn allocated(&self, size: usize) {
        let size = bytes(size);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.active_allocations.fetch_add(1, Ordering::Relaxed);
        self.reserved_bytes.fetch_add(size, Ordering::Relaxed);
        self.active_reserved_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// A tracked allocation of `old_size` bytes was replaced by one of `new_size` bytes.
    pub(crate) fn reallocated(&self, old_size: usize, new_size: usize) {
        let (old_size, new_size) = (bytes(old_size), bytes(new_size));

        self.reserved_bytes.fetch_sub(old_size, Ordering::Relaxed);
        self.reserved_bytes.fetch_add(new_size, Ordering::Relaxed);
        self.active_reserved_bytes.fetch_sub(old_size, Ordering::Relaxed);
        self.active_reserved_bytes.fetch_add(new_size, Ordering::Relaxed);
    }

    pub(crate) fn freed(&self, size: usize) {
        self.active_allocations.fetch_sub(1, Ordering::Relaxed);
        self.active_reserved_bytes.fetch_sub(bytes(size), Ordering::Relaxed);
    }

    pub(crate) fn untracked_free(&self) {
        self.untracked_frees.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MemStats {
        MemStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            active_allocations: self.active_allocations.load(Ordering::Relaxed),
            reserved_bytes: self.reserved_bytes.load(Ordering::Relaxed),
            active_reserved_bytes: self.active_reserved_bytes.load(Ordering::Relaxed),
            untracked_frees: self.untracked_frees.load(Ordering::Relaxed),
        }
    }
}

fn bytes(size: usize) -> u64 {
    size.try_into().expect("usize always fits into u64")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(MemStats: Send, Sync, Copy, Debug);
    assert_impl_all!(Counters: Send, Sync);

    #[test]
    fn starts_at_zero() {
        assert_eq!(Counters::default().snapshot(), MemStats::default());
    }

    #[test]
    fn allocate_then_free() {
        let counters = Counters::default();

        counters.allocated(100);
        counters.allocated(28);
        counters.freed(100);

        let stats = counters.snapshot();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.active_allocations, 1);
        assert_eq!(stats.reserved_bytes, 128);
        assert_eq!(stats.active_reserved_bytes, 28);
        assert_eq!(stats.untracked_frees, 0);
    }

    #[test]
    fn reallocation_replaces_size_without_counting() {
        let counters = Counters::default();

        counters.allocated(100);
        counters.reallocated(100, 250);

        let stats = counters.snapshot();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.active_allocations, 1);
        assert_eq!(stats.reserved_bytes, 250);
        assert_eq!(stats.active_reserved_bytes, 250);
    }

    #[test]
    fn untracked_frees_are_counted_separately() {
        let counters = Counters::default();

        counters.untracked_free();
        counters.untracked_free();

        let stats = counters.snapshot();
        assert_eq!(stats.untracked_frees, 2);
        assert_eq!(stats.active_allocations, 0);
    }
}
