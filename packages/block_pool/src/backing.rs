use std::alloc::{GlobalAlloc, Layout, alloc, dealloc};
use std::fmt;
use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::{Error, Result};

static BACKING_ALLOCATOR: OnceLock<&'static (dyn GlobalAlloc + Sync)> = OnceLock::new();

/// Chooses the allocator that pools created from now on take their memory from.
///
/// By default pools allocate through the global allocator. Code that runs inside a custom
/// global allocator (for example one that records allocations in a pool bank) must point pools
/// at the underlying allocator instead, or every pool allocation would re-enter itself.
///
/// The choice is process-wide and can be made once. Pools created earlier keep using whichever
/// allocator they were created with.
///
/// # Errors
///
/// Returns [`Error::BackingAllocatorAlreadySet`] if an allocator was already chosen.
///
/// # Example
///
/// ```
/// use std::alloc::System;
///
/// block_pool::set_backing_allocator(&System)?;
///
/// assert!(block_pool::set_backing_allocator(&System).is_err());
/// # Ok::<(), block_pool::Error>(())
/// ```
pub fn set_backing_allocator(allocator: &'static (dyn GlobalAlloc + Sync)) -> Result<()> {
    BACKING_ALLOCATOR
        .set(allocator)
        .map_err(|_rejected| Error::BackingAllocatorAlreadySet)
}

/// Where a pool got its memory from. Memory is always returned to the same place.
#[derive(Clone, Copy)]
pub(crate) enum Backing {
    Global,
    Custom(&'static (dyn GlobalAlloc + Sync)),
}

impl Backing {
    pub(crate) fn current() -> Self {
        BACKING_ALLOCATOR
            .get()
            .map_or(Self::Global, |allocator| Self::Custom(*allocator))
    }

    /// Allocates memory for `layout`, which must have a non-zero size.
    pub(crate) fn allocate(self, layout: Layout) -> Result<NonNull<u8>> {
        debug_assert!(layout.size() > 0, "pool allocations are never zero-sized");

        let ptr = match self {
            // SAFETY: The layout has a non-zero size.
            Self::Global => unsafe { alloc(layout) },
            // SAFETY: The layout has a non-zero size.
            Self::Custom(allocator) => unsafe { allocator.alloc(layout) },
        };

        NonNull::new(ptr).ok_or_else(|| Error::allocation_failed(layout))
    }

    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate()` on the same backing with the same layout,
    /// and must not be used afterwards.
    pub(crate) unsafe fn deallocate(self, ptr: NonNull<u8>, layout: Layout) {
        match self {
            // SAFETY: Forwarding the requirements to the caller.
            Self::Global => unsafe { dealloc(ptr.as_ptr(), layout) },
            // SAFETY: Forwarding the requirements to the caller.
            Self::Custom(allocator) => unsafe { allocator.dealloc(ptr.as_ptr(), layout) },
        }
    }
}

impl fmt::Debug for Backing {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("Global"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::alloc::System;

    use super::*;

    #[test]
    fn global_backing_round_trips_memory() {
        let layout = Layout::from_size_align(128, 16).unwrap();

        let ptr = Backing::Global.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr().addr() % 16, 0);

        // SAFETY: Allocated above with the same backing and layout.
        unsafe { Backing::Global.deallocate(ptr, layout) };
    }

    #[test]
    fn custom_backing_round_trips_memory() {
        let backing = Backing::Custom(&System);
        let layout = Layout::new::<[u64; 4]>();

        let ptr = backing.allocate(layout).unwrap();

        // SAFETY: Allocated above with the same backing and layout.
        unsafe { backing.deallocate(ptr, layout) };
    }
}
