//! Global allocator wrapper that feeds a [`Recorder`].

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::{LeakReport, LeakReportGuard, MemStats, Recorder};

thread_local! {
    // Set while this thread is inside the tracker. Allocations made by the tracker itself (table
    // growth, report strings, log output) pass straight through to the inner allocator instead
    // of recursing into the recorder.
    static IN_TRACKER: Cell<bool> = const { Cell::new(false) };
}

/// Runs `f` with tracking suspended on this thread, or returns `None` without running it if
/// this thread is already inside the tracker (or is being torn down).
fn untracked<R>(f: impl FnOnce() -> R) -> Option<R> {
    let entered = IN_TRACKER
        .try_with(|busy| !busy.replace(true))
        .unwrap_or(false);

    if !entered {
        return None;
    }

    // Also runs if `f` panics, so a failed operation does not switch tracking off for good.
    let _leave = scopeguard::guard((), |()| {
        _ = IN_TRACKER.try_with(|busy| busy.set(false));
    });

    Some(f())
}

/// A memory allocator that records every live allocation, so the ones never freed can be
/// reported.
///
/// This allocator wraps any [`GlobalAlloc`] implementation. Memory comes from the wrapped
/// allocator as usual; in addition, every allocation is recorded along with its size and the
/// stack at the time, and every free removes the record again. Whatever is left over is a
/// leak.
///
/// The [`Recorder`] behind the allocator is created on the first allocation. Its record pools
/// take their memory from [`System`] through
/// [`block_pool::set_backing_allocator()`], bypassing the tracking allocator.
///
/// # Examples
///
/// ```
/// use leak_tracker::Allocator;
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// fn main() {
///     let leaked = Box::leak(Box::new([0_u8; 1024]));
///
///     let report = ALLOCATOR.leak_report().unwrap();
///     assert!(
///         report
///             .leaks()
///             .iter()
///             .any(|leak| leak.address() == leaked.as_ptr().addr())
///     );
/// }
/// ```
pub struct Allocator<A: GlobalAlloc> {
    inner: A,

    /// `None` inside if the recorder could not be created; tracking is off for good then.
    recorder: OnceLock<Option<Recorder>>,

    enabled: AtomicBool,
}

impl Allocator<System> {
    /// Creates a tracking allocator on top of the system allocator.
    #[must_use]
    #[inline]
    pub const fn system() -> Self {
        Self::new(System)
    }
}

impl<A: GlobalAlloc> Allocator<A> {
    /// Creates a tracking allocator on top of `inner`.
    #[must_use]
    #[inline]
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            recorder: OnceLock::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Starts or stops recording new allocations.
    ///
    /// Frees are matched against existing records either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);

        _ = untracked(|| {
            if let Some(recorder) = self.existing_recorder() {
                recorder.set_enabled(enabled);
            }
        });
    }

    /// Whether new allocations are being recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Current allocation counters, or `None` if nothing has been recorded yet.
    #[must_use]
    pub fn stats(&self) -> Option<MemStats> {
        untracked(|| self.existing_recorder().map(Recorder::stats)).flatten()
    }

    /// Lists every live allocation, or returns `None` if nothing has been recorded yet.
    ///
    /// The report itself is allocated with tracking active, so it shows up in later reports
    /// for as long as it is kept.
    #[must_use]
    pub fn leak_report(&self) -> Option<LeakReport> {
        let report = untracked(|| self.existing_recorder().map(Recorder::leak_report)).flatten()?;

        // The report was allocated with tracking suspended. Copy it into tracked memory, so
        // freeing it later does not look like a free of memory that was never allocated.
        let tracked = report.clone();
        _ = untracked(move || drop(report));

        Some(tracked)
    }

    /// Prints the leak report to stdout. Prints nothing if nothing has been recorded yet.
    ///
    /// To print the report at the end of the program, use
    /// [`report_on_drop()`][Self::report_on_drop] at the start of `main()` instead.
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stdout output reliably - manually tested.
    pub fn print_leaks(&self) {
        _ = untracked(|| {
            if let Some(recorder) = self.existing_recorder() {
                recorder.leak_report().print_to_stdout();
            }
        });
    }

    /// Returns a guard that prints the leak report when dropped.
    ///
    /// Keep the guard alive until the end of `main()`; see [`LeakReportGuard`].
    pub fn report_on_drop(&self) -> LeakReportGuard<'_, A> {
        LeakReportGuard::new(self)
    }

    fn existing_recorder(&self) -> Option<&Recorder> {
        self.recorder.get()?.as_ref()
    }

    /// Must be called with tracking suspended, as creating the recorder allocates.
    fn recorder(&self) -> Option<&Recorder> {
        self.recorder
            .get_or_init(|| create_recorder(self.is_enabled()))
            .as_ref()
    }

    fn record_allocation(&self, ptr: *mut u8, size: usize) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        if !self.is_enabled() {
            return;
        }

        _ = untracked(|| {
            if let Some(recorder) = self.recorder() {
                recorder.record_allocation(ptr, size);
            }
        });
    }
}

fn create_recorder(enabled: bool) -> Option<Recorder> {
    if block_pool::set_backing_allocator(&System).is_err() {
        debug!("block pool backing allocator already chosen, record pools will use it");
    }

    match Recorder::builder().build() {
        Ok(recorder) => {
            recorder.set_enabled(enabled);
            Some(recorder)
        }
        Err(error) => {
            warn!(%error, "allocation recorder could not be created, leak tracking is off");
            None
        }
    }
}

impl<A: GlobalAlloc> fmt::Debug for Allocator<A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("inner", &"<allocator>")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

// SAFETY: We delegate all allocation operations to the inner allocator, which implements
// GlobalAlloc safely. Recording never touches the memory being allocated or freed, and any
// allocation the recorder itself makes goes straight to the inner allocator.
unsafe impl<A: GlobalAlloc> GlobalAlloc for Allocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: Forwarding the caller's guarantees to the inner allocator.
        let ptr = unsafe { self.inner.alloc(layout) };

        self.record_allocation(ptr, layout.size());
        ptr
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: Forwarding the caller's guarantees to the inner allocator.
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };

        self.record_allocation(ptr, layout.size());
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // The record goes first, before another thread can be handed the same address.
        if let Some(block) = NonNull::new(ptr) {
            _ = untracked(|| {
                if let Some(recorder) = self.existing_recorder() {
                    _ = recorder.retire_allocation(block);
                }
            });
        }

        // SAFETY: Forwarding the caller's guarantees to the inner allocator.
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // Like a free, the old record goes first, before the old address can be handed to
        // another thread. It is put back if reallocating fails.
        let pending = NonNull::new(ptr).and_then(|old| {
            untracked(|| {
                let recorder = if self.is_enabled() {
                    self.recorder()
                } else {
                    self.existing_recorder()
                }?;

                Some((recorder, recorder.begin_reallocation(old)))
            })
            .flatten()
        });

        // SAFETY: Forwarding the caller's guarantees to the inner allocator.
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };

        if let Some((recorder, reallocation)) = pending {
            _ = untracked(|| {
                recorder.finish_reallocation(reallocation, NonNull::new(new_ptr), new_size);
            });
        }

        new_ptr
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic;

    use super::*;

    static_assertions::assert_impl_all!(Allocator<System>: Send, Sync, fmt::Debug);

    #[test]
    fn untracked_does_not_nest() {
        let outer = untracked(|| untracked(|| 1));

        assert_eq!(outer, Some(None));
        assert_eq!(untracked(|| 2), Some(2));
    }

    #[test]
    fn untracked_recovers_after_panic() {
        let result = panic::catch_unwind(|| {
            untracked(|| panic!("inside tracker"));
        });

        assert!(result.is_err());
        assert_eq!(untracked(|| 3), Some(3));
    }

    #[test]
    fn allocator_not_installed_records_on_direct_use() {
        let allocator = Allocator::system();
        let layout = Layout::new::<[u64; 4]>();

        assert!(allocator.stats().is_none());

        // SAFETY: The layout has a non-zero size.
        let ptr = unsafe { allocator.alloc(layout) };
        assert!(!ptr.is_null());

        let stats = allocator.stats().unwrap();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.active_reserved_bytes, 32);

        // SAFETY: Allocated above with the same allocator and layout.
        let ptr = unsafe { allocator.realloc(ptr, layout, 64) };
        assert!(!ptr.is_null());

        let stats = allocator.stats().unwrap();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.active_reserved_bytes, 64);

        // SAFETY: Reallocated above to 64 bytes with the same alignment.
        unsafe { allocator.dealloc(ptr, Layout::from_size_align(64, 8).unwrap()) };

        let stats = allocator.stats().unwrap();
        assert_eq!(stats.active_allocations, 0);
        assert_eq!(stats.untracked_frees, 0);
        assert!(allocator.leak_report().unwrap().leaks().is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not fail oversized allocations gracefully.
    fn failed_realloc_keeps_old_record() {
        let allocator = Allocator::system();
        let layout = Layout::new::<[u64; 2]>();

        // SAFETY: The layout has a non-zero size.
        let ptr = unsafe { allocator.alloc(layout) };
        assert!(!ptr.is_null());

        // No allocator can satisfy this, so the original allocation stays where it is.
        let impossible = isize::MAX.unsigned_abs().wrapping_sub(64);

        // SAFETY: Allocated above with the same allocator and layout. The new size does not
        // overflow isize when rounded up to the alignment.
        let failed = unsafe { allocator.realloc(ptr, layout, impossible) };
        assert!(failed.is_null());

        let stats = allocator.stats().unwrap();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.active_allocations, 1);
        assert_eq!(stats.active_reserved_bytes, 16);

        // SAFETY: The failed reallocation left the original allocation in place.
        unsafe { allocator.dealloc(ptr, layout) };

        let stats = allocator.stats().unwrap();
        assert_eq!(stats.active_allocations, 0);
        assert_eq!(stats.untracked_frees, 0);
    }

    #[test]
    fn disabled_allocator_records_nothing() {
        let allocator = Allocator::system();
        allocator.set_enabled(false);
        assert!(!allocator.is_enabled());

        let layout = Layout::new::<u64>();

        // SAFETY: The layout has a non-zero size.
        let ptr = unsafe { allocator.alloc_zeroed(layout) };
        assert!(!ptr.is_null());

        assert!(allocator.stats().is_none());

        // SAFETY: Allocated above with the same allocator and layout.
        unsafe { allocator.dealloc(ptr, layout) };
    }
}
