use std::alloc::GlobalAlloc;
use std::fmt;

use crate::Allocator;

/// Prints the leak report of an [`Allocator`] when dropped.
///
/// Create the guard first thing in `main()`. Locals are dropped in reverse order of creation,
/// so by the time the guard goes, everything else `main()` owned has been freed and whatever
/// is still on record is a genuine leak.
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
///     let _report = ALLOCATOR.report_on_drop();
///
///     let names = vec!["freed".to_string()];
///     let _leaked = Box::leak(Box::new(42_u64));
///
///     drop(names);
/// } // The leaked `u64` is printed here.
/// ```
#[must_use = "The report is printed when the guard is dropped"]
pub struct LeakReportGuard<'a, A: GlobalAlloc> {
    allocator: &'a Allocator<A>,
}

impl<'a, A: GlobalAlloc> LeakReportGuard<'a, A> {
    pub(crate) fn new(allocator: &'a Allocator<A>) -> Self {
        Self { allocator }
    }
}

impl<A: GlobalAlloc> Drop for LeakReportGuard<'_, A> {
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stdout output reliably - manually tested.
    fn drop(&mut self) {
        self.allocator.print_leaks();
    }
}

impl<A: GlobalAlloc> fmt::Debug for LeakReportGuard<'_, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakReportGuard")
            .field("allocator", self.allocator)
            .finish()
    }
}
