#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Finds heap allocations that are never freed.
//!
//! The core is the [`Recorder`], which keeps a record of every live allocation it is told
//! about: address, size and the stack at the time. Records are stored in a
//! [`striped_table::StripedTable`] keyed by address, in memory recycled through a
//! [`block_pool::PoolBank`], so keeping records does not itself lean on the allocator being
//! observed.
//!
//! The [`Allocator`] wraps any global allocator and feeds every allocation, reallocation and
//! free to a recorder. Whatever is still on record at the end is a leak, listed by a
//! [`LeakReport`].
//!
//! This package is meant as a development tool, not for use in production.
//!
//! # Tracking the whole process
//!
//! ```
//! use leak_tracker::Allocator;
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
//!
//! fn main() {
//!     // Prints the counters and every leak with its stack once `main()` returns.
//!     let _report = ALLOCATOR.report_on_drop();
//!
//!     let _forgotten = Box::leak(vec![0_u8; 4096].into_boxed_slice());
//!
//!     let report = ALLOCATOR.leak_report().unwrap();
//!     assert!(report.leaks().iter().any(|leak| leak.size() == 4096));
//! }
//! ```
//!
//! [`Allocator::print_leaks()`] prints the same report on demand.
//!
//! # Recording by hand
//!
//! ```
//! use std::ptr::NonNull;
//!
//! use leak_tracker::Recorder;
//!
//! let recorder = Recorder::builder().backtrace_depth(4).build()?;
//!
//! let buffer = [0_u8; 16];
//! recorder.record_allocation(NonNull::from(&buffer).cast(), 16);
//!
//! let report = recorder.shutdown();
//! assert_eq!(report.stats().active_allocations, 1);
//! println!("{report}");
//! # Ok::<(), leak_tracker::Error>(())
//! ```

mod allocator;
mod builder;
mod error;
mod leaks;
mod record;
mod recorder;
mod report_guard;
mod stats;

pub use allocator::*;
pub use builder::*;
pub use error::*;
pub use leaks::*;
pub use record::{AllocationRecord, Frames, MAX_BACKTRACE_DEPTH};
pub use recorder::*;
pub use report_guard::*;
pub use stats::MemStats;
