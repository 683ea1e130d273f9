use std::num::NonZero;

use block_pool::PoolBank;
use striped_table::{Entry, StripedTable};

use crate::{AllocationRecord, MAX_BACKTRACE_DEPTH, Recorder, Result};

/// Number of live allocations the record table is sized for when none is configured.
pub const DEFAULT_TABLE_CAPACITY: usize = 100;

/// Number of records per pool when none is configured.
pub const DEFAULT_RECORDS_PER_POOL: NonZero<usize> = NonZero::new(1024).unwrap();

/// Builder for creating an instance of [`Recorder`].
///
/// All settings are optional. By default the record table is sized for 100 live allocations
/// (and grows as needed), records are kept in one pool of 1024 records that grows by another
/// pool whenever it runs out, and up to [`MAX_BACKTRACE_DEPTH`] stack frames are kept per
/// allocation.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use leak_tracker::Recorder;
///
/// let recorder = Recorder::builder()
///     .table_capacity(10_000)
///     .records_per_pool(NonZero::new(4096).unwrap())
///     .backtrace_depth(0)
///     .build()?;
///
/// assert!(recorder.is_enabled());
/// # Ok::<(), leak_tracker::Error>(())
/// ```
#[derive(Debug)]
#[must_use]
pub struct RecorderBuilder {
    table_capacity: usize,
    records_per_pool: NonZero<usize>,
    initial_pools: usize,
    growing: bool,
    backtrace_depth: usize,
    skip_frames: usize,
}

impl RecorderBuilder {
    pub(crate) fn new() -> Self {
        Self {
            table_capacity: DEFAULT_TABLE_CAPACITY,
            records_per_pool: DEFAULT_RECORDS_PER_POOL,
            initial_pools: 1,
            growing: true,
            backtrace_depth: MAX_BACKTRACE_DEPTH,
            skip_frames: 0,
        }
    }

    /// How many live allocations the record table holds before it first grows.
    pub fn table_capacity(mut self, table_capacity: usize) -> Self {
        self.table_capacity = table_capacity;
        self
    }

    /// How many records each pool holds.
    pub fn records_per_pool(mut self, records_per_pool: NonZero<usize>) -> Self {
        self.records_per_pool = records_per_pool;
        self
    }

    /// How many record pools to create up front.
    pub fn initial_pools(mut self, initial_pools: usize) -> Self {
        self.initial_pools = initial_pools;
        self
    }

    /// Whether to add record pools when the existing ones are full.
    ///
    /// Records that do not fit in any pool are allocated individually, so a recorder never
    /// drops a record for lack of pool space.
    pub fn growing(mut self, growing: bool) -> Self {
        self.growing = growing;
        self
    }

    /// How many stack frames to keep per allocation. Zero disables stack capture.
    ///
    /// # Panics
    ///
    /// Panics if `backtrace_depth` exceeds [`MAX_BACKTRACE_DEPTH`].
    pub fn backtrace_depth(mut self, backtrace_depth: usize) -> Self {
        assert!(
            backtrace_depth <= MAX_BACKTRACE_DEPTH,
            "backtrace depth must be at most {MAX_BACKTRACE_DEPTH}, got {backtrace_depth}"
        );

        self.backtrace_depth = backtrace_depth;
        self
    }

    /// How many of the innermost stack frames to leave out of each captured stack, to hide the
    /// frames of whatever code calls into the recorder.
    pub fn skip_frames(mut self, skip_frames: usize) -> Self {
        self.skip_frames = skip_frames;
        self
    }

    /// Creates the recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the record table or the initial record pools cannot be allocated.
    pub fn build(self) -> Result<Recorder> {
        let records = StripedTable::with_capacity(self.table_capacity)?;

        let bank = PoolBank::builder()
            .pools(self.initial_pools)
            .growing(self.growing)
            .pool_capacity(self.records_per_pool)
            .object_layout(Entry::<AllocationRecord>::layout())
            .build()?;

        Ok(Recorder::new_inner(
            records,
            bank,
            self.backtrace_depth,
            self.skip_frames,
        ))
    }
}
