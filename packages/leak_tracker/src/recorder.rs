use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use block_pool::PoolBank;
use striped_table::{OwnedEntry, PointerKeys, StripedTable};
use tracing::{debug, trace, warn};

use crate::stats::Counters;
use crate::{AllocationRecord, Frames, LeakReport, MemStats, RecorderBuilder};

/// Keeps a record of every live allocation it is told about, and reports the ones that were
/// never freed.
///
/// Records live in a [`StripedTable`] keyed by address. The memory for each record comes from a
/// [`PoolBank`], so recording an allocation does not itself allocate unless the pools run out
/// (or the table grows).
///
/// The recorder does not intercept anything by itself. The [`Allocator`][crate::Allocator]
/// feeds it from the global allocator, and other code may call it directly.
///
/// # Thread safety
///
/// All operations take `&self` and may be called from any number of threads at once. Recording
/// and retiring lock only the table bucket of the address involved.
///
/// # Example
///
/// ```
/// use std::ptr::NonNull;
///
/// use leak_tracker::{Recorder, Retired};
///
/// let recorder = Recorder::builder().build()?;
///
/// let kept = Box::new([0_u8; 32]);
/// let freed = Box::new([0_u8; 64]);
///
/// recorder.record_allocation(NonNull::from(&*kept).cast(), 32);
/// recorder.record_allocation(NonNull::from(&*freed).cast(), 64);
///
/// assert_eq!(
///     recorder.retire_allocation(NonNull::from(&*freed).cast()),
///     Retired::Tracked { size: 64 }
/// );
///
/// let report = recorder.shutdown();
/// assert_eq!(report.leaks().len(), 1);
/// assert_eq!(report.leaks()[0].size(), 32);
/// # Ok::<(), leak_tracker::Error>(())
/// ```
pub struct Recorder {
    // Declared before the bank, whose blocks hold the entries, so it is dropped first.
    records: StripedTable<AllocationRecord>,
    bank: PoolBank,

    counters: Counters,
    enabled: AtomicBool,

    backtrace_depth: usize,
    skip_frames: usize,
}

/// What [`Recorder::retire_allocation()`] found out about a freed address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Retired {
    /// The address was recorded, and its record has been removed.
    Tracked {
        /// Size of the allocation as recorded.
        size: usize,
    },

    /// The address was never recorded, or was already retired.
    Untracked,
}

/// The record of an allocation that is being reallocated, held outside the recorder until the
/// outcome is known.
///
/// Returned by [`Recorder::begin_reallocation()`] and consumed by
/// [`Recorder::finish_reallocation()`]. Dropping it instead forgets the old record, and its
/// block stays checked out of the record pools until the recorder shuts down.
#[must_use]
pub struct Reallocation {
    old: NonNull<u8>,
    entry: Option<OwnedEntry<AllocationRecord>>,
}

impl Reallocation {
    /// Size of the allocation being reallocated, or `None` if it had no record.
    #[must_use]
    pub fn old_size(&self) -> Option<usize> {
        self.entry.as_ref().map(|entry| entry.value().size)
    }
}

impl fmt::Debug for Reallocation {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reallocation")
            .field("old", &self.old)
            .field("old_size", &self.old_size())
            .finish()
    }
}

impl Recorder {
    /// Starts building a recorder.
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::new()
    }

    pub(crate) fn new_inner(
        records: StripedTable<AllocationRecord>,
        bank: PoolBank,
        backtrace_depth: usize,
        skip_frames: usize,
    ) -> Self {
        debug!(buckets = records.buckets(), backtrace_depth, "allocation recorder created");

        Self {
            records,
            bank,
            counters: Counters::default(),
            enabled: AtomicBool::new(true),
            backtrace_depth,
            skip_frames,
        }
    }

    /// Records a new allocation of `size` bytes at `ptr`, along with the current stack.
    ///
    /// Does nothing while the recorder is disabled.
    pub fn record_allocation(&self, ptr: NonNull<u8>, size: usize) {
        if !self.is_enabled() {
            return;
        }

        self.insert(ptr, size);
        self.counters.allocated(size);
    }

    /// Records that the allocation at `old` was resized to `new_size` bytes and now lives at
    /// `new` (which may equal `old`).
    ///
    /// A reallocation does not count as a new allocation. The bytes of the old allocation are
    /// replaced by the new size in the totals. If `old` was never recorded, the reallocation is
    /// recorded as a new allocation instead.
    ///
    /// While the recorder is disabled, only the record of `old` is removed.
    ///
    /// This is [`begin_reallocation()`][Self::begin_reallocation] and
    /// [`finish_reallocation()`][Self::finish_reallocation] in one step, for callers that
    /// learn about a reallocation only after it has happened.
    pub fn record_reallocation(&self, old: NonNull<u8>, new: NonNull<u8>, new_size: usize) {
        let reallocation = self.begin_reallocation(old);
        self.finish_reallocation(reallocation, Some(new), new_size);
    }

    /// Takes the record of `old` out of the recorder ahead of reallocating it.
    ///
    /// Call this before the memory is handed to the reallocating allocator. Once the old
    /// address may be reused, another allocation at that address then starts from a clean
    /// slate instead of colliding with the stale record.
    ///
    /// The returned value must be passed to [`finish_reallocation()`][Self::finish_reallocation]
    /// of the same recorder. Counters do not change until then.
    pub fn begin_reallocation(&self, old: NonNull<u8>) -> Reallocation {
        Reallocation {
            old,
            entry: self.records.remove(&key(old)),
        }
    }

    /// Completes a reallocation started with [`begin_reallocation()`][Self::begin_reallocation].
    ///
    /// `new` is where the allocation now lives, or `None` if reallocating failed. On failure the
    /// old allocation is untouched, so its record goes back unchanged. On success the effect is
    /// that of [`record_reallocation()`][Self::record_reallocation].
    pub fn finish_reallocation(
        &self,
        reallocation: Reallocation,
        new: Option<NonNull<u8>>,
        new_size: usize,
    ) {
        let Reallocation { old, entry } = reallocation;

        let Some(new) = new else {
            if let Some(entry) = entry {
                self.records.insert(entry, &key(old));
            }

            return;
        };

        let old_size = entry.map(|entry| {
            let size = entry.value().size;
            recycle(&self.bank, entry);
            size
        });

        if !self.is_enabled() {
            if let Some(old_size) = old_size {
                self.counters.freed(old_size);
            }

            return;
        }

        self.insert(new, new_size);

        match old_size {
            Some(old_size) => self.counters.reallocated(old_size, new_size),
            None => self.counters.allocated(new_size),
        }
    }

    /// Removes the record of the allocation at `ptr`, as the memory is being freed.
    ///
    /// Freeing an address that has no record is not an error: it is logged, and counted in
    /// [`MemStats::untracked_frees`] unless the recorder is disabled.
    pub fn retire_allocation(&self, ptr: NonNull<u8>) -> Retired {
        if let Some(size) = self.take(ptr) {
            self.counters.freed(size);
            return Retired::Tracked { size };
        }

        if self.is_enabled() {
            self.counters.untracked_free();

            warn!(
                address = ptr.addr().get(),
                "freed memory that has no allocation record"
            );
        }

        Retired::Untracked
    }

    /// The record of the live allocation at `ptr`, if there is one.
    #[must_use]
    pub fn lookup(&self, ptr: NonNull<u8>) -> Option<AllocationRecord> {
        self.records.lookup(&key(ptr), |entry| *entry.value())
    }

    /// Whether there is a record of a live allocation at `ptr`.
    #[must_use]
    pub fn is_tracked(&self, ptr: NonNull<u8>) -> bool {
        self.records.contains_key(&key(ptr))
    }

    /// Calls `f` with the record of every live allocation.
    ///
    /// Parts of the record table stay locked while `f` runs, so `f` must not call back into
    /// this recorder.
    pub fn for_each_record(&self, mut f: impl FnMut(&AllocationRecord)) {
        self.records.for_each(|entry| f(entry.value()));
    }

    /// Number of live allocations on record.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.records.len()
    }

    /// Current allocation counters.
    #[must_use]
    pub fn stats(&self) -> MemStats {
        self.counters.snapshot()
    }

    /// Starts or stops recording new allocations.
    ///
    /// Frees are always matched against existing records, so allocations recorded before the
    /// recorder was disabled can still be retired.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether new allocations are being recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Lists every live allocation along with the current counters.
    ///
    /// Stack frames are resolved to symbol names here, which may take a while for large
    /// numbers of allocations.
    #[must_use]
    pub fn leak_report(&self) -> LeakReport {
        let stats = self.stats();

        let mut records = Vec::with_capacity(self.records.len());
        self.for_each_record(|record| records.push(*record));

        LeakReport::new(stats, &records)
    }

    /// Reports every allocation that is still live and releases all memory of the recorder.
    pub fn shutdown(self) -> LeakReport {
        let report = self.leak_report();

        let Self { records, bank, .. } = self;

        records.drain(|entry| recycle(&bank, entry));
        drop(records);

        let pools = bank.destroy();

        debug!(
            leaks = report.leaks().len(),
            pools = pools.pools,
            "allocation recorder shut down"
        );

        report
    }

    fn insert(&self, ptr: NonNull<u8>, size: usize) {
        let frames = Frames::capture(self.skip_frames, self.backtrace_depth);
        let record = AllocationRecord::new(ptr.addr().get(), size, frames);

        let entry = match self.bank.acquire() {
            // SAFETY: Bank blocks are laid out for `Entry<AllocationRecord>`. They stay allocated
            // until the bank is destroyed, which only happens after the table is emptied.
            Some(block) => unsafe { OwnedEntry::write_into(block, record) },
            None => {
                trace!("allocation record pools exhausted, recording on the heap");
                OwnedEntry::new(record)
            }
        };

        self.records.insert(entry, &key(ptr));
    }

    /// Removes the record of `ptr`, returning the recorded size.
    fn take(&self, ptr: NonNull<u8>) -> Option<usize> {
        let entry = self.records.remove(&key(ptr))?;
        let size = entry.value().size;

        recycle(&self.bank, entry);

        Some(size)
    }
}

impl fmt::Debug for Recorder {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("records", &self.records)
            .field("bank", &self.bank)
            .field("stats", &self.stats())
            .field("enabled", &self.is_enabled())
            .field("backtrace_depth", &self.backtrace_depth)
            .field("skip_frames", &self.skip_frames)
            .finish()
    }
}

fn key(ptr: NonNull<u8>) -> [u8; size_of::<usize>()] {
    PointerKeys::key_of(ptr.as_ptr())
}

/// Destroys a record, returning its block to the bank if it lives in one.
fn recycle(bank: &PoolBank, entry: OwnedEntry<AllocationRecord>) {
    let block = entry.external_memory();
    drop(entry);

    let Some(block) = block else {
        return;
    };

    if let Err(error) = bank.release(block) {
        warn!(%error, "allocation record block could not be returned to its pool");
    }
}
