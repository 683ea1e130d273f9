use std::alloc::Layout;
use std::fmt;
use std::iter;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{BlockPool, Error, PoolBankBuilder, Result};

/// An ordered set of [`BlockPool`]s with identical geometry, used as one larger source of blocks.
///
/// Acquiring scans the pools in order and takes the first free block. A growing bank adds a new
/// pool when all existing ones are exhausted; a fixed bank holds at most as many pools as it was
/// created with (more can be added with [`add_pool()`][Self::add_pool] only up to that limit).
///
/// Reading the list of pools never takes a lock. Adding a pool is serialized by an internal
/// mutex and publishes a new list.
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
/// use std::num::NonZero;
///
/// use block_pool::PoolBank;
///
/// let bank = PoolBank::builder()
///     .pools(1)
///     .growing(true)
///     .pool_capacity(NonZero::new(2).unwrap())
///     .object_layout(Layout::new::<u64>())
///     .build()?;
///
/// let blocks: Vec<_> = (0..5).map(|_| bank.acquire().unwrap()).collect();
/// assert_eq!(bank.pool_count(), 3);
///
/// for block in blocks {
///     bank.release(block)?;
/// }
///
/// assert!(bank.destroy().is_clean());
/// # Ok::<(), block_pool::Error>(())
/// ```
pub struct PoolBank {
    pools: ArcSwap<Vec<Arc<BlockPool>>>,

    // Held while adding a pool, so concurrent growth does not lose pools.
    grow_lock: Mutex<()>,

    /// `None` if the bank may grow without limit.
    max_pools: Option<usize>,

    pool_capacity: NonZero<usize>,
    object_layout: Layout,
}

impl PoolBank {
    /// Starts building a bank.
    pub fn builder() -> PoolBankBuilder {
        PoolBankBuilder::new()
    }

    pub(crate) fn new_inner(
        pools: usize,
        growing: bool,
        pool_capacity: NonZero<usize>,
        object_layout: Layout,
    ) -> Result<Self> {
        // Pools created before a failure are dropped (and thereby freed) by `collect()`.
        let initial = iter::repeat_with(|| BlockPool::new(pool_capacity, object_layout))
            .take(pools)
            .map(|pool| pool.map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            pools,
            growing,
            pool_capacity = pool_capacity.get(),
            object_size = object_layout.size(),
            "pool bank created"
        );

        Ok(Self {
            pools: ArcSwap::from_pointee(initial),
            grow_lock: Mutex::new(()),
            max_pools: (!growing).then_some(pools),
            pool_capacity,
            object_layout,
        })
    }

    /// Hands out a free block from the first pool that has one.
    ///
    /// If every pool is exhausted, a growing bank adds a pool and hands out a block from it.
    /// Returns `None` if no block is available and the bank cannot grow, or if growing fails.
    #[must_use]
    pub fn acquire(&self) -> Option<NonNull<u8>> {
        if let Some(block) = self.acquire_existing() {
            return Some(block);
        }

        if self.max_pools.is_some() {
            return None;
        }

        let _guard = self.grow_lock.lock();

        // Another thread may have grown the bank while we waited.
        if let Some(block) = self.acquire_existing() {
            return Some(block);
        }

        match self.push_pool() {
            Ok(block) => block,
            Err(error) => {
                warn!(%error, "pool bank could not grow");
                None
            }
        }
    }

    /// Returns a block to the pool it came from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignPointer`] if no pool of the bank contains `block`, and otherwise
    /// whatever [`BlockPool::release()`] returns.
    pub fn release(&self, block: NonNull<u8>) -> Result<()> {
        let pools = self.pools.load();

        let Some(pool) = pools.iter().find(|pool| pool.contains(block)) else {
            warn!(
                address = block.addr().get(),
                "block returned to a pool bank that does not contain it"
            );

            return Err(Error::ForeignPointer {
                address: block.addr().get(),
            });
        };

        pool.release(block)
    }

    /// Adds one pool to the bank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BankFull`] if the bank does not grow and already holds its maximum
    /// number of pools, or the error of creating the pool. The bank is unchanged on error.
    pub fn add_pool(&self) -> Result<()> {
        let _guard = self.grow_lock.lock();

        if let Some(max_pools) = self.max_pools {
            if self.pools.load().len() >= max_pools {
                return Err(Error::BankFull { max_pools });
            }
        }

        self.push_pool().map(|_block| ())
    }

    /// Destroys every pool of the bank and reports how many of them still had blocks handed
    /// out.
    ///
    /// The memory of every pool is released regardless.
    pub fn destroy(self) -> DestroyReport {
        let pools = Arc::unwrap_or_clone(self.pools.into_inner());
        let total = pools.len();

        let failed = pools
            .into_iter()
            .map(|pool| match Arc::try_unwrap(pool) {
                Ok(pool) => pool.destroy().is_err(),
                // Nothing else holds pools once the bank is gone, but a shared pool is freed by
                // its last owner all the same.
                Err(pool) => pool.in_use() > 0,
            })
            .filter(|&failed| failed)
            .count();

        let report = DestroyReport { pools: total, failed };

        if !report.is_clean() {
            warn!(
                pools = report.pools,
                failed = report.failed,
                "pool bank destroyed with blocks still handed out"
            );
        }

        report
    }

    /// Number of pools currently in the bank.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.load().len()
    }

    /// The most pools the bank will hold, or `None` if it grows without limit.
    #[must_use]
    pub fn max_pools(&self) -> Option<usize> {
        self.max_pools
    }

    /// Whether the bank adds pools on demand.
    #[must_use]
    pub fn is_growing(&self) -> bool {
        self.max_pools.is_none()
    }

    /// Number of blocks in each pool.
    #[must_use]
    pub fn pool_capacity(&self) -> NonZero<usize> {
        self.pool_capacity
    }

    /// The object layout every pool of the bank was created for.
    #[must_use]
    pub fn object_layout(&self) -> Layout {
        self.object_layout
    }

    /// Number of blocks that can be acquired without growing.
    #[must_use]
    pub fn available(&self) -> usize {
        self.pools.load().iter().map(|pool| pool.available()).sum()
    }

    /// Number of blocks handed out across all pools.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.pools.load().iter().map(|pool| pool.in_use()).sum()
    }

    /// Whether any pool of the bank contains `ptr`.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.pools.load().iter().any(|pool| pool.contains(ptr))
    }

    fn acquire_existing(&self) -> Option<NonNull<u8>> {
        self.pools.load().iter().find_map(|pool| pool.acquire())
    }

    /// Creates a pool, takes one block from it and publishes it. Must be called with the grow
    /// lock held.
    fn push_pool(&self) -> Result<Option<NonNull<u8>>> {
        let pool = Arc::new(BlockPool::new(self.pool_capacity, self.object_layout)?);

        // Taken before publishing, so the thread that paid for growing gets a block.
        let block = pool.acquire();

        let current = self.pools.load();
        let next: Vec<_> = current
            .iter()
            .cloned()
            .chain(iter::once(pool))
            .collect();
        let count = next.len();

        self.pools.store(Arc::new(next));

        debug!(pools = count, "pool added to pool bank");

        Ok(block)
    }
}

impl fmt::Debug for PoolBank {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBank")
            .field("pools", &self.pool_count())
            .field("max_pools", &self.max_pools)
            .field("pool_capacity", &self.pool_capacity)
            .field("object_layout", &self.object_layout)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`PoolBank::destroy()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct DestroyReport {
    /// Number of pools that were destroyed.
    pub pools: usize,

    /// Number of pools that still had blocks handed out when destroyed.
    pub failed: usize,
}

impl DestroyReport {
    /// Whether every pool was destroyed with all of its blocks returned.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::ptr;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolBank: Send, Sync, fmt::Debug);
    assert_impl_all!(DestroyReport: Send, Sync, Copy, fmt::Debug);

    fn bank(pools: usize, growing: bool, pool_capacity: usize) -> PoolBank {
        PoolBank::builder()
            .pools(pools)
            .growing(growing)
            .pool_capacity(NonZero::new(pool_capacity).unwrap())
            .object_layout(Layout::new::<u64>())
            .build()
            .unwrap()
    }

    #[test]
    fn fixed_bank_exhausts() {
        let bank = bank(2, false, 3);

        let blocks: Vec<_> = (0..6).map(|_| bank.acquire().unwrap()).collect();

        assert!(bank.acquire().is_none());
        assert_eq!(bank.pool_count(), 2);
        assert_eq!(bank.in_use(), 6);
        assert_eq!(bank.available(), 0);

        let unique: HashSet<_> = blocks.iter().copied().collect();
        assert_eq!(unique.len(), 6);

        for block in blocks {
            bank.release(block).unwrap();
        }

        assert!(bank.destroy().is_clean());
    }

    #[test]
    fn growing_bank_adds_pools_on_demand() {
        let bank = bank(1, true, 2);

        let blocks: Vec<_> = (0..5).map(|_| bank.acquire().unwrap()).collect();

        assert_eq!(bank.pool_count(), 3);
        assert_eq!(bank.in_use(), 5);
        assert_eq!(bank.available(), 1);

        for block in blocks {
            assert!(bank.contains(block));
            bank.release(block).unwrap();
        }

        assert_eq!(bank.available(), 6);

        let report = bank.destroy();
        assert_eq!(report.pools, 3);
        assert!(report.is_clean());
    }

    #[test]
    fn growing_bank_without_initial_pools() {
        let bank = bank(0, true, 4);
        assert_eq!(bank.pool_count(), 0);

        let block = bank.acquire().unwrap();
        assert_eq!(bank.pool_count(), 1);

        bank.release(block).unwrap();
        assert!(bank.destroy().is_clean());
    }

    #[test]
    fn fixed_bank_without_pools_has_nothing_to_give() {
        let bank = bank(0, false, 4);

        assert!(bank.acquire().is_none());
        assert!(matches!(
            bank.add_pool(),
            Err(Error::BankFull { max_pools: 0 })
        ));
    }

    #[test]
    fn add_pool_respects_maximum() {
        let bank = bank(2, false, 1);

        assert!(matches!(
            bank.add_pool(),
            Err(Error::BankFull { max_pools: 2 })
        ));
        assert_eq!(bank.pool_count(), 2);
    }

    #[test]
    fn add_pool_to_growing_bank() {
        let bank = bank(1, true, 4);

        bank.add_pool().unwrap();
        bank.add_pool().unwrap();

        assert_eq!(bank.pool_count(), 3);
        assert_eq!(bank.available(), 12);
        assert_eq!(bank.in_use(), 0);
    }

    #[test]
    fn release_of_foreign_pointer_fails() {
        let bank = bank(1, false, 4);
        let mut outside = 0_u64;

        let result = bank.release(NonNull::from(&mut outside).cast());

        assert!(matches!(result, Err(Error::ForeignPointer { .. })));
        assert_eq!(bank.available(), 4);
    }

    #[test]
    fn release_to_other_bank_fails() {
        let first = bank(1, false, 4);
        let second = bank(1, false, 4);

        let block = first.acquire().unwrap();

        assert!(!second.contains(block));
        assert!(matches!(
            second.release(block),
            Err(Error::ForeignPointer { .. })
        ));

        first.release(block).unwrap();
    }

    #[test]
    fn destroy_reports_pools_with_outstanding_blocks() {
        let bank = bank(3, false, 2);

        // Fills the first pool and takes one block from the second.
        for _ in 0..3 {
            _ = bank.acquire().unwrap();
        }

        let report = bank.destroy();

        assert_eq!(report.pools, 3);
        assert_eq!(report.failed, 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn concurrent_acquire_grows_without_losing_blocks() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 50;

        let bank = Arc::new(bank(1, true, 16));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let bank = Arc::clone(&bank);

                thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|_| bank.acquire().unwrap().as_ptr().expose_provenance())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let addresses: Vec<usize> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        let unique: HashSet<_> = addresses.iter().copied().collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert_eq!(bank.in_use(), THREADS * PER_THREAD);
        assert!(bank.pool_count() >= (THREADS * PER_THREAD).div_ceil(16));

        for address in addresses {
            let block = NonNull::new(ptr::with_exposed_provenance_mut::<u8>(address)).unwrap();
            bank.release(block).unwrap();
        }

        let bank = Arc::into_inner(bank).unwrap();
        assert!(bank.destroy().is_clean());
    }
}
