use std::alloc::Layout;
use std::num::NonZero;

use crate::{PoolBank, Result};

/// Number of blocks per pool when none is configured.
pub const DEFAULT_POOL_CAPACITY: NonZero<usize> = NonZero::new(64).unwrap();

/// Builder for creating an instance of [`PoolBank`].
///
/// The object layout is mandatory, whereas other settings are optional. By default the bank
/// starts with one pool of 64 blocks and does not grow.
///
/// # Examples
///
/// ```
/// use std::alloc::Layout;
///
/// use block_pool::PoolBank;
///
/// let bank = PoolBank::builder()
///     .pools(4)
///     .object_layout(Layout::new::<[u8; 48]>())
///     .build()?;
///
/// assert_eq!(bank.pool_count(), 4);
/// assert_eq!(bank.max_pools(), Some(4));
/// # Ok::<(), block_pool::Error>(())
/// ```
#[derive(Debug)]
#[must_use]
pub struct PoolBankBuilder {
    pools: usize,
    growing: bool,
    pool_capacity: NonZero<usize>,
    object_layout: Option<Layout>,
}

impl PoolBankBuilder {
    pub(crate) fn new() -> Self {
        Self {
            pools: 1,
            growing: false,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            object_layout: None,
        }
    }

    /// How many pools to create up front. A bank that does not grow never holds more.
    pub fn pools(mut self, pools: usize) -> Self {
        self.pools = pools;
        self
    }

    /// Whether the bank adds pools when all existing ones are exhausted.
    pub fn growing(mut self, growing: bool) -> Self {
        self.growing = growing;
        self
    }

    /// Number of blocks in each pool.
    pub fn pool_capacity(mut self, pool_capacity: NonZero<usize>) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    /// The layout of the objects stored in the blocks.
    ///
    /// # Panics
    ///
    /// Panics if the layout has a size of zero.
    pub fn object_layout(mut self, object_layout: Layout) -> Self {
        assert!(
            object_layout.size() > 0,
            "PoolBank must have non-zero object size"
        );

        self.object_layout = Some(object_layout);
        self
    }

    /// Creates the bank and its initial pools.
    ///
    /// If creating any pool fails, the pools created so far are released again.
    ///
    /// # Errors
    ///
    /// Returns the error of the first pool that could not be created.
    ///
    /// # Panics
    ///
    /// Panics if no object layout has been set.
    pub fn build(self) -> Result<PoolBank> {
        let object_layout = self
            .object_layout
            .expect("object layout must be set using .object_layout() before calling .build()");

        PoolBank::new_inner(self.pools, self.growing, self.pool_capacity, object_layout)
    }
}
