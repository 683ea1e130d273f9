use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when working with block pools and pool banks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Memory for a pool (its blocks or its bookkeeping) could not be allocated.
    #[error("failed to allocate {size} bytes aligned to {align}")]
    AllocationFailed {
        /// Size of the allocation that failed.
        size: usize,

        /// Alignment of the allocation that failed.
        align: usize,
    },

    /// The requested pool would be larger than the address space allows.
    #[error("a pool of {capacity} blocks of {block_size} bytes is too large to allocate")]
    CapacityOverflow {
        /// The requested number of blocks.
        capacity: usize,

        /// The size of one block, including padding for alignment.
        block_size: usize,
    },

    /// A pointer was returned to a pool or bank that never handed it out.
    ///
    /// Either the address lies outside every pool, or it lies inside a pool but not at the start
    /// of a block.
    #[error("address {address:#x} does not belong to any block of this pool")]
    ForeignPointer {
        /// The rejected address.
        address: usize,
    },

    /// A block was returned to a pool that has no blocks handed out.
    #[error("address {address:#x} was returned to a pool with no blocks handed out")]
    NotAcquired {
        /// The rejected address.
        address: usize,
    },

    /// A bank that may not grow already holds its maximum number of pools.
    #[error("the pool bank already holds its maximum of {max_pools} pools")]
    BankFull {
        /// The maximum number of pools of the bank.
        max_pools: usize,
    },

    /// A pool was destroyed while some of its blocks were still handed out.
    ///
    /// The memory of the pool has been released regardless.
    #[error("pool destroyed with {count} blocks still handed out")]
    BlocksOutstanding {
        /// How many blocks were still handed out.
        count: usize,
    },

    /// The process-wide backing allocator was already chosen.
    #[error("the backing allocator for block pools has already been set")]
    BackingAllocatorAlreadySet,
}

impl Error {
    pub(crate) fn allocation_failed(layout: Layout) -> Self {
        Self::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        }
    }
}

/// A specialized `Result` type for block pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
