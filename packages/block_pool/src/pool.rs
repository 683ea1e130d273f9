use std::alloc::Layout;
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use intrusive_list::{Linked, Links, Queue};
use tracing::trace;

use crate::backing::Backing;
use crate::{Error, Result};

/// Bookkeeping for one block. Slots are interchangeable: whichever slot is moved between the
/// queues carries the address of the block it stands for.
struct PoolSlot {
    links: Links<PoolSlot>,
    block: AtomicPtr<u8>,
}

// SAFETY: `links()` returns the address of the embedded `links` field without creating any
// references, and always the same field for the same slot.
unsafe impl Linked for PoolSlot {
    unsafe fn links(node: NonNull<Self>) -> NonNull<Links<Self>> {
        // SAFETY: The caller guarantees that `node` points to a live slot.
        unsafe { NonNull::new_unchecked(&raw mut (*node.as_ptr()).links) }
    }
}

/// A fixed number of equally sized memory blocks carved out of one contiguous allocation.
///
/// Blocks are handed out with [`acquire()`][Self::acquire] and given back with
/// [`release()`][Self::release]. The pool never grows and never blocks: when every block is
/// handed out, `acquire()` returns `None`.
///
/// The pool hands out uninitialized memory and never reads or drops what the caller stores in a
/// block.
///
/// # Memory
///
/// The blocks and the per-block bookkeeping are allocated when the pool is created and freed when
/// it is dropped, from the allocator chosen with
/// [`set_backing_allocator()`][crate::set_backing_allocator] (or the global allocator if none
/// was chosen). Acquiring and releasing never allocate.
///
/// # Thread safety
///
/// The pool is thread-safe. Each operation holds one short-lived internal lock.
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
/// use std::num::NonZero;
///
/// use block_pool::BlockPool;
///
/// let pool = BlockPool::new(NonZero::new(2).unwrap(), Layout::new::<u64>())?;
///
/// let a = pool.acquire().unwrap();
/// let b = pool.acquire().unwrap();
/// assert!(pool.acquire().is_none());
///
/// pool.release(a)?;
/// pool.release(b)?;
/// pool.destroy()?;
/// # Ok::<(), block_pool::Error>(())
/// ```
pub struct BlockPool {
    arena: NonNull<u8>,
    arena_layout: Layout,

    slots: NonNull<PoolSlot>,
    slots_layout: Layout,

    capacity: NonZero<usize>,
    object_layout: Layout,

    /// Distance between the starts of neighboring blocks.
    stride: usize,

    backing: Backing,

    available: Queue<PoolSlot>,
    in_use: Queue<PoolSlot>,
}

impl BlockPool {
    /// Creates a pool of `capacity` blocks, each suitable for an object of `object_layout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the pool would not fit in the address space and
    /// [`Error::AllocationFailed`] if its memory cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if `object_layout` has a size of zero.
    pub fn new(capacity: NonZero<usize>, object_layout: Layout) -> Result<Self> {
        assert!(
            object_layout.size() > 0,
            "BlockPool must have non-zero object size"
        );

        let stride = object_layout.pad_to_align().size();

        let overflow = || Error::CapacityOverflow {
            capacity: capacity.get(),
            block_size: stride,
        };

        let arena_size = stride.checked_mul(capacity.get()).ok_or_else(overflow)?;
        let arena_layout = Layout::from_size_align(arena_size, object_layout.align())
            .map_err(|_layout| overflow())?;
        let slots_layout =
            Layout::array::<PoolSlot>(capacity.get()).map_err(|_layout| overflow())?;

        let backing = Backing::current();

        let arena = backing.allocate(arena_layout)?;
        let slots = match backing.allocate(slots_layout) {
            Ok(slots) => slots.cast::<PoolSlot>(),
            Err(error) => {
                // SAFETY: Allocated just above with the same backing and layout.
                unsafe { backing.deallocate(arena, arena_layout) };
                return Err(error);
            }
        };

        let available = Queue::new();

        for index in 0..capacity.get() {
            // Cannot overflow, the whole arena fits in the address space.
            let offset = index.wrapping_mul(stride);

            // SAFETY: `index < capacity` and the slot array holds `capacity` slots.
            let slot = unsafe { slots.add(index) };

            // SAFETY: `offset` is the start of a block inside the arena.
            let block = unsafe { arena.as_ptr().add(offset) };

            // SAFETY: The slot memory is allocated, aligned for `PoolSlot` and not yet in use.
            unsafe {
                slot.write(PoolSlot {
                    links: Links::new(),
                    block: AtomicPtr::new(block),
                });
            }

            // SAFETY: The slot is initialized, unlinked and lives as long as the pool, which
            // outlives both queues.
            unsafe { available.push_back(slot) };
        }

        trace!(
            capacity = capacity.get(),
            block_size = stride,
            "block pool created"
        );

        Ok(Self {
            arena,
            arena_layout,
            slots,
            slots_layout,
            capacity,
            object_layout,
            stride,
            backing,
            available,
            in_use: Queue::new(),
        })
    }

    /// Hands out a free block, or `None` if every block is already handed out.
    ///
    /// The block is valid for reads and writes of the object layout of the pool until it is
    /// released or the pool is dropped.
    #[must_use]
    pub fn acquire(&self) -> Option<NonNull<u8>> {
        let slot = self.available.pop_front()?;

        // SAFETY: Slots live as long as the pool. We popped this one, so nobody else touches it
        // until we push it again.
        let block = unsafe { slot.as_ref() }.block.load(Ordering::Relaxed);

        // SAFETY: The slot was just unlinked from `available` and lives as long as the pool.
        unsafe { self.in_use.push_back(slot) };

        Some(NonNull::new(block).expect("slots always carry the address of a block"))
    }

    /// Returns a block to the pool.
    ///
    /// The pool checks that the address is the start of one of its blocks and that some block is
    /// handed out. It does not track which blocks are handed out, so returning the same block
    /// twice while another block is handed out goes unnoticed, and the block will later be
    /// handed out twice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignPointer`] if `block` is not the start of a block of this pool,
    /// and [`Error::NotAcquired`] if no block is handed out.
    pub fn release(&self, block: NonNull<u8>) -> Result<()> {
        if !self.is_block_start(block) {
            return Err(Error::ForeignPointer {
                address: block.addr().get(),
            });
        }

        let slot = self.in_use.pop_front().ok_or(Error::NotAcquired {
            address: block.addr().get(),
        })?;

        // SAFETY: Slots live as long as the pool. We popped this one, so nobody else touches it
        // until we push it again.
        unsafe { slot.as_ref() }
            .block
            .store(block.as_ptr(), Ordering::Relaxed);

        // SAFETY: The slot was just unlinked from `in_use` and lives as long as the pool.
        unsafe { self.available.push_back(slot) };

        Ok(())
    }

    /// Frees the memory of the pool, reporting whether any blocks were still handed out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlocksOutstanding`] if some blocks were never released. The memory is
    /// freed regardless, so those blocks must not be used anymore.
    pub fn destroy(self) -> Result<()> {
        let count = self.in_use();
        drop(self);

        if count > 0 {
            return Err(Error::BlocksOutstanding { count });
        }

        Ok(())
    }

    /// Number of blocks in the pool.
    #[must_use]
    pub fn capacity(&self) -> NonZero<usize> {
        self.capacity
    }

    /// Number of blocks that can currently be acquired.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Number of blocks currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }

    /// Whether `ptr` points anywhere into the memory of this pool.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// The object layout the pool was created for.
    #[must_use]
    pub fn object_layout(&self) -> Layout {
        self.object_layout
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr.addr().get().checked_sub(self.arena.addr().get())?;
        (offset < self.arena_layout.size()).then_some(offset)
    }

    fn is_block_start(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr)
            .and_then(|offset| offset.checked_rem(self.stride))
            .is_some_and(|remainder| remainder == 0)
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        // `PoolSlot` has no drop logic worth running, so the slots are simply freed. The queues
        // still point at them but are never read again.
        // SAFETY: Both allocations were made in `new()` with this backing and these layouts,
        // and nothing refers to them after the pool is gone.
        unsafe {
            self.backing
                .deallocate(self.slots.cast::<u8>(), self.slots_layout);
        }

        // SAFETY: As above.
        unsafe {
            self.backing.deallocate(self.arena, self.arena_layout);
        }
    }
}

impl fmt::Debug for BlockPool {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("arena", &self.arena)
            .field("capacity", &self.capacity)
            .field("object_layout", &self.object_layout)
            .field("stride", &self.stride)
            .field("backing", &self.backing)
            .field("available", &self.available())
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

// SAFETY: The arena and slot pointers are fixed after construction and only dereferenced under
// the queue locks, so the pool may move to another thread.
unsafe impl Send for BlockPool {}

// SAFETY: All shared-access mutation goes through the queues, whose mutexes serialize it; the
// per-slot block address is atomic.
unsafe impl Sync for BlockPool {}
