#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Fixed-capacity pools of equally sized memory blocks.
//!
//! A [`BlockPool`] carves one contiguous allocation into `capacity` blocks suitable for a given
//! object layout and hands them out one at a time. It never grows and never allocates after
//! creation, which makes it usable from inside a global allocator.
//!
//! A [`PoolBank`] strings several pools of the same geometry together. A growing bank adds a
//! pool whenever all of its pools are exhausted; a fixed bank refuses to hand out more blocks
//! than its initial pools hold.
//!
//! Pools take their memory from the global allocator unless another allocator is chosen with
//! [`set_backing_allocator()`].
//!
//! # Example
//!
//! ```
//! use std::alloc::Layout;
//! use std::num::NonZero;
//!
//! use block_pool::PoolBank;
//!
//! let bank = PoolBank::builder()
//!     .growing(true)
//!     .pool_capacity(NonZero::new(16).unwrap())
//!     .object_layout(Layout::new::<[u64; 4]>())
//!     .build()?;
//!
//! let block = bank.acquire().unwrap();
//!
//! // SAFETY: The block fits a `[u64; 4]` and is ours until released.
//! unsafe { block.cast::<[u64; 4]>().write([1, 2, 3, 4]) };
//!
//! bank.release(block)?;
//! assert!(bank.destroy().is_clean());
//! # Ok::<(), block_pool::Error>(())
//! ```

mod backing;
mod bank;
mod builder;
mod error;
mod pool;

pub use backing::set_backing_allocator;
pub use bank::*;
pub use builder::*;
pub use error::*;
pub use pool::*;
