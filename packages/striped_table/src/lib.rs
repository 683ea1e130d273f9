#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A chained hash table built for bookkeeping inside allocators and other places that must not
//! allocate on the hot path.
//!
//! [`StripedTable`] chains entries through intrusive links, so inserting and removing never
//! allocate: the caller supplies the entry (on the heap via [`OwnedEntry::new()`] or in its own
//! memory via [`OwnedEntry::write_into()`]) and gets it back on removal.
//!
//! Concurrency is handled with two tiers of locks. Each bucket has its own mutex, so operations
//! on different buckets proceed in parallel, while a table-wide reader-writer lock lets the
//! table grow online: the bucket array is rebuilt with the next prime bucket count once the
//! configured load reaches the resize threshold.
//!
//! Keys are byte strings interpreted by a [`KeyStrategy`]. [`PointerKeys`] treats them as
//! addresses and is the default; [`BytesKeys`] accepts arbitrary bytes.
//!
//! # Example
//!
//! ```
//! use striped_table::{OwnedEntry, StripedTable, Visit};
//!
//! let table = StripedTable::<usize>::with_capacity(40)?;
//! assert_eq!(table.buckets(), 97);
//!
//! for i in 0..41_usize {
//!     table.insert(OwnedEntry::new(i), &i.to_ne_bytes());
//! }
//!
//! // The 41st insert found the table at its threshold and grew it first.
//! assert_eq!(table.buckets(), 193);
//!
//! table.retain(
//!     |entry| if *entry.value() < 20 { Visit::Remove } else { Visit::Keep },
//!     drop,
//! );
//! assert_eq!(table.len(), 21);
//! # Ok::<(), striped_table::Error>(())
//! ```

mod builder;
mod entry;
mod error;
mod iter;
mod primes;
mod shard;
mod strategy;
mod table;

pub use builder::*;
pub use entry::*;
pub use error::*;
pub use iter::*;
pub use strategy::*;
pub use table::*;
