#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Intrusive doubly linked list and a FIFO queue built on top of it.
//!
//! The list never allocates. Each node embeds a [`Links`] field and implements [`Linked`] to
//! tell the list where that field lives. Linking, unlinking and popping are all O(1), which
//! makes the list suitable as the chain of a hash bucket or as the free list of a block pool,
//! including in code that runs inside a global allocator and therefore must not allocate.
//!
//! The list does not own its nodes. Whoever pushes a node promises that it stays alive and
//! pinned in place for as long as it is linked; this is why pushing and removing are `unsafe`.
//!
//! [`Queue`] wraps a list in a mutex and offers non-blocking FIFO semantics: popping from an
//! empty queue returns `None` immediately instead of waiting for data.
//!
//! # Example
//!
//! ```
//! use std::ptr::NonNull;
//!
//! use intrusive_list::{Linked, Links, List};
//!
//! struct Node {
//!     links: Links<Node>,
//!     value: u32,
//! }
//!
//! // SAFETY: `links()` returns the address of the embedded field without creating references.
//! unsafe impl Linked for Node {
//!     unsafe fn links(node: NonNull<Self>) -> NonNull<Links<Self>> {
//!         // SAFETY: The caller guarantees that `node` points to a live `Node`.
//!         unsafe { NonNull::new_unchecked(&raw mut (*node.as_ptr()).links) }
//!     }
//! }
//!
//! let mut a = Box::new(Node { links: Links::new(), value: 1 });
//! let mut b = Box::new(Node { links: Links::new(), value: 2 });
//!
//! let mut list = List::new();
//!
//! // SAFETY: Both boxes outlive their membership in the list.
//! unsafe {
//!     list.push_back(NonNull::from(&mut *a));
//!     list.push_front(NonNull::from(&mut *b));
//! }
//!
//! let first = list.pop_front().unwrap();
//!
//! // SAFETY: The node is still alive, we own the box.
//! assert_eq!(unsafe { first.as_ref() }.value, 2);
//! assert_eq!(list.len(), 1);
//! ```

mod links;
mod list;
mod queue;

pub use links::*;
pub use list::*;
pub use queue::*;
