use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;

/// The link field that a node embeds to become a member of a [`List`][crate::List].
///
/// A freshly created `Links` is unlinked. Removing a node from a list resets its links back to
/// the unlinked state, so the same node can later be pushed into another list.
pub struct Links<T: ?Sized> {
    pointers: UnsafeCell<Pointers<T>>,

    // Nodes must not move while linked, as neighbors hold raw pointers to them.
    _pinned: PhantomPinned,
}

pub(crate) struct Pointers<T: ?Sized> {
    pub(crate) prev: Option<NonNull<T>>,
    pub(crate) next: Option<NonNull<T>>,
    pub(crate) linked: bool,
}

impl<T: ?Sized> Links<T> {
    /// Creates unlinked links.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pointers: UnsafeCell::new(Pointers {
                prev: None,
                next: None,
                linked: false,
            }),
            _pinned: PhantomPinned,
        }
    }

    /// Whether the node that owns these links is currently a member of some list.
    ///
    /// Only meaningful while the caller holds whatever synchronization protects that list.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        // SAFETY: Reads race only with list mutation, which the caller synchronizes with.
        unsafe { (*self.pointers.get()).linked }
    }

    pub(crate) fn pointers(&self) -> *mut Pointers<T> {
        self.pointers.get()
    }
}

impl<T: ?Sized> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Links<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("linked", &self.is_linked())
            .finish_non_exhaustive()
    }
}

// SAFETY: The pointers are only dereferenced by the list that the node is linked into, and every
// list mutation requires exclusive access to that list, so moving the field between threads is
// no different from moving a plain pair of addresses.
unsafe impl<T: ?Sized + Send> Send for Links<T> {}

// SAFETY: Shared access only reads the pointers; all writes go through a `&mut List` (or a
// locked `Queue`), which provides the necessary happens-before ordering.
unsafe impl<T: ?Sized + Sync> Sync for Links<T> {}

/// A type that embeds [`Links`] and can therefore be linked into a [`List`][crate::List].
///
/// # Safety
///
/// `links()` must return a pointer to a `Links<Self>` field stored inside the node that `node`
/// points to, and must always return the same field for the same node.
pub unsafe trait Linked {
    /// Returns a pointer to the links embedded in `node`.
    ///
    /// # Safety
    ///
    /// `node` must point to a live instance of `Self`.
    unsafe fn links(node: NonNull<Self>) -> NonNull<Links<Self>>;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Links<u64>: Send, Sync, fmt::Debug, Default);

    #[test]
    fn new_links_are_unlinked() {
        let links = Links::<u64>::new();
        assert!(!links.is_linked());
    }

    #[test]
    fn debug_output_mentions_link_state() {
        let links = Links::<u64>::default();
        let output = format!("{links:?}");
        assert!(output.contains("linked: false"));
    }
}
