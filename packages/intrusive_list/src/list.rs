use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{Linked, Pointers};

/// An intrusive doubly linked list of nodes that embed [`Links`][crate::Links].
///
/// The list stores only pointers to its first and last node. It never allocates and never drops
/// nodes; dropping a non-empty list simply forgets about its members.
///
/// # Thread safety
///
/// The list is thread-mobile if the nodes are. All mutation requires `&mut self`, so sharing a
/// list between threads requires external synchronization such as the mutex in
/// [`Queue`][crate::Queue].
pub struct List<T: Linked> {
    head: Option<NonNull<T>>,
    tail: Option<NonNull<T>>,
    len: usize,

    _nodes: PhantomData<*const T>,
}

/// # Safety
///
/// `node` must point to a live node.
unsafe fn pointers_of<T: Linked>(node: NonNull<T>) -> *mut Pointers<T> {
    // SAFETY: Forwarding the liveness requirement to the caller. The `Linked` contract
    // guarantees the returned links live inside the node.
    let links = unsafe { T::links(node) };

    // SAFETY: The links are part of a live node, so the reference is valid for this call.
    unsafe { links.as_ref() }.pointers()
}

impl<T: Linked> List<T> {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _nodes: PhantomData,
        }
    }

    /// Number of nodes currently linked into the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The first node of the list, if any.
    #[must_use]
    pub fn front(&self) -> Option<NonNull<T>> {
        self.head
    }

    /// The last node of the list, if any.
    #[must_use]
    pub fn back(&self) -> Option<NonNull<T>> {
        self.tail
    }

    /// Links `node` in as the new first node.
    ///
    /// # Safety
    ///
    /// * `node` must point to a live node that is not linked into any list.
    /// * The node must stay alive and must not move until it is removed from this list.
    pub unsafe fn push_front(&mut self, node: NonNull<T>) {
        // SAFETY: The caller guarantees the node is alive.
        let pointers = unsafe { pointers_of(node) };

        // SAFETY: The node is alive and not part of any list, so nobody else touches its links.
        unsafe {
            debug_assert!(!(*pointers).linked, "node is already linked into a list");
            *pointers = Pointers {
                prev: None,
                next: self.head,
                linked: true,
            };
        }

        match self.head {
            // SAFETY: Members of the list are alive per the contract of the push methods.
            Some(head) => unsafe { (*pointers_of(head)).prev = Some(node) },
            None => self.tail = Some(node),
        }

        self.head = Some(node);
        self.increment_len();
    }

    /// Links `node` in as the new last node.
    ///
    /// # Safety
    ///
    /// * `node` must point to a live node that is not linked into any list.
    /// * The node must stay alive and must not move until it is removed from this list.
    pub unsafe fn push_back(&mut self, node: NonNull<T>) {
        // SAFETY: The caller guarantees the node is alive.
        let pointers = unsafe { pointers_of(node) };

        // SAFETY: The node is alive and not part of any list, so nobody else touches its links.
        unsafe {
            debug_assert!(!(*pointers).linked, "node is already linked into a list");
            *pointers = Pointers {
                prev: self.tail,
                next: None,
                linked: true,
            };
        }

        match self.tail {
            // SAFETY: Members of the list are alive per the contract of the push methods.
            Some(tail) => unsafe { (*pointers_of(tail)).next = Some(node) },
            None => self.head = Some(node),
        }

        self.tail = Some(node);
        self.increment_len();
    }

    /// Links `node` in directly after `after`.
    ///
    /// # Safety
    ///
    /// * `node` must point to a live node that is not linked into any list.
    /// * `after` must be a member of this list.
    /// * The node must stay alive and must not move until it is removed from this list.
    pub unsafe fn insert_after(&mut self, node: NonNull<T>, after: NonNull<T>) {
        // SAFETY: `after` is a member of this list, so it is alive.
        let after_pointers = unsafe { pointers_of(after) };

        // SAFETY: As above; we have exclusive access to the list and therefore to its links.
        let next = unsafe { (*after_pointers).next };

        // SAFETY: The caller guarantees the node is alive.
        let pointers = unsafe { pointers_of(node) };

        // SAFETY: The node is alive and not part of any list, so nobody else touches its links.
        unsafe {
            debug_assert!(!(*pointers).linked, "node is already linked into a list");
            *pointers = Pointers {
                prev: Some(after),
                next,
                linked: true,
            };
        }

        // SAFETY: `after` is alive and we have exclusive access to the list.
        unsafe { (*after_pointers).next = Some(node) };

        match next {
            // SAFETY: Members of the list are alive per the contract of the push methods.
            Some(next) => unsafe { (*pointers_of(next)).prev = Some(node) },
            None => self.tail = Some(node),
        }

        self.increment_len();
    }

    /// Unlinks `node` from the list and resets its links to the unlinked state.
    ///
    /// # Safety
    ///
    /// `node` must be a member of this list. Removing a node twice is undefined behavior.
    pub unsafe fn remove(&mut self, node: NonNull<T>) {
        // SAFETY: Members of the list are alive.
        let pointers = unsafe { pointers_of(node) };

        // SAFETY: We have exclusive access to the list and thus to the links of its members.
        let Pointers { prev, next, linked } = unsafe { pointers.read() };
        debug_assert!(linked, "removing a node that is not linked into a list");

        match prev {
            // SAFETY: Neighbors are members of the list and therefore alive.
            Some(prev) => unsafe { (*pointers_of(prev)).next = next },
            None => {
                debug_assert_eq!(self.head, Some(node), "unlinked head is not the list head");
                self.head = next;
            }
        }

        match next {
            // SAFETY: Neighbors are members of the list and therefore alive.
            Some(next) => unsafe { (*pointers_of(next)).prev = prev },
            None => {
                debug_assert_eq!(self.tail, Some(node), "unlinked tail is not the list tail");
                self.tail = prev;
            }
        }

        // SAFETY: The node is alive and now detached, so we are the only ones touching it.
        unsafe {
            *pointers = Pointers {
                prev: None,
                next: None,
                linked: false,
            };
        }

        self.len = self
            .len
            .checked_sub(1)
            .expect("removed a node from a list that claims to be empty");
    }

    /// Unlinks and returns the first node.
    pub fn pop_front(&mut self) -> Option<NonNull<T>> {
        let node = self.head?;

        // SAFETY: The head is a member of this list.
        unsafe { self.remove(node) };

        Some(node)
    }

    /// Unlinks and returns the last node.
    pub fn pop_back(&mut self) -> Option<NonNull<T>> {
        let node = self.tail?;

        // SAFETY: The tail is a member of this list.
        unsafe { self.remove(node) };

        Some(node)
    }

    /// The node that follows `node` in whatever list it is linked into.
    ///
    /// # Safety
    ///
    /// `node` must point to a live node, and the caller must have synchronized with any
    /// mutation of the list that the node is linked into.
    #[must_use]
    pub unsafe fn next_of(node: NonNull<T>) -> Option<NonNull<T>> {
        // SAFETY: Forwarding the requirements to the caller.
        unsafe { (*pointers_of(node)).next }
    }

    /// Iterates over the nodes from first to last.
    ///
    /// The iterator reads the successor of a node before yielding it, so a caller that owns the
    /// list mutably elsewhere (e.g. via a raw cursor) may unlink the yielded node.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            next: self.head,
            remaining: self.len,
            _list: PhantomData,
        }
    }

    fn increment_len(&mut self) {
        self.len = self
            .len
            .checked_add(1)
            .expect("a list cannot hold more nodes than there are addresses");
    }
}

impl<T: Linked> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> fmt::Debug for List<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

// SAFETY: The list only holds pointers to nodes; if the nodes can move between threads, so can
// the list that strings them together.
unsafe impl<T: Linked + Send> Send for List<T> {}

// SAFETY: Shared access only reads pointers to nodes, which is fine if the nodes are `Sync`.
unsafe impl<T: Linked + Sync> Sync for List<T> {}

/// Iterator over the nodes of a [`List`], created by [`List::iter()`].
pub struct Iter<'a, T: Linked> {
    next: Option<NonNull<T>>,
    remaining: usize,

    _list: PhantomData<&'a List<T>>,
}

impl<T: Linked> Iterator for Iter<'_, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;

        // SAFETY: The node is a member of the list we borrow, so it is alive and the list
        // cannot be mutated through safe code while we hold the borrow.
        self.next = unsafe { List::next_of(node) };
        self.remaining = self.remaining.saturating_sub(1);

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Linked> fmt::Debug for Iter<'_, T> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}
