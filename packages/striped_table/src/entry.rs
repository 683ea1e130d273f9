use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use intrusive_list::{Linked, Links};
use smallvec::SmallVec;

/// Keys up to this many bytes are stored inside the entry itself.
///
/// Longer keys spill onto the heap, which code running inside a global allocator must avoid.
pub const INLINE_KEY_LEN: usize = 16;

/// Where the memory of an entry came from, which decides how it is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// Allocated by [`OwnedEntry::new()`] as a `Box`.
    Heap,

    /// Provided by the caller through [`OwnedEntry::write_into()`].
    External,
}

/// A hash table entry: the chain links, a copy of the key and the payload, stored together.
///
/// Entries are created and owned via [`OwnedEntry`]. While an entry is in a table, the table
/// owns it and only lends it out by reference.
pub struct Entry<V> {
    links: Links<Entry<V>>,
    key: SmallVec<[u8; INLINE_KEY_LEN]>,
    origin: Origin,
    value: V,
}

impl<V> Entry<V> {
    /// The key the entry was inserted under. Empty for an entry that was never inserted.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The payload.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The memory layout of an entry carrying a `V`.
    ///
    /// Memory handed to [`OwnedEntry::write_into()`] must satisfy this layout.
    #[must_use]
    pub const fn layout() -> Layout {
        Layout::new::<Self>()
    }

    pub(crate) fn set_key(&mut self, key: &[u8]) {
        self.key.clear();
        self.key.extend_from_slice(key);
    }

    pub(crate) fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub(crate) fn key_and_value_mut(&mut self) -> (&[u8], &mut V) {
        (&self.key, &mut self.value)
    }
}

impl<V: fmt::Debug> fmt::Debug for Entry<V> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key.as_slice())
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

// SAFETY: `links()` returns the address of the embedded `links` field without creating any
// references, and always the same field for the same entry.
unsafe impl<V> Linked for Entry<V> {
    unsafe fn links(node: NonNull<Self>) -> NonNull<Links<Self>> {
        // SAFETY: The caller guarantees that `node` points to a live entry, so the field
        // address is in bounds and non-null.
        unsafe { NonNull::new_unchecked(&raw mut (*node.as_ptr()).links) }
    }
}

/// Exclusive ownership of an [`Entry`] that is not currently in any table.
///
/// Inserting into a table consumes the handle and removing from a table hands one back. A
/// handle is released in one of these ways:
///
/// * [`into_value()`][Self::into_value] destroys the entry and returns the payload.
/// * [`into_raw()`][Self::into_raw] gives up ownership without destroying anything.
/// * Dropping it destroys the payload. A heap entry also frees its memory; an entry written
///   into caller memory leaves that memory to the caller.
#[must_use]
pub struct OwnedEntry<V> {
    entry: NonNull<Entry<V>>,

    _owns: PhantomData<Entry<V>>,
}

impl<V> OwnedEntry<V> {
    /// Creates an entry on the heap.
    pub fn new(value: V) -> Self {
        let entry = Box::new(Entry {
            links: Links::new(),
            key: SmallVec::new(),
            origin: Origin::Heap,
            value,
        });

        Self {
            entry: NonNull::from(Box::leak(entry)),
            _owns: PhantomData,
        }
    }

    /// Creates an entry in caller-provided memory, for example a block taken from a pool.
    ///
    /// The memory is never freed by the entry. Use [`external_memory()`][Self::external_memory]
    /// to find out where it is before the handle is consumed.
    ///
    /// # Safety
    ///
    /// * `place` must be valid for writes of [`Entry::layout()`] and suitably aligned.
    /// * The memory must stay valid until the entry has been destroyed.
    pub unsafe fn write_into(place: NonNull<u8>, value: V) -> Self {
        let entry = place.cast::<Entry<V>>();

        // SAFETY: The caller guarantees the memory is valid for writes and aligned.
        unsafe {
            entry.write(Entry {
                links: Links::new(),
                key: SmallVec::new(),
                origin: Origin::External,
                value,
            });
        }

        Self {
            entry,
            _owns: PhantomData,
        }
    }

    /// Takes back ownership of an entry released with [`into_raw()`][Self::into_raw].
    ///
    /// # Safety
    ///
    /// `entry` must come from `into_raw()` and must not be owned by anything else.
    pub unsafe fn from_raw(entry: NonNull<Entry<V>>) -> Self {
        Self {
            entry,
            _owns: PhantomData,
        }
    }

    /// Releases ownership without destroying the entry.
    ///
    /// The caller becomes responsible for eventually passing the pointer to
    /// [`from_raw()`][Self::from_raw].
    #[must_use]
    pub fn into_raw(self) -> NonNull<Entry<V>> {
        ManuallyDrop::new(self).entry
    }

    /// Destroys the entry and returns its payload.
    ///
    /// Heap memory is freed. Caller-provided memory is left alone.
    #[must_use]
    pub fn into_value(self) -> V {
        let entry = self.into_raw();

        // SAFETY: We own the entry and it is initialized. The fields we do not move out (the
        // key among them) are dropped here, and the entry is never read again.
        let Entry { origin, value, .. } = unsafe { entry.read() };

        if origin == Origin::Heap {
            // SAFETY: Heap entries come from `Box::leak()` in `new()`. The contents were moved
            // out above, so we free the memory without dropping anything.
            drop(unsafe { Box::from_raw(entry.as_ptr().cast::<ManuallyDrop<Entry<V>>>()) });
        }

        value
    }

    /// Address of the caller-provided memory holding this entry, or `None` for a heap entry.
    #[must_use]
    pub fn external_memory(&self) -> Option<NonNull<u8>> {
        (self.as_entry().origin == Origin::External).then(|| self.entry.cast())
    }

    /// The key the entry was inserted under. Empty for an entry that was never inserted.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.as_entry().key()
    }

    /// The payload.
    #[must_use]
    pub fn value(&self) -> &V {
        self.as_entry().value()
    }

    /// The payload, mutably.
    #[must_use]
    pub fn value_mut(&mut self) -> &mut V {
        // SAFETY: We own the entry exclusively.
        unsafe { self.entry.as_mut() }.value_mut()
    }

    pub(crate) fn set_key(&mut self, key: &[u8]) {
        // SAFETY: We own the entry exclusively.
        unsafe { self.entry.as_mut() }.set_key(key);
    }

    fn as_entry(&self) -> &Entry<V> {
        // SAFETY: We own the entry, so it is alive and nobody is mutating it.
        unsafe { self.entry.as_ref() }
    }
}

impl<V> Drop for OwnedEntry<V> {
    fn drop(&mut self) {
        match self.as_entry().origin {
            // SAFETY: Heap entries come from `Box::leak()` in `new()` and we own this one.
            Origin::Heap => drop(unsafe { Box::from_raw(self.entry.as_ptr()) }),
            // SAFETY: We own the entry and it is initialized; the memory belongs to the caller.
            Origin::External => unsafe { ptr::drop_in_place(self.entry.as_ptr()) },
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for OwnedEntry<V> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedEntry")
            .field("entry", self.as_entry())
            .finish()
    }
}

// SAFETY: The handle owns the entry exclusively, like a `Box` does.
unsafe impl<V: Send> Send for OwnedEntry<V> {}

// SAFETY: Shared access only hands out shared references to the entry.
unsafe impl<V: Sync> Sync for OwnedEntry<V> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::alloc::{alloc, dealloc};
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(OwnedEntry<u64>: Send, Sync, fmt::Debug);
    assert_not_impl_any!(OwnedEntry<Rc<u64>>: Send, Sync);
    assert_impl_all!(Entry<u64>: Send, Sync, fmt::Debug);

    struct CountDrops(Rc<Cell<usize>>);

    impl Drop for CountDrops {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn heap_entry_round_trips_value() {
        let mut entry = OwnedEntry::new(5_u32);

        assert_eq!(*entry.value(), 5);
        assert!(entry.key().is_empty());
        assert!(entry.external_memory().is_none());

        *entry.value_mut() = 6;
        assert_eq!(entry.into_value(), 6);
    }

    #[test]
    fn set_key_replaces_previous_key() {
        let mut entry = OwnedEntry::new(());

        entry.set_key(b"first");
        entry.set_key(b"2nd");

        assert_eq!(entry.key(), b"2nd");
    }

    #[test]
    fn dropping_heap_entry_drops_value_once() {
        let drops = Rc::new(Cell::new(0));

        drop(OwnedEntry::new(CountDrops(Rc::clone(&drops))));

        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn into_value_does_not_drop_value() {
        let drops = Rc::new(Cell::new(0));

        let value = OwnedEntry::new(CountDrops(Rc::clone(&drops))).into_value();
        assert_eq!(drops.get(), 0);

        drop(value);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn raw_round_trip_keeps_entry_alive() {
        let raw = OwnedEntry::new(11_u16).into_raw();

        // SAFETY: The pointer came from `into_raw()` and nothing else owns it.
        let entry = unsafe { OwnedEntry::from_raw(raw) };

        assert_eq!(entry.into_value(), 11);
    }

    #[test]
    fn external_entry_leaves_memory_to_caller() {
        let layout = Entry::<CountDrops>::layout();
        let drops = Rc::new(Cell::new(0));

        // SAFETY: The layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc(layout) }).unwrap();

        // SAFETY: The memory matches the entry layout and outlives the entry.
        let mut entry = unsafe { OwnedEntry::write_into(memory, CountDrops(Rc::clone(&drops))) };
        entry.set_key(b"k");

        assert_eq!(entry.external_memory(), Some(memory));
        drop(entry);
        assert_eq!(drops.get(), 1);

        // SAFETY: The entry is gone; the memory is still ours to free.
        unsafe { dealloc(memory.as_ptr(), layout) };
    }

    #[test]
    fn external_entry_into_value_returns_payload() {
        let layout = Entry::<u64>::layout();

        // SAFETY: The layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc(layout) }).unwrap();

        // SAFETY: The memory matches the entry layout and outlives the entry.
        let entry = unsafe { OwnedEntry::write_into(memory, 77_u64) };

        assert_eq!(entry.into_value(), 77);

        // SAFETY: The entry is gone; the memory is still ours to free.
        unsafe { dealloc(memory.as_ptr(), layout) };
    }
}
