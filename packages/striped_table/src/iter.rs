use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;

use intrusive_list::List;

use crate::Entry;
use crate::shard::Bucket;

/// What [`StripedTable::retain()`][crate::StripedTable::retain] should do with the entry it
/// just visited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Visit {
    /// Leave the entry in the table.
    Keep,

    /// Unlink the entry and hand it to the removal callback.
    Remove,
}

/// Iterator over the keys and payloads of a table, created by
/// [`StripedTable::iter_mut()`][crate::StripedTable::iter_mut].
///
/// Walks the buckets in index order and each chain from the most to the least recently
/// inserted entry.
pub struct IterMut<'a, V> {
    buckets: slice::IterMut<'a, Bucket<V>>,
    next: Option<NonNull<Entry<V>>>,

    _entries: PhantomData<&'a mut Entry<V>>,
}

impl<'a, V> IterMut<'a, V> {
    pub(crate) fn new(buckets: &'a mut [Bucket<V>]) -> Self {
        Self {
            buckets: buckets.iter_mut(),
            next: None,
            _entries: PhantomData,
        }
    }
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = (&'a [u8], &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.next {
                // SAFETY: The entry is a member of a chain we borrow exclusively for 'a.
                self.next = unsafe { List::next_of(node) };

                // SAFETY: As above. Each entry is yielded once, so the mutable references
                // handed out never alias.
                let entry: &'a mut Entry<V> = unsafe { &mut *node.as_ptr() };

                return Some(entry.key_and_value_mut());
            }

            self.next = self.buckets.next()?.get_mut().front();
        }
    }
}

impl<V> fmt::Debug for IterMut<'_, V> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterMut")
            .field("remaining_buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}
