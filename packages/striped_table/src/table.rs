use std::fmt;
use std::sync::atomic::Ordering;

use intrusive_list::List;
use parking_lot::RwLock;
use tracing::warn;

use crate::primes::bucket_count_for;
use crate::shard::{Shard, find};
use crate::{
    Entry, IterMut, KeyStrategy, LoadMetric, OwnedEntry, PointerKeys, Result, StripedTableBuilder,
    Visit,
};

/// A chained hash table with one lock per bucket and a table-wide lock for resizing.
///
/// The table stores [`Entry`] values that the caller creates as [`OwnedEntry`] handles, either
/// on the heap or in memory the caller provides. Inserting hands the entry over to the table and
/// removing hands it back, so the table itself never allocates per entry.
///
/// # Locking
///
/// Every operation that takes `&self` first acquires the table-wide lock in shared mode and then
/// locks only the bucket it touches, so operations on different buckets run in parallel.
/// Growing the table acquires the table-wide lock exclusively. Bucket indexes are always computed
/// from the bucket array observed under the table-wide lock.
///
/// Operations that take `&mut self` (`insert_mut()`, `get_mut()`, `remove_mut()`,
/// `iter_mut()`) have exclusive access proven by the borrow checker and take no locks at all.
///
/// Closures passed to [`lookup()`][Self::lookup], [`for_each()`][Self::for_each],
/// [`retain()`][Self::retain] and [`drain()`][Self::drain] run while locks are held and must
/// not call back into the same table.
///
/// # Keys
///
/// Keys are byte strings, copied into the entry on insert. How they are hashed and compared is
/// decided by the [`KeyStrategy`]; the default [`PointerKeys`] expects keys produced by
/// [`PointerKeys::key_of()`]. Duplicate keys are allowed; lookups find the most recently
/// inserted entry. Use [`insert_unique()`][Self::insert_unique] to reject duplicates.
///
/// # Example
///
/// ```
/// use striped_table::{OwnedEntry, PointerKeys, StripedTable};
///
/// let table = StripedTable::<&str>::with_capacity(40)?;
///
/// let value = 42_u64;
/// let key = PointerKeys::key_of(&raw const value);
///
/// table.insert(OwnedEntry::new("forty-two"), &key);
/// assert_eq!(table.lookup(&key, |entry| *entry.value()), Some("forty-two"));
///
/// let removed = table.remove(&key).unwrap();
/// assert_eq!(removed.into_value(), "forty-two");
/// assert!(table.is_empty());
/// # Ok::<(), striped_table::Error>(())
/// ```
pub struct StripedTable<V, S = PointerKeys> {
    shard: RwLock<Shard<V>>,
    strategy: S,
    load_factor: f64,
    load_metric: LoadMetric,
}

impl<V> StripedTable<V, PointerKeys> {
    /// Starts building a table with custom settings.
    pub fn builder() -> StripedTableBuilder<V, PointerKeys> {
        StripedTableBuilder::new()
    }

    /// Creates a table for address keys, sized to hold `capacity` entries before it first grows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the bucket array
    /// cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::builder().capacity(capacity).build()
    }
}

impl<V, S: KeyStrategy> StripedTable<V, S> {
    pub(crate) fn new_inner(
        capacity: usize,
        load_factor: f64,
        load_metric: LoadMetric,
        strategy: S,
    ) -> Result<Self> {
        // A zero threshold would make the very first insert grow the table.
        let resize_threshold = capacity.max(1);
        let shard = Shard::new(bucket_count_for(capacity, load_factor), resize_threshold)?;

        Ok(Self {
            shard: RwLock::new(shard),
            strategy,
            load_factor,
            load_metric,
        })
    }

    /// The key strategy the table was created with.
    #[must_use]
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Inserts an entry under `key`, growing the table first if it has reached its resize
    /// threshold.
    ///
    /// The key is copied into the entry. If growing fails, the failure is logged and the entry
    /// is inserted into the table as it is.
    pub fn insert(&self, entry: OwnedEntry<V>, key: &[u8]) {
        let mut entry = entry;
        entry.set_key(key);

        self.grow_if_needed();

        let shard = self.shard.read();
        let mut chain = shard.bucket_for(&self.strategy, key).lock();

        // SAFETY: The entry is owned by us and not linked anywhere; we hold the bucket lock.
        unsafe { shard.counters.link(&mut chain, entry.into_raw()) };
    }

    /// Inserts an entry under `key` unless an entry with an equal key is already present, in
    /// which case the entry is handed back.
    ///
    /// The check and the insert happen under the same bucket lock.
    ///
    /// # Errors
    ///
    /// Returns the entry if the key is already present.
    pub fn insert_unique(
        &self,
        entry: OwnedEntry<V>,
        key: &[u8],
    ) -> std::result::Result<(), OwnedEntry<V>> {
        let mut entry = entry;

        self.grow_if_needed();

        let shard = self.shard.read();
        let mut chain = shard.bucket_for(&self.strategy, key).lock();

        if find(&chain, &self.strategy, key).is_some() {
            return Err(entry);
        }

        entry.set_key(key);

        // SAFETY: The entry is owned by us and not linked anywhere; we hold the bucket lock.
        unsafe { shard.counters.link(&mut chain, entry.into_raw()) };

        Ok(())
    }

    /// Inserts an entry under `key` without taking any locks.
    ///
    /// Like [`insert()`][Self::insert], this grows the table first if it has reached its resize
    /// threshold.
    pub fn insert_mut(&mut self, entry: OwnedEntry<V>, key: &[u8]) {
        let mut entry = entry;
        entry.set_key(key);

        let shard = self.shard.get_mut();

        if shard.load(self.load_metric) >= shard.resize_threshold {
            if let Err(error) = shard.grow(&self.strategy, self.load_factor) {
                warn!(%error, "hash table could not grow, inserting into the current buckets");
            }
        }

        let (chain, counters) = shard.bucket_for_mut(&self.strategy, key);

        // SAFETY: The entry is owned by us and not linked anywhere; we have exclusive access.
        unsafe { counters.link(chain, entry.into_raw()) };
    }

    /// Calls `f` with the most recently inserted entry whose key matches `key`.
    ///
    /// The bucket stays locked while `f` runs. Returns `None` if there is no such entry.
    pub fn lookup<R>(&self, key: &[u8], f: impl FnOnce(&Entry<V>) -> R) -> Option<R> {
        let shard = self.shard.read();
        let chain = shard.bucket_for(&self.strategy, key).lock();

        let node = find(&chain, &self.strategy, key)?;

        // SAFETY: The entry is a member of the chain, which we hold the lock of.
        Some(f(unsafe { node.as_ref() }))
    }

    /// Whether an entry with a matching key is present.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.lookup(key, |_| ()).is_some()
    }

    /// The payload of the most recently inserted entry whose key matches `key`, without taking
    /// any locks.
    #[must_use]
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let (chain, _) = self.shard.get_mut().bucket_for_mut(&self.strategy, key);

        let mut node = find(chain, &self.strategy, key)?;

        // SAFETY: The entry is a member of the chain and we have exclusive access to the
        // table for as long as the returned reference lives.
        Some(unsafe { node.as_mut() }.value_mut())
    }

    /// Removes the most recently inserted entry whose key matches `key` and hands it back.
    ///
    /// Finding and unlinking happen under the same bucket lock.
    #[must_use]
    pub fn remove(&self, key: &[u8]) -> Option<OwnedEntry<V>> {
        let shard = self.shard.read();
        let mut chain = shard.bucket_for(&self.strategy, key).lock();

        let node = find(&chain, &self.strategy, key)?;

        // SAFETY: The entry is a member of the chain, which we hold the lock of.
        Some(unsafe { shard.counters.unlink(&mut chain, node) })
    }

    /// Removes the most recently inserted entry whose key matches `key` without taking any
    /// locks.
    #[must_use]
    pub fn remove_mut(&mut self, key: &[u8]) -> Option<OwnedEntry<V>> {
        let (chain, counters) = self.shard.get_mut().bucket_for_mut(&self.strategy, key);

        let node = find(chain, &self.strategy, key)?;

        // SAFETY: The entry is a member of the chain and we have exclusive access.
        Some(unsafe { counters.unlink(chain, node) })
    }

    /// Grows the table regardless of how full it is: the resize threshold doubles and every
    /// entry moves into a bucket array sized for the new threshold, or into the next larger
    /// bucket array if that size is no larger than the current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the new bucket
    /// array cannot be allocated. The table is unchanged in that case.
    pub fn resize(&self) -> Result<()> {
        self.shard.write().grow(&self.strategy, self.load_factor)
    }

    /// Calls `f` for every entry, bucket by bucket in index order and within a bucket from the
    /// most to the least recently inserted.
    ///
    /// Each bucket is locked while its entries are visited.
    pub fn for_each(&self, mut f: impl FnMut(&Entry<V>)) {
        let shard = self.shard.read();

        for bucket in &shard.buckets {
            let chain = bucket.lock();

            for node in chain.iter() {
                // SAFETY: The entry is a member of the chain, which we hold the lock of.
                f(unsafe { node.as_ref() });
            }
        }
    }

    /// Visits every entry in the same order as [`for_each()`][Self::for_each] and removes the
    /// ones for which `decide` returns [`Visit::Remove`], passing them to `removed`.
    ///
    /// Removing the entry being visited is safe because the position of the next entry is
    /// read before `decide` is called.
    pub fn retain(
        &self,
        mut decide: impl FnMut(&Entry<V>) -> Visit,
        mut removed: impl FnMut(OwnedEntry<V>),
    ) {
        let shard = self.shard.read();

        for bucket in &shard.buckets {
            let mut chain = bucket.lock();
            let mut cursor = chain.front();

            while let Some(node) = cursor {
                // SAFETY: The entry is a member of the chain, which we hold the lock of.
                cursor = unsafe { List::next_of(node) };

                // SAFETY: As above.
                let visit = decide(unsafe { node.as_ref() });

                if visit == Visit::Remove {
                    // SAFETY: As above; the cursor already points past this entry.
                    removed(unsafe { shard.counters.unlink(&mut chain, node) });
                }
            }
        }
    }

    /// Removes every entry, passing each to `removed` in [`for_each()`][Self::for_each] order.
    pub fn drain(&self, removed: impl FnMut(OwnedEntry<V>)) {
        self.retain(|_| Visit::Remove, removed);
    }

    /// Iterates over all keys and payloads without taking any locks.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut::new(&mut self.shard.get_mut().buckets)
    }

    /// Number of buckets. Always one of a fixed sequence of primes.
    #[must_use]
    pub fn buckets(&self) -> usize {
        self.shard.read().buckets.len()
    }

    /// Number of buckets holding at least one entry.
    #[must_use]
    pub fn used_buckets(&self) -> usize {
        self.shard
            .read()
            .counters
            .used_buckets
            .load(Ordering::Relaxed)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shard.read().counters.len.load(Ordering::Relaxed)
    }

    /// Whether the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The load at which the next insert grows the table, measured by the configured
    /// [`LoadMetric`].
    #[must_use]
    pub fn resize_threshold(&self) -> usize {
        self.shard.read().resize_threshold
    }

    fn grow_if_needed(&self) {
        if !self.needs_growth(&self.shard.read()) {
            return;
        }

        let mut shard = self.shard.write();

        // Someone else may have grown the table while we waited for the lock.
        if !self.needs_growth(&shard) {
            return;
        }

        if let Err(error) = shard.grow(&self.strategy, self.load_factor) {
            warn!(%error, "hash table could not grow, inserting into the current buckets");
        }
    }

    fn needs_growth(&self, shard: &Shard<V>) -> bool {
        shard.load(self.load_metric) >= shard.resize_threshold
    }
}

impl<V, S> Drop for StripedTable<V, S> {
    fn drop(&mut self) {
        for bucket in &mut self.shard.get_mut().buckets {
            let chain = bucket.get_mut();

            while let Some(node) = chain.pop_front() {
                // SAFETY: Every entry in a chain was handed over through
                // `OwnedEntry::into_raw()`; now that it is unlinked, we give it back to a handle
                // that destroys it.
                drop(unsafe { OwnedEntry::from_raw(node) });
            }
        }
    }
}

impl<V, S: fmt::Debug> fmt::Debug for StripedTable<V, S> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shard = self.shard.read();

        f.debug_struct("StripedTable")
            .field("buckets", &shard.buckets.len())
            .field("counters", &shard.counters)
            .field("resize_threshold", &shard.resize_threshold)
            .field("strategy", &self.strategy)
            .field("load_factor", &self.load_factor)
            .field("load_metric", &self.load_metric)
            .finish()
    }
}
