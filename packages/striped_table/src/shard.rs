use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use intrusive_list::List;
use parking_lot::Mutex;
use tracing::debug;

use crate::primes::{bucket_count_for, entries_for, next_bucket_count};
use crate::{Entry, Error, KeyStrategy, LoadMetric, OwnedEntry, Result};

pub(crate) type Chain<V> = List<Entry<V>>;
pub(crate) type Bucket<V> = Mutex<Chain<V>>;

/// Everything that a resize replaces: the buckets, their locks and the counters describing them.
///
/// Bucket indexes are only meaningful for the shard they were computed from.
pub(crate) struct Shard<V> {
    pub(crate) buckets: Box<[Bucket<V>]>,
    pub(crate) counters: Counters,
    pub(crate) resize_threshold: usize,
}

/// Occupancy counters, updated while holding the lock of the bucket being changed.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) used_buckets: AtomicUsize,
    pub(crate) len: AtomicUsize,
}

impl<V> Shard<V> {
    pub(crate) fn new(bucket_count: usize, resize_threshold: usize) -> Result<Self> {
        let mut buckets = Vec::new();

        buckets
            .try_reserve_exact(bucket_count)
            .map_err(|source| Error::AllocationFailed {
                buckets: bucket_count,
                source,
            })?;

        buckets.extend((0..bucket_count).map(|_| Mutex::new(List::new())));

        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            counters: Counters::default(),
            resize_threshold,
        })
    }

    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        bucket_index(hash, self.buckets.len())
    }

    pub(crate) fn bucket_for(&self, strategy: &impl KeyStrategy, key: &[u8]) -> &Bucket<V> {
        let index = self.bucket_index(strategy.hash(key));

        self.buckets
            .get(index)
            .expect("bucket index is always reduced modulo the bucket count")
    }

    /// The bucket for `key` together with the counters, borrowed without locking.
    pub(crate) fn bucket_for_mut(
        &mut self,
        strategy: &impl KeyStrategy,
        key: &[u8],
    ) -> (&mut Chain<V>, &Counters) {
        let index = self.bucket_index(strategy.hash(key));

        let chain = self
            .buckets
            .get_mut(index)
            .expect("bucket index is always reduced modulo the bucket count")
            .get_mut();

        (chain, &self.counters)
    }

    pub(crate) fn load(&self, metric: LoadMetric) -> usize {
        match metric {
            LoadMetric::Entries => self.counters.len.load(Ordering::Relaxed),
            LoadMetric::UsedBuckets => self.counters.used_buckets.load(Ordering::Relaxed),
        }
    }

    /// Doubles the resize threshold and redistributes every entry into a larger bucket array.
    /// Entries are moved, never reallocated.
    ///
    /// The new bucket count is the one sized for the doubled threshold. If that is no larger
    /// than the current count, the next prime is used instead and the threshold rises to at
    /// least what the current buckets hold at `load_factor`. Only a table that already has the
    /// largest bucket count keeps its buckets, and then only the threshold moves.
    ///
    /// On failure the shard is left exactly as it was.
    pub(crate) fn grow(&mut self, strategy: &impl KeyStrategy, load_factor: f64) -> Result<()> {
        let current = self.buckets.len();
        let mut resize_threshold = self.resize_threshold.saturating_mul(2);
        let mut bucket_count = bucket_count_for(resize_threshold, load_factor);

        if bucket_count <= current {
            let Some(next_count) = next_bucket_count(current) else {
                self.resize_threshold = resize_threshold;
                return Ok(());
            };

            bucket_count = next_count;
            resize_threshold = resize_threshold.max(entries_for(current, load_factor));
        }

        let mut next = Self::new(bucket_count, resize_threshold)?;

        for bucket in &mut self.buckets {
            let chain = bucket.get_mut();

            // Taking from the back and pushing to the front keeps the relative order of the
            // entries that end up sharing a bucket.
            while let Some(node) = chain.pop_back() {
                // SAFETY: Entries stay alive for as long as the table owns them.
                let hash = strategy.hash(unsafe { node.as_ref() }.key());
                let index = next.bucket_index(hash);

                let target = next
                    .buckets
                    .get_mut(index)
                    .expect("bucket index is always reduced modulo the bucket count")
                    .get_mut();

                // SAFETY: The node was just unlinked from the old chain and stays owned by the
                // table, now through the new chain.
                unsafe { next.counters.link(target, node) };
            }
        }

        debug!(
            old_buckets = self.buckets.len(),
            new_buckets = bucket_count,
            entries = next.counters.len.load(Ordering::Relaxed),
            resize_threshold,
            "hash table resized"
        );

        *self = next;

        Ok(())
    }
}

impl Counters {
    /// Prepends an entry to a chain, taking ownership of it on behalf of the table.
    ///
    /// # Safety
    ///
    /// `node` must be a live entry that is not linked into any chain, and the caller must hold
    /// the lock of (or exclusive access to) the bucket that owns `chain`.
    pub(crate) unsafe fn link<V>(&self, chain: &mut Chain<V>, node: NonNull<Entry<V>>) {
        if chain.is_empty() {
            self.used_buckets.fetch_add(1, Ordering::Relaxed);
        }

        // SAFETY: Forwarding the requirements to the caller; entries do not move while owned
        // by the table.
        unsafe { chain.push_front(node) };

        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Unlinks an entry from its chain and hands ownership back to the caller.
    ///
    /// # Safety
    ///
    /// `node` must be a member of `chain`, and the caller must hold the lock of (or exclusive
    /// access to) the bucket that owns `chain`.
    pub(crate) unsafe fn unlink<V>(
        &self,
        chain: &mut Chain<V>,
        node: NonNull<Entry<V>>,
    ) -> OwnedEntry<V> {
        // SAFETY: Forwarding the requirements to the caller.
        unsafe { chain.remove(node) };

        if chain.is_empty() {
            self.used_buckets.fetch_sub(1, Ordering::Relaxed);
        }

        self.len.fetch_sub(1, Ordering::Relaxed);

        // SAFETY: Every entry in a chain was handed over through `OwnedEntry::into_raw()` and
        // is no longer reachable from the table now that it is unlinked.
        unsafe { OwnedEntry::from_raw(node) }
    }
}

/// Finds the most recently inserted entry in `chain` whose key matches `key`.
pub(crate) fn find<V>(
    chain: &Chain<V>,
    strategy: &impl KeyStrategy,
    key: &[u8],
) -> Option<NonNull<Entry<V>>> {
    chain.iter().find(|node| {
        // SAFETY: Members of a chain are alive and only mutated under the bucket lock,
        // which the caller holds by virtue of borrowing the chain.
        let entry = unsafe { node.as_ref() };
        strategy.eq(entry.key(), key)
    })
}

fn bucket_index(hash: u64, bucket_count: usize) -> usize {
    let bucket_count = u64::try_from(bucket_count).expect("usize always fits into u64");

    let index = hash
        .checked_rem(bucket_count)
        .expect("a table always has at least one bucket");

    usize::try_from(index).expect("index is smaller than a bucket count that came from usize")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{BytesKeys, PointerKeys};

    #[test]
    fn new_shard_is_empty() {
        let shard = Shard::<u32>::new(97, 40).unwrap();

        assert_eq!(shard.buckets.len(), 97);
        assert_eq!(shard.load(LoadMetric::Entries), 0);
        assert_eq!(shard.load(LoadMetric::UsedBuckets), 0);
        assert_eq!(shard.resize_threshold, 40);
    }

    #[test]
    fn impossible_bucket_array_is_allocation_failure() {
        let result = Shard::<u32>::new(usize::MAX, 1);

        assert!(matches!(
            result,
            Err(Error::AllocationFailed {
                buckets: usize::MAX,
                ..
            })
        ));
    }

    #[test]
    fn bucket_index_is_in_range() {
        assert_eq!(bucket_index(0, 97), 0);
        assert_eq!(bucket_index(97, 97), 0);
        assert_eq!(bucket_index(98, 97), 1);
        assert_eq!(
            bucket_index(u64::MAX, 193),
            usize::try_from(u64::MAX % 193).unwrap()
        );
    }

    #[test]
    fn link_and_unlink_maintain_counters() {
        let mut shard = Shard::<u32>::new(97, 40).unwrap();
        let strategy = BytesKeys::new();

        let mut entry = OwnedEntry::new(1);
        entry.set_key(b"a");
        let node = entry.into_raw();

        let (chain, counters) = shard.bucket_for_mut(&strategy, b"a");

        // SAFETY: The node is fresh and we have exclusive access to the shard.
        unsafe { counters.link(chain, node) };
        assert_eq!(counters.len.load(Ordering::Relaxed), 1);
        assert_eq!(counters.used_buckets.load(Ordering::Relaxed), 1);
        assert_eq!(find(chain, &strategy, b"a"), Some(node));
        assert_eq!(find(chain, &strategy, b"b"), None);

        // SAFETY: The node is a member of the chain.
        let entry = unsafe { counters.unlink(chain, node) };
        assert_eq!(counters.len.load(Ordering::Relaxed), 0);
        assert_eq!(counters.used_buckets.load(Ordering::Relaxed), 0);
        assert_eq!(entry.into_value(), 1);
    }

    #[test]
    fn grow_moves_entries_into_larger_array() {
        let mut shard = Shard::<usize>::new(97, 40).unwrap();
        let strategy = PointerKeys::new();

        for i in 0..50_usize {
            let key = i.to_ne_bytes();
            let mut entry = OwnedEntry::new(i);
            entry.set_key(&key);

            let (chain, counters) = shard.bucket_for_mut(&strategy, &key);
            // SAFETY: The node is fresh and we have exclusive access to the shard.
            unsafe { counters.link(chain, entry.into_raw()) };
        }

        shard.grow(&strategy, 0.75).unwrap();

        assert_eq!(shard.buckets.len(), 193);
        assert_eq!(shard.resize_threshold, 80);
        assert_eq!(shard.load(LoadMetric::Entries), 50);

        for i in 0..50_usize {
            let key = i.to_ne_bytes();
            let (chain, counters) = shard.bucket_for_mut(&strategy, &key);
            let node = find(chain, &strategy, &key).unwrap();

            // SAFETY: The node is a member of the chain.
            let entry = unsafe { counters.unlink(chain, node) };
            assert_eq!(entry.into_value(), i);
        }

        assert_eq!(shard.load(LoadMetric::UsedBuckets), 0);
    }

    #[test]
    fn grow_steps_to_next_prime_when_threshold_maps_to_same_count() {
        let mut shard = Shard::<usize>::new(97, 10).unwrap();
        let strategy = PointerKeys::new();

        for i in 0..11_usize {
            let key = i.to_ne_bytes();
            let mut entry = OwnedEntry::new(i);
            entry.set_key(&key);

            let (chain, counters) = shard.bucket_for_mut(&strategy, &key);
            // SAFETY: The node is fresh and we have exclusive access to the shard.
            unsafe { counters.link(chain, entry.into_raw()) };
        }

        // A doubled threshold of 20 still maps to 97 buckets.
        shard.grow(&strategy, 0.75).unwrap();

        assert_eq!(shard.buckets.len(), 193);
        assert_eq!(shard.resize_threshold, 72);
        assert_eq!(shard.load(LoadMetric::Entries), 11);

        // 144 maps to 193, so the next prime is taken again.
        shard.grow(&strategy, 0.75).unwrap();

        assert_eq!(shard.buckets.len(), 389);
        assert_eq!(shard.resize_threshold, 144);

        for i in 0..11_usize {
            let key = i.to_ne_bytes();
            let (chain, counters) = shard.bucket_for_mut(&strategy, &key);
            let node = find(chain, &strategy, &key).unwrap();

            // SAFETY: The node is a member of the chain.
            let entry = unsafe { counters.unlink(chain, node) };
            assert_eq!(entry.into_value(), i);
        }
    }
}
