use std::marker::PhantomData;

use crate::{KeyStrategy, PointerKeys, Result, StripedTable};

/// Capacity used when none is configured.
pub const DEFAULT_CAPACITY: usize = 100;

/// Load factor used when none is configured.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;

/// What a [`StripedTable`] counts when deciding whether it is time to grow.
///
/// The table grows before an insert once the chosen count reaches the resize threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadMetric {
    /// Count entries. Growth then follows the number of stored entries exactly, so a table
    /// created for N entries grows when the N+1st entry arrives.
    #[default]
    Entries,

    /// Count buckets that hold at least one entry. Chains may grow long before this triggers,
    /// since colliding entries do not add to the count.
    UsedBuckets,
}

/// Builder for creating an instance of [`StripedTable`].
///
/// All settings are optional. By default the table is sized for 100 entries, uses a load factor
/// of 0.75, grows based on the number of entries and treats keys as addresses
/// ([`PointerKeys`]).
///
/// # Examples
///
/// ```
/// use striped_table::{BytesKeys, LoadMetric, StripedTable};
///
/// let table = StripedTable::<String>::builder()
///     .capacity(40)
///     .load_metric(LoadMetric::Entries)
///     .strategy(BytesKeys::new())
///     .build()?;
///
/// assert_eq!(table.buckets(), 97);
/// # Ok::<(), striped_table::Error>(())
/// ```
#[derive(Debug)]
#[must_use]
pub struct StripedTableBuilder<V, S = PointerKeys> {
    capacity: usize,
    load_factor: f64,
    load_metric: LoadMetric,
    strategy: S,

    _value: PhantomData<fn() -> V>,
}

impl<V> StripedTableBuilder<V, PointerKeys> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            load_metric: LoadMetric::default(),
            strategy: PointerKeys::new(),
            _value: PhantomData,
        }
    }
}

impl<V, S: KeyStrategy> StripedTableBuilder<V, S> {
    /// How many entries the table should hold before it first grows.
    ///
    /// The bucket count is derived from this and the load factor.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// The ratio of entries to buckets the table is sized for.
    ///
    /// # Panics
    ///
    /// Panics if the load factor is not a finite positive number.
    pub fn load_factor(mut self, load_factor: f64) -> Self {
        assert!(
            load_factor.is_finite() && load_factor > 0.0,
            "load factor must be a finite positive number, got {load_factor}"
        );

        self.load_factor = load_factor;
        self
    }

    /// What the table counts when deciding whether to grow.
    pub fn load_metric(mut self, load_metric: LoadMetric) -> Self {
        self.load_metric = load_metric;
        self
    }

    /// How keys are hashed and compared.
    pub fn strategy<S2: KeyStrategy>(self, strategy: S2) -> StripedTableBuilder<V, S2> {
        StripedTableBuilder {
            capacity: self.capacity,
            load_factor: self.load_factor,
            load_metric: self.load_metric,
            strategy,
            _value: PhantomData,
        }
    }

    /// Builds the table with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the bucket array
    /// cannot be allocated.
    pub fn build(self) -> Result<StripedTable<V, S>> {
        StripedTable::new_inner(
            self.capacity,
            self.load_factor,
            self.load_metric,
            self.strategy,
        )
    }
}
