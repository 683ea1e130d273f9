use std::fmt;
use std::hash::BuildHasher;

use foldhash::fast::FixedState;

/// Decides how keys are hashed and compared by a [`StripedTable`][crate::StripedTable].
///
/// The strategy is fixed when the table is created. Both methods receive keys as raw bytes;
/// the bucket of a key is `hash(key) % buckets`.
///
/// Implementations must be consistent: if `eq(a, b)` holds then `hash(a) == hash(b)`.
/// Comparing keys of unexpected shape must return `false` and must never read outside the
/// provided slices.
pub trait KeyStrategy: Send + Sync {
    /// Hashes a key.
    fn hash(&self, key: &[u8]) -> u64;

    /// Whether the key stored in an entry matches the key being looked up.
    fn eq(&self, stored: &[u8], probe: &[u8]) -> bool;
}

/// Multiplier for multiplicative hashing; a prime close to 2^64 divided by the golden ratio.
const GOLDEN_RATIO_PRIME_64: u64 = 0x9e37_ffff_fffc_0001;

/// Key strategy for keys that are machine-word sized addresses.
///
/// Hashing multiplies the address by a golden-ratio prime. Keys of any length other than
/// `size_of::<usize>()` never compare equal to anything, so a malformed probe is simply
/// "not found".
///
/// This is the default strategy of [`StripedTable`][crate::StripedTable].
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct PointerKeys;

impl PointerKeys {
    /// Creates the strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encodes an address as a key understood by this strategy.
    #[must_use]
    pub fn key_of<T: ?Sized>(ptr: *const T) -> [u8; size_of::<usize>()] {
        ptr.cast::<u8>().addr().to_ne_bytes()
    }
}

impl KeyStrategy for PointerKeys {
    fn hash(&self, key: &[u8]) -> u64 {
        let value = match <[u8; size_of::<usize>()]>::try_from(key) {
            Ok(bytes) => u64::try_from(usize::from_ne_bytes(bytes))
                .expect("usize always fits into u64 on supported targets"),
            // Malformed keys never match anything, so any stable bucket will do.
            Err(_) => u64::try_from(key.len()).expect("usize always fits into u64"),
        };

        value.wrapping_mul(GOLDEN_RATIO_PRIME_64)
    }

    fn eq(&self, stored: &[u8], probe: &[u8]) -> bool {
        stored.len() == size_of::<usize>() && stored == probe
    }
}

/// Key strategy for arbitrary byte-string keys, hashed with `foldhash`.
///
/// Keys compare equal when they have the same length and the same content.
#[derive(Clone)]
pub struct BytesKeys {
    hasher: FixedState,
}

impl BytesKeys {
    /// Creates the strategy with a fixed default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Creates the strategy with a specific seed, changing which bucket each key lands in.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            hasher: FixedState::with_seed(seed),
        }
    }
}

impl Default for BytesKeys {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BytesKeys {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesKeys").finish_non_exhaustive()
    }
}

impl KeyStrategy for BytesKeys {
    fn hash(&self, key: &[u8]) -> u64 {
        self.hasher.hash_one(key)
    }

    fn eq(&self, stored: &[u8], probe: &[u8]) -> bool {
        stored == probe
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::ptr;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PointerKeys: Send, Sync, fmt::Debug, Copy, Default);
    assert_impl_all!(BytesKeys: Send, Sync, fmt::Debug, Clone, Default);

    #[test]
    fn pointer_keys_compare_word_sized_keys() {
        let strategy = PointerKeys::new();
        let a = PointerKeys::key_of(ptr::without_provenance::<u8>(0xAAAA));
        let b = PointerKeys::key_of(ptr::without_provenance::<u8>(0xBBBB));

        assert!(strategy.eq(&a, &a));
        assert!(!strategy.eq(&a, &b));
    }

    #[test]
    fn pointer_keys_reject_other_lengths() {
        let strategy = PointerKeys::new();
        let short = [1_u8, 2, 3];

        assert!(!strategy.eq(&short, &short));
        assert!(!strategy.eq(&[], &[]));
    }

    #[test]
    fn pointer_keys_hash_is_deterministic() {
        let strategy = PointerKeys::new();
        let key = PointerKeys::key_of(ptr::without_provenance::<u8>(0x1000));

        assert_eq!(strategy.hash(&key), strategy.hash(&key));
        assert_eq!(
            strategy.hash(&key),
            0x1000_u64.wrapping_mul(GOLDEN_RATIO_PRIME_64)
        );
    }

    #[test]
    fn pointer_keys_hash_malformed_keys_without_panicking() {
        let strategy = PointerKeys::new();

        _ = strategy.hash(&[]);
        _ = strategy.hash(&[0_u8; 32]);
    }

    #[test]
    fn bytes_keys_compare_content() {
        let strategy = BytesKeys::new();

        assert!(strategy.eq(b"alpha", b"alpha"));
        assert!(!strategy.eq(b"alpha", b"alph"));
        assert!(!strategy.eq(b"alpha", b"omega"));
    }

    #[test]
    fn bytes_keys_equal_keys_hash_equal() {
        let strategy = BytesKeys::with_seed(42);

        assert_eq!(strategy.hash(b"key"), strategy.hash(b"key"));
    }

    #[test]
    fn bytes_keys_seed_is_part_of_the_state() {
        let a = BytesKeys::with_seed(1);
        let b = BytesKeys::with_seed(1);

        assert_eq!(a.hash(b"same"), b.hash(b"same"));
    }
}
