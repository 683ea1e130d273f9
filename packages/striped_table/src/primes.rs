//! Bucket counts. A table only ever has one of these many buckets.

/// Primes roughly doubling in size, each far from the neighboring powers of two.
pub(crate) const BUCKET_COUNTS: [usize; 25] = [
    97,
    193,
    389,
    769,
    1_543,
    3_079,
    6_151,
    12_289,
    24_593,
    49_157,
    98_317,
    196_613,
    393_241,
    786_433,
    1_572_869,
    3_145_739,
    6_291_469,
    12_582_917,
    25_165_843,
    50_331_653,
    100_663_319,
    201_326_611,
    402_653_189,
    805_306_457,
    1_610_612_741,
];

const LARGEST_BUCKET_COUNT: usize = 1_610_612_741;

/// Number of buckets needed to hold `desired` entries without exceeding `load_factor`.
///
/// This is the first prime in [`BUCKET_COUNTS`] that is at least `desired / load_factor`,
/// or the largest one if the request is bigger than that.
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "the result is only a sizing hint, rounding is expected and casts saturate"
)]
pub(crate) fn bucket_count_for(desired: usize, load_factor: f64) -> usize {
    let wanted = (desired as f64 / load_factor) as usize;

    BUCKET_COUNTS
        .iter()
        .copied()
        .find(|&count| count >= wanted)
        .unwrap_or(LARGEST_BUCKET_COUNT)
}

/// The prime that follows `current` in [`BUCKET_COUNTS`], or `None` at the largest one.
pub(crate) fn next_bucket_count(current: usize) -> Option<usize> {
    BUCKET_COUNTS.iter().copied().find(|&count| count > current)
}

/// Number of entries `bucket_count` buckets hold at `load_factor`.
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "the result is only a sizing hint, rounding is expected and casts saturate"
)]
pub(crate) fn entries_for(bucket_count: usize, load_factor: f64) -> usize {
    (bucket_count as f64 * load_factor) as usize
}
