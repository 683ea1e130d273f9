use std::collections::TryReserveError;

use thiserror::Error;

/// Errors that can occur when creating or growing a [`StripedTable`][crate::StripedTable].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The bucket array (with its per-bucket locks) could not be allocated.
    ///
    /// When this happens during a resize, the table is left exactly as it was.
    #[error("failed to allocate {buckets} hash table buckets")]
    AllocationFailed {
        /// How many buckets the table tried to allocate.
        buckets: usize,

        /// The underlying allocation failure.
        #[source]
        source: TryReserveError,
    },
}

/// A specialized `Result` type for hash table operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
