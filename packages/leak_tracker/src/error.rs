use thiserror::Error;

/// Errors that can occur when creating a [`Recorder`][crate::Recorder].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The table holding the allocation records could not be created.
    #[error("failed to create the allocation record table")]
    Table(#[from] striped_table::Error),

    /// The pools holding the allocation records could not be created.
    #[error("failed to create the allocation record pools")]
    Pools(#[from] block_pool::Error),
}

/// A specialized `Result` type for leak tracker operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
