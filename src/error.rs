use thiserror::Error;

/// Errors surfaced by the object store, the shape cache and the query engine.
///
/// Administrative code wraps these in `anyhow` with context; library callers
/// decide between abort and retry themselves.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed input rejected before any table was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored or submitted data contradicts itself (dangling placeholder,
    /// mismatched member arrays, undecodable row).
    #[error("data integrity fault: {0}")]
    Integrity(String),

    /// Failure reported by redb, message preserved.
    #[error("backing store failure: {0}")]
    Backend(#[from] redb::Error),

    /// Write attempted on a read-only store or a shared-mode session.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// The output sink could not be written.
    #[error("output sink failed: {0}")]
    Output(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

macro_rules! backend_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for StoreError {
                fn from(e: $t) -> Self {
                    StoreError::Backend(redb::Error::from(e))
                }
            }
        )*
    };
}

backend_from!(
    redb::StorageError,
    redb::TableError,
    redb::TransactionError,
    redb::CommitError,
    redb::DatabaseError,
);

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Integrity(format!("column decode: {e}"))
    }
}
