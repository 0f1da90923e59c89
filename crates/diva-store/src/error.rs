//! Storage error types.

use thiserror::Error;

/// Errors produced by the RocksDB block store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying RocksDB failure.
    #[error(transparent)]
    RocksDb(#[from] rocksdb::Error),

    /// A required column family is missing from the database.
    #[error("missing column family {0}")]
    MissingColumnFamily(&'static str),

    /// The tip record has the wrong shape.
    #[error("corrupted tip record: {0}")]
    CorruptedMeta(&'static str),

    /// A stored block failed to decode.
    #[error("corrupted block at height {height}: {source}")]
    CorruptedBlock {
        height: u64,
        #[source]
        source: serde_json::Error,
    },

    /// A write would leave a hole in the height sequence.
    #[error("non-contiguous write at height {height} (expected {expected})")]
    NonContiguous { height: u64, expected: u64 },
}

impl From<StoreError> for diva_chain::ChainError {
    fn from(err: StoreError) -> Self {
        diva_chain::ChainError::Store(err.to_string())
    }
}
