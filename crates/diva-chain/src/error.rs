//! Consensus error types.

use thiserror::Error;

/// Errors that can occur in the consensus core.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Invalid transaction.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Invalid block.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Invalid vote.
    #[error("invalid vote: {0}")]
    InvalidVote(String),

    /// Invalid genesis document.
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Invalid message envelope.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Message origin is not a registry member.
    #[error("origin not in validator registry: {0}")]
    NotInRegistry(String),

    /// Replayed or reordered message.
    #[error("replay: seq {seq} <= last seq {last} for {origin}")]
    Replay { origin: String, seq: u64, last: u64 },

    /// A transaction with the same (origin, ident) is already pending.
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Confirm carried less stake than the quorum threshold.
    #[error("quorum not reached: {got} of {required}")]
    QuorumNotReached { got: u64, required: u64 },

    /// Block height does not extend the local tip.
    #[error("chain gap: expected height {expected}, got {got}")]
    ChainGap { expected: u64, got: u64 },

    /// Block not found.
    #[error("block not found at height {0}")]
    BlockNotFound(u64),

    /// Storage failure.
    #[error("store error: {0}")]
    Store(String),

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] diva_crypto::CryptoError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ChainError>;

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}
