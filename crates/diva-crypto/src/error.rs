//! Crypto error types.

use thiserror::Error;

/// Errors produced by key, signature and digest handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The public key bytes are not a valid Ed25519 point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The secret key material has the wrong shape.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// A base64url field could not be decoded or has the wrong length.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Key file I/O failed.
    #[error("key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
