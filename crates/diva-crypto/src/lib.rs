//! Cryptographic identities for divachain.
//!
//! Every validator is identified by an Ed25519 public key. Keys,
//! signatures and digests travel as unpadded URL-safe base64 strings
//! (43, 86 and 43 characters respectively), so the wire types in this
//! crate serialize to exactly that form.

mod b64;
mod digest;
mod error;
mod keyfile;
mod keypair;
mod public_key;
mod signature;

pub use b64::{decode, decode_array, encode};
pub use digest::Digest;
pub use error::{CryptoError, Result};
pub use keyfile::KeyStore;
pub use keypair::Keypair;
pub use public_key::PublicKey;
pub use signature::Signature;
