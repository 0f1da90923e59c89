//! Ed25519 public key for verification.

use crate::{b64, CryptoError, Result, Signature};
use ed25519_dalek::{Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An Ed25519 public key identifying a validator.
///
/// Ordering compares the base64url encodings, which is the sort order
/// blocks use for their transaction lists.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// The length of a public key in bytes.
    pub const LEN: usize = 32;

    /// The length of the base64url wire form.
    pub const B64_LEN: usize = 43;

    pub(crate) fn from_verifying_key(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Creates a public key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not represent a valid public key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(CryptoError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);

        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        Ok(Self { key })
    }

    /// Parses the 43-character base64url wire form.
    pub fn from_b64(s: &str) -> Result<Self> {
        let arr: [u8; 32] = b64::decode_array(s)?;
        Self::from_bytes(&arr)
    }

    /// Returns the raw bytes of this public key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    /// Returns the base64url wire form.
    #[must_use]
    pub fn to_b64(&self) -> String {
        b64::encode(self.as_bytes())
    }

    /// Returns a short identifier for logs (first 6 bytes as hex).
    #[must_use]
    pub fn short_id(&self) -> String {
        hex::encode(&self.as_bytes()[..6])
    }

    /// Verifies a detached signature against a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is invalid.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.key
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_b64().cmp(&other.to_b64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short_id())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_b64())
        } else {
            serializer.serialize_bytes(self.as_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            PublicKey::from_b64(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; 32]>::deserialize(deserializer)?;
            PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;

    #[test]
    fn public_key_wire_form() {
        let kp = Keypair::from_secret_bytes(&[42u8; 32]).unwrap();
        let pk = kp.public_key();
        let b64 = pk.to_b64();
        assert_eq!(b64.len(), PublicKey::B64_LEN);

        let parsed = PublicKey::from_b64(&b64).unwrap();
        assert_eq!(pk, parsed);
    }

    #[test]
    fn public_key_serde_json() {
        let kp = Keypair::from_secret_bytes(&[7u8; 32]).unwrap();
        let pk = kp.public_key();

        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json.len(), PublicKey::B64_LEN + 2);
        let pk2: PublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(pk, pk2);
    }

    #[test]
    fn ordering_follows_wire_form() {
        let a = Keypair::from_secret_bytes(&[1u8; 32]).unwrap().public_key();
        let b = Keypair::from_secret_bytes(&[2u8; 32]).unwrap().public_key();
        assert_eq!(a.cmp(&b), a.to_b64().cmp(&b.to_b64()));
    }
}
