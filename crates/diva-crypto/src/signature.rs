//! Ed25519 detached signature type.

use crate::b64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An Ed25519 detached signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// The length of a signature in bytes.
    pub const LEN: usize = 64;

    /// The length of the base64url wire form.
    pub const B64_LEN: usize = 86;

    /// Creates a signature from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parses the 86-character base64url wire form.
    pub fn from_b64(s: &str) -> crate::Result<Self> {
        Ok(Self(b64::decode_array(s)?))
    }

    /// Returns the raw bytes of this signature.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Returns the base64url wire form.
    #[must_use]
    pub fn to_b64(&self) -> String {
        b64::encode(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_b64())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Signature::from_b64(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let bytes: [u8; 64] = bytes
                .try_into()
                .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"64"))?;
            Ok(Self(bytes))
        }
    }
}
