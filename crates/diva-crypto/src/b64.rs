//! Unpadded URL-safe base64, the wire encoding for all key material.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::{CryptoError, Result};

/// Encodes bytes as unpadded URL-safe base64.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes an unpadded URL-safe base64 string.
pub fn decode(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Decodes into a fixed-size array, rejecting length mismatches.
pub fn decode_array<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = decode(s)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidEncoding(format!("expected {N} bytes, got {len}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let bytes = [7u8; 32];
        let s = encode(&bytes);
        assert_eq!(s.len(), 43);
        assert!(!s.contains('='));
        assert_eq!(decode(&s).unwrap(), bytes);
    }

    #[test]
    fn decode_array_rejects_wrong_length() {
        let s = encode(&[1u8; 16]);
        assert!(decode_array::<32>(&s).is_err());
    }
}
