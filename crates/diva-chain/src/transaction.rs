//! Authenticated command batches.

use crate::canonical;
use crate::command::Command;
use crate::error::{ChainError, Result};
use crate::Signer;
use diva_crypto::{PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// Maximum length of a transaction ident.
pub const IDENT_MAX_LEN: usize = 32;

/// Length of generated idents.
const IDENT_GEN_LEN: usize = 8;

const IDENT_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789,_-";

/// A signed batch of commands from a single origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Client-chosen or generated identifier, 1-32 chars of
    /// `[A-Za-z0-9,_-]`.
    pub ident: String,

    /// The signing validator.
    pub origin: PublicKey,

    /// Creation time in unix milliseconds.
    pub timestamp: u64,

    /// Ordered commands, `seq` ascending from 1.
    pub commands: Vec<Command>,

    /// Detached signature over `ident ∥ timestamp ∥ canonical(commands)`.
    pub sig: Signature,
}

impl Transaction {
    /// Builds and signs a transaction.
    pub fn build<S: Signer>(
        signer: &S,
        ident: String,
        timestamp: u64,
        commands: Vec<Command>,
    ) -> Result<Self> {
        validate_ident(&ident)?;
        let payload = canonical::tx_signing_payload(&ident, timestamp, &commands);
        let sig = signer.sign(payload.as_bytes());

        Ok(Self {
            ident,
            origin: signer.public_key(),
            timestamp,
            commands,
            sig,
        })
    }

    /// Verifies the ident shape, command numbering and signature.
    pub fn verify(&self) -> Result<()> {
        validate_ident(&self.ident)?;

        for (i, cmd) in self.commands.iter().enumerate() {
            if cmd.seq as usize != i + 1 {
                return Err(ChainError::InvalidTransaction(format!(
                    "command seq {} at position {}",
                    cmd.seq,
                    i + 1
                )));
            }
        }

        let payload =
            canonical::tx_signing_payload(&self.ident, self.timestamp, &self.commands);
        self.origin
            .verify(payload.as_bytes(), &self.sig)
            .map_err(|_| ChainError::InvalidTransaction("signature".into()))
    }

    /// The pool and dedup key for this transaction.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.origin.to_b64(), self.ident.clone())
    }
}

/// Validates the ident character set and length.
pub fn validate_ident(ident: &str) -> Result<()> {
    if ident.is_empty() || ident.len() > IDENT_MAX_LEN {
        return Err(ChainError::InvalidTransaction(format!(
            "ident length {}",
            ident.len()
        )));
    }
    if !ident
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b',' || b == b'_' || b == b'-')
    {
        return Err(ChainError::InvalidTransaction("ident charset".into()));
    }
    Ok(())
}

/// Generates a random 8-character ident.
#[must_use]
pub fn random_ident() -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    (0..IDENT_GEN_LEN)
        .map(|_| IDENT_ALPHABET[rng.gen_range(0..IDENT_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{number, Op};
    use crate::test_support::keypair;

    fn test_tx(seed: u8) -> Transaction {
        let kp = keypair(seed);
        let commands = number(vec![Op::Data {
            ns: "test".into(),
            base64url: "YWJj".into(),
        }]);
        Transaction::build(&kp, "tx-1".into(), 1_700_000_000_000, commands).unwrap()
    }

    #[test]
    fn build_and_verify() {
        let tx = test_tx(1);
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn tampered_commands_fail_verification() {
        let mut tx = test_tx(1);
        tx.commands[0].op = Op::TestLoad { timestamp: 1 };
        assert!(tx.verify().is_err());
    }

    #[test]
    fn foreign_signature_fails_verification() {
        let mut tx = test_tx(1);
        tx.origin = keypair(2).public_key();
        assert!(tx.verify().is_err());
    }

    #[test]
    fn rejects_bad_ident() {
        assert!(validate_ident("").is_err());
        assert!(validate_ident("has space").is_err());
        assert!(validate_ident(&"x".repeat(33)).is_err());
        assert!(validate_ident("ok,_-123").is_ok());
    }

    #[test]
    fn rejects_gapped_seq() {
        let kp = keypair(1);
        let mut commands = number(vec![
            Op::TestLoad { timestamp: 1 },
            Op::TestLoad { timestamp: 2 },
        ]);
        commands[1].seq = 5;

        let payload = canonical::tx_signing_payload("t", 1, &commands);
        let tx = Transaction {
            ident: "t".into(),
            origin: kp.public_key(),
            timestamp: 1,
            commands,
            sig: kp.sign(payload.as_bytes()),
        };
        assert!(tx.verify().is_err());
    }

    #[test]
    fn random_ident_is_valid() {
        for _ in 0..16 {
            let ident = random_ident();
            assert_eq!(ident.len(), 8);
            assert!(validate_ident(&ident).is_ok());
        }
    }
}
