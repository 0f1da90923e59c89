//! The node wallet.
//!
//! The wallet is the only component holding the secret key. It loads
//! (or creates) the key files under `path_keys` and exposes nothing
//! beyond signing and the public key; the key material zeroizes on
//! drop.

use diva_crypto::{KeyStore, Keypair, PublicKey, Result, Signature};
use std::path::Path;

/// Exclusive owner of the node's Ed25519 keypair.
#[derive(Clone)]
pub struct Wallet {
    keypair: Keypair,
}

impl Wallet {
    /// Opens the wallet for `ident`, creating key files on first run.
    pub fn open(path_keys: impl AsRef<Path>, ident: &str) -> Result<Self> {
        let store = KeyStore::open(path_keys)?;
        let keypair = store.load_or_create(ident)?;

        tracing::info!(
            ident,
            public_key = %keypair.public_key(),
            "wallet opened"
        );

        Ok(Self { keypair })
    }

    /// The wallet's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Signs a message with the node key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    /// Closes the wallet. The key material zeroizes when the last
    /// clone drops.
    pub fn close(self) {
        tracing::info!("wallet closed");
        drop(self);
    }
}

impl diva_chain::Signer for Wallet {
    fn public_key(&self) -> PublicKey {
        Wallet::public_key(self)
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Wallet::sign(self, message)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wallet_persists_identity() {
        let tmp = TempDir::new().unwrap();

        let w1 = Wallet::open(tmp.path(), "node").unwrap();
        let pk = w1.public_key();
        w1.close();

        let w2 = Wallet::open(tmp.path(), "node").unwrap();
        assert_eq!(w2.public_key(), pk);
    }

    #[test]
    fn wallet_signs_verifiably() {
        let tmp = TempDir::new().unwrap();
        let wallet = Wallet::open(tmp.path(), "node").unwrap();

        let sig = wallet.sign(b"message");
        assert!(wallet.public_key().verify(b"message", &sig).is_ok());
    }
}
