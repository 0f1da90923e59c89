//! On-disk key files.
//!
//! A key store directory holds `<ident>.public` (raw 32 bytes, mode
//! 0644) and `<ident>.private` (raw 64 `secret ∥ public` bytes, mode
//! 0600). The pair is created on first use.

use crate::{CryptoError, Keypair, PublicKey, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Loads and creates key files under a fixed directory.
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Creates a key store rooted at `dir`, creating the directory if
    /// missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| keyfile_err(&dir, e))?;
        Ok(Self { dir })
    }

    /// Loads the keypair named `ident`, generating and persisting a
    /// fresh one if no private key file exists.
    pub fn load_or_create(&self, ident: &str) -> Result<Keypair> {
        let private = self.private_path(ident);
        if private.exists() {
            let bytes = fs::read(&private).map_err(|e| keyfile_err(&private, e))?;
            return Keypair::from_keypair_bytes(&bytes);
        }

        let keypair = Keypair::generate();
        self.persist(ident, &keypair)?;
        Ok(keypair)
    }

    /// Reads only the public key file for `ident`.
    pub fn load_public(&self, ident: &str) -> Result<PublicKey> {
        let path = self.public_path(ident);
        let bytes = fs::read(&path).map_err(|e| keyfile_err(&path, e))?;
        PublicKey::from_bytes(&bytes)
    }

    fn persist(&self, ident: &str, keypair: &Keypair) -> Result<()> {
        let public = self.public_path(ident);
        let private = self.private_path(ident);

        fs::write(&public, keypair.public_key().as_bytes())
            .map_err(|e| keyfile_err(&public, e))?;
        fs::write(&private, &*keypair.to_keypair_bytes())
            .map_err(|e| keyfile_err(&private, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&public, fs::Permissions::from_mode(0o644))
                .map_err(|e| keyfile_err(&public, e))?;
            fs::set_permissions(&private, fs::Permissions::from_mode(0o600))
                .map_err(|e| keyfile_err(&private, e))?;
        }

        Ok(())
    }

    fn public_path(&self, ident: &str) -> PathBuf {
        self.dir.join(format!("{ident}.public"))
    }

    fn private_path(&self, ident: &str) -> PathBuf {
        self.dir.join(format!("{ident}.private"))
    }
}

fn keyfile_err(path: &Path, source: std::io::Error) -> CryptoError {
    CryptoError::KeyFile {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn create_then_reload() {
        let tmp = TempDir::new().unwrap();
        let store = KeyStore::open(tmp.path()).unwrap();

        let kp1 = store.load_or_create("node1").unwrap();
        let kp2 = store.load_or_create("node1").unwrap();
        assert_eq!(kp1.public_key(), kp2.public_key());

        let pk = store.load_public("node1").unwrap();
        assert_eq!(pk, kp1.public_key());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = KeyStore::open(tmp.path()).unwrap();
        store.load_or_create("node1").unwrap();

        let mode = std::fs::metadata(tmp.path().join("node1.private"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
