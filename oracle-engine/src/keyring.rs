//! Keyring access.
//!
//! The keyring backend itself (file-based, test, hardware, ...) is an
//! external collaborator (§1) — this module only defines the capability the
//! core needs (`sign`, `address`) and a minimal backend good enough to boot
//! a `"test"`/`"file"` keyring directory laid out per §6.

use async_trait::async_trait;
use secp256k1::{Message, Secp256k1, SecretKey};

use crate::errors::OracleError;
use crate::settings::{keyring_dir_path, KeyringSettings};

#[async_trait]
pub trait Keyring: Send + Sync {
    async fn sign(&self, bytes: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// This daemon's own chain address, used to fill `OracleReport::provider`.
    fn address(&self) -> String;
}

/// Reads a hex-encoded secp256k1 seed from `<home>/.oracled/keyring-<backend>/<name>`
/// and signs with it directly. Real "test"/"file" backends would additionally
/// handle passphrase-encrypted storage; that plumbing is out of scope here.
pub struct LocalKeyring {
    secret_key: SecretKey,
    address: String,
}

/// Writes a freshly generated secp256k1 seed to `<home>/.oracled/keyring-<backend>/<name>`
/// if that file does not already exist. Used by `oracled init` to scaffold a
/// usable "test"/"file" keyring without requiring an external key management
/// tool for local/dev setups.
pub fn generate_if_missing(home: &std::path::Path, settings: &KeyringSettings) -> Result<(), OracleError> {
    let dir = keyring_dir_path(home, &settings.backend);
    std::fs::create_dir_all(&dir)
        .map_err(|e| OracleError::Fatal(format!("could not create keyring directory: {e}")))?;
    let key_path = dir.join(&settings.name);
    if key_path.exists() {
        return Ok(());
    }
    let secret_key = SecretKey::new(&mut rand::thread_rng());
    std::fs::write(&key_path, hex::encode(secret_key.secret_bytes()))
        .map_err(|e| OracleError::Fatal(format!("could not write key file: {e}")))?;
    Ok(())
}

impl LocalKeyring {
    pub fn load(home: &std::path::Path, settings: &KeyringSettings) -> Result<Self, OracleError> {
        let dir = keyring_dir_path(home, &settings.backend);
        if !dir.is_dir() {
            return Err(OracleError::Fatal(format!(
                "keyring directory does not exist: {}",
                dir.display()
            )));
        }
        let key_path = dir.join(&settings.name);
        let raw = std::fs::read_to_string(&key_path).map_err(|e| {
            OracleError::Fatal(format!("could not read key file {}: {e}", key_path.display()))
        })?;
        let hex_seed = raw.trim().trim_start_matches("0x");
        let bytes = hex::decode(hex_seed)
            .map_err(|e| OracleError::Fatal(format!("key file is not valid hex: {e}")))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| OracleError::Fatal(format!("invalid signing key: {e}")))?;
        let address = derive_address(&secret_key);
        Ok(Self { secret_key, address })
    }

    #[cfg(test)]
    pub fn from_secret(secret_key: SecretKey) -> Self {
        let address = derive_address(&secret_key);
        Self { secret_key, address }
    }
}

fn derive_address(secret_key: &SecretKey) -> String {
    use sha2::{Digest, Sha256};
    let secp = Secp256k1::new();
    let public_key = secp256k1::PublicKey::from_secret_key(&secp, secret_key);
    let digest = Sha256::digest(public_key.serialize());
    format!("oracle1{}", hex::encode(&digest[..20]))
}

#[async_trait]
impl Keyring for LocalKeyring {
    async fn sign(&self, bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        let secp = Secp256k1::new();
        let digest: [u8; 32] = {
            use sha2::{Digest, Sha256};
            Sha256::digest(bytes).into()
        };
        let message = Message::from_digest(digest);
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keyring() -> LocalKeyring {
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        LocalKeyring::from_secret(secret_key)
    }

    #[tokio::test]
    async fn sign_returns_64_byte_compact_signature() {
        let keyring = test_keyring();
        let signature = keyring.sign(b"some report bytes").await.unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn address_is_stable_for_same_key() {
        let a = test_keyring();
        let b = test_keyring();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn load_fails_fatal_when_keyring_dir_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = KeyringSettings {
            backend: "test".to_string(),
            name: "oracle".to_string(),
            passphrase: None,
        };
        let result = LocalKeyring::load(tmp.path(), &settings);
        assert!(matches!(result, Err(OracleError::Fatal(_))));
    }
}
