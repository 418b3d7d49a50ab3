//! In-memory key store.
//!
//! Holds RSA private keys directly in process memory. Suitable for tests
//! and development only; production deployments implement
//! [`KeyStoreProvider`] over a real key store (Azure Key Vault, an OS
//! certificate store, an HSM).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CryptoError;
use crate::key_unwrap::RsaKeyUnwrapper;
use crate::provider::KeyStoreProvider;

/// Provider name under which the in-memory store registers.
pub const IN_MEMORY_KEY_STORE_NAME: &str = "IN_MEMORY_KEY_STORE";

/// Key store backed by a map of key path to RSA private key.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: HashMap<String, RsaKeyUnwrapper>,
}

impl InMemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a PEM-encoded private key under `key_path`.
    pub fn add_key_pem(&mut self, key_path: &str, pem: &str) -> Result<(), CryptoError> {
        self.keys
            .insert(key_path.to_string(), RsaKeyUnwrapper::from_pem(pem)?);
        Ok(())
    }

    /// Add an already-parsed key under `key_path`.
    pub fn add_key(&mut self, key_path: &str, unwrapper: RsaKeyUnwrapper) {
        self.keys.insert(key_path.to_string(), unwrapper);
    }

    /// Whether a key exists at `key_path`.
    #[must_use]
    pub fn has_key(&self, key_path: &str) -> bool {
        self.keys.contains_key(key_path)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStoreProvider for InMemoryKeyStore {
    fn provider_name(&self) -> &str {
        IN_MEMORY_KEY_STORE_NAME
    }

    async fn decrypt_cek(
        &self,
        key_path: &str,
        _algorithm: &str,
        encrypted_cek: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let unwrapper = self.keys.get(key_path).ok_or_else(|| {
            CryptoError::MasterKey(format!("no key at path {key_path}"))
        })?;
        unwrapper.unwrap_raw(encrypted_cek)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsa::{Oaep, RsaPrivateKey};
    use sha2::Sha256;

    #[tokio::test]
    async fn store_decrypts_wrapped_cek() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();

        let mut store = InMemoryKeyStore::new();
        store.add_key("cmk/test", RsaKeyUnwrapper::from_key(key.clone()));
        assert!(store.has_key("cmk/test"));
        assert_eq!(store.len(), 1);

        let cek = [0x24u8; 32];
        let wrapped = key
            .to_public_key()
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &cek)
            .unwrap();

        let plaintext = store
            .decrypt_cek("cmk/test", "RSA_OAEP", &wrapped)
            .await
            .unwrap();
        assert_eq!(plaintext, cek);
    }

    #[tokio::test]
    async fn unknown_path_errors() {
        let store = InMemoryKeyStore::new();
        assert!(store.decrypt_cek("missing", "RSA_OAEP", &[]).await.is_err());
    }
}
