//! CEK resolution and caching.
//!
//! A CEK table entry may carry several encrypted copies of the same key,
//! each pointing at a different key store (master-key rotation leaves two
//! copies live). Resolution walks the copies in wire order: a provider
//! failure is logged and the next copy is tried; only when every copy
//! fails does the last error surface. The first successful decrypt is
//! cached on the resolved entry, so concurrent statements reuse the
//! derived cipher.

use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;

use tds_wire::crypto::CekTableEntry;

use crate::aead::AeadCipher;
use crate::error::CryptoError;
use crate::provider::{ProviderRegistry, global_registry};

/// A CEK table entry with its decrypted key material.
pub struct ResolvedCek {
    /// The cell cipher derived from the plaintext CEK.
    pub cipher: Arc<AeadCipher>,
    /// Key identity, for cache bookkeeping.
    pub key: CekCacheKey,
}

impl std::fmt::Debug for ResolvedCek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCek")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Cache identity of a CEK: database, key id, and key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CekCacheKey {
    /// Database id.
    pub database_id: u32,
    /// CEK id within the database.
    pub cek_id: u32,
    /// CEK version.
    pub cek_version: u32,
}

impl CekCacheKey {
    /// Identity of a wire entry.
    #[must_use]
    pub fn of(entry: &CekTableEntry) -> Self {
        Self {
            database_id: entry.database_id,
            cek_id: entry.cek_id,
            cek_version: entry.cek_version,
        }
    }
}

/// Resolve a CEK entry against the process-wide provider registry.
pub async fn resolve_cek(entry: &CekTableEntry) -> Result<ResolvedCek, CryptoError> {
    resolve_cek_with(entry, global_registry()).await
}

/// Resolve a CEK entry against a specific provider registry.
///
/// Tries each encrypted copy in order. Intermediate failures, including
/// a missing provider, are recorded and logged but only surface when no
/// copy decrypts.
pub async fn resolve_cek_with(
    entry: &CekTableEntry,
    registry: &ProviderRegistry,
) -> Result<ResolvedCek, CryptoError> {
    if entry.encrypted_keys.is_empty() {
        return Err(CryptoError::InvalidMetadata(
            "CEK entry carries no encrypted key values".into(),
        ));
    }

    let mut last_error: Option<CryptoError> = None;

    for encrypted in &entry.encrypted_keys {
        let provider = match registry.get(&encrypted.key_store_name) {
            Some(provider) => provider,
            None => {
                tracing::warn!(
                    key_store = %encrypted.key_store_name,
                    "no provider registered for key store; trying next CEK value"
                );
                last_error = Some(CryptoError::ProviderNotFound(
                    encrypted.key_store_name.clone(),
                ));
                continue;
            }
        };

        match provider
            .decrypt_cek(
                &encrypted.key_path,
                &encrypted.algorithm_name,
                &encrypted.ciphertext,
            )
            .await
        {
            Ok(mut plaintext) => {
                let cipher = AeadCipher::new(&plaintext);
                plaintext.fill(0);
                let cipher = cipher?;
                tracing::debug!(
                    key_store = %encrypted.key_store_name,
                    cek_id = entry.cek_id,
                    cek_version = entry.cek_version,
                    "column encryption key resolved"
                );
                return Ok(ResolvedCek {
                    cipher: Arc::new(cipher),
                    key: CekCacheKey::of(entry),
                });
            }
            Err(e) => {
                tracing::warn!(
                    key_store = %encrypted.key_store_name,
                    key_path = %encrypted.key_path,
                    error = %e,
                    "key store provider failed to decrypt CEK; trying next value"
                );
                last_error = Some(e);
            }
        }
    }

    let detail = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no usable encrypted key values".into());
    Err(CryptoError::CekDecryptionFailed(detail))
}

/// Cache of resolved CEK ciphers, shared by the statements of one
/// connection.
///
/// The connection is the only writer; statements take read snapshots. A
/// racing resolve of the same key does redundant work but is harmless
/// since decryption is deterministic.
#[derive(Default)]
pub struct CekCache {
    entries: RwLock<HashMap<CekCacheKey, Arc<AeadCipher>>>,
}

impl CekCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached cipher for a key, if present.
    #[must_use]
    pub fn get(&self, key: &CekCacheKey) -> Option<Arc<AeadCipher>> {
        self.entries.read().get(key).cloned()
    }

    /// Insert a resolved cipher.
    pub fn insert(&self, resolved: &ResolvedCek) {
        self.entries
            .write()
            .insert(resolved.key, Arc::clone(&resolved.cipher));
    }

    /// Resolve through the cache: hit, or resolve and fill.
    pub async fn get_or_resolve(
        &self,
        entry: &CekTableEntry,
        registry: &ProviderRegistry,
    ) -> Result<Arc<AeadCipher>, CryptoError> {
        let key = CekCacheKey::of(entry);
        if let Some(cipher) = self.get(&key) {
            return Ok(cipher);
        }
        let resolved = resolve_cek_with(entry, registry).await?;
        self.insert(&resolved);
        Ok(resolved.cipher)
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached key.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::aead::EncryptionType;
    use crate::provider::KeyStoreProvider;
    use tds_wire::crypto::EncryptedCek;

    struct FailingProvider {
        name: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyStoreProvider for FailingProvider {
        fn provider_name(&self) -> &str {
            self.name
        }

        async fn decrypt_cek(
            &self,
            _key_path: &str,
            _algorithm: &str,
            _encrypted_cek: &[u8],
        ) -> Result<Vec<u8>, CryptoError> {
            self.calls.fetch_add(1, Ordering::AcqRel);
            Err(CryptoError::MasterKey("key store unavailable".into()))
        }
    }

    struct XorProvider {
        name: &'static str,
    }

    #[async_trait]
    impl KeyStoreProvider for XorProvider {
        fn provider_name(&self) -> &str {
            self.name
        }

        async fn decrypt_cek(
            &self,
            _key_path: &str,
            _algorithm: &str,
            encrypted_cek: &[u8],
        ) -> Result<Vec<u8>, CryptoError> {
            // Test "unwrap": XOR with a fixed pad.
            Ok(encrypted_cek.iter().map(|b| b ^ 0x5A).collect())
        }
    }

    fn entry_with(values: Vec<EncryptedCek>) -> CekTableEntry {
        CekTableEntry {
            database_id: 7,
            cek_id: 1,
            cek_version: 1,
            cek_md_version: [0; 8],
            encrypted_keys: values,
        }
    }

    fn wrapped_cek() -> Vec<u8> {
        // The plaintext CEK is 32 bytes of 0x11; XOR-wrapped for XorProvider.
        vec![0x11 ^ 0x5A; 32]
    }

    #[tokio::test]
    async fn failover_to_second_value_succeeds() {
        let registry = ProviderRegistry::new();
        let failing = Arc::new(FailingProvider {
            name: "BROKEN_STORE",
            calls: AtomicUsize::new(0),
        });
        registry
            .register(vec![
                failing.clone(),
                Arc::new(XorProvider { name: "GOOD_STORE" }),
            ])
            .unwrap();

        let entry = entry_with(vec![
            EncryptedCek {
                ciphertext: Bytes::from(wrapped_cek()),
                key_store_name: "BROKEN_STORE".into(),
                key_path: "path/a".into(),
                algorithm_name: "RSA_OAEP".into(),
            },
            EncryptedCek {
                ciphertext: Bytes::from(wrapped_cek()),
                key_store_name: "GOOD_STORE".into(),
                key_path: "path/b".into(),
                algorithm_name: "RSA_OAEP".into(),
            },
        ]);

        // First provider errors, second succeeds; no error escapes.
        let resolved = resolve_cek_with(&entry, &registry).await.unwrap();
        assert_eq!(failing.calls.load(Ordering::Acquire), 1);

        // The resolved cipher is usable end to end.
        let cell = resolved
            .cipher
            .encrypt(b"a", EncryptionType::Deterministic)
            .unwrap();
        assert_eq!(resolved.cipher.decrypt(&cell).unwrap(), b"a");
    }

    #[tokio::test]
    async fn all_values_failing_surfaces_last_error() {
        let registry = ProviderRegistry::new();
        registry
            .register(vec![Arc::new(FailingProvider {
                name: "BROKEN_STORE",
                calls: AtomicUsize::new(0),
            })])
            .unwrap();

        let entry = entry_with(vec![EncryptedCek {
            ciphertext: Bytes::from(wrapped_cek()),
            key_store_name: "BROKEN_STORE".into(),
            key_path: "path/a".into(),
            algorithm_name: "RSA_OAEP".into(),
        }]);

        let err = resolve_cek_with(&entry, &registry).await.unwrap_err();
        assert!(matches!(err, CryptoError::CekDecryptionFailed(_)));
    }

    #[tokio::test]
    async fn missing_provider_falls_through() {
        let registry = ProviderRegistry::new();
        registry
            .register(vec![Arc::new(XorProvider { name: "GOOD_STORE" })])
            .unwrap();

        let entry = entry_with(vec![
            EncryptedCek {
                ciphertext: Bytes::from(wrapped_cek()),
                key_store_name: "UNREGISTERED".into(),
                key_path: "path/a".into(),
                algorithm_name: "RSA_OAEP".into(),
            },
            EncryptedCek {
                ciphertext: Bytes::from(wrapped_cek()),
                key_store_name: "GOOD_STORE".into(),
                key_path: "path/b".into(),
                algorithm_name: "RSA_OAEP".into(),
            },
        ]);

        assert!(resolve_cek_with(&entry, &registry).await.is_ok());
    }

    #[tokio::test]
    async fn cache_reuses_resolved_cipher() {
        let registry = ProviderRegistry::new();
        registry
            .register(vec![Arc::new(XorProvider { name: "GOOD_STORE" })])
            .unwrap();

        let entry = entry_with(vec![EncryptedCek {
            ciphertext: Bytes::from(wrapped_cek()),
            key_store_name: "GOOD_STORE".into(),
            key_path: "path".into(),
            algorithm_name: "RSA_OAEP".into(),
        }]);

        let cache = CekCache::new();
        let first = cache.get_or_resolve(&entry, &registry).await.unwrap();
        let second = cache.get_or_resolve(&entry, &registry).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn empty_entry_is_invalid_metadata() {
        let registry = ProviderRegistry::new();
        let entry = entry_with(vec![]);
        let err = resolve_cek_with(&entry, &registry).await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidMetadata(_)));
    }
}
