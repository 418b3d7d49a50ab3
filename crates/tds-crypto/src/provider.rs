//! Key-store providers and the provider registry.
//!
//! A [`KeyStoreProvider`] fronts an external key store holding column
//! master keys. Providers are looked up by the name the server sends in
//! CEK metadata (`AZURE_KEY_VAULT`, `MSSQL_CERTIFICATE_STORE`, ...).
//!
//! The process-wide registry is populated once during driver setup and is
//! read-only afterwards; re-registration is an explicit separate call.
//! Connections may also carry their own [`ProviderRegistry`], which takes
//! precedence over the global one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::CryptoError;

/// Access to a column-master-key store.
///
/// Implementations must never log key material and should zero buffers
/// they no longer need.
#[async_trait]
pub trait KeyStoreProvider: Send + Sync {
    /// The provider name as it appears in server metadata.
    fn provider_name(&self) -> &str;

    /// Decrypt a column encryption key.
    ///
    /// `key_path` locates the master key in the store, `algorithm` names
    /// the wrapping algorithm (e.g. `RSA_OAEP`), and `encrypted_cek` is
    /// the ciphertext from the CEK table.
    async fn decrypt_cek(
        &self,
        key_path: &str,
        algorithm: &str,
        encrypted_cek: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// A named set of key-store providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn KeyStoreProvider>>>,
    registered: AtomicBool,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a set of providers. Fails if the registry was already
    /// populated; use [`re_register`](Self::re_register) to replace.
    pub fn register(
        &self,
        providers: Vec<Arc<dyn KeyStoreProvider>>,
    ) -> Result<(), CryptoError> {
        if self.registered.load(Ordering::Acquire) {
            return Err(CryptoError::Configuration(
                "key store providers are already registered".into(),
            ));
        }
        self.install(providers);
        Ok(())
    }

    /// Replace the registered providers.
    pub fn re_register(&self, providers: Vec<Arc<dyn KeyStoreProvider>>) {
        self.install(providers);
    }

    fn install(&self, providers: Vec<Arc<dyn KeyStoreProvider>>) {
        let mut map = self.providers.write();
        map.clear();
        for provider in providers {
            map.insert(provider.provider_name().to_string(), provider);
        }
        drop(map);
        self.registered.store(true, Ordering::Release);
    }

    /// Whether any providers have been registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Look up a provider by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn KeyStoreProvider>> {
        if !self.is_registered() {
            return None;
        }
        self.providers.read().get(name).cloned()
    }

    /// Registered provider names, for diagnostics.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

/// The process-wide provider registry.
pub fn global_registry() -> &'static ProviderRegistry {
    static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();
    GLOBAL.get_or_init(ProviderRegistry::new)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct DummyProvider(&'static str);

    #[async_trait]
    impl KeyStoreProvider for DummyProvider {
        fn provider_name(&self) -> &str {
            self.0
        }

        async fn decrypt_cek(
            &self,
            _key_path: &str,
            _algorithm: &str,
            _encrypted_cek: &[u8],
        ) -> Result<Vec<u8>, CryptoError> {
            Ok(vec![0u8; 32])
        }
    }

    #[test]
    fn register_once_then_lookup() {
        let registry = ProviderRegistry::new();
        assert!(!registry.is_registered());
        assert!(registry.get("STORE_A").is_none());

        registry
            .register(vec![Arc::new(DummyProvider("STORE_A"))])
            .unwrap();
        assert!(registry.is_registered());
        assert!(registry.get("STORE_A").is_some());
        assert!(registry.get("STORE_B").is_none());
    }

    #[test]
    fn double_register_is_refused() {
        let registry = ProviderRegistry::new();
        registry
            .register(vec![Arc::new(DummyProvider("STORE_A"))])
            .unwrap();
        assert!(registry
            .register(vec![Arc::new(DummyProvider("STORE_B"))])
            .is_err());

        // Explicit re-registration replaces the set.
        registry.re_register(vec![Arc::new(DummyProvider("STORE_B"))]);
        assert!(registry.get("STORE_A").is_none());
        assert!(registry.get("STORE_B").is_some());
    }
}
