//! # tds-crypto
//!
//! The Always Encrypted column-encryption engine.
//!
//! Column values are protected with `AEAD_AES_256_CBC_HMAC_SHA256`: an
//! encrypt-then-MAC scheme keyed by a 32-byte column encryption key (CEK).
//! CEKs arrive from the server encrypted under a column master key held in
//! an external key store; [`KeyStoreProvider`] implementations decrypt
//! them, and [`cek::resolve_cek`] walks an entry's encrypted copies until
//! one provider succeeds, caching the resulting cipher.
//!
//! Key hierarchy:
//!
//! ```text
//! column master key (external store, never transmitted)
//!   └─ encrypts ─► column encryption key (in server metadata)
//!                    └─ derives ─► enc / MAC / IV keys (per cell cipher)
//! ```

#![warn(missing_docs)]

pub mod aead;
pub mod cek;
pub mod describe;
pub mod enclave;
pub mod error;
pub mod key_store;
pub mod key_unwrap;
pub mod provider;

pub use aead::{AeadCipher, DerivedKeys, EncryptionType};
pub use cek::{CekCache, CekCacheKey, ResolvedCek, resolve_cek, resolve_cek_with};
pub use describe::{DescribeKeyColumn, DescribeParameterColumn};
pub use enclave::{EnclaveConfig, EnclaveProtocol, EnclaveSession};
pub use error::CryptoError;
pub use key_store::InMemoryKeyStore;
pub use key_unwrap::RsaKeyUnwrapper;
pub use provider::{KeyStoreProvider, ProviderRegistry, global_registry};
