//! Column-encryption error type.

use thiserror::Error;

/// Errors raised by the Always Encrypted engine.
///
/// These fail the statement that triggered them, never the connection.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No provider registered under the requested key-store name.
    #[error("key store provider not registered: {0}")]
    ProviderNotFound(String),

    /// The column master key could not be used.
    #[error("column master key error: {0}")]
    MasterKey(String),

    /// Every encrypted copy of a CEK failed to decrypt.
    #[error("failed to decrypt column encryption key: {0}")]
    CekDecryptionFailed(String),

    /// Cell encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Cell decryption failed. MAC mismatches surface here without
    /// revealing which byte differed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Cipher metadata was missing or inconsistent.
    #[error("invalid cipher metadata: {0}")]
    InvalidMetadata(String),

    /// The describe-parameter-encryption results did not match the
    /// expected column layout.
    #[error("unexpected server schema: {0}")]
    UnexpectedServerSchema(String),

    /// Enclave attestation failed or was required but not negotiated.
    #[error("enclave attestation failed: {0}")]
    EnclaveAttestationFailed(String),

    /// Configuration problem detected before any crypto ran.
    #[error("encryption configuration error: {0}")]
    Configuration(String),
}
