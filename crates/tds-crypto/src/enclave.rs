//! Secure-enclave session capability.
//!
//! Some operations over encrypted columns must be evaluated inside a
//! server-side trusted enclave. The driver negotiates an attestation URL
//! and protocol at connect time; the attestation exchange itself happens
//! outside this crate, which only models the resulting session as an
//! opaque capability gating enclave-required operations.

use crate::error::CryptoError;

/// Attestation protocol for enclave verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnclaveProtocol {
    /// Host Guardian Service attestation.
    Hgs,
    /// Azure attestation service.
    Aas,
    /// No attestation (enclave features disabled).
    None,
}

impl EnclaveProtocol {
    /// Parse the connection-string spelling.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HGS" => Some(Self::Hgs),
            "AAS" => Some(Self::Aas),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }
}

/// Enclave attestation configuration.
#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    /// Attestation endpoint.
    pub attestation_url: Option<String>,
    /// Attestation protocol.
    pub protocol: EnclaveProtocol,
}

impl EnclaveConfig {
    /// Configuration with enclaves disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            attestation_url: None,
            protocol: EnclaveProtocol::None,
        }
    }

    /// Whether an attestation handshake is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.attestation_url.is_some() && self.protocol != EnclaveProtocol::None
    }

    /// Validate that the URL and protocol are set together.
    pub fn validate(&self) -> Result<(), CryptoError> {
        match (&self.attestation_url, self.protocol) {
            (Some(_), EnclaveProtocol::None) => Err(CryptoError::Configuration(
                "enclaveAttestationUrl requires an attestation protocol".into(),
            )),
            (None, EnclaveProtocol::Hgs | EnclaveProtocol::Aas) => {
                Err(CryptoError::Configuration(
                    "enclave attestation protocol requires enclaveAttestationUrl".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// An attested enclave session.
#[derive(Debug, Clone)]
pub struct EnclaveSession {
    session_id: Vec<u8>,
}

impl EnclaveSession {
    /// Wrap an attested session identifier.
    #[must_use]
    pub fn new(session_id: Vec<u8>) -> Self {
        Self { session_id }
    }

    /// Opaque session identifier for request headers.
    #[must_use]
    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }
}

/// Gate an enclave-required operation on an attested session.
pub fn require_enclave(session: Option<&EnclaveSession>) -> Result<&EnclaveSession, CryptoError> {
    session.ok_or_else(|| {
        CryptoError::EnclaveAttestationFailed(
            "operation requires a secure enclave but no session is attested".into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing() {
        assert_eq!(EnclaveProtocol::parse("HGS"), Some(EnclaveProtocol::Hgs));
        assert_eq!(EnclaveProtocol::parse("aas"), Some(EnclaveProtocol::Aas));
        assert_eq!(EnclaveProtocol::parse("bogus"), None);
    }

    #[test]
    fn config_validation() {
        assert!(EnclaveConfig::disabled().validate().is_ok());

        let url_only = EnclaveConfig {
            attestation_url: Some("https://attest.example.net".into()),
            protocol: EnclaveProtocol::None,
        };
        assert!(url_only.validate().is_err());

        let protocol_only = EnclaveConfig {
            attestation_url: None,
            protocol: EnclaveProtocol::Hgs,
        };
        assert!(protocol_only.validate().is_err());

        let complete = EnclaveConfig {
            attestation_url: Some("https://attest.example.net".into()),
            protocol: EnclaveProtocol::Aas,
        };
        assert!(complete.validate().is_ok());
        assert!(complete.is_enabled());
    }

    #[test]
    fn gate_requires_session() {
        assert!(require_enclave(None).is_err());
        let session = EnclaveSession::new(vec![1, 2, 3]);
        let gated = require_enclave(Some(&session)).map(|s| s.session_id().to_vec());
        assert_eq!(gated.ok(), Some(vec![1, 2, 3]));
    }
}
