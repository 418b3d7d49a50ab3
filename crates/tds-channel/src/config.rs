//! TLS transport options.

use rustls::pki_types::CertificateDer;

/// TLS protocol selection, mirroring the `sslProtocol` connection keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslProtocol {
    /// Any supported TLS version (1.2 or 1.3).
    #[default]
    Tls,
    /// TLS 1.0. Not supported by the TLS backend.
    Tls10,
    /// TLS 1.1. Not supported by the TLS backend.
    Tls11,
    /// TLS 1.2 only.
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

impl SslProtocol {
    /// Parse the connection-string spelling.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TLS" => Some(Self::Tls),
            "TLSV1" => Some(Self::Tls10),
            "TLSV1.1" => Some(Self::Tls11),
            "TLSV1.2" => Some(Self::Tls12),
            "TLSV1.3" => Some(Self::Tls13),
            _ => None,
        }
    }
}

/// Server certificate validation policy.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// Accept any server certificate without validation.
    Permissive,
    /// Validate against the bundled root store.
    #[default]
    SystemRoots,
    /// Validate against caller-supplied root certificates.
    CustomRoots(Vec<CertificateDer<'static>>),
    /// Validate against the bundled roots, but match the certificate name
    /// against an override instead of the connection host.
    HostNameOverride {
        /// Expected certificate host name.
        name: String,
    },
}

/// Options governing `enable_tls`.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Certificate validation policy.
    pub trust_policy: TrustPolicy,
    /// TLS protocol selection.
    pub ssl_protocol: SslProtocol,
    /// Trust store path, carried for FIPS validation; the store itself is
    /// loaded by the caller into [`TrustPolicy::CustomRoots`].
    pub trust_store: Option<String>,
    /// Trust store password. Zeroed as soon as the store is loaded.
    pub trust_store_password: Option<Vec<u8>>,
    /// Trust store type accompanying `trust_store`.
    pub trust_store_type: Option<String>,
    /// Whether FIPS-compliant operation was requested.
    pub fips: bool,
}

impl TlsOptions {
    /// Overwrite and drop the trust store password.
    ///
    /// Mandatory post-condition of the TLS enablement path.
    pub fn clear_trust_store_password(&mut self) {
        if let Some(password) = self.trust_store_password.as_mut() {
            password.fill(0);
        }
        self.trust_store_password = None;
    }

    /// The certificate name to validate, when overridden.
    #[must_use]
    pub fn host_name_override(&self) -> Option<&str> {
        match &self.trust_policy {
            TrustPolicy::HostNameOverride { name } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_protocol_parsing() {
        assert_eq!(SslProtocol::parse("TLS"), Some(SslProtocol::Tls));
        assert_eq!(SslProtocol::parse("TLSv1.2"), Some(SslProtocol::Tls12));
        assert_eq!(SslProtocol::parse("TLSv1.3"), Some(SslProtocol::Tls13));
        assert_eq!(SslProtocol::parse("TLSv1"), Some(SslProtocol::Tls10));
        assert_eq!(SslProtocol::parse("SSLv3"), None);
    }

    #[test]
    fn password_is_zeroed() {
        let mut options = TlsOptions {
            trust_store_password: Some(b"hunter2".to_vec()),
            ..TlsOptions::default()
        };
        options.clear_trust_store_password();
        assert!(options.trust_store_password.is_none());
    }
}
