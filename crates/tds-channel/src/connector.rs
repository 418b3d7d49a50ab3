//! rustls connector construction.

use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{SslProtocol, TlsOptions, TrustPolicy};
use crate::error::{ChannelError, HandshakeStage};

/// TLS connector configured from [`TlsOptions`].
pub struct TlsConnector {
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Build a connector for the given options.
    pub fn new(options: &TlsOptions) -> Result<Self, ChannelError> {
        let versions = select_versions(options.ssl_protocol)?;

        let config = match &options.trust_policy {
            TrustPolicy::Permissive => {
                ClientConfig::builder_with_protocol_versions(&versions)
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
                    .with_no_client_auth()
            }
            TrustPolicy::SystemRoots | TrustPolicy::HostNameOverride { .. } => {
                ClientConfig::builder_with_protocol_versions(&versions)
                    .with_root_certificates(bundled_roots())
                    .with_no_client_auth()
            }
            TrustPolicy::CustomRoots(certs) => {
                let mut store = RootCertStore::empty();
                for cert in certs {
                    store.add(cert.clone()).map_err(|e| ChannelError::SslFailed {
                        stage: HandshakeStage::NotStarted,
                        message: format!("invalid root certificate: {e}"),
                    })?;
                }
                ClientConfig::builder_with_protocol_versions(&versions)
                    .with_root_certificates(store)
                    .with_no_client_auth()
            }
        };

        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(config)),
        })
    }

    /// Run the TLS handshake over `stream`.
    ///
    /// `server_name` is used for SNI and certificate validation; with a
    /// host-name override policy the caller passes the override instead
    /// of the connection host.
    pub async fn connect<S>(
        &self,
        stream: S,
        server_name: &str,
    ) -> Result<TlsStream<S>, std::io::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let dns_name = ServerName::try_from(server_name.to_string()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid server name for TLS validation: {server_name}"),
            )
        })?;

        tracing::debug!(server_name = %server_name, "starting TLS handshake");
        self.inner.connect(dns_name, stream).await
    }
}

fn bundled_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

fn select_versions(
    protocol: SslProtocol,
) -> Result<Vec<&'static rustls::SupportedProtocolVersion>, ChannelError> {
    match protocol {
        SslProtocol::Tls => Ok(vec![&rustls::version::TLS12, &rustls::version::TLS13]),
        SslProtocol::Tls12 => Ok(vec![&rustls::version::TLS12]),
        SslProtocol::Tls13 => Ok(vec![&rustls::version::TLS13]),
        SslProtocol::Tls10 | SslProtocol::Tls11 => Err(ChannelError::UnsupportedConfig(
            "TLS 1.0/1.1 are not supported by this driver".into(),
        )),
    }
}

/// Verifier that accepts any server certificate.
///
/// Selected by `trustServerCertificate=true`; signature checks still run
/// so the handshake transcript stays well-formed.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
