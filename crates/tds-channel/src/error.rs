//! Transport error types.

use thiserror::Error;

/// How far the TLS handshake progressed before failing.
///
/// The classification is assigned when the error is constructed, so
/// callers branch on it rather than on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// No handshake bytes were exchanged; configuration or chain problem.
    NotStarted,
    /// Handshake traffic flowed before the failure.
    Started,
    /// The server closed the stream mid-handshake.
    TruncatedResponse,
}

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Host name did not resolve.
    #[error("could not resolve host {host}: {source}")]
    Resolution {
        /// Host that failed to resolve.
        host: String,
        /// Underlying resolver error.
        source: std::io::Error,
    },

    /// No candidate address accepted a connection within the deadline.
    #[error("connection timed out")]
    ConnectionTimedOut,

    /// A read or write exceeded the network timeout.
    #[error("socket read timed out")]
    Timeout,

    /// The peer closed the stream mid-structure.
    #[error("truncated server response")]
    UnexpectedEof,

    /// Configuration the transport refuses to run with.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// FIPS mode was requested with conflicting settings.
    #[error("invalid FIPS configuration: {0}")]
    InvalidFipsConfig(String),

    /// TLS handshake failed before the session was usable.
    #[error("TLS handshake failed ({stage:?}): {message}")]
    SslFailed {
        /// Handshake progress when the failure occurred.
        stage: HandshakeStage,
        /// Failure description.
        message: String,
    },

    /// TLS failed after handshake traffic started; the caller may retry
    /// the whole open sequence.
    #[error("intermittent TLS failure: {0}")]
    IntermittentTlsFailed(String),

    /// Certificate name validation failed against the expected host name.
    #[error("server certificate name does not match {expected}")]
    CertNameFailed {
        /// Host name the certificate was expected to carry.
        expected: String,
    },

    /// Operation attempted on a closed or wrong-state channel.
    #[error("channel is not connected")]
    NotConnected,

    /// Underlying socket error.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether retrying the full open sequence may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IntermittentTlsFailed(_))
    }
}
