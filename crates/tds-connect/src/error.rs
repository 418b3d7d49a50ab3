//! Driver error type and stable error codes.

use thiserror::Error;

use tds_channel::ChannelError;
use tds_codec::CodecError;
use tds_crypto::CryptoError;
use tds_wire::WireError;
use tds_wire::token::ServerError;

/// Stable error classification.
///
/// Codes are assigned where the error is constructed; retry and recovery
/// decisions branch on these, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorCode {
    /// Socket-level I/O failure.
    IoFailed,
    /// TLS handshake failed before it started.
    SslFailed,
    /// TLS failed after the handshake started; the open may be retried.
    IntermittentTlsFailed,
    /// A read exceeded the socket timeout.
    SocketTimeout,
    /// Configuration the driver refuses to run with.
    UnsupportedConfig,
    /// The response violated the TDS protocol.
    InvalidTds,
    /// Column encryption was requested but the server did not
    /// acknowledge the feature.
    AeNotSupportedByServer,
    /// Required encryption could not be negotiated.
    EncryptionMismatch,
    /// Certificate name validation failed.
    CertNameFailed,
    /// The query timed out and was interrupted.
    QueryTimedOut,
    /// Waiting for the attention acknowledgment timed out.
    AttentionTimedOut,
    /// The connection is terminated; no further operations run.
    ConnectionClosed,
    /// Login was rejected.
    LoginFailed,
    /// Federated-auth token acquisition failed.
    FedAuthFailed,
    /// The server declined session recovery when it was required.
    RecoveryDeclined,
    /// Server-side SQL error.
    ServerError,
    /// Column-encryption failure scoped to one statement.
    CryptoFailed,
    /// Invalid configuration value.
    Config,
}

/// Driver result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the connection director.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration, detected before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Framing failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Wire-format failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Column-encryption failure. Fails the statement, not the
    /// connection.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The server reported an error.
    #[error("server error {number}: {message}")]
    Server {
        /// Server error number.
        number: i32,
        /// Severity class.
        class: u8,
        /// Error state.
        state: u8,
        /// Message text.
        message: String,
        /// Reporting server.
        server: Option<String>,
        /// Procedure, when raised inside one.
        procedure: Option<String>,
        /// Line number.
        line: i32,
    },

    /// Login was rejected without a server error token.
    #[error("login failed: {0}")]
    Login(String),

    /// Federated-auth token acquisition failed.
    #[error("federated authentication failed: {0}")]
    FedAuth(String),

    /// The client requires encryption but the server does not support
    /// it (or vice versa).
    #[error("encryption required but not supported by the peer")]
    EncryptionRequiredButNotSupported,

    /// Column encryption was requested but the server never acknowledged
    /// the feature extension.
    #[error("column encryption is not supported by the server")]
    ColumnEncryptionNotSupportedByServer,

    /// An unknown token type byte appeared in the response stream.
    #[error("unexpected TDS token {0:#04x}")]
    InvalidTdsToken(u8),

    /// The query timed out.
    #[error("the query has timed out")]
    QueryTimedOut,

    /// The attention acknowledgment did not arrive within the
    /// cancel-query timeout.
    #[error("timed out waiting for the attention acknowledgment")]
    AttentionTimedOut,

    /// The connection is closed.
    #[error("the connection is closed")]
    ConnectionClosed,

    /// The server redirected the connection.
    #[error("connection routed to {host}:{port}")]
    RoutingRedirect {
        /// Redirect target host.
        host: String,
        /// Redirect target port.
        port: u16,
    },

    /// Session recovery was requested but declined by the server.
    #[error("session recovery was declined by the server")]
    RecoveryDeclined,
}

impl Error {
    /// Build a server error from the wire token.
    #[must_use]
    pub fn from_server_error(e: &ServerError) -> Self {
        Self::Server {
            number: e.number,
            class: e.class,
            state: e.state,
            message: e.message.clone(),
            server: (!e.server.is_empty()).then(|| e.server.clone()),
            procedure: (!e.procedure.is_empty()).then(|| e.procedure.clone()),
            line: e.line,
        }
    }

    /// Stable code for this error.
    #[must_use]
    pub fn code(&self) -> DriverErrorCode {
        match self {
            Self::Config(_) => DriverErrorCode::Config,
            Self::Channel(e) => match e {
                ChannelError::Timeout => DriverErrorCode::SocketTimeout,
                ChannelError::ConnectionTimedOut => DriverErrorCode::SocketTimeout,
                ChannelError::IntermittentTlsFailed(_) => DriverErrorCode::IntermittentTlsFailed,
                ChannelError::SslFailed { .. } => DriverErrorCode::SslFailed,
                ChannelError::CertNameFailed { .. } => DriverErrorCode::CertNameFailed,
                ChannelError::UnsupportedConfig(_) | ChannelError::InvalidFipsConfig(_) => {
                    DriverErrorCode::UnsupportedConfig
                }
                _ => DriverErrorCode::IoFailed,
            },
            Self::Codec(e) => match e {
                CodecError::Channel(ChannelError::Timeout) => DriverErrorCode::SocketTimeout,
                CodecError::Channel(_) => DriverErrorCode::IoFailed,
                _ => DriverErrorCode::InvalidTds,
            },
            Self::Wire(_) | Self::InvalidTdsToken(_) => DriverErrorCode::InvalidTds,
            Self::Crypto(_) => DriverErrorCode::CryptoFailed,
            Self::Server { .. } => DriverErrorCode::ServerError,
            Self::Login(_) => DriverErrorCode::LoginFailed,
            Self::FedAuth(_) => DriverErrorCode::FedAuthFailed,
            Self::EncryptionRequiredButNotSupported => DriverErrorCode::EncryptionMismatch,
            Self::ColumnEncryptionNotSupportedByServer => DriverErrorCode::AeNotSupportedByServer,
            Self::QueryTimedOut => DriverErrorCode::QueryTimedOut,
            Self::AttentionTimedOut => DriverErrorCode::AttentionTimedOut,
            Self::ConnectionClosed => DriverErrorCode::ConnectionClosed,
            Self::RoutingRedirect { .. } => DriverErrorCode::IoFailed,
            Self::RecoveryDeclined => DriverErrorCode::RecoveryDeclined,
        }
    }

    /// Whether reopening the connection may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code(),
            DriverErrorCode::IoFailed
                | DriverErrorCode::SocketTimeout
                | DriverErrorCode::IntermittentTlsFailed
                | DriverErrorCode::ConnectionClosed
        )
    }

    /// Whether the error terminates the connection.
    #[must_use]
    pub fn is_fatal_to_connection(&self) -> bool {
        match self {
            Self::Crypto(_) => false,
            Self::Server { class, .. } => *class >= 20,
            Self::Channel(_) | Self::Codec(_) | Self::ConnectionClosed => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::QueryTimedOut.code(),
            DriverErrorCode::QueryTimedOut
        );
        assert_eq!(
            Error::Channel(ChannelError::IntermittentTlsFailed("eof".into())).code(),
            DriverErrorCode::IntermittentTlsFailed
        );
        assert_eq!(
            Error::ColumnEncryptionNotSupportedByServer.code(),
            DriverErrorCode::AeNotSupportedByServer
        );
    }

    #[test]
    fn intermittent_tls_is_transient() {
        let e = Error::Channel(ChannelError::IntermittentTlsFailed("eof".into()));
        assert!(e.is_transient());

        let fatal = Error::Channel(ChannelError::SslFailed {
            stage: tds_channel::HandshakeStage::NotStarted,
            message: "bad chain".into(),
        });
        assert!(!fatal.is_transient());
    }

    #[test]
    fn crypto_errors_do_not_kill_the_connection() {
        let e = Error::Crypto(CryptoError::DecryptionFailed("tag mismatch".into()));
        assert!(!e.is_fatal_to_connection());
    }

    #[test]
    fn severe_server_errors_terminate() {
        let mild = Error::Server {
            number: 8134,
            class: 16,
            state: 1,
            message: "divide by zero".into(),
            server: None,
            procedure: None,
            line: 1,
        };
        assert!(!mild.is_fatal_to_connection());

        let fatal = Error::Server {
            number: 17,
            class: 20,
            state: 1,
            message: "fatal".into(),
            server: None,
            procedure: None,
            line: 1,
        };
        assert!(fatal.is_fatal_to_connection());
    }
}
