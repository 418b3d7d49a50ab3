//! # tds-channel
//!
//! Transport layer for the TDS driver.
//!
//! A [`Channel`] owns the TCP (optionally TLS-wrapped) byte stream of one
//! connection and is the only component that touches the socket. Above it,
//! `tds-codec` frames the stream into packets; below it, [`finder`]
//! locates a reachable server address, racing candidates in parallel when
//! multi-subnet failover is enabled.
//!
//! TLS is negotiated *inside* the TDS pre-login exchange on 7.x servers:
//! handshake records travel wrapped in PRELOGIN packets until the session
//! is established, then the stream switches to raw TLS records. The
//! wrapping lives in [`prelogin_wrapper`].

#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod finder;
pub mod fips;
pub mod hostname;
pub mod prelogin_wrapper;

pub use channel::Channel;
pub use config::{SslProtocol, TlsOptions, TrustPolicy};
pub use connector::TlsConnector;
pub use error::{ChannelError, HandshakeStage};
pub use finder::{ConnectOptions, IP_ADDRESS_LIMIT, find_socket};
pub use prelogin_wrapper::TlsPreloginWrapper;
