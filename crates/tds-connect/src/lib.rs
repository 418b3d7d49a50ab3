//! # tds-connect
//!
//! The connection director: everything between a connection string and a
//! ready channel.
//!
//! [`Connection::connect`] resolves and races candidate sockets, runs the
//! pre-login exchange, negotiates encryption (tunneling the TLS handshake
//! through PRELOGIN packets when needed), sends LOGIN7 with its
//! feature-extension blocks, and drives the login token stream, handling
//! environment changes, feature acknowledgments, routing redirects, and
//! federated authentication along the way.
//!
//! Running commands is cooperative: one [`Command`] at a time reads a
//! response, its interrupt flag is observed between packet reads, and a
//! [`TimeoutTimer`] polling in one-second steps turns query timeouts into
//! interrupts. Broken connections can be reattempted under the
//! connect-retry policy with session state restored.

#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod fedauth;
pub mod metadata;
pub mod parser;
pub mod recovery;
pub mod sql_parse;

pub use command::{Command, TimeoutTimer};
pub use config::{
    AuthenticationMethod, AuthenticationScheme, ColumnEncryptionSetting, Config,
};
pub use connection::{Connection, SessionEnvironment};
pub use error::{DriverErrorCode, Error, Result};
pub use fedauth::{BearerTokenProvider, FedAuthToken};
pub use parser::{DefaultTokenHandler, ParseContext, TokenStreamHandler, parse_tokens};
pub use recovery::{ReconnectPolicy, SessionRecoveryState, run_reconnect};
pub use sql_parse::parse_insert_table_name;
