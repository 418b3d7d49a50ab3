//! # tds-wire
//!
//! Pure implementation of the MS-TDS (Tabular Data Stream) wire format used
//! by Microsoft SQL Server.
//!
//! This crate is intentionally IO-agnostic: it defines the packet header,
//! the response token structures, the pre-login and LOGIN7 handshake
//! payloads, the Always Encrypted key metadata, and the temporal value
//! encodings, all as plain encoders/decoders over [`bytes::Buf`] and
//! [`bytes::BufMut`]. Higher-level crates supply the transport.
//!
//! Layering:
//!
//! ```text
//! tds-connect (connection director, token parsing loop)
//!     │
//! tds-codec   (packet chain reader / writer)
//!     │
//! tds-channel (TCP / TLS byte stream)
//!     │
//! tds-wire    (this crate: byte-level formats only)
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod crypto;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod sql_batch;
pub mod temporal;
pub mod token;
pub mod types;
pub mod version;

pub use error::WireError;
pub use login7::{FeatureExtension, FeatureId, Login7};
pub use packet::{
    DEFAULT_PACKET_SIZE, INITIAL_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE,
    PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use token::{
    Done, DoneStatus, EnvChange, EnvChangeType, EnvChangeValue, FeatureAck, FedAuthInfo,
    LoginAck, ServerError, ServerInfo, SqlIdentifier, TokenType,
};
pub use types::{Guid, SqlDecimal, TypeId};
pub use version::TdsVersion;

pub use crypto::{
    ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256, COLUMN_FLAG_ENCRYPTED, CekTable, CekTableEntry,
    CryptoMetadata, EncryptedCek, EncryptionTypeWire, NORMALIZATION_RULE_VERSION,
    column_is_encrypted,
};
