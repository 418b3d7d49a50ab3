//! # tds-codec
//!
//! Packet framing over a [`tds_channel::Channel`].
//!
//! [`TdsReader`] turns the channel's byte stream into typed reads. Inbound
//! packets are buffered in a chain; while the reader is *streaming*,
//! consumed packets are reclaimed eagerly, but taking a [`ReaderMark`]
//! switches to buffering so the read cursor can later be rewound; this is
//! how the row and metadata parsers look ahead.
//!
//! [`TdsWriter`] frames outbound messages, fragmenting payloads at the
//! negotiated packet size and stamping the end-of-message bit on the
//! final packet.

#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod reader;
pub mod writer;

pub use chain::ReaderMark;
pub use error::CodecError;
pub use reader::{ResponseSink, TdsReader};
pub use writer::TdsWriter;
