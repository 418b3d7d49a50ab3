//! Wire-format error type.

use thiserror::Error;

/// Errors produced while encoding or decoding TDS wire structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Packet type byte is not a known TDS packet type.
    #[error("invalid packet type: {0:#04x}")]
    InvalidPacketType(u8),

    /// Packet status byte carries unknown bits.
    #[error("invalid packet status: {0:#04x}")]
    InvalidPacketStatus(u8),

    /// Packet header declared a length outside `[8, packet_size]`.
    #[error("invalid packet length {length} (packet size {packet_size})")]
    InvalidPacketLength {
        /// Length from the header.
        length: usize,
        /// Currently negotiated packet size.
        packet_size: usize,
    },

    /// Not enough bytes to decode the structure.
    #[error("incomplete data: expected {expected} bytes, have {actual}")]
    Incomplete {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Ran off the end of the payload mid-structure.
    #[error("unexpected end of payload")]
    UnexpectedEof,

    /// First byte of a token is not a known token type.
    #[error("unknown token type: {0:#04x}")]
    UnknownToken(u8),

    /// Pre-login option byte is not recognized.
    #[error("invalid pre-login option: {0:#04x}")]
    InvalidPreloginOption(u8),

    /// A field carried a value outside its legal domain.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },

    /// UTF-16 string data did not decode.
    #[error("invalid UTF-16 string data")]
    InvalidString,

    /// A temporal value was outside its valid range.
    #[error("temporal value out of range: {0}")]
    TemporalOutOfRange(&'static str),
}
