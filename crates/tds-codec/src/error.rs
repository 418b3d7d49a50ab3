//! Framing error type.

use thiserror::Error;

/// Errors raised by the packet reader and writer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Transport failure.
    #[error(transparent)]
    Channel(#[from] tds_channel::ChannelError),

    /// Wire-format violation.
    #[error(transparent)]
    Wire(#[from] tds_wire::WireError),

    /// The response stream broke an invariant of the TDS framing.
    #[error("invalid TDS stream: {0}")]
    InvalidTds(&'static str),

    /// A mark referenced a packet that has been reclaimed.
    #[error("reader mark is no longer valid")]
    StaleMark,

    /// A write was issued outside `start_message`/`end_message`.
    #[error("no message started")]
    NoMessageStarted,
}
