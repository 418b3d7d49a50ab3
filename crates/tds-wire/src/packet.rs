//! TDS packet header definitions.
//!
//! Every TDS packet starts with a fixed 8-byte header:
//!
//! ```text
//! type:u8  status:u8  length:u16be  spid:u16be  packet_id:u8  window:u8
//! ```
//!
//! Messages span one or more packets; the final packet of a message sets
//! the `END_OF_MESSAGE` status bit.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::WireError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Smallest negotiable TDS packet size.
pub const MIN_PACKET_SIZE: usize = 512;

/// Default negotiated TDS packet size.
pub const DEFAULT_PACKET_SIZE: usize = 8000;

/// Largest negotiable TDS packet size.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Packet size in effect before negotiation completes.
pub const INITIAL_PACKET_SIZE: usize = 4096;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Pre-TDS7 login packet.
    PreTds7Login = 0x02,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular response from the server.
    TabularResult = 0x04,
    /// Attention (cancel) signal.
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// TDS7+ login packet.
    Login7 = 0x10,
    /// SSPI authentication payload.
    Sspi = 0x11,
    /// Pre-login handshake packet.
    PreLogin = 0x12,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x02 => Ok(Self::PreTds7Login),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x08 => Ok(Self::FedAuthToken),
            0x0E => Ok(Self::TransactionManager),
            0x10 => Ok(Self::Login7),
            0x11 => Ok(Self::Sspi),
            0x12 => Ok(Self::PreLogin),
            _ => Err(WireError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Normal packet, more packets follow in this message.
        const NORMAL = 0x00;
        /// Final packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event (sent with attention acknowledgment).
        const IGNORE_EVENT = 0x02;
        /// Reset connection state before processing this message.
        const RESET_CONNECTION = 0x08;
        /// Reset connection state but keep the transaction.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// TDS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet. All packets of a message share the type.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including the header, big-endian on the wire.
    pub length: u16,
    /// Server process ID, echoed by the server for log correlation.
    pub spid: u16,
    /// Packet sequence number; wraps modulo 256.
    pub packet_id: u8,
    /// Window, unused (always 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(WireError::Incomplete {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(WireError::InvalidPacketStatus(status_byte))?;
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Validate the declared length against the negotiated packet size.
    pub fn validate_length(&self, packet_size: usize) -> Result<(), WireError> {
        let length = self.length as usize;
        if length < PACKET_HEADER_SIZE || length > packet_size {
            return Err(WireError::InvalidPacketLength {
                length,
                packet_size,
            });
        }
        Ok(())
    }

    /// Payload length (total length minus the header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Whether this is the final packet of its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::TabularResult,
            status: PacketStatus::END_OF_MESSAGE,
            length: 512,
            spid: 77,
            packet_id: 3,
            window: 0,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let mut cursor = buf.as_ref();
        let decoded = PacketHeader::decode(&mut cursor).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn length_is_big_endian_on_wire() {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::NORMAL, 0x1234);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf[2], 0x12);
        assert_eq!(buf[3], 0x34);
    }

    #[test]
    fn validate_length_bounds() {
        let mut header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::NORMAL, 100);
        assert!(header.validate_length(4096).is_ok());

        header.length = 7;
        assert!(header.validate_length(4096).is_err());

        header.length = 5000;
        assert!(header.validate_length(4096).is_err());
    }

    #[test]
    fn unknown_packet_type_rejected() {
        assert!(PacketType::from_u8(0x12).is_ok());
        assert!(PacketType::from_u8(0x55).is_err());
    }
}
