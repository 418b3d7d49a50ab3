//! The message writer.
//!
//! [`TdsWriter`] stages one outbound message and fragments it into
//! packets of the negotiated size. Sequence numbers increase per packet
//! (wrapping modulo 256), the end-of-message bit lands on the final
//! packet only, and the reset-connection bit, when requested, on the
//! first.

use bytes::{BufMut, BytesMut};

use tds_channel::Channel;
use tds_wire::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::error::CodecError;

/// Writer for one or more outbound messages on a channel.
pub struct TdsWriter<'a> {
    channel: &'a mut Channel,
    message_type: Option<PacketType>,
    staging: BytesMut,
    packet_id: u8,
    first_packet: bool,
    reset_connection: bool,
}

impl<'a> TdsWriter<'a> {
    /// Create a writer over the channel.
    pub fn new(channel: &'a mut Channel) -> Self {
        Self {
            channel,
            message_type: None,
            staging: BytesMut::new(),
            packet_id: 0,
            first_packet: true,
            reset_connection: false,
        }
    }

    /// Begin a message of the given packet type.
    pub fn start_message(&mut self, message_type: PacketType) {
        self.message_type = Some(message_type);
        self.staging.clear();
        self.packet_id = 0;
        self.first_packet = true;
    }

    /// Request the reset-connection bit on the next message's first
    /// packet.
    pub fn set_reset_connection(&mut self, reset: bool) {
        self.reset_connection = reset;
    }

    /// Append raw bytes, flushing filled packets as needed.
    pub async fn write_bytes(&mut self, mut data: &[u8]) -> Result<(), CodecError> {
        if self.message_type.is_none() {
            return Err(CodecError::NoMessageStarted);
        }

        let max_payload = self.channel.packet_size() - PACKET_HEADER_SIZE;
        while !data.is_empty() {
            let room = max_payload - self.staging.len();
            let take = room.min(data.len());
            self.staging.put_slice(&data[..take]);
            data = &data[take..];

            if self.staging.len() == max_payload && !data.is_empty() {
                self.flush_packet(false).await?;
            }
        }
        Ok(())
    }

    /// Append one byte.
    pub async fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bytes(&[value]).await
    }

    /// Append a little-endian u16.
    pub async fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Append a little-endian u32.
    pub async fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Append a little-endian u64.
    pub async fn write_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Append a UTF-16LE string without a length prefix.
    pub async fn write_utf16(&mut self, value: &str) -> Result<(), CodecError> {
        for unit in value.encode_utf16() {
            self.write_bytes(&unit.to_le_bytes()).await?;
        }
        Ok(())
    }

    /// Finish the message: flush the final packet with the
    /// end-of-message bit and count the message as sent.
    pub async fn end_message(&mut self) -> Result<(), CodecError> {
        if self.message_type.is_none() {
            return Err(CodecError::NoMessageStarted);
        }
        self.flush_packet(true).await?;
        self.channel.flush().await?;
        self.channel.note_message_sent();
        self.message_type = None;
        Ok(())
    }

    async fn flush_packet(&mut self, end_of_message: bool) -> Result<(), CodecError> {
        let message_type = self.message_type.ok_or(CodecError::NoMessageStarted)?;

        let mut status = if end_of_message {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        if self.first_packet && self.reset_connection {
            status |= PacketStatus::RESET_CONNECTION;
        }

        self.packet_id = self.packet_id.wrapping_add(1);
        let header = PacketHeader {
            packet_type: message_type,
            status,
            length: (PACKET_HEADER_SIZE + self.staging.len()) as u16,
            spid: 0,
            packet_id: self.packet_id,
            window: 0,
        };

        let mut packet = BytesMut::with_capacity(PACKET_HEADER_SIZE + self.staging.len());
        header.encode(&mut packet);
        packet.put_slice(&self.staging);

        tracing::trace!(
            packet_type = ?message_type,
            packet_id = self.packet_id,
            payload = self.staging.len(),
            eom = end_of_message,
            "sending packet"
        );

        self.channel.write_all(&packet).await?;
        self.staging.clear();
        self.first_packet = false;
        if end_of_message {
            self.reset_connection = false;
        }
        Ok(())
    }
}
