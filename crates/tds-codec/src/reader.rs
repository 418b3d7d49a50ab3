//! The recoverable response reader.
//!
//! [`TdsReader`] consumes one response message: it pulls packets from the
//! channel on demand, validates their headers, and exposes typed reads
//! that span packet boundaries. Pulling the next packet is the only await
//! point that can block on the network; those reads are issued in short
//! slices so a pending command interrupt is observed within a second and
//! answered with an attention packet.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tokio::time::Instant;

use tds_channel::Channel;
use tds_channel::channel::READ_POLL_SLICE;
use tds_wire::packet::{PACKET_HEADER_SIZE, PacketHeader};
use tds_wire::temporal;
use tds_wire::token::SqlIdentifier;
use tds_wire::types::{Guid, SqlDecimal};
use tds_wire::WireError;

use crate::chain::{PacketChain, ReaderMark};
use crate::error::CodecError;

/// Command-side observer of response progress.
///
/// The reader polls it between packet-read slices: a pending interrupt
/// triggers exactly one attention packet, and the end of the response
/// message is reported back. Implementations are shared with timer
/// tasks, hence the `Send + Sync` bound.
pub trait ResponseSink: Send + Sync {
    /// Whether the command is still reading its response. Returning
    /// `false` stops further packet pulls.
    fn reading_response(&self) -> bool {
        true
    }

    /// Whether an interrupt (cancel or timeout) is pending.
    fn interrupt_pending(&self) -> bool {
        false
    }

    /// Whether the attention packet for the pending interrupt went out.
    fn attention_sent(&self) -> bool {
        false
    }

    /// Record that the attention packet went out.
    fn note_attention_sent(&self) {}

    /// The end-of-message packet of the response arrived.
    fn on_response_eom(&self) {}
}

/// Sentinel slot index for a mark taken before any packet was read.
const MARK_AT_START: usize = usize::MAX;

/// Typed reader over one response message.
pub struct TdsReader<'a> {
    channel: &'a mut Channel,
    sink: Option<&'a dyn ResponseSink>,
    chain: PacketChain,
    first: Option<usize>,
    current: Option<usize>,
    tail: Option<usize>,
    /// Oldest slot still buffered; start of the reclaimable range.
    oldest: Option<usize>,
    offset: usize,
    streaming: bool,
    final_packet_seen: bool,
    packets_read: u64,
    /// Bumped whenever streaming reclaims packets; invalidates
    /// start-of-stream marks.
    marks_epoch: u32,
}

impl<'a> TdsReader<'a> {
    /// Create a reader over the channel.
    pub fn new(channel: &'a mut Channel) -> Self {
        Self {
            channel,
            sink: None,
            chain: PacketChain::new(),
            first: None,
            current: None,
            tail: None,
            oldest: None,
            offset: 0,
            streaming: true,
            final_packet_seen: false,
            packets_read: 0,
            marks_epoch: 0,
        }
    }

    /// Create a reader reporting progress to a command sink.
    pub fn with_sink(channel: &'a mut Channel, sink: &'a dyn ResponseSink) -> Self {
        let mut reader = Self::new(channel);
        reader.sink = Some(sink);
        reader
    }

    /// Number of packets consumed so far.
    #[must_use]
    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Peek at the next token type byte without consuming it.
    ///
    /// Returns `None` at the end of the response message.
    pub async fn peek_token_type(&mut self) -> Result<Option<u8>, CodecError> {
        if !self.ensure_payload().await? {
            return Ok(None);
        }
        let current = self.current.ok_or(CodecError::InvalidTds("no current packet"))?;
        Ok(Some(self.chain.payload(current)[self.offset]))
    }

    /// Take a mark at the current read position.
    ///
    /// Buffering mode stays on until [`stream`](Self::stream) is called:
    /// consumed packets are retained so [`reset`](Self::reset) can rewind.
    pub fn mark(&mut self) -> ReaderMark {
        self.streaming = false;
        match self.current {
            Some(slot) => ReaderMark {
                slot,
                generation: self.chain.generation(slot),
                offset: self.offset,
            },
            None => ReaderMark {
                slot: MARK_AT_START,
                generation: self.marks_epoch,
                offset: 0,
            },
        }
    }

    /// Rewind the read cursor to a mark.
    pub fn reset(&mut self, mark: &ReaderMark) -> Result<(), CodecError> {
        if mark.slot == MARK_AT_START {
            if mark.generation != self.marks_epoch {
                return Err(CodecError::StaleMark);
            }
            self.current = self.first;
            self.offset = 0;
            return Ok(());
        }
        if !self.chain.is_live(mark.slot, mark.generation) {
            return Err(CodecError::StaleMark);
        }
        self.current = Some(mark.slot);
        self.offset = mark.offset;
        Ok(())
    }

    /// Re-enable streaming: packets before the current one are reclaimed
    /// and any outstanding marks become invalid.
    pub fn stream(&mut self) {
        self.streaming = true;
        self.marks_epoch = self.marks_epoch.wrapping_add(1);
        if let (Some(oldest), Some(current)) = (self.oldest, self.current) {
            if oldest != current {
                self.chain.release_range(oldest, current);
            }
        }
        self.oldest = self.current;
        self.first = self.current;
    }

    /// Bytes buffered and readable without blocking.
    #[must_use]
    pub fn available(&self) -> usize {
        let Some(current) = self.current else {
            return 0;
        };
        let mut available = self.chain.payload(current).len() - self.offset;
        let mut cursor = self.chain.next(current);
        while let Some(index) = cursor {
            available += self.chain.payload(index).len();
            cursor = self.chain.next(index);
        }
        available
    }

    /// Bytes left in the current packet only.
    #[must_use]
    pub fn available_current_packet(&self) -> usize {
        match self.current {
            Some(current) => self.chain.payload(current).len() - self.offset,
            None => 0,
        }
    }

    /// Read exactly `out.len()` bytes, spanning packet boundaries.
    pub async fn read_bytes_into(&mut self, out: &mut [u8]) -> Result<(), CodecError> {
        let mut copied = 0;
        while copied < out.len() {
            if !self.ensure_payload().await? {
                return Err(CodecError::InvalidTds("response ended mid-value"));
            }
            let current = self
                .current
                .ok_or(CodecError::InvalidTds("no current packet"))?;
            let payload = self.chain.payload(current);
            let take = (out.len() - copied).min(payload.len() - self.offset);
            out[copied..copied + take]
                .copy_from_slice(&payload[self.offset..self.offset + take]);
            copied += take;
            self.offset += take;
        }
        Ok(())
    }

    /// Read `n` bytes into a fresh buffer.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; n];
        self.read_bytes_into(&mut out).await?;
        Ok(out)
    }

    /// Read the rest of the message into a buffer.
    ///
    /// Used for payloads that are not token streams, like the pre-login
    /// response.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        while self.ensure_payload().await? {
            let current = self
                .current
                .ok_or(CodecError::InvalidTds("no current packet"))?;
            let payload = self.chain.payload(current);
            out.extend_from_slice(&payload[self.offset..]);
            self.offset = payload.len();
        }
        Ok(out)
    }

    /// Discard exactly `n` payload bytes.
    pub async fn skip(&mut self, mut n: usize) -> Result<(), CodecError> {
        while n > 0 {
            if !self.ensure_payload().await? {
                return Err(CodecError::InvalidTds("response ended mid-skip"));
            }
            let current = self
                .current
                .ok_or(CodecError::InvalidTds("no current packet"))?;
            let take = n.min(self.chain.payload(current).len() - self.offset);
            self.offset += take;
            n -= take;
        }
        Ok(())
    }

    /// Read one byte.
    pub async fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut buf = [0u8; 1];
        self.read_bytes_into(&mut buf).await?;
        Ok(buf[0])
    }

    /// Read a little-endian u16.
    pub async fn read_u16(&mut self) -> Result<u16, CodecError> {
        let mut buf = [0u8; 2];
        self.read_bytes_into(&mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian i16.
    pub async fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_u16().await? as i16)
    }

    /// Read a big-endian u16 (packet-header byte order).
    pub async fn read_u16_be(&mut self) -> Result<u16, CodecError> {
        let mut buf = [0u8; 2];
        self.read_bytes_into(&mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Read a little-endian u32.
    pub async fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_bytes_into(&mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian i32.
    pub async fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_u32().await? as i32)
    }

    /// Read a big-endian u32.
    pub async fn read_u32_be(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_bytes_into(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a little-endian u64.
    pub async fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        self.read_bytes_into(&mut buf).await?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a little-endian i64.
    pub async fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.read_u64().await? as i64)
    }

    /// Read a little-endian f32.
    pub async fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32().await?))
    }

    /// Read a little-endian f64.
    pub async fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64().await?))
    }

    /// Read one UTF-16 code unit as a char.
    pub async fn read_char(&mut self) -> Result<char, CodecError> {
        let unit = self.read_u16().await?;
        char::from_u32(u32::from(unit)).ok_or_else(|| WireError::InvalidString.into())
    }

    /// Read a UTF-16LE string of `char_count` code units.
    pub async fn read_unicode_string(&mut self, char_count: usize) -> Result<String, CodecError> {
        let raw = self.read_bytes(char_count * 2).await?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| WireError::InvalidString.into())
    }

    /// Read a `B_VARCHAR`: u8 character count plus UTF-16LE data.
    pub async fn read_b_varchar(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8().await? as usize;
        self.read_unicode_string(len).await
    }

    /// Read a `US_VARCHAR`: u16 character count plus UTF-16LE data.
    pub async fn read_us_varchar(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16().await? as usize;
        self.read_unicode_string(len).await
    }

    /// Read a multi-part object name: a u8 part count (1..=4) followed by
    /// length-prefixed Unicode parts, assigned right to left.
    pub async fn read_sql_identifier(&mut self) -> Result<SqlIdentifier, CodecError> {
        let count = self.read_u8().await? as usize;
        if !(1..=4).contains(&count) {
            return Err(CodecError::InvalidTds("identifier part count outside 1..=4"));
        }
        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            let len = self.read_u16().await? as usize;
            parts.push(self.read_unicode_string(len).await?);
        }
        Ok(SqlIdentifier::from_parts(parts)?)
    }

    /// Read a DECIMAL/NUMERIC value: sign byte plus little-endian
    /// magnitude in `len - 1` bytes.
    pub async fn read_decimal(&mut self, len: usize, scale: u8) -> Result<SqlDecimal, CodecError> {
        if !(2..=17).contains(&len) {
            return Err(CodecError::InvalidTds("decimal value length"));
        }
        let positive = self.read_u8().await? == 1;
        let magnitude = self.read_bytes(len - 1).await?;

        let mut value: i128 = 0;
        for (i, &b) in magnitude.iter().enumerate() {
            value |= i128::from(b) << (8 * i);
        }
        if !positive {
            value = -value;
        }
        Ok(SqlDecimal::new(value, scale))
    }

    /// Read MONEY (8 bytes, high i32 then low u32) or SMALLMONEY
    /// (4 bytes). Both carry scale 4.
    pub async fn read_money(&mut self, len: usize) -> Result<SqlDecimal, CodecError> {
        let value: i64 = match len {
            8 => {
                let high = self.read_i32().await?;
                let low = self.read_u32().await?;
                (i64::from(high) << 32) | i64::from(low)
            }
            4 => i64::from(self.read_i32().await?),
            _ => return Err(CodecError::InvalidTds("money value length")),
        };
        Ok(SqlDecimal::new(i128::from(value), 4))
    }

    /// Read a 16-byte uniqueidentifier.
    pub async fn read_guid(&mut self, len: usize) -> Result<Guid, CodecError> {
        if len != 16 {
            return Err(CodecError::InvalidTds("GUID value length"));
        }
        let mut raw = [0u8; 16];
        self.read_bytes_into(&mut raw).await?;
        Ok(Guid(raw))
    }

    /// Read a DATE value (3-byte days into the Common Era).
    pub async fn read_date(&mut self) -> Result<NaiveDate, CodecError> {
        let mut raw = [0u8; temporal::DAYS_INTO_CE_LENGTH];
        self.read_bytes_into(&mut raw).await?;
        let days = temporal::decode_days_into_ce(&raw)?;
        Ok(temporal::date_from_days(days)?)
    }

    /// Read a TIME(scale) value.
    pub async fn read_time(&mut self, scale: u8) -> Result<NaiveTime, CodecError> {
        let nanos = self.read_nanos_since_midnight(scale).await?;
        Ok(temporal::time_from_nanos(nanos)?)
    }

    /// Read a DATETIME2(scale) value: time part then date part.
    pub async fn read_datetime2(&mut self, scale: u8) -> Result<NaiveDateTime, CodecError> {
        let nanos = self.read_nanos_since_midnight(scale).await?;
        let date = self.read_date().await?;
        Ok(date.and_time(temporal::time_from_nanos(nanos)?))
    }

    /// Read a DATETIMEOFFSET(scale): UTC time and date parts plus a
    /// signed minutes offset.
    pub async fn read_datetimeoffset(
        &mut self,
        scale: u8,
    ) -> Result<DateTime<FixedOffset>, CodecError> {
        let nanos = self.read_nanos_since_midnight(scale).await?;
        let mut raw = [0u8; temporal::DAYS_INTO_CE_LENGTH];
        self.read_bytes_into(&mut raw).await?;
        let days = temporal::decode_days_into_ce(&raw)?;
        let offset_minutes = self.read_i16().await?;
        Ok(temporal::datetimeoffset_from_parts(days, nanos, offset_minutes)?)
    }

    /// Read the classic DATETIME (8 bytes) or SMALLDATETIME (4 bytes).
    pub async fn read_datetime(&mut self, len: usize) -> Result<NaiveDateTime, CodecError> {
        match len {
            8 => {
                let days = self.read_i32().await?;
                let ticks = self.read_i32().await?;
                Ok(temporal::datetime_from_parts(days, ticks)?)
            }
            4 => {
                let days = self.read_u16().await?;
                let minutes = self.read_u16().await?;
                Ok(temporal::smalldatetime_from_parts(days, minutes)?)
            }
            _ => Err(CodecError::InvalidTds("datetime value length")),
        }
    }

    async fn read_nanos_since_midnight(&mut self, scale: u8) -> Result<u64, CodecError> {
        let len = temporal::time_value_length(scale);
        let raw = self.read_bytes(len).await?;
        Ok(temporal::decode_nanos_since_midnight(&raw, scale)?)
    }

    /// Ensure at least one payload byte is readable, pulling the next
    /// packet if needed. Returns `false` at the end of the response.
    async fn ensure_payload(&mut self) -> Result<bool, CodecError> {
        loop {
            match self.current {
                Some(current) if self.offset < self.chain.payload(current).len() => {
                    return Ok(true);
                }
                Some(current) => {
                    if let Some(next) = self.chain.next(current) {
                        if self.streaming {
                            self.chain.release(current);
                            self.oldest = Some(next);
                            if self.first == Some(current) {
                                self.first = Some(next);
                            }
                        }
                        self.current = Some(next);
                        self.offset = 0;
                        continue;
                    }
                    if self.final_packet_seen || !self.read_packet().await? {
                        return Ok(false);
                    }
                }
                None => {
                    if self.final_packet_seen || !self.read_packet().await? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Pull one packet from the channel into the chain.
    async fn read_packet(&mut self) -> Result<bool, CodecError> {
        if let Some(sink) = self.sink {
            if !sink.reading_response() {
                return Ok(false);
            }
        }

        let mut header_raw = [0u8; PACKET_HEADER_SIZE];
        self.fill_from_channel(&mut header_raw).await?;

        let mut cursor = &header_raw[..];
        let header = PacketHeader::decode(&mut cursor)?;
        header.validate_length(self.channel.packet_size())?;
        self.channel.set_spid(header.spid);

        let mut payload = vec![0u8; header.payload_length()];
        self.fill_from_channel(&mut payload).await?;

        self.packets_read += 1;
        tracing::trace!(
            packet = self.packets_read,
            payload = payload.len(),
            eom = header.is_end_of_message(),
            spid = header.spid,
            "received packet"
        );

        let index = self.chain.push(Bytes::from(payload), self.tail);
        self.tail = Some(index);
        if self.first.is_none() {
            self.first = Some(index);
        }
        if self.oldest.is_none() {
            self.oldest = Some(index);
        }
        if self.current.is_none() {
            self.current = Some(index);
            self.offset = 0;
        }

        if header.is_end_of_message() {
            self.final_packet_seen = true;
            self.channel.note_message_received();
            if let Some(sink) = self.sink {
                sink.on_response_eom();
            }
        }
        Ok(true)
    }

    /// Fill `buf` from the channel, observing the network timeout and the
    /// command interrupt flag between read slices.
    async fn fill_from_channel(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        let deadline = self.channel.network_timeout().map(|t| Instant::now() + t);
        let mut filled = 0;

        while filled < buf.len() {
            self.observe_interrupt().await?;

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(tds_channel::ChannelError::Timeout.into());
                    }
                    READ_POLL_SLICE.min(deadline - now)
                }
                None => READ_POLL_SLICE,
            };

            match self.channel.read_slice(&mut buf[filled..], wait).await? {
                Some(0) => return Err(tds_channel::ChannelError::UnexpectedEof.into()),
                Some(n) => filled += n,
                None => continue,
            }
        }
        Ok(())
    }

    /// Answer a pending interrupt with a single attention packet.
    async fn observe_interrupt(&mut self) -> Result<(), CodecError> {
        let Some(sink) = self.sink else {
            return Ok(());
        };
        if sink.interrupt_pending() && !sink.attention_sent() {
            self.channel.send_attention().await?;
            sink.note_attention_sent();
        }
        Ok(())
    }
}
