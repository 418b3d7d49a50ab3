//! TLS handshake framing inside TDS PRELOGIN packets.
//!
//! On TDS 7.x the TLS handshake is tunneled through the TDS framing
//! layer: every outbound handshake flight is wrapped in PRELOGIN-typed
//! packets, and inbound PRELOGIN packets are stripped back to raw TLS
//! records before the TLS engine sees them.
//!
//! [`TlsPreloginWrapper`] sits between the TLS engine and the TCP socket:
//!
//! - writes are buffered and only hit the wire when the engine flushes,
//!   so a handshake flight is never fragmented mid-record at arbitrary
//!   packet boundaries;
//! - reads parse the 8-byte packet header, verify the PRELOGIN type, and
//!   hand the engine payload bytes only;
//! - once [`handshake_complete`](TlsPreloginWrapper::handshake_complete)
//!   is called the wrapper becomes a transparent pass-through and TLS
//!   records travel on the wire directly.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use tds_wire::packet::{INITIAL_PACKET_SIZE, PACKET_HEADER_SIZE};

const PACKET_TYPE_PRELOGIN: u8 = 0x12;
const PACKET_STATUS_EOM: u8 = 0x01;

/// Byte-stream adapter that frames TLS handshake traffic in PRELOGIN
/// packets until the handshake completes.
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,
    /// Set as soon as any handshake byte moves in either direction; used
    /// to classify failures as intermittent vs fatal.
    activity: Arc<AtomicBool>,

    // Read state: packet header accumulator and bytes left of the
    // current packet's payload.
    header_buf: [u8; PACKET_HEADER_SIZE],
    header_pos: usize,
    payload_remaining: usize,

    // Write state: buffered handshake bytes (headers are prepended at
    // flush time) and the wire-format buffer currently draining.
    write_buf: Vec<u8>,
    wire_buf: Vec<u8>,
    wire_pos: usize,
    packet_id: u8,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap a stream for the handshake phase.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending_handshake: true,
            activity: Arc::new(AtomicBool::new(false)),
            header_buf: [0u8; PACKET_HEADER_SIZE],
            header_pos: 0,
            payload_remaining: 0,
            write_buf: Vec::new(),
            wire_buf: Vec::new(),
            wire_pos: 0,
            packet_id: 1,
        }
    }

    /// Handle reporting whether handshake traffic has flowed.
    pub fn handshake_activity(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.activity)
    }

    /// Switch to pass-through mode. Call once the TLS handshake returns.
    pub fn handshake_complete(&mut self) {
        self.pending_handshake = false;
    }

    /// Consume the wrapper, returning the inner stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Frame the buffered handshake bytes into PRELOGIN packets.
    ///
    /// Payloads larger than one packet are split, with the end-of-message
    /// bit set only on the final packet.
    fn frame_write_buf(&mut self) {
        let max_payload = INITIAL_PACKET_SIZE - PACKET_HEADER_SIZE;
        let chunks: Vec<&[u8]> = self.write_buf.chunks(max_payload).collect();
        let total = chunks.len();

        let mut wire = Vec::with_capacity(self.write_buf.len() + total * PACKET_HEADER_SIZE);
        for (i, chunk) in chunks.iter().enumerate() {
            let length = (PACKET_HEADER_SIZE + chunk.len()) as u16;
            wire.push(PACKET_TYPE_PRELOGIN);
            wire.push(if i + 1 == total { PACKET_STATUS_EOM } else { 0 });
            wire.extend_from_slice(&length.to_be_bytes());
            wire.extend_from_slice(&[0, 0]); // spid
            wire.push(self.packet_id);
            wire.push(0); // window
            wire.extend_from_slice(chunk);
            self.packet_id = self.packet_id.wrapping_add(1);
        }

        tracing::trace!(
            payload = self.write_buf.len(),
            packets = total,
            "framing TLS handshake flight in PRELOGIN packets"
        );

        self.write_buf.clear();
        self.wire_buf = wire;
        self.wire_pos = 0;
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        loop {
            // Hand out payload bytes of the current packet first.
            if this.payload_remaining > 0 {
                let want = cmp::min(this.payload_remaining, buf.remaining());
                let mut scratch = vec![0u8; want];
                let mut scratch_buf = ReadBuf::new(&mut scratch);

                match Pin::new(&mut this.stream).poll_read(cx, &mut scratch_buf)? {
                    Poll::Ready(()) => {
                        let n = scratch_buf.filled().len();
                        if n == 0 {
                            // EOF inside a packet payload.
                            return Poll::Ready(Ok(()));
                        }
                        buf.put_slice(&scratch_buf.filled()[..n]);
                        this.payload_remaining -= n;
                        if this.payload_remaining == 0 {
                            this.header_pos = 0;
                        }
                        this.activity.store(true, Ordering::Release);
                        return Poll::Ready(Ok(()));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            // Accumulate the next packet header.
            while this.header_pos < PACKET_HEADER_SIZE {
                let mut header_buf = ReadBuf::new(&mut this.header_buf[this.header_pos..]);
                match Pin::new(&mut this.stream).poll_read(cx, &mut header_buf)? {
                    Poll::Ready(()) => {
                        let n = header_buf.filled().len();
                        if n == 0 {
                            // EOF at a packet boundary: propagate as a
                            // zero-byte read.
                            return Poll::Ready(Ok(()));
                        }
                        this.header_pos += n;
                        this.activity.store(true, Ordering::Release);
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let packet_type = this.header_buf[0];
            if packet_type != PACKET_TYPE_PRELOGIN {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected PRELOGIN packet (0x12) during TLS handshake, got {packet_type:#04x}"
                    ),
                )));
            }

            let length =
                u16::from_be_bytes([this.header_buf[2], this.header_buf[3]]) as usize;
            this.payload_remaining = length.saturating_sub(PACKET_HEADER_SIZE);

            tracing::trace!(
                payload = this.payload_remaining,
                "unwrapping PRELOGIN-framed TLS handshake packet"
            );

            if this.payload_remaining == 0 {
                // Empty packet: re-arm for the next header.
                this.header_pos = 0;
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Buffer the record; framing happens when the engine flushes.
        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending_handshake {
            if this.wire_buf.is_empty() && !this.write_buf.is_empty() {
                this.frame_write_buf();
                this.activity.store(true, Ordering::Release);
            }

            while this.wire_pos < this.wire_buf.len() {
                match Pin::new(&mut this.stream)
                    .poll_write(cx, &this.wire_buf[this.wire_pos..])?
                {
                    Poll::Ready(n) => this.wire_pos += n,
                    Poll::Pending => return Poll::Pending,
                }
            }
            this.wire_buf.clear();
            this.wire_pos = 0;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
