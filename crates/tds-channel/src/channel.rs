//! The connection's byte stream.
//!
//! [`Channel`] exclusively owns the TCP socket and, once enabled, the TLS
//! session. It tracks the connection-scoped transport state the framing
//! layer needs: the negotiated packet size, sent/received message
//! counters, and the last SPID seen from the server.
//!
//! Reads are bounded by the network timeout (the SO_TIMEOUT analogue) and
//! are issued in short slices so a cooperative caller can observe an
//! interrupt flag between slices.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tokio_rustls::client::TlsStream;

use tds_wire::packet::{INITIAL_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::config::TlsOptions;
use crate::connector::TlsConnector;
use crate::error::{ChannelError, HandshakeStage};
use crate::finder::{ConnectOptions, find_socket};
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// Slice length for interruptible reads.
pub const READ_POLL_SLICE: Duration = Duration::from_secs(1);

enum ChannelStream {
    /// Raw TCP.
    Tcp(TcpStream),
    /// TLS session layered over the (now pass-through) prelogin wrapper.
    Tls(Box<TlsStream<TlsPreloginWrapper<TcpStream>>>),
    /// Closed or mid-transition.
    Closed,
}

impl AsyncRead for ChannelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Self::Closed => Poll::Ready(Err(std::io::ErrorKind::NotConnected.into())),
        }
    }
}

impl AsyncWrite for ChannelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Self::Closed => Poll::Ready(Err(std::io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Self::Closed => Poll::Ready(Err(std::io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }
}

/// The transport channel of one connection.
pub struct Channel {
    stream: ChannelStream,
    network_timeout: Option<Duration>,
    packet_size: usize,
    messages_sent: u64,
    messages_received: u64,
    spid: u16,
}

impl Channel {
    /// Open a channel to `host:port` using the socket finder.
    pub async fn open(host: &str, port: u16, opts: &ConnectOptions) -> Result<Self, ChannelError> {
        let stream = find_socket(host, port, opts).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_tcp(stream))
    }

    /// Wrap an already-connected TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            stream: ChannelStream::Tcp(stream),
            network_timeout: None,
            packet_size: INITIAL_PACKET_SIZE,
            messages_sent: 0,
            messages_received: 0,
            spid: 0,
        }
    }

    /// Whether the channel currently runs over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self.stream, ChannelStream::Tls(_))
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Update the negotiated packet size (from the pre-login/env-change
    /// exchange).
    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size;
    }

    /// Network (read) timeout; `None` waits indefinitely.
    #[must_use]
    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    /// Set the network timeout.
    pub fn set_network_timeout(&mut self, timeout: Option<Duration>) {
        self.network_timeout = timeout;
    }

    /// Messages fully sent on this channel.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Messages fully received on this channel.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Record completion of an outbound message.
    pub fn note_message_sent(&mut self) {
        self.messages_sent += 1;
    }

    /// Record completion of an inbound message.
    pub fn note_message_received(&mut self) {
        self.messages_received += 1;
    }

    /// Last SPID observed in a response packet header.
    #[must_use]
    pub fn spid(&self) -> u16 {
        self.spid
    }

    /// Record the SPID from a response packet header.
    pub fn set_spid(&mut self, spid: u16) {
        self.spid = spid;
    }

    /// Read up to `buf.len()` bytes, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when the slice elapsed with no data; `0` bytes
    /// signals the peer closed the stream.
    pub async fn read_slice(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<usize>, ChannelError> {
        match timeout(wait, self.stream.read(buf)).await {
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) => Err(ChannelError::Io(e)),
            Err(_) => Ok(None),
        }
    }

    /// Read exactly `buf.len()` bytes, bounded by the network timeout.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        let deadline = self.network_timeout.map(|t| Instant::now() + t);
        let mut filled = 0;

        while filled < buf.len() {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ChannelError::Timeout);
                    }
                    READ_POLL_SLICE.min(deadline - now)
                }
                None => READ_POLL_SLICE,
            };

            match self.read_slice(&mut buf[filled..], wait).await? {
                Some(0) => return Err(ChannelError::UnexpectedEof),
                Some(n) => filled += n,
                None => continue,
            }
        }
        Ok(())
    }

    /// Write all of `buf`.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        self.stream.write_all(buf).await?;
        Ok(())
    }

    /// Flush buffered writes to the socket.
    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a zero-payload attention packet and flush.
    ///
    /// The attention message bypasses normal message framing; the server
    /// answers with a DONE carrying the attention-acknowledged bit.
    pub async fn send_attention(&mut self) -> Result<(), ChannelError> {
        let header = PacketHeader {
            packet_type: PacketType::Attention,
            status: PacketStatus::END_OF_MESSAGE,
            length: PACKET_HEADER_SIZE as u16,
            spid: 0,
            packet_id: 1,
            window: 0,
        };
        let mut buf = bytes::BytesMut::with_capacity(PACKET_HEADER_SIZE);
        header.encode(&mut buf);

        tracing::debug!(spid = self.spid, "sending attention packet");
        self.write_all(&buf).await?;
        self.flush().await
    }

    /// Upgrade the channel to TLS using the tunneled prelogin handshake.
    ///
    /// On success the trust store password in `options` has been zeroed.
    /// Failures are classified by handshake progress: an EOF or error
    /// after handshake bytes flowed is intermittent (the caller may retry
    /// the whole open), anything earlier is fatal.
    pub async fn enable_tls(
        &mut self,
        server_name: &str,
        options: &mut TlsOptions,
    ) -> Result<(), ChannelError> {
        let tcp = match std::mem::replace(&mut self.stream, ChannelStream::Closed) {
            ChannelStream::Tcp(tcp) => tcp,
            other => {
                self.stream = other;
                return Err(ChannelError::NotConnected);
            }
        };

        let connector = match TlsConnector::new(options) {
            Ok(connector) => connector,
            Err(e) => {
                // Not connected to TLS; restore the raw stream.
                self.stream = ChannelStream::Tcp(tcp);
                options.clear_trust_store_password();
                return Err(e);
            }
        };

        let validation_name = options
            .host_name_override()
            .unwrap_or(server_name)
            .to_string();

        let wrapper = TlsPreloginWrapper::new(tcp);
        let activity = wrapper.handshake_activity();

        let result = connector.connect(wrapper, &validation_name).await;
        options.clear_trust_store_password();

        match result {
            Ok(mut tls_stream) => {
                // Handshake done: subsequent traffic is raw TLS records.
                let (wrapper, _) = tls_stream.get_mut();
                wrapper.handshake_complete();
                tracing::debug!(server_name = %validation_name, "TLS handshake complete");
                self.stream = ChannelStream::Tls(Box::new(tls_stream));
                Ok(())
            }
            Err(e) => {
                let started = activity.load(std::sync::atomic::Ordering::Acquire);
                let truncated = e.kind() == std::io::ErrorKind::UnexpectedEof;
                if started {
                    tracing::warn!(error = %e, "TLS handshake failed after it started");
                    Err(ChannelError::IntermittentTlsFailed(e.to_string()))
                } else {
                    Err(ChannelError::SslFailed {
                        stage: if truncated {
                            HandshakeStage::TruncatedResponse
                        } else {
                            HandshakeStage::NotStarted
                        },
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    /// Drop the TLS session and revert to the raw TCP stream.
    ///
    /// Used after login-only encryption: the TLS session must not run its
    /// close-notify exchange over the shared socket, so the session state
    /// is simply released and the TCP stream rewired in its place.
    pub fn disable_tls(&mut self) -> Result<(), ChannelError> {
        match std::mem::replace(&mut self.stream, ChannelStream::Closed) {
            ChannelStream::Tls(tls_stream) => {
                let (wrapper, _session) = tls_stream.into_inner();
                self.stream = ChannelStream::Tcp(wrapper.into_inner());
                tracing::debug!("TLS disabled; channel reverted to raw TCP");
                Ok(())
            }
            other => {
                self.stream = other;
                Err(ChannelError::NotConnected)
            }
        }
    }

    /// Shut the channel down.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.stream.shutdown().await?;
        self.stream = ChannelStream::Closed;
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("tls", &self.is_tls())
            .field("packet_size", &self.packet_size)
            .field("messages_sent", &self.messages_sent)
            .field("messages_received", &self.messages_received)
            .field("spid", &self.spid)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    async fn pair() -> (Channel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Channel::from_tcp(client), server)
    }

    #[tokio::test]
    async fn read_exact_across_partial_writes() {
        let (mut channel, mut server) = pair().await;

        tokio::spawn(async move {
            server.write_all(b"hel").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"lo").await.unwrap();
            // hold the socket open
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut buf = [0u8; 5];
        channel.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn read_exact_times_out() {
        let (mut channel, _server) = pair().await;
        channel.set_network_timeout(Some(Duration::from_millis(50)));

        let mut buf = [0u8; 1];
        let err = channel.read_exact(&mut buf).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }

    #[tokio::test]
    async fn read_exact_detects_eof() {
        let (mut channel, server) = pair().await;
        drop(server);

        let mut buf = [0u8; 4];
        let err = channel.read_exact(&mut buf).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnexpectedEof));
    }

    #[tokio::test]
    async fn attention_packet_shape() {
        let (mut channel, mut server) = pair().await;
        channel.send_attention().await.unwrap();

        let mut buf = [0u8; PACKET_HEADER_SIZE];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf[0], PacketType::Attention as u8);
        assert_eq!(buf[1], 0x01); // EOM
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 8); // zero payload
    }

    #[tokio::test]
    async fn disable_tls_requires_tls_state() {
        let (mut channel, _server) = pair().await;
        assert!(matches!(
            channel.disable_tls(),
            Err(ChannelError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn message_counters() {
        let (mut channel, _server) = pair().await;
        channel.note_message_sent();
        channel.note_message_sent();
        channel.note_message_received();
        assert_eq!(channel.messages_sent(), 2);
        assert_eq!(channel.messages_received(), 1);
        assert!(channel.messages_received() <= channel.messages_sent());
    }
}
