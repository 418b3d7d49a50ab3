//! Packet framing behavior over a real socket pair.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tds_channel::Channel;
use tds_codec::{ResponseSink, TdsReader, TdsWriter};
use tds_wire::packet::{PACKET_HEADER_SIZE, PacketType};

async fn channel_pair() -> (Channel, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let client = TcpStream::connect(addr).await.expect("connect");
    let (server, _) = listener.accept().await.expect("accept");
    (Channel::from_tcp(client), server)
}

/// Build one response packet with the given payload.
fn response_packet(payload: &[u8], eom: bool, packet_id: u8) -> Vec<u8> {
    let mut packet = vec![
        PacketType::TabularResult as u8,
        u8::from(eom),
    ];
    packet.extend_from_slice(&((PACKET_HEADER_SIZE + payload.len()) as u16).to_be_bytes());
    packet.extend_from_slice(&77u16.to_be_bytes()); // spid
    packet.push(packet_id);
    packet.push(0);
    packet.extend_from_slice(payload);
    packet
}

#[tokio::test]
async fn message_framing_roundtrip() {
    let (mut channel, mut server) = channel_pair().await;
    let packet_size = channel.packet_size();

    // A payload spanning three packets.
    let payload: Vec<u8> = (0..(packet_size * 2 + 500)).map(|i| (i % 251) as u8).collect();

    let mut writer = TdsWriter::new(&mut channel);
    writer.start_message(PacketType::SqlBatch);
    writer.write_bytes(&payload).await.expect("write");
    writer.end_message().await.expect("end");
    assert_eq!(channel.messages_sent(), 1);

    // Reassemble on the server side and verify the framing invariants.
    let mut received = Vec::new();
    let mut last_packet_id: Option<u8> = None;
    loop {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        server.read_exact(&mut header).await.expect("header");

        assert_eq!(header[0], PacketType::SqlBatch as u8, "type is shared");
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        assert!(length <= packet_size);

        if let Some(previous) = last_packet_id {
            assert_eq!(header[6], previous.wrapping_add(1), "contiguous sequence");
        }
        last_packet_id = Some(header[6]);

        let mut chunk = vec![0u8; length - PACKET_HEADER_SIZE];
        server.read_exact(&mut chunk).await.expect("payload");
        received.extend_from_slice(&chunk);

        let eom = header[1] & 0x01 != 0;
        if eom {
            break;
        }
        // Every non-final packet must be full.
        assert_eq!(length, packet_size);
    }

    assert_eq!(received, payload);
}

#[tokio::test]
async fn reader_spans_packet_boundaries() {
    let (mut channel, mut server) = channel_pair().await;

    // A u32 split across two packets: 0xDDCCBBAA little-endian.
    tokio::spawn(async move {
        server
            .write_all(&response_packet(&[0xAA, 0xBB], false, 1))
            .await
            .expect("p1");
        server
            .write_all(&response_packet(&[0xCC, 0xDD], true, 2))
            .await
            .expect("p2");
        // Keep the socket open while the reader works.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let mut reader = TdsReader::new(&mut channel);
    let value = reader.read_u32().await.expect("read");
    assert_eq!(value, 0xDDCC_BBAA);
    assert!(reader.peek_token_type().await.expect("peek").is_none());

    assert_eq!(channel.messages_received(), 1);
    assert_eq!(channel.spid(), 77);
}

#[tokio::test]
async fn mark_reset_rereads_identically() {
    let (mut channel, mut server) = channel_pair().await;

    tokio::spawn(async move {
        // Three small packets so the marked region crosses packets.
        server
            .write_all(&response_packet(&[1, 2, 3, 4], false, 1))
            .await
            .expect("p1");
        server
            .write_all(&response_packet(&[5, 6, 7, 8], false, 2))
            .await
            .expect("p2");
        server
            .write_all(&response_packet(&[9, 10], true, 3))
            .await
            .expect("p3");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let mut reader = TdsReader::new(&mut channel);

    // Consume a prefix, then mark.
    assert_eq!(reader.read_u16().await.expect("prefix"), 0x0201);
    let mark = reader.mark();

    let first: Vec<u8> = reader.read_bytes(6).await.expect("first pass");
    reader.reset(&mark).expect("reset");
    let second: Vec<u8> = reader.read_bytes(6).await.expect("second pass");
    assert_eq!(first, second);
    assert_eq!(first, vec![3, 4, 5, 6, 7, 8]);

    // Back to streaming; the remaining bytes still read correctly.
    reader.stream();
    assert_eq!(reader.read_u16().await.expect("tail"), 0x0A09);
}

#[tokio::test]
async fn reset_after_stream_is_stale() {
    let (mut channel, mut server) = channel_pair().await;

    tokio::spawn(async move {
        server
            .write_all(&response_packet(&[1, 2, 3, 4], false, 1))
            .await
            .expect("p1");
        server
            .write_all(&response_packet(&[5, 6, 7, 8], true, 2))
            .await
            .expect("p2");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let mut reader = TdsReader::new(&mut channel);
    let mark = reader.mark();
    reader.read_bytes(6).await.expect("consume across packets");

    // stream() reclaims the first packet; the mark must be refused.
    reader.stream();
    assert!(reader.reset(&mark).is_err());
}

#[derive(Default)]
struct TestSink {
    interrupted: AtomicBool,
    attention_sent: AtomicBool,
    eom_count: AtomicUsize,
}

impl ResponseSink for TestSink {
    fn interrupt_pending(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
    fn attention_sent(&self) -> bool {
        self.attention_sent.load(Ordering::Acquire)
    }
    fn note_attention_sent(&self) {
        self.attention_sent.store(true, Ordering::Release);
    }
    fn on_response_eom(&self) {
        self.eom_count.fetch_add(1, Ordering::AcqRel);
    }
}

#[tokio::test]
async fn pending_interrupt_sends_one_attention() {
    let (mut channel, mut server) = channel_pair().await;

    let sink = TestSink::default();
    sink.interrupted.store(true, Ordering::Release);

    let server_task = tokio::spawn(async move {
        // Expect the attention packet before any response is produced.
        let mut header = [0u8; PACKET_HEADER_SIZE];
        server.read_exact(&mut header).await.expect("attention");
        assert_eq!(header[0], PacketType::Attention as u8);
        assert_eq!(u16::from_be_bytes([header[2], header[3]]), 8);

        // Answer with the attention-acknowledging DONE.
        let mut done = vec![0xFDu8];
        done.extend_from_slice(&0x0020u16.to_le_bytes());
        done.extend_from_slice(&0u16.to_le_bytes());
        done.extend_from_slice(&0u64.to_le_bytes());
        server
            .write_all(&response_packet(&done, true, 1))
            .await
            .expect("done");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let mut reader = TdsReader::with_sink(&mut channel, &sink);
    let token = reader.peek_token_type().await.expect("peek");
    assert_eq!(token, Some(0xFD));

    assert!(sink.attention_sent.load(Ordering::Acquire));
    reader.skip(13).await.expect("skip done");
    assert!(reader.peek_token_type().await.expect("eof").is_none());
    assert_eq!(sink.eom_count.load(Ordering::Acquire), 1);

    server_task.await.expect("server");
}
