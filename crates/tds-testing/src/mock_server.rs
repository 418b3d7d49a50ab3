//! Scripted mock TDS server.
//!
//! The server accepts plaintext connections only (pre-login answers
//! `NotSupported` for encryption by default), performs the login
//! exchange, and then answers SQL batches from a script of canned
//! responses. Attention packets are acknowledged with a DONE carrying
//! the attention bit, and a scripted kill drops the socket mid-exchange
//! for resiliency tests.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tds_wire::codec::{write_b_varchar, write_us_varchar, write_utf16_string};
use tds_wire::packet::{PACKET_HEADER_SIZE, PacketType};
use tds_wire::prelogin::{EncryptionLevel, PreLogin};
use tds_wire::token::TokenType;

/// Engine edition returned to the post-login probe unless overridden.
const DEFAULT_ENGINE_EDITION: i32 = 3;

/// The probe statement the driver sends after login.
const ENGINE_EDITION_SQL: &str = "SELECT CAST(SERVERPROPERTY('EngineEdition') AS INT)";

/// A scripted response to one SQL batch.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// One-row, one-column integer result.
    Scalar(i32),
    /// One-row, one-column string result.
    StringScalar(String),
    /// No result set; DONE with an affected-row count.
    Affected(u64),
    /// An ERROR token followed by a DONE with the error bit.
    Error {
        /// Server error number.
        number: i32,
        /// Message text.
        message: String,
        /// Severity class.
        severity: u8,
    },
    /// Do not answer; the query hangs until cancelled.
    Hang,
    /// Drop the connection without answering.
    KillConnection,
}

struct Script {
    responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
}

impl Script {
    fn next_response(&self, sql: &str) -> Option<MockResponse> {
        let mut map = self.responses.lock().ok()?;
        let queue = map.get_mut(sql)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Builder for [`MockTdsServer`].
pub struct MockServerBuilder {
    encryption: EncryptionLevel,
    database: String,
    ack_column_encryption: bool,
    ack_session_recovery: bool,
    responses: HashMap<String, VecDeque<MockResponse>>,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            encryption: EncryptionLevel::NotSupported,
            database: "master".into(),
            ack_column_encryption: false,
            ack_session_recovery: false,
            responses: HashMap::new(),
        }
    }
}

impl MockServerBuilder {
    /// Encryption level the server advertises in pre-login.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Database announced in the login environment change.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Acknowledge the column-encryption feature extension.
    #[must_use]
    pub fn ack_column_encryption(mut self, ack: bool) -> Self {
        self.ack_column_encryption = ack;
        self
    }

    /// Acknowledge the session-recovery feature extension.
    #[must_use]
    pub fn ack_session_recovery(mut self, ack: bool) -> Self {
        self.ack_session_recovery = ack;
        self
    }

    /// Script a response for an exact SQL text. Repeated calls for the
    /// same text queue responses; the last one repeats.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.responses
            .entry(sql.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Bind and start the server.
    pub async fn start(mut self) -> std::io::Result<MockTdsServer> {
        // The driver probes the engine edition after login; answer it
        // unless the test scripted something else.
        self.responses
            .entry(ENGINE_EDITION_SQL.into())
            .or_insert_with(|| VecDeque::from([MockResponse::Scalar(DEFAULT_ENGINE_EDITION)]));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            encryption: self.encryption,
            database: self.database,
            ack_column_encryption: self.ack_column_encryption,
            ack_session_recovery: self.ack_session_recovery,
            script: Script {
                responses: Mutex::new(self.responses),
            },
        });

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "mock server accepted connection");
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                tracing::debug!(error = %e, "mock connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "mock server accept failed");
                        break;
                    }
                }
            }
        });

        Ok(MockTdsServer { addr, handle })
    }
}

/// A running mock server.
pub struct MockTdsServer {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl MockTdsServer {
    /// Start building a server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host string for a connection configuration.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct ServerState {
    encryption: EncryptionLevel,
    database: String,
    ack_column_encryption: bool,
    ack_session_recovery: bool,
    script: Script,
}

/// One reassembled request message.
struct RequestMessage {
    packet_type: u8,
    payload: Vec<u8>,
}

async fn read_message(stream: &mut TcpStream) -> std::io::Result<Option<RequestMessage>> {
    let mut payload = Vec::new();
    let mut packet_type = None;

    loop {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && payload.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut chunk = vec![0u8; length.saturating_sub(PACKET_HEADER_SIZE)];
        stream.read_exact(&mut chunk).await?;

        packet_type.get_or_insert(header[0]);
        payload.extend_from_slice(&chunk);

        if header[1] & 0x01 != 0 {
            break;
        }
    }

    Ok(Some(RequestMessage {
        packet_type: packet_type.unwrap_or_default(),
        payload,
    }))
}

async fn write_message(
    stream: &mut TcpStream,
    packet_type: PacketType,
    payload: &[u8],
) -> std::io::Result<()> {
    let max_payload = 4096 - PACKET_HEADER_SIZE;
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(max_payload).collect()
    };
    let total = chunks.len();

    for (i, chunk) in chunks.iter().enumerate() {
        let mut packet = BytesMut::with_capacity(PACKET_HEADER_SIZE + chunk.len());
        packet.put_u8(packet_type as u8);
        packet.put_u8(u8::from(i + 1 == total));
        packet.put_u16((PACKET_HEADER_SIZE + chunk.len()) as u16);
        packet.put_u16(77); // spid
        packet.put_u8((i + 1) as u8);
        packet.put_u8(0);
        packet.put_slice(chunk);
        stream.write_all(&packet).await?;
    }
    stream.flush().await
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    // Pre-login.
    let Some(request) = read_message(&mut stream).await? else {
        return Ok(());
    };
    if request.packet_type != PacketType::PreLogin as u8 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected PRELOGIN first",
        ));
    }

    let mut prelogin_response = PreLogin::client(
        tds_wire::version::TdsVersion::new(0x0F00_0834), // product version style
        state.encryption,
    );
    prelogin_response.sub_build = 0;
    write_message(
        &mut stream,
        PacketType::TabularResult,
        &prelogin_response.encode(),
    )
    .await?;

    // LOGIN7.
    let Some(request) = read_message(&mut stream).await? else {
        return Ok(());
    };
    if request.packet_type != PacketType::Login7 as u8 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected LOGIN7 after pre-login",
        ));
    }

    write_message(
        &mut stream,
        PacketType::TabularResult,
        &encode_login_response(&state),
    )
    .await?;

    // Query loop.
    let mut hanging = false;
    loop {
        let Some(request) = read_message(&mut stream).await? else {
            return Ok(());
        };

        if request.packet_type == PacketType::Attention as u8 {
            write_message(&mut stream, PacketType::TabularResult, &encode_attention_ack())
                .await?;
            hanging = false;
            continue;
        }

        if request.packet_type != PacketType::SqlBatch as u8 {
            tracing::debug!(
                packet_type = request.packet_type,
                "mock server ignoring unexpected message"
            );
            continue;
        }

        if hanging {
            // The previous query is still "running"; a well-behaved
            // client only sends attention here.
            continue;
        }

        let sql = extract_batch_sql(&request.payload);
        tracing::debug!(sql = %sql, "mock server received batch");

        let response = state
            .script
            .next_response(&sql)
            .unwrap_or(MockResponse::Affected(0));

        match response {
            MockResponse::Scalar(value) => {
                write_message(&mut stream, PacketType::TabularResult, &encode_scalar_int(value))
                    .await?;
            }
            MockResponse::StringScalar(value) => {
                write_message(
                    &mut stream,
                    PacketType::TabularResult,
                    &encode_scalar_string(&value),
                )
                .await?;
            }
            MockResponse::Affected(count) => {
                write_message(&mut stream, PacketType::TabularResult, &encode_affected(count))
                    .await?;
            }
            MockResponse::Error {
                number,
                message,
                severity,
            } => {
                write_message(
                    &mut stream,
                    PacketType::TabularResult,
                    &encode_error(number, &message, severity),
                )
                .await?;
            }
            MockResponse::Hang => {
                hanging = true;
            }
            MockResponse::KillConnection => {
                tracing::debug!("mock server killing connection mid-query");
                return Ok(());
            }
        }
    }
}

/// Strip the ALL_HEADERS section and decode the UTF-16LE batch text.
fn extract_batch_sql(payload: &[u8]) -> String {
    if payload.len() < 4 {
        return String::new();
    }
    let headers_len =
        u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if headers_len > payload.len() {
        return String::new();
    }

    let text = &payload[headers_len..];
    let units: Vec<u16> = text
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn encode_login_response(state: &ServerState) -> Vec<u8> {
    let mut buf = BytesMut::new();

    // ENVCHANGE: database master -> configured.
    encode_env_change_string(&mut buf, 1, &state.database, "master");

    // ENVCHANGE: packet size 4096 -> 8000.
    encode_env_change_string(&mut buf, 4, "8000", "4096");

    // LOGINACK.
    let mut ack = BytesMut::new();
    ack.put_u8(1); // interface
    ack.put_u32(tds_wire::version::TdsVersion::DENALI.raw());
    write_b_varchar(&mut ack, "Mock SQL Server");
    ack.put_u32(0x0F00_0834);
    buf.put_u8(TokenType::LoginAck as u8);
    buf.put_u16_le(ack.len() as u16);
    buf.put_slice(&ack);

    // FEATUREEXTACK when anything is acknowledged.
    if state.ack_column_encryption || state.ack_session_recovery {
        buf.put_u8(TokenType::FeatureExtAck as u8);
        if state.ack_session_recovery {
            buf.put_u8(0x01);
            buf.put_u32_le(0);
        }
        if state.ack_column_encryption {
            buf.put_u8(0x04);
            buf.put_u32_le(1);
            buf.put_u8(0x01); // protocol version
        }
        buf.put_u8(0xFF);
    }

    encode_done(&mut buf, 0x0000, 0);
    buf.to_vec()
}

fn encode_env_change_string(buf: &mut BytesMut, env_type: u8, new: &str, old: &str) {
    let mut body = BytesMut::new();
    body.put_u8(env_type);
    write_b_varchar(&mut body, new);
    write_b_varchar(&mut body, old);

    buf.put_u8(TokenType::EnvChange as u8);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(&body);
}

fn encode_done(buf: &mut BytesMut, status: u16, row_count: u64) {
    buf.put_u8(TokenType::Done as u8);
    buf.put_u16_le(status);
    buf.put_u16_le(0);
    buf.put_u64_le(row_count);
}

fn encode_scalar_int(value: i32) -> Vec<u8> {
    let mut buf = BytesMut::new();

    // COLMETADATA: one nullable INTN column.
    buf.put_u8(TokenType::ColMetaData as u8);
    buf.put_u16_le(1);
    buf.put_u32_le(0); // user type
    buf.put_u16_le(0x0001); // nullable
    buf.put_u8(0x26); // INTN
    buf.put_u8(4); // max length
    write_b_varchar(&mut buf, "value");

    // ROW.
    buf.put_u8(TokenType::Row as u8);
    buf.put_u8(4);
    buf.put_i32_le(value);

    encode_done(&mut buf, 0x0010, 1); // count valid
    buf.to_vec()
}

fn encode_scalar_string(value: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let byte_len = value.encode_utf16().count() * 2;

    // COLMETADATA: one nullable NVARCHAR column.
    buf.put_u8(TokenType::ColMetaData as u8);
    buf.put_u16_le(1);
    buf.put_u32_le(0);
    buf.put_u16_le(0x0001);
    buf.put_u8(0xE7); // NVARCHAR
    buf.put_u16_le(byte_len.max(2) as u16);
    buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]); // collation
    write_b_varchar(&mut buf, "value");

    // ROW.
    buf.put_u8(TokenType::Row as u8);
    buf.put_u16_le(byte_len as u16);
    write_utf16_string(&mut buf, value);

    encode_done(&mut buf, 0x0010, 1);
    buf.to_vec()
}

fn encode_affected(count: u64) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_done(&mut buf, 0x0010, count);
    buf.to_vec()
}

fn encode_error(number: i32, message: &str, severity: u8) -> Vec<u8> {
    let mut buf = BytesMut::new();

    let mut body = BytesMut::new();
    body.put_i32_le(number);
    body.put_u8(1); // state
    body.put_u8(severity);
    write_us_varchar(&mut body, message);
    write_b_varchar(&mut body, "mock");
    write_b_varchar(&mut body, "");
    body.put_i32_le(1);

    buf.put_u8(TokenType::Error as u8);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(&body);

    encode_done(&mut buf, 0x0002, 0); // error bit
    buf.to_vec()
}

fn encode_attention_ack() -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_done(&mut buf, 0x0020, 0); // attention bit
    buf.to_vec()
}
