//! TDS response token definitions.
//!
//! A response payload is a sequence of self-describing tokens: the first
//! byte identifies the kind, the rest is token-specific. Fixed-size tokens
//! (the DONE family) carry no length; most others carry a u16 length
//! prefix; COLMETADATA and row tokens are self-delimiting through the
//! column metadata and are decoded incrementally by the connection layer.
//!
//! Decoders here operate on the token *body*, after the caller has
//! consumed the token-type byte and (where present) the length prefix.

use bytes::{Buf, BufMut, Bytes};

use crate::codec::{read_b_varchar, read_us_varchar, read_utf16_string};
use crate::error::WireError;

/// Token type identifier, the first byte of each response token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// RETURNSTATUS.
    ReturnStatus = 0x79,
    /// COLMETADATA.
    ColMetaData = 0x81,
    /// TABNAME.
    TabName = 0xA4,
    /// COLINFO.
    ColInfo = 0xA5,
    /// ORDER.
    Order = 0xA9,
    /// ERROR.
    Error = 0xAA,
    /// INFO.
    Info = 0xAB,
    /// RETURNVALUE.
    ReturnValue = 0xAC,
    /// LOGINACK.
    LoginAck = 0xAD,
    /// FEATUREEXTACK.
    FeatureExtAck = 0xAE,
    /// ROW.
    Row = 0xD1,
    /// NBCROW (null-bitmap-compressed row).
    NbcRow = 0xD2,
    /// ENVCHANGE.
    EnvChange = 0xE3,
    /// SESSIONSTATE.
    SessionState = 0xE4,
    /// SSPI.
    Sspi = 0xED,
    /// FEDAUTHINFO.
    FedAuthInfo = 0xEE,
    /// DONE.
    Done = 0xFD,
    /// DONEPROC.
    DoneProc = 0xFE,
    /// DONEINPROC.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xED => Self::Sspi,
            0xEE => Self::FedAuthInfo,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return None,
        })
    }

    /// Human-readable token name for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ReturnStatus => "RETURNSTATUS",
            Self::ColMetaData => "COLMETADATA",
            Self::TabName => "TABNAME",
            Self::ColInfo => "COLINFO",
            Self::Order => "ORDER",
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::ReturnValue => "RETURNVALUE",
            Self::LoginAck => "LOGINACK",
            Self::FeatureExtAck => "FEATUREEXTACK",
            Self::Row => "ROW",
            Self::NbcRow => "NBCROW",
            Self::EnvChange => "ENVCHANGE",
            Self::SessionState => "SESSIONSTATE",
            Self::Sspi => "SSPI",
            Self::FedAuthInfo => "FEDAUTHINFO",
            Self::Done => "DONE",
            Self::DoneProc => "DONEPROC",
            Self::DoneInProc => "DONEINPROC",
        }
    }
}

/// DONE status bits, decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneStatus {
    /// More result sets follow.
    pub more: bool,
    /// An error occurred in the statement.
    pub error: bool,
    /// A transaction is in progress.
    pub in_xact: bool,
    /// The row count field is valid.
    pub count: bool,
    /// Acknowledges an attention (cancel) request.
    pub attention: bool,
    /// A server error terminated the statement.
    pub server_error: bool,
}

mod done_bits {
    pub const MORE: u16 = 0x0001;
    pub const ERROR: u16 = 0x0002;
    pub const INXACT: u16 = 0x0004;
    pub const COUNT: u16 = 0x0010;
    pub const ATTN: u16 = 0x0020;
    pub const SRVERROR: u16 = 0x0100;
}

impl DoneStatus {
    /// Decode from the raw status bits.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        Self {
            more: bits & done_bits::MORE != 0,
            error: bits & done_bits::ERROR != 0,
            in_xact: bits & done_bits::INXACT != 0,
            count: bits & done_bits::COUNT != 0,
            attention: bits & done_bits::ATTN != 0,
            server_error: bits & done_bits::SRVERROR != 0,
        }
    }

    /// Encode to the raw status bits.
    #[must_use]
    pub fn to_bits(self) -> u16 {
        let mut bits = 0;
        if self.more {
            bits |= done_bits::MORE;
        }
        if self.error {
            bits |= done_bits::ERROR;
        }
        if self.in_xact {
            bits |= done_bits::INXACT;
        }
        if self.count {
            bits |= done_bits::COUNT;
        }
        if self.attention {
            bits |= done_bits::ATTN;
        }
        if self.server_error {
            bits |= done_bits::SRVERROR;
        }
        bits
    }

    /// Whether this DONE terminates the whole response.
    #[must_use]
    pub fn is_final(self) -> bool {
        !self.more
    }
}

/// DONE / DONEPROC / DONEINPROC token body.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Token of the current command.
    pub cur_cmd: u16,
    /// Affected row count when `status.count` is set.
    pub row_count: u64,
}

impl Done {
    /// Body size in bytes (the DONE family carries no length prefix).
    pub const SIZE: usize = 12;

    /// Decode a DONE body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < Self::SIZE {
            return Err(WireError::Incomplete {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            status: DoneStatus::from_bits(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode the token including its type byte.
    pub fn encode(&self, token_type: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token_type as u8);
        dst.put_u16_le(self.status.to_bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }
}

/// ERROR token body (after the u16 length prefix).
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Server error number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class (0..=25).
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Reporting server name.
    pub server: String,
    /// Procedure name, if raised inside one.
    pub procedure: String,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerError {
    /// Decode the fields following the length prefix.
    pub fn decode_body(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < 6 {
            return Err(WireError::UnexpectedEof);
        }
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();

        let message = read_us_varchar(src).ok_or(WireError::UnexpectedEof)?;
        let server = read_b_varchar(src).ok_or(WireError::UnexpectedEof)?;
        let procedure = read_b_varchar(src).ok_or(WireError::UnexpectedEof)?;

        if src.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let line = src.get_i32_le();

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Whether this error is fatal to the connection (class >= 20).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

/// INFO token body. Same layout as ERROR, lower severity.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Message number.
    pub number: i32,
    /// State.
    pub state: u8,
    /// Class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Reporting server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerInfo {
    /// Decode the fields following the length prefix.
    pub fn decode_body(src: &mut impl Buf) -> Result<Self, WireError> {
        let e = ServerError::decode_body(src)?;
        Ok(Self {
            number: e.number,
            state: e.state,
            class: e.class,
            message: e.message,
            server: e.server,
            procedure: e.procedure,
            line: e.line,
        })
    }
}

/// LOGINACK token body (after the length prefix).
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// Interface type.
    pub interface: u8,
    /// Negotiated TDS version (big-endian on the wire).
    pub tds_version: u32,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: u32,
}

impl LoginAck {
    /// Decode the fields following the length prefix.
    pub fn decode_body(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < 5 {
            return Err(WireError::UnexpectedEof);
        }
        let interface = src.get_u8();
        let tds_version = src.get_u32();
        let prog_name = read_b_varchar(src).ok_or(WireError::UnexpectedEof)?;

        if src.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let prog_version = src.get_u32();

        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }
}

/// ENVCHANGE sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvChangeType {
    /// Database changed.
    Database = 1,
    /// Language changed.
    Language = 2,
    /// Character set changed.
    CharacterSet = 3,
    /// Packet size renegotiated.
    PacketSize = 4,
    /// Unicode sorting locale.
    UnicodeSortingLocale = 5,
    /// Unicode comparison flags.
    UnicodeComparisonFlags = 6,
    /// Collation changed.
    SqlCollation = 7,
    /// Transaction began; new value is the transaction descriptor.
    BeginTransaction = 8,
    /// Transaction committed.
    CommitTransaction = 9,
    /// Transaction rolled back.
    RollbackTransaction = 10,
    /// DTC transaction enlisted.
    EnlistDtcTransaction = 11,
    /// DTC transaction defected.
    DefectTransaction = 12,
    /// Real-time log shipping info.
    RealTimeLogShipping = 13,
    /// Transaction promoted.
    PromoteTransaction = 15,
    /// Transaction manager address.
    TransactionManagerAddress = 16,
    /// Transaction ended.
    TransactionEnded = 17,
    /// Acknowledges a connection reset.
    ResetConnectionAck = 18,
    /// User instance started.
    UserInstanceStarted = 19,
    /// Routing redirect.
    Routing = 20,
}

impl EnvChangeType {
    /// Create from the raw byte value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharacterSet,
            4 => Self::PacketSize,
            5 => Self::UnicodeSortingLocale,
            6 => Self::UnicodeComparisonFlags,
            7 => Self::SqlCollation,
            8 => Self::BeginTransaction,
            9 => Self::CommitTransaction,
            10 => Self::RollbackTransaction,
            11 => Self::EnlistDtcTransaction,
            12 => Self::DefectTransaction,
            13 => Self::RealTimeLogShipping,
            15 => Self::PromoteTransaction,
            16 => Self::TransactionManagerAddress,
            17 => Self::TransactionEnded,
            18 => Self::ResetConnectionAck,
            19 => Self::UserInstanceStarted,
            20 => Self::Routing,
            _ => return None,
        })
    }
}

/// ENVCHANGE value, string or binary depending on the sub-type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChangeValue {
    /// String-typed value.
    String(String),
    /// Binary-typed value (transaction descriptors, collation bytes).
    Binary(Bytes),
    /// Routing target.
    Routing {
        /// Redirect host.
        host: String,
        /// Redirect port.
        port: u16,
    },
}

/// ENVCHANGE token body (after the length prefix).
#[derive(Debug, Clone)]
pub struct EnvChange {
    /// Sub-type of the change.
    pub env_type: EnvChangeType,
    /// New value.
    pub new_value: EnvChangeValue,
    /// Old value.
    pub old_value: EnvChangeValue,
}

impl EnvChange {
    /// Decode the fields following the length prefix.
    pub fn decode_body(src: &mut impl Buf) -> Result<Self, WireError> {
        if !src.has_remaining() {
            return Err(WireError::UnexpectedEof);
        }
        let type_byte = src.get_u8();
        let env_type =
            EnvChangeType::from_u8(type_byte).ok_or(WireError::InvalidField {
                field: "envchange type",
                value: u64::from(type_byte),
            })?;

        let (new_value, old_value) = match env_type {
            EnvChangeType::Routing => {
                let new_value = Self::decode_routing(src)?;
                // Old value is an empty placeholder for routing.
                if src.remaining() >= 2 {
                    src.advance(2);
                }
                (new_value, EnvChangeValue::Binary(Bytes::new()))
            }
            EnvChangeType::BeginTransaction
            | EnvChangeType::CommitTransaction
            | EnvChangeType::RollbackTransaction
            | EnvChangeType::EnlistDtcTransaction
            | EnvChangeType::TransactionEnded
            | EnvChangeType::SqlCollation => {
                let new_value = Self::decode_binary(src)?;
                let old_value = Self::decode_binary(src)?;
                (new_value, old_value)
            }
            _ => {
                let new_value = read_b_varchar(src)
                    .map(EnvChangeValue::String)
                    .ok_or(WireError::UnexpectedEof)?;
                let old_value = read_b_varchar(src)
                    .map(EnvChangeValue::String)
                    .ok_or(WireError::UnexpectedEof)?;
                (new_value, old_value)
            }
        };

        Ok(Self {
            env_type,
            new_value,
            old_value,
        })
    }

    fn decode_binary(src: &mut impl Buf) -> Result<EnvChangeValue, WireError> {
        if !src.has_remaining() {
            return Err(WireError::UnexpectedEof);
        }
        let len = src.get_u8() as usize;
        if src.remaining() < len {
            return Err(WireError::UnexpectedEof);
        }
        Ok(EnvChangeValue::Binary(src.copy_to_bytes(len)))
    }

    fn decode_routing(src: &mut impl Buf) -> Result<EnvChangeValue, WireError> {
        // routing value: length u16, protocol u8, port u16, server us_varchar
        if src.remaining() < 7 {
            return Err(WireError::UnexpectedEof);
        }
        let _value_len = src.get_u16_le();
        let protocol = src.get_u8();
        if protocol != 0 {
            return Err(WireError::InvalidField {
                field: "routing protocol",
                value: u64::from(protocol),
            });
        }
        let port = src.get_u16_le();
        let server_len = src.get_u16_le() as usize;
        let host =
            read_utf16_string(src, server_len).ok_or(WireError::UnexpectedEof)?;
        Ok(EnvChangeValue::Routing { host, port })
    }

    /// Routing target, if this is a routing change.
    #[must_use]
    pub fn routing_target(&self) -> Option<(&str, u16)> {
        match &self.new_value {
            EnvChangeValue::Routing { host, port } => Some((host, *port)),
            _ => None,
        }
    }

    /// New transaction descriptor, for the transaction sub-types.
    #[must_use]
    pub fn transaction_descriptor(&self) -> Option<u64> {
        match (&self.env_type, &self.new_value) {
            (
                EnvChangeType::BeginTransaction | EnvChangeType::EnlistDtcTransaction,
                EnvChangeValue::Binary(bytes),
            ) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Some(u64::from_le_bytes(raw))
            }
            (
                EnvChangeType::CommitTransaction
                | EnvChangeType::RollbackTransaction
                | EnvChangeType::TransactionEnded,
                _,
            ) => Some(0),
            _ => None,
        }
    }
}

/// One acknowledged feature from FEATUREEXTACK.
#[derive(Debug, Clone)]
pub struct FeatureAck {
    /// Feature identifier (matches the LOGIN7 feature-extension id).
    pub feature_id: u8,
    /// Feature acknowledgment data.
    pub data: Bytes,
}

/// FEATUREEXTACK token body: `{id:u8, len:u32, data}` repeated until 0xFF.
pub fn decode_feature_ext_ack(src: &mut impl Buf) -> Result<Vec<FeatureAck>, WireError> {
    let mut features = Vec::new();
    loop {
        if !src.has_remaining() {
            return Err(WireError::UnexpectedEof);
        }
        let feature_id = src.get_u8();
        if feature_id == 0xFF {
            break;
        }
        if src.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let len = src.get_u32_le() as usize;
        if src.remaining() < len {
            return Err(WireError::Incomplete {
                expected: len,
                actual: src.remaining(),
            });
        }
        features.push(FeatureAck {
            feature_id,
            data: src.copy_to_bytes(len),
        });
    }
    Ok(features)
}

/// FEDAUTHINFO token body: STS URL and SPN for the federated-auth flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FedAuthInfo {
    /// Security token service URL.
    pub sts_url: String,
    /// Service principal name.
    pub spn: String,
}

/// Federated-auth info identifiers.
mod fedauth_info_id {
    pub const STS_URL: u8 = 0x01;
    pub const SPN: u8 = 0x02;
}

impl FedAuthInfo {
    /// Decode the token body, after the u32 token-length prefix.
    ///
    /// The body is a count of info options followed by an option table of
    /// `{id:u8, data_len:u32, data_offset:u32}`; offsets are relative to
    /// the start of the body (the count field).
    pub fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let mut src = body;
        if src.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let count = src.get_u32_le() as usize;
        if src.remaining() < count * 9 {
            return Err(WireError::UnexpectedEof);
        }

        let mut info = Self::default();
        for _ in 0..count {
            let id = src.get_u8();
            let data_len = src.get_u32_le() as usize;
            let data_offset = src.get_u32_le() as usize;

            if data_offset + data_len > body.len() {
                return Err(WireError::UnexpectedEof);
            }
            let mut data = &body[data_offset..data_offset + data_len];
            let value = read_utf16_string(&mut data, data_len / 2)
                .ok_or(WireError::InvalidString)?;

            match id {
                fedauth_info_id::STS_URL => info.sts_url = value,
                fedauth_info_id::SPN => info.spn = value,
                _ => {}
            }
        }
        Ok(info)
    }

    /// Encode the token body (count + option table + data area).
    #[must_use]
    pub fn encode_body(&self) -> Bytes {
        use bytes::BytesMut;

        let entries = [
            (fedauth_info_id::STS_URL, &self.sts_url),
            (fedauth_info_id::SPN, &self.spn),
        ];

        let mut buf = BytesMut::new();
        buf.put_u32_le(entries.len() as u32);

        let mut offset = 4 + entries.len() * 9;
        let mut data = BytesMut::new();
        for (id, value) in entries {
            let byte_len = crate::codec::utf16_byte_len(value);
            buf.put_u8(id);
            buf.put_u32_le(byte_len as u32);
            buf.put_u32_le(offset as u32);
            crate::codec::write_utf16_string(&mut data, value);
            offset += byte_len;
        }
        buf.extend_from_slice(&data);
        buf.freeze()
    }
}

/// A multi-part SQL object name read from the token stream.
///
/// Parts are assigned right to left: object, schema, database, server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlIdentifier {
    /// Server name (4-part names only).
    pub server: Option<String>,
    /// Database name (3+ parts).
    pub database: Option<String>,
    /// Schema name (2+ parts).
    pub schema: Option<String>,
    /// Object name.
    pub object: String,
}

impl SqlIdentifier {
    /// Assemble from 1..=4 name parts in wire order.
    pub fn from_parts(mut parts: Vec<String>) -> Result<Self, WireError> {
        if parts.is_empty() || parts.len() > 4 {
            return Err(WireError::InvalidField {
                field: "identifier part count",
                value: parts.len() as u64,
            });
        }

        let object = parts.pop().unwrap_or_default();
        let schema = parts.pop();
        let database = parts.pop();
        let server = parts.pop();
        Ok(Self {
            server,
            database,
            schema,
            object,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn done_roundtrip() {
        let done = Done {
            status: DoneStatus {
                more: false,
                error: false,
                in_xact: true,
                count: true,
                attention: false,
                server_error: false,
            },
            cur_cmd: 0xC1,
            row_count: 42,
        };

        let mut buf = BytesMut::new();
        done.encode(TokenType::Done, &mut buf);
        assert_eq!(buf[0], TokenType::Done as u8);

        let mut cursor = &buf[1..];
        let decoded = Done::decode(&mut cursor).unwrap();
        assert_eq!(decoded.status.to_bits(), done.status.to_bits());
        assert_eq!(decoded.row_count, 42);
        assert!(decoded.status.is_final());
    }

    #[test]
    fn done_attention_bit() {
        let status = DoneStatus::from_bits(0x0020);
        assert!(status.attention);
        assert_eq!(status.to_bits(), 0x0020);
    }

    #[test]
    fn server_error_body_roundtrip() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(8134); // divide by zero
        buf.put_u8(1); // state
        buf.put_u8(16); // class
        crate::codec::write_us_varchar(&mut buf, "Divide by zero error encountered.");
        crate::codec::write_b_varchar(&mut buf, "testserver");
        crate::codec::write_b_varchar(&mut buf, "");
        buf.put_i32_le(1);

        let mut cursor = buf.freeze();
        let error = ServerError::decode_body(&mut cursor).unwrap();
        assert_eq!(error.number, 8134);
        assert_eq!(error.class, 16);
        assert!(!error.is_fatal());
        assert!(error.message.contains("Divide by zero"));
    }

    #[test]
    fn login_ack_body() {
        let mut buf = BytesMut::new();
        buf.put_u8(1); // interface
        buf.put_u32(0x74000004); // TDS version, big-endian
        crate::codec::write_b_varchar(&mut buf, "Microsoft SQL Server");
        buf.put_u32(0x10000000);

        let mut cursor = buf.freeze();
        let ack = LoginAck::decode_body(&mut cursor).unwrap();
        assert_eq!(ack.tds_version, 0x74000004);
        assert_eq!(ack.prog_name, "Microsoft SQL Server");
    }

    #[test]
    fn env_change_database() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::Database as u8);
        crate::codec::write_b_varchar(&mut buf, "resDB");
        crate::codec::write_b_varchar(&mut buf, "master");

        let mut cursor = buf.freeze();
        let env = EnvChange::decode_body(&mut cursor).unwrap();
        assert_eq!(env.env_type, EnvChangeType::Database);
        assert_eq!(env.new_value, EnvChangeValue::String("resDB".into()));
        assert_eq!(env.old_value, EnvChangeValue::String("master".into()));
    }

    #[test]
    fn env_change_begin_transaction_descriptor() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::BeginTransaction as u8);
        buf.put_u8(8);
        buf.put_u64_le(0x0123_4567_89AB_CDEF);
        buf.put_u8(0);

        let mut cursor = buf.freeze();
        let env = EnvChange::decode_body(&mut cursor).unwrap();
        assert_eq!(env.transaction_descriptor(), Some(0x0123_4567_89AB_CDEF));
    }

    #[test]
    fn env_change_routing() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::Routing as u8);
        let host = "failover.example.net";
        buf.put_u16_le((5 + host.len() * 2) as u16);
        buf.put_u8(0); // protocol: TCP
        buf.put_u16_le(11000);
        buf.put_u16_le(host.len() as u16);
        crate::codec::write_utf16_string(&mut buf, host);
        buf.put_u16_le(0); // old value

        let mut cursor = buf.freeze();
        let env = EnvChange::decode_body(&mut cursor).unwrap();
        assert_eq!(env.routing_target(), Some((host, 11000)));
    }

    #[test]
    fn feature_ext_ack_walk() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x04); // column encryption
        buf.put_u32_le(1);
        buf.put_u8(0x01);
        buf.put_u8(0x01); // session recovery
        buf.put_u32_le(0);
        buf.put_u8(0xFF);

        let mut cursor = buf.freeze();
        let features = decode_feature_ext_ack(&mut cursor).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].feature_id, 0x04);
        assert_eq!(features[0].data.as_ref(), &[0x01]);
        assert_eq!(features[1].feature_id, 0x01);
    }

    #[test]
    fn feature_ext_ack_missing_terminator() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x04);
        buf.put_u32_le(1);
        buf.put_u8(0x01);
        // no terminator

        let mut cursor = buf.freeze();
        assert!(decode_feature_ext_ack(&mut cursor).is_err());
    }

    #[test]
    fn fed_auth_info_roundtrip() {
        let info = FedAuthInfo {
            sts_url: "https://login.example.com/common".into(),
            spn: "https://database.example.net/".into(),
        };
        let body = info.encode_body();
        let decoded = FedAuthInfo::decode_body(&body).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn sql_identifier_right_to_left() {
        let id = SqlIdentifier::from_parts(vec![
            "srv".into(),
            "db".into(),
            "dbo".into(),
            "t".into(),
        ])
        .unwrap();
        assert_eq!(id.server.as_deref(), Some("srv"));
        assert_eq!(id.database.as_deref(), Some("db"));
        assert_eq!(id.schema.as_deref(), Some("dbo"));
        assert_eq!(id.object, "t");

        let id = SqlIdentifier::from_parts(vec!["t".into()]).unwrap();
        assert!(id.schema.is_none());
        assert_eq!(id.object, "t");

        assert!(SqlIdentifier::from_parts(vec![]).is_err());
        assert!(SqlIdentifier::from_parts(vec!["a".into(); 5]).is_err());
    }
}
