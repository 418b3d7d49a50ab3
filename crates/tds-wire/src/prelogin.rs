//! TDS pre-login handshake payload.
//!
//! The pre-login message is the first exchange on a new connection. Both
//! directions share the same shape: a table of option descriptors
//! `{option:u8, offset:u16be, length:u16be}` terminated by `0xFF`,
//! followed by the option payloads at the given absolute offsets.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::version::TdsVersion;

/// Pre-login option identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// VERSION: protocol/product version.
    Version = 0x00,
    /// ENCRYPTION: encryption negotiation byte.
    Encryption = 0x01,
    /// INSTOPT: instance name.
    Instance = 0x02,
    /// THREADID: client thread id, for server-side tracing.
    ThreadId = 0x03,
    /// MARS: multiple active result sets.
    Mars = 0x04,
    /// TRACEID: activity id for distributed tracing.
    TraceId = 0x05,
    /// FEDAUTHREQUIRED: federated authentication negotiation.
    FedAuthRequired = 0x06,
    /// Terminator.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from the raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0x06 => Ok(Self::FedAuthRequired),
            0xFF => Ok(Self::Terminator),
            _ => Err(WireError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level carried in the ENCRYPTION option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encryption available but off: TLS protects only the login exchange.
    #[default]
    Off = 0x00,
    /// Encryption on for the whole session.
    On = 0x01,
    /// Encryption not supported by this peer.
    NotSupported = 0x02,
    /// Encryption required by this peer.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from the raw byte value.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            _ => Self::Off,
        }
    }
}

/// A client trace identifier: activity GUID plus sequence.
#[derive(Debug, Clone, Copy)]
pub struct TraceId {
    /// Activity id (GUID bytes).
    pub activity_id: [u8; 16],
    /// Activity sequence number.
    pub activity_sequence: u32,
}

/// Pre-login message, used for both the client request and the server
/// response.
#[derive(Debug, Clone, Default)]
pub struct PreLogin {
    /// Version: the client sends its driver version, the server its
    /// product version. Raw big-endian value plus the u16 sub-build.
    pub version: u32,
    /// Sub-build number accompanying the version.
    pub sub_build: u16,
    /// Encryption negotiation byte.
    pub encryption: EncryptionLevel,
    /// Named-instance option.
    pub instance: Option<String>,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS flag.
    pub mars: bool,
    /// Distributed-tracing identifier.
    pub trace_id: Option<TraceId>,
    /// Whether federated authentication is required/supported.
    pub fed_auth_required: bool,
}

impl PreLogin {
    /// Create a client pre-login with the given TDS version request.
    #[must_use]
    pub fn client(tds_version: TdsVersion, encryption: EncryptionLevel) -> Self {
        Self {
            version: tds_version.raw(),
            encryption,
            ..Self::default()
        }
    }

    /// Encode to the option-table wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // VERSION, ENCRYPTION and MARS are always present.
        let mut option_count = 3;
        if self.instance.is_some() {
            option_count += 1;
        }
        if self.thread_id.is_some() {
            option_count += 1;
        }
        if self.trace_id.is_some() {
            option_count += 1;
        }
        if self.fed_auth_required {
            option_count += 1;
        }

        let header_size = option_count * 5 + 1;
        let mut offset = header_size as u16;
        let mut table = BytesMut::with_capacity(header_size);
        let mut data = BytesMut::new();

        // VERSION: 4 bytes big-endian + 2-byte sub-build.
        table.put_u8(PreLoginOption::Version as u8);
        table.put_u16(offset);
        table.put_u16(6);
        data.put_u32(self.version);
        data.put_u16_le(self.sub_build);
        offset += 6;

        // ENCRYPTION: 1 byte.
        table.put_u8(PreLoginOption::Encryption as u8);
        table.put_u16(offset);
        table.put_u16(1);
        data.put_u8(self.encryption as u8);
        offset += 1;

        if let Some(ref instance) = self.instance {
            let len = instance.len() as u16 + 1;
            table.put_u8(PreLoginOption::Instance as u8);
            table.put_u16(offset);
            table.put_u16(len);
            data.put_slice(instance.as_bytes());
            data.put_u8(0);
            offset += len;
        }

        if let Some(thread_id) = self.thread_id {
            table.put_u8(PreLoginOption::ThreadId as u8);
            table.put_u16(offset);
            table.put_u16(4);
            data.put_u32(thread_id);
            offset += 4;
        }

        // MARS: 1 byte.
        table.put_u8(PreLoginOption::Mars as u8);
        table.put_u16(offset);
        table.put_u16(1);
        data.put_u8(u8::from(self.mars));
        offset += 1;

        if let Some(ref trace) = self.trace_id {
            table.put_u8(PreLoginOption::TraceId as u8);
            table.put_u16(offset);
            table.put_u16(36);
            data.put_slice(&trace.activity_id);
            data.put_u32_le(trace.activity_sequence);
            data.put_slice(&[0u8; 16]);
            offset += 36;
        }

        if self.fed_auth_required {
            table.put_u8(PreLoginOption::FedAuthRequired as u8);
            table.put_u16(offset);
            table.put_u16(1);
            data.put_u8(0x01);
        }

        table.put_u8(PreLoginOption::Terminator as u8);
        table.extend_from_slice(&data);
        table.freeze()
    }

    /// Decode a pre-login payload.
    ///
    /// Offsets in the option table are absolute from the start of the
    /// payload; options whose offsets fall inside the table or past the
    /// end are skipped rather than treated as fatal.
    pub fn decode(mut src: impl Buf) -> Result<Self, WireError> {
        let mut options = Vec::new();
        loop {
            if !src.has_remaining() {
                return Err(WireError::UnexpectedEof);
            }
            let option_byte = src.get_u8();
            if option_byte == PreLoginOption::Terminator as u8 {
                break;
            }
            if src.remaining() < 4 {
                return Err(WireError::UnexpectedEof);
            }
            let offset = src.get_u16() as usize;
            let length = src.get_u16() as usize;
            options.push((PreLoginOption::from_u8(option_byte)?, offset, length));
        }

        let data = src.copy_to_bytes(src.remaining());
        let header_size = options.len() * 5 + 1;
        let mut prelogin = Self::default();

        for (option, abs_offset, length) in options {
            if abs_offset < header_size {
                continue;
            }
            let start = abs_offset - header_size;
            if start + length > data.len() {
                continue;
            }
            let field = &data[start..start + length];

            match option {
                PreLoginOption::Version if length >= 4 => {
                    prelogin.version =
                        u32::from_be_bytes([field[0], field[1], field[2], field[3]]);
                    if length >= 6 {
                        prelogin.sub_build = u16::from_le_bytes([field[4], field[5]]);
                    }
                }
                PreLoginOption::Encryption if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(field[0]);
                }
                PreLoginOption::Instance if length > 0 => {
                    if let Some(nul) = field.iter().position(|&b| b == 0) {
                        if let Ok(name) = core::str::from_utf8(&field[..nul]) {
                            if !name.is_empty() {
                                prelogin.instance = Some(name.to_string());
                            }
                        }
                    }
                }
                PreLoginOption::ThreadId if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([field[0], field[1], field[2], field[3]]));
                }
                PreLoginOption::Mars if length >= 1 => {
                    prelogin.mars = field[0] != 0;
                }
                PreLoginOption::FedAuthRequired if length >= 1 => {
                    prelogin.fed_auth_required = field[0] != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_prelogin_roundtrip() {
        let prelogin = PreLogin {
            mars: true,
            fed_auth_required: true,
            ..PreLogin::client(TdsVersion::DENALI, EncryptionLevel::Required)
        };

        let encoded = prelogin.encode();
        assert_eq!(encoded[0], PreLoginOption::Version as u8);

        let decoded = PreLogin::decode(encoded.as_ref()).unwrap();
        assert_eq!(decoded.version, TdsVersion::DENALI.raw());
        assert_eq!(decoded.encryption, EncryptionLevel::Required);
        assert!(decoded.mars);
        assert!(decoded.fed_auth_required);
    }

    #[test]
    fn instance_option_roundtrip() {
        let prelogin = PreLogin {
            instance: Some("SQLEXPRESS".into()),
            ..PreLogin::client(TdsVersion::DENALI, EncryptionLevel::Off)
        };

        let decoded = PreLogin::decode(prelogin.encode().as_ref()).unwrap();
        assert_eq!(decoded.instance.as_deref(), Some("SQLEXPRESS"));
    }

    #[test]
    fn decode_honors_absolute_offsets() {
        // Hand-built payload with options listed out of data order.
        let mut buf = BytesMut::new();
        let header_size: u16 = 11; // two options + terminator

        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(header_size);
        buf.put_u16(1);

        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(header_size + 1);
        buf.put_u16(6);

        buf.put_u8(PreLoginOption::Terminator as u8);

        buf.put_u8(0x01); // encryption: ON
        buf.put_u32(0x74000004);
        buf.put_u16_le(0);

        let decoded = PreLogin::decode(buf.freeze().as_ref()).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::On);
        assert_eq!(decoded.version, 0x74000004);
    }

    #[test]
    fn unknown_option_byte_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x7E);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u8(0xFF);
        assert!(PreLogin::decode(buf.freeze().as_ref()).is_err());
    }
}
