//! LOGIN7 request payload.
//!
//! The LOGIN7 packet carries client identity, credentials, and feature
//! negotiation. It is a 94-byte fixed header of offset/length pairs
//! followed by the variable-length field data (UTF-16LE strings) and an
//! optional feature-extension block.
//!
//! The password is obfuscated, not encrypted: each byte has its nibbles
//! swapped and is then XORed with 0xA5. TLS is what actually protects the
//! exchange.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;
use crate::version::TdsVersion;

/// Size of the fixed LOGIN7 header.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Feature-extension identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeatureId {
    /// Session recovery (connection resiliency).
    SessionRecovery = 0x01,
    /// Federated authentication.
    FedAuth = 0x02,
    /// Column encryption (Always Encrypted).
    ColumnEncryption = 0x04,
    /// Block terminator.
    Terminator = 0xFF,
}

/// One feature-extension block: `{id:u8, len:u32le, data}`.
#[derive(Debug, Clone)]
pub struct FeatureExtension {
    /// Feature identifier.
    pub feature_id: FeatureId,
    /// Feature payload.
    pub data: Bytes,
}

impl FeatureExtension {
    /// Column-encryption feature requesting protocol version 1.
    #[must_use]
    pub fn column_encryption() -> Self {
        Self {
            feature_id: FeatureId::ColumnEncryption,
            data: Bytes::from_static(&[0x01]),
        }
    }

    /// Session-recovery feature with no initial state (fresh connect).
    #[must_use]
    pub fn session_recovery() -> Self {
        Self {
            feature_id: FeatureId::SessionRecovery,
            data: Bytes::new(),
        }
    }

    /// Federated-authentication feature block.
    ///
    /// `workflow` selects the token acquisition flow; `echo` mirrors the
    /// server's FEDAUTHREQUIRED pre-login answer.
    #[must_use]
    pub fn fed_auth(workflow: u8, echo: bool) -> Self {
        let options = (workflow << 1) | u8::from(echo);
        Self {
            feature_id: FeatureId::FedAuth,
            data: Bytes::copy_from_slice(&[options]),
        }
    }
}

/// LOGIN7 payload builder.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Requested TDS version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Connection id (used by connection pools).
    pub connection_id: u32,
    /// Option flags 1 (raw byte).
    pub option_flags1: u8,
    /// Option flags 2 (raw byte). Bit 7 selects integrated security.
    pub option_flags2: u8,
    /// Type flags (raw byte).
    pub type_flags: u8,
    /// Option flags 3 (raw byte). Bit 4 signals a feature-extension block.
    pub option_flags3: u8,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login user name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Login language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client id (MAC address slot, conventionally zeros).
    pub client_id: [u8; 6],
    /// SSPI blob for integrated authentication.
    pub sspi_data: Vec<u8>,
    /// Attach-database file name.
    pub attach_db_file: String,
    /// New password, for password-change logins.
    pub new_password: String,
    /// Feature-extension blocks.
    pub features: Vec<FeatureExtension>,
}

mod option_flags {
    /// OptionFlags1: warn on USE database.
    pub const USE_DB_NOTIFY: u8 = 0x20;
    /// OptionFlags1: initial database must exist.
    pub const DATABASE_FATAL: u8 = 0x40;
    /// OptionFlags2: initial language must be valid.
    pub const LANGUAGE_FATAL: u8 = 0x01;
    /// OptionFlags2: ODBC defaults.
    pub const ODBC: u8 = 0x02;
    /// OptionFlags2: integrated security.
    pub const INTEGRATED_SECURITY: u8 = 0x80;
    /// OptionFlags3: unknown collation handling.
    pub const UNKNOWN_COLLATION: u8 = 0x08;
    /// OptionFlags3: feature-extension block present.
    pub const EXTENSION: u8 = 0x10;
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::DENALI,
            packet_size: crate::packet::DEFAULT_PACKET_SIZE as u32,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: option_flags::USE_DB_NOTIFY | option_flags::DATABASE_FATAL,
            option_flags2: option_flags::LANGUAGE_FATAL | option_flags::ODBC,
            type_flags: 0,
            option_flags3: option_flags::UNKNOWN_COLLATION,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("tds-driver"),
            server_name: String::new(),
            library_name: String::from("tds-driver"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            sspi_data: Vec::new(),
            attach_db_file: String::new(),
            new_password: String::new(),
            features: Vec::new(),
        }
    }
}

impl Login7 {
    /// Create a LOGIN7 builder with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.option_flags2 &= !option_flags::INTEGRATED_SECURITY;
        self
    }

    /// Use integrated (SSPI) authentication with the given opaque blob.
    #[must_use]
    pub fn with_integrated_auth(mut self, sspi_data: Vec<u8>) -> Self {
        self.sspi_data = sspi_data;
        self.option_flags2 |= option_flags::INTEGRATED_SECURITY;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name as addressed by the client.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Append a feature-extension block.
    #[must_use]
    pub fn with_feature(mut self, feature: FeatureExtension) -> Self {
        self.option_flags3 |= option_flags::EXTENSION;
        self.features.push(feature);
        self
    }

    /// Whether the feature-extension block is present.
    #[must_use]
    pub fn has_extensions(&self) -> bool {
        self.option_flags3 & option_flags::EXTENSION != 0
    }

    /// Encode the full LOGIN7 payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut offset = LOGIN7_HEADER_SIZE as u16;

        let hostname_len = utf16_len(&self.hostname);
        let username_len = utf16_len(&self.username);
        let password_len = utf16_len(&self.password);
        let app_name_len = utf16_len(&self.app_name);
        let server_name_len = utf16_len(&self.server_name);
        let library_name_len = utf16_len(&self.library_name);
        let language_len = utf16_len(&self.language);
        let database_len = utf16_len(&self.database);
        let sspi_len = self.sspi_data.len() as u16;
        let attach_db_len = utf16_len(&self.attach_db_file);
        let new_password_len = utf16_len(&self.new_password);

        let mut var_data = BytesMut::new();

        let hostname_offset = offset;
        write_utf16_string(&mut var_data, &self.hostname);
        offset += hostname_len * 2;

        let username_offset = offset;
        write_utf16_string(&mut var_data, &self.username);
        offset += username_len * 2;

        let password_offset = offset;
        write_obfuscated_password(&mut var_data, &self.password);
        offset += password_len * 2;

        let app_name_offset = offset;
        write_utf16_string(&mut var_data, &self.app_name);
        offset += app_name_len * 2;

        let server_name_offset = offset;
        write_utf16_string(&mut var_data, &self.server_name);
        offset += server_name_len * 2;

        // The "unused" slot doubles as the feature-extension offset
        // pointer when extensions are present.
        let extension_slot_offset = offset;
        let (extension_slot_len, feature_block_offset) = if self.has_extensions() {
            let block_offset = offset as u32
                + 4
                + u32::from(library_name_len) * 2
                + u32::from(language_len) * 2
                + u32::from(database_len) * 2
                + u32::from(sspi_len)
                + u32::from(attach_db_len) * 2
                + u32::from(new_password_len) * 2;
            var_data.put_u32_le(block_offset);
            offset += 4;
            (4u16, Some(block_offset))
        } else {
            (0u16, None)
        };

        let library_name_offset = offset;
        write_utf16_string(&mut var_data, &self.library_name);
        offset += library_name_len * 2;

        let language_offset = offset;
        write_utf16_string(&mut var_data, &self.language);
        offset += language_len * 2;

        let database_offset = offset;
        write_utf16_string(&mut var_data, &self.database);
        offset += database_len * 2;

        let sspi_offset = offset;
        var_data.put_slice(&self.sspi_data);
        offset += sspi_len;

        let attach_db_offset = offset;
        write_utf16_string(&mut var_data, &self.attach_db_file);
        offset += attach_db_len * 2;

        let new_password_offset = offset;
        if !self.new_password.is_empty() {
            write_obfuscated_password(&mut var_data, &self.new_password);
        }

        if let Some(block_offset) = feature_block_offset {
            debug_assert_eq!(block_offset as usize, LOGIN7_HEADER_SIZE + var_data.len());
            for feature in &self.features {
                var_data.put_u8(feature.feature_id as u8);
                var_data.put_u32_le(feature.data.len() as u32);
                var_data.put_slice(&feature.data);
            }
            var_data.put_u8(FeatureId::Terminator as u8);
        }

        let total_length = LOGIN7_HEADER_SIZE + var_data.len();
        let mut buf = BytesMut::with_capacity(total_length);

        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);

        buf.put_u8(self.option_flags1);
        buf.put_u8(self.option_flags2);
        buf.put_u8(self.type_flags);
        buf.put_u8(self.option_flags3);

        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        buf.put_u16_le(hostname_offset);
        buf.put_u16_le(hostname_len);
        buf.put_u16_le(username_offset);
        buf.put_u16_le(username_len);
        buf.put_u16_le(password_offset);
        buf.put_u16_le(password_len);
        buf.put_u16_le(app_name_offset);
        buf.put_u16_le(app_name_len);
        buf.put_u16_le(server_name_offset);
        buf.put_u16_le(server_name_len);
        buf.put_u16_le(extension_slot_offset);
        buf.put_u16_le(extension_slot_len);
        buf.put_u16_le(library_name_offset);
        buf.put_u16_le(library_name_len);
        buf.put_u16_le(language_offset);
        buf.put_u16_le(language_len);
        buf.put_u16_le(database_offset);
        buf.put_u16_le(database_len);

        buf.put_slice(&self.client_id);

        buf.put_u16_le(sspi_offset);
        buf.put_u16_le(sspi_len);
        buf.put_u16_le(attach_db_offset);
        buf.put_u16_le(attach_db_len);
        buf.put_u16_le(new_password_offset);
        buf.put_u16_le(new_password_len);

        // Long SSPI length, for blobs over 64KiB.
        buf.put_u32_le(0);

        buf.put_slice(&var_data);
        buf.freeze()
    }
}

fn utf16_len(s: &str) -> u16 {
    s.encode_utf16().count() as u16
}

/// Write a password with the TDS obfuscation: swap the nibbles of each
/// byte, then XOR with 0xA5.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        let low = (unit & 0xFF) as u8;
        let high = (unit >> 8) as u8;
        dst.put_u8(low.rotate_right(4) ^ 0xA5);
        dst.put_u8(high.rotate_right(4) ^ 0xA5);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_flags() {
        let login = Login7::new();
        assert_eq!(login.tds_version, TdsVersion::DENALI);
        assert_eq!(login.option_flags2 & 0x02, 0x02); // ODBC
        assert!(!login.has_extensions());
    }

    #[test]
    fn password_obfuscation_known_value() {
        // 'a' = 0x0061 UTF-16LE. Low byte 0x61: nibble swap 0x16, XOR 0xA5 = 0xB3.
        // High byte 0x00: nibble swap 0x00, XOR 0xA5 = 0xA5.
        let mut buf = BytesMut::new();
        write_obfuscated_password(&mut buf, "a");
        assert_eq!(&buf[..], &[0xB3, 0xA5]);
    }

    #[test]
    fn encode_header_fields() {
        let login = Login7::new()
            .with_hostname("CLIENTHOST")
            .with_sql_auth("sa", "secret")
            .with_database("db");

        let encoded = login.encode();
        assert!(encoded.len() >= LOGIN7_HEADER_SIZE);

        let total = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(total as usize, encoded.len());

        let version = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(version, TdsVersion::DENALI.raw());
    }

    #[test]
    fn feature_extension_block_terminated() {
        let login = Login7::new()
            .with_sql_auth("sa", "pw")
            .with_feature(FeatureExtension::column_encryption())
            .with_feature(FeatureExtension::session_recovery());

        assert!(login.has_extensions());
        let encoded = login.encode();

        // Feature block ends the payload: ...[0x04][1,0,0,0][0x01][0x01][0,0,0,0][0xFF]
        assert_eq!(encoded[encoded.len() - 1], 0xFF);
        let ae_block_start = encoded.len() - 1 - 5 - 6;
        assert_eq!(encoded[ae_block_start], 0x04);
    }

    #[test]
    fn extension_offset_points_at_feature_block() {
        let login = Login7::new()
            .with_sql_auth("user", "pw")
            .with_feature(FeatureExtension::column_encryption());
        let encoded = login.encode();

        // Extension slot offset/length pair lives at header offset 56.
        let slot_offset =
            u16::from_le_bytes([encoded[56], encoded[57]]) as usize;
        let slot_len = u16::from_le_bytes([encoded[58], encoded[59]]) as usize;
        assert_eq!(slot_len, 4);

        let block_offset = u32::from_le_bytes([
            encoded[slot_offset],
            encoded[slot_offset + 1],
            encoded[slot_offset + 2],
            encoded[slot_offset + 3],
        ]) as usize;
        assert_eq!(encoded[block_offset], FeatureId::ColumnEncryption as u8);
    }

    #[test]
    fn fed_auth_feature_options_byte() {
        let feature = FeatureExtension::fed_auth(0x01, true);
        assert_eq!(feature.data.as_ref(), &[0x03]);
    }
}
