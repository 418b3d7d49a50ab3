//! Always Encrypted wire metadata.
//!
//! When column encryption is negotiated, COLMETADATA (and the
//! describe-parameter-encryption results) carry a table of column
//! encryption keys followed by per-column crypto descriptors. This module
//! holds the wire-level structures; key resolution and the AEAD cipher
//! live in `tds-crypto`.
//!
//! CEK table layout:
//!
//! ```text
//! cek_count: u16le
//! per entry:
//!   database_id: u32le
//!   cek_id:      u32le
//!   cek_version: u32le
//!   cek_md_version: 8 bytes (opaque)
//!   value_count: u8
//!   per value:
//!     ciphertext_len: u16le, ciphertext
//!     key_store_name: B_VARCHAR
//!     key_path:       US_VARCHAR
//!     algorithm_name: B_VARCHAR
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::codec::{read_b_varchar, read_us_varchar, write_b_varchar, write_us_varchar};
use crate::error::WireError;

/// COLMETADATA flags bit marking an encrypted column.
pub const COLUMN_FLAG_ENCRYPTED: u16 = 0x0800;

/// Algorithm id of AEAD_AES_256_CBC_HMAC_SHA256.
pub const ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256: u8 = 2;

/// Current normalization rule version.
pub const NORMALIZATION_RULE_VERSION: u8 = 1;

/// Whether column flags mark the column as encrypted.
#[must_use]
pub fn column_is_encrypted(flags: u16) -> bool {
    flags & COLUMN_FLAG_ENCRYPTED != 0
}

/// One encrypted copy of a CEK, together with the key-store coordinates
/// needed to decrypt it.
#[derive(Debug, Clone)]
pub struct EncryptedCek {
    /// CEK ciphertext, encrypted under the column master key.
    pub ciphertext: Bytes,
    /// Registered name of the key-store provider.
    pub key_store_name: String,
    /// Path of the column master key within the store.
    pub key_path: String,
    /// Asymmetric algorithm that wrapped the CEK (e.g. `RSA_OAEP`).
    pub algorithm_name: String,
}

impl EncryptedCek {
    /// Decode one CEK value.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < 2 {
            return Err(WireError::UnexpectedEof);
        }
        let len = src.get_u16_le() as usize;
        if src.remaining() < len {
            return Err(WireError::UnexpectedEof);
        }
        let ciphertext = src.copy_to_bytes(len);

        let key_store_name = read_b_varchar(src).ok_or(WireError::UnexpectedEof)?;
        let key_path = read_us_varchar(src).ok_or(WireError::UnexpectedEof)?;
        let algorithm_name = read_b_varchar(src).ok_or(WireError::UnexpectedEof)?;

        Ok(Self {
            ciphertext,
            key_store_name,
            key_path,
            algorithm_name,
        })
    }

    /// Encode one CEK value.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.ciphertext.len() as u16);
        dst.put_slice(&self.ciphertext);
        write_b_varchar(dst, &self.key_store_name);
        write_us_varchar(dst, &self.key_path);
        write_b_varchar(dst, &self.algorithm_name);
    }
}

/// One CEK table entry.
///
/// An entry may carry several encrypted copies of the same key (during
/// master-key rotation); all copies decrypt to the same plaintext CEK.
#[derive(Debug, Clone)]
pub struct CekTableEntry {
    /// Database id where the CEK is defined.
    pub database_id: u32,
    /// CEK id within the database.
    pub cek_id: u32,
    /// CEK version, bumped on rotation.
    pub cek_version: u32,
    /// Opaque metadata version.
    pub cek_md_version: [u8; 8],
    /// Encrypted copies of the CEK. Never empty on the wire.
    pub encrypted_keys: Vec<EncryptedCek>,
}

impl CekTableEntry {
    /// Decode one entry.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < 21 {
            return Err(WireError::UnexpectedEof);
        }

        let database_id = src.get_u32_le();
        let cek_id = src.get_u32_le();
        let cek_version = src.get_u32_le();
        let mut cek_md_version = [0u8; 8];
        src.copy_to_slice(&mut cek_md_version);
        let value_count = src.get_u8() as usize;

        let mut encrypted_keys = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            encrypted_keys.push(EncryptedCek::decode(src)?);
        }

        Ok(Self {
            database_id,
            cek_id,
            cek_version,
            cek_md_version,
            encrypted_keys,
        })
    }

    /// Encode one entry.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.database_id);
        dst.put_u32_le(self.cek_id);
        dst.put_u32_le(self.cek_version);
        dst.put_slice(&self.cek_md_version);
        dst.put_u8(self.encrypted_keys.len() as u8);
        for key in &self.encrypted_keys {
            key.encode(dst);
        }
    }
}

/// The CEK table: entries addressed by ordinal from per-column metadata.
#[derive(Debug, Clone, Default)]
pub struct CekTable {
    /// Table entries in wire order.
    pub entries: Vec<CekTableEntry>,
}

impl CekTable {
    /// Entry by ordinal.
    #[must_use]
    pub fn get(&self, ordinal: u16) -> Option<&CekTableEntry> {
        self.entries.get(ordinal as usize)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode the table.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < 2 {
            return Err(WireError::UnexpectedEof);
        }
        let count = src.get_u16_le() as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(CekTableEntry::decode(src)?);
        }
        Ok(Self { entries })
    }

    /// Encode the table.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.entries.len() as u16);
        for entry in &self.entries {
            entry.encode(dst);
        }
    }
}

/// Encryption mode carried per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionTypeWire {
    /// Value is not encrypted (forced plaintext).
    Plaintext = 0,
    /// Deterministic: equal plaintexts yield equal ciphertexts.
    Deterministic = 1,
    /// Randomized: fresh IV per encryption.
    Randomized = 2,
}

impl EncryptionTypeWire {
    /// Create from the raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Plaintext),
            1 => Some(Self::Deterministic),
            2 => Some(Self::Randomized),
            _ => None,
        }
    }
}

/// Per-column encryption descriptor.
#[derive(Debug, Clone)]
pub struct CryptoMetadata {
    /// Ordinal into the CEK table.
    pub cek_ordinal: u16,
    /// Cipher algorithm id.
    pub algorithm_id: u8,
    /// Algorithm name; present only for custom algorithms (id 0).
    pub algorithm_name: Option<String>,
    /// Encryption mode.
    pub encryption_type: EncryptionTypeWire,
    /// Normalization rule version.
    pub normalization_version: u8,
}

impl CryptoMetadata {
    /// Decode the descriptor.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let cek_ordinal = src.get_u16_le();
        let algorithm_id = src.get_u8();

        let algorithm_name = if algorithm_id == 0 {
            Some(read_b_varchar(src).ok_or(WireError::UnexpectedEof)?)
        } else {
            None
        };

        if src.remaining() < 2 {
            return Err(WireError::UnexpectedEof);
        }
        let type_byte = src.get_u8();
        let encryption_type =
            EncryptionTypeWire::from_u8(type_byte).ok_or(WireError::InvalidField {
                field: "encryption type",
                value: u64::from(type_byte),
            })?;
        let normalization_version = src.get_u8();

        Ok(Self {
            cek_ordinal,
            algorithm_id,
            algorithm_name,
            encryption_type,
            normalization_version,
        })
    }

    /// Encode the descriptor.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.cek_ordinal);
        dst.put_u8(self.algorithm_id);
        if self.algorithm_id == 0 {
            write_b_varchar(dst, self.algorithm_name.as_deref().unwrap_or(""));
        }
        dst.put_u8(self.encryption_type as u8);
        dst.put_u8(self.normalization_version);
    }

    /// Whether the standard AEAD algorithm applies.
    #[must_use]
    pub fn is_aead_aes_256(&self) -> bool {
        self.algorithm_id == ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn sample_entry() -> CekTableEntry {
        CekTableEntry {
            database_id: 5,
            cek_id: 3,
            cek_version: 1,
            cek_md_version: [1, 0, 0, 0, 0, 0, 0, 0],
            encrypted_keys: vec![
                EncryptedCek {
                    ciphertext: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
                    key_store_name: "AZURE_KEY_VAULT".into(),
                    key_path: "https://vault.example.net/keys/cmk1".into(),
                    algorithm_name: "RSA_OAEP".into(),
                },
                EncryptedCek {
                    ciphertext: Bytes::from_static(&[0x11, 0x22]),
                    key_store_name: "MSSQL_CERTIFICATE_STORE".into(),
                    key_path: "CurrentUser/My/abc".into(),
                    algorithm_name: "RSA_OAEP".into(),
                },
            ],
        }
    }

    #[test]
    fn cek_table_roundtrip() {
        let table = CekTable {
            entries: vec![sample_entry()],
        };

        let mut buf = BytesMut::new();
        table.encode(&mut buf);

        let mut cursor = buf.freeze();
        let decoded = CekTable::decode(&mut cursor).unwrap();
        assert_eq!(decoded.len(), 1);

        let entry = decoded.get(0).unwrap();
        assert_eq!(entry.database_id, 5);
        assert_eq!(entry.encrypted_keys.len(), 2);
        assert_eq!(entry.encrypted_keys[0].key_store_name, "AZURE_KEY_VAULT");
        assert_eq!(
            entry.encrypted_keys[1].key_path,
            "CurrentUser/My/abc"
        );
        assert!(decoded.get(1).is_none());
    }

    #[test]
    fn crypto_metadata_roundtrip() {
        let meta = CryptoMetadata {
            cek_ordinal: 2,
            algorithm_id: ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256,
            algorithm_name: None,
            encryption_type: EncryptionTypeWire::Deterministic,
            normalization_version: NORMALIZATION_RULE_VERSION,
        };

        let mut buf = BytesMut::new();
        meta.encode(&mut buf);

        let mut cursor = buf.freeze();
        let decoded = CryptoMetadata::decode(&mut cursor).unwrap();
        assert_eq!(decoded.cek_ordinal, 2);
        assert!(decoded.is_aead_aes_256());
        assert_eq!(decoded.encryption_type, EncryptionTypeWire::Deterministic);
    }

    #[test]
    fn crypto_metadata_custom_algorithm_name() {
        let meta = CryptoMetadata {
            cek_ordinal: 0,
            algorithm_id: 0,
            algorithm_name: Some("CustomAlg".into()),
            encryption_type: EncryptionTypeWire::Randomized,
            normalization_version: 1,
        };

        let mut buf = BytesMut::new();
        meta.encode(&mut buf);
        let mut cursor = buf.freeze();
        let decoded = CryptoMetadata::decode(&mut cursor).unwrap();
        assert_eq!(decoded.algorithm_name.as_deref(), Some("CustomAlg"));
    }

    #[test]
    fn invalid_encryption_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0);
        buf.put_u8(2); // aead
        buf.put_u8(9); // bogus encryption type
        buf.put_u8(1);

        let mut cursor = buf.freeze();
        assert!(CryptoMetadata::decode(&mut cursor).is_err());
    }

    #[test]
    fn encrypted_column_flag() {
        assert!(column_is_encrypted(0x0800));
        assert!(column_is_encrypted(0x0801));
        assert!(!column_is_encrypted(0x0001));
    }
}
