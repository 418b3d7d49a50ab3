//! Result-set metadata and value decoding.
//!
//! COLMETADATA has no length prefix; it is self-delimiting through its
//! own structure, so it is decoded incrementally from the reader. When
//! column encryption is negotiated the token additionally carries the
//! CEK table and, per encrypted column, a crypto descriptor wrapping the
//! original (pre-encryption) type.

use tds_wire::crypto::{CekTableEntry, EncryptedCek, EncryptionTypeWire, column_is_encrypted};
use tds_wire::types::{Guid, SqlDecimal, TypeId};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tds_codec::TdsReader;

use crate::error::{Error, Result};

/// Marker for "no metadata" in the column count field.
const NO_METADATA: u16 = 0xFFFF;

/// Null sentinel in u16 length prefixes.
const CHARBIN_NULL: u16 = 0xFFFF;

/// Type-specific metadata of one column.
#[derive(Debug, Clone, Default)]
pub struct TypeInfo {
    /// Maximum length for variable types.
    pub max_length: Option<u32>,
    /// Precision for decimal types.
    pub precision: Option<u8>,
    /// Scale for decimal and temporal types.
    pub scale: Option<u8>,
    /// Raw collation bytes for character types.
    pub collation: Option<[u8; 5]>,
}

/// Per-column crypto descriptor from COLMETADATA.
///
/// Wraps the column's original type: on the wire an encrypted column is
/// varbinary, and this descriptor says what the plaintext decrypts to.
/// The cipher itself is resolved lazily and, once set, never replaced.
#[derive(Debug, Clone)]
pub struct ColumnCrypto {
    /// Ordinal into the CEK table.
    pub cek_ordinal: u16,
    /// User type of the plaintext column.
    pub user_type: u32,
    /// Plaintext type id.
    pub base_type_id: TypeId,
    /// Plaintext type metadata.
    pub base_type_info: TypeInfo,
    /// Cipher algorithm id.
    pub algorithm_id: u8,
    /// Custom algorithm name (id 0 only).
    pub algorithm_name: Option<String>,
    /// Encryption mode.
    pub encryption_type: EncryptionTypeWire,
    /// Normalization rule version.
    pub normalization_version: u8,
}

/// One column of a result set.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// User type.
    pub user_type: u32,
    /// Column flags.
    pub flags: u16,
    /// Wire type id.
    pub type_id: TypeId,
    /// Wire type metadata.
    pub type_info: TypeInfo,
    /// Crypto descriptor for encrypted columns.
    pub crypto: Option<ColumnCrypto>,
    /// Column name.
    pub name: String,
}

impl ColumnMeta {
    /// Whether the column is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }
}

/// Decoded COLMETADATA token.
#[derive(Debug, Clone, Default)]
pub struct ResultSetMeta {
    /// Column definitions in result order.
    pub columns: Vec<ColumnMeta>,
    /// CEK table, when column encryption is negotiated.
    pub cek_entries: Vec<CekTableEntry>,
}

/// Read a COLMETADATA token at the cursor.
pub async fn read_col_metadata(
    reader: &mut TdsReader<'_>,
    column_encryption_negotiated: bool,
) -> Result<ResultSetMeta> {
    reader.read_u8().await?; // token type

    let count = reader.read_u16().await?;
    if count == NO_METADATA {
        return Ok(ResultSetMeta::default());
    }

    let cek_entries = if column_encryption_negotiated {
        read_cek_table(reader).await?
    } else {
        Vec::new()
    };

    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        columns.push(read_column(reader, column_encryption_negotiated).await?);
    }

    Ok(ResultSetMeta {
        columns,
        cek_entries,
    })
}

async fn read_column(
    reader: &mut TdsReader<'_>,
    column_encryption_negotiated: bool,
) -> Result<ColumnMeta> {
    let user_type = reader.read_u32().await?;
    let flags = reader.read_u16().await?;
    let type_byte = reader.read_u8().await?;
    let type_id = TypeId::from_u8(type_byte)
        .ok_or(Error::Codec(tds_codec::CodecError::InvalidTds("unknown column type")))?;
    let type_info = read_type_info(reader, type_id).await?;

    let crypto = if column_encryption_negotiated && column_is_encrypted(flags) {
        Some(read_column_crypto(reader).await?)
    } else {
        None
    };

    let name = reader.read_b_varchar().await?;

    Ok(ColumnMeta {
        user_type,
        flags,
        type_id,
        type_info,
        crypto,
        name,
    })
}

async fn read_type_info(reader: &mut TdsReader<'_>, type_id: TypeId) -> Result<TypeInfo> {
    let info = match type_id {
        // Fixed-size types carry no extra metadata.
        TypeId::Null
        | TypeId::Int1
        | TypeId::Bit
        | TypeId::Int2
        | TypeId::Int4
        | TypeId::Int8
        | TypeId::Float4
        | TypeId::Float8
        | TypeId::Money
        | TypeId::Money4
        | TypeId::DateTime
        | TypeId::DateTime4 => TypeInfo::default(),

        TypeId::IntN
        | TypeId::BitN
        | TypeId::FloatN
        | TypeId::MoneyN
        | TypeId::DateTimeN
        | TypeId::Guid
        | TypeId::VarChar
        | TypeId::VarBinary
        | TypeId::Char
        | TypeId::Binary => TypeInfo {
            max_length: Some(u32::from(reader.read_u8().await?)),
            ..TypeInfo::default()
        },

        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            let max_length = u32::from(reader.read_u8().await?);
            let precision = reader.read_u8().await?;
            let scale = reader.read_u8().await?;
            TypeInfo {
                max_length: Some(max_length),
                precision: Some(precision),
                scale: Some(scale),
                collation: None,
            }
        }

        TypeId::DateN => TypeInfo::default(),

        TypeId::TimeN | TypeId::DateTime2N | TypeId::DateTimeOffsetN => TypeInfo {
            scale: Some(reader.read_u8().await?),
            ..TypeInfo::default()
        },

        TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
            let max_length = u32::from(reader.read_u16().await?);
            let mut collation = [0u8; 5];
            reader.read_bytes_into(&mut collation).await?;
            TypeInfo {
                max_length: Some(max_length),
                collation: Some(collation),
                ..TypeInfo::default()
            }
        }

        TypeId::BigVarBinary | TypeId::BigBinary => TypeInfo {
            max_length: Some(u32::from(reader.read_u16().await?)),
            ..TypeInfo::default()
        },

        TypeId::Xml | TypeId::Text | TypeId::NText | TypeId::Image | TypeId::Variant => {
            return Err(Error::Codec(tds_codec::CodecError::InvalidTds(
                "large-object column types are outside the core",
            )));
        }
    };
    Ok(info)
}

async fn read_column_crypto(reader: &mut TdsReader<'_>) -> Result<ColumnCrypto> {
    let cek_ordinal = reader.read_u16().await?;
    let user_type = reader.read_u32().await?;
    let base_type_byte = reader.read_u8().await?;
    let base_type_id = TypeId::from_u8(base_type_byte)
        .ok_or(Error::Codec(tds_codec::CodecError::InvalidTds("unknown base column type")))?;
    let base_type_info = Box::pin(read_type_info(reader, base_type_id)).await?;

    let algorithm_id = reader.read_u8().await?;
    let algorithm_name = if algorithm_id == 0 {
        Some(reader.read_b_varchar().await?)
    } else {
        None
    };
    let encryption_type_byte = reader.read_u8().await?;
    let encryption_type = EncryptionTypeWire::from_u8(encryption_type_byte).ok_or(
        Error::Wire(tds_wire::WireError::InvalidField {
            field: "encryption type",
            value: u64::from(encryption_type_byte),
        }),
    )?;
    let normalization_version = reader.read_u8().await?;

    Ok(ColumnCrypto {
        cek_ordinal,
        user_type,
        base_type_id,
        base_type_info,
        algorithm_id,
        algorithm_name,
        encryption_type,
        normalization_version,
    })
}

/// Read the CEK table at the cursor.
pub async fn read_cek_table(reader: &mut TdsReader<'_>) -> Result<Vec<CekTableEntry>> {
    let count = reader.read_u16().await? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let database_id = reader.read_u32().await?;
        let cek_id = reader.read_u32().await?;
        let cek_version = reader.read_u32().await?;
        let mut cek_md_version = [0u8; 8];
        reader.read_bytes_into(&mut cek_md_version).await?;

        let value_count = reader.read_u8().await? as usize;
        let mut encrypted_keys = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let len = reader.read_u16().await? as usize;
            let ciphertext = reader.read_bytes(len).await?;
            let key_store_name = reader.read_b_varchar().await?;
            let key_path = reader.read_us_varchar().await?;
            let algorithm_name = reader.read_b_varchar().await?;
            encrypted_keys.push(EncryptedCek {
                ciphertext: ciphertext.into(),
                key_store_name,
                key_path,
                algorithm_name,
            });
        }

        entries.push(CekTableEntry {
            database_id,
            cek_id,
            cek_version,
            cek_md_version,
            encrypted_keys,
        });
    }
    Ok(entries)
}

/// One decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// BIT.
    Bool(bool),
    /// TINYINT.
    U8(u8),
    /// SMALLINT.
    I16(i16),
    /// INT.
    I32(i32),
    /// BIGINT.
    I64(i64),
    /// REAL.
    F32(f32),
    /// FLOAT.
    F64(f64),
    /// Character data.
    String(String),
    /// Binary data (including still-encrypted cells).
    Bytes(Vec<u8>),
    /// DECIMAL / NUMERIC / MONEY.
    Decimal(SqlDecimal),
    /// UNIQUEIDENTIFIER.
    Guid(Guid),
    /// DATE.
    Date(NaiveDate),
    /// TIME.
    Time(NaiveTime),
    /// DATETIME / SMALLDATETIME / DATETIME2.
    DateTime(NaiveDateTime),
    /// DATETIMEOFFSET.
    DateTimeOffset(DateTime<FixedOffset>),
}

impl ColumnValue {
    /// The value as an i32, when it is any integer that fits.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::U8(v) => Some(i32::from(*v)),
            Self::I16(v) => Some(i32::from(*v)),
            Self::I32(v) => Some(*v),
            Self::I64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The value as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Read one column's value in a ROW token.
pub async fn read_column_value(
    reader: &mut TdsReader<'_>,
    column: &ColumnMeta,
) -> Result<ColumnValue> {
    let unsupported = Error::Codec(tds_codec::CodecError::InvalidTds(
        "unsupported column value encoding",
    ));

    let value = match column.type_id {
        TypeId::Int1 => ColumnValue::U8(reader.read_u8().await?),
        TypeId::Bit => ColumnValue::Bool(reader.read_u8().await? != 0),
        TypeId::Int2 => ColumnValue::I16(reader.read_i16().await?),
        TypeId::Int4 => ColumnValue::I32(reader.read_i32().await?),
        TypeId::Int8 => ColumnValue::I64(reader.read_i64().await?),
        TypeId::Float4 => ColumnValue::F32(reader.read_f32().await?),
        TypeId::Float8 => ColumnValue::F64(reader.read_f64().await?),
        TypeId::Money => ColumnValue::Decimal(reader.read_money(8).await?),
        TypeId::Money4 => ColumnValue::Decimal(reader.read_money(4).await?),
        TypeId::DateTime => ColumnValue::DateTime(reader.read_datetime(8).await?),
        TypeId::DateTime4 => ColumnValue::DateTime(reader.read_datetime(4).await?),

        TypeId::IntN => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            1 => ColumnValue::U8(reader.read_u8().await?),
            2 => ColumnValue::I16(reader.read_i16().await?),
            4 => ColumnValue::I32(reader.read_i32().await?),
            8 => ColumnValue::I64(reader.read_i64().await?),
            _ => return Err(unsupported),
        },
        TypeId::BitN => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            1 => ColumnValue::Bool(reader.read_u8().await? != 0),
            _ => return Err(unsupported),
        },
        TypeId::FloatN => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            4 => ColumnValue::F32(reader.read_f32().await?),
            8 => ColumnValue::F64(reader.read_f64().await?),
            _ => return Err(unsupported),
        },
        TypeId::MoneyN => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            len @ (4 | 8) => ColumnValue::Decimal(reader.read_money(len as usize).await?),
            _ => return Err(unsupported),
        },
        TypeId::DateTimeN => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            len @ (4 | 8) => ColumnValue::DateTime(reader.read_datetime(len as usize).await?),
            _ => return Err(unsupported),
        },

        TypeId::Guid => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            16 => ColumnValue::Guid(reader.read_guid(16).await?),
            _ => return Err(unsupported),
        },

        TypeId::DecimalN | TypeId::NumericN | TypeId::Decimal | TypeId::Numeric => {
            let len = reader.read_u8().await? as usize;
            if len == 0 {
                ColumnValue::Null
            } else {
                let scale = column.type_info.scale.unwrap_or(0);
                ColumnValue::Decimal(reader.read_decimal(len, scale).await?)
            }
        }

        TypeId::DateN => match reader.read_u8().await? {
            0 => ColumnValue::Null,
            3 => ColumnValue::Date(reader.read_date().await?),
            _ => return Err(unsupported),
        },
        TypeId::TimeN => {
            let scale = column.type_info.scale.unwrap_or(7);
            match reader.read_u8().await? as usize {
                0 => ColumnValue::Null,
                len if len == tds_wire::temporal::time_value_length(scale) => {
                    ColumnValue::Time(reader.read_time(scale).await?)
                }
                _ => return Err(unsupported),
            }
        }
        TypeId::DateTime2N => {
            let scale = column.type_info.scale.unwrap_or(7);
            match reader.read_u8().await? as usize {
                0 => ColumnValue::Null,
                len if len == tds_wire::temporal::datetime2_value_length(scale) => {
                    ColumnValue::DateTime(reader.read_datetime2(scale).await?)
                }
                _ => return Err(unsupported),
            }
        }
        TypeId::DateTimeOffsetN => {
            let scale = column.type_info.scale.unwrap_or(7);
            match reader.read_u8().await? as usize {
                0 => ColumnValue::Null,
                len if len == tds_wire::temporal::datetimeoffset_value_length(scale) => {
                    ColumnValue::DateTimeOffset(reader.read_datetimeoffset(scale).await?)
                }
                _ => return Err(unsupported),
            }
        }

        TypeId::NVarChar | TypeId::NChar => {
            if column.type_info.max_length == Some(0xFFFF) {
                return Err(unsupported); // varchar(max) streams are outside the core
            }
            let byte_len = reader.read_u16().await?;
            if byte_len == CHARBIN_NULL {
                ColumnValue::Null
            } else {
                ColumnValue::String(reader.read_unicode_string(byte_len as usize / 2).await?)
            }
        }
        TypeId::BigVarChar | TypeId::BigChar => {
            if column.type_info.max_length == Some(0xFFFF) {
                return Err(unsupported);
            }
            let byte_len = reader.read_u16().await?;
            if byte_len == CHARBIN_NULL {
                ColumnValue::Null
            } else {
                let raw = reader.read_bytes(byte_len as usize).await?;
                ColumnValue::String(String::from_utf8_lossy(&raw).into_owned())
            }
        }
        TypeId::BigVarBinary | TypeId::BigBinary => {
            if column.type_info.max_length == Some(0xFFFF) {
                return Err(unsupported);
            }
            let byte_len = reader.read_u16().await?;
            if byte_len == CHARBIN_NULL {
                ColumnValue::Null
            } else {
                ColumnValue::Bytes(reader.read_bytes(byte_len as usize).await?)
            }
        }

        _ => return Err(unsupported),
    };

    Ok(value)
}
