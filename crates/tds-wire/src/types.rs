//! TDS data type identifiers and scalar value carriers.

use core::fmt;

/// TDS type identifier byte, as carried in COLMETADATA and RETURNVALUE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// NULLTYPE.
    Null = 0x1F,
    /// 1-byte integer.
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 2-byte integer.
    Int2 = 0x34,
    /// 4-byte integer.
    Int4 = 0x38,
    /// smalldatetime (4-byte).
    DateTime4 = 0x3A,
    /// 4-byte float.
    Float4 = 0x3B,
    /// money (8-byte).
    Money = 0x3C,
    /// datetime (8-byte).
    DateTime = 0x3D,
    /// 8-byte float.
    Float8 = 0x3E,
    /// smallmoney (4-byte).
    Money4 = 0x7A,
    /// 8-byte integer.
    Int8 = 0x7F,
    /// uniqueidentifier.
    Guid = 0x24,
    /// Variable-length integer.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Variable-length bit.
    BitN = 0x68,
    /// Variable-length decimal.
    DecimalN = 0x6A,
    /// Variable-length numeric.
    NumericN = 0x6C,
    /// Variable-length float.
    FloatN = 0x6D,
    /// Variable-length money.
    MoneyN = 0x6E,
    /// Variable-length datetime.
    DateTimeN = 0x6F,
    /// date.
    DateN = 0x28,
    /// time(scale).
    TimeN = 0x29,
    /// datetime2(scale).
    DateTime2N = 0x2A,
    /// datetimeoffset(scale).
    DateTimeOffsetN = 0x2B,
    /// Legacy varbinary.
    VarBinary = 0x25,
    /// Legacy varchar.
    VarChar = 0x27,
    /// Legacy binary.
    Binary = 0x2D,
    /// Legacy char.
    Char = 0x2F,
    /// varbinary(n) / varbinary(max).
    BigVarBinary = 0xA5,
    /// varchar(n) / varchar(max).
    BigVarChar = 0xA7,
    /// binary(n).
    BigBinary = 0xAD,
    /// char(n).
    BigChar = 0xAF,
    /// nvarchar(n) / nvarchar(max).
    NVarChar = 0xE7,
    /// nchar(n).
    NChar = 0xEF,
    /// xml.
    Xml = 0xF1,
    /// text.
    Text = 0x23,
    /// image.
    Image = 0x22,
    /// ntext.
    NText = 0x63,
    /// sql_variant.
    Variant = 0x62,
}

impl TypeId {
    /// Create from the raw wire byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x3A => Self::DateTime4,
            0x3B => Self::Float4,
            0x3C => Self::Money,
            0x3D => Self::DateTime,
            0x3E => Self::Float8,
            0x7A => Self::Money4,
            0x7F => Self::Int8,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x28 => Self::DateN,
            0x29 => Self::TimeN,
            0x2A => Self::DateTime2N,
            0x2B => Self::DateTimeOffsetN,
            0x25 => Self::VarBinary,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x2F => Self::Char,
            0xA5 => Self::BigVarBinary,
            0xA7 => Self::BigVarChar,
            0xAD => Self::BigBinary,
            0xAF => Self::BigChar,
            0xE7 => Self::NVarChar,
            0xEF => Self::NChar,
            0xF1 => Self::Xml,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x62 => Self::Variant,
            _ => return None,
        })
    }

    /// Size in bytes for fixed-length types; `None` for variable types.
    #[must_use]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }
}

/// Exact decimal value: unscaled integer plus a decimal scale.
///
/// `value / 10^scale` is the represented number. MONEY values always carry
/// scale 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDecimal {
    /// Unscaled (signed) value.
    pub value: i128,
    /// Number of fractional decimal digits.
    pub scale: u8,
}

impl SqlDecimal {
    /// Build from an unscaled value and scale.
    #[must_use]
    pub const fn new(value: i128, scale: u8) -> Self {
        Self { value, scale }
    }
}

impl fmt::Display for SqlDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.value);
        }
        let sign = if self.value < 0 { "-" } else { "" };
        let abs = self.value.unsigned_abs();
        let divisor = 10u128.pow(u32::from(self.scale));
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / divisor,
            abs % divisor,
            width = self.scale as usize
        )
    }
}

/// A uniqueidentifier value.
///
/// Stored as the 16 raw wire bytes. The textual form follows the server
/// convention: the first three groups are byte-reversed (little-endian),
/// the last two are in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_roundtrip() {
        for raw in [0x26u8, 0xA7, 0xE7, 0x28, 0x29, 0x2A, 0x2B, 0x6A] {
            let id = TypeId::from_u8(raw).unwrap_or(TypeId::Null);
            assert_eq!(id as u8, raw);
        }
        assert!(TypeId::from_u8(0x00).is_none());
    }

    #[test]
    fn decimal_display() {
        assert_eq!(SqlDecimal::new(12345, 2).to_string(), "123.45");
        assert_eq!(SqlDecimal::new(-5, 4).to_string(), "-0.0005");
        assert_eq!(SqlDecimal::new(42, 0).to_string(), "42");
    }

    #[test]
    fn guid_display_is_mixed_endian() {
        let guid = Guid([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ]);
        assert_eq!(guid.to_string(), "04030201-0605-0807-090A-0B0C0D0E0F10");
    }
}
