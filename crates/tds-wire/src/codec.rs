//! Low-level string and length-prefix codec helpers.
//!
//! TDS strings are UTF-16LE. `B_VARCHAR` carries a one-byte character count,
//! `US_VARCHAR` a two-byte character count.

use bytes::{Buf, BufMut};

/// Read a `B_VARCHAR`: 1-byte character count followed by UTF-16LE data.
pub fn read_b_varchar(src: &mut impl Buf) -> Option<String> {
    if src.remaining() < 1 {
        return None;
    }
    let len = src.get_u8() as usize;
    read_utf16_string(src, len)
}

/// Read a `US_VARCHAR`: 2-byte character count followed by UTF-16LE data.
pub fn read_us_varchar(src: &mut impl Buf) -> Option<String> {
    if src.remaining() < 2 {
        return None;
    }
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len)
}

/// Read a UTF-16LE string of `char_count` code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Option<String> {
    if src.remaining() < char_count * 2 {
        return None;
    }

    let mut units = Vec::with_capacity(char_count);
    for _ in 0..char_count {
        units.push(src.get_u16_le());
    }

    String::from_utf16(&units).ok()
}

/// Write a `B_VARCHAR` (1-byte character count, capped at 255 characters).
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len().min(255) as u8;
    dst.put_u8(len);
    for &u in &units[..len as usize] {
        dst.put_u16_le(u);
    }
}

/// Write a `US_VARCHAR` (2-byte character count, capped at 65535 characters).
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len().min(65535) as u16;
    dst.put_u16_le(len);
    for &u in &units[..len as usize] {
        dst.put_u16_le(u);
    }
}

/// Write raw UTF-16LE code units without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for u in s.encode_utf16() {
        dst.put_u16_le(u);
    }
}

/// Byte length of `s` once encoded as UTF-16LE.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn b_varchar_roundtrip() {
        let original = "résultat 表";
        let mut buf = BytesMut::new();
        write_b_varchar(&mut buf, original);

        let mut cursor = buf.freeze();
        assert_eq!(read_b_varchar(&mut cursor).unwrap(), original);
    }

    #[test]
    fn us_varchar_roundtrip() {
        let original = "multi-part identifier αβγ";
        let mut buf = BytesMut::new();
        write_us_varchar(&mut buf, original);

        let mut cursor = buf.freeze();
        assert_eq!(read_us_varchar(&mut cursor).unwrap(), original);
    }

    #[test]
    fn truncated_string_returns_none() {
        let mut buf = BytesMut::new();
        buf.put_u8(10); // claims 10 characters
        buf.put_u16_le(b'x' as u16); // only one present
        let mut cursor = buf.freeze();
        assert!(read_b_varchar(&mut cursor).is_none());
    }

    #[test]
    fn utf16_lengths() {
        assert_eq!(utf16_byte_len("abc"), 6);
        assert_eq!(utf16_byte_len("表"), 2);
        assert_eq!(utf16_byte_len("𝄞"), 4); // surrogate pair
    }
}
