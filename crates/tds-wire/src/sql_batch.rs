//! SQL batch request payload (packet type 0x01).
//!
//! A batch is the ALL_HEADERS section (mandatory since TDS 7.2) followed
//! by the statement text in UTF-16LE.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;

/// Encode a SQL batch payload in auto-commit mode.
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    encode_sql_batch_in_transaction(sql, 0)
}

/// Encode a SQL batch payload carrying a transaction descriptor.
///
/// Within an explicit transaction the descriptor must be the value the
/// server supplied in the begin-transaction environment change; 0 means
/// auto-commit.
#[must_use]
pub fn encode_sql_batch_in_transaction(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(22 + sql.len() * 2);

    // ALL_HEADERS: total length, then one transaction-descriptor header:
    // length(4) + type(2) + descriptor(8) + outstanding requests(4).
    buf.put_u32_le(22);
    buf.put_u32_le(18);
    buf.put_u16_le(0x0002);
    buf.put_u64_le(transaction_descriptor);
    buf.put_u32_le(1);

    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_layout() {
        let payload = encode_sql_batch("SELECT 1");
        assert_eq!(payload.len(), 22 + 16);
        assert_eq!(&payload[0..4], &[22, 0, 0, 0]);
        assert_eq!(&payload[8..10], &[0x02, 0x00]);
        assert_eq!(payload[22], b'S');
        assert_eq!(payload[23], 0);
    }

    #[test]
    fn transaction_descriptor_embedded() {
        let payload = encode_sql_batch_in_transaction("X", 0x1122_3344_5566_7788);
        assert_eq!(
            &payload[10..18],
            &0x1122_3344_5566_7788u64.to_le_bytes()
        );
    }
}
