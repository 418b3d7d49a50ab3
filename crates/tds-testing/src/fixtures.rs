//! Shared test fixtures.

/// A 32-byte column encryption key used across the crypto tests.
#[must_use]
pub fn test_cek() -> [u8; 32] {
    let mut cek = [0u8; 32];
    for (i, byte) in cek.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(7).wrapping_add(3);
    }
    cek
}

/// Certificate subject DN whose common name is `foo.example.com`.
pub const CERT_DN_FOO: &str = "cn=foo.example.com,o=Example,c=US";

/// Certificate subject DN with an internal common name and a SAN list
/// carrying the public name.
pub const CERT_DN_INTERNAL: &str = "cn=sqlnode-07.internal,o=Example";

/// SAN DNS entries accompanying [`CERT_DN_INTERNAL`].
pub const CERT_SAN_ENTRIES: &[&str] = &["foo.example.com", "failover.example.com"];

/// A connection string exercising the common keyword surface.
pub const CONNECTION_STRING: &str = "serverName=localhost;portNumber=1433;databaseName=test;\
     user=sa;password=secret;loginTimeout=15;queryTimeout=30";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cek_is_well_formed() {
        let cek = test_cek();
        assert_eq!(cek.len(), 32);
        assert_ne!(cek, [0u8; 32]);
    }
}
