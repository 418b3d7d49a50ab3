//! Certificate name validation under `hostNameInCertificate`.

use tds_channel::hostname::{matches_certificate, parse_common_name};
use tds_testing::fixtures::{CERT_DN_FOO, CERT_DN_INTERNAL, CERT_SAN_ENTRIES};

#[test]
fn override_matches_subject_common_name() {
    assert!(matches_certificate(CERT_DN_FOO, &[], "foo.example.com"));
}

#[test]
fn override_mismatch_fails() {
    assert!(!matches_certificate(CERT_DN_FOO, &[], "bar.example.com"));
}

#[test]
fn san_entry_matches_when_common_name_differs() {
    // The subject CN is an internal node name; the public name only
    // appears in the subject-alternative-name list.
    assert_eq!(
        parse_common_name(CERT_DN_INTERNAL).as_deref(),
        Some("sqlnode-07.internal")
    );
    assert!(matches_certificate(
        CERT_DN_INTERNAL,
        CERT_SAN_ENTRIES,
        "foo.example.com"
    ));
    assert!(matches_certificate(
        CERT_DN_INTERNAL,
        CERT_SAN_ENTRIES,
        "FAILOVER.example.com"
    ));
    assert!(!matches_certificate(
        CERT_DN_INTERNAL,
        CERT_SAN_ENTRIES,
        "bar.example.com"
    ));
}
