//! Certificate host name matching.
//!
//! When `hostNameInCertificate` overrides validation, the expected name is
//! compared against the certificate's subject common name first and, on
//! mismatch, against its DNS subject-alternative-name entries.
//!
//! The common name is pulled out of the RFC 2253 canonical form of the
//! subject DN. The parser is deliberately conservative: anything it cannot
//! parse cleanly yields no name, which fails the match.

/// Extract the first `cn=` component from a canonical (lowercase)
/// RFC 2253 distinguished name.
///
/// The component runs to the next comma; wrapping quotes are stripped. An
/// opening quote without a closing one yields `None`.
#[must_use]
pub fn parse_common_name(distinguished_name: &str) -> Option<String> {
    let start = distinguished_name.find("cn=")?;
    let rest = &distinguished_name[start + 3..];

    let common_name = match rest.find(',') {
        Some(comma) => &rest[..comma],
        None => rest,
    };

    if common_name.len() > 1 && common_name.starts_with('"') {
        if common_name.ends_with('"') {
            return Some(common_name[1..common_name.len() - 1].to_string());
        }
        return None;
    }

    Some(common_name.to_string())
}

/// Validate one candidate certificate name against the expected host.
///
/// Comparison is case-insensitive, per the DNS preferred name syntax.
#[must_use]
pub fn validate_server_name(name_in_cert: Option<&str>, expected: &str) -> bool {
    match name_in_cert {
        Some(name) if !name.is_empty() => name.eq_ignore_ascii_case(expected),
        _ => false,
    }
}

/// Match the expected host name against a certificate's subject DN and
/// its DNS subject-alternative-name entries.
///
/// The subject common name wins when it matches; otherwise every SAN DNS
/// entry is tried in order.
#[must_use]
pub fn matches_certificate(
    subject_dn: &str,
    san_dns_names: &[&str],
    expected_host: &str,
) -> bool {
    let expected = expected_host.to_ascii_lowercase();

    let common_name = parse_common_name(&subject_dn.to_ascii_lowercase());
    if validate_server_name(common_name.as_deref(), &expected) {
        return true;
    }

    san_dns_names
        .iter()
        .any(|name| validate_server_name(Some(name), &expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_name_simple() {
        assert_eq!(
            parse_common_name("cn=foo.example.com,o=example").as_deref(),
            Some("foo.example.com")
        );
    }

    #[test]
    fn common_name_last_component() {
        assert_eq!(
            parse_common_name("o=example,cn=db.example.net").as_deref(),
            Some("db.example.net")
        );
    }

    #[test]
    fn common_name_quoted() {
        assert_eq!(
            parse_common_name("cn=\"foo.example.com\",o=x").as_deref(),
            Some("foo.example.com")
        );
        // Unterminated quote is refused.
        assert_eq!(parse_common_name("cn=\"foo.example.com,o=x"), None);
    }

    #[test]
    fn common_name_missing() {
        assert_eq!(parse_common_name("o=example,l=somewhere"), None);
    }

    #[test]
    fn subject_cn_match() {
        assert!(matches_certificate(
            "cn=foo.example.com,o=Example",
            &[],
            "foo.example.com"
        ));
        assert!(!matches_certificate(
            "cn=foo.example.com,o=Example",
            &[],
            "bar.example.com"
        ));
    }

    #[test]
    fn san_fallback_match() {
        // Different CN, matching SAN entry.
        assert!(matches_certificate(
            "cn=internal-name,o=Example",
            &["FOO.example.com"],
            "foo.example.com"
        ));
    }

    #[test]
    fn match_is_case_insensitive() {
        assert!(matches_certificate(
            "CN=Foo.Example.Com,O=Example",
            &[],
            "foo.example.com"
        ));
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!validate_server_name(Some(""), "foo"));
        assert!(!validate_server_name(None, "foo"));
    }
}
