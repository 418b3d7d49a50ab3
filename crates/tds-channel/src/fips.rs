//! FIPS configuration validation.
//!
//! FIPS-compliant operation constrains the TLS configuration: the session
//! must be encrypted, the server certificate must actually be validated,
//! and a trust store path is only meaningful with an explicit store type.
//! Violations fail before any I/O happens.

use crate::config::TlsOptions;
use crate::error::ChannelError;

/// Validate a FIPS-mode configuration.
pub fn validate_fips(encrypt: bool, trust_server_certificate: bool, options: &TlsOptions) -> Result<(), ChannelError> {
    if !options.fips {
        return Ok(());
    }

    if !encrypt {
        return Err(ChannelError::InvalidFipsConfig(
            "encryption must be enabled in FIPS mode".into(),
        ));
    }

    if trust_server_certificate {
        return Err(ChannelError::InvalidFipsConfig(
            "trustServerCertificate cannot be used in FIPS mode".into(),
        ));
    }

    if options.trust_store.is_some() && options.trust_store_type.is_none() {
        return Err(ChannelError::InvalidFipsConfig(
            "trustStoreType is required when trustStore is set in FIPS mode".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fips_options() -> TlsOptions {
        TlsOptions {
            fips: true,
            ..TlsOptions::default()
        }
    }

    #[test]
    fn non_fips_passes() {
        let options = TlsOptions::default();
        assert!(validate_fips(false, true, &options).is_ok());
    }

    #[test]
    fn fips_requires_encryption() {
        assert!(validate_fips(false, false, &fips_options()).is_err());
        assert!(validate_fips(true, false, &fips_options()).is_ok());
    }

    #[test]
    fn fips_rejects_trust_server_certificate() {
        assert!(validate_fips(true, true, &fips_options()).is_err());
    }

    #[test]
    fn fips_trust_store_requires_type() {
        let mut options = fips_options();
        options.trust_store = Some("/etc/pki/store".into());
        assert!(validate_fips(true, false, &options).is_err());

        options.trust_store_type = Some("PKCS12".into());
        assert!(validate_fips(true, false, &options).is_ok());
    }
}
