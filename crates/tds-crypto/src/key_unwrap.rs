//! RSA-OAEP unwrapping of column encryption keys.
//!
//! The server stores CEKs wrapped in an envelope:
//!
//! ```text
//! version(1) || key_path_len:u16le || key_path(utf16le)
//!            || ciphertext_len:u16le || ciphertext
//! ```
//!
//! where `ciphertext` is the RSA-OAEP-wrapped CEK.

use rsa::{
    Oaep, RsaPrivateKey, pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey,
    traits::PublicKeyParts,
};
use sha2::Sha256;

use crate::error::CryptoError;

/// Envelope version byte.
const CEK_ENVELOPE_VERSION: u8 = 0x01;

/// Unwraps CEK envelopes with an RSA private key.
pub struct RsaKeyUnwrapper {
    private_key: RsaPrivateKey,
}

impl RsaKeyUnwrapper {
    /// Parse a PEM-encoded private key (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::MasterKey(format!("unparseable RSA private key: {e}")))?;
        Ok(Self { private_key })
    }

    /// Parse a DER-encoded private key (PKCS#8 or PKCS#1).
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_der(der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(der))
            .map_err(|e| CryptoError::MasterKey(format!("unparseable RSA private key: {e}")))?;
        Ok(Self { private_key })
    }

    /// Use an already-parsed key.
    #[must_use]
    pub fn from_key(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }

    /// Unwrap an enveloped CEK.
    pub fn unwrap_cek(&self, enveloped: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = parse_envelope(enveloped)?;
        self.unwrap_raw(ciphertext)
    }

    /// Unwrap bare RSA-OAEP ciphertext (no envelope).
    pub fn unwrap_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::CekDecryptionFailed(format!("RSA-OAEP failed: {e}")))
    }

    /// RSA key size in bits.
    #[must_use]
    pub fn key_bits(&self) -> usize {
        self.private_key.size() * 8
    }
}

fn parse_envelope(data: &[u8]) -> Result<&[u8], CryptoError> {
    if data.len() < 5 {
        return Err(CryptoError::CekDecryptionFailed(
            "enveloped CEK too short".into(),
        ));
    }
    if data[0] != CEK_ENVELOPE_VERSION {
        return Err(CryptoError::CekDecryptionFailed(format!(
            "unknown CEK envelope version {:#04x}",
            data[0]
        )));
    }

    let key_path_len = u16::from_le_bytes([data[1], data[2]]) as usize;
    let cipher_len_at = 3 + key_path_len;
    if data.len() < cipher_len_at + 2 {
        return Err(CryptoError::CekDecryptionFailed(
            "enveloped CEK truncated before ciphertext length".into(),
        ));
    }

    let cipher_len =
        u16::from_le_bytes([data[cipher_len_at], data[cipher_len_at + 1]]) as usize;
    let cipher_at = cipher_len_at + 2;
    if data.len() < cipher_at + cipher_len {
        return Err(CryptoError::CekDecryptionFailed(
            "enveloped CEK truncated inside ciphertext".into(),
        ));
    }

    Ok(&data[cipher_at..cipher_at + cipher_len])
}

/// Build a CEK envelope. Used by the in-memory key store and tests.
#[must_use]
pub fn build_envelope(key_path: &str, ciphertext: &[u8]) -> Vec<u8> {
    let path_utf16: Vec<u8> = key_path
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();

    let mut out = Vec::with_capacity(5 + path_utf16.len() + ciphertext.len());
    out.push(CEK_ENVELOPE_VERSION);
    out.extend_from_slice(&(path_utf16.len() as u16).to_le_bytes());
    out.extend_from_slice(&path_utf16);
    out.extend_from_slice(&(ciphertext.len() as u16).to_le_bytes());
    out.extend_from_slice(ciphertext);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    fn test_key() -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 2048).unwrap()
    }

    #[test]
    fn pem_parse() {
        let key = test_key();
        let pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        let unwrapper = RsaKeyUnwrapper::from_pem(&pem).unwrap();
        assert_eq!(unwrapper.key_bits(), 2048);
    }

    #[test]
    fn envelope_roundtrip() {
        let key = test_key();
        let unwrapper = RsaKeyUnwrapper::from_key(key.clone());

        let cek = [0x42u8; 32];
        let mut rng = rand::thread_rng();
        let wrapped = key
            .to_public_key()
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &cek)
            .unwrap();

        let enveloped = build_envelope("CurrentUser/My/cmk", &wrapped);
        assert_eq!(unwrapper.unwrap_cek(&enveloped).unwrap(), cek);
    }

    #[test]
    fn bad_envelope_version() {
        let mut enveloped = build_envelope("p", &[0u8; 16]);
        enveloped[0] = 0x02;
        assert!(parse_envelope(&enveloped).is_err());
    }

    #[test]
    fn truncated_envelope() {
        assert!(parse_envelope(&[0x01, 0x04]).is_err());
        let enveloped = build_envelope("path", &[0u8; 64]);
        assert!(parse_envelope(&enveloped[..enveloped.len() - 1]).is_err());
    }
}
