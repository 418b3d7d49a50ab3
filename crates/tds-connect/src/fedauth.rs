//! Federated authentication.
//!
//! When the login negotiates federated auth, the server answers LOGIN7
//! with a FEDAUTHINFO token naming the security token service and the
//! service principal. The client acquires a bearer token from the
//! authority and sends it back in a FEDAUTH_TOKEN message; the server
//! then completes the login.
//!
//! Token acquisition itself is pluggable: the password and integrated
//! flows, and caller-supplied callbacks, all implement
//! [`BearerTokenProvider`].

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use tds_wire::token::FedAuthInfo;

use crate::error::{Error, Result};

/// Fed-auth workflow selectors carried in the LOGIN7 feature extension.
pub mod workflow {
    /// Username/password against the security token service.
    pub const USERNAME_PASSWORD: u8 = 0x01;
    /// Integrated (Kerberos) against the security token service.
    pub const INTEGRATED: u8 = 0x02;
}

/// An acquired bearer token.
#[derive(Clone)]
pub struct FedAuthToken {
    /// The access token.
    pub token: String,
    /// Server nonce to echo, when the handshake supplied one.
    pub nonce: Option<[u8; 32]>,
}

impl std::fmt::Debug for FedAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FedAuthToken")
            .field("token_len", &self.token.len())
            .field("has_nonce", &self.nonce.is_some())
            .finish()
    }
}

/// Acquires bearer tokens from an authority.
#[async_trait]
pub trait BearerTokenProvider: Send + Sync {
    /// Acquire a token for the given STS URL and SPN.
    async fn acquire_token(
        &self,
        info: &FedAuthInfo,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<FedAuthToken>;
}

/// Encode a FEDAUTH_TOKEN message payload (packet type 0x08).
///
/// Layout: `data_len:u32le`, then `token_len:u32le`, the UTF-16LE token,
/// and the echoed nonce when present.
#[must_use]
pub fn encode_fedauth_token_message(token: &FedAuthToken) -> Bytes {
    let token_bytes: Vec<u8> = token
        .token
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();

    let nonce_len = token.nonce.map_or(0, |n| n.len());
    let data_len = 4 + token_bytes.len() + nonce_len;

    let mut buf = BytesMut::with_capacity(4 + data_len);
    buf.put_u32_le(data_len as u32);
    buf.put_u32_le(token_bytes.len() as u32);
    buf.put_slice(&token_bytes);
    if let Some(nonce) = token.nonce {
        buf.put_slice(&nonce);
    }
    buf.freeze()
}

/// Validate that the FEDAUTHINFO token carries what the flow needs.
pub fn validate_fed_auth_info(info: &FedAuthInfo) -> Result<()> {
    if info.sts_url.is_empty() {
        return Err(Error::FedAuth("server sent no STS URL".into()));
    }
    if info.spn.is_empty() {
        return Err(Error::FedAuth("server sent no service principal name".into()));
    }
    Ok(())
}

/// Token provider backed by a caller-supplied closure.
///
/// The seam the tests use, and the integration point for external
/// identity libraries.
pub struct CallbackTokenProvider<F>(pub F);

#[async_trait]
impl<F> BearerTokenProvider for CallbackTokenProvider<F>
where
    F: Fn(&FedAuthInfo) -> Result<FedAuthToken> + Send + Sync,
{
    async fn acquire_token(
        &self,
        info: &FedAuthInfo,
        _user: Option<&str>,
        _password: Option<&str>,
    ) -> Result<FedAuthToken> {
        (self.0)(info)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_message_layout() {
        let token = FedAuthToken {
            token: "ab".into(),
            nonce: None,
        };
        let message = encode_fedauth_token_message(&token);

        // data_len = 4 (token_len) + 4 bytes of UTF-16 token
        assert_eq!(u32::from_le_bytes([message[0], message[1], message[2], message[3]]), 8);
        assert_eq!(u32::from_le_bytes([message[4], message[5], message[6], message[7]]), 4);
        assert_eq!(&message[8..], &[b'a', 0, b'b', 0]);
    }

    #[test]
    fn token_message_echoes_nonce() {
        let token = FedAuthToken {
            token: "t".into(),
            nonce: Some([0x7u8; 32]),
        };
        let message = encode_fedauth_token_message(&token);
        let data_len = u32::from_le_bytes([message[0], message[1], message[2], message[3]]);
        assert_eq!(data_len as usize, 4 + 2 + 32);
        assert_eq!(&message[message.len() - 32..], &[0x7u8; 32]);
    }

    #[test]
    fn info_validation() {
        let complete = FedAuthInfo {
            sts_url: "https://login.example.net".into(),
            spn: "https://db.example.net/".into(),
        };
        assert!(validate_fed_auth_info(&complete).is_ok());

        let missing_sts = FedAuthInfo {
            sts_url: String::new(),
            spn: "spn".into(),
        };
        assert!(validate_fed_auth_info(&missing_sts).is_err());
    }

    #[tokio::test]
    async fn callback_provider() {
        let provider = CallbackTokenProvider(|info: &FedAuthInfo| {
            Ok(FedAuthToken {
                token: format!("token-for-{}", info.spn),
                nonce: None,
            })
        });

        let info = FedAuthInfo {
            sts_url: "https://sts".into(),
            spn: "db".into(),
        };
        let token = provider.acquire_token(&info, None, None).await.unwrap();
        assert_eq!(token.token, "token-for-db");
    }
}
