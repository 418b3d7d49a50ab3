//! End-to-end Always Encrypted round trips: bound parameter in, column
//! value out, through the provider registry and CEK resolution.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use tds_crypto::aead::{AeadCipher, EncryptionType, decrypt_cell, encrypt_cell};
use tds_crypto::cek::resolve_cek_with;
use tds_crypto::error::CryptoError;
use tds_crypto::provider::{KeyStoreProvider, ProviderRegistry};
use tds_wire::crypto::{CekTableEntry, EncryptedCek};

/// Provider whose "unwrapping" is a fixed XOR pad; enough to model a
/// master key without RSA in the loop.
struct PadProvider;

#[async_trait]
impl KeyStoreProvider for PadProvider {
    fn provider_name(&self) -> &str {
        "PAD_STORE"
    }

    async fn decrypt_cek(
        &self,
        _key_path: &str,
        _algorithm: &str,
        encrypted_cek: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(encrypted_cek.iter().map(|b| b ^ 0xA3).collect())
    }
}

fn cek_entry() -> CekTableEntry {
    let plaintext_cek: Vec<u8> = (0u8..32).map(|i| i.wrapping_mul(5)).collect();
    let wrapped: Vec<u8> = plaintext_cek.iter().map(|b| b ^ 0xA3).collect();

    CekTableEntry {
        database_id: 5,
        cek_id: 1,
        cek_version: 1,
        cek_md_version: [1, 0, 0, 0, 0, 0, 0, 0],
        encrypted_keys: vec![EncryptedCek {
            ciphertext: Bytes::from(wrapped),
            key_store_name: "PAD_STORE".into(),
            key_path: "cmk/1".into(),
            algorithm_name: "RSA_OAEP".into(),
        }],
    }
}

async fn resolved_cipher() -> Arc<AeadCipher> {
    let registry = ProviderRegistry::new();
    registry
        .register(vec![Arc::new(PadProvider)])
        .expect("register");
    resolve_cek_with(&cek_entry(), &registry)
        .await
        .expect("resolve")
        .cipher
}

#[tokio::test]
async fn char_column_roundtrip_deterministic() {
    let cipher = resolved_cipher().await;

    // A char(1) value "a" bound as a parameter: encrypted on the way
    // out, decrypted on the way back, same literal either way.
    let plaintext = "a".as_bytes();
    let cell = cipher
        .encrypt(plaintext, EncryptionType::Deterministic)
        .expect("encrypt");
    assert_ne!(cell.as_slice(), plaintext);

    let back = cipher.decrypt(&cell).expect("decrypt");
    assert_eq!(back, plaintext);
    assert_eq!(String::from_utf8(back).expect("utf8"), "a");

    // Deterministic mode: binding the same value yields the same cell,
    // so equality predicates keep working server-side.
    let again = cipher
        .encrypt(plaintext, EncryptionType::Deterministic)
        .expect("encrypt again");
    assert_eq!(cell, again);
}

#[tokio::test]
async fn null_values_pass_through_unencrypted() {
    let cipher = resolved_cipher().await;

    let out = encrypt_cell(&cipher, None, EncryptionType::Deterministic).expect("encrypt null");
    assert!(out.is_none());

    let back = decrypt_cell(&cipher, None).expect("decrypt null");
    assert!(back.is_none());

    // And a present value still round-trips through the same helpers.
    let cell = encrypt_cell(&cipher, Some(b"a"), EncryptionType::Randomized)
        .expect("encrypt")
        .expect("some");
    let back = decrypt_cell(&cipher, Some(&cell)).expect("decrypt").expect("some");
    assert_eq!(back, b"a");
}

#[tokio::test]
async fn wire_metadata_to_cipher_pipeline() {
    // Decode the CEK entry from its wire form first, then resolve.
    let mut encoded = bytes::BytesMut::new();
    let table = tds_wire::crypto::CekTable {
        entries: vec![cek_entry()],
    };
    table.encode(&mut encoded);

    let mut cursor = encoded.freeze();
    let decoded = tds_wire::crypto::CekTable::decode(&mut cursor).expect("decode");

    let registry = ProviderRegistry::new();
    registry
        .register(vec![Arc::new(PadProvider)])
        .expect("register");

    let entry = decoded.get(0).expect("entry");
    let resolved = resolve_cek_with(entry, &registry).await.expect("resolve");

    let cell = resolved
        .cipher
        .encrypt(b"wire", EncryptionType::Randomized)
        .expect("encrypt");
    assert_eq!(resolved.cipher.decrypt(&cell).expect("decrypt"), b"wire");
}
