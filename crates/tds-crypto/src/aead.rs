//! AEAD_AES_256_CBC_HMAC_SHA256 cell encryption.
//!
//! Encrypt-then-MAC over AES-256-CBC:
//!
//! 1. derive the encryption, MAC and IV keys from the CEK with labeled
//!    HMAC-SHA256 invocations;
//! 2. pick the IV: random for randomized mode, `HMAC(iv_key,
//!    plaintext)` truncated to 16 bytes for deterministic mode;
//! 3. AES-256-CBC with PKCS7 padding;
//! 4. MAC over `version || IV || ciphertext || algorithm_version`.
//!
//! Cell layout: `version(1) || mac(32) || iv(16) || aes_ciphertext`.
//! MAC verification is constant-time and happens before any decryption.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cell format version byte.
const VERSION_BYTE: u8 = 0x01;
/// Algorithm version byte appended to the MAC input.
const ALGORITHM_VERSION_BYTE: u8 = 0x01;

const AES_BLOCK_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const MAC_SIZE: usize = 32;
const IV_SIZE: usize = 16;

/// Smallest well-formed cell: version + MAC + IV + one AES block.
const MIN_CIPHERTEXT_SIZE: usize = 1 + MAC_SIZE + IV_SIZE + AES_BLOCK_SIZE;

/// Key derivation labels, fixed by the cell format.
const ENCRYPTION_KEY_LABEL: &[u8] = b"Microsoft SQL Server cell encryption key";
const MAC_KEY_LABEL: &[u8] = b"Microsoft SQL Server cell MAC key";
const IV_KEY_LABEL: &[u8] = b"Microsoft SQL Server cell IV key";

/// Per-column encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    /// Equal plaintexts produce equal ciphertexts. Supports equality
    /// predicates and joins on the encrypted column.
    Deterministic,
    /// Fresh random IV per encryption.
    Randomized,
    /// No encryption; values pass through unchanged.
    Plaintext,
}

impl EncryptionType {
    /// Map from the wire descriptor.
    #[must_use]
    pub fn from_wire(wire: tds_wire::EncryptionTypeWire) -> Self {
        match wire {
            tds_wire::EncryptionTypeWire::Deterministic => Self::Deterministic,
            tds_wire::EncryptionTypeWire::Randomized => Self::Randomized,
            tds_wire::EncryptionTypeWire::Plaintext => Self::Plaintext,
        }
    }
}

/// The three keys derived from one CEK.
///
/// Zeroed on drop.
pub struct DerivedKeys {
    enc_key: [u8; KEY_SIZE],
    mac_key: [u8; KEY_SIZE],
    iv_key: [u8; KEY_SIZE],
}

impl DerivedKeys {
    /// Derive the cell keys from a 32-byte CEK.
    pub fn derive(cek: &[u8]) -> Result<Self, CryptoError> {
        if cek.len() != KEY_SIZE {
            return Err(CryptoError::Configuration(format!(
                "CEK must be {KEY_SIZE} bytes, got {}",
                cek.len()
            )));
        }

        Ok(Self {
            enc_key: derive_key(cek, ENCRYPTION_KEY_LABEL)?,
            mac_key: derive_key(cek, MAC_KEY_LABEL)?,
            iv_key: derive_key(cek, IV_KEY_LABEL)?,
        })
    }

    /// Produce the IV for one encryption.
    fn generate_iv(
        &self,
        encryption_type: EncryptionType,
        plaintext: &[u8],
    ) -> Result<[u8; IV_SIZE], CryptoError> {
        match encryption_type {
            EncryptionType::Randomized => {
                let mut iv = [0u8; IV_SIZE];
                rand::thread_rng().fill_bytes(&mut iv);
                Ok(iv)
            }
            EncryptionType::Deterministic => {
                let mut mac = HmacSha256::new_from_slice(&self.iv_key)
                    .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
                mac.update(plaintext);
                let digest = mac.finalize().into_bytes();
                let mut iv = [0u8; IV_SIZE];
                iv.copy_from_slice(&digest[..IV_SIZE]);
                Ok(iv)
            }
            EncryptionType::Plaintext => Err(CryptoError::EncryptionFailed(
                "plaintext columns have no IV".into(),
            )),
        }
    }
}

impl Drop for DerivedKeys {
    fn drop(&mut self) {
        self.enc_key.fill(0);
        self.mac_key.fill(0);
        self.iv_key.fill(0);
    }
}

fn derive_key(cek: &[u8], label: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(cek)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    mac.update(label);
    let digest = mac.finalize().into_bytes();
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest);
    Ok(key)
}

/// Cell cipher for one CEK.
pub struct AeadCipher {
    keys: DerivedKeys,
}

impl AeadCipher {
    /// Build a cipher from a 32-byte CEK.
    pub fn new(cek: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            keys: DerivedKeys::derive(cek)?,
        })
    }

    /// Encrypt one cell value.
    ///
    /// `Plaintext` mode returns the input unchanged.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        encryption_type: EncryptionType,
    ) -> Result<Vec<u8>, CryptoError> {
        if encryption_type == EncryptionType::Plaintext {
            return Ok(plaintext.to_vec());
        }

        let iv = self.keys.generate_iv(encryption_type, plaintext)?;

        let padded_len = (plaintext.len() / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE;
        let mut work = vec![0u8; padded_len];
        work[..plaintext.len()].copy_from_slice(plaintext);

        let cipher = Aes256CbcEnc::new_from_slices(&self.keys.enc_key, &iv)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut work, plaintext.len())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mac = self.compute_mac(&iv, ciphertext)?;

        let mut cell = Vec::with_capacity(1 + MAC_SIZE + IV_SIZE + ciphertext.len());
        cell.push(VERSION_BYTE);
        cell.extend_from_slice(&mac);
        cell.extend_from_slice(&iv);
        cell.extend_from_slice(ciphertext);
        Ok(cell)
    }

    /// Decrypt one cell value. The MAC is verified in constant time
    /// before any decryption work happens.
    pub fn decrypt(&self, cell: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if cell.len() < MIN_CIPHERTEXT_SIZE {
            return Err(CryptoError::DecryptionFailed(format!(
                "ciphertext too short: {} bytes, minimum {MIN_CIPHERTEXT_SIZE}",
                cell.len()
            )));
        }
        if cell[0] != VERSION_BYTE {
            return Err(CryptoError::DecryptionFailed(format!(
                "unknown cell version {:#04x}",
                cell[0]
            )));
        }

        let stored_mac = &cell[1..1 + MAC_SIZE];
        let iv = &cell[1 + MAC_SIZE..1 + MAC_SIZE + IV_SIZE];
        let ciphertext = &cell[1 + MAC_SIZE + IV_SIZE..];

        let computed = self.compute_mac(iv, ciphertext)?;
        if !constant_time_eq(stored_mac, &computed) {
            return Err(CryptoError::DecryptionFailed(
                "authentication tag mismatch".into(),
            ));
        }

        let cipher = Aes256CbcDec::new_from_slices(&self.keys.enc_key, iv)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        let mut work = ciphertext.to_vec();
        let plaintext = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut work)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        Ok(plaintext.to_vec())
    }

    /// MAC input: `version || iv || ciphertext || algorithm_version`.
    fn compute_mac(&self, iv: &[u8], ciphertext: &[u8]) -> Result<[u8; MAC_SIZE], CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.keys.mac_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        mac.update(&[VERSION_BYTE]);
        mac.update(iv);
        mac.update(ciphertext);
        mac.update(&[ALGORITHM_VERSION_BYTE]);

        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; MAC_SIZE];
        out.copy_from_slice(&digest);
        Ok(out)
    }
}

/// Encrypt an optional cell value. SQL NULL is never encrypted; it
/// passes through as NULL.
pub fn encrypt_cell(
    cipher: &AeadCipher,
    value: Option<&[u8]>,
    encryption_type: EncryptionType,
) -> Result<Option<Vec<u8>>, CryptoError> {
    value
        .map(|plaintext| cipher.encrypt(plaintext, encryption_type))
        .transpose()
}

/// Decrypt an optional cell value, with NULL passing through.
pub fn decrypt_cell(
    cipher: &AeadCipher,
    cell: Option<&[u8]>,
) -> Result<Option<Vec<u8>>, CryptoError> {
    cell.map(|ciphertext| cipher.decrypt(ciphertext)).transpose()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
