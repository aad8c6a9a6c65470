//! Readium LCP license document (`META-INF/license.lcpl`).
//!
//! Only the basic encryption profile is unlocked: the user key is the SHA-256
//! of the passphrase, `key_check` is the license id encrypted with the user
//! key, and `content_key` is the publication key encrypted with the user key.
//! Both encrypted values are base64 of `IV (16 bytes) || AES-256-CBC ciphertext`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::container::LICENSE_FILE;
use crate::error::{DecryptionError, ParseError};

pub const BASIC_PROFILE: &str = "http://readium.org/lcp/basic-profile";

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Clone, Deserialize)]
pub struct License {
    pub id: String,
    #[serde(default)]
    pub issued: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub encryption: LicenseEncryption,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LicenseEncryption {
    pub profile: String,
    pub content_key: ContentKey,
    pub user_key: UserKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentKey {
    pub algorithm: String,
    pub encrypted_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserKey {
    pub algorithm: String,
    #[serde(default)]
    pub text_hint: Option<String>,
    pub key_check: String,
}

impl License {
    pub fn parse(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json).map_err(|e| ParseError::Malformed {
            path: LICENSE_FILE.to_string(),
            detail: e.to_string(),
        })
    }

    pub fn is_basic_profile(&self) -> bool {
        self.encryption.profile == BASIC_PROFILE
    }

    pub fn text_hint(&self) -> Option<&str> {
        self.encryption.user_key.text_hint.as_deref()
    }

    /// Derive the user key from a passphrase.
    pub fn user_key(passphrase: &str) -> [u8; 32] {
        Sha256::digest(passphrase.as_bytes()).into()
    }

    /// True when `user_key` decrypts `key_check` to the license id.
    pub fn check_user_key(&self, user_key: &[u8; 32]) -> bool {
        let Ok(encrypted) = decode_base64(&self.encryption.user_key.key_check) else {
            return false;
        };
        match aes256_cbc_decrypt(user_key, &encrypted, LICENSE_FILE) {
            Ok(plain) => plain == self.id.as_bytes(),
            Err(_) => false,
        }
    }

    /// Decrypt the publication content key with a verified user key.
    pub fn decrypt_content_key(&self, user_key: &[u8; 32]) -> Result<[u8; 32], DecryptionError> {
        if !self.check_user_key(user_key) {
            return Err(DecryptionError::InvalidPassphrase);
        }
        let encrypted = decode_base64(&self.encryption.content_key.encrypted_value)?;
        let plain = aes256_cbc_decrypt(user_key, &encrypted, LICENSE_FILE)?;
        plain.try_into().map_err(|v: Vec<u8>| DecryptionError::Corrupt {
            path: LICENSE_FILE.to_string(),
            detail: format!("content key is {} bytes, expected 32", v.len()),
        })
    }
}

fn decode_base64(value: &str) -> Result<Vec<u8>, DecryptionError> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| DecryptionError::Corrupt {
            path: LICENSE_FILE.to_string(),
            detail: format!("invalid base64: {e}"),
        })
}

/// Decrypt `IV || ciphertext` with AES-256-CBC and PKCS#7 padding.
pub(crate) fn aes256_cbc_decrypt(
    key: &[u8],
    data: &[u8],
    path: &str,
) -> Result<Vec<u8>, DecryptionError> {
    let corrupt = |detail: String| DecryptionError::Corrupt {
        path: path.to_string(),
        detail,
    };

    if data.len() < 32 || data.len() % 16 != 0 {
        return Err(corrupt(format!(
            "{} bytes is not an IV followed by whole cipher blocks",
            data.len()
        )));
    }
    let (iv, ciphertext) = data.split_at(16);
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|e| corrupt(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| corrupt("bad padding".to_string()))
}
