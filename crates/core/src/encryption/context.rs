use std::io::Read;

use flate2::read::DeflateDecoder;

use super::info::{
    Compression, EncryptedEntry, EncryptionInfo, VendorDrm, ADOBE_OBFUSCATION, AES256_CBC,
    IDPF_OBFUSCATION,
};
use super::license::{aes256_cbc_decrypt, License};
use super::obfuscation::{self, ADOBE_HEADER_LEN, IDPF_HEADER_LEN};
use crate::error::DecryptionError;

/// How a publication is protected, decided once at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "vendor")]
pub enum ProtectionScheme {
    None,
    FontObfuscation,
    Licensed,
    Unsupported(VendorDrm),
}

/// Presence of vendor sidecar files next to `encryption.xml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VendorFiles {
    pub rights_xml: bool,
    pub sinf_xml: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    NotNeeded,
    Unlocked([u8; 32]),
    NoPassphrase,
    Rejected,
    UnsupportedProfile,
}

/// Key material and classification for one open publication. Immutable
/// after construction.
#[derive(Debug, Clone)]
pub struct DecryptionContext {
    scheme: ProtectionScheme,
    info: EncryptionInfo,
    license: Option<License>,
    key: KeyState,
    idpf_key: [u8; 20],
    adobe_key: Option<[u8; 16]>,
}

impl DecryptionContext {
    /// Context for an unprotected publication.
    pub fn unprotected() -> Self {
        DecryptionContext {
            scheme: ProtectionScheme::None,
            info: EncryptionInfo::default(),
            license: None,
            key: KeyState::NotNeeded,
            idpf_key: [0; 20],
            adobe_key: None,
        }
    }

    pub fn create(
        unique_identifier: &str,
        info: Option<EncryptionInfo>,
        license: Option<License>,
        passphrase: Option<&str>,
        vendor_files: VendorFiles,
    ) -> Self {
        let Some(info) = info else {
            return Self::unprotected();
        };

        let scheme = classify(&info, license.as_ref(), vendor_files);
        let key = match (&scheme, &license) {
            (ProtectionScheme::Licensed, Some(license)) => unlock(license, passphrase),
            _ => KeyState::NotNeeded,
        };
        tracing::debug!(
            "Protection scheme {:?} ({} encrypted entries)",
            scheme,
            info.len()
        );

        DecryptionContext {
            scheme,
            idpf_key: obfuscation::idpf_key(unique_identifier),
            adobe_key: obfuscation::adobe_key(unique_identifier),
            info,
            license,
            key,
        }
    }

    pub fn scheme(&self) -> ProtectionScheme {
        self.scheme
    }

    pub fn license(&self) -> Option<&License> {
        self.license.as_ref()
    }

    pub fn encryption_info(&self) -> &EncryptionInfo {
        &self.info
    }

    /// True for licensed publications: a passphrase is needed to read them.
    pub fn requires_credentials(&self) -> bool {
        self.scheme == ProtectionScheme::Licensed
    }

    pub fn can_decrypt(&self) -> bool {
        match self.scheme {
            ProtectionScheme::None | ProtectionScheme::FontObfuscation => true,
            ProtectionScheme::Licensed => matches!(self.key, KeyState::Unlocked(_)),
            ProtectionScheme::Unsupported(_) => false,
        }
    }

    /// The error every content read fails with when [`Self::can_decrypt`] is false.
    pub fn ensure_readable(&self) -> Result<(), DecryptionError> {
        if self.can_decrypt() {
            return Ok(());
        }
        Err(self.denial())
    }

    fn denial(&self) -> DecryptionError {
        match (self.scheme, self.key) {
            (ProtectionScheme::Unsupported(vendor), _) => {
                DecryptionError::UnsupportedScheme(vendor.name().to_string())
            }
            (_, KeyState::Rejected) => DecryptionError::InvalidPassphrase,
            (_, KeyState::UnsupportedProfile) => DecryptionError::UnsupportedScheme(format!(
                "LCP profile {}",
                self.license
                    .as_ref()
                    .map(|l| l.encryption.profile.as_str())
                    .unwrap_or("unknown")
            )),
            _ => DecryptionError::CredentialsRequired {
                scheme: "LCP".to_string(),
            },
        }
    }

    pub fn is_encrypted(&self, path: &str) -> bool {
        self.info.get(path).is_some()
    }

    /// Decrypt bytes read from `path`. Paths without an encryption entry pass
    /// through unchanged.
    pub fn decrypt_resource(&self, path: &str, data: Vec<u8>) -> Result<Vec<u8>, DecryptionError> {
        let Some(entry) = self.info.get(path) else {
            return Ok(data);
        };

        match entry.algorithm.as_str() {
            IDPF_OBFUSCATION => Ok(obfuscation::deobfuscate(
                data,
                &self.idpf_key,
                IDPF_HEADER_LEN,
            )),
            ADOBE_OBFUSCATION => {
                let key = self.adobe_key.ok_or_else(|| DecryptionError::Corrupt {
                    path: path.to_string(),
                    detail: "unique identifier is not a UUID".to_string(),
                })?;
                Ok(obfuscation::deobfuscate(data, &key, ADOBE_HEADER_LEN))
            }
            _ if matches!(self.scheme, ProtectionScheme::Unsupported(_)) => Err(self.denial()),
            AES256_CBC => {
                let KeyState::Unlocked(key) = self.key else {
                    return Err(self.denial());
                };
                let plain = aes256_cbc_decrypt(&key, &data, path)?;
                inflate_if_needed(entry, plain)
            }
            other => Err(DecryptionError::UnsupportedAlgorithm {
                path: path.to_string(),
                algorithm: other.to_string(),
            }),
        }
    }

    /// One line for display, e.g. "LCP license (passphrase required)".
    pub fn protection_description(&self) -> String {
        match self.scheme {
            ProtectionScheme::None => "Not protected".to_string(),
            ProtectionScheme::FontObfuscation => {
                let idpf = self.info.entries().any(|e| e.algorithm == IDPF_OBFUSCATION);
                let adobe = self.info.entries().any(|e| e.algorithm == ADOBE_OBFUSCATION);
                let kinds = match (idpf, adobe) {
                    (true, true) => "IDPF, Adobe",
                    (false, true) => "Adobe",
                    _ => "IDPF",
                };
                format!("Font obfuscation only ({kinds})")
            }
            ProtectionScheme::Licensed => {
                let state = match self.key {
                    KeyState::Unlocked(_) => "unlocked".to_string(),
                    KeyState::Rejected => "passphrase rejected".to_string(),
                    KeyState::UnsupportedProfile => "unsupported profile".to_string(),
                    _ => match self.license.as_ref().and_then(License::text_hint) {
                        Some(hint) => format!("passphrase required, hint: {hint}"),
                        None => "passphrase required".to_string(),
                    },
                };
                format!("LCP license ({state})")
            }
            ProtectionScheme::Unsupported(vendor) => format!("{} (unsupported)", vendor.name()),
        }
    }
}

/// Classification order: license, font obfuscation only, vendor signatures,
/// anything else.
fn classify(
    info: &EncryptionInfo,
    license: Option<&License>,
    vendor_files: VendorFiles,
) -> ProtectionScheme {
    if license.is_some() {
        return ProtectionScheme::Licensed;
    }
    if info.is_empty() {
        return ProtectionScheme::None;
    }
    if info.is_font_obfuscation_only() {
        return ProtectionScheme::FontObfuscation;
    }
    if let Some(vendor) = info.vendor() {
        return ProtectionScheme::Unsupported(vendor);
    }
    if vendor_files.rights_xml {
        return ProtectionScheme::Unsupported(VendorDrm::AdobeAdept);
    }
    if vendor_files.sinf_xml {
        return ProtectionScheme::Unsupported(VendorDrm::AppleFairPlay);
    }
    ProtectionScheme::Unsupported(VendorDrm::Unknown)
}

fn unlock(license: &License, passphrase: Option<&str>) -> KeyState {
    if !license.is_basic_profile() {
        tracing::warn!("LCP profile {} is not supported", license.encryption.profile);
        return KeyState::UnsupportedProfile;
    }
    let Some(passphrase) = passphrase else {
        return KeyState::NoPassphrase;
    };
    match license.decrypt_content_key(&License::user_key(passphrase)) {
        Ok(key) => KeyState::Unlocked(key),
        Err(e) => {
            tracing::warn!("License not unlocked: {}", e);
            KeyState::Rejected
        }
    }
}

fn inflate_if_needed(entry: &EncryptedEntry, data: Vec<u8>) -> Result<Vec<u8>, DecryptionError> {
    if entry.compression != Some(Compression::Deflate) {
        return Ok(data);
    }
    let mut out = Vec::with_capacity(entry.original_length.unwrap_or(0) as usize);
    DeflateDecoder::new(&data[..])
        .read_to_end(&mut out)
        .map_err(|e| DecryptionError::Corrupt {
            path: entry.path.clone(),
            detail: format!("inflate failed: {e}"),
        })?;
    Ok(out)
}
