//! Protection classification and on-read decryption.
//!
//! A publication is classified once, when it is opened, from
//! `META-INF/encryption.xml`, an optional LCP license and vendor sidecar
//! files. Every later content read goes through [`DecryptingSource`].

mod context;
pub mod info;
pub mod license;
pub mod obfuscation;

pub use context::{DecryptionContext, ProtectionScheme, VendorFiles};
pub use info::{EncryptedEntry, EncryptionInfo, VendorDrm};
pub use license::License;

use crate::container::{Container, ResourceSource, ENCRYPTION_FILE, LICENSE_FILE};
use crate::error::EngineError;

impl DecryptionContext {
    /// Build the context for an opened container.
    pub fn from_container(
        container: &Container,
        unique_identifier: &str,
        passphrase: Option<&str>,
    ) -> Result<Self, EngineError> {
        let info = match container.read_optional_string(ENCRYPTION_FILE)? {
            Some(xml) => Some(EncryptionInfo::parse(&xml)?),
            None => None,
        };
        let license = match container.read_optional_string(LICENSE_FILE)? {
            Some(json) => Some(License::parse(&json)?),
            None => None,
        };
        let vendor_files = VendorFiles {
            rights_xml: container.has_rights_file(),
            sinf_xml: container.has_sinf_file(),
        };
        Ok(DecryptionContext::create(
            unique_identifier,
            info,
            license,
            passphrase,
            vendor_files,
        ))
    }
}

/// Reads container entries and decrypts them. Refuses every read when the
/// context cannot decrypt, so ciphertext is never handed out.
pub struct DecryptingSource<'a> {
    container: &'a Container,
    context: &'a DecryptionContext,
}

impl<'a> DecryptingSource<'a> {
    pub fn new(container: &'a Container, context: &'a DecryptionContext) -> Self {
        DecryptingSource { container, context }
    }
}

impl ResourceSource for DecryptingSource<'_> {
    fn read_resource(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        self.context.ensure_readable()?;
        let normalized = crate::path::normalize(path);
        let raw = self.container.read_bytes(&normalized)?;
        Ok(self.context.decrypt_resource(&normalized, raw)?)
    }

    fn contains(&self, path: &str) -> bool {
        self.container.has_entry(path)
    }
}
