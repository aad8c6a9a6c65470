//! OCF container access: the ZIP archive, `META-INF/container.xml` and raw
//! entry reads. Nothing here decrypts; see [`crate::encryption`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use unicode_normalization::UnicodeNormalization;
use zip::ZipArchive;

use crate::error::{ContainerError, EngineError};
use crate::path;
use crate::security::{EntrySize, SecurityLimits};
use crate::xml;

pub const CONTAINER_FILE: &str = "META-INF/container.xml";
pub const ENCRYPTION_FILE: &str = "META-INF/encryption.xml";
pub const LICENSE_FILE: &str = "META-INF/license.lcpl";
pub const RIGHTS_FILE: &str = "META-INF/rights.xml";
pub const SINF_FILE: &str = "META-INF/sinf.xml";

const EPUB_MIMETYPE: &str = "application/epub+zip";
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Byte source for a container.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Anything resources can be read from by container path.
///
/// Implemented by [`Container`] for raw bytes and by
/// [`crate::encryption::DecryptingSource`] for decrypted bytes; navigation,
/// cover and content code only see this trait.
pub trait ResourceSource {
    fn read_resource(&self, path: &str) -> Result<Vec<u8>, EngineError>;

    fn contains(&self, path: &str) -> bool;
}

pub struct Container {
    archive: Mutex<ZipArchive<Box<dyn ReadSeek>>>,
    /// NFC-normalized entry name -> name as stored in the archive.
    entries: HashMap<String, String>,
    package_path: String,
    limits: SecurityLimits,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("package_path", &self.package_path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Container {
    pub fn open<R: Read + Seek + Send + 'static>(source: R) -> Result<Self, ContainerError> {
        Self::open_with_limits(source, &SecurityLimits::default())
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let file = File::open(path.as_ref())?;
        Self::open(BufReader::new(file))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ContainerError> {
        Self::open(Cursor::new(data))
    }

    pub fn open_with_limits<R: Read + Seek + Send + 'static>(
        source: R,
        limits: &SecurityLimits,
    ) -> Result<Self, ContainerError> {
        let boxed: Box<dyn ReadSeek> = Box::new(source);
        let mut archive = ZipArchive::new(boxed)
            .map_err(|e| ContainerError::InvalidArchive(e.to_string()))?;

        let mut sizes = Vec::with_capacity(archive.len());
        let mut entries = HashMap::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive
                .by_index_raw(i)
                .map_err(|e| ContainerError::InvalidArchive(e.to_string()))?;
            sizes.push(EntrySize {
                compressed: file.compressed_size(),
                uncompressed: file.size(),
            });
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            if let Err(e) = limits.check_entry_name(&name) {
                tracing::warn!("Ignoring archive entry: {}", e);
                continue;
            }
            entries.insert(name.nfc().collect::<String>(), name);
        }
        limits.check_archive(&sizes)?;

        let mut container = Container {
            archive: Mutex::new(archive),
            entries,
            package_path: String::new(),
            limits: limits.clone(),
        };

        container.check_mimetype();

        if !container.has_entry(CONTAINER_FILE) {
            return Err(ContainerError::MissingEntry(CONTAINER_FILE.to_string()));
        }
        let container_xml = container.read_string(CONTAINER_FILE)?;
        let package_path = find_package_path(&container_xml)?;
        if !container.has_entry(&package_path) {
            return Err(ContainerError::MissingEntry(package_path));
        }
        tracing::debug!("Package document at {}", package_path);
        container.package_path = package_path;

        Ok(container)
    }

    /// The mimetype entry is advisory: a missing or unexpected value is logged only.
    fn check_mimetype(&self) {
        match self.read_bytes("mimetype") {
            Ok(bytes) => {
                let value = String::from_utf8_lossy(&bytes);
                if value.trim() != EPUB_MIMETYPE {
                    tracing::warn!("Unexpected mimetype '{}', continuing", value.trim());
                }
            }
            Err(_) => tracing::warn!("Container has no mimetype entry, continuing"),
        }
    }

    /// Container path of the package (OPF) document.
    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    /// Directory of the package document, without trailing slash.
    pub fn package_dir(&self) -> &str {
        path::parent_dir(&self.package_path)
    }

    /// Resolve a manifest-style href against the package directory.
    pub fn resolve_relative_path(&self, href: &str) -> String {
        path::resolve_from(&self.package_path, href)
    }

    fn lookup(&self, path: &str) -> Option<&str> {
        let key: String = path::normalize(path).nfc().collect();
        if let Some(name) = self.entries.get(&key) {
            return Some(name);
        }
        let decoded = path::normalize(&path::decode(path));
        if let Some(name) = self.entries.get(&decoded) {
            return Some(name);
        }
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&decoded))
            .map(|(_, name)| name.as_str())
    }

    pub fn has_entry(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// All entry names, NFC-normalized, sorted.
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Raw bytes of an entry, exactly as stored after ZIP decompression.
    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>, ContainerError> {
        let name = self
            .lookup(path)
            .ok_or_else(|| ContainerError::MissingEntry(path.to_string()))?;

        let mut archive = self.archive.lock();
        let mut file = archive.by_name(name).map_err(|e| ContainerError::ReadFailed {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
        self.limits.check_resource_size(name, file.size())?;

        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| ContainerError::ReadFailed {
                path: path.to_string(),
                detail: e.to_string(),
            })?;
        Ok(buf)
    }

    /// Entry decoded as UTF-8 with any BOM removed.
    pub fn read_string(&self, path: &str) -> Result<String, ContainerError> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(xml::strip_bom(&bytes).to_vec()).map_err(|e| ContainerError::Malformed {
            path: path.to_string(),
            detail: format!("invalid UTF-8: {e}"),
        })
    }

    /// Like [`Container::read_string`] but `None` when the entry does not exist.
    pub fn read_optional_string(&self, path: &str) -> Result<Option<String>, ContainerError> {
        if !self.has_entry(path) {
            return Ok(None);
        }
        self.read_string(path).map(Some)
    }

    pub fn has_encryption(&self) -> bool {
        self.has_entry(ENCRYPTION_FILE)
    }

    pub fn has_license_file(&self) -> bool {
        self.has_entry(LICENSE_FILE)
    }

    pub fn has_rights_file(&self) -> bool {
        self.has_entry(RIGHTS_FILE)
    }

    pub fn has_sinf_file(&self) -> bool {
        self.has_entry(SINF_FILE)
    }
}

impl ResourceSource for Container {
    fn read_resource(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        Ok(self.read_bytes(path)?)
    }

    fn contains(&self, path: &str) -> bool {
        self.has_entry(path)
    }
}

/// Find the package document path in container.xml. When several rootfiles
/// are listed, the first with the OPF media type wins.
fn find_package_path(container_xml: &str) -> Result<String, ContainerError> {
    let mut reader = XmlReader::from_str(container_xml);
    let mut buf = Vec::new();
    let mut fallback = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                let attrs = xml::attributes(e);
                if let Some(full_path) = attrs.get("full-path").filter(|p| !p.is_empty()) {
                    let full_path = path::normalize(&path::decode(full_path));
                    match attrs.get("media-type").map(String::as_str) {
                        Some(PACKAGE_MEDIA_TYPE) => return Ok(full_path),
                        _ => {
                            fallback.get_or_insert(full_path);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ContainerError::Malformed {
                    path: CONTAINER_FILE.to_string(),
                    detail: e.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    fallback.ok_or(ContainerError::MissingRootfile)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory [`ResourceSource`] for unit tests.
    #[derive(Default)]
    pub(crate) struct MemorySource {
        files: HashMap<String, Vec<u8>>,
    }

    impl MemorySource {
        pub(crate) fn with(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
            self.files.insert(path.to_string(), data.into());
            self
        }
    }

    impl ResourceSource for MemorySource {
        fn read_resource(&self, path: &str) -> Result<Vec<u8>, EngineError> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| EngineError::ResourceNotFound(path.to_string()))
        }

        fn contains(&self, path: &str) -> bool {
            self.files.contains_key(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rootfile_with_package_media_type_wins() {
        let xml = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="alt/other.xml" media-type="application/xml"/>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(find_package_path(xml).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn rootfile_without_media_type_is_used() {
        let xml = r#"<container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#;
        assert_eq!(find_package_path(xml).unwrap(), "content.opf");
    }

    #[test]
    fn missing_rootfile_is_an_error() {
        let xml = r#"<container><rootfiles/></container>"#;
        assert!(matches!(
            find_package_path(xml),
            Err(ContainerError::MissingRootfile)
        ));
    }

    #[test]
    fn not_a_zip_is_invalid_archive() {
        let err = Container::from_bytes(b"definitely not a zip".to_vec()).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidArchive(_)));
    }
}
