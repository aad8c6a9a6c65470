//! `META-INF/encryption.xml` parsing.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

use crate::container::ENCRYPTION_FILE;
use crate::error::ParseError;
use crate::path;
use crate::xml;

pub const IDPF_OBFUSCATION: &str = "http://www.idpf.org/2008/embedding";
pub const ADOBE_OBFUSCATION: &str = "http://ns.adobe.com/pdf/enc#RC";
pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";

/// Vendor DRM recognized by signature but never decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum VendorDrm {
    AdobeAdept,
    AppleFairPlay,
    SonyUrms,
    Unknown,
}

impl VendorDrm {
    pub fn name(&self) -> &'static str {
        match self {
            VendorDrm::AdobeAdept => "Adobe ADEPT",
            VendorDrm::AppleFairPlay => "Apple FairPlay",
            VendorDrm::SonyUrms => "Sony URMS",
            VendorDrm::Unknown => "Unknown DRM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEntry {
    /// Container path of the encrypted resource.
    pub path: String,
    pub algorithm: String,
    pub compression: Option<Compression>,
    pub original_length: Option<u64>,
    /// `RetrievalMethod/@URI` of the key, e.g. `license.lcpl#/encryption/content_key`.
    pub key_retrieval: Option<String>,
}

impl EncryptedEntry {
    pub fn is_font_obfuscation(&self) -> bool {
        self.algorithm == IDPF_OBFUSCATION || self.algorithm == ADOBE_OBFUSCATION
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncryptionInfo {
    entries: HashMap<String, EncryptedEntry>,
    vendor: Option<VendorDrm>,
}

impl EncryptionInfo {
    pub fn parse(xml_text: &str) -> Result<Self, ParseError> {
        let mut reader = XmlReader::from_str(xml_text);
        let mut buf = Vec::new();
        let mut entries = HashMap::new();
        let mut current: Option<EncryptedEntry> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                // A self-closing EncryptedData carries no reference.
                Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"EncryptedData" => {}
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    let attrs = xml::attributes(e);
                    match xml::local_name(e).as_str() {
                        "EncryptedData" => {
                            current = Some(EncryptedEntry {
                                path: String::new(),
                                algorithm: String::new(),
                                compression: None,
                                original_length: None,
                                key_retrieval: None,
                            });
                        }
                        "EncryptionMethod" => {
                            if let (Some(entry), Some(alg)) = (current.as_mut(), attrs.get("Algorithm")) {
                                entry.algorithm = alg.trim().to_string();
                            }
                        }
                        "CipherReference" => {
                            if let (Some(entry), Some(uri)) = (current.as_mut(), attrs.get("URI")) {
                                entry.path = path::normalize(&path::decode(uri));
                            }
                        }
                        "RetrievalMethod" => {
                            if let (Some(entry), Some(uri)) = (current.as_mut(), attrs.get("URI")) {
                                entry.key_retrieval = Some(uri.clone());
                            }
                        }
                        "Compression" => {
                            if let Some(entry) = current.as_mut() {
                                entry.compression = match attrs.get("Method").map(String::as_str) {
                                    Some("8") => Some(Compression::Deflate),
                                    Some(m) if m.eq_ignore_ascii_case("deflate") => {
                                        Some(Compression::Deflate)
                                    }
                                    Some(_) => Some(Compression::Stored),
                                    None => None,
                                };
                                entry.original_length =
                                    attrs.get("OriginalLength").and_then(|v| v.trim().parse().ok());
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"EncryptedData" => {
                    if let Some(entry) = current.take() {
                        if entry.path.is_empty() {
                            tracing::warn!("EncryptedData without CipherReference, ignoring");
                        } else {
                            entries.insert(entry.path.clone(), entry);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ParseError::Malformed {
                        path: ENCRYPTION_FILE.to_string(),
                        detail: e.to_string(),
                    });
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(EncryptionInfo {
            entries,
            vendor: detect_vendor(xml_text),
        })
    }

    pub fn get(&self, path: &str) -> Option<&EncryptedEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &EncryptedEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every declared entry is a font obfuscation entry.
    pub fn is_font_obfuscation_only(&self) -> bool {
        !self.entries.is_empty() && self.entries.values().all(EncryptedEntry::is_font_obfuscation)
    }

    /// Vendor DRM signature found in the XML, if any.
    pub fn vendor(&self) -> Option<VendorDrm> {
        self.vendor
    }
}

/// Look for vendor namespaces in the raw XML.
fn detect_vendor(xml_text: &str) -> Option<VendorDrm> {
    if xml_text.contains("http://ns.adobe.com/adept")
        || xml_text.contains("http://ns.adobe.com/digitaleditions")
    {
        Some(VendorDrm::AdobeAdept)
    } else if xml_text.contains("http://www.apple.com/ibooks") {
        Some(VendorDrm::AppleFairPlay)
    } else if xml_text.contains("http://urms.org") {
        Some(VendorDrm::SonyUrms)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FONTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container"
            xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
  <enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
    <enc:CipherData><enc:CipherReference URI="OEBPS/fonts/Serif%20Bold.otf"/></enc:CipherData>
  </enc:EncryptedData>
</encryption>"#;

    #[test]
    fn font_entries_are_indexed_by_decoded_path() {
        let info = EncryptionInfo::parse(FONTS).unwrap();
        assert_eq!(info.len(), 1);
        let entry = info.get("OEBPS/fonts/Serif Bold.otf").unwrap();
        assert_eq!(entry.algorithm, IDPF_OBFUSCATION);
        assert!(info.is_font_obfuscation_only());
        assert_eq!(info.vendor(), None);
    }

    #[test]
    fn lcp_entries_carry_compression_and_key_reference() {
        let xml = r#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/>
    <KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">
      <RetrievalMethod URI="license.lcpl#/encryption/content_key"
                       Type="http://readium.org/2014/01/lcp#EncryptedContentKey"/>
    </KeyInfo>
    <CipherData><CipherReference URI="OEBPS/ch1.xhtml"/></CipherData>
    <EncryptionProperties>
      <EncryptionProperty xmlns:ns="http://www.idpf.org/2016/encryption#compression">
        <ns:Compression Method="8" OriginalLength="1234"/>
      </EncryptionProperty>
    </EncryptionProperties>
  </EncryptedData>
</encryption>"#;
        let info = EncryptionInfo::parse(xml).unwrap();
        let entry = info.get("OEBPS/ch1.xhtml").unwrap();
        assert_eq!(entry.algorithm, AES256_CBC);
        assert_eq!(entry.compression, Some(Compression::Deflate));
        assert_eq!(entry.original_length, Some(1234));
        assert_eq!(
            entry.key_retrieval.as_deref(),
            Some("license.lcpl#/encryption/content_key")
        );
        assert!(!info.is_font_obfuscation_only());
    }

    #[test]
    fn adobe_adept_signature_is_detected() {
        let xml = r#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
    <KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">
      <resource xmlns="http://ns.adobe.com/adept">urn:uuid:1234</resource>
    </KeyInfo>
    <CipherData><CipherReference URI="OEBPS/ch1.xhtml"/></CipherData>
  </EncryptedData>
</encryption>"#;
        let info = EncryptionInfo::parse(xml).unwrap();
        assert_eq!(info.vendor(), Some(VendorDrm::AdobeAdept));
    }

    #[test]
    fn entry_paths_do_not_look_like_vendor_signatures() {
        let xml = r#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/>
    <CipherData><CipherReference URI="OEBPS/sinfonia.xhtml"/></CipherData>
  </EncryptedData>
</encryption>"#;
        let info = EncryptionInfo::parse(xml).unwrap();
        assert!(info.get("OEBPS/sinfonia.xhtml").is_some());
        assert_eq!(info.vendor(), None);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        assert!(EncryptionInfo::parse("<encryption><EncryptedData></encryption>").is_err());
    }
}
