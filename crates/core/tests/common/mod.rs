//! In-memory EPUB fixtures for integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const UID: &str = "urn:uuid:12345678-9abc-def0-1234-56789abcdef0";
pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const IDPF_OBFUSCATION: &str = "http://www.idpf.org/2008/embedding";
pub const ADOBE_OBFUSCATION: &str = "http://ns.adobe.com/pdf/enc#RC";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Builds an OCF ZIP with `mimetype` stored first.
pub struct EpubBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new(opf: &str) -> Self {
        EpubBuilder {
            files: vec![
                ("META-INF/container.xml".to_string(), CONTAINER_XML.as_bytes().to_vec()),
                ("OEBPS/content.opf".to_string(), opf.as_bytes().to_vec()),
            ],
        }
    }

    pub fn file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.to_string(), data.into()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        for (name, data) in &self.files {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}

/// Package document with fixed metadata around the given manifest items and
/// spine itemrefs.
pub fn opf(version: &str, manifest: &str, spine: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{version}" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:identifier id="bookid">{UID}</dc:identifier>
    <dc:title>Fixture Book</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    {manifest}
  </manifest>
  <spine{toc}>
    {spine}
  </spine>
</package>"#,
        toc = if manifest.contains(r#"id="ncx""#) {
            r#" toc="ncx""#
        } else {
            ""
        }
    )
}

pub fn xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head><body>{body}</body></html>"#
    )
}

/// Manifest items and itemrefs for `count` chapters at `OEBPS/Text/cN.xhtml`.
pub fn chapters(count: usize) -> (String, String) {
    let manifest = (1..=count)
        .map(|i| format!(r#"<item id="c{i}" href="Text/c{i}.xhtml" media-type="application/xhtml+xml"/>"#))
        .collect::<Vec<_>>()
        .join("\n    ");
    let spine = (1..=count)
        .map(|i| format!(r#"<itemref idref="c{i}"/>"#))
        .collect::<Vec<_>>()
        .join("\n    ");
    (manifest, spine)
}

/// Plain book with `count` chapters and no navigation documents.
pub fn plain_book(count: usize) -> EpubBuilder {
    let (manifest, spine) = chapters(count);
    let mut builder = EpubBuilder::new(&opf("3.0", &manifest, &spine));
    for i in 1..=count {
        builder = builder.file(
            &format!("OEBPS/Text/c{i}.xhtml"),
            xhtml(&format!("Doc {i}"), &format!("<p id=\"p{i}\">Text of chapter {i}</p>")),
        );
    }
    builder
}

pub fn encryption_xml(entries: &[(&str, &str)]) -> String {
    let body: String = entries
        .iter()
        .map(|(algorithm, uri)| {
            format!(
                r#"<enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="{algorithm}"/>
    <enc:CipherData><enc:CipherReference URI="{uri}"/></enc:CipherData>
  </enc:EncryptedData>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container" xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
  {body}
</encryption>"#
    )
}

/// `IV || AES-256-CBC(plain)` with PKCS#7 padding.
pub fn aes_encrypt(key: &[u8; 32], iv: [u8; 16], plain: &[u8]) -> Vec<u8> {
    let mut out = iv.to_vec();
    let ciphertext = cbc::Encryptor::<aes::Aes256>::new_from_slices(key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plain);
    out.extend_from_slice(&ciphertext);
    out
}

/// Basic-profile LCP license unlocking `content_key` with `passphrase`.
pub fn lcp_license(id: &str, passphrase: &str, content_key: &[u8; 32]) -> String {
    let user_key: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
    let b64 = base64::engine::general_purpose::STANDARD;
    serde_json::json!({
        "id": id,
        "issued": "2024-01-01T00:00:00Z",
        "provider": "https://provider.example.com",
        "encryption": {
            "profile": "http://readium.org/lcp/basic-profile",
            "content_key": {
                "algorithm": AES256_CBC,
                "encrypted_value": b64.encode(aes_encrypt(&user_key, [3u8; 16], content_key)),
            },
            "user_key": {
                "algorithm": "http://www.w3.org/2001/04/xmlenc#sha256",
                "text_hint": "Favourite colour",
                "key_check": b64.encode(aes_encrypt(&user_key, [5u8; 16], id.as_bytes())),
            }
        }
    })
    .to_string()
}

/// XOR the first `header_len` bytes with the repeating key. Its own inverse.
pub fn obfuscate(mut data: Vec<u8>, key: &[u8], header_len: usize) -> Vec<u8> {
    let n = header_len.min(data.len());
    for (i, byte) in data[..n].iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
    data
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbaImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
