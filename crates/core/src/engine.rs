//! The engine: one open publication and everything read from it.
//!
//! Opening parses the container, package document, protection metadata and
//! navigation up front. Chapters are loaded lazily and cached by spine index
//! until [`Engine::clear_cache`]. Every content read goes through the
//! decryption context, so a publication that cannot be decrypted fails each
//! read with [`DecryptionError`](crate::error::DecryptionError) instead of
//! handing out ciphertext.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use crate::cfi::{self, PositionAddress};
use crate::container::{Container, ResourceSource};
use crate::content::{self, ChapterCache};
use crate::cover::{self, CoverImage};
use crate::document::{
    Chapter, Manifest, Metadata, Navigation, PackageDocument, Resource, Spine,
};
use crate::encryption::{DecryptingSource, DecryptionContext, ProtectionScheme};
use crate::error::EngineError;
use crate::navigation;
use crate::overlay::{self, MediaOverlay};
use crate::package;
use crate::path;
use crate::progress::{emit_stage, OpenStage, ProgressHandler};
use crate::sanitize::{self, SanitizeOptions};
use crate::security::SecurityLimits;
use crate::xml;

/// Options for [`Engine::open_with_options`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub security: SecurityLimits,
    /// LCP passphrase, when the publication is licensed.
    pub passphrase: Option<String>,
}

impl OpenOptions {
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

#[derive(Debug)]
pub struct Engine {
    container: Container,
    package: PackageDocument,
    decryption: DecryptionContext,
    navigation: Navigation,
    cache: ChapterCache,
}

impl Engine {
    pub fn open<R: Read + Seek + Send + 'static>(
        source: R,
        passphrase: Option<&str>,
    ) -> Result<Self, EngineError> {
        let options = OpenOptions {
            passphrase: passphrase.map(String::from),
            ..OpenOptions::default()
        };
        Self::open_with_options(source, &options, None)
    }

    pub fn open_path(path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<Self, EngineError> {
        let file = File::open(path.as_ref())?;
        Self::open(BufReader::new(file), passphrase)
    }

    pub fn open_with_options<R: Read + Seek + Send + 'static>(
        source: R,
        options: &OpenOptions,
        progress: Option<&dyn ProgressHandler>,
    ) -> Result<Self, EngineError> {
        emit_stage(progress, OpenStage::Container);
        let container = Container::open_with_limits(source, &options.security)?;

        emit_stage(progress, OpenStage::Package);
        let package_xml = container.read_string(container.package_path())?;
        let package = package::parse_package(&package_xml, container.package_path())?;

        emit_stage(progress, OpenStage::Encryption);
        let decryption = DecryptionContext::from_container(
            &container,
            &package.unique_identifier,
            options.passphrase.as_deref(),
        )?;
        if !decryption.can_decrypt() {
            tracing::warn!("Content is not readable: {}", decryption.protection_description());
        }

        emit_stage(progress, OpenStage::Navigation);
        let navigation =
            navigation::build_navigation(&package, &DecryptingSource::new(&container, &decryption));
        tracing::debug!(
            "Opened {}: {} spine items, navigation from {:?}",
            package.metadata.title().unwrap_or("untitled"),
            package.spine.len(),
            navigation.source
        );

        Ok(Engine {
            container,
            package,
            decryption,
            navigation,
            cache: ChapterCache::new(),
        })
    }

    fn source(&self) -> DecryptingSource<'_> {
        DecryptingSource::new(&self.container, &self.decryption)
    }

    pub fn package(&self) -> &PackageDocument {
        &self.package
    }

    pub fn metadata(&self) -> &Metadata {
        &self.package.metadata
    }

    pub fn manifest(&self) -> &Manifest {
        &self.package.manifest
    }

    pub fn spine(&self) -> &Spine {
        &self.package.spine
    }

    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn protection_scheme(&self) -> ProtectionScheme {
        self.decryption.scheme()
    }

    pub fn requires_credentials(&self) -> bool {
        self.decryption.requires_credentials()
    }

    pub fn can_decrypt(&self) -> bool {
        self.decryption.can_decrypt()
    }

    pub fn protection_description(&self) -> String {
        self.decryption.protection_description()
    }

    /// Chapter at a spine index, loaded on first access and cached.
    pub fn get_chapter(&self, index: usize) -> Result<Arc<Chapter>, EngineError> {
        self.check_index(index)?;
        self.decryption.ensure_readable()?;
        self.cache.get_or_load(index, || {
            content::load_chapter(&self.package, &self.navigation, &self.source(), index)
        })
    }

    /// Chapter by container path; a fragment is ignored.
    pub fn get_chapter_by_href(&self, href: &str) -> Result<Arc<Chapter>, EngineError> {
        let href = href.trim_start_matches('/');
        let index = content::spine_index_for_href(&self.package, href)
            .ok_or_else(|| EngineError::ResourceNotFound(href.to_string()))?;
        self.get_chapter(index)
    }

    /// Chapter by manifest id.
    pub fn get_chapter_by_id(&self, id: &str) -> Result<Arc<Chapter>, EngineError> {
        let index = self
            .package
            .spine
            .position_of(id)
            .filter(|_| self.package.manifest.get(id).is_some())
            .ok_or_else(|| EngineError::ResourceNotFound(id.to_string()))?;
        self.get_chapter(index)
    }

    /// Every spine item in order. Cached chapters are reused; chapters
    /// loaded by the stream are not added to the cache.
    pub fn stream_chapters(&self) -> ChapterStream<'_> {
        ChapterStream {
            engine: self,
            next: 0,
        }
    }

    pub fn cached_chapter_count(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn get_cover(&self) -> Result<Option<CoverImage>, EngineError> {
        self.decryption.ensure_readable()?;
        Ok(cover::find_cover(&self.package, &self.navigation, &self.source()))
    }

    pub fn get_cover_bytes(&self) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.get_cover()?.map(|c| c.data))
    }

    /// Any container entry by path (leading `/` and fragment ignored),
    /// decrypted.
    pub fn get_resource(&self, href: &str) -> Result<Resource, EngineError> {
        let (doc, _) = path::split_fragment(href.trim_start_matches('/'));
        let resource_path = path::normalize(&path::decode(doc));
        self.decryption.ensure_readable()?;
        if !self.container.has_entry(&resource_path) {
            return Err(EngineError::ResourceNotFound(href.to_string()));
        }
        let media_type = self
            .package
            .manifest
            .get_by_path(&resource_path)
            .map(|item| item.media_type.clone())
            .unwrap_or_else(|| path::media_type_for(&resource_path).to_string());
        let data = self.source().read_resource(&resource_path)?;
        Ok(Resource {
            href: resource_path,
            media_type,
            data,
        })
    }

    pub fn get_image(&self, href: &str) -> Result<Resource, EngineError> {
        let resource = self.get_resource(href)?;
        if !resource.media_type.starts_with("image/") {
            return Err(EngineError::ResourceNotFound(format!(
                "{href} is {}, not an image",
                resource.media_type
            )));
        }
        Ok(resource)
    }

    /// All CSS resources in manifest order.
    pub fn get_stylesheets(&self) -> Result<Vec<Resource>, EngineError> {
        self.package
            .manifest
            .iter()
            .filter(|item| item.is_stylesheet())
            .map(|item| self.get_resource(&item.path))
            .collect()
    }

    /// Narration clips for the chapter at `index`. Empty when the chapter has
    /// no overlay.
    pub fn get_media_overlay(&self, index: usize) -> Result<MediaOverlay, EngineError> {
        self.check_index(index)?;
        let spine_item = &self.package.spine.items[index];
        let Some(item) = self.package.manifest.get(&spine_item.idref) else {
            return Ok(MediaOverlay::default());
        };
        let Some(smil_id) = item.media_overlay.as_deref() else {
            return Ok(MediaOverlay::default());
        };
        let Some(smil) = self.package.manifest.get(smil_id) else {
            tracing::warn!("Media overlay {} of {} is not in the manifest", smil_id, item.id);
            return Ok(MediaOverlay::default());
        };

        let bytes = self.source().read_resource(&smil.path)?;
        let text = xml::decode_text(&bytes, &smil.path)?;
        let mut overlay = overlay::parse_media_overlay(&text, &smil.path)?;
        overlay.clips.retain(|clip| clip.text_path == item.path);
        Ok(overlay)
    }

    /// Chapter markup passed through the sanitizer.
    pub fn sanitized_chapter(
        &self,
        index: usize,
        options: &SanitizeOptions,
    ) -> Result<String, EngineError> {
        let chapter = self.get_chapter(index)?;
        Ok(sanitize::sanitize(&chapter.content, options))
    }

    /// Address of the element with the given id in the chapter at `index`,
    /// `None` when no element carries that id.
    pub fn address_for_element(
        &self,
        index: usize,
        id: &str,
    ) -> Result<Option<PositionAddress>, EngineError> {
        let chapter = self.get_chapter(index)?;
        Ok(cfi::element_path_for_id(&chapter.raw_content, id)
            .map(|steps| PositionAddress::from_element_path(index, &steps, None, Some(id))))
    }

    /// The chapter an address points into.
    pub fn chapter_for_address(&self, address: &PositionAddress) -> Result<Arc<Chapter>, EngineError> {
        self.get_chapter(address.spine_index)
    }

    fn check_index(&self, index: usize) -> Result<(), EngineError> {
        let len = self.package.spine.len();
        if index >= len {
            return Err(EngineError::Range { index, len });
        }
        Ok(())
    }
}

/// Iterator returned by [`Engine::stream_chapters`].
pub struct ChapterStream<'a> {
    engine: &'a Engine,
    next: usize,
}

impl Iterator for ChapterStream<'_> {
    type Item = Result<Arc<Chapter>, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        if index >= self.engine.package.spine.len() {
            return None;
        }
        self.next += 1;
        if let Some(cached) = self.engine.cache.get(index) {
            return Some(Ok(cached));
        }
        let engine = self.engine;
        Some(
            content::load_chapter(&engine.package, &engine.navigation, &engine.source(), index)
                .map(Arc::new),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.engine.package.spine.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:0000</dc:identifier>
    <dc:title>Unit Book</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml" media-overlay="s1"/>
    <item id="c2" href="c2.xhtml" media-type="application/xhtml+xml"/>
    <item id="s1" href="c1.smil" media-type="application/smil+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="c2" linear="no"/>
  </spine>
</package>"#;

    fn epub() -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        let files: [(&str, &str); 6] = [
            (
                "META-INF/container.xml",
                r#"<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
            ),
            ("OPS/content.opf", OPF),
            (
                "OPS/c1.xhtml",
                r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>One</title></head><body><p id="p1">Hi<script>x()</script></p></body></html>"#,
            ),
            (
                "OPS/c2.xhtml",
                r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Two</title></head><body><p>Bye</p></body></html>"#,
            ),
            (
                "OPS/c1.smil",
                r#"<smil xmlns="http://www.w3.org/ns/SMIL"><body><par><text src="c1.xhtml#p1"/><audio src="a.mp3" clipBegin="0s" clipEnd="1.5s"/></par><par><text src="c2.xhtml#x"/><audio src="a.mp3" clipBegin="2s" clipEnd="3s"/></par></body></smil>"#,
            ),
            ("OPS/style.css", "p { margin: 0 }"),
        ];
        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        for (name, body) in files {
            zip.start_file(name, deflated).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn engine() -> Engine {
        Engine::open(Cursor::new(epub()), None).unwrap()
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn chapters_are_cached_until_cleared() {
        let mut engine = engine();
        let first = engine.get_chapter(0).unwrap();
        let again = engine.get_chapter(0).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(engine.cached_chapter_count(), 1);
        assert_eq!(first.title.as_deref(), Some("Chapter 1"));

        engine.clear_cache();
        assert_eq!(engine.cached_chapter_count(), 0);
        let reloaded = engine.get_chapter(0).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[test]
    fn out_of_range_and_unknown_keys() {
        let engine = engine();
        assert!(matches!(
            engine.get_chapter(2),
            Err(EngineError::Range { index: 2, len: 2 })
        ));
        assert!(matches!(
            engine.get_chapter_by_id("css"),
            Err(EngineError::ResourceNotFound(_))
        ));
        assert!(matches!(
            engine.get_chapter_by_href("OPS/missing.xhtml"),
            Err(EngineError::ResourceNotFound(_))
        ));
        assert_eq!(engine.get_chapter_by_id("c2").unwrap().spine_index, 1);
        assert_eq!(
            engine.get_chapter_by_href("/OPS/C2.xhtml#top").unwrap().spine_index,
            1
        );
    }

    #[test]
    fn stream_does_not_fill_the_cache() {
        let engine = engine();
        let cached = engine.get_chapter(0).unwrap();
        let streamed: Vec<_> = engine.stream_chapters().collect::<Result<_, _>>().unwrap();
        assert_eq!(streamed.len(), 2);
        assert!(Arc::ptr_eq(&streamed[0], &cached));
        assert!(!streamed[1].linear);
        assert_eq!(engine.cached_chapter_count(), 1);
        assert_eq!(engine.stream_chapters().count(), 2);
    }

    #[test]
    fn overlay_is_filtered_to_the_chapter() {
        let engine = engine();
        let overlay = engine.get_media_overlay(0).unwrap();
        assert_eq!(overlay.clips.len(), 1);
        assert_eq!(overlay.clips[0].audio_path, "OPS/a.mp3");
        assert!(engine.get_media_overlay(1).unwrap().is_empty());
    }

    #[test]
    fn resources_and_stylesheets() {
        let engine = engine();
        let sheets = engine.get_stylesheets().unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].media_type, "text/css");
        assert_eq!(sheets[0].data, b"p { margin: 0 }");
        assert!(matches!(
            engine.get_resource("OPS/nope.png"),
            Err(EngineError::ResourceNotFound(_))
        ));
        assert!(matches!(
            engine.get_image("/OPS/style.css"),
            Err(EngineError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn sanitized_chapter_and_addresses() {
        let engine = engine();
        let clean = engine.sanitized_chapter(0, &SanitizeOptions::default()).unwrap();
        assert_eq!(clean, r#"<p id="p1">Hi</p>"#);

        let address = engine.address_for_element(0, "p1").unwrap().unwrap();
        assert_eq!(address.to_string(), "epubcfi(/6/2!/4/2[p1])");
        assert_eq!(engine.chapter_for_address(&address).unwrap().id, "c1");
        assert_eq!(engine.address_for_element(0, "nope").unwrap(), None);
    }
}
