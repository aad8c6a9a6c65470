//! Cover image discovery.
//!
//! Strategies are tried in order and the first hit wins:
//! `cover-image` property, `<meta name="cover">`, guide/landmark cover page,
//! first raster image of the first spine document, then any image whose
//! file name mentions "cover".

use std::io::Cursor;

use scraper::{ElementRef, Html};
use serde::Serialize;

use crate::container::ResourceSource;
use crate::document::{ManifestItem, Navigation, PackageDocument};
use crate::path;
use crate::xml;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoverStrategy {
    CoverImageProperty,
    MetaCover,
    Guide,
    FirstSpineImage,
    FileName,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverImage {
    /// Container path of the image.
    pub href: String,
    pub media_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub strategy: CoverStrategy,
    /// Pixel size, when the header could be decoded.
    pub dimensions: Option<(u32, u32)>,
}

/// Find the cover, reading images (and cover pages) through `source`.
pub fn find_cover(
    package: &PackageDocument,
    navigation: &Navigation,
    source: &dyn ResourceSource,
) -> Option<CoverImage> {
    const ORDER: [CoverStrategy; 5] = [
        CoverStrategy::CoverImageProperty,
        CoverStrategy::MetaCover,
        CoverStrategy::Guide,
        CoverStrategy::FirstSpineImage,
        CoverStrategy::FileName,
    ];

    for strategy in ORDER {
        let Some(item) = candidate(strategy, package, navigation, source) else {
            continue;
        };
        match source.read_resource(&item.path) {
            Ok(data) => {
                tracing::debug!("Cover found via {:?}: {}", strategy, item.path);
                return Some(CoverImage {
                    href: item.path.clone(),
                    media_type: item.media_type.clone(),
                    dimensions: dimensions(&data),
                    data,
                    strategy,
                });
            }
            Err(e) => tracing::warn!("Cover candidate {} unreadable: {}", item.path, e),
        }
    }
    None
}

fn candidate<'a>(
    strategy: CoverStrategy,
    package: &'a PackageDocument,
    navigation: &Navigation,
    source: &dyn ResourceSource,
) -> Option<&'a ManifestItem> {
    match strategy {
        CoverStrategy::CoverImageProperty => package
            .manifest
            .iter()
            .find(|i| i.is_cover_image() && i.is_image()),
        CoverStrategy::MetaCover => meta_cover(package),
        CoverStrategy::Guide => guide_cover(package, navigation, source),
        CoverStrategy::FirstSpineImage => first_spine_image(package, source),
        CoverStrategy::FileName => package.manifest.iter().find(|i| {
            i.is_raster_image() && path::file_name(&i.path).to_lowercase().contains("cover")
        }),
    }
}

/// The legacy meta names a manifest id, though some files put an href there.
fn meta_cover(package: &PackageDocument) -> Option<&ManifestItem> {
    let value = package.metadata.cover_id.as_deref()?;
    package
        .manifest
        .get(value)
        .or_else(|| {
            let resolved = path::resolve_from(&package.path, value);
            package.manifest.get_by_path(&resolved)
        })
        .filter(|i| i.is_image())
}

fn guide_cover<'a>(
    package: &'a PackageDocument,
    navigation: &Navigation,
    source: &dyn ResourceSource,
) -> Option<&'a ManifestItem> {
    let targets = navigation
        .landmarks
        .iter()
        .filter(|l| l.kind.eq_ignore_ascii_case("cover"))
        .map(|l| l.href.as_str())
        .chain(
            package
                .guide
                .iter()
                .filter(|g| g.kind.eq_ignore_ascii_case("cover"))
                .map(|g| g.path.as_str()),
        );

    for target in targets {
        let Some(item) = package.manifest.get_by_path(target) else {
            continue;
        };
        if item.is_image() {
            return Some(item);
        }
        if item.is_xhtml() {
            if let Some(image) = first_image_in(package, item, source, false) {
                return Some(image);
            }
        }
    }
    None
}

fn first_spine_image<'a>(
    package: &'a PackageDocument,
    source: &dyn ResourceSource,
) -> Option<&'a ManifestItem> {
    let first = package.spine.get(0)?;
    let item = package.manifest.get(&first.idref)?;
    first_image_in(package, item, source, true)
}

/// First `<img>` or SVG `<image>` in a content document that names a
/// manifest image.
fn first_image_in<'a>(
    package: &'a PackageDocument,
    document: &ManifestItem,
    source: &dyn ResourceSource,
    raster_only: bool,
) -> Option<&'a ManifestItem> {
    let bytes = match source.read_resource(&document.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Could not read {} while looking for a cover: {}", document.path, e);
            return None;
        }
    };
    let markup = xml::decode_text(&bytes, &document.path).ok()?;
    let html = Html::parse_document(&markup);

    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| match el.value().name() {
            "img" => el.value().attr("src"),
            // xlink:href is namespaced in SVG, so match on the local name
            "image" => el
                .value()
                .attrs()
                .find(|(name, _)| *name == "href" || *name == "xlink:href")
                .map(|(_, value)| value),
            _ => None,
        })
        .filter_map(|href| {
            let resolved = path::resolve_from(&document.path, href);
            package.manifest.get_by_path(&path::decode(&resolved))
        })
        .find(|item| {
            if raster_only {
                item.is_raster_image()
            } else {
                item.is_image()
            }
        })
}

fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
