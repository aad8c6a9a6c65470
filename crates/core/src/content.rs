//! Chapter extraction and the per-engine chapter cache.
//!
//! A chapter's markup is rewritten so every resource reference is
//! container-absolute: `../Images/a.jpg` in `OEBPS/Text/ch1.xhtml` becomes
//! `/OEBPS/Images/a.jpg`. The matching [`ResourceRef::resolved`] holds the
//! container path without the leading slash, which is what
//! [`crate::engine::Engine::get_resource`] accepts.

use std::cell::RefCell;
use std::sync::Arc;

use dashmap::DashMap;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use parking_lot::Mutex;
use scraper::{Html, Selector};

use crate::container::ResourceSource;
use crate::document::{Chapter, Navigation, PackageDocument, ResourceRef};
use crate::error::{EngineError, ParseError};
use crate::path;
use crate::xml;

/// (element, attribute) pairs whose values are resource references.
const REFERENCE_ATTRIBUTES: &[(&str, &str)] = &[
    ("img", "src"),
    ("image", "href"),
    ("image", "xlink:href"),
    ("link", "href"),
    ("script", "src"),
    ("a", "href"),
    ("audio", "src"),
    ("video", "src"),
    ("video", "poster"),
    ("source", "src"),
    ("track", "src"),
    ("object", "data"),
];

type Slot = Arc<Mutex<Option<Arc<Chapter>>>>;

/// Chapters by spine index.
///
/// Each index has its own slot lock: concurrent first requests for the same
/// chapter wait on the slot and the chapter is loaded once. A failed load
/// leaves the slot empty.
#[derive(Debug, Default)]
pub struct ChapterCache {
    slots: DashMap<usize, Slot>,
}

impl ChapterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached chapter, without loading.
    pub fn get(&self, index: usize) -> Option<Arc<Chapter>> {
        let slot = self.slots.get(&index).map(|s| Arc::clone(s.value()))?;
        let cached = slot.lock().clone();
        cached
    }

    pub fn get_or_load<F>(&self, index: usize, load: F) -> Result<Arc<Chapter>, EngineError>
    where
        F: FnOnce() -> Result<Chapter, EngineError>,
    {
        // Clone the slot out so the map shard is not held while loading.
        let slot = Arc::clone(self.slots.entry(index).or_default().value());
        let mut guard = slot.lock();
        if let Some(chapter) = guard.as_ref() {
            return Ok(Arc::clone(chapter));
        }
        let chapter = Arc::new(load()?);
        *guard = Some(Arc::clone(&chapter));
        Ok(chapter)
    }

    /// Number of loaded chapters.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value().lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Read, decode and rewrite the chapter at `index`.
pub fn load_chapter(
    package: &PackageDocument,
    navigation: &Navigation,
    source: &dyn ResourceSource,
    index: usize,
) -> Result<Chapter, EngineError> {
    let spine_item = package.spine.get(index).ok_or(EngineError::Range {
        index,
        len: package.spine.len(),
    })?;
    let item = package
        .manifest
        .get(&spine_item.idref)
        .ok_or_else(|| EngineError::ResourceNotFound(spine_item.idref.clone()))?;

    let bytes = source.read_resource(&item.path)?;
    let raw_content = xml::decode_text(&bytes, &item.path)?;
    let (content, resolved_refs) = rewrite_references(&raw_content, &item.path)?;
    let title = navigation
        .title_for(&item.path)
        .map(String::from)
        .or_else(|| document_title(&raw_content));

    tracing::debug!(
        "Loaded chapter {index} ({}), {} references rewritten",
        item.path,
        resolved_refs.len()
    );

    Ok(Chapter {
        id: item.id.clone(),
        href: item.path.clone(),
        title,
        spine_index: index,
        raw_content,
        content,
        resolved_refs,
        media_type: item.media_type.clone(),
        linear: spine_item.linear,
        properties: spine_item.properties.clone(),
    })
}

/// Spine index of the document at `href` (fragment ignored). Matches the
/// manifest path exactly first, then case-insensitively.
pub fn spine_index_for_href(package: &PackageDocument, href: &str) -> Option<usize> {
    let (doc, _) = path::split_fragment(href);
    let normalized = path::normalize(&path::decode(doc));
    let item = package.manifest.get_by_path(&normalized)?;
    package.spine.position_of(&item.id)
}

/// Rewrite resource references in `markup` (stored at `document_path`) to
/// container-absolute paths. In-document anchors (`#id`), external URLs and
/// `data:` URIs are left alone.
pub fn rewrite_references(
    markup: &str,
    document_path: &str,
) -> Result<(String, Vec<ResourceRef>), ParseError> {
    let refs = RefCell::new(Vec::new());

    let output = rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", |el| {
                let tag = el.tag_name();
                for &(element, attribute) in REFERENCE_ATTRIBUTES {
                    if element != tag {
                        continue;
                    }
                    let Some(value) = el.get_attribute(attribute) else {
                        continue;
                    };
                    let Some(resolved) = resolve_reference(document_path, &value) else {
                        continue;
                    };
                    el.set_attribute(attribute, &format!("/{resolved}"))?;
                    refs.borrow_mut().push(ResourceRef {
                        element: tag.clone(),
                        attribute: attribute.to_string(),
                        original: value,
                        resolved,
                    });
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| ParseError::Malformed {
        path: document_path.to_string(),
        detail: e.to_string(),
    })?;

    Ok((output, refs.into_inner()))
}

/// Container path (plus fragment) for a reference, or `None` when it should
/// not be rewritten.
fn resolve_reference(document_path: &str, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') || path::has_scheme(value) {
        return None;
    }
    let (resolved, fragment) = path::resolve_href(document_path, value);
    Some(match fragment {
        Some(f) => format!("{resolved}#{f}"),
        None => resolved,
    })
}

/// Text of the document's `<title>`, if any.
pub fn document_title(markup: &str) -> Option<String> {
    let document = Html::parse_document(markup);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()
        .map(|t| xml::collapse_whitespace(&t.text().collect::<String>()))?;
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_support::MemorySource;
    use crate::document::{NavigationSource, TocEntry};
    use crate::package::parse_package;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHAPTER: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:xlink="http://www.w3.org/1999/xlink">
<head>
  <title>Doc Title</title>
  <link rel="stylesheet" href="../Styles/main.css"/>
  <script src="../js/app.js"></script>
</head>
<body>
  <img src="../Images/pic%201.png" alt="p"/>
  <svg><image xlink:href="../Images/cover.jpg"/></svg>
  <a href="ch2.xhtml#sec">next</a>
  <a href="#local">here</a>
  <a href="https://example.com/x">web</a>
  <img src="data:image/png;base64,AAAA"/>
  <video src="../Media/v.mp4" poster="../Images/poster.jpg"><track src="../Media/v.vtt"/></video>
  <object data="../Media/thing.svg"></object>
</body>
</html>"##;

    fn package() -> PackageDocument {
        parse_package(
            r#"<package version="3.0"><manifest>
                <item id="c1" href="Text/ch1.xhtml" media-type="application/xhtml+xml"/>
                <item id="c2" href="Text/Ch2.xhtml" media-type="application/xhtml+xml"/>
              </manifest><spine><itemref idref="c1"/><itemref idref="c2" linear="no"/></spine></package>"#,
            "OEBPS/content.opf",
        )
        .unwrap()
    }

    #[test]
    fn rewrites_resource_references() {
        let (content, refs) = rewrite_references(CHAPTER, "OEBPS/Text/ch1.xhtml").unwrap();

        let resolved: Vec<(&str, &str, &str)> = refs
            .iter()
            .map(|r| (r.element.as_str(), r.attribute.as_str(), r.resolved.as_str()))
            .collect();
        assert_eq!(
            resolved,
            vec![
                ("link", "href", "OEBPS/Styles/main.css"),
                ("script", "src", "OEBPS/js/app.js"),
                ("img", "src", "OEBPS/Images/pic 1.png"),
                ("image", "xlink:href", "OEBPS/Images/cover.jpg"),
                ("a", "href", "OEBPS/Text/ch2.xhtml#sec"),
                ("video", "src", "OEBPS/Media/v.mp4"),
                ("video", "poster", "OEBPS/Images/poster.jpg"),
                ("track", "src", "OEBPS/Media/v.vtt"),
                ("object", "data", "OEBPS/Media/thing.svg"),
            ]
        );
        assert_eq!(refs[2].original, "../Images/pic%201.png");

        assert!(content.contains(r#"href="/OEBPS/Styles/main.css""#));
        assert!(content.contains(r#"xlink:href="/OEBPS/Images/cover.jpg""#));
        assert!(content.contains(r##"href="#local""##));
        assert!(content.contains(r#"href="https://example.com/x""#));
        assert!(content.contains("data:image/png;base64,AAAA"));
    }

    #[test]
    fn loads_chapter_with_toc_title() {
        let pkg = package();
        let source = MemorySource::default()
            .with("OEBPS/Text/ch1.xhtml", CHAPTER)
            .with("OEBPS/Text/Ch2.xhtml", "<html><head><title> Second </title></head></html>");
        let nav = Navigation::new(
            NavigationSource::NavDocument,
            vec![TocEntry {
                id: None,
                title: "Chapter One".into(),
                href: "OEBPS/Text/ch1.xhtml".into(),
                fragment: None,
                level: 0,
                children: vec![],
                inherited_target: false,
            }],
        );

        let first = load_chapter(&pkg, &nav, &source, 0).unwrap();
        assert_eq!(first.title.as_deref(), Some("Chapter One"));
        assert_eq!(first.id, "c1");
        assert_eq!(first.raw_content, CHAPTER);
        assert!(first.linear);

        let second = load_chapter(&pkg, &nav, &source, 1).unwrap();
        assert_eq!(second.title.as_deref(), Some("Second"));
        assert!(!second.linear);

        assert!(matches!(
            load_chapter(&pkg, &nav, &source, 2),
            Err(EngineError::Range { index: 2, len: 2 })
        ));
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let pkg = package();
        let source = MemorySource::default().with("OEBPS/Text/ch1.xhtml", vec![0xff, 0xfe, 0x00]);
        let nav = Navigation::new(NavigationSource::Synthesized, vec![]);
        assert!(matches!(
            load_chapter(&pkg, &nav, &source, 0),
            Err(EngineError::Parse(ParseError::InvalidUtf8 { .. }))
        ));
    }

    #[test]
    fn href_lookup_falls_back_to_case_insensitive() {
        let pkg = package();
        assert_eq!(spine_index_for_href(&pkg, "OEBPS/Text/ch1.xhtml#x"), Some(0));
        assert_eq!(spine_index_for_href(&pkg, "OEBPS/Text/Ch2.xhtml"), Some(1));
        assert_eq!(spine_index_for_href(&pkg, "oebps/text/ch2.XHTML"), Some(1));
        assert_eq!(spine_index_for_href(&pkg, "OEBPS/Text/missing.xhtml"), None);
    }

    #[test]
    fn cache_loads_once_and_keeps_failures_out() {
        let cache = ChapterCache::new();
        let calls = AtomicUsize::new(0);
        let chapter = || Chapter {
            id: "c1".into(),
            href: "a.xhtml".into(),
            title: None,
            spine_index: 0,
            raw_content: String::new(),
            content: String::new(),
            resolved_refs: vec![],
            media_type: "application/xhtml+xml".into(),
            linear: true,
            properties: vec![],
        };

        assert!(cache
            .get_or_load(0, || Err(EngineError::ResourceNotFound("x".into())))
            .is_err());
        assert!(cache.get(0).is_none());
        assert!(cache.is_empty());

        let a = cache
            .get_or_load(0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(chapter())
            })
            .unwrap();
        let b = cache
            .get_or_load(0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(chapter())
            })
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_requests_publish_one_chapter() {
        let cache = ChapterCache::new();
        let calls = AtomicUsize::new(0);
        let (cache, calls) = (&cache, &calls);
        let results: Vec<Arc<Chapter>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        cache
                            .get_or_load(3, || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(10));
                                Ok(Chapter {
                                    id: "c".into(),
                                    href: "c.xhtml".into(),
                                    title: None,
                                    spine_index: 3,
                                    raw_content: String::new(),
                                    content: String::new(),
                                    resolved_refs: vec![],
                                    media_type: String::new(),
                                    linear: true,
                                    properties: vec![],
                                })
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
