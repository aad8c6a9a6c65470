//! Table of contents construction.
//!
//! Tried in order: the EPUB 3 navigation document, the EPUB 2 NCX, and
//! finally one synthesized "Chapter N" entry per spine item. A source that
//! cannot be read or yields no entries falls through to the next one, so
//! building navigation never fails.

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html};

use crate::container::ResourceSource;
use crate::document::{Landmark, Navigation, NavigationSource, PackageDocument, TocEntry};
use crate::path;
use crate::xml;

const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Build the navigation for a package, reading documents through `source`.
pub fn build_navigation(package: &PackageDocument, source: &dyn ResourceSource) -> Navigation {
    if let Some(nav) = from_nav_document(package, source) {
        return nav;
    }
    if let Some(nav) = from_ncx(package, source) {
        return nav;
    }
    let mut nav = Navigation::new(NavigationSource::Synthesized, synthesize(package));
    nav.landmarks = guide_landmarks(package);
    nav
}

/// One "Chapter N" entry per spine item, non-linear items included.
pub fn synthesize(package: &PackageDocument) -> Vec<TocEntry> {
    package
        .spine
        .items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let manifest_item = package.manifest.get(&item.idref)?;
            Some(TocEntry {
                id: Some(item.idref.clone()),
                title: format!("Chapter {}", i + 1),
                href: manifest_item.path.clone(),
                fragment: None,
                level: 0,
                children: Vec::new(),
                inherited_target: false,
            })
        })
        .collect()
}

fn read_document(source: &dyn ResourceSource, path: &str) -> Option<String> {
    let bytes = match source.read_resource(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Cannot read navigation document {path}: {e}");
            return None;
        }
    };
    match xml::decode_text(&bytes, path) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
}

// --- EPUB 3 navigation document ---

fn from_nav_document(package: &PackageDocument, source: &dyn ResourceSource) -> Option<Navigation> {
    let item = package.manifest.nav_item()?;
    let content = read_document(source, &item.path)?;
    let parsed = parse_nav_document(&content, &item.path);
    if parsed.toc.is_empty() {
        tracing::warn!("Navigation document {} has no usable toc", item.path);
        return None;
    }
    let mut nav = Navigation::new(NavigationSource::NavDocument, parsed.toc);
    nav.page_list = parsed.page_list;
    nav.landmarks = if parsed.landmarks.is_empty() {
        guide_landmarks(package)
    } else {
        parsed.landmarks
    };
    Some(nav)
}

#[derive(Debug, Default)]
pub(crate) struct ParsedNav {
    pub toc: Vec<TocEntry>,
    pub page_list: Vec<TocEntry>,
    pub landmarks: Vec<Landmark>,
}

/// Parse the `toc`, `page-list` and `landmarks` navs of a navigation
/// document stored at `nav_path`.
pub(crate) fn parse_nav_document(content: &str, nav_path: &str) -> ParsedNav {
    let document = Html::parse_document(content);
    let mut parsed = ParsedNav::default();
    let mut untyped_toc = None;

    for nav in document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "nav")
    {
        let kind = nav
            .value()
            .attr("epub:type")
            .or_else(|| nav.value().attr("role").map(|r| r.trim_start_matches("doc-")))
            .unwrap_or("");
        let Some(list) = first_list(nav) else {
            continue;
        };
        let types: Vec<&str> = kind.split_whitespace().collect();
        if types.contains(&"toc") && parsed.toc.is_empty() {
            parsed.toc = parse_list(list, nav_path, 0);
        } else if types.contains(&"page-list") || types.contains(&"pagelist") {
            parsed.page_list = flatten_owned(parse_list(list, nav_path, 0));
        } else if types.contains(&"landmarks") {
            parsed.landmarks = parse_landmarks(list, nav_path);
        } else if types.is_empty() && untyped_toc.is_none() {
            untyped_toc = Some(list);
        }
    }

    if parsed.toc.is_empty() {
        if let Some(list) = untyped_toc {
            parsed.toc = parse_list(list, nav_path, 0);
        }
    }
    parsed
}

fn first_list(nav: ElementRef<'_>) -> Option<ElementRef<'_>> {
    nav.descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "ol")
}

fn child_elements<'a>(el: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(move |c| c.value().name() == name)
}

fn parse_list(ol: ElementRef<'_>, nav_path: &str, level: u32) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    for li in child_elements(ol, "li") {
        let label = li
            .children()
            .filter_map(ElementRef::wrap)
            .find(|c| matches!(c.value().name(), "a" | "span"));
        let children = child_elements(li, "ol")
            .next()
            .map(|nested| parse_list(nested, nav_path, level + 1))
            .unwrap_or_default();

        let Some(label) = label else {
            // A bare nested list: lift its entries.
            entries.extend(children);
            continue;
        };

        let mut title = xml::collapse_whitespace(&label.text().collect::<String>());
        if title.is_empty() {
            title = label.value().attr("title").unwrap_or_default().trim().to_string();
        }

        let target = label
            .value()
            .attr("href")
            .filter(|h| !h.trim().is_empty())
            .map(|h| path::resolve_href(nav_path, h.trim()));
        let inherited_target = target.is_none();
        let (href, fragment) = match target {
            Some(t) => t,
            // A heading without a link points at its first child.
            None => match children.first() {
                Some(first) => (first.href.clone(), first.fragment.clone()),
                None => continue,
            },
        };

        entries.push(TocEntry {
            id: li.value().id().map(String::from),
            title,
            href,
            fragment,
            level,
            children,
            inherited_target,
        });
    }
    entries
}

fn parse_landmarks(ol: ElementRef<'_>, nav_path: &str) -> Vec<Landmark> {
    ol.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "a")
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            let (href, fragment) = path::resolve_href(nav_path, href);
            Some(Landmark {
                kind: a.value().attr("epub:type").unwrap_or_default().to_string(),
                title: xml::collapse_whitespace(&a.text().collect::<String>()),
                href,
                fragment,
            })
        })
        .collect()
}

fn flatten_owned(entries: Vec<TocEntry>) -> Vec<TocEntry> {
    let mut out = Vec::new();
    for mut entry in entries {
        let children = std::mem::take(&mut entry.children);
        entry.level = 0;
        out.push(entry);
        out.extend(flatten_owned(children));
    }
    out
}

fn guide_landmarks(package: &PackageDocument) -> Vec<Landmark> {
    package
        .guide
        .iter()
        .map(|r| {
            let (_, fragment) = path::split_fragment(&r.href);
            Landmark {
                kind: r.kind.clone(),
                title: r.title.clone().unwrap_or_default(),
                href: r.path.clone(),
                fragment: fragment.map(path::decode),
            }
        })
        .collect()
}

// --- EPUB 2 NCX ---

fn from_ncx(package: &PackageDocument, source: &dyn ResourceSource) -> Option<Navigation> {
    let item = package
        .spine
        .toc
        .as_deref()
        .and_then(|id| package.manifest.get(id))
        .or_else(|| package.manifest.iter().find(|i| i.media_type == NCX_MEDIA_TYPE))?;
    let content = read_document(source, &item.path)?;
    let parsed = match parse_ncx(&content, &item.path) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Malformed NCX {}: {e}", item.path);
            return None;
        }
    };
    if parsed.toc.is_empty() {
        return None;
    }
    let mut nav = Navigation::new(NavigationSource::Ncx, parsed.toc);
    nav.page_list = parsed.page_list;
    nav.landmarks = guide_landmarks(package);
    Some(nav)
}

/// A navPoint or pageTarget under construction.
struct Frame {
    id: Option<String>,
    title: String,
    src: Option<String>,
    children: Vec<TocEntry>,
}

/// Parse an NCX stored at `ncx_path`: `navMap` into the toc, `pageList`
/// into a flat page list.
pub(crate) fn parse_ncx(content: &str, ncx_path: &str) -> Result<ParsedNav, quick_xml::Error> {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();

    let mut parsed = ParsedNav::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_label = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = xml::local_name(e);
                match name.as_str() {
                    "navPoint" | "pageTarget" => {
                        let attrs = xml::attributes(e);
                        stack.push(Frame {
                            id: attrs.get("id").cloned(),
                            title: String::new(),
                            src: None,
                            children: Vec::new(),
                        });
                    }
                    "navLabel" if !stack.is_empty() => in_label = true,
                    "text" if in_label => in_text = true,
                    "content" => set_src(&mut stack, e),
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if e.local_name().as_ref() == b"content" {
                    set_src(&mut stack, e);
                }
            }
            Event::Text(ref e) => {
                if in_text {
                    if let Some(frame) = stack.last_mut() {
                        frame.title.push_str(&xml::text(e));
                    }
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"navLabel" => in_label = false,
                b"navPoint" => {
                    let level = stack.len().saturating_sub(1) as u32;
                    if let Some(entry) = stack.pop().and_then(|f| frame_entry(f, ncx_path, level)) {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(entry),
                            None => parsed.toc.push(entry),
                        }
                    }
                }
                b"pageTarget" => {
                    if let Some(entry) = stack.pop().and_then(|f| frame_entry(f, ncx_path, 0)) {
                        parsed.page_list.push(entry);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(parsed)
}

fn set_src(stack: &mut [Frame], e: &quick_xml::events::BytesStart<'_>) {
    if let (Some(frame), Some(src)) = (stack.last_mut(), xml::attributes(e).remove("src")) {
        frame.src.get_or_insert(src);
    }
}

fn frame_entry(frame: Frame, ncx_path: &str, level: u32) -> Option<TocEntry> {
    let (href, fragment, inherited_target) = match frame.src.as_deref().map(str::trim) {
        Some(src) if !src.is_empty() => {
            let (href, fragment) = path::resolve_href(ncx_path, src);
            (href, fragment, false)
        }
        _ => {
            let first = frame.children.first()?;
            (first.href.clone(), first.fragment.clone(), true)
        }
    };
    Some(TocEntry {
        id: frame.id,
        title: xml::collapse_whitespace(&frame.title),
        href,
        fragment,
        level,
        children: frame.children,
        inherited_target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_support::MemorySource;
    use crate::package::parse_package;
    use pretty_assertions::assert_eq;

    const NAV: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Nav</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
      <li id="p1"><span>Part One</span>
        <ol>
          <li><a href="Text/ch1.xhtml">Chapter
              One</a></li>
          <li><a href="Text/ch2.xhtml#sec%202">Chapter Two</a></li>
        </ol>
      </li>
      <li><a href="Text/ch3.xhtml">Chapter Three</a></li>
    </ol>
  </nav>
  <nav epub:type="page-list" hidden="">
    <ol><li><a href="Text/ch1.xhtml#page1">1</a></li><li><a href="Text/ch2.xhtml#page2">2</a></li></ol>
  </nav>
  <nav epub:type="landmarks">
    <ol><li><a epub:type="bodymatter" href="Text/ch1.xhtml">Start</a></li></ol>
  </nav>
</body>
</html>"##;

    const NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <docTitle><text>Book Title</text></docTitle>
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Part One</text></navLabel>
      <content src="Text/ch1.xhtml"/>
      <navPoint id="n2" playOrder="2">
        <navLabel><text>Section &amp; More</text></navLabel>
        <content src="Text/ch1.xhtml#s1"/>
      </navPoint>
    </navPoint>
    <navPoint id="n3" playOrder="3">
      <navLabel><text>Chapter Two</text></navLabel>
      <content src="Text/ch2.xhtml"/>
    </navPoint>
  </navMap>
  <pageList>
    <pageTarget id="pg1" type="normal" value="1">
      <navLabel><text>1</text></navLabel>
      <content src="Text/ch1.xhtml#p1"/>
    </pageTarget>
  </pageList>
</ncx>"#;

    fn package(extra_manifest: &str, spine_attrs: &str) -> PackageDocument {
        let opf = format!(
            r#"<package version="3.0" unique-identifier="id">
  <metadata><dc:identifier xmlns:dc="dc" id="id">x</dc:identifier></metadata>
  <manifest>
    {extra_manifest}
    <item id="c1" href="Text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="Text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="c3" href="Text/ch3.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine {spine_attrs}>
    <itemref idref="c1"/><itemref idref="c2"/><itemref idref="c3" linear="no"/>
  </spine>
  <guide><reference type="toc" title="Contents" href="Text/ch1.xhtml#toc"/></guide>
</package>"#
        );
        parse_package(&opf, "OEBPS/content.opf").unwrap()
    }

    #[test]
    fn nav_document_is_preferred() {
        let pkg = package(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
               <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
            r#"toc="ncx""#,
        );
        let source = MemorySource::default()
            .with("OEBPS/nav.xhtml", NAV)
            .with("OEBPS/toc.ncx", NCX);
        let nav = build_navigation(&pkg, &source);

        assert_eq!(nav.source, NavigationSource::NavDocument);
        assert_eq!(nav.toc.len(), 2);
        let part = &nav.toc[0];
        assert_eq!(part.title, "Part One");
        assert_eq!(part.id.as_deref(), Some("p1"));
        // Unlinked heading targets its first child.
        assert_eq!(part.href, "OEBPS/Text/ch1.xhtml");
        assert_eq!(part.children[0].title, "Chapter One");
        assert_eq!(part.children[0].level, 1);
        assert_eq!(part.children[1].fragment.as_deref(), Some("sec 2"));
        assert_eq!(nav.toc[1].href, "OEBPS/Text/ch3.xhtml");

        assert_eq!(nav.page_list.len(), 2);
        assert_eq!(nav.page_list[1].target(), "OEBPS/Text/ch2.xhtml#page2");
        assert_eq!(
            nav.landmarks,
            vec![Landmark {
                kind: "bodymatter".into(),
                title: "Start".into(),
                href: "OEBPS/Text/ch1.xhtml".into(),
                fragment: None,
            }]
        );
        assert_eq!(nav.title_for("OEBPS/Text/ch3.xhtml"), Some("Chapter Three"));
    }

    #[test]
    fn unlinked_heading_does_not_title_its_first_chapter() {
        let pkg = package(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
            "",
        );
        let nav = build_navigation(&pkg, &MemorySource::default().with("OEBPS/nav.xhtml", NAV));

        assert!(nav.toc[0].inherited_target);
        assert!(!nav.toc[0].children[0].inherited_target);
        assert_eq!(nav.title_for("OEBPS/Text/ch1.xhtml"), Some("Chapter One"));
        assert_eq!(nav.title_for("OEBPS/Text/ch2.xhtml"), Some("Chapter Two"));
    }

    #[test]
    fn ncx_is_used_when_nav_is_missing() {
        let pkg = package(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
               <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
            r#"toc="ncx""#,
        );
        // nav.xhtml is listed but absent from the archive.
        let source = MemorySource::default().with("OEBPS/toc.ncx", NCX);
        let nav = build_navigation(&pkg, &source);

        assert_eq!(nav.source, NavigationSource::Ncx);
        assert_eq!(nav.toc.len(), 2);
        assert_eq!(nav.toc[0].title, "Part One");
        assert_eq!(nav.toc[0].id.as_deref(), Some("n1"));
        assert_eq!(nav.toc[0].children[0].title, "Section & More");
        assert_eq!(nav.toc[0].children[0].fragment.as_deref(), Some("s1"));
        assert_eq!(nav.toc[0].children[0].level, 1);
        assert_eq!(nav.toc[1].href, "OEBPS/Text/ch2.xhtml");
        assert_eq!(nav.page_list.len(), 1);
        assert_eq!(nav.landmarks[0].kind, "toc");
        assert_eq!(nav.landmarks[0].fragment.as_deref(), Some("toc"));
    }

    #[test]
    fn ncx_found_by_media_type_without_spine_toc() {
        let pkg = package(
            r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
            "",
        );
        let source = MemorySource::default().with("OEBPS/toc.ncx", NCX);
        assert_eq!(build_navigation(&pkg, &source).source, NavigationSource::Ncx);
    }

    #[test]
    fn synthesized_when_nothing_usable() {
        let pkg = package(
            r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
            r#"toc="ncx""#,
        );
        let source = MemorySource::default().with("OEBPS/toc.ncx", "<ncx><navMap></wrong></ncx>");
        let nav = build_navigation(&pkg, &source);

        assert_eq!(nav.source, NavigationSource::Synthesized);
        let titles: Vec<_> = nav.toc.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter 1", "Chapter 2", "Chapter 3"]);
        assert_eq!(nav.toc[2].href, "OEBPS/Text/ch3.xhtml");
        assert_eq!(nav.toc[0].id.as_deref(), Some("c1"));
    }

    #[test]
    fn nav_without_toc_falls_through() {
        let pkg = package(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
            "",
        );
        let source = MemorySource::default().with(
            "OEBPS/nav.xhtml",
            r#"<html><body><nav epub:type="landmarks"><ol><li><a href="a.xhtml">A</a></li></ol></nav></body></html>"#,
        );
        assert_eq!(
            build_navigation(&pkg, &source).source,
            NavigationSource::Synthesized
        );
    }

    #[test]
    fn untyped_nav_is_accepted_as_toc() {
        let parsed = parse_nav_document(
            r#"<html><body><nav><ol><li><a href="../a.xhtml">A</a></li></ol></nav></body></html>"#,
            "OEBPS/nav/nav.xhtml",
        );
        assert_eq!(parsed.toc.len(), 1);
        assert_eq!(parsed.toc[0].href, "OEBPS/a.xhtml");
    }
}
