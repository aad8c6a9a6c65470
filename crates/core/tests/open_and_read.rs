//! End-to-end reads through [`Engine`] over in-memory publications.

mod common;

use std::io::Cursor;
use std::sync::Arc;

use common::{chapters, opf, plain_book, xhtml, EpubBuilder, UID};
use epub_engine_core::cover::CoverStrategy;
use epub_engine_core::encryption::ProtectionScheme;
use epub_engine_core::prelude::*;
use pretty_assertions::assert_eq;

fn open(bytes: Vec<u8>) -> Engine {
    Engine::open(Cursor::new(bytes), None).unwrap()
}

#[test]
fn synthesized_navigation_for_bare_package() {
    let engine = open(plain_book(3).build());

    let nav = engine.navigation();
    assert_eq!(nav.source, NavigationSource::Synthesized);
    let titles: Vec<&str> = nav.toc.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Chapter 1", "Chapter 2", "Chapter 3"]);
    let hrefs: Vec<&str> = nav.toc.iter().map(|e| e.href.as_str()).collect();
    assert_eq!(
        hrefs,
        vec!["OEBPS/Text/c1.xhtml", "OEBPS/Text/c2.xhtml", "OEBPS/Text/c3.xhtml"]
    );
}

#[test]
fn metadata_and_chapters() {
    let engine = open(plain_book(2).build());

    assert_eq!(engine.metadata().title(), Some("Fixture Book"));
    assert_eq!(engine.metadata().authors(), vec!["Test Author"]);
    assert_eq!(engine.spine().len(), 2);
    assert_eq!(engine.protection_scheme(), ProtectionScheme::None);

    let chapter = engine.get_chapter(1).unwrap();
    assert_eq!(chapter.href, "OEBPS/Text/c2.xhtml");
    assert_eq!(chapter.spine_index, 1);
    assert!(chapter.content.contains("Text of chapter 2"));

    let by_href = engine.get_chapter_by_href("/OEBPS/Text/c2.xhtml").unwrap();
    assert!(Arc::ptr_eq(&chapter, &by_href));

    assert!(matches!(
        engine.get_chapter(2),
        Err(EngineError::Range { index: 2, len: 2 })
    ));
}

#[test]
fn concurrent_readers_share_one_chapter() {
    let engine = open(plain_book(2).build());

    let loaded: Vec<Arc<Chapter>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| engine.get_chapter(0).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(engine.cached_chapter_count(), 1);
}

#[test]
fn ncx_is_used_when_nav_document_is_missing() {
    let (items, spine) = chapters(2);
    let manifest = format!(
        r#"{items}
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#
    );
    let ncx = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Beginning</text></navLabel>
      <content src="Text/c1.xhtml"/>
      <navPoint id="n1a" playOrder="2">
        <navLabel><text>Detail</text></navLabel>
        <content src="Text/c1.xhtml#detail"/>
      </navPoint>
    </navPoint>
    <navPoint id="n2" playOrder="3">
      <navLabel><text>End</text></navLabel>
      <content src="Text/c2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;
    let bytes = EpubBuilder::new(&opf("2.0", &manifest, &spine))
        .file("OEBPS/toc.ncx", ncx)
        .file("OEBPS/Text/c1.xhtml", xhtml("c1", "<p id=\"detail\">One</p>"))
        .file("OEBPS/Text/c2.xhtml", xhtml("c2", "<p>Two</p>"))
        .build();
    let engine = open(bytes);

    let nav = engine.navigation();
    assert_eq!(nav.source, NavigationSource::Ncx);
    assert_eq!(nav.toc.len(), 2);
    assert_eq!(nav.toc[0].title, "Beginning");
    assert_eq!(nav.toc[0].children[0].target(), "OEBPS/Text/c1.xhtml#detail");
    assert_eq!(nav.toc[0].children[0].level, 1);
    assert_eq!(engine.get_chapter(1).unwrap().title.as_deref(), Some("End"));
}

#[test]
fn cover_from_manifest_property() {
    let (items, spine) = chapters(1);
    let manifest = format!(
        r#"{items}
    <item id="img" href="Images/front.png" media-type="image/png" properties="cover-image"/>"#
    );
    let bytes = EpubBuilder::new(&opf("3.0", &manifest, &spine))
        .file("OEBPS/Text/c1.xhtml", xhtml("c1", "<p>x</p>"))
        .file("OEBPS/Images/front.png", common::png(6, 9))
        .build();
    let engine = open(bytes);

    let cover = engine.get_cover().unwrap().unwrap();
    assert_eq!(cover.href, "OEBPS/Images/front.png");
    assert_eq!(cover.media_type, "image/png");
    assert_eq!(cover.strategy, CoverStrategy::CoverImageProperty);
    assert_eq!(cover.dimensions, Some((6, 9)));

    assert_eq!(engine.get_image("OEBPS/Images/front.png").unwrap().data, cover.data);
}

#[test]
fn book_without_cover() {
    let engine = open(plain_book(1).build());
    assert!(engine.get_cover().unwrap().is_none());
    assert!(engine.get_cover_bytes().unwrap().is_none());
}

#[test]
fn opens_from_a_file_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.epub");
    std::fs::write(&path, plain_book(1).build()).unwrap();

    let engine = Engine::open_path(&path, None).unwrap();
    assert_eq!(engine.metadata().title(), Some("Fixture Book"));
    assert!(Engine::open_path(dir.path().join("missing.epub"), None).is_err());
}

#[test]
fn address_for_element_round_trips_to_chapter() {
    let engine = open(plain_book(2).build());

    let address = engine.address_for_element(1, "p2").unwrap().unwrap();
    assert_eq!(address.to_string(), "epubcfi(/6/4!/4/2[p2])");
    assert_eq!(engine.chapter_for_address(&address).unwrap().spine_index, 1);
    assert!(engine.address_for_element(1, "nope").unwrap().is_none());
}

#[test]
fn rejects_archive_without_container_xml() {
    use std::io::Write;
    use zip::write::FileOptions;

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions<'_, ()> = FileOptions::default();
    zip.start_file("mimetype", options).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    assert!(matches!(
        Engine::open(Cursor::new(bytes), None),
        Err(EngineError::Container(_))
    ));
}

#[test]
fn unique_identifier_is_read() {
    let engine = open(plain_book(1).build());
    assert!(engine
        .metadata()
        .identifiers
        .iter()
        .any(|id| id.value == UID));
}
