//! Container path handling.
//!
//! All paths produced here are container-absolute: relative to the archive
//! root, `/`-separated, without a leading slash and never escaping the root.

use unicode_normalization::UnicodeNormalization;

/// Collapse `.`, `..` and duplicate separators. `..` at the root is dropped.
///
/// ```
/// use epub_engine_core::path::normalize;
/// assert_eq!(normalize("OEBPS/text/../images/./a.png"), "OEBPS/images/a.png");
/// assert_eq!(normalize("/../../a.png"), "a.png");
/// ```
pub fn normalize(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            p => components.push(p),
        }
    }
    components.join("/")
}

/// Directory portion of a container path, without trailing slash.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Join `href` onto a directory and normalize. A leading `/` on `href` means
/// the container root.
pub fn join(dir: &str, href: &str) -> String {
    if href.starts_with('/') || dir.is_empty() {
        normalize(href)
    } else {
        normalize(&format!("{dir}/{href}"))
    }
}

/// Split `chapter.xhtml#note-3` into `("chapter.xhtml", Some("note-3"))`.
/// An empty fragment (`a.xhtml#`) is treated as absent.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, frag)) if !frag.is_empty() => (path, Some(frag)),
        Some((path, _)) => (path, None),
        None => (href, None),
    }
}

/// Percent-decode and NFC-normalize an href so it can be compared with
/// archive entry names and manifest paths.
pub fn decode(href: &str) -> String {
    let decoded = percent_encoding::percent_decode_str(href).decode_utf8_lossy();
    decoded.nfc().collect()
}

/// True for hrefs that point outside the container: any URL scheme
/// (`http:`, `mailto:`, `data:`, ...) or a protocol-relative `//host` reference.
pub fn has_scheme(href: &str) -> bool {
    let href = href.trim_start();
    if href.starts_with("//") {
        return true;
    }
    let Some(colon) = href.find(':') else {
        return false;
    };
    let scheme = &href[..colon];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolve an href found in `document_path` to a container path, dropping
/// any fragment. External hrefs are returned unchanged.
pub fn resolve_from(document_path: &str, href: &str) -> String {
    let (path, _) = split_fragment(href);
    if has_scheme(path) {
        return path.to_string();
    }
    if path.is_empty() {
        return document_path.to_string();
    }
    join(parent_dir(document_path), &decode(path))
}

/// Like [`resolve_from`] but keeps the fragment: `("OEBPS/a.xhtml", Some("p3"))`.
pub fn resolve_href(document_path: &str, href: &str) -> (String, Option<String>) {
    let (_, fragment) = split_fragment(href);
    (resolve_from(document_path, href), fragment.map(decode))
}

/// Best-effort media type from a file extension, for resources the manifest
/// does not describe.
pub fn media_type_for(path: &str) -> &'static str {
    let ext = file_name(path)
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xhtml" | "xht" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ncx" => "application/x-dtbncx+xml",
        "smil" => "application/smil+xml",
        "otf" => "font/otf",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "js" => "application/javascript",
        _ => "application/octet-stream",
    }
}
