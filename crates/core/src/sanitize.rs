//! Whitelist HTML sanitizer for chapter markup.
//!
//! The input is parsed as a fragment and a new document is written out
//! bottom-up from the parsed tree; nothing is edited in place. Unknown
//! elements are unwrapped (their children are kept), blocklisted elements
//! are dropped with their whole subtree, and attributes pass only through
//! the whitelist. Output attributes are sorted by name, so the result is a
//! pure function of the input and the options.
//!
//! Foreign content is handled by namespace. SVG keeps only SVG elements,
//! and HTML reached through an SVG integration point is dropped. MathML is
//! flattened to text. `<style>` survives only as an HTML element. Together
//! these keep the output re-parsing to the tree it was written from.

use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeOptions {
    /// Keep `style` attributes, `<style>` and stylesheet `<link>` elements.
    pub allow_styles: bool,
    /// Keep `data:image/*` URIs on `img@src`.
    pub allow_data_images: bool,
    /// Elements nested deeper than this are flattened to their text.
    pub max_nesting_depth: usize,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            allow_styles: true,
            allow_data_images: true,
            max_nesting_depth: 200,
        }
    }
}

/// Always removed together with their content.
const REMOVE_SUBTREE: &[&str] = &[
    "script", "noscript", "iframe", "frame", "frameset", "object", "embed", "applet", "form",
    "input", "button", "select", "textarea", "option", "optgroup", "base", "template", "title",
    "meta", "foreignobject",
];

const ALLOWED_ELEMENTS: &[&str] = &[
    "a", "abbr", "address", "article", "aside", "audio", "b", "bdi", "bdo", "blockquote", "br",
    "caption", "cite", "code", "col", "colgroup", "dd", "del", "details", "dfn", "div", "dl", "dt",
    "em", "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "i", "img", "ins", "kbd", "li", "main", "mark", "nav", "ol", "p", "picture", "pre", "q", "rp",
    "rt", "ruby", "s", "samp", "section", "small", "source", "span", "strong", "sub", "summary",
    "sup", "table", "tbody", "td", "tfoot", "th", "thead", "time", "tr", "track", "u", "ul",
    "var", "video", "wbr",
];

/// SVG elements, compared case-insensitively.
const SVG_ELEMENTS: &[&str] = &[
    "svg", "g", "path", "rect", "circle", "ellipse", "line", "polyline", "polygon", "text",
    "tspan", "image", "defs", "lineargradient", "radialgradient", "stop",
];

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";
const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// Compared case-insensitively, so SVG names such as `viewBox` match.
const ALLOWED_ATTRIBUTES: &[&str] = &[
    "id", "class", "title", "lang", "xml:lang", "dir", "role", "hidden", "epub:type",
    // links and media
    "href", "src", "alt", "width", "height", "rel", "type", "media", "target", "name", "poster",
    "controls", "loop", "muted", "preload", "kind", "srclang", "label", "default",
    // lists, tables, edits
    "start", "reversed", "value", "colspan", "rowspan", "headers", "scope", "span", "cite",
    "datetime", "open",
    // SVG
    "viewbox", "preserveaspectratio", "version", "x", "y", "x1", "y1", "x2", "y2", "cx", "cy",
    "r", "rx", "ry", "d", "points", "fill", "stroke", "stroke-width", "opacity", "transform",
    "offset", "stop-color", "gradientunits",
];

const URL_ATTRIBUTES: &[&str] = &["href", "src", "poster", "cite", "xlink:href", "data"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const SCRIPT_SCHEMES: &[&str] = &["javascript:", "vbscript:", "livescript:"];

/// Lowercased, whitespace-free fragments that disqualify a CSS declaration.
const DANGEROUS_CSS: &[&str] = &[
    "expression(",
    "javascript:",
    "vbscript:",
    "url(data:text",
    "behavior:",
    "behaviour:",
    "-moz-binding",
    "@import",
];

/// Sanitize an HTML fragment. Never fails.
pub fn sanitize(html: &str, options: &SanitizeOptions) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    write_children(fragment.root_element(), options, 0, false, &mut out);
    out
}

fn write_children(
    parent: ElementRef<'_>,
    options: &SanitizeOptions,
    depth: usize,
    in_svg: bool,
    out: &mut String,
) {
    let keep_leading_newline = matches!(parent.value().name(), "pre" | "listing");
    let mut first = true;
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => {
                if first && keep_leading_newline && text.starts_with('\n') {
                    out.push('\n');
                }
                escape_text(text, out);
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    write_element(el, options, depth + 1, in_svg, out);
                }
            }
            _ => {}
        }
        first = false;
    }
}

fn write_element(
    el: ElementRef<'_>,
    options: &SanitizeOptions,
    depth: usize,
    in_svg: bool,
    out: &mut String,
) {
    let lower = el.value().name().to_ascii_lowercase();

    if is_removed(&lower, options) {
        return;
    }
    if depth > options.max_nesting_depth {
        write_text_only(el, options, out);
        return;
    }

    match &*el.value().name.ns {
        SVG_NS => write_svg_element(el, &lower, options, depth, out),
        HTML_NS if !in_svg => write_html_element(el, &lower, options, depth, out),
        // HTML under an SVG integration point would not re-parse inside the svg.
        HTML_NS => {}
        _ => write_text_only(el, options, out),
    }
}

fn write_svg_element(
    el: ElementRef<'_>,
    lower: &str,
    options: &SanitizeOptions,
    depth: usize,
    out: &mut String,
) {
    if lower == "style" {
        return;
    }
    if !SVG_ELEMENTS.contains(&lower) {
        write_children(el, options, depth, true, out);
        return;
    }
    write_start_tag(el, lower, options, out);
    write_children(el, options, depth, true, out);
    write_end_tag(el, out);
}

fn write_html_element(
    el: ElementRef<'_>,
    lower: &str,
    options: &SanitizeOptions,
    depth: usize,
    out: &mut String,
) {
    match lower {
        "style" => {
            let css: String = el.text().collect();
            if css.contains('<') || is_dangerous_css(&css) {
                return;
            }
            out.push_str("<style>");
            out.push_str(&css);
            out.push_str("</style>");
            return;
        }
        "link" => {
            let is_stylesheet = el
                .value()
                .attr("rel")
                .is_some_and(|r| r.to_ascii_lowercase().contains("stylesheet"));
            let href = el.value().attr("href").unwrap_or_default();
            if is_stylesheet && !href.is_empty() && is_safe_url(href, "link", "href", options) {
                out.push_str("<link href=\"");
                escape_attribute(href, out);
                out.push_str("\" rel=\"stylesheet\">");
            }
            return;
        }
        _ => {}
    }

    if !ALLOWED_ELEMENTS.contains(&lower) {
        write_children(el, options, depth, false, out);
        return;
    }

    write_start_tag(el, lower, options, out);
    if VOID_ELEMENTS.contains(&lower) {
        return;
    }
    write_children(el, options, depth, false, out);
    write_end_tag(el, out);
}

fn write_start_tag(el: ElementRef<'_>, lower: &str, options: &SanitizeOptions, out: &mut String) {
    out.push('<');
    out.push_str(el.value().name());
    for (attr, value) in allowed_attributes(el, lower, options) {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        escape_attribute(&value, out);
        out.push('"');
    }
    out.push('>');
}

fn write_end_tag(el: ElementRef<'_>, out: &mut String) {
    out.push_str("</");
    out.push_str(el.value().name());
    out.push('>');
}

fn is_removed(lower_name: &str, options: &SanitizeOptions) -> bool {
    REMOVE_SUBTREE.contains(&lower_name)
        || (!options.allow_styles && matches!(lower_name, "style" | "link"))
}

/// Text of `el` and its descendants, skipping removed subtrees and style
/// sheets. Iterative, since this is the path taken for pathologically deep
/// input.
fn write_text_only(el: ElementRef<'_>, options: &SanitizeOptions, out: &mut String) {
    let mut stack: Vec<_> = el.children().collect();
    stack.reverse();
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => escape_text(text, out),
            Node::Element(e) if !skipped_as_text(&e.name().to_ascii_lowercase(), options) => {
                let start = stack.len();
                stack.extend(node.children());
                stack[start..].reverse();
            }
            _ => {}
        }
    }
}

fn skipped_as_text(lower_name: &str, options: &SanitizeOptions) -> bool {
    lower_name == "style" || is_removed(lower_name, options)
}

fn allowed_attributes<'a>(
    el: ElementRef<'a>,
    tag: &str,
    options: &SanitizeOptions,
) -> Vec<(&'a str, String)> {
    let mut attrs: Vec<(&str, String)> = el
        .value()
        .attrs()
        .filter_map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with("on") {
                return None;
            }
            if lower == "style" {
                if !options.allow_styles {
                    return None;
                }
                let cleaned = clean_style(value);
                return (!cleaned.is_empty()).then_some((name, cleaned));
            }
            let allowed = lower.starts_with("aria-")
                || lower.starts_with("data-")
                || ALLOWED_ATTRIBUTES.contains(&lower.as_str());
            if !allowed {
                return None;
            }
            if URL_ATTRIBUTES.contains(&lower.as_str()) && !is_safe_url(value, tag, &lower, options)
            {
                return None;
            }
            Some((name, value.to_string()))
        })
        .collect();
    attrs.sort_by(|a, b| a.0.cmp(b.0));
    attrs.dedup_by(|a, b| a.0 == b.0);
    attrs
}

/// URL check for a `tag@attribute` value.
pub fn is_safe_url(value: &str, tag: &str, attribute: &str, options: &SanitizeOptions) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if SCRIPT_SCHEMES.iter().any(|s| compact.starts_with(s)) {
        return false;
    }
    if compact.starts_with("data:") {
        return options.allow_data_images
            && tag == "img"
            && attribute == "src"
            && compact.starts_with("data:image/")
            && !compact.starts_with("data:image/svg");
    }
    true
}

fn is_dangerous_css(css: &str) -> bool {
    let compact: String = decode_css_escapes(&strip_css_comments(css))
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '"' | '\''))
        .collect::<String>()
        .to_ascii_lowercase();
    DANGEROUS_CSS.iter().any(|d| compact.contains(d))
}

/// Resolve CSS backslash escapes: `\65 ` is `e`, `\(` is `(`.
fn decode_css_escapes(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut hex = String::new();
        while hex.len() < 6 {
            match chars.peek() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(*h);
                    chars.next();
                }
                _ => break,
            }
        }
        if hex.is_empty() {
            // An escaped newline is a line continuation.
            if let Some(next) = chars.next().filter(|n| *n != '\n') {
                out.push(next);
            }
            continue;
        }
        let decoded = u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .filter(|d| *d != '\0')
            .unwrap_or('\u{fffd}');
        out.push(decoded);
        // One whitespace character terminates a hex escape.
        if chars.peek().is_some_and(|n| n.is_whitespace()) {
            chars.next();
        }
    }
    out
}

fn strip_css_comments(css: &str) -> String {
    let mut without_comments = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        without_comments.push_str(&rest[..start]);
        rest = match rest[start + 2..].find("*/") {
            Some(end) => &rest[start + 2 + end + 2..],
            None => "",
        };
    }
    without_comments.push_str(rest);
    without_comments
}

/// Drop comments and dangerous declarations from a `style` attribute.
fn clean_style(style: &str) -> String {
    strip_css_comments(style)
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty() && d.contains(':') && !is_dangerous_css(d))
        .collect::<Vec<_>>()
        .join("; ")
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}
