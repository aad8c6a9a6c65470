//! Package document (OPF) parsing.
//!
//! One pass over the OPF with quick-xml collects metadata, manifest, spine,
//! guide and rendition properties. EPUB 3 `refines` metadata is gathered
//! during the pass and applied at the end, because a refinement may appear
//! before the element it refines.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

use crate::document::{
    Contributor, EpubVersion, GuideReference, Identifier, ItemRendition, Layout, Manifest,
    ManifestItem, Metadata, Orientation, PackageDocument, PageSpread, RenditionProperties,
    SeriesInfo, Spine, SpineItem, Spread, TextDirection, Viewport,
};
use crate::error::ValidationError;
use crate::path;
use crate::xml;

/// Dublin Core elements whose text content is collected.
const DC_ELEMENTS: &[&str] = &[
    "title",
    "creator",
    "contributor",
    "language",
    "identifier",
    "publisher",
    "date",
    "description",
    "subject",
    "rights",
];

/// An element whose text is being accumulated.
struct Pending {
    name: String,
    attrs: HashMap<String, String>,
    text: String,
}

/// `<meta refines="#id" property="...">value</meta>`
struct Refinement {
    target: String,
    property: String,
    value: String,
}

#[derive(Default)]
struct MetadataBuilder {
    metadata: Metadata,
    /// (element id, title)
    titles: Vec<(Option<String>, String)>,
    /// (element id, contributor, is a dc:contributor rather than dc:creator)
    people: Vec<(Option<String>, Contributor, bool)>,
    refinements: Vec<Refinement>,
    /// Id of the `belongs-to-collection` meta that produced the series.
    series_meta_id: Option<String>,
}

impl MetadataBuilder {
    fn finish_element(&mut self, pending: Pending, rendition: &mut RenditionProperties) {
        let text = xml::collapse_whitespace(&pending.text);
        if text.is_empty() {
            return;
        }
        let attr = |key: &str| pending.attrs.get(key).filter(|v| !v.is_empty()).cloned();
        let m = &mut self.metadata;

        match pending.name.as_str() {
            "title" => self.titles.push((attr("id"), text)),
            "creator" | "contributor" => {
                let person = Contributor {
                    name: text,
                    role: attr("role"),
                    file_as: attr("file-as"),
                };
                self.people
                    .push((attr("id"), person, pending.name == "contributor"));
            }
            "language" => m.languages.push(text),
            "identifier" => m.identifiers.push(Identifier {
                id: attr("id"),
                value: text,
                scheme: attr("scheme"),
            }),
            "publisher" => set_once(&mut m.publisher, text),
            "date" => set_once(&mut m.date, text),
            "description" => set_once(&mut m.description, text),
            "rights" => set_once(&mut m.rights, text),
            "subject" => m.subjects.push(text),
            "meta" => {
                let Some(property) = attr("property") else {
                    return;
                };
                if let Some(target) = attr("refines") {
                    self.refinements.push(Refinement {
                        target: target.trim_start_matches('#').to_string(),
                        property,
                        value: text,
                    });
                    return;
                }
                match property.as_str() {
                    "dcterms:modified" => set_once(&mut m.modified, text),
                    "belongs-to-collection" => {
                        if m.series.is_none() {
                            m.series = Some(SeriesInfo {
                                name: text,
                                position: None,
                            });
                            self.series_meta_id = attr("id");
                        }
                    }
                    "rendition:layout" => rendition.layout = parse_layout(&text),
                    "rendition:orientation" => rendition.orientation = parse_orientation(&text),
                    "rendition:spread" => rendition.spread = parse_spread(&text),
                    "rendition:viewport" => {
                        if let Some(viewport) = parse_viewport(&text) {
                            rendition.viewport = Some(viewport);
                        }
                    }
                    _ => {
                        m.custom.entry(property).or_insert(text);
                    }
                }
            }
            _ => {}
        }
    }

    /// EPUB 2 `<meta name="..." content="..."/>`.
    fn name_meta(&mut self, name: &str, content: &str, rendition: &mut RenditionProperties) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let m = &mut self.metadata;
        match name {
            "cover" => set_once(&mut m.cover_id, content.to_string()),
            "calibre:series" => {
                if m.series.is_none() {
                    m.series = Some(SeriesInfo {
                        name: content.to_string(),
                        position: None,
                    });
                }
            }
            "calibre:series_index" => {
                if let (Some(series), Ok(pos)) = (m.series.as_mut(), content.parse::<f32>()) {
                    series.position = Some(pos);
                } else {
                    m.custom
                        .insert(name.to_string(), content.to_string());
                }
            }
            "original-resolution" => {
                if let Some(viewport) = parse_viewport(content) {
                    rendition.viewport.get_or_insert(viewport);
                }
            }
            _ => {
                m.custom
                    .entry(name.to_string())
                    .or_insert_with(|| content.to_string());
            }
        }
    }

    fn build(mut self) -> Metadata {
        for refinement in std::mem::take(&mut self.refinements) {
            self.apply(refinement);
        }
        let MetadataBuilder {
            mut metadata,
            titles,
            people,
            ..
        } = self;
        metadata.titles = titles.into_iter().map(|(_, t)| t).collect();
        for (_, person, is_contributor) in people {
            if is_contributor {
                metadata.contributors.push(person);
            } else {
                metadata.creators.push(person);
            }
        }
        metadata
    }

    fn apply(&mut self, r: Refinement) {
        let target = Some(r.target.as_str());
        match r.property.as_str() {
            "title-type" if r.value == "main" => {
                if let Some(pos) = self.titles.iter().position(|(id, _)| id.as_deref() == target) {
                    let main = self.titles.remove(pos);
                    self.titles.insert(0, main);
                }
            }
            "role" => {
                if let Some((_, person, _)) = self.person_mut(&r.target) {
                    person.role = Some(r.value);
                }
            }
            "file-as" => {
                if let Some((_, person, _)) = self.person_mut(&r.target) {
                    person.file_as = Some(r.value);
                }
            }
            "identifier-type" => {
                if let Some(identifier) = self
                    .metadata
                    .identifiers
                    .iter_mut()
                    .find(|i| i.id.as_deref() == target)
                {
                    identifier.scheme = Some(r.value);
                }
            }
            "group-position" if self.series_meta_id.as_deref() == target => {
                if let (Some(series), Ok(pos)) =
                    (self.metadata.series.as_mut(), r.value.parse::<f32>())
                {
                    series.position = Some(pos);
                }
            }
            _ => {}
        }
    }

    fn person_mut(&mut self, id: &str) -> Option<&mut (Option<String>, Contributor, bool)> {
        self.people
            .iter_mut()
            .find(|(pid, _, _)| pid.as_deref() == Some(id))
    }
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// Parse the package document at `package_path` (a container path, used to
/// resolve manifest hrefs).
pub fn parse_package(xml_text: &str, package_path: &str) -> Result<PackageDocument, ValidationError> {
    let mut reader = XmlReader::from_str(xml_text);
    let mut buf = Vec::new();

    let mut version = None;
    let mut text_direction = TextDirection::Ltr;
    let mut unique_identifier_ref = None;
    let mut meta = MetadataBuilder::default();
    let mut manifest = Manifest::new();
    let mut spine = Spine::default();
    let mut raw_itemrefs = Vec::new();
    let mut guide = Vec::new();
    let mut rendition = RenditionProperties::default();

    let mut saw_package = false;
    let mut saw_manifest = false;
    let mut saw_spine = false;
    let mut in_metadata = false;
    let mut pending: Option<Pending> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ValidationError::MalformedXml(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                let name = xml::local_name(e);
                let attrs = xml::attributes(e);

                match name.as_str() {
                    "package" => {
                        saw_package = true;
                        version = attrs.get("version").and_then(|v| match v.trim() {
                            v if v.starts_with('2') => Some(EpubVersion::V2),
                            v if v.starts_with('3') => Some(EpubVersion::V3),
                            _ => None,
                        });
                        unique_identifier_ref = attrs.get("unique-identifier").cloned();
                        if let Some(dir) = attrs.get("dir") {
                            text_direction = parse_direction(dir);
                        }
                    }
                    "metadata" => in_metadata = is_start,
                    n if in_metadata && is_start && DC_ELEMENTS.contains(&n) => {
                        pending = Some(Pending {
                            name: name.clone(),
                            attrs,
                            text: String::new(),
                        });
                    }
                    "meta" if in_metadata => {
                        if let (Some(meta_name), Some(content)) =
                            (attrs.get("name"), attrs.get("content"))
                        {
                            meta.name_meta(meta_name, content, &mut rendition);
                        } else if is_start && attrs.contains_key("property") {
                            pending = Some(Pending {
                                name: name.clone(),
                                attrs,
                                text: String::new(),
                            });
                        }
                    }
                    "manifest" => saw_manifest = true,
                    "item" if saw_manifest => {
                        if let Some(item) = manifest_item(&attrs, package_path) {
                            let id = item.id.clone();
                            if !manifest.insert(item) {
                                tracing::warn!("Duplicate manifest id '{id}', keeping the first");
                            }
                        }
                    }
                    "spine" => {
                        saw_spine = true;
                        spine.toc = attrs.get("toc").filter(|t| !t.is_empty()).cloned();
                        spine.page_progression_direction = attrs
                            .get("page-progression-direction")
                            .map(|d| parse_direction(d));
                    }
                    "itemref" if saw_spine => {
                        match attrs.get("idref").filter(|i| !i.is_empty()) {
                            Some(idref) => {
                                let properties: Vec<String> = attrs
                                    .get("properties")
                                    .map(|p| p.split_whitespace().map(String::from).collect())
                                    .unwrap_or_default();
                                if let Some(overrides) = item_rendition(&properties) {
                                    rendition.item_overrides.insert(idref.clone(), overrides);
                                }
                                raw_itemrefs.push(SpineItem {
                                    idref: idref.clone(),
                                    id: attrs.get("id").cloned(),
                                    linear: attrs
                                        .get("linear")
                                        .map_or(true, |l| !l.trim().eq_ignore_ascii_case("no")),
                                    properties,
                                });
                            }
                            None => tracing::warn!("Spine itemref without idref"),
                        }
                    }
                    "reference" => {
                        if let Some(href) = attrs.get("href").filter(|h| !h.is_empty()) {
                            guide.push(GuideReference {
                                kind: attrs.get("type").cloned().unwrap_or_default(),
                                title: attrs.get("title").cloned(),
                                href: href.clone(),
                                path: path::resolve_from(package_path, href),
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                if let Some(p) = pending.as_mut() {
                    p.text.push_str(&xml::text(e));
                }
            }
            Event::CData(ref e) => {
                if let Some(p) = pending.as_mut() {
                    p.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "metadata" {
                    in_metadata = false;
                }
                if pending.as_ref().is_some_and(|p| p.name == name) {
                    if let Some(p) = pending.take() {
                        meta.finish_element(p, &mut rendition);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_package {
        return Err(ValidationError::MissingElement("package"));
    }
    if !saw_manifest {
        return Err(ValidationError::MissingElement("manifest"));
    }
    if !saw_spine {
        return Err(ValidationError::MissingElement("spine"));
    }

    for itemref in raw_itemrefs {
        if manifest.get(&itemref.idref).is_some() {
            spine.items.push(itemref);
        } else {
            tracing::warn!("Spine references unknown manifest id '{}'", itemref.idref);
        }
    }
    if spine.is_empty() {
        return Err(ValidationError::EmptySpine);
    }

    let metadata = meta.build();
    let unique_identifier = unique_identifier_ref
        .as_deref()
        .and_then(|id| {
            metadata
                .identifiers
                .iter()
                .find(|i| i.id.as_deref() == Some(id))
        })
        .or_else(|| metadata.identifiers.first())
        .map(|i| i.value.clone())
        .unwrap_or_default();

    Ok(PackageDocument {
        path: package_path.to_string(),
        version,
        unique_identifier,
        metadata,
        manifest,
        spine,
        guide,
        rendition,
        text_direction,
    })
}

fn manifest_item(attrs: &HashMap<String, String>, package_path: &str) -> Option<ManifestItem> {
    let id = attrs.get("id").filter(|v| !v.is_empty());
    let href = attrs.get("href").filter(|v| !v.is_empty());
    let (Some(id), Some(href)) = (id, href) else {
        tracing::warn!("Skipping manifest item without id or href");
        return None;
    };
    let path = path::resolve_from(package_path, href);
    let media_type = attrs
        .get("media-type")
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| path::media_type_for(&path).to_string());
    Some(ManifestItem {
        id: id.clone(),
        href: href.clone(),
        path,
        media_type,
        properties: attrs
            .get("properties")
            .map(|p| p.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
        fallback: attrs.get("fallback").cloned(),
        media_overlay: attrs.get("media-overlay").cloned(),
    })
}

fn parse_direction(value: &str) -> TextDirection {
    match value.trim().to_ascii_lowercase().as_str() {
        "rtl" => TextDirection::Rtl,
        "ltr" => TextDirection::Ltr,
        _ => TextDirection::Auto,
    }
}

fn parse_layout(value: &str) -> Layout {
    match value.trim() {
        "pre-paginated" => Layout::PrePaginated,
        _ => Layout::Reflowable,
    }
}

fn parse_orientation(value: &str) -> Orientation {
    match value.trim() {
        "portrait" => Orientation::Portrait,
        "landscape" => Orientation::Landscape,
        _ => Orientation::Auto,
    }
}

fn parse_spread(value: &str) -> Spread {
    match value.trim() {
        "none" => Spread::None,
        "landscape" => Spread::Landscape,
        // `portrait` is deprecated and treated as `both`.
        "both" | "portrait" => Spread::Both,
        _ => Spread::Auto,
    }
}

/// Accepts `width=1024, height=768` and the legacy `1024x768`.
fn parse_viewport(value: &str) -> Option<Viewport> {
    let value = value.trim();
    if let Some((w, h)) = value.split_once(['x', 'X']) {
        if let (Ok(width), Ok(height)) = (w.trim().parse(), h.trim().parse()) {
            return Some(Viewport { width, height });
        }
    }
    let mut width = None;
    let mut height = None;
    for part in value.split([',', ';']) {
        if let Some((key, val)) = part.split_once('=') {
            let val = val.trim().trim_end_matches("px").parse::<u32>().ok();
            match key.trim() {
                "width" => width = val,
                "height" => height = val,
                _ => {}
            }
        }
    }
    Some(Viewport {
        width: width?,
        height: height?,
    })
}

fn item_rendition(properties: &[String]) -> Option<ItemRendition> {
    let mut overrides = ItemRendition::default();
    for property in properties {
        let property = property.trim_start_matches("rendition:");
        match property {
            "layout-pre-paginated" => overrides.layout = Some(Layout::PrePaginated),
            "layout-reflowable" => overrides.layout = Some(Layout::Reflowable),
            "orientation-portrait" => overrides.orientation = Some(Orientation::Portrait),
            "orientation-landscape" => overrides.orientation = Some(Orientation::Landscape),
            "orientation-auto" => overrides.orientation = Some(Orientation::Auto),
            "spread-none" => overrides.spread = Some(Spread::None),
            "spread-landscape" => overrides.spread = Some(Spread::Landscape),
            "spread-both" | "spread-portrait" => overrides.spread = Some(Spread::Both),
            "spread-auto" => overrides.spread = Some(Spread::Auto),
            "page-spread-left" => overrides.page_spread = Some(PageSpread::Left),
            "page-spread-right" => overrides.page_spread = Some(PageSpread::Right),
            "page-spread-center" => overrides.page_spread = Some(PageSpread::Center),
            _ => {}
        }
    }
    (overrides != ItemRendition::default()).then_some(overrides)
}
