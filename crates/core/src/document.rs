use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Parsed package (OPF) document. Built once at open time, immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct PackageDocument {
    /// Container path of the OPF file.
    pub path: String,
    pub version: Option<EpubVersion>,
    pub unique_identifier: String,
    pub metadata: Metadata,
    pub manifest: Manifest,
    pub spine: Spine,
    pub guide: Vec<GuideReference>,
    pub rendition: RenditionProperties,
    pub text_direction: TextDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpubVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
    Auto,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub titles: Vec<String>,
    pub creators: Vec<Contributor>,
    pub contributors: Vec<Contributor>,
    pub languages: Vec<String>,
    pub identifiers: Vec<Identifier>,
    pub publisher: Option<String>,
    pub date: Option<String>,
    /// `dcterms:modified`
    pub modified: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub rights: Option<String>,
    pub series: Option<SeriesInfo>,
    /// Manifest id named by the legacy `<meta name="cover">`.
    pub cover_id: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl Metadata {
    /// Main title: first title refined as `main`, else the first title.
    pub fn title(&self) -> Option<&str> {
        self.titles.first().map(String::as_str)
    }

    pub fn language(&self) -> Option<&str> {
        self.languages.first().map(String::as_str)
    }

    pub fn authors(&self) -> Vec<&str> {
        self.creators.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    pub role: Option<String>,
    pub file_as: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub id: Option<String>,
    pub value: String,
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub name: String,
    pub position: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    /// href as written in the OPF.
    pub href: String,
    /// Normalized container path.
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
    pub fallback: Option<String>,
    /// Id of the SMIL media overlay for this item.
    pub media_overlay: Option<String>,
}

impl ManifestItem {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    pub fn is_nav(&self) -> bool {
        self.has_property("nav")
    }

    pub fn is_cover_image(&self) -> bool {
        self.has_property("cover-image")
    }

    pub fn is_xhtml(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "application/xhtml+xml" | "text/html" | "application/xml"
        )
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// Bitmap image types (excludes SVG).
    pub fn is_raster_image(&self) -> bool {
        self.is_image() && self.media_type != "image/svg+xml"
    }

    pub fn is_stylesheet(&self) -> bool {
        self.media_type == "text/css"
    }
}

/// Manifest items in document order, indexed by id and by container path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    items: Vec<ManifestItem>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
    #[serde(skip)]
    by_path: HashMap<String, usize>,
    #[serde(skip)]
    by_folded_path: HashMap<String, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item. A duplicate id keeps the first occurrence.
    pub fn insert(&mut self, item: ManifestItem) -> bool {
        if self.by_id.contains_key(&item.id) {
            return false;
        }
        let index = self.items.len();
        self.by_id.insert(item.id.clone(), index);
        self.by_path.entry(item.path.clone()).or_insert(index);
        self.by_folded_path
            .entry(item.path.to_lowercase())
            .or_insert(index);
        self.items.push(item);
        true
    }

    pub fn get(&self, id: &str) -> Option<&ManifestItem> {
        self.by_id.get(id).map(|&i| &self.items[i])
    }

    /// Look up by container path: exact first, then case-insensitive.
    pub fn get_by_path(&self, path: &str) -> Option<&ManifestItem> {
        self.by_path
            .get(path)
            .or_else(|| self.by_folded_path.get(&path.to_lowercase()))
            .map(|&i| &self.items[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.items.iter().find(|i| i.is_nav())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpineItem {
    pub idref: String,
    pub id: Option<String>,
    /// `linear="no"` items are outside the default reading flow but still retrievable.
    pub linear: bool,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spine {
    pub items: Vec<SpineItem>,
    /// Manifest id of the NCX (`<spine toc="...">`).
    pub toc: Option<String>,
    pub page_progression_direction: Option<TextDirection>,
}

impl Spine {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SpineItem> {
        self.items.get(index)
    }

    pub fn position_of(&self, idref: &str) -> Option<usize> {
        self.items.iter().position(|i| i.idref == idref)
    }

    pub fn linear_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.linear)
            .map(|(i, _)| i)
    }
}

/// EPUB 2 `<guide>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideReference {
    pub kind: String,
    pub title: Option<String>,
    pub href: String,
    /// Container path of `href` without fragment.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Layout {
    #[default]
    Reflowable,
    PrePaginated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Auto,
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Spread {
    #[default]
    Auto,
    None,
    Landscape,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSpread {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Per-itemref overrides of the global rendition properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRendition {
    pub layout: Option<Layout>,
    pub orientation: Option<Orientation>,
    pub spread: Option<Spread>,
    pub page_spread: Option<PageSpread>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenditionProperties {
    pub layout: Layout,
    pub orientation: Orientation,
    pub spread: Spread,
    pub viewport: Option<Viewport>,
    /// Keyed by spine idref.
    pub item_overrides: HashMap<String, ItemRendition>,
}

impl RenditionProperties {
    pub fn is_fixed_layout(&self) -> bool {
        self.layout == Layout::PrePaginated
    }

    /// Effective layout of one spine item.
    pub fn layout_for(&self, idref: &str) -> Layout {
        self.item_overrides
            .get(idref)
            .and_then(|o| o.layout)
            .unwrap_or(self.layout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: Option<String>,
    pub title: String,
    /// Container path of the target document.
    pub href: String,
    pub fragment: Option<String>,
    /// Nesting depth, 0 for top-level entries.
    pub level: u32,
    pub children: Vec<TocEntry>,
    /// Set on an unlinked heading that borrowed its first child's target.
    #[serde(default)]
    pub inherited_target: bool,
}

impl TocEntry {
    /// Target as a single string, `path#fragment`.
    pub fn target(&self) -> String {
        match &self.fragment {
            Some(f) => format!("{}#{}", self.href, f),
            None => self.href.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationSource {
    NavDocument,
    Ncx,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: String,
    pub title: String,
    pub href: String,
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Navigation {
    pub source: NavigationSource,
    pub toc: Vec<TocEntry>,
    pub page_list: Vec<TocEntry>,
    pub landmarks: Vec<Landmark>,
    /// Container path -> title of the first TOC entry pointing at it.
    #[serde(skip)]
    pub title_index: HashMap<String, String>,
}

impl Navigation {
    pub fn new(source: NavigationSource, toc: Vec<TocEntry>) -> Self {
        let mut nav = Navigation {
            source,
            toc,
            page_list: Vec::new(),
            landmarks: Vec::new(),
            title_index: HashMap::new(),
        };
        nav.rebuild_index();
        nav
    }

    pub fn rebuild_index(&mut self) {
        let mut index = HashMap::new();
        for entry in flatten(&self.toc).into_iter().filter(|e| !e.inherited_target) {
            index
                .entry(entry.href.clone())
                .or_insert_with(|| entry.title.clone());
        }
        self.title_index = index;
    }

    pub fn title_for(&self, path: &str) -> Option<&str> {
        self.title_index.get(path).map(String::as_str)
    }

    /// All TOC entries, depth-first in document order.
    pub fn flatten(&self) -> Vec<&TocEntry> {
        flatten(&self.toc)
    }
}

fn flatten(entries: &[TocEntry]) -> Vec<&TocEntry> {
    let mut out = Vec::new();
    for entry in entries {
        out.push(entry);
        out.extend(flatten(&entry.children));
    }
    out
}

/// A reference rewritten inside a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub element: String,
    pub attribute: String,
    pub original: String,
    /// Container path, with the original fragment re-attached.
    pub resolved: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    /// Container path.
    pub href: String,
    pub title: Option<String>,
    pub spine_index: usize,
    /// Decrypted markup exactly as stored.
    pub raw_content: String,
    /// Markup with resource references rewritten to container paths.
    pub content: String,
    pub resolved_refs: Vec<ResourceRef>,
    pub media_type: String,
    pub linear: bool,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub href: String,
    pub media_type: String,
    pub data: Vec<u8>,
}
