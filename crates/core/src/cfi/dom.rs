//! Mapping between content-document nodes and address steps.
//!
//! Steps start below the `<html>` element: the k-th child element (0-based)
//! is step `2 * (k + 1)`, and odd steps name the text between elements
//! (`1` before the first child element, `3` after it, and so on).

use scraper::{ElementRef, Html, Node};

/// What an element path points at inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePosition {
    /// Tag name of the deepest element reached by even steps.
    pub element: String,
    pub element_id: Option<String>,
    /// Text addressed by a final odd step.
    pub text: Option<String>,
}

/// Element steps from `<html>` down to the element with the given id.
pub fn element_path_for_id(markup: &str, id: &str) -> Option<Vec<u32>> {
    let document = Html::parse_document(markup);
    let root = document.root_element();
    let target = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().id() == Some(id))?;

    let mut steps = Vec::new();
    let mut current = target;
    while current != root {
        let parent = current.parent().and_then(ElementRef::wrap)?;
        let position = parent
            .children()
            .filter_map(ElementRef::wrap)
            .position(|c| c == current)?;
        steps.push(2 * (position as u32 + 1));
        current = parent;
    }
    steps.reverse();
    Some(steps)
}

/// Follow `path` through the document. `None` when a step points past the
/// available children or an odd step appears before the last position.
pub fn text_position(markup: &str, path: &[u32]) -> Option<NodePosition> {
    let document = Html::parse_document(markup);
    let mut current = document.root_element();

    for (i, &step) in path.iter().enumerate() {
        if step % 2 == 1 {
            if i + 1 != path.len() {
                return None;
            }
            return Some(NodePosition {
                element: current.value().name().to_string(),
                element_id: current.value().id().map(String::from),
                text: Some(text_gap(current, (step as usize - 1) / 2)?),
            });
        }
        let k = (step as usize / 2).checked_sub(1)?;
        current = current.children().filter_map(ElementRef::wrap).nth(k)?;
    }

    Some(NodePosition {
        element: current.value().name().to_string(),
        element_id: current.value().id().map(String::from),
        text: None,
    })
}

/// Text directly under `parent` between child elements `gap - 1` and `gap`.
fn text_gap(parent: ElementRef<'_>, gap: usize) -> Option<String> {
    let mut seen = 0;
    let mut text = String::new();
    for child in parent.children() {
        match child.value() {
            Node::Element(_) => {
                seen += 1;
                if seen > gap {
                    break;
                }
            }
            Node::Text(t) if seen == gap => text.push_str(t),
            _ => {}
        }
    }
    (seen >= gap).then_some(text)
}
