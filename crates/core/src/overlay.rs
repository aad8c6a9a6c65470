//! Media overlay (SMIL) parsing: which audio clip narrates which text.

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::path;
use crate::xml;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaOverlay {
    /// Container path of the SMIL document, empty when there is none.
    pub smil_path: String,
    pub clips: Vec<OverlayClip>,
}

/// One `<par>`: a text fragment and the audio that reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayClip {
    /// Container path of the content document.
    pub text_path: String,
    pub fragment: Option<String>,
    /// Container path of the audio file.
    pub audio_path: String,
    /// Seconds.
    pub clip_begin: Option<f64>,
    /// Seconds.
    pub clip_end: Option<f64>,
}

impl MediaOverlay {
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Clips narrating the given content document, in document order.
    pub fn clips_for<'a>(&'a self, text_path: &'a str) -> impl Iterator<Item = &'a OverlayClip> {
        self.clips.iter().filter(move |c| c.text_path == text_path)
    }

    /// Sum of clip lengths, skipping clips without both bounds.
    pub fn duration(&self) -> f64 {
        self.clips
            .iter()
            .filter_map(|c| Some(c.clip_end? - c.clip_begin?))
            .filter(|d| *d > 0.0)
            .sum()
    }
}

#[derive(Default)]
struct ParState {
    text: Option<String>,
    audio: Option<String>,
    clip_begin: Option<f64>,
    clip_end: Option<f64>,
}

/// Parse the SMIL document stored at `smil_path`.
pub fn parse_media_overlay(smil: &str, smil_path: &str) -> Result<MediaOverlay, ParseError> {
    let mut reader = XmlReader::from_str(smil);
    let mut buf = Vec::new();
    let mut clips = Vec::new();
    let mut par: Option<ParState> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Malformed {
                path: smil_path.to_string(),
                detail: e.to_string(),
            })?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                match e.local_name().as_ref() {
                    b"par" if is_start => par = Some(ParState::default()),
                    b"text" => {
                        if let Some(state) = par.as_mut() {
                            state.text = xml::attributes(e).remove("src");
                        }
                    }
                    b"audio" => {
                        if let Some(state) = par.as_mut() {
                            let attrs = xml::attributes(e);
                            state.audio = attrs.get("src").cloned();
                            state.clip_begin = attrs.get("clipBegin").and_then(|v| parse_clock_value(v));
                            state.clip_end = attrs.get("clipEnd").and_then(|v| parse_clock_value(v));
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"par" => {
                if let Some(state) = par.take() {
                    match (state.text, state.audio) {
                        (Some(text), Some(audio)) => {
                            let (text_path, fragment) = path::resolve_href(smil_path, &text);
                            clips.push(OverlayClip {
                                text_path,
                                fragment,
                                audio_path: path::resolve_from(smil_path, &audio),
                                clip_begin: state.clip_begin,
                                clip_end: state.clip_end,
                            });
                        }
                        _ => tracing::debug!("Skipping <par> without text or audio in {smil_path}"),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(MediaOverlay {
        smil_path: smil_path.to_string(),
        clips,
    })
}

/// Parse a SMIL clock value into seconds.
///
/// Accepts full (`1:02:03.5`) and partial (`02:03.5`) clock values and
/// timecounts (`12.5s`, `500ms`, `2min`, `1h`, bare seconds).
pub fn parse_clock_value(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.contains(':') {
        let parts: Vec<f64> = value
            .split(':')
            .map(|p| p.trim().parse::<f64>().ok())
            .collect::<Option<_>>()?;
        return match parts.as_slice() {
            [h, m, s] => Some(h * 3600.0 + m * 60.0 + s),
            [m, s] => Some(m * 60.0 + s),
            _ => None,
        };
    }
    let (number, scale) = if let Some(n) = value.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = value.strip_suffix("min") {
        (n, 60.0)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1.0)
    } else {
        (value, 1.0)
    };
    let seconds = number.trim().parse::<f64>().ok()? * scale;
    seconds.is_finite().then_some(seconds)
}
