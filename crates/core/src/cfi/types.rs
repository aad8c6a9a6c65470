//! Position address types.
//!
//! Format: `epubcfi(/6/4[chap01]!/4/2[para]/1:42[;s=before,after])`
//!
//! Reference: <https://idpf.org/epub/linking/cfi/epub-cfi.html>

use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters that must be `^`-escaped inside assertions.
const ESCAPED: &[char] = &['^', '[', ']', '(', ')', ',', ';'];

/// A location inside the publication: a spine item, an optional element
/// path inside its content document, and an optional character offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionAddress {
    /// 0-based spine index; the spine step is `spine_index * 2 + 2`.
    pub spine_index: usize,
    /// Id assertion on the spine step (`/6/4[chap01]`).
    pub spine_assertion: Option<String>,
    /// Whether the address steps into the content document (`!`).
    pub indirect: bool,
    /// Steps inside the content document.
    pub path: Vec<PathStep>,
    pub offset: Option<CharacterOffset>,
}

/// One `/N` step. Even indices are elements, odd indices are text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathStep {
    pub index: u32,
    pub assertion: Option<StepAssertion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepAssertion {
    /// `[id]`
    Id(String),
    /// `[type=value]`
    Type(String),
}

/// `:N` character offset into a text node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterOffset {
    pub offset: u32,
    pub assertion: Option<TextAssertion>,
}

/// Text expected around an offset, written `[;s=before,after]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextAssertion {
    pub before: String,
    pub after: String,
}

/// Two addresses in the same spine item, `epubcfi(parent,start,end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: PositionAddress,
    pub end: PositionAddress,
}

impl PositionAddress {
    /// Address of a whole spine item: `epubcfi(/6/{2i+2})`.
    pub fn from_spine_index(spine_index: usize) -> Self {
        PositionAddress {
            spine_index,
            spine_assertion: None,
            indirect: false,
            path: Vec::new(),
            offset: None,
        }
    }

    /// Address of an element inside a spine item's document. `id`, when
    /// given, is asserted on the last step.
    pub fn from_element_path(
        spine_index: usize,
        path: &[u32],
        offset: Option<u32>,
        id: Option<&str>,
    ) -> Self {
        let mut steps: Vec<PathStep> = path.iter().map(|&index| PathStep::new(index)).collect();
        if let (Some(last), Some(id)) = (steps.last_mut(), id.filter(|i| !i.is_empty())) {
            last.assertion = Some(StepAssertion::Id(id.to_string()));
        }
        PositionAddress {
            spine_index,
            spine_assertion: None,
            indirect: true,
            path: steps,
            offset: offset.map(CharacterOffset::new),
        }
    }

    /// Parse an address string.
    pub fn parse(input: &str) -> Result<Self, crate::error::AddressParseError> {
        super::parser::parse(input)
    }

    /// The spine step as written in the address.
    pub fn spine_step(&self) -> usize {
        self.spine_index * 2 + 2
    }

    /// Element path indices without assertions.
    pub fn step_indices(&self) -> Vec<u32> {
        self.path.iter().map(|s| s.index).collect()
    }

    /// Id asserted on the deepest step that carries one.
    pub fn target_id(&self) -> Option<&str> {
        self.path.iter().rev().find_map(|s| match &s.assertion {
            Some(StepAssertion::Id(id)) => Some(id.as_str()),
            _ => None,
        })
    }
}

impl PathStep {
    pub fn new(index: u32) -> Self {
        PathStep {
            index,
            assertion: None,
        }
    }

    pub fn is_element(&self) -> bool {
        self.index % 2 == 0
    }

    pub fn is_text(&self) -> bool {
        !self.is_element()
    }
}

impl CharacterOffset {
    pub fn new(offset: u32) -> Self {
        CharacterOffset {
            offset,
            assertion: None,
        }
    }
}

impl AddressRange {
    /// Both ends must lie in the same spine item on the same side of the
    /// indirection, and `start` must not come after `end`.
    pub fn new(
        start: PositionAddress,
        end: PositionAddress,
    ) -> Result<Self, crate::error::AddressParseError> {
        use crate::error::AddressParseError;
        if start.spine_index != end.spine_index {
            return Err(AddressParseError::InvalidRange(
                "start and end are in different spine items".into(),
            ));
        }
        if start.indirect != end.indirect || start.spine_assertion != end.spine_assertion {
            return Err(AddressParseError::InvalidRange(
                "start and end have different parents".into(),
            ));
        }
        if start > end {
            return Err(AddressParseError::InvalidRange("start is after end".into()));
        }
        Ok(AddressRange { start, end })
    }

    pub fn parse(input: &str) -> Result<Self, crate::error::AddressParseError> {
        super::parser::parse_range(input)
    }

    /// Whether `address` lies between the ends, inclusive.
    pub fn contains(&self, address: &PositionAddress) -> bool {
        &self.start <= address && address <= &self.end
    }

    /// Number of leading steps both ends share.
    fn common_steps(&self) -> usize {
        self.start
            .path
            .iter()
            .zip(&self.end.path)
            .take_while(|(a, b)| a == b)
            .count()
    }
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPED.contains(&c) {
            out.push('^');
        }
        out.push(c);
    }
    out
}

fn write_head(f: &mut fmt::Formatter<'_>, address: &PositionAddress) -> fmt::Result {
    write!(f, "epubcfi(/6/{}", address.spine_step())?;
    if let Some(ref id) = address.spine_assertion {
        write!(f, "[{}]", escape(id))?;
    }
    if address.indirect {
        write!(f, "!")?;
    }
    Ok(())
}

fn write_tail(
    f: &mut fmt::Formatter<'_>,
    steps: &[PathStep],
    offset: &Option<CharacterOffset>,
) -> fmt::Result {
    for step in steps {
        write!(f, "{step}")?;
    }
    if let Some(offset) = offset {
        write!(f, "{offset}")?;
    }
    Ok(())
}

impl fmt::Display for PositionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_head(f, self)?;
        write_tail(f, &self.path, &self.offset)?;
        write!(f, ")")
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.index)?;
        match &self.assertion {
            Some(StepAssertion::Id(id)) => {
                // Keep a literal "type=" id from reading back as a type assertion.
                let escaped = escape(id);
                match escaped.strip_prefix("type=") {
                    Some(rest) => write!(f, "[type^={rest}]"),
                    None => write!(f, "[{escaped}]"),
                }
            }
            Some(StepAssertion::Type(kind)) => write!(f, "[type={}]", escape(kind)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for CharacterOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.offset)?;
        if let Some(ref assertion) = self.assertion {
            write!(f, "{assertion}")?;
        }
        Ok(())
    }
}

impl fmt::Display for TextAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[;s={},{}]", escape(&self.before), escape(&self.after))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let common = self.common_steps();
        write_head(f, &self.start)?;
        write_tail(f, &self.start.path[..common], &None)?;
        write!(f, ",")?;
        write_tail(f, &self.start.path[common..], &self.start.offset)?;
        write!(f, ",")?;
        write_tail(f, &self.end.path[common..], &self.end.offset)?;
        write!(f, ")")
    }
}
