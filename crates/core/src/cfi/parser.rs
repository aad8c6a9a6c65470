//! Address parser.
//!
//! Grammar:
//! ```text
//! address   = "epubcfi(" "/6/" even [assertion] ["!"] step* [offset] ")"
//! range     = "epubcfi(" "/6/" even [assertion] ["!"] step* "," local "," local ")"
//! local     = step* [offset]
//! step      = "/" number assertion*
//! offset    = ":" number [assertion]
//! assertion = "[" text "]"          ; ^ escapes ^ [ ] ( ) , ;
//! ```
//!
//! Only the first assertion of a step is kept. Offset assertions are read in
//! both the `[;s=before,after]` form and the `[before,after]` form.

use super::types::*;
use crate::error::AddressParseError;

const PREFIX: &str = "epubcfi(";

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_str(&mut self, s: &str) -> bool {
        if self.input[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn unexpected(&self) -> AddressParseError {
        match self.peek() {
            Some(ch) => AddressParseError::UnexpectedChar(ch, self.pos),
            None => AddressParseError::MissingClosingParen,
        }
    }

    fn parse_number(&mut self) -> Result<u32, AddressParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.pos == start {
            return Err(AddressParseError::ExpectedNumber(start));
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| AddressParseError::ExpectedNumber(start))
    }

    /// Raw text of a `[...]` group with escapes preserved, or `None` when
    /// no group starts here.
    fn parse_bracket(&mut self) -> Result<Option<&'a str>, AddressParseError> {
        let open = self.pos;
        if !self.skip_if('[') {
            return Ok(None);
        }
        let start = self.pos;
        loop {
            match self.advance() {
                Some('^') => {
                    if self.advance().is_none() {
                        break;
                    }
                }
                Some(']') => return Ok(Some(&self.input[start..self.pos - 1])),
                Some('[') => return Err(AddressParseError::UnexpectedChar('[', self.pos - 1)),
                Some(_) => {}
                None => break,
            }
        }
        Err(AddressParseError::UnclosedBracket(open))
    }

    /// All bracket groups at this position; the first is returned.
    fn parse_brackets(&mut self) -> Result<Option<&'a str>, AddressParseError> {
        let first = self.parse_bracket()?;
        if first.is_some() {
            while self.parse_bracket()?.is_some() {}
        }
        Ok(first)
    }

    /// `epubcfi(/6/N[assertion]!` up to the first content step.
    fn parse_head(&mut self) -> Result<(usize, Option<String>, bool), AddressParseError> {
        if !self.skip_str(PREFIX) || !self.skip_str("/6/") {
            return Err(AddressParseError::MissingPrefix);
        }
        let step = self.parse_number()?;
        if step == 0 || step % 2 != 0 {
            return Err(AddressParseError::InvalidSpineStep(step));
        }
        let spine_index = (step as usize - 2) / 2;
        let spine_assertion = self
            .parse_brackets()?
            .map(unescape)
            .filter(|s| !s.is_empty());
        let indirect = self.skip_if('!');
        Ok((spine_index, spine_assertion, indirect))
    }

    fn parse_steps(&mut self) -> Result<Vec<PathStep>, AddressParseError> {
        let mut steps = Vec::new();
        while self.skip_if('/') {
            let index = self.parse_number()?;
            let assertion = self.parse_brackets()?.and_then(step_assertion);
            steps.push(PathStep { index, assertion });
        }
        Ok(steps)
    }

    fn parse_offset(&mut self) -> Result<Option<CharacterOffset>, AddressParseError> {
        if !self.skip_if(':') {
            return Ok(None);
        }
        let offset = self.parse_number()?;
        let assertion = self.parse_brackets()?.and_then(text_assertion);
        Ok(Some(CharacterOffset { offset, assertion }))
    }

    fn finish(&mut self) -> Result<(), AddressParseError> {
        if !self.skip_if(')') {
            return Err(self.unexpected());
        }
        if !self.at_end() {
            return Err(self.unexpected());
        }
        Ok(())
    }
}

fn step_assertion(raw: &str) -> Option<StepAssertion> {
    let head = split_unescaped(raw, ';').into_iter().next().unwrap_or_default();
    if let Some(kind) = head.strip_prefix("type=") {
        return Some(StepAssertion::Type(unescape(kind)));
    }
    let id = unescape(head);
    (!id.is_empty()).then_some(StepAssertion::Id(id))
}

fn text_assertion(raw: &str) -> Option<TextAssertion> {
    let parts = split_unescaped(raw, ';');
    let side = parts
        .iter()
        .skip(1)
        .find_map(|p| p.strip_prefix("s="))
        .or_else(|| parts.first().copied().filter(|p| !p.is_empty()))?;
    let mut halves = split_unescaped(side, ',').into_iter();
    let before = halves.next().map(unescape).unwrap_or_default();
    let after = halves.next().map(unescape).unwrap_or_default();
    if before.is_empty() && after.is_empty() {
        return None;
    }
    Some(TextAssertion { before, after })
}

/// Split on `delim` where it is not `^`-escaped. Escapes are kept.
fn split_unescaped(raw: &str, delim: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '^' {
            escaped = true;
        } else if c == delim {
            parts.push(&raw[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a single position address.
pub fn parse(input: &str) -> Result<PositionAddress, AddressParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressParseError::Empty);
    }
    let mut parser = Parser::new(input);
    let (spine_index, spine_assertion, indirect) = parser.parse_head()?;
    let path = parser.parse_steps()?;
    let offset = parser.parse_offset()?;
    parser.finish()?;
    Ok(PositionAddress {
        spine_index,
        spine_assertion,
        indirect,
        path,
        offset,
    })
}

fn parse_local(
    parser: &mut Parser<'_>,
    parent: &PositionAddress,
) -> Result<PositionAddress, AddressParseError> {
    let mut address = parent.clone();
    address.path.extend(parser.parse_steps()?);
    address.offset = parser.parse_offset()?;
    Ok(address)
}

/// Parse a range address `epubcfi(parent,start,end)`.
pub fn parse_range(input: &str) -> Result<AddressRange, AddressParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressParseError::Empty);
    }
    let mut parser = Parser::new(input);
    let (spine_index, spine_assertion, indirect) = parser.parse_head()?;
    let parent = parser.parse_steps()?;
    if parser.peek() == Some(':') {
        return Err(AddressParseError::InvalidRange(
            "range parent cannot carry an offset".into(),
        ));
    }
    if !parser.skip_if(',') {
        return Err(AddressParseError::InvalidRange(
            "expected ',' after the range parent".into(),
        ));
    }

    let parent = PositionAddress {
        spine_index,
        spine_assertion,
        indirect,
        path: parent,
        offset: None,
    };
    let start = parse_local(&mut parser, &parent)?;
    if !parser.skip_if(',') {
        return Err(AddressParseError::InvalidRange(
            "expected ',' between range start and end".into(),
        ));
    }
    let end = parse_local(&mut parser, &parent)?;
    parser.finish()?;
    AddressRange::new(start, end)
}
