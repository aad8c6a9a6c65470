//! Reading-order comparison of addresses.
//!
//! Addresses order by spine index, then element path (step by step, a
//! shorter path before any path it prefixes), then character offset with a
//! missing offset first. Assertions and the indirection flag never affect
//! reading order; they only break ties so `Ord` agrees with `Eq`.

use std::cmp::Ordering;

use super::types::*;

impl Ord for PositionAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_position(self, other).then_with(|| {
            (
                self.indirect,
                &self.spine_assertion,
                &self.path,
                &self.offset,
            )
                .cmp(&(
                    other.indirect,
                    &other.spine_assertion,
                    &other.path,
                    &other.offset,
                ))
        })
    }
}

impl PartialOrd for PositionAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PositionAddress {
    /// Reading-order comparison ignoring assertions.
    pub fn compare_to(&self, other: &Self) -> Ordering {
        compare_position(self, other)
    }

    /// Whether both addresses denote the same reading position.
    pub fn same_position(&self, other: &Self) -> bool {
        compare_position(self, other) == Ordering::Equal
    }
}

fn compare_position(a: &PositionAddress, b: &PositionAddress) -> Ordering {
    a.spine_index
        .cmp(&b.spine_index)
        .then_with(|| compare_steps(&a.path, &b.path))
        .then_with(|| compare_offsets(a.offset.as_ref(), b.offset.as_ref()))
}

fn compare_steps(a: &[PathStep], b: &[PathStep]) -> Ordering {
    for (step_a, step_b) in a.iter().zip(b) {
        let cmp = step_a.index.cmp(&step_b.index);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_offsets(a: Option<&CharacterOffset>, b: Option<&CharacterOffset>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.offset.cmp(&b.offset),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// `a` comes before `b` in reading order.
pub fn is_before(a: &PositionAddress, b: &PositionAddress) -> bool {
    compare_position(a, b) == Ordering::Less
}

/// `a` comes after `b` in reading order.
pub fn is_after(a: &PositionAddress, b: &PositionAddress) -> bool {
    compare_position(a, b) == Ordering::Greater
}

/// Compare two address strings in reading order. `None` if either does not
/// parse.
pub fn compare_address_strings(a: &str, b: &str) -> Option<Ordering> {
    let a = super::parser::parse(a).ok()?;
    let b = super::parser::parse(b).ok()?;
    Some(compare_position(&a, &b))
}

/// Sort address strings into reading order. Strings that do not parse are
/// kept, after all valid ones, in their original relative order.
pub fn sort_addresses<S: AsRef<str>>(addresses: &[S]) -> Vec<String> {
    let mut parsed: Vec<(Option<PositionAddress>, &str)> = addresses
        .iter()
        .map(|s| (super::parser::parse(s.as_ref()).ok(), s.as_ref()))
        .collect();
    parsed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    parsed.into_iter().map(|(_, s)| s.to_string()).collect()
}
