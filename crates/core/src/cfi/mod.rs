//! Position addresses (EPUB CFI) for bookmarks, highlights and progress.
//!
//! ```text
//! epubcfi(/6/4[chap01]!/4/2/1:42)
//!         │  │        │ │ │ │ └── character offset 42
//!         │  │        │ │ │ └──── text node (odd = text)
//!         │  │        │ │ └────── element (even = element)
//!         │  │        │ └──────── body
//!         │  │        └────────── indirection into the content document
//!         │  └─────────────────── spine item 1, with an id assertion
//!         └────────────────────── spine
//! ```
//!
//! Addresses must be ordered with [`PositionAddress`]'s `Ord` (or
//! [`sort_addresses`]), never by string comparison.
//!
//! ```
//! use epub_engine_core::cfi::PositionAddress;
//!
//! let a = PositionAddress::parse("epubcfi(/6/4!/4/2:5)").unwrap();
//! let b = PositionAddress::parse("epubcfi(/6/4!/4/2:10)").unwrap();
//! assert_eq!(a.spine_index, 1);
//! assert!(a < b);
//! assert_eq!(b.to_string(), "epubcfi(/6/4!/4/2:10)");
//! ```

mod comparator;
mod dom;
mod parser;
mod types;

pub use comparator::{compare_address_strings, is_after, is_before, sort_addresses};
pub use dom::{element_path_for_id, text_position, NodePosition};
pub use parser::{parse, parse_range};
pub use types::{
    AddressRange, CharacterOffset, PathStep, PositionAddress, StepAssertion, TextAssertion,
};
