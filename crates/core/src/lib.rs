pub mod cfi;
pub mod config;
pub mod container;
pub mod content;
pub mod cover;
pub mod document;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod overlay;
pub mod package;
pub mod path;
pub mod progress;
pub mod sanitize;
pub mod security;

mod xml;

pub use engine::{Engine, OpenOptions};

pub mod prelude {
    pub use crate::cfi::{AddressRange, PositionAddress};
    pub use crate::document::*;
    pub use crate::engine::{Engine, OpenOptions};
    pub use crate::error::*;
    pub use crate::sanitize::SanitizeOptions;
}
