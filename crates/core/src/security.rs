//! Archive hardening: ZIP bomb protection, path traversal guards, resource limits.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::SecurityError;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    /// Maximum decompression ratio before flagging as ZIP bomb.
    pub max_compression_ratio: u64,
    /// Maximum number of entries allowed in the container.
    pub max_file_count: u64,
    /// Maximum decompressed size of a single resource in bytes.
    pub max_resource_size_bytes: u64,
    /// Maximum total decompressed size in bytes.
    pub max_total_size_bytes: u64,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_compression_ratio: 100,
            max_file_count: 10_000,
            max_resource_size_bytes: 200 * MB,
            max_total_size_bytes: 1024 * MB,
        }
    }
}

/// Size information for one archive entry, as recorded in the central directory.
#[derive(Debug, Clone, Copy)]
pub struct EntrySize {
    pub compressed: u64,
    pub uncompressed: u64,
}

impl SecurityLimits {
    /// Reject entry names that are absolute or climb out of the container root.
    pub fn check_entry_name(&self, name: &str) -> Result<(), SecurityError> {
        let traversal = || SecurityError::PathTraversal {
            path: name.to_string(),
        };

        if name.starts_with('/') || name.starts_with('\\') {
            return Err(traversal());
        }
        // Windows drive prefix (C:\...)
        if name.len() >= 2 && name.as_bytes()[1] == b':' {
            return Err(traversal());
        }
        if Path::new(name)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(traversal());
        }
        Ok(())
    }

    pub fn check_compression_ratio(&self, size: EntrySize) -> Result<(), SecurityError> {
        if size.compressed == 0 {
            if size.uncompressed > 0 {
                return Err(SecurityError::ZipBomb {
                    ratio: u64::MAX,
                    limit: self.max_compression_ratio,
                });
            }
            return Ok(());
        }

        let ratio = size.uncompressed / size.compressed;
        if ratio > self.max_compression_ratio {
            return Err(SecurityError::ZipBomb {
                ratio,
                limit: self.max_compression_ratio,
            });
        }
        Ok(())
    }

    pub fn check_file_count(&self, count: u64) -> Result<(), SecurityError> {
        if count > self.max_file_count {
            return Err(SecurityError::TooManyFiles {
                count,
                limit: self.max_file_count,
            });
        }
        Ok(())
    }

    pub fn check_resource_size(&self, name: &str, size_bytes: u64) -> Result<(), SecurityError> {
        if size_bytes > self.max_resource_size_bytes {
            return Err(SecurityError::OversizedResource {
                name: name.to_string(),
                size_mb: size_bytes / MB,
                limit_mb: self.max_resource_size_bytes / MB,
            });
        }
        Ok(())
    }

    /// Check the whole archive at once: entry count, aggregate ratio and total size.
    ///
    /// The ratio is checked over the sum of all entries so that many small,
    /// highly compressible text files do not trip the limit individually.
    pub fn check_archive(&self, sizes: &[EntrySize]) -> Result<(), SecurityError> {
        self.check_file_count(sizes.len() as u64)?;

        let total = sizes.iter().fold(EntrySize { compressed: 0, uncompressed: 0 }, |acc, s| {
            EntrySize {
                compressed: acc.compressed.saturating_add(s.compressed),
                uncompressed: acc.uncompressed.saturating_add(s.uncompressed),
            }
        });

        if total.uncompressed > self.max_total_size_bytes {
            return Err(SecurityError::OversizedResource {
                name: "<total>".to_string(),
                size_mb: total.uncompressed / MB,
                limit_mb: self.max_total_size_bytes / MB,
            });
        }
        self.check_compression_ratio(total)
    }
}
