//! Config file parsing for `~/.config/epub-engine/config.toml`.
//!
//! Use `open_options_from_config` and `sanitize_options_from_config` to turn
//! the loaded config into engine options so security limits apply.

use serde::{Deserialize, Serialize};

use crate::engine::OpenOptions;
use crate::sanitize::SanitizeOptions;
use crate::security::SecurityLimits;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub sanitize: SanitizeOptions,
    #[serde(default)]
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_file_size_mb: Option<u64>,
    pub max_resource_size_mb: Option<u64>,
    pub max_compression_ratio: Option<u64>,
    pub max_file_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Passphrase tried for licensed publications when none is given.
    pub default_passphrase: Option<String>,
}

/// Load config from the default path. Missing or invalid files yield defaults.
pub fn load_config() -> EngineConfig {
    let Some(config_path) = config_path() else {
        return EngineConfig::default();
    };

    let content = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(_) => return EngineConfig::default(),
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring invalid config {}: {}", config_path.display(), e);
            EngineConfig::default()
        }
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("epub-engine");
        p.push("config.toml");
        p
    })
}

/// Set one `section.key` value, parsing `value` as TOML first (numbers,
/// booleans) and falling back to a plain string.
pub fn set_value(config: &EngineConfig, key: &str, value: &str) -> Result<EngineConfig, String> {
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| format!("expected section.key, got '{key}'"))?;

    let mut table = toml::Value::try_from(config).map_err(|e| e.to_string())?;
    let parsed = toml::from_str::<toml::Table>(&format!("v = {value}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()));

    let section_table = table
        .as_table_mut()
        .and_then(|t| t.get_mut(section))
        .and_then(toml::Value::as_table_mut)
        .ok_or_else(|| format!("unknown section '{section}'"))?;
    section_table.insert(field.to_string(), parsed);

    let updated: EngineConfig = table.try_into().map_err(|e: toml::de::Error| e.to_string())?;
    if toml::Value::try_from(&updated)
        .ok()
        .and_then(|v| v.get(section)?.get(field).cloned())
        .is_none()
    {
        return Err(format!("unknown key '{key}'"));
    }
    Ok(updated)
}

/// Build security limits from config. Uses defaults for any unset values.
pub fn security_limits_from_config(c: &SecurityConfig) -> SecurityLimits {
    let mut limits = SecurityLimits::default();
    if let Some(mb) = c.max_file_size_mb {
        limits.max_total_size_bytes = mb.saturating_mul(1024).saturating_mul(1024);
    }
    if let Some(mb) = c.max_resource_size_mb {
        limits.max_resource_size_bytes = mb.saturating_mul(1024).saturating_mul(1024);
    }
    if let Some(r) = c.max_compression_ratio {
        limits.max_compression_ratio = r;
    }
    if let Some(n) = c.max_file_count {
        limits.max_file_count = n;
    }
    limits
}

pub fn sanitize_options_from_config(cfg: &EngineConfig) -> SanitizeOptions {
    cfg.sanitize.clone()
}

/// Open options from config. An explicit passphrase beats the configured one.
pub fn open_options_from_config(cfg: &EngineConfig, passphrase: Option<&str>) -> OpenOptions {
    OpenOptions {
        security: security_limits_from_config(&cfg.security),
        passphrase: passphrase
            .map(String::from)
            .or_else(|| cfg.content.default_passphrase.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
[security]
max_compression_ratio = 50

[sanitize]
allow_styles = false
"#,
        )
        .unwrap();
        assert_eq!(cfg.security.max_compression_ratio, Some(50));
        assert!(!cfg.sanitize.allow_styles);
        assert!(cfg.sanitize.allow_data_images);
        assert_eq!(cfg.sanitize.max_nesting_depth, 200);
        assert_eq!(cfg.content.default_passphrase, None);
    }

    #[test]
    fn limits_and_open_options() {
        let cfg = EngineConfig {
            security: SecurityConfig {
                max_file_size_mb: Some(2),
                max_file_count: Some(10),
                ..SecurityConfig::default()
            },
            content: ContentConfig {
                default_passphrase: Some("configured".into()),
            },
            ..EngineConfig::default()
        };
        let limits = security_limits_from_config(&cfg.security);
        assert_eq!(limits.max_total_size_bytes, 2 * 1024 * 1024);
        assert_eq!(limits.max_file_count, 10);
        assert_eq!(
            limits.max_compression_ratio,
            SecurityLimits::default().max_compression_ratio
        );

        assert_eq!(
            open_options_from_config(&cfg, None).passphrase.as_deref(),
            Some("configured")
        );
        assert_eq!(
            open_options_from_config(&cfg, Some("given")).passphrase.as_deref(),
            Some("given")
        );
    }

    #[test]
    fn set_value_parses_types() {
        let cfg = EngineConfig::default();
        let cfg = set_value(&cfg, "security.max_compression_ratio", "25").unwrap();
        assert_eq!(cfg.security.max_compression_ratio, Some(25));
        let cfg = set_value(&cfg, "sanitize.allow_styles", "false").unwrap();
        assert!(!cfg.sanitize.allow_styles);
        let cfg = set_value(&cfg, "content.default_passphrase", "open sesame").unwrap();
        assert_eq!(cfg.content.default_passphrase.as_deref(), Some("open sesame"));

        assert!(set_value(&cfg, "nosection", "1").is_err());
        assert!(set_value(&cfg, "bogus.key", "1").is_err());
        assert!(set_value(&cfg, "security.max_compression_ratio", "\"many\"").is_err());
        assert!(set_value(&cfg, "security.nope", "1").is_err());
    }
}
