//! # mpkbox-config
//!
//! Layered configuration:
//!
//! 1. built-in defaults
//! 2. user file `<config_dir>/mpkbox/config.toml`
//! 3. project file `./.mpkbox/config.toml`
//! 4. environment (`MPKBOX_BACKEND`, `MPKBOX_LOG`, `MPKBOX_PROFILE`,
//!    `MPKBOX_HEAP_SIZE`)
//!
//! Later layers only override the keys they set.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use mpkbox_domain::{BackendPreference, DomainId};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod logging;

pub use logging::init_logging;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub domain: DomainConfig,
    pub sandbox: SandboxConfig,
    pub log: LogConfig,
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub backend: BackendPreference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Domain modules run in.
    pub domain: u32,
    /// Module heap size in bytes, rounded up to the page size.
    pub heap_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            domain: 3,
            heap_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub enabled: bool,
}

// ============================================================================
// Loading
// ============================================================================

/// `<config_dir>/mpkbox/config.toml`, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mpkbox").join("config.toml"))
}

/// `./.mpkbox/config.toml`
pub fn project_config_path() -> PathBuf {
    PathBuf::from(".mpkbox").join("config.toml")
}

impl Config {
    /// Load every layer from the standard locations and the process
    /// environment.
    pub fn load() -> Result<Self> {
        let mut paths = Vec::with_capacity(2);
        paths.extend(user_config_path());
        paths.push(project_config_path());

        let mut config = Self::load_files(&paths)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with each existing file in order. Missing files are
    /// skipped.
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged = toml::Value::try_from(Config::default()).map_err(|e| {
            ConfigError::InvalidValue {
                key: "defaults",
                value: String::new(),
                reason: e.to_string(),
            }
        })?;

        for path in paths {
            let path = path.as_ref();
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            };
            let layer: toml::Value = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), "Loaded config layer");
            merge(&mut merged, layer);
        }

        merged.try_into().map_err(|source| ConfigError::Parse {
            path: paths
                .last()
                .map(|p| p.as_ref().to_path_buf())
                .unwrap_or_default(),
            source,
        })
    }

    /// Apply `MPKBOX_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MPKBOX_BACKEND") {
            self.domain.backend = match value.trim().to_ascii_lowercase().as_str() {
                "auto" => BackendPreference::Auto,
                "soft" => BackendPreference::Soft,
                "pkru" => BackendPreference::Pkru,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MPKBOX_BACKEND",
                        value,
                        reason: "expected auto, soft or pkru".to_string(),
                    })
                }
            };
        }

        if let Some(value) = lookup("MPKBOX_LOG") {
            self.log.level = value;
        }

        if let Some(value) = lookup("MPKBOX_PROFILE") {
            self.profile.enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MPKBOX_PROFILE",
                        value,
                        reason: "expected a boolean".to_string(),
                    })
                }
            };
        }

        if let Some(value) = lookup("MPKBOX_HEAP_SIZE") {
            self.sandbox.heap_size =
                value
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: "MPKBOX_HEAP_SIZE",
                        value: value.clone(),
                        reason: e.to_string(),
                    })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match DomainId::new(self.sandbox.domain) {
            Ok(domain) if domain.is_module_domain() => {}
            Ok(domain) => {
                let reason = if domain.is_all_memory() {
                    "domain 0 is reserved for the copy window"
                } else {
                    "domain 1 is the host's own domain"
                };
                return Err(ConfigError::InvalidValue {
                    key: "sandbox.domain",
                    value: self.sandbox.domain.to_string(),
                    reason: reason.to_string(),
                });
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    key: "sandbox.domain",
                    value: self.sandbox.domain.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        if self.sandbox.heap_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sandbox.heap_size",
                value: "0".to_string(),
                reason: "heap must not be empty".to_string(),
            });
        }
        if self.sandbox.heap_size > isize::MAX as usize {
            return Err(ConfigError::InvalidValue {
                key: "sandbox.heap_size",
                value: self.sandbox.heap_size.to_string(),
                reason: "heap larger than the address space".to_string(),
            });
        }
        Ok(())
    }

    /// Render as TOML, for `mpkbox config`.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Recursively overlay `layer` onto `base`: tables merge key by key, any
/// other value replaces.
fn merge(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

// ============================================================================
// Process-wide configuration
// ============================================================================

static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Invalid configuration, using defaults");
        Config::default()
    }))
});

/// Effective process configuration, loaded on first use.
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Re-read every layer. On error the current configuration is kept.
pub fn reload() -> Result<()> {
    let fresh = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.domain.backend, BackendPreference::Auto);
        assert_eq!(config.sandbox.domain, 3);
        assert_eq!(config.sandbox.heap_size, 1048576);
        assert_eq!(config.log.level, "info");
        assert!(!config.profile.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("MPKBOX_BACKEND", "Soft"),
                ("MPKBOX_LOG", "debug"),
                ("MPKBOX_PROFILE", "1"),
                ("MPKBOX_HEAP_SIZE", "65536"),
            ]))
            .unwrap();
        assert_eq!(config.domain.backend, BackendPreference::Soft);
        assert_eq!(config.log.level, "debug");
        assert!(config.profile.enabled);
        assert_eq!(config.sandbox.heap_size, 65536);
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("MPKBOX_BACKEND", "mpx")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MPKBOX_BACKEND",
                ..
            }
        ));

        let err = config
            .apply_env(env(&[("MPKBOX_HEAP_SIZE", "big")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MPKBOX_HEAP_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_and_out_of_range_domains() {
        let mut config = Config::default();
        config.sandbox.domain = 0;
        assert!(config.validate().is_err());
        config.sandbox.domain = 16;
        assert!(config.validate().is_err());
        config.sandbox.domain = 15;
        assert!(config.validate().is_ok());
        config.sandbox.domain = 2;
        assert!(config.validate().is_ok());
        config.sandbox.heap_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_host_domain() {
        let mut config = Config::default();
        config.sandbox.domain = 1;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, reason, .. }) => {
                assert_eq!(key, "sandbox.domain");
                assert!(reason.contains("host"), "{reason}");
            }
            other => panic!("domain 1 accepted: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_unmappable_heap() {
        let mut config = Config::default();
        config.sandbox.heap_size = usize::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                key: "sandbox.heap_size",
                ..
            })
        ));
        config.sandbox.heap_size = 1 << 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        merge(&mut base, toml::from_str("[a]\ny = 3\n[b]\nz = 4\n").unwrap());
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_integer(), Some(4));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let parsed: Config = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }
}
