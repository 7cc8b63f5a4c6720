//! Profile sources: JSON documents and `TINYTORRENT_*` environment overrides.

use std::env;
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::RecoveryProfile;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "TINYTORRENT_";
/// Environment variable naming a JSON profile to load before overrides.
pub const CONFIG_PATH_ENV: &str = "TINYTORRENT_CONFIG";

impl RecoveryProfile {
    /// Parse a profile from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed or names unknown fields.
    pub fn from_json_str(document: &str) -> ConfigResult<Self> {
        serde_json::from_str(document).map_err(|source| ConfigError::Parse {
            origin: "inline".to_string(),
            source,
        })
    }

    /// Load a profile from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it is not a valid profile.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let document = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&document).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Build a profile from the process environment.
    ///
    /// Starts from the file named by `TINYTORRENT_CONFIG` when set, otherwise from defaults,
    /// then applies `TINYTORRENT_*` overrides.
    ///
    /// # Errors
    ///
    /// Propagates file, parse, and override failures.
    pub fn from_env() -> ConfigResult<Self> {
        let mut profile = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        profile.apply_env(env::vars())?;
        Ok(profile)
    }

    /// Apply `TINYTORRENT_*` overrides from the supplied variables.
    ///
    /// Variables without the prefix, and the `TINYTORRENT_CONFIG` path itself, are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a numeric override does not parse or a
    /// variable names no known field.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref();
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "CONFIG" => {}
                "HOST_MODE" => value.trim().clone_into(&mut self.host_mode),
                "LOG_LEVEL" => value.trim().clone_into(&mut self.log_level),
                "LOG_FORMAT" => value.trim().clone_into(&mut self.log_format),
                "SCHEDULER_STEP_MS" => self.scheduler_step_ms = parse_u64(key, value)?,
                "BASE_INTERVAL_MS" => self.base_interval_ms = parse_u64(key, value)?,
                "SETTLE_MULTIPLIER" => self.settle_multiplier = parse_u32(key, value)?,
                "PROBE_INTERVAL_MS" => self.probe_interval_ms = parse_u64(key, value)?,
                "VOLUME_INTERVAL_MS" => self.volume_interval_ms = parse_u64(key, value)?,
                "PROMPT_RETRY_INTERVAL_MS" => {
                    self.prompt_retry_interval_ms = parse_u64(key, value)?;
                }
                "MIN_FREE_BYTES" => self.min_free_bytes = parse_u64(key, value)?,
                _ => {
                    return Err(ConfigError::InvalidField {
                        field: key.to_string(),
                        value: Some(value.to_string()),
                        reason: "unknown recovery setting",
                    });
                }
            }
        }
        Ok(())
    }
}

fn parse_u64(key: &str, value: &str) -> ConfigResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidField {
            field: key.to_string(),
            value: Some(value.to_string()),
            reason: "expected unsigned integer",
        })
}

fn parse_u32(key: &str, value: &str) -> ConfigResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidField {
            field: key.to_string(),
            value: Some(value.to_string()),
            reason: "expected unsigned integer",
        })
}
