//! Device configuration loaded from JSON or YAML.
//!
//! ```
//! use devif_engine::config::DeviceConfig;
//! use devif_engine::Modes;
//!
//! let config = DeviceConfig::from_yaml_str(
//!     "default_timeout_ms: 250\nmodes: GETSET_VERIFY | RETRY_ON_FAILURE\n",
//! )?;
//! assert_eq!(config.default_timeout_ms, 250);
//! assert!(config.modes.contains(Modes::RETRY_ON_FAILURE));
//! assert_eq!(config.retry_limit, 2);
//! # Ok::<(), devif_engine::config::ConfigError>(())
//! ```

use std::collections::BTreeMap;

use devif_model::{Error, InterfaceError};
use serde::{Deserialize, Serialize};

use crate::modes::{DEFAULT_TIMEOUT_MS, Modes};
use crate::retry::DEFAULT_RETRY_LIMIT;

/// Errors raised while loading or validating a [`DeviceConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("Invalid JSON device config: {0}")]
    Json(#[from] serde_json::Error),

    /// The YAML document could not be parsed.
    #[error("Invalid YAML device config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document parsed but a value is unusable.
    #[error("Invalid device config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(msg) => Error::new(InterfaceError::Validation(msg)),
            other => Error::new(InterfaceError::Parse(other.to_string())),
        }
    }
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Initial policy for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Timeout used when a call passes `Timeout::Default`
    pub default_timeout_ms: u32,
    /// Global policy bits
    pub modes: Modes,
    /// Per-terminal policy bits, keyed by terminal name or address (`"0x200"`)
    pub terminal_modes: BTreeMap<String, Modes>,
    /// Attempts allowed per transfer, first try included
    pub retry_limit: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            modes: Modes::empty(),
            terminal_modes: BTreeMap::new(),
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl DeviceConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::default()
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed or invalid input.
    pub fn from_json_str(s: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed or invalid input.
    pub fn from_yaml_str(s: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if serialization fails.
    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero retry limit or an empty
    /// terminal key.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "retry_limit must allow at least one attempt".into(),
            ));
        }
        if self.terminal_modes.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("empty terminal key in terminal_modes".into()));
        }
        Ok(())
    }
}

/// Builder for [`DeviceConfig`].
#[derive(Debug, Clone, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl DeviceConfigBuilder {
    /// Default timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.config.default_timeout_ms = ms;
        self
    }

    /// Enable global policy bits.
    #[must_use]
    pub fn modes(mut self, modes: Modes) -> Self {
        self.config.modes |= modes;
        self
    }

    /// Enable policy bits for one terminal.
    #[must_use]
    pub fn terminal_modes(mut self, terminal: impl Into<String>, modes: Modes) -> Self {
        *self
            .config
            .terminal_modes
            .entry(terminal.into())
            .or_default() |= modes;
        self
    }

    /// Attempts allowed per transfer.
    #[must_use]
    pub fn retry_limit(mut self, attempts: u32) -> Self {
        self.config.retry_limit = attempts;
        self
    }

    /// Validate and finish.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceConfig::validate`].
    pub fn build(self) -> ConfigResult<DeviceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.default_timeout_ms, 1000);
        assert_eq!(config.retry_limit, 2);
        assert!(config.modes.is_empty());
    }

    #[test]
    fn test_json_with_terminal_modes() -> ConfigResult<()> {
        let config = DeviceConfig::from_json_str(
            r#"{
                "modes": "STATUS_VERIFY",
                "terminal_modes": { "ctrl": "GETSET_VERIFY | RETRY_ON_FAILURE", "0x201": "CHECKSUM_VERIFY" },
                "retry_limit": 3
            }"#,
        )?;
        assert_eq!(config.modes, Modes::STATUS_VERIFY);
        assert_eq!(
            config.terminal_modes.get("ctrl"),
            Some(&(Modes::GETSET_VERIFY | Modes::RETRY_ON_FAILURE))
        );
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.default_timeout_ms, 1000);
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_fields_and_zero_limit() {
        assert!(DeviceConfig::from_json_str(r#"{"timeout": 5}"#).is_err());
        assert!(matches!(
            DeviceConfig::from_yaml_str("retry_limit: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_builder_roundtrips_through_json() -> ConfigResult<()> {
        let config = DeviceConfig::builder()
            .timeout_ms(50)
            .modes(Modes::DOUBLEGET_VERIFY)
            .terminal_modes("data", Modes::RETRY_ON_FAILURE)
            .retry_limit(4)
            .build()?;
        let json = config.to_json_string()?;
        assert_eq!(DeviceConfig::from_json_str(&json)?, config);
        Ok(())
    }

    #[test]
    fn test_config_error_maps_to_interface_family() {
        let err: Error = ConfigError::Invalid("bad".into()).into();
        assert_eq!(err.code(), -42);
    }
}
