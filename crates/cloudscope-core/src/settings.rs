//! User settings
//!
//! Loaded from YAML. Every field has a default, so an empty or missing file
//! yields [`Settings::default`].
//!
//! ```yaml
//! recent_limit: 5
//! validation_timeout_secs: 30
//! default_region: eu-west-1
//! resource_cache:
//!   max_entries: 1000
//!   default_expiry_secs: 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionOptions;
use crate::error::{Error, Result};
use crate::resource_cache::ResourceCacheOptions;

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Length of the recently used credential/region lists
    pub recent_limit: usize,
    /// Seconds before a connection validation gives up
    pub validation_timeout_secs: u64,
    /// Region selected when neither the selection nor the credential names one
    pub default_region: Option<String>,
    /// Replacement partition/region metadata (JSON)
    pub region_metadata: Option<PathBuf>,
    pub resource_cache: ResourceCacheSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceCacheSettings {
    pub max_entries: usize,
    /// Expiry for resources that declare none; never expire when absent
    pub default_expiry_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        let connection = ConnectionOptions::default();
        Self {
            recent_limit: connection.recent_limit,
            validation_timeout_secs: connection.validation_timeout.as_secs(),
            default_region: None,
            region_metadata: None,
            resource_cache: ResourceCacheSettings::default(),
        }
    }
}

impl Default for ResourceCacheSettings {
    fn default() -> Self {
        let options = ResourceCacheOptions::default();
        Self {
            max_entries: options.max_entries,
            default_expiry_secs: options.default_expiry.map(|d| d.as_secs()),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| Error::parse(e.to_string()).with_help("Check the settings file syntax"))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file that must exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read file '{}': {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::parse(e.to_string()))
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            recent_limit: self.recent_limit,
            validation_timeout: self.validation_timeout(),
        }
    }

    pub fn resource_cache_options(&self) -> ResourceCacheOptions {
        ResourceCacheOptions {
            max_entries: self.resource_cache.max_entries,
            default_expiry: self.resource_cache.default_expiry_secs.map(Duration::from_secs),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.recent_limit == 0 {
            return Err(Error::parse("recent_limit must be at least 1"));
        }
        if self.validation_timeout_secs == 0 {
            return Err(Error::parse("validation_timeout_secs must be at least 1"));
        }
        if self.resource_cache.max_entries == 0 {
            return Err(Error::parse("resource_cache.max_entries must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.recent_limit, 5);
        assert_eq!(settings.validation_timeout(), Duration::from_secs(30));
        assert_eq!(settings.resource_cache.max_entries, 1000);
        assert_eq!(settings.resource_cache_options().default_expiry, None);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Settings::from_yaml("  \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
default_region: eu-west-1
resource_cache:
  default_expiry_secs: 120
"#;
        let settings = Settings::from_yaml(yaml).unwrap();

        assert_eq!(settings.default_region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.recent_limit, 5);
        assert_eq!(settings.resource_cache.max_entries, 1000);
        assert_eq!(
            settings.resource_cache_options().default_expiry,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Settings::from_yaml("recent_limt: 3").unwrap_err();
        assert!(err.to_string().contains("Parse error"));
        assert!(err.to_string().contains("recent_limt"));
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let err = Settings::from_yaml("recent_limit: 0").unwrap_err();
        assert!(err.to_string().contains("recent_limit must be at least 1"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Settings::load("/nonexistent/cloudscope/settings.yaml").unwrap_err();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_yaml_round_trip_of_connection_options() {
        let settings = Settings::from_yaml("recent_limit: 3\nvalidation_timeout_secs: 10").unwrap();
        let options = settings.connection_options();

        assert_eq!(options.recent_limit, 3);
        assert_eq!(options.validation_timeout, Duration::from_secs(10));
        assert!(settings.to_yaml().unwrap().contains("recent_limit: 3"));
    }
}
