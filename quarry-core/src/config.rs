//! Configuration types

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::artifact::CachePolicy;
use crate::error::{ConfigError, QuarryError, QuarryResult};
use crate::value::ListPosition;

/// How `remove` treats repeated entries in a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListRemoveMode {
    /// Remove the first matching entry only.
    First,
    /// Remove every matching entry.
    #[default]
    All,
}

/// Configuration for the normalized cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// How long an unreferenced entity survives before eviction.
    pub gc_grace_period: Duration,
    /// Tick of the background collector.
    pub collector_interval: Duration,
    pub list_remove_mode: ListRemoveMode,
    /// Insert position when a toggle or insert does not name one.
    pub default_list_position: ListPosition,
    /// Identifying fields per typename. Types not listed use `default_keys`.
    pub type_keys: HashMap<String, Vec<String>>,
    pub default_keys: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gc_grace_period: Duration::from_secs(30),
            collector_interval: Duration::from_secs(1),
            list_remove_mode: ListRemoveMode::All,
            default_list_position: ListPosition::Last,
            type_keys: HashMap::new(),
            default_keys: vec!["id".to_string()],
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the eviction grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.gc_grace_period = grace;
        self
    }

    /// Set the collector tick.
    pub fn with_collector_interval(mut self, interval: Duration) -> Self {
        self.collector_interval = interval;
        self
    }

    pub fn with_remove_mode(mut self, mode: ListRemoveMode) -> Self {
        self.list_remove_mode = mode;
        self
    }

    pub fn with_default_list_position(mut self, position: ListPosition) -> Self {
        self.default_list_position = position;
        self
    }

    /// Override the identifying fields of one type.
    pub fn with_type_keys<I, S>(mut self, typename: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_keys
            .insert(typename.into(), keys.into_iter().map(Into::into).collect());
        self
    }

    /// Identifying fields for `typename`.
    pub fn keys_for(&self, typename: &str) -> &[String] {
        self.type_keys
            .get(typename)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_keys)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> QuarryResult<()> {
        if self.gc_grace_period.is_zero() {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "gc_grace_period".to_string(),
                value: format!("{:?}", self.gc_grace_period),
                reason: "gc_grace_period must be positive".to_string(),
            }));
        }

        if self.collector_interval.is_zero() {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "collector_interval".to_string(),
                value: format!("{:?}", self.collector_interval),
                reason: "collector_interval must be positive".to_string(),
            }));
        }

        if self.default_keys.is_empty() {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "default_keys".to_string(),
                value: "[]".to_string(),
                reason: "at least one default key field is required".to_string(),
            }));
        }

        for (typename, keys) in &self.type_keys {
            if keys.is_empty() {
                return Err(QuarryError::Config(ConfigError::InvalidValue {
                    field: format!("type_keys.{}", typename),
                    value: "[]".to_string(),
                    reason: "a keyed type needs at least one key field".to_string(),
                }));
            }
        }

        Ok(())
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientConfig {
    /// Policy used when neither the caller nor the artifact names one.
    pub default_policy: CachePolicy,
    pub cache: CacheConfig,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_policy(mut self, policy: CachePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Parse and validate a TOML project configuration.
    pub fn from_toml_str(source: &str) -> QuarryResult<Self> {
        let file: ClientConfigFile = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QuarryResult<()> {
        self.cache.validate()
    }
}

/// On-disk shape of [`ClientConfig`]; durations are in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ClientConfigFile {
    default_policy: Option<CachePolicy>,
    cache: CacheConfigFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheConfigFile {
    gc_grace_period_ms: Option<u64>,
    collector_interval_ms: Option<u64>,
    list_remove_mode: Option<ListRemoveMode>,
    default_list_position: Option<ListPosition>,
    default_keys: Option<Vec<String>>,
    type_keys: HashMap<String, Vec<String>>,
}

impl ClientConfigFile {
    fn into_config(self) -> ClientConfig {
        let defaults = CacheConfig::default();
        let file = self.cache;
        let cache = CacheConfig {
            gc_grace_period: file
                .gc_grace_period_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.gc_grace_period),
            collector_interval: file
                .collector_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.collector_interval),
            list_remove_mode: file.list_remove_mode.unwrap_or(defaults.list_remove_mode),
            default_list_position: file
                .default_list_position
                .unwrap_or(defaults.default_list_position),
            type_keys: file.type_keys,
            default_keys: file.default_keys.unwrap_or(defaults.default_keys),
        };
        ClientConfig {
            default_policy: self.default_policy.unwrap_or_default(),
            cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_grace_period(Duration::from_secs(5))
            .with_collector_interval(Duration::from_millis(250))
            .with_remove_mode(ListRemoveMode::First)
            .with_default_list_position(ListPosition::First)
            .with_type_keys("Repository", ["owner", "name"]);

        assert_eq!(config.gc_grace_period, Duration::from_secs(5));
        assert_eq!(config.collector_interval, Duration::from_millis(250));
        assert_eq!(config.list_remove_mode, ListRemoveMode::First);
        assert_eq!(config.default_list_position, ListPosition::First);
        assert_eq!(config.keys_for("Repository"), ["owner", "name"]);
        assert_eq!(config.keys_for("User"), ["id"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_grace() {
        let config = CacheConfig::new().with_grace_period(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("gc_grace_period"));
    }

    #[test]
    fn test_validate_rejects_empty_type_keys() {
        let config = CacheConfig::new().with_type_keys("Ghost", Vec::<String>::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let source = r#"
            default_policy = "CacheAndNetwork"

            [cache]
            gc_grace_period_ms = 5000
            list_remove_mode = "first"

            [cache.type_keys]
            Repository = ["owner", "name"]
        "#;
        let config = ClientConfig::from_toml_str(source).unwrap();
        assert_eq!(config.default_policy, CachePolicy::CacheAndNetwork);
        assert_eq!(config.cache.gc_grace_period, Duration::from_millis(5000));
        assert_eq!(config.cache.list_remove_mode, ListRemoveMode::First);
        assert_eq!(config.cache.collector_interval, Duration::from_secs(1));
        assert_eq!(config.cache.keys_for("Repository"), ["owner", "name"]);
    }

    #[test]
    fn test_from_toml_empty_is_default() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        let err = ClientConfig::from_toml_str("cache_size = 10").unwrap_err();
        assert!(matches!(err, QuarryError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_toml_validates() {
        let err = ClientConfig::from_toml_str("[cache]\ngc_grace_period_ms = 0").unwrap_err();
        assert!(matches!(err, QuarryError::Config(ConfigError::InvalidValue { .. })));
    }
}
