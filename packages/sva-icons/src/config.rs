//! Engine configuration
//!
//! All structs deserialize with `#[serde(default)]`, so a JSON document only
//! needs the keys it wants to change.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sva_traits::NodeId;

use crate::error::{IconError, IconResult};
use crate::identifier::IconId;

/// Default classification prefix
pub const DEFAULT_PREFIX: &str = "sva-icon-";
/// Default data attribute whose value names an icon
pub const DEFAULT_DATA_ATTRIBUTE: &str = "data-icon";
/// Marker set on a host node once it has been (or is being) injected
pub const PROCESSED_MARKER: &str = "data-sva-processed";
/// Marker present on a host node only while its content is being swapped
pub const INJECTING_MARKER: &str = "data-sva-injecting";
/// Marker carried by the injected content element, valued with the icon id
pub const INJECTED_MARKER: &str = "data-sva-injected";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Class prefix that marks a node as an icon placeholder (`sva-icon-plus`)
    pub prefix: String,
    /// Attribute that names an icon directly (`data-icon="plus"`). Empty disables it.
    pub data_attribute: String,
    /// Run [`IconEngine::initialize`](crate::IconEngine::initialize) from [`IconEngine::launch`](crate::IconEngine::launch)
    pub auto_initialize: bool,
    /// Keep injecting as the tree changes
    pub observe: bool,
    pub debounce_ms: u64,
    /// Scanner batch size; the scanner yields between batches
    pub batch_size: usize,
    pub fallback_icon: Option<String>,
    /// Surface final resolution failures as errors instead of records
    pub strict_mode: bool,
    /// Emit one `warn` event per failure
    pub logging: bool,
    /// Scope for scans and observation; the host root when unset
    pub root_scope: Option<NodeId>,
    /// Render cache capacity (entries)
    pub cache_capacity: usize,
    pub performance: PerformanceConfig,
    pub bundles: BundleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            data_attribute: DEFAULT_DATA_ATTRIBUTE.to_string(),
            auto_initialize: true,
            observe: true,
            debounce_ms: 50,
            batch_size: 100,
            fallback_icon: None,
            strict_mode: false,
            logging: false,
            root_scope: None,
            cache_capacity: 500,
            performance: PerformanceConfig::default(),
            bundles: BundleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration and validate it
    pub fn from_json(json: &str) -> IconResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| IconError::Config(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IconResult<()> {
        if self.prefix.is_empty() || !self.prefix.ends_with('-') {
            return Err(IconError::Config(format!(
                "prefix must be non-empty and end with '-', got {:?}",
                self.prefix
            )));
        }
        if !self
            .prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(IconError::Config(format!(
                "prefix may only contain lowercase letters, digits and '-', got {:?}",
                self.prefix
            )));
        }
        if self.batch_size == 0 {
            return Err(IconError::Config("batch_size must be at least 1".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(IconError::Config(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(fallback) = &self.fallback_icon {
            IconId::parse(fallback).map_err(|_| {
                IconError::Config(format!("fallback_icon {fallback:?} is not a valid identifier"))
            })?;
        }
        self.performance.validate()?;
        self.bundles.validate()
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// The prefix without its trailing separator (`sva-icon`), added to every
    /// injected element
    pub fn base_class(&self) -> &str {
        self.prefix.trim_end_matches('-')
    }

    /// Whether the data-attribute trigger is enabled
    pub fn data_attribute(&self) -> Option<&str> {
        (!self.data_attribute.is_empty()).then_some(self.data_attribute.as_str())
    }

    pub fn fallback(&self) -> Option<IconId> {
        self.fallback_icon
            .as_deref()
            .and_then(|id| IconId::parse(id).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Queue [`PerformanceManager::process_icon`](crate::PerformanceManager::process_icon) calls and flush them together
    pub batching: bool,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Load the owning bundle of an unregistered icon before injecting it
    pub lazy_loading: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batching: true,
            batch_size: 50,
            batch_delay_ms: 16,
            lazy_loading: true,
        }
    }
}

impl PerformanceConfig {
    fn validate(&self) -> IconResult<()> {
        if self.batch_size == 0 {
            return Err(IconError::Config(
                "performance.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Attempts per load request, including the first
    pub max_retries: u32,
    pub load_timeout_ms: u64,
    /// Pause between attempts
    pub retry_delay_ms: u64,
    /// Bundles using less than this share of their icons are underutilized
    pub underutilized_threshold: f64,
    /// Bundles using more than this share of their icons are critical
    pub critical_threshold: f64,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            load_timeout_ms: 10_000,
            retry_delay_ms: 100,
            underutilized_threshold: 0.2,
            critical_threshold: 0.7,
        }
    }
}

impl BundleConfig {
    fn validate(&self) -> IconResult<()> {
        if self.max_retries == 0 {
            return Err(IconError::Config(
                "bundles.max_retries must be at least 1".to_string(),
            ));
        }
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.underutilized_threshold)
            || !in_range(self.critical_threshold)
            || self.underutilized_threshold >= self.critical_threshold
        {
            return Err(IconError::Config(format!(
                "bundle thresholds must satisfy 0 <= underutilized ({}) < critical ({}) <= 1",
                self.underutilized_threshold, self.critical_threshold
            )));
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_class(), "sva-icon");
        assert_eq!(config.data_attribute(), Some("data-icon"));
        assert_eq!(config.debounce_delay(), Duration::from_millis(50));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "prefix": "ui-", "strict_mode": true, "bundles": { "max_retries": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.prefix, "ui-");
        assert!(config.strict_mode);
        assert_eq!(config.bundles.max_retries, 5);
        assert_eq!(config.bundles.load_timeout_ms, 10_000);
        assert_eq!(config.performance.batch_size, 50);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_prefix = EngineConfig {
            prefix: "icon".into(),
            ..Default::default()
        };
        assert!(matches!(bad_prefix.validate(), Err(IconError::Config(_))));

        let bad_fallback = EngineConfig {
            fallback_icon: Some("Not Valid".into()),
            ..Default::default()
        };
        assert!(bad_fallback.validate().is_err());

        assert!(EngineConfig::from_json(r#"{ "bundles": { "critical_threshold": 0.1 } }"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn empty_data_attribute_disables_trigger() {
        let config = EngineConfig {
            data_attribute: String::new(),
            ..Default::default()
        };
        assert_eq!(config.data_attribute(), None);
    }
}
