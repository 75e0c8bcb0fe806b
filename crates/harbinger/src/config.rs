//! Preloader configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Visibility-triggered preload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Enable preloading of links that stay visible
    pub enabled: bool,
    /// Fraction of the element area that must be visible (0.0 - 1.0)
    pub threshold: f32,
    /// Dwell time before a visible link becomes eligible (ms)
    pub delay_ms: u64,
    /// Containers scoping the link scan
    pub containers: Vec<String>,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.2,
            delay_ms: 500,
            containers: vec!["body".to_string()],
        }
    }
}

impl VisibilityConfig {
    /// Dwell time as a duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Configuration for the preloader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Maximum concurrent preloads
    pub concurrency_limit: usize,
    /// Preload the current resource when mounted
    pub initial_resource_preload: bool,
    /// Preload links on hover
    pub hover_trigger_enabled: bool,
    /// Visibility-triggered preloading
    pub visibility: VisibilityConfig,
    /// Keys (exact or prefix) that are never preloaded
    pub ignore: Vec<String>,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: crate::DEFAULT_CONCURRENCY_LIMIT,
            initial_resource_preload: true,
            hover_trigger_enabled: true,
            visibility: VisibilityConfig::default(),
            ignore: Vec::new(),
        }
    }
}

impl PreloadConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PreloadConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".into(),
            ));
        }

        let threshold = self.visibility.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "visibility.threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }

        if self.visibility.enabled && self.visibility.containers.is_empty() {
            return Err(ConfigError::Invalid(
                "visibility.containers must not be empty when visibility is enabled".into(),
            ));
        }

        Ok(())
    }

    /// Set the concurrency limit
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Enable visibility preloading with the given dwell time
    pub fn with_visibility(mut self, threshold: f32, delay_ms: u64) -> Self {
        self.visibility.enabled = true;
        self.visibility.threshold = threshold;
        self.visibility.delay_ms = delay_ms;
        self
    }

    /// Add an ignore rule
    pub fn with_ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignore.push(pattern.into());
        self
    }
}
