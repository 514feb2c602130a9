// Engine and per-capability settings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Settings for the workflow engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for steps that do not declare one
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Retry budget applied to template steps when none is given
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Base delay before a retry, doubled on every further attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Finished runs kept for status queries
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_max_retained_runs() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retained_runs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_retained_runs".to_string(),
                value: "0".to_string(),
                reason: "finished runs must be retained for status queries".to_string(),
            });
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "default_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "every step would time out".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before the given attempt (attempt 1 has none)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.retry_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u64.saturating_pow(attempt - 2);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Settings for one external capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub name: String,
    pub prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub retry_count: u32,
    /// Requests per minute
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub auth_settings: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_rate_limit() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

impl CapabilityConfig {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            timeout_secs: default_timeout_secs(),
            retry_count: default_max_retries(),
            rate_limit: default_rate_limit(),
            auth_required: false,
            auth_settings: BTreeMap::new(),
            enabled: true,
        }
    }

    fn with(mut self, timeout_secs: u64, rate_limit: u32, auth: &[(&str, &str)]) -> Self {
        self.timeout_secs = timeout_secs;
        self.rate_limit = rate_limit;
        self.auth_required = !auth.is_empty();
        self.auth_settings = auth
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// Set a named field from its string form. Unknown keys are rejected.
    pub fn update(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "name" => self.name = value.to_string(),
            "timeout_secs" | "timeout" => self.timeout_secs = parse_value(key, value)?,
            "retry_count" => self.retry_count = parse_value(key, value)?,
            "rate_limit" => self.rate_limit = parse_value(key, value)?,
            "auth_required" => self.auth_required = parse_value(key, value)?,
            "enabled" => self.enabled = parse_value(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Capability settings keyed by prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySettings {
    capabilities: BTreeMap<String, CapabilityConfig>,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        let defaults = [
            CapabilityConfig::new("Supabase", "mcp__supabase__").with(
                45,
                50,
                &[("api_key_required", "true"), ("project_ref_required", "true")],
            ),
            CapabilityConfig::new("GitHub", "mcp__github__").with(
                30,
                100,
                &[("token_required", "true"), ("scope", "repo,user")],
            ),
            CapabilityConfig::new("Context7", "mcp__context7__").with(60, 20, &[]),
            CapabilityConfig::new("Exa", "mcp__exa__").with(45, 30, &[("api_key_required", "true")]),
            CapabilityConfig::new("IDE Integration", "mcp__ide__").with(15, 200, &[]),
            CapabilityConfig::new("Playwright", "mcp__playwright__").with(120, 10, &[]),
            CapabilityConfig::new("Task Manager", "mcp__taskmanager__").with(30, 50, &[]),
            CapabilityConfig::new("Desktop Commander", "mcp__wonderwhy-er-desktop-commander__")
                .with(30, 100, &[]),
        ];

        Self {
            capabilities: defaults
                .into_iter()
                .map(|c| (c.prefix.clone(), c))
                .collect(),
        }
    }
}

impl CapabilitySettings {
    pub fn empty() -> Self {
        Self {
            capabilities: BTreeMap::new(),
        }
    }

    pub fn get(&self, prefix: &str) -> Option<&CapabilityConfig> {
        self.capabilities.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityConfig> {
        self.capabilities.values()
    }

    /// Insert or replace a capability; entries from a config file override defaults
    pub fn upsert(&mut self, config: CapabilityConfig) {
        self.capabilities.insert(config.prefix.clone(), config);
    }

    pub fn merge(&mut self, other: CapabilitySettings) {
        for (_, config) in other.capabilities {
            self.upsert(config);
        }
    }

    pub fn update(&mut self, prefix: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        let config = self
            .capabilities
            .get_mut(prefix)
            .ok_or_else(|| ConfigError::UnknownCapability(prefix.to_string()))?;
        config.update(key, value)?;
        tracing::info!(prefix, key, value, "capability setting updated");
        Ok(())
    }

    pub fn set_enabled(&mut self, prefix: &str, enabled: bool) -> Result<(), ConfigError> {
        self.update(prefix, "enabled", if enabled { "true" } else { "false" })
    }

    pub fn enabled(&self) -> impl Iterator<Item = &CapabilityConfig> {
        self.capabilities.values().filter(|c| c.enabled)
    }

    /// Report misconfigurations
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport {
            total: self.capabilities.len(),
            enabled: self.enabled().count(),
            ..Default::default()
        };

        for (prefix, config) in &self.capabilities {
            if config.auth_required && config.auth_settings.is_empty() {
                report
                    .issues
                    .push(format!("{}: authentication required but no auth settings", prefix));
            }

            if config.timeout_secs < 5 {
                report
                    .warnings
                    .push(format!("{}: timeout is very short ({}s)", prefix, config.timeout_secs));
            } else if config.timeout_secs > 300 {
                report
                    .warnings
                    .push(format!("{}: timeout is very long ({}s)", prefix, config.timeout_secs));
            }

            if config.rate_limit < 1 {
                report
                    .issues
                    .push(format!("{}: rate limit too low ({})", prefix, config.rate_limit));
            }
        }

        report
    }
}

/// Result of [`CapabilitySettings::validate`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total: usize,
    pub enabled: usize,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities() {
        let settings = CapabilitySettings::default();
        assert_eq!(settings.iter().count(), 8);

        let github = settings.get("mcp__github__").unwrap();
        assert_eq!(github.timeout_secs, 30);
        assert!(github.auth_required);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_update_known_keys() {
        let mut settings = CapabilitySettings::default();
        settings.update("mcp__exa__", "timeout", "90").unwrap();
        settings.update("mcp__exa__", "enabled", "false").unwrap();

        let exa = settings.get("mcp__exa__").unwrap();
        assert_eq!(exa.timeout_secs, 90);
        assert!(!exa.enabled);
        assert_eq!(settings.enabled().count(), 7);
    }

    #[test]
    fn test_update_rejects_unknown_key() {
        let mut settings = CapabilitySettings::default();
        let err = settings
            .update("mcp__exa__", "endpoint_url", "http://localhost")
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownKey("endpoint_url".to_string()));
    }

    #[test]
    fn test_update_rejects_bad_value_and_unknown_capability() {
        let mut settings = CapabilitySettings::default();
        assert!(matches!(
            settings.update("mcp__exa__", "rate_limit", "lots"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            settings.update("mcp__nope__", "enabled", "true"),
            Err(ConfigError::UnknownCapability("mcp__nope__".to_string()))
        );
    }

    #[test]
    fn test_validation_report() {
        let mut settings = CapabilitySettings::empty();
        let mut broken = CapabilityConfig::new("Broken", "mcp__broken__");
        broken.auth_required = true;
        broken.rate_limit = 0;
        broken.timeout_secs = 2;
        settings.upsert(broken);

        let report = settings.validate();
        assert!(!report.is_ok());
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = EngineConfig {
            retry_backoff_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.backoff_for(1), Duration::ZERO);
        assert_eq!(config.backoff_for(2), Duration::from_millis(100));
        assert_eq!(config.backoff_for(4), Duration::from_millis(400));
    }

    #[test]
    fn test_engine_config_rejects_zero_retention() {
        assert!(EngineConfig::default().validate().is_ok());

        let config = EngineConfig {
            max_retained_runs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "max_retained_runs"
        ));
    }
}
