use anyhow::{Context, Result};
use conductor_core::metrics::{MetricsCollector, Thresholds};
use conductor_core::{CapabilitySettings, EngineConfig, WorkflowEngine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Contents of `conductor.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Limits for capability latency and error-rate alerts
    #[serde(default)]
    pub alerts: Thresholds,

    /// Built-in capability defaults overlaid with the file's entries
    #[serde(default)]
    pub capabilities: CapabilitySettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Artificial latency added to every simulated tool call
    #[serde(default)]
    pub latency_ms: u64,
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if !config_path.exists() {
            tracing::info!("Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .context("Failed to read configuration file")?;
        let mut config: Self =
            toml::from_str(&content).context("Failed to parse configuration file")?;
        config
            .engine
            .validate()
            .context("Invalid [engine] configuration")?;

        let mut capabilities = CapabilitySettings::default();
        capabilities.merge(config.capabilities);
        config.capabilities = capabilities;

        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(config_path, content).context("Failed to write configuration file")?;
        tracing::info!("Configuration saved to {}", config_path.display());
        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let tools = conductor_mcp::simulated_registry(
            config.capabilities.clone(),
            Duration::from_millis(config.tools.latency_ms),
        );

        let metrics = MetricsCollector::with_thresholds(config.alerts.clone());
        let engine = WorkflowEngine::new(Arc::new(tools), config.engine.clone())
            .with_capabilities(config.capabilities.clone())
            .with_metrics(Arc::new(metrics));

        Self { engine }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("conductor.toml")).unwrap();

        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.capabilities.iter().count(), 8);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(
            &path,
            r#"
[engine]
default_timeout_secs = 10
retry_backoff_ms = 0

[tools]
latency_ms = 500

[capabilities.mcp__exa__]
name = "Exa"
prefix = "mcp__exa__"
timeout_secs = 90
enabled = false
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();

        assert_eq!(config.engine.default_timeout_secs, 10);
        assert_eq!(config.engine.max_retained_runs, 1000);
        assert_eq!(config.tools.latency_ms, 500);
        let exa = config.capabilities.get("mcp__exa__").unwrap();
        assert_eq!(exa.timeout_secs, 90);
        assert!(!exa.enabled);
        assert_eq!(config.capabilities.iter().count(), 8);
    }

    #[test]
    fn test_saved_update_is_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");

        let mut config = ServerConfig::load(&path).unwrap();
        config
            .capabilities
            .update("mcp__github__", "rate_limit", "250")
            .unwrap();
        config.save(&path).unwrap();

        let reloaded = ServerConfig::load(&path).unwrap();
        assert_eq!(reloaded.capabilities.get("mcp__github__").unwrap().rate_limit, 250);
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[engine\n").unwrap();

        assert!(ServerConfig::load(&path).is_err());
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[engine]\nmax_retained_runs = 0\n").unwrap();

        let err = ServerConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("max_retained_runs"));
    }

    #[test]
    fn test_alert_thresholds_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[alerts]\nresponse_time_warning_ms = 500.0\n").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.alerts.response_time_warning_ms, 500.0);
        assert_eq!(config.alerts.error_rate_critical, 0.25);
    }
}
