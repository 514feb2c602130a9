// Capability tools and the registry that routes invocations to them

use conductor_core::{CapabilityError, CapabilityInvoker, CapabilitySettings};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability the engine can invoke, addressed by its prefix name
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Capability name, e.g. `mcp__github__`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Accepted actions; empty accepts any action
    fn actions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute one action
    async fn call(
        &self,
        action: &str,
        parameters: serde_json::Value,
    ) -> Result<serde_json::Value, CapabilityError>;
}

/// Listing entry for a registered tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub actions: Vec<String>,
    pub enabled: bool,
}

/// Tool registry for managing available tools.
///
/// A tool whose capability settings mark it disabled is rejected before it
/// is called. Tools without settings are treated as enabled.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    settings: CapabilitySettings,
}

impl ToolRegistry {
    pub fn new(settings: CapabilitySettings) -> Self {
        Self {
            tools: HashMap::new(),
            settings,
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.settings.get(name).map_or(true, |c| c.enabled)
    }

    /// Registered tools sorted by name
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                actions: tool.actions(),
                enabled: self.is_enabled(tool.name()),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(CapabilitySettings::empty())
    }
}

#[async_trait::async_trait]
impl CapabilityInvoker for ToolRegistry {
    async fn invoke(
        &self,
        capability: &str,
        action: &str,
        parameters: serde_json::Value,
    ) -> Result<serde_json::Value, CapabilityError> {
        let tool = self
            .get(capability)
            .ok_or_else(|| CapabilityError::Unknown(capability.to_string()))?;

        if !self.is_enabled(capability) {
            return Err(CapabilityError::Disabled(capability.to_string()));
        }

        let actions = tool.actions();
        if !actions.is_empty() && !actions.iter().any(|a| a == action) {
            return Err(CapabilityError::Fatal(format!(
                "{} does not support action '{}'",
                capability, action
            )));
        }

        tracing::debug!(capability, action, "invoking tool");
        tool.call(action, parameters).await
    }
}
