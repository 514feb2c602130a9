// Stand-in tools that answer with canned data, for demos and dry runs

use super::registry::{Tool, ToolRegistry};
use conductor_core::{CapabilityError, CapabilitySettings};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Tool that fakes an MCP server: known actions return canned payloads,
/// anything else echoes the call back.
pub struct SimulatedTool {
    name: String,
    description: String,
    latency: Duration,
}

impl SimulatedTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call to imitate network round trips
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn canned_response(&self, action: &str, parameters: &Value) -> Option<Value> {
        let param = |key: &str, default: &str| {
            parameters
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        let response = match (self.name.as_str(), action) {
            ("mcp__github__", "search_repositories") => json!({
                "repositories": [
                    { "name": "example-repo", "stars": 1234, "language": "Python" },
                    { "name": "another-repo", "stars": 567, "language": "JavaScript" }
                ]
            }),
            ("mcp__github__", "get_repository") => json!({
                "name": param("repo", "example"),
                "description": "Example repository",
                "language": "Python",
                "stars": 1234
            }),
            ("mcp__github__", "create_repository") => {
                let name = param("name", "new-repo");
                json!({
                    "id": 123456,
                    "name": name,
                    "full_name": format!("user/{}", name),
                    "clone_url": format!("https://github.com/user/{}.git", name)
                })
            }
            ("mcp__supabase__", "list_projects") => json!({
                "projects": [
                    { "id": "proj_1", "name": "test-project", "status": "active" },
                    { "id": "proj_2", "name": "demo-project", "status": "paused" }
                ]
            }),
            ("mcp__supabase__", "create_project") => json!({
                "id": format!("proj_{}", chrono::Utc::now().timestamp()),
                "name": param("name", "new-project"),
                "status": "provisioning"
            }),
            ("mcp__exa__", "web_search_exa") => json!({
                "results": [
                    { "title": "Best Practices 2025", "url": "https://example.com/1" },
                    { "title": "Modern Development", "url": "https://example.com/2" }
                ]
            }),
            _ => return None,
        };
        Some(response)
    }
}

#[async_trait::async_trait]
impl Tool for SimulatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, action: &str, parameters: Value) -> Result<Value, CapabilityError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        Ok(self.canned_response(action, &parameters).unwrap_or_else(|| {
            json!({
                "simulated": true,
                "tool": self.name,
                "action": action,
                "parameters": parameters,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })
        }))
    }
}

/// Registry with one simulated tool per configured capability
pub fn simulated_registry(settings: CapabilitySettings, latency: Duration) -> ToolRegistry {
    let tools: Vec<SimulatedTool> = settings
        .iter()
        .map(|config| {
            SimulatedTool::new(
                config.prefix.clone(),
                format!("Simulated {} tools", config.name),
            )
            .with_latency(latency)
        })
        .collect();

    let mut registry = ToolRegistry::new(settings);
    for tool in tools {
        registry.register(Arc::new(tool));
    }
    tracing::info!("Registered {} simulated tools", registry.list().len());
    registry
}
