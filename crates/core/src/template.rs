// Workflow catalog and the built-in templates

use crate::types::{ExecutionMode, StepCondition, StepDefinition, WorkflowDefinition};
use crate::workflow::resolver::ParameterResolver;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Source of workflow definitions the engine can run by id
pub trait WorkflowCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<WorkflowDefinition>;

    /// Every definition, sorted by id
    fn definitions(&self) -> Vec<WorkflowDefinition>;
}

/// Listing entry for a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub mode: ExecutionMode,
    pub steps_count: usize,
    /// Sum of the step timeouts, in seconds. Steps without a timeout count
    /// as zero, so summarise definitions after their limits are filled in.
    pub estimated_duration_secs: u64,
    /// Input variables referenced by step parameters
    pub variables: Vec<String>,
}

impl TemplateSummary {
    pub fn from_definition(definition: &WorkflowDefinition) -> Self {
        let step_ids: BTreeSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
        let variables: BTreeSet<String> = definition
            .steps
            .iter()
            .flat_map(|s| ParameterResolver::placeholders(&s.parameters))
            .filter(|name| !step_ids.contains(name.as_str()))
            .collect();

        Self {
            id: definition.id.to_string(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            tags: definition.tags.clone(),
            mode: definition.mode,
            steps_count: definition.steps.len(),
            estimated_duration_secs: definition
                .steps
                .iter()
                .map(|s| s.timeout_secs.unwrap_or_default())
                .sum(),
            variables: variables.into_iter().collect(),
        }
    }
}

/// In-memory catalog keyed by template id
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, WorkflowDefinition>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in templates
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for definition in [
            github_to_supabase(),
            health_check(),
            project_init(),
            code_quality(),
            fullstack_pipeline(),
        ] {
            registry.register(definition);
        }
        registry
    }

    /// Add a template, replacing any with the same id
    pub fn register(&mut self, definition: WorkflowDefinition) {
        tracing::debug!("Registered workflow template {}", definition.id);
        self.templates.insert(definition.id.to_string(), definition);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl WorkflowCatalog for TemplateRegistry {
    fn get(&self, id: &str) -> Option<WorkflowDefinition> {
        self.templates.get(id).cloned()
    }

    fn definitions(&self) -> Vec<WorkflowDefinition> {
        self.templates.values().cloned().collect()
    }
}

fn github_to_supabase() -> WorkflowDefinition {
    WorkflowDefinition::new("github_to_supabase", "GitHub to Supabase Setup")
        .with_description("Analyze a GitHub repository, then provision a matching Supabase project")
        .with_tags(["github", "supabase", "setup", "analysis"])
        .step(
            StepDefinition::new("search_repo", "mcp__github__", "search_repositories")
                .with_parameters(json!({ "query": "{repo_query}" }))
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("analyze_repo", "mcp__github__", "get_repository")
                .with_parameters(json!({ "owner": "{repo_owner}", "repo": "{repo_name}" }))
                .depends_on(["search_repo"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("get_file_structure", "mcp__github__", "get_file_contents")
                .with_parameters(json!({
                    "owner": "{repo_owner}",
                    "repo": "{repo_name}",
                    "path": "package.json"
                }))
                .depends_on(["analyze_repo"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("list_supabase_projects", "mcp__supabase__", "list_projects")
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("analyze_tech_stack", "mcp__exa__", "web_search_exa")
                .with_parameters(json!({ "query": "{detected_framework} supabase integration guide" }))
                .depends_on(["get_file_structure"])
                .with_timeout(45),
        )
        .step(
            StepDefinition::new("create_supabase_project", "mcp__supabase__", "create_project")
                .with_parameters(json!({
                    "name": "{project_name}",
                    "organization_id": "{org_id}",
                    "region": "us-east-1"
                }))
                .depends_on(["list_supabase_projects", "analyze_tech_stack"])
                .with_condition(StepCondition::ApprovalRequired {
                    message: "Create a new Supabase project?".to_string(),
                })
                .with_timeout(120),
        )
}

fn health_check() -> WorkflowDefinition {
    WorkflowDefinition::new("health_check", "Comprehensive Health Check")
        .with_description("Check the status of every connected service")
        .with_tags(["monitoring", "health", "status"])
        .step(
            StepDefinition::new("check_github_status", "mcp__github__", "search_repositories")
                .with_parameters(json!({ "query": "user:{username}", "per_page": 1 }))
                .with_timeout(15),
        )
        .step(
            StepDefinition::new("check_supabase_projects", "mcp__supabase__", "list_projects")
                .with_timeout(30),
        )
        .step(StepDefinition::new("check_ide_status", "mcp__ide__", "getDiagnostics").with_timeout(10))
        .step(
            StepDefinition::new("check_browser_automation", "mcp__playwright__", "browser_snapshot")
                .with_timeout(20),
        )
        .step(
            StepDefinition::new(
                "system_resource_check",
                "mcp__wonderwhy-er-desktop-commander__",
                "get_usage_stats",
            )
            .with_timeout(15),
        )
        .step(
            StepDefinition::new("generate_health_report", "mcp__taskmanager__", "request_planning")
                .with_parameters(json!({
                    "originalRequest": "Generate comprehensive health report",
                    "tasks": [
                        { "title": "Compile service status", "description": "Aggregate all service statuses" },
                        { "title": "Identify issues", "description": "Highlight any problems found" },
                        { "title": "Generate recommendations", "description": "Provide actionable recommendations" }
                    ]
                }))
                .depends_on(["check_github_status", "check_supabase_projects", "check_ide_status"]),
        )
}

fn project_init() -> WorkflowDefinition {
    let commit_file = |path: &str, content: &str, message: &str| {
        json!({
            "owner": "{github_username}",
            "repo": "{project_name}",
            "path": path,
            "content": content,
            "message": message,
            "branch": "main"
        })
    };

    WorkflowDefinition::new("project_init", "Project Initialization")
        .with_description("Create the repository, local workspace, database and CI for a new project")
        .with_tags(["initialization", "setup", "automation"])
        .step(
            StepDefinition::new("create_github_repo", "mcp__github__", "create_repository")
                .with_parameters(json!({
                    "name": "{project_name}",
                    "description": "{project_description}",
                    "private": false,
                    "autoInit": true
                }))
                .with_timeout(30),
        )
        .step(
            StepDefinition::new(
                "setup_project_structure",
                "mcp__wonderwhy-er-desktop-commander__",
                "create_directory",
            )
            .with_parameters(json!({ "path": "{local_project_path}" }))
            .with_timeout(10),
        )
        .step(
            StepDefinition::new("init_package_json", "mcp__github__", "create_or_update_file")
                .with_parameters(commit_file(
                    "package.json",
                    "{package_json_content}",
                    "feat: Initialize package.json",
                ))
                .depends_on(["create_github_repo"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("create_supabase_project", "mcp__supabase__", "create_project")
                .with_parameters(json!({
                    "name": "{project_name}-db",
                    "organization_id": "{org_id}",
                    "region": "us-east-1"
                }))
                .with_timeout(120),
        )
        .step(
            StepDefinition::new("setup_ci_cd", "mcp__github__", "create_or_update_file")
                .with_parameters(commit_file(
                    ".github/workflows/ci.yml",
                    "{ci_workflow_content}",
                    "feat: Add CI/CD workflow",
                ))
                .depends_on(["init_package_json"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("create_readme", "mcp__github__", "create_or_update_file")
                .with_parameters(commit_file(
                    "README.md",
                    "{readme_content}",
                    "docs: Add comprehensive README",
                ))
                .depends_on(["setup_ci_cd"])
                .with_timeout(30),
        )
}

fn code_quality() -> WorkflowDefinition {
    WorkflowDefinition::new("code_quality", "Code Quality Check")
        .with_description("Review a repository's code and plan improvements")
        .with_tags(["quality", "analysis", "improvement"])
        .step(
            StepDefinition::new("get_repo_files", "mcp__github__", "search_code")
                .with_parameters(json!({
                    "q": "repo:{owner}/{repo} extension:py OR extension:js OR extension:ts"
                }))
                .with_timeout(45),
        )
        .step(
            StepDefinition::new("analyze_code_structure", "mcp__ide__", "getDiagnostics")
                .depends_on(["get_repo_files"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("search_best_practices", "mcp__exa__", "web_search_exa")
                .with_parameters(json!({ "query": "{language} code quality best practices 2025" }))
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("get_documentation", "mcp__context7__", "get_library_docs")
                .with_parameters(json!({ "context7CompatibleLibraryID": "{main_framework}" }))
                .with_timeout(45),
        )
        .step(
            StepDefinition::new("create_improvement_tasks", "mcp__taskmanager__", "request_planning")
                .with_parameters(json!({
                    "originalRequest": "Improve code quality based on analysis",
                    "tasks": "{improvement_tasks}"
                }))
                .depends_on(["analyze_code_structure", "search_best_practices"])
                .with_timeout(30),
        )
}

/// Design fans out to backend and frontend scaffolding, which join again in
/// the integration tests before the security review.
fn fullstack_pipeline() -> WorkflowDefinition {
    WorkflowDefinition::new("fullstack_pipeline", "Full-stack Development Pipeline")
        .with_description("Design, scaffold backend and frontend, then test and audit the result")
        .with_mode(ExecutionMode::Pipeline)
        .with_tags(["development", "pipeline", "fullstack"])
        .step(
            StepDefinition::new("design", "mcp__taskmanager__", "request_planning")
                .with_parameters(json!({
                    "originalRequest": "Design the system architecture for {project_name}"
                }))
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("backend", "mcp__github__", "create_repository")
                .with_parameters(json!({ "name": "{project_name}-api", "private": true }))
                .depends_on(["design"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("implementation", "mcp__wonderwhy-er-desktop-commander__", "create_directory")
                .with_parameters(json!({ "path": "{local_project_path}" }))
                .depends_on(["backend"])
                .with_timeout(10),
        )
        .step(
            StepDefinition::new("frontend", "mcp__github__", "create_repository")
                .with_parameters(json!({ "name": "{project_name}-web", "private": true }))
                .depends_on(["design"])
                .with_timeout(30),
        )
        .step(
            StepDefinition::new("integration_tests", "mcp__playwright__", "browser_snapshot")
                .depends_on(["implementation", "frontend"])
                .with_timeout(120),
        )
        .step(
            StepDefinition::new("security_audit", "mcp__exa__", "web_search_exa")
                .with_parameters(json!({ "query": "{project_name} security review checklist" }))
                .depends_on(["integration_tests"])
                .with_timeout(45),
        )
        .flow("design", "backend,frontend")
        .flow("backend", "implementation")
        .flow("implementation", "integration_tests")
        .flow("frontend", "integration_tests")
        .flow("integration_tests", "security_audit")
}
