use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::{ExecutionMode, RunStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod api;
mod config;

use config::{AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Capability workflow engine - run DAGs of tool calls", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "conductor.toml", env = "CONDUCTOR_CONFIG", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Run a workflow template and print its final status
    Run {
        /// Template id, see `conductor templates`
        template: String,

        /// Input variable as key=value; values that parse as JSON keep their type
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, serde_json::Value)>,

        /// Override the template's execution mode
        #[arg(long)]
        mode: Option<ExecutionMode>,
    },

    /// List the workflow templates
    Templates,

    /// Inspect or change capability settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Check capability settings for problems
    Validate,
    /// Change one capability setting and save the file
    Set {
        prefix: String,
        key: String,
        value: String,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "conductor_server=info,conductor_core=info,conductor_mcp=info,tower_http=debug"
                        .into()
                }),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    match cli.command {
        Command::Serve { port, host } => {
            let addr = format!("{}:{}", host, port);
            tracing::info!("Starting Conductor API server on {}", addr);
            api::serve(&addr, config).await?;
        }
        Command::Run {
            template,
            params,
            mode,
        } => run_template(&config, &template, params, mode).await?,
        Command::Templates => {
            let state = AppState::new(&config);
            for template in state.engine.templates() {
                println!(
                    "{:<20} {:<10} {:>2} steps  ~{}s  {}",
                    template.id,
                    format!("{:?}", template.mode).to_lowercase(),
                    template.steps_count,
                    template.estimated_duration_secs,
                    template.name
                );
                if !template.variables.is_empty() {
                    println!("{:<20} variables: {}", "", template.variables.join(", "));
                }
            }
        }
        Command::Config { action } => configure(config, &cli.config, action)?,
    }

    Ok(())
}

async fn run_template(
    config: &ServerConfig,
    template_id: &str,
    params: Vec<(String, serde_json::Value)>,
    mode: Option<ExecutionMode>,
) -> Result<()> {
    let state = AppState::new(config);
    let mut definition = state.engine.definition(template_id)?;
    if let Some(mode) = mode {
        definition.mode = mode;
    }

    let variables: HashMap<String, serde_json::Value> = params.into_iter().collect();
    let run = state.engine.execute(&definition, variables).await?;
    state.engine.shutdown().await?;

    let report = serde_json::to_string_pretty(&run.status_report())
        .context("Failed to serialize run report")?;
    println!("{}", report);

    if run.status != RunStatus::Completed {
        anyhow::bail!("run {} finished with status {}", run.id, run.status);
    }
    Ok(())
}

fn configure(mut config: ServerConfig, path: &Path, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            let content =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", content);
        }
        ConfigCommand::Validate => {
            let report = config.capabilities.validate();
            println!("{} capabilities, {} enabled", report.total, report.enabled);
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for issue in &report.issues {
                println!("issue: {}", issue);
            }
            if !report.is_ok() {
                anyhow::bail!("{} configuration issue(s) found", report.issues.len());
            }
        }
        ConfigCommand::Set { prefix, key, value } => {
            config.capabilities.update(&prefix, &key, &value)?;
            config.save(path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("repo_query=rust").unwrap(),
            ("repo_query".to_string(), serde_json::json!("rust"))
        );
        assert_eq!(
            parse_key_val("per_page=5").unwrap(),
            ("per_page".to_string(), serde_json::json!(5))
        );
        assert!(parse_key_val("missing-separator").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "conductor",
            "run",
            "fullstack_pipeline",
            "-p",
            "project_name=demo",
            "--mode",
            "sequential",
        ])
        .unwrap();

        match cli.command {
            Command::Run { template, params, mode } => {
                assert_eq!(template, "fullstack_pipeline");
                assert_eq!(params.len(), 1);
                assert_eq!(mode, Some(ExecutionMode::Sequential));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
