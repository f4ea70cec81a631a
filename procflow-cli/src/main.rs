//! procflow command line
//!
//! Validates YAML process definitions and drives instances of them through
//! an in-memory engine.
//!
//! # Usage
//!
//! ```bash
//! # Check a definition
//! procflow validate --file demos/review.yaml
//!
//! # Start an instance and work every task until it ends
//! procflow run --file demos/parallel-approval.yaml \
//!     --var amount=2500 --set approved=true --user mia
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use procflow_core::authoring::{parse_definition_yaml, validate_dto};
use procflow_core::{
    EngineConfig, InstanceView, MemoryStore, ProcessEngine, ServiceContext, TaskQuery, Value,
    Variables,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "procflow")]
#[command(version = "0.1.0")]
#[command(about = "Validate and run YAML process definitions")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a definition without running it
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Start an instance and complete its tasks until it ends
    Run {
        #[arg(short, long)]
        file: PathBuf,

        /// Start variable, `name=value` (value parsed as JSON, else a string)
        #[arg(long = "var", value_parser = parse_assignment)]
        vars: Vec<(String, Value)>,

        /// Variable passed with every task completion, `name=value`
        #[arg(long = "set", value_parser = parse_assignment)]
        completion: Vec<(String, Value)>,

        /// Claim each task as this user before completing it
        #[arg(long)]
        user: Option<String>,

        /// Engine config YAML
        #[arg(long, env = "PROCFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Give up after this many rounds of task completions
        #[arg(long, default_value_t = 50)]
        max_rounds: usize,

        /// Print the audit event log
        #[arg(long)]
        events: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => cmd_validate(&file, cli.format),
        Commands::Run {
            file,
            vars,
            completion,
            user,
            config,
            max_rounds,
            events,
        } => {
            let opts = RunOptions {
                vars: vars.into_iter().collect(),
                completion: completion.into_iter().collect(),
                user,
                max_rounds,
                events,
            };
            cmd_run(&file, config.as_deref(), opts, cli.format).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
            } else {
                eprintln!("error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

fn cmd_validate(file: &Path, format: OutputFormat) -> Result<()> {
    let source = read_file(file)?;
    let dto = parse_definition_yaml(&source).context("Parsing definition")?;
    let errors = validate_dto(&dto);

    match format {
        OutputFormat::Json => {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            println!(
                "{}",
                serde_json::json!({
                    "key": dto.key,
                    "nodes": dto.nodes.len(),
                    "edges": dto.edges.len(),
                    "valid": errors.is_empty(),
                    "errors": messages,
                })
            );
        }
        OutputFormat::Text => {
            if errors.is_empty() {
                println!(
                    "{}: ok ({} nodes, {} edges)",
                    dto.key,
                    dto.nodes.len(),
                    dto.edges.len()
                );
            } else {
                for error in &errors {
                    println!("{}", error);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} validation error(s)", errors.len()))
    }
}

struct RunOptions {
    vars: Variables,
    completion: Variables,
    user: Option<String>,
    max_rounds: usize,
    events: bool,
}

async fn cmd_run(
    file: &Path,
    config: Option<&Path>,
    opts: RunOptions,
    format: OutputFormat,
) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;

    let engine = ProcessEngine::new(Arc::new(MemoryStore::new()), config);
    engine.register_service(
        "serviceRegistry",
        Arc::new(|ctx: &ServiceContext| -> Result<Variables> {
            let text = ctx
                .variables
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(Variables::from([(
                "result".to_string(),
                Value::from(format!("Processed: {}", text)),
            )]))
        }),
    );

    let definition = engine.deploy_yaml(&read_file(file)?)?;
    let instance_id = engine.start_process(&definition.key, opts.vars).await?;

    let mut completed = 0usize;
    for _ in 0..opts.max_rounds {
        let open = engine
            .list_active_tasks(&TaskQuery::all().instance(instance_id))
            .await?;
        if open.is_empty() {
            break;
        }
        for task in open {
            if let Some(user) = &opts.user {
                engine.claim_task(task.task_id, user).await?;
            }
            engine
                .complete_task(task.task_id, opts.completion.clone())
                .await
                .with_context(|| format!("Completing task {} ({})", task.name, task.task_id))?;
            completed += 1;
        }
    }

    let view = engine.get_process_instance(instance_id).await?;
    let events = if opts.events {
        engine.events(instance_id).await?
    } else {
        Vec::new()
    };

    match format {
        OutputFormat::Json => {
            let mut out = serde_json::json!({
                "instance": view,
                "tasks_completed": completed,
            });
            if opts.events {
                out["events"] = serde_json::to_value(&events)?;
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "{} v{}: instance {} is {} after {} task(s)",
                definition.key,
                definition.version,
                instance_id,
                view.status(),
                completed
            );
            if let InstanceView::Historic(h) = &view {
                if let Some(failure) = &h.failure {
                    println!("  failed at {}: {}", failure.activity_id, failure.message);
                }
            }
            for (name, value) in view.variables().snapshot() {
                println!("  {} = {}", name, value);
            }
            for (seq, event) in &events {
                println!("  #{:<4} {:?}", seq, event);
            }
        }
    }
    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))
}

/// `name=value`; the value is JSON when it parses as JSON, else a string.
fn parse_assignment(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {:?}", raw))?;
    if name.is_empty() {
        return Err(format!("empty variable name in {:?}", raw));
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((name.to_string(), value))
}
