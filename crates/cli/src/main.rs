//! `taskgraph` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: validate a workflow definition JSON file.
//! - `run`: run a workflow in-process against the memory store.
//! - `migrate`: run pending database migrations.
//! - `trigger`: start an execution in Postgres for workers to pick up.
//! - `worker`: process queued tasks from Postgres until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use db::{DbPool, ExecutionStatus, MemoryStore, PgStore};
use engine::{Engine, EngineConfig, HandlerRegistry, WorkflowDefinition};
use queue::PgBroker;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskgraph", about = "Workflow task-orchestration engine", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Engine configuration file (JSON). Flags below override it.
    #[arg(long, global = true, env = "TASKGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Drain tasks in-process (`true`) or dispatch them through a broker (`false`).
    #[arg(long, global = true, env = "TASKGRAPH_SYNC")]
    sync: Option<bool>,

    /// Default retry limit for transient node failures.
    #[arg(long, global = true, env = "TASKGRAPH_MAX_RETRIES")]
    max_retries: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow to completion in this process and print the result.
    Run {
        path: PathBuf,
        /// Trigger input (JSON).
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Start an execution in Postgres; workers run it.
    Trigger {
        path: PathBuf,
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Process queued tasks from Postgres until interrupted.
    Worker {
        /// Directory of workflow definition JSON files.
        #[arg(long)]
        definitions: PathBuf,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[arg(long, default_value_t = 10)]
        max_connections: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = engine_config(&cli)?;

    match cli.command {
        Command::Validate { path } => {
            let definition = load_definition(&path, false)?;
            let registry = HandlerRegistry::with_builtins();
            match engine::CompiledWorkflow::compile(definition, &registry) {
                Ok(compiled) => {
                    println!("Workflow is valid. Topological order: {:?}", compiled.order);
                }
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Run { path, input, actor } => {
            let definition = load_definition(&path, false)?;
            let input = parse_input(&input)?;

            let engine = Engine::new(Arc::new(MemoryStore::new()), HandlerRegistry::with_builtins(), config);
            let workflow = engine.register(definition)?;
            let snapshot = engine.run_to_completion(workflow.id(), actor, input).await?;

            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if snapshot.execution.status != ExecutionStatus::Completed {
                std::process::exit(1);
            }
        }

        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = connect(&database_url, 2).await?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }

        Command::Trigger { path, input, actor, database_url } => {
            let definition = load_definition(&path, true)?;
            let input = parse_input(&input)?;
            let pool = connect(&database_url, 2).await?;

            let engine = postgres_engine(pool, config);
            let workflow = engine.register(definition)?;
            let execution = engine.trigger(workflow.id(), actor, input).await?;

            println!("{}", execution.id);
        }

        Command::Worker { definitions, database_url, max_connections } => {
            let pool = connect(&database_url, max_connections).await?;
            let engine = postgres_engine(pool, config);

            for path in definition_files(&definitions)? {
                engine.register(load_definition(&path, true)?)?;
            }

            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    token.cancel();
                }
            });

            engine.worker()?.run(shutdown).await?;
            info!("Worker stopped");
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(sync) = cli.sync {
        config.synchronous = sync;
    }
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = max_retries;
    }
    Ok(config)
}

/// Postgres-backed engine. Always asynchronous: tasks go to the job queue.
fn postgres_engine(pool: DbPool, mut config: EngineConfig) -> Engine {
    config.synchronous = false;
    let store = Arc::new(PgStore::new(pool.clone()));
    let broker = Arc::new(PgBroker::new(pool));
    Engine::with_broker(store, HandlerRegistry::with_builtins(), config, broker)
}

async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<DbPool> {
    db::pool::create_pool(database_url, max_connections)
        .await
        .context("failed to connect to database")
}

/// Definitions shared between processes need a stable `id`; without one a
/// fresh id is generated on every load.
fn load_definition(path: &Path, require_id: bool) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let raw: Value = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    if require_id && raw.get("id").is_none() {
        bail!("{} has no `id`; workers and triggers must agree on it", path.display());
    }
    serde_json::from_value(raw).with_context(|| format!("invalid workflow definition in {}", path.display()))
}

fn definition_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parse_input(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).context("--input must be valid JSON")
}
