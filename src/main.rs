/// Opflow command line
///
/// Runs a workflow definition against a SQLite store, inspects the task
/// context and progress of past runs, and health-checks operator definitions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use opflow::{
    app::{init_tracing, App},
    backends::AiModel,
    config::Config,
    storage::{self, Scope},
    Operator, Task, Workflow,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::Level;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "opflow")]
#[command(about = "Layered DAG runner for operator pipelines")]
#[command(version)]
struct Cli {
    /// Database URL
    #[arg(long, global = true, env = "OPFLOW_DB_URL")]
    db: Option<String>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow once and print the final task
    Run {
        /// Workflow definition (JSON)
        #[arg(long)]
        workflow: PathBuf,

        /// Operator definitions (JSON array)
        #[arg(long)]
        operators: PathBuf,

        /// AI model definitions (JSON array)
        #[arg(long)]
        models: Option<PathBuf>,

        /// Task input parameters as a JSON object
        #[arg(long)]
        params: Option<String>,

        #[arg(long)]
        asset_id: Option<Uuid>,

        #[arg(long)]
        tenant_id: Option<Uuid>,
    },

    /// Print the task context with its patch journal and snapshots
    Context {
        task_id: Uuid,

        #[arg(long, default_value_t = 100)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Print a task's progress
    Progress { task_id: Uuid },

    /// Check that every operator's active version is runnable
    Health {
        #[arg(long)]
        operators: PathBuf,

        /// AI model definitions (JSON array)
        #[arg(long)]
        models: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let mut config = Config::default();
    if let Some(db) = cli.db {
        config.database.url = db;
    }

    match cli.command {
        Commands::Run {
            workflow,
            operators,
            models,
            params,
            asset_id,
            tenant_id,
        } => run(config, &workflow, &operators, models.as_deref(), params.as_deref(), asset_id, tenant_id).await,
        Commands::Context { task_id, limit, offset } => show_context(config, task_id, limit, offset).await,
        Commands::Progress { task_id } => show_progress(config, task_id).await,
        Commands::Health { operators, models } => health(config, &operators, models.as_deref()).await,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

async fn read_models(path: Option<&Path>) -> Result<Vec<AiModel>> {
    match path {
        Some(path) => read_json(path).await,
        None => Ok(Vec::new()),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(
    config: Config,
    workflow_path: &Path,
    operators_path: &Path,
    models_path: Option<&Path>,
    params: Option<&str>,
    asset_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
) -> Result<()> {
    let workflow: Workflow = read_json(workflow_path).await?;
    let operators: Vec<Operator> = read_json(operators_path).await?;
    let models = read_models(models_path).await?;
    let input_params: Map<String, Value> = match params {
        Some(raw) => serde_json::from_str(raw).context("--params must be a JSON object")?,
        None => Map::new(),
    };

    let scope = tenant_id.map(Scope::tenant).unwrap_or_default();
    let app = App::build(config, scope).await?;
    app.load_models(models);
    app.save_operators(operators).await?;

    let mut task = Task::new(workflow.id, tenant_id, input_params);
    if let Some(asset_id) = asset_id {
        task = task.with_asset(asset_id);
    }
    let pending = task.clone();
    storage::run(&app.store, move |repos| {
        Box::pin(async move { repos.insert_task(&pending).await })
    })
    .await
    .context("failed to store task")?;
    tracing::info!("📝 Created task {} for workflow '{}'", task.id, workflow.code);

    let engine = app.engine.clone();
    let task_id = task.id;
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, cancelling task {}", task_id);
            if let Err(err) = engine.cancel(task_id) {
                tracing::warn!("⚠️ Could not cancel task {}: {}", task_id, err);
            }
        }
    });

    let result = app.engine.execute(&workflow, &mut task).await;
    interrupt.abort();

    print_json(&task)?;
    result.with_context(|| format!("task {} did not succeed", task.id))
}

async fn show_context(config: Config, task_id: Uuid, limit: i64, offset: i64) -> Result<()> {
    let app = App::build(config, Scope::system()).await?;
    let contexts = app.engine.contexts();

    let state = contexts.get_state(task_id).await?;
    let page = contexts.list_patches(task_id, limit, offset).await?;
    let snapshots = contexts.list_snapshots(task_id).await?;

    print_json(&json!({
        "state": state,
        "patches": page.patches,
        "total_patches": page.total,
        "snapshots": snapshots,
    }))
}

async fn show_progress(config: Config, task_id: Uuid) -> Result<()> {
    let app = App::build(config, Scope::system()).await?;
    let progress = app.engine.get_progress(task_id).await?;
    println!("{}", progress);
    Ok(())
}

async fn health(config: Config, operators_path: &Path, models_path: Option<&Path>) -> Result<()> {
    let operators: Vec<Operator> = read_json(operators_path).await?;
    let models = read_models(models_path).await?;
    let app = App::build(config, Scope::system()).await?;
    app.load_models(models);

    let mut unhealthy = 0;
    for operator in &operators {
        let Some(version) = &operator.active_version else {
            println!("❌ {}: no active version", operator.code);
            unhealthy += 1;
            continue;
        };
        match app.engine.executors().health_check(version).await {
            Ok(()) => println!("✅ {} ({} {})", operator.code, version.exec_mode, version.version),
            Err(err) => {
                println!("❌ {} ({} {}): {}", operator.code, version.exec_mode, version.version, err);
                unhealthy += 1;
            }
        }
    }

    if unhealthy > 0 {
        bail!("{} of {} operators are unhealthy", unhealthy, operators.len());
    }
    Ok(())
}
