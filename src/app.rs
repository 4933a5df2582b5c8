/// Application setup and initialization
///
/// Wires together all components: storage, AI model catalog, executor
/// registry and the workflow engine. Provides the factory used by the binary.

use crate::{
    backends::{self, AiModel, InMemoryAiModelCatalog},
    config::Config,
    error::StoreError,
    operator::Operator,
    runtime::WorkflowEngine,
    storage::{self, Scope, SqliteUnitOfWork, UnitOfWork},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::Level;

/// Initialize the tracing subscriber for the binary
pub fn init_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_max_level(level)
        .init();
}

/// Fully wired components for one tenant scope
pub struct App {
    pub config: Config,
    pub store: SqliteUnitOfWork,
    pub catalog: Arc<InMemoryAiModelCatalog>,
    pub engine: WorkflowEngine,
}

impl App {
    /// Connect the database and build the engine with every built-in backend
    pub async fn build(config: Config, scope: Scope) -> Result<Self> {
        tracing::info!("🗄️ Opening database: {}", config.database.url);
        let store = SqliteUnitOfWork::connect(&config.database.url)
            .await
            .with_context(|| format!("failed to open database {}", config.database.url))?
            .scoped(scope);

        tracing::info!("🧠 Initializing AI model catalog");
        let catalog = Arc::new(InMemoryAiModelCatalog::default());

        tracing::info!("⚙️ Initializing executor registry");
        let registry = backends::default_registry(&config.executors, catalog.clone());
        tracing::debug!("🔌 Executor modes: {:?}", registry.modes());

        tracing::info!("🚀 Initializing workflow engine");
        let uow: Arc<dyn UnitOfWork> = Arc::new(store.clone());
        let engine = WorkflowEngine::new(uow, Arc::new(registry), config.engine.clone());

        tracing::info!("✅ Application initialized successfully");
        Ok(Self {
            config,
            store,
            catalog,
            engine,
        })
    }

    /// Make models resolvable by AI model operators
    pub fn load_models(&self, models: impl IntoIterator<Item = AiModel>) {
        for model in models {
            tracing::debug!("🧠 Registered AI model '{}' ({})", model.name, model.provider);
            self.catalog.insert(model);
        }
    }

    /// Persist operator definitions in one transaction
    pub async fn save_operators(&self, operators: Vec<Operator>) -> Result<()> {
        let count = operators.len();
        storage::run(&self.store, move |repos| {
            Box::pin(async move {
                for operator in &operators {
                    repos.upsert_operator(operator).await?;
                }
                Ok::<_, StoreError>(())
            })
        })
        .await
        .context("failed to store operators")?;
        tracing::info!("📋 Stored {} operators", count);
        Ok(())
    }
}
