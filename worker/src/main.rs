//! Worker entry point.
//!
//! Usage: `hadron-worker --cr-id CR-123`

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::error;
use tracing_subscriber::EnvFilter;

use hadron::agent::{
    AnthropicApi, BackendRegistry, GeminiApi, ProviderChain, ProviderChainConfig, ToolUseAgent,
};
use hadron::kvs::RedisKvs;
use hadron::memory::PgCheckpointSaver;
use hadron::store::PgRunStore;
use worker::{run_worker, WorkerDeps};

#[derive(Parser, Debug)]
#[command(name = "hadron-worker", about = "Hadron pipeline worker")]
struct Args {
    /// Change Request id to process.
    #[arg(long = "cr-id")]
    cr_id: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let cfg = env_config::load_bootstrap_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.postgres_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect to postgres");
            return std::process::ExitCode::FAILURE;
        }
    };

    let run_store = PgRunStore::new(pool.clone());
    let checkpointer = PgCheckpointSaver::new(pool.clone());
    let setup = async {
        run_store.setup().await.map_err(|e| e.to_string())?;
        checkpointer.setup().await.map_err(|e| e.to_string())
    };
    if let Err(e) = setup.await {
        error!(error = %e, "failed to prepare database tables");
        pool.close().await;
        return std::process::ExitCode::FAILURE;
    }

    let kvs = match RedisKvs::connect(&cfg.redis_url).await {
        Ok(kvs) => kvs,
        Err(e) => {
            error!(error = %e, "failed to connect to redis");
            pool.close().await;
            return std::process::ExitCode::FAILURE;
        }
    };

    let mut registry = BackendRegistry::new();
    if !cfg.anthropic_api_key.is_empty() {
        registry.register(Arc::new(ToolUseAgent::new(Arc::new(AnthropicApi::new(
            cfg.anthropic_api_key.clone(),
        )))));
    }
    if !cfg.gemini_api_key.is_empty() {
        registry.register(Arc::new(ToolUseAgent::new(Arc::new(GeminiApi::new(
            cfg.gemini_api_key.clone(),
        )))));
    }
    let chain = ProviderChain::new(registry, ProviderChainConfig::default());

    let deps = WorkerDeps {
        run_store: Arc::new(run_store),
        kvs: Arc::new(kvs),
        agents: Arc::new(chain),
        checkpointer: Arc::new(checkpointer),
        workspace_dir: cfg.workspace_dir.clone(),
    };

    let code = match run_worker(&args.cr_id, deps).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(cr_id = %args.cr_id, error = %e, "worker exited with error");
            std::process::ExitCode::FAILURE
        }
    };
    pool.close().await;
    code
}
