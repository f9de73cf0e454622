//! Controller entry point.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::error;
use tracing_subscriber::EnvFilter;

use controller::spawner::SubprocessJobSpawner;
use controller::{run_controller, AppState};
use hadron::kvs::RedisKvs;
use hadron::store::PgRunStore;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cfg = env_config::load_bootstrap_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    let pool = match PgPoolOptions::new()
        .max_connections(10)
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
    if let Err(e) = run_store.setup().await {
        error!(error = %e, "failed to prepare cr_runs table");
        pool.close().await;
        return std::process::ExitCode::FAILURE;
    }

    let kvs: Arc<dyn hadron::kvs::Kvs> = match RedisKvs::connect(&cfg.redis_url).await {
        Ok(kvs) => Arc::new(kvs),
        Err(e) => {
            error!(error = %e, "failed to connect to redis");
            pool.close().await;
            return std::process::ExitCode::FAILURE;
        }
    };

    let state = Arc::new(AppState::new(
        Arc::new(run_store),
        kvs.clone(),
        Arc::new(SubprocessJobSpawner::new(kvs)),
    ));

    let addr = format!("{}:{}", cfg.controller_host, cfg.controller_port);
    let result = run_controller(&addr, state).await;
    pool.close().await;
    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "controller exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}
