//! Hadron controller: accepts CR submissions, persists run metadata,
//! spawns one worker per CR, and serves the real-time event feed plus the
//! resume/nudge/intervention endpoints.

pub mod app;
pub mod routes;
pub mod spawner;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use app::AppState;

/// Serves the controller API on an existing listener. Used by tests (bind
/// to 127.0.0.1:0 first).
pub async fn run_controller_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("controller listening on http://{addr}");
    axum::serve(listener, app::router(state)).await?;
    Ok(())
}

/// Binds and serves the controller API.
pub async fn run_controller(
    addr: &str,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    run_controller_on_listener(listener, state).await
}
