mod app;
mod auth;
mod clock;
mod config;
mod domain;
mod error;
mod lifecycle;
mod matching;
mod notify;
mod routes;
mod routing;
mod state;
mod storage;
mod store;
mod supervisor;
#[cfg(test)]
mod testutil;

use tokio::signal;
use tracing::{info, warn};

use crate::{state::AppState, supervisor::Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "foodbridge=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = AppState::init().await?;

    if let Some(db) = &state.db {
        if let Err(e) = sqlx::migrate!("./migrations").run(db).await {
            warn!(error = %e, "migration failed; continuing");
        }
    }

    let mut supervisor = if state.config.supervisor_enabled {
        let mut s = Supervisor::new(state.supervisor_jobs());
        s.start().await?;
        Some(s)
    } else {
        info!("supervisor disabled");
        None
    };

    let app = app::build_app(state);
    app::serve(app, shutdown_signal()).await?;

    if let Some(s) = supervisor.as_mut() {
        s.shutdown().await?;
    }
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
