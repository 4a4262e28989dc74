mod cleanup;
mod config;

use std::sync::Arc;

use tracing::info;

use tally_api::auth::{AppState, AppStateInner, AuthSettings};
use tally_api::router::router;
use tally_db::Database;
use tally_gateway::clock::SystemClock;
use tally_gateway::sync::run_tick_loop;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,tally_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let cfg = Config::from_env()?;

    let db = Arc::new(Database::open(&cfg.db_path)?);
    info!("Database ready at {}", cfg.db_path.display());

    let settings = AuthSettings {
        session_ttl: cfg.session_ttl,
        secure_cookies: cfg.secure_cookies,
    };
    let state: AppState = Arc::new(AppStateInner::new(db.clone(), Arc::new(SystemClock), settings));

    tokio::spawn(run_tick_loop(state.sync.clone(), cfg.tick_interval));
    tokio::spawn(cleanup::run_session_sweep(db, cfg.session_sweep_interval));
    info!(
        "Tick every {:?}, session sweep every {:?}",
        cfg.tick_interval, cfg.session_sweep_interval
    );

    let app = router(state);

    info!("Tally server listening on {}", cfg.addr);
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
