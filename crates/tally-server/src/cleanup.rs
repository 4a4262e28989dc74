use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use tally_db::Database;

/// Background task that purges expired sessions every `interval`.
pub async fn run_session_sweep(db: Arc<Database>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match sweep_expired(db.clone()).await {
            Ok(0) => debug!("Session sweep: nothing expired"),
            Ok(count) => info!("Session sweep: purged {} expired sessions", count),
            Err(e) => warn!("Session sweep error: {:#}", e),
        }
    }
}

async fn sweep_expired(db: Arc<Database>) -> anyhow::Result<usize> {
    let now_ms = Utc::now().timestamp_millis();
    tokio::task::spawn_blocking(move || db.purge_expired_sessions(now_ms)).await?
}
