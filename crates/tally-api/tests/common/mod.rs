#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tally_api::auth::{AppState, AppStateInner, AuthSettings};
use tally_api::router::router;
use tally_db::Database;
use tally_gateway::clock::{Clock, ManualClock};

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let state = Arc::new(AppStateInner::new(db, clock.clone(), AuthSettings::default()));
        Self { state, clock }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Creates a user directly in the store and returns (id, session token).
    pub fn user(&self, username: &str) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.state
            .db
            .create_user(&id.to_string(), username, "not-a-real-hash")
            .unwrap();
        let expires = self.clock.now() + Duration::days(1);
        let token = self
            .state
            .db
            .issue_session(&id.to_string(), expires.timestamp_millis())
            .unwrap();
        (id, token)
    }

    /// Serves the router on an ephemeral local port.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

pub fn cookie(token: &str) -> String {
    format!("tally_session={token}")
}
