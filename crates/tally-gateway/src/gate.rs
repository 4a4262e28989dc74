//! Channel Gate: authenticates a channel upgrade before any handshake.
//!
//! The gate accepts the same session token as the HTTP API, from the
//! `tally_session` cookie or an `Authorization: Bearer` header. Requests
//! without a live session get a plain 401 and the socket is never upgraded.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::connection;
use crate::store::SessionResolver;
use crate::sync::SyncEngine;

pub const SESSION_COOKIE: &str = "tally_session";

/// Session token presented with a request, bearer header first.
pub fn session_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer
        .map(str::to_owned)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()))
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Error)]
pub enum GateRejection {
    #[error("no session credential presented")]
    MissingCredential,

    #[error("session is unknown or expired")]
    UnknownSession,

    #[error("session lookup failed: {0:#}")]
    Store(anyhow::Error),
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            Self::MissingCredential | Self::UnknownSession => StatusCode::UNAUTHORIZED.into_response(),
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

#[derive(Clone)]
pub struct ChannelGate {
    sessions: Arc<dyn SessionResolver>,
    sync: SyncEngine,
}

impl ChannelGate {
    pub fn new(sessions: Arc<dyn SessionResolver>, sync: SyncEngine) -> Self {
        Self { sessions, sync }
    }

    /// Resolves the presented token to a user id.
    pub async fn identify(&self, token: Option<String>) -> Result<Uuid, GateRejection> {
        let token = token.ok_or(GateRejection::MissingCredential)?;
        let sessions = self.sessions.clone();
        let now = self.sync.clock().now();

        let resolved = tokio::task::spawn_blocking(move || sessions.resolve(&token, now))
            .await
            .map_err(|e| GateRejection::Store(e.into()))?
            .map_err(GateRejection::Store)?;

        resolved.ok_or(GateRejection::UnknownSession)
    }
}

/// `GET /channel`. Identity is checked before the upgrade headers, so an
/// unauthenticated caller learns nothing beyond 401.
pub async fn channel_upgrade(
    State(gate): State<ChannelGate>,
    jar: CookieJar,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match gate.identify(session_token(&jar, &headers)).await {
        Ok(user_id) => user_id,
        Err(rejection) => {
            match &rejection {
                GateRejection::Store(e) => error!("Channel gate: {:#}", e),
                other => warn!("Channel upgrade refused: {}", other),
            }
            return rejection.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!("Channel upgrade accepted for {}", user_id);
    let sync = gate.sync.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, sync, user_id))
        .into_response()
}
