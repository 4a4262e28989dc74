use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand_core::OsRng;
use tracing::info;
use uuid::Uuid;

use tally_db::Database;
use tally_gateway::clock::Clock;
use tally_gateway::commands::TimerCommands;
use tally_gateway::gate::{ChannelGate, SESSION_COOKIE};
use tally_gateway::registry::InMemoryRegistry;
use tally_gateway::sync::SyncEngine;
use tally_types::api::{LoginRequest, MeResponse, SessionResponse, SignupRequest};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::CurrentUser;

pub type AppState = Arc<AppStateInner>;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_ttl: chrono::Duration,
    pub secure_cookies: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::days(30),
            secure_cookies: false,
        }
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sync: SyncEngine,
    pub commands: TimerCommands,
    pub gate: ChannelGate,
    pub settings: AuthSettings,
}

impl AppStateInner {
    /// Wires the core around `db`: one registry, one sync engine, and the
    /// gate and commands that share them.
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, settings: AuthSettings) -> Self {
        let sync = SyncEngine::new(Arc::new(InMemoryRegistry::new()), db.clone(), clock);
        Self {
            commands: TimerCommands::new(sync.clone()),
            gate: ChannelGate::new(db.clone(), sync.clone()),
            db,
            sync,
            settings,
        }
    }

    /// Runs a store call on the blocking pool; the connection mutex is never
    /// held on an async worker.
    pub async fn with_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let value = tokio::task::spawn_blocking(move || f(db.as_ref())).await??;
        Ok(value)
    }
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let username_chars = req.username.chars().count();
    if !(3..=32).contains(&username_chars) {
        return Err(ApiError::BadRequest("username must be 3-32 characters".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    // Check if username is taken
    let username = req.username.clone();
    let existing = state
        .with_db(move |db| db.get_user_by_username(&username))
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict(format!("username '{}' is taken", req.username)));
    }

    // Hash password with Argon2id
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
    })
    .await??;

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    state
        .with_db(move |db| db.create_user(&user_id.to_string(), &username, &password_hash))
        .await?;
    info!("New user {} ({})", req.username, user_id);

    let token = issue_session(&state, user_id).await?;
    let jar = jar.add(session_cookie(token.clone(), &state.settings));

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            user_id,
            username: req.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username;
    let user = state
        .with_db(move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    // Verify password
    let stored = user.password.clone();
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored)
            .map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;
        Ok::<_, anyhow::Error>(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
        )
    })
    .await??;

    if !verified {
        return Err(ApiError::InvalidCredentials);
    }

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = issue_session(&state, user_id).await?;
    let jar = jar.add(session_cookie(token.clone(), &state.settings));

    Ok((
        jar,
        Json(SessionResponse {
            user_id,
            username: user.username,
            token,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let token = user.token.clone();
    state.with_db(move |db| db.revoke_session(&token)).await?;
    info!("{} logged out", user.username);

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.id,
        username: user.username,
    })
}

async fn issue_session(state: &AppStateInner, user_id: Uuid) -> Result<String, ApiError> {
    let ttl = state.settings.session_ttl;
    let expires = state
        .sync
        .clock()
        .now()
        .checked_add_signed(ttl)
        .ok_or_else(|| anyhow::anyhow!("session lifetime {} overflows the clock", ttl))?;

    state
        .with_db(move |db| db.issue_session(&user_id.to_string(), expires.timestamp_millis()))
        .await
}

fn session_cookie(token: String, settings: &AuthSettings) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.secure_cookies)
        .build()
}
