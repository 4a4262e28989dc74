use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use tally_types::api::{StartTimerRequest, StartTimerResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::CurrentUser;

const MAX_DESCRIPTION_CHARS: usize = 200;

/// GET /api/timers — every timer the caller owns, newest first.
pub async fn list_timers(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let timers = state.commands.list_timers(user.id).await?;
    Ok(Json(timers))
}

/// POST /api/timers
pub async fn start_timer(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ApiJson(req): ApiJson<StartTimerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = req.description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest("description must not be empty".into()));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ApiError::BadRequest(format!(
            "description must be at most {MAX_DESCRIPTION_CHARS} characters"
        )));
    }

    let id = state
        .commands
        .start_timer(user.id, description.to_string())
        .await?;

    Ok((StatusCode::CREATED, Json(StartTimerResponse { id })))
}

/// POST /api/timers/{id}/stop
///
/// Unknown ids, other users' timers and already-stopped timers all get the
/// same 404, so callers cannot probe for timers they do not own.
pub async fn stop_timer(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound(format!("timer {id} not found"));

    let timer_id: Uuid = id.parse().map_err(|_| not_found())?;
    if !state.commands.stop_timer(user.id, timer_id).await? {
        return Err(not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
