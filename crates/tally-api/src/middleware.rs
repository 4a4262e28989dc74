use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use tally_gateway::gate::session_token;

use crate::auth::AppState;
use crate::error::ApiError;

/// The authenticated caller, inserted into request extensions by
/// [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    /// The session token this request was authenticated with.
    pub token: String,
}

/// Resolve the session token (cookie or Bearer header) to a user.
///
/// Uses the same resolution as the channel gate, so a token that opens the
/// channel also authorizes commands and vice versa.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(&jar, req.headers()).ok_or(ApiError::Unauthorized)?;
    let user_id = state.gate.identify(Some(token.clone())).await?;

    // Sessions cascade with their user; a dangling one counts as absent.
    let user = state
        .with_db(move |db| db.get_user_by_id(&user_id.to_string()))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(CurrentUser {
        id: user_id,
        username: user.username,
        token,
    });
    Ok(next.run(req).await)
}
