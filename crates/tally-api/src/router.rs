use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use tally_gateway::gate;

use crate::auth::{self, AppState};
use crate::middleware::require_session;
use crate::timers;

/// The full HTTP surface: auth, timer commands and the push channel.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/me", get(auth::me))
        .route("/api/timers", get(timers::list_timers).post(timers::start_timer))
        .route("/api/timers/{id}/stop", post(timers::stop_timer))
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .with_state(state.clone());

    let channel_route = Router::new()
        .route("/channel", get(gate::channel_upgrade))
        .with_state(state.gate.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(channel_route)
        .layer(TraceLayer::new_for_http())
}
