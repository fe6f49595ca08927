//! Minimal liveness/readiness HTTP surface. No client-facing routes —
//! the request-intake API is an external collaborator (spec §1).

mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/", health::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
