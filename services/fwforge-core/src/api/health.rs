//! Liveness/readiness endpoints. The request-intake API itself is out
//! of scope (spec §1); this is only what an orchestration layer needs
//! to know the factory is alive.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "fwforge-core".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.db().health_check().await.is_ok();
    let response = Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        service: "fwforge-core".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    });

    if db_ok {
        (StatusCode::OK, response)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
