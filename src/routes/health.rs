use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    /// "engine" or "legacy".
    pub authz_mode: &'static str,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let authz_mode = if state.engine.is_legacy() { "legacy" } else { "engine" };

    match state.store.ping().await {
        Ok(()) => Ok(Json(HealthResponse { status: "ok", db_ok: true, db_error: None, authz_mode })),
        Err(e) => Ok(Json(HealthResponse {
            status: "ok",
            db_ok: false,
            db_error: Some(e.to_string()),
            authz_mode,
        })),
    }
}
