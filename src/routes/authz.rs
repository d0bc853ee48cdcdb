//! Introspection of the caller's own authorization context.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::decision::DecisionMode;
use crate::authz::{AuthorizeOptions, RequestContext};
use crate::errors::AppResult;

pub fn routes() -> Router<AppState> {
    Router::new().route("/authz/context", get(current_context))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextResponse {
    pub actor_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub permissions: Vec<String>,
    pub mode: DecisionMode,
}

/// Resolves the caller's tenant and role without requiring any permission.
#[utoipa::path(
    get,
    path = "/authz/context",
    tag = "Authorization",
    params(
        ("x-tenant-id" = Option<String>, Header, description = "Tenant to act within")
    ),
    responses(
        (status = 200, description = "Resolved context", body = ContextResponse),
        (status = 401, description = "No identity"),
        (status = 403, description = "No tenant context"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn current_context(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<ContextResponse>> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::new())
        .await
        .into_result()?;

    Ok(Json(ContextResponse {
        actor_id: auth.actor_id,
        tenant_id: auth.tenant_id,
        role_id: auth.role_id,
        permissions: auth.permissions.iter().map(str::to_string).collect(),
        mode: auth.mode,
    }))
}
