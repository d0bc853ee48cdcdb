//! Tenant lifecycle. Paths are fixed at creation; only the `active` flag ever
//! changes afterwards.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::keys;
use crate::authz::{AuthContext, AuthorizeOptions, RequestContext};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditContext};
use crate::models::tenant::{Tenant, TenantCreateRequest};
use crate::store::AuthzStore;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/:tenant_id", get(get_tenant))
        .route("/tenants/:tenant_id/activate", post(activate_tenant))
        .route("/tenants/:tenant_id/deactivate", post(deactivate_tenant))
        .route("/tenants/:tenant_id/actors", get(list_actors))
}

async fn load_tenant(state: &AppState, id: Uuid) -> AppResult<Tenant> {
    state
        .store
        .tenant(id)
        .await?
        .ok_or_else(|| AppError::not_found("tenant not found"))
}

fn audit(headers: &HeaderMap, auth: &AuthContext) -> Option<AuditContext> {
    Some(AuditContext::from_headers(headers).with_tenant(auth.tenant_id))
}

/// Create a tenant under an existing parent
#[utoipa::path(
    post,
    path = "/tenants",
    tag = "Tenants",
    request_body = TenantCreateRequest,
    responses(
        (status = 201, description = "Tenant created", body = Tenant),
        (status = 400, description = "Type not allowed under parent, or bad slug"),
        (status = 403, description = "Parent outside caller's organization"),
        (status = 409, description = "Slug already in use"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Json(req): Json<TenantCreateRequest>,
) -> AppResult<(StatusCode, Json<Tenant>)> {
    let auth = state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::TENANTS_CREATE).target_tenant(req.parent_id),
        )
        .await
        .into_result()?;

    let parent = load_tenant(&state, req.parent_id).await?;
    if !parent.active {
        return Err(AppError::conflict("parent tenant is inactive"));
    }

    let raw_slug = req.slug.as_deref().unwrap_or(&req.name);
    let tenant = Tenant::child_of(&parent, req.tenant_type, &req.name, raw_slug)
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    state.store.insert_tenant(&tenant).await?;

    tracing::info!(
        tenant_id = %tenant.id,
        path = %tenant.path,
        actor_id = ?auth.actor_id,
        "tenant created"
    );
    log_activity_with_context(&state.event_bus, "created", auth.actor_id, &tenant, None, audit(&headers, &auth));

    Ok((StatusCode::CREATED, Json(tenant)))
}

/// The caller's tenant and everything beneath it
#[utoipa::path(
    get,
    path = "/tenants",
    tag = "Tenants",
    responses((status = 200, description = "Subtree of the caller's tenant", body = Vec<Tenant>)),
    security(("bearerAuth" = []))
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<Vec<Tenant>>> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::TENANTS_VIEW))
        .await
        .into_result()?;

    // Legacy decisions may carry no tenant; they see the whole tree.
    let root = match auth.tenant_id {
        Some(id) => load_tenant(&state, id).await?,
        None => state
            .store
            .platform_root()
            .await?
            .ok_or_else(|| AppError::not_found("platform root has not been bootstrapped"))?,
    };

    let tenants = state.store.subtree(&root.path).await?;
    Ok(Json(tenants))
}

#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}",
    tag = "Tenants",
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant", body = Tenant),
        (status = 403, description = "Outside caller's organization"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<Tenant>> {
    state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::TENANTS_VIEW).target_tenant(tenant_id),
        )
        .await
        .into_result()?;

    Ok(Json(load_tenant(&state, tenant_id).await?))
}

/// Reactivate a tenant. The check runs against the parent, which must itself
/// be active and inside the caller's organization.
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/activate",
    tag = "Tenants",
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant activated", body = Tenant),
        (status = 403, description = "Tenant unknown or outside caller's organization"),
        (status = 409, description = "The platform root cannot be toggled"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn activate_tenant(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<Tenant>> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::TENANTS_MANAGE))
        .await
        .into_result()?;

    // An inactive tenant fails the hierarchy check itself, so reach is checked
    // against its parent. The root has no parent and is checked as itself.
    let Some(tenant) = state.store.tenant(tenant_id).await? else {
        return Err(auth.out_of_reach());
    };
    let target = tenant.parent_id.unwrap_or(tenant.id);
    let auth = state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::TENANTS_MANAGE).target_tenant(target),
        )
        .await
        .into_result()?;
    if tenant.parent_id.is_none() {
        return Err(AppError::conflict("the platform root cannot be toggled"));
    }

    set_active(&state, &headers, &auth, tenant, true).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/deactivate",
    tag = "Tenants",
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant deactivated", body = Tenant),
        (status = 409, description = "Cannot deactivate the caller's own tenant or the root"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn deactivate_tenant(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<Tenant>> {
    let auth = state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::TENANTS_MANAGE).target_tenant(tenant_id),
        )
        .await
        .into_result()?;

    if auth.tenant_id == Some(tenant_id) {
        return Err(AppError::conflict("cannot deactivate your own tenant"));
    }
    let tenant = load_tenant(&state, tenant_id).await?;
    if tenant.parent_id.is_none() {
        return Err(AppError::conflict("the platform root cannot be toggled"));
    }

    set_active(&state, &headers, &auth, tenant, false).await.map(Json)
}

async fn set_active(
    state: &AppState,
    headers: &HeaderMap,
    auth: &AuthContext,
    before: Tenant,
    active: bool,
) -> AppResult<Tenant> {
    if before.active == active {
        return Ok(before);
    }

    if !state.store.set_tenant_active(before.id, active).await? {
        return Err(AppError::not_found("tenant not found"));
    }
    // Every cached lineage below this tenant is now stale.
    state.engine.invalidate_all();

    let after = Tenant { active, ..before.clone() };
    let action = if active { "activated" } else { "deactivated" };
    tracing::info!(tenant_id = %after.id, action, actor_id = ?auth.actor_id, "tenant status changed");
    log_activity_with_context(
        &state.event_bus,
        action,
        auth.actor_id,
        &after,
        Some(&before),
        audit(headers, auth),
    );

    Ok(after)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActorsResponse {
    pub tenant_id: Uuid,
    /// Actors whose records are visible under the tenant. Empty means none.
    pub actor_ids: Vec<Uuid>,
}

/// Expand a tenant into the actors whose data it may see
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/actors",
    tag = "Tenants",
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Actor scope", body = ActorsResponse)),
    security(("bearerAuth" = []))
)]
pub async fn list_actors(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<ActorsResponse>> {
    state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::TENANTS_VIEW).target_tenant(tenant_id),
        )
        .await
        .into_result()?;

    let scope = state.engine.expand_to_actor_ids(tenant_id).await?;
    Ok(Json(ActorsResponse {
        tenant_id,
        actor_ids: scope.iter().copied().collect(),
    }))
}
