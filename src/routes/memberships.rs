use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::keys;
use crate::authz::{AuthorizeOptions, RequestContext};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditContext};
use crate::models::membership::{Membership, MembershipAssignRequest, MembershipStatus};
use crate::store::AuthzStore;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tenants/:tenant_id/memberships",
            get(list_memberships).post(assign_membership),
        )
        .route("/memberships/:membership_id/accept", post(accept_membership))
        .route("/memberships/:membership_id/revoke", post(revoke_membership))
}

async fn load_membership(state: &AppState, id: Uuid) -> AppResult<Membership> {
    state
        .store
        .membership(id)
        .await?
        .ok_or_else(|| AppError::not_found("membership not found"))
}

/// Assign an actor a role inside a tenant
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/memberships",
    tag = "Memberships",
    params(("tenant_id" = Uuid, Path, description = "Tenant to assign into")),
    request_body = MembershipAssignRequest,
    responses(
        (status = 201, description = "Membership created", body = Membership),
        (status = 400, description = "Role cannot be held in this tenant"),
        (status = 403, description = "Tenant outside caller's organization, or role grants keys the caller lacks"),
        (status = 409, description = "Actor already has an active membership here"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_membership(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<MembershipAssignRequest>,
) -> AppResult<(StatusCode, Json<Membership>)> {
    let auth = state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::MEMBERSHIPS_MANAGE).target_tenant(tenant_id),
        )
        .await
        .into_result()?;

    let tenant = state
        .store
        .tenant(tenant_id)
        .await?
        .ok_or_else(|| AppError::not_found("tenant not found"))?;
    let role = state
        .store
        .role(req.role_id)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;

    if !role.scope.is_compatible_with(tenant.tenant_type) {
        return Err(AppError::bad_request(format!(
            "a {} role cannot be held in a {} tenant",
            role.scope.as_str(),
            tenant.tenant_type.as_str()
        )));
    }
    if let Some(owner) = role.tenant_id {
        let lineage = state.store.lineage(&tenant).await?;
        if !lineage.iter().any(|t| t.id == owner) {
            return Err(AppError::bad_request("custom role belongs to another organization"));
        }
    }
    // Assigning a role hands out its whole grant set.
    let grants = state.store.role_permission_keys(role.id).await?;
    auth.ensure_grantable(grants.iter().map(String::as_str))?;

    let now = utc_now();
    let membership = Membership {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        tenant_id,
        role_id: role.id,
        status: if req.activate { MembershipStatus::Active } else { MembershipStatus::Invited },
        created_at: now,
        updated_at: now,
    };
    state.store.insert_membership(&membership).await?;
    state.engine.invalidate_actor(membership.user_id);

    log_activity_with_context(
        &state.event_bus,
        "assigned",
        auth.actor_id,
        &membership,
        None,
        Some(AuditContext::from_headers(&headers).with_tenant(auth.tenant_id)),
    );

    Ok((StatusCode::CREATED, Json(membership)))
}

#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/memberships",
    tag = "Memberships",
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Memberships of the tenant", body = Vec<Membership>)),
    security(("bearerAuth" = []))
)]
pub async fn list_memberships(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<Vec<Membership>>> {
    state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::MEMBERSHIPS_VIEW).target_tenant(tenant_id),
        )
        .await
        .into_result()?;

    Ok(Json(state.store.memberships_in_tenant(tenant_id).await?))
}

/// Accept an invitation. Runs without a tenant context: the invitee has no
/// active membership in the tenant yet.
#[utoipa::path(
    post,
    path = "/memberships/{membership_id}/accept",
    tag = "Memberships",
    params(("membership_id" = Uuid, Path, description = "Membership id")),
    responses(
        (status = 200, description = "Membership activated", body = Membership),
        (status = 404, description = "No pending invitation for the caller"),
        (status = 409, description = "Already active in this tenant"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn accept_membership(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(membership_id): Path<Uuid>,
) -> AppResult<Json<Membership>> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::new().skip_tenant_resolution())
        .await
        .into_result()?;
    let actor_id = auth.require_actor()?;

    let before = load_membership(&state, membership_id).await?;
    // Someone else's invitation is reported as missing.
    if before.user_id != actor_id || before.status != MembershipStatus::Invited {
        return Err(AppError::not_found("no pending invitation"));
    }

    state
        .store
        .set_membership_status(membership_id, MembershipStatus::Active)
        .await?;
    state.engine.invalidate_actor(actor_id);

    let after = Membership {
        status: MembershipStatus::Active,
        updated_at: utc_now(),
        ..before.clone()
    };
    log_activity_with_context(
        &state.event_bus,
        "accepted",
        Some(actor_id),
        &after,
        Some(&before),
        Some(AuditContext::from_headers(&headers).with_tenant(Some(after.tenant_id))),
    );

    Ok(Json(after))
}

#[utoipa::path(
    post,
    path = "/memberships/{membership_id}/revoke",
    tag = "Memberships",
    params(("membership_id" = Uuid, Path, description = "Membership id")),
    responses(
        (status = 200, description = "Membership revoked", body = Membership),
        (status = 403, description = "Membership unknown or outside caller's organization"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_membership(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(membership_id): Path<Uuid>,
) -> AppResult<Json<Membership>> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::MEMBERSHIPS_MANAGE))
        .await
        .into_result()?;

    let Some(before) = state.store.membership(membership_id).await? else {
        return Err(auth.out_of_reach());
    };
    let auth = state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::permission(keys::MEMBERSHIPS_MANAGE).target_tenant(before.tenant_id),
        )
        .await
        .into_result()?;

    if before.status == MembershipStatus::Revoked {
        return Ok(Json(before));
    }

    state
        .store
        .set_membership_status(membership_id, MembershipStatus::Revoked)
        .await?;
    state.engine.invalidate_actor(before.user_id);

    let after = Membership {
        status: MembershipStatus::Revoked,
        updated_at: utc_now(),
        ..before.clone()
    };
    tracing::info!(
        membership_id = %membership_id,
        user_id = %after.user_id,
        actor_id = ?auth.actor_id,
        "membership revoked"
    );
    log_activity_with_context(
        &state.event_bus,
        "revoked",
        auth.actor_id,
        &after,
        Some(&before),
        Some(AuditContext::from_headers(&headers).with_tenant(auth.tenant_id)),
    );

    Ok(Json(after))
}
