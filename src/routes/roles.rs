//! Roles and the permission catalog.
//!
//! System roles are immutable. Every edit of a custom role's permission links
//! bumps its version and drops its cached grant set.

use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::{keys, PermissionKey};
use crate::authz::{AuthContext, AuthorizeOptions, RequestContext};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditContext};
use crate::models::role::{
    AttachPermissionRequest, EffectivePermissions, Permission, PermissionCreateRequest, Role,
    RoleCreateRequest, RolePermission, RoleScope,
};
use crate::models::tenant::TenantType;
use crate::store::AuthzStore;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/:role_id/permissions",
            get(list_effective_permissions).post(attach_permission),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(detach_permission),
        )
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:permission_id", delete(delete_permission))
}

fn audit(headers: &HeaderMap, auth: &AuthContext) -> Option<AuditContext> {
    Some(AuditContext::from_headers(headers).with_tenant(auth.tenant_id))
}

/// Tenant types that can sit at or below a tenant of type `owner`.
fn reachable_types(owner: TenantType) -> Vec<TenantType> {
    let mut out = vec![owner];
    let mut frontier = vec![owner];
    while let Some(parent) = frontier.pop() {
        for candidate in [TenantType::WhiteLabel, TenantType::Business, TenantType::Location] {
            if candidate.allowed_parents().contains(&parent) && !out.contains(&candidate) {
                out.push(candidate);
                frontier.push(candidate);
            }
        }
    }
    out
}

fn scope_usable_under(owner: TenantType, scope: RoleScope) -> bool {
    reachable_types(owner)
        .into_iter()
        .any(|t| scope.is_compatible_with(t))
}

async fn load_role(state: &AppState, id: Uuid) -> AppResult<Role> {
    state
        .store
        .role(id)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))
}

/// Checks the caller may manage roles, then that the custom role's owner lies
/// in the caller's subtree.
async fn authorize_role_edit(
    state: &AppState,
    ctx: &RequestContext,
    role_id: Uuid,
) -> AppResult<(AuthContext, Role)> {
    let auth = state
        .engine
        .authorize(ctx, &AuthorizeOptions::permission(keys::ROLES_MANAGE))
        .await
        .into_result()?;

    let Some(role) = state.store.role(role_id).await? else {
        return Err(auth.out_of_reach());
    };
    let Some(owner) = role.tenant_id else {
        return Err(AppError::conflict("system roles cannot be modified"));
    };

    let auth = state
        .engine
        .authorize(ctx, &AuthorizeOptions::permission(keys::ROLES_MANAGE).target_tenant(owner))
        .await
        .into_result()?;
    Ok((auth, role))
}

// =============================================================================
// ROLES
// =============================================================================

/// System roles plus custom roles usable at or below the caller's tenant
#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    responses((status = 200, description = "Roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<Vec<Role>>> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::ROLES_VIEW))
        .await
        .into_result()?;

    let mut owners = BTreeSet::new();
    if let Some(tenant_id) = auth.tenant_id {
        if let Some(tenant) = state.store.tenant(tenant_id).await? {
            for t in state.store.lineage(&tenant).await? {
                owners.insert(t.id);
            }
            for t in state.store.subtree(&tenant.path).await? {
                owners.insert(t.id);
            }
        }
    }

    let owners: Vec<Uuid> = owners.into_iter().collect();
    Ok(Json(state.store.roles_visible_to(&owners).await?))
}

/// Create a custom role owned by the caller's tenant
#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Unknown permission key or unusable scope"),
        (status = 403, description = "Granting permissions the caller lacks"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::ROLES_MANAGE))
        .await
        .into_result()?;
    let owner_id = auth.require_tenant()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("role name must not be empty"));
    }

    let owner = state
        .store
        .tenant(owner_id)
        .await?
        .ok_or_else(|| AppError::not_found("tenant not found"))?;
    if !scope_usable_under(owner.tenant_type, req.scope) {
        return Err(AppError::bad_request(format!(
            "a {} tenant cannot own a {} role",
            owner.tenant_type.as_str(),
            req.scope.as_str()
        )));
    }

    let mut grants: Vec<Permission> = Vec::with_capacity(req.permissions.len());
    for raw in &req.permissions {
        let key = PermissionKey::parse(raw).map_err(|e| AppError::bad_request(e.to_string()))?;
        let permission = state
            .store
            .permission_by_key(key.as_str())
            .await?
            .ok_or_else(|| AppError::bad_request(format!("unknown permission key {key}")))?;
        if !grants.iter().any(|p| p.id == permission.id) {
            grants.push(permission);
        }
    }
    auth.ensure_grantable(grants.iter().map(|p| p.key.as_str()))?;

    let now = utc_now();
    let role = Role {
        id: Uuid::new_v4(),
        name: name.to_string(),
        scope: req.scope,
        is_system: false,
        tenant_id: Some(owner_id),
        version: 1,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_role(&role, &grants).await?;

    log_activity_with_context(&state.event_bus, "created", auth.actor_id, &role, None, audit(&headers, &auth));

    Ok((StatusCode::CREATED, Json(role)))
}

/// Display-only view of a role's grants, always read from the store
#[utoipa::path(
    get,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissions),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_effective_permissions(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::ROLES_VIEW))
        .await
        .into_result()?;

    let role = load_role(&state, role_id).await?;
    let permissions = state
        .engine
        .list_effective_permissions(role_id)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;

    Ok(Json(EffectivePermissions {
        role_id,
        version: role.version,
        permissions: permissions.iter().map(str::to_string).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = AttachPermissionRequest,
    responses(
        (status = 201, description = "Permission attached", body = RolePermission),
        (status = 200, description = "Already attached", body = RolePermission),
        (status = 403, description = "Role unknown, outside caller's organization, or key not held"),
        (status = 409, description = "System roles are immutable"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn attach_permission(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AttachPermissionRequest>,
) -> AppResult<(StatusCode, Json<RolePermission>)> {
    let (auth, role) = authorize_role_edit(&state, &ctx, role_id).await?;

    let key = PermissionKey::parse(&req.key).map_err(|e| AppError::bad_request(e.to_string()))?;
    let permission = state
        .store
        .permission_by_key(key.as_str())
        .await?
        .ok_or_else(|| AppError::not_found(format!("unknown permission key {key}")))?;
    auth.ensure_grantable([permission.key.as_str()])?;

    let link = RolePermission {
        role_id: role.id,
        permission_id: permission.id,
        key: permission.key.clone(),
        created_at: utc_now(),
    };

    if !state.store.attach_permission(role.id, permission.id).await? {
        return Ok((StatusCode::OK, Json(link)));
    }
    state.engine.invalidate_role(role.id);

    log_activity_with_context(&state.event_bus, "attached", auth.actor_id, &link, None, audit(&headers, &auth));

    Ok((StatusCode::CREATED, Json(link)))
}

#[utoipa::path(
    delete,
    path = "/roles/{role_id}/permissions/{permission_id}",
    tag = "Roles",
    params(
        ("role_id" = Uuid, Path, description = "Role id"),
        ("permission_id" = Uuid, Path, description = "Permission id"),
    ),
    responses(
        (status = 204, description = "Permission detached"),
        (status = 404, description = "Link not found"),
        (status = 409, description = "System roles are immutable"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn detach_permission(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let (auth, role) = authorize_role_edit(&state, &ctx, role_id).await?;

    let permission = state
        .store
        .permission(permission_id)
        .await?
        .ok_or_else(|| AppError::not_found("permission not found"))?;

    if !state.store.detach_permission(role.id, permission.id).await? {
        return Err(AppError::not_found("permission is not attached to this role"));
    }
    state.engine.invalidate_role(role.id);

    let link = RolePermission {
        role_id: role.id,
        permission_id: permission.id,
        key: permission.key,
        created_at: utc_now(),
    };
    log_activity_with_context(&state.event_bus, "detached", auth.actor_id, &link, None, audit(&headers, &auth));

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION CATALOG
// =============================================================================

/// Public list of every permission key
#[utoipa::path(
    get,
    path = "/permissions",
    tag = "Permissions",
    responses((status = 200, description = "Permission catalog", body = Vec<Permission>))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<Vec<Permission>>> {
    state
        .engine
        .authorize(
            &ctx,
            &AuthorizeOptions::new().allow_without_auth().skip_tenant_resolution(),
        )
        .await
        .into_result()?;

    Ok(Json(state.store.list_permissions().await?))
}

#[utoipa::path(
    post,
    path = "/permissions",
    tag = "Permissions",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 400, description = "Key is not module:action"),
        (status = 409, description = "Key already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Json(req): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::PERMISSIONS_MANAGE))
        .await
        .into_result()?;

    let key = PermissionKey::parse(&req.key).map_err(|e| AppError::bad_request(e.to_string()))?;
    let permission = Permission {
        id: Uuid::new_v4(),
        key: key.into(),
        description: req.description.filter(|d| !d.trim().is_empty()),
        created_at: utc_now(),
    };
    state.store.insert_permission(&permission).await?;

    log_activity_with_context(&state.event_bus, "created", auth.actor_id, &permission, None, audit(&headers, &auth));

    Ok((StatusCode::CREATED, Json(permission)))
}

/// Delete a permission no role references
#[utoipa::path(
    delete,
    path = "/permissions/{permission_id}",
    tag = "Permissions",
    params(("permission_id" = Uuid, Path, description = "Permission id")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 409, description = "Permission is referenced by a role"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let auth = state
        .engine
        .authorize(&ctx, &AuthorizeOptions::permission(keys::PERMISSIONS_MANAGE))
        .await
        .into_result()?;

    let permission = state
        .store
        .permission(permission_id)
        .await?
        .ok_or_else(|| AppError::not_found("permission not found"))?;

    if !state.store.delete_permission(permission_id).await? {
        return Err(AppError::not_found("permission not found"));
    }

    log_activity_with_context(&state.event_bus, "deleted", auth.actor_id, &permission, None, audit(&headers, &auth));

    Ok(StatusCode::NO_CONTENT)
}
