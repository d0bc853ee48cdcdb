use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::decision::{DecisionMode, DenyReason};
use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::authz::current_context,
        routes::tenants::create_tenant,
        routes::tenants::list_tenants,
        routes::tenants::get_tenant,
        routes::tenants::activate_tenant,
        routes::tenants::deactivate_tenant,
        routes::tenants::list_actors,
        routes::memberships::assign_membership,
        routes::memberships::list_memberships,
        routes::memberships::accept_membership,
        routes::memberships::revoke_membership,
        routes::roles::list_roles,
        routes::roles::create_role,
        routes::roles::list_effective_permissions,
        routes::roles::attach_permission,
        routes::roles::detach_permission,
        routes::roles::list_permissions,
        routes::roles::create_permission,
        routes::roles::delete_permission,
    ),
    components(
        schemas(
            models::tenant::Tenant,
            models::tenant::TenantType,
            models::tenant::TenantCreateRequest,
            models::role::Role,
            models::role::RoleScope,
            models::role::RoleCreateRequest,
            models::role::Permission,
            models::role::PermissionCreateRequest,
            models::role::RolePermission,
            models::role::AttachPermissionRequest,
            models::role::EffectivePermissions,
            models::membership::Membership,
            models::membership::MembershipStatus,
            models::membership::MembershipAssignRequest,
            routes::health::HealthResponse,
            routes::authz::ContextResponse,
            routes::tenants::ActorsResponse,
            DecisionMode,
            DenyReason,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Authorization", description = "Caller's resolved context"),
        (name = "Tenants", description = "Tenant hierarchy"),
        (name = "Memberships", description = "Actor to tenant bindings"),
        (name = "Roles", description = "Roles and their grants"),
        (name = "Permissions", description = "Permission catalog")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![Server::new(format!("http://localhost:{port}"))]);
    Ok(doc)
}

/// Serves the document at `/api-docs/openapi.json` and Swagger UI at `/docs`.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc_json = Arc::new(serde_json::to_value(&doc)?);

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Ok(Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config)))
}
