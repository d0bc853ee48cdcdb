use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{AuthzConfig, AuthzEngine, LegacyModeEnabled};
use crate::errors::AppError;
use crate::events::{init_event_bus, log_activity_with_context, start_activity_listener, EventBus};
use crate::jwt::{IdentityProvider, JwtConfig};
use crate::routes;
use crate::store::SqliteStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub engine: Arc<AuthzEngine>,
    pub identity: Arc<dyn IdentityProvider>,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub config: Arc<AuthzConfig>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, config: AuthzConfig, event_bus: EventBus) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let engine = Arc::new(AuthzEngine::new(store.clone(), config.clone()));
        let jwt = Arc::new(jwt);

        Self {
            pool,
            store,
            engine,
            identity: jwt.clone(),
            jwt,
            event_bus,
            config: Arc::new(config),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let authz_config = AuthzConfig::from_env()?;
    create_app_with(pool, jwt_config, authz_config).await
}

/// Builds the router from explicit configuration. Seeds the permission
/// catalog and starts the audit listener.
pub async fn create_app_with(
    pool: SqlitePool,
    jwt: JwtConfig,
    config: AuthzConfig,
) -> Result<Router, AppError> {
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt, config, event_bus);
    state.store.seed_catalog().await?;

    if state.config.legacy_mode {
        tracing::warn!(
            super_role = %state.config.super_role,
            "legacy authorization mode is ON; tenant and permission checks are bypassed"
        );
        let record = LegacyModeEnabled {
            super_role: state.config.super_role.clone(),
        };
        log_activity_with_context(&state.event_bus, "legacy_mode_enabled", None, &record, None, None);
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .merge(routes::health::routes())
        .merge(routes::authz::routes())
        .merge(routes::tenants::routes())
        .merge(routes::memberships::routes())
        .merge(routes::roles::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
