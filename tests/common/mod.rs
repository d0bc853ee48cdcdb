#![allow(dead_code)]

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use tenant_authz::authz::AuthzConfig;
use tenant_authz::create_app_with;
use tenant_authz::jwt::JwtConfig;
use tenant_authz::models::membership::{Membership, MembershipStatus};
use tenant_authz::models::tenant::{Tenant, TenantType};
use tenant_authz::store::SqliteStore;
use tenant_authz::utils::utc_now;

pub const SECRET: &str = "test-secret";

/// A migrated SQLite file in a temp dir. Keep the `TempDir` alive for the
/// whole test.
pub async fn setup_db() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
            .await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub fn jwt() -> JwtConfig {
    JwtConfig::new(SECRET, 1)
}

pub fn token(user_id: Uuid) -> String {
    jwt().encode(user_id, None).expect("token")
}

pub fn token_with_role(user_id: Uuid, role: &str) -> String {
    jwt().encode(user_id, Some(role)).expect("token")
}

pub async fn app(pool: &SqlitePool, config: AuthzConfig) -> Result<Router> {
    Ok(create_app_with(pool.clone(), jwt(), config).await?)
}

/// root -> acme (WL) -> bistro (BUSINESS), and root -> zed (BUSINESS).
pub struct Tree {
    pub root: Tenant,
    pub acme: Tenant,
    pub bistro: Tenant,
    pub zed: Tenant,
}

pub async fn build_tree(store: &SqliteStore) -> Result<Tree> {
    let root = Tenant::root("Platform", "root")?;
    let acme = Tenant::child_of(&root, TenantType::WhiteLabel, "Acme", "acme")?;
    let bistro = Tenant::child_of(&acme, TenantType::Business, "Bistro", "bistro")?;
    let zed = Tenant::child_of(&root, TenantType::Business, "Zed", "zed")?;
    for t in [&root, &acme, &bistro, &zed] {
        store.insert_tenant(t).await?;
    }
    Ok(Tree { root, acme, bistro, zed })
}

pub async fn add_membership(
    store: &SqliteStore,
    user_id: Uuid,
    tenant: &Tenant,
    role_id: Uuid,
    status: MembershipStatus,
) -> Result<Membership> {
    let now = utc_now();
    let membership = Membership {
        id: Uuid::new_v4(),
        user_id,
        tenant_id: tenant.id,
        role_id,
        status,
        created_at: now,
        updated_at: now,
    };
    store.insert_membership(&membership).await?;
    Ok(membership)
}

pub struct Call<'a> {
    pub method: &'a str,
    pub uri: String,
    pub token: Option<String>,
    pub tenant: Option<Uuid>,
    pub body: Option<Value>,
}

impl<'a> Call<'a> {
    pub fn new(method: &'a str, uri: impl Into<String>) -> Self {
        Self { method, uri: uri.into(), token: None, tenant: None, body: None }
    }

    pub fn as_user(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn in_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant = Some(tenant_id);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub async fn send(self, app: &Router) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(self.method).uri(&self.uri);
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        if let Some(tenant) = self.tenant {
            builder = builder.header("x-tenant-id", tenant.to_string());
        }
        let req = match self.body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok((status, value))
    }
}
