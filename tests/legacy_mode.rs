mod common;

use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::{build_tree, setup_db, token, token_with_role, Call};
use tenant_authz::authz::AuthzConfig;
use tenant_authz::store::SqliteStore;

fn legacy() -> AuthzConfig {
    AuthzConfig {
        legacy_mode: true,
        ..AuthzConfig::default()
    }
}

#[tokio::test]
async fn super_role_bypasses_tenant_checks() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, legacy()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    // No memberships anywhere.
    let admin = token_with_role(Uuid::new_v4(), "SUPER_ADMIN");

    let (status, body) = Call::new("GET", "/authz/context").as_user(&admin).send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "legacy");

    let (status, body) = Call::new("GET", "/tenants").as_user(&admin).send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(4));

    let (status, _) = Call::new("GET", format!("/tenants/{}", tree.zed.id))
        .as_user(&admin)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn other_roles_are_refused() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, legacy()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let (status, _) = Call::new("GET", format!("/tenants/{}", tree.acme.id))
        .as_user(&token_with_role(Uuid::new_v4(), "MANAGER"))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = Call::new("GET", "/tenants")
        .as_user(&token(Uuid::new_v4()))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = Call::new("GET", "/tenants").send(&app).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = Call::new("GET", "/permissions").send(&app).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn health_reports_the_mode() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, legacy()).await?;

    let (status, body) = Call::new("GET", "/api/health").send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "db_ok": true, "db_error": null, "authz_mode": "legacy" }));

    Ok(())
}

#[tokio::test]
async fn enabling_legacy_mode_is_audited() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let _app = common::app(&pool, legacy()).await?;

    let mut found = None;
    for _ in 0..40 {
        found = sqlx::query_scalar::<_, String>(
            "SELECT severity FROM activity_log WHERE event_name = 'authz.legacy_mode_enabled'",
        )
        .fetch_optional(&pool)
        .await?;
        if found.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(found.as_deref(), Some("critical"));

    Ok(())
}
