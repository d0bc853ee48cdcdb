mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{add_membership, build_tree, setup_db, token, Call};
use tenant_authz::authz::catalog::{BUSINESS_OWNER, EMPLOYEE, WHITELABEL_ADMIN};
use tenant_authz::authz::AuthzConfig;
use tenant_authz::models::membership::MembershipStatus;
use tenant_authz::store::SqliteStore;

fn keys_of(body: &Value) -> Vec<String> {
    serde_json::from_value(body["permissions"].clone()).unwrap_or_default()
}

#[tokio::test]
async fn tenants_are_created_under_the_callers_subtree() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, AuthzConfig::default()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let admin = Uuid::new_v4();
    add_membership(&store, admin, &tree.acme, WHITELABEL_ADMIN.id, MembershipStatus::Active).await?;
    let admin_token = token(admin);

    let (status, body) = Call::new("POST", "/tenants")
        .as_user(&admin_token)
        .json(json!({ "parent_id": tree.acme.id, "type": "BUSINESS", "name": "Corner Cafe", "slug": "cafe" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["path"], "root.acme.cafe");
    assert_eq!(body["parent_id"], json!(tree.acme.id.to_string()));

    let (status, _) = Call::new("POST", "/tenants")
        .as_user(&admin_token)
        .json(json!({ "parent_id": tree.acme.id, "type": "LOCATION", "name": "Kiosk" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = Call::new("POST", "/tenants")
        .as_user(&admin_token)
        .json(json!({ "parent_id": tree.zed.id, "type": "LOCATION", "name": "Elsewhere" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = Call::new("POST", "/tenants")
        .as_user(&admin_token)
        .json(json!({ "parent_id": tree.acme.id, "type": "BUSINESS", "name": "Bistro Two", "slug": "bistro" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = Call::new("GET", "/tenants").as_user(&admin_token).send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    let paths: Vec<&str> = body
        .as_array()
        .map(|items| items.iter().filter_map(|t| t["path"].as_str()).collect())
        .unwrap_or_default();
    assert!(paths.contains(&"root.acme"));
    assert!(paths.contains(&"root.acme.bistro"));
    assert!(paths.contains(&"root.acme.cafe"));
    assert!(!paths.contains(&"root.zed"));
    assert!(!paths.contains(&"root"));

    Ok(())
}

#[tokio::test]
async fn deactivation_cuts_off_the_branch() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, AuthzConfig::default()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let admin = Uuid::new_v4();
    let employee = Uuid::new_v4();
    add_membership(&store, admin, &tree.acme, WHITELABEL_ADMIN.id, MembershipStatus::Active).await?;
    add_membership(&store, employee, &tree.bistro, EMPLOYEE.id, MembershipStatus::Active).await?;
    let admin_token = token(admin);

    // Warm the employee's cached context first.
    let (status, _) = Call::new("GET", "/authz/context").as_user(&token(employee)).send(&app).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = Call::new("POST", format!("/tenants/{}/deactivate", tree.acme.id))
        .as_user(&admin_token)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = Call::new("POST", format!("/tenants/{}/deactivate", tree.bistro.id))
        .as_user(&admin_token)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["active"], false);

    let (status, _) = Call::new("GET", "/authz/context").as_user(&token(employee)).send(&app).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = Call::new("POST", format!("/tenants/{}/memberships", tree.bistro.id))
        .as_user(&admin_token)
        .json(json!({ "user_id": Uuid::new_v4(), "role_id": EMPLOYEE.id }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = Call::new("GET", format!("/tenants/{}/actors", tree.acme.id))
        .as_user(&admin_token)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let actors: Vec<Uuid> = serde_json::from_value(body["actor_ids"].clone())?;
    assert!(!actors.contains(&employee));

    let (status, body) = Call::new("POST", format!("/tenants/{}/activate", tree.bistro.id))
        .as_user(&admin_token)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["active"], true);

    let (status, _) = Call::new("GET", "/authz/context").as_user(&token(employee)).send(&app).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn custom_role_edits_apply_to_holders() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, AuthzConfig::default()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let owner = Uuid::new_v4();
    add_membership(&store, owner, &tree.bistro, BUSINESS_OWNER.id, MembershipStatus::Active).await?;
    let owner_token = token(owner);

    let (status, role) = Call::new("POST", "/roles")
        .as_user(&owner_token)
        .json(json!({ "name": "shift_lead", "scope": "EMPLOYEE", "permissions": ["products:view", "sales:create"] }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{role}");
    assert_eq!(role["tenant_id"], json!(tree.bistro.id.to_string()));
    let role_id = role["id"].as_str().unwrap_or_default().to_string();

    let lead = Uuid::new_v4();
    let (status, _) = Call::new("POST", format!("/tenants/{}/memberships", tree.bistro.id))
        .as_user(&owner_token)
        .json(json!({ "user_id": lead, "role_id": role_id, "activate": true }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (_, ctx) = Call::new("GET", "/authz/context").as_user(&token(lead)).send(&app).await?;
    assert_eq!(keys_of(&ctx), vec!["products:view".to_string(), "sales:create".to_string()]);

    let (status, _) = Call::new("POST", format!("/roles/{role_id}/permissions"))
        .as_user(&owner_token)
        .json(json!({ "key": "products:edit" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = Call::new("POST", format!("/roles/{role_id}/permissions"))
        .as_user(&owner_token)
        .json(json!({ "key": "products:edit" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, ctx) = Call::new("GET", "/authz/context").as_user(&token(lead)).send(&app).await?;
    assert!(keys_of(&ctx).contains(&"products:edit".to_string()));

    let (status, effective) = Call::new("GET", format!("/roles/{role_id}/permissions"))
        .as_user(&owner_token)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(effective["version"], 2);
    assert_eq!(keys_of(&effective).len(), 3);

    // The owner does not hold permissions:manage and cannot hand it out.
    let (status, _) = Call::new("POST", format!("/roles/{role_id}/permissions"))
        .as_user(&owner_token)
        .json(json!({ "key": "permissions:manage" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, catalog) = Call::new("GET", "/permissions").send(&app).await?;
    let edit_id = catalog
        .as_array()
        .and_then(|items| items.iter().find(|p| p["key"] == "products:edit"))
        .and_then(|p| p["id"].as_str())
        .unwrap_or_default()
        .to_string();

    let (status, _) = Call::new("DELETE", format!("/roles/{role_id}/permissions/{edit_id}"))
        .as_user(&owner_token)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, ctx) = Call::new("GET", "/authz/context").as_user(&token(lead)).send(&app).await?;
    assert!(!keys_of(&ctx).contains(&"products:edit".to_string()));

    Ok(())
}

#[tokio::test]
async fn system_roles_are_immutable() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, AuthzConfig::default()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let owner = Uuid::new_v4();
    add_membership(&store, owner, &tree.bistro, BUSINESS_OWNER.id, MembershipStatus::Active).await?;

    let (status, _) = Call::new("POST", format!("/roles/{}/permissions", EMPLOYEE.id))
        .as_user(&token(owner))
        .json(json!({ "key": "products:edit" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn roles_cannot_grant_what_the_creator_lacks() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, AuthzConfig::default()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let admin = Uuid::new_v4();
    add_membership(&store, admin, &tree.acme, WHITELABEL_ADMIN.id, MembershipStatus::Active).await?;

    let (status, _) = Call::new("POST", "/roles")
        .as_user(&token(admin))
        .json(json!({ "name": "editor", "scope": "BUSINESS", "permissions": ["products:edit"] }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = Call::new("POST", "/roles")
        .as_user(&token(admin))
        .json(json!({ "name": "viewer", "scope": "BUSINESS", "permissions": ["products:view", "nope:nope"] }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = Call::new("POST", "/roles")
        .as_user(&token(admin))
        .json(json!({ "name": "viewer", "scope": "BUSINESS", "permissions": ["products:view"] }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // Usable by a business below the white label.
    let (status, _) = Call::new("POST", format!("/tenants/{}/memberships", tree.bistro.id))
        .as_user(&token(admin))
        .json(json!({ "user_id": Uuid::new_v4(), "role_id": body["id"], "activate": true }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn assigned_roles_cannot_exceed_the_assigner() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let app = common::app(&pool, AuthzConfig::default()).await?;
    let store = SqliteStore::new(pool.clone());
    let tree = build_tree(&store).await?;

    let owner = Uuid::new_v4();
    add_membership(&store, owner, &tree.bistro, BUSINESS_OWNER.id, MembershipStatus::Active).await?;
    let owner_token = token(owner);

    let (status, role) = Call::new("POST", "/roles")
        .as_user(&owner_token)
        .json(json!({ "name": "staffer", "scope": "EMPLOYEE", "permissions": ["memberships:manage"] }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{role}");
    let role_id = role["id"].as_str().unwrap_or_default().to_string();

    let staffer = Uuid::new_v4();
    let (status, _) = Call::new("POST", format!("/tenants/{}/memberships", tree.bistro.id))
        .as_user(&owner_token)
        .json(json!({ "user_id": staffer, "role_id": role_id, "activate": true }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let staffer_token = token(staffer);

    let recruit = Uuid::new_v4();
    for target_role in [BUSINESS_OWNER.id, EMPLOYEE.id] {
        let (status, body) = Call::new("POST", format!("/tenants/{}/memberships", tree.bistro.id))
            .as_user(&staffer_token)
            .json(json!({ "user_id": recruit, "role_id": target_role, "activate": true }))
            .send(&app)
            .await?;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    }
    let (status, _) = Call::new("GET", "/authz/context").as_user(&token(recruit)).send(&app).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for key in ["products:view", "sales:create"] {
        let (status, _) = Call::new("POST", format!("/roles/{role_id}/permissions"))
            .as_user(&owner_token)
            .json(json!({ "key": key }))
            .send(&app)
            .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = Call::new("POST", format!("/tenants/{}/memberships", tree.bistro.id))
        .as_user(&staffer_token)
        .json(json!({ "user_id": recruit, "role_id": EMPLOYEE.id, "activate": true }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (_, ctx) = Call::new("GET", "/authz/context").as_user(&token(recruit)).send(&app).await?;
    assert_eq!(keys_of(&ctx), vec!["products:view".to_string(), "sales:create".to_string()]);

    Ok(())
}
