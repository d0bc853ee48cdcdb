//! SQLite-backed store. Identifiers are stored as canonical text UUIDs and
//! timestamps as RFC3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{AuthzStore, StoreError, StoreResult};
use crate::authz::catalog::{keys, SYSTEM_ROLES};
use crate::authz::hierarchy::{TenantPath, PATH_SEPARATOR};
use crate::db::row_parsers::{
    membership_from_row, parse_uuid, permission_from_row, role_from_row, tenant_from_row,
};
use crate::models::membership::{Membership, MembershipStatus};
use crate::models::role::{Permission, Role};
use crate::models::tenant::Tenant;
use crate::utils::utc_now;

const TENANT_COLUMNS: &str = "id, parent_id, type, name, slug, path, active, created_at";
const ROLE_COLUMNS: &str = "id, name, scope, is_system, tenant_id, version, created_at, updated_at";
const MEMBERSHIP_COLUMNS: &str = "id, user_id, tenant_id, role_id, status, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, key, description, created_at";

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn conflict_or(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts the built-in permission keys and system roles that are missing.
    /// Existing rows are left untouched.
    pub async fn seed_catalog(&self) -> StoreResult<()> {
        let now = ts(utc_now());
        let mut tx = self.pool.begin().await?;

        for key in keys::ALL {
            sqlx::query(
                "INSERT OR IGNORE INTO permissions (id, key, description, created_at) VALUES (?, ?, NULL, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(*key)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        for role in SYSTEM_ROLES {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO roles (id, name, scope, is_system, tenant_id, version, created_at, updated_at) VALUES (?, ?, ?, 1, NULL, 1, ?, ?)",
            )
            .bind(role.id.to_string())
            .bind(role.name)
            .bind(role.scope.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 0 {
                continue;
            }

            for grant in role.grants {
                sqlx::query(
                    "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) SELECT ?, id, ? FROM permissions WHERE key = ?",
                )
                .bind(role.id.to_string())
                .bind(&now)
                .bind(*grant)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // tenants
    // -------------------------------------------------------------------------

    pub async fn platform_root(&self) -> StoreResult<Option<Tenant>> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE type = 'PLATFORM' AND parent_id IS NULL"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    pub async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tenants (id, parent_id, type, name, slug, path, active, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tenant.id.to_string())
        .bind(tenant.parent_id.map(|id| id.to_string()))
        .bind(tenant.tenant_type.as_str())
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.path.as_str())
        .bind(tenant.active)
        .bind(ts(tenant.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if tenant.parent_id.is_none() {
                conflict_or(e, "a root tenant already exists")
            } else {
                conflict_or(e, "tenant slug is already in use")
            }
        })?;

        Ok(())
    }

    pub async fn set_tenant_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let affected = sqlx::query("UPDATE tenants SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    // -------------------------------------------------------------------------
    // roles and permissions
    // -------------------------------------------------------------------------

    /// System roles plus the custom roles owned by any of `owners`.
    pub async fn roles_visible_to(&self, owners: &[Uuid]) -> StoreResult<Vec<Role>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE is_system = 1"
        ));
        if !owners.is_empty() {
            qb.push(" OR tenant_id IN (");
            let mut sep = qb.separated(", ");
            for owner in owners {
                sep.push_bind(owner.to_string());
            }
            sep.push_unseparated(")");
        }
        qb.push(" ORDER BY is_system DESC, name");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(role_from_row).collect()
    }

    pub async fn insert_role(&self, role: &Role, grants: &[Permission]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO roles (id, name, scope, is_system, tenant_id, version, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(role.id.to_string())
        .bind(&role.name)
        .bind(role.scope.as_str())
        .bind(role.is_system)
        .bind(role.tenant_id.map(|id| id.to_string()))
        .bind(role.version)
        .bind(ts(role.created_at))
        .bind(ts(role.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "role already exists"))?;

        for permission in grants {
            sqlx::query(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(role.id.to_string())
            .bind(permission.id.to_string())
            .bind(ts(role.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Links a permission to a role and bumps the role version. Returns false
    /// when the link already existed.
    pub async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<bool> {
        let now = ts(utc_now());
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            bump_role_version(&mut tx, role_id, &now).await?;
        }

        tx.commit().await?;
        Ok(inserted > 0)
    }

    pub async fn detach_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<bool> {
        let now = ts(utc_now());
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
            .bind(role_id.to_string())
            .bind(permission_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed > 0 {
            bump_role_version(&mut tx, role_id, &now).await?;
        }

        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY key");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(permission_from_row).collect()
    }

    pub async fn permission_by_key(&self, key: &str) -> StoreResult<Option<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE key = ?");
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(permission_from_row).transpose()
    }

    pub async fn permission(&self, id: Uuid) -> StoreResult<Option<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(permission_from_row).transpose()
    }

    pub async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        sqlx::query("INSERT INTO permissions (id, key, description, created_at) VALUES (?, ?, ?, ?)")
            .bind(permission.id.to_string())
            .bind(&permission.key)
            .bind(&permission.description)
            .bind(ts(permission.created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "permission key already exists"))?;
        Ok(())
    }

    /// Deletes a permission that no role references. Referenced keys are
    /// immutable.
    pub async fn delete_permission(&self, id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let references: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE permission_id = ?")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await?;
        if references > 0 {
            return Err(StoreError::Conflict(format!(
                "permission is referenced by {references} role(s)"
            )));
        }

        let removed = sqlx::query("DELETE FROM permissions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    // -------------------------------------------------------------------------
    // memberships
    // -------------------------------------------------------------------------

    pub async fn insert_membership(&self, membership: &Membership) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO memberships (id, user_id, tenant_id, role_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(membership.id.to_string())
        .bind(membership.user_id.to_string())
        .bind(membership.tenant_id.to_string())
        .bind(membership.role_id.to_string())
        .bind(membership.status.as_str())
        .bind(ts(membership.created_at))
        .bind(ts(membership.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "actor already holds an active membership in this tenant"))?;
        Ok(())
    }

    pub async fn membership(&self, id: Uuid) -> StoreResult<Option<Membership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    pub async fn memberships_in_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE tenant_id = ? ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    pub async fn set_membership_status(
        &self,
        id: Uuid,
        status: MembershipStatus,
    ) -> StoreResult<bool> {
        let affected = sqlx::query("UPDATE memberships SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ts(utc_now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "actor already holds an active membership in this tenant"))?
            .rows_affected();
        Ok(affected > 0)
    }
}

async fn bump_role_version(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    role_id: Uuid,
    now: &str,
) -> StoreResult<()> {
    sqlx::query("UPDATE roles SET version = version + 1, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(role_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl AuthzStore for SqliteStore {
    async fn tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = ?");
        let row = sqlx::query(&sql).bind(slug).fetch_optional(&self.pool).await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn tenants_by_paths(&self, paths: &[TenantPath]) -> StoreResult<Vec<Tenant>> {
        let mut out = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(IN_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE path IN ("));
            let mut sep = qb.separated(", ");
            for path in chunk {
                sep.push_bind(path.as_str().to_string());
            }
            sep.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                out.push(tenant_from_row(row)?);
            }
        }
        Ok(out)
    }

    async fn subtree(&self, path: &TenantPath) -> StoreResult<Vec<Tenant>> {
        // substr() instead of LIKE so that slug characters are never pattern syntax.
        let prefix = format!("{}{}", path.as_str(), PATH_SEPARATOR);
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE path = ? OR substr(path, 1, ?) = ? ORDER BY path"
        );
        let rows = sqlx::query(&sql)
            .bind(path.as_str())
            .bind(prefix.len() as i64)
            .bind(&prefix)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    async fn role(&self, id: Uuid) -> StoreResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn role_permission_keys(&self, role_id: Uuid) -> StoreResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.key
            FROM permissions p
            INNER JOIN role_permissions rp ON p.id = rp.permission_id
            WHERE rp.role_id = ?
            ORDER BY p.key
            "#,
        )
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn memberships_for_actor(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = ?");
        let rows = sqlx::query(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn active_member_ids(&self, tenant_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        let mut out = Vec::new();
        for chunk in tenant_ids.chunks(IN_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT DISTINCT user_id FROM memberships WHERE status = 'active' AND tenant_id IN (",
            );
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(id.to_string());
            }
            sep.push_unseparated(")");

            let ids: Vec<String> = qb.build_query_scalar().fetch_all(&self.pool).await?;
            for id in ids {
                out.push(parse_uuid(&id)?);
            }
        }
        Ok(out)
    }
}
