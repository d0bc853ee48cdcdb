use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::hierarchy::TenantPath;
use crate::models::membership::{Membership, MembershipStatus};
use crate::models::role::{Permission, Role, RoleScope};
use crate::models::tenant::{Tenant, TenantType};
use crate::store::StoreError;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    let s = s.trim();

    // RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format, with optional fractional seconds
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| StoreError::Corrupt("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(StoreError::Corrupt(format!("invalid datetime: {}", s)))
}

pub fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("invalid uuid {s:?}: {e}")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("missing {}: {}", name, e)))
}

pub fn tenant_from_row(row: &SqliteRow) -> Result<Tenant, StoreError> {
    let id_s: String = column(row, "id")?;
    let parent_id_s: Option<String> = column(row, "parent_id")?;
    let type_s: String = column(row, "type")?;
    let name: String = column(row, "name")?;
    let slug: String = column(row, "slug")?;
    let path_s: String = column(row, "path")?;
    let active: bool = column(row, "active")?;
    let created_at_s: String = column(row, "created_at")?;

    let tenant_type = TenantType::parse(&type_s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown tenant type {type_s:?}")))?;
    let path = TenantPath::parse(&path_s)
        .map_err(|e| StoreError::Corrupt(format!("tenant path {path_s:?}: {e}")))?;
    let parent_id = parent_id_s.as_deref().map(parse_uuid).transpose()?;

    Ok(Tenant {
        id: parse_uuid(&id_s)?,
        parent_id,
        tenant_type,
        name,
        slug,
        path,
        active,
        created_at: parse_datetime(&created_at_s)?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, StoreError> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let scope_s: String = column(row, "scope")?;
    let is_system: bool = column(row, "is_system")?;
    let tenant_id_s: Option<String> = column(row, "tenant_id")?;
    let version: i64 = column(row, "version")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    let scope = RoleScope::parse(&scope_s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown role scope {scope_s:?}")))?;

    Ok(Role {
        id: parse_uuid(&id_s)?,
        name,
        scope,
        is_system,
        tenant_id: tenant_id_s.as_deref().map(parse_uuid).transpose()?,
        version,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, StoreError> {
    let id_s: String = column(row, "id")?;
    let key: String = column(row, "key")?;
    let description: Option<String> = column(row, "description")?;
    let created_at_s: String = column(row, "created_at")?;

    Ok(Permission {
        id: parse_uuid(&id_s)?,
        key,
        description,
        created_at: parse_datetime(&created_at_s)?,
    })
}

pub fn membership_from_row(row: &SqliteRow) -> Result<Membership, StoreError> {
    let id_s: String = column(row, "id")?;
    let user_id_s: String = column(row, "user_id")?;
    let tenant_id_s: String = column(row, "tenant_id")?;
    let role_id_s: String = column(row, "role_id")?;
    let status_s: String = column(row, "status")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    let status = MembershipStatus::parse(&status_s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown membership status {status_s:?}")))?;

    Ok(Membership {
        id: parse_uuid(&id_s)?,
        user_id: parse_uuid(&user_id_s)?,
        tenant_id: parse_uuid(&tenant_id_s)?,
        role_id: parse_uuid(&role_id_s)?,
        status,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}
