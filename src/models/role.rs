use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};
use crate::models::tenant::TenantType;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleScope {
    Platform,
    WhiteLabel,
    Business,
    /// Staff of a business or one of its locations.
    Employee,
}

impl RoleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleScope::Platform => "PLATFORM",
            RoleScope::WhiteLabel => "WHITE_LABEL",
            RoleScope::Business => "BUSINESS",
            RoleScope::Employee => "EMPLOYEE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PLATFORM" => Some(RoleScope::Platform),
            "WHITE_LABEL" => Some(RoleScope::WhiteLabel),
            "BUSINESS" => Some(RoleScope::Business),
            "EMPLOYEE" | "LOCATION" => Some(RoleScope::Employee),
            _ => None,
        }
    }

    /// Whether a role of this scope may be held inside a tenant of `tenant_type`.
    pub fn is_compatible_with(&self, tenant_type: TenantType) -> bool {
        matches!(
            (self, tenant_type),
            (RoleScope::Platform, TenantType::Platform)
                | (RoleScope::WhiteLabel, TenantType::WhiteLabel)
                | (RoleScope::Business, TenantType::Business)
                | (RoleScope::Employee, TenantType::Business)
                | (RoleScope::Employee, TenantType::Location)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub scope: RoleScope,
    pub is_system: bool,
    /// Owning tenant of a custom role; `None` for system roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    /// Bumped on every permission edit.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "shift_lead")]
    pub name: String,
    pub scope: RoleScope,
    /// Permission keys granted at creation.
    #[serde(default)]
    #[schema(example = json!(["products:view", "sales:create"]))]
    pub permissions: Vec<String>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "products:edit")]
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "products:archive")]
    pub key: String,
    #[schema(example = "Archive discontinued products")]
    pub description: Option<String>,
}

// =============================================================================
// ROLE-PERMISSION LINK
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachPermissionRequest {
    #[schema(example = "products:edit")]
    pub key: String,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (display only)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub role_id: Uuid,
    pub version: i64,
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn employee_roles_fit_businesses_and_locations() {
        assert!(RoleScope::Employee.is_compatible_with(TenantType::Business));
        assert!(RoleScope::Employee.is_compatible_with(TenantType::Location));
        assert!(!RoleScope::Employee.is_compatible_with(TenantType::WhiteLabel));
    }

    #[test]
    fn scopes_do_not_cross_levels() {
        assert!(!RoleScope::Business.is_compatible_with(TenantType::WhiteLabel));
        assert!(!RoleScope::WhiteLabel.is_compatible_with(TenantType::Business));
        assert!(!RoleScope::Platform.is_compatible_with(TenantType::Business));
        assert!(RoleScope::Platform.is_compatible_with(TenantType::Platform));
    }

    #[test]
    fn location_is_an_alias_of_employee() {
        assert_eq!(RoleScope::parse("LOCATION"), Some(RoleScope::Employee));
        assert_eq!(RoleScope::parse("employee"), None);
    }
}
