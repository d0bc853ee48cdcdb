//! Permission catalog: the `module:action` keys the platform knows about and
//! the system roles that hold them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::role::RoleScope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionKeyError {
    #[error("permission key must have the form module:action, got {0:?}")]
    Malformed(String),
}

/// A validated `module:action` permission key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey(String);

impl PermissionKey {
    pub fn parse(raw: &str) -> Result<Self, PermissionKeyError> {
        let raw = raw.trim();
        let Some((module, action)) = raw.split_once(':') else {
            return Err(PermissionKeyError::Malformed(raw.to_string()));
        };
        if !is_key_part(module) || !is_key_part(action) {
            return Err(PermissionKeyError::Malformed(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_key_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = PermissionKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PermissionKey::parse(&value)
    }
}

impl From<PermissionKey> for String {
    fn from(value: PermissionKey) -> Self {
        value.0
    }
}

/// Well-known permission keys
pub mod keys {
    // Tenants
    pub const TENANTS_VIEW: &str = "tenants:view";
    pub const TENANTS_CREATE: &str = "tenants:create";
    pub const TENANTS_MANAGE: &str = "tenants:manage";

    // Memberships
    pub const MEMBERSHIPS_VIEW: &str = "memberships:view";
    pub const MEMBERSHIPS_MANAGE: &str = "memberships:manage";

    // RBAC
    pub const ROLES_VIEW: &str = "roles:view";
    pub const ROLES_MANAGE: &str = "roles:manage";
    pub const PERMISSIONS_MANAGE: &str = "permissions:manage";

    // Reseller
    pub const WHITELABEL_MANAGE: &str = "whitelabel:manage";

    // Commerce
    pub const PRODUCTS_VIEW: &str = "products:view";
    pub const PRODUCTS_EDIT: &str = "products:edit";
    pub const SALES_VIEW: &str = "sales:view";
    pub const SALES_CREATE: &str = "sales:create";
    pub const REPORTS_VIEW: &str = "reports:view";

    pub const ALL: &[&str] = &[
        TENANTS_VIEW,
        TENANTS_CREATE,
        TENANTS_MANAGE,
        MEMBERSHIPS_VIEW,
        MEMBERSHIPS_MANAGE,
        ROLES_VIEW,
        ROLES_MANAGE,
        PERMISSIONS_MANAGE,
        WHITELABEL_MANAGE,
        PRODUCTS_VIEW,
        PRODUCTS_EDIT,
        SALES_VIEW,
        SALES_CREATE,
        REPORTS_VIEW,
    ];
}

/// A platform-defined role. Its grant set is explicit and complete; no role
/// inherits from another.
#[derive(Debug, Clone, Copy)]
pub struct SystemRole {
    pub id: Uuid,
    pub name: &'static str,
    pub scope: RoleScope,
    pub grants: &'static [&'static str],
}

pub const PLATFORM_ADMIN: SystemRole = SystemRole {
    id: Uuid::from_u128(0x7e4a_0001_0000_4000_8000_0000_0000_0001),
    name: "platform_admin",
    scope: RoleScope::Platform,
    grants: keys::ALL,
};

pub const WHITELABEL_ADMIN: SystemRole = SystemRole {
    id: Uuid::from_u128(0x7e4a_0001_0000_4000_8000_0000_0000_0002),
    name: "whitelabel_admin",
    scope: RoleScope::WhiteLabel,
    grants: &[
        keys::WHITELABEL_MANAGE,
        keys::TENANTS_VIEW,
        keys::TENANTS_CREATE,
        keys::TENANTS_MANAGE,
        keys::MEMBERSHIPS_VIEW,
        keys::MEMBERSHIPS_MANAGE,
        keys::ROLES_VIEW,
        keys::ROLES_MANAGE,
        keys::PRODUCTS_VIEW,
        keys::SALES_VIEW,
        keys::REPORTS_VIEW,
    ],
};

pub const BUSINESS_OWNER: SystemRole = SystemRole {
    id: Uuid::from_u128(0x7e4a_0001_0000_4000_8000_0000_0000_0003),
    name: "business_owner",
    scope: RoleScope::Business,
    grants: &[
        keys::TENANTS_VIEW,
        keys::TENANTS_CREATE,
        keys::TENANTS_MANAGE,
        keys::MEMBERSHIPS_VIEW,
        keys::MEMBERSHIPS_MANAGE,
        keys::ROLES_VIEW,
        keys::ROLES_MANAGE,
        keys::PRODUCTS_VIEW,
        keys::PRODUCTS_EDIT,
        keys::SALES_VIEW,
        keys::SALES_CREATE,
        keys::REPORTS_VIEW,
    ],
};

pub const BUSINESS_MANAGER: SystemRole = SystemRole {
    id: Uuid::from_u128(0x7e4a_0001_0000_4000_8000_0000_0000_0004),
    name: "business_manager",
    scope: RoleScope::Business,
    grants: &[
        keys::TENANTS_VIEW,
        keys::MEMBERSHIPS_VIEW,
        keys::PRODUCTS_VIEW,
        keys::PRODUCTS_EDIT,
        keys::SALES_VIEW,
        keys::SALES_CREATE,
        keys::REPORTS_VIEW,
    ],
};

pub const EMPLOYEE: SystemRole = SystemRole {
    id: Uuid::from_u128(0x7e4a_0001_0000_4000_8000_0000_0000_0005),
    name: "employee",
    scope: RoleScope::Employee,
    grants: &[keys::PRODUCTS_VIEW, keys::SALES_CREATE],
};

pub const SYSTEM_ROLES: &[SystemRole] = &[
    PLATFORM_ADMIN,
    WHITELABEL_ADMIN,
    BUSINESS_OWNER,
    BUSINESS_MANAGER,
    EMPLOYEE,
];
