use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::hierarchy::{PathError, TenantPath};
use crate::events::{Loggable, Severity};
use crate::utils::{normalize_slug, utc_now};

/// Position of a tenant in the containment order, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantType {
    Platform,
    WhiteLabel,
    Business,
    Location,
}

impl TenantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantType::Platform => "PLATFORM",
            TenantType::WhiteLabel => "WHITE_LABEL",
            TenantType::Business => "BUSINESS",
            TenantType::Location => "LOCATION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PLATFORM" => Some(TenantType::Platform),
            "WHITE_LABEL" => Some(TenantType::WhiteLabel),
            "BUSINESS" => Some(TenantType::Business),
            "LOCATION" => Some(TenantType::Location),
            _ => None,
        }
    }

    /// Types a tenant of this type may be created under. Empty for the root.
    pub fn allowed_parents(&self) -> &'static [TenantType] {
        match self {
            TenantType::Platform => &[],
            TenantType::WhiteLabel => &[TenantType::Platform],
            TenantType::Business => &[TenantType::Platform, TenantType::WhiteLabel],
            TenantType::Location => &[TenantType::Business],
        }
    }

    pub fn can_have_children(&self) -> bool {
        !matches!(self, TenantType::Location)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TenantRuleError {
    #[error("a {child} tenant cannot be created under a {parent} tenant")]
    IncompatibleParent { parent: &'static str, child: &'static str },
    #[error("only the platform root may be created without a parent")]
    RootMustBePlatform,
    #[error("invalid tenant path: {0}")]
    Path(#[from] PathError),
    #[error("tenant name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub tenant_type: TenantType,
    pub name: String,
    pub slug: String,
    #[schema(value_type = String, example = "root.acme.downtown")]
    pub path: TenantPath,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Builds the platform root. There is exactly one per deployment.
    pub fn root(name: &str, raw_slug: &str) -> Result<Self, TenantRuleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TenantRuleError::EmptyName);
        }
        let slug = normalize_slug(raw_slug);
        let path = TenantPath::root(&slug)?;

        Ok(Tenant {
            id: Uuid::new_v4(),
            parent_id: None,
            tenant_type: TenantType::Platform,
            name: name.to_string(),
            slug,
            path,
            active: true,
            created_at: utc_now(),
        })
    }

    /// Builds a new tenant under `parent`; the path is fixed here and never
    /// recomputed afterwards.
    pub fn child_of(
        parent: &Tenant,
        tenant_type: TenantType,
        name: &str,
        raw_slug: &str,
    ) -> Result<Self, TenantRuleError> {
        if tenant_type == TenantType::Platform {
            return Err(TenantRuleError::IncompatibleParent {
                parent: parent.tenant_type.as_str(),
                child: tenant_type.as_str(),
            });
        }
        if !tenant_type.allowed_parents().contains(&parent.tenant_type) {
            return Err(TenantRuleError::IncompatibleParent {
                parent: parent.tenant_type.as_str(),
                child: tenant_type.as_str(),
            });
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(TenantRuleError::EmptyName);
        }

        let slug = normalize_slug(raw_slug);
        let path = parent.path.child(&slug)?;

        Ok(Tenant {
            id: Uuid::new_v4(),
            parent_id: Some(parent.id),
            tenant_type,
            name: name.to_string(),
            slug,
            path,
            active: true,
            created_at: utc_now(),
        })
    }
}

impl Loggable for Tenant {
    fn entity_type() -> &'static str { "tenant" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TenantCreateRequest {
    pub parent_id: Uuid,
    #[serde(rename = "type")]
    pub tenant_type: TenantType,
    #[schema(example = "Acme Downtown")]
    pub name: String,
    /// Defaults to the normalized name.
    #[schema(example = "downtown")]
    pub slug: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_extends_parent() {
        let root = Tenant::root("Platform", "root").unwrap();
        let wl = Tenant::child_of(&root, TenantType::WhiteLabel, "Acme", "Acme").unwrap();
        let biz = Tenant::child_of(&wl, TenantType::Business, "Downtown Store", "downtown").unwrap();

        assert_eq!(wl.path.as_str(), "root.acme");
        assert_eq!(biz.path.as_str(), "root.acme.downtown");
        assert_eq!(biz.parent_id, Some(wl.id));
        assert!(biz.active);
    }

    #[test]
    fn containment_order_is_enforced() {
        let root = Tenant::root("Platform", "root").unwrap();
        let err = Tenant::child_of(&root, TenantType::Location, "Kiosk", "kiosk").unwrap_err();
        assert!(matches!(err, TenantRuleError::IncompatibleParent { .. }));

        let biz = Tenant::child_of(&root, TenantType::Business, "Direct", "direct").unwrap();
        let err = Tenant::child_of(&biz, TenantType::WhiteLabel, "Up", "up").unwrap_err();
        assert!(matches!(err, TenantRuleError::IncompatibleParent { .. }));

        let err = Tenant::child_of(&biz, TenantType::Platform, "Root2", "root2").unwrap_err();
        assert!(matches!(err, TenantRuleError::IncompatibleParent { .. }));
    }

    #[test]
    fn empty_slug_is_rejected() {
        let root = Tenant::root("Platform", "root").unwrap();
        let err = Tenant::child_of(&root, TenantType::Business, "Shop", "!!!").unwrap_err();
        assert!(matches!(err, TenantRuleError::Path(PathError::EmptySegment)));
    }

    #[test]
    fn location_is_the_only_leaf_type() {
        assert!(TenantType::Business.can_have_children());
        assert!(!TenantType::Location.can_have_children());
        assert_eq!(TenantType::parse("WHITE_LABEL"), Some(TenantType::WhiteLabel));
        assert_eq!(TenantType::parse("reseller"), None);
    }
}
