use axum::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::permissions::PermissionSet;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    Unauthenticated,
    NoTenantContext,
    InsufficientPermissions,
    HierarchyViolation,
    StoreUnavailable,
}

impl DenyReason {
    pub fn http_status(&self) -> StatusCode {
        match self {
            DenyReason::Unauthenticated => StatusCode::UNAUTHORIZED,
            _ => StatusCode::FORBIDDEN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "UNAUTHENTICATED",
            DenyReason::NoTenantContext => "NO_TENANT_CONTEXT",
            DenyReason::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            DenyReason::HierarchyViolation => "HIERARCHY_VIOLATION",
            DenyReason::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Message safe to show the caller. Store failures read like any other
    /// refusal.
    pub fn public_message(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "authentication required",
            DenyReason::NoTenantContext => "no tenant context for this request",
            DenyReason::InsufficientPermissions => "insufficient permissions",
            DenyReason::HierarchyViolation => "target tenant is outside your organization",
            DenyReason::StoreUnavailable => "access denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    Engine,
    Legacy,
    Anonymous,
}

/// What an allowed operation learns about its caller.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub actor_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub permissions: PermissionSet,
    pub mode: DecisionMode,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self {
            actor_id: None,
            tenant_id: None,
            role_id: None,
            permissions: PermissionSet::default(),
            mode: DecisionMode::Anonymous,
        }
    }

    /// The actor id, or 401 for anonymous contexts.
    pub fn require_actor(&self) -> Result<Uuid, AppError> {
        self.actor_id
            .ok_or_else(|| AppError::unauthorized(DenyReason::Unauthenticated.public_message()))
    }

    pub fn require_tenant(&self) -> Result<Uuid, AppError> {
        self.tenant_id
            .ok_or_else(|| AppError::forbidden(DenyReason::NoTenantContext.public_message()))
    }

    /// Refusal for a record the caller cannot reach. Missing records get the
    /// same answer as foreign ones.
    pub fn out_of_reach(&self) -> AppError {
        AppError::forbidden(DenyReason::HierarchyViolation.public_message())
    }

    /// Engine decisions may only hand out keys the caller holds. Legacy
    /// decisions carry no permission set and are not limited.
    pub fn ensure_grantable<'a>(
        &self,
        requested: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), AppError> {
        if self.mode == DecisionMode::Legacy {
            return Ok(());
        }
        let missing: Vec<&str> = requested
            .into_iter()
            .filter(|k| !self.permissions.contains(k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "cannot grant permissions you do not hold: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Outcome of one `authorize` call. Built per request and never stored.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    Allow(AuthContext),
    Deny {
        reason: DenyReason,
        actor_id: Option<Uuid>,
        tenant_id: Option<Uuid>,
    },
}

impl AuthDecision {
    pub fn deny(reason: DenyReason, actor_id: Option<Uuid>, tenant_id: Option<Uuid>) -> Self {
        AuthDecision::Deny { reason, actor_id, tenant_id }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allow(_))
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        match self {
            AuthDecision::Allow(ctx) => ctx.actor_id,
            AuthDecision::Deny { actor_id, .. } => *actor_id,
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            AuthDecision::Allow(ctx) => ctx.tenant_id,
            AuthDecision::Deny { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            AuthDecision::Allow(_) => None,
            AuthDecision::Deny { reason, .. } => Some(*reason),
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            AuthDecision::Allow(_) => StatusCode::OK,
            AuthDecision::Deny { reason, .. } => reason.http_status(),
        }
    }

    /// Hands the context to the operation, or turns the denial into a 401/403.
    pub fn into_result(self) -> Result<AuthContext, AppError> {
        match self {
            AuthDecision::Allow(ctx) => Ok(ctx),
            AuthDecision::Deny { reason, .. } => match reason {
                DenyReason::Unauthenticated => Err(AppError::unauthorized(reason.public_message())),
                _ => Err(AppError::forbidden(reason.public_message())),
            },
        }
    }
}
