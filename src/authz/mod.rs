//! Tenant-scoped authorization engine.
//!
//! Every protected operation calls [`AuthzEngine::authorize`] with the request
//! context and its declared requirement, and gets back an allow carrying the
//! resolved actor and tenant, or a deny with a fixed reason.

pub mod cache;
pub mod catalog;
pub mod context;
pub mod decision;
pub mod expander;
pub mod hierarchy;
pub mod membership;
pub mod permissions;
pub mod pipeline;

pub use context::{AuthorizeOptions, Identity, RequestContext};
pub use decision::{AuthContext, AuthDecision, DenyReason};
pub use expander::ActorScope;
pub use membership::TenantHint;
pub use permissions::{MatchMode, PermissionSet, Requirement};
pub use pipeline::AuthzEngine;

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

pub const DEFAULT_SUPER_ROLE: &str = "SUPER_ADMIN";

#[derive(Debug, Clone)]
pub struct AuthzConfig {
    /// Replaces the engine with the single super-role check.
    pub legacy_mode: bool,
    pub super_role: String,
    pub store_timeout: Duration,
    /// Zero disables the decision cache.
    pub cache_ttl: Duration,
    /// Subdomains of this host are read as tenant slugs.
    pub tenant_base_domain: Option<String>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            legacy_mode: false,
            super_role: DEFAULT_SUPER_ROLE.to_string(),
            store_timeout: Duration::from_millis(2000),
            cache_ttl: Duration::from_secs(5),
            tenant_base_domain: None,
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let legacy_mode = match std::env::var("AUTHZ_LEGACY_MODE") {
            Ok(raw) => parse_flag(&raw)
                .ok_or_else(|| AppError::configuration("AUTHZ_LEGACY_MODE must be true or false"))?,
            Err(_) => defaults.legacy_mode,
        };

        let super_role = std::env::var("AUTHZ_SUPER_ROLE")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.super_role);

        let store_timeout = std::env::var("AUTHZ_STORE_TIMEOUT_MS")
            .map(|val| val.parse::<u64>().map(Duration::from_millis))
            .unwrap_or(Ok(defaults.store_timeout))
            .map_err(|_| AppError::configuration("AUTHZ_STORE_TIMEOUT_MS must be a valid integer"))?;
        if store_timeout.is_zero() {
            return Err(AppError::configuration("AUTHZ_STORE_TIMEOUT_MS must be greater than zero"));
        }

        let cache_ttl = std::env::var("AUTHZ_CACHE_TTL_SECS")
            .map(|val| val.parse::<u64>().map(Duration::from_secs))
            .unwrap_or(Ok(defaults.cache_ttl))
            .map_err(|_| AppError::configuration("AUTHZ_CACHE_TTL_SECS must be a valid integer"))?;

        let tenant_base_domain = std::env::var("TENANT_BASE_DOMAIN")
            .ok()
            .map(|v| v.trim().trim_start_matches('.').to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            legacy_mode,
            super_role,
            store_timeout,
            cache_ttl,
            tenant_base_domain,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Audit record written when the engine starts with legacy mode on.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyModeEnabled {
    pub super_role: String,
}

impl Loggable for LegacyModeEnabled {
    fn entity_type() -> &'static str { "authz" }
    fn subject_id(&self) -> Uuid { Uuid::nil() }
    fn severity(&self) -> Severity { Severity::Critical }
    fn severity_for_action(&self, _action: &str) -> Severity { Severity::Critical }
}
