//! Per-request inputs to the pipeline: who is calling, which tenant the call
//! is about, and what the operation requires.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, HOST};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use super::membership::TenantHint;
use super::permissions::{MatchMode, Requirement};
use crate::app::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const TENANT_COOKIE: &str = "tenant_id";

/// A stable actor id from the identity provider. `global_role` is only read
/// in legacy mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub actor_id: Uuid,
    pub global_role: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub tenant_hint: Option<TenantHint>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(actor_id: Uuid) -> Self {
        Self {
            identity: Some(Identity { actor_id, global_role: None }),
            tenant_hint: None,
        }
    }

    pub fn with_global_role(mut self, role: impl Into<String>) -> Self {
        if let Some(identity) = self.identity.as_mut() {
            identity.global_role = Some(role.into());
        }
        self
    }

    pub fn with_hint(mut self, hint: TenantHint) -> Self {
        self.tenant_hint = Some(hint);
        self
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|i| i.actor_id)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = state.identity.identify(&parts.headers).await;
        let tenant_hint =
            tenant_hint_from_headers(&parts.headers, state.config.tenant_base_domain.as_deref());
        Ok(RequestContext { identity, tenant_hint })
    }
}

/// Reads the tenant hint: the `x-tenant-id` header, then the `tenant_id`
/// cookie, then a subdomain of `base_domain`. The first source present wins,
/// even when its value is unreadable.
pub fn tenant_hint_from_headers(headers: &HeaderMap, base_domain: Option<&str>) -> Option<TenantHint> {
    if let Some(value) = headers.get(TENANT_HEADER) {
        let raw = value.to_str().unwrap_or_default().trim();
        return Some(id_hint(raw));
    }

    if let Some(raw) = cookie_value(headers, TENANT_COOKIE) {
        return Some(id_hint(&raw));
    }

    let base = base_domain?;
    let host = headers.get(HOST)?.to_str().ok()?;
    subdomain_slug(host, base).map(TenantHint::Slug)
}

fn id_hint(raw: &str) -> TenantHint {
    match Uuid::parse_str(raw) {
        Ok(id) => TenantHint::Id(id),
        Err(_) => TenantHint::Malformed(raw.to_string()),
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
}

fn subdomain_slug(host: &str, base_domain: &str) -> Option<String> {
    let host = host.split(':').next()?.to_ascii_lowercase();
    let base = base_domain.trim_start_matches('.').to_ascii_lowercase();
    let label = host.strip_suffix(&base)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') || label == "www" {
        return None;
    }
    Some(label.to_string())
}

/// Per-operation declaration handed to `authorize`.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    pub requirement: Requirement,
    pub skip_tenant_resolution: bool,
    pub allow_without_auth: bool,
    /// Tenant the operation acts on, when that differs from the caller's own.
    pub target_tenant: Option<Uuid>,
}

impl AuthorizeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permission(key: impl Into<String>) -> Self {
        Self::new().and(key)
    }

    pub fn permissions<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requirement: Requirement::any(keys),
            ..Self::default()
        }
    }

    pub fn and(mut self, key: impl Into<String>) -> Self {
        self.requirement.push(key);
        self
    }

    pub fn require_all(mut self) -> Self {
        self.requirement.set_mode(MatchMode::All);
        self
    }

    pub fn skip_tenant_resolution(mut self) -> Self {
        self.skip_tenant_resolution = true;
        self
    }

    pub fn allow_without_auth(mut self) -> Self {
        self.allow_without_auth = true;
        self
    }

    pub fn target_tenant(mut self, tenant_id: Uuid) -> Self {
        self.target_tenant = Some(tenant_id);
        self
    }
}
