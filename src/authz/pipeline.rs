//! The engine's entry point.
//!
//! One call runs authenticate, resolve tenant, aggregate permissions, check
//! the requirement, then optionally validate the target tenant. Legacy mode is
//! chosen once at the top and replaces all of it with a single role check.

use std::sync::Arc;

use uuid::Uuid;

use super::cache::DecisionCache;
use super::context::{AuthorizeOptions, RequestContext};
use super::decision::{AuthContext, AuthDecision, DecisionMode, DenyReason};
use super::expander::{self, ActorScope};
use super::hierarchy::assert_hierarchy;
use super::membership::{MembershipResolver, ResolutionFailure, ResolvedMembership};
use super::permissions::{PermissionAggregator, PermissionSet};
use super::AuthzConfig;
use crate::store::{AuthzStore, StoreError, StoreResult, TimedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Authenticate,
    ResolveTenant,
    CheckPermissions,
    ValidateHierarchy,
    Legacy,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Authenticate => "authenticate",
            Stage::ResolveTenant => "resolve_tenant",
            Stage::CheckPermissions => "check_permissions",
            Stage::ValidateHierarchy => "validate_hierarchy",
            Stage::Legacy => "legacy",
        }
    }
}

pub struct AuthzEngine {
    store: TimedStore,
    cache: DecisionCache,
    config: AuthzConfig,
}

impl AuthzEngine {
    pub fn new(store: Arc<dyn AuthzStore>, config: AuthzConfig) -> Self {
        Self {
            store: TimedStore::new(store, config.store_timeout),
            cache: DecisionCache::new(config.cache_ttl),
            config,
        }
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub fn is_legacy(&self) -> bool {
        self.config.legacy_mode
    }

    pub async fn authorize(&self, ctx: &RequestContext, opts: &AuthorizeOptions) -> AuthDecision {
        if self.config.legacy_mode {
            self.authorize_legacy(ctx, opts)
        } else {
            self.authorize_engine(ctx, opts).await
        }
    }

    async fn authorize_engine(&self, ctx: &RequestContext, opts: &AuthorizeOptions) -> AuthDecision {
        // authenticate
        let Some(identity) = ctx.identity.as_ref() else {
            if opts.allow_without_auth {
                return AuthDecision::Allow(AuthContext::anonymous());
            }
            return deny(Stage::Authenticate, DenyReason::Unauthenticated, None, None);
        };
        let actor_id = identity.actor_id;

        if opts.skip_tenant_resolution {
            if opts.target_tenant.is_some() {
                // Nothing to measure the target against.
                return deny(Stage::ValidateHierarchy, DenyReason::HierarchyViolation, Some(actor_id), None);
            }
            if !opts.requirement.keys().is_empty() {
                return deny(Stage::CheckPermissions, DenyReason::InsufficientPermissions, Some(actor_id), None);
            }
            return AuthDecision::Allow(AuthContext {
                actor_id: Some(actor_id),
                tenant_id: None,
                role_id: None,
                permissions: PermissionSet::default(),
                mode: DecisionMode::Engine,
            });
        }

        // resolve tenant
        let resolver = MembershipResolver::new(&self.store, &self.cache);
        let resolved = match resolver.resolve(actor_id, ctx.tenant_hint.as_ref()).await {
            Ok(resolved) => resolved,
            Err(ResolutionFailure::Store(err)) => {
                return store_failure(Stage::ResolveTenant, &err, Some(actor_id), None);
            }
            Err(failure) => {
                tracing::debug!(actor_id = %actor_id, reason = %failure, "tenant resolution failed");
                return deny(Stage::ResolveTenant, DenyReason::NoTenantContext, Some(actor_id), None);
            }
        };
        let tenant_id = resolved.tenant.id;

        // aggregate and check
        let aggregator = PermissionAggregator::new(&self.store, &self.cache);
        let granted = match aggregator
            .permissions_for(resolved.role.id, resolved.role.version)
            .await
        {
            Ok(granted) => granted,
            Err(err) => return store_failure(Stage::CheckPermissions, &err, Some(actor_id), Some(tenant_id)),
        };
        if !opts.requirement.is_satisfied_by(&granted) {
            tracing::debug!(
                actor_id = %actor_id,
                tenant_id = %tenant_id,
                missing = ?opts.requirement.missing(&granted),
                mode = ?opts.requirement.mode(),
                "permission check failed"
            );
            return deny(
                Stage::CheckPermissions,
                DenyReason::InsufficientPermissions,
                Some(actor_id),
                Some(tenant_id),
            );
        }

        // validate target
        if let Some(target_id) = opts.target_tenant.filter(|id| *id != tenant_id) {
            match self.check_target(&resolved, target_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return deny(
                        Stage::ValidateHierarchy,
                        DenyReason::HierarchyViolation,
                        Some(actor_id),
                        Some(tenant_id),
                    );
                }
                Err(err) => {
                    return store_failure(Stage::ValidateHierarchy, &err, Some(actor_id), Some(tenant_id));
                }
            }
        }

        tracing::debug!(
            actor_id = %actor_id,
            tenant_id = %tenant_id,
            role_id = %resolved.role.id,
            "authorized"
        );
        AuthDecision::Allow(AuthContext {
            actor_id: Some(actor_id),
            tenant_id: Some(tenant_id),
            role_id: Some(resolved.role.id),
            permissions: granted,
            mode: DecisionMode::Engine,
        })
    }

    async fn check_target(&self, resolved: &ResolvedMembership, target_id: Uuid) -> StoreResult<bool> {
        let Some(target) = self.store.tenant(target_id).await? else {
            tracing::debug!(target_id = %target_id, "target tenant not found");
            return Ok(false);
        };
        let lineage = self.store.lineage(&target).await?;
        match assert_hierarchy(&resolved.tenant, &target, &lineage) {
            Ok(()) => Ok(true),
            Err(violation) => {
                tracing::debug!(
                    actor_tenant = %resolved.tenant.id,
                    target_id = %target_id,
                    reason = %violation,
                    "hierarchy check failed"
                );
                Ok(false)
            }
        }
    }

    /// Single coarse check: the actor's global role must be the super role.
    /// No store reads and no hierarchy check run on this path.
    fn authorize_legacy(&self, ctx: &RequestContext, opts: &AuthorizeOptions) -> AuthDecision {
        let hinted = ctx.tenant_hint.as_ref().and_then(|h| h.tenant_id());

        let Some(identity) = ctx.identity.as_ref() else {
            if opts.allow_without_auth {
                return AuthDecision::Allow(AuthContext {
                    mode: DecisionMode::Legacy,
                    ..AuthContext::anonymous()
                });
            }
            return deny(Stage::Authenticate, DenyReason::Unauthenticated, None, None);
        };

        let is_super = identity.global_role.as_deref() == Some(self.config.super_role.as_str());
        if !is_super && !opts.allow_without_auth {
            return deny(Stage::Legacy, DenyReason::InsufficientPermissions, Some(identity.actor_id), hinted);
        }

        tracing::info!(
            actor_id = %identity.actor_id,
            mode = "legacy",
            super_role = is_super,
            "authorized"
        );
        AuthDecision::Allow(AuthContext {
            actor_id: Some(identity.actor_id),
            tenant_id: hinted,
            role_id: None,
            permissions: PermissionSet::default(),
            mode: DecisionMode::Legacy,
        })
    }

    /// Actors whose records are visible under `tenant_id`.
    pub async fn expand_to_actor_ids(&self, tenant_id: Uuid) -> StoreResult<ActorScope> {
        expander::expand_to_actor_ids(&self.store, tenant_id).await
    }

    /// Display-only view of a role's grants. Always read from the store.
    pub async fn list_effective_permissions(&self, role_id: Uuid) -> StoreResult<Option<PermissionSet>> {
        if self.store.role(role_id).await?.is_none() {
            return Ok(None);
        }
        let aggregator = PermissionAggregator::new(&self.store, &self.cache);
        aggregator.fresh(role_id).await.map(Some)
    }

    pub fn invalidate_role(&self, role_id: Uuid) {
        self.cache.invalidate_role(role_id);
    }

    pub fn invalidate_actor(&self, actor_id: Uuid) {
        self.cache.invalidate_actor(actor_id);
    }

    /// Tenant activation changes every lineage check below it.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}

fn deny(stage: Stage, reason: DenyReason, actor_id: Option<Uuid>, tenant_id: Option<Uuid>) -> AuthDecision {
    tracing::debug!(
        stage = stage.as_str(),
        reason = reason.as_str(),
        actor_id = ?actor_id,
        tenant_id = ?tenant_id,
        "denied"
    );
    AuthDecision::deny(reason, actor_id, tenant_id)
}

fn store_failure(
    stage: Stage,
    err: &StoreError,
    actor_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
) -> AuthDecision {
    tracing::error!(
        stage = stage.as_str(),
        error = %err,
        actor_id = ?actor_id,
        tenant_id = ?tenant_id,
        "authorization store failure"
    );
    AuthDecision::deny(DenyReason::StoreUnavailable, actor_id, tenant_id)
}
