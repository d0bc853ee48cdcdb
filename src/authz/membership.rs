//! Actor to (tenant, role) resolution.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use super::cache::DecisionCache;
use super::hierarchy::assert_lineage_active;
use crate::models::membership::Membership;
use crate::models::role::Role;
use crate::models::tenant::Tenant;
use crate::store::{AuthzStore, StoreError};

/// Which tenant the caller says the request is about. Derived from a header,
/// cookie or subdomain by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantHint {
    Id(Uuid),
    Slug(String),
    /// A hint was sent but could not be read. It never falls back to "no hint".
    Malformed(String),
}

impl TenantHint {
    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            TenantHint::Id(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedMembership {
    pub membership: Membership,
    pub tenant: Tenant,
    pub role: Role,
    /// The tenant and all its ancestors, as loaded during resolution.
    pub lineage: Vec<Tenant>,
}

#[derive(Debug, Error)]
pub enum ResolutionFailure {
    #[error("actor has no usable membership for this tenant context")]
    NoMembership,
    #[error("actor has {count} active memberships and no tenant hint was given")]
    Ambiguous { count: usize },
    #[error("tenant hint does not name a known tenant")]
    UnknownHint,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MembershipResolver<'a> {
    store: &'a dyn AuthzStore,
    cache: &'a DecisionCache,
}

impl<'a> MembershipResolver<'a> {
    pub fn new(store: &'a dyn AuthzStore, cache: &'a DecisionCache) -> Self {
        Self { store, cache }
    }

    /// Resolves the single tenant context of `actor_id`.
    ///
    /// With a hint only the membership in the hinted tenant counts. Without
    /// one the actor must hold exactly one usable membership; several is a
    /// failure, never a guess.
    pub async fn resolve(
        &self,
        actor_id: Uuid,
        hint: Option<&TenantHint>,
    ) -> Result<ResolvedMembership, ResolutionFailure> {
        let hinted_tenant = match hint {
            None => None,
            Some(TenantHint::Id(id)) => Some(*id),
            Some(TenantHint::Slug(slug)) => match self.store.tenant_by_slug(slug).await? {
                Some(tenant) => Some(tenant.id),
                None => return Err(ResolutionFailure::UnknownHint),
            },
            Some(TenantHint::Malformed(_)) => return Err(ResolutionFailure::UnknownHint),
        };

        let memberships = self.memberships(actor_id).await?;
        let candidates = memberships
            .iter()
            .filter(|m| m.is_active())
            .filter(|m| hinted_tenant.map_or(true, |id| m.tenant_id == id));

        let mut usable = Vec::new();
        for membership in candidates {
            if let Some(resolved) = self.eligible(membership).await? {
                usable.push(resolved);
            }
        }

        match usable.len() {
            0 => Err(ResolutionFailure::NoMembership),
            1 => Ok(usable.remove(0)),
            count => Err(ResolutionFailure::Ambiguous { count }),
        }
    }

    async fn memberships(&self, actor_id: Uuid) -> Result<Arc<Vec<Membership>>, StoreError> {
        if let Some(hit) = self.cache.memberships(actor_id) {
            return Ok(hit);
        }
        let loaded = Arc::new(self.store.memberships_for_actor(actor_id).await?);
        self.cache.store_memberships(actor_id, loaded.clone());
        Ok(loaded)
    }

    /// An active membership only counts when its tenant and every ancestor
    /// are active, its role fits the tenant type, and a custom role is used
    /// within its owner's subtree.
    async fn eligible(
        &self,
        membership: &Membership,
    ) -> Result<Option<ResolvedMembership>, StoreError> {
        let Some(tenant) = self.store.tenant(membership.tenant_id).await? else {
            return Ok(None);
        };
        let lineage = self.store.lineage(&tenant).await?;
        if let Err(violation) = assert_lineage_active(&tenant, &lineage) {
            tracing::debug!(
                membership_id = %membership.id,
                reason = %violation,
                "membership skipped"
            );
            return Ok(None);
        }

        let Some(role) = self.store.role(membership.role_id).await? else {
            return Ok(None);
        };
        if !role.scope.is_compatible_with(tenant.tenant_type) {
            tracing::debug!(
                membership_id = %membership.id,
                scope = role.scope.as_str(),
                tenant_type = tenant.tenant_type.as_str(),
                "membership skipped: role scope does not fit tenant"
            );
            return Ok(None);
        }
        if let Some(owner) = role.tenant_id {
            if !lineage.iter().any(|t| t.id == owner) {
                tracing::debug!(
                    membership_id = %membership.id,
                    owner = %owner,
                    "membership skipped: custom role used outside its owner"
                );
                return Ok(None);
            }
        }

        Ok(Some(ResolvedMembership {
            membership: membership.clone(),
            tenant,
            role,
            lineage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::membership::MembershipStatus;
    use crate::models::role::RoleScope;
    use crate::models::tenant::TenantType;
    use crate::store::MemoryStore;
    use crate::utils::utc_now;

    fn role(scope: RoleScope, owner: Option<Uuid>) -> Role {
        let now = utc_now();
        Role {
            id: Uuid::new_v4(),
            name: "r".into(),
            scope,
            is_system: owner.is_none(),
            tenant_id: owner,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn member(user: Uuid, tenant: &Tenant, role: &Role, status: MembershipStatus) -> Membership {
        let now = utc_now();
        Membership {
            id: Uuid::new_v4(),
            user_id: user,
            tenant_id: tenant.id,
            role_id: role.id,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    struct Fixture {
        store: MemoryStore,
        root: Tenant,
        wl: Tenant,
        biz: Tenant,
        other: Tenant,
        wl_role: Role,
        biz_role: Role,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let root = Tenant::root("Platform", "root").unwrap();
        let wl = Tenant::child_of(&root, TenantType::WhiteLabel, "Acme", "acme").unwrap();
        let biz = Tenant::child_of(&wl, TenantType::Business, "Downtown", "downtown").unwrap();
        let other = Tenant::child_of(&root, TenantType::Business, "Zeta", "zeta").unwrap();
        for t in [&root, &wl, &biz, &other] {
            store.put_tenant(t.clone()).await;
        }
        let wl_role = role(RoleScope::WhiteLabel, None);
        let biz_role = role(RoleScope::Business, None);
        store.put_role(wl_role.clone(), &["whitelabel:manage"]).await;
        store.put_role(biz_role.clone(), &["products:edit"]).await;
        Fixture { store, root, wl, biz, other, wl_role, biz_role }
    }

    #[tokio::test]
    async fn single_active_membership_needs_no_hint() {
        let f = fixture().await;
        let user = Uuid::new_v4();
        f.store.put_membership(member(user, &f.wl, &f.wl_role, MembershipStatus::Active)).await;

        let cache = DecisionCache::disabled();
        let resolved = MembershipResolver::new(&f.store, &cache)
            .resolve(user, None)
            .await
            .unwrap();
        assert_eq!(resolved.tenant.id, f.wl.id);
        assert_eq!(resolved.role.id, f.wl_role.id);
        assert_eq!(resolved.lineage.len(), 2);
        assert_eq!(f.root.path.depth(), 1);
    }

    #[tokio::test]
    async fn several_memberships_without_hint_are_ambiguous() {
        let f = fixture().await;
        let user = Uuid::new_v4();
        f.store.put_membership(member(user, &f.biz, &f.biz_role, MembershipStatus::Active)).await;
        f.store.put_membership(member(user, &f.other, &f.biz_role, MembershipStatus::Active)).await;

        let cache = DecisionCache::disabled();
        let resolver = MembershipResolver::new(&f.store, &cache);
        let err = resolver.resolve(user, None).await.unwrap_err();
        assert!(matches!(err, ResolutionFailure::Ambiguous { count: 2 }));

        let resolved = resolver
            .resolve(user, Some(&TenantHint::Slug("zeta".into())))
            .await
            .unwrap();
        assert_eq!(resolved.tenant.id, f.other.id);
    }

    #[tokio::test]
    async fn revoked_and_invited_memberships_are_absent() {
        let f = fixture().await;
        let user = Uuid::new_v4();
        f.store.put_membership(member(user, &f.biz, &f.biz_role, MembershipStatus::Revoked)).await;
        f.store.put_membership(member(user, &f.other, &f.biz_role, MembershipStatus::Invited)).await;

        let cache = DecisionCache::disabled();
        let resolver = MembershipResolver::new(&f.store, &cache);
        assert!(matches!(
            resolver.resolve(user, None).await.unwrap_err(),
            ResolutionFailure::NoMembership
        ));
        assert!(matches!(
            resolver.resolve(user, Some(&TenantHint::Id(f.biz.id))).await.unwrap_err(),
            ResolutionFailure::NoMembership
        ));
    }

    #[tokio::test]
    async fn unknown_or_malformed_hints_fail() {
        let f = fixture().await;
        let user = Uuid::new_v4();
        f.store.put_membership(member(user, &f.wl, &f.wl_role, MembershipStatus::Active)).await;

        let cache = DecisionCache::disabled();
        let resolver = MembershipResolver::new(&f.store, &cache);
        assert!(matches!(
            resolver.resolve(user, Some(&TenantHint::Slug("nope".into()))).await.unwrap_err(),
            ResolutionFailure::UnknownHint
        ));
        assert!(matches!(
            resolver.resolve(user, Some(&TenantHint::Malformed("%%".into()))).await.unwrap_err(),
            ResolutionFailure::UnknownHint
        ));
        assert!(matches!(
            resolver.resolve(user, Some(&TenantHint::Id(f.biz.id))).await.unwrap_err(),
            ResolutionFailure::NoMembership
        ));
    }

    #[tokio::test]
    async fn inactive_ancestor_hides_membership() {
        let f = fixture().await;
        let user = Uuid::new_v4();
        f.store.put_membership(member(user, &f.biz, &f.biz_role, MembershipStatus::Active)).await;
        f.store.set_tenant_active(f.wl.id, false).await;

        let cache = DecisionCache::disabled();
        let err = MembershipResolver::new(&f.store, &cache)
            .resolve(user, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionFailure::NoMembership));
    }

    #[tokio::test]
    async fn incompatible_scope_hides_membership() {
        let f = fixture().await;
        let user = Uuid::new_v4();
        f.store.put_membership(member(user, &f.wl, &f.biz_role, MembershipStatus::Active)).await;

        let cache = DecisionCache::disabled();
        let err = MembershipResolver::new(&f.store, &cache)
            .resolve(user, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionFailure::NoMembership));
    }

    #[tokio::test]
    async fn custom_role_only_counts_inside_its_owner() {
        let f = fixture().await;
        let custom = role(RoleScope::Business, Some(f.wl.id));
        f.store.put_role(custom.clone(), &["sales:view"]).await;

        let inside = Uuid::new_v4();
        let outside = Uuid::new_v4();
        f.store.put_membership(member(inside, &f.biz, &custom, MembershipStatus::Active)).await;
        f.store.put_membership(member(outside, &f.other, &custom, MembershipStatus::Active)).await;

        let cache = DecisionCache::disabled();
        let resolver = MembershipResolver::new(&f.store, &cache);
        assert!(resolver.resolve(inside, None).await.is_ok());
        assert!(matches!(
            resolver.resolve(outside, None).await.unwrap_err(),
            ResolutionFailure::NoMembership
        ));
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let f = fixture().await;
        f.store.set_unavailable(true);

        let cache = DecisionCache::disabled();
        let err = MembershipResolver::new(&f.store, &cache)
            .resolve(Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionFailure::Store(_)));
    }
}
