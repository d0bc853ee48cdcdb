//! In-process store used by unit tests and the engine's own tests. It can be
//! slowed down or switched off to exercise the fail-closed paths.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuthzStore, StoreError, StoreResult};
use crate::authz::hierarchy::TenantPath;
use crate::models::membership::Membership;
use crate::models::role::Role;
use crate::models::tenant::Tenant;

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    roles: HashMap<Uuid, Role>,
    grants: HashMap<Uuid, BTreeSet<String>>,
    memberships: HashMap<Uuid, Membership>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    latency: Option<Duration>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn put_tenant(&self, tenant: Tenant) {
        self.tables.write().await.tenants.insert(tenant.id, tenant);
    }

    pub async fn set_tenant_active(&self, id: Uuid, active: bool) {
        if let Some(t) = self.tables.write().await.tenants.get_mut(&id) {
            t.active = active;
        }
    }

    pub async fn put_role(&self, role: Role, keys: &[&str]) {
        let mut tables = self.tables.write().await;
        tables
            .grants
            .insert(role.id, keys.iter().map(|k| k.to_string()).collect());
        tables.roles.insert(role.id, role);
    }

    /// Replaces a role's grants and bumps its version, as an edit would.
    pub async fn set_role_grants(&self, role_id: Uuid, keys: &[&str]) {
        let mut tables = self.tables.write().await;
        tables
            .grants
            .insert(role_id, keys.iter().map(|k| k.to_string()).collect());
        if let Some(role) = tables.roles.get_mut(&role_id) {
            role.version += 1;
        }
    }

    pub async fn put_membership(&self, membership: Membership) {
        self.tables
            .write()
            .await
            .memberships
            .insert(membership.id, membership);
    }

    async fn gate(&self) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthzStore for MemoryStore {
    async fn tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        self.gate().await?;
        Ok(self.tables.read().await.tenants.get(&id).cloned())
    }

    async fn tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        self.gate().await?;
        let tables = self.tables.read().await;
        Ok(tables.tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn tenants_by_paths(&self, paths: &[TenantPath]) -> StoreResult<Vec<Tenant>> {
        self.gate().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .tenants
            .values()
            .filter(|t| paths.contains(&t.path))
            .cloned()
            .collect())
    }

    async fn subtree(&self, path: &TenantPath) -> StoreResult<Vec<Tenant>> {
        self.gate().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .tenants
            .values()
            .filter(|t| path.contains(&t.path))
            .cloned()
            .collect())
    }

    async fn role(&self, id: Uuid) -> StoreResult<Option<Role>> {
        self.gate().await?;
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn role_permission_keys(&self, role_id: Uuid) -> StoreResult<Vec<String>> {
        self.gate().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .grants
            .get(&role_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn memberships_for_actor(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        self.gate().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn active_member_ids(&self, tenant_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        self.gate().await?;
        let tables = self.tables.read().await;
        let ids: BTreeSet<Uuid> = tables
            .memberships
            .values()
            .filter(|m| m.is_active() && tenant_ids.contains(&m.tenant_id))
            .map(|m| m.user_id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}
