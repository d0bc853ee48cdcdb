//! Read model the engine consumes from the persistence collaborator.
//!
//! The engine only ever reads through [`AuthzStore`]. Writes made by the
//! administrative routes live on [`SqliteStore`] directly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::authz::hierarchy::TenantPath;
use crate::models::membership::Membership;
use crate::models::role::Role;
use crate::models::tenant::Tenant;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store call exceeded its {0:?} deadline")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>>;
    async fn tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>>;
    /// Tenants whose path is one of `paths`; missing paths are simply absent.
    async fn tenants_by_paths(&self, paths: &[TenantPath]) -> StoreResult<Vec<Tenant>>;
    /// The tenant at `path` and every tenant below it.
    async fn subtree(&self, path: &TenantPath) -> StoreResult<Vec<Tenant>>;

    async fn role(&self, id: Uuid) -> StoreResult<Option<Role>>;
    async fn role_permission_keys(&self, role_id: Uuid) -> StoreResult<Vec<String>>;

    /// Every membership row of the actor, whatever its status.
    async fn memberships_for_actor(&self, user_id: Uuid) -> StoreResult<Vec<Membership>>;
    /// Distinct actors holding an active membership in any of `tenant_ids`.
    async fn active_member_ids(&self, tenant_ids: &[Uuid]) -> StoreResult<Vec<Uuid>>;

    /// The tenant itself plus all its stored ancestors.
    async fn lineage(&self, tenant: &Tenant) -> StoreResult<Vec<Tenant>> {
        self.tenants_by_paths(&tenant.path.lineage()).await
    }
}

/// Runs a store call under a deadline. An elapsed deadline is an error like any
/// other; nothing is retried.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

/// Wraps a store so that every call carries the same deadline.
#[derive(Clone)]
pub struct TimedStore {
    inner: Arc<dyn AuthzStore>,
    deadline: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn AuthzStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl AuthzStore for TimedStore {
    async fn tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        with_deadline(self.deadline, self.inner.tenant(id)).await
    }

    async fn tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        with_deadline(self.deadline, self.inner.tenant_by_slug(slug)).await
    }

    async fn tenants_by_paths(&self, paths: &[TenantPath]) -> StoreResult<Vec<Tenant>> {
        with_deadline(self.deadline, self.inner.tenants_by_paths(paths)).await
    }

    async fn subtree(&self, path: &TenantPath) -> StoreResult<Vec<Tenant>> {
        with_deadline(self.deadline, self.inner.subtree(path)).await
    }

    async fn role(&self, id: Uuid) -> StoreResult<Option<Role>> {
        with_deadline(self.deadline, self.inner.role(id)).await
    }

    async fn role_permission_keys(&self, role_id: Uuid) -> StoreResult<Vec<String>> {
        with_deadline(self.deadline, self.inner.role_permission_keys(role_id)).await
    }

    async fn memberships_for_actor(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        with_deadline(self.deadline, self.inner.memberships_for_actor(user_id)).await
    }

    async fn active_member_ids(&self, tenant_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        with_deadline(self.deadline, self.inner.active_member_ids(tenant_ids)).await
    }
}
