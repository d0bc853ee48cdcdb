//! Role to permission-set aggregation and the ANY/ALL requirement check.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::DecisionCache;
use crate::store::{AuthzStore, StoreResult};

/// The permission keys a role grants. Only membership matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(Arc<BTreeSet<String>>);

impl PermissionSet {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self(Arc::new(keys.into_iter().collect()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Arc<BTreeSet<String>>> for PermissionSet {
    fn from(value: Arc<BTreeSet<String>>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

/// Permission keys an operation declares, in declaration order without
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    keys: Vec<String>,
    mode: MatchMode,
}

impl Requirement {
    pub fn new<I, S>(keys: I, mode: MatchMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if !out.contains(&key) {
                out.push(key);
            }
        }
        Self { keys: out, mode }
    }

    pub fn any<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, MatchMode::Any)
    }

    pub fn all<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, MatchMode::All)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MatchMode) {
        self.mode = mode;
    }

    pub fn push(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    /// An operation that declares no keys only needs a tenant context.
    pub fn is_satisfied_by(&self, granted: &PermissionSet) -> bool {
        if self.keys.is_empty() {
            return true;
        }
        match self.mode {
            MatchMode::Any => self.keys.iter().any(|k| granted.contains(k)),
            MatchMode::All => self.keys.iter().all(|k| granted.contains(k)),
        }
    }

    /// Keys the grant set lacks; used for deny logs.
    pub fn missing<'a>(&'a self, granted: &PermissionSet) -> Vec<&'a str> {
        self.keys
            .iter()
            .filter(|k| !granted.contains(k))
            .map(String::as_str)
            .collect()
    }
}

/// Resolves a role's grant set. Roles never inherit from one another, so the
/// set is exactly the role's own permission links.
pub struct PermissionAggregator<'a> {
    store: &'a dyn AuthzStore,
    cache: &'a DecisionCache,
}

impl<'a> PermissionAggregator<'a> {
    pub fn new(store: &'a dyn AuthzStore, cache: &'a DecisionCache) -> Self {
        Self { store, cache }
    }

    /// Grant set for `role_id` at `version`. The version comes from a role row
    /// read in the same request.
    pub async fn permissions_for(&self, role_id: Uuid, version: i64) -> StoreResult<PermissionSet> {
        if let Some(hit) = self.cache.permission_set(role_id, version) {
            tracing::debug!(role_id = %role_id, version, "permission set cache hit");
            return Ok(PermissionSet::from(hit));
        }

        let keys: Arc<BTreeSet<String>> = Arc::new(
            self.store
                .role_permission_keys(role_id)
                .await?
                .into_iter()
                .collect(),
        );
        tracing::debug!(
            role_id = %role_id,
            version,
            count = keys.len(),
            "permission set loaded"
        );

        self.cache.store_permission_set(role_id, version, keys.clone());
        Ok(PermissionSet::from(keys))
    }

    /// Grant set straight from the store, bypassing the cache.
    pub async fn fresh(&self, role_id: Uuid) -> StoreResult<PermissionSet> {
        Ok(PermissionSet::new(self.store.role_permission_keys(role_id).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::{Role, RoleScope};
    use crate::store::MemoryStore;
    use crate::utils::utc_now;
    use std::time::Duration;

    fn set(keys: &[&str]) -> PermissionSet {
        PermissionSet::new(keys.iter().map(|k| k.to_string()))
    }

    #[test]
    fn require_all_needs_every_key() {
        let granted = set(&["a:x"]);
        assert!(!Requirement::all(["a:x", "b:y"]).is_satisfied_by(&granted));
        assert!(Requirement::any(["a:x", "b:y"]).is_satisfied_by(&granted));
        assert!(Requirement::all(["a:x"]).is_satisfied_by(&granted));
    }

    #[test]
    fn default_mode_is_any() {
        assert_eq!(Requirement::default().mode(), MatchMode::Any);
    }

    #[test]
    fn empty_requirement_is_always_met() {
        let nothing = set(&[]);
        assert!(Requirement::any(Vec::<String>::new()).is_satisfied_by(&nothing));
        assert!(Requirement::all(Vec::<String>::new()).is_satisfied_by(&nothing));
    }

    #[test]
    fn duplicates_are_dropped_in_order() {
        let req = Requirement::any(["b:y", "a:x", "b:y"]);
        assert_eq!(req.keys(), &["b:y".to_string(), "a:x".to_string()]);
        assert_eq!(req.missing(&set(&["a:x"])), vec!["b:y"]);
    }

    #[tokio::test]
    async fn new_role_version_misses_the_cache() {
        let store = MemoryStore::new();
        let now = utc_now();
        let role = Role {
            id: Uuid::new_v4(),
            name: "clerk".into(),
            scope: RoleScope::Employee,
            is_system: false,
            tenant_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        store.put_role(role.clone(), &["products:view"]).await;

        let cache = DecisionCache::new(Duration::from_secs(60));
        let aggregator = PermissionAggregator::new(&store, &cache);

        let v1 = aggregator.permissions_for(role.id, 1).await.unwrap();
        assert!(v1.contains("products:view"));

        store.set_role_grants(role.id, &["sales:create"]).await;
        let still_v1 = aggregator.permissions_for(role.id, 1).await.unwrap();
        assert!(still_v1.contains("products:view"));

        let v2 = aggregator.permissions_for(role.id, 2).await.unwrap();
        assert!(v2.contains("sales:create"));
        assert!(!v2.contains("products:view"));
    }
}
