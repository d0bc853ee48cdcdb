//! Translates "operate within tenant T" into "operate over records owned by
//! these actors", for collaborators that scope by owner columns.

use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::hierarchy::visible_subtree;
use crate::store::{AuthzStore, StoreResult};

/// Actors whose data is visible under a tenant. Empty means nothing is visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActorScope(BTreeSet<Uuid>);

impl ActorScope {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, actor_id: &Uuid) -> bool {
        self.0.contains(actor_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uuid> {
        self.0.iter()
    }

    pub fn is_superset(&self, other: &ActorScope) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Appends `column IN (...)` to a query. An empty scope appends a
    /// predicate that matches no row.
    pub fn push_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>, column: &str) {
        if self.0.is_empty() {
            qb.push("1 = 0");
            return;
        }
        qb.push(column);
        qb.push(" IN (");
        let mut sep = qb.separated(", ");
        for id in &self.0 {
            sep.push_bind(id.to_string());
        }
        sep.push_unseparated(")");
    }
}

impl FromIterator<Uuid> for ActorScope {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Actors holding an active membership in `tenant_id` or in any descendant
/// reachable through active tenants only. An unknown or inactive tenant yields
/// an empty scope.
pub async fn expand_to_actor_ids(store: &dyn AuthzStore, tenant_id: Uuid) -> StoreResult<ActorScope> {
    let Some(root) = store.tenant(tenant_id).await? else {
        return Ok(ActorScope::default());
    };
    let lineage = store.lineage(&root).await?;
    let subtree = store.subtree(&root.path).await?;

    let visible: Vec<Uuid> = visible_subtree(&root, &lineage, &subtree)
        .into_iter()
        .map(|t| t.id)
        .collect();
    if visible.is_empty() {
        return Ok(ActorScope::default());
    }

    let actors: ActorScope = store.active_member_ids(&visible).await?.into_iter().collect();
    tracing::debug!(
        tenant_id = %tenant_id,
        tenants = visible.len(),
        actors = actors.len(),
        "expanded tenant to actor scope"
    );
    Ok(actors)
}
