//! Short-lived read-through cache in front of the store.
//!
//! Permission sets are keyed by `(role_id, version)`. The role row itself is
//! always read fresh, so an edited role misses the cache on the next request
//! even before its entry expires. Membership lists are keyed by actor and
//! dropped whenever a membership of that actor changes.
//!
//! Inserts sweep out expired entries at most once per TTL, so keys that are
//! never read again do not pile up.

use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::membership::Membership;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Map with a fixed time-to-live per entry. A zero TTL stores nothing.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    born: Instant,
    /// Milliseconds after `born` at which the next insert sweeps.
    next_sweep: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            born: Instant::now(),
            next_sweep: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        }
        hit
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.is_enabled() {
            return;
        }
        self.maybe_sweep();
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn maybe_sweep(&self) {
        let now_ms = self.born.elapsed().as_millis() as u64;
        let due = self.next_sweep.load(Ordering::Relaxed);
        if now_ms < due {
            return;
        }
        let period = (self.ttl.as_millis() as u64).max(1);
        // One caller wins the sweep; the rest carry on inserting.
        if self
            .next_sweep
            .compare_exchange(due, now_ms + period, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type PermissionKeys = Arc<BTreeSet<String>>;

#[derive(Debug)]
pub struct DecisionCache {
    permission_sets: TtlCache<(Uuid, i64), PermissionKeys>,
    memberships: TtlCache<Uuid, Arc<Vec<Membership>>>,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            permission_sets: TtlCache::new(ttl),
            memberships: TtlCache::new(ttl),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn permission_set(&self, role_id: Uuid, version: i64) -> Option<PermissionKeys> {
        self.permission_sets.get(&(role_id, version))
    }

    pub fn store_permission_set(&self, role_id: Uuid, version: i64, keys: PermissionKeys) {
        self.permission_sets.insert((role_id, version), keys);
    }

    pub fn memberships(&self, actor_id: Uuid) -> Option<Arc<Vec<Membership>>> {
        self.memberships.get(&actor_id)
    }

    pub fn store_memberships(&self, actor_id: Uuid, memberships: Arc<Vec<Membership>>) {
        self.memberships.insert(actor_id, memberships);
    }

    /// Drops every cached version of the role's permission set.
    pub fn invalidate_role(&self, role_id: Uuid) {
        self.permission_sets.retain(|(id, _)| *id != role_id);
    }

    pub fn invalidate_actor(&self, actor_id: Uuid) {
        self.memberships.remove(&actor_id);
    }

    pub fn clear(&self) {
        self.permission_sets.clear();
        self.memberships.clear();
    }
}
