//! Shared relations cache
//!
//! One process-wide adjacency map (parent key -> set of child keys) merged
//! from every cluster snapshot seen so far. Merges only ever add edges;
//! child sets never shrink for the process lifetime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use crate::resource::ResourceKey;

/// A kind-level adjacency snapshot as produced by a relation miner.
pub type RelationSnapshot = HashMap<ResourceKey, HashSet<ResourceKey>>;

/// Thread-safe adjacency map shared across workers within a run.
///
/// The lock is held per-operation, never across an await point. Closure
/// lookups take the read lock once per expanded key so concurrent merges
/// from other workers are not starved behind a long traversal.
#[derive(Debug, Default)]
pub struct RelationsCache {
    inner: RwLock<RelationSnapshot>,
}

impl RelationsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a cluster snapshot into the shared map.
    ///
    /// Per-parent set union; existing children are never removed, so merging
    /// is commutative and re-merging the same snapshot is a no-op.
    pub fn merge(&self, snapshot: &RelationSnapshot) {
        let mut map = self.inner.write().unwrap();
        for (parent, children) in snapshot {
            map.entry(parent.clone())
                .or_default()
                .extend(children.iter().cloned());
        }
    }

    /// True when every seed is already present as a parent key.
    pub fn contains_all(&self, seeds: &HashSet<ResourceKey>) -> bool {
        let map = self.inner.read().unwrap();
        seeds.iter().all(|key| map.contains_key(key))
    }

    /// Insert empty adjacency entries for any seed not yet present, so the
    /// same seeds do not re-trigger a cluster sync on every closure call.
    pub fn insert_missing(&self, seeds: &HashSet<ResourceKey>) {
        let mut map = self.inner.write().unwrap();
        for key in seeds {
            map.entry(key.clone()).or_default();
        }
    }

    /// Breadth-first closure of the seed set over the cached adjacency.
    ///
    /// Every seed is included in the result even when it has no outgoing
    /// edges; each key is visited at most once, so cycles terminate. Unknown
    /// children are included but not expanded further.
    pub fn closure(&self, seeds: &HashSet<ResourceKey>) -> HashSet<ResourceKey> {
        let mut visited: HashSet<ResourceKey> = HashSet::new();
        let mut queue: VecDeque<ResourceKey> = seeds.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            // Read lock per lookup, not for the whole traversal
            let children = {
                let map = self.inner.read().unwrap();
                map.get(&current).cloned()
            };
            if let Some(children) = children {
                queue.extend(children);
            }
        }

        visited
    }

    /// Number of parent keys currently known.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(group: &str, kind: &str) -> ResourceKey {
        ResourceKey::new(group, kind)
    }

    fn snapshot(edges: &[(&str, &str, &str, &str)]) -> RelationSnapshot {
        let mut snap = RelationSnapshot::new();
        for (pg, pk, cg, ck) in edges {
            snap.entry(key(pg, pk)).or_default().insert(key(cg, ck));
        }
        snap
    }

    #[test]
    fn test_merge_is_additive() {
        let cache = RelationsCache::new();
        cache.merge(&snapshot(&[("apps", "Deployment", "", "Pod")]));
        cache.merge(&snapshot(&[("apps", "Deployment", "", "ConfigMap")]));

        let closure = cache.closure(&HashSet::from([key("apps", "Deployment")]));
        assert!(closure.contains(&key("", "Pod")));
        assert!(closure.contains(&key("", "ConfigMap")));
    }

    #[test]
    fn test_closure_includes_seed_without_edges() {
        let cache = RelationsCache::new();
        let seeds = HashSet::from([key("batch", "CronJob")]);
        let closure = cache.closure(&seeds);
        assert_eq!(closure, seeds);
    }

    #[test]
    fn test_closure_terminates_on_cycle() {
        let cache = RelationsCache::new();
        cache.merge(&snapshot(&[
            ("apps", "A", "apps", "B"),
            ("apps", "B", "apps", "A"),
        ]));

        let closure = cache.closure(&HashSet::from([key("apps", "A")]));
        assert_eq!(
            closure,
            HashSet::from([key("apps", "A"), key("apps", "B")])
        );
    }

    #[test]
    fn test_insert_missing_is_idempotent() {
        let cache = RelationsCache::new();
        let seeds = HashSet::from([key("apps", "Deployment")]);
        assert!(!cache.contains_all(&seeds));

        cache.insert_missing(&seeds);
        assert!(cache.contains_all(&seeds));
        let before = cache.len();
        cache.insert_missing(&seeds);
        assert_eq!(cache.len(), before);
    }
}
