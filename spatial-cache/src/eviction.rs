//! Least-recently-used eviction of index tiles.
//!
//! Index hooks do not touch the policy directly: they append to an
//! [`AccessLog`] that the owner of the policy drains before choosing a
//! victim. Eviction itself fires a delete hook, so the policy is never
//! borrowed from inside a hook.

use std::sync::Arc;

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::errors::CacheResult;
use crate::events::NodeHooks;
use crate::node::NodeId;

/// A tree whose nodes can be evicted by identifier.
pub trait EvictableTree {
    /// Drops the node and its data, returning how many entries were
    /// discarded, or `None` when the node is absent or not evictable.
    fn evict(&mut self, id: &NodeId) -> CacheResult<Option<usize>>;
}

impl<P, S, C> EvictableTree for crate::index::GridIndex<P, S, C>
where
    P: Clone,
    S: crate::storage::NodeStorage,
    C: crate::storage::PayloadCodec<P>,
{
    fn evict(&mut self, id: &NodeId) -> CacheResult<Option<usize>> {
        if id == self.root_id() || !self.contains_tile(id) {
            return Ok(None);
        }
        self.evict_node(id).map(Some)
    }
}

/// A node access reported by the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessEvent {
    /// The node was read or written.
    Touched(NodeId),
    /// The node left storage.
    Dropped(NodeId),
}

/// Ordered journal of node accesses, filled by index hooks.
#[derive(Clone, Debug, Default)]
pub struct AccessLog {
    events: Arc<Mutex<Vec<AccessEvent>>>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers read, write and delete hooks feeding this log.
    pub fn attach(&self, hooks: &mut NodeHooks) {
        let on_read = self.clone();
        hooks.on_read(move |id| on_read.record(AccessEvent::Touched(id.clone())));
        let on_write = self.clone();
        hooks.on_write(move |id| on_write.record(AccessEvent::Touched(id.clone())));
        let on_delete = self.clone();
        hooks.on_delete(move |id| on_delete.record(AccessEvent::Dropped(id.clone())));
    }

    pub fn record(&self, event: AccessEvent) {
        self.events.lock().push(event);
    }

    /// Takes every pending event, oldest first.
    pub fn drain(&self) -> Vec<AccessEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Access-ordered set of node identifiers.
pub struct LruEvictionPolicy {
    queue: LruCache<NodeId, ()>,
}

impl Default for LruEvictionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LruEvictionPolicy {
    pub fn new() -> Self {
        LruEvictionPolicy {
            queue: LruCache::unbounded(),
        }
    }

    /// Marks `id` as most recently used, inserting it if unknown.
    pub fn access(&mut self, id: &NodeId) {
        self.queue.put(id.clone(), ());
    }

    /// Removes and returns the least recently used identifier.
    pub fn next_victim(&mut self) -> Option<NodeId> {
        self.queue.pop_lru().map(|(id, _)| id)
    }

    /// Stops tracking `id`.
    pub fn forget(&mut self, id: &NodeId) {
        self.queue.pop(id);
    }

    pub fn apply(&mut self, event: &AccessEvent) {
        match event {
            AccessEvent::Touched(id) => self.access(id),
            AccessEvent::Dropped(id) => self.forget(id),
        }
    }

    /// Evicts the least recently used node from `tree`. Returns the evicted
    /// identifier and the number of entries dropped, or `None` when no
    /// tracked node can be evicted.
    ///
    /// Identifiers the tree no longer holds are discarded on the way.
    pub fn evict<T>(&mut self, tree: &mut T) -> CacheResult<Option<(NodeId, usize)>>
    where
        T: EvictableTree + ?Sized,
    {
        while let Some(victim) = self.next_victim() {
            match tree.evict(&victim)? {
                Some(dropped) => {
                    debug!("LRU evicted {} ({} entries)", victim, dropped);
                    return Ok(Some((victim, dropped)));
                }
                None => debug!("Skipping {}, no longer stored", victim),
            }
        }
        Ok(None)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.queue.contains(id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl std::fmt::Debug for LruEvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruEvictionPolicy")
            .field("tracked", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use std::collections::HashMap;

    fn id(name: u8) -> NodeId {
        let x = name as f64;
        NodeId::new(Region::rect(x, 0.0, x + 1.0, 1.0))
    }

    #[derive(Default)]
    struct FakeTree {
        sizes: HashMap<NodeId, usize>,
        evicted: Vec<NodeId>,
    }

    impl EvictableTree for FakeTree {
        fn evict(&mut self, id: &NodeId) -> CacheResult<Option<usize>> {
            self.evicted.push(id.clone());
            Ok(self.sizes.remove(id))
        }
    }

    #[test]
    fn test_access_order_a_b_a_evicts_b() {
        let (a, b) = (id(0), id(1));
        let mut policy = LruEvictionPolicy::new();
        let mut tree = FakeTree::default();
        tree.sizes.insert(a.clone(), 3);
        tree.sizes.insert(b.clone(), 5);

        policy.access(&a);
        policy.access(&b);
        policy.access(&a);

        let (victim, dropped) = policy.evict(&mut tree).unwrap().unwrap();
        assert_eq!(victim, b);
        assert_eq!(dropped, 5);
        assert!(policy.contains(&a));
        assert!(!policy.contains(&b));
    }

    #[test]
    fn test_evict_on_empty_policy_is_noop() {
        let mut policy = LruEvictionPolicy::new();
        let mut tree = FakeTree::default();
        assert!(policy.evict(&mut tree).unwrap().is_none());
        assert!(tree.evicted.is_empty());
    }

    #[test]
    fn test_evict_skips_nodes_the_tree_lost() {
        let mut policy = LruEvictionPolicy::new();
        let mut tree = FakeTree::default();
        tree.sizes.insert(id(2), 4);
        policy.access(&id(1));
        policy.access(&id(2));

        assert_eq!(policy.evict(&mut tree).unwrap(), Some((id(2), 4)));
        assert_eq!(tree.evicted, vec![id(1), id(2)]);
        assert!(policy.is_empty());
        assert!(policy.evict(&mut tree).unwrap().is_none());
    }

    #[test]
    fn test_repeated_access_does_not_duplicate() {
        let mut policy = LruEvictionPolicy::new();
        for _ in 0..5 {
            policy.access(&id(7));
        }
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_forget() {
        let mut policy = LruEvictionPolicy::new();
        policy.access(&id(0));
        policy.access(&id(1));
        policy.forget(&id(0));
        policy.forget(&id(9));
        assert_eq!(policy.next_victim(), Some(id(1)));
        assert_eq!(policy.next_victim(), None);
    }

    #[test]
    fn test_victims_in_least_recent_order() {
        let mut policy = LruEvictionPolicy::new();
        for n in 0..4 {
            policy.access(&id(n));
        }
        policy.access(&id(1));

        let order: Vec<NodeId> = std::iter::from_fn(|| policy.next_victim()).collect();
        assert_eq!(order, vec![id(0), id(2), id(3), id(1)]);
        assert!(policy.is_empty());
    }

    #[test]
    fn test_access_log_replays_hooks_in_order() {
        let log = AccessLog::new();
        let mut hooks = NodeHooks::new();
        log.attach(&mut hooks);

        hooks.fire_write(&id(0));
        hooks.fire_write(&id(1));
        hooks.fire_read(&id(0));
        hooks.fire_delete(&id(1));
        assert_eq!(log.len(), 4);

        let mut policy = LruEvictionPolicy::new();
        for event in log.drain() {
            policy.apply(&event);
        }
        assert!(log.is_empty());
        assert!(!policy.contains(&id(1)));
        assert_eq!(policy.next_victim(), Some(id(0)));
    }

    #[test]
    fn test_evicting_a_grid_tile_through_the_policy() {
        use crate::index::GridIndex;
        use crate::storage::{BincodeCodec, MemoryStorage};

        let mut index: GridIndex<String, _, _> = GridIndex::new(
            Region::rect(0.0, 0.0, 1.0, 1.0),
            4,
            MemoryStorage::new(),
            BincodeCodec,
        )
        .unwrap();
        let log = AccessLog::new();
        log.attach(index.hooks_mut());
        index
            .insert_data("a".into(), Region::rect(0.1, 0.1, 0.2, 0.2), 1)
            .unwrap();
        index
            .insert_data("b".into(), Region::rect(0.7, 0.7, 0.8, 0.8), 2)
            .unwrap();

        let mut policy = LruEvictionPolicy::new();
        log.drain().iter().for_each(|e| policy.apply(e));
        let root = index.root_id().clone();
        policy.access(&root);

        let (victim, dropped) = policy.evict(&mut index).unwrap().unwrap();
        assert_eq!(victim.region(), &Region::rect(0.0, 0.0, 0.5, 0.5));
        assert_eq!(dropped, 1);
        assert_eq!(log.drain(), vec![AccessEvent::Dropped(victim)]);

        // The root is tracked but never evicted.
        let (victim, _) = policy.evict(&mut index).unwrap().unwrap();
        assert_eq!(victim.region(), &Region::rect(0.5, 0.5, 1.0, 1.0));
        assert!(policy.evict(&mut index).unwrap().is_none());
        assert_eq!(index.statistics().data_count, 0);
    }
}
