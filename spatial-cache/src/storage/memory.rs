use std::collections::HashMap;

use super::NodeStorage;
use crate::errors::CacheResult;
use crate::node::NodeId;

/// Volatile node storage backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: HashMap<NodeId, Vec<u8>>,
    metadata: Option<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStorage for MemoryStorage {
    fn put(&mut self, id: &NodeId, bytes: Vec<u8>) -> CacheResult<()> {
        self.nodes.insert(id.clone(), bytes);
        Ok(())
    }

    fn get(&self, id: &NodeId) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.nodes.get(id).cloned())
    }

    fn remove(&mut self, id: &NodeId) -> CacheResult<bool> {
        Ok(self.nodes.remove(id).is_some())
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn clear(&mut self) -> CacheResult<()> {
        self.nodes.clear();
        self.metadata = None;
        Ok(())
    }

    fn put_metadata(&mut self, bytes: Vec<u8>) -> CacheResult<()> {
        self.metadata = Some(bytes);
        Ok(())
    }

    fn metadata(&self) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.metadata.clone())
    }
}
