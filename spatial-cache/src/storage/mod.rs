//! Storage boundary of the index.
//!
//! A [`NodeStorage`] maps node identifiers to marshalled node bytes and holds
//! one extra metadata slot, used to checkpoint the root. The
//! [`NodeMarshaller`] converts nodes to and from those bytes.

mod disk;
mod marshaller;
mod memory;

pub use disk::{CompactionStats, FileStorage};
pub use marshaller::{BincodeCodec, NodeMarshaller, PayloadCodec, RawBytesCodec};
pub use memory::MemoryStorage;

use crate::errors::CacheResult;
use crate::node::NodeId;

/// Keyed byte store for index nodes.
///
/// `put` overwrites, `remove` of an absent key is not an error, and a
/// missing key is reported as `Ok(None)`.
pub trait NodeStorage: Send {
    fn put(&mut self, id: &NodeId, bytes: Vec<u8>) -> CacheResult<()>;

    fn get(&self, id: &NodeId) -> CacheResult<Option<Vec<u8>>>;

    /// Removes the entry, returning whether it existed.
    fn remove(&mut self, id: &NodeId) -> CacheResult<bool>;

    fn contains(&self, id: &NodeId) -> bool;

    /// Identifiers of every stored node, in no particular order.
    fn ids(&self) -> Vec<NodeId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every node and the metadata slot.
    fn clear(&mut self) -> CacheResult<()>;

    fn put_metadata(&mut self, bytes: Vec<u8>) -> CacheResult<()>;

    fn metadata(&self) -> CacheResult<Option<Vec<u8>>>;

    /// Makes previous writes durable. No-op for volatile backends.
    fn sync(&mut self) -> CacheResult<()> {
        Ok(())
    }
}

impl<S: NodeStorage + ?Sized> NodeStorage for Box<S> {
    fn put(&mut self, id: &NodeId, bytes: Vec<u8>) -> CacheResult<()> {
        (**self).put(id, bytes)
    }

    fn get(&self, id: &NodeId) -> CacheResult<Option<Vec<u8>>> {
        (**self).get(id)
    }

    fn remove(&mut self, id: &NodeId) -> CacheResult<bool> {
        (**self).remove(id)
    }

    fn contains(&self, id: &NodeId) -> bool {
        (**self).contains(id)
    }

    fn ids(&self) -> Vec<NodeId> {
        (**self).ids()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn clear(&mut self) -> CacheResult<()> {
        (**self).clear()
    }

    fn put_metadata(&mut self, bytes: Vec<u8>) -> CacheResult<()> {
        (**self).put_metadata(bytes)
    }

    fn metadata(&self) -> CacheResult<Option<Vec<u8>>> {
        (**self).metadata()
    }

    fn sync(&mut self) -> CacheResult<()> {
        (**self).sync()
    }
}
