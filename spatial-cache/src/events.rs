//! Node access notifications.
//!
//! The index fires a hook whenever a non-root node is read from storage,
//! written to storage or evicted. The cache uses these to keep its eviction
//! policy informed; callers may register their own hooks as well.

use crate::node::NodeId;

/// Callback invoked with the identifier of the node concerned.
pub type NodeHook = Box<dyn FnMut(&NodeId) + Send>;

/// Registered read, write and delete hooks.
#[derive(Default)]
pub struct NodeHooks {
    on_read: Vec<NodeHook>,
    on_write: Vec<NodeHook>,
    on_delete: Vec<NodeHook>,
}

impl NodeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read(&mut self, hook: impl FnMut(&NodeId) + Send + 'static) {
        self.on_read.push(Box::new(hook));
    }

    pub fn on_write(&mut self, hook: impl FnMut(&NodeId) + Send + 'static) {
        self.on_write.push(Box::new(hook));
    }

    pub fn on_delete(&mut self, hook: impl FnMut(&NodeId) + Send + 'static) {
        self.on_delete.push(Box::new(hook));
    }

    pub(crate) fn fire_read(&mut self, id: &NodeId) {
        self.on_read.iter_mut().for_each(|hook| hook(id));
    }

    pub(crate) fn fire_write(&mut self, id: &NodeId) {
        self.on_write.iter_mut().for_each(|hook| hook(id));
    }

    pub(crate) fn fire_delete(&mut self, id: &NodeId) {
        self.on_delete.iter_mut().for_each(|hook| hook(id));
    }
}

impl std::fmt::Debug for NodeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHooks")
            .field("on_read", &self.on_read.len())
            .field("on_write", &self.on_write.len())
            .field("on_delete", &self.on_delete.len())
            .finish()
    }
}
