//! Index nodes and their identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::{GridLayout, Partitioning};
use crate::region::Region;

/// Caller-supplied identifier of a data entry.
pub type EntryId = u64;

/// Identifier of an index node.
///
/// A node is identified by its region: two identifiers are equal exactly when
/// their regions are coordinate-for-coordinate equal. Tile regions are
/// recomputed from the same arithmetic on every split, so this is stable for
/// a given root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(Region);

impl NodeId {
    pub fn new(region: Region) -> Self {
        NodeId(region)
    }

    pub fn region(&self) -> &Region {
        &self.0
    }

    pub fn into_region(self) -> Region {
        self.0
    }
}

impl From<Region> for NodeId {
    fn from(region: Region) -> Self {
        NodeId(region)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node{}", self.0)
    }
}

/// A payload stored in a node together with its identifier and shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataEntry<P> {
    pub id: EntryId,
    pub shape: Region,
    pub payload: P,
}

/// A record as handed to and returned by the cache.
pub type Record<P> = DataEntry<P>;

impl<P> DataEntry<P> {
    pub fn new(id: EntryId, shape: Region, payload: P) -> Self {
        DataEntry { id, shape, payload }
    }
}

/// What a node is: the grid root holding the partition, or a leaf tile.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Root(GridLayout),
    Tile,
}

/// A node of the index tree.
///
/// The root has one child per grid tile; tiles are leaves and never have
/// children. Both kinds may carry data.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<P> {
    id: NodeId,
    kind: NodeKind,
    children: Vec<NodeId>,
    entries: Vec<DataEntry<P>>,
}

impl<P> Node<P> {
    /// Creates the root over `region`, with one child per tile of `layout`.
    pub fn root(region: Region, layout: GridLayout) -> Self {
        let children = layout.split(&region);
        Node {
            id: NodeId::new(region),
            kind: NodeKind::Root(layout),
            children,
            entries: Vec::new(),
        }
    }

    /// Creates an empty tile.
    pub fn tile(id: NodeId) -> Self {
        Node {
            id,
            kind: NodeKind::Tile,
            children: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn region(&self) -> &Region {
        self.id.region()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root(_))
    }

    /// The partition layout, for the root.
    pub fn layout(&self) -> Option<&GridLayout> {
        match &self.kind {
            NodeKind::Root(layout) => Some(layout),
            NodeKind::Tile => None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&NodeId> {
        self.children.get(index)
    }

    pub fn entries(&self) -> &[DataEntry<P>] {
        &self.entries
    }

    pub fn data_count(&self) -> usize {
        self.entries.len()
    }

    /// Inserts an entry, replacing any existing entry with the same id and
    /// shape. Returns `true` when the entry is new.
    pub fn insert_entry(&mut self, entry: DataEntry<P>) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.id == entry.id && e.shape == entry.shape)
        {
            Some(existing) => {
                existing.payload = entry.payload;
                false
            }
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    /// Removes the entry with the given id and shape. Returns the removed
    /// entry, if any.
    pub fn remove_entry(&mut self, shape: &Region, id: EntryId) -> Option<DataEntry<P>> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id == id && &e.shape == shape)?;
        Some(self.entries.swap_remove(pos))
    }

    /// Drops every entry whose shape intersects `region`, returning how many
    /// were removed.
    pub fn remove_intersecting(&mut self, region: &Region) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.shape.intersects(region));
        before - self.entries.len()
    }

    pub fn clear_entries(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub(crate) fn restore_entries(&mut self, entries: Vec<DataEntry<P>>) {
        self.entries = entries;
    }
}
