//! Grid spatial index.
//!
//! The root is always resident and holds the grid layout; tiles live in a
//! [`NodeStorage`] and are created lazily on the first insert into their
//! cell. Every tile read or write goes through the storage, is counted in
//! [`Statistics`] and fires the matching [`NodeHooks`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::SpanningPolicy;
use crate::errors::{CacheError, CacheResult};
use crate::events::NodeHooks;
use crate::grid::{GridLayout, Partitioning};
use crate::node::{DataEntry, EntryId, Node, NodeId};
use crate::region::Region;
use crate::stats::Statistics;
use crate::storage::{NodeMarshaller, NodeStorage, PayloadCodec};
use crate::traversal::{self, Collector, NodeSource, Visitor};

/// A grid-partitioned spatial index over a storage backend.
pub struct GridIndex<P, S, C> {
    root: Arc<Node<P>>,
    layout: GridLayout,
    storage: S,
    marshaller: NodeMarshaller<C>,
    stats: Statistics,
    hooks: NodeHooks,
    spanning_policy: SpanningPolicy,
    /// Stored tiles and their entry counts.
    tile_counts: HashMap<NodeId, usize>,
}

impl<P, S, C> GridIndex<P, S, C>
where
    P: Clone,
    S: NodeStorage,
    C: PayloadCodec<P>,
{
    /// Creates an empty index over `bounds`, split into roughly
    /// `tile_capacity` tiles. Anything already in `storage` is discarded.
    pub fn new(bounds: Region, tile_capacity: usize, mut storage: S, codec: C) -> CacheResult<Self> {
        let layout = GridLayout::new(&bounds, tile_capacity)?;
        storage.clear()?;

        let root = Node::root(bounds, layout.clone());
        debug!(
            "Split root {} into {} tiles",
            root.region(),
            root.children().len()
        );

        let mut index = GridIndex {
            root: Arc::new(root),
            layout,
            storage,
            marshaller: NodeMarshaller::new(codec),
            stats: Statistics::with_root(),
            hooks: NodeHooks::new(),
            spanning_policy: SpanningPolicy::default(),
            tile_counts: HashMap::new(),
        };
        index.persist_root()?;
        Ok(index)
    }

    /// Reopens an index from storage holding a checkpointed root.
    ///
    /// Node and data counts are rebuilt by scanning the stored tiles. Tiles
    /// that do not belong to the root's grid or cannot be decoded are
    /// dropped.
    pub fn open(mut storage: S, codec: C) -> CacheResult<Self> {
        let marshaller = NodeMarshaller::new(codec);
        let bytes = storage
            .metadata()?
            .ok_or_else(|| CacheError::Store("storage holds no checkpointed root".into()))?;
        let root: Node<P> = marshaller.unmarshall(&bytes)?;
        let layout = root
            .layout()
            .cloned()
            .ok_or_else(|| CacheError::Store("checkpointed node is not a root".into()))?;

        let mut tile_counts = HashMap::new();
        let mut stale = Vec::new();
        {
            let children: HashSet<&NodeId> = root.children().iter().collect();
            for id in storage.ids() {
                if !children.contains(&id) {
                    warn!("Dropping stored node {} outside the root grid", id);
                    stale.push(id);
                    continue;
                }
                let decoded = storage
                    .get(&id)
                    .and_then(|bytes| bytes.map(|b| marshaller.unmarshall::<P>(&b)).transpose());
                match decoded {
                    Ok(Some(tile)) => {
                        tile_counts.insert(id, tile.data_count());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Dropping unreadable node {}: {}", id, e);
                        stale.push(id);
                    }
                }
            }
        }
        for id in &stale {
            storage.remove(id)?;
        }

        let stats = Statistics {
            node_count: 1 + tile_counts.len() as u64,
            data_count: (root.data_count() + tile_counts.values().sum::<usize>()) as u64,
            ..Default::default()
        };
        info!(
            "Opened grid index over {} with {} stored tiles and {} entries",
            root.region(),
            tile_counts.len(),
            stats.data_count
        );

        Ok(GridIndex {
            root: Arc::new(root),
            layout,
            storage,
            marshaller,
            stats,
            hooks: NodeHooks::new(),
            spanning_policy: SpanningPolicy::default(),
            tile_counts,
        })
    }

    pub fn with_spanning_policy(mut self, policy: SpanningPolicy) -> Self {
        self.spanning_policy = policy;
        self
    }

    pub fn spanning_policy(&self) -> SpanningPolicy {
        self.spanning_policy
    }

    pub fn bounds(&self) -> &Region {
        self.root.region()
    }

    pub fn dimension(&self) -> usize {
        self.root.region().dimension()
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    pub fn root_id(&self) -> &NodeId {
        self.root.id()
    }

    /// Entries held by the root because no single tile contains them.
    pub fn root_entries(&self) -> &[DataEntry<P>] {
        self.root.entries()
    }

    pub fn hooks_mut(&mut self) -> &mut NodeHooks {
        &mut self.hooks
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Identifiers of the tiles currently stored.
    pub fn tile_ids(&self) -> Vec<NodeId> {
        self.tile_counts.keys().cloned().collect()
    }

    pub fn contains_tile(&self, id: &NodeId) -> bool {
        self.tile_counts.contains_key(id)
    }

    /// Identifiers of every lattice tile intersecting `region`, stored or not.
    pub fn tiles_intersecting(&self, region: &Region) -> Vec<NodeId> {
        self.layout
            .candidates(self.root.region(), region)
            .into_iter()
            .filter_map(|i| self.root.child(i).cloned())
            .collect()
    }

    /// Inserts `payload` under `shape` and `id`.
    ///
    /// The entry goes to the tile containing `shape`. A shape inside the
    /// root but spanning several tiles follows the spanning policy; a shape
    /// outside the root fails with `OutOfBounds`. Re-inserting the same
    /// `(id, shape)` replaces the payload.
    pub fn insert_data(&mut self, payload: P, shape: Region, id: EntryId) -> CacheResult<()> {
        self.check_dimension(&shape, "insert_data")?;
        if !self.root.region().contains(&shape) {
            return Err(CacheError::OutOfBounds {
                shape,
                bounds: self.root.region().clone(),
            });
        }

        let Some(child) = self.layout.locate(self.root.region(), &shape) else {
            return self.insert_spanning(DataEntry::new(id, shape, payload));
        };
        let tile_id = self
            .root
            .child(child)
            .cloned()
            .ok_or_else(|| CacheError::Store(format!("root has no child {}", child)))?;

        let existing = if self.tile_counts.contains_key(&tile_id) {
            self.read_node(&tile_id)?
        } else {
            None
        };
        let mut tile = match existing {
            Some(node) => Arc::try_unwrap(node).unwrap_or_else(|shared| (*shared).clone()),
            None => {
                debug!("Creating tile {}", tile_id);
                Node::tile(tile_id.clone())
            }
        };

        let added = tile.insert_entry(DataEntry::new(id, shape, payload));
        self.write_node(&tile)?;
        if self.tile_counts.insert(tile_id, tile.data_count()).is_none() {
            self.stats.node_count += 1;
        }
        if added {
            self.stats.data_count += 1;
        }
        Ok(())
    }

    fn insert_spanning(&mut self, entry: DataEntry<P>) -> CacheResult<()> {
        match self.spanning_policy {
            SpanningPolicy::Reject => Err(CacheError::InvalidArgument(format!(
                "shape {} spans several tiles",
                entry.shape
            ))),
            SpanningPolicy::StoreAtRoot => {
                if Arc::make_mut(&mut self.root).insert_entry(entry) {
                    self.stats.data_count += 1;
                }
                self.persist_root()
            }
        }
    }

    /// Deletes the entry matching both `shape` and `id`. Returns `false`
    /// when there is none.
    pub fn delete_data(&mut self, shape: &Region, id: EntryId) -> CacheResult<bool> {
        self.check_dimension(shape, "delete_data")?;

        if Arc::make_mut(&mut self.root).remove_entry(shape, id).is_some() {
            self.stats.data_count -= 1;
            self.persist_root()?;
            return Ok(true);
        }

        for tile_id in self.tiles_intersecting(shape) {
            if !self.tile_counts.contains_key(&tile_id) {
                continue;
            }
            let Some(node) = self.read_node(&tile_id)? else {
                continue;
            };
            if !node.entries().iter().any(|e| e.id == id && &e.shape == shape) {
                continue;
            }

            let mut tile = Arc::try_unwrap(node).unwrap_or_else(|shared| (*shared).clone());
            tile.remove_entry(shape, id);
            self.write_node(&tile)?;
            self.tile_counts.insert(tile_id, tile.data_count());
            self.stats.data_count -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn intersection_query<V>(&mut self, query: &Region, visitor: &mut V) -> CacheResult<()>
    where
        V: Visitor<P> + ?Sized,
    {
        traversal::intersection_query(self, query, visitor)
    }

    pub fn containment_query<V>(&mut self, query: &Region, visitor: &mut V) -> CacheResult<()>
    where
        V: Visitor<P> + ?Sized,
    {
        traversal::containment_query(self, query, visitor)
    }

    pub fn point_location_query<V>(&mut self, point: &[f64], visitor: &mut V) -> CacheResult<()>
    where
        V: Visitor<P> + ?Sized,
    {
        traversal::point_location_query(self, point, visitor)
    }

    /// Entries intersecting `query`.
    pub fn entries_intersecting(&mut self, query: &Region) -> CacheResult<Vec<DataEntry<P>>> {
        let mut collector = Collector::new();
        self.intersection_query(query, &mut collector)?;
        Ok(collector.entries)
    }

    /// Drops every tile and every root entry, leaving only the empty root.
    pub fn flush(&mut self) -> CacheResult<()> {
        let tiles: Vec<NodeId> = self.tile_counts.keys().cloned().collect();
        self.storage.clear()?;
        self.tile_counts.clear();
        Arc::make_mut(&mut self.root).clear_entries();
        for id in &tiles {
            self.hooks.fire_delete(id);
        }

        self.stats.node_count = 1;
        self.stats.data_count = 0;
        debug!("Flushed {} tiles from {}", tiles.len(), self.root.region());
        self.persist_root()
    }

    /// Drops a stored tile and its data. Returns the number of entries
    /// discarded. The root cannot be evicted.
    pub fn evict_node(&mut self, id: &NodeId) -> CacheResult<usize> {
        if id == self.root.id() {
            warn!("Refusing to evict the root node {}", id);
            return Ok(0);
        }
        if !self.tile_counts.contains_key(id) {
            return Ok(0);
        }

        self.storage.remove(id)?;
        let count = self.tile_counts.remove(id).unwrap_or(0);
        self.stats.node_count -= 1;
        self.stats.data_count -= count as u64;
        self.hooks.fire_delete(id);
        debug!("Evicted {} with {} entries", id, count);
        Ok(count)
    }

    /// Invalidates everything intersecting `region`: whole stored tiles and
    /// root entries. Returns the regions whose data was dropped.
    pub fn remove_region(&mut self, region: &Region) -> CacheResult<Vec<Region>> {
        self.check_dimension(region, "remove_region")?;
        let mut dropped = Vec::new();

        let root_hits: Vec<Region> = self
            .root
            .entries()
            .iter()
            .filter(|e| e.shape.intersects(region))
            .map(|e| e.shape.clone())
            .collect();
        if !root_hits.is_empty() {
            let removed = Arc::make_mut(&mut self.root).remove_intersecting(region);
            self.stats.data_count -= removed as u64;
            self.persist_root()?;
            dropped.extend(root_hits);
        }

        for tile_id in self.tiles_intersecting(region) {
            if self.tile_counts.contains_key(&tile_id) {
                self.evict_node(&tile_id)?;
                dropped.push(tile_id.into_region());
            }
        }
        Ok(dropped)
    }

    /// Persists the root and makes storage durable.
    pub fn checkpoint(&mut self) -> CacheResult<()> {
        self.persist_root()?;
        self.storage.sync()
    }

    fn persist_root(&mut self) -> CacheResult<()> {
        let bytes = self.marshaller.marshall(&*self.root)?;
        self.storage.put_metadata(bytes)
    }

    fn write_node(&mut self, node: &Node<P>) -> CacheResult<()> {
        let bytes = self.marshaller.marshall(node)?;
        self.storage.put(node.id(), bytes)?;
        self.stats.writes += 1;
        self.hooks.fire_write(node.id());
        Ok(())
    }

    /// Forgets a node that failed to load so it is recreated on next access.
    /// Fires the delete hooks like an eviction.
    fn drop_unreadable(&mut self, id: &NodeId, cause: CacheError) -> CacheError {
        error!("Failed to read node {}: {}", id, cause);
        if let Err(e) = self.storage.remove(id) {
            error!("Failed to remove unreadable node {}: {}", id, e);
        }
        if let Some(count) = self.tile_counts.remove(id) {
            self.stats.node_count -= 1;
            self.stats.data_count -= count as u64;
            self.hooks.fire_delete(id);
        }
        CacheError::Store(format!("node {} is unreadable: {}", id, cause))
    }

    fn check_dimension(&self, shape: &Region, operation: &str) -> CacheResult<()> {
        if shape.dimension() != self.dimension() {
            return Err(CacheError::dimension_mismatch(
                operation,
                self.dimension(),
                shape.dimension(),
            ));
        }
        Ok(())
    }
}

impl<P, S, C> NodeSource<P> for GridIndex<P, S, C>
where
    P: Clone,
    S: NodeStorage,
    C: PayloadCodec<P>,
{
    fn dimension(&self) -> usize {
        self.root.region().dimension()
    }

    fn root(&self) -> Arc<Node<P>> {
        self.root.clone()
    }

    fn read_node(&mut self, id: &NodeId) -> CacheResult<Option<Arc<Node<P>>>> {
        if id == self.root.id() {
            return Ok(Some(self.root.clone()));
        }

        let bytes = match self.storage.get(id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.drop_unreadable(id, e)),
        };
        match self.marshaller.unmarshall::<P>(&bytes) {
            Ok(node) => {
                self.stats.reads += 1;
                self.hooks.fire_read(id);
                Ok(Some(Arc::new(node)))
            }
            Err(e) => Err(self.drop_unreadable(id, e)),
        }
    }
}

impl<P, S, C> std::fmt::Debug for GridIndex<P, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridIndex")
            .field("bounds", self.root.region())
            .field("tiles", &self.layout.capacity())
            .field("stats", &self.stats)
            .finish()
    }
}
