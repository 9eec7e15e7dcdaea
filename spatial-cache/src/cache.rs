//! Spatial result cache in front of a slow record source.
//!
//! Records live in a [`GridIndex`]. An [`LruEvictionPolicy`], fed from the
//! index's node hooks through an [`AccessLog`], decides which tile to drop
//! under capacity pressure. A [`CoverageTracker`] remembers which regions
//! are fully cached so a query only fetches what is missing.
//!
//! Whenever a tile leaves storage, whether evicted, invalidated or found
//! unreadable, the coverage it backed is dropped with it.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::config::{CacheConfig, SpanningPolicy};
use crate::errors::{CacheError, CacheResult};
use crate::eviction::{AccessEvent, AccessLog, LruEvictionPolicy};
use crate::grid::Partitioning;
use crate::index::GridIndex;
use crate::node::{NodeId, Record};
use crate::region::Region;
use crate::stats::Statistics;
use crate::storage::{NodeStorage, PayloadCodec};
use crate::tracker::{CoverageTracker, QueryFilter, Residual};

/// The upstream store the cache sits in front of.
pub trait RecordSource {
    type Payload;

    /// Extent of the source's records, when known. Queries outside it are
    /// never forwarded.
    fn bounds(&self) -> Option<Region> {
        None
    }

    /// Returns every record whose shape intersects `region`. A failure is
    /// reported to the cache's caller as [`CacheError::Source`].
    fn fetch(&mut self, region: &Region) -> CacheResult<Vec<Record<Self::Payload>>>;
}

/// A bounded cache of spatial records.
pub struct SpatialCache<P, S, C> {
    index: GridIndex<P, S, C>,
    tracker: CoverageTracker,
    policy: LruEvictionPolicy,
    access_log: AccessLog,
    capacity: usize,
}

impl<P, S, C> SpatialCache<P, S, C>
where
    P: Clone,
    S: NodeStorage,
    C: PayloadCodec<P>,
{
    /// Creates an empty cache. Anything in `storage` is discarded.
    pub fn new(config: CacheConfig, storage: S, codec: C) -> CacheResult<Self> {
        let index = GridIndex::new(
            config.bounds().clone(),
            config.tile_capacity(),
            storage,
            codec,
        )?
        .with_spanning_policy(config.spanning_policy());
        Ok(Self::assemble(index, config.capacity()))
    }

    /// Reuses the index persisted in `storage` when its bounds match the
    /// configuration, otherwise starts empty.
    ///
    /// Coverage is not persisted: a reopened cache answers queries from its
    /// records but fetches again before claiming a region is covered.
    pub fn open(config: CacheConfig, storage: S, codec: C) -> CacheResult<Self>
    where
        C: Clone,
    {
        if storage.metadata()?.is_none() {
            return Self::new(config, storage, codec);
        }

        let index = GridIndex::open(storage, codec.clone())?;
        if index.bounds() != config.bounds() {
            warn!(
                "Persisted index covers {}, configuration asks for {}; starting empty",
                index.bounds(),
                config.bounds()
            );
            return Self::new(config, index.into_storage(), codec);
        }

        let index = index.with_spanning_policy(config.spanning_policy());
        let mut cache = Self::assemble(index, config.capacity());
        for id in cache.index.tile_ids() {
            cache.policy.access(&id);
        }
        info!(
            "Reopened cache over {} holding {} records",
            cache.bounds(),
            cache.statistics().data_count
        );

        if cache.statistics().data_count > cache.capacity as u64 {
            cache.make_room(0)?;
        }
        Ok(cache)
    }

    fn assemble(mut index: GridIndex<P, S, C>, capacity: usize) -> Self {
        let access_log = AccessLog::new();
        access_log.attach(index.hooks_mut());

        SpatialCache {
            index,
            tracker: CoverageTracker::new(),
            policy: LruEvictionPolicy::new(),
            access_log,
            capacity,
        }
    }

    pub fn bounds(&self) -> &Region {
        self.index.bounds()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn statistics(&self) -> Statistics {
        self.index.statistics()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.index.statistics().data_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> &GridIndex<P, S, C> {
        &self.index
    }

    pub fn coverage(&self) -> &CoverageTracker {
        &self.tracker
    }

    /// Checkpoints the index and hands back its storage.
    pub fn into_storage(mut self) -> CacheResult<S> {
        self.index.checkpoint()?;
        Ok(self.index.into_storage())
    }

    /// Caches `records` and marks `coverage` as fully cached.
    ///
    /// The whole batch is validated first: an oversized batch fails with
    /// `Oversized`, a malformed or out-of-bounds record with the matching
    /// error, and in both cases the cache is left untouched. Least recently
    /// used tiles are then evicted until the batch fits.
    pub fn put(&mut self, records: Vec<Record<P>>, coverage: &Region) -> CacheResult<()> {
        self.check_dimension(coverage, "put")?;
        self.put_records(records)?;
        self.tracker.register(&self.index, coverage)?;
        Ok(())
    }

    /// Caches `records` without registering any coverage.
    pub fn put_records(&mut self, records: Vec<Record<P>>) -> CacheResult<()> {
        self.validate(&records)?;
        self.make_room(records.len())?;
        let inserted = records.into_iter().try_for_each(|record| {
            self.index
                .insert_data(record.payload, record.shape, record.id)
        });
        self.absorb_index_events()?;
        inserted
    }

    /// Cached records intersecting `region`, without fetching.
    pub fn peek(&mut self, region: &Region) -> CacheResult<Vec<Record<P>>> {
        let found = self.index.entries_intersecting(region);
        self.absorb_index_events()?;
        found
    }

    /// Invalidates cached data and coverage intersecting `region`.
    pub fn remove(&mut self, region: &Region) -> CacheResult<()> {
        self.check_dimension(region, "remove")?;
        let dropped = self.index.remove_region(region)?;
        self.absorb_index_events()?;
        self.tracker.unregister(&self.index, region)?;
        for lost in &dropped {
            self.tracker.unregister(&self.index, lost)?;
        }
        debug!("Removed {} regions intersecting {}", dropped.len(), region);
        Ok(())
    }

    /// Evicts the least recently used tile. Returns its identifier, or
    /// `None` when no tile is cached.
    pub fn evict(&mut self) -> CacheResult<Option<NodeId>> {
        self.absorb_index_events()?;
        let evicted = self.policy.evict(&mut self.index)?;
        self.absorb_index_events()?;
        Ok(evicted.map(|(victim, _)| victim))
    }

    /// Drops every record and all coverage.
    pub fn clear(&mut self) -> CacheResult<()> {
        self.index.flush()?;
        self.access_log.drain();
        self.tracker.clear();
        self.policy.clear();
        Ok(())
    }

    pub fn checkpoint(&mut self) -> CacheResult<()> {
        self.index.checkpoint()
    }

    /// Part of `query` not yet cached.
    pub fn residual(&self, query: &Region) -> CacheResult<Residual> {
        self.check_dimension(query, "residual")?;
        match self.bounds().intersection(query) {
            Some(clipped) => self.tracker.residual(&self.index, &clipped),
            None => Ok(Residual::Missing(query.clone())),
        }
    }

    /// Rewrites a source filter so it only asks for what is not cached.
    /// Bounding boxes are clipped to the cache bounds first.
    pub fn match_filter(&self, filter: &QueryFilter) -> QueryFilter {
        match filter {
            QueryFilter::BBox(query) if query.dimension() == self.index.dimension() => {
                match self.bounds().intersection(query) {
                    Some(clipped) => self
                        .tracker
                        .match_filter(&self.index, &QueryFilter::BBox(clipped)),
                    None => filter.clone(),
                }
            }
            other => other.clone(),
        }
    }

    /// Read-through query: answers from the cache, fetching from `source`
    /// only the part of `query` not yet covered.
    ///
    /// The query is clipped to the cache bounds. Fetched records are cached
    /// and their region registered as covered, unless the batch exceeds the
    /// cache capacity or contains records the cache cannot hold.
    pub fn get<Src>(&mut self, source: &mut Src, query: &Region) -> CacheResult<Vec<Record<P>>>
    where
        Src: RecordSource<Payload = P> + ?Sized,
    {
        self.check_dimension(query, "get")?;
        let Some(clipped) = self.bounds().intersection(query) else {
            debug!("Query {} lies outside cache bounds", query);
            return Ok(Vec::new());
        };

        let cached = self.peek(&clipped)?;
        let missing = match self.tracker.residual(&self.index, &clipped)? {
            Residual::Covered => {
                debug!("Query {} served from cache", clipped);
                return Ok(cached);
            }
            Residual::Missing(missing) => missing,
        };
        if let Some(extent) = source.bounds() {
            if !extent.intersects(&missing) {
                return Ok(cached);
            }
        }

        debug!("Fetching {} for query {}", missing, clipped);
        let fetched = source.fetch(&missing).map_err(|e| {
            warn!("Record source failed on {}: {}", missing, e);
            match e {
                CacheError::Source(_) => e,
                other => CacheError::Source(other.to_string()),
            }
        })?;
        let (cacheable, uncacheable): (Vec<_>, Vec<_>) = fetched
            .into_iter()
            .filter(|r| r.shape.dimension() == self.index.dimension())
            .partition(|r| self.bounds().contains(&r.shape) && self.fits_policy(&r.shape));

        let fetched_ids: HashSet<u64> = cacheable
            .iter()
            .chain(uncacheable.iter())
            .map(|r| r.id)
            .collect();
        let mut result: Vec<Record<P>> = cacheable
            .iter()
            .chain(uncacheable.iter())
            .filter(|r| r.shape.intersects(&clipped))
            .cloned()
            .collect();
        result.extend(cached.into_iter().filter(|r| !fetched_ids.contains(&r.id)));

        if cacheable.len() > self.capacity {
            warn!(
                "Fetched {} records for {}, more than the cache capacity {}; not caching",
                cacheable.len(),
                missing,
                self.capacity
            );
        } else if uncacheable.is_empty() {
            self.put(cacheable, &missing)?;
        } else {
            debug!(
                "{} fetched records cannot be cached; {} stays uncovered",
                uncacheable.len(),
                missing
            );
            self.put_records(cacheable)?;
        }
        Ok(result)
    }

    fn validate(&self, records: &[Record<P>]) -> CacheResult<()> {
        if records.len() > self.capacity {
            return Err(CacheError::Oversized {
                size: records.len(),
                capacity: self.capacity,
            });
        }
        for record in records {
            self.check_dimension(&record.shape, "put")?;
            if !self.bounds().contains(&record.shape) {
                return Err(CacheError::OutOfBounds {
                    shape: record.shape.clone(),
                    bounds: self.bounds().clone(),
                });
            }
            if !self.fits_policy(&record.shape) {
                return Err(CacheError::InvalidArgument(format!(
                    "shape {} spans several tiles",
                    record.shape
                )));
            }
        }
        Ok(())
    }

    fn fits_policy(&self, shape: &Region) -> bool {
        match self.index.spanning_policy() {
            SpanningPolicy::StoreAtRoot => true,
            SpanningPolicy::Reject => self
                .index
                .layout()
                .locate(self.bounds(), shape)
                .is_some(),
        }
    }

    /// Evicts tiles until `incoming` more records fit.
    fn make_room(&mut self, incoming: usize) -> CacheResult<()> {
        let target = self.capacity.saturating_sub(incoming) as u64;
        while self.index.statistics().data_count > target {
            if self.evict()?.is_none() {
                return Err(CacheError::Capacity {
                    data_count: self.index.statistics().data_count,
                    target,
                });
            }
        }
        Ok(())
    }

    /// Replays node accesses into the LRU policy and drops the coverage of
    /// every tile that left storage.
    fn absorb_index_events(&mut self) -> CacheResult<()> {
        for event in self.access_log.drain() {
            if let AccessEvent::Dropped(id) = &event {
                self.tracker.unregister(&self.index, id.region())?;
            }
            self.policy.apply(&event);
        }
        Ok(())
    }

    fn check_dimension(&self, shape: &Region, operation: &str) -> CacheResult<()> {
        if shape.dimension() != self.index.dimension() {
            return Err(CacheError::dimension_mismatch(
                operation,
                self.index.dimension(),
                shape.dimension(),
            ));
        }
        Ok(())
    }
}

impl<P, S, C> std::fmt::Debug for SpatialCache<P, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialCache")
            .field("index", &self.index)
            .field("capacity", &self.capacity)
            .field("coverage_records", &self.tracker.len())
            .finish()
    }
}
