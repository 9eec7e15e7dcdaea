//! Tracking of the regions already fully cached.
//!
//! Coverage records are linked to the grid tiles they intersect so a query
//! only looks at records near it. The part of a query not covered is
//! computed by box subtraction and reported as its bounding envelope, which
//! may over-approximate but never under-approximates what is missing.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;

use crate::constants::MAX_RESIDUAL_FRAGMENTS;
use crate::errors::{CacheError, CacheResult};
use crate::node::NodeId;
use crate::region::Region;

/// Maps a region to the grid tiles it touches.
pub trait TileLookup {
    /// Lattice tiles intersecting `region`, stored or not.
    fn tiles_intersecting(&self, region: &Region) -> Vec<NodeId>;

    fn root_id(&self) -> &NodeId;

    /// Dimension of the regions the lookup understands.
    fn dimension(&self) -> usize;
}

impl<P, S, C> TileLookup for crate::index::GridIndex<P, S, C>
where
    P: Clone,
    S: crate::storage::NodeStorage,
    C: crate::storage::PayloadCodec<P>,
{
    fn tiles_intersecting(&self, region: &Region) -> Vec<NodeId> {
        crate::index::GridIndex::tiles_intersecting(self, region)
    }

    fn root_id(&self) -> &NodeId {
        crate::index::GridIndex::root_id(self)
    }

    fn dimension(&self) -> usize {
        crate::index::GridIndex::dimension(self)
    }
}

/// What remains to be fetched for a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Residual {
    /// The query is entirely cached.
    Covered,
    /// Envelope of the uncovered part of the query.
    Missing(Region),
}

impl Residual {
    pub fn is_covered(&self) -> bool {
        matches!(self, Residual::Covered)
    }
}

/// A record-source predicate as seen by the tracker.
///
/// Only bounding-box predicates can be rewritten; every other predicate
/// passes through unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryFilter {
    BBox(Region),
    /// Matches everything.
    Include,
    /// Matches nothing.
    Exclude,
    /// Any predicate the tracker cannot reason about.
    Other(String),
}

#[derive(Clone, Debug)]
struct CoverageRecord {
    region: Region,
    tiles: Vec<NodeId>,
}

/// Set of regions known to be fully cached.
#[derive(Debug, Default)]
pub struct CoverageTracker {
    records: HashMap<u64, CoverageRecord>,
    by_tile: HashMap<NodeId, HashSet<u64>>,
    next_id: u64,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Regions currently recorded as covered.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.records.values().map(|r| &r.region)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_tile.clear();
    }

    /// Records `region` as fully cached. Returns `false` when it was
    /// already covered by a single record. Records inside `region` are
    /// replaced by it.
    pub fn register<L>(&mut self, lookup: &L, region: &Region) -> CacheResult<bool>
    where
        L: TileLookup + ?Sized,
    {
        check_dimension(lookup, region, "register")?;
        let nearby = self.nearby(lookup, region);
        if nearby
            .iter()
            .any(|id| self.records[id].region.contains(region))
        {
            return Ok(false);
        }
        for id in nearby {
            if region.contains(&self.records[&id].region) {
                self.remove_record(id);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let tiles = Self::tiles_for(lookup, region);
        for tile in &tiles {
            self.by_tile.entry(tile.clone()).or_default().insert(id);
        }
        self.records.insert(
            id,
            CoverageRecord {
                region: region.clone(),
                tiles,
            },
        );
        debug!("Registered coverage {}", region);
        Ok(true)
    }

    /// Drops every record intersecting `region`. Returns how many were
    /// dropped.
    pub fn unregister<L>(&mut self, lookup: &L, region: &Region) -> CacheResult<usize>
    where
        L: TileLookup + ?Sized,
    {
        check_dimension(lookup, region, "unregister")?;
        let nearby = self.nearby(lookup, region);
        let count = nearby.len();
        for id in nearby {
            self.remove_record(id);
        }
        if count > 0 {
            debug!("Unregistered {} coverage records over {}", count, region);
        }
        Ok(count)
    }

    /// Computes the part of `query` not yet covered.
    pub fn residual<L>(&self, lookup: &L, query: &Region) -> CacheResult<Residual>
    where
        L: TileLookup + ?Sized,
    {
        check_dimension(lookup, query, "residual")?;
        let nearby = self.nearby(lookup, query);
        if nearby.is_empty() {
            return Ok(Residual::Missing(query.clone()));
        }
        if nearby
            .iter()
            .any(|id| self.records[id].region.contains(query))
        {
            return Ok(Residual::Covered);
        }

        let mut remaining = vec![query.clone()];
        for id in &nearby {
            let known = &self.records[id].region;
            remaining = remaining
                .into_iter()
                .flat_map(|piece| piece.subtract(known))
                .collect();
            if remaining.is_empty() {
                return Ok(Residual::Covered);
            }
            if remaining.len() > MAX_RESIDUAL_FRAGMENTS {
                remaining = Region::envelope(&remaining)?.into_iter().collect();
            }
        }

        Ok(match Region::envelope(&remaining)? {
            Some(envelope) => Residual::Missing(envelope),
            None => Residual::Covered,
        })
    }

    /// Rewrites a filter so it only asks for what is not cached. A bounding
    /// box of the wrong dimension passes through unchanged.
    pub fn match_filter<L>(&self, lookup: &L, filter: &QueryFilter) -> QueryFilter
    where
        L: TileLookup + ?Sized,
    {
        match filter {
            QueryFilter::BBox(query) => match self.residual(lookup, query) {
                Ok(Residual::Covered) => QueryFilter::Exclude,
                Ok(Residual::Missing(missing)) => QueryFilter::BBox(missing),
                Err(_) => filter.clone(),
            },
            other => other.clone(),
        }
    }

    fn tiles_for<L>(lookup: &L, region: &Region) -> Vec<NodeId>
    where
        L: TileLookup + ?Sized,
    {
        let tiles = lookup.tiles_intersecting(region);
        if tiles.is_empty() {
            vec![lookup.root_id().clone()]
        } else {
            tiles
        }
    }

    /// Records intersecting `region`, in registration order.
    fn nearby<L>(&self, lookup: &L, region: &Region) -> Vec<u64>
    where
        L: TileLookup + ?Sized,
    {
        let ids: BTreeSet<u64> = Self::tiles_for(lookup, region)
            .iter()
            .filter_map(|tile| self.by_tile.get(tile))
            .flatten()
            .copied()
            .collect();
        ids.into_iter()
            .filter(|id| self.records[id].region.intersects(region))
            .collect()
    }

    fn remove_record(&mut self, id: u64) {
        let Some(record) = self.records.remove(&id) else {
            return;
        };
        for tile in &record.tiles {
            if let Some(ids) = self.by_tile.get_mut(tile) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_tile.remove(tile);
                }
            }
        }
    }
}

fn check_dimension<L>(lookup: &L, region: &Region, operation: &str) -> CacheResult<()>
where
    L: TileLookup + ?Sized,
{
    if region.dimension() != lookup.dimension() {
        return Err(CacheError::InvalidRegion(format!(
            "{}: {} has {} dimensions, coverage is tracked in {}",
            operation,
            region,
            region.dimension(),
            lookup.dimension()
        )));
    }
    Ok(())
}
