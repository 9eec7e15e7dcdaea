//! Thread-safe handle to a cache.
//!
//! Traversal keeps per-call state and eviction mutates the index, the LRU
//! order and the coverage records together, so the whole cache sits behind
//! one lock.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::cache::{RecordSource, SpatialCache};
use crate::errors::CacheResult;
use crate::node::Record;
use crate::region::Region;
use crate::stats::Statistics;
use crate::storage::{NodeStorage, PayloadCodec};

/// A cloneable, lock-protected [`SpatialCache`].
pub struct SharedSpatialCache<P, S, C> {
    inner: Arc<Mutex<SpatialCache<P, S, C>>>,
}

impl<P, S, C> Clone for SharedSpatialCache<P, S, C> {
    fn clone(&self) -> Self {
        SharedSpatialCache {
            inner: self.inner.clone(),
        }
    }
}

impl<P, S, C> SharedSpatialCache<P, S, C>
where
    P: Clone,
    S: NodeStorage,
    C: PayloadCodec<P>,
{
    pub fn new(cache: SpatialCache<P, S, C>) -> Self {
        SharedSpatialCache {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    /// Locks the cache for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, SpatialCache<P, S, C>> {
        self.inner.lock()
    }

    pub fn get<Src>(&self, source: &mut Src, query: &Region) -> CacheResult<Vec<Record<P>>>
    where
        Src: RecordSource<Payload = P> + ?Sized,
    {
        self.inner.lock().get(source, query)
    }

    pub fn put(&self, records: Vec<Record<P>>, coverage: &Region) -> CacheResult<()> {
        self.inner.lock().put(records, coverage)
    }

    pub fn peek(&self, region: &Region) -> CacheResult<Vec<Record<P>>> {
        self.inner.lock().peek(region)
    }

    pub fn remove(&self, region: &Region) -> CacheResult<()> {
        self.inner.lock().remove(region)
    }

    pub fn statistics(&self) -> Statistics {
        self.inner.lock().statistics()
    }
}
