//! Cache configuration.

use crate::constants::{DEFAULT_CAPACITY, DEFAULT_TILE_CAPACITY};
use crate::errors::{CacheError, CacheResult};
use crate::region::Region;

/// What the index does with a shape that lies inside the root but is not
/// contained by any single tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanningPolicy {
    /// Keep the entry on the root. Root entries are never evicted, only
    /// removed explicitly or flushed.
    #[default]
    StoreAtRoot,
    /// Refuse the insert with `InvalidArgument`.
    Reject,
}

/// Validated settings of a [`SpatialCache`](crate::SpatialCache).
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    bounds: Region,
    tile_capacity: usize,
    capacity: usize,
    spanning_policy: SpanningPolicy,
}

impl CacheConfig {
    /// Starts a builder for a cache over `bounds`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spatial_cache::{CacheConfig, Region, SpanningPolicy};
    ///
    /// let config = CacheConfig::builder(Region::rect(0.0, 0.0, 1.0, 1.0))
    ///     .tile_capacity(64)
    ///     .capacity(500)
    ///     .spanning_policy(SpanningPolicy::Reject)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.capacity(), 500);
    /// ```
    #[inline]
    pub fn builder(bounds: Region) -> CacheConfigBuilder {
        CacheConfigBuilder::new(bounds)
    }

    pub fn bounds(&self) -> &Region {
        &self.bounds
    }

    /// Target number of tiles the root is split into.
    pub fn tile_capacity(&self) -> usize {
        self.tile_capacity
    }

    /// Maximum number of cached records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn spanning_policy(&self) -> SpanningPolicy {
        self.spanning_policy
    }
}

/// Builder for [`CacheConfig`].
#[derive(Clone, Debug)]
pub struct CacheConfigBuilder {
    bounds: Region,
    tile_capacity: usize,
    capacity: usize,
    spanning_policy: SpanningPolicy,
}

impl CacheConfigBuilder {
    #[inline]
    pub fn new(bounds: Region) -> CacheConfigBuilder {
        CacheConfigBuilder {
            bounds,
            tile_capacity: DEFAULT_TILE_CAPACITY,
            capacity: DEFAULT_CAPACITY,
            spanning_policy: SpanningPolicy::default(),
        }
    }

    #[inline]
    pub fn tile_capacity(mut self, tile_capacity: usize) -> Self {
        self.tile_capacity = tile_capacity;
        self
    }

    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[inline]
    pub fn spanning_policy(mut self, policy: SpanningPolicy) -> Self {
        self.spanning_policy = policy;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when either capacity is zero or the bounds have no
    /// volume.
    pub fn build(self) -> CacheResult<CacheConfig> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidArgument(
                "cache capacity must be positive".into(),
            ));
        }
        if self.tile_capacity == 0 {
            return Err(CacheError::InvalidArgument(
                "tile capacity must be positive".into(),
            ));
        }
        if self.bounds.area() <= 0.0 {
            return Err(CacheError::InvalidArgument(format!(
                "cache bounds {} have no volume",
                self.bounds
            )));
        }

        Ok(CacheConfig {
            bounds: self.bounds,
            tile_capacity: self.tile_capacity,
            capacity: self.capacity,
            spanning_policy: self.spanning_policy,
        })
    }
}
