//! # Spatial Cache
//!
//! A bounded, read-through cache for spatial records. It sits in front of a
//! slow [`RecordSource`] and remembers which regions it already holds in
//! full, so repeated or overlapping queries only fetch what is missing.
//!
//! ## Features
//!
//! - **Grid Index**: The cache bounds are split into square tiles, created
//!   lazily on first insert
//! - **Pluggable Storage**: Tiles live in memory or in an append-only file
//! - **LRU Eviction**: Least recently used tiles are dropped under capacity
//!   pressure, together with the coverage they backed
//! - **Coverage Tracking**: Queries are reduced to the envelope of their
//!   uncovered part before reaching the source
//! - **Persistence**: A file-backed index can be checkpointed and reopened
//!
//! ## Quick Start
//!
//! ```rust
//! use spatial_cache::{
//!     BincodeCodec, CacheConfig, CacheResult, MemoryStorage, Record, RecordSource, Region,
//!     SpatialCache,
//! };
//!
//! struct Roads;
//!
//! impl RecordSource for Roads {
//!     type Payload = String;
//!
//!     fn fetch(&mut self, region: &Region) -> CacheResult<Vec<Record<String>>> {
//!         let road = Record::new(1, Region::rect(0.2, 0.2, 0.3, 0.25), "A1".to_string());
//!         Ok(if road.shape.intersects(region) { vec![road] } else { vec![] })
//!     }
//! }
//!
//! # fn main() -> CacheResult<()> {
//! let config = CacheConfig::builder(Region::rect(0.0, 0.0, 1.0, 1.0))
//!     .tile_capacity(16)
//!     .capacity(100)
//!     .build()?;
//! let mut cache = SpatialCache::new(config, MemoryStorage::new(), BincodeCodec)?;
//!
//! let found = cache.get(&mut Roads, &Region::rect(0.0, 0.0, 0.5, 0.5))?;
//! assert_eq!(found.len(), 1);
//! // Served from the cache this time.
//! assert!(cache.residual(&Region::rect(0.1, 0.1, 0.4, 0.4))?.is_covered());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod eviction;
pub mod grid;
pub mod index;
pub mod node;
pub mod region;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod tracker;
pub mod traversal;

pub use cache::{RecordSource, SpatialCache};
pub use config::{CacheConfig, CacheConfigBuilder, SpanningPolicy};
pub use errors::{CacheError, CacheResult};
pub use events::{NodeHook, NodeHooks};
pub use eviction::{AccessEvent, AccessLog, EvictableTree, LruEvictionPolicy};
pub use grid::{GridLayout, Partitioning};
pub use index::GridIndex;
pub use node::{DataEntry, EntryId, Node, NodeId, NodeKind, Record};
pub use region::{Coords, Region};
pub use stats::Statistics;
pub use storage::{
    BincodeCodec, CompactionStats, FileStorage, MemoryStorage, NodeMarshaller, NodeStorage,
    PayloadCodec, RawBytesCodec,
};
pub use sync::SharedSpatialCache;
pub use tracker::{CoverageTracker, QueryFilter, Residual, TileLookup};
pub use traversal::{Collector, NodeCounter, NodeSource, QueryKind, Visitor};
