//! Constants for the grid index, the cache and the file storage.

/// Tolerance used when comparing computed lattice extents.
pub const EPSILON: f64 = 1.192092896e-07;

/// Default target number of tiles the root is split into
pub const DEFAULT_TILE_CAPACITY: usize = 100;

/// Default maximum number of records held by a cache
pub const DEFAULT_CAPACITY: usize = 1000;

/// Residual box fragments kept by the coverage tracker before collapsing
/// them into their envelope.
pub const MAX_RESIDUAL_FRAGMENTS: usize = 256;

/// Magic number for file storage identification
pub const MAGIC: u32 = 0x5343_4E53; // "SCNS" - spatial cache node store

/// File storage format version
pub const VERSION: u32 = 2;

/// Size of the file storage header (magic + version)
pub const HEADER_SIZE: u64 = 8;

/// Size of a record frame prefix (length + checksum)
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Superseded log bytes tolerated before the file storage compacts itself
pub const COMPACTION_MIN_GARBAGE: u64 = 1 << 20;
