//! Error and result types shared by every layer of the cache.

use std::io;
use thiserror::Error;

use crate::region::Region;

/// Errors that can occur while indexing, storing or caching spatial records.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A shape, query or configuration value is malformed, typically a
    /// dimension mismatch with the index.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Region corners that do not describe a box, or two regions of
    /// different dimension combined.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Shape {shape} lies outside index bounds {bounds}")]
    OutOfBounds { shape: Region, bounds: Region },

    #[error("Cannot cache collection of size {size} (capacity = {capacity})")]
    Oversized { size: usize, capacity: usize },

    /// The eviction loop ran out of evictable tiles before reaching its target.
    #[error("Cannot reduce cached data to {target} entries: {data_count} remain and nothing is evictable")]
    Capacity { data_count: u64, target: u64 },

    #[error("Store error: {0}")]
    Store(String),

    /// The upstream record source failed while the cache was fetching.
    #[error("Record source error: {0}")]
    Source(String),

    #[error("Storage is closed")]
    Closed,
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub(crate) fn dimension_mismatch(operation: &str, expected: usize, actual: usize) -> Self {
        CacheError::InvalidArgument(format!(
            "{}: shape has {} dimensions, index has {}",
            operation, actual, expected
        ))
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(err: bincode::error::EncodeError) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(err: bincode::error::DecodeError) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
