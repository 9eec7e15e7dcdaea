//! Node (de)serialization.
//!
//! Wire layout, in order: dimension, low corner, high corner, data count,
//! root flag, root parameters (capacity, tile size, tiles per axis) when the
//! node is the root, then each entry as id, low, high and encoded payload.
//! Encoded with bincode's legacy fixed-int configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{CacheError, CacheResult};
use crate::grid::{GridLayout, Partitioning};
use crate::node::{DataEntry, Node, NodeId};
use crate::region::Region;

/// Converts entry payloads to and from bytes.
pub trait PayloadCodec<P>: Send {
    fn encode(&self, payload: &P) -> CacheResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> CacheResult<P>;
}

/// Encodes any serde payload with bincode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl<P> PayloadCodec<P> for BincodeCodec
where
    P: Serialize + DeserializeOwned,
{
    fn encode(&self, payload: &P) -> CacheResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            payload,
            bincode::config::legacy(),
        )?)
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<P> {
        let (payload, _) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
        Ok(payload)
    }
}

/// Passes byte payloads through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBytesCodec;

impl PayloadCodec<Vec<u8>> for RawBytesCodec {
    fn encode(&self, payload: &Vec<u8>) -> CacheResult<Vec<u8>> {
        Ok(payload.clone())
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    dimension: u32,
    low: Vec<f64>,
    high: Vec<f64>,
    data_count: u32,
    is_root: bool,
    root: Option<WireRoot>,
    entries: Vec<WireEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRoot {
    capacity: u64,
    tile_size: f64,
    tiles_per_axis: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEntry {
    id: u64,
    low: Vec<f64>,
    high: Vec<f64>,
    payload: Vec<u8>,
}

/// Node codec pairing the fixed node layout with a payload codec.
#[derive(Clone, Debug, Default)]
pub struct NodeMarshaller<C> {
    codec: C,
}

impl<C> NodeMarshaller<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn marshall<P>(&self, node: &Node<P>) -> CacheResult<Vec<u8>>
    where
        C: PayloadCodec<P>,
    {
        let region = node.region();
        let root = node.layout().map(|layout| WireRoot {
            capacity: layout.capacity() as u64,
            tile_size: layout.tile_size(),
            tiles_per_axis: layout.tiles_per_axis().iter().map(|n| *n as u64).collect(),
        });

        let entries = node
            .entries()
            .iter()
            .map(|entry| {
                Ok(WireEntry {
                    id: entry.id,
                    low: entry.shape.lows().to_vec(),
                    high: entry.shape.highs().to_vec(),
                    payload: self.codec.encode(&entry.payload)?,
                })
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let wire = WireNode {
            dimension: region.dimension() as u32,
            low: region.lows().to_vec(),
            high: region.highs().to_vec(),
            data_count: entries.len() as u32,
            is_root: node.is_root(),
            root,
            entries,
        };
        Ok(bincode::serde::encode_to_vec(
            &wire,
            bincode::config::legacy(),
        )?)
    }

    pub fn unmarshall<P>(&self, bytes: &[u8]) -> CacheResult<Node<P>>
    where
        C: PayloadCodec<P>,
    {
        let (wire, _): (WireNode, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;

        let dimension = wire.dimension as usize;
        let region = decode_region(dimension, wire.low, wire.high)?;
        if wire.data_count as usize != wire.entries.len() {
            return Err(CacheError::Serialization(format!(
                "node declares {} entries but carries {}",
                wire.data_count,
                wire.entries.len()
            )));
        }

        let entries = wire
            .entries
            .into_iter()
            .map(|entry| {
                Ok(DataEntry {
                    id: entry.id,
                    shape: decode_region(dimension, entry.low, entry.high)?,
                    payload: self.codec.decode(&entry.payload)?,
                })
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let mut node = match (wire.is_root, wire.root) {
            (true, Some(root)) => {
                let tiles: Vec<usize> = root.tiles_per_axis.iter().map(|n| *n as usize).collect();
                let layout = GridLayout::from_parts(
                    &region,
                    root.capacity as usize,
                    root.tile_size,
                    &tiles,
                )
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Node::root(region, layout)
            }
            (false, None) => Node::tile(NodeId::new(region)),
            (is_root, _) => {
                return Err(CacheError::Serialization(format!(
                    "root flag {} disagrees with root parameters",
                    is_root
                )))
            }
        };
        node.restore_entries(entries);
        Ok(node)
    }
}

fn decode_region(dimension: usize, low: Vec<f64>, high: Vec<f64>) -> CacheResult<Region> {
    if low.len() != dimension || high.len() != dimension {
        return Err(CacheError::Serialization(format!(
            "expected {} coordinates, found {} and {}",
            dimension,
            low.len(),
            high.len()
        )));
    }
    Region::new(low, high).map_err(|e| CacheError::Serialization(e.to_string()))
}
