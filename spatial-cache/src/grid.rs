//! Grid partitioning of the root region into a regular lattice of tiles.
//!
//! The lattice is enumerated in row-major order with axis 0 varying fastest,
//! so the lattice coordinate `[i, j, k]` maps to the child index
//! `i + j * n0 + k * n0 * n1`.

use smallvec::SmallVec;

use crate::constants::EPSILON;
use crate::errors::{CacheError, CacheResult};
use crate::node::NodeId;
use crate::region::{Coords, Region};

/// Lattice coordinate, one cell index per axis.
pub type GridCoord = SmallVec<[usize; 4]>;

/// Strategy used by the root to partition its region into tiles.
///
/// Selected once at index construction; the grid is the only scheme the
/// cache ships with.
pub trait Partitioning {
    /// Number of tiles produced by [`split`](Partitioning::split).
    fn capacity(&self) -> usize;

    /// Identifiers of every tile, in child order.
    fn split(&self, bounds: &Region) -> Vec<NodeId>;

    /// Child index of the single tile containing `shape`, if there is one.
    fn locate(&self, bounds: &Region, shape: &Region) -> Option<usize>;

    /// Child indexes of every tile intersecting `region`.
    fn candidates(&self, bounds: &Region, region: &Region) -> Vec<usize>;
}

/// Partition parameters of a grid root: tile count per axis and a uniform
/// tile size.
#[derive(Clone, Debug, PartialEq)]
pub struct GridLayout {
    capacity: usize,
    tile_size: f64,
    tiles_per_axis: GridCoord,
}

impl GridLayout {
    /// Computes a layout whose tile count approximates `target_capacity`.
    ///
    /// The tile size is `(volume / target)^(1 / dims)`, and each axis gets
    /// as many tiles as needed to cover its extent. An axis shorter than
    /// the tile size gets a single tile and drops out of the volume, so the
    /// remaining axes share the whole target. The resulting capacity is the
    /// product of the per-axis counts and stays below `2^dims` times the
    /// target.
    pub fn new(bounds: &Region, target_capacity: usize) -> CacheResult<Self> {
        if target_capacity == 0 {
            return Err(CacheError::InvalidArgument(
                "tile capacity must be positive".into(),
            ));
        }
        let dims = bounds.dimension();
        if (0..dims).any(|axis| bounds.extent(axis) <= 0.0) {
            return Err(CacheError::InvalidArgument(format!(
                "root region {} must have a positive extent on every axis",
                bounds
            )));
        }

        let mut narrow: SmallVec<[bool; 4]> = SmallVec::from_elem(false, dims);
        let tile_size = loop {
            let wide: Vec<usize> = (0..dims).filter(|axis| !narrow[*axis]).collect();
            let volume: f64 = wide.iter().map(|axis| bounds.extent(*axis)).product();
            let size = (volume / target_capacity as f64).powf(1.0 / wide.len() as f64);
            if !size.is_finite() || size <= 0.0 {
                return Err(CacheError::InvalidArgument(format!(
                    "cannot derive a tile size for {} with capacity {}",
                    bounds, target_capacity
                )));
            }
            let short: Vec<usize> = wide
                .iter()
                .copied()
                .filter(|axis| bounds.extent(*axis) < size)
                .collect();
            // At least one axis is as long as the tile size.
            if short.is_empty() || short.len() == wide.len() {
                break size;
            }
            for axis in short {
                narrow[axis] = true;
            }
        };

        let tiles_per_axis: GridCoord = (0..dims)
            .map(|axis| {
                if narrow[axis] {
                    return 1;
                }
                let cells = (bounds.extent(axis) / tile_size - EPSILON).ceil();
                (cells as usize).max(1)
            })
            .collect();
        let capacity = tiles_per_axis
            .iter()
            .try_fold(1usize, |acc, n| acc.checked_mul(*n))
            .ok_or_else(|| {
                CacheError::InvalidArgument(format!(
                    "{:?} tiles per axis overflow the tile count",
                    tiles_per_axis
                ))
            })?;

        log::debug!(
            "Grid layout for {}: {} tiles of size {} ({:?} per axis)",
            bounds,
            capacity,
            tile_size,
            tiles_per_axis
        );

        Ok(Self {
            capacity,
            tile_size,
            tiles_per_axis,
        })
    }

    /// Rebuilds a layout from persisted parameters, checking they describe
    /// a lattice covering `bounds`.
    pub fn from_parts(
        bounds: &Region,
        capacity: usize,
        tile_size: f64,
        tiles_per_axis: &[usize],
    ) -> CacheResult<Self> {
        if tiles_per_axis.len() != bounds.dimension() {
            return Err(CacheError::InvalidArgument(format!(
                "layout has {} axes, root has {}",
                tiles_per_axis.len(),
                bounds.dimension()
            )));
        }
        if !(tile_size > 0.0) || !tile_size.is_finite() {
            return Err(CacheError::InvalidArgument(format!(
                "invalid tile size {}",
                tile_size
            )));
        }
        if tiles_per_axis.iter().any(|n| *n == 0)
            || tiles_per_axis.iter().product::<usize>() != capacity
        {
            return Err(CacheError::InvalidArgument(format!(
                "tiles per axis {:?} do not multiply to capacity {}",
                tiles_per_axis, capacity
            )));
        }
        Ok(Self {
            capacity,
            tile_size,
            tiles_per_axis: GridCoord::from_slice(tiles_per_axis),
        })
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    pub fn tiles_per_axis(&self) -> &[usize] {
        &self.tiles_per_axis
    }

    /// Advances a lattice cursor by one tile step, axis 0 first.
    ///
    /// Returns `false` once the lattice is exhausted, leaving the cursor
    /// reset to the origin.
    pub fn increment(&self, cursor: &mut [usize]) -> bool {
        for (axis, count) in self.tiles_per_axis.iter().enumerate() {
            cursor[axis] += 1;
            if cursor[axis] < *count {
                return true;
            }
            cursor[axis] = 0;
        }
        false
    }

    /// Row-major child index of a lattice coordinate.
    pub fn grid_index_to_tile(&self, index: &[usize]) -> usize {
        let mut tile = 0;
        let mut stride = 1;
        for (axis, count) in self.tiles_per_axis.iter().enumerate() {
            tile += index[axis] * stride;
            stride *= count;
        }
        tile
    }

    /// Region of the tile at `index`. The last tile on each axis is clipped
    /// to the root so tiles never extend past it.
    pub fn tile_region(&self, bounds: &Region, index: &[usize]) -> Region {
        let mut low = Coords::with_capacity(index.len());
        let mut high = Coords::with_capacity(index.len());
        for (axis, cell) in index.iter().enumerate() {
            let (lo, hi) = self.axis_interval(bounds, axis, *cell);
            low.push(lo);
            high.push(hi);
        }
        // Axis intervals are ordered by construction.
        Region::new(low, high).unwrap_or_else(|_| bounds.clone())
    }

    fn axis_interval(&self, bounds: &Region, axis: usize, cell: usize) -> (f64, f64) {
        let origin = bounds.low(axis);
        let limit = bounds.high(axis);
        let lo = (origin + cell as f64 * self.tile_size).min(limit);
        let hi = if cell + 1 >= self.tiles_per_axis[axis] {
            limit
        } else {
            (origin + (cell + 1) as f64 * self.tile_size).min(limit)
        };
        (lo, hi)
    }

    fn cell_of(&self, bounds: &Region, axis: usize, coord: f64) -> isize {
        ((coord - bounds.low(axis)) / self.tile_size).floor() as isize
    }

    fn clamp_cell(&self, axis: usize, cell: isize) -> usize {
        cell.clamp(0, self.tiles_per_axis[axis] as isize - 1) as usize
    }
}

impl Partitioning for GridLayout {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn split(&self, bounds: &Region) -> Vec<NodeId> {
        let mut children = Vec::with_capacity(self.capacity);
        let mut cursor: GridCoord = SmallVec::from_elem(0, self.tiles_per_axis.len());
        loop {
            children.push(NodeId::new(self.tile_region(bounds, &cursor)));
            if !self.increment(&mut cursor) {
                break;
            }
        }
        children
    }

    fn locate(&self, bounds: &Region, shape: &Region) -> Option<usize> {
        if !bounds.contains(shape) {
            return None;
        }
        let mut index = GridCoord::with_capacity(self.tiles_per_axis.len());
        for axis in 0..self.tiles_per_axis.len() {
            let guess = self.clamp_cell(axis, self.cell_of(bounds, axis, shape.low(axis)));
            // Rounding can put the guess one cell off near tile boundaries.
            let cell = [Some(guess), guess.checked_sub(1), Some(guess + 1)]
                .into_iter()
                .flatten()
                .filter(|cell| *cell < self.tiles_per_axis[axis])
                .find(|cell| {
                    let (lo, hi) = self.axis_interval(bounds, axis, *cell);
                    lo <= shape.low(axis) && shape.high(axis) <= hi
                })?;
            index.push(cell);
        }
        Some(self.grid_index_to_tile(&index))
    }

    fn candidates(&self, bounds: &Region, region: &Region) -> Vec<usize> {
        if !bounds.intersects(region) {
            return Vec::new();
        }

        let dims = self.tiles_per_axis.len();
        let mut per_axis: Vec<Vec<usize>> = Vec::with_capacity(dims);
        for axis in 0..dims {
            let first = self.clamp_cell(axis, self.cell_of(bounds, axis, region.low(axis)) - 1);
            let last = self.clamp_cell(axis, self.cell_of(bounds, axis, region.high(axis)) + 1);
            let cells: Vec<usize> = (first..=last)
                .filter(|cell| {
                    let (lo, hi) = self.axis_interval(bounds, axis, *cell);
                    lo <= region.high(axis) && region.low(axis) <= hi
                })
                .collect();
            if cells.is_empty() {
                return Vec::new();
            }
            per_axis.push(cells);
        }

        let mut tiles = Vec::new();
        let mut cursor = vec![0usize; dims];
        let mut index: GridCoord = SmallVec::from_elem(0, dims);
        'outer: loop {
            for axis in 0..dims {
                index[axis] = per_axis[axis][cursor[axis]];
            }
            tiles.push(self.grid_index_to_tile(&index));

            for axis in 0..dims {
                cursor[axis] += 1;
                if cursor[axis] < per_axis[axis].len() {
                    continue 'outer;
                }
                cursor[axis] = 0;
            }
            break;
        }
        tiles
    }
}
