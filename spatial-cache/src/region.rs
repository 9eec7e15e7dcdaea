//! N-dimensional axis-aligned regions.
//!
//! A [`Region`] is the only shape the cache understands: tiles, data shapes,
//! queries and coverage records are all regions. A point is a region whose
//! low and high corners coincide.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::errors::{CacheError, CacheResult};

/// Coordinate vector, one entry per dimension.
pub type Coords = SmallVec<[f64; 4]>;

/// An n-dimensional axis-aligned box with closed bounds.
///
/// Invariant: `low.len() == high.len() > 0` and `low[i] <= high[i]` for every
/// axis. Coordinates are never NaN.
///
/// Regions of different dimension never intersect or contain one another.
///
/// # Examples
///
/// ```rust
/// use spatial_cache::Region;
///
/// let tile = Region::rect(0.0, 0.0, 10.0, 10.0);
/// let query = Region::rect(5.0, 5.0, 15.0, 15.0);
/// assert!(tile.intersects(&query));
/// assert!(!tile.contains(&query));
/// assert_eq!(tile.area(), 100.0);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    low: Coords,
    high: Coords,
}

impl Region {
    /// Creates a region from its low and high corners.
    ///
    /// Fails with `InvalidRegion` when the corners disagree on dimension,
    /// are empty, contain NaN, or have `low > high` on some axis.
    pub fn new(low: impl Into<Coords>, high: impl Into<Coords>) -> CacheResult<Region> {
        let low = low.into();
        let high = high.into();

        if low.is_empty() || low.len() != high.len() {
            return Err(CacheError::InvalidRegion(format!(
                "region corners must share a non-zero dimension (got {} and {})",
                low.len(),
                high.len()
            )));
        }

        for (axis, (l, h)) in low.iter().zip(high.iter()).enumerate() {
            // also rejects NaN
            if !(l <= h) {
                return Err(CacheError::InvalidRegion(format!(
                    "region low {} exceeds high {} on axis {}",
                    l, h, axis
                )));
            }
        }

        Ok(Region { low, high })
    }

    /// Convenience constructor for a 2D rectangle. Corners may be given in any order.
    ///
    /// # Panics
    ///
    /// Panics if any coordinate is NaN. Use [`Region::new`] for coordinates
    /// that come from outside the program.
    pub fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Region {
        assert!(
            !(x1.is_nan() || y1.is_nan() || x2.is_nan() || y2.is_nan()),
            "rectangle coordinates must not be NaN"
        );
        Region {
            low: SmallVec::from_slice(&[x1.min(x2), y1.min(y2)]),
            high: SmallVec::from_slice(&[x1.max(x2), y1.max(y2)]),
        }
    }

    /// A degenerate region with `low == high`.
    pub fn point(coords: impl Into<Coords>) -> CacheResult<Region> {
        let coords = coords.into();
        Region::new(coords.clone(), coords)
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self, axis: usize) -> f64 {
        self.low[axis]
    }

    pub fn high(&self, axis: usize) -> f64 {
        self.high[axis]
    }

    pub fn lows(&self) -> &[f64] {
        &self.low
    }

    pub fn highs(&self) -> &[f64] {
        &self.high
    }

    /// Length of the region along `axis`.
    pub fn extent(&self, axis: usize) -> f64 {
        self.high[axis] - self.low[axis]
    }

    pub fn is_point(&self) -> bool {
        self.low == self.high
    }

    /// Closed-box intersection test: touching boundaries intersect.
    pub fn intersects(&self, other: &Region) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        self.low
            .iter()
            .zip(self.high.iter())
            .zip(other.low.iter().zip(other.high.iter()))
            .all(|((l, h), (ol, oh))| l <= oh && ol <= h)
    }

    /// True when `other` lies entirely inside this region (boundaries included).
    pub fn contains(&self, other: &Region) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        self.low
            .iter()
            .zip(self.high.iter())
            .zip(other.low.iter().zip(other.high.iter()))
            .all(|((l, h), (ol, oh))| l <= ol && oh <= h)
    }

    /// Hyper-volume of the region. Zero for points and flat regions.
    pub fn area(&self) -> f64 {
        (0..self.dimension()).map(|axis| self.extent(axis)).product()
    }

    /// Smallest region enclosing both regions. Fails with `InvalidRegion`
    /// when their dimensions differ.
    pub fn union(&self, other: &Region) -> CacheResult<Region> {
        if self.dimension() != other.dimension() {
            return Err(CacheError::InvalidRegion(format!(
                "cannot unite {} with {}",
                self, other
            )));
        }
        Ok(Region {
            low: self
                .low
                .iter()
                .zip(other.low.iter())
                .map(|(a, b)| a.min(*b))
                .collect(),
            high: self
                .high
                .iter()
                .zip(other.high.iter())
                .map(|(a, b)| a.max(*b))
                .collect(),
        })
    }

    /// Overlap of the two regions, if any.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        if !self.intersects(other) {
            return None;
        }
        Some(Region {
            low: self
                .low
                .iter()
                .zip(other.low.iter())
                .map(|(a, b)| a.max(*b))
                .collect(),
            high: self
                .high
                .iter()
                .zip(other.high.iter())
                .map(|(a, b)| a.min(*b))
                .collect(),
        })
    }

    /// Box difference `self \ other`, as a list of disjoint-interior boxes.
    ///
    /// Slabs are carved off one axis at a time, so at most `2 * dimension`
    /// boxes are produced. Fragments share boundaries with `other` because
    /// regions are closed.
    pub fn subtract(&self, other: &Region) -> Vec<Region> {
        let Some(overlap) = self.intersection(other) else {
            return vec![self.clone()];
        };
        if other.contains(self) {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        let mut rest = self.clone();
        for axis in 0..self.dimension() {
            if overlap.low[axis] > rest.low[axis] {
                let mut slab = rest.clone();
                slab.high[axis] = overlap.low[axis];
                pieces.push(slab);
                rest.low[axis] = overlap.low[axis];
            }
            if overlap.high[axis] < rest.high[axis] {
                let mut slab = rest.clone();
                slab.low[axis] = overlap.high[axis];
                pieces.push(slab);
                rest.high[axis] = overlap.high[axis];
            }
        }
        pieces
    }

    /// Bounding envelope of a collection of regions, `None` when empty.
    pub fn envelope<'a, I>(regions: I) -> CacheResult<Option<Region>>
    where
        I: IntoIterator<Item = &'a Region>,
    {
        let mut iter = regions.into_iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        iter.try_fold(first.clone(), |acc, r| acc.union(r)).map(Some)
    }
}

// Equality and hashing compare coordinate values. -0.0 and 0.0 are equal and
// must hash alike; NaN is excluded by construction.
impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.low == other.low && self.high == other.high
    }
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.low.len().hash(state);
        for v in self.low.iter().chain(self.high.iter()) {
            let bits = if *v == 0.0 { 0u64 } else { v.to_bits() };
            bits.hash(state);
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_coords(f: &mut fmt::Formatter<'_>, coords: &[f64]) -> fmt::Result {
            write!(f, "(")?;
            for (i, c) in coords.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", c)?;
            }
            write!(f, ")")
        }

        write!(f, "Region[")?;
        write_coords(f, &self.low)?;
        write!(f, " -> ")?;
        write_coords(f, &self.high)?;
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(r: &Region) -> u64 {
        let mut h = DefaultHasher::new();
        r.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_new_rejects_inverted_axis() {
        let result = Region::new(vec![0.0, 5.0], vec![1.0, 4.0]);
        assert!(matches!(result, Err(CacheError::InvalidRegion(_))));
    }

    #[test]
    fn test_new_rejects_dimension_mismatch_and_nan() {
        assert!(Region::new(vec![0.0], vec![1.0, 1.0]).is_err());
        assert!(Region::new(Vec::<f64>::new(), Vec::<f64>::new()).is_err());
        assert!(matches!(
            Region::new(vec![f64::NAN], vec![1.0]),
            Err(CacheError::InvalidRegion(_))
        ));
        assert!(Region::point(vec![0.5, f64::NAN]).is_err());
    }

    #[test]
    #[should_panic(expected = "must not be NaN")]
    fn test_rect_panics_on_nan() {
        let _ = Region::rect(0.0, f64::NAN, 1.0, 1.0);
    }

    #[test]
    fn test_mismatched_dimensions_never_overlap() {
        let square = Region::rect(0.0, 0.0, 1.0, 1.0);
        let cube = Region::new(vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]).unwrap();
        assert!(!square.intersects(&cube));
        assert!(!cube.intersects(&square));
        assert!(!cube.contains(&square));
        assert!(!square.contains(&cube));
        assert_eq!(square.intersection(&cube), None);
        assert_eq!(square.subtract(&cube), vec![square.clone()]);
        assert!(matches!(
            square.union(&cube),
            Err(CacheError::InvalidRegion(_))
        ));
        assert!(matches!(
            Region::envelope([&square, &cube]),
            Err(CacheError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_rect_orders_corners() {
        let r = Region::rect(3.0, 4.0, 1.0, 2.0);
        assert_eq!(r.lows(), &[1.0, 2.0]);
        assert_eq!(r.highs(), &[3.0, 4.0]);
    }

    #[test]
    fn test_intersects_touching_boundaries() {
        let a = Region::rect(0.0, 0.0, 1.0, 1.0);
        let b = Region::rect(1.0, 0.0, 2.0, 1.0);
        let c = Region::rect(1.5, 1.5, 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_contains() {
        let outer = Region::rect(0.0, 0.0, 10.0, 10.0);
        let inner = Region::rect(2.0, 2.0, 10.0, 3.0);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn test_point_region() {
        let p = Region::point(vec![0.5, 0.5]).unwrap();
        assert!(p.is_point());
        assert_eq!(p.area(), 0.0);
        assert!(Region::rect(0.0, 0.0, 1.0, 1.0).contains(&p));
    }

    #[test]
    fn test_area_three_dimensions() {
        let r = Region::new(vec![0.0, 20.0, 40.0], vec![10.0, 30.0, 50.0]).unwrap();
        assert_eq!(r.area(), 1000.0);
    }

    #[test]
    fn test_union_and_intersection() {
        let a = Region::rect(0.0, 0.0, 2.0, 2.0);
        let b = Region::rect(1.0, 1.0, 3.0, 4.0);
        assert_eq!(a.union(&b).unwrap(), Region::rect(0.0, 0.0, 3.0, 4.0));
        assert_eq!(a.intersection(&b), Some(Region::rect(1.0, 1.0, 2.0, 2.0)));
        assert_eq!(a.intersection(&Region::rect(5.0, 5.0, 6.0, 6.0)), None);
    }

    #[test]
    fn test_subtract_disjoint_returns_self() {
        let a = Region::rect(0.0, 0.0, 1.0, 1.0);
        let b = Region::rect(2.0, 2.0, 3.0, 3.0);
        assert_eq!(a.subtract(&b), vec![a.clone()]);
    }

    #[test]
    fn test_subtract_covered_returns_nothing() {
        let a = Region::rect(1.0, 1.0, 2.0, 2.0);
        let b = Region::rect(0.0, 0.0, 3.0, 3.0);
        assert!(a.subtract(&b).is_empty());
    }

    #[test]
    fn test_subtract_hole_preserves_area() {
        let a = Region::rect(0.0, 0.0, 4.0, 4.0);
        let hole = Region::rect(1.0, 1.0, 2.0, 2.0);
        let pieces = a.subtract(&hole);
        assert_eq!(pieces.len(), 4);
        let area: f64 = pieces.iter().map(Region::area).sum();
        assert!((area - 15.0).abs() < 1e-12);
        for p in &pieces {
            assert!(a.contains(p));
        }
        assert_eq!(Region::envelope(&pieces).unwrap(), Some(a));
    }

    #[test]
    fn test_subtract_half_leaves_other_half() {
        let a = Region::rect(0.0, 0.0, 2.0, 1.0);
        let left = Region::rect(-1.0, -1.0, 1.0, 2.0);
        assert_eq!(a.subtract(&left), vec![Region::rect(1.0, 0.0, 2.0, 1.0)]);
    }

    #[test]
    fn test_envelope_of_empty_is_none() {
        let empty: Vec<Region> = Vec::new();
        assert!(Region::envelope(&empty).unwrap().is_none());
    }

    #[test]
    fn test_signed_zero_hashes_alike() {
        let a = Region::rect(0.0, 0.0, 1.0, 1.0);
        let b = Region::new(vec![-0.0, -0.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_boundary_adjacent_regions_are_distinct_keys() {
        // Regions differing only by one ulp at a tile boundary are different keys.
        let a = Region::rect(0.0, 0.0, 0.1 + 0.2, 1.0);
        let b = Region::rect(0.0, 0.0, 0.3, 1.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        let r = Region::rect(0.0, 1.5, 2.0, 3.0);
        assert_eq!(r.to_string(), "Region[(0, 1.5) -> (2, 3)]");
    }
}
