//! Geographic bounding boxes of grid cells.

use crate::{Result, TileError};
use serde::{Deserialize, Serialize};

/// Geographic bounds of a grid cell.
///
/// `top_lat` is the northern edge (numerically larger latitude) and
/// `left_lon` the western edge (numerically smaller longitude). Boxes that
/// cross the antimeridian are not supported: unions treat longitude as a
/// plain interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Latitude of the north edge.
    pub top_lat: f64,
    /// Longitude of the west edge.
    pub left_lon: f64,
    /// Latitude of the south edge.
    pub bottom_lat: f64,
    /// Longitude of the east edge.
    pub right_lon: f64,
}

impl BoundingBox {
    /// Create a bounding box from its four edges.
    pub fn new(top_lat: f64, left_lon: f64, bottom_lat: f64, right_lon: f64) -> Self {
        Self {
            top_lat,
            left_lon,
            bottom_lat,
            right_lon,
        }
    }

    /// Check that all edges are finite and the box is not inverted.
    pub fn validate(&self) -> Result<()> {
        let edges = [self.top_lat, self.left_lon, self.bottom_lat, self.right_lon];
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(TileError::InvalidInput(format!(
                "bounding box has non-finite edge: {:?}",
                self
            )));
        }
        if self.top_lat < self.bottom_lat || self.right_lon < self.left_lon {
            return Err(TileError::InvalidInput(format!(
                "bounding box is inverted: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Union of two boxes: elementwise max/min of opposing edges.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            top_lat: self.top_lat.max(other.top_lat),
            left_lon: self.left_lon.min(other.left_lon),
            bottom_lat: self.bottom_lat.min(other.bottom_lat),
            right_lon: self.right_lon.max(other.right_lon),
        }
    }

    /// Midpoint of the box as `(lat, lon)`.
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.top_lat + self.bottom_lat) / 2.0,
            (self.left_lon + self.right_lon) / 2.0,
        )
    }

    /// Check if a coordinate is within the bounds.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.bottom_lat && lat <= self.top_lat && lon >= self.left_lon && lon <= self.right_lon
    }
}

/// Union of a non-empty sequence of boxes.
///
/// Fails with [`TileError::InvalidInput`] when the sequence is empty.
pub fn union_bbox<'a, I>(boxes: I) -> Result<BoundingBox>
where
    I: IntoIterator<Item = &'a BoundingBox>,
{
    let mut iter = boxes.into_iter();
    let first = *iter
        .next()
        .ok_or_else(|| TileError::InvalidInput("cannot union an empty set of bounding boxes".to_string()))?;
    Ok(iter.fold(first, |acc, b| acc.union(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_takes_outer_edges() {
        let a = BoundingBox::new(56.0, 13.0, 55.5, 13.5);
        let b = BoundingBox::new(55.8, 13.4, 55.2, 14.0);

        let u = union_bbox([a, b].iter()).unwrap();
        assert_eq!(u, BoundingBox::new(56.0, 13.0, 55.2, 14.0));
    }

    #[test]
    fn test_union_single_box_is_identity() {
        let a = BoundingBox::new(56.0, 13.0, 55.5, 13.5);
        assert_eq!(union_bbox(std::iter::once(&a)).unwrap(), a);
    }

    #[test]
    fn test_union_empty_fails() {
        let boxes: Vec<BoundingBox> = Vec::new();
        assert!(matches!(union_bbox(boxes.iter()), Err(TileError::InvalidInput(_))));
    }

    #[test]
    fn test_centroid_and_contains() {
        let b = BoundingBox::new(56.0, 13.0, 55.0, 14.0);
        assert_eq!(b.centroid(), (55.5, 13.5));
        assert!(b.contains(55.5, 13.5));
        assert!(b.contains(56.0, 13.0)); // Corner
        assert!(!b.contains(56.5, 13.5)); // Too far north
        assert!(!b.contains(55.5, 12.5)); // Too far west
    }

    #[test]
    fn test_validate() {
        assert!(BoundingBox::new(56.0, 13.0, 55.0, 14.0).validate().is_ok());
        assert!(BoundingBox::new(55.0, 13.0, 56.0, 14.0).validate().is_err());
        assert!(BoundingBox::new(f64::NAN, 13.0, 55.0, 14.0).validate().is_err());
    }
}
