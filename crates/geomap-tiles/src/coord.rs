//! Quad-tree tile coordinates.
//!
//! Indices follow the slippy-map scheme used by web map tile servers:
//! - `zoom` is the zoom level (0-24); higher zoom means smaller tiles
//! - `x` is the column (0 to 2^zoom - 1, from west to east)
//! - `y` is the row (0 to 2^zoom - 1, from north to south)
//!
//! The four children of `(z, x, y)` are `(z+1, 2x, 2y)`, `(z+1, 2x+1, 2y)`,
//! `(z+1, 2x, 2y+1)` and `(z+1, 2x+1, 2y+1)`.

use crate::bbox::BoundingBox;
use crate::{Result, TileError, MAX_ZOOM};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Parent tile indices of `(x, y)` one zoom level up: `(x / 2, y / 2)`.
pub fn parent_of(x: u32, y: u32) -> (u32, u32) {
    (x / 2, y / 2)
}

/// Tile coordinates `(zoom, x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level.
    pub zoom: u8,
    /// Column, counted eastward from the antimeridian.
    pub x: u32,
    /// Row, counted southward from the Web Mercator north edge.
    pub y: u32,
}

impl TileCoord {
    /// Create a new tile coordinate, checking the indices against the zoom level.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(TileError::InvalidZoomLevel(zoom));
        }
        let max_coord = 1u64 << zoom;
        if u64::from(x) >= max_coord || u64::from(y) >= max_coord {
            return Err(TileError::OutOfRange { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    /// Tile containing a point.
    ///
    /// Latitudes beyond the Web Mercator limit are clamped to it; a longitude
    /// of exactly 180° lands in the last column.
    pub fn from_lat_lon(lat: f64, lon: f64, zoom: u8) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(TileError::InvalidZoomLevel(zoom));
        }
        if !lat.is_finite() || !lon.is_finite() {
            return Err(TileError::InvalidInput(format!(
                "non-finite coordinate ({}, {})",
                lat, lon
            )));
        }

        // The exact Web Mercator limit is ±85.0511287798° (arctan(sinh(π)))
        let phi = lat.clamp(-85.0511, 85.0511).to_radians();
        let n = (1u64 << zoom) as f64;
        let last = (1u64 << zoom) - 1;

        let col = ((lon + 180.0) / 360.0 * n).floor().max(0.0) as u64;
        let row = ((1.0 - phi.tan().asinh() / PI) / 2.0 * n).floor().max(0.0) as u64;
        Ok(Self {
            zoom,
            x: col.min(last) as u32,
            y: row.min(last) as u32,
        })
    }

    /// The tile one zoom level coarser that contains this tile.
    ///
    /// Returns `None` at zoom 0.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.zoom == 0 {
            return None;
        }
        let (x, y) = parent_of(self.x, self.y);
        Some(TileCoord {
            zoom: self.zoom - 1,
            x,
            y,
        })
    }

    /// The four tiles one zoom level finer that make up this tile.
    pub fn children(&self) -> [TileCoord; 4] {
        let zoom = self.zoom + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [
            TileCoord { zoom, x, y },
            TileCoord { zoom, x: x + 1, y },
            TileCoord { zoom, x, y: y + 1 },
            TileCoord { zoom, x: x + 1, y: y + 1 },
        ]
    }

    /// Web Mercator bounding box of this tile.
    pub fn bounds(&self) -> BoundingBox {
        let n = (1u64 << self.zoom) as f64;

        let left_lon = self.x as f64 / n * 360.0 - 180.0;
        let right_lon = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        // Inverse of the Slippy Map formula
        let top_lat = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan().to_degrees();
        let bottom_lat = (PI * (1.0 - 2.0 * (self.y as f64 + 1.0) / n)).sinh().atan().to_degrees();

        BoundingBox::new(top_lat, left_lon, bottom_lat, right_lon)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
