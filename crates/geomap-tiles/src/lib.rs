//! # geomap-tiles
//!
//! Tile math for the geomap biodiversity hotmap.
//!
//! This crate provides the pure, stateless pieces the aggregation and ranking
//! engines build on:
//! - Quad-tree tile coordinates in the Slippy Map convention, with the
//!   child → parent mapping used to derive coarser zoom levels
//! - Bounding boxes and their unions
//! - Haversine distance and distance-decay weights
//!
//! ## Example
//!
//! ```
//! use geomap_tiles::{parent_of, union_bbox, BoundingBox, TileCoord};
//!
//! // Parent of (15, 10, 20) is (14, 5, 10)
//! assert_eq!(parent_of(10, 20), (5, 10));
//! let tile = TileCoord::new(15, 10, 20)?;
//! assert_eq!(tile.parent(), Some(TileCoord::new(14, 5, 10)?));
//!
//! let a = BoundingBox::new(55.6, 13.0, 55.5, 13.1);
//! let b = BoundingBox::new(55.6, 13.1, 55.5, 13.2);
//! let union = union_bbox([a, b].iter())?;
//! assert_eq!(union, BoundingBox::new(55.6, 13.0, 55.5, 13.2));
//! # Ok::<(), geomap_tiles::TileError>(())
//! ```
//!
//! ## Limitations
//!
//! Bounding-box unions do not handle the antimeridian: longitudes are
//! treated as a plain interval. This is fine for regional deployments.

mod bbox;
mod coord;
mod distance;
mod error;

pub use bbox::{union_bbox, BoundingBox};
pub use coord::{parent_of, TileCoord};
pub use distance::{haversine_km, DistanceDecay, EARTH_RADIUS_KM};
pub use error::TileError;

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 24;

/// Result type for tile operations.
pub type Result<T> = std::result::Result<T, TileError>;
