//! Error types for the tile math crate.

use thiserror::Error;

/// Errors that can occur when working with tiles and bounding boxes.
#[derive(Debug, Error, PartialEq)]
pub enum TileError {
    /// Malformed tile or bounding-box input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tile index does not exist at the given zoom level.
    #[error("Tile x={x} y={y} out of range for zoom {zoom}")]
    OutOfRange {
        /// Zoom level.
        zoom: u8,
        /// X tile coordinate.
        x: u32,
        /// Y tile coordinate.
        y: u32,
    },

    /// Zoom level outside the supported range.
    #[error("Invalid zoom level {0} (must be 0-24)")]
    InvalidZoomLevel(u8),
}
