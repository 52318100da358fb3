//! Error types for the aggregation, scoring and ranking engines.

use geomap_store::{LayerKey, StoreError};
use geomap_tiles::TileError;
use thiserror::Error;

/// Errors that can occur while deriving, scoring or ranking.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The grid cache failed.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The layer a derivation reads from was never fetched or derived.
    #[error("Precursor layer missing: taxon={taxon_id} zoom={zoom} year={year} slot={slot}")]
    PrecursorMissing {
        taxon_id: i64,
        zoom: u8,
        year: i32,
        slot: u8,
    },

    /// Malformed tile, bounding box or query input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An explicitly empty active taxa set.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A layer could not be encoded for hashing.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The fetch service failed for a layer.
    #[error("Fetch failed ({key}): {message}")]
    Source { key: String, message: String },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// `PrecursorMissing` for the given layer key.
    pub fn precursor_missing(key: &LayerKey) -> Self {
        EngineError::PrecursorMissing {
            taxon_id: key.taxon_id,
            zoom: key.zoom,
            year: key.time.year,
            slot: key.time.slot.get(),
        }
    }
}

impl From<TileError> for EngineError {
    fn from(err: TileError) -> Self {
        EngineError::InvalidInput(err.to_string())
    }
}
