//! Nearby ranking over a built hotmap layer.

use crate::{EngineError, Result};
use geomap_metrics::metric_defs;
use geomap_store::{CellTaxon, GridStore, TimeContext};
use geomap_tiles::{haversine_km, BoundingBox, DistanceDecay};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// How candidate tiles are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RankMode {
    /// Hotmap score alone.
    Score,
    /// Score multiplied by a distance-decay weight.
    DistanceWeighted {
        /// Decay curve.
        decay: DistanceDecay,
    },
}

impl RankMode {
    fn label(&self) -> &'static str {
        match self {
            RankMode::Score => "score",
            RankMode::DistanceWeighted { .. } => "distance_weighted",
        }
    }
}

impl Default for RankMode {
    fn default() -> Self {
        RankMode::DistanceWeighted {
            decay: DistanceDecay::default(),
        }
    }
}

/// A nearby-ranking query.
#[derive(Debug, Clone, PartialEq)]
pub struct RankQuery {
    /// Query latitude.
    pub lat: f64,
    /// Query longitude.
    pub lon: f64,
    /// Hotmap zoom level.
    pub zoom: u8,
    /// Hotmap year and slot.
    pub time: TimeContext,
    /// Tiles whose centroid lies farther away are dropped.
    pub max_km: f64,
    /// Maximum number of tiles returned.
    pub limit: usize,
    /// Ordering.
    pub mode: RankMode,
    /// Attach up to this many contributing taxa per tile; `None` skips the lookup.
    pub taxa_limit: Option<usize>,
}

impl RankQuery {
    /// Query with the default radius (250 km), limit (20) and distance weighting.
    pub fn new(lat: f64, lon: f64, zoom: u8, time: TimeContext) -> Self {
        Self {
            lat,
            lon,
            zoom,
            time,
            max_km: 250.0,
            limit: 20,
            mode: RankMode::default(),
            taxa_limit: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(EngineError::InvalidInput(format!("latitude out of range: {}", self.lat)));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(EngineError::InvalidInput(format!("longitude out of range: {}", self.lon)));
        }
        if !self.max_km.is_finite() || self.max_km < 0.0 {
            return Err(EngineError::InvalidInput(format!("max_km must be >= 0: {}", self.max_km)));
        }
        Ok(())
    }
}

/// One ranked tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTile {
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Distinct active taxa present.
    pub coverage: u32,
    /// Hotmap score.
    pub score: f64,
    /// Great-circle distance from the query point to the centroid, in km.
    pub distance_km: f64,
    /// Distance weight applied (1 in score mode).
    pub weight: f64,
    /// Value the tile was ranked by.
    pub rank_score: f64,
    /// Bounding-box midpoint as `(lat, lon)`.
    pub centroid: (f64, f64),
    /// Geographic bounds.
    pub bbox: BoundingBox,
    /// Contributing taxa by observations descending, when requested.
    pub taxa: Vec<CellTaxon>,
}

/// Order: rank score descending, then distance ascending, then `(x, y)`.
fn rank_order(a: &RankedTile, b: &RankedTile) -> Ordering {
    b.rank_score
        .total_cmp(&a.rank_score)
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        .then_with(|| (a.x, a.y).cmp(&(b.x, b.y)))
}

/// Rank the hotmap tiles near a point.
///
/// An empty result is valid: nothing lies within `max_km`, or the layer was
/// never built.
pub fn rank_nearby(store: &GridStore, query: &RankQuery) -> Result<Vec<RankedTile>> {
    query.validate()?;

    let mut ranked: Vec<RankedTile> = store
        .list_hotmap(query.zoom, query.time)?
        .into_iter()
        .filter_map(|stored| {
            let cell = stored.cell;
            let centroid = cell.bbox.centroid();
            let distance_km = haversine_km(query.lat, query.lon, centroid.0, centroid.1);
            if distance_km > query.max_km {
                return None;
            }
            let weight = match query.mode {
                RankMode::Score => 1.0,
                RankMode::DistanceWeighted { decay } => decay.weight(distance_km),
            };
            Some(RankedTile {
                x: cell.x,
                y: cell.y,
                coverage: cell.coverage,
                score: cell.score,
                distance_km,
                weight,
                rank_score: cell.score * weight,
                centroid,
                bbox: cell.bbox,
                taxa: Vec::new(),
            })
        })
        .collect();

    ranked.sort_by(rank_order);
    ranked.truncate(query.limit);

    if let Some(limit) = query.taxa_limit {
        for tile in &mut ranked {
            tile.taxa = store.cell_taxa(query.zoom, query.time, tile.x, tile.y, Some(limit))?;
        }
    }

    let mode = query.mode.label();
    metrics::counter!(metric_defs::RANK_QUERIES.name, metric_defs::RANK_QUERIES.label => mode).increment(1);
    metrics::histogram!(metric_defs::RANK_RESULTS.name, metric_defs::RANK_RESULTS.label => mode)
        .record(ranked.len() as f64);
    debug!(
        lat = query.lat,
        lon = query.lon,
        zoom = query.zoom,
        max_km = query.max_km,
        results = ranked.len(),
        mode,
        "Ranked nearby tiles"
    );
    Ok(ranked)
}
