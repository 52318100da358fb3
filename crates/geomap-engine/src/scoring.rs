//! Hotmap scoring.
//!
//! A hotmap layer scores every tile at one `(zoom, year, slot)` by how many
//! distinct active taxa it holds, damped by its observation volume:
//!
//! ```text
//! score = coverage^alpha / (obs_total + 1)^beta
//! ```
//!
//! High `alpha` favors species-rich tiles; high `beta` favors tiles with few
//! observations, i.e. under-recorded places.

use crate::aggregate::with_pool;
use crate::{EngineError, Result};
use geomap_metrics::metric_defs;
use geomap_store::{GridStore, HotmapCell, TaxonFilter, TaxonId, TimeContext};
use geomap_tiles::BoundingBox;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::info;

/// Scoring exponents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreParams {
    /// Coverage exponent.
    pub alpha: f64,
    /// Observation damping exponent.
    pub beta: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            alpha: 2.0,
            beta: 0.5,
        }
    }
}

impl ScoreParams {
    /// Check that both exponents are finite.
    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() || !self.beta.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "scoring exponents must be finite (alpha={}, beta={})",
                self.alpha, self.beta
            )));
        }
        Ok(())
    }

    /// Score of a tile with `coverage` distinct taxa and `obs_total` observations.
    ///
    /// Zero coverage scores zero for any positive `alpha`.
    pub fn score(&self, coverage: u32, obs_total: u64) -> f64 {
        f64::from(coverage).powf(self.alpha) / (obs_total as f64 + 1.0).powf(self.beta)
    }
}

/// Which taxa a hotmap build considers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxaSelection {
    /// Every taxon with cells at the key.
    All,
    /// Exactly these taxa. Must not be empty.
    Explicit(Vec<TaxonId>),
}

impl TaxaSelection {
    /// Resolve to a sorted, deduplicated taxa list.
    pub fn resolve(&self, store: &GridStore, zoom: u8, time: TimeContext) -> Result<Vec<TaxonId>> {
        match self {
            TaxaSelection::All => Ok(store.distinct_taxa(zoom, time)?),
            TaxaSelection::Explicit(ids) if ids.is_empty() => Err(EngineError::EmptyInput(format!(
                "active taxa set for zoom={} year={} slot={} is empty",
                zoom,
                time.year,
                time.slot.get()
            ))),
            TaxaSelection::Explicit(ids) => {
                let set: BTreeSet<TaxonId> = ids.iter().copied().collect();
                Ok(set.into_iter().collect())
            }
        }
    }
}

/// Summary of one hotmap rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotmapSummary {
    /// Zoom level.
    pub zoom: u8,
    /// Year and slot.
    pub time: TimeContext,
    /// Hotmap cells written.
    pub cells: usize,
    /// Taxa recorded as the active set.
    pub taxa: usize,
    /// Highest score in the layer, if any cell was written.
    pub max_score: Option<f64>,
}

struct TileAccumulator {
    taxa: BTreeSet<TaxonId>,
    obs_total: u64,
    bbox: BoundingBox,
}

/// Score grouped cells. `cells` are `(taxon, x, y, observations, bbox)`.
///
/// Output is sorted by `(x, y)`.
pub fn score_cells<I>(cells: I, params: &ScoreParams) -> Vec<HotmapCell>
where
    I: IntoIterator<Item = (TaxonId, u32, u32, u64, BoundingBox)>,
{
    let mut tiles: BTreeMap<(u32, u32), TileAccumulator> = BTreeMap::new();
    for (taxon_id, x, y, obs, bbox) in cells {
        tiles
            .entry((x, y))
            .and_modify(|acc| {
                acc.taxa.insert(taxon_id);
                acc.obs_total = acc.obs_total.saturating_add(obs);
                acc.bbox = acc.bbox.union(&bbox);
            })
            .or_insert_with(|| TileAccumulator {
                taxa: BTreeSet::from([taxon_id]),
                obs_total: obs,
                bbox,
            });
    }

    tiles
        .into_iter()
        .map(|((x, y), acc)| {
            let coverage = acc.taxa.len() as u32;
            HotmapCell {
                x,
                y,
                coverage,
                score: params.score(coverage, acc.obs_total),
                bbox: acc.bbox,
            }
        })
        .collect()
}

/// Rebuild the hotmap layer at `(zoom, year, slot)` from scratch.
///
/// The previous layer and taxa set are replaced wholesale. A selection that
/// matches no cells writes an empty layer.
pub fn rebuild_hotmap(
    store: &GridStore,
    zoom: u8,
    time: TimeContext,
    selection: &TaxaSelection,
    params: &ScoreParams,
) -> Result<HotmapSummary> {
    params.validate()?;
    let started = Instant::now();

    let taxa = selection.resolve(store, zoom, time)?;
    let filter = match selection {
        TaxaSelection::All => TaxonFilter::All,
        TaxaSelection::Explicit(_) => TaxonFilter::Only(taxa.clone()),
    };
    let stored = store.list_cells(&filter, zoom, time)?;
    let cells = score_cells(
        stored.into_iter().map(|c| {
            (
                c.taxon_id,
                c.cell.x,
                c.cell.y,
                c.cell.observations_count,
                c.cell.bbox,
            )
        }),
        params,
    );
    store.replace_hotmap(zoom, time, &cells, &taxa)?;

    let summary = HotmapSummary {
        zoom,
        time,
        cells: cells.len(),
        taxa: taxa.len(),
        max_score: cells.iter().map(|c| c.score).max_by(f64::total_cmp),
    };

    let zoom_label = zoom.to_string();
    metrics::gauge!(metric_defs::HOTMAP_CELLS.name, metric_defs::HOTMAP_CELLS.label => zoom_label.clone())
        .set(cells.len() as f64);
    metrics::histogram!(metric_defs::HOTMAP_BUILD_TIME.name, metric_defs::HOTMAP_BUILD_TIME.label => zoom_label)
        .record(started.elapsed().as_secs_f64() * 1000.0);
    info!(
        zoom,
        year = time.year,
        slot = %time.slot,
        cells = summary.cells,
        taxa = summary.taxa,
        alpha = params.alpha,
        beta = params.beta,
        "Rebuilt hotmap"
    );
    Ok(summary)
}

/// Rebuild several hotmap layers in parallel, one worker per `(zoom, time)`.
///
/// Summaries come back in input order.
pub fn rebuild_hotmaps(
    store: &GridStore,
    layers: &[(u8, TimeContext)],
    selection: &TaxaSelection,
    params: &ScoreParams,
    workers: Option<usize>,
) -> Result<Vec<HotmapSummary>> {
    with_pool(workers, || {
        layers
            .par_iter()
            .map(|&(zoom, time)| rebuild_hotmap(store, zoom, time, selection, params))
            .collect()
    })
}
