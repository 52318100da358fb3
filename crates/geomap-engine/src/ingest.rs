//! Ingest of fetched layers: content hashing, change detection and the
//! all-years merge.

use crate::aggregate::{refresh_derived_chain, ChainReport};
use crate::{EngineError, Result};
use geomap_metrics::metric_defs;
use geomap_store::{GridCell, GridStore, LayerKey, LayerSource, TaxonId, TimeContext, YEAR_ALL};
use geomap_tiles::BoundingBox;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Hex SHA-256 over the cells of a layer.
///
/// Cells are sorted by `(x, y)` and encoded as compact JSON arrays of
/// `[x, y, zoom, observations, taxa, top, left, bottom, right]`, so the hash
/// does not depend on the order the fetch service returned them in.
pub fn content_hash(zoom: u8, cells: &[GridCell]) -> Result<String> {
    let mut slim: Vec<(u32, u32, u8, u64, u64, f64, f64, f64, f64)> = cells
        .iter()
        .map(|c| {
            (
                c.x,
                c.y,
                zoom,
                c.observations_count,
                c.taxa_count,
                c.bbox.top_lat,
                c.bbox.left_lon,
                c.bbox.bottom_lat,
                c.bbox.right_lon,
            )
        })
        .collect();
    slim.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let blob = serde_json::to_vec(&slim)?;
    Ok(hex::encode(Sha256::digest(&blob)))
}

/// What [`ingest_layer`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Payload identical to the cached one; only the fetch time was refreshed.
    Unchanged,
    /// Cells and fetch-state were replaced.
    Replaced,
}

/// Write a fetched layer unless the cache already holds the same payload.
///
/// Bounding boxes are validated before anything is written.
pub fn ingest_layer(store: &GridStore, key: &LayerKey, cells: &[GridCell]) -> Result<IngestOutcome> {
    for cell in cells {
        cell.bbox.validate()?;
    }

    let hash = content_hash(key.zoom, cells)?;
    let source = LayerSource::Fetched {
        content_hash: hash.clone(),
    };
    let zoom_label = key.zoom.to_string();

    let unchanged = matches!(
        store.get_fetch_state(key)?,
        Some(state) if state.source == source
    );
    if unchanged {
        store.upsert_fetch_state(key, &source, cells.len())?;
        metrics::counter!(metric_defs::LAYERS_UNCHANGED.name, metric_defs::LAYERS_UNCHANGED.label => zoom_label)
            .increment(1);
        debug!(%key, hash = %hash, "Fetched layer unchanged");
        return Ok(IngestOutcome::Unchanged);
    }

    store.replace_layer(key, cells, &source)?;
    metrics::counter!(metric_defs::LAYERS_REPLACED.name, metric_defs::LAYERS_REPLACED.label => zoom_label.clone())
        .increment(1);
    metrics::counter!(metric_defs::GRID_CELLS_WRITTEN.name, metric_defs::GRID_CELLS_WRITTEN.label => zoom_label)
        .increment(cells.len() as u64);
    info!(%key, cells = cells.len(), hash = %hash, "Ingested fetched layer");
    Ok(IngestOutcome::Replaced)
}

/// Merge per-year layers of one taxon and slot into a single layer.
///
/// Observations are summed (saturating), the taxa count takes the maximum and the boxes
/// are unioned. Output is sorted by `(x, y)`.
pub fn merge_cells<'a, I>(layers: I) -> Vec<GridCell>
where
    I: IntoIterator<Item = &'a [GridCell]>,
{
    let mut merged: BTreeMap<(u32, u32), GridCell> = BTreeMap::new();
    for layer in layers {
        for cell in layer {
            merged
                .entry((cell.x, cell.y))
                .and_modify(|acc| {
                    acc.observations_count = acc.observations_count.saturating_add(cell.observations_count);
                    acc.taxa_count = acc.taxa_count.max(cell.taxa_count);
                    acc.bbox = acc.bbox.union(&cell.bbox);
                })
                .or_insert_with(|| cell.clone());
        }
    }
    merged.into_values().collect()
}

/// Rebuild the all-years (`year = 0`) layer of a taxon from its per-year
/// layers at `zoom` and `time.slot`.
///
/// Every listed year must have been fetched; a missing one fails with
/// [`EngineError::PrecursorMissing`].
pub fn merge_year_layers(
    store: &GridStore,
    taxon_id: TaxonId,
    zoom: u8,
    time: TimeContext,
    years: &[i32],
) -> Result<IngestOutcome> {
    let mut layers = Vec::with_capacity(years.len());
    for &year in years {
        if year == YEAR_ALL {
            return Err(EngineError::InvalidInput(
                "year 0 is the merge target, not a source".to_string(),
            ));
        }
        let key = LayerKey::new(taxon_id, zoom, TimeContext::new(year, time.slot));
        if store.get_fetch_state(&key)?.is_none() {
            return Err(EngineError::precursor_missing(&key));
        }
        layers.push(store.layer_cells(&key)?);
    }

    let merged = merge_cells(layers.iter().map(Vec::as_slice));
    let target = LayerKey::new(taxon_id, zoom, TimeContext::new(YEAR_ALL, time.slot));
    debug!(key = %target, years = years.len(), cells = merged.len(), "Merged yearly layers");
    ingest_layer(store, &target, &merged)
}

/// External fetch service: returns the grid cells of one layer.
///
/// The HTTP client lives outside this crate; implementors only need to
/// translate the service payload into [`GridCell`]s.
pub trait GridSource {
    /// Fetch all cells for `key`.
    fn fetch(&self, key: &LayerKey) -> std::result::Result<Vec<GridCell>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Result of [`sync_taxon`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// What happened to the base layer.
    pub base: IngestOutcome,
    /// Derived zoom levels rebuilt or left in place.
    pub chain: ChainReport,
}

/// Fetch a taxon's base layer, ingest it and bring the derived chain down
/// to `target_zoom` up to date.
pub fn sync_taxon<S: GridSource + ?Sized>(
    store: &GridStore,
    source: &S,
    taxon_id: TaxonId,
    time: TimeContext,
    base_zoom: u8,
    target_zoom: u8,
) -> Result<SyncReport> {
    let key = LayerKey::new(taxon_id, base_zoom, time);
    let cells = source.fetch(&key).map_err(|e| EngineError::Source {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    let base = ingest_layer(store, &key, &cells)?;
    let chain = refresh_derived_chain(store, taxon_id, time, base_zoom, target_zoom)?;
    Ok(SyncReport { base, chain })
}

/// Union of the boxes of a non-empty set of cells.
pub(crate) fn cells_bbox<'a, I>(cells: I) -> Result<BoundingBox>
where
    I: IntoIterator<Item = &'a GridCell>,
{
    Ok(geomap_tiles::union_bbox(cells.into_iter().map(|c| &c.bbox))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(x: u32, y: u32, obs: u64, taxa: u64) -> GridCell {
        GridCell {
            x,
            y,
            observations_count: obs,
            taxa_count: taxa,
            bbox: BoundingBox::new(55.7, 13.3, 55.6, 13.4),
        }
    }

    #[test]
    fn test_content_hash_ignores_order() {
        let a = [cell(1, 2, 3, 1), cell(0, 5, 1, 1)];
        let b = [cell(0, 5, 1, 1), cell(1, 2, 3, 1)];
        assert_eq!(content_hash(15, &a).unwrap(), content_hash(15, &b).unwrap());
        assert_eq!(content_hash(15, &a).unwrap().len(), 64);
    }

    #[test]
    fn test_content_hash_sensitive_to_counts_and_zoom() {
        let a = [cell(1, 2, 3, 1)];
        let b = [cell(1, 2, 4, 1)];
        assert_ne!(content_hash(15, &a).unwrap(), content_hash(15, &b).unwrap());
        assert_ne!(content_hash(15, &a).unwrap(), content_hash(14, &a).unwrap());
    }

    #[test]
    fn test_merge_cells_sums_observations_and_maxes_taxa() {
        let y2023 = vec![cell(1, 1, 3, 2), cell(2, 2, 1, 1)];
        let y2024 = vec![cell(1, 1, 4, 5)];
        let merged = merge_cells([y2023.as_slice(), y2024.as_slice()]);

        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].x, merged[0].observations_count, merged[0].taxa_count), (1, 7, 5));
        assert_eq!((merged[1].x, merged[1].observations_count), (2, 1));
    }

    #[test]
    fn test_merge_cells_saturates_observations() {
        let y2023 = vec![cell(1, 1, u64::MAX, 2)];
        let y2024 = vec![cell(1, 1, 10, 1)];
        let merged = merge_cells([y2023.as_slice(), y2024.as_slice()]);
        assert_eq!(merged[0].observations_count, u64::MAX);
    }

    #[test]
    fn test_content_hash_of_empty_layer() {
        let hash = content_hash(15, &[]).unwrap();
        assert_eq!(hash, hex::encode(Sha256::digest(b"[]")));
    }

    #[test]
    fn test_ingest_detects_unchanged_payload() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(42, 15, TimeContext::ALL);
        let cells = [cell(10, 20, 5, 1)];

        assert_eq!(ingest_layer(&store, &key, &cells).unwrap(), IngestOutcome::Replaced);
        assert_eq!(ingest_layer(&store, &key, &cells).unwrap(), IngestOutcome::Unchanged);
        assert_eq!(
            ingest_layer(&store, &key, &[cell(10, 20, 6, 1)]).unwrap(),
            IngestOutcome::Replaced
        );
    }

    #[test]
    fn test_ingest_rejects_unstorable_count() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(42, 15, TimeContext::ALL);

        let err = ingest_layer(&store, &key, &[cell(1, 1, u64::MAX, 1)]).unwrap_err();
        assert!(matches!(err, EngineError::Storage(geomap_store::StoreError::InvalidInput(_))));
        assert!(store.get_fetch_state(&key).unwrap().is_none());
    }

    #[test]
    fn test_ingest_rejects_inverted_bbox() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(42, 15, TimeContext::ALL);
        let mut bad = cell(1, 1, 1, 1);
        bad.bbox = BoundingBox::new(55.0, 13.0, 56.0, 14.0);

        let err = ingest_layer(&store, &key, &[bad]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(store.get_fetch_state(&key).unwrap().is_none());
    }
}
