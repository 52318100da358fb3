//! Zoom aggregation.
//!
//! A coarser layer is built from the layer one zoom level finer by grouping
//! cells under their quad-tree parent. Derivation runs per taxon, one zoom
//! step at a time, in strictly descending zoom order.

use crate::ingest::cells_bbox;
use crate::{EngineError, Result};
use geomap_metrics::metric_defs;
use geomap_store::{FetchState, GridCell, GridStore, LayerKey, LayerSource, TaxonId, TimeContext};
use geomap_tiles::{parent_of, MAX_ZOOM};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Group cells under their parent tile one zoom level up.
///
/// Observation and taxa counts are summed, saturating at `u64::MAX` (taxa
/// counts are never scored, so the sum is only kept for reference), boxes
/// are unioned. Output is sorted
/// by `(x, y)`; an empty input gives an empty output.
pub fn aggregate_to_parent(cells: &[GridCell]) -> Result<Vec<GridCell>> {
    let mut groups: BTreeMap<(u32, u32), Vec<&GridCell>> = BTreeMap::new();
    for cell in cells {
        groups.entry(parent_of(cell.x, cell.y)).or_default().push(cell);
    }

    groups
        .into_iter()
        .map(|((x, y), children)| {
            Ok(GridCell {
                x,
                y,
                observations_count: children
                    .iter()
                    .fold(0u64, |acc, c| acc.saturating_add(c.observations_count)),
                taxa_count: children.iter().fold(0u64, |acc, c| acc.saturating_add(c.taxa_count)),
                bbox: cells_bbox(children.iter().copied())?,
            })
        })
        .collect()
}

/// Derive the layer at `source_zoom - 1` from the layer at `source_zoom`.
///
/// The derived fetch-state carries a marker naming the source zoom and the
/// content hash of the fetched base layer at the root of the chain. Returns
/// the number of cells written.
pub fn derive_parent_layer(
    store: &GridStore,
    taxon_id: TaxonId,
    source_zoom: u8,
    time: TimeContext,
) -> Result<usize> {
    if source_zoom == 0 {
        return Err(EngineError::InvalidInput(format!(
            "taxon={} has no zoom level below 0 to derive",
            taxon_id
        )));
    }

    let source_key = LayerKey::new(taxon_id, source_zoom, time);
    let target = source_key.at_zoom(source_zoom - 1);
    let mut children = 0;
    let written = store
        .derive_layer(&source_key, &target, |state, cells| {
            children = cells.len();
            let parents = aggregate_to_parent(&cells)?;
            let marker = LayerSource::Derived {
                from_zoom: source_zoom,
                root_hash: state.source.root_hash().to_string(),
            };
            Ok::<_, EngineError>((parents, marker))
        })?
        .ok_or_else(|| EngineError::precursor_missing(&source_key))?;

    let zoom_label = target.zoom.to_string();
    metrics::counter!(metric_defs::LAYERS_DERIVED.name, metric_defs::LAYERS_DERIVED.label => zoom_label.clone())
        .increment(1);
    metrics::counter!(metric_defs::GRID_CELLS_WRITTEN.name, metric_defs::GRID_CELLS_WRITTEN.label => zoom_label)
        .increment(written as u64);
    debug!(key = %target, children, cells = written, "Derived layer");
    Ok(written)
}

/// Whether `state` records a derivation from `source_zoom` rooted at the
/// fetched payload `root_hash`.
pub fn is_current_derivation(state: &FetchState, source_zoom: u8, root_hash: &str) -> bool {
    match &state.source {
        LayerSource::Derived {
            from_zoom,
            root_hash: recorded,
        } => *from_zoom == source_zoom && recorded == root_hash,
        LayerSource::Fetched { .. } => false,
    }
}

/// Zoom levels touched by a chain refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Zooms that were (re)derived, in derivation order.
    pub derived: Vec<u8>,
    /// Zooms already current with the base layer.
    pub current: Vec<u8>,
}

fn check_chain(base_zoom: u8, target_zoom: u8) -> Result<()> {
    if base_zoom > MAX_ZOOM || target_zoom > base_zoom {
        return Err(EngineError::InvalidInput(format!(
            "cannot derive from zoom {} down to zoom {}",
            base_zoom, target_zoom
        )));
    }
    Ok(())
}

/// Derive every zoom from `base_zoom - 1` down to `target_zoom`, one step at
/// a time.
pub fn derive_chain(
    store: &GridStore,
    taxon_id: TaxonId,
    time: TimeContext,
    base_zoom: u8,
    target_zoom: u8,
) -> Result<ChainReport> {
    check_chain(base_zoom, target_zoom)?;
    let mut report = ChainReport::default();
    for source_zoom in ((target_zoom + 1)..=base_zoom).rev() {
        derive_parent_layer(store, taxon_id, source_zoom, time)?;
        report.derived.push(source_zoom - 1);
    }
    Ok(report)
}

/// Like [`derive_chain`], but skip zooms whose fetch-state already records a
/// derivation from the current base payload.
pub fn refresh_derived_chain(
    store: &GridStore,
    taxon_id: TaxonId,
    time: TimeContext,
    base_zoom: u8,
    target_zoom: u8,
) -> Result<ChainReport> {
    check_chain(base_zoom, target_zoom)?;
    let base_key = LayerKey::new(taxon_id, base_zoom, time);
    let base = store
        .get_fetch_state(&base_key)?
        .ok_or_else(|| EngineError::precursor_missing(&base_key))?;
    let root_hash = base.source.root_hash().to_string();

    let mut report = ChainReport::default();
    for source_zoom in ((target_zoom + 1)..=base_zoom).rev() {
        let zoom = source_zoom - 1;
        let current = store
            .get_fetch_state(&base_key.at_zoom(zoom))?
            .is_some_and(|state| is_current_derivation(&state, source_zoom, &root_hash));
        if current {
            metrics::counter!(metric_defs::LAYERS_CURRENT.name, metric_defs::LAYERS_CURRENT.label => zoom.to_string())
                .increment(1);
            report.current.push(zoom);
        } else {
            derive_parent_layer(store, taxon_id, source_zoom, time)?;
            report.derived.push(zoom);
        }
    }
    debug!(
        taxon_id,
        year = time.year,
        slot = %time.slot,
        derived = report.derived.len(),
        current = report.current.len(),
        "Refreshed derived chain"
    );
    Ok(report)
}

/// Run `f` on a rayon pool of `workers` threads, or the global pool when `None`.
pub(crate) fn with_pool<T, F>(workers: Option<usize>, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    match workers {
        None => f(),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n.max(1))
                .build()
                .map_err(|e| EngineError::Config(format!("worker pool: {}", e)))?;
            pool.install(f)
        }
    }
}

/// Refresh the derived chains of many `(taxon, time)` pairs in parallel.
///
/// Each pair is handled by a single worker, so no two workers ever write the
/// same layer. Reports come back in input order; the first failure aborts the
/// batch.
pub fn derive_taxa(
    store: &GridStore,
    layers: &[(TaxonId, TimeContext)],
    base_zoom: u8,
    target_zoom: u8,
    workers: Option<usize>,
) -> Result<Vec<ChainReport>> {
    let reports = with_pool(workers, || {
        layers
            .par_iter()
            .map(|&(taxon_id, time)| refresh_derived_chain(store, taxon_id, time, base_zoom, target_zoom))
            .collect::<Result<Vec<_>>>()
    })?;
    info!(
        layers = layers.len(),
        derived = reports.iter().map(|r| r.derived.len()).sum::<usize>(),
        base_zoom,
        target_zoom,
        "Derived zoom chains"
    );
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomap_tiles::BoundingBox;

    fn cell(x: u32, y: u32, obs: u64, bbox: BoundingBox) -> GridCell {
        GridCell {
            x,
            y,
            observations_count: obs,
            taxa_count: 1,
            bbox,
        }
    }

    #[test]
    fn test_aggregate_groups_by_parent() {
        let a = BoundingBox::new(55.70, 13.30, 55.69, 13.31);
        let b = BoundingBox::new(55.70, 13.31, 55.69, 13.32);
        let c = BoundingBox::new(10.0, 10.0, 9.0, 11.0);
        let cells = [cell(10, 20, 5, a), cell(11, 20, 3, b), cell(40, 40, 7, c)];

        let parents = aggregate_to_parent(&cells).unwrap();
        assert_eq!(parents.len(), 2);
        assert_eq!((parents[0].x, parents[0].y), (5, 10));
        assert_eq!(parents[0].observations_count, 8);
        assert_eq!(parents[0].taxa_count, 2);
        assert_eq!(parents[0].bbox, a.union(&b));
        assert_eq!((parents[1].x, parents[1].y, parents[1].observations_count), (20, 20, 7));
    }

    #[test]
    fn test_aggregate_saturates_counts() {
        let a = BoundingBox::new(55.70, 13.30, 55.69, 13.31);
        let mut huge = cell(10, 20, u64::MAX, a);
        huge.taxa_count = u64::MAX;
        let parents = aggregate_to_parent(&[huge, cell(11, 20, 3, a)]).unwrap();

        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].observations_count, u64::MAX);
        assert_eq!(parents[0].taxa_count, u64::MAX);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate_to_parent(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_is_current_derivation() {
        let state = |source| FetchState {
            last_fetch: chrono::Utc::now(),
            source,
            cell_count: 0,
        };
        let derived = state(LayerSource::Derived {
            from_zoom: 15,
            root_hash: "abc".to_string(),
        });
        assert!(is_current_derivation(&derived, 15, "abc"));
        assert!(!is_current_derivation(&derived, 15, "abd"));
        assert!(!is_current_derivation(&derived, 14, "abc"));

        let fetched = state(LayerSource::Fetched {
            content_hash: "abc".to_string(),
        });
        assert!(!is_current_derivation(&fetched, 15, "abc"));
    }

    #[test]
    fn test_derive_from_zoom_zero_is_invalid() {
        let store = GridStore::open_in_memory().unwrap();
        let err = derive_parent_layer(&store, 1, 0, TimeContext::ALL).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_derive_writes_marker_of_aggregated_source() {
        let store = GridStore::open_in_memory().unwrap();
        let source = LayerKey::new(3, 15, TimeContext::ALL);
        let bbox = BoundingBox::new(55.70, 13.30, 55.69, 13.31);
        let fetched = LayerSource::Fetched {
            content_hash: "root".to_string(),
        };
        store
            .replace_layer(&source, &[cell(10, 20, 5, bbox), cell(11, 20, 3, bbox)], &fetched)
            .unwrap();

        assert_eq!(derive_parent_layer(&store, 3, 15, TimeContext::ALL).unwrap(), 1);
        let target = source.at_zoom(14);
        let state = store.get_fetch_state(&target).unwrap().unwrap();
        assert!(is_current_derivation(&state, 15, "root"));
        assert_eq!(state.cell_count, 1);
        assert_eq!(store.layer_cells(&target).unwrap()[0].observations_count, 8);
    }
}
