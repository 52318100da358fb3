//! Metric declarations for the geomap engines.
//!
//! Every metric the engine records is declared here as a structured
//! [`Metric`] constant, so names and label keys live in one place. The
//! `metrics` crate is re-exported; without an installed recorder every
//! call is a no-op.
//!
//! # Example
//!
//! ```rust
//! use geomap_metrics::{metric_defs, MetricKind};
//!
//! assert_eq!(metric_defs::LAYERS_DERIVED.kind, MetricKind::Counter);
//! metrics::counter!(metric_defs::LAYERS_DERIVED.name, metric_defs::LAYERS_DERIVED.label => "14").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// How a metric is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A declared metric.
///
/// Every geomap metric is recorded with exactly one label, so the key is
/// part of the declaration.
///
/// ```rust
/// use geomap_metrics::{Metric, MetricKind};
///
/// const CELLS: Metric = Metric::counter("geomap.test.cells", "zoom", "Cells seen");
/// assert_eq!(CELLS.kind, MetricKind::Counter);
/// assert_eq!(CELLS.label, "zoom");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    /// Dotted name, `geomap.<stage>.<what>`.
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    /// Label key every sample carries.
    pub label: &'static str,
    /// One-line description for exporters.
    pub help: &'static str,
}

impl Metric {
    const fn declare(
        kind: MetricKind,
        name: &'static str,
        label: &'static str,
        unit: Unit,
        help: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            unit,
            label,
            help,
        }
    }

    /// A counter of discrete events.
    pub const fn counter(name: &'static str, label: &'static str, help: &'static str) -> Self {
        Self::declare(MetricKind::Counter, name, label, Unit::Count, help)
    }

    /// A gauge holding a count.
    pub const fn gauge(name: &'static str, label: &'static str, help: &'static str) -> Self {
        Self::declare(MetricKind::Gauge, name, label, Unit::Count, help)
    }

    /// A histogram in `unit`.
    pub const fn histogram(name: &'static str, label: &'static str, unit: Unit, help: &'static str) -> Self {
        Self::declare(MetricKind::Histogram, name, label, unit, help)
    }

    /// Register the unit and description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.help),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.help),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.help),
        }
    }
}

/// All metric definitions for the geomap engines.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Fetched layers whose content hash matched the ledger.
    pub const LAYERS_UNCHANGED: Metric = Metric::counter(
        "geomap.ingest.layers_unchanged",
        "zoom",
        "Fetched layers identical to the cached payload",
    );

    /// Fetched layers written to the cache.
    pub const LAYERS_REPLACED: Metric = Metric::counter(
        "geomap.ingest.layers_replaced",
        "zoom",
        "Fetched layers written to the cache",
    );

    /// Grid cells written, fetched or derived.
    pub const GRID_CELLS_WRITTEN: Metric =
        Metric::counter("geomap.grid.cells_written", "zoom", "Grid cells written to the cache");

    // ========================================================================
    // Aggregation
    // ========================================================================

    /// Layers derived from the next finer zoom, labelled with the derived zoom.
    pub const LAYERS_DERIVED: Metric = Metric::counter(
        "geomap.aggregate.layers_derived",
        "zoom",
        "Layers derived from the next finer zoom",
    );

    /// Derived layers skipped because their base layer had not changed.
    pub const LAYERS_CURRENT: Metric = Metric::counter(
        "geomap.aggregate.layers_current",
        "zoom",
        "Derived layers already current with their base layer",
    );

    // ========================================================================
    // Scoring
    // ========================================================================

    pub const HOTMAP_CELLS: Metric =
        Metric::gauge("geomap.hotmap.cells", "zoom", "Hotmap cells in the latest build");

    pub const HOTMAP_BUILD_TIME: Metric = Metric::histogram(
        "geomap.hotmap.build_ms",
        "zoom",
        Unit::Milliseconds,
        "Hotmap rebuild duration",
    );

    // ========================================================================
    // Ranking
    // ========================================================================

    pub const RANK_QUERIES: Metric = Metric::counter("geomap.rank.queries", "mode", "Ranking queries served");

    pub const RANK_RESULTS: Metric = Metric::histogram(
        "geomap.rank.results",
        "mode",
        Unit::Count,
        "Tiles returned per ranking query",
    );

    /// Every metric defined above.
    pub const ALL: &[&Metric] = &[
        &LAYERS_UNCHANGED,
        &LAYERS_REPLACED,
        &GRID_CELLS_WRITTEN,
        &LAYERS_DERIVED,
        &LAYERS_CURRENT,
        &HOTMAP_CELLS,
        &HOTMAP_BUILD_TIME,
        &RANK_QUERIES,
        &RANK_RESULTS,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::LAYERS_DERIVED.name, "geomap.aggregate.layers_derived");
        assert_eq!(metric_defs::LAYERS_DERIVED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::HOTMAP_CELLS.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::HOTMAP_BUILD_TIME.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::HOTMAP_BUILD_TIME.unit, Unit::Milliseconds);
        assert_eq!(metric_defs::RANK_RESULTS.label, "mode");
    }

    #[test]
    fn test_names_are_unique_and_prefixed() {
        let mut names: Vec<&str> = metric_defs::ALL.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), 9);
        assert!(names.iter().all(|n| n.starts_with("geomap.")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_every_metric_has_help() {
        for metric in metric_defs::ALL {
            assert!(!metric.help.is_empty(), "{} lacks a description", metric.name);
            assert!(matches!(metric.label, "zoom" | "mode"), "{}", metric.name);
        }
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
