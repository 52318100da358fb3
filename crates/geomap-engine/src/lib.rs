//! # geomap-engine
//!
//! Aggregation, scoring and ranking for the geomap biodiversity hotmap.
//!
//! The pipeline, driven by an orchestrator such as the `geomap` CLI:
//! 1. **Ingest** fetched base-zoom layers per taxon ([`ingest_layer`],
//!    [`sync_taxon`]), skipping payloads whose content hash is unchanged
//! 2. **Aggregate** coarser zooms one step at a time ([`derive_parent_layer`],
//!    [`refresh_derived_chain`], [`derive_taxa`])
//! 3. **Score** a zoom into a hotmap layer for an active taxa set
//!    ([`rebuild_hotmap`])
//! 4. **Rank** hotmap tiles near a point ([`rank_nearby`])
//!
//! All state lives in the [`GridStore`](geomap_store::GridStore) passed to
//! each call.
//!
//! ## Example
//!
//! ```
//! use geomap_engine::{derive_parent_layer, ingest_layer, rebuild_hotmap, ScoreParams, TaxaSelection};
//! use geomap_store::{GridCell, GridStore, LayerKey, TimeContext};
//! use geomap_tiles::BoundingBox;
//!
//! let store = GridStore::open_in_memory()?;
//! let cell = |x, obs| GridCell {
//!     x,
//!     y: 20,
//!     observations_count: obs,
//!     taxa_count: 1,
//!     bbox: BoundingBox::new(55.70, 13.30, 55.69, 13.31),
//! };
//! ingest_layer(&store, &LayerKey::new(42, 15, TimeContext::ALL), &[cell(10, 5), cell(11, 3)])?;
//!
//! // Both cells share parent (5, 10) at zoom 14
//! assert_eq!(derive_parent_layer(&store, 42, 15, TimeContext::ALL)?, 1);
//!
//! let summary = rebuild_hotmap(&store, 14, TimeContext::ALL, &TaxaSelection::All, &ScoreParams::default())?;
//! assert_eq!(summary.cells, 1);
//! # Ok::<(), geomap_engine::EngineError>(())
//! ```

mod aggregate;
mod config;
mod error;
mod ingest;
mod ranking;
mod scoring;

pub use aggregate::{
    aggregate_to_parent, derive_chain, derive_parent_layer, derive_taxa, is_current_derivation,
    refresh_derived_chain, ChainReport,
};
pub use config::{GeomapConfig, RankModeKind, RankingConfig, DB_PATH_ENV};
pub use error::EngineError;
pub use ingest::{
    content_hash, ingest_layer, merge_cells, merge_year_layers, sync_taxon, GridSource,
    IngestOutcome, SyncReport,
};
pub use ranking::{rank_nearby, RankMode, RankQuery, RankedTile};
pub use scoring::{rebuild_hotmap, rebuild_hotmaps, score_cells, HotmapSummary, ScoreParams, TaxaSelection};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
