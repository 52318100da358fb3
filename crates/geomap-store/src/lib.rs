//! # geomap-store
//!
//! Persistent grid cache for the geomap hotmap, backed by SQLite.
//!
//! The store holds every piece of shared state:
//! - `taxon_grid`: per-taxon grid cells keyed by `(taxon_id, zoom, year, slot_id, x, y)`
//! - `taxon_layer_state`: the fetch-state ledger, one row per layer, holding
//!   either the content hash of the fetched payload or a derived marker
//! - `grid_hotmap` / `hotmap_taxa_set`: scored hotmap layers and the taxa
//!   each build used
//! - `taxon_dim`: taxon names for listings
//!
//! Every write is a single transaction. Read-side rollups are SQL views.
//!
//! ## Example
//!
//! ```
//! use geomap_store::{GridCell, GridStore, LayerKey, LayerSource, TimeContext};
//! use geomap_tiles::BoundingBox;
//!
//! let store = GridStore::open_in_memory()?;
//! let key = LayerKey::new(42, 15, TimeContext::ALL);
//! let cells = vec![GridCell {
//!     x: 10,
//!     y: 20,
//!     observations_count: 5,
//!     taxa_count: 1,
//!     bbox: BoundingBox::new(55.70, 13.30, 55.69, 13.31),
//! }];
//! let source = LayerSource::Fetched { content_hash: "abc".into() };
//! store.replace_layer(&key, &cells, &source)?;
//!
//! let state = store.get_fetch_state(&key)?.expect("state recorded");
//! assert_eq!(state.cell_count, 1);
//! # Ok::<(), geomap_store::StoreError>(())
//! ```

mod error;
mod hotmap;
mod maintenance;
mod schema;
mod store;
mod time;
mod types;
mod views;

pub use error::StoreError;
pub use schema::SCHEMA_VERSION;
pub use store::GridStore;
pub use time::{SlotId, TimeContext, YearSpan, SLOTS_PER_YEAR, YEAR_ALL};
pub use types::{
    CellTaxon, ClearFilter, FetchState, GridCell, HotmapCell, HotmapFeature, HotmapRollup,
    LayerKey, LayerSource, StoredCell, StoredHotmapCell, TaxonFilter, TaxonId, TaxonName,
};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
