//! Records stored in and read from the grid cache.

use crate::time::{SlotId, TimeContext};
use chrono::{DateTime, Utc};
use geomap_tiles::BoundingBox;
use serde::{Deserialize, Serialize};

/// Identifier of a taxon (species or higher rank) in the upstream API.
pub type TaxonId = i64;

/// Prefix of the synthetic fetch-state marker written for derived layers.
const DERIVED_PREFIX: &str = "derived:z";

/// Composite key of one per-taxon layer: `(taxon_id, zoom, year, slot_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerKey {
    /// Taxon the layer belongs to.
    pub taxon_id: TaxonId,
    /// Zoom level.
    pub zoom: u8,
    /// Year and slot.
    pub time: TimeContext,
}

impl LayerKey {
    /// Create a layer key.
    pub fn new(taxon_id: TaxonId, zoom: u8, time: TimeContext) -> Self {
        Self {
            taxon_id,
            zoom,
            time,
        }
    }

    /// Same taxon and time, different zoom.
    pub fn at_zoom(&self, zoom: u8) -> Self {
        Self { zoom, ..*self }
    }
}

impl std::fmt::Display for LayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "taxon={} zoom={} year={} slot={}",
            self.taxon_id,
            self.zoom,
            self.time.year,
            self.time.slot.get()
        )
    }
}

/// One grid cell of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Number of observations in the cell.
    pub observations_count: u64,
    /// Secondary taxa count reported upstream. Stored, never scored.
    pub taxa_count: u64,
    /// Geographic bounds.
    pub bbox: BoundingBox,
}

/// A grid cell as read back from the store, with its key and fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCell {
    /// Taxon the cell belongs to.
    pub taxon_id: TaxonId,
    /// Zoom level.
    pub zoom: u8,
    /// Year and slot.
    pub time: TimeContext,
    /// Cell data.
    pub cell: GridCell,
    /// When the cell was written.
    pub fetched_at: DateTime<Utc>,
}

/// Where a layer's cells came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerSource {
    /// Fetched from the upstream API; carries the payload content hash.
    Fetched {
        /// Hex SHA-256 of the canonical payload.
        content_hash: String,
    },
    /// Derived locally from the layer one zoom level finer.
    Derived {
        /// Zoom level the cells were aggregated from.
        from_zoom: u8,
        /// Content hash of the fetched base layer at the root of the chain.
        root_hash: String,
    },
}

impl LayerSource {
    /// Encode as the `hash_or_marker` column value.
    pub fn encode(&self) -> String {
        match self {
            LayerSource::Fetched { content_hash } => content_hash.clone(),
            LayerSource::Derived {
                from_zoom,
                root_hash,
            } => format!("{}{}:{}", DERIVED_PREFIX, from_zoom, root_hash),
        }
    }

    /// Decode a `hash_or_marker` column value.
    ///
    /// Anything that does not parse as a derived marker is a content hash.
    pub fn decode(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(DERIVED_PREFIX) {
            if let Some((zoom, root)) = rest.split_once(':') {
                if let Ok(from_zoom) = zoom.parse::<u8>() {
                    return LayerSource::Derived {
                        from_zoom,
                        root_hash: root.to_string(),
                    };
                }
            }
        }
        LayerSource::Fetched {
            content_hash: raw.to_string(),
        }
    }

    /// Content hash of the fetched layer this one ultimately comes from.
    pub fn root_hash(&self) -> &str {
        match self {
            LayerSource::Fetched { content_hash } => content_hash,
            LayerSource::Derived { root_hash, .. } => root_hash,
        }
    }

    /// Whether the layer was derived rather than fetched.
    pub fn is_derived(&self) -> bool {
        matches!(self, LayerSource::Derived { .. })
    }
}

/// Fetch-state ledger row for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchState {
    /// When the layer was last fetched or derived.
    pub last_fetch: DateTime<Utc>,
    /// Content hash or derived marker.
    pub source: LayerSource,
    /// Number of cells written.
    pub cell_count: usize,
}

/// One scored hotmap cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotmapCell {
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Number of distinct active taxa present.
    pub coverage: u32,
    /// `coverage^alpha / (obs_total + 1)^beta`.
    pub score: f64,
    /// Geographic bounds.
    pub bbox: BoundingBox,
}

/// A hotmap cell as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHotmapCell {
    /// Zoom level.
    pub zoom: u8,
    /// Year and slot.
    pub time: TimeContext,
    /// Cell data.
    pub cell: HotmapCell,
    /// When the hotmap layer was rebuilt.
    pub updated_at: DateTime<Utc>,
}

/// Taxon restriction for cell reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxonFilter {
    /// Every taxon with cells at the key.
    All,
    /// Only these taxa. An empty list matches nothing.
    Only(Vec<TaxonId>),
}

/// Taxon dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonName {
    /// Taxon id.
    pub taxon_id: TaxonId,
    /// Scientific name.
    pub scientific_name: Option<String>,
    /// Common name.
    pub vernacular_name: Option<String>,
}

/// Hotmap cell joined with the observation total and the contributing taxa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotmapRollup {
    /// The hotmap cell.
    pub cell: HotmapCell,
    /// Bounding-box midpoint as `(lat, lon)`.
    pub centroid: (f64, f64),
    /// Observations of the recorded taxa set in this cell.
    pub obs_total: u64,
    /// Contributing taxa, ascending.
    pub taxa: Vec<TaxonId>,
}

/// One taxon present in a cell, with names and observation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTaxon {
    /// Taxon id.
    pub taxon_id: TaxonId,
    /// Scientific name, if known.
    pub scientific_name: Option<String>,
    /// Common name, if known.
    pub vernacular_name: Option<String>,
    /// Observations in the cell (summed across the queried slots and years).
    pub observations_count: u64,
}

/// Hotmap cell tagged with its slot, for map rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotmapFeature {
    /// Slot the cell was built for.
    pub slot: SlotId,
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Distinct active taxa present.
    pub coverage: u32,
    /// Hotmap score.
    pub score: f64,
    /// Geographic bounds.
    pub bbox: BoundingBox,
}

/// Optional key restriction for maintenance deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearFilter {
    /// Only this zoom.
    pub zoom: Option<u8>,
    /// Only this year.
    pub year: Option<i32>,
    /// Only this slot.
    pub slot: Option<SlotId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_source_marker_roundtrip() {
        let derived = LayerSource::Derived {
            from_zoom: 15,
            root_hash: "abc123".to_string(),
        };
        assert_eq!(derived.encode(), "derived:z15:abc123");
        assert_eq!(LayerSource::decode("derived:z15:abc123"), derived);
        assert_eq!(derived.root_hash(), "abc123");
    }

    #[test]
    fn test_plain_hash_decodes_as_fetched() {
        let source = LayerSource::decode("deadbeef");
        assert!(!source.is_derived());
        assert_eq!(source.root_hash(), "deadbeef");

        // Malformed markers are kept verbatim
        let odd = LayerSource::decode("derived:zX:abc");
        assert_eq!(
            odd,
            LayerSource::Fetched {
                content_hash: "derived:zX:abc".to_string()
            }
        );
    }

    #[test]
    fn test_layer_key_display() {
        let key = LayerKey::new(42, 15, TimeContext::new(2024, SlotId::normalized(7)));
        assert_eq!(key.to_string(), "taxon=42 zoom=15 year=2024 slot=7");
        assert_eq!(key.at_zoom(14).zoom, 14);
    }
}
