//! JSON payloads as returned by the observation service's geogrid
//! aggregation endpoint, plus a directory-backed [`GridSource`].
//!
//! ```json
//! {
//!   "gridCells": [
//!     {
//!       "x": 8801, "y": 5138, "zoom": 14,
//!       "observationsCount": 12, "taxaCount": 3,
//!       "boundingBox": {
//!         "topLeft": { "latitude": 55.71, "longitude": 13.18 },
//!         "bottomRight": { "latitude": 55.70, "longitude": 13.20 }
//!       }
//!     }
//!   ]
//! }
//! ```

use crate::{Result, RunnerError};
use geomap_engine::GridSource;
use geomap_store::{GridCell, LayerKey, TaxonId, TaxonName};
use geomap_tiles::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Corner-based bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadBox {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

impl From<PayloadBox> for BoundingBox {
    fn from(b: PayloadBox) -> Self {
        BoundingBox::new(
            b.top_left.latitude,
            b.top_left.longitude,
            b.bottom_right.latitude,
            b.bottom_right.longitude,
        )
    }
}

/// One cell of a geogrid payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadCell {
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub zoom: Option<u8>,
    #[serde(default)]
    pub observations_count: Option<u64>,
    #[serde(default)]
    pub taxa_count: Option<u64>,
    pub bounding_box: PayloadBox,
}

/// A geogrid aggregation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPayload {
    #[serde(default)]
    pub grid_cells: Vec<PayloadCell>,
}

impl GridPayload {
    /// Parse a payload document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a payload file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Merge several payloads for the same key, e.g. the pages of a split
    /// request. Cells are matched by `(x, y)`; counts are summed and the
    /// first box seen is kept.
    pub fn merge(payloads: impl IntoIterator<Item = GridPayload>) -> GridPayload {
        let mut merged: BTreeMap<(u32, u32), PayloadCell> = BTreeMap::new();
        for cell in payloads.into_iter().flat_map(|p| p.grid_cells) {
            merged
                .entry((cell.x, cell.y))
                .and_modify(|m| {
                    m.observations_count =
                        Some(m.observations_count.unwrap_or(0) + cell.observations_count.unwrap_or(0));
                    m.taxa_count = Some(m.taxa_count.unwrap_or(0) + cell.taxa_count.unwrap_or(0));
                })
                .or_insert(cell);
        }
        GridPayload {
            grid_cells: merged.into_values().collect(),
        }
    }

    /// Convert to grid cells at `zoom`.
    ///
    /// Cells tagged with a different zoom are rejected. Missing counts read
    /// as zero.
    pub fn into_cells(self, zoom: u8) -> Result<Vec<GridCell>> {
        self.grid_cells
            .into_iter()
            .map(|c| {
                if let Some(z) = c.zoom.filter(|&z| z != zoom) {
                    return Err(RunnerError::InvalidArgs(format!(
                        "cell ({}, {}) is tagged zoom {} but zoom {} was requested",
                        c.x, c.y, z, zoom
                    )));
                }
                Ok(GridCell {
                    x: c.x,
                    y: c.y,
                    observations_count: c.observations_count.unwrap_or(0),
                    taxa_count: c.taxa_count.unwrap_or(0),
                    bbox: c.bounding_box.into(),
                })
            })
            .collect()
    }
}

/// A taxon record from a taxa listing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadTaxon {
    #[serde(alias = "id")]
    pub taxon_id: TaxonId,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub vernacular_name: Option<String>,
}

impl From<PayloadTaxon> for TaxonName {
    fn from(t: PayloadTaxon) -> Self {
        TaxonName {
            taxon_id: t.taxon_id,
            scientific_name: t.scientific_name,
            vernacular_name: t.vernacular_name,
        }
    }
}

/// Read a JSON array of taxa.
pub fn read_taxa_file(path: impl AsRef<Path>) -> Result<Vec<TaxonName>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let taxa: Vec<PayloadTaxon> = serde_json::from_str(&text)?;
    Ok(taxa.into_iter().map(TaxonName::from).collect())
}

/// Serves base layers from payload files laid out as
/// `<root>/<taxon>/z<zoom>_y<year>_s<slot>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Payload file for a layer key.
    pub fn path_for(&self, key: &LayerKey) -> PathBuf {
        self.root.join(key.taxon_id.to_string()).join(format!(
            "z{}_y{}_s{}.json",
            key.zoom,
            key.time.year,
            key.time.slot.get()
        ))
    }

    /// Taxa with a payload directory, ascending.
    pub fn taxa(&self) -> Result<Vec<TaxonId>> {
        let mut taxa = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<TaxonId>().ok()) {
                taxa.push(id);
            }
        }
        taxa.sort_unstable();
        Ok(taxa)
    }
}

impl GridSource for JsonDirSource {
    fn fetch(&self, key: &LayerKey) -> std::result::Result<Vec<GridCell>, Box<dyn std::error::Error + Send + Sync>> {
        let path = self.path_for(key);
        let payload = GridPayload::from_file(&path)?;
        Ok(payload.into_cells(key.zoom)?)
    }
}
