//! Database schema.
//!
//! Five tables plus three read-only views. The views are pure projections
//! and hold no state of their own.

use crate::error::{SqlContext, StoreError};
use rusqlite::Connection;

/// Bumped whenever the DDL below changes incompatibly.
pub const SCHEMA_VERSION: i64 = 1;

const TABLES: &str = "
CREATE TABLE IF NOT EXISTS taxon_dim (
    taxon_id        INTEGER PRIMARY KEY,
    scientific_name TEXT,
    vernacular_name TEXT
);

CREATE TABLE IF NOT EXISTS taxon_grid (
    taxon_id           INTEGER NOT NULL,
    zoom               INTEGER NOT NULL,
    year               INTEGER NOT NULL,
    slot_id            INTEGER NOT NULL,
    x                  INTEGER NOT NULL,
    y                  INTEGER NOT NULL,
    observations_count INTEGER NOT NULL,
    taxa_count         INTEGER NOT NULL,
    top_lat            REAL NOT NULL,
    left_lon           REAL NOT NULL,
    bottom_lat         REAL NOT NULL,
    right_lon          REAL NOT NULL,
    fetched_at         TEXT NOT NULL,
    PRIMARY KEY (taxon_id, zoom, year, slot_id, x, y)
);

CREATE INDEX IF NOT EXISTS idx_taxon_grid_cell
    ON taxon_grid (zoom, year, slot_id, x, y);

CREATE TABLE IF NOT EXISTS taxon_layer_state (
    taxon_id       INTEGER NOT NULL,
    zoom           INTEGER NOT NULL,
    year           INTEGER NOT NULL,
    slot_id        INTEGER NOT NULL,
    last_fetch     TEXT NOT NULL,
    hash_or_marker TEXT NOT NULL,
    cell_count     INTEGER NOT NULL,
    PRIMARY KEY (taxon_id, zoom, year, slot_id)
);

CREATE TABLE IF NOT EXISTS grid_hotmap (
    zoom       INTEGER NOT NULL,
    year       INTEGER NOT NULL,
    slot_id    INTEGER NOT NULL,
    x          INTEGER NOT NULL,
    y          INTEGER NOT NULL,
    coverage   INTEGER NOT NULL,
    score      REAL NOT NULL,
    top_lat    REAL NOT NULL,
    left_lon   REAL NOT NULL,
    bottom_lat REAL NOT NULL,
    right_lon  REAL NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (zoom, year, slot_id, x, y)
);

CREATE TABLE IF NOT EXISTS hotmap_taxa_set (
    zoom     INTEGER NOT NULL,
    year     INTEGER NOT NULL,
    slot_id  INTEGER NOT NULL,
    taxon_id INTEGER NOT NULL,
    PRIMARY KEY (zoom, year, slot_id, taxon_id)
);
";

const VIEWS: &str = "
CREATE VIEW IF NOT EXISTS grid_hotmap_taxa_v AS
SELECT h.zoom, h.year, h.slot_id, h.x, h.y,
       g.taxon_id, g.observations_count
FROM grid_hotmap h
JOIN hotmap_taxa_set s
  ON s.zoom = h.zoom AND s.year = h.year AND s.slot_id = h.slot_id
JOIN taxon_grid g
  ON g.taxon_id = s.taxon_id AND g.zoom = h.zoom AND g.year = h.year
 AND g.slot_id = h.slot_id AND g.x = h.x AND g.y = h.y;

CREATE VIEW IF NOT EXISTS grid_hotmap_taxa_names_v AS
SELECT v.zoom, v.year, v.slot_id, v.x, v.y, v.taxon_id, v.observations_count,
       d.scientific_name, d.vernacular_name
FROM grid_hotmap_taxa_v v
LEFT JOIN taxon_dim d ON d.taxon_id = v.taxon_id;

CREATE VIEW IF NOT EXISTS grid_hotmap_v AS
SELECT h.zoom, h.year, h.slot_id, h.x, h.y, h.coverage, h.score,
       h.top_lat, h.left_lon, h.bottom_lat, h.right_lon,
       (h.top_lat + h.bottom_lat) / 2.0 AS centroid_lat,
       (h.left_lon + h.right_lon) / 2.0 AS centroid_lon,
       COALESCE((SELECT SUM(v.observations_count) FROM grid_hotmap_taxa_v v
                 WHERE v.zoom = h.zoom AND v.year = h.year AND v.slot_id = h.slot_id
                   AND v.x = h.x AND v.y = h.y), 0) AS obs_total,
       (SELECT GROUP_CONCAT(taxon_id, ',') FROM
            (SELECT v.taxon_id FROM grid_hotmap_taxa_v v
             WHERE v.zoom = h.zoom AND v.year = h.year AND v.slot_id = h.slot_id
               AND v.x = h.x AND v.y = h.y
             ORDER BY v.taxon_id)) AS taxa_list
FROM grid_hotmap h;
";

/// Create tables and views if missing and stamp the schema version.
pub(crate) fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(TABLES).context("create tables")?;
    conn.execute_batch(VIEWS).context("create views")?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("set user_version")?;
    Ok(())
}
