//! Hotmap layers and their recorded taxa sets.

use crate::error::SqlContext;
use crate::store::{bbox_from_row, now, GridStore};
use crate::time::TimeContext;
use crate::types::{HotmapCell, StoredHotmapCell, TaxonId};
use crate::Result;
use rusqlite::{params, Row};
use tracing::debug;

fn hotmap_context(zoom: u8, time: TimeContext) -> String {
    format!("hotmap zoom={} year={} slot={}", zoom, time.year, time.slot.get())
}

/// Read a [`HotmapCell`] from `x, y, coverage, score, top, left, bottom, right`.
pub(crate) fn hotmap_cell_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<HotmapCell> {
    Ok(HotmapCell {
        x: row.get(offset)?,
        y: row.get(offset + 1)?,
        coverage: row.get(offset + 2)?,
        score: row.get(offset + 3)?,
        bbox: bbox_from_row(row, offset + 4)?,
    })
}

impl GridStore {
    /// Replace the hotmap layer at `(zoom, year, slot)` and its taxa set.
    ///
    /// Both are deleted and rewritten in one transaction; the hotmap is never
    /// patched incrementally.
    pub fn replace_hotmap(
        &self,
        zoom: u8,
        time: TimeContext,
        cells: &[HotmapCell],
        taxa: &[TaxonId],
    ) -> Result<()> {
        let context = hotmap_context(zoom, time);
        let slot = time.slot.get();
        let now = now();
        self.transact(|tx| {
            tx.execute(
                "DELETE FROM grid_hotmap WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3",
                params![zoom, time.year, slot],
            )
            .context(&context)?;
            tx.execute(
                "DELETE FROM hotmap_taxa_set WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3",
                params![zoom, time.year, slot],
            )
            .context(&context)?;

            let mut insert_cell = tx
                .prepare_cached(
                    "INSERT INTO grid_hotmap (zoom, year, slot_id, x, y, coverage, score,
                         top_lat, left_lon, bottom_lat, right_lon, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .context(&context)?;
            for cell in cells {
                insert_cell
                    .execute(params![
                        zoom,
                        time.year,
                        slot,
                        cell.x,
                        cell.y,
                        cell.coverage,
                        cell.score,
                        cell.bbox.top_lat,
                        cell.bbox.left_lon,
                        cell.bbox.bottom_lat,
                        cell.bbox.right_lon,
                        now,
                    ])
                    .context(&format!("{} x={} y={}", context, cell.x, cell.y))?;
            }

            let mut insert_taxon = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO hotmap_taxa_set (zoom, year, slot_id, taxon_id)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .context(&context)?;
            for taxon_id in taxa {
                insert_taxon
                    .execute(params![zoom, time.year, slot, taxon_id])
                    .context(&context)?;
            }
            Ok(())
        })?;
        debug!(zoom, year = time.year, slot = %time.slot, cells = cells.len(), taxa = taxa.len(), "Replaced hotmap");
        Ok(())
    }

    /// Hotmap cells at `(zoom, year, slot)`, ordered by `(x, y)`.
    pub fn list_hotmap(&self, zoom: u8, time: TimeContext) -> Result<Vec<StoredHotmapCell>> {
        self.query_hotmap(
            "SELECT x, y, coverage, score, top_lat, left_lon, bottom_lat, right_lon, updated_at
             FROM grid_hotmap WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3
             ORDER BY x, y",
            zoom,
            time,
            None,
        )
    }

    /// The `limit` best cells: score descending, then coverage descending,
    /// then `(x, y)`.
    pub fn top_hotspots(&self, zoom: u8, time: TimeContext, limit: usize) -> Result<Vec<StoredHotmapCell>> {
        self.query_hotmap(
            "SELECT x, y, coverage, score, top_lat, left_lon, bottom_lat, right_lon, updated_at
             FROM grid_hotmap WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3
             ORDER BY score DESC, coverage DESC, x, y LIMIT ?4",
            zoom,
            time,
            Some(limit),
        )
    }

    fn query_hotmap(
        &self,
        sql: &str,
        zoom: u8,
        time: TimeContext,
        limit: Option<usize>,
    ) -> Result<Vec<StoredHotmapCell>> {
        let context = hotmap_context(zoom, time);
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(sql).context(&context)?;
            let map = |row: &Row<'_>| -> rusqlite::Result<StoredHotmapCell> {
                Ok(StoredHotmapCell {
                    zoom,
                    time,
                    cell: hotmap_cell_from_row(row, 0)?,
                    updated_at: row.get(8)?,
                })
            };
            let rows = match limit {
                Some(limit) => stmt
                    .query_map(params![zoom, time.year, time.slot.get(), i64::try_from(limit).unwrap_or(i64::MAX)], map)
                    .context(&context)?
                    .collect::<rusqlite::Result<Vec<_>>>(),
                None => stmt
                    .query_map(params![zoom, time.year, time.slot.get()], map)
                    .context(&context)?
                    .collect::<rusqlite::Result<Vec<_>>>(),
            };
            rows.context(&context)
        })
    }

    /// Taxa recorded for the hotmap build at `(zoom, year, slot)`, ascending.
    pub fn hotmap_taxa_set(&self, zoom: u8, time: TimeContext) -> Result<Vec<TaxonId>> {
        let context = hotmap_context(zoom, time);
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT taxon_id FROM hotmap_taxa_set
                     WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3 ORDER BY taxon_id",
                )
                .context(&context)?;
            let rows = stmt
                .query_map(params![zoom, time.year, time.slot.get()], |row| row.get(0))
                .context(&context)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
        })
    }
}
