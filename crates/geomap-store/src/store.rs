//! The grid cache: per-taxon layers and the fetch-state ledger.
//!
//! All access goes through one SQLite connection behind a mutex. Writes run
//! in `BEGIN IMMEDIATE` transactions, so a layer's cells and its fetch-state
//! row are replaced together or not at all, and readers holding the lock
//! never observe a half-written layer.

use crate::error::{SqlContext, StoreError};
use crate::schema;
use crate::time::TimeContext;
use crate::types::{
    FetchState, GridCell, LayerKey, LayerSource, StoredCell, TaxonFilter, TaxonId, TaxonName,
};
use crate::Result;
use chrono::{DateTime, SubsecRound, Utc};
use geomap_tiles::BoundingBox;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Handle to the persistent grid cache.
///
/// Pass it explicitly to every engine component; there is no global store.
pub struct GridStore {
    conn: Mutex<Connection>,
}

impl GridStore {
    /// Open (or create) a store backed by a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).context(&path.display())?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("set journal_mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("set synchronous")?;
        schema::init(&conn)?;

        info!(path = %path.display(), journal_mode = %mode, "Opened grid store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Run `f` inside an immediate transaction; commit on `Ok`, roll back otherwise.
    pub(crate) fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin transaction")?;
        let out = f(&tx)?;
        tx.commit().context("commit transaction")?;
        Ok(out)
    }

    /// Run a read against the connection.
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Fetch-state of a layer, or `None` if it was never fetched or derived.
    pub fn get_fetch_state(&self, key: &LayerKey) -> Result<Option<FetchState>> {
        self.read(|conn| read_state(conn, key))
    }

    /// Atomically replace every cell of a layer with `cells`.
    ///
    /// Replaying the same input leaves the layer unchanged apart from the
    /// fetch timestamps. Two cells with the same `(x, y)` fail with a
    /// constraint error and nothing is written.
    pub fn replace_grid_cells(&self, key: &LayerKey, cells: &[GridCell]) -> Result<()> {
        let now = now();
        self.transact(|tx| write_cells(tx, key, cells, now))?;
        debug!(%key, cells = cells.len(), "Replaced grid cells");
        Ok(())
    }

    /// Insert or overwrite the fetch-state row of a layer.
    pub fn upsert_fetch_state(
        &self,
        key: &LayerKey,
        source: &LayerSource,
        cell_count: usize,
    ) -> Result<()> {
        let now = now();
        self.transact(|tx| write_state(tx, key, source, cell_count, now))
    }

    /// Replace a layer's cells and record its fetch-state in one transaction.
    pub fn replace_layer(&self, key: &LayerKey, cells: &[GridCell], source: &LayerSource) -> Result<()> {
        let now = now();
        self.transact(|tx| {
            write_cells(tx, key, cells, now)?;
            write_state(tx, key, source, cells.len(), now)
        })?;
        debug!(%key, cells = cells.len(), derived = source.is_derived(), "Replaced layer");
        Ok(())
    }

    /// Replace `target` with cells computed from the layer at `source`.
    ///
    /// The source fetch-state and cells are read, `derive` runs and its
    /// cells and marker are written, all inside one immediate transaction,
    /// so the marker always describes the cells that were aggregated.
    /// Returns `None` without writing when `source` has no fetch-state,
    /// otherwise the number of cells written.
    pub fn derive_layer<F, E>(
        &self,
        source: &LayerKey,
        target: &LayerKey,
        derive: F,
    ) -> std::result::Result<Option<usize>, E>
    where
        F: FnOnce(&FetchState, Vec<GridCell>) -> std::result::Result<(Vec<GridCell>, LayerSource), E>,
        E: From<StoreError>,
    {
        let now = now();
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin transaction")?;

        let Some(state) = read_state(&tx, source)? else {
            return Ok(None);
        };
        let filter = TaxonFilter::Only(vec![source.taxon_id]);
        let children = query_cells(&tx, &filter, source.zoom, source.time)?
            .into_iter()
            .map(|c| c.cell)
            .collect();
        let (cells, marker) = derive(&state, children)?;
        write_cells(&tx, target, &cells, now)?;
        write_state(&tx, target, &marker, cells.len(), now)?;
        tx.commit().context("commit transaction")?;

        debug!(key = %target, from = %source, cells = cells.len(), "Derived layer in place");
        Ok(Some(cells.len()))
    }

    /// Cells at `(zoom, year, slot)` for the selected taxa, ordered by
    /// `(taxon_id, x, y)`.
    pub fn list_cells(
        &self,
        filter: &TaxonFilter,
        zoom: u8,
        time: TimeContext,
    ) -> Result<Vec<StoredCell>> {
        self.read(|conn| query_cells(conn, filter, zoom, time))
    }

    /// Cells of a single layer, ordered by `(x, y)`.
    pub fn layer_cells(&self, key: &LayerKey) -> Result<Vec<GridCell>> {
        let cells = self.list_cells(&TaxonFilter::Only(vec![key.taxon_id]), key.zoom, key.time)?;
        Ok(cells.into_iter().map(|c| c.cell).collect())
    }

    /// Distinct taxa with at least one cell at `(zoom, year, slot)`, ascending.
    pub fn distinct_taxa(&self, zoom: u8, time: TimeContext) -> Result<Vec<TaxonId>> {
        let context = format!("distinct taxa zoom={} year={} slot={}", zoom, time.year, time.slot.get());
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT DISTINCT taxon_id FROM taxon_grid
                     WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3 ORDER BY taxon_id",
                )
                .context(&context)?;
            let rows = stmt
                .query_map(params![zoom, time.year, time.slot.get()], |row| row.get(0))
                .context(&context)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
        })
    }

    /// Keys of every layer with a fetch-state row at `zoom`, in key order.
    pub fn layer_keys(&self, zoom: u8) -> Result<Vec<LayerKey>> {
        let context = format!("layer keys zoom={}", zoom);
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT taxon_id, year, slot_id FROM taxon_layer_state
                     WHERE zoom = ?1 ORDER BY taxon_id, year, slot_id",
                )
                .context(&context)?;
            let rows = stmt
                .query_map(params![zoom], |row| {
                    let slot: i64 = row.get(2)?;
                    Ok(LayerKey::new(
                        row.get(0)?,
                        zoom,
                        TimeContext::new(row.get(1)?, slot.into()),
                    ))
                })
                .context(&context)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
        })
    }

    /// Insert or update taxon names.
    ///
    /// A `None` name leaves an existing value in place.
    pub fn upsert_taxa(&self, taxa: &[TaxonName]) -> Result<usize> {
        self.transact(|tx| {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO taxon_dim (taxon_id, scientific_name, vernacular_name)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (taxon_id) DO UPDATE SET
                         scientific_name = COALESCE(excluded.scientific_name, taxon_dim.scientific_name),
                         vernacular_name = COALESCE(excluded.vernacular_name, taxon_dim.vernacular_name)",
                )
                .context("upsert taxa")?;
            for taxon in taxa {
                stmt.execute(params![
                    taxon.taxon_id,
                    taxon.scientific_name,
                    taxon.vernacular_name
                ])
                .context(&format!("upsert taxon={}", taxon.taxon_id))?;
            }
            Ok(taxa.len())
        })
    }
}

/// Current time truncated to whole seconds.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn read_state(conn: &Connection, key: &LayerKey) -> Result<Option<FetchState>> {
    conn.query_row(
        "SELECT last_fetch, hash_or_marker, cell_count FROM taxon_layer_state
         WHERE taxon_id = ?1 AND zoom = ?2 AND year = ?3 AND slot_id = ?4",
        params![key.taxon_id, key.zoom, key.time.year, key.time.slot.get()],
        |row| {
            let raw: String = row.get(1)?;
            Ok(FetchState {
                last_fetch: row.get(0)?,
                source: LayerSource::decode(&raw),
                cell_count: row.get(2)?,
            })
        },
    )
    .optional()
    .context(key)
}

fn query_cells(conn: &Connection, filter: &TaxonFilter, zoom: u8, time: TimeContext) -> Result<Vec<StoredCell>> {
    let mut sql = String::from(
        "SELECT taxon_id, x, y, observations_count, taxa_count,
                top_lat, left_lon, bottom_lat, right_lon, fetched_at
         FROM taxon_grid WHERE zoom = ? AND year = ? AND slot_id = ?",
    );
    let mut values = vec![
        Value::Integer(i64::from(zoom)),
        Value::Integer(i64::from(time.year)),
        Value::Integer(i64::from(time.slot.get())),
    ];
    if let TaxonFilter::Only(ids) = filter {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sql.push_str(" AND taxon_id IN (");
        sql.push_str(&placeholders(ids.len()));
        sql.push(')');
        values.extend(ids.iter().map(|&id| Value::Integer(id)));
    }
    sql.push_str(" ORDER BY taxon_id, x, y");

    let context = format!("list cells zoom={} year={} slot={}", zoom, time.year, time.slot.get());
    let mut stmt = conn.prepare_cached(&sql).context(&context)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(StoredCell {
                taxon_id: row.get(0)?,
                zoom,
                time,
                cell: grid_cell_from_row(row, 1)?,
                fetched_at: row.get(9)?,
            })
        })
        .context(&context)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
}

/// Read a [`GridCell`] from eight consecutive columns starting at `offset`:
/// `x, y, observations_count, taxa_count, top, left, bottom, right`.
fn grid_cell_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<GridCell> {
    Ok(GridCell {
        x: row.get(offset)?,
        y: row.get(offset + 1)?,
        observations_count: row.get(offset + 2)?,
        taxa_count: row.get(offset + 3)?,
        bbox: bbox_from_row(row, offset + 4)?,
    })
}

/// Read a [`BoundingBox`] from four consecutive columns starting at `offset`.
pub(crate) fn bbox_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<BoundingBox> {
    Ok(BoundingBox::new(
        row.get(offset)?,
        row.get(offset + 1)?,
        row.get(offset + 2)?,
        row.get(offset + 3)?,
    ))
}

fn write_cells(tx: &Transaction<'_>, key: &LayerKey, cells: &[GridCell], now: DateTime<Utc>) -> Result<()> {
    let slot = key.time.slot.get();
    tx.execute(
        "DELETE FROM taxon_grid WHERE taxon_id = ?1 AND zoom = ?2 AND year = ?3 AND slot_id = ?4",
        params![key.taxon_id, key.zoom, key.time.year, slot],
    )
    .context(key)?;

    let mut stmt = tx
        .prepare_cached(
            "INSERT INTO taxon_grid (taxon_id, zoom, year, slot_id, x, y,
                 observations_count, taxa_count, top_lat, left_lon, bottom_lat, right_lon, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .context(key)?;
    for cell in cells {
        let cell_context = || format!("{} x={} y={}", key, cell.x, cell.y);
        let observations = count_to_sql(cell.observations_count, "observations_count", cell_context)?;
        let taxa = count_to_sql(cell.taxa_count, "taxa_count", cell_context)?;
        stmt.execute(params![
            key.taxon_id,
            key.zoom,
            key.time.year,
            slot,
            cell.x,
            cell.y,
            observations,
            taxa,
            cell.bbox.top_lat,
            cell.bbox.left_lon,
            cell.bbox.bottom_lat,
            cell.bbox.right_lon,
            now,
        ])
        .context(&cell_context())?;
    }
    Ok(())
}

/// SQLite integers are signed; counts above `i64::MAX` are rejected.
fn count_to_sql<C: Fn() -> String>(value: u64, column: &str, context: C) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        StoreError::InvalidInput(format!("{} {} = {} exceeds {}", context(), column, value, i64::MAX))
    })
}

fn write_state(
    tx: &Transaction<'_>,
    key: &LayerKey,
    source: &LayerSource,
    cell_count: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    let cell_count = count_to_sql(cell_count as u64, "cell_count", || key.to_string())?;
    tx.execute(
        "INSERT INTO taxon_layer_state (taxon_id, zoom, year, slot_id, last_fetch, hash_or_marker, cell_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (taxon_id, zoom, year, slot_id) DO UPDATE SET
             last_fetch = excluded.last_fetch,
             hash_or_marker = excluded.hash_or_marker,
             cell_count = excluded.cell_count",
        params![
            key.taxon_id,
            key.zoom,
            key.time.year,
            key.time.slot.get(),
            now,
            source.encode(),
            cell_count,
        ],
    )
    .context(key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SlotId;

    fn cell(x: u32, y: u32, obs: u64) -> GridCell {
        GridCell {
            x,
            y,
            observations_count: obs,
            taxa_count: 1,
            bbox: BoundingBox::new(55.7, 13.3, 55.6, 13.4),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_replace_then_list() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(42, 15, TimeContext::ALL);
        store.replace_grid_cells(&key, &[cell(11, 20, 3), cell(10, 20, 5)]).unwrap();

        let cells = store.layer_cells(&key).unwrap();
        assert_eq!(cells, vec![cell(10, 20, 5), cell(11, 20, 3)]);
    }

    #[test]
    fn test_duplicate_key_rolls_back() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(1, 10, TimeContext::new(2024, SlotId::normalized(3)));
        store.replace_grid_cells(&key, &[cell(1, 1, 1)]).unwrap();

        let err = store
            .replace_grid_cells(&key, &[cell(2, 2, 1), cell(2, 2, 4)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite { .. }));
        assert!(err.to_string().contains("taxon=1 zoom=10 year=2024 slot=3"));

        // Previous contents survive the failed replace
        assert_eq!(store.layer_cells(&key).unwrap(), vec![cell(1, 1, 1)]);
    }

    #[test]
    fn test_fetch_state_upsert_overwrites() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(7, 12, TimeContext::ALL);
        assert!(store.get_fetch_state(&key).unwrap().is_none());

        let first = LayerSource::Fetched {
            content_hash: "aaa".to_string(),
        };
        store.upsert_fetch_state(&key, &first, 4).unwrap();
        let second = LayerSource::Derived {
            from_zoom: 13,
            root_hash: "bbb".to_string(),
        };
        store.upsert_fetch_state(&key, &second, 2).unwrap();

        let state = store.get_fetch_state(&key).unwrap().unwrap();
        assert_eq!(state.source, second);
        assert_eq!(state.cell_count, 2);
    }

    #[test]
    fn test_empty_taxa_filter_matches_nothing() {
        let store = GridStore::open_in_memory().unwrap();
        let key = LayerKey::new(42, 15, TimeContext::ALL);
        store.replace_grid_cells(&key, &[cell(10, 20, 5)]).unwrap();

        let none = store
            .list_cells(&TaxonFilter::Only(Vec::new()), 15, TimeContext::ALL)
            .unwrap();
        assert!(none.is_empty());
        let all = store.list_cells(&TaxonFilter::All, 15, TimeContext::ALL).unwrap();
        assert_eq!(all.len(), 1);
    }
}
