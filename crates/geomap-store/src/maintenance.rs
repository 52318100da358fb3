//! Bulk deletes for rebuilding from scratch.

use crate::error::SqlContext;
use crate::store::GridStore;
use crate::types::ClearFilter;
use crate::Result;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Transaction};
use tracing::info;

/// `WHERE` clause and bound values for a [`ClearFilter`], starting from `base`.
fn filter_clause(base: &str, filter: &ClearFilter) -> (String, Vec<Value>) {
    let mut sql = String::from(base);
    let mut values = Vec::new();
    if let Some(zoom) = filter.zoom {
        sql.push_str(" AND zoom = ?");
        values.push(Value::Integer(i64::from(zoom)));
    }
    if let Some(year) = filter.year {
        sql.push_str(" AND year = ?");
        values.push(Value::Integer(i64::from(year)));
    }
    if let Some(slot) = filter.slot {
        sql.push_str(" AND slot_id = ?");
        values.push(Value::Integer(i64::from(slot.get())));
    }
    (sql, values)
}

fn delete_where(tx: &Transaction<'_>, table: &str, base: &str, filter: &ClearFilter) -> Result<usize> {
    let (clause, values) = filter_clause(base, filter);
    let sql = format!("DELETE FROM {} WHERE {}", table, clause);
    tx.execute(&sql, params_from_iter(values)).context(&sql)
}

impl GridStore {
    /// Delete hotmap cells and taxa sets matching `filter`.
    ///
    /// Returns `(hotmap cells, taxa-set rows)` deleted.
    pub fn clear_hotmap(&self, filter: &ClearFilter) -> Result<(usize, usize)> {
        let counts = self.transact(|tx| {
            let cells = delete_where(tx, "grid_hotmap", "1 = 1", filter)?;
            let taxa = delete_where(tx, "hotmap_taxa_set", "1 = 1", filter)?;
            Ok((cells, taxa))
        })?;
        info!(cells = counts.0, taxa = counts.1, "Cleared hotmap");
        Ok(counts)
    }

    /// Delete grid cells and fetch-states at every zoom except `keep_zoom`.
    ///
    /// Returns `(grid cells, fetch-state rows)` deleted. A filter zoom equal
    /// to `keep_zoom` deletes nothing.
    pub fn clear_derived_layers(&self, keep_zoom: u8, filter: &ClearFilter) -> Result<(usize, usize)> {
        let base = format!("zoom <> {}", keep_zoom);
        let counts = self.transact(|tx| {
            let cells = delete_where(tx, "taxon_grid", &base, filter)?;
            let states = delete_where(tx, "taxon_layer_state", &base, filter)?;
            Ok((cells, states))
        })?;
        info!(keep_zoom, cells = counts.0, states = counts.1, "Cleared derived layers");
        Ok(counts)
    }
}
