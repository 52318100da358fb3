//! Read paths for map rendering and click-to-inspect.
//!
//! Everything here is a projection over the tables and views; nothing is
//! written.

use crate::error::{SqlContext, StoreError};
use crate::hotmap::hotmap_cell_from_row;
use crate::store::{bbox_from_row, placeholders, GridStore};
use crate::time::{SlotId, TimeContext, YearSpan};
use crate::types::{CellTaxon, HotmapFeature, HotmapRollup, TaxonId};
use crate::Result;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter};

/// Check a slot window and return it sorted and deduplicated.
///
/// The all-time slot cannot be combined with seasonal slots.
fn normalize_window(slots: &[SlotId]) -> Result<Vec<SlotId>> {
    if slots.is_empty() {
        return Err(StoreError::InvalidQuery("slot window is empty".to_string()));
    }
    let mut slots = slots.to_vec();
    slots.sort();
    slots.dedup();
    if slots.len() > 1 && slots.contains(&SlotId::ALL) {
        return Err(StoreError::InvalidQuery(
            "slot 0 (all-time) cannot be combined with seasonal slots".to_string(),
        ));
    }
    Ok(slots)
}

/// Append the year and slot predicates for a window query.
fn push_window(sql: &mut String, values: &mut Vec<Value>, years: YearSpan, slots: &[SlotId]) {
    match years {
        YearSpan::AllYears => sql.push_str(" AND year = 0"),
        YearSpan::Range { from, to } => {
            sql.push_str(" AND year BETWEEN ? AND ?");
            values.push(Value::Integer(i64::from(from)));
            values.push(Value::Integer(i64::from(to)));
        }
    }
    sql.push_str(" AND slot_id IN (");
    sql.push_str(&placeholders(slots.len()));
    sql.push(')');
    values.extend(slots.iter().map(|s| Value::Integer(i64::from(s.get()))));
}

fn parse_taxa_list(raw: Option<String>, column: usize) -> rusqlite::Result<Vec<TaxonId>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut taxa = raw
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().parse::<TaxonId>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))?;
    taxa.sort_unstable();
    Ok(taxa)
}

impl GridStore {
    /// Every hotmap cell at `(zoom, year, slot)` with its centroid,
    /// observation total and contributing taxa, ordered by `(x, y)`.
    ///
    /// Only taxa in the recorded taxa set count.
    pub fn hotmap_rollups(&self, zoom: u8, time: TimeContext) -> Result<Vec<HotmapRollup>> {
        let context = format!("rollups zoom={} year={} slot={}", zoom, time.year, time.slot.get());
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT x, y, coverage, score, top_lat, left_lon, bottom_lat, right_lon,
                            centroid_lat, centroid_lon, obs_total, taxa_list
                     FROM grid_hotmap_v WHERE zoom = ?1 AND year = ?2 AND slot_id = ?3
                     ORDER BY x, y",
                )
                .context(&context)?;
            let rows = stmt
                .query_map(params![zoom, time.year, time.slot.get()], |row| {
                    Ok(HotmapRollup {
                        cell: hotmap_cell_from_row(row, 0)?,
                        centroid: (row.get(8)?, row.get(9)?),
                        obs_total: row.get(10)?,
                        taxa: parse_taxa_list(row.get(11)?, 11)?,
                    })
                })
                .context(&context)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
        })
    }

    /// Taxa of the recorded taxa set present in one cell, by observations
    /// descending, then taxon id.
    pub fn cell_taxa(
        &self,
        zoom: u8,
        time: TimeContext,
        x: u32,
        y: u32,
        limit: Option<usize>,
    ) -> Result<Vec<CellTaxon>> {
        let years = YearSpan::from_bounds(Some(time.year), None);
        self.cell_taxa_window(zoom, years, &[time.slot], x, y, limit)
    }

    /// Taxa present in one cell across a slot window and year span.
    ///
    /// Each slot is filtered independently and the contributing taxa are
    /// merged, summing their observation counts.
    pub fn cell_taxa_window(
        &self,
        zoom: u8,
        years: YearSpan,
        slots: &[SlotId],
        x: u32,
        y: u32,
        limit: Option<usize>,
    ) -> Result<Vec<CellTaxon>> {
        let slots = normalize_window(slots)?;
        let mut sql = String::from(
            "SELECT taxon_id, MAX(scientific_name), MAX(vernacular_name),
                    SUM(observations_count) AS obs
             FROM grid_hotmap_taxa_names_v WHERE zoom = ? AND x = ? AND y = ?",
        );
        let mut values = vec![
            Value::Integer(i64::from(zoom)),
            Value::Integer(i64::from(x)),
            Value::Integer(i64::from(y)),
        ];
        push_window(&mut sql, &mut values, years, &slots);
        sql.push_str(" GROUP BY taxon_id ORDER BY obs DESC, taxon_id");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let context = format!("cell taxa zoom={} x={} y={}", zoom, x, y);
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(&sql).context(&context)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok(CellTaxon {
                        taxon_id: row.get(0)?,
                        scientific_name: row.get(1)?,
                        vernacular_name: row.get(2)?,
                        observations_count: row.get(3)?,
                    })
                })
                .context(&context)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
        })
    }

    /// Hotmap cells for rendering, tagged with their slot and ordered by
    /// `(slot, x, y)`.
    ///
    /// For a year range the per-year cells collapse per `(slot, x, y)`:
    /// maximum coverage, maximum score and the union of the boxes.
    pub fn hotmap_features(&self, zoom: u8, years: YearSpan, slots: &[SlotId]) -> Result<Vec<HotmapFeature>> {
        let slots = normalize_window(slots)?;
        let mut sql = String::from(match years {
            YearSpan::AllYears => {
                "SELECT slot_id, x, y, coverage, score, top_lat, left_lon, bottom_lat, right_lon
                 FROM grid_hotmap WHERE zoom = ?"
            }
            YearSpan::Range { .. } => {
                "SELECT slot_id, x, y, MAX(coverage), MAX(score),
                        MAX(top_lat), MIN(left_lon), MIN(bottom_lat), MAX(right_lon)
                 FROM grid_hotmap WHERE zoom = ?"
            }
        });
        let mut values = vec![Value::Integer(i64::from(zoom))];
        push_window(&mut sql, &mut values, years, &slots);
        if matches!(years, YearSpan::Range { .. }) {
            sql.push_str(" GROUP BY slot_id, x, y");
        }
        sql.push_str(" ORDER BY slot_id, x, y");

        let context = format!("hotmap features zoom={}", zoom);
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(&sql).context(&context)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    let slot: i64 = row.get(0)?;
                    Ok(HotmapFeature {
                        slot: SlotId::from(slot),
                        x: row.get(1)?,
                        y: row.get(2)?,
                        coverage: row.get(3)?,
                        score: row.get(4)?,
                        bbox: bbox_from_row(row, 5)?,
                    })
                })
                .context(&context)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context(&context)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_window() {
        let s = |v: i64| SlotId::normalized(v);
        assert_eq!(normalize_window(&[s(3), s(1), s(3)]).unwrap(), vec![s(1), s(3)]);
        assert_eq!(normalize_window(&[SlotId::ALL]).unwrap(), vec![SlotId::ALL]);
        assert!(normalize_window(&[]).is_err());
        assert!(matches!(
            normalize_window(&[SlotId::ALL, s(4)]),
            Err(StoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_parse_taxa_list() {
        assert_eq!(parse_taxa_list(Some("43,42".to_string()), 0).unwrap(), vec![42, 43]);
        assert!(parse_taxa_list(None, 0).unwrap().is_empty());
        assert!(parse_taxa_list(Some("4x".to_string()), 0).is_err());
    }
}
