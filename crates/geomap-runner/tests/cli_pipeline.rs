//! Command pipelines run through the CLI layer against an in-memory store.
//!
//! Payload files are written to a per-process temp directory; every command
//! output is parsed back as JSON.

use approx::assert_relative_eq;
use clap::Parser;
use geomap_engine::{EngineError, GeomapConfig};
use geomap_runner::{execute, Cli, RunnerError};
use geomap_store::GridStore;
use geomap_tiles::TileCoord;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

// ============================================================================
// Fixtures
// ============================================================================

const LAT: f64 = 55.70;
const LON: f64 = 13.19;

/// Even-column tile at zoom 15 near Lund, so it and its right neighbour
/// share a zoom-14 parent.
fn origin() -> (u32, u32) {
    let tile = TileCoord::from_lat_lon(LAT, LON, 15).unwrap();
    (tile.x & !1, tile.y)
}

fn payload(cells: &[(u32, u32, u64)]) -> Value {
    let grid_cells: Vec<Value> = cells
        .iter()
        .map(|&(x, y, obs)| {
            let b = TileCoord::new(15, x, y).unwrap().bounds();
            json!({
                "x": x,
                "y": y,
                "zoom": 15,
                "observationsCount": obs,
                "taxaCount": 1,
                "boundingBox": {
                    "topLeft": { "latitude": b.top_lat, "longitude": b.left_lon },
                    "bottomRight": { "latitude": b.bottom_lat, "longitude": b.right_lon }
                }
            })
        })
        .collect();
    json!({ "gridCells": grid_cells })
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("geomap-runner-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

fn config() -> GeomapConfig {
    GeomapConfig::from_yaml_str("zooms: [15, 14]").unwrap()
}

fn exec(store: &GridStore, args: &[&str]) -> Result<Value, RunnerError> {
    let mut argv = vec!["geomap"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).unwrap();
    let mut out = Vec::new();
    execute(store, &config(), &cli.command, &mut out)?;
    Ok(serde_json::from_slice(&out).unwrap())
}

/// Two taxa: taxon 1 in both origin cells, taxon 2 only in the first.
fn seed(store: &GridStore, dir: &Path) -> (u32, u32) {
    let (x, y) = origin();
    let first = dir.join("taxon1.json");
    let second = dir.join("taxon2.json");
    write_json(&first, &payload(&[(x, y, 4), (x + 1, y, 6)]));
    write_json(&second, &payload(&[(x, y, 10)]));

    exec(store, &["ingest", "--taxon", "1", first.to_str().unwrap()]).unwrap();
    exec(store, &["ingest", "--taxon", "2", second.to_str().unwrap()]).unwrap();
    (x, y)
}

// ============================================================================
// Ingest
// ============================================================================

#[test]
fn test_ingest_reports_replaced_then_unchanged() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("ingest");
    let (x, y) = origin();
    let file = dir.join("layer.json");
    write_json(&file, &payload(&[(x, y, 4)]));

    let first = exec(&store, &["ingest", "--taxon", "7", file.to_str().unwrap()]).unwrap();
    assert_eq!(first["taxon_id"], 7);
    assert_eq!(first["base"], "replaced");
    assert_eq!(first["chain"]["derived"], json!([14]));

    let second = exec(&store, &["ingest", "--taxon", "7", file.to_str().unwrap()]).unwrap();
    assert_eq!(second["base"], "unchanged");
    assert_eq!(second["chain"]["derived"], json!([]));
    assert_eq!(second["chain"]["current"], json!([14]));
}

#[test]
fn test_ingest_rejects_zoom_mismatch() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("mismatch");
    let (x, y) = origin();
    let file = dir.join("layer.json");
    write_json(&file, &payload(&[(x, y, 4)]));

    let err = exec(&store, &["ingest", "--taxon", "7", "--zoom", "14", file.to_str().unwrap()]).unwrap_err();
    assert!(matches!(err, RunnerError::InvalidArgs(_)));
}

#[test]
fn test_sync_walks_payload_directory() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("sync");
    let (x, y) = origin();
    write_json(&dir.join("5").join("z15_y0_s0.json"), &payload(&[(x, y, 1)]));
    write_json(&dir.join("3").join("z15_y0_s0.json"), &payload(&[(x + 1, y, 2)]));

    let reports = exec(&store, &["sync", "--source-dir", dir.to_str().unwrap()]).unwrap();
    let taxa: Vec<i64> = reports
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["taxon_id"].as_i64().unwrap())
        .collect();
    assert_eq!(taxa, vec![3, 5]);
    assert!(reports.as_array().unwrap().iter().all(|r| r["base"] == "replaced"));
}

// ============================================================================
// Build and query
// ============================================================================

#[test]
fn test_build_then_top_and_rank() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("build");
    let (x, y) = seed(&store, &dir);

    let summaries = exec(&store, &["build"]).unwrap();
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["zoom"], 15);
    assert_eq!(summaries[0]["cells"], 2);
    assert_eq!(summaries[1]["zoom"], 14);
    assert_eq!(summaries[1]["cells"], 1);

    let top = exec(&store, &["top", "--zoom", "15", "--limit", "1"]).unwrap();
    assert_eq!(top.as_array().unwrap().len(), 1);
    assert_eq!(top[0]["cell"]["x"], x);
    assert_eq!(top[0]["cell"]["coverage"], 2);
    assert_relative_eq!(top[0]["cell"]["score"].as_f64().unwrap(), 4.0 / 15f64.sqrt(), epsilon = 1e-12);

    let lat = LAT.to_string();
    let lon = LON.to_string();
    let ranked = exec(
        &store,
        &["rank", "--lat", &lat, "--lon", &lon, "--max-km", "20", "--taxa-limit", "1"],
    )
    .unwrap();
    let ranked = ranked.as_array().unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!((ranked[0]["x"].as_u64(), ranked[0]["y"].as_u64()), (Some(u64::from(x)), Some(u64::from(y))));
    assert_eq!(ranked[0]["taxa"].as_array().unwrap().len(), 1);
    assert_eq!(ranked[0]["taxa"][0]["taxon_id"], 2);
}

#[test]
fn test_rank_rejects_non_positive_decay_distance() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("decay");
    seed(&store, &dir);
    exec(&store, &["build", "--zoom", "15"]).unwrap();

    let lat = LAT.to_string();
    let lon = LON.to_string();
    let err = exec(&store, &["rank", "--lat", &lat, "--lon", &lon, "--d0-km", "0"]).unwrap_err();
    assert!(matches!(err, RunnerError::Engine(EngineError::Config(_))), "{:?}", err);

    let ranked = exec(&store, &["rank", "--lat", &lat, "--lon", &lon, "--d0-km", "5"]).unwrap();
    assert!(!ranked.as_array().unwrap().is_empty());
}

#[test]
fn test_build_explicit_taxa_and_exponents() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("explicit");
    seed(&store, &dir);

    let summaries = exec(&store, &["build", "--zoom", "15", "--taxa", "2", "--beta", "0"]).unwrap();
    assert_eq!(summaries[0]["cells"], 1);
    assert_eq!(summaries[0]["taxa"], 1);
    assert_relative_eq!(summaries[0]["max_score"].as_f64().unwrap(), 1.0);
}

#[test]
fn test_cell_taxa_with_names() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("names");
    let (x, y) = seed(&store, &dir);

    let names = dir.join("taxa.json");
    write_json(
        &names,
        &json!([
            { "taxonId": 1, "scientificName": "Parus major", "vernacularName": "talgoxe" },
            { "id": 2, "scientificName": "Cyanistes caeruleus" }
        ]),
    );
    let written = exec(&store, &["names", names.to_str().unwrap()]).unwrap();
    assert_eq!(written["taxa"], 2);

    exec(&store, &["build", "--zoom", "15"]).unwrap();
    let xs = x.to_string();
    let ys = y.to_string();
    let taxa = exec(&store, &["taxa", "--zoom", "15", "--x", &xs, "--y", &ys]).unwrap();
    let taxa = taxa.as_array().unwrap();
    assert_eq!(taxa.len(), 2);
    assert_eq!(taxa[0]["taxon_id"], 2);
    assert_eq!(taxa[0]["observations_count"], 10);
    assert_eq!(taxa[1]["vernacular_name"], "talgoxe");
    assert!(taxa[0]["vernacular_name"].is_null());
}

#[test]
fn test_rollup_and_features() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("rollup");
    seed(&store, &dir);
    exec(&store, &["build", "--zoom", "14"]).unwrap();

    let rollups = exec(&store, &["rollup", "--zoom", "14"]).unwrap();
    assert_eq!(rollups.as_array().unwrap().len(), 1);
    assert_eq!(rollups[0]["obs_total"], 20);

    let features = exec(&store, &["features", "--zoom", "14"]).unwrap();
    assert_eq!(features.as_array().unwrap().len(), 1);
    assert_eq!(features[0]["coverage"], 2);
}

// ============================================================================
// Maintenance
// ============================================================================

#[test]
fn test_clean_hotmap_and_derived() {
    let store = GridStore::open_in_memory().unwrap();
    let dir = scratch_dir("clean");
    seed(&store, &dir);
    exec(&store, &["build"]).unwrap();

    let cleared = exec(&store, &["clean", "hotmap", "--zoom", "14"]).unwrap();
    assert_eq!(cleared["cells"], 1);
    assert_eq!(cleared["taxa_sets"], 2);

    let cleared = exec(&store, &["clean", "derived"]).unwrap();
    assert_eq!(cleared["cells"], 2);
    assert_eq!(cleared["layer_states"], 2);

    // Base layers survive and the chain can be rebuilt
    let reports = exec(&store, &["derive"]).unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 2);
    assert!(reports
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["derived"] == json!([14])));
}

#[test]
fn test_clean_derived_refuses_base_zoom() {
    let store = GridStore::open_in_memory().unwrap();
    let err = exec(&store, &["clean", "derived", "--zoom", "15"]).unwrap_err();
    assert!(matches!(err, RunnerError::InvalidArgs(_)));
}
