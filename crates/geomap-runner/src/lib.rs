//! # geomap-runner
//!
//! The `geomap` command line: ingest observation grids, derive coarser zoom
//! levels, build hotmaps and query them. Every command writes its result to
//! stdout as JSON.
//!
//! ```text
//! geomap ingest --taxon 100024 payloads/100024.json
//! geomap build --zoom 15,14,13
//! geomap rank --lat 55.70 --lon 13.19 --max-km 50 --taxa-limit 5
//! ```

pub mod cli;
mod error;
pub mod payload;

pub use cli::Cli;
pub use error::RunnerError;
pub use payload::{GridPayload, JsonDirSource};

use cli::{
    BuildArgs, CellTaxaArgs, CleanArgs, CleanTarget, Command, DeriveArgs, FeaturesArgs,
    IngestArgs, LayerArgs, MergeYearsArgs, NamesArgs, RankArgs, RankModeArg, SyncArgs, TopArgs,
};
use geomap_engine::{
    derive_taxa, ingest_layer, merge_year_layers, rank_nearby, rebuild_hotmaps,
    refresh_derived_chain, sync_taxon, ChainReport, GeomapConfig, RankModeKind, RankQuery,
    SyncReport, TaxaSelection,
};
use geomap_store::{ClearFilter, GridStore, LayerKey, TaxonId, TimeContext, YEAR_ALL};
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

/// Result type for CLI commands.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Resolve the configuration for a command line: the YAML file if given,
/// then `GEOMAP_DB`, then the `--db` and `--workers` flags.
pub fn load_config(cli: &Cli) -> Result<GeomapConfig> {
    let mut config = match &cli.config {
        Some(path) => GeomapConfig::load(path)?,
        None => {
            let mut config = GeomapConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }
    config.normalize()?;
    Ok(config)
}

/// Run a parsed command line, writing JSON to `out`.
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let config = load_config(cli)?;
    let store = GridStore::open(&config.db_path)?;
    execute(&store, &config, &cli.command, out)
}

/// Run one command against an open store.
pub fn execute(store: &GridStore, config: &GeomapConfig, command: &Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Ingest(args) => ingest(store, config, args, out),
        Command::Sync(args) => sync(store, config, args, out),
        Command::MergeYears(args) => merge_years(store, config, args, out),
        Command::Derive(args) => derive(store, config, args, out),
        Command::Build(args) => build(store, config, args, out),
        Command::Rank(args) => rank(store, config, args, out),
        Command::Top(args) => top(store, config, args, out),
        Command::Taxa(args) => cell_taxa(store, config, args, out),
        Command::Rollup(args) => rollup(store, config, args, out),
        Command::Features(args) => features(store, config, args, out),
        Command::Names(args) => names(store, args, out),
        Command::Clean(args) => clean(store, config, args, out),
    }
}

fn emit<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn selection(taxa: &[TaxonId]) -> TaxaSelection {
    if taxa.is_empty() {
        TaxaSelection::All
    } else {
        TaxaSelection::Explicit(taxa.to_vec())
    }
}

#[derive(Serialize)]
struct TaxonReport {
    taxon_id: TaxonId,
    #[serde(flatten)]
    report: SyncReport,
}

fn ingest(store: &GridStore, config: &GeomapConfig, args: &IngestArgs, out: &mut dyn Write) -> Result<()> {
    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let time = args.time.time();
    let payloads = args
        .files
        .iter()
        .map(GridPayload::from_file)
        .collect::<Result<Vec<_>>>()?;
    let cells = GridPayload::merge(payloads).into_cells(zoom)?;

    let key = LayerKey::new(args.taxon, zoom, time);
    let base = ingest_layer(store, &key, &cells)?;
    let chain = if args.no_derive || zoom <= config.target_zoom() {
        ChainReport::default()
    } else {
        refresh_derived_chain(store, args.taxon, time, zoom, config.target_zoom())?
    };
    emit(
        out,
        &TaxonReport {
            taxon_id: args.taxon,
            report: SyncReport { base, chain },
        },
    )
}

fn sync(store: &GridStore, config: &GeomapConfig, args: &SyncArgs, out: &mut dyn Write) -> Result<()> {
    let source = JsonDirSource::new(&args.source_dir);
    let taxa = if args.taxa.is_empty() {
        source.taxa()?
    } else {
        args.taxa.clone()
    };
    if taxa.is_empty() {
        warn!(dir = %args.source_dir.display(), "No taxa to sync");
    }

    let time = args.time.time();
    let mut reports = Vec::with_capacity(taxa.len());
    for taxon_id in taxa {
        let report = sync_taxon(store, &source, taxon_id, time, config.base_zoom(), config.target_zoom())?;
        reports.push(TaxonReport { taxon_id, report });
    }
    info!(taxa = reports.len(), "Sync finished");
    emit(out, &reports)
}

fn merge_years(store: &GridStore, config: &GeomapConfig, args: &MergeYearsArgs, out: &mut dyn Write) -> Result<()> {
    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let time = TimeContext::new(YEAR_ALL, args.slot);
    let outcome = merge_year_layers(store, args.taxon, zoom, time, &args.years)?;
    emit(out, &outcome)
}

fn derive(store: &GridStore, config: &GeomapConfig, args: &DeriveArgs, out: &mut dyn Write) -> Result<()> {
    let base_zoom = config.base_zoom();
    let layers: Vec<(TaxonId, TimeContext)> = store
        .layer_keys(base_zoom)?
        .into_iter()
        .filter(|key| args.taxa.is_empty() || args.taxa.contains(&key.taxon_id))
        .filter(|key| args.year.map_or(true, |y| key.time.year == y))
        .filter(|key| args.slot.map_or(true, |s| key.time.slot == s))
        .map(|key| (key.taxon_id, key.time))
        .collect();

    let reports = derive_taxa(store, &layers, base_zoom, config.target_zoom(), config.workers)?;

    #[derive(Serialize)]
    struct DeriveReport {
        taxon_id: TaxonId,
        time: TimeContext,
        #[serde(flatten)]
        chain: ChainReport,
    }
    let reports: Vec<DeriveReport> = layers
        .into_iter()
        .zip(reports)
        .map(|((taxon_id, time), chain)| DeriveReport { taxon_id, time, chain })
        .collect();
    emit(out, &reports)
}

fn build(store: &GridStore, config: &GeomapConfig, args: &BuildArgs, out: &mut dyn Write) -> Result<()> {
    let zooms = if args.zoom.is_empty() {
        config.zooms.clone()
    } else {
        args.zoom.clone()
    };
    let time = args.time.time();
    let layers: Vec<(u8, TimeContext)> = zooms.into_iter().map(|z| (z, time)).collect();

    let mut params = config.scoring;
    if let Some(alpha) = args.alpha {
        params.alpha = alpha;
    }
    if let Some(beta) = args.beta {
        params.beta = beta;
    }

    let summaries = rebuild_hotmaps(store, &layers, &selection(&args.taxa), &params, config.workers)?;
    emit(out, &summaries)
}

fn rank(store: &GridStore, config: &GeomapConfig, args: &RankArgs, out: &mut dyn Write) -> Result<()> {
    let mut ranking = config.ranking.clone();
    if let Some(mode) = args.mode {
        ranking.mode = match mode {
            RankModeArg::Score => RankModeKind::Score,
            RankModeArg::Exponential => RankModeKind::Exponential,
            RankModeArg::Rational => RankModeKind::Rational,
        };
    }
    if let Some(d0_km) = args.d0_km {
        ranking.d0_km = d0_km;
    }
    if let Some(gamma) = args.gamma {
        ranking.gamma = gamma;
    }
    if let Some(max_km) = args.max_km {
        ranking.max_km = max_km;
    }
    ranking.validate()?;

    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let mut query = RankQuery::new(args.lat, args.lon, zoom, args.time.time());
    query.max_km = ranking.max_km;
    query.limit = args.limit.unwrap_or(ranking.limit);
    query.mode = ranking.rank_mode();
    query.taxa_limit = args.taxa_limit;

    let tiles = rank_nearby(store, &query)?;
    emit(out, &tiles)
}

fn top(store: &GridStore, config: &GeomapConfig, args: &TopArgs, out: &mut dyn Write) -> Result<()> {
    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let cells = store.top_hotspots(zoom, args.time.time(), args.limit)?;
    emit(out, &cells)
}

fn cell_taxa(store: &GridStore, config: &GeomapConfig, args: &CellTaxaArgs, out: &mut dyn Write) -> Result<()> {
    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let taxa = store.cell_taxa_window(
        zoom,
        args.window.years(),
        &args.window.slots(),
        args.x,
        args.y,
        args.limit,
    )?;
    emit(out, &taxa)
}

fn rollup(store: &GridStore, config: &GeomapConfig, args: &LayerArgs, out: &mut dyn Write) -> Result<()> {
    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let rollups = store.hotmap_rollups(zoom, args.time.time())?;
    emit(out, &rollups)
}

fn features(store: &GridStore, config: &GeomapConfig, args: &FeaturesArgs, out: &mut dyn Write) -> Result<()> {
    let zoom = args.zoom.unwrap_or_else(|| config.base_zoom());
    let features = store.hotmap_features(zoom, args.window.years(), &args.window.slots())?;
    emit(out, &features)
}

fn names(store: &GridStore, args: &NamesArgs, out: &mut dyn Write) -> Result<()> {
    let taxa = payload::read_taxa_file(&args.file)?;
    let written = store.upsert_taxa(&taxa)?;
    emit(out, &serde_json::json!({ "taxa": written }))
}

fn clean(store: &GridStore, config: &GeomapConfig, args: &CleanArgs, out: &mut dyn Write) -> Result<()> {
    let filter = ClearFilter {
        zoom: args.zoom,
        year: args.year,
        slot: args.slot,
    };
    match args.target {
        CleanTarget::Hotmap => {
            let (cells, taxa_sets) = store.clear_hotmap(&filter)?;
            emit(out, &serde_json::json!({ "cells": cells, "taxa_sets": taxa_sets }))
        }
        CleanTarget::Derived => {
            let base_zoom = config.base_zoom();
            if filter.zoom == Some(base_zoom) {
                return Err(RunnerError::InvalidArgs(format!(
                    "zoom {} is the base zoom and is never cleared as derived",
                    base_zoom
                )));
            }
            let (cells, states) = store.clear_derived_layers(base_zoom, &filter)?;
            emit(out, &serde_json::json!({ "cells": cells, "layer_states": states }))
        }
    }
}
