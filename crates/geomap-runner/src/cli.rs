//! Command-line definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use geomap_store::{SlotId, TaxonId, TimeContext, YearSpan, SLOTS_PER_YEAR};
use std::path::PathBuf;

/// Build and query the biodiversity hotmap.
#[derive(Parser, Debug, Clone)]
#[command(name = "geomap", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database, overrides the configuration and GEOMAP_DB
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Worker threads for derivation and scoring
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ingest payload files as one base layer of a taxon
    Ingest(IngestArgs),
    /// Ingest and derive every taxon found in a payload directory
    Sync(SyncArgs),
    /// Rebuild the all-years layer of a taxon from yearly layers
    MergeYears(MergeYearsArgs),
    /// Bring derived zoom levels up to date with their base layers
    Derive(DeriveArgs),
    /// Rebuild hotmap layers
    Build(BuildArgs),
    /// Rank hotmap tiles near a point
    Rank(RankArgs),
    /// Highest scoring hotmap tiles
    Top(TopArgs),
    /// Taxa contributing to one hotmap cell
    Taxa(CellTaxaArgs),
    /// Hotmap cells with totals and taxa lists
    Rollup(LayerArgs),
    /// Hotmap cells for rendering across years and slots
    Features(FeaturesArgs),
    /// Load taxon names from a JSON file
    Names(NamesArgs),
    /// Delete hotmap or derived layers
    Clean(CleanArgs),
}

/// Year and slot of a single layer.
#[derive(Args, Debug, Clone, Copy)]
pub struct TimeArgs {
    /// Year, 0 for the all-years bucket
    #[arg(long, default_value_t = 0)]
    pub year: i32,

    /// Slot: `all`, 1-48 or `month.quartile`
    #[arg(long, default_value = "all", value_parser = parse_slot)]
    pub slot: SlotId,
}

impl TimeArgs {
    pub fn time(&self) -> TimeContext {
        TimeContext::new(self.year, self.slot)
    }
}

/// Year span and slot window for read-side views.
#[derive(Args, Debug, Clone, Copy)]
pub struct WindowArgs {
    /// First year of the span
    #[arg(long)]
    pub year_from: Option<i32>,

    /// Last year of the span
    #[arg(long)]
    pub year_to: Option<i32>,

    /// Centre slot: `all`, 1-48 or `month.quartile`
    #[arg(long, default_value = "all", value_parser = parse_slot)]
    pub slot: SlotId,

    /// Neighbouring slots included on each side
    #[arg(long, default_value_t = 0)]
    pub window: u8,
}

impl WindowArgs {
    pub fn years(&self) -> YearSpan {
        YearSpan::from_bounds(self.year_from, self.year_to)
    }

    pub fn slots(&self) -> Vec<SlotId> {
        self.slot.window(self.window)
    }
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Taxon the payload belongs to
    #[arg(long)]
    pub taxon: TaxonId,

    /// Payload files; several files are merged into one layer
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Zoom of the payload, defaults to the configured base zoom
    #[arg(long)]
    pub zoom: Option<u8>,

    #[command(flatten)]
    pub time: TimeArgs,

    /// Skip refreshing the derived zoom levels
    #[arg(long)]
    pub no_derive: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Directory of `<taxon>/z<zoom>_y<year>_s<slot>.json` payloads
    #[arg(long)]
    pub source_dir: PathBuf,

    /// Taxa to sync, defaults to every taxon directory
    #[arg(long, value_delimiter = ',')]
    pub taxa: Vec<TaxonId>,

    #[command(flatten)]
    pub time: TimeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct MergeYearsArgs {
    #[arg(long)]
    pub taxon: TaxonId,

    /// Source years
    #[arg(long, value_delimiter = ',', required = true)]
    pub years: Vec<i32>,

    /// Zoom, defaults to the configured base zoom
    #[arg(long)]
    pub zoom: Option<u8>,

    #[arg(long, default_value = "all", value_parser = parse_slot)]
    pub slot: SlotId,
}

#[derive(Args, Debug, Clone)]
pub struct DeriveArgs {
    /// Only base layers of these taxa
    #[arg(long, value_delimiter = ',')]
    pub taxa: Vec<TaxonId>,

    /// Only base layers of this year
    #[arg(long)]
    pub year: Option<i32>,

    /// Only base layers of this slot
    #[arg(long, value_parser = parse_slot)]
    pub slot: Option<SlotId>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Zoom levels, defaults to every configured zoom
    #[arg(long, value_delimiter = ',')]
    pub zoom: Vec<u8>,

    #[command(flatten)]
    pub time: TimeArgs,

    /// Active taxa, defaults to every taxon with cells
    #[arg(long, value_delimiter = ',')]
    pub taxa: Vec<TaxonId>,

    /// Coverage exponent override
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Observation damping exponent override
    #[arg(long)]
    pub beta: Option<f64>,
}

/// Ranking order names.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankModeArg {
    Score,
    Exponential,
    Rational,
}

#[derive(Args, Debug, Clone)]
pub struct RankArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Hotmap zoom, defaults to the configured base zoom
    #[arg(long)]
    pub zoom: Option<u8>,

    #[command(flatten)]
    pub time: TimeArgs,

    /// Search radius in km
    #[arg(long)]
    pub max_km: Option<f64>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, value_enum)]
    pub mode: Option<RankModeArg>,

    /// Characteristic decay distance in km
    #[arg(long)]
    pub d0_km: Option<f64>,

    /// Rational decay exponent
    #[arg(long)]
    pub gamma: Option<f64>,

    /// Attach up to this many taxa to each tile
    #[arg(long)]
    pub taxa_limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct TopArgs {
    #[arg(long)]
    pub zoom: Option<u8>,

    #[command(flatten)]
    pub time: TimeArgs,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CellTaxaArgs {
    #[arg(long)]
    pub zoom: Option<u8>,

    #[arg(long)]
    pub x: u32,

    #[arg(long)]
    pub y: u32,

    #[command(flatten)]
    pub window: WindowArgs,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct LayerArgs {
    #[arg(long)]
    pub zoom: Option<u8>,

    #[command(flatten)]
    pub time: TimeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct FeaturesArgs {
    #[arg(long)]
    pub zoom: Option<u8>,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug, Clone)]
pub struct NamesArgs {
    /// JSON array of `{taxonId, scientificName, vernacularName}`
    pub file: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    /// Hotmap layers and their taxa sets
    Hotmap,
    /// Every layer below the base zoom, with its fetch-state
    Derived,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[arg(value_enum)]
    pub target: CleanTarget,

    #[arg(long)]
    pub zoom: Option<u8>,

    #[arg(long)]
    pub year: Option<i32>,

    #[arg(long, value_parser = parse_slot)]
    pub slot: Option<SlotId>,
}

/// Parse `all`, a slot number `0-48` or `month.quartile`.
pub fn parse_slot(raw: &str) -> Result<SlotId, String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("all") {
        return Ok(SlotId::ALL);
    }
    if let Some((month, quartile)) = raw.split_once('.') {
        let month: u8 = month.parse().map_err(|_| format!("invalid month in slot '{}'", raw))?;
        let quartile: u8 = quartile
            .parse()
            .map_err(|_| format!("invalid quartile in slot '{}'", raw))?;
        return SlotId::from_month_quartile(month, quartile)
            .ok_or_else(|| format!("slot '{}' needs month 1-12 and quartile 1-4", raw));
    }
    match raw.parse::<u8>() {
        Ok(n) if n <= SLOTS_PER_YEAR => Ok(SlotId::normalized(i64::from(n))),
        _ => Err(format!("slot must be all, 0-{} or month.quartile, got '{}'", SLOTS_PER_YEAR, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_slot_forms() {
        assert_eq!(parse_slot("all").unwrap(), SlotId::ALL);
        assert_eq!(parse_slot("0").unwrap(), SlotId::ALL);
        assert_eq!(parse_slot("23").unwrap().get(), 23);
        assert_eq!(parse_slot("6.3").unwrap().get(), 23);
        assert_eq!(parse_slot("12.4").unwrap().get(), 48);
    }

    #[test]
    fn test_parse_slot_rejects() {
        for raw in ["49", "-1", "13.1", "6.5", "spring", ""] {
            assert!(parse_slot(raw).is_err(), "{}", raw);
        }
    }

    #[test]
    fn test_rank_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "geomap", "rank", "--lat", "-33.9", "--lon", "-70.6", "--slot", "1.1",
        ])
        .unwrap();
        match cli.command {
            Command::Rank(args) => {
                assert_eq!(args.lat, -33.9);
                assert_eq!(args.lon, -70.6);
                assert_eq!(args.time.slot.get(), 1);
                assert_eq!(args.time.year, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_taxa_lists_split_on_commas() {
        let cli = Cli::try_parse_from(["geomap", "build", "--taxa", "3,1,2", "--zoom", "15,14"]).unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.taxa, vec![3, 1, 2]);
                assert_eq!(args.zoom, vec![15, 14]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
