//! YAML configuration.
//!
//! ```yaml
//! db_path: data/db/geomap.sqlite
//! zooms: [15, 14, 13]
//! scoring:
//!   alpha: 2.0
//!   beta: 0.5
//! ranking:
//!   max_km: 250
//!   limit: 20
//!   mode: rational
//!   d0_km: 30
//!   gamma: 2.0
//! workers: 4
//! ```
//!
//! Every field is optional. `GEOMAP_DB` overrides `db_path`.

use crate::ranking::RankMode;
use crate::scoring::ScoreParams;
use crate::{EngineError, Result};
use geomap_tiles::{DistanceDecay, MAX_ZOOM};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`GeomapConfig::db_path`].
pub const DB_PATH_ENV: &str = "GEOMAP_DB";

/// Ranking mode names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankModeKind {
    /// Score only.
    Score,
    /// `exp(-d / d0)` weighting.
    Exponential,
    /// `1 / (1 + d / d0)^gamma` weighting.
    Rational,
}

/// Ranking defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Search radius in km.
    pub max_km: f64,
    /// Result count.
    pub limit: usize,
    /// Ordering.
    pub mode: RankModeKind,
    /// Characteristic decay distance in km.
    pub d0_km: f64,
    /// Rational decay exponent.
    pub gamma: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_km: 250.0,
            limit: 20,
            mode: RankModeKind::Rational,
            d0_km: 30.0,
            gamma: 2.0,
        }
    }
}

impl RankingConfig {
    /// Check the radius and decay parameters.
    ///
    /// `d0_km` must be positive and finite; `gamma` must be finite.
    pub fn validate(&self) -> Result<()> {
        if !self.max_km.is_finite() || self.max_km < 0.0 {
            return Err(EngineError::Config(format!(
                "ranking.max_km must be >= 0, got {}",
                self.max_km
            )));
        }
        if !self.d0_km.is_finite() || self.d0_km <= 0.0 {
            return Err(EngineError::Config(format!(
                "ranking.d0_km must be > 0, got {}",
                self.d0_km
            )));
        }
        if !self.gamma.is_finite() {
            return Err(EngineError::Config(format!(
                "ranking.gamma must be finite, got {}",
                self.gamma
            )));
        }
        Ok(())
    }

    /// The configured [`RankMode`].
    pub fn rank_mode(&self) -> RankMode {
        match self.mode {
            RankModeKind::Score => RankMode::Score,
            RankModeKind::Exponential => RankMode::DistanceWeighted {
                decay: DistanceDecay::Exponential { d0_km: self.d0_km },
            },
            RankModeKind::Rational => RankMode::DistanceWeighted {
                decay: DistanceDecay::Rational {
                    d0_km: self.d0_km,
                    gamma: self.gamma,
                },
            },
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeomapConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Zoom levels, highest first. The first one is fetched, the rest derived.
    pub zooms: Vec<u8>,
    /// Scoring exponents.
    pub scoring: ScoreParams,
    /// Ranking defaults.
    pub ranking: RankingConfig,
    /// Worker threads for parallel derivation and scoring; `None` uses all cores.
    pub workers: Option<usize>,
}

impl Default for GeomapConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/db/geomap.sqlite"),
            zooms: vec![15],
            scoring: ScoreParams::default(),
            ranking: RankingConfig::default(),
            workers: None,
        }
    }
}

impl GeomapConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: GeomapConfig =
            serde_yaml::from_str(yaml).map_err(|e| EngineError::Config(e.to_string()))?;
        config.normalize()?;
        Ok(config)
    }

    /// Load from a YAML file, then apply the environment override.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `GEOMAP_DB` if set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(DB_PATH_ENV) {
            let raw = raw.trim();
            if !raw.is_empty() {
                self.db_path = PathBuf::from(raw);
            }
        }
    }

    /// Sort zooms descending and deduplicate, then check every field.
    pub fn normalize(&mut self) -> Result<()> {
        self.zooms.sort_unstable_by(|a, b| b.cmp(a));
        self.zooms.dedup();
        if self.zooms.is_empty() {
            return Err(EngineError::Config("at least one zoom level is required".to_string()));
        }
        if let Some(&zoom) = self.zooms.iter().find(|&&z| z > MAX_ZOOM) {
            return Err(EngineError::Config(format!("zoom {} exceeds {}", zoom, MAX_ZOOM)));
        }
        self.scoring
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.ranking.validate()?;
        if self.workers == Some(0) {
            return Err(EngineError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The fetched zoom level.
    pub fn base_zoom(&self) -> u8 {
        self.zooms.first().copied().unwrap_or(MAX_ZOOM)
    }

    /// The coarsest zoom level to derive.
    pub fn target_zoom(&self) -> u8 {
        self.zooms.last().copied().unwrap_or_else(|| self.base_zoom())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = GeomapConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, GeomapConfig::default());
        assert_eq!(config.scoring.alpha, 2.0);
        assert_eq!(config.scoring.beta, 0.5);
        assert_eq!(config.ranking.limit, 20);
    }

    #[test]
    fn test_zooms_normalized() {
        let config = GeomapConfig::from_yaml_str("zooms: [13, 15, 14, 15]").unwrap();
        assert_eq!(config.zooms, vec![15, 14, 13]);
        assert_eq!(config.base_zoom(), 15);
        assert_eq!(config.target_zoom(), 13);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for yaml in [
            "zooms: []",
            "zooms: [30]",
            "ranking: { max_km: -5 }",
            "workers: 0",
            "scoring: { alpha: .nan }",
            "ranking: { d0_km: 0 }",
            "ranking: { d0_km: -3 }",
            "ranking: { d0_km: .inf }",
            "ranking: { gamma: .nan }",
        ] {
            let err = GeomapConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, EngineError::Config(_)), "{} -> {:?}", yaml, err);
        }
    }

    #[test]
    fn test_rank_mode_from_config() {
        let config = GeomapConfig::from_yaml_str("ranking: { mode: exponential, d0_km: 12 }").unwrap();
        assert_eq!(
            config.ranking.rank_mode(),
            RankMode::DistanceWeighted {
                decay: DistanceDecay::Exponential { d0_km: 12.0 }
            }
        );

        let config = GeomapConfig::from_yaml_str("ranking: { mode: score }").unwrap();
        assert_eq!(config.ranking.rank_mode(), RankMode::Score);
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let err = GeomapConfig::from_yaml_str("ranking: { mode: nearest }").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
