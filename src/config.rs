use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::elo::RatingConfig;
use crate::features::FeatureConfig;
use crate::model::EdgeBands;
use crate::teams::TeamDirectory;
use crate::trainer::TrainerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Reliability buckets in evaluation reports.
    pub buckets: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { buckets: 10 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub bands: EdgeBands,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rating: RatingConfig,
    pub features: FeatureConfig,
    pub trainer: TrainerConfig,
    pub calibration: CalibrationConfig,
    pub inference: InferenceConfig,
    /// Empty means every team seen in the game log, each named by its abbreviation.
    pub teams: TeamDirectory,
    pub db_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.rating.validate().map_err(|e| anyhow!("rating: {e}"))?;
        self.features
            .validate()
            .map_err(|e| anyhow!("features: {e}"))?;
        self.trainer.validate().map_err(|e| anyhow!("trainer: {e}"))?;
        self.inference
            .bands
            .validate()
            .map_err(|e| anyhow!("inference: {e}"))?;
        if self.calibration.buckets < 2 {
            return Err(anyhow!("calibration: need at least 2 buckets"));
        }
        Ok(())
    }

    /// `RINKCAST_*` variables override the rating constants and the DB path.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        for (key, slot) in [
            ("RINKCAST_BASELINE", &mut self.rating.baseline),
            ("RINKCAST_K_FACTOR", &mut self.rating.k_factor),
            ("RINKCAST_HOME_ICE", &mut self.rating.home_ice_bonus),
            ("RINKCAST_CARRYOVER", &mut self.rating.carryover_fraction),
            ("RINKCAST_MOV_CAP", &mut self.rating.mov_cap),
        ] {
            if let Some(raw) = opt_env(key) {
                *slot = raw
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("{key}={raw:?} is not a number"))?;
            }
        }
        if let Some(db) = opt_env("RINKCAST_DB") {
            self.db_path = Some(PathBuf::from(db.trim()));
        }
        Ok(())
    }
}

/// Reads `.env.local` / `.env`, then the JSON file if given (defaults otherwise),
/// then environment overrides, then validates.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let mut cfg = match path.map(PathBuf::from).or_else(|| opt_env("RINKCAST_CONFIG").map(PathBuf::from)) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str::<PipelineConfig>(&raw)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    cfg.apply_env_overrides()?;
    cfg.validate()?;
    Ok(cfg)
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|val| if val.trim().is_empty() { None } else { Some(val) })
}
