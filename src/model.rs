use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calibration::IsotonicMap;
use crate::dataset::{MatchupRecord, TrainingWindow};
use crate::error::PipelineError;
use crate::game_log::GameId;
use crate::schema::FeatureSchema;
use crate::teams::TeamDirectory;
use crate::trainer::LogisticModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceBand {
    TossUp,
    Lean,
    Solid,
    Strong,
}

impl ConfidenceBand {
    pub fn label(self) -> &'static str {
        match self {
            ConfidenceBand::TossUp => "toss-up",
            ConfidenceBand::Lean => "lean",
            ConfidenceBand::Solid => "solid",
            ConfidenceBand::Strong => "strong",
        }
    }
}

/// Lower edges of each band, as distance of the raw probability from 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeBands {
    pub lean: f64,
    pub solid: f64,
    pub strong: f64,
}

impl Default for EdgeBands {
    fn default() -> Self {
        Self {
            lean: 0.05,
            solid: 0.10,
            strong: 0.15,
        }
    }
}

impl EdgeBands {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0 < self.lean && self.lean < self.solid && self.solid < self.strong && self.strong <= 0.5)
        {
            return Err(format!(
                "edge bands must increase within (0, 0.5]: {} / {} / {}",
                self.lean, self.solid, self.strong
            ));
        }
        Ok(())
    }

    pub fn band(&self, edge: f64) -> ConfidenceBand {
        if edge >= self.strong {
            ConfidenceBand::Strong
        } else if edge >= self.solid {
            ConfidenceBand::Solid
        } else if edge >= self.lean {
            ConfidenceBand::Lean
        } else {
            ConfidenceBand::TossUp
        }
    }
}

/// Everything needed to score a matchup row, bound to the schema it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub schema: FeatureSchema,
    /// Directory behind the identity indicator columns.
    pub teams: TeamDirectory,
    pub classifier: LogisticModel,
    pub regularization_c: f64,
    pub calibration: IsotonicMap,
    pub window: TrainingWindow,
    pub bands: EdgeBands,
    pub calibration_buckets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub raw_probability: f64,
    pub calibrated_probability: f64,
    pub edge: f64,
    pub band: ConfidenceBand,
    pub history_sufficient: bool,
}

impl TrainedModel {
    /// Structural checks run after loading an artifact.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.schema.hash_is_consistent() {
            return Err(PipelineError::InvalidConfig(
                "model schema hash does not match its field list".to_string(),
            ));
        }
        if self.classifier.dim() != self.schema.len()
            || self.classifier.means.len() != self.schema.len()
            || self.classifier.scales.len() != self.schema.len()
        {
            return Err(PipelineError::InvalidConfig(format!(
                "model has {} coefficients for {} fields",
                self.classifier.dim(),
                self.schema.len()
            )));
        }
        if !self.calibration.is_monotonic() {
            return Err(PipelineError::InvalidConfig(
                "calibration map is not monotone".to_string(),
            ));
        }
        self.bands.validate().map_err(PipelineError::InvalidConfig)
    }

    pub fn check_row(&self, row: &MatchupRecord) -> Result<(), PipelineError> {
        if row.schema_hash != self.schema.hash() || row.values.len() != self.schema.len() {
            return Err(PipelineError::SchemaMismatch {
                expected_hash: self.schema.hash().to_string(),
                found_hash: row.schema_hash.clone(),
                missing: Vec::new(),
                unexpected: Vec::new(),
            });
        }
        self.ensure_finite(Some(row.game_id), &row.values)
    }

    fn ensure_finite(&self, game_id: Option<GameId>, values: &[f64]) -> Result<(), PipelineError> {
        match self
            .schema
            .names()
            .zip(values)
            .find(|(_, v)| !v.is_finite())
        {
            Some((name, v)) => Err(PipelineError::NonFiniteFeature {
                game_id,
                feature: name.to_string(),
                value: *v,
            }),
            None => Ok(()),
        }
    }

    pub fn raw_probability(&self, row: &MatchupRecord) -> Result<f64, PipelineError> {
        self.check_row(row)?;
        Ok(self.classifier.predict_proba(&row.values))
    }

    /// (raw, calibrated)
    pub fn probabilities(&self, row: &MatchupRecord) -> Result<(f64, f64), PipelineError> {
        let raw = self.raw_probability(row)?;
        Ok((raw, self.calibration.apply(raw)))
    }

    /// Scores a row given as named fields; the names must be exactly the schema's.
    pub fn score_named(&self, fields: &BTreeMap<String, f64>) -> Result<(f64, f64), PipelineError> {
        self.schema.ensure_names(fields.keys().map(String::as_str))?;
        let values: Vec<f64> = self
            .schema
            .names()
            .map(|name| fields.get(name).copied().unwrap_or_default())
            .collect();
        self.ensure_finite(None, &values)?;
        let raw = self.classifier.predict_proba(&values);
        Ok((raw, self.calibration.apply(raw)))
    }

    pub fn predict(&self, row: &MatchupRecord) -> Result<Prediction, PipelineError> {
        let (raw, calibrated) = self.probabilities(row)?;
        let edge = (raw - 0.5).abs();
        Ok(Prediction {
            game_id: row.game_id,
            date: row.date,
            home_team: row.home_team.clone(),
            away_team: row.away_team.clone(),
            raw_probability: raw,
            calibrated_probability: calibrated,
            edge,
            band: self.bands.band(edge),
            history_sufficient: row.history_sufficient(),
        })
    }
}
