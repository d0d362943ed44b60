use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationBin, calibration_bins, expected_calibration_error};
use crate::dataset::MatchupRecord;
use crate::error::PipelineError;
use crate::game_log::SeasonId;
use crate::model::TrainedModel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
    pub roc_auc: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            accuracy: 0.0,
            log_loss: 0.0,
            brier: 0.0,
            roc_auc: 0.5,
        }
    }
}

/// Predicted side is home when p >= 0.5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub home_predicted_home_won: usize,
    pub home_predicted_away_won: usize,
    pub away_predicted_home_won: usize,
    pub away_predicted_away_won: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.home_predicted_home_won
            + self.home_predicted_away_won
            + self.away_predicted_home_won
            + self.away_predicted_away_won
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub held_out_season: SeasonId,
    pub home_win_rate: f64,
    pub raw: Metrics,
    pub calibrated: Metrics,
    pub confusion: ConfusionMatrix,
    pub raw_bins: Vec<CalibrationBin>,
    pub calibrated_bins: Vec<CalibrationBin>,
    pub raw_ece: f64,
    pub calibrated_ece: f64,
}

pub fn evaluate_probs(predictions: &[f64], outcomes: &[u8]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;
    for (p, y) in predictions.iter().zip(outcomes) {
        let y = f64::from(*y);
        brier_sum += (p - y).powi(2);
        let actual_prob = if y > 0.5 { *p } else { 1.0 - p }.clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();
        if (*p >= 0.5) == (y > 0.5) {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        accuracy: correct as f64 / n,
        log_loss: log_loss_sum / n,
        brier: brier_sum / n,
        roc_auc: roc_auc(predictions, outcomes),
    }
}

/// Mann-Whitney estimate with average ranks for ties. 0.5 when a class is absent.
pub fn roc_auc(predictions: &[f64], outcomes: &[u8]) -> f64 {
    let mut order: Vec<usize> = (0..predictions.len().min(outcomes.len())).collect();
    order.sort_by(|&a, &b| predictions[a].total_cmp(&predictions[b]));

    let positives = order.iter().filter(|&&i| outcomes[i] == 1).count();
    let negatives = order.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut rank_sum = 0.0_f64;
    let mut start = 0usize;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && predictions[order[end]] == predictions[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1..=end share their mean.
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        let tied_pos = order[start..end]
            .iter()
            .filter(|&&i| outcomes[i] == 1)
            .count();
        rank_sum += avg_rank * tied_pos as f64;
        start = end;
    }

    let p = positives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

pub fn confusion_matrix(predictions: &[f64], outcomes: &[u8]) -> ConfusionMatrix {
    let mut m = ConfusionMatrix::default();
    for (p, y) in predictions.iter().zip(outcomes) {
        match (*p >= 0.5, *y == 1) {
            (true, true) => m.home_predicted_home_won += 1,
            (true, false) => m.home_predicted_away_won += 1,
            (false, true) => m.away_predicted_home_won += 1,
            (false, false) => m.away_predicted_away_won += 1,
        }
    }
    m
}

/// Scores the model on the labeled rows of its held-out season. Reads nothing but its
/// arguments, so repeated calls give identical reports.
pub fn evaluate(
    model: &TrainedModel,
    rows: &[&MatchupRecord],
) -> Result<EvaluationReport, PipelineError> {
    let held_out_season = model.window.held_out_season;
    let mut raw = Vec::new();
    let mut calibrated = Vec::new();
    let mut labels = Vec::new();
    for row in rows.iter().filter(|r| r.season == held_out_season) {
        let Some(label) = row.label else {
            continue;
        };
        let (p_raw, p_cal) = model.probabilities(row)?;
        raw.push(p_raw);
        calibrated.push(p_cal);
        labels.push(label);
    }
    if labels.is_empty() {
        return Err(PipelineError::EmptyPartition {
            partition: "held-out",
            held_out: held_out_season,
        });
    }

    let raw_bins = calibration_bins(&raw, &labels, model.calibration_buckets);
    let calibrated_bins = calibration_bins(&calibrated, &labels, model.calibration_buckets);
    Ok(EvaluationReport {
        held_out_season,
        home_win_rate: labels.iter().map(|y| f64::from(*y)).sum::<f64>() / labels.len() as f64,
        raw: evaluate_probs(&raw, &labels),
        calibrated: evaluate_probs(&calibrated, &labels),
        confusion: confusion_matrix(&calibrated, &labels),
        raw_ece: expected_calibration_error(&raw_bins),
        calibrated_ece: expected_calibration_error(&calibrated_bins),
        raw_bins,
        calibrated_bins,
    })
}
