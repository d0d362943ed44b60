use std::sync::atomic::AtomicBool;

use tracing::{info, warn};

use crate::calibration::IsotonicMap;
use crate::config::PipelineConfig;
use crate::dataset::{Dataset, DatasetBuilder, chronological_split};
use crate::elo::{RatingEngine, RatingSnapshot};
use crate::error::{DataQualityEvent, PipelineError};
use crate::evaluation::{EvaluationReport, evaluate};
use crate::features::FeatureEngineer;
use crate::game_log::{GameLogStore, SeasonId};
use crate::model::{Prediction, TrainedModel};
use crate::team_fixtures::ScheduledGame;
use crate::teams::TeamDirectory;
use crate::trainer::{ModelTrainer, TrainingReport};

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub model: TrainedModel,
    pub training: TrainingReport,
    pub evaluation: EvaluationReport,
    pub ratings: RatingSnapshot,
    pub dataset: Dataset,
    pub events: Vec<DataQualityEvent>,
}

/// The configured directory, or every team in the log when none is configured.
pub fn resolve_directory(cfg: &PipelineConfig, store: &GameLogStore) -> TeamDirectory {
    if !cfg.teams.is_empty() {
        return cfg.teams.clone();
    }
    TeamDirectory::from_abbreviations(store.by_team().into_keys())
}

/// ratings -> features -> dataset -> split -> train -> calibrate -> evaluate.
/// `held_out` defaults to the latest season in the log.
pub fn run_pipeline(
    store: &GameLogStore,
    cfg: &PipelineConfig,
    held_out: Option<SeasonId>,
    cancel: &AtomicBool,
) -> Result<PipelineOutput, PipelineError> {
    let seasons = store.seasons();
    let (Some(&first), Some(&last)) = (seasons.first(), seasons.last()) else {
        return Err(PipelineError::EmptyPartition {
            partition: "game log",
            held_out: held_out.unwrap_or_default(),
        });
    };
    let held_out = held_out.unwrap_or(last);

    let (engine, pregame) = RatingEngine::replay(cfg.rating, store);
    info!(
        games = pregame.len(),
        events = engine.events().len(),
        "ratings replayed"
    );

    let engineer = FeatureEngineer::new(cfg.features.clone(), cfg.rating.baseline)?;
    let features = engineer.engineer(store, &pregame);
    let directory = resolve_directory(cfg, store);
    let builder = DatasetBuilder::new(&engineer, &directory);
    let dataset = builder.build(store, &pregame, &features, first..=held_out)?;

    let split = chronological_split(&dataset.rows, held_out)?;
    info!(
        train = split.train.len(),
        validation = split.validation.len(),
        held_out = split.held_out.len(),
        held_out_season = held_out,
        "chronological split"
    );

    let outcome = ModelTrainer::new(cfg.trainer.clone()).fit(&split, cancel)?;
    for warning in &outcome.report.warnings {
        warn!(%warning, "training warning");
    }

    // Calibration sees only the validation season.
    let (val_raw, val_labels): (Vec<f64>, Vec<u8>) = split
        .validation
        .iter()
        .filter_map(|r| {
            r.label
                .map(|y| (outcome.classifier.predict_proba(&r.values), y))
        })
        .unzip();
    let calibration = IsotonicMap::fit(&val_raw, &val_labels);

    let model = TrainedModel {
        schema: builder.schema().clone(),
        teams: directory.clone(),
        classifier: outcome.classifier,
        regularization_c: outcome.report.selected_c,
        calibration,
        window: split.window.clone(),
        bands: cfg.inference.bands,
        calibration_buckets: cfg.calibration.buckets,
    };
    let evaluation = evaluate(&model, &split.held_out)?;
    info!(
        season = evaluation.held_out_season,
        accuracy = evaluation.calibrated.accuracy,
        log_loss = evaluation.calibrated.log_loss,
        roc_auc = evaluation.calibrated.roc_auc,
        ece = evaluation.calibrated_ece,
        "held-out evaluation"
    );

    // Pairing and outcome problems are seen by both stages; report each once.
    let mut events = dataset.events.clone();
    for event in engine.events() {
        if !events.contains(event) {
            events.push(event.clone());
        }
    }

    Ok(PipelineOutput {
        model,
        training: outcome.report,
        evaluation,
        ratings: engine.snapshot(),
        dataset,
        events,
    })
}

/// Scores scheduled games with a saved model, using the current ratings and log.
/// The model's schema must match what this config would build.
pub fn predict_upcoming(
    store: &GameLogStore,
    engine: &RatingEngine,
    model: &TrainedModel,
    cfg: &PipelineConfig,
    fixtures: &[ScheduledGame],
) -> Result<(Vec<Prediction>, Vec<DataQualityEvent>), PipelineError> {
    let engineer = FeatureEngineer::new(cfg.features.clone(), engine.config().baseline)?;
    let builder = DatasetBuilder::new(&engineer, &model.teams);
    model.schema.ensure_same(builder.schema())?;

    let (rows, events) = builder.upcoming(store, engine, fixtures)?;
    let predictions = rows
        .iter()
        .map(|row| model.predict(row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((predictions, events))
}
