use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use chrono::Duration;

use rinkcast::config::PipelineConfig;
use rinkcast::dataset::{MatchupRecord, chronological_split};
use rinkcast::elo::RatingEngine;
use rinkcast::error::{DataQualityKind, PipelineError};
use rinkcast::evaluation::evaluate;
use rinkcast::features::FeatureConfig;
use rinkcast::game_log::GameLogStore;
use rinkcast::pipeline::{PipelineOutput, predict_upcoming, run_pipeline};
use rinkcast::synthetic::{LeagueSpec, SignalMode, generate_league, team_code};
use rinkcast::team_fixtures::ScheduledGame;
use rinkcast::trainer::TrainingWarning;

fn small_league(mode: SignalMode) -> GameLogStore {
    let spec = LeagueSpec {
        seed: 3,
        teams: 8,
        seasons: 4,
        game_days: 20,
        mode,
        ..LeagueSpec::default()
    };
    GameLogStore::ingest(generate_league(&spec)).0
}

fn train(store: &GameLogStore, cfg: &PipelineConfig) -> PipelineOutput {
    run_pipeline(store, cfg, None, &AtomicBool::new(false)).unwrap()
}

#[test]
fn null_signal_stays_near_chance() {
    let spec = LeagueSpec {
        seed: 21,
        teams: 16,
        seasons: 10,
        game_days: 40,
        mode: SignalMode::Null,
        ..LeagueSpec::default()
    };
    let (store, _) = GameLogStore::ingest(generate_league(&spec));
    let out = train(&store, &PipelineConfig::default());

    let report = &out.evaluation;
    assert_eq!(report.raw.samples, 8 * 40);
    assert!(
        (0.40..=0.60).contains(&report.raw.accuracy),
        "raw accuracy {}",
        report.raw.accuracy
    );
    assert!(
        (0.40..=0.60).contains(&report.calibrated.accuracy),
        "calibrated accuracy {}",
        report.calibrated.accuracy
    );
    assert!(report.raw.roc_auc < 0.62);
}

#[test]
fn deterministic_signal_is_learned() {
    let spec = LeagueSpec {
        seed: 5,
        teams: 12,
        seasons: 6,
        game_days: 30,
        mode: SignalMode::DeterministicStrength,
        ..LeagueSpec::default()
    };
    let (store, _) = GameLogStore::ingest(generate_league(&spec));
    let out = train(&store, &PipelineConfig::default());

    let report = &out.evaluation;
    assert!(report.raw.accuracy > 0.9, "raw accuracy {}", report.raw.accuracy);
    assert!(
        report.calibrated.accuracy > 0.85,
        "calibrated accuracy {}",
        report.calibrated.accuracy
    );
    assert!(report.raw.roc_auc > 0.93);
}

#[test]
fn partitions_are_strictly_ordered() {
    let store = small_league(SignalMode::Null);
    let out = train(&store, &PipelineConfig::default());
    let split = chronological_split(&out.dataset.rows, out.model.window.held_out_season).unwrap();

    let max = |rows: &[&MatchupRecord]| rows.iter().map(|r| r.date).max();
    let min = |rows: &[&MatchupRecord]| rows.iter().map(|r| r.date).min();
    assert!(max(&split.train) < min(&split.validation));
    assert!(max(&split.validation) < min(&split.held_out));

    let window = &out.model.window;
    let seasons = store.seasons();
    assert_eq!(window.held_out_season, seasons[3]);
    assert_eq!(window.validation_season, seasons[2]);
    assert_eq!(window.train_seasons, seasons[..2].to_vec());
    assert_eq!(out.training.validation_rows, split.validation.len());
}

#[test]
fn evaluation_is_reproducible() {
    let store = small_league(SignalMode::DeterministicStrength);
    let out = train(&store, &PipelineConfig::default());
    let split = chronological_split(&out.dataset.rows, out.model.window.held_out_season).unwrap();

    let first = evaluate(&out.model, &split.held_out).unwrap();
    let second = evaluate(&out.model, &split.held_out).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, out.evaluation);
    assert_eq!(out.evaluation.confusion.total(), out.evaluation.raw.samples);
}

#[test]
fn training_is_deterministic() {
    let store = small_league(SignalMode::Null);
    let a = train(&store, &PipelineConfig::default());
    let b = train(&store, &PipelineConfig::default());
    assert_eq!(a.model.classifier, b.model.classifier);
    assert_eq!(a.training, b.training);
    assert_eq!(a.ratings, b.ratings);
}

#[test]
fn cancelled_sweep_returns_nothing() {
    let store = small_league(SignalMode::Null);
    let cancel = AtomicBool::new(true);
    let err = run_pipeline(&store, &PipelineConfig::default(), None, &cancel).unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { completed: 0 }));
}

#[test]
fn small_validation_falls_back_to_default_c() {
    let store = small_league(SignalMode::Null);
    let mut cfg = PipelineConfig::default();
    cfg.trainer.min_validation_rows = 1_000_000;
    cfg.trainer.default_c = 0.5;
    let out = train(&store, &cfg);

    assert!(out.training.grid.is_empty());
    assert_eq!(out.training.selected_c, 0.5);
    assert_eq!(out.model.regularization_c, 0.5);
    assert!(
        out.training
            .warnings
            .iter()
            .any(|w| matches!(w, TrainingWarning::SmallValidation { fallback_c, .. } if *fallback_c == 0.5))
    );
}

#[test]
fn grid_selection_picks_lowest_validation_log_loss() {
    let store = small_league(SignalMode::DeterministicStrength);
    let out = train(&store, &PipelineConfig::default());
    let grid = &out.training.grid;
    assert_eq!(grid.len(), PipelineConfig::default().trainer.c_grid.len());
    let selected = grid
        .iter()
        .find(|p| p.c == out.training.selected_c)
        .unwrap();
    let resolution = PipelineConfig::default().trainer.selection_resolution;
    for point in grid {
        assert!(selected.validation.log_loss <= point.validation.log_loss + resolution);
    }
}

#[test]
fn held_out_season_must_exist() {
    let store = small_league(SignalMode::Null);
    let err = run_pipeline(
        &store,
        &PipelineConfig::default(),
        Some(20502051),
        &AtomicBool::new(false),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::EmptyPartition {
            partition: "held-out",
            held_out: 20502051
        }
    ));
}

#[test]
fn mismatched_feature_config_is_rejected_at_inference() {
    let store = small_league(SignalMode::Null);
    let cfg = PipelineConfig::default();
    let out = train(&store, &cfg);
    let engine = RatingEngine::from_snapshot(out.ratings.clone());

    let mut narrower = cfg.clone();
    narrower.features = FeatureConfig {
        rolling_windows: vec![3, 5],
        ..FeatureConfig::default()
    };
    let fixture = ScheduledGame {
        game_id: Some(900_001),
        date: store.latest_date().map(|d| d + Duration::days(2)),
        home: Some(team_code(0)),
        away: Some(team_code(1)),
        ..ScheduledGame::default()
    };
    let err = predict_upcoming(&store, &engine, &out.model, &narrower, &[fixture]).unwrap_err();
    match err {
        PipelineError::SchemaMismatch {
            missing, unexpected, ..
        } => {
            assert!(missing.iter().any(|name| name.contains("r10")));
            assert!(unexpected.is_empty());
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
}

#[test]
fn tampered_rows_and_named_fields_are_rejected() {
    let store = small_league(SignalMode::Null);
    let out = train(&store, &PipelineConfig::default());
    let model = &out.model;

    let mut row = out.dataset.rows[0].clone();
    assert!(model.predict(&row).is_ok());
    row.schema_hash = "0000".to_string();
    assert!(matches!(model.predict(&row), Err(PipelineError::SchemaMismatch { .. })));

    let mut row = out.dataset.rows[0].clone();
    row.values.pop();
    assert!(matches!(model.predict(&row), Err(PipelineError::SchemaMismatch { .. })));

    let mut fields: BTreeMap<String, f64> =
        model.schema.names().map(|n| (n.to_string(), 0.0)).collect();
    let (raw, calibrated) = model.score_named(&fields).unwrap();
    assert!((0.0..=1.0).contains(&raw));
    assert!((0.005..=0.995).contains(&calibrated));

    let dropped = model.schema.names().next().unwrap().to_string();
    fields.remove(&dropped);
    fields.insert("rink_altitude".to_string(), 1.0);
    match model.score_named(&fields) {
        Err(PipelineError::SchemaMismatch {
            missing, unexpected, ..
        }) => {
            assert_eq!(missing, vec![dropped]);
            assert_eq!(unexpected, vec!["rink_altitude".to_string()]);
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
}

#[test]
fn non_finite_inputs_are_rejected_with_field_name() {
    let store = small_league(SignalMode::Null);
    let out = train(&store, &PipelineConfig::default());
    let model = &out.model;

    let target = model.schema.names().nth(1).unwrap().to_string();
    let mut fields: BTreeMap<String, f64> =
        model.schema.names().map(|n| (n.to_string(), 0.0)).collect();
    fields.insert(target.clone(), f64::NAN);
    match model.score_named(&fields) {
        Err(PipelineError::NonFiniteFeature {
            game_id, feature, ..
        }) => {
            assert_eq!(game_id, None);
            assert_eq!(feature, target);
        }
        other => panic!("expected non-finite feature, got {other:?}"),
    }
    fields.insert(target.clone(), f64::NEG_INFINITY);
    assert!(matches!(
        model.score_named(&fields),
        Err(PipelineError::NonFiniteFeature { .. })
    ));

    let mut row = out.dataset.rows[0].clone();
    row.values[0] = f64::NAN;
    let first = model.schema.names().next().unwrap().to_string();
    match model.predict(&row) {
        Err(PipelineError::NonFiniteFeature {
            game_id, feature, ..
        }) => {
            assert_eq!(game_id, Some(row.game_id));
            assert_eq!(feature, first);
        }
        other => panic!("expected non-finite feature, got {other:?}"),
    }
}

#[test]
fn upcoming_games_are_scored_and_bad_fixtures_reported() {
    let store = small_league(SignalMode::DeterministicStrength);
    let cfg = PipelineConfig::default();
    let out = train(&store, &cfg);
    let engine = RatingEngine::from_snapshot(out.ratings.clone());
    let next = store.latest_date().map(|d| d + Duration::days(1));

    let fixtures = vec![
        ScheduledGame {
            game_id: Some(900_002),
            date: next,
            home: Some(team_code(7)),
            away: Some(team_code(0)),
            ..ScheduledGame::default()
        },
        ScheduledGame {
            game_id: Some(900_001),
            date: next,
            home: Some(team_code(0)),
            away: Some(team_code(7)),
            ..ScheduledGame::default()
        },
        ScheduledGame {
            game_id: Some(900_003),
            date: next,
            home: None,
            away: Some(team_code(3)),
            ..ScheduledGame::default()
        },
    ];
    let (predictions, events) = predict_upcoming(&store, &engine, &out.model, &cfg, &fixtures).unwrap();

    assert_eq!(predictions.len(), 2);
    let strong_home = predictions.iter().find(|p| p.game_id == 900_002).unwrap();
    let weak_home = predictions.iter().find(|p| p.game_id == 900_001).unwrap();
    assert!(strong_home.calibrated_probability > 0.5);
    assert!(weak_home.calibrated_probability < 0.5);
    assert!(strong_home.raw_probability > weak_home.raw_probability);
    assert_eq!(strong_home.edge, (strong_home.raw_probability - 0.5).abs());
    assert_eq!(strong_home.band, out.model.bands.band(strong_home.edge));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].game_id, Some(900_003));
    assert_eq!(
        events[0].kind,
        DataQualityKind::MissingIdentity { field: "home team" }
    );

    // Scoring does not touch the engine.
    assert_eq!(engine.snapshot(), out.ratings);
}
