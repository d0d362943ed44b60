use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use rinkcast::config::{PipelineConfig, load_config};
use rinkcast::elo::RatingEngine;
use rinkcast::game_log::GameLogStore;
use rinkcast::model::Prediction;
use rinkcast::pipeline::{predict_upcoming, run_pipeline};
use rinkcast::team_fixtures::parse_fixtures_json;
use rinkcast::{historical_dataset, init_logging, persist};

const USAGE: &str = "usage:
  rinkcast train   [--config PATH] [--db PATH] [--held-out SEASON] [--model PATH] [--ratings PATH] [--report PATH]
  rinkcast predict --fixtures PATH [--config PATH] [--db PATH] [--model PATH] [--ratings PATH] [--out PATH]";

fn main() -> Result<()> {
    init_logging();
    let command = std::env::args().nth(1).unwrap_or_default();
    let cfg = load_config(parse_path_arg("--config").as_deref())?;

    match command.as_str() {
        "train" => train(&cfg),
        "predict" => predict(&cfg),
        _ => Err(anyhow!("{USAGE}")),
    }
}

fn train(cfg: &PipelineConfig) -> Result<()> {
    let store = load_store(cfg)?;
    let model_path = parse_path_arg("--model")
        .or_else(persist::default_model_path)
        .context("unable to resolve model path")?;
    let ratings_path = parse_path_arg("--ratings")
        .or_else(persist::default_snapshot_path)
        .context("unable to resolve ratings path")?;

    let cancel = AtomicBool::new(false);
    let output = run_pipeline(&store, cfg, parse_u32_arg("--held-out"), &cancel)?;

    persist::save_model(&model_path, &output.model)?;
    persist::save_rating_snapshot(&ratings_path, &output.ratings)?;
    if let Some(report_path) = parse_path_arg("--report") {
        persist::save_json_atomic(&report_path, &output.evaluation)?;
    }

    let report = &output.evaluation;
    println!("Training complete");
    println!("Model: {}", model_path.display());
    println!("Ratings: {}", ratings_path.display());
    println!(
        "Window: train {:?} | validation {} | held-out {}",
        output.model.window.train_seasons,
        output.model.window.validation_season,
        output.model.window.held_out_season
    );
    println!("Selected C: {}", output.training.selected_c);
    for point in &output.training.grid {
        println!(
            "  C={:<7} log_loss={:.4} acc={:.3} auc={:.3}",
            point.c, point.validation.log_loss, point.validation.accuracy, point.validation.roc_auc
        );
    }
    for warning in &output.training.warnings {
        println!("  warning: {warning}");
    }
    println!(
        "Held-out {} ({} games, home win rate {:.3})",
        report.held_out_season, report.calibrated.samples, report.home_win_rate
    );
    println!(
        "  raw        acc={:.3} log_loss={:.4} brier={:.4} auc={:.3} ece={:.4}",
        report.raw.accuracy, report.raw.log_loss, report.raw.brier, report.raw.roc_auc, report.raw_ece
    );
    println!(
        "  calibrated acc={:.3} log_loss={:.4} brier={:.4} auc={:.3} ece={:.4}",
        report.calibrated.accuracy,
        report.calibrated.log_loss,
        report.calibrated.brier,
        report.calibrated.roc_auc,
        report.calibrated_ece
    );
    if !output.events.is_empty() {
        println!("Data quality events: {}", output.events.len());
    }
    Ok(())
}

fn predict(cfg: &PipelineConfig) -> Result<()> {
    let fixtures_path = parse_path_arg("--fixtures").ok_or_else(|| anyhow!("{USAGE}"))?;
    let model_path = parse_path_arg("--model")
        .or_else(persist::default_model_path)
        .context("unable to resolve model path")?;
    let model = persist::load_model(&model_path)?;
    let store = load_store(cfg)?;
    let engine = current_ratings(cfg, &store)?;

    let raw = std::fs::read_to_string(&fixtures_path)
        .with_context(|| format!("read {}", fixtures_path.display()))?;
    let fixtures = parse_fixtures_json(&raw)?;
    let (predictions, events) = predict_upcoming(&store, &engine, &model, cfg, &fixtures)?;
    for event in &events {
        warn!(%event, "fixture skipped or degraded");
    }

    if let Some(out) = parse_path_arg("--out") {
        persist::save_json_atomic(&out, &predictions)?;
    }
    print_predictions(&predictions);
    Ok(())
}

/// Snapshot plus any games logged after it; a full replay when there is no snapshot.
fn current_ratings(cfg: &PipelineConfig, store: &GameLogStore) -> Result<RatingEngine> {
    let path = parse_path_arg("--ratings").or_else(persist::default_snapshot_path);
    let Some(path) = path.filter(|p| p.exists()) else {
        info!("no rating snapshot; replaying the full log");
        return Ok(RatingEngine::replay(cfg.rating, store).0);
    };
    let mut engine = RatingEngine::from_snapshot(persist::load_rating_snapshot(&path)?);
    let (games, _) = store.paired_games();
    let pregame = engine.process(&games);
    info!(
        snapshot = %path.display(),
        new_games = pregame.len(),
        "resumed ratings from snapshot"
    );
    Ok(engine)
}

fn load_store(cfg: &PipelineConfig) -> Result<GameLogStore> {
    let db_path = parse_path_arg("--db")
        .or_else(|| cfg.db_path.clone())
        .or_else(historical_dataset::default_db_path)
        .context("unable to resolve sqlite path")?;
    let conn = historical_dataset::open_db(&db_path)?;
    let store = historical_dataset::load_store(&conn)?;
    if store.is_empty() {
        return Err(anyhow!(
            "no games in {}; run hist_ingest first",
            db_path.display()
        ));
    }
    Ok(store)
}

fn print_predictions(predictions: &[Prediction]) {
    println!("Predictions: {}", predictions.len());
    for p in predictions {
        println!(
            "{} {:>4} @ {:<4} home {:.3} (raw {:.3}) edge {:.3} {}{}",
            p.date,
            p.away_team,
            p.home_team,
            p.calibrated_probability,
            p.raw_probability,
            p.edge,
            p.band.label(),
            if p.history_sufficient { "" } else { " *thin history" }
        );
    }
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{name}="))
            && !v.trim().is_empty()
        {
            return Some(PathBuf::from(v.trim()));
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn parse_u32_arg(name: &str) -> Option<u32> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<u32>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<u32>()
        {
            return Some(v);
        }
    }
    None
}
