use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use rinkcast::config::load_config;
use rinkcast::dataset::{DatasetBuilder, MatchupRecord};
use rinkcast::elo::RatingEngine;
use rinkcast::evaluation::evaluate;
use rinkcast::features::FeatureEngineer;
use rinkcast::{historical_dataset, init_logging, persist};

/// Re-scores a saved model on its held-out season from the current game log.
fn main() -> Result<()> {
    init_logging();
    let cfg = load_config(parse_path_arg("--config").as_deref())?;
    let model_path = parse_path_arg("--model")
        .or_else(persist::default_model_path)
        .context("unable to resolve model path")?;
    let model = persist::load_model(&model_path)?;

    let db_path = parse_path_arg("--db")
        .or_else(|| cfg.db_path.clone())
        .or_else(historical_dataset::default_db_path)
        .context("unable to resolve sqlite path")?;
    let conn = historical_dataset::open_db(&db_path)?;
    let store = historical_dataset::load_store(&conn)?;

    let (_, pregame) = RatingEngine::replay(cfg.rating, &store);
    let engineer = FeatureEngineer::new(cfg.features.clone(), cfg.rating.baseline)?;
    let features = engineer.engineer(&store, &pregame);
    let builder = DatasetBuilder::new(&engineer, &model.teams);
    model.schema.ensure_same(builder.schema())?;

    let season = model.window.held_out_season;
    let dataset = builder.build(&store, &pregame, &features, season..=season)?;
    dataset.audit()?;
    let rows: Vec<&MatchupRecord> = dataset.rows.iter().collect();
    if rows.is_empty() {
        return Err(anyhow!("no games for held-out season {season}"));
    }
    let report = evaluate(&model, &rows)?;

    if let Some(out) = parse_path_arg("--out") {
        persist::save_json_atomic(&out, &report)?;
    }

    println!("Backtest {} ({} games)", season, report.calibrated.samples);
    println!("Model: {}", model_path.display());
    println!("C={} train seasons {:?}", model.regularization_c, model.window.train_seasons);
    println!(
        "raw        acc={:.3} log_loss={:.4} brier={:.4} auc={:.3}",
        report.raw.accuracy, report.raw.log_loss, report.raw.brier, report.raw.roc_auc
    );
    println!(
        "calibrated acc={:.3} log_loss={:.4} brier={:.4} auc={:.3}",
        report.calibrated.accuracy,
        report.calibrated.log_loss,
        report.calibrated.brier,
        report.calibrated.roc_auc
    );
    println!(
        "confusion  home/home={} home/away={} away/home={} away/away={}",
        report.confusion.home_predicted_home_won,
        report.confusion.home_predicted_away_won,
        report.confusion.away_predicted_home_won,
        report.confusion.away_predicted_away_won
    );
    println!("reliability (calibrated, ece {:.4})", report.calibrated_ece);
    for bin in report.calibrated_bins.iter().filter(|b| b.count > 0) {
        println!(
            "  [{:.1}, {:.1}) n={:<4} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }
    Ok(())
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
