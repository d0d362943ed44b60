use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::info;

use rinkcast::game_log::{GameLogStore, RawGameRow};
use rinkcast::{historical_dataset, init_logging};

#[derive(Deserialize)]
#[serde(untagged)]
enum RowsPayload {
    List(Vec<RawGameRow>),
    Wrapped { rows: Vec<RawGameRow> },
}

fn main() -> Result<()> {
    init_logging();
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let input = first_positional_arg()
        .ok_or_else(|| anyhow!("usage: hist_ingest <rows.json> [--db PATH]"))?;

    let db_path = parse_db_path_arg()
        .or_else(|| {
            std::env::var("RINKCAST_DB")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        })
        .or_else(historical_dataset::default_db_path)
        .context("unable to resolve sqlite path")?;

    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("read {}", input.display()))?;
    let rows = match serde_json::from_str::<RowsPayload>(&raw)
        .with_context(|| format!("parse {}", input.display()))?
    {
        RowsPayload::List(rows) | RowsPayload::Wrapped { rows } => rows,
    };
    let rows_seen = rows.len();
    let (store, events) = GameLogStore::ingest(rows);
    info!(rows_seen, records = store.len(), events = events.len(), "validated rows");

    let mut conn = historical_dataset::open_db(&db_path)?;
    let source = input.display().to_string();
    let summary = historical_dataset::upsert_records(
        &mut conn,
        db_path.clone(),
        &source,
        rows_seen,
        &store,
        events,
    )?;

    println!("Game log ingest complete");
    println!("DB: {}", summary.db_path.display());
    println!("Run: {}", summary.run_id);
    println!(
        "Records upserted: {}/{}",
        summary.records_upserted, summary.rows_seen
    );
    if !summary.events.is_empty() {
        println!("Data quality events: {}", summary.events.len());
        for event in summary.events.iter().take(10) {
            println!("   - {event}");
        }
    }
    Ok(())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn first_positional_arg() -> Option<PathBuf> {
    let mut skip_value = false;
    for arg in std::env::args().skip(1) {
        if skip_value {
            skip_value = false;
            continue;
        }
        if arg == "--db" {
            skip_value = true;
            continue;
        }
        if !arg.starts_with("--") {
            return Some(PathBuf::from(arg));
        }
    }
    None
}
