use chrono::{NaiveDate, NaiveDateTime};

use rinkcast::dataset::DatasetBuilder;
use rinkcast::elo::{RatingConfig, RatingEngine};
use rinkcast::error::DataQualityKind;
use rinkcast::features::{FeatureConfig, FeatureEngineer};
use rinkcast::game_log::{GameLogStore, RawGameRow, RawStats};
use rinkcast::team_fixtures::ScheduledGame;
use rinkcast::teams::TeamDirectory;

const TEAMS: [&str; 8] = ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF", "GGG", "HHH"];

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 10, d).unwrap()
}

fn at(d: u32, hour: u32) -> NaiveDateTime {
    day(d).and_hms_opt(hour, 0, 0).unwrap()
}

fn pair(game_id: u64, date: NaiveDate, start: Option<NaiveDateTime>, home: &str, away: &str) -> [RawGameRow; 2] {
    let row = |team: &str, opp: &str, is_home: bool, gf: f64, ga: f64| RawGameRow {
        game_id: Some(game_id),
        team: Some(team.to_string()),
        opponent: Some(opp.to_string()),
        date: Some(date),
        start_time: start,
        is_home: Some(is_home),
        stats: RawStats {
            goals_for: Some(gf),
            goals_against: Some(ga),
            ..RawStats::default()
        },
        result: Some(if gf > ga { "W" } else { "L" }.to_string()),
        ..RawGameRow::default()
    };
    [row(home, away, true, 3.0, 2.0), row(away, home, false, 2.0, 3.0)]
}

/// An opener, then four games on one date ingested in the order untimed,
/// 19:00, 13:00, untimed.
fn slate() -> Vec<RawGameRow> {
    let mut rows = Vec::new();
    rows.extend(pair(1, day(1), Some(at(1, 19)), "AAA", "CCC"));
    rows.extend(pair(30, day(3), None, "BBB", "DDD"));
    rows.extend(pair(10, day(3), Some(at(3, 19)), "AAA", "EEE"));
    rows.extend(pair(20, day(3), Some(at(3, 13)), "CCC", "FFF"));
    rows.extend(pair(40, day(3), None, "GGG", "HHH"));
    rows
}

fn directory() -> TeamDirectory {
    TeamDirectory::from_abbreviations(TEAMS)
}

fn fixture(game_id: u64, date: NaiveDate, start: Option<NaiveDateTime>, home: &str, away: &str) -> ScheduledGame {
    ScheduledGame {
        game_id: Some(game_id),
        date: Some(date),
        start_time: start,
        home: Some(home.to_string()),
        away: Some(away.to_string()),
        ..ScheduledGame::default()
    }
}

#[test]
fn same_date_rows_follow_start_time_then_ingestion_order() {
    let (store, _) = GameLogStore::ingest(slate());
    let (engine, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let features = fe.engineer(&store, &pregame);
    let dir = directory();
    let builder = DatasetBuilder::new(&fe, &dir);
    let season = store.seasons()[0];

    let dataset = builder.build(&store, &pregame, &features, season..=season).unwrap();
    let order: Vec<u64> = dataset.rows.iter().map(|r| r.game_id).collect();
    // Untimed games lead the date in ingestion order; timed ones follow by puck drop.
    assert_eq!(order, vec![1, 30, 40, 20, 10]);

    let fixtures = vec![
        fixture(99, day(6), Some(at(6, 12)), "AAA", "BBB"),
        fixture(130, day(5), None, "BBB", "DDD"),
        fixture(110, day(5), Some(at(5, 19)), "AAA", "EEE"),
        fixture(120, day(5), Some(at(5, 13)), "CCC", "FFF"),
        fixture(140, day(5), None, "GGG", "HHH"),
    ];
    let (upcoming, events) = builder.upcoming(&store, &engine, &fixtures).unwrap();
    assert!(events.is_empty());
    let order: Vec<u64> = upcoming.iter().map(|r| r.game_id).collect();
    assert_eq!(order, vec![130, 140, 120, 110, 99]);
}

#[test]
fn missing_team_vectors_are_reported_per_side() {
    let full = slate();
    // Engineered before the second date was complete: game 10 only has its away
    // record, game 20 only its home record, and games 30 and 40 nothing at all.
    let partial: Vec<RawGameRow> = full
        .iter()
        .filter(|r| match r.game_id {
            Some(1) => true,
            Some(10) => r.is_home == Some(false),
            Some(20) => r.is_home == Some(true),
            _ => false,
        })
        .cloned()
        .collect();

    let (store, _) = GameLogStore::ingest(full);
    let (_, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let (early, _) = GameLogStore::ingest(partial);
    let stale = fe.engineer(&early, &pregame);
    let dir = directory();
    let season = store.seasons()[0];

    let dataset = DatasetBuilder::new(&fe, &dir)
        .build(&store, &pregame, &stale, season..=season)
        .unwrap();
    assert_eq!(dataset.rows.len(), 1);
    assert_eq!(dataset.rows[0].game_id, 1);

    let missing: Vec<(Option<u64>, Option<&str>)> = dataset
        .events
        .iter()
        .filter(|e| e.kind == DataQualityKind::MissingFeatures)
        .map(|e| (e.game_id, e.team.as_deref()))
        .collect();
    assert_eq!(
        missing,
        vec![
            (Some(30), Some("BBB")),
            (Some(40), Some("GGG")),
            (Some(20), Some("FFF")),
            (Some(10), Some("AAA")),
        ]
    );
    assert!(
        !dataset
            .events
            .iter()
            .any(|e| e.kind == DataQualityKind::MissingRating)
    );
}
