use chrono::{Duration, NaiveDate};

use rinkcast::elo::{RatingConfig, RatingEngine};
use rinkcast::features::{FeatureConfig, FeatureEngineer, GameContext, HistoryGap, RawStat};
use rinkcast::game_log::{GameLogStore, GoalieToi, RawGameRow, RawStats};
use rinkcast::synthetic::{LeagueSpec, generate_league};

fn side(
    game_id: u64,
    date: NaiveDate,
    team: &str,
    opp: &str,
    is_home: bool,
    gf: f64,
    ga: f64,
    goalie: Option<&str>,
) -> RawGameRow {
    RawGameRow {
        game_id: Some(game_id),
        team: Some(team.to_string()),
        opponent: Some(opp.to_string()),
        date: Some(date),
        is_home: Some(is_home),
        stats: RawStats {
            goals_for: Some(gf),
            goals_against: Some(ga),
            xg_against: Some(ga),
            ..RawStats::default()
        },
        result: Some(if gf > ga { "W" } else { "L" }.to_string()),
        starting_goalie: goalie.map(|g| g.to_string()),
        goalie_toi: goalie
            .map(|g| {
                vec![GoalieToi {
                    goalie_id: g.to_string(),
                    toi_seconds: 3600.0,
                }]
            })
            .unwrap_or_default(),
        ..RawGameRow::default()
    }
}

fn tor_home_streak(games: usize) -> Vec<RawGameRow> {
    let start = NaiveDate::from_ymd_opt(2023, 10, 10).unwrap();
    let mut rows = Vec::new();
    for i in 0..games {
        let date = start + Duration::days(2 * i as i64);
        let id = i as u64 + 1;
        let gf = (i + 1) as f64;
        rows.push(side(id, date, "TOR", "MTL", true, gf, 0.0, Some("TOR-1")));
        rows.push(side(id, date, "MTL", "TOR", false, 0.0, gf, Some("MTL-1")));
    }
    rows
}

#[test]
fn rolling_three_on_sixth_game_uses_games_three_to_five() {
    let (store, events) = GameLogStore::ingest(tor_home_streak(6));
    assert!(events.is_empty());
    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let history = store.team_history("TOR");
    let v = fe.vector_for(&history, &GameContext::for_record(history[5], None));
    let s = fe.schema();

    assert_eq!(v.value(s, "gf_r3"), Some(4.0));
    assert_eq!(v.value(s, "gf_r5"), Some(3.0));
    assert_eq!(v.value(s, "gf_std"), Some(3.0));
    assert_eq!(v.value(s, "gf_mom"), Some(0.0));
    assert_eq!(v.value(s, "gf_r10"), Some(3.0));
    assert_eq!(v.value(s, "win_r3"), Some(1.0));
    assert_eq!(v.value(s, "games_played"), Some(5.0));
    assert_eq!(v.value(s, "rest_days"), Some(2.0));
    assert!(v.gaps.contains(&HistoryGap::RollingWindow { window: 10 }));
    assert!(!v.history_sufficient);
    assert_eq!(v.latest_stat_date, Some(history[4].date));
}

#[test]
fn missing_prior_stat_is_skipped_and_flagged() {
    let gf_gap = HistoryGap::MissingStat {
        stat: RawStat::GoalsFor,
    };
    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();

    let (clean, _) = GameLogStore::ingest(tor_home_streak(6));
    let history = clean.team_history("TOR");
    let v = fe.vector_for(&history, &GameContext::for_record(history[5], None));
    assert!(!v.gaps.contains(&gf_gap));

    // Game five loses its goals-for; the others keep 1, 2, 3, 4.
    let mut rows = tor_home_streak(6);
    rows[8].stats.goals_for = None;
    let (store, _) = GameLogStore::ingest(rows);
    let history = store.team_history("TOR");
    let v = fe.vector_for(&history, &GameContext::for_record(history[5], None));
    let s = fe.schema();

    assert_eq!(v.value(s, "gf_std"), Some(2.5));
    assert_eq!(v.value(s, "gf_r3"), Some(3.5));
    assert_eq!(v.value(s, "gf_r5"), Some(2.5));
    assert_eq!(v.value(s, "gf_mom"), Some(1.0));
    assert!(v.gaps.contains(&gf_gap));
    assert!(!v.history_sufficient);
    // Other stats on that game still count.
    assert_eq!(v.value(s, "ga_r3"), Some(0.0));
}

#[test]
fn window_with_no_usable_values_takes_neutral() {
    let mut rows = tor_home_streak(6);
    for i in [4, 6, 8] {
        rows[i].stats.goals_for = Some(f64::NAN);
    }
    let (store, _) = GameLogStore::ingest(rows);
    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let history = store.team_history("TOR");
    let v = fe.vector_for(&history, &GameContext::for_record(history[5], None));
    let s = fe.schema();

    assert_eq!(v.value(s, "gf_r3"), Some(RawStat::GoalsFor.neutral()));
    assert_eq!(v.value(s, "gf_std"), Some(1.5));
    assert_eq!(v.value(s, "gf_mom"), Some(0.0));
    assert!(v.values.iter().all(|x| x.is_finite()));
    assert!(v.gaps.contains(&HistoryGap::MissingStat {
        stat: RawStat::GoalsFor
    }));
}

#[test]
fn first_game_of_season_falls_back_to_defaults() {
    let mut rows = tor_home_streak(3);
    let next_season = NaiveDate::from_ymd_opt(2024, 10, 8).unwrap();
    rows.push(side(99, next_season, "TOR", "MTL", true, 9.0, 1.0, Some("TOR-1")));
    rows.push(side(99, next_season, "MTL", "TOR", false, 1.0, 9.0, Some("MTL-1")));
    let (store, _) = GameLogStore::ingest(rows);

    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let history = store.team_history("TOR");
    let target = history[3];
    assert_eq!(target.season, 20242025);
    let v = fe.vector_for(&history, &GameContext::for_record(target, None));
    let s = fe.schema();
    assert_eq!(v.values, s.defaults());
    assert!(v.gaps.contains(&HistoryGap::SeasonStart));
    assert!(v.gaps.contains(&HistoryGap::NoGoalieHistory));
}

#[test]
fn unknown_starter_marks_goalie_gap() {
    let mut rows = tor_home_streak(4);
    let date = NaiveDate::from_ymd_opt(2023, 10, 30).unwrap();
    rows.push(side(50, date, "TOR", "MTL", true, 2.0, 1.0, None));
    rows.push(side(50, date, "MTL", "TOR", false, 1.0, 2.0, Some("MTL-1")));
    let (store, _) = GameLogStore::ingest(rows);

    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let history = store.team_history("TOR");
    let v = fe.vector_for(&history, &GameContext::for_record(history[4], None));
    assert!(v.gaps.contains(&HistoryGap::UnknownGoalie));
    assert_eq!(v.value(fe.schema(), "goalie_toi_share"), Some(0.0));
    assert_eq!(v.value(fe.schema(), "goalie_xga60_est"), Some(0.0));
}

#[test]
fn engineering_is_deterministic_across_runs() {
    let spec = LeagueSpec {
        seasons: 2,
        game_days: 12,
        missing_stat_rate: 0.05,
        ..LeagueSpec::default()
    };
    let (store, _) = GameLogStore::ingest(generate_league(&spec));
    let (_, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
    let fe = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();

    let a = fe.engineer(&store, &pregame);
    let b = fe.engineer(&store, &pregame);
    assert_eq!(a.len(), store.len());
    assert!(a.iter().eq(b.iter()));
    assert!(a.iter().all(|v| v.values.len() == fe.schema().len()));
}
