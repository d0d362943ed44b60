//! Seeded league generator for tests and benchmarks.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::game_log::{GameId, GoalieToi, RawGameRow, RawStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// Outcomes are fair coin flips, independent of everything.
    Null,
    /// The team with the higher index always wins.
    DeterministicStrength,
}

#[derive(Debug, Clone)]
pub struct LeagueSpec {
    pub seed: u64,
    /// Rounded down to an even number.
    pub teams: usize,
    pub seasons: u32,
    pub first_season_year: i32,
    /// Game days per season; every team plays once per game day.
    pub game_days: usize,
    pub mode: SignalMode,
    /// Chance that any single stat is dropped from a row.
    pub missing_stat_rate: f64,
}

impl Default for LeagueSpec {
    fn default() -> Self {
        Self {
            seed: 7,
            teams: 12,
            seasons: 6,
            first_season_year: 2015,
            game_days: 30,
            mode: SignalMode::Null,
            missing_stat_rate: 0.0,
        }
    }
}

pub fn team_code(idx: usize) -> String {
    format!("T{idx:02}")
}

pub fn goalie_code(team: usize, slot: usize) -> String {
    format!("T{team:02}-G{slot}")
}

/// Two rows per game. Rows come out in schedule order.
pub fn generate_league(spec: &LeagueSpec) -> Vec<RawGameRow> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let teams = (spec.teams / 2) * 2;
    let mut rows = Vec::with_capacity(spec.seasons as usize * spec.game_days * teams);
    let mut next_id: GameId = 1;

    for s in 0..spec.seasons {
        let year = spec.first_season_year + s as i32;
        let Some(mut date) = NaiveDate::from_ymd_opt(year, 10, 5) else {
            continue;
        };
        for _ in 0..spec.game_days {
            let mut order: Vec<usize> = (0..teams).collect();
            order.shuffle(&mut rng);
            for pair in order.chunks_exact(2) {
                let (home, away) = (pair[0], pair[1]);
                let home_won = match spec.mode {
                    SignalMode::Null => rng.gen_bool(0.5),
                    SignalMode::DeterministicStrength => home > away,
                };
                let (home_row, away_row) = game_rows(&mut rng, spec, next_id, date, home, away, home_won);
                rows.push(home_row);
                rows.push(away_row);
                next_id += 1;
            }
            date += Duration::days(rng.gen_range(1..=3));
        }
    }
    rows
}

fn game_rows(
    rng: &mut StdRng,
    spec: &LeagueSpec,
    game_id: GameId,
    date: NaiveDate,
    home: usize,
    away: usize,
    home_won: bool,
) -> (RawGameRow, RawGameRow) {
    let loser_goals = f64::from(rng.gen_range(0..4u8));
    let margin = f64::from(rng.gen_range(1..4u8));
    let extra_time = margin == 1.0 && rng.gen_bool(0.25);
    let (home_goals, away_goals) = if home_won {
        (loser_goals + margin, loser_goals)
    } else {
        (loser_goals, loser_goals + margin)
    };
    let home_shots = f64::from(rng.gen_range(22..38u8));
    let away_shots = f64::from(rng.gen_range(22..38u8));
    let home_share = rng.gen_range(0.40..0.60);
    let home_faceoffs = rng.gen_range(0.42..0.58);
    let home_pp = f64::from(rng.gen_range(1..6u8));
    let away_pp = f64::from(rng.gen_range(1..6u8));
    let home_xg = (home_goals * 0.7 + rng.gen_range(0.3..1.2_f64)).max(0.1);
    let away_xg = (away_goals * 0.7 + rng.gen_range(0.3..1.2_f64)).max(0.1);
    let start = date.and_hms_opt(19, 0, 0);

    let mut side = |team: usize, opp: usize, is_home: bool, won: bool| {
        let (gf, ga, sf, sa, share, fo, ppf, ppa, xgf, xga) = if is_home {
            (
                home_goals, away_goals, home_shots, away_shots, home_share, home_faceoffs,
                home_pp, away_pp, home_xg, away_xg,
            )
        } else {
            (
                away_goals, home_goals, away_shots, home_shots, 1.0 - home_share,
                1.0 - home_faceoffs, away_pp, home_pp, away_xg, home_xg,
            )
        };
        let mut keep = |v: f64| (!rng.gen_bool(spec.missing_stat_rate)).then_some(v);
        let stats = RawStats {
            goals_for: keep(gf),
            goals_against: keep(ga),
            shots_for: keep(sf),
            shots_against: keep(sa),
            possession_share: keep(share),
            xg_for: keep(xgf),
            xg_against: keep(xga),
            faceoff_win_rate: keep(fo),
            pp_opportunities: keep(ppf),
            pp_opportunities_against: keep(ppa),
        };
        let starter_slot = if rng.gen_bool(0.7) { 1 } else { 2 };
        let starter = goalie_code(team, starter_slot);
        let goalie_toi = if rng.gen_bool(0.1) {
            vec![
                GoalieToi {
                    goalie_id: starter.clone(),
                    toi_seconds: 2400.0,
                },
                GoalieToi {
                    goalie_id: goalie_code(team, 3 - starter_slot),
                    toi_seconds: 1200.0,
                },
            ]
        } else {
            vec![GoalieToi {
                goalie_id: starter.clone(),
                toi_seconds: 3600.0,
            }]
        };
        let result = match (won, extra_time) {
            (true, false) => "W",
            (true, true) => "OTW",
            (false, false) => "L",
            (false, true) => "OTL",
        };
        RawGameRow {
            game_id: Some(game_id),
            team: Some(team_code(team)),
            opponent: Some(team_code(opp)),
            date: Some(date),
            start_time: start,
            season: None,
            is_home: Some(is_home),
            stats,
            result: Some(result.to_string()),
            starting_goalie: Some(starter),
            goalie_toi,
        }
    };

    let home_row = side(home, away, true, home_won);
    let away_row = side(away, home, false, !home_won);
    (home_row, away_row)
}
