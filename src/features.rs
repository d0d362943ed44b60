use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::elo::{PregameRatings, SideRating};
use crate::error::PipelineError;
use crate::game_log::{GameId, GameLogStore, SeasonId, TeamGameRecord};
use crate::schema::{FEATURE_SCHEMA_VERSION, FeatureSchema, FieldSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub rolling_windows: Vec<usize>,
    /// Must be one of `rolling_windows`.
    pub momentum_window: usize,
    pub goalie_window: usize,
    pub rest_cap_days: f64,
    pub default_rest_days: f64,
    pub back_to_back_max_rest: i64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rolling_windows: vec![3, 5, 10],
            momentum_window: 5,
            goalie_window: 10,
            rest_cap_days: 10.0,
            default_rest_days: 3.0,
            back_to_back_max_rest: 1,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.rolling_windows.is_empty() || self.rolling_windows.contains(&0) {
            return Err("rolling_windows must be non-empty and positive".to_string());
        }
        let mut sorted = self.rolling_windows.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.rolling_windows.len() {
            return Err("rolling_windows contains duplicates".to_string());
        }
        if !self.rolling_windows.contains(&self.momentum_window) {
            return Err(format!(
                "momentum_window {} is not one of {:?}",
                self.momentum_window, self.rolling_windows
            ));
        }
        if self.goalie_window == 0 {
            return Err("goalie_window must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RawStat {
    GoalsFor,
    GoalsAgainst,
    ShotsFor,
    ShotsAgainst,
    PossessionShare,
    XgFor,
    XgAgainst,
    FaceoffWinRate,
    PpOpportunities,
    PpOpportunitiesAgainst,
    Win,
}

impl RawStat {
    pub const ALL: [RawStat; 11] = [
        RawStat::GoalsFor,
        RawStat::GoalsAgainst,
        RawStat::ShotsFor,
        RawStat::ShotsAgainst,
        RawStat::PossessionShare,
        RawStat::XgFor,
        RawStat::XgAgainst,
        RawStat::FaceoffWinRate,
        RawStat::PpOpportunities,
        RawStat::PpOpportunitiesAgainst,
        RawStat::Win,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RawStat::GoalsFor => "gf",
            RawStat::GoalsAgainst => "ga",
            RawStat::ShotsFor => "sf",
            RawStat::ShotsAgainst => "sa",
            RawStat::PossessionShare => "cf_pct",
            RawStat::XgFor => "xgf",
            RawStat::XgAgainst => "xga",
            RawStat::FaceoffWinRate => "fo_pct",
            RawStat::PpOpportunities => "pp_opp",
            RawStat::PpOpportunitiesAgainst => "pk_opp",
            RawStat::Win => "win",
        }
    }

    /// Neutral league-average stand-in.
    pub fn neutral(self) -> f64 {
        match self {
            RawStat::GoalsFor | RawStat::GoalsAgainst => 3.0,
            RawStat::ShotsFor | RawStat::ShotsAgainst => 30.0,
            RawStat::PossessionShare | RawStat::FaceoffWinRate | RawStat::Win => 0.5,
            RawStat::XgFor | RawStat::XgAgainst => 2.8,
            RawStat::PpOpportunities | RawStat::PpOpportunitiesAgainst => 3.0,
        }
    }

    pub fn extract(self, r: &TeamGameRecord) -> Option<f64> {
        let s = &r.stats;
        let v = match self {
            RawStat::GoalsFor => s.goals_for,
            RawStat::GoalsAgainst => s.goals_against,
            RawStat::ShotsFor => s.shots_for,
            RawStat::ShotsAgainst => s.shots_against,
            RawStat::PossessionShare => s.possession_share,
            RawStat::XgFor => s.xg_for,
            RawStat::XgAgainst => s.xg_against,
            RawStat::FaceoffWinRate => s.faceoff_win_rate,
            RawStat::PpOpportunities => s.pp_opportunities,
            RawStat::PpOpportunitiesAgainst => s.pp_opportunities_against,
            RawStat::Win => r.result.map(|res| if res.is_win() { 1.0 } else { 0.0 }),
        };
        v.filter(|x| x.is_finite())
    }
}

/// Why a vector is not backed by full history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HistoryGap {
    SeasonStart,
    RollingWindow { window: usize },
    MissingStat { stat: RawStat },
    UnknownGoalie,
    NoGoalieHistory,
    MissingRating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub team: String,
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: SeasonId,
    pub schema_hash: String,
    pub values: Vec<f64>,
    pub history_sufficient: bool,
    pub gaps: Vec<HistoryGap>,
    /// Latest game date any stat aggregate consulted.
    pub latest_stat_date: Option<NaiveDate>,
    /// Date of the game that last moved the pregame rating.
    pub rating_source_date: Option<NaiveDate>,
}

impl FeatureVector {
    pub fn value(&self, schema: &FeatureSchema, name: &str) -> Option<f64> {
        if schema.hash() != self.schema_hash {
            return None;
        }
        schema.index_of(name).map(|idx| self.values[idx])
    }
}

/// What is known about a game before it starts.
#[derive(Debug, Clone, Copy)]
pub struct GameContext<'a> {
    pub game_id: GameId,
    pub team: &'a str,
    pub date: NaiveDate,
    pub season: SeasonId,
    pub starting_goalie: Option<&'a str>,
    pub rating: Option<SideRating>,
}

impl<'a> GameContext<'a> {
    pub fn for_record(record: &'a TeamGameRecord, rating: Option<SideRating>) -> Self {
        Self {
            game_id: record.game_id,
            team: &record.team,
            date: record.date,
            season: record.season,
            starting_goalie: record.starting_goalie.as_deref(),
            rating,
        }
    }
}

/// Feature vectors keyed by `(game, team)`.
#[derive(Debug, Clone, Default)]
pub struct TeamFeatures {
    vectors: BTreeMap<(GameId, String), FeatureVector>,
}

impl TeamFeatures {
    pub fn get(&self, game_id: GameId, team: &str) -> Option<&FeatureVector> {
        self.vectors.get(&(game_id, team.to_string()))
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureVector> {
        self.vectors.values()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    cfg: FeatureConfig,
    rating_baseline: f64,
    schema: FeatureSchema,
}

impl FeatureEngineer {
    pub fn new(cfg: FeatureConfig, rating_baseline: f64) -> Result<Self, PipelineError> {
        cfg.validate().map_err(PipelineError::InvalidConfig)?;
        let schema = team_schema(&cfg, rating_baseline);
        Ok(Self {
            cfg,
            rating_baseline,
            schema,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.cfg
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Vectors for every record in the log. Teams are independent partitions and run in
    /// parallel; each team's sequence is folded in order.
    pub fn engineer(&self, store: &GameLogStore, pregame: &PregameRatings) -> TeamFeatures {
        let partitions: Vec<(&str, Vec<&TeamGameRecord>)> = store.by_team().into_iter().collect();
        let per_team: Vec<Vec<FeatureVector>> = partitions
            .par_iter()
            .map(|(team, history)| {
                history
                    .iter()
                    .map(|r| {
                        let ctx = GameContext::for_record(r, pregame.for_team(r.game_id, team));
                        self.vector_for(history, &ctx)
                    })
                    .collect()
            })
            .collect();

        let mut out = TeamFeatures::default();
        for v in per_team.into_iter().flatten() {
            out.vectors.insert((v.game_id, v.team.clone()), v);
        }
        debug!(vectors = out.len(), "engineered team features");
        out
    }

    /// Features for `ctx` from the team's chronologically sorted history. Only records
    /// dated strictly before `ctx.date` are consulted, so the same call serves played and
    /// upcoming games.
    pub fn vector_for(&self, history: &[&TeamGameRecord], ctx: &GameContext<'_>) -> FeatureVector {
        let cut = history.partition_point(|r| r.date < ctx.date);
        let prior = &history[..cut];
        let season_len = prior
            .iter()
            .rev()
            .take_while(|r| r.season == ctx.season)
            .count();
        let season_games = &prior[cut - season_len..];

        let mut gaps = BTreeSet::new();
        let mut values = Vec::with_capacity(self.schema.len());

        if season_games.is_empty() {
            gaps.insert(HistoryGap::SeasonStart);
        }
        for stat in RawStat::ALL {
            let neutral = stat.neutral();
            let to_date = if season_games.is_empty() {
                None
            } else {
                mean_of(season_games, stat, &mut gaps)
            };
            values.push(to_date.unwrap_or(neutral));

            let mut recent = None;
            for &w in &self.cfg.rolling_windows {
                let rolled = if season_games.len() < w {
                    gaps.insert(HistoryGap::RollingWindow { window: w });
                    None
                } else {
                    mean_of(&season_games[season_games.len() - w..], stat, &mut gaps)
                };
                if w == self.cfg.momentum_window {
                    recent = rolled;
                }
                values.push(rolled.unwrap_or(neutral));
            }

            values.push(match (recent, to_date) {
                (Some(r), Some(s)) => r - s,
                _ => 0.0,
            });
        }
        values.push(season_games.len() as f64);

        let rest = season_games.last().map(|prev| {
            ((ctx.date - prev.date).num_days() as f64).min(self.cfg.rest_cap_days)
        });
        values.push(rest.unwrap_or(self.cfg.default_rest_days));
        values.push(
            if rest.is_some_and(|d| d <= self.cfg.back_to_back_max_rest as f64) {
                1.0
            } else {
                0.0
            },
        );
        values.push(games_within(prior, ctx.date, 3));
        values.push(games_within(prior, ctx.date, 6));

        let (share, xga_est) = match ctx.starting_goalie {
            None => {
                gaps.insert(HistoryGap::UnknownGoalie);
                (0.0, 0.0)
            }
            Some(goalie) => {
                let start = season_games.len().saturating_sub(self.cfg.goalie_window);
                match goalie_apportioned_xga(&season_games[start..], goalie, &mut gaps) {
                    Some(v) => v,
                    None => {
                        gaps.insert(HistoryGap::NoGoalieHistory);
                        (0.0, 0.0)
                    }
                }
            }
        };
        values.push(share);
        values.push(xga_est);

        match ctx.rating {
            Some(r) => values.push(r.rating),
            None => {
                gaps.insert(HistoryGap::MissingRating);
                values.push(self.rating_baseline);
            }
        }

        debug_assert_eq!(values.len(), self.schema.len());
        FeatureVector {
            team: ctx.team.to_string(),
            game_id: ctx.game_id,
            date: ctx.date,
            season: ctx.season,
            schema_hash: self.schema.hash().to_string(),
            values,
            history_sufficient: gaps.is_empty(),
            gaps: gaps.into_iter().collect(),
            latest_stat_date: prior.last().map(|r| r.date),
            rating_source_date: ctx.rating.and_then(|r| r.source_date),
        }
    }
}

/// Field layout; `vector_for` pushes values in exactly this order.
pub fn team_schema(cfg: &FeatureConfig, rating_baseline: f64) -> FeatureSchema {
    let mut fields = Vec::new();
    for stat in RawStat::ALL {
        let name = stat.name();
        fields.push(FieldSpec::new(format!("{name}_std"), stat.neutral()));
        for w in &cfg.rolling_windows {
            fields.push(FieldSpec::new(format!("{name}_r{w}"), stat.neutral()));
        }
        fields.push(FieldSpec::new(format!("{name}_mom"), 0.0));
    }
    fields.push(FieldSpec::new("games_played", 0.0));
    fields.push(FieldSpec::new("rest_days", cfg.default_rest_days));
    fields.push(FieldSpec::new("back_to_back", 0.0));
    fields.push(FieldSpec::new("games_last_3d", 0.0));
    fields.push(FieldSpec::new("games_last_6d", 0.0));
    fields.push(FieldSpec::new("goalie_toi_share", 0.0));
    fields.push(FieldSpec::new("goalie_xga60_est", 0.0));
    fields.push(FieldSpec::new("rating_pregame", rating_baseline));
    FeatureSchema::new(FEATURE_SCHEMA_VERSION, fields)
}

fn mean_of(
    games: &[&TeamGameRecord],
    stat: RawStat,
    gaps: &mut BTreeSet<HistoryGap>,
) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut n = 0usize;
    for g in games {
        match stat.extract(g) {
            Some(v) => {
                sum += v;
                n += 1;
            }
            None => {
                gaps.insert(HistoryGap::MissingStat { stat });
            }
        }
    }
    if n == 0 { None } else { Some(sum / n as f64) }
}

fn games_within(prior: &[&TeamGameRecord], date: NaiveDate, days: i64) -> f64 {
    prior
        .iter()
        .rev()
        .take_while(|r| (date - r.date).num_days() <= days)
        .count() as f64
}

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Team xGA per 60 minutes over the window, scaled by the goalie's share of team ice
/// time. Games without a recorded xGA count toward the share but not the rate.
fn goalie_apportioned_xga(
    window: &[&TeamGameRecord],
    goalie: &str,
    gaps: &mut BTreeSet<HistoryGap>,
) -> Option<(f64, f64)> {
    let mut team_toi = 0.0_f64;
    let mut goalie_toi = 0.0_f64;
    let mut xga = 0.0_f64;
    let mut xga_toi = 0.0_f64;
    for game in window {
        let game_toi: f64 = game
            .goalie_toi
            .iter()
            .map(|t| t.toi_seconds.max(0.0))
            .sum();
        if game_toi <= 0.0 {
            continue;
        }
        team_toi += game_toi;
        goalie_toi += game
            .goalie_toi
            .iter()
            .filter(|t| t.goalie_id == goalie)
            .map(|t| t.toi_seconds.max(0.0))
            .sum::<f64>();
        match game.stats.xg_against.filter(|v| v.is_finite()) {
            Some(v) => {
                xga += v;
                xga_toi += game_toi;
            }
            None => {
                gaps.insert(HistoryGap::MissingStat {
                    stat: RawStat::XgAgainst,
                });
            }
        }
    }
    if team_toi <= 0.0 {
        return None;
    }
    let share = goalie_toi / team_toi;
    let per_60 = if xga_toi > 0.0 {
        xga * SECONDS_PER_HOUR / xga_toi
    } else {
        0.0
    };
    Some((share, per_60 * share))
}
