use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DataQualityEvent, DataQualityKind};
use crate::game_log::{GameId, GameLogStore, PairedGame, SeasonId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub baseline: f64,
    pub k_factor: f64,
    pub home_ice_bonus: f64,
    /// Fraction of last season's distance from baseline that survives the off-season.
    pub carryover_fraction: f64,
    pub mov_base: f64,
    pub mov_slope: f64,
    /// Upper bound on the margin-of-victory multiplier.
    pub mov_cap: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            baseline: 1500.0,
            k_factor: 6.0,
            home_ice_bonus: 50.0,
            carryover_fraction: 0.7,
            mov_base: 0.8048,
            mov_slope: 0.6686,
            mov_cap: 2.5,
        }
    }
}

impl RatingConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("baseline", self.baseline),
            ("home_ice_bonus", self.home_ice_bonus),
            ("mov_base", self.mov_base),
            ("mov_slope", self.mov_slope),
            ("mov_cap", self.mov_cap),
        ] {
            if !v.is_finite() {
                return Err(format!("{name} {v} is not finite"));
            }
        }
        if !(0.0..=1.0).contains(&self.carryover_fraction) {
            return Err(format!(
                "carryover_fraction {} outside 0..=1",
                self.carryover_fraction
            ));
        }
        if self.k_factor <= 0.0 || !self.k_factor.is_finite() {
            return Err(format!("k_factor {} must be positive", self.k_factor));
        }
        if self.mov_cap < self.mov_base {
            return Err(format!(
                "mov_cap {} below mov_base {}",
                self.mov_cap, self.mov_base
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub rating: f64,
    pub last_game_id: Option<GameId>,
    pub last_game_date: Option<NaiveDate>,
    pub games: u32,
}

/// `(team, season) -> rating`, nested so it serializes to plain JSON objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStore {
    teams: BTreeMap<String, BTreeMap<SeasonId, TeamRating>>,
}

impl RatingStore {
    pub fn get(&self, team: &str, season: SeasonId) -> Option<&TeamRating> {
        self.teams.get(team)?.get(&season)
    }

    /// Latest entry from a season strictly before `season`.
    pub fn latest_before(&self, team: &str, season: SeasonId) -> Option<(SeasonId, &TeamRating)> {
        self.teams
            .get(team)?
            .range(..season)
            .next_back()
            .map(|(s, r)| (*s, r))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SeasonId, &TeamRating)> {
        self.teams.iter().flat_map(|(team, seasons)| {
            seasons
                .iter()
                .map(move |(season, rating)| (team.as_str(), *season, rating))
        })
    }

    fn insert(&mut self, team: &str, season: SeasonId, rating: TeamRating) {
        self.teams
            .entry(team.to_string())
            .or_default()
            .insert(season, rating);
    }

    fn get_mut(&mut self, team: &str, season: SeasonId) -> Option<&mut TeamRating> {
        self.teams.get_mut(team)?.get_mut(&season)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideRating {
    pub rating: f64,
    /// Date of the game that last moved this rating.
    pub source_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PregameRating {
    pub home_team: String,
    pub away_team: String,
    pub home: SideRating,
    pub away: SideRating,
    pub expected_home: f64,
}

impl PregameRating {
    pub fn rating_diff(&self) -> f64 {
        self.home.rating - self.away.rating
    }
}

/// Pregame snapshot per game, emitted before any postgame update on that date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PregameRatings {
    by_game: BTreeMap<GameId, PregameRating>,
}

impl PregameRatings {
    pub fn get(&self, game_id: GameId) -> Option<&PregameRating> {
        self.by_game.get(&game_id)
    }

    pub fn for_team(&self, game_id: GameId, team: &str) -> Option<SideRating> {
        let p = self.by_game.get(&game_id)?;
        if p.home_team == team {
            Some(p.home)
        } else if p.away_team == team {
            Some(p.away)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.by_game.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_game.is_empty()
    }

    pub fn extend(&mut self, other: PregameRatings) {
        self.by_game.extend(other.by_game);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub config: RatingConfig,
    pub ratings: RatingStore,
    pub last_processed: Option<NaiveDate>,
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}

pub fn carryover(baseline: f64, fraction: f64, previous: f64) -> f64 {
    baseline + fraction * (previous - baseline)
}

pub fn margin_multiplier(cfg: &RatingConfig, margin: f64) -> f64 {
    let margin = margin.max(1.0);
    (cfg.mov_base + cfg.mov_slope * margin.ln()).clamp(0.0, cfg.mov_cap)
}

/// Sequential `(team, season)` rating state machine.
#[derive(Debug, Clone)]
pub struct RatingEngine {
    cfg: RatingConfig,
    store: RatingStore,
    last_processed: Option<NaiveDate>,
    events: Vec<DataQualityEvent>,
}

impl RatingEngine {
    pub fn new(cfg: RatingConfig) -> Self {
        Self {
            cfg,
            store: RatingStore::default(),
            last_processed: None,
            events: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: RatingSnapshot) -> Self {
        Self {
            cfg: snapshot.config,
            store: snapshot.ratings,
            last_processed: snapshot.last_processed,
            events: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> RatingSnapshot {
        RatingSnapshot {
            config: self.cfg,
            ratings: self.store.clone(),
            last_processed: self.last_processed,
        }
    }

    /// Replays the whole log from an empty state.
    pub fn replay(cfg: RatingConfig, store: &GameLogStore) -> (Self, PregameRatings) {
        let mut engine = Self::new(cfg);
        let (games, pairing_events) = store.paired_games();
        engine.events.extend(pairing_events);
        let pregame = engine.process(&games);
        (engine, pregame)
    }

    pub fn config(&self) -> &RatingConfig {
        &self.cfg
    }

    pub fn store(&self) -> &RatingStore {
        &self.store
    }

    pub fn last_processed(&self) -> Option<NaiveDate> {
        self.last_processed
    }

    pub fn events(&self) -> &[DataQualityEvent] {
        &self.events
    }

    /// Current rating for `team` entering `season`, without mutating state.
    pub fn pregame_rating(&self, team: &str, season: SeasonId) -> SideRating {
        if let Some(r) = self.store.get(team, season) {
            return SideRating {
                rating: r.rating,
                source_date: r.last_game_date,
            };
        }
        match self.store.latest_before(team, season) {
            Some((_, prev)) => SideRating {
                rating: carryover(self.cfg.baseline, self.cfg.carryover_fraction, prev.rating),
                source_date: prev.last_game_date,
            },
            None => SideRating {
                rating: self.cfg.baseline,
                source_date: None,
            },
        }
    }

    pub fn expected_home(&self, home_rating: f64, away_rating: f64) -> f64 {
        expected_score(home_rating + self.cfg.home_ice_bonus, away_rating)
    }

    /// Processes games in order. Games dated on or before the last processed date are
    /// skipped, so an engine restored from a snapshot only consumes newer games.
    pub fn process(&mut self, games: &[PairedGame<'_>]) -> PregameRatings {
        let mut out = PregameRatings::default();
        let mut idx = 0usize;
        while idx < games.len() {
            let date = games[idx].date();
            let end = idx + games[idx..].iter().take_while(|g| g.date() == date).count();
            let batch = &games[idx..end];
            idx = end;

            if self.last_processed.is_some_and(|last| date <= last) {
                debug!(%date, games = batch.len(), "skipping already-processed date");
                continue;
            }

            // All pregame values for a date are read before any result on that date applies.
            let mut pending = Vec::with_capacity(batch.len());
            for game in batch {
                self.open_season(&game.home.team, game.season());
                self.open_season(&game.away.team, game.season());
                let home = self.pregame_rating(&game.home.team, game.season());
                let away = self.pregame_rating(&game.away.team, game.season());
                let expected_home = self.expected_home(home.rating, away.rating);
                out.by_game.insert(
                    game.game_id(),
                    PregameRating {
                        home_team: game.home.team.clone(),
                        away_team: game.away.team.clone(),
                        home,
                        away,
                        expected_home,
                    },
                );
                pending.push((game, expected_home));
            }

            for (game, expected_home) in pending {
                self.apply_result(game, expected_home);
            }
            self.last_processed = Some(date);
        }
        out
    }

    fn open_season(&mut self, team: &str, season: SeasonId) {
        if self.store.get(team, season).is_some() {
            return;
        }
        let entry = match self.store.latest_before(team, season) {
            Some((prev_season, prev)) => {
                let rating =
                    carryover(self.cfg.baseline, self.cfg.carryover_fraction, prev.rating);
                debug!(
                    team,
                    from = prev_season,
                    to = season,
                    old = prev.rating,
                    new = rating,
                    "season carryover"
                );
                TeamRating {
                    rating,
                    last_game_id: prev.last_game_id,
                    last_game_date: prev.last_game_date,
                    games: 0,
                }
            }
            None => TeamRating {
                rating: self.cfg.baseline,
                last_game_id: None,
                last_game_date: None,
                games: 0,
            },
        };
        self.store.insert(team, season, entry);
    }

    fn apply_result(&mut self, game: &PairedGame<'_>, expected_home: f64) {
        let Some(home_won) = game.home_won() else {
            let kind = if game.outcome_conflicts() {
                DataQualityKind::ConflictingOutcome
            } else {
                DataQualityKind::MissingOutcome
            };
            let event = DataQualityEvent::new(Some(game.game_id()), Some(game.home.team.as_str()), kind);
            warn!(%event, "skipping postgame rating update");
            self.events.push(event);
            return;
        };

        let actual = if home_won { 1.0 } else { 0.0 };
        let delta = self.cfg.k_factor
            * margin_multiplier(&self.cfg, game.margin())
            * (actual - expected_home);

        let season = game.season();
        for (team, signed) in [(&game.home.team, delta), (&game.away.team, -delta)] {
            if let Some(r) = self.store.get_mut(team, season) {
                r.rating += signed;
                r.last_game_id = Some(game.game_id());
                r.last_game_date = Some(game.date());
                r.games += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{RatingConfig, RatingEngine, carryover, expected_score, margin_multiplier};
    use crate::game_log::{GameLogStore, GameResult, RawStats, TeamGameRecord, Venue};

    fn side(
        seq: usize,
        game_id: u64,
        team: &str,
        opp: &str,
        venue: Venue,
        day: u32,
        goals: (f64, f64),
        result: Option<GameResult>,
    ) -> TeamGameRecord {
        TeamGameRecord {
            seq,
            game_id,
            team: team.to_string(),
            opponent: opp.to_string(),
            date: NaiveDate::from_ymd_opt(2023, 10, day).unwrap(),
            start_time: None,
            season: 20232024,
            venue,
            stats: RawStats {
                goals_for: Some(goals.0),
                goals_against: Some(goals.1),
                ..RawStats::default()
            },
            result,
            starting_goalie: None,
            goalie_toi: Vec::new(),
        }
    }

    fn game(game_id: u64, day: u32, home_goals: f64, away_goals: f64) -> Vec<TeamGameRecord> {
        let home_won = home_goals > away_goals;
        let (hr, ar) = if home_won {
            (GameResult::Win, GameResult::Loss)
        } else {
            (GameResult::Loss, GameResult::Win)
        };
        vec![
            side(
                game_id as usize * 2,
                game_id,
                "TOR",
                "MTL",
                Venue::Home,
                day,
                (home_goals, away_goals),
                Some(hr),
            ),
            side(
                game_id as usize * 2 + 1,
                game_id,
                "MTL",
                "TOR",
                Venue::Away,
                day,
                (away_goals, home_goals),
                Some(ar),
            ),
        ]
    }

    #[test]
    fn expected_score_is_symmetric() {
        assert!((expected_score(1500.0, 1500.0) - 0.5).abs() < 1e-12);
        let a = expected_score(1600.0, 1500.0);
        let b = expected_score(1500.0, 1600.0);
        assert!((a + b - 1.0).abs() < 1e-12);
    }

    #[test]
    fn carryover_regresses_toward_baseline() {
        assert!((carryover(1500.0, 0.5, 1700.0) - 1600.0).abs() < 1e-12);
        assert!((carryover(1500.0, 0.0, 1700.0) - 1500.0).abs() < 1e-12);
    }

    #[test]
    fn margin_multiplier_is_bounded() {
        let cfg = RatingConfig::default();
        assert!(margin_multiplier(&cfg, 1.0) < margin_multiplier(&cfg, 3.0));
        assert!((margin_multiplier(&cfg, 40.0) - cfg.mov_cap).abs() < 1e-12);
        assert!((margin_multiplier(&cfg, 0.0) - cfg.mov_base).abs() < 1e-12);
    }

    #[test]
    fn updates_are_zero_sum() {
        let mut records = game(1, 10, 4.0, 1.0);
        records.extend(game(2, 12, 2.0, 3.0));
        let store = GameLogStore::from_records(records);
        let (engine, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
        let tor = engine.store().get("TOR", 20232024).unwrap();
        let mtl = engine.store().get("MTL", 20232024).unwrap();
        assert!((tor.rating + mtl.rating - 3000.0).abs() < 1e-9);
        assert_eq!(tor.games, 2);

        let first = pregame.get(1).unwrap();
        assert_eq!(first.home.rating, 1500.0);
        assert!(first.expected_home > 0.5);
        let second = pregame.get(2).unwrap();
        assert!(second.home.rating > 1500.0);
        assert_eq!(
            second.home.source_date,
            NaiveDate::from_ymd_opt(2023, 10, 10)
        );
    }

    #[test]
    fn missing_outcome_emits_pregame_but_skips_update() {
        let mut records = game(1, 10, 4.0, 1.0);
        for r in &mut records {
            r.result = None;
        }
        let store = GameLogStore::from_records(records);
        let (engine, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
        assert!(pregame.get(1).is_some());
        assert_eq!(engine.store().get("TOR", 20232024).unwrap().rating, 1500.0);
        assert_eq!(engine.events().len(), 1);
    }
}
