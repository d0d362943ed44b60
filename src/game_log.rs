use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DataQualityEvent, DataQualityKind};

pub type GameId = u64;
/// Season identifier in the `20232024` form.
pub type SeasonId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Venue {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    Win,
    Loss,
    OvertimeWin,
    OvertimeLoss,
}

impl GameResult {
    pub fn is_win(self) -> bool {
        matches!(self, GameResult::Win | GameResult::OvertimeWin)
    }

    pub fn is_extra_time(self) -> bool {
        matches!(self, GameResult::OvertimeWin | GameResult::OvertimeLoss)
    }

    pub fn as_code(self) -> &'static str {
        match self {
            GameResult::Win => "W",
            GameResult::Loss => "L",
            GameResult::OvertimeWin => "OTW",
            GameResult::OvertimeLoss => "OTL",
        }
    }

    /// Accepts the common feed spellings; shootouts count as extra time.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "W" | "WIN" | "REG_W" => Some(GameResult::Win),
            "L" | "LOSS" | "REG_L" => Some(GameResult::Loss),
            "OTW" | "SOW" | "OT_W" | "SO_W" => Some(GameResult::OvertimeWin),
            "OTL" | "SOL" | "OT_L" | "SO_L" => Some(GameResult::OvertimeLoss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStats {
    pub goals_for: Option<f64>,
    pub goals_against: Option<f64>,
    pub shots_for: Option<f64>,
    pub shots_against: Option<f64>,
    /// Shot-attempt share in `0..=1`.
    pub possession_share: Option<f64>,
    pub xg_for: Option<f64>,
    pub xg_against: Option<f64>,
    pub faceoff_win_rate: Option<f64>,
    pub pp_opportunities: Option<f64>,
    pub pp_opportunities_against: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalieToi {
    pub goalie_id: String,
    pub toi_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamGameRecord {
    /// Ingestion order; the last-resort ordering key.
    pub seq: usize,
    pub game_id: GameId,
    pub team: String,
    pub opponent: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveDateTime>,
    pub season: SeasonId,
    pub venue: Venue,
    pub stats: RawStats,
    pub result: Option<GameResult>,
    pub starting_goalie: Option<String>,
    #[serde(default)]
    pub goalie_toi: Vec<GoalieToi>,
}

impl TeamGameRecord {
    pub fn is_home(&self) -> bool {
        self.venue == Venue::Home
    }

    fn order_key(&self) -> (NaiveDate, Option<NaiveDateTime>, usize) {
        (self.date, self.start_time, self.seq)
    }
}

/// A row as delivered by the ingest collaborator; every field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawGameRow {
    pub game_id: Option<GameId>,
    pub team: Option<String>,
    pub opponent: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveDateTime>,
    pub season: Option<SeasonId>,
    pub is_home: Option<bool>,
    #[serde(flatten)]
    pub stats: RawStats,
    pub result: Option<String>,
    pub starting_goalie: Option<String>,
    pub goalie_toi: Vec<GoalieToi>,
}

/// Hockey seasons straddle the new year; September onwards belongs to the next one.
pub fn season_for_date(date: NaiveDate) -> SeasonId {
    let year = date.year();
    let start = if date.month() >= 9 { year } else { year - 1 };
    (start as u32) * 10000 + (start as u32 + 1)
}

/// Both team-side records of one game.
#[derive(Debug, Clone, Copy)]
pub struct PairedGame<'a> {
    pub home: &'a TeamGameRecord,
    pub away: &'a TeamGameRecord,
}

impl PairedGame<'_> {
    pub fn game_id(&self) -> GameId {
        self.home.game_id
    }

    pub fn date(&self) -> NaiveDate {
        self.home.date
    }

    pub fn season(&self) -> SeasonId {
        self.home.season
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.home.start_time.or(self.away.start_time)
    }

    pub fn seq(&self) -> usize {
        self.home.seq.min(self.away.seq)
    }

    /// `None` when neither side reports a result or the two sides contradict each other.
    pub fn home_won(&self) -> Option<bool> {
        match (self.home.result, self.away.result) {
            (Some(h), Some(a)) if h.is_win() != a.is_win() => Some(h.is_win()),
            (Some(_), Some(_)) => None,
            (Some(h), None) => Some(h.is_win()),
            (None, Some(a)) => Some(!a.is_win()),
            (None, None) => None,
        }
    }

    pub fn outcome_conflicts(&self) -> bool {
        matches!(
            (self.home.result, self.away.result),
            (Some(h), Some(a)) if h.is_win() == a.is_win()
        )
    }

    /// Final goal margin, at least one (shootout winners are credited a goal).
    pub fn margin(&self) -> f64 {
        let (Some(gf), Some(ga)) = (self.home.stats.goals_for, self.home.stats.goals_against)
        else {
            return 1.0;
        };
        (gf - ga).abs().max(1.0)
    }
}

/// Immutable, chronologically ordered per-team-per-game log.
#[derive(Debug, Clone, Default)]
pub struct GameLogStore {
    records: Vec<TeamGameRecord>,
}

impl GameLogStore {
    pub fn from_records(mut records: Vec<TeamGameRecord>) -> Self {
        records.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Self { records }
    }

    /// Validates raw rows. Rows without a mandatory identity field are dropped, never defaulted.
    pub fn ingest(rows: Vec<RawGameRow>) -> (Self, Vec<DataQualityEvent>) {
        let mut events = Vec::new();
        let mut seen: HashSet<(GameId, String)> = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());

        for (seq, row) in rows.into_iter().enumerate() {
            let team = row.team.as_deref().map(str::trim).filter(|t| !t.is_empty());
            let missing = if row.game_id.is_none() {
                Some("game_id")
            } else if team.is_none() {
                Some("team")
            } else if row
                .opponent
                .as_deref()
                .map(str::trim)
                .is_none_or(|o| o.is_empty())
            {
                Some("opponent")
            } else if row.date.is_none() {
                Some("date")
            } else if row.is_home.is_none() {
                Some("home/away flag")
            } else {
                None
            };
            if let Some(field) = missing {
                events.push(DataQualityEvent::new(
                    row.game_id,
                    team,
                    DataQualityKind::MissingIdentity { field },
                ));
                continue;
            }
            let (Some(game_id), Some(team), Some(opponent), Some(date), Some(is_home)) = (
                row.game_id,
                team.map(|t| t.to_ascii_uppercase()),
                row.opponent.map(|o| o.trim().to_ascii_uppercase()),
                row.date,
                row.is_home,
            ) else {
                continue;
            };

            if !seen.insert((game_id, team.clone())) {
                events.push(DataQualityEvent::new(
                    Some(game_id),
                    Some(team.as_str()),
                    DataQualityKind::DuplicateRecord,
                ));
                continue;
            }

            let result = match row.result.as_deref() {
                None => None,
                Some(raw) => {
                    let parsed = GameResult::parse(raw);
                    if parsed.is_none() {
                        events.push(DataQualityEvent::new(
                            Some(game_id),
                            Some(team.as_str()),
                            DataQualityKind::MalformedOutcome {
                                raw: raw.to_string(),
                            },
                        ));
                    }
                    parsed
                }
            };

            records.push(TeamGameRecord {
                seq,
                game_id,
                team,
                opponent,
                date,
                start_time: row.start_time,
                season: row.season.unwrap_or_else(|| season_for_date(date)),
                venue: if is_home { Venue::Home } else { Venue::Away },
                stats: row.stats,
                result,
                starting_goalie: row
                    .starting_goalie
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty()),
                goalie_toi: row.goalie_toi,
            });
        }

        for event in &events {
            warn!(%event, "dropped or degraded raw row");
        }
        (Self::from_records(records), events)
    }

    pub fn records(&self) -> &[TeamGameRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn seasons(&self) -> Vec<SeasonId> {
        let mut seasons: Vec<SeasonId> = self.records.iter().map(|r| r.season).collect();
        seasons.sort_unstable();
        seasons.dedup();
        seasons
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// Team partitions, each in chronological order.
    pub fn by_team(&self) -> BTreeMap<&str, Vec<&TeamGameRecord>> {
        let mut out: BTreeMap<&str, Vec<&TeamGameRecord>> = BTreeMap::new();
        for r in &self.records {
            out.entry(r.team.as_str()).or_default().push(r);
        }
        out
    }

    pub fn team_history(&self, team: &str) -> Vec<&TeamGameRecord> {
        self.records.iter().filter(|r| r.team == team).collect()
    }

    /// Joins home and away records per game, in chronological order.
    pub fn paired_games(&self) -> (Vec<PairedGame<'_>>, Vec<DataQualityEvent>) {
        let mut by_game: BTreeMap<GameId, Vec<&TeamGameRecord>> = BTreeMap::new();
        for r in &self.records {
            by_game.entry(r.game_id).or_default().push(r);
        }

        let mut events = Vec::new();
        let mut games = Vec::with_capacity(by_game.len());
        for (game_id, sides) in by_game {
            let home = sides.iter().copied().find(|r| r.is_home());
            let away = sides.iter().copied().find(|r| !r.is_home());
            let (Some(home), Some(away)) = (home, away) else {
                events.push(DataQualityEvent::new(
                    Some(game_id),
                    None,
                    DataQualityKind::UnpairedGame {
                        records: sides.len(),
                    },
                ));
                continue;
            };
            if sides.len() != 2 {
                events.push(DataQualityEvent::new(
                    Some(game_id),
                    None,
                    DataQualityKind::UnpairedGame {
                        records: sides.len(),
                    },
                ));
                continue;
            }
            let consistent = home.opponent == away.team
                && away.opponent == home.team
                && home.team != away.team
                && home.date == away.date
                && home.season == away.season;
            if !consistent {
                events.push(DataQualityEvent::new(
                    Some(game_id),
                    Some(home.team.as_str()),
                    DataQualityKind::InconsistentPairing,
                ));
                continue;
            }
            games.push(PairedGame { home, away });
        }

        games.sort_by_key(|g| (g.date(), g.start_time(), g.seq()));
        (games, events)
    }
}
