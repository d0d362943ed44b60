use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::game_log::{GameId, SeasonId};

/// A game that has not been played yet, with probable starters when the feed knows them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduledGame {
    pub game_id: Option<GameId>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveDateTime>,
    pub season: Option<SeasonId>,
    pub home: Option<String>,
    pub away: Option<String>,
    pub home_goalie: Option<String>,
    pub away_goalie: Option<String>,
}

impl ScheduledGame {
    pub fn missing_identity(&self) -> Option<&'static str> {
        let blank = |s: &Option<String>| s.as_deref().map(str::trim).is_none_or(str::is_empty);
        if self.game_id.is_none() {
            Some("game_id")
        } else if blank(&self.home) {
            Some("home team")
        } else if blank(&self.away) {
            Some("away team")
        } else if self.date.is_none() {
            Some("date")
        } else {
            None
        }
    }
}

/// Parses a fixtures payload: either a bare array or `{ "games": [...] }`.
pub fn parse_fixtures_json(raw: &str) -> Result<Vec<ScheduledGame>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Payload {
        List(Vec<ScheduledGame>),
        Wrapped { games: Vec<ScheduledGame> },
    }

    let payload: Payload =
        serde_json::from_str(raw.trim()).context("invalid fixtures json")?;
    Ok(match payload {
        Payload::List(games) | Payload::Wrapped { games } => games,
    })
}
