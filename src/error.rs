use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::game_log::{GameId, SeasonId};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "leakage violation: game {game_id} team {team} feature {feature} uses data from {source_date} (game date {game_date})"
    )]
    LeakageViolation {
        game_id: GameId,
        team: String,
        feature: String,
        source_date: NaiveDate,
        game_date: NaiveDate,
    },

    #[error(
        "schema mismatch: expected {expected_hash}, found {found_hash} (missing: {missing:?}, unexpected: {unexpected:?})"
    )]
    SchemaMismatch {
        expected_hash: String,
        found_hash: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error(
        "chronological split overlap: {earlier} ends {earlier_max} but {later} starts {later_min}"
    )]
    SplitOverlap {
        earlier: &'static str,
        earlier_max: NaiveDate,
        later: &'static str,
        later_min: NaiveDate,
    },

    #[error("non-finite value {value} for feature {feature}{}", game_suffix(.game_id))]
    NonFiniteFeature {
        game_id: Option<GameId>,
        feature: String,
        value: f64,
    },

    #[error("empty {partition} partition (held-out season {held_out})")]
    EmptyPartition {
        partition: &'static str,
        held_out: SeasonId,
    },

    #[error("hyperparameter sweep cancelled after {completed} grid points")]
    Cancelled { completed: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn game_suffix(game_id: &Option<GameId>) -> String {
    game_id.map(|id| format!(" in game {id}")).unwrap_or_default()
}

/// A recoverable problem with the raw game log. Collected, logged, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQualityEvent {
    pub game_id: Option<GameId>,
    pub team: Option<String>,
    pub kind: DataQualityKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataQualityKind {
    MissingIdentity { field: &'static str },
    MalformedOutcome { raw: String },
    MissingOutcome,
    ConflictingOutcome,
    DuplicateRecord,
    UnpairedGame { records: usize },
    InconsistentPairing,
    UnknownTeam,
    MissingRating,
    MissingFeatures,
}

impl DataQualityEvent {
    pub fn new(game_id: Option<GameId>, team: Option<&str>, kind: DataQualityKind) -> Self {
        Self {
            game_id,
            team: team.map(|t| t.to_string()),
            kind,
        }
    }
}

impl fmt::Display for DataQualityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let game = self
            .game_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "?".to_string());
        let team = self.team.as_deref().unwrap_or("?");
        match &self.kind {
            DataQualityKind::MissingIdentity { field } => {
                write!(f, "game {game} team {team}: missing {field}")
            }
            DataQualityKind::MalformedOutcome { raw } => {
                write!(f, "game {game} team {team}: malformed outcome {raw:?}")
            }
            DataQualityKind::MissingOutcome => write!(f, "game {game}: outcome missing"),
            DataQualityKind::ConflictingOutcome => {
                write!(f, "game {game}: home and away outcomes disagree")
            }
            DataQualityKind::DuplicateRecord => {
                write!(f, "game {game} team {team}: duplicate record dropped")
            }
            DataQualityKind::UnpairedGame { records } => {
                write!(f, "game {game}: {records} record(s), expected one home and one away")
            }
            DataQualityKind::InconsistentPairing => {
                write!(f, "game {game}: home/away records disagree on teams, date or season")
            }
            DataQualityKind::UnknownTeam => {
                write!(f, "game {game} team {team}: not in team directory")
            }
            DataQualityKind::MissingRating => {
                write!(f, "game {game} team {team}: no pregame rating emitted")
            }
            DataQualityKind::MissingFeatures => {
                write!(f, "game {game} team {team}: no feature vector engineered")
            }
        }
    }
}
