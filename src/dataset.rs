use std::ops::RangeInclusive;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::elo::{PregameRatings, RatingEngine};
use crate::error::{DataQualityEvent, DataQualityKind, PipelineError};
use crate::features::{FeatureEngineer, FeatureVector, GameContext, TeamFeatures};
use crate::game_log::{GameId, GameLogStore, SeasonId, season_for_date};
use crate::schema::{FeatureSchema, FieldSpec};
use crate::team_fixtures::ScheduledGame;
use crate::teams::TeamDirectory;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchupRecord {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: SeasonId,
    pub start_time: Option<NaiveDateTime>,
    pub seq: usize,
    pub home_team: String,
    pub away_team: String,
    pub home: FeatureVector,
    pub away: FeatureVector,
    pub expected_home: f64,
    pub schema_hash: String,
    /// Differentials, then rating expectation, then identity indicators.
    pub values: Vec<f64>,
    /// 1 when the home team won, extra time included. `None` for unplayed games.
    pub label: Option<u8>,
}

impl MatchupRecord {
    pub fn history_sufficient(&self) -> bool {
        self.home.history_sufficient && self.away.history_sufficient
    }

    pub fn value(&self, schema: &FeatureSchema, name: &str) -> Option<f64> {
        if schema.hash() != self.schema_hash {
            return None;
        }
        schema.index_of(name).map(|idx| self.values[idx])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMeta {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: SeasonId,
    pub home_team: String,
    pub away_team: String,
}

/// Dense training matrix with per-row traceability.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub schema_hash: String,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<u8>,
    pub meta: Vec<RowMeta>,
}

impl FeatureMatrix {
    /// Labeled rows only.
    pub fn from_rows<'a>(
        schema: &FeatureSchema,
        rows: impl IntoIterator<Item = &'a MatchupRecord>,
    ) -> Self {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut meta = Vec::new();
        for row in rows {
            let Some(label) = row.label else {
                continue;
            };
            x.push(row.values.clone());
            y.push(label);
            meta.push(RowMeta {
                game_id: row.game_id,
                date: row.date,
                season: row.season,
                home_team: row.home_team.clone(),
                away_team: row.away_team.clone(),
            });
        }
        Self {
            names: schema.names().map(|n| n.to_string()).collect(),
            schema_hash: schema.hash().to_string(),
            x,
            y,
            meta,
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub schema: FeatureSchema,
    pub rows: Vec<MatchupRecord>,
    pub events: Vec<DataQualityEvent>,
}

impl Dataset {
    pub fn matrix(&self) -> FeatureMatrix {
        FeatureMatrix::from_rows(&self.schema, &self.rows)
    }

    pub fn seasons(&self) -> Vec<SeasonId> {
        let mut seasons: Vec<SeasonId> = self.rows.iter().map(|r| r.season).collect();
        seasons.sort_unstable();
        seasons.dedup();
        seasons
    }

    /// Re-checks the leakage invariant over every row.
    pub fn audit(&self) -> Result<(), PipelineError> {
        for row in &self.rows {
            audit_vector(&row.home, row.date)?;
            audit_vector(&row.away, row.date)?;
        }
        Ok(())
    }
}

/// Matchup layout: one differential per team field, the rating expectation, then one
/// indicator per directory team for each side.
pub fn matchup_schema(team: &FeatureSchema, directory: &TeamDirectory) -> FeatureSchema {
    let mut fields: Vec<FieldSpec> = team
        .fields()
        .iter()
        .map(|f| FieldSpec::new(format!("diff_{}", f.name), 0.0))
        .collect();
    fields.push(FieldSpec::new("rating_expected_home", 0.5));
    for abbr in directory.abbreviations() {
        fields.push(FieldSpec::new(format!("home_{abbr}"), 0.0));
    }
    for abbr in directory.abbreviations() {
        fields.push(FieldSpec::new(format!("away_{abbr}"), 0.0));
    }
    FeatureSchema::new(team.version(), fields)
}

pub fn audit_vector(v: &FeatureVector, game_date: NaiveDate) -> Result<(), PipelineError> {
    let checks = [
        ("team stat aggregates", v.latest_stat_date),
        ("rating_pregame", v.rating_source_date),
    ];
    for (feature, source) in checks {
        if let Some(source_date) = source
            && source_date >= game_date
        {
            return Err(PipelineError::LeakageViolation {
                game_id: v.game_id,
                team: v.team.clone(),
                feature: feature.to_string(),
                source_date,
                game_date,
            });
        }
    }
    Ok(())
}

pub struct DatasetBuilder<'a> {
    engineer: &'a FeatureEngineer,
    directory: &'a TeamDirectory,
    schema: FeatureSchema,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(engineer: &'a FeatureEngineer, directory: &'a TeamDirectory) -> Self {
        let schema = matchup_schema(engineer.schema(), directory);
        Self {
            engineer,
            directory,
            schema,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// One row per fully identified game whose season falls in `seasons`.
    pub fn build(
        &self,
        store: &GameLogStore,
        pregame: &PregameRatings,
        features: &TeamFeatures,
        seasons: RangeInclusive<SeasonId>,
    ) -> Result<Dataset, PipelineError> {
        let (games, mut events) = store.paired_games();
        let mut rows = Vec::new();

        for game in games.iter().filter(|g| seasons.contains(&g.season())) {
            let game_id = game.game_id();
            let (home, away) = match (
                features.get(game_id, &game.home.team),
                features.get(game_id, &game.away.team),
            ) {
                (Some(home), Some(away)) => (home, away),
                (home, _) => {
                    let team = if home.is_none() {
                        &game.home.team
                    } else {
                        &game.away.team
                    };
                    events.push(DataQualityEvent::new(
                        Some(game_id),
                        Some(team.as_str()),
                        DataQualityKind::MissingFeatures,
                    ));
                    continue;
                }
            };
            let expected_home = match pregame.get(game_id) {
                Some(p) => p.expected_home,
                None => {
                    events.push(DataQualityEvent::new(
                        Some(game_id),
                        Some(game.home.team.as_str()),
                        DataQualityKind::MissingRating,
                    ));
                    0.5
                }
            };
            if game.home_won().is_none() {
                let kind = if game.outcome_conflicts() {
                    DataQualityKind::ConflictingOutcome
                } else {
                    DataQualityKind::MissingOutcome
                };
                events.push(DataQualityEvent::new(Some(game_id), None, kind));
            }

            let row = self.assemble(
                RowHeader {
                    game_id,
                    date: game.date(),
                    season: game.season(),
                    start_time: game.start_time(),
                    seq: game.seq(),
                },
                home.clone(),
                away.clone(),
                expected_home,
                game.home_won().map(u8::from),
                &mut events,
            )?;
            rows.push(row);
        }

        let labeled = rows.iter().filter(|r| r.label.is_some()).count();
        info!(
            rows = rows.len(),
            labeled,
            events = events.len(),
            "built matchup dataset"
        );
        Ok(Dataset {
            schema: self.schema.clone(),
            rows,
            events,
        })
    }

    /// Unlabeled rows for scheduled games, through the same feature path as history.
    pub fn upcoming(
        &self,
        store: &GameLogStore,
        engine: &RatingEngine,
        fixtures: &[ScheduledGame],
    ) -> Result<(Vec<MatchupRecord>, Vec<DataQualityEvent>), PipelineError> {
        let mut events = Vec::new();
        let mut rows = Vec::new();

        for (idx, fixture) in fixtures.iter().enumerate() {
            if let Some(field) = fixture.missing_identity() {
                events.push(DataQualityEvent::new(
                    fixture.game_id,
                    fixture.home.as_deref(),
                    DataQualityKind::MissingIdentity { field },
                ));
                continue;
            }
            let (Some(game_id), Some(date), Some(home_raw), Some(away_raw)) = (
                fixture.game_id,
                fixture.date,
                fixture.home.as_deref(),
                fixture.away.as_deref(),
            ) else {
                continue;
            };
            let home_team = self.canonical_team(home_raw);
            let away_team = self.canonical_team(away_raw);
            let season = fixture.season.unwrap_or_else(|| season_for_date(date));

            let side = |team: &str, goalie: Option<&str>| {
                let history = store.team_history(team);
                let ctx = GameContext {
                    game_id,
                    team,
                    date,
                    season,
                    starting_goalie: goalie,
                    rating: Some(engine.pregame_rating(team, season)),
                };
                self.engineer.vector_for(&history, &ctx)
            };
            let home = side(&home_team, fixture.home_goalie.as_deref());
            let away = side(&away_team, fixture.away_goalie.as_deref());
            let expected_home = engine.expected_home(
                engine.pregame_rating(&home_team, season).rating,
                engine.pregame_rating(&away_team, season).rating,
            );

            let row = self.assemble(
                RowHeader {
                    game_id,
                    date,
                    season,
                    start_time: fixture.start_time,
                    seq: idx,
                },
                home,
                away,
                expected_home,
                None,
                &mut events,
            )?;
            rows.push(row);
        }

        rows.sort_by_key(|r| (r.date, r.start_time, r.seq));
        Ok((rows, events))
    }

    fn canonical_team(&self, raw: &str) -> String {
        self.directory
            .resolve(raw)
            .map(|s| s.to_string())
            .unwrap_or_else(|| raw.trim().to_ascii_uppercase())
    }

    fn assemble(
        &self,
        header: RowHeader,
        home: FeatureVector,
        away: FeatureVector,
        expected_home: f64,
        label: Option<u8>,
        events: &mut Vec<DataQualityEvent>,
    ) -> Result<MatchupRecord, PipelineError> {
        let team_schema = self.engineer.schema();
        for v in [&home, &away] {
            if v.schema_hash != team_schema.hash() || v.values.len() != team_schema.len() {
                return Err(team_schema.mismatch(&v.schema_hash, std::iter::empty()));
            }
            audit_vector(v, header.date)?;
        }

        let teams = self.directory.len();
        let mut values = Vec::with_capacity(self.schema.len());
        values.extend(home.values.iter().zip(&away.values).map(|(h, a)| h - a));
        values.push(expected_home);
        let mut identity = vec![0.0; teams * 2];
        for (offset, team) in [(0usize, &home.team), (teams, &away.team)] {
            match self.directory.position(team) {
                Some(pos) => identity[offset + pos] = 1.0,
                None if teams > 0 => {
                    let event = DataQualityEvent::new(
                        Some(header.game_id),
                        Some(team.as_str()),
                        DataQualityKind::UnknownTeam,
                    );
                    warn!(%event, "identity indicators left at zero");
                    events.push(event);
                }
                None => {}
            }
        }
        values.extend(identity);
        debug_assert_eq!(values.len(), self.schema.len());

        Ok(MatchupRecord {
            game_id: header.game_id,
            date: header.date,
            season: header.season,
            start_time: header.start_time,
            seq: header.seq,
            home_team: home.team.clone(),
            away_team: away.team.clone(),
            home,
            away,
            expected_home,
            schema_hash: self.schema.hash().to_string(),
            values,
            label,
        })
    }
}

struct RowHeader {
    game_id: GameId,
    date: NaiveDate,
    season: SeasonId,
    start_time: Option<NaiveDateTime>,
    seq: usize,
}

/// Which seasons fed which partition of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub train_seasons: Vec<SeasonId>,
    pub validation_season: SeasonId,
    pub held_out_season: SeasonId,
}

#[derive(Debug, Clone)]
pub struct ChronologicalSplit<'a> {
    pub window: TrainingWindow,
    pub train: Vec<&'a MatchupRecord>,
    pub validation: Vec<&'a MatchupRecord>,
    pub held_out: Vec<&'a MatchupRecord>,
}

/// Held-out is `held_out`, validation the season right before it, training everything
/// older. Only labeled rows take part. Partitions must not overlap in time.
pub fn chronological_split(
    rows: &[MatchupRecord],
    held_out: SeasonId,
) -> Result<ChronologicalSplit<'_>, PipelineError> {
    let labeled: Vec<&MatchupRecord> = rows.iter().filter(|r| r.label.is_some()).collect();
    let mut seasons: Vec<SeasonId> = labeled.iter().map(|r| r.season).collect();
    seasons.sort_unstable();
    seasons.dedup();

    if !seasons.contains(&held_out) {
        return Err(PipelineError::EmptyPartition {
            partition: "held-out",
            held_out,
        });
    }
    let Some(&validation_season) = seasons.iter().rev().find(|s| **s < held_out) else {
        return Err(PipelineError::EmptyPartition {
            partition: "validation",
            held_out,
        });
    };
    let train_seasons: Vec<SeasonId> = seasons
        .iter()
        .copied()
        .filter(|s| *s < validation_season)
        .collect();
    if train_seasons.is_empty() {
        return Err(PipelineError::EmptyPartition {
            partition: "training",
            held_out,
        });
    }

    let train: Vec<&MatchupRecord> = labeled
        .iter()
        .copied()
        .filter(|r| r.season < validation_season)
        .collect();
    let validation: Vec<&MatchupRecord> = labeled
        .iter()
        .copied()
        .filter(|r| r.season == validation_season)
        .collect();
    let held: Vec<&MatchupRecord> = labeled
        .iter()
        .copied()
        .filter(|r| r.season == held_out)
        .collect();

    check_order("training", &train, "validation", &validation)?;
    check_order("validation", &validation, "held-out", &held)?;

    Ok(ChronologicalSplit {
        window: TrainingWindow {
            train_seasons,
            validation_season,
            held_out_season: held_out,
        },
        train,
        validation,
        held_out: held,
    })
}

fn check_order(
    earlier: &'static str,
    a: &[&MatchupRecord],
    later: &'static str,
    b: &[&MatchupRecord],
) -> Result<(), PipelineError> {
    let (Some(earlier_max), Some(later_min)) = (
        a.iter().map(|r| r.date).max(),
        b.iter().map(|r| r.date).min(),
    ) else {
        return Ok(());
    };
    if earlier_max >= later_min {
        return Err(PipelineError::SplitOverlap {
            earlier,
            earlier_max,
            later,
            later_min,
        });
    }
    Ok(())
}
