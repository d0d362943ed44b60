use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, params};

use crate::error::DataQualityEvent;
use crate::game_log::{GameLogStore, GameResult, RawStats, TeamGameRecord, Venue};
use crate::persist::app_data_dir;

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub db_path: PathBuf,
    pub run_id: i64,
    pub rows_seen: usize,
    pub records_upserted: usize,
    pub events: Vec<DataQualityEvent>,
}

pub fn default_db_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("game_log.sqlite"))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS team_games (
            game_id INTEGER NOT NULL,
            team TEXT NOT NULL,
            opponent TEXT NOT NULL,
            game_date TEXT NOT NULL,
            start_time TEXT NULL,
            season INTEGER NOT NULL,
            is_home INTEGER NOT NULL,
            result TEXT NULL,
            goals_for REAL NULL,
            goals_against REAL NULL,
            shots_for REAL NULL,
            shots_against REAL NULL,
            possession_share REAL NULL,
            xg_for REAL NULL,
            xg_against REAL NULL,
            faceoff_win_rate REAL NULL,
            pp_opportunities REAL NULL,
            pp_opportunities_against REAL NULL,
            starting_goalie TEXT NULL,
            goalie_toi_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (game_id, team)
        );
        CREATE INDEX IF NOT EXISTS idx_team_games_date ON team_games(game_date);
        CREATE INDEX IF NOT EXISTS idx_team_games_season ON team_games(season);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            source TEXT NOT NULL,
            rows_seen INTEGER NOT NULL,
            records_upserted INTEGER NOT NULL,
            events_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Writes validated records in one transaction and logs the run in `ingest_runs`.
pub fn upsert_records(
    conn: &mut Connection,
    db_path: PathBuf,
    source: &str,
    rows_seen: usize,
    store: &GameLogStore,
    events: Vec<DataQualityEvent>,
) -> Result<IngestSummary> {
    let started_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, source, rows_seen, records_upserted, events_json)
         VALUES (?1, NULL, ?2, ?3, 0, '[]')",
        params![started_at, source, rows_seen as i64],
    )
    .context("insert ingest run")?;
    let run_id = conn.last_insert_rowid();

    let tx = conn.transaction().context("begin ingest transaction")?;
    for record in store.records() {
        upsert_record(&tx, record)?;
    }
    tx.commit().context("commit ingest transaction")?;

    let event_lines: Vec<String> = events.iter().map(|e| e.to_string()).collect();
    let events_json = serde_json::to_string(&event_lines).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE ingest_runs
         SET finished_at = ?1, records_upserted = ?2, events_json = ?3
         WHERE run_id = ?4",
        params![
            Utc::now().to_rfc3339(),
            store.len() as i64,
            events_json,
            run_id
        ],
    )
    .context("update ingest run")?;

    Ok(IngestSummary {
        db_path,
        run_id,
        rows_seen,
        records_upserted: store.len(),
        events,
    })
}

fn upsert_record(tx: &rusqlite::Transaction<'_>, r: &TeamGameRecord) -> Result<()> {
    let goalie_toi_json =
        serde_json::to_string(&r.goalie_toi).context("serialize goalie time on ice")?;
    tx.execute(
        r#"
        INSERT INTO team_games (
            game_id, team, opponent, game_date, start_time, season, is_home, result,
            goals_for, goals_against, shots_for, shots_against, possession_share,
            xg_for, xg_against, faceoff_win_rate, pp_opportunities, pp_opportunities_against,
            starting_goalie, goalie_toi_json, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
            ?9, ?10, ?11, ?12, ?13,
            ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21
        )
        ON CONFLICT(game_id, team) DO UPDATE SET
            opponent = excluded.opponent,
            game_date = excluded.game_date,
            start_time = excluded.start_time,
            season = excluded.season,
            is_home = excluded.is_home,
            result = excluded.result,
            goals_for = excluded.goals_for,
            goals_against = excluded.goals_against,
            shots_for = excluded.shots_for,
            shots_against = excluded.shots_against,
            possession_share = excluded.possession_share,
            xg_for = excluded.xg_for,
            xg_against = excluded.xg_against,
            faceoff_win_rate = excluded.faceoff_win_rate,
            pp_opportunities = excluded.pp_opportunities,
            pp_opportunities_against = excluded.pp_opportunities_against,
            starting_goalie = excluded.starting_goalie,
            goalie_toi_json = excluded.goalie_toi_json,
            updated_at = excluded.updated_at
        "#,
        params![
            r.game_id as i64,
            r.team,
            r.opponent,
            r.date.format(DATE_FMT).to_string(),
            r.start_time.map(|t| t.format(TIME_FMT).to_string()),
            r.season as i64,
            i64::from(r.is_home()),
            r.result.map(GameResult::as_code),
            r.stats.goals_for,
            r.stats.goals_against,
            r.stats.shots_for,
            r.stats.shots_against,
            r.stats.possession_share,
            r.stats.xg_for,
            r.stats.xg_against,
            r.stats.faceoff_win_rate,
            r.stats.pp_opportunities,
            r.stats.pp_opportunities_against,
            r.starting_goalie,
            goalie_toi_json,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("upsert game {} team {}", r.game_id, r.team))?;
    Ok(())
}

/// Loads every record ordered by date, start time, then first-ingestion order.
pub fn load_records(conn: &Connection) -> Result<Vec<TeamGameRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                game_id, team, opponent, game_date, start_time, season, is_home, result,
                goals_for, goals_against, shots_for, shots_against, possession_share,
                xg_for, xg_against, faceoff_win_rate, pp_opportunities, pp_opportunities_against,
                starting_goalie, goalie_toi_json
            FROM team_games
            ORDER BY game_date ASC, start_time ASC, rowid ASC
            "#,
        )
        .context("prepare load records query")?;

    struct Row {
        game_id: i64,
        team: String,
        opponent: String,
        date: String,
        start_time: Option<String>,
        season: i64,
        is_home: i64,
        result: Option<String>,
        stats: RawStats,
        starting_goalie: Option<String>,
        goalie_toi_json: String,
    }

    let rows = stmt
        .query_map([], |row| {
            Ok(Row {
                game_id: row.get(0)?,
                team: row.get(1)?,
                opponent: row.get(2)?,
                date: row.get(3)?,
                start_time: row.get(4)?,
                season: row.get(5)?,
                is_home: row.get(6)?,
                result: row.get(7)?,
                stats: RawStats {
                    goals_for: row.get(8)?,
                    goals_against: row.get(9)?,
                    shots_for: row.get(10)?,
                    shots_against: row.get(11)?,
                    possession_share: row.get(12)?,
                    xg_for: row.get(13)?,
                    xg_against: row.get(14)?,
                    faceoff_win_rate: row.get(15)?,
                    pp_opportunities: row.get(16)?,
                    pp_opportunities_against: row.get(17)?,
                },
                starting_goalie: row.get(18)?,
                goalie_toi_json: row.get(19)?,
            })
        })
        .context("query load records")?;

    let mut out = Vec::new();
    for (seq, row) in rows.enumerate() {
        let row = row.context("decode team game row")?;
        let date = NaiveDate::parse_from_str(&row.date, DATE_FMT)
            .with_context(|| format!("bad game_date {:?}", row.date))?;
        let start_time = row
            .start_time
            .as_deref()
            .map(|t| NaiveDateTime::parse_from_str(t, TIME_FMT))
            .transpose()
            .with_context(|| format!("bad start_time for game {}", row.game_id))?;
        let result = match row.result.as_deref() {
            None => None,
            Some(code) => Some(
                GameResult::parse(code).ok_or_else(|| anyhow!("bad stored result {code:?}"))?,
            ),
        };
        out.push(TeamGameRecord {
            seq,
            game_id: u64::try_from(row.game_id).context("negative game id")?,
            team: row.team,
            opponent: row.opponent,
            date,
            start_time,
            season: u32::try_from(row.season).context("season out of range")?,
            venue: if row.is_home != 0 {
                Venue::Home
            } else {
                Venue::Away
            },
            stats: row.stats,
            result,
            starting_goalie: row.starting_goalie,
            goalie_toi: serde_json::from_str(&row.goalie_toi_json)
                .context("decode goalie time on ice")?,
        });
    }
    Ok(out)
}

pub fn load_store(conn: &Connection) -> Result<GameLogStore> {
    Ok(GameLogStore::from_records(load_records(conn)?))
}
