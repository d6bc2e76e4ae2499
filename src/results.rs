use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// One finished (or scheduled) game. Immutable once recorded; the core
/// only ever reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: u64,
    pub season: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home_pts: u32,
    pub away_pts: u32,
    pub finished: bool,
}

impl GameResult {
    /// Week bucket within the season, counted from the season's first game.
    pub fn week(&self, season_start: NaiveDate) -> i64 {
        (self.date - season_start).num_days().max(0) / 7 + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Home,
    Away,
}

/// One scoring event from the play-by-play variant of the results source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringEvent {
    pub game_id: u64,
    pub minute: f64,
    pub points: u32,
    pub side: Side,
}

/// One player's line in one game, the unit of the player-share fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerGameLine {
    pub game_id: u64,
    pub date: NaiveDate,
    pub player: String,
    pub team: String,
    pub player_pts: u32,
    pub team_pts: u32,
}

pub trait Dated {
    fn date(&self) -> NaiveDate;
}

impl Dated for GameResult {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Dated for PlayerGameLine {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Rows sorted by date with an O(log n) half-open range query, so "games
/// within N days of the fit date" never depends on what has been fit so far.
#[derive(Debug, Clone)]
pub struct WindowIndex<T: Dated> {
    rows: Vec<T>,
}

impl<T: Dated> WindowIndex<T> {
    pub fn new(mut rows: Vec<T>) -> Self {
        rows.sort_by_key(|r| r.date());
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn all(&self) -> &[T] {
        &self.rows
    }

    /// Rows with `end - window_days < date <= end`.
    pub fn within(&self, end: NaiveDate, window_days: u32) -> &[T] {
        let start = end - chrono::Duration::days(i64::from(window_days));
        let lo = self.rows.partition_point(|r| r.date() <= start);
        let hi = self.rows.partition_point(|r| r.date() <= end);
        &self.rows[lo..hi]
    }

    /// Distinct dates in ascending order, capped at `up_to` inclusive.
    pub fn distinct_dates(&self, up_to: NaiveDate) -> Vec<NaiveDate> {
        let mut out: Vec<NaiveDate> = Vec::new();
        for row in &self.rows {
            let d = row.date();
            if d > up_to {
                break;
            }
            if out.last() != Some(&d) {
                out.push(d);
            }
        }
        out
    }
}

/// Validate a caller-supplied season range like ("2022-23", "2024-25").
pub fn validate_season_range(first: &str, last: &str) -> Result<(), ModelError> {
    let parse = |s: &str| -> Option<i32> {
        let (start, _) = s.split_once('-')?;
        start.parse::<i32>().ok()
    };
    let (Some(a), Some(b)) = (parse(first), parse(last)) else {
        return Err(ModelError::config(format!(
            "seasons must look like '2023-24' (got '{first}', '{last}')"
        )));
    };
    if a > b {
        return Err(ModelError::config(format!(
            "season range is reversed: {first} > {last}"
        )));
    }
    Ok(())
}

// --- sqlite results source ------------------------------------------------

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
        CREATE TABLE IF NOT EXISTS games (
            game_id INTEGER PRIMARY KEY,
            season TEXT NOT NULL,
            game_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_pts INTEGER NOT NULL,
            away_pts INTEGER NOT NULL,
            finished INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_games_date ON games(game_date);
        CREATE INDEX IF NOT EXISTS idx_games_season ON games(season);

        CREATE TABLE IF NOT EXISTS scoring_events (
            game_id INTEGER NOT NULL,
            minute REAL NOT NULL,
            points INTEGER NOT NULL,
            side TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_game ON scoring_events(game_id);

        CREATE TABLE IF NOT EXISTS player_lines (
            game_id INTEGER NOT NULL,
            game_date TEXT NOT NULL,
            player TEXT NOT NULL,
            team TEXT NOT NULL,
            player_pts INTEGER NOT NULL,
            team_pts INTEGER NOT NULL,
            PRIMARY KEY (game_id, player)
        );
        CREATE INDEX IF NOT EXISTS idx_player_lines_date ON player_lines(game_date);
        "#,
    )
    .context("create results schema")?;
    Ok(())
}

pub fn upsert_game(conn: &Connection, g: &GameResult) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO games (
            game_id, season, game_date, home_team, away_team,
            home_pts, away_pts, finished, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(game_id) DO UPDATE SET
            season = excluded.season,
            game_date = excluded.game_date,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            home_pts = excluded.home_pts,
            away_pts = excluded.away_pts,
            finished = excluded.finished,
            updated_at = excluded.updated_at
        "#,
        params![
            g.game_id as i64,
            g.season,
            g.date.to_string(),
            g.home_team,
            g.away_team,
            g.home_pts as i64,
            g.away_pts as i64,
            i64::from(g.finished),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert game")?;
    Ok(())
}

pub fn upsert_player_line(conn: &Connection, line: &PlayerGameLine) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO player_lines (game_id, game_date, player, team, player_pts, team_pts)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(game_id, player) DO UPDATE SET
            game_date = excluded.game_date,
            team = excluded.team,
            player_pts = excluded.player_pts,
            team_pts = excluded.team_pts
        "#,
        params![
            line.game_id as i64,
            line.date.to_string(),
            line.player,
            line.team,
            line.player_pts as i64,
            line.team_pts as i64,
        ],
    )
    .context("upsert player line")?;
    Ok(())
}

/// Replace a game's play-by-play rows. Events have no natural key, so the
/// whole game is rewritten in one transaction.
pub fn replace_scoring_events(
    conn: &Connection,
    game_id: u64,
    events: &[ScoringEvent],
) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("begin scoring events transaction")?;
    tx.execute(
        "DELETE FROM scoring_events WHERE game_id = ?1",
        params![game_id as i64],
    )
    .context("remove stale scoring events")?;
    for e in events {
        let side = match e.side {
            Side::Home => "H",
            Side::Away => "A",
        };
        tx.execute(
            "INSERT INTO scoring_events (game_id, minute, points, side) VALUES (?1, ?2, ?3, ?4)",
            params![game_id as i64, e.minute, e.points as i64, side],
        )
        .context("insert scoring event")?;
    }
    tx.commit().context("commit scoring events")?;
    Ok(())
}

pub fn load_finished_games(conn: &Connection) -> Result<Vec<GameResult>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT game_id, season, game_date, home_team, away_team,
                   home_pts, away_pts, finished
            FROM games
            WHERE finished = 1
            ORDER BY game_date ASC, game_id ASC
            "#,
        )
        .context("prepare load games query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, u32>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })
        .context("query games")?;

    let mut out = Vec::new();
    for row in rows {
        let (game_id, season, date, home_team, away_team, home_pts, away_pts, finished) =
            row.context("decode game row")?;
        let date = date
            .parse::<NaiveDate>()
            .with_context(|| format!("bad game_date for game {game_id}"))?;
        out.push(GameResult {
            game_id,
            season,
            date,
            home_team,
            away_team,
            home_pts,
            away_pts,
            finished: finished != 0,
        });
    }
    Ok(out)
}

pub fn load_player_lines(conn: &Connection) -> Result<Vec<PlayerGameLine>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT game_id, game_date, player, team, player_pts, team_pts
            FROM player_lines
            ORDER BY game_date ASC, game_id ASC, player ASC
            "#,
        )
        .context("prepare load player lines query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })
        .context("query player lines")?;

    let mut out = Vec::new();
    for row in rows {
        let (game_id, date, player, team, player_pts, team_pts) =
            row.context("decode player line")?;
        let date = date
            .parse::<NaiveDate>()
            .with_context(|| format!("bad game_date for player line {game_id}/{player}"))?;
        out.push(PlayerGameLine {
            game_id,
            date,
            player,
            team,
            player_pts,
            team_pts,
        });
    }
    Ok(out)
}

pub fn load_scoring_events(conn: &Connection, game_id: u64) -> Result<Vec<ScoringEvent>> {
    let mut stmt = conn
        .prepare(
            "SELECT minute, points, side FROM scoring_events WHERE game_id = ?1 ORDER BY minute",
        )
        .context("prepare scoring events query")?;
    let rows = stmt
        .query_map(params![game_id as i64], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .context("query scoring events")?;

    let mut out = Vec::new();
    for row in rows {
        let (minute, points, side) = row.context("decode scoring event")?;
        let side = match side.as_str() {
            "H" => Side::Home,
            "A" => Side::Away,
            other => {
                return Err(anyhow::anyhow!(
                    "unknown scoring side '{other}' for game {game_id}"
                ));
            }
        };
        out.push(ScoringEvent {
            game_id,
            minute,
            points,
            side,
        });
    }
    Ok(out)
}
