use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, params};

use crate::ability_fit::AbilitySnapshot;
use crate::player_fit::PlayerAbility;

/// One row of the long-form view of a snapshot family: one team on one date.
#[derive(Debug, Clone)]
pub struct AbilityRow {
    pub as_of: NaiveDate,
    pub team: String,
    pub attack: f64,
    pub defense: f64,
    pub home_adv: f64,
    pub converged: bool,
}

/// Sqlite-backed snapshot store. Constructed explicitly and passed where
/// needed; there is no ambient global connection.
pub struct RatingStore {
    conn: Connection,
    in_flight: Mutex<HashSet<String>>,
}

/// Held while a fit for one (config, date) key is running. Dropping it
/// releases the key.
pub struct FitGuard<'a> {
    store: &'a RatingStore,
    key: String,
}

impl Drop for FitGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.store.in_flight.lock() {
            set.remove(&self.key);
        }
    }
}

impl RatingStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open ratings db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().context("open in-memory ratings db")?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS ability_snapshots (
                config_key TEXT NOT NULL,
                as_of TEXT NOT NULL,
                payload TEXT NOT NULL,
                converged INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (config_key, as_of)
            );
            CREATE INDEX IF NOT EXISTS idx_ability_config ON ability_snapshots(config_key);

            CREATE TABLE IF NOT EXISTS player_abilities (
                config_key TEXT NOT NULL,
                as_of TEXT NOT NULL,
                player TEXT NOT NULL,
                team TEXT NOT NULL,
                shape_a REAL NOT NULL,
                shape_b REAL NOT NULL,
                converged INTEGER NOT NULL,
                games INTEGER NOT NULL,
                PRIMARY KEY (config_key, as_of, player)
            );
            CREATE INDEX IF NOT EXISTS idx_player_config ON player_abilities(config_key);
            "#,
        )
        .context("create ratings schema")?;
        Ok(Self {
            conn,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// At-most-one concurrent fit per (config, date) key. Returns `None`
    /// when a fit for the key is already running; the caller skips.
    pub fn begin_fit(&self, config_key: &str, date: NaiveDate) -> Option<FitGuard<'_>> {
        let key = format!("{config_key}|{date}");
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(key.clone()) {
            return None;
        }
        Some(FitGuard { store: self, key })
    }

    // --- team snapshots ---------------------------------------------------

    pub fn count(&self, config_key: &str) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ability_snapshots WHERE config_key = ?1",
                params![config_key],
                |row| row.get(0),
            )
            .context("count snapshots")?;
        Ok(n as usize)
    }

    pub fn count_for_date(&self, config_key: &str, date: NaiveDate) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ability_snapshots WHERE config_key = ?1 AND as_of = ?2",
                params![config_key, date.to_string()],
                |row| row.get(0),
            )
            .context("count snapshots for date")?;
        Ok(n as usize)
    }

    /// Remove any stale entry for the key, then insert. One transaction, so
    /// re-fitting the same (config, date) is idempotent.
    pub fn replace(&self, snapshot: &AbilitySnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot).context("serialize snapshot")?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin replace transaction")?;
        tx.execute(
            "DELETE FROM ability_snapshots WHERE config_key = ?1 AND as_of = ?2",
            params![snapshot.config_key, snapshot.as_of.to_string()],
        )
        .context("remove stale snapshot")?;
        tx.execute(
            "INSERT INTO ability_snapshots (config_key, as_of, payload, converged, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.config_key,
                snapshot.as_of.to_string(),
                payload,
                i64::from(snapshot.converged),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("insert snapshot")?;
        tx.commit().context("commit replace")?;
        Ok(())
    }

    pub fn find(&self, config_key: &str) -> Result<Vec<AbilitySnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT payload FROM ability_snapshots WHERE config_key = ?1 ORDER BY as_of ASC",
            )
            .context("prepare find snapshots")?;
        let rows = stmt
            .query_map(params![config_key], |row| row.get::<_, String>(0))
            .context("query snapshots")?;

        let mut out = Vec::new();
        for raw in rows {
            let raw = raw.context("read snapshot payload")?;
            out.push(serde_json::from_str(&raw).context("parse snapshot payload")?);
        }
        Ok(out)
    }

    pub fn find_for_date(
        &self,
        config_key: &str,
        date: NaiveDate,
    ) -> Result<Option<AbilitySnapshot>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM ability_snapshots WHERE config_key = ?1 AND as_of = ?2",
                params![config_key, date.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("query snapshot for date")?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("parse snapshot payload")?,
            )),
            None => Ok(None),
        }
    }

    pub fn snapshot_dates(&self, config_key: &str) -> Result<Vec<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT as_of FROM ability_snapshots WHERE config_key = ?1 ORDER BY as_of ASC",
            )
            .context("prepare snapshot dates")?;
        let rows = stmt
            .query_map(params![config_key], |row| row.get::<_, String>(0))
            .context("query snapshot dates")?;
        let mut out = Vec::new();
        for raw in rows {
            let raw = raw.context("read snapshot date")?;
            out.push(raw.parse().with_context(|| format!("bad as_of '{raw}'"))?);
        }
        Ok(out)
    }

    /// Long-form expansion: one row per team per date, for merge joins.
    pub fn ability_rows(&self, config_key: &str) -> Result<Vec<AbilityRow>> {
        let mut out = Vec::new();
        for snap in self.find(config_key)? {
            for (team, ability) in &snap.teams {
                out.push(AbilityRow {
                    as_of: snap.as_of,
                    team: team.clone(),
                    attack: ability.attack,
                    defense: ability.defense,
                    home_adv: snap.home_adv,
                    converged: snap.converged,
                });
            }
        }
        Ok(out)
    }

    // --- player abilities ---------------------------------------------------

    pub fn replace_players(
        &self,
        config_key: &str,
        date: NaiveDate,
        abilities: &[PlayerAbility],
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin player replace transaction")?;
        tx.execute(
            "DELETE FROM player_abilities WHERE config_key = ?1 AND as_of = ?2",
            params![config_key, date.to_string()],
        )
        .context("remove stale player abilities")?;
        for p in abilities {
            tx.execute(
                "INSERT INTO player_abilities
                     (config_key, as_of, player, team, shape_a, shape_b, converged, games)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    config_key,
                    date.to_string(),
                    p.player,
                    p.team,
                    p.a,
                    p.b,
                    i64::from(p.converged),
                    p.games as i64,
                ],
            )
            .context("insert player ability")?;
        }
        tx.commit().context("commit player replace")?;
        Ok(())
    }

    pub fn count_players_for_date(&self, config_key: &str, date: NaiveDate) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM player_abilities WHERE config_key = ?1 AND as_of = ?2",
                params![config_key, date.to_string()],
                |row| row.get(0),
            )
            .context("count player abilities")?;
        Ok(n as usize)
    }

    pub fn find_players_for_date(
        &self,
        config_key: &str,
        date: NaiveDate,
    ) -> Result<Vec<PlayerAbility>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT player, team, shape_a, shape_b, converged, games
                 FROM player_abilities
                 WHERE config_key = ?1 AND as_of = ?2
                 ORDER BY player ASC",
            )
            .context("prepare find player abilities")?;
        let rows = stmt
            .query_map(params![config_key, date.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .context("query player abilities")?;

        let mut out = Vec::new();
        for row in rows {
            let (player, team, a, b, converged, games) = row.context("decode player ability")?;
            out.push(PlayerAbility {
                config_key: config_key.to_string(),
                as_of: date,
                player,
                team,
                a,
                b,
                converged: converged != 0,
                games: games as usize,
            });
        }
        Ok(out)
    }
}
