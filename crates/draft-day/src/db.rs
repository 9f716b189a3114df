// SQLite persistence layer for dynasty seasons, draft progress, and the
// draft order log.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::draft::pick::DraftPick;
use crate::draft::progress::{checked_pick, DraftProgress, DraftProgressRecord, MAX_PICK};

/// `PRAGMA user_version` once the draft progress columns exist.
pub const DRAFT_PROGRESS_SCHEMA_VERSION: i64 = 2;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a draft progress read or write did not go through.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("draft pick {pick} is outside 0..={max}", max = MAX_PICK)]
    InvalidPick { pick: i64 },

    #[error("no dynasty state for dynasty `{dynasty_id}` season {season}")]
    NotFound { dynasty_id: String, season: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite-backed persistence for dynasties, their per-season state (including
/// draft progress), and the draft order log.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`, ensure the base tables
    /// exist, and apply the draft progress migration. Pass `":memory:"` for
    /// an ephemeral in-memory database (useful for tests).
    ///
    /// A failed draft progress migration is logged but does not fail the
    /// open: readers fall back to default progress and `migrate` can be
    /// retried later.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS dynasties (
                dynasty_id TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS dynasty_state (
                dynasty_id TEXT NOT NULL REFERENCES dynasties(dynasty_id) ON DELETE CASCADE,
                season     INTEGER NOT NULL,
                PRIMARY KEY (dynasty_id, season)
            );

            CREATE TABLE IF NOT EXISTS draft_picks (
                dynasty_id  TEXT NOT NULL,
                season      INTEGER NOT NULL,
                pick_number INTEGER NOT NULL,
                team_name   TEXT NOT NULL,
                player_name TEXT NOT NULL,
                timestamp   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (dynasty_id, season, pick_number),
                FOREIGN KEY (dynasty_id, season)
                    REFERENCES dynasty_state(dynasty_id, season) ON DELETE CASCADE
            );
            ",
        )
        .context("failed to create database schema")?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        if let Err(e) = db.migrate() {
            warn!("Draft progress migration failed, progress reads will use defaults: {e:#}");
        }

        Ok(db)
    }

    /// Add the `current_draft_pick` and `draft_in_progress` columns to
    /// `dynasty_state` if they are missing.
    ///
    /// Safe to call repeatedly. Both `ALTER TABLE` statements and the
    /// `user_version` bump run in one transaction, so a failure leaves the
    /// table exactly as it was. Returns `true` if any column was added.
    pub fn migrate(&self) -> Result<bool> {
        let mut conn = self.conn();
        Self::migrate_add_draft_progress(&mut conn)
    }

    fn migrate_add_draft_progress(conn: &mut Connection) -> Result<bool> {
        if Self::has_draft_progress_columns(conn) {
            return Ok(false);
        }

        let tx = conn
            .transaction()
            .context("failed to begin draft progress migration")?;

        // One column may already exist if an earlier run was interrupted
        // outside a transaction (e.g. a manual ALTER).
        let columns = table_columns(&tx, "dynasty_state")?;

        if !columns.iter().any(|c| c == "current_draft_pick") {
            tx.execute_batch(
                "ALTER TABLE dynasty_state ADD COLUMN current_draft_pick INTEGER NOT NULL DEFAULT 0;",
            )
            .context("failed to add current_draft_pick column")?;
        }
        if !columns.iter().any(|c| c == "draft_in_progress") {
            tx.execute_batch(
                "ALTER TABLE dynasty_state ADD COLUMN draft_in_progress INTEGER NOT NULL DEFAULT 0;",
            )
            .context("failed to add draft_in_progress column")?;
        }

        tx.pragma_update(None, "user_version", DRAFT_PROGRESS_SCHEMA_VERSION)
            .context("failed to bump schema version")?;
        tx.commit()
            .context("failed to commit draft progress migration")?;

        info!(
            "Migrated dynasty_state to schema version {}",
            DRAFT_PROGRESS_SCHEMA_VERSION
        );
        Ok(true)
    }

    /// Whether `dynasty_state` has both draft progress columns.
    fn has_draft_progress_columns(conn: &Connection) -> bool {
        conn.prepare("SELECT current_draft_pick, draft_in_progress FROM dynasty_state LIMIT 0")
            .is_ok()
    }

    /// Current `PRAGMA user_version`.
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn();
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .context("failed to read schema version")
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Dynasties and seasons
    // ------------------------------------------------------------------

    /// Register a dynasty. Re-creating an existing dynasty is a no-op and
    /// keeps the original name.
    pub fn create_dynasty(&self, dynasty_id: &str, name: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO dynasties (dynasty_id, name) VALUES (?1, ?2)",
            params![dynasty_id, name],
        )
        .context("failed to create dynasty")?;
        Ok(())
    }

    /// Ensure a state row exists for `(dynasty_id, season)`. New rows start
    /// with the column defaults, i.e. draft pick 0 and not in progress.
    /// Fails if the dynasty does not exist.
    pub fn ensure_season(&self, dynasty_id: &str, season: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO dynasty_state (dynasty_id, season) VALUES (?1, ?2)",
            params![dynasty_id, season],
        )
        .with_context(|| format!("failed to create season {season} for dynasty {dynasty_id}"))?;
        Ok(())
    }

    /// Seasons with a state row for the dynasty, oldest first.
    pub fn list_seasons(&self, dynasty_id: &str) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT season FROM dynasty_state WHERE dynasty_id = ?1 ORDER BY season")
            .context("failed to prepare list_seasons query")?;
        let seasons = stmt
            .query_map(params![dynasty_id], |row| row.get(0))
            .context("failed to query seasons")?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .context("failed to map season rows")?;
        Ok(seasons)
    }

    /// Delete a dynasty along with its season state and draft picks.
    /// Returns `false` if no such dynasty existed.
    pub fn delete_dynasty(&self, dynasty_id: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn
            .execute(
                "DELETE FROM dynasties WHERE dynasty_id = ?1",
                params![dynasty_id],
            )
            .context("failed to delete dynasty")?;
        Ok(deleted > 0)
    }

    // ------------------------------------------------------------------
    // Draft progress
    // ------------------------------------------------------------------

    /// Persist the pick cursor and in-progress flag for a dynasty season in
    /// a single `UPDATE`.
    ///
    /// The pick is range-checked before the database is touched.
    pub fn write_draft_progress(
        &self,
        dynasty_id: &str,
        season: i64,
        current_pick: i64,
        in_progress: bool,
    ) -> std::result::Result<(), StoreError> {
        let pick = checked_pick(current_pick).ok_or(StoreError::InvalidPick {
            pick: current_pick,
        })?;

        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE dynasty_state
                SET current_draft_pick = ?1, draft_in_progress = ?2
              WHERE dynasty_id = ?3 AND season = ?4",
            params![pick, in_progress, dynasty_id, season],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound {
                dynasty_id: dynasty_id.to_string(),
                season,
            });
        }

        debug!(
            "Saved draft progress for {} season {}: pick={}, in_progress={}",
            dynasty_id, season, pick, in_progress
        );
        Ok(())
    }

    /// Like `write_draft_progress`, but absorbs every failure: invalid
    /// picks, missing rows and storage errors are logged and reported as
    /// `false`.
    pub fn update_draft_progress(
        &self,
        dynasty_id: &str,
        season: i64,
        current_pick: i64,
        in_progress: bool,
    ) -> bool {
        match self.write_draft_progress(dynasty_id, season, current_pick, in_progress) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to save draft progress for {} season {}: {}",
                    dynasty_id, season, e
                );
                false
            }
        }
    }

    /// Read the draft progress for one dynasty season.
    ///
    /// A missing row, or a database that predates the progress columns,
    /// reads as the default progress rather than an error.
    pub fn read_current_state(
        &self,
        dynasty_id: &str,
        season: i64,
    ) -> std::result::Result<DraftProgressRecord, StoreError> {
        let conn = self.conn();
        if !Self::has_draft_progress_columns(&conn) {
            debug!("dynasty_state has no draft progress columns, using defaults");
            return Ok(DraftProgressRecord::empty(dynasty_id, Some(season)));
        }

        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT current_draft_pick, draft_in_progress
                   FROM dynasty_state WHERE dynasty_id = ?1 AND season = ?2",
                params![dynasty_id, season],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(DraftProgressRecord {
            dynasty_id: dynasty_id.to_string(),
            season: Some(season),
            progress: row
                .map(|(pick, flag)| progress_from_stored(pick, flag))
                .unwrap_or_default(),
        })
    }

    /// Read the draft progress of the dynasty's most recent season (the
    /// greatest `season` value). `season` is `None` on the returned record
    /// if the dynasty has no season rows.
    pub fn read_latest_state(
        &self,
        dynasty_id: &str,
    ) -> std::result::Result<DraftProgressRecord, StoreError> {
        let conn = self.conn();

        if !Self::has_draft_progress_columns(&conn) {
            debug!("dynasty_state has no draft progress columns, using defaults");
            let season: Option<i64> = conn
                .query_row(
                    "SELECT season FROM dynasty_state WHERE dynasty_id = ?1
                      ORDER BY season DESC LIMIT 1",
                    params![dynasty_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(DraftProgressRecord::empty(dynasty_id, season));
        }

        let row: Option<(i64, i64, i64)> = conn
            .query_row(
                "SELECT season, current_draft_pick, draft_in_progress
                   FROM dynasty_state WHERE dynasty_id = ?1
                  ORDER BY season DESC LIMIT 1",
                params![dynasty_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(match row {
            Some((season, pick, flag)) => DraftProgressRecord {
                dynasty_id: dynasty_id.to_string(),
                season: Some(season),
                progress: progress_from_stored(pick, flag),
            },
            None => DraftProgressRecord::empty(dynasty_id, None),
        })
    }

    /// Draft progress for one dynasty season. Never fails: any read error
    /// is logged and the default progress is returned.
    pub fn get_current_state(&self, dynasty_id: &str, season: i64) -> DraftProgressRecord {
        self.read_current_state(dynasty_id, season)
            .unwrap_or_else(|e| {
                warn!(
                    "Failed to load draft progress for {} season {}: {}",
                    dynasty_id, season, e
                );
                DraftProgressRecord::empty(dynasty_id, Some(season))
            })
    }

    /// Draft progress for the dynasty's most recent season. Never fails:
    /// any read error is logged and the default progress is returned.
    pub fn get_latest_state(&self, dynasty_id: &str) -> DraftProgressRecord {
        self.read_latest_state(dynasty_id).unwrap_or_else(|e| {
            warn!("Failed to load latest draft progress for {}: {}", dynasty_id, e);
            DraftProgressRecord::empty(dynasty_id, None)
        })
    }

    // ------------------------------------------------------------------
    // Draft order log
    // ------------------------------------------------------------------

    /// Record a single draft pick. Uses INSERT OR IGNORE for idempotency:
    /// re-recording the same pick number leaves the stored pick untouched.
    /// Timestamp is auto-generated by SQLite.
    ///
    /// Returns `false` when the pick number was already taken and nothing
    /// was written.
    pub fn record_pick(&self, dynasty_id: &str, season: i64, pick: &DraftPick) -> Result<bool> {
        let conn = self.conn();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO draft_picks
                    (dynasty_id, season, pick_number, team_name, player_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dynasty_id,
                    season,
                    pick.pick_number,
                    pick.team_name,
                    pick.player_name,
                ],
            )
            .context("failed to record draft pick")?;
        Ok(inserted > 0)
    }

    /// Delete every pick after `after_pick` in one dynasty season, so the
    /// draft can be made again from that point. `0` clears the whole
    /// season. Returns the number of picks removed.
    pub fn truncate_picks(&self, dynasty_id: &str, season: i64, after_pick: u16) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let removed = tx
            .execute(
                "DELETE FROM draft_picks
                  WHERE dynasty_id = ?1 AND season = ?2 AND pick_number > ?3",
                params![dynasty_id, season, after_pick],
            )
            .context("failed to delete draft picks")?;
        tx.commit().context("failed to commit truncate_picks")?;
        Ok(removed)
    }

    /// Load the picks made in one dynasty season, ordered by pick number.
    pub fn load_picks(&self, dynasty_id: &str, season: i64) -> Result<Vec<DraftPick>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT pick_number, team_name, player_name, timestamp
                 FROM draft_picks WHERE dynasty_id = ?1 AND season = ?2
                 ORDER BY pick_number",
            )
            .context("failed to prepare load_picks query")?;

        let picks = stmt
            .query_map(params![dynasty_id, season], |row| {
                let timestamp: String = row.get(3)?;
                Ok(DraftPick {
                    pick_number: row.get(0)?,
                    team_name: row.get(1)?,
                    player_name: row.get(2)?,
                    recorded_at: DateTime::parse_from_rfc3339(&timestamp)
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc)),
                })
            })
            .context("failed to query draft picks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map draft pick rows")?;

        Ok(picks)
    }

    /// Return the number of picks recorded for one dynasty season.
    pub fn pick_count(&self, dynasty_id: &str, season: i64) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM draft_picks WHERE dynasty_id = ?1 AND season = ?2",
                params![dynasty_id, season],
                |row| row.get(0),
            )
            .context("failed to count draft picks")?;
        Ok(count as usize)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Column names of `table`, in declaration order.
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table {table}"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("failed to query columns of {table}"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed to map columns of {table}"))?;
    Ok(columns)
}

/// Turn raw column values into a `DraftProgress`. A stored pick outside the
/// valid range (written by something other than this crate) is logged and
/// read as the default.
fn progress_from_stored(pick: i64, flag: i64) -> DraftProgress {
    match checked_pick(pick) {
        Some(current_pick) => DraftProgress {
            current_pick,
            in_progress: flag != 0,
        },
        None => {
            warn!("Stored draft pick {} is out of range, using defaults", pick);
            DraftProgress::default()
        }
    }
}
