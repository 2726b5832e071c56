//! SQLite-backed store for PR records, scalar state and recheck tasks.
//!
//! A single connection sits behind a `Mutex`: rusqlite's `Connection` is not
//! `Sync`, and every statement here is short. The database runs in WAL mode
//! with `synchronous=FULL`, so a write that returned `Ok` survives a crash.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{MonitorError, Result};
use crate::store::records::{PrKey, PullRequestRecord, RecheckTask, state_keys};

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "pr-monitor.db";

/// Legacy ignored-list file name inside the data directory.
pub const LEGACY_IGNORED_FILE: &str = "ignored.json";

const PR_COLUMNS: &str =
    "repo, number, title, author, url, needs_review, needs_reapproval, ignored, muted, last_checked";

/// Durable state shared by every worker.
pub struct PrStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl std::fmt::Debug for PrStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl PrStore {
    /// Open or create the store inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        Self::open_at(&data_dir.join(DB_FILE_NAME))
    }

    /// Open or create the store at an explicit database path.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        let db = Connection::open(db_path)?;

        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        Self::init_schema(&db)?;
        Self::migrate(&db)?;

        Ok(Self {
            path: db_path.to_path_buf(),
            db: Mutex::new(db),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS prs (
                repo TEXT NOT NULL,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                url TEXT NOT NULL,
                needs_review INTEGER NOT NULL DEFAULT 0,
                needs_reapproval INTEGER NOT NULL DEFAULT 0,
                ignored INTEGER NOT NULL DEFAULT 0,
                last_checked TEXT NOT NULL,
                PRIMARY KEY (repo, number)
            );

            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rechecks (
                repo TEXT NOT NULL,
                number INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                PRIMARY KEY (repo, number)
            );
            "#,
        )?;

        Ok(())
    }

    /// Additive migrations: columns introduced after the first schema.
    fn migrate(db: &Connection) -> Result<()> {
        if !Self::has_column(db, "prs", "muted")? {
            db.execute_batch("ALTER TABLE prs ADD COLUMN muted INTEGER NOT NULL DEFAULT 0")?;
            info!("Added muted column to prs table");
        }
        Ok(())
    }

    fn has_column(db: &Connection, table: &str, column: &str) -> Result<bool> {
        let mut stmt = db.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for name in names {
            if name? == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| MonitorError::Storage(e.to_string()))
    }

    /// Make every `op` (INSERT, UPDATE or DELETE) on `table` fail.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self, table: &str, ops: &[&str]) -> Result<()> {
        let db = self.conn()?;
        for op in ops {
            db.execute_batch(&format!(
                "CREATE TRIGGER fail_{op}_{table} BEFORE {op} ON {table} BEGIN SELECT RAISE(FAIL, 'write blocked'); END;",
                op = op.to_lowercase(),
                table = table,
            ))?;
        }
        Ok(())
    }

    // --- pull requests -------------------------------------------------

    /// Insert or update a classified PR. Never touches `ignored`/`muted`.
    pub fn upsert_pr(&self, record: &PullRequestRecord) -> Result<()> {
        let db = self.conn()?;
        Self::upsert_pr_on(&db, record)
    }

    fn upsert_pr_on(db: &Connection, record: &PullRequestRecord) -> Result<()> {
        db.execute(
            r#"
            INSERT INTO prs (repo, number, title, author, url, needs_review, needs_reapproval, ignored, muted, last_checked)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8)
            ON CONFLICT (repo, number) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                url = excluded.url,
                needs_review = excluded.needs_review,
                needs_reapproval = excluded.needs_reapproval,
                last_checked = excluded.last_checked
            "#,
            params![
                record.repo,
                record.number as i64,
                record.title,
                record.author,
                record.url,
                record.needs_review,
                record.needs_reapproval,
                record.last_checked.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn remove_pr(&self, key: &PrKey) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM prs WHERE repo = ?1 AND number = ?2",
            params![key.repo, key.number as i64],
        )?;
        Ok(n > 0)
    }

    /// Delete the unignored, unmuted rows of one repository.
    pub fn remove_active_prs_for_repo(&self, repo: &str) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM prs WHERE repo = ?1 AND ignored = 0 AND muted = 0",
            params![repo],
        )?;
        Ok(n)
    }

    /// Replace the active rows of `repos` with `records` in one transaction.
    ///
    /// Rows of other repositories, and ignored/muted rows, are untouched.
    pub fn replace_active_prs(&self, repos: &[String], records: &[PullRequestRecord]) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        for repo in repos {
            tx.execute(
                "DELETE FROM prs WHERE repo = ?1 AND ignored = 0 AND muted = 0",
                params![repo],
            )?;
        }
        for record in records {
            Self::upsert_pr_on(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Active rows ordered by (repository, number).
    pub fn load_active_prs(&self) -> Result<Vec<PullRequestRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM prs WHERE ignored = 0 AND muted = 0 ORDER BY repo, number",
            PR_COLUMNS
        ))?;
        let rows = stmt.query_map([], pr_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn get_pr(&self, key: &PrKey) -> Result<Option<PullRequestRecord>> {
        let db = self.conn()?;
        let record = db
            .query_row(
                &format!("SELECT {} FROM prs WHERE repo = ?1 AND number = ?2", PR_COLUMNS),
                params![key.repo, key.number as i64],
                pr_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Flag or unflag a PR as ignored. Ignoring an unknown PR inserts a
    /// placeholder row so the flag is in place before the PR is first seen.
    pub fn set_ignored(&self, key: &PrKey, ignored: bool) -> Result<()> {
        self.set_flag(key, "ignored", ignored)
    }

    pub fn set_muted(&self, key: &PrKey, muted: bool) -> Result<()> {
        self.set_flag(key, "muted", muted)
    }

    fn set_flag(&self, key: &PrKey, column: &str, value: bool) -> Result<()> {
        let db = self.conn()?;
        if value {
            db.execute(
                &format!(
                    r#"
                    INSERT INTO prs (repo, number, title, author, url, {col}, last_checked)
                    VALUES (?1, ?2, '', '', '', 1, ?3)
                    ON CONFLICT (repo, number) DO UPDATE SET {col} = 1
                    "#,
                    col = column
                ),
                params![key.repo, key.number as i64, Utc::now().to_rfc3339()],
            )?;
        } else {
            db.execute(
                &format!("UPDATE prs SET {} = 0 WHERE repo = ?1 AND number = ?2", column),
                params![key.repo, key.number as i64],
            )?;
        }
        Ok(())
    }

    pub fn is_ignored(&self, key: &PrKey) -> Result<bool> {
        self.flag(key, "ignored")
    }

    pub fn is_muted(&self, key: &PrKey) -> Result<bool> {
        self.flag(key, "muted")
    }

    fn flag(&self, key: &PrKey, column: &str) -> Result<bool> {
        let db = self.conn()?;
        let value: Option<bool> = db
            .query_row(
                &format!("SELECT {} FROM prs WHERE repo = ?1 AND number = ?2", column),
                params![key.repo, key.number as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(false))
    }

    pub fn count_ignored(&self) -> Result<usize> {
        self.count_where("ignored = 1")
    }

    pub fn count_muted(&self) -> Result<usize> {
        self.count_where("muted = 1")
    }

    fn count_where(&self, predicate: &str) -> Result<usize> {
        let db = self.conn()?;
        let n: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM prs WHERE {}", predicate),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Drop every ignored row; still-relevant PRs return on the next sweep.
    pub fn clear_ignored(&self) -> Result<usize> {
        let db = self.conn()?;
        Ok(db.execute("DELETE FROM prs WHERE ignored = 1", [])?)
    }

    pub fn clear_muted(&self) -> Result<usize> {
        let db = self.conn()?;
        Ok(db.execute("DELETE FROM prs WHERE muted = 1", [])?)
    }

    // --- scalar state --------------------------------------------------

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let value = db
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO state (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// True when the state key holds the literal `"true"`.
    pub fn state_flag(&self, key: &str) -> Result<bool> {
        Ok(self.get_state(key)?.as_deref() == Some("true"))
    }

    // --- recheck tasks -------------------------------------------------

    /// Persist a recheck task; an existing task for the key is restarted.
    pub fn add_recheck_task(&self, task: &RecheckTask) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO rechecks (repo, number, started_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (repo, number) DO UPDATE SET started_at = excluded.started_at
            "#,
            params![task.repo, task.number as i64, task.started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_recheck_task(&self, key: &PrKey) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM rechecks WHERE repo = ?1 AND number = ?2",
            params![key.repo, key.number as i64],
        )?;
        Ok(n > 0)
    }

    /// Remove the task only if it has not been restarted since `task` was read.
    pub fn complete_recheck_task(&self, task: &RecheckTask) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM rechecks WHERE repo = ?1 AND number = ?2 AND started_at = ?3",
            params![task.repo, task.number as i64, task.started_at.to_rfc3339()],
        )?;
        Ok(n > 0)
    }

    pub fn get_recheck_task(&self, key: &PrKey) -> Result<Option<RecheckTask>> {
        let db = self.conn()?;
        let started_at: Option<String> = db
            .query_row(
                "SELECT started_at FROM rechecks WHERE repo = ?1 AND number = ?2",
                params![key.repo, key.number as i64],
                |row| row.get(0),
            )
            .optional()?;

        match started_at {
            None => Ok(None),
            Some(ts) => {
                let started_at = parse_timestamp(&ts)
                    .ok_or_else(|| MonitorError::Storage(format!("bad started_at for {}: {}", key, ts)))?;
                Ok(Some(RecheckTask::new(key, started_at)))
            }
        }
    }

    /// All persisted recheck tasks. Rows with an unparseable timestamp are
    /// deleted with a warning rather than failing the whole listing.
    pub fn list_recheck_tasks(&self) -> Result<Vec<RecheckTask>> {
        let raw: Vec<(String, i64, String)> = {
            let db = self.conn()?;
            let mut stmt = db.prepare("SELECT repo, number, started_at FROM rechecks ORDER BY repo, number")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            let collected = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            collected
        };

        let mut tasks = Vec::with_capacity(raw.len());
        for (repo, number, ts) in raw {
            let key = PrKey::new(repo, number as u64);
            match parse_timestamp(&ts) {
                Some(started_at) => tasks.push(RecheckTask::new(&key, started_at)),
                None => {
                    warn!("Dropping recheck task {} with invalid start time {:?}", key, ts);
                    self.remove_recheck_task(&key)?;
                }
            }
        }
        Ok(tasks)
    }

    // --- legacy import -------------------------------------------------

    /// Import the pre-database `ignored.json` list once.
    ///
    /// Returns the number of keys imported; zero when already imported or
    /// when the file does not exist.
    pub fn import_legacy_ignored(&self, path: &Path) -> Result<usize> {
        if self.state_flag(state_keys::IGNORED_JSON_IMPORTED)? {
            return Ok(0);
        }

        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.set_state(state_keys::IGNORED_JSON_IMPORTED, "true")?;
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let keys: Vec<String> = serde_json::from_str(&data)?;
        let mut imported = 0;
        for raw in &keys {
            match raw.parse::<PrKey>() {
                Ok(key) => match self.set_ignored(&key, true) {
                    Ok(()) => imported += 1,
                    Err(e) => warn!("Failed to import ignored PR {}: {}", raw, e),
                },
                Err(_) => warn!("Skipping malformed ignored key {:?}", raw),
            }
        }

        info!("Imported {} ignored PRs from {}", imported, path.display());
        self.set_state(state_keys::IGNORED_JSON_IMPORTED, "true")?;
        Ok(imported)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

fn pr_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequestRecord> {
    let last_checked: String = row.get(9)?;
    let last_checked = parse_timestamp(&last_checked).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("invalid timestamp {:?}", last_checked).into(),
        )
    })?;

    Ok(PullRequestRecord {
        repo: row.get(0)?,
        number: row.get::<_, i64>(1)? as u64,
        title: row.get(2)?,
        author: row.get(3)?,
        url: row.get(4)?,
        needs_review: row.get(5)?,
        needs_reapproval: row.get(6)?,
        ignored: row.get(7)?,
        muted: row.get(8)?,
        last_checked,
    })
}
