use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

use crate::error::IntakeError;

/// Append-only record of already-processed message ids. `record` must be
/// called exactly once per successfully processed application, strictly after
/// every external side effect has succeeded; a crash mid-pipeline leaves the
/// message un-ledgered so a future poll retries it from scratch.
pub trait Ledger {
    fn exists(&self, message_id: &str) -> Result<bool>;
    fn record(&self, message_id: &str, job_id: i64, person_id: i64) -> Result<()>;
}

pub struct SqliteLedger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLedger {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        ledger.init()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // XDG data directory, falling back to the working directory
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "intake") {
            Ok(proj_dirs.data_dir().join("intake.db"))
        } else {
            Ok(PathBuf::from("intake.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS processed_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                job_id INTEGER NOT NULL,
                person_id INTEGER NOT NULL,
                processed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_processed_message_id
                ON processed_messages(message_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='processed_messages'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("ledger not initialized. Run 'intake init' first."));
        }
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM processed_messages", [], |row| {
                row.get(0)
            })?;
        Ok(n as usize)
    }
}

impl Ledger for SqliteLedger {
    fn exists(&self, message_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("failed to query ledger")?;
        Ok(found.is_some())
    }

    fn record(&self, message_id: &str, job_id: i64, person_id: i64) -> Result<()> {
        // The UNIQUE constraint makes check-then-insert atomic.
        let result = self.conn.execute(
            "INSERT INTO processed_messages (message_id, job_id, person_id) VALUES (?1, ?2, ?3)",
            params![message_id, job_id, person_id],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(IntakeError::DuplicateKey(message_id.to_string()).into())
            }
            Err(e) => Err(e).context("failed to write ledger entry"),
        }
    }
}
