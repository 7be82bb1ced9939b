use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use parley_core::{
    ConvergenceReport, DocumentVersion, ParleyError, Result, Review, SessionMeta,
};

/// SQLite-backed store for all session artifacts.
///
/// Each artifact is a JSON blob keyed by `(session_id, version)` or
/// `session_id` alone; writes happen inside single statements or explicit
/// transactions, so a reader never observes a partial record. Version
/// numbers are the only identity: `save_version` rejects anything that is
/// not exactly `max_existing + 1`.
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

fn store_err(e: rusqlite::Error) -> ParleyError {
    ParleyError::Store(e.to_string())
}

impl SessionStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening session store");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(store_err)?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(store_err)?;

        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                meta_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS versions (
                session_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                doc_json TEXT NOT NULL,
                PRIMARY KEY (session_id, version)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                session_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                reviews_json TEXT NOT NULL,
                PRIMARY KEY (session_id, version)
            );

            CREATE TABLE IF NOT EXISTS reports (
                session_id TEXT PRIMARY KEY,
                report_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS malformed_outputs (
                session_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                reviewer TEXT NOT NULL,
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);
            CREATE INDEX IF NOT EXISTS idx_malformed_session ON malformed_outputs(session_id);
            ",
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────

    /// Persist a brand-new session record. Fails if the id already exists.
    pub fn create_session(&self, meta: &SessionMeta) -> Result<()> {
        let json = serde_json::to_string(meta)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO sessions (id, status, meta_json, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                meta.session_id,
                meta.status.to_string(),
                json,
                meta.created_at.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Overwrite an existing session record (single writer per session).
    pub fn update_session(&self, meta: &SessionMeta) -> Result<()> {
        let json = serde_json::to_string(meta)?;
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE sessions SET status = ?2, meta_json = ?3 WHERE id = ?1",
                rusqlite::params![meta.session_id, meta.status.to_string(), json],
            )
            .map_err(store_err)?;
        if rows == 0 {
            return Err(ParleyError::SessionNotFound(meta.session_id.clone()));
        }
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<SessionMeta> {
        let db = self.db.lock();
        let json: String = db
            .query_row(
                "SELECT meta_json FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .map_err(|_| ParleyError::SessionNotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn session_exists(&self, session_id: &str) -> Result<bool> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count > 0)
    }

    /// All session records, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT meta_json FROM sessions ORDER BY created_at DESC, id DESC")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .filter_map(|json| serde_json::from_str(&json).ok())
            .collect();
        Ok(rows)
    }

    /// Remove a session and its entire artifact tree in one transaction.
    /// Returns `false` (leaving nothing behind) when the session is unknown.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(store_err)?;
        tx.execute("DELETE FROM versions WHERE session_id = ?1", [session_id])
            .map_err(store_err)?;
        tx.execute("DELETE FROM reviews WHERE session_id = ?1", [session_id])
            .map_err(store_err)?;
        tx.execute("DELETE FROM reports WHERE session_id = ?1", [session_id])
            .map_err(store_err)?;
        tx.execute(
            "DELETE FROM malformed_outputs WHERE session_id = ?1",
            [session_id],
        )
        .map_err(store_err)?;
        let deleted = tx
            .execute("DELETE FROM sessions WHERE id = ?1", [session_id])
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(deleted > 0)
    }

    // ── Document versions ──────────────────────────────────────

    /// Persist the next document version. The version number must be
    /// exactly `max_existing + 1` (1 for the first write).
    pub fn save_version(&self, session_id: &str, doc: &DocumentVersion) -> Result<()> {
        let json = serde_json::to_string(doc)?;
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(store_err)?;
        let max: u32 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM versions WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        if doc.version != max + 1 {
            return Err(ParleyError::VersionConflict {
                expected: max + 1,
                got: doc.version,
            });
        }
        tx.execute(
            "INSERT INTO versions (session_id, version, doc_json) VALUES (?1, ?2, ?3)",
            rusqlite::params![session_id, doc.version, json],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn load_version(&self, session_id: &str, version: u32) -> Result<DocumentVersion> {
        let db = self.db.lock();
        let json: String = db
            .query_row(
                "SELECT doc_json FROM versions WHERE session_id = ?1 AND version = ?2",
                rusqlite::params![session_id, version],
                |row| row.get(0),
            )
            .map_err(|_| ParleyError::VersionNotFound {
                session: session_id.to_string(),
                version,
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Highest persisted version for a session, if any.
    pub fn latest_version(&self, session_id: &str) -> Result<Option<u32>> {
        let db = self.db.lock();
        let max: u32 = db
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM versions WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(if max == 0 { None } else { Some(max) })
    }

    /// All persisted version numbers for a session, ascending.
    pub fn version_numbers(&self, session_id: &str) -> Result<Vec<u32>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT version FROM versions WHERE session_id = ?1 ORDER BY version")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([session_id], |row| row.get::<_, u32>(0))
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Reviews ────────────────────────────────────────────────

    /// Persist one iteration's reviews for a document version, atomically.
    pub fn save_reviews(&self, session_id: &str, version: u32, reviews: &[Review]) -> Result<()> {
        let json = serde_json::to_string(reviews)?;
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO reviews (session_id, version, reviews_json)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![session_id, version, json],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Reviews for a version; empty when none were persisted.
    pub fn load_reviews(&self, session_id: &str, version: u32) -> Result<Vec<Review>> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row(
                "SELECT reviews_json FROM reviews WHERE session_id = ?1 AND version = ?2",
                rusqlite::params![session_id, version],
                |row| row.get(0),
            )
            .ok();
        match json {
            Some(j) => Ok(serde_json::from_str(&j)?),
            None => Ok(Vec::new()),
        }
    }

    // ── Reports ────────────────────────────────────────────────

    pub fn save_report(&self, session_id: &str, report: &ConvergenceReport) -> Result<()> {
        let json = serde_json::to_string(report)?;
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO reports (session_id, report_json) VALUES (?1, ?2)",
            rusqlite::params![session_id, json],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn load_report(&self, session_id: &str) -> Result<Option<ConvergenceReport>> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row(
                "SELECT report_json FROM reports WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .ok();
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    // ── Debugging artifacts ────────────────────────────────────

    /// Keep a reviewer's unparseable raw output for post-mortem debugging.
    pub fn save_malformed_output(
        &self,
        session_id: &str,
        version: u32,
        reviewer: &str,
        raw: &str,
    ) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO malformed_outputs (session_id, version, reviewer, raw, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                session_id,
                version,
                reviewer,
                raw,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Raw malformed outputs for a session as (version, reviewer, raw).
    pub fn load_malformed_outputs(&self, session_id: &str) -> Result<Vec<(u32, String, String)>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT version, reviewer, raw FROM malformed_outputs
                 WHERE session_id = ?1 ORDER BY created_at",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
