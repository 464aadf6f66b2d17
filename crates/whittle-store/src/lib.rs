//! Sqlite-backed store of captured requests and replay sessions.
//!
//! Implements the engine's `RequestSource` and `SessionHost` collaborators
//! plus the optional send-history sink. One database file per workspace,
//! schema managed through versioned migrations.

use anyhow::Result;
use chrono::Utc;
use indexmap::IndexMap;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use whittle_core::{RequestDescriptor, runtime_dir};
use whittle_http::{HistorySink, RequestSource, RequestSpec, SessionHost};

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            method TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            tls INTEGER NOT NULL,
            path TEXT NOT NULL,
            query TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB,
            captured_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS replay_sessions (
            id TEXT PRIMARY KEY,
            method TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            tls INTEGER NOT NULL,
            path_and_query TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB,
            created_at TEXT NOT NULL
         );",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS send_history (
            id INTEGER PRIMARY KEY,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            status INTEGER NOT NULL,
            sent_at TEXT NOT NULL
         );",
    ),
];

/// Summary row for `whittle list`.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedRequestMeta {
    pub id: Uuid,
    pub method: String,
    pub host: String,
    pub path: String,
    pub captured_at: String,
}

#[derive(Clone)]
pub struct CaptureStore {
    db_path: PathBuf,
}

impl CaptureStore {
    /// Open (and create if needed) the workspace store at
    /// `.whittle/whittle.db`.
    pub fn new(workspace: &Path) -> Result<Self> {
        let root = runtime_dir(workspace);
        fs::create_dir_all(&root)?;
        Self::open_at(root.join("whittle.db"))
    }

    /// Open a store at an explicit database path.
    pub fn open_at(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn db(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
             );",
        )?;

        for (version, sql) in MIGRATIONS {
            let already: i64 = conn.query_row(
                "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
                [*version],
                |r| r.get(0),
            )?;
            if already == 0 {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, Utc::now().to_rfc3339()],
                )?;
            }
        }
        Ok(())
    }

    pub fn insert_request(&self, desc: &RequestDescriptor) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let conn = self.db()?;
        conn.execute(
            "INSERT INTO requests (id, method, host, port, tls, path, query, headers, body, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.to_string(),
                desc.method,
                desc.host,
                desc.port as i64,
                desc.tls as i64,
                desc.path,
                desc.query,
                serde_json::to_string(&desc.headers)?,
                desc.body,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn get_request(&self, id: Uuid) -> Result<Option<RequestDescriptor>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare(
            "SELECT method, host, port, tls, path, query, headers, body
             FROM requests WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let headers: IndexMap<String, Vec<String>> =
                serde_json::from_str(&row.get::<_, String>(6)?)?;
            return Ok(Some(RequestDescriptor {
                method: row.get(0)?,
                host: row.get(1)?,
                port: row.get::<_, i64>(2)? as u16,
                tls: row.get::<_, i64>(3)? != 0,
                path: row.get(4)?,
                query: row.get(5)?,
                headers,
                body: row.get(7)?,
            }));
        }
        Ok(None)
    }

    pub fn list_requests(&self) -> Result<Vec<CapturedRequestMeta>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare(
            "SELECT id, method, host, path, captured_at
             FROM requests ORDER BY captured_at DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CapturedRequestMeta {
                id: Uuid::parse_str(row.get::<_, String>(0)?.as_str())?,
                method: row.get(1)?,
                host: row.get(2)?,
                path: row.get(3)?,
                captured_at: row.get(4)?,
            });
        }
        Ok(out)
    }

    pub fn insert_session(&self, spec: &RequestSpec) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let conn = self.db()?;
        conn.execute(
            "INSERT INTO replay_sessions (id, method, host, port, tls, path_and_query, headers, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                spec.method,
                spec.host,
                spec.port as i64,
                spec.tls as i64,
                spec.path_and_query,
                serde_json::to_string(&spec.headers)?,
                spec.body,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<RequestSpec>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare(
            "SELECT method, host, port, tls, path_and_query, headers, body
             FROM replay_sessions WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let headers: IndexMap<String, Vec<String>> =
                serde_json::from_str(&row.get::<_, String>(5)?)?;
            return Ok(Some(RequestSpec {
                method: row.get(0)?,
                host: row.get(1)?,
                port: row.get::<_, i64>(2)? as u16,
                tls: row.get::<_, i64>(3)? != 0,
                path_and_query: row.get(4)?,
                headers,
                body: row.get(6)?,
            }));
        }
        Ok(None)
    }
}

impl RequestSource for CaptureStore {
    fn get(&self, id: Uuid) -> Result<Option<RequestDescriptor>> {
        self.get_request(id)
    }
}

impl SessionHost for CaptureStore {
    fn create_session(&self, spec: &RequestSpec) -> Result<Option<Uuid>> {
        Ok(Some(self.insert_session(spec)?))
    }
}

impl HistorySink for CaptureStore {
    fn record(&self, spec: &RequestSpec, status: u16) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "INSERT INTO send_history (method, url, status, sent_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                spec.method,
                spec.url(),
                status as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
