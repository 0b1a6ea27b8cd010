//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings
//! helpers, the key-value table that backs the offline sale queue, and the
//! local sale journal used for diagnostics.

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::offline_queue::KeyValueStore;

/// Shared handle to one SQLite connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

const DB_FILE_NAME: &str = "shopfront.db";

/// Initialize the database at `{data_dir}/shopfront.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. A file SQLite reports as corrupt or not
/// a database is moved aside to `shopfront.db.corrupt-{ts}` and a fresh one
/// is created. Every other failure (busy, locked, permissions, I/O) is
/// returned as is so the offline queue stored in it stays untouched.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(e) if is_corruption(&e) => {
            let aside = quarantine_corrupt_file(&db_path)?;
            warn!(
                error = %e,
                moved_to = %aside.display(),
                "Database file is unreadable, starting a fresh one"
            );
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after recovery: {e}"))?
        }
        Err(e) => return Err(format!("Database open failed: {e}")),
    };
    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

/// Rename the database and its WAL/SHM companions to
/// `{name}.corrupt-{ts}[-wal|-shm]`, keeping them for support.
fn quarantine_corrupt_file(db_path: &Path) -> Result<PathBuf, String> {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let aside = PathBuf::from(format!("{}.corrupt-{stamp}", db_path.display()));
    fs::rename(db_path, &aside)
        .map_err(|e| format!("Failed to move corrupt database aside: {e}"))?;
    for suffix in ["-wal", "-shm"] {
        let companion = PathBuf::from(format!("{}{suffix}", db_path.display()));
        if companion.exists() {
            let target = PathBuf::from(format!("{}{suffix}", aside.display()));
            if let Err(e) = fs::rename(&companion, &target) {
                warn!("Failed to move {} aside: {e}", companion.display());
            }
        }
    }
    Ok(aside)
}

/// In-memory database with migrations applied. Used for ephemeral sessions
/// and tests.
pub fn open_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| format!("read schema_version: {e}"))?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings and the key-value table behind the offline queue.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS local_kv (
            kv_key TEXT PRIMARY KEY,
            kv_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (local_settings, local_kv)");
    Ok(())
}

/// Migration v2: append-only journal of checkout and sync outcomes.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sale_journal (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            outcome TEXT NOT NULL CHECK (outcome IN ('committed', 'queued', 'synced', 'rejected')),
            local_id TEXT,
            remote_id TEXT,
            total REAL NOT NULL DEFAULT 0,
            items_summary TEXT NOT NULL DEFAULT '',
            actor_role TEXT,
            detail TEXT,
            created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sale_journal_created_at
            ON sale_journal(created_at);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (sale_journal)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sale journal
// ---------------------------------------------------------------------------

/// Terminal outcome recorded in the sale journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOutcome {
    Committed,
    Queued,
    Synced,
    Rejected,
}

impl JournalOutcome {
    fn as_str(self) -> &'static str {
        match self {
            JournalOutcome::Committed => "committed",
            JournalOutcome::Queued => "queued",
            JournalOutcome::Synced => "synced",
            JournalOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JournalRow<'a> {
    pub local_id: Option<&'a str>,
    pub remote_id: Option<&'a str>,
    pub total: f64,
    pub items_summary: &'a str,
    pub actor_role: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn append_journal(
    conn: &Connection,
    outcome: JournalOutcome,
    row: &JournalRow<'_>,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO sale_journal (outcome, local_id, remote_id, total, items_summary, actor_role, detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            outcome.as_str(),
            row.local_id,
            row.remote_id,
            row.total,
            row.items_summary,
            row.actor_role,
            row.detail
        ],
    )
    .map_err(|e| format!("append_journal: {e}"))?;
    Ok(())
}

/// Append a journal row, logging instead of failing. The journal is a
/// diagnostic aid and never changes a sale's outcome.
pub fn journal_best_effort(db: &DbState, outcome: JournalOutcome, row: &JournalRow<'_>) {
    match db.conn.lock() {
        Ok(conn) => {
            if let Err(e) = append_journal(&conn, outcome, row) {
                warn!("Sale journal write failed: {e}");
            }
        }
        Err(e) => warn!("Sale journal skipped, db lock poisoned: {e}"),
    }
}

/// Most recent journal rows, newest first, as JSON for diagnostics.
pub fn recent_journal(conn: &Connection, limit: i64) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT outcome, local_id, remote_id, total, items_summary, actor_role, detail, created_at
             FROM sale_journal ORDER BY id DESC LIMIT ?1",
        )
        .map_err(|e| format!("recent_journal prepare: {e}"))?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(serde_json::json!({
                "outcome": row.get::<_, String>(0)?,
                "localId": row.get::<_, Option<String>>(1)?,
                "remoteId": row.get::<_, Option<String>>(2)?,
                "total": row.get::<_, f64>(3)?,
                "itemsSummary": row.get::<_, String>(4)?,
                "actorRole": row.get::<_, Option<String>>(5)?,
                "detail": row.get::<_, Option<String>>(6)?,
                "createdAt": row.get::<_, Option<String>>(7)?,
            }))
        })
        .map_err(|e| format!("recent_journal query: {e}"))?;
    Ok(rows.flatten().collect())
}

// ---------------------------------------------------------------------------
// Key-value storage port
// ---------------------------------------------------------------------------

/// [`KeyValueStore`] backed by the `local_kv` table.
pub struct SqliteKvStore {
    db: std::sync::Arc<DbState>,
}

impl SqliteKvStore {
    pub fn new(db: std::sync::Arc<DbState>) -> Self {
        Self { db }
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> Option<String> {
        let conn = match self.db.conn.lock() {
            Ok(c) => c,
            Err(e) => {
                error!(key, "local_kv: connection lock poisoned: {e}");
                return None;
            }
        };
        match conn
            .query_row(
                "SELECT kv_value FROM local_kv WHERE kv_key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "local_kv: read failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO local_kv (kv_key, kv_value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(kv_key) DO UPDATE SET
                kv_value = excluded.kv_value,
                updated_at = excluded.updated_at",
            params![key, value],
        )
        .map_err(|e| format!("local_kv set: {e}"))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM local_kv WHERE kv_key = ?1", params![key])
            .map_err(|e| format!("local_kv remove: {e}"))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
