//! Diagnostics for support.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Support snapshot**: pending offline sales, sync status, recent sale
//!   journal rows and schema version, optionally redacted, as JSON.
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use chrono::Utc;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::offline_queue::OfflineQueue;
use crate::sync::SyncStatus;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Rolling log file prefix; files are named `shopfront.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "shopfront";

const JOURNAL_ROWS_IN_SNAPSHOT: i64 = 50;

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Support snapshot
// ---------------------------------------------------------------------------

/// Everything support needs to reconstruct deferred or lost sales.
pub fn support_snapshot(
    db: &DbState,
    queue: &OfflineQueue,
    sync_status: &SyncStatus,
    redact: bool,
) -> Result<Value, String> {
    let (schema_version, journal) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let schema_version: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        (schema_version, db::recent_journal(&conn, JOURNAL_ROWS_IN_SNAPSHOT)?)
    };
    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    let pending = serde_json::to_value(queue.list()).map_err(|e| e.to_string())?;
    let snapshot = json!({
        "generatedAt": Utc::now().to_rfc3339(),
        "about": get_about_info(),
        "schemaVersion": schema_version,
        "dbSizeBytes": db_size,
        "sync": sync_status,
        "pendingSales": pending,
        "journal": journal,
    });
    Ok(if redact {
        redact_sensitive_fields(snapshot)
    } else {
        snapshot
    })
}

/// Write a redacted snapshot to `{output_dir}/shopfront-support-{ts}.json`.
pub fn export_support_snapshot(
    db: &DbState,
    queue: &OfflineQueue,
    sync_status: &SyncStatus,
    output_dir: &Path,
) -> Result<PathBuf, String> {
    let snapshot = support_snapshot(db, queue, sync_status, true)?;
    fs::create_dir_all(output_dir).map_err(|e| format!("create export dir: {e}"))?;
    let path = output_dir.join(format!(
        "shopfront-support-{}.json",
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    let body = serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?;
    fs::write(&path, body).map_err(|e| format!("write {}: {e}", path.display()))?;
    info!(path = %path.display(), "Support snapshot exported");
    Ok(path)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if should_redact_key(&key) {
                        (key, Value::String("[REDACTED]".to_string()))
                    } else {
                        (key, redact_sensitive_fields(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["apikey", "api_key", "token", "secret", "phone", "address"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

pub fn get_log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let prefix = format!("{LOG_FILE_PREFIX}.");
    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            if path.is_file() && is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{JournalOutcome, JournalRow};
    use crate::models::ClientRole;
    use crate::offline_queue::MemoryKvStore;
    use crate::test_support::sample_entry;
    use std::time::{Duration, SystemTime};

    fn idle_status(pending: usize) -> SyncStatus {
        SyncStatus {
            pending,
            in_flight: false,
            last_sync_at: None,
            last_report: None,
        }
    }

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        for key in ["version", "buildTimestamp", "gitSha", "platform", "arch"] {
            assert!(info.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_support_snapshot_lists_pending_sales_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let db_state = db::init(dir.path()).unwrap();
        {
            let conn = db_state.conn.lock().unwrap();
            db::append_journal(
                &conn,
                JournalOutcome::Queued,
                &JournalRow {
                    local_id: Some("offline-1"),
                    total: 1200.0,
                    items_summary: "2x Coke, 1x Water",
                    ..JournalRow::default()
                },
            )
            .unwrap();
        }
        let queue = OfflineQueue::new(Box::new(MemoryKvStore::new()));
        let mut entry = sample_entry(1200.0);
        entry.sale_data.client.role = ClientRole::Customer;
        entry.sale_data.client.phone = Some("+30 210 000000".into());
        queue.enqueue(entry).unwrap();

        let plain = support_snapshot(&db_state, &queue, &idle_status(1), false).unwrap();
        assert_eq!(plain["schemaVersion"], 2);
        assert_eq!(plain["pendingSales"].as_array().unwrap().len(), 1);
        assert_eq!(plain["journal"][0]["outcome"], "queued");
        assert_eq!(plain["sync"]["pending"], 1);

        let redacted = support_snapshot(&db_state, &queue, &idle_status(1), true).unwrap();
        assert_eq!(
            redacted["pendingSales"][0]["saleData"]["client"]["phone"],
            "[REDACTED]"
        );
        assert_eq!(redacted["pendingSales"][0]["saleData"]["total"], 1200.0);
    }

    #[test]
    fn test_export_writes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_state = db::init(dir.path()).unwrap();
        let queue = OfflineQueue::new(Box::new(MemoryKvStore::new()));

        let path =
            export_support_snapshot(&db_state, &queue, &idle_status(0), &dir.path().join("out"))
                .unwrap();
        let body: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert!(body["pendingSales"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_newest_log_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for i in 0..(MAX_LOG_FILES + 3) {
            let path = dir.path().join(format!("shopfront.2026-01-{:02}", i + 1));
            let file = fs::File::create(&path).unwrap();
            file.set_modified(now - Duration::from_secs(3600 * (20 - i as u64)))
                .unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        prune_old_logs(dir.path());

        let remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("shopfront."))
            .collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES);
        assert!(!remaining.contains(&"shopfront.2026-01-01".to_string()));
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_should_redact_key_matches_sensitive_markers() {
        assert!(should_redact_key("apiKey"));
        assert!(should_redact_key("id_token"));
        assert!(should_redact_key("phone"));
        assert!(!should_redact_key("total"));
    }
}
