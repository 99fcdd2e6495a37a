//! Diagnostics module for the clinic cash backend.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: schema version, unsettled liquidations, db size
//! - **Data/log directory resolution** and log rotation helpers used by
//!   `lib.rs` to configure rolling log files.

use crate::db::{self, DbState};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the rolling log files (`clinic.2024-03-05`).
pub const LOG_FILE_PREFIX: &str = "clinic";

/// Overrides the platform data directory when set.
pub const DATA_DIR_ENV: &str = "CLINIC_DATA_DIR";

const APP_DIR_NAME: &str = "com.tense.clinic";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
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
// System health
// ---------------------------------------------------------------------------

/// Collects health counters for the admin dashboard.
pub fn get_system_health(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let schema_version = db::schema_version(&conn);
    let count = |sql: &str| -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap_or_else(|e| {
            warn!("health query failed: {e}");
            0
        })
    };
    let unconsolidated_daily =
        count("SELECT COUNT(*) FROM liquidaciones_diarias WHERE incluida_en_mensual = 0");
    let pending_monthly =
        count("SELECT COUNT(*) FROM liquidaciones_mensuales WHERE estado = 'pending'");
    let active_professionals = count("SELECT COUNT(*) FROM professionals WHERE is_active = 1");

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "unconsolidatedDailyLiquidations": unconsolidated_daily,
        "pendingMonthlyLiquidations": pending_monthly,
        "activeProfessionals": active_professionals,
        "dbSizeBytes": db_size,
    }))
}

// ---------------------------------------------------------------------------
// Directories and log rotation
// ---------------------------------------------------------------------------

/// Directory holding `clinic.db` and the `logs/` folder.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir.trim());
        }
    }

    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

pub fn get_log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with(LOG_FILE_PREFIX) {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort newest first
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
    use serial_test::serial;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
        assert!(info.get("arch").is_some());
    }

    #[test]
    #[serial]
    fn test_data_dir_env_override() {
        let dir = std::env::temp_dir().join("clinic_env_override");
        std::env::set_var(DATA_DIR_ENV, &dir);
        assert_eq!(get_data_dir(), dir);
        std::env::remove_var(DATA_DIR_ENV);
        assert!(get_data_dir().to_string_lossy().contains(APP_DIR_NAME));
    }

    #[test]
    #[serial]
    fn test_blank_env_is_ignored() {
        std::env::set_var(DATA_DIR_ENV, "   ");
        assert!(get_data_dir().to_string_lossy().contains(APP_DIR_NAME));
        std::env::remove_var(DATA_DIR_ENV);
    }

    #[test]
    fn test_prune_keeps_newest_files() {
        let dir = std::env::temp_dir().join(format!("clinic_logs_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..(MAX_LOG_FILES + 3) {
            std::fs::write(dir.join(format!("{LOG_FILE_PREFIX}.2024-01-{:02}", i + 1)), "x").unwrap();
        }
        std::fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        prune_old_logs(&dir);

        let remaining: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
            .collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES);
        assert!(dir.join("unrelated.txt").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_system_health_with_empty_db() {
        let dir = std::env::temp_dir().join(format!("diag_test_{}", uuid::Uuid::new_v4()));
        let db_state = crate::db::init(&dir).unwrap();
        let health = get_system_health(&db_state).unwrap();
        assert_eq!(health["schemaVersion"], crate::db::CURRENT_SCHEMA_VERSION);
        assert_eq!(health["unconsolidatedDailyLiquidations"], 0);
        assert_eq!(health["pendingMonthlyLiquidations"], 0);
        drop(db_state);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
