//! Local SQLite database layer for the clinic cash backend.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings helpers,
//! and the shared connection state handed to every command.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub(crate) const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/clinic.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. Unlike a cache database, the ledger is
/// never deleted on open failure; the error is returned to the caller.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("clinic.db");
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path).map_err(|e| {
        error!("Database open failed: {e}");
        e
    })?;

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

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

    let current = schema_version(conn);

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
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Highest applied migration, or 0 on a fresh database.
pub(crate) fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or_else(|e| {
        warn!("schema_version query failed: {e}");
        0
    })
}

/// Migration v1: settings, professionals, appointments, cash register.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS professionals (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            specialty TEXT,
            commission_rate REAL NOT NULL DEFAULT 50,
            cash_in_hand REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            professional_id TEXT NOT NULL REFERENCES professionals(id),
            patient_name TEXT NOT NULL,
            covenant TEXT,
            appointment_date TEXT NOT NULL,
            start_time TEXT,
            status TEXT NOT NULL DEFAULT 'scheduled'
                CHECK (status IN ('scheduled', 'attended', 'closed', 'cancelled')),
            base_price REAL,
            final_price REAL,
            cash_collected REAL,
            transfer_collected REAL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS appointment_payments (
            id TEXT PRIMARY KEY,
            appointment_id TEXT NOT NULL REFERENCES appointments(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            payment_method TEXT NOT NULL
                CHECK (payment_method IN ('cash', 'transfer', 'card', 'other')),
            payment_date TEXT,
            received_by_professional_id TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS cash_register_transactions (
            id TEXT PRIMARY KEY,
            amount REAL NOT NULL,
            payment_method TEXT NOT NULL
                CHECK (payment_method IN ('cash', 'transfer', 'card', 'other')),
            transaction_type TEXT NOT NULL,
            transaction_date TEXT NOT NULL,
            professional_id TEXT,
            description TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_appointments_prof_date
            ON appointments(professional_id, appointment_date);
        CREATE INDEX IF NOT EXISTS idx_appointment_payments_appt
            ON appointment_payments(appointment_id);
        CREATE INDEX IF NOT EXISTS idx_cash_register_date
            ON cash_register_transactions(transaction_date);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key
            ON local_settings(setting_category, setting_key);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (core tables)");
    Ok(())
}

/// Migration v2: daily/monthly liquidations and cash transfers.
///
/// `liquidacion_mensual_id` ties every consumed daily row to the monthly
/// row that consumed it; the consolidator only claims rows still flagged
/// `incluida_en_mensual = 0`.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS liquidaciones_diarias (
            id TEXT PRIMARY KEY,
            profesional_id TEXT NOT NULL,
            fecha TEXT NOT NULL,
            total_base REAL NOT NULL DEFAULT 0,
            total_facturado REAL NOT NULL DEFAULT 0,
            comision_profesional REAL NOT NULL DEFAULT 0,
            comision_tense REAL NOT NULL DEFAULT 0,
            descuentos_tense REAL NOT NULL DEFAULT 0,
            profesional_debe REAL NOT NULL DEFAULT 0,
            tense_debe REAL NOT NULL DEFAULT 0,
            estado TEXT NOT NULL DEFAULT 'pending',
            incluida_en_mensual INTEGER NOT NULL DEFAULT 0,
            liquidacion_mensual_id TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(profesional_id, fecha)
        );

        CREATE TABLE IF NOT EXISTS liquidaciones_mensuales (
            id TEXT PRIMARY KEY,
            profesional_id TEXT NOT NULL,
            mes INTEGER NOT NULL CHECK (mes BETWEEN 1 AND 12),
            anio INTEGER NOT NULL,
            total_facturado_mes REAL NOT NULL DEFAULT 0,
            total_base_mes REAL NOT NULL DEFAULT 0,
            comision_profesional_mes REAL NOT NULL DEFAULT 0,
            comision_tense_mes REAL NOT NULL DEFAULT 0,
            descuentos_tense_mes REAL NOT NULL DEFAULT 0,
            saldo_profesional_final REAL NOT NULL DEFAULT 0,
            saldo_tense_final REAL NOT NULL DEFAULT 0,
            estado TEXT NOT NULL DEFAULT 'pending'
                CHECK (estado IN ('pending', 'transferred')),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS traspasos_caja (
            id TEXT PRIMARY KEY,
            liquidacion_mensual_id TEXT NOT NULL
                REFERENCES liquidaciones_mensuales(id),
            profesional_id TEXT,
            monto REAL NOT NULL,
            origen TEXT NOT NULL DEFAULT 'professional_cash',
            destino TEXT NOT NULL DEFAULT 'admin_cash',
            fecha TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_liq_diarias_prof_fecha
            ON liquidaciones_diarias(profesional_id, fecha);
        CREATE INDEX IF NOT EXISTS idx_liq_diarias_mensual
            ON liquidaciones_diarias(liquidacion_mensual_id);
        CREATE INDEX IF NOT EXISTS idx_liq_mensuales_prof
            ON liquidaciones_mensuales(profesional_id, anio, mes);
        CREATE INDEX IF NOT EXISTS idx_traspasos_mensual
            ON traspasos_caja(liquidacion_mensual_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (liquidations and transfers)");
    Ok(())
}

/// Migration v3: cash deliveries linked to the collection date they settle.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cash_deliveries (
            id TEXT PRIMARY KEY,
            professional_id TEXT NOT NULL REFERENCES professionals(id),
            collection_date TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount > 0),
            notes TEXT,
            delivered_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_cash_deliveries_prof_date
            ON cash_deliveries(professional_id, collection_date);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        format!("migration v3: {e}")
    })?;

    info!("Applied migration v3 (cash_deliveries table)");
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

/// Numeric setting, falling back to `default` when missing or unparsable.
pub fn get_setting_f64(conn: &Connection, category: &str, key: &str, default: f64) -> f64 {
    match get_setting(conn, category, key) {
        Some(raw) => raw.trim().parse::<f64>().unwrap_or_else(|_| {
            warn!(category = %category, key = %key, value = %raw, "Ignoring non-numeric setting");
            default
        }),
        None => default,
    }
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

/// Get all settings grouped by category as JSON.
pub fn get_all_settings(conn: &Connection) -> serde_json::Value {
    let mut stmt = match conn.prepare(
        "SELECT setting_category, setting_key, setting_value FROM local_settings ORDER BY setting_category, setting_key",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("get_all_settings prepare: {e}");
            return serde_json::json!({});
        }
    };

    let mut result = serde_json::Map::new();

    let rows = match stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    }) {
        Ok(r) => r,
        Err(e) => {
            error!("get_all_settings query: {e}");
            return serde_json::json!({});
        }
    };

    for (cat, key, val) in rows.flatten() {
        let category = result.entry(cat).or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = category {
            map.insert(key, serde_json::Value::String(val));
        }
    }

    serde_json::Value::Object(result)
}

/// Run `f` inside `BEGIN IMMEDIATE ... COMMIT`, rolling back on any error.
///
/// The immediate lock makes a second writer wait (up to `busy_timeout`)
/// instead of reading rows the first writer is about to claim.
pub(crate) fn with_transaction<T, E>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<rusqlite::Error>,
{
    conn.execute_batch("BEGIN IMMEDIATE")?;

    match f(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = conn.execute_batch("ROLLBACK") {
                warn!("rollback failed: {rb}");
            }
            Err(e)
        }
    }
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        conn
    }

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let tables = table_names(&conn);
        for expected in [
            "appointment_payments",
            "appointments",
            "cash_deliveries",
            "cash_register_transactions",
            "liquidaciones_diarias",
            "liquidaciones_mensuales",
            "local_settings",
            "professionals",
            "schema_version",
            "traspasos_caja",
        ] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table {expected}, got {tables:?}"
            );
        }
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_daily_liquidation_unique_per_professional_and_date() {
        let conn = test_db();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO liquidaciones_diarias (id, profesional_id, fecha) VALUES ('a', 'p1', '2024-03-01')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO liquidaciones_diarias (id, profesional_id, fecha) VALUES ('b', 'p1', '2024-03-01')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        let dir = std::env::temp_dir().join(format!("clinic_db_test_{}", uuid::Uuid::new_v4()));
        let state = init(&dir).expect("init");
        let conn = state.conn.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        drop(conn);
        drop(state);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let conn = test_db();
        run_migrations(&conn).unwrap();

        let result: Result<(), rusqlite::Error> = with_transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO professionals (id, name) VALUES ('p1', 'Ana')",
                [],
            )?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM professionals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_settings_crud() {
        let conn = test_db();
        run_migrations(&conn).unwrap();

        assert_eq!(get_setting(&conn, "liquidation", "default_commission_rate"), None);
        set_setting(&conn, "liquidation", "default_commission_rate", "40").unwrap();
        assert_eq!(
            get_setting(&conn, "liquidation", "default_commission_rate").as_deref(),
            Some("40")
        );
        set_setting(&conn, "liquidation", "default_commission_rate", "45").unwrap();
        assert_eq!(
            get_setting_f64(&conn, "liquidation", "default_commission_rate", 50.0),
            45.0
        );

        set_setting(&conn, "cash", "currency", "ARS").unwrap();
        let all = get_all_settings(&conn);
        assert_eq!(all["cash"]["currency"], "ARS");
        assert_eq!(all["liquidation"]["default_commission_rate"], "45");
    }

    #[test]
    fn test_non_numeric_setting_falls_back() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        set_setting(&conn, "liquidation", "default_commission_rate", "abc").unwrap();
        assert_eq!(
            get_setting_f64(&conn, "liquidation", "default_commission_rate", 50.0),
            50.0
        );
    }
}
