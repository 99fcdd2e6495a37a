//! Clinic cash & settlements backend.
//!
//! Each professional's day is settled into a daily liquidation, daily rows are
//! consolidated into a monthly liquidation, and the monthly central share is
//! moved to the admin cash box with a cash transfer. Alongside sits the
//! professional's daily cash view (cash collected, transfers, deliveries).
//!
//! The binary speaks newline-delimited JSON on stdin/stdout: every request
//! `{"id", "command", "payload"}` is answered with `{"id", "data", "error"}`.
//! Command names use snake_case (`liquidation_generate_monthly`).

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod appointments;
pub mod cash_register;
pub mod commands;
pub mod daily_cash;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod liquidations;
pub mod payment_method;
pub mod professionals;
pub mod transfers;

pub use error::{ClinicError, ClinicResult};

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// A bare string payload is the id itself; an object is searched for `keys`.
pub(crate) fn payload_arg0_as_string(arg0: Option<Value>, keys: &[&str]) -> Option<String> {
    match arg0 {
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Some(payload @ Value::Object(_)) => value_str(&payload, keys),
        _ => None,
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Console (stderr) + daily rolling file logging under `{data_dir}/logs`.
///
/// stdout is reserved for command responses, so the console layer writes to
/// stderr.
pub fn init_logging(data_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,clinic_cash_lib=debug"));

    let log_dir = diagnostics::get_log_dir(data_dir);
    std::fs::create_dir_all(&log_dir).ok();
    diagnostics::prune_old_logs(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Dropping the guard stops the writer thread; the process owns it until exit.
    std::mem::forget(_guard);
}

// ============================================================================
// Request loop
// ============================================================================

#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default, alias = "arg0")]
    payload: Option<Value>,
}

/// Handle one request line and build its response line.
pub async fn handle_line(db: &db::DbState, line: &str) -> Value {
    let request: CommandRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed request: {e}");
            return json!({
                "id": Value::Null,
                "data": Value::Null,
                "error": format!("Malformed request: {e}"),
            });
        }
    };

    debug!(command = %request.command, "Dispatching command");
    let result = commands::dispatch(db, &request.command, request.payload).await;
    if let Err(error) = &result {
        warn!(command = %request.command, error = %error, "Command failed");
    }

    let mut response = commands::envelope(result);
    if let Value::Object(map) = &mut response {
        map.insert("id".into(), request.id);
    }
    response
}

/// Serve requests until the reader reaches EOF.
pub async fn serve<R, W>(db: &db::DbState, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(db, &line).await;
        let mut out = response.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    info!("Input closed, shutting down");
    Ok(())
}

/// Open the database in `data_dir` and serve stdin/stdout.
pub async fn run(data_dir: &Path) -> Result<(), String> {
    let db_state = db::init(data_dir)?;
    info!(
        db_path = %db_state.db_path.display(),
        "Starting clinic cash backend v{}",
        env!("CARGO_PKG_VERSION")
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(&db_state, stdin, stdout)
        .await
        .map_err(|e| format!("request loop: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> db::DbState {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        db::DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn payload_arg0_as_string_supports_string_and_object() {
        assert_eq!(
            payload_arg0_as_string(Some(json!(" abc ")), &["id"]).as_deref(),
            Some("abc")
        );
        assert_eq!(
            payload_arg0_as_string(Some(json!({ "b": "x", "id": "y" })), &["a", "b"]).as_deref(),
            Some("x")
        );
        assert_eq!(payload_arg0_as_string(Some(json!(3)), &["id"]), None);
        assert_eq!(payload_arg0_as_string(None, &["id"]), None);
    }

    #[tokio::test]
    async fn handle_line_echoes_id_and_reports_errors() {
        let db = test_db();
        let ok = handle_line(&db, r#"{"id": 7, "command": "professional_list"}"#).await;
        assert_eq!(ok["id"], 7);
        assert!(ok["data"].is_array());
        assert!(ok["error"].is_null());

        let err = handle_line(
            &db,
            r#"{"id": "a", "command": "professional_get", "payload": "missing"}"#,
        )
        .await;
        assert_eq!(err["id"], "a");
        assert!(err["data"].is_null());
        assert!(err["error"].as_str().unwrap().contains("not found"));

        let malformed = handle_line(&db, "{not json").await;
        assert!(malformed["id"].is_null());
        assert!(malformed["error"]
            .as_str()
            .unwrap()
            .starts_with("Malformed request"));
    }

    #[tokio::test]
    async fn serve_answers_each_line() {
        let db = test_db();
        let input = concat!(
            r#"{"id": 1, "command": "professional_create", "payload": {"name": "Lic. Sosa"}}"#,
            "\n\n",
            r#"{"id": 2, "command": "professional_list"}"#,
            "\n"
        );
        let mut output: Vec<u8> = Vec::new();
        serve(&db, input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["data"]["name"], "Lic. Sosa");
        assert_eq!(lines[0]["data"]["commissionRate"], 50.0);
        assert_eq!(lines[1]["data"].as_array().unwrap().len(), 1);
    }
}
