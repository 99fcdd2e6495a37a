//! Command handlers exposed over the request loop.
//!
//! Every handler takes the raw JSON payload (`arg0`) and returns
//! `Result<Value, String>`. Payloads are accepted either as a bare string id
//! or as an object with camelCase / snake_case / Spanish keys.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::DbState;

pub mod app;
pub mod appointments;
pub mod cash;
pub mod liquidations;
pub mod professionals;
pub mod settings;

/// Route a command name to its handler.
pub async fn dispatch(db: &DbState, command: &str, arg0: Option<Value>) -> Result<Value, String> {
    match command {
        // Professionals
        "professional_create" => professionals::professional_create(arg0, db).await,
        "professional_get" => professionals::professional_get(arg0, db).await,
        "professional_list" => professionals::professional_list(arg0, db).await,
        // Appointments
        "appointment_create" => appointments::appointment_create(arg0, db).await,
        "appointment_mark_attended" => appointments::appointment_mark_attended(arg0, db).await,
        "appointment_record_payment" => appointments::appointment_record_payment(arg0, db).await,
        "appointment_list_for_day" => appointments::appointment_list_for_day(arg0, db).await,
        // Cash register
        "cash_register_record" => cash::cash_register_record(arg0, db).await,
        "cash_register_status" => cash::cash_register_status(arg0, db).await,
        // Liquidations
        "liquidation_compute_daily_totals" => {
            liquidations::liquidation_compute_daily_totals(arg0, db).await
        }
        "liquidation_generate_daily" => liquidations::liquidation_generate_daily(arg0, db).await,
        "liquidation_generate_monthly" => {
            liquidations::liquidation_generate_monthly(arg0, db).await
        }
        "liquidation_list_daily" => liquidations::liquidation_list_daily(arg0, db).await,
        "liquidation_list_monthly" => liquidations::liquidation_list_monthly(arg0, db).await,
        "liquidation_get_monthly" => liquidations::liquidation_get_monthly(arg0, db).await,
        // Transfers
        "transfer_record" => liquidations::transfer_record(arg0, db).await,
        "transfer_list" => liquidations::transfer_list(arg0, db).await,
        // Professional daily cash
        "cash_view_daily" => cash::cash_view_daily(arg0, db).await,
        "cash_deliver" => cash::cash_deliver(arg0, db).await,
        "cash_delivery_list" => cash::cash_delivery_list(arg0, db).await,
        // Settings
        "settings_get" => settings::settings_get(arg0, db).await,
        "settings_set" => settings::settings_set(arg0, db).await,
        // App
        "app_about" => app::app_about().await,
        "app_health" => app::app_health(db).await,
        other => Err(format!("Unknown command: {other}")),
    }
}

/// Wrap a handler result in the `{data, error}` envelope.
pub fn envelope(result: Result<Value, String>) -> Value {
    match result {
        Ok(data) => json!({ "data": data, "error": Value::Null }),
        Err(error) => json!({ "data": Value::Null, "error": error }),
    }
}

/// `{professionalId, date}` pair shared by the per-day commands.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfessionalDayPayload {
    #[serde(alias = "professional_id", alias = "profesionalId")]
    pub professional_id: String,
    #[serde(alias = "fecha")]
    pub date: String,
}

pub(crate) fn parse_professional_day_payload(
    arg0: Option<Value>,
    command: &str,
) -> Result<ProfessionalDayPayload, String> {
    let payload: ProfessionalDayPayload = parse_object(arg0.unwrap_or(Value::Null), command)?;
    if payload.professional_id.trim().is_empty() {
        return Err("Missing professionalId".into());
    }
    Ok(payload)
}

/// Deserialize an object payload, reporting which command it was meant for.
pub(crate) fn parse_object<T: DeserializeOwned>(
    payload: Value,
    command: &str,
) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("Invalid {command} payload: {e}"))
}

pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("serialize response: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> DbState {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        crate::db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn envelope_wraps_success_and_error() {
        let ok = envelope(Ok(json!({ "id": "x" })));
        assert_eq!(ok["data"]["id"], "x");
        assert!(ok["error"].is_null());

        let err = envelope(Err("boom".into()));
        assert!(err["data"].is_null());
        assert_eq!(err["error"], "boom");
    }

    #[test]
    fn parse_professional_day_payload_accepts_spanish_keys() {
        let payload = parse_professional_day_payload(
            Some(json!({ "profesionalId": "prof-1", "fecha": "2024-03-05" })),
            "cash_view_daily",
        )
        .expect("spanish keys should parse");
        assert_eq!(payload.professional_id, "prof-1");
        assert_eq!(payload.date, "2024-03-05");

        let err = parse_professional_day_payload(None, "cash_view_daily").unwrap_err();
        assert!(err.contains("cash_view_daily"));
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_command() {
        let db = test_db();
        let err = dispatch(&db, "order_create", None).await.unwrap_err();
        assert!(err.contains("Unknown command"));
    }

    #[tokio::test]
    async fn dispatch_runs_settlement_flow() {
        let db = test_db();
        let prof = dispatch(
            &db,
            "professional_create",
            Some(json!({ "name": "Dra. Paz", "commissionRate": 40 })),
        )
        .await
        .unwrap();
        let prof_id = prof["id"].as_str().unwrap().to_string();

        dispatch(
            &db,
            "liquidation_generate_daily",
            Some(json!({
                "profesionalId": prof_id,
                "fecha": "2024-03-05",
                "totalBase": 1000.0,
                "totalFacturado": 1200.0,
                "comisionProfesional": 480.0,
                "comisionTense": 720.0,
                "descuentosTense": 0.0
            })),
        )
        .await
        .unwrap();

        let monthly = dispatch(
            &db,
            "liquidation_generate_monthly",
            Some(json!({ "professionalId": prof_id, "month": 3, "year": 2024 })),
        )
        .await
        .unwrap();
        assert_eq!(monthly["liquidation"]["centralFinalBalance"], 720.0);
        let monthly_id = monthly["liquidation"]["id"].as_str().unwrap().to_string();

        let again = dispatch(
            &db,
            "liquidation_generate_monthly",
            Some(json!({ "professionalId": prof_id, "month": 3, "year": 2024 })),
        )
        .await
        .unwrap();
        assert!(again["liquidation"].is_null());
        assert_eq!(
            again["message"],
            crate::liquidations::NO_DAILY_LIQUIDATIONS_MESSAGE
        );

        let transfer = dispatch(
            &db,
            "transfer_record",
            Some(json!({ "liquidacionMensualId": monthly_id, "monto": 720.0 })),
        )
        .await
        .unwrap();
        assert_eq!(transfer["destination"], "admin_cash");

        let fetched = dispatch(&db, "liquidation_get_monthly", Some(json!(monthly_id)))
            .await
            .unwrap();
        assert_eq!(fetched["status"], "transferred");
    }
}
