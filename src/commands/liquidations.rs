use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::commands::{parse_object, parse_professional_day_payload, to_value};
use crate::db::DbState;
use crate::liquidations::{self, LiquidationStatus, MonthlyOutcome, NewDailyLiquidation};
use crate::payload_arg0_as_string;
use crate::transfers::{self, NewCashTransfer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonthlyPeriodPayload {
    #[serde(alias = "professional_id", alias = "profesionalId")]
    professional_id: String,
    #[serde(alias = "mes")]
    month: u32,
    #[serde(alias = "anio", alias = "año")]
    year: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyListPayload {
    #[serde(alias = "professional_id", alias = "profesionalId")]
    professional_id: String,
    #[serde(default, alias = "mes")]
    month: Option<u32>,
    #[serde(default, alias = "anio")]
    year: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonthlyListPayload {
    #[serde(default, alias = "professional_id", alias = "profesionalId")]
    professional_id: Option<String>,
    #[serde(default, alias = "estado")]
    status: Option<LiquidationStatus>,
}

fn parse_monthly_period_payload(arg0: Option<Value>) -> Result<MonthlyPeriodPayload, String> {
    let payload: MonthlyPeriodPayload =
        parse_object(arg0.unwrap_or(Value::Null), "liquidation_generate_monthly")?;
    if payload.professional_id.trim().is_empty() {
        return Err("Missing professionalId".into());
    }
    Ok(payload)
}

/// Accepts a bare professional id or `{professionalId, month?, year?}`.
/// Month and year only filter when both are present.
fn parse_daily_list_payload(arg0: Option<Value>) -> Result<DailyListPayload, String> {
    let payload = match arg0 {
        Some(Value::String(professional_id)) => json!({ "professionalId": professional_id }),
        Some(v) => v,
        None => Value::Null,
    };
    let parsed: DailyListPayload = parse_object(payload, "liquidation_list_daily")?;
    if parsed.professional_id.trim().is_empty() {
        return Err("Missing professionalId".into());
    }
    Ok(parsed)
}

fn parse_monthly_list_payload(arg0: Option<Value>) -> Result<MonthlyListPayload, String> {
    match arg0 {
        Some(Value::String(professional_id)) => Ok(MonthlyListPayload {
            professional_id: Some(professional_id),
            status: None,
        }),
        Some(v @ Value::Object(_)) => parse_object(v, "liquidation_list_monthly"),
        _ => Ok(MonthlyListPayload::default()),
    }
}

fn parse_monthly_id_payload(arg0: Option<Value>) -> Result<String, String> {
    payload_arg0_as_string(
        arg0,
        &[
            "monthlyLiquidationId",
            "monthly_liquidation_id",
            "liquidacionMensualId",
            "id",
        ],
    )
    .ok_or("Missing monthlyLiquidationId".into())
}

pub async fn liquidation_compute_daily_totals(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let payload = parse_professional_day_payload(arg0, "liquidation_compute_daily_totals")?;
    let totals = liquidations::compute_daily_totals(db, &payload.professional_id, &payload.date)?;
    to_value(&totals)
}

pub async fn liquidation_generate_daily(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let payload: NewDailyLiquidation =
        parse_object(arg0.unwrap_or(Value::Null), "liquidation_generate_daily")?;
    to_value(&liquidations::generate_daily_liquidation(db, &payload)?)
}

/// An empty month is a successful response with `liquidation: null`.
pub async fn liquidation_generate_monthly(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let payload = parse_monthly_period_payload(arg0)?;
    match liquidations::generate_monthly_liquidation(
        db,
        &payload.professional_id,
        payload.month,
        payload.year,
    )? {
        MonthlyOutcome::Created(monthly) => Ok(json!({
            "liquidation": to_value(&monthly)?,
            "message": Value::Null,
        })),
        MonthlyOutcome::NoData { message } => {
            info!(
                professional_id = %payload.professional_id,
                month = payload.month,
                year = payload.year,
                "Nothing to consolidate"
            );
            Ok(json!({
                "liquidation": Value::Null,
                "message": message,
            }))
        }
    }
}

pub async fn liquidation_list_daily(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload = parse_daily_list_payload(arg0)?;
    let period = payload.month.zip(payload.year);
    to_value(&liquidations::list_daily(db, &payload.professional_id, period)?)
}

pub async fn liquidation_list_monthly(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let payload = parse_monthly_list_payload(arg0)?;
    let list = liquidations::list_monthly(db, payload.professional_id.as_deref(), payload.status)?;
    to_value(&list)
}

pub async fn liquidation_get_monthly(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let id = parse_monthly_id_payload(arg0)?;
    to_value(&liquidations::get_monthly(db, &id)?)
}

pub async fn transfer_record(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload: NewCashTransfer = parse_object(arg0.unwrap_or(Value::Null), "transfer_record")?;
    to_value(&transfers::record_cash_transfer(db, &payload)?)
}

pub async fn transfer_list(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let monthly_id = parse_monthly_id_payload(arg0).ok();
    to_value(&transfers::list_transfers(db, monthly_id.as_deref())?)
}
