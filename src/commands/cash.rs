use chrono::Utc;
use serde_json::Value;

use crate::cash_register::{self, NewTransaction};
use crate::commands::{parse_object, parse_professional_day_payload, to_value};
use crate::daily_cash::{self, CashDeliveryRequest};
use crate::db::DbState;
use crate::payload_arg0_as_string;

/// Date for the register status; today when omitted.
fn parse_register_date_payload(arg0: Option<Value>) -> String {
    payload_arg0_as_string(arg0, &["date", "fecha"])
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string())
}

fn parse_professional_payload(arg0: Option<Value>) -> Result<String, String> {
    payload_arg0_as_string(
        arg0,
        &["professionalId", "professional_id", "profesionalId", "id"],
    )
    .ok_or("Missing professionalId".into())
}

pub async fn cash_register_record(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload: NewTransaction =
        parse_object(arg0.unwrap_or(Value::Null), "cash_register_record")?;
    to_value(&cash_register::record_transaction(db, &payload)?)
}

pub async fn cash_register_status(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let date = parse_register_date_payload(arg0);
    to_value(&cash_register::register_status(db, &date)?)
}

pub async fn cash_view_daily(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload = parse_professional_day_payload(arg0, "cash_view_daily")?;
    let summary = daily_cash::daily_cash_summary(db, &payload.professional_id, &payload.date)?;
    to_value(&summary)
}

pub async fn cash_deliver(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let request: CashDeliveryRequest = parse_object(arg0.unwrap_or(Value::Null), "cash_deliver")?;
    to_value(&daily_cash::deliver_cash(db, &request)?)
}

pub async fn cash_delivery_list(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let professional_id = parse_professional_payload(arg0)?;
    to_value(&daily_cash::list_deliveries(db, &professional_id)?)
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_register_date_payload_supports_string_object_and_default() {
        assert_eq!(
            parse_register_date_payload(Some(json!("2024-03-05"))),
            "2024-03-05"
        );
        assert_eq!(
            parse_register_date_payload(Some(json!({ "fecha": "2024-03-06" }))),
            "2024-03-06"
        );
        let today = parse_register_date_payload(None);
        assert_eq!(today.len(), 10);
    }

    #[test]
    fn delivery_payload_accepts_collection_date_alias() {
        let request: CashDeliveryRequest = parse_object(
            json!({
                "professional_id": "prof-1",
                "collectionDate": "2024-03-05",
                "amount": 120.5
            }),
            "cash_deliver",
        )
        .expect("delivery payload should parse");
        assert_eq!(request.date, "2024-03-05");
        assert_eq!(request.amount, 120.5);
        assert!(request.notes.is_none());
    }

    #[test]
    fn transaction_payload_accepts_type_alias() {
        let tx: NewTransaction = parse_object(
            json!({
                "amount": 80,
                "type": "professional_withdrawal",
                "method": "cash",
                "professionalId": "prof-1"
            }),
            "cash_register_record",
        )
        .expect("transaction payload should parse");
        assert_eq!(tx.transaction_type, "professional_withdrawal");
        assert_eq!(tx.payment_method.as_deref(), Some("cash"));
    }
}
