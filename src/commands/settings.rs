use serde_json::{json, Value};
use tracing::info;

use crate::db::{self, DbState};

const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug)]
struct SettingKeyPayload {
    category: String,
    key: Option<String>,
}

#[derive(Debug)]
struct SettingsSetPayload {
    category: String,
    key: String,
    value_node: Value,
}

/// Splits `"liquidation.default_commission_rate"` into category and key.
fn split_dotted_key(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();
    match trimmed.split_once('.') {
        Some((cat, k)) => (cat.to_string(), Some(k.to_string())),
        None if trimmed.is_empty() => (DEFAULT_CATEGORY.to_string(), None),
        None => (DEFAULT_CATEGORY.to_string(), Some(trimmed.to_string())),
    }
}

fn parse_settings_get_payload(arg0: Option<Value>) -> SettingKeyPayload {
    match arg0 {
        Some(Value::String(raw)) => {
            let (category, key) = split_dotted_key(&raw);
            SettingKeyPayload { category, key }
        }
        Some(payload @ Value::Object(_)) => {
            let category = crate::value_str(&payload, &["category", "settingType"])
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            let key = crate::value_str(&payload, &["key", "settingKey"]);
            SettingKeyPayload { category, key }
        }
        _ => SettingKeyPayload {
            category: DEFAULT_CATEGORY.to_string(),
            key: None,
        },
    }
}

fn parse_settings_set_payload(arg0: Option<Value>) -> Result<SettingsSetPayload, String> {
    let payload = match arg0 {
        Some(payload @ Value::Object(_)) => payload,
        _ => return Err("settings_set expects an object payload".into()),
    };

    let (mut category, mut key) = match crate::value_str(&payload, &["key", "settingKey"]) {
        Some(raw) => split_dotted_key(&raw),
        None => (DEFAULT_CATEGORY.to_string(), None),
    };
    if let Some(cat) = crate::value_str(&payload, &["category", "settingType"]) {
        category = cat;
        key = crate::value_str(&payload, &["key", "settingKey"]);
    }
    let key = key.ok_or("Missing setting key")?;
    let value_node = payload
        .get("value")
        .or_else(|| payload.get("settingValue"))
        .cloned()
        .unwrap_or(Value::Null);

    Ok(SettingsSetPayload {
        category,
        key,
        value_node,
    })
}

/// Without a key the whole settings table is returned, grouped by category.
pub async fn settings_get(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let parsed = parse_settings_get_payload(arg0);
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    match parsed.key {
        Some(key) => Ok(db::get_setting(&conn, &parsed.category, &key)
            .map(Value::String)
            .unwrap_or(Value::Null)),
        None => Ok(db::get_all_settings(&conn)),
    }
}

pub async fn settings_set(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let parsed = parse_settings_set_payload(arg0)?;
    let value = match parsed.value_node {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    };

    if parsed.category == "liquidation" && parsed.key == "default_commission_rate" {
        let rate: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("Invalid commission rate: {value}"))?;
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("Commission rate must be between 0 and 100 (got {rate})"));
        }
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, &parsed.category, &parsed.key, &value)?;
    info!(category = %parsed.category, key = %parsed.key, "Setting updated");

    Ok(json!({
        "success": true,
        "category": parsed.category,
        "key": parsed.key,
        "value": value,
    }))
}
