use serde_json::Value;

use crate::db::DbState;
use crate::diagnostics;

pub async fn app_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

pub async fn app_health(db: &DbState) -> Result<Value, String> {
    diagnostics::get_system_health(db)
}
