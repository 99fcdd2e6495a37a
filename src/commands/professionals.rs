use serde::Deserialize;
use serde_json::Value;

use crate::commands::{parse_object, to_value};
use crate::db::DbState;
use crate::payload_arg0_as_string;
use crate::professionals::{self, NewProfessional};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfessionalListPayload {
    #[serde(default, alias = "include_inactive")]
    include_inactive: Option<bool>,
}

fn parse_professional_id_payload(arg0: Option<Value>) -> Result<String, String> {
    payload_arg0_as_string(
        arg0,
        &["professionalId", "professional_id", "profesionalId", "id"],
    )
    .ok_or("Missing professionalId".into())
}

fn parse_professional_list_payload(
    arg0: Option<Value>,
) -> Result<ProfessionalListPayload, String> {
    match arg0 {
        Some(Value::Bool(include_inactive)) => Ok(ProfessionalListPayload {
            include_inactive: Some(include_inactive),
        }),
        Some(v @ Value::Object(_)) => parse_object(v, "professional_list"),
        _ => Ok(ProfessionalListPayload::default()),
    }
}

pub async fn professional_create(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload: NewProfessional =
        parse_object(arg0.unwrap_or(Value::Null), "professional_create")?;
    let professional = professionals::create_professional(db, &payload)?;
    to_value(&professional)
}

pub async fn professional_get(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let id = parse_professional_id_payload(arg0)?;
    to_value(&professionals::get_professional(db, &id)?)
}

pub async fn professional_list(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload = parse_professional_list_payload(arg0)?;
    let list = professionals::list_professionals(db, payload.include_inactive.unwrap_or(false))?;
    to_value(&list)
}
