use serde_json::{json, Value};

use crate::appointments::{self, AttendanceUpdate, NewAppointment, NewAppointmentPayment};
use crate::commands::{parse_object, parse_professional_day_payload, to_value};
use crate::db::DbState;

/// `appointment_mark_attended` also accepts a bare appointment id.
fn parse_attendance_payload(arg0: Option<Value>) -> Result<AttendanceUpdate, String> {
    let payload = match arg0 {
        Some(Value::String(appointment_id)) => json!({ "appointmentId": appointment_id }),
        Some(v) => v,
        None => Value::Null,
    };
    let update: AttendanceUpdate = parse_object(payload, "appointment_mark_attended")?;
    if update.appointment_id.trim().is_empty() {
        return Err("Missing appointmentId".into());
    }
    Ok(update)
}

pub async fn appointment_create(arg0: Option<Value>, db: &DbState) -> Result<Value, String> {
    let payload: NewAppointment = parse_object(arg0.unwrap_or(Value::Null), "appointment_create")?;
    to_value(&appointments::create_appointment(db, &payload)?)
}

pub async fn appointment_mark_attended(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let update = parse_attendance_payload(arg0)?;
    to_value(&appointments::mark_attended(db, &update)?)
}

pub async fn appointment_record_payment(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let payload: NewAppointmentPayment =
        parse_object(arg0.unwrap_or(Value::Null), "appointment_record_payment")?;
    to_value(&appointments::record_payment(db, &payload)?)
}

pub async fn appointment_list_for_day(
    arg0: Option<Value>,
    db: &DbState,
) -> Result<Value, String> {
    let payload = parse_professional_day_payload(arg0, "appointment_list_for_day")?;
    let list = appointments::list_for_day(db, &payload.professional_id, &payload.date)?;
    to_value(&list)
}
