//! Appointments and their itemised payments.
//!
//! An appointment carries a base price (list price) and a final price (after
//! covenant or manual discounts). Older rows only have the aggregate
//! `cash_collected` / `transfer_collected` columns; newer ones record each
//! payment in `appointment_payments`.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{ClinicError, ClinicResult};
use crate::payment_method::PaymentMethod;
use crate::professionals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Attended,
    Closed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Attended => "attended",
            AppointmentStatus::Closed => "closed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "attended" => AppointmentStatus::Attended,
            "closed" => AppointmentStatus::Closed,
            "cancelled" => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Scheduled,
        }
    }

    /// Attended and closed appointments both count as billable.
    pub fn is_billable(self) -> bool {
        matches!(self, AppointmentStatus::Attended | AppointmentStatus::Closed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPayment {
    pub id: String,
    pub appointment_id: String,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub payment_date: Option<String>,
    pub received_by_professional_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub professional_id: String,
    pub patient_name: String,
    pub covenant: Option<String>,
    pub date: String,
    pub start_time: Option<String>,
    pub status: AppointmentStatus,
    pub base_price: Option<f64>,
    pub final_price: Option<f64>,
    pub cash_collected: Option<f64>,
    pub transfer_collected: Option<f64>,
    pub payments: Vec<AppointmentPayment>,
}

impl Appointment {
    /// List price, falling back to the final price for rows without one.
    pub fn gross_base(&self) -> f64 {
        self.base_price.or(self.final_price).unwrap_or(0.0)
    }

    /// Amount actually billed to the patient.
    pub fn invoiced(&self) -> f64 {
        self.final_price.or(self.base_price).unwrap_or(0.0)
    }

    /// Discount granted on this appointment, never negative.
    pub fn discount(&self) -> f64 {
        match (self.base_price, self.final_price) {
            (Some(base), Some(fin)) => (base - fin).max(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    #[serde(alias = "professional_id")]
    pub professional_id: String,
    #[serde(alias = "patient_name")]
    pub patient_name: String,
    #[serde(default)]
    pub covenant: Option<String>,
    pub date: String,
    #[serde(default, alias = "start_time")]
    pub start_time: Option<String>,
    #[serde(default, alias = "base_price")]
    pub base_price: Option<f64>,
    #[serde(default, alias = "final_price")]
    pub final_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUpdate {
    #[serde(alias = "appointment_id", alias = "id")]
    pub appointment_id: String,
    #[serde(default, alias = "final_price")]
    pub final_price: Option<f64>,
    #[serde(default, alias = "cash_collected")]
    pub cash_collected: Option<f64>,
    #[serde(default, alias = "transfer_collected")]
    pub transfer_collected: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointmentPayment {
    #[serde(alias = "appointment_id")]
    pub appointment_id: String,
    pub amount: f64,
    #[serde(alias = "payment_method", alias = "method")]
    pub payment_method: String,
    #[serde(default, alias = "payment_date")]
    pub payment_date: Option<String>,
    #[serde(default, alias = "received_by_professional_id")]
    pub received_by_professional_id: Option<String>,
}

/// Parse a `YYYY-MM-DD` calendar date.
pub(crate) fn parse_date(raw: &str) -> ClinicResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ClinicError::validation(format!("Invalid date (expected YYYY-MM-DD): {raw}")))
}

/// Calendar-date part of a stored date or timestamp (`2024-03-05T10:00:00Z` -> `2024-03-05`).
pub(crate) fn date_part(raw: &str) -> &str {
    raw.get(..10).unwrap_or(raw)
}

fn validate_price(label: &str, value: Option<f64>) -> ClinicResult<()> {
    match value {
        Some(v) if v < 0.0 || !v.is_finite() => Err(ClinicError::validation(format!(
            "{label} must be a non-negative amount"
        ))),
        _ => Ok(()),
    }
}

pub fn create_appointment(db: &DbState, input: &NewAppointment) -> ClinicResult<Appointment> {
    let date = parse_date(&input.date)?;
    if input.patient_name.trim().is_empty() {
        return Err(ClinicError::validation("Missing patient name"));
    }
    validate_price("basePrice", input.base_price)?;
    validate_price("finalPrice", input.final_price)?;

    let conn = db.conn.lock()?;
    if professionals::load_professional(&conn, &input.professional_id)?.is_none() {
        return Err(ClinicError::not_found(format!(
            "professional {}",
            input.professional_id
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO appointments (
            id, professional_id, patient_name, covenant, appointment_date,
            start_time, status, base_price, final_price
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            input.professional_id,
            input.patient_name.trim(),
            input.covenant,
            date.format("%Y-%m-%d").to_string(),
            input.start_time,
            AppointmentStatus::Scheduled.as_str(),
            input.base_price,
            input.final_price,
        ],
    )?;

    info!(appointment_id = %id, professional_id = %input.professional_id, "Appointment created");
    load_appointment(&conn, &id)?.ok_or_else(|| ClinicError::not_found(format!("appointment {id}")))
}

/// Mark an appointment attended, optionally fixing its final price and the
/// legacy aggregate collection fields.
pub fn mark_attended(db: &DbState, update: &AttendanceUpdate) -> ClinicResult<Appointment> {
    validate_price("finalPrice", update.final_price)?;
    validate_price("cashCollected", update.cash_collected)?;
    validate_price("transferCollected", update.transfer_collected)?;

    let conn = db.conn.lock()?;
    let existing = load_appointment(&conn, &update.appointment_id)?.ok_or_else(|| {
        ClinicError::not_found(format!("appointment {}", update.appointment_id))
    })?;
    if existing.status == AppointmentStatus::Cancelled {
        return Err(ClinicError::conflict(format!(
            "Appointment {} is cancelled",
            existing.id
        )));
    }

    conn.execute(
        "UPDATE appointments SET
            status = 'attended',
            final_price = COALESCE(?1, final_price),
            cash_collected = COALESCE(?2, cash_collected),
            transfer_collected = COALESCE(?3, transfer_collected),
            updated_at = datetime('now')
         WHERE id = ?4",
        params![
            update.final_price,
            update.cash_collected,
            update.transfer_collected,
            update.appointment_id,
        ],
    )?;

    info!(appointment_id = %update.appointment_id, "Appointment marked attended");
    load_appointment(&conn, &update.appointment_id)?
        .ok_or_else(|| ClinicError::not_found(format!("appointment {}", update.appointment_id)))
}

/// Record one itemised payment against an appointment.
///
/// The method string is normalised here; the payment date defaults to today
/// and the receiving professional defaults to the appointment's professional.
pub fn record_payment(
    db: &DbState,
    input: &NewAppointmentPayment,
) -> ClinicResult<AppointmentPayment> {
    if input.amount <= 0.0 || !input.amount.is_finite() {
        return Err(ClinicError::validation("Amount must be positive"));
    }
    let method: PaymentMethod = input
        .payment_method
        .parse()
        .map_err(ClinicError::Validation)?;
    let payment_date = match input.payment_date.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_date(date_part(raw))?
            .format("%Y-%m-%d")
            .to_string(),
        _ => Utc::now().format("%Y-%m-%d").to_string(),
    };

    let conn = db.conn.lock()?;
    let owner: Option<String> = conn
        .query_row(
            "SELECT professional_id FROM appointments WHERE id = ?1",
            params![input.appointment_id],
            |row| row.get(0),
        )
        .optional()?;
    let owner = owner
        .ok_or_else(|| ClinicError::not_found(format!("appointment {}", input.appointment_id)))?;
    let received_by = input
        .received_by_professional_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(owner);

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO appointment_payments (
            id, appointment_id, amount, payment_method, payment_date, received_by_professional_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            input.appointment_id,
            input.amount,
            method,
            payment_date,
            received_by
        ],
    )?;

    info!(
        payment_id = %id,
        appointment_id = %input.appointment_id,
        method = %method,
        amount = input.amount,
        "Appointment payment recorded"
    );

    Ok(AppointmentPayment {
        id,
        appointment_id: input.appointment_id.clone(),
        amount: input.amount,
        payment_method: method,
        payment_date: Some(payment_date),
        received_by_professional_id: Some(received_by),
    })
}

/// All appointments of a professional on one date, with their payments.
pub fn list_for_day(db: &DbState, professional_id: &str, date: &str) -> ClinicResult<Vec<Appointment>> {
    let date = parse_date(date)?.format("%Y-%m-%d").to_string();
    let conn = db.conn.lock()?;
    query_for_day(&conn, professional_id, &date)
}

pub(crate) fn query_for_day(
    conn: &Connection,
    professional_id: &str,
    date: &str,
) -> ClinicResult<Vec<Appointment>> {
    let mut stmt = conn.prepare(
        "SELECT id, professional_id, patient_name, covenant, appointment_date, start_time,
                status, base_price, final_price, cash_collected, transfer_collected
         FROM appointments
         WHERE professional_id = ?1 AND appointment_date = ?2
         ORDER BY start_time, created_at",
    )?;
    let rows = stmt.query_map(params![professional_id, date], map_appointment)?;
    let mut appointments = rows.collect::<Result<Vec<_>, _>>()?;
    for appt in &mut appointments {
        appt.payments = payments_for(conn, &appt.id)?;
    }
    Ok(appointments)
}

/// Every payment received by `professional_id`, regardless of which
/// appointment (or which day's appointment) it belongs to. The resolved
/// date is the payment date, or the appointment date for rows without one.
pub(crate) fn payments_received_by(
    conn: &Connection,
    professional_id: &str,
) -> ClinicResult<Vec<(AppointmentPayment, String)>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.appointment_id, p.amount, p.payment_method, p.payment_date,
                p.received_by_professional_id, a.appointment_date
         FROM appointment_payments p
         INNER JOIN appointments a ON a.id = p.appointment_id
         WHERE p.received_by_professional_id = ?1
         ORDER BY p.created_at",
    )?;
    let rows = stmt.query_map(params![professional_id], |row| {
        let payment = map_payment(row)?;
        let appt_date: String = row.get(6)?;
        let resolved = payment
            .payment_date
            .as_deref()
            .map(|d| date_part(d).to_string())
            .unwrap_or_else(|| date_part(&appt_date).to_string());
        Ok((payment, resolved))
    })?;

    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(p) => out.push(p),
            Err(e) => warn!("skipping malformed appointment payment row: {e}"),
        }
    }
    Ok(out)
}

fn payments_for(conn: &Connection, appointment_id: &str) -> ClinicResult<Vec<AppointmentPayment>> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, amount, payment_method, payment_date, received_by_professional_id
         FROM appointment_payments
         WHERE appointment_id = ?1
         ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![appointment_id], map_payment)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_appointment(conn: &Connection, id: &str) -> ClinicResult<Option<Appointment>> {
    let appt = conn
        .query_row(
            "SELECT id, professional_id, patient_name, covenant, appointment_date, start_time,
                    status, base_price, final_price, cash_collected, transfer_collected
             FROM appointments WHERE id = ?1",
            params![id],
            map_appointment,
        )
        .optional()?;
    match appt {
        Some(mut a) => {
            a.payments = payments_for(conn, &a.id)?;
            Ok(Some(a))
        }
        None => Ok(None),
    }
}

fn map_appointment(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        professional_id: row.get(1)?,
        patient_name: row.get(2)?,
        covenant: row.get(3)?,
        date: row.get(4)?,
        start_time: row.get(5)?,
        status: AppointmentStatus::parse(&row.get::<_, String>(6)?),
        base_price: row.get(7)?,
        final_price: row.get(8)?,
        cash_collected: row.get(9)?,
        transfer_collected: row.get(10)?,
        payments: Vec::new(),
    })
}

fn map_payment(row: &rusqlite::Row) -> rusqlite::Result<AppointmentPayment> {
    Ok(AppointmentPayment {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        amount: row.get(2)?,
        payment_method: row.get(3)?,
        payment_date: row.get(4)?,
        received_by_professional_id: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        conn.execute(
            "INSERT INTO professionals (id, name, commission_rate) VALUES ('prof-1', 'Ana', 40)",
            [],
        )
        .expect("seed professional");
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn new_appt(date: &str) -> NewAppointment {
        NewAppointment {
            professional_id: "prof-1".into(),
            patient_name: "Juan Pérez".into(),
            covenant: Some("OSDE".into()),
            date: date.into(),
            start_time: Some("10:00".into()),
            base_price: Some(1000.0),
            final_price: Some(800.0),
        }
    }

    #[test]
    fn test_create_and_attend() {
        let db = test_db();
        let appt = create_appointment(&db, &new_appt("2024-03-05")).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Scheduled);
        assert_eq!(appt.discount(), 200.0);

        let attended = mark_attended(
            &db,
            &AttendanceUpdate {
                appointment_id: appt.id.clone(),
                final_price: None,
                cash_collected: Some(800.0),
                transfer_collected: None,
            },
        )
        .unwrap();
        assert_eq!(attended.status, AppointmentStatus::Attended);
        assert_eq!(attended.final_price, Some(800.0));
        assert_eq!(attended.cash_collected, Some(800.0));
    }

    #[test]
    fn test_create_rejects_unknown_professional_and_bad_date() {
        let db = test_db();
        let mut input = new_appt("2024-03-05");
        input.professional_id = "ghost".into();
        assert!(matches!(
            create_appointment(&db, &input),
            Err(ClinicError::NotFound(_))
        ));
        assert!(matches!(
            create_appointment(&db, &new_appt("05/03/2024")),
            Err(ClinicError::Validation(_))
        ));
    }

    #[test]
    fn test_record_payment_normalizes_method_and_defaults_receiver() {
        let db = test_db();
        let appt = create_appointment(&db, &new_appt("2024-03-05")).unwrap();
        let payment = record_payment(
            &db,
            &NewAppointmentPayment {
                appointment_id: appt.id.clone(),
                amount: 500.0,
                payment_method: "Efectivo".into(),
                payment_date: Some("2024-03-05T14:30:00Z".into()),
                received_by_professional_id: None,
            },
        )
        .unwrap();
        assert_eq!(payment.payment_method, PaymentMethod::Cash);
        assert_eq!(payment.payment_date.as_deref(), Some("2024-03-05"));
        assert_eq!(payment.received_by_professional_id.as_deref(), Some("prof-1"));

        let day = list_for_day(&db, "prof-1", "2024-03-05").unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].payments.len(), 1);
        assert_eq!(day[0].payments[0].payment_method, PaymentMethod::Cash);
    }

    #[test]
    fn test_record_payment_rejects_non_positive_amount() {
        let db = test_db();
        let appt = create_appointment(&db, &new_appt("2024-03-05")).unwrap();
        let err = record_payment(
            &db,
            &NewAppointmentPayment {
                appointment_id: appt.id,
                amount: 0.0,
                payment_method: "cash".into(),
                payment_date: None,
                received_by_professional_id: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ClinicError::Validation(_)));
    }

    #[test]
    fn test_gross_base_falls_back_to_final_price() {
        let db = test_db();
        let mut input = new_appt("2024-03-05");
        input.base_price = None;
        let appt = create_appointment(&db, &input).unwrap();
        assert_eq!(appt.gross_base(), 800.0);
        assert_eq!(appt.discount(), 0.0);
    }

    #[test]
    fn test_date_part() {
        assert_eq!(date_part("2024-03-05T10:00:00Z"), "2024-03-05");
        assert_eq!(date_part("2024-03-05"), "2024-03-05");
        assert_eq!(date_part("short"), "short");
    }
}
