//! Professional daily cash view and cash deliveries.
//!
//! The view is computed on read and never persisted. It reconciles two
//! representations of the same collections: itemised `appointment_payments`
//! rows and the legacy `cash_collected` / `transfer_collected` columns on the
//! appointment. Itemised payments always take precedence; the legacy columns
//! are only read for attended appointments with no payment row received by
//! the professional being viewed.
//!
//! A cash delivery moves part of a day's collected cash into the
//! professional's cash-in-hand balance and records which collection date it
//! settles, so the same day's cash cannot be delivered twice.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::appointments::{self, parse_date, Appointment, AppointmentPayment};
use crate::cash_register;
use crate::db::{self, DbState};
use crate::error::{ClinicError, ClinicResult};
use crate::liquidations::round_money;
use crate::payment_method::PaymentMethod;
use crate::professionals;

/// Tolerance for comparing currency amounts that went through f64 sums.
const CENT_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCashSummary {
    pub professional_id: String,
    pub date: String,
    pub commission_rate: f64,
    pub gross_base: f64,
    pub discounts: f64,
    pub cash_collected: f64,
    pub transfer_collected: f64,
    pub other_collected: f64,
    pub withdrawals: f64,
    /// Advisory only; the authoritative commission is the monthly liquidation.
    pub central_commission_informational: f64,
    pub delivered: f64,
    pub pending_delivery: f64,
    pub cash_in_hand: f64,
    pub appointments: Vec<Appointment>,
    pub payments: Vec<AppointmentPayment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashDelivery {
    pub id: String,
    pub professional_id: String,
    pub collection_date: String,
    pub amount: f64,
    pub notes: Option<String>,
    pub delivered_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashDeliveryRequest {
    #[serde(alias = "professional_id")]
    pub professional_id: String,
    #[serde(alias = "collection_date", alias = "collectionDate")]
    pub date: String,
    pub amount: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Buckets {
    cash: f64,
    transfer: f64,
    other: f64,
}

impl Buckets {
    fn add(&mut self, method: PaymentMethod, amount: f64) {
        match method {
            PaymentMethod::Cash => self.cash += amount,
            PaymentMethod::Transfer => self.transfer += amount,
            PaymentMethod::Card | PaymentMethod::Other => self.other += amount,
        }
    }
}

/// Build the daily cash view for one professional and date.
pub fn daily_cash_summary(
    db: &DbState,
    professional_id: &str,
    date: &str,
) -> ClinicResult<DailyCashSummary> {
    let date = parse_date(date)?.format("%Y-%m-%d").to_string();
    let conn = db.conn.lock()?;
    compute_summary(&conn, professional_id, &date)
}

fn compute_summary(
    conn: &Connection,
    professional_id: &str,
    date: &str,
) -> ClinicResult<DailyCashSummary> {
    let professional = professionals::load_professional(conn, professional_id)?
        .ok_or_else(|| ClinicError::not_found(format!("professional {professional_id}")))?;

    let appointments: Vec<Appointment> = appointments::query_for_day(conn, professional_id, date)?
        .into_iter()
        .filter(|a| a.status.is_billable())
        .collect();

    let gross_base: f64 = appointments.iter().map(Appointment::gross_base).sum();
    let discounts: f64 = appointments.iter().map(Appointment::discount).sum();

    // Itemised payments received by this professional on this date, from any
    // appointment (a patient may settle an older session today).
    let payments: Vec<AppointmentPayment> = appointments::payments_received_by(conn, professional_id)?
        .into_iter()
        .filter(|(_, resolved)| resolved == date)
        .map(|(p, _)| p)
        .collect();

    let mut buckets = Buckets::default();
    for p in &payments {
        buckets.add(p.payment_method, p.amount);
    }

    for appt in appointments
        .iter()
        .filter(|a| !has_payment_received_by(a, professional_id))
    {
        let cash = appt.cash_collected.unwrap_or(0.0);
        let transfer = appt.transfer_collected.unwrap_or(0.0);
        if cash > 0.0 || transfer > 0.0 {
            debug!(
                appointment_id = %appt.id,
                cash = cash,
                transfer = transfer,
                "Using legacy collection fields"
            );
        }
        buckets.cash += cash;
        buckets.transfer += transfer;
    }

    let withdrawals = cash_register::withdrawals_for(conn, professional_id, date)?;
    let cash_collected = round_money(buckets.cash - withdrawals);
    let delivered = delivered_for(conn, professional_id, date)?;

    let commission = (gross_base * professional.commission_rate / 100.0 - discounts).max(0.0);

    Ok(DailyCashSummary {
        professional_id: professional_id.to_string(),
        date: date.to_string(),
        commission_rate: professional.commission_rate,
        gross_base: round_money(gross_base),
        discounts: round_money(discounts),
        cash_collected,
        transfer_collected: round_money(buckets.transfer),
        other_collected: round_money(buckets.other),
        withdrawals: round_money(withdrawals),
        central_commission_informational: round_money(commission),
        delivered,
        pending_delivery: round_money((cash_collected - delivered).max(0.0)),
        cash_in_hand: professional.cash_in_hand,
        appointments,
        payments,
    })
}

/// Whether `appt` carries an itemised payment collected by `professional_id`.
/// A payment without a receiver belongs to the appointment's professional.
fn has_payment_received_by(appt: &Appointment, professional_id: &str) -> bool {
    appt.payments.iter().any(|p| {
        p.received_by_professional_id
            .as_deref()
            .unwrap_or(&appt.professional_id)
            == professional_id
    })
}

/// Deliver part of a day's collected cash into the professional's
/// cash-in-hand balance.
///
/// The delivery is linked to the collection date; the total delivered for a
/// date can never exceed that date's net cash.
pub fn deliver_cash(db: &DbState, request: &CashDeliveryRequest) -> ClinicResult<CashDelivery> {
    if request.amount <= 0.0 || !request.amount.is_finite() {
        return Err(ClinicError::validation("Delivery amount must be positive"));
    }
    let date = parse_date(&request.date)?.format("%Y-%m-%d").to_string();

    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let summary = compute_summary(tx, &request.professional_id, &date)?;
        if request.amount > summary.pending_delivery + CENT_EPSILON {
            return Err(ClinicError::conflict(format!(
                "Cannot deliver {:.2}: only {:.2} of {} cash is pending delivery",
                request.amount, summary.pending_delivery, date
            )));
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO cash_deliveries (id, professional_id, collection_date, amount, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, request.professional_id, date, request.amount, request.notes],
        )?;
        tx.execute(
            "UPDATE professionals
             SET cash_in_hand = cash_in_hand + ?1, updated_at = datetime('now')
             WHERE id = ?2",
            params![request.amount, request.professional_id],
        )?;

        info!(
            delivery_id = %id,
            professional_id = %request.professional_id,
            collection_date = %date,
            amount = request.amount,
            "Cash delivered"
        );

        let delivered_at: Option<String> = tx.query_row(
            "SELECT delivered_at FROM cash_deliveries WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(CashDelivery {
            id,
            professional_id: request.professional_id.clone(),
            collection_date: date.clone(),
            amount: request.amount,
            notes: request.notes.clone(),
            delivered_at,
        })
    })
}

/// Deliveries of one professional, newest collection date first.
pub fn list_deliveries(db: &DbState, professional_id: &str) -> ClinicResult<Vec<CashDelivery>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, professional_id, collection_date, amount, notes, delivered_at
         FROM cash_deliveries
         WHERE professional_id = ?1
         ORDER BY collection_date DESC, delivered_at DESC",
    )?;
    let rows = stmt.query_map(params![professional_id], |row| {
        Ok(CashDelivery {
            id: row.get(0)?,
            professional_id: row.get(1)?,
            collection_date: row.get(2)?,
            amount: row.get(3)?,
            notes: row.get(4)?,
            delivered_at: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn delivered_for(conn: &Connection, professional_id: &str, date: &str) -> ClinicResult<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM cash_deliveries
         WHERE professional_id = ?1 AND collection_date = ?2",
        params![professional_id, date],
        |row| row.get(0),
    )?;
    Ok(round_money(total))
}

// ===========================================================================
// Tests
// ===========================================================================
