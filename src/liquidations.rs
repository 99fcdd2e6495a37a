//! Professional settlements ("liquidaciones").
//!
//! A daily liquidation snapshots what one professional billed on one day and
//! what the central business (TENSE) is owed for it. At month end every
//! daily row not yet consumed is consolidated into a single monthly
//! liquidation, which is later settled by a cash transfer (see `transfers`).
//!
//! Consolidation runs inside one `BEGIN IMMEDIATE` transaction and claims
//! daily rows by stamping them with the new monthly id, guarded on
//! `incluida_en_mensual = 0`. A daily row therefore ends up in at most one
//! monthly liquidation even when two consolidations race.

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::appointments::{self, parse_date};
use crate::db::{self, DbState};
use crate::error::{ClinicError, ClinicResult};
use crate::professionals;

/// Message returned when a month has nothing left to consolidate.
pub const NO_DAILY_LIQUIDATIONS_MESSAGE: &str = "No hay liquidaciones diarias para este mes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationStatus {
    Pending,
    Transferred,
}

impl LiquidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LiquidationStatus::Pending => "pending",
            LiquidationStatus::Transferred => "transferred",
        }
    }

    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "transferred" => LiquidationStatus::Transferred,
            _ => LiquidationStatus::Pending,
        }
    }
}

/// The five pre-aggregated amounts a daily liquidation is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotals {
    #[serde(alias = "total_base")]
    pub total_base: f64,
    #[serde(alias = "totalFacturado", alias = "total_facturado", alias = "total_invoiced")]
    pub total_invoiced: f64,
    #[serde(alias = "comisionProfesional", alias = "comision_profesional", alias = "professional_commission")]
    pub professional_commission: f64,
    #[serde(alias = "comisionTense", alias = "comision_tense", alias = "central_commission")]
    pub central_commission: f64,
    #[serde(alias = "descuentosTense", alias = "descuentos_tense", alias = "central_discounts")]
    pub central_discounts: f64,
}

impl DailyTotals {
    fn validate(&self) -> ClinicResult<()> {
        let fields = [
            ("totalBase", self.total_base),
            ("totalInvoiced", self.total_invoiced),
            ("professionalCommission", self.professional_commission),
            ("centralCommission", self.central_commission),
            ("centralDiscounts", self.central_discounts),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ClinicError::validation(format!(
                    "{name} must be a non-negative amount"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLiquidation {
    pub id: String,
    pub professional_id: String,
    pub date: String,
    pub total_base: f64,
    pub total_invoiced: f64,
    pub professional_commission: f64,
    pub central_commission: f64,
    pub central_discounts: f64,
    pub professional_owes: f64,
    pub central_owes: f64,
    pub status: LiquidationStatus,
    pub included_in_monthly: bool,
    pub monthly_liquidation_id: Option<String>,
}

impl DailyLiquidation {
    /// Build an unsaved daily row from its totals.
    ///
    /// `professional_owes` is always 0 at the daily grain; the professional's
    /// side only becomes a balance once the month is consolidated.
    pub fn from_totals(professional_id: &str, date: &str, totals: &DailyTotals) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            professional_id: professional_id.to_string(),
            date: date.to_string(),
            total_base: totals.total_base,
            total_invoiced: totals.total_invoiced,
            professional_commission: totals.professional_commission,
            central_commission: totals.central_commission,
            central_discounts: totals.central_discounts,
            professional_owes: 0.0,
            central_owes: totals.central_commission - totals.central_discounts,
            status: LiquidationStatus::Pending,
            included_in_monthly: false,
            monthly_liquidation_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyLiquidation {
    pub id: String,
    pub professional_id: String,
    pub month: u32,
    pub year: i32,
    pub total_invoiced: f64,
    pub total_base: f64,
    pub professional_commission_sum: f64,
    pub central_commission_sum: f64,
    pub central_discounts_sum: f64,
    pub professional_final_balance: f64,
    pub central_final_balance: f64,
    pub status: LiquidationStatus,
    pub daily_count: usize,
    pub created_at: Option<String>,
}

/// Field-wise sums of a set of daily rows plus the two derived balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySums {
    pub total_base: f64,
    pub total_invoiced: f64,
    pub professional_commission_sum: f64,
    pub central_commission_sum: f64,
    pub central_discounts_sum: f64,
    pub professional_final_balance: f64,
    pub central_final_balance: f64,
}

/// Result of a consolidation attempt. An empty month is not an error.
#[derive(Debug, Clone)]
pub enum MonthlyOutcome {
    Created(MonthlyLiquidation),
    NoData { message: String },
}

/// Request for one daily liquidation.
///
/// The five amounts travel together: either all of them are given, or none
/// and they are derived from the day's attended appointments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDailyLiquidation {
    #[serde(alias = "professional_id", alias = "profesionalId")]
    pub professional_id: String,
    #[serde(alias = "fecha")]
    pub date: String,
    #[serde(default, alias = "total_base")]
    pub total_base: Option<f64>,
    #[serde(default, alias = "totalFacturado", alias = "total_facturado", alias = "total_invoiced")]
    pub total_invoiced: Option<f64>,
    #[serde(default, alias = "comisionProfesional", alias = "comision_profesional", alias = "professional_commission")]
    pub professional_commission: Option<f64>,
    #[serde(default, alias = "comisionTense", alias = "comision_tense", alias = "central_commission")]
    pub central_commission: Option<f64>,
    #[serde(default, alias = "descuentosTense", alias = "descuentos_tense", alias = "central_discounts")]
    pub central_discounts: Option<f64>,
}

impl NewDailyLiquidation {
    pub fn with_totals(professional_id: &str, date: &str, totals: DailyTotals) -> Self {
        Self {
            professional_id: professional_id.to_string(),
            date: date.to_string(),
            total_base: Some(totals.total_base),
            total_invoiced: Some(totals.total_invoiced),
            professional_commission: Some(totals.professional_commission),
            central_commission: Some(totals.central_commission),
            central_discounts: Some(totals.central_discounts),
        }
    }

    /// `Ok(None)` when no amount was sent; a partial set is rejected.
    pub fn explicit_totals(&self) -> ClinicResult<Option<DailyTotals>> {
        let fields = [
            ("totalBase", self.total_base),
            ("totalInvoiced", self.total_invoiced),
            ("professionalCommission", self.professional_commission),
            ("centralCommission", self.central_commission),
            ("centralDiscounts", self.central_discounts),
        ];
        if fields.iter().all(|(_, v)| v.is_none()) {
            return Ok(None);
        }
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ClinicError::validation(format!(
                "Incomplete daily totals, missing: {}",
                missing.join(", ")
            )));
        }
        Ok(Some(DailyTotals {
            total_base: self.total_base.unwrap_or_default(),
            total_invoiced: self.total_invoiced.unwrap_or_default(),
            professional_commission: self.professional_commission.unwrap_or_default(),
            central_commission: self.central_commission.unwrap_or_default(),
            central_discounts: self.central_discounts.unwrap_or_default(),
        }))
    }
}

/// Round a currency amount to cents.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Sum the five monetary fields of `rows` and derive the final balances.
pub fn consolidate(rows: &[DailyLiquidation]) -> MonthlySums {
    let mut sums = rows.iter().fold(MonthlySums::default(), |mut acc, row| {
        acc.total_base += row.total_base;
        acc.total_invoiced += row.total_invoiced;
        acc.professional_commission_sum += row.professional_commission;
        acc.central_commission_sum += row.central_commission;
        acc.central_discounts_sum += row.central_discounts;
        acc
    });
    sums.total_base = round_money(sums.total_base);
    sums.total_invoiced = round_money(sums.total_invoiced);
    sums.professional_commission_sum = round_money(sums.professional_commission_sum);
    sums.central_commission_sum = round_money(sums.central_commission_sum);
    sums.central_discounts_sum = round_money(sums.central_discounts_sum);
    sums.central_final_balance =
        round_money(sums.central_commission_sum - sums.central_discounts_sum);
    sums.professional_final_balance = sums.professional_commission_sum;
    sums
}

/// `[first day of month, first day of next month)` as ISO dates.
pub fn month_bounds(year: i32, month: u32) -> ClinicResult<(String, String)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ClinicError::validation(format!("Invalid month: {year}-{month}")))?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or_else(|| ClinicError::validation(format!("Invalid month: {year}-{month}")))?;
    Ok((
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Daily liquidation
// ---------------------------------------------------------------------------

/// Derive the daily totals from a professional's attended appointments.
///
/// invoiced = Σ final price; professional commission = invoiced × rate / 100;
/// central commission = invoiced − professional commission;
/// central discounts = Σ max(0, base − final).
pub fn compute_daily_totals(db: &DbState, professional_id: &str, date: &str) -> ClinicResult<DailyTotals> {
    let date = parse_date(date)?.format("%Y-%m-%d").to_string();
    let conn = db.conn.lock()?;
    totals_from_appointments(&conn, professional_id, &date)
}

fn totals_from_appointments(
    conn: &Connection,
    professional_id: &str,
    date: &str,
) -> ClinicResult<DailyTotals> {
    let professional = professionals::load_professional(conn, professional_id)?
        .ok_or_else(|| ClinicError::not_found(format!("professional {professional_id}")))?;
    let rate = professional.commission_rate;

    let mut totals = DailyTotals::default();
    for appt in appointments::query_for_day(conn, professional_id, date)?
        .iter()
        .filter(|a| a.status.is_billable())
    {
        totals.total_base += appt.gross_base();
        totals.total_invoiced += appt.invoiced();
        totals.central_discounts += appt.discount();
    }
    totals.total_base = round_money(totals.total_base);
    totals.total_invoiced = round_money(totals.total_invoiced);
    totals.central_discounts = round_money(totals.central_discounts);
    totals.professional_commission = round_money(totals.total_invoiced * rate / 100.0);
    totals.central_commission = round_money(totals.total_invoiced - totals.professional_commission);
    Ok(totals)
}

/// Persist one daily liquidation for `(professional, date)`.
pub fn generate_daily_liquidation(
    db: &DbState,
    input: &NewDailyLiquidation,
) -> ClinicResult<DailyLiquidation> {
    let professional_id = input.professional_id.trim();
    if professional_id.is_empty() {
        return Err(ClinicError::validation("Missing professionalId"));
    }
    let date = parse_date(&input.date)?.format("%Y-%m-%d").to_string();

    let explicit = input.explicit_totals()?;

    let conn = db.conn.lock()?;
    if professionals::load_professional(&conn, professional_id)?.is_none() {
        return Err(ClinicError::not_found(format!("professional {professional_id}")));
    }
    let totals = match explicit {
        Some(t) => t,
        None => totals_from_appointments(&conn, professional_id, &date)?,
    };
    totals.validate()?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM liquidaciones_diarias WHERE profesional_id = ?1 AND fecha = ?2",
            params![professional_id, date],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        return Err(ClinicError::conflict(format!(
            "Daily liquidation already exists for {professional_id} on {date} ({existing_id})"
        )));
    }

    let row = DailyLiquidation::from_totals(professional_id, &date, &totals);
    conn.execute(
        "INSERT INTO liquidaciones_diarias (
            id, profesional_id, fecha, total_base, total_facturado,
            comision_profesional, comision_tense, descuentos_tense,
            profesional_debe, tense_debe, estado, incluida_en_mensual
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)",
        params![
            row.id,
            row.professional_id,
            row.date,
            row.total_base,
            row.total_invoiced,
            row.professional_commission,
            row.central_commission,
            row.central_discounts,
            row.professional_owes,
            row.central_owes,
            row.status.as_str(),
        ],
    )?;

    info!(
        liquidation_id = %row.id,
        professional_id = %row.professional_id,
        date = %row.date,
        central_owes = row.central_owes,
        "Daily liquidation generated"
    );
    Ok(row)
}

// ---------------------------------------------------------------------------
// Monthly liquidation
// ---------------------------------------------------------------------------

/// Consolidate every unconsumed daily liquidation of `professional_id` in
/// `month`/`year` into one monthly liquidation.
///
/// The insert and the flag flip commit together or not at all.
pub fn generate_monthly_liquidation(
    db: &DbState,
    professional_id: &str,
    month: u32,
    year: i32,
) -> ClinicResult<MonthlyOutcome> {
    if professional_id.trim().is_empty() {
        return Err(ClinicError::validation("Missing professionalId"));
    }
    if !(1..=12).contains(&month) {
        return Err(ClinicError::validation(format!(
            "Month must be between 1 and 12 (got {month})"
        )));
    }
    let (start, end) = month_bounds(year, month)?;

    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let rows = query_daily(
            tx,
            "WHERE profesional_id = ?1 AND incluida_en_mensual = 0
               AND fecha >= ?2 AND fecha < ?3",
            params![professional_id, start, end],
        )?;

        if rows.is_empty() {
            info!(
                professional_id = %professional_id,
                month = month,
                year = year,
                "No daily liquidations to consolidate"
            );
            return Ok(MonthlyOutcome::NoData {
                message: NO_DAILY_LIQUIDATIONS_MESSAGE.to_string(),
            });
        }

        let sums = consolidate(&rows);
        let monthly_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO liquidaciones_mensuales (
                id, profesional_id, mes, anio, total_facturado_mes, total_base_mes,
                comision_profesional_mes, comision_tense_mes, descuentos_tense_mes,
                saldo_profesional_final, saldo_tense_final, estado
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending')",
            params![
                monthly_id,
                professional_id,
                month,
                year,
                sums.total_invoiced,
                sums.total_base,
                sums.professional_commission_sum,
                sums.central_commission_sum,
                sums.central_discounts_sum,
                sums.professional_final_balance,
                sums.central_final_balance,
            ],
        )?;

        let placeholders = vec!["?"; rows.len()].join(", ");
        let sql = format!(
            "UPDATE liquidaciones_diarias
             SET incluida_en_mensual = 1, liquidacion_mensual_id = ?
             WHERE incluida_en_mensual = 0 AND id IN ({placeholders})"
        );
        let mut bind: Vec<&str> = Vec::with_capacity(rows.len() + 1);
        bind.push(&monthly_id);
        bind.extend(rows.iter().map(|r| r.id.as_str()));
        let claimed = tx.execute(&sql, params_from_iter(bind))?;

        if claimed != rows.len() {
            warn!(
                professional_id = %professional_id,
                expected = rows.len(),
                claimed = claimed,
                "Daily liquidations claimed concurrently, aborting consolidation"
            );
            return Err(ClinicError::conflict(
                "Daily liquidations were consolidated concurrently; retry",
            ));
        }

        info!(
            monthly_id = %monthly_id,
            professional_id = %professional_id,
            month = month,
            year = year,
            daily_count = rows.len(),
            central_final_balance = sums.central_final_balance,
            "Monthly liquidation generated"
        );

        load_monthly(tx, &monthly_id)?
            .map(MonthlyOutcome::Created)
            .ok_or_else(|| ClinicError::not_found(format!("monthly liquidation {monthly_id}")))
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Daily liquidations of a professional, optionally restricted to a month.
pub fn list_daily(
    db: &DbState,
    professional_id: &str,
    period: Option<(u32, i32)>,
) -> ClinicResult<Vec<DailyLiquidation>> {
    let conn = db.conn.lock()?;
    match period {
        Some((month, year)) => {
            let (start, end) = month_bounds(year, month)?;
            query_daily(
                &conn,
                "WHERE profesional_id = ?1 AND fecha >= ?2 AND fecha < ?3",
                params![professional_id, start, end],
            )
        }
        None => query_daily(&conn, "WHERE profesional_id = ?1", params![professional_id]),
    }
}

pub fn list_monthly(
    db: &DbState,
    professional_id: Option<&str>,
    status: Option<LiquidationStatus>,
) -> ClinicResult<Vec<MonthlyLiquidation>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "{MONTHLY_SELECT}
         WHERE (?1 IS NULL OR m.profesional_id = ?1)
           AND (?2 IS NULL OR m.estado = ?2)
         ORDER BY m.anio DESC, m.mes DESC, m.created_at DESC"
    ))?;
    let rows = stmt.query_map(
        params![professional_id, status.map(LiquidationStatus::as_str)],
        map_monthly,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_monthly(db: &DbState, id: &str) -> ClinicResult<MonthlyLiquidation> {
    let conn = db.conn.lock()?;
    load_monthly(&conn, id)?.ok_or_else(|| ClinicError::not_found(format!("monthly liquidation {id}")))
}

const MONTHLY_SELECT: &str = "SELECT m.id, m.profesional_id, m.mes, m.anio, m.total_facturado_mes,
        m.total_base_mes, m.comision_profesional_mes, m.comision_tense_mes,
        m.descuentos_tense_mes, m.saldo_profesional_final, m.saldo_tense_final,
        m.estado, m.created_at,
        (SELECT COUNT(*) FROM liquidaciones_diarias d WHERE d.liquidacion_mensual_id = m.id)
     FROM liquidaciones_mensuales m";

pub(crate) fn load_monthly(conn: &Connection, id: &str) -> ClinicResult<Option<MonthlyLiquidation>> {
    Ok(conn
        .query_row(
            &format!("{MONTHLY_SELECT} WHERE m.id = ?1"),
            params![id],
            map_monthly,
        )
        .optional()?)
}

fn map_monthly(row: &rusqlite::Row) -> rusqlite::Result<MonthlyLiquidation> {
    Ok(MonthlyLiquidation {
        id: row.get(0)?,
        professional_id: row.get(1)?,
        month: row.get(2)?,
        year: row.get(3)?,
        total_invoiced: row.get(4)?,
        total_base: row.get(5)?,
        professional_commission_sum: row.get(6)?,
        central_commission_sum: row.get(7)?,
        central_discounts_sum: row.get(8)?,
        professional_final_balance: row.get(9)?,
        central_final_balance: row.get(10)?,
        status: LiquidationStatus::parse(&row.get::<_, String>(11)?),
        created_at: row.get(12)?,
        daily_count: row.get::<_, i64>(13)?.max(0) as usize,
    })
}

fn query_daily(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> ClinicResult<Vec<DailyLiquidation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, profesional_id, fecha, total_base, total_facturado,
                comision_profesional, comision_tense, descuentos_tense,
                profesional_debe, tense_debe, estado, incluida_en_mensual,
                liquidacion_mensual_id
         FROM liquidaciones_diarias
         {filter}
         ORDER BY fecha"
    ))?;
    let rows = stmt.query_map(params, |row| {
        Ok(DailyLiquidation {
            id: row.get(0)?,
            professional_id: row.get(1)?,
            date: row.get(2)?,
            total_base: row.get(3)?,
            total_invoiced: row.get(4)?,
            professional_commission: row.get(5)?,
            central_commission: row.get(6)?,
            central_discounts: row.get(7)?,
            professional_owes: row.get(8)?,
            central_owes: row.get(9)?,
            status: LiquidationStatus::parse(&row.get::<_, String>(10)?),
            included_in_monthly: row.get::<_, i64>(11)? != 0,
            monthly_liquidation_id: row.get(12)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ===========================================================================
// Tests
// ===========================================================================
