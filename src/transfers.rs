//! Cash transfers settling a monthly liquidation.
//!
//! A transfer moves the central share of a month from the professional's
//! cash ("professional_cash") to the admin cash box ("admin_cash") and marks
//! the monthly liquidation as transferred. Both writes share a transaction.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{ClinicError, ClinicResult};
use crate::liquidations::{self, LiquidationStatus};

pub const ORIGIN_PROFESSIONAL_CASH: &str = "professional_cash";
pub const DESTINATION_ADMIN_CASH: &str = "admin_cash";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashTransfer {
    pub id: String,
    pub monthly_liquidation_id: String,
    pub professional_id: Option<String>,
    pub amount: f64,
    pub origin: String,
    pub destination: String,
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCashTransfer {
    #[serde(alias = "monthly_liquidation_id", alias = "liquidacionMensualId")]
    pub monthly_liquidation_id: String,
    #[serde(alias = "monto")]
    pub amount: f64,
    #[serde(default, alias = "professional_id", alias = "profesionalId")]
    pub professional_id: Option<String>,
}

/// Record the transfer and flip the monthly liquidation to `transferred`.
///
/// Rejects unknown or already-transferred liquidations. When no professional
/// is given the liquidation's own professional is recorded.
pub fn record_cash_transfer(db: &DbState, input: &NewCashTransfer) -> ClinicResult<CashTransfer> {
    if input.amount <= 0.0 || !input.amount.is_finite() {
        return Err(ClinicError::validation("Transfer amount must be positive"));
    }

    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let monthly = liquidations::load_monthly(tx, &input.monthly_liquidation_id)?
            .ok_or_else(|| {
                ClinicError::not_found(format!(
                    "monthly liquidation {}",
                    input.monthly_liquidation_id
                ))
            })?;
        if monthly.status == LiquidationStatus::Transferred {
            return Err(ClinicError::conflict(format!(
                "Monthly liquidation {} was already transferred",
                monthly.id
            )));
        }
        if (monthly.central_final_balance - input.amount).abs() > 0.005 {
            warn!(
                monthly_id = %monthly.id,
                expected = monthly.central_final_balance,
                amount = input.amount,
                "Transfer amount differs from the central final balance"
            );
        }

        let transfer = CashTransfer {
            id: Uuid::new_v4().to_string(),
            monthly_liquidation_id: monthly.id.clone(),
            professional_id: input
                .professional_id
                .clone()
                .filter(|p| !p.trim().is_empty())
                .or(Some(monthly.professional_id.clone())),
            amount: input.amount,
            origin: ORIGIN_PROFESSIONAL_CASH.to_string(),
            destination: DESTINATION_ADMIN_CASH.to_string(),
            date: Utc::now().format("%Y-%m-%d").to_string(),
        };

        tx.execute(
            "INSERT INTO traspasos_caja (
                id, liquidacion_mensual_id, profesional_id, monto, origen, destino, fecha
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transfer.id,
                transfer.monthly_liquidation_id,
                transfer.professional_id,
                transfer.amount,
                transfer.origin,
                transfer.destination,
                transfer.date,
            ],
        )?;

        let updated = tx.execute(
            "UPDATE liquidaciones_mensuales
             SET estado = 'transferred', updated_at = datetime('now')
             WHERE id = ?1 AND estado = 'pending'",
            params![monthly.id],
        )?;
        if updated != 1 {
            return Err(ClinicError::conflict(format!(
                "Monthly liquidation {} changed status during transfer",
                monthly.id
            )));
        }

        info!(
            transfer_id = %transfer.id,
            monthly_id = %monthly.id,
            amount = transfer.amount,
            "Cash transfer recorded"
        );
        Ok(transfer)
    })
}

/// Transfers, newest first, optionally for one monthly liquidation.
pub fn list_transfers(
    db: &DbState,
    monthly_liquidation_id: Option<&str>,
) -> ClinicResult<Vec<CashTransfer>> {
    let conn = db.conn.lock()?;
    query_transfers(&conn, monthly_liquidation_id)
}

fn query_transfers(
    conn: &Connection,
    monthly_liquidation_id: Option<&str>,
) -> ClinicResult<Vec<CashTransfer>> {
    let mut stmt = conn.prepare(
        "SELECT id, liquidacion_mensual_id, profesional_id, monto, origen, destino, fecha
         FROM traspasos_caja
         WHERE ?1 IS NULL OR liquidacion_mensual_id = ?1
         ORDER BY fecha DESC, created_at DESC",
    )?;
    let rows = stmt.query_map(params![monthly_liquidation_id], |row| {
        Ok(CashTransfer {
            id: row.get(0)?,
            monthly_liquidation_id: row.get(1)?,
            professional_id: row.get(2)?,
            amount: row.get(3)?,
            origin: row.get(4)?,
            destination: row.get(5)?,
            date: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::liquidations::{
        generate_daily_liquidation, generate_monthly_liquidation, DailyTotals, MonthlyOutcome,
        NewDailyLiquidation,
    };
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

    fn seed_monthly(db: &DbState) -> String {
        generate_daily_liquidation(
            db,
            &NewDailyLiquidation::with_totals(
                "prof-1",
                "2024-03-04",
                DailyTotals {
                    total_base: 1000.0,
                    total_invoiced: 1200.0,
                    professional_commission: 400.0,
                    central_commission: 300.0,
                    central_discounts: 50.0,
                },
            ),
        )
        .unwrap();
        match generate_monthly_liquidation(db, "prof-1", 3, 2024).unwrap() {
            MonthlyOutcome::Created(m) => m.id,
            MonthlyOutcome::NoData { .. } => panic!("expected monthly"),
        }
    }

    fn transfer_count(db: &DbState) -> i64 {
        let conn = db.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM traspasos_caja", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_transfer_marks_monthly_transferred() {
        let db = test_db();
        let monthly_id = seed_monthly(&db);

        let transfer = record_cash_transfer(
            &db,
            &NewCashTransfer {
                monthly_liquidation_id: monthly_id.clone(),
                amount: 250.0,
                professional_id: None,
            },
        )
        .unwrap();
        assert_eq!(transfer.origin, "professional_cash");
        assert_eq!(transfer.destination, "admin_cash");
        assert_eq!(transfer.professional_id.as_deref(), Some("prof-1"));

        let monthly = liquidations::get_monthly(&db, &monthly_id).unwrap();
        assert_eq!(monthly.status, LiquidationStatus::Transferred);

        let listed = list_transfers(&db, Some(&monthly_id)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].amount, 250.0);
    }

    #[test]
    fn test_second_transfer_is_rejected() {
        let db = test_db();
        let monthly_id = seed_monthly(&db);
        let req = NewCashTransfer {
            monthly_liquidation_id: monthly_id,
            amount: 250.0,
            professional_id: Some("prof-1".into()),
        };
        record_cash_transfer(&db, &req).unwrap();
        assert!(matches!(
            record_cash_transfer(&db, &req),
            Err(ClinicError::Conflict(_))
        ));
        assert_eq!(transfer_count(&db), 1);
    }

    #[test]
    fn test_failed_status_update_rolls_back_transfer() {
        let db = test_db();
        let monthly_id = seed_monthly(&db);
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER fail_status_update
                 BEFORE UPDATE OF estado ON liquidaciones_mensuales
                 BEGIN SELECT RAISE(ABORT, 'simulated store failure'); END;",
            )
            .unwrap();
        }

        let err = record_cash_transfer(
            &db,
            &NewCashTransfer {
                monthly_liquidation_id: monthly_id.clone(),
                amount: 250.0,
                professional_id: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ClinicError::Store(_)), "got {err:?}");
        assert_eq!(transfer_count(&db), 0, "transfer insert must be rolled back");
        assert_eq!(
            liquidations::get_monthly(&db, &monthly_id).unwrap().status,
            LiquidationStatus::Pending
        );
    }

    #[test]
    fn test_transfer_validation() {
        let db = test_db();
        assert!(matches!(
            record_cash_transfer(
                &db,
                &NewCashTransfer {
                    monthly_liquidation_id: "missing".into(),
                    amount: 10.0,
                    professional_id: None,
                },
            ),
            Err(ClinicError::NotFound(_))
        ));
        assert!(matches!(
            record_cash_transfer(
                &db,
                &NewCashTransfer {
                    monthly_liquidation_id: "missing".into(),
                    amount: -10.0,
                    professional_id: None,
                },
            ),
            Err(ClinicError::Validation(_))
        ));
    }
}
