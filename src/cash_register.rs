//! Central cash register: signed income/expense movements and the daily
//! status summary shown at the front desk.
//!
//! Amounts are signed on disk: positive means money came into the register,
//! negative means it left (expenses, withdrawals handed to a professional).

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::appointments::{date_part, parse_date};
use crate::db::DbState;
use crate::error::{ClinicError, ClinicResult};
use crate::liquidations::round_money;
use crate::payment_method::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
    ProfessionalWithdrawal,
    TransferIn,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::ProfessionalWithdrawal => "professional_withdrawal",
            TransactionType::TransferIn => "transfer_in",
        }
    }

    fn parse(raw: &str) -> ClinicResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "income" | "ingreso" => Ok(TransactionType::Income),
            "expense" | "egreso" | "gasto" => Ok(TransactionType::Expense),
            "professional_withdrawal" | "retiro_profesional" => {
                Ok(TransactionType::ProfessionalWithdrawal)
            }
            "transfer_in" | "traspaso" => Ok(TransactionType::TransferIn),
            other => Err(ClinicError::validation(format!(
                "Invalid transaction type: {other}. Must be income, expense, professional_withdrawal or transfer_in"
            ))),
        }
    }

    /// Sign applied to the absolute amount before it is stored.
    fn sign(self) -> f64 {
        match self {
            TransactionType::Income | TransactionType::TransferIn => 1.0,
            TransactionType::Expense | TransactionType::ProfessionalWithdrawal => -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashRegisterTransaction {
    pub id: String,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub transaction_type: String,
    pub date: String,
    pub professional_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub amount: f64,
    #[serde(alias = "transaction_type", alias = "type")]
    pub transaction_type: String,
    #[serde(default, alias = "payment_method", alias = "method")]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "professional_id")]
    pub professional_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashRegisterStatus {
    pub date: String,
    pub income: f64,
    pub expenses: f64,
    pub balance: f64,
    pub by_method: BTreeMap<PaymentMethod, f64>,
    pub transaction_count: usize,
    pub transactions: Vec<CashRegisterTransaction>,
}

/// Record a register movement. The caller may send the amount with either
/// sign; it is stored with the sign implied by the transaction type.
pub fn record_transaction(
    db: &DbState,
    input: &NewTransaction,
) -> ClinicResult<CashRegisterTransaction> {
    if input.amount == 0.0 || !input.amount.is_finite() {
        return Err(ClinicError::validation("Amount must be non-zero"));
    }
    let tx_type = TransactionType::parse(&input.transaction_type)?;
    let method = input
        .payment_method
        .as_deref()
        .map(PaymentMethod::normalize)
        .unwrap_or(PaymentMethod::Cash);
    if tx_type == TransactionType::ProfessionalWithdrawal {
        if input.professional_id.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(ClinicError::validation(
                "professionalId is required for professional withdrawals",
            ));
        }
        if method != PaymentMethod::Cash {
            return Err(ClinicError::validation(
                "Professional withdrawals must be cash",
            ));
        }
    }
    let date = match input.date.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_date(date_part(raw))?
            .format("%Y-%m-%d")
            .to_string(),
        _ => Utc::now().format("%Y-%m-%d").to_string(),
    };
    let amount = input.amount.abs() * tx_type.sign();

    let conn = db.conn.lock()?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO cash_register_transactions (
            id, amount, payment_method, transaction_type, transaction_date,
            professional_id, description
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            amount,
            method,
            tx_type.as_str(),
            date,
            input.professional_id,
            input.description,
        ],
    )?;

    info!(
        transaction_id = %id,
        kind = tx_type.as_str(),
        method = %method,
        amount = amount,
        "Cash register transaction recorded"
    );

    Ok(CashRegisterTransaction {
        id,
        amount,
        payment_method: method,
        transaction_type: tx_type.as_str().to_string(),
        date,
        professional_id: input.professional_id.clone(),
        description: input.description.clone(),
    })
}

/// Income, expenses and per-method totals for one register day.
pub fn register_status(db: &DbState, date: &str) -> ClinicResult<CashRegisterStatus> {
    let date = parse_date(date)?.format("%Y-%m-%d").to_string();
    let conn = db.conn.lock()?;
    let transactions = transactions_on(&conn, &date, None)?;

    let mut income = 0.0;
    let mut expenses = 0.0;
    let mut by_method: BTreeMap<PaymentMethod, f64> = BTreeMap::new();
    for tx in &transactions {
        if tx.amount >= 0.0 {
            income += tx.amount;
        } else {
            expenses += tx.amount.abs();
        }
        *by_method.entry(tx.payment_method).or_insert(0.0) += tx.amount;
    }

    for total in by_method.values_mut() {
        *total = round_money(*total);
    }

    Ok(CashRegisterStatus {
        date,
        income: round_money(income),
        expenses: round_money(expenses),
        balance: round_money(income - expenses),
        by_method,
        transaction_count: transactions.len(),
        transactions,
    })
}

/// Transactions on `date`, optionally restricted to one professional.
pub(crate) fn transactions_on(
    conn: &Connection,
    date: &str,
    professional_id: Option<&str>,
) -> ClinicResult<Vec<CashRegisterTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, amount, payment_method, transaction_type, transaction_date,
                professional_id, description
         FROM cash_register_transactions
         WHERE substr(transaction_date, 1, 10) = ?1
           AND (?2 IS NULL OR professional_id = ?2)
         ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![date, professional_id], |row| {
        Ok(CashRegisterTransaction {
            id: row.get(0)?,
            amount: row.get(1)?,
            payment_method: row.get(2)?,
            transaction_type: row.get(3)?,
            date: row.get(4)?,
            professional_id: row.get(5)?,
            description: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Absolute total of cash withdrawals handed to a professional on `date`.
pub(crate) fn withdrawals_for(
    conn: &Connection,
    professional_id: &str,
    date: &str,
) -> ClinicResult<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(ABS(amount)), 0)
         FROM cash_register_transactions
         WHERE transaction_type = 'professional_withdrawal'
           AND professional_id = ?1
           AND substr(transaction_date, 1, 10) = ?2",
        params![professional_id, date],
        |row| row.get(0),
    )?;
    Ok(total)
}
