//! Closed set of payment methods.
//!
//! Historical rows and UI payloads mix English and Spanish spellings
//! ("efectivo", "transferencia", ...). Everything is normalised here once,
//! at ingestion, and stored in the canonical lowercase English form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }

    /// Lenient normalisation used for stored or legacy values. Unknown
    /// spellings map to `Other` instead of failing.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "cash" | "efectivo" => PaymentMethod::Cash,
            "transfer" | "transferencia" | "bank_transfer" => PaymentMethod::Transfer,
            "card" | "tarjeta" | "debit" | "debito" | "débito" | "credit" | "credito"
            | "crédito" => PaymentMethod::Card,
            _ => PaymentMethod::Other,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    /// Strict parse for incoming payloads: empty input is rejected, any
    /// other spelling goes through [`PaymentMethod::normalize`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err("Missing payment method".into());
        }
        Ok(Self::normalize(s))
    }
}

impl rusqlite::ToSql for PaymentMethod {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
    }
}

impl rusqlite::types::FromSql for PaymentMethod {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        value.as_str().map(Self::normalize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spanish_synonyms_normalize() {
        assert_eq!(PaymentMethod::normalize("efectivo"), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::normalize(" CASH "), PaymentMethod::Cash);
        assert_eq!(
            PaymentMethod::normalize("Transferencia"),
            PaymentMethod::Transfer
        );
        assert_eq!(PaymentMethod::normalize("transfer"), PaymentMethod::Transfer);
        assert_eq!(PaymentMethod::normalize("tarjeta"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::normalize("mercadopago"), PaymentMethod::Other);
    }

    #[test]
    fn test_from_str_rejects_empty() {
        assert!("".parse::<PaymentMethod>().is_err());
        assert!("   ".parse::<PaymentMethod>().is_err());
        assert_eq!("efectivo".parse::<PaymentMethod>(), Ok(PaymentMethod::Cash));
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let json = serde_json::to_value(PaymentMethod::Transfer).unwrap();
        assert_eq!(json, "transfer");
        let parsed: PaymentMethod = serde_json::from_value(serde_json::json!("card")).unwrap();
        assert_eq!(parsed, PaymentMethod::Card);
    }
}
