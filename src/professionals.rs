//! Professionals (therapists, practitioners) and their commission terms.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{ClinicError, ClinicResult};

/// Commission rate used when neither the professional nor the settings
/// table provide one.
pub const FALLBACK_COMMISSION_RATE: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Professional {
    pub id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub commission_rate: f64,
    pub cash_in_hand: f64,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfessional {
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default, alias = "commission_rate")]
    pub commission_rate: Option<f64>,
}

pub fn create_professional(db: &DbState, input: &NewProfessional) -> ClinicResult<Professional> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(ClinicError::validation("Missing professional name"));
    }

    let conn = db.conn.lock()?;
    let rate = match input.commission_rate {
        Some(rate) => rate,
        None => db::get_setting_f64(
            &conn,
            "liquidation",
            "default_commission_rate",
            FALLBACK_COMMISSION_RATE,
        ),
    };
    if !(0.0..=100.0).contains(&rate) {
        return Err(ClinicError::validation(format!(
            "Commission rate must be between 0 and 100 (got {rate})"
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO professionals (id, name, specialty, commission_rate)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, name, input.specialty, rate],
    )?;

    info!(professional_id = %id, commission_rate = rate, "Professional created");

    load_professional(&conn, &id)?.ok_or_else(|| ClinicError::not_found(format!("professional {id}")))
}

pub fn get_professional(db: &DbState, id: &str) -> ClinicResult<Professional> {
    let conn = db.conn.lock()?;
    load_professional(&conn, id)?.ok_or_else(|| ClinicError::not_found(format!("professional {id}")))
}

pub fn list_professionals(db: &DbState, include_inactive: bool) -> ClinicResult<Vec<Professional>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, specialty, commission_rate, cash_in_hand, is_active, created_at
         FROM professionals
         WHERE is_active = 1 OR ?1
         ORDER BY name",
    )?;
    let rows = stmt.query_map(params![include_inactive], map_professional)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn load_professional(conn: &Connection, id: &str) -> ClinicResult<Option<Professional>> {
    Ok(conn
        .query_row(
            "SELECT id, name, specialty, commission_rate, cash_in_hand, is_active, created_at
             FROM professionals WHERE id = ?1",
            params![id],
            map_professional,
        )
        .optional()?)
}

fn map_professional(row: &rusqlite::Row) -> rusqlite::Result<Professional> {
    Ok(Professional {
        id: row.get(0)?,
        name: row.get(1)?,
        specialty: row.get(2)?,
        commission_rate: row.get(3)?,
        cash_in_hand: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
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
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_create_uses_settings_default_rate() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, "liquidation", "default_commission_rate", "60").unwrap();
        }
        let p = create_professional(
            &db,
            &NewProfessional {
                name: "Lucía".into(),
                specialty: Some("Kinesiología".into()),
                commission_rate: None,
            },
        )
        .unwrap();
        assert_eq!(p.commission_rate, 60.0);
        assert_eq!(p.cash_in_hand, 0.0);
        assert!(p.is_active);

        let fetched = get_professional(&db, &p.id).unwrap();
        assert_eq!(fetched.name, "Lucía");
    }

    #[test]
    fn test_create_rejects_out_of_range_rate() {
        let db = test_db();
        let err = create_professional(
            &db,
            &NewProfessional {
                name: "Marcos".into(),
                specialty: None,
                commission_rate: Some(120.0),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ClinicError::Validation(_)));
    }

    #[test]
    fn test_list_skips_inactive_by_default() {
        let db = test_db();
        let a = create_professional(
            &db,
            &NewProfessional {
                name: "Ana".into(),
                specialty: None,
                commission_rate: Some(40.0),
            },
        )
        .unwrap();
        create_professional(
            &db,
            &NewProfessional {
                name: "Bruno".into(),
                specialty: None,
                commission_rate: Some(40.0),
            },
        )
        .unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE professionals SET is_active = 0 WHERE id = ?1",
                params![a.id],
            )
            .unwrap();
        }
        assert_eq!(list_professionals(&db, false).unwrap().len(), 1);
        assert_eq!(list_professionals(&db, true).unwrap().len(), 2);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let db = test_db();
        assert!(matches!(
            get_professional(&db, "nope"),
            Err(ClinicError::NotFound(_))
        ));
    }
}
