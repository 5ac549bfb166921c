//! Patient database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Patient, PatientFields};

const PATIENT_COLUMNS: &str = "id, first_name, last_name, date_of_birth, gender, \
                               email, phone, address, created_at, updated_at";

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        date_of_birth: row.get(3)?,
        gender: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        address: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Database {
    /// Insert a new patient, returning the assigned id.
    pub fn insert_patient(&self, fields: &PatientFields) -> DbResult<i64> {
        let fields = fields.normalized();
        self.with_conn(|conn| {
            let id = conn.query_row(
                r#"
                INSERT INTO patients (
                    first_name, last_name, date_of_birth, gender,
                    email, phone, address
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                RETURNING id
                "#,
                params![
                    fields.first_name,
                    fields.last_name,
                    fields.date_of_birth,
                    fields.gender,
                    fields.email,
                    fields.phone,
                    fields.address,
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    /// Replace all mutable fields of a patient. `false` when the id is unknown.
    pub fn update_patient(&self, id: i64, fields: &PatientFields) -> DbResult<bool> {
        let fields = fields.normalized();
        self.with_conn(|conn| {
            let rows_affected = conn.execute(
                r#"
                UPDATE patients SET
                    first_name = ?2,
                    last_name = ?3,
                    date_of_birth = ?4,
                    gender = ?5,
                    email = ?6,
                    phone = ?7,
                    address = ?8
                WHERE id = ?1
                "#,
                params![
                    id,
                    fields.first_name,
                    fields.last_name,
                    fields.date_of_birth,
                    fields.gender,
                    fields.email,
                    fields.phone,
                    fields.address,
                ],
            )?;
            Ok(rows_affected > 0)
        })
    }

    /// Get a patient by id.
    pub fn get_patient(&self, id: i64) -> DbResult<Option<Patient>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
                [id],
                row_to_patient,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// List all patients by last name, then first name.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM patients ORDER BY last_name, first_name, id",
                PATIENT_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_patient)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Delete a patient.
    pub fn delete_patient(&self, id: i64) -> DbResult<bool> {
        self.with_conn(|conn| {
            let rows_affected = conn.execute("DELETE FROM patients WHERE id = ?", [id])?;
            Ok(rows_affected > 0)
        })
    }

    pub fn count_patients(&self) -> DbResult<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
                .map_err(Into::into)
        })
    }
}
