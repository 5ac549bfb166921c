//! Patient models.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A stored patient row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    /// Database-assigned identifier, never reused
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    /// Free text; see [`Gender`] for the recommended values
    pub gender: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Insert timestamp (UTC, millisecond precision)
    pub created_at: String,
    /// Last modification timestamp, maintained by trigger
    pub updated_at: String,
}

impl Patient {
    /// "First Last" as shown in record lists.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// The mutable fields of this row, e.g. to prefill an edit.
    pub fn fields(&self) -> PatientFields {
        PatientFields {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            date_of_birth: self.date_of_birth,
            gender: self.gender.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

/// Mutable patient fields, written in full by insert and update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientFields {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// A required field that failed [`PatientFields::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} is required")]
pub struct MissingField {
    pub field: &'static str,
}

impl PatientFields {
    /// Create fields with the required values set.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        date_of_birth: NaiveDate,
        gender: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            date_of_birth,
            gender: gender.into(),
            email: None,
            phone: None,
            address: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Copy with blank optional fields mapped to `None`.
    ///
    /// Storage never sees an empty string for email, phone or address.
    pub fn normalized(&self) -> Self {
        Self {
            email: blank_to_none(self.email.as_deref()),
            phone: blank_to_none(self.phone.as_deref()),
            address: blank_to_none(self.address.as_deref()),
            ..self.clone()
        }
    }

    /// Caller-side required field check. The storage layer only enforces
    /// NOT NULL, so forms call this before writing.
    pub fn validate(&self) -> Result<(), MissingField> {
        let required = [
            ("first name", &self.first_name),
            ("last name", &self.last_name),
            ("gender", &self.gender),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MissingField { field });
            }
        }
        Ok(())
    }
}

fn blank_to_none(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

/// Recommended gender values offered by the registration form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

impl Gender {
    pub const ALL: [Gender; 4] = [
        Gender::Male,
        Gender::Female,
        Gender::Other,
        Gender::PreferNotToSay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::PreferNotToSay => "prefer_not_to_say",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace([' ', '-'], "_");
        Gender::ALL
            .into_iter()
            .find(|g| g.as_str() == wanted)
            .ok_or_else(|| format!("unknown gender: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dob() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 4, 12).unwrap()
    }

    #[test]
    fn test_normalized_blanks_become_none() {
        let fields = PatientFields::new("Ada", "Lovelace", dob(), "female")
            .with_email("")
            .with_phone("   ")
            .with_address("12 St James's Square");

        let normalized = fields.normalized();
        assert_eq!(normalized.email, None);
        assert_eq!(normalized.phone, None);
        assert_eq!(normalized.address, Some("12 St James's Square".into()));
        assert_eq!(normalized.first_name, "Ada");
    }

    #[test]
    fn test_validate_required_fields() {
        let fields = PatientFields::new("Ada", "Lovelace", dob(), "female");
        assert!(fields.validate().is_ok());

        let missing = PatientFields::new("Ada", " ", dob(), "female");
        assert_eq!(
            missing.validate().unwrap_err().to_string(),
            "last name is required"
        );
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!("Male".parse::<Gender>(), Ok(Gender::Male));
        assert_eq!(
            "prefer not to say".parse::<Gender>(),
            Ok(Gender::PreferNotToSay)
        );
        assert!("unknown".parse::<Gender>().is_err());
    }

    #[test]
    fn test_serialize_camel_case() {
        let fields = PatientFields::new("Ada", "Lovelace", dob(), "female");
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["dateOfBirth"], "1990-04-12");
        assert!(json["email"].is_null());
    }
}
