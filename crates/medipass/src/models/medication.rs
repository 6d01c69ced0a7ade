//! Medication model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HealthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicationStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Discontinued,
}

impl MedicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MedicationStatus::Active => "active",
            MedicationStatus::Paused => "paused",
            MedicationStatus::Completed => "completed",
            MedicationStatus::Discontinued => "discontinued",
        }
    }
}

impl fmt::Display for MedicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MedicationStatus {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MedicationStatus::Active),
            "paused" => Ok(MedicationStatus::Paused),
            "completed" => Ok(MedicationStatus::Completed),
            "discontinued" => Ok(MedicationStatus::Discontinued),
            other => Err(HealthError::Validation(format!(
                "Unknown medication status: {}",
                other
            ))),
        }
    }
}

/// Medication record
#[derive(Debug, Clone, Serialize)]
pub struct Medication {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub pills_remaining: i64,
    pub status: MedicationStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub last_taken_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MedicationRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub pills_remaining: i64,
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub last_taken_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MedicationRow> for Medication {
    type Error = HealthError;

    fn try_from(row: MedicationRow) -> Result<Self, Self::Error> {
        Ok(Medication {
            status: row.status.parse()?,
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            dosage: row.dosage,
            frequency: row.frequency,
            instructions: row.instructions,
            pills_remaining: row.pills_remaining,
            start_date: row.start_date,
            end_date: row.end_date,
            last_taken_at: row.last_taken_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMedicationRequest {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub pills_remaining: i64,
    pub status: Option<MedicationStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMedicationRequest {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub pills_remaining: Option<i64>,
    pub status: Option<MedicationStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicationListQuery {
    pub status: Option<MedicationStatus>,
}
