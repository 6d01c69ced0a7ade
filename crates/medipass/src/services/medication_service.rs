//! Medication service - CRUD and dose recording

use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::error::{HealthError, HealthResult};
use crate::models::{
    CreateMedicationRequest, Medication, MedicationListQuery, MedicationRow, MedicationStatus,
    UpdateMedicationRequest,
};

#[derive(Clone)]
pub struct MedicationService {
    pool: SqlitePool,
}

impl MedicationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, user_id: &str, query: &MedicationListQuery) -> HealthResult<Vec<Medication>> {
        let rows: Vec<MedicationRow> = match query.status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM medications WHERE user_id = ? AND status = ? ORDER BY created_at DESC",
                )
                .bind(user_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM medications WHERE user_id = ? ORDER BY created_at DESC")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Medication::try_from).collect()
    }

    pub async fn get(&self, user_id: &str, medication_id: &str) -> HealthResult<Medication> {
        let row: Option<MedicationRow> =
            sqlx::query_as("SELECT * FROM medications WHERE id = ? AND user_id = ?")
                .bind(medication_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| HealthError::MedicationNotFound(medication_id.to_string()))?
            .try_into()
    }

    pub async fn create(&self, user_id: &str, req: CreateMedicationRequest) -> HealthResult<Medication> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(HealthError::Validation("Medication name is required".to_string()));
        }
        if req.pills_remaining < 0 {
            return Err(HealthError::Validation(
                "pills_remaining cannot be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let medication = Medication {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            dosage: req.dosage,
            frequency: req.frequency,
            instructions: req.instructions,
            pills_remaining: req.pills_remaining,
            status: req.status.unwrap_or_default(),
            start_date: req.start_date.unwrap_or_else(|| now.date_naive()),
            end_date: req.end_date,
            last_taken_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO medications (id, user_id, name, dosage, frequency, instructions, pills_remaining,
                status, start_date, end_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&medication.id)
        .bind(&medication.user_id)
        .bind(&medication.name)
        .bind(&medication.dosage)
        .bind(&medication.frequency)
        .bind(&medication.instructions)
        .bind(medication.pills_remaining)
        .bind(medication.status.as_str())
        .bind(medication.start_date)
        .bind(medication.end_date)
        .bind(medication.created_at)
        .bind(medication.updated_at)
        .execute(&self.pool)
        .await?;

        info!(user_id, medication_id = %medication.id, "Created medication");
        Ok(medication)
    }

    pub async fn update(
        &self,
        user_id: &str,
        medication_id: &str,
        req: UpdateMedicationRequest,
    ) -> HealthResult<Medication> {
        let name = match req.name.as_deref().map(str::trim) {
            Some("") => {
                return Err(HealthError::Validation("Medication name is required".to_string()))
            }
            name => name.map(str::to_string),
        };
        if req.pills_remaining.is_some_and(|pills| pills < 0) {
            return Err(HealthError::Validation(
                "pills_remaining cannot be negative".to_string(),
            ));
        }

        // Only supplied columns are written so a dose recorded meanwhile survives
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE medications SET updated_at = ");
        qb.push_bind(Utc::now());
        if let Some(name) = name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(dosage) = req.dosage {
            qb.push(", dosage = ").push_bind(dosage);
        }
        if let Some(frequency) = req.frequency {
            qb.push(", frequency = ").push_bind(frequency);
        }
        if let Some(instructions) = req.instructions {
            qb.push(", instructions = ").push_bind(instructions);
        }
        if let Some(pills) = req.pills_remaining {
            qb.push(", pills_remaining = ").push_bind(pills);
        }
        if let Some(status) = req.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(start_date) = req.start_date {
            qb.push(", start_date = ").push_bind(start_date);
        }
        if let Some(end_date) = req.end_date {
            qb.push(", end_date = ").push_bind(end_date);
        }
        qb.push(" WHERE id = ").push_bind(medication_id.to_string());
        qb.push(" AND user_id = ").push_bind(user_id.to_string());
        qb.push(" RETURNING *");

        let row: Option<MedicationRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        let medication: Medication = row
            .ok_or_else(|| HealthError::MedicationNotFound(medication_id.to_string()))?
            .try_into()?;

        info!(user_id, medication_id, "Updated medication");
        Ok(medication)
    }

    pub async fn delete(&self, user_id: &str, medication_id: &str) -> HealthResult<()> {
        let result = sqlx::query("DELETE FROM medications WHERE id = ? AND user_id = ?")
            .bind(medication_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(HealthError::MedicationNotFound(medication_id.to_string()));
        }
        Ok(())
    }

    /// Record one dose taken on `today`
    ///
    /// A single conditional update decrements the count, so concurrent doses
    /// can never take the count below zero. Reaching zero completes an active
    /// medication and stamps its end date.
    pub async fn take_dose(
        &self,
        user_id: &str,
        medication_id: &str,
        today: NaiveDate,
    ) -> HealthResult<Medication> {
        let now = Utc::now();
        let row: Option<MedicationRow> = sqlx::query_as(
            "UPDATE medications SET
                pills_remaining = pills_remaining - 1,
                status = CASE WHEN pills_remaining - 1 = 0 AND status = 'active' THEN 'completed' ELSE status END,
                end_date = CASE WHEN pills_remaining - 1 = 0 AND status = 'active' THEN ? ELSE end_date END,
                last_taken_at = ?,
                updated_at = ?
             WHERE id = ? AND user_id = ? AND pills_remaining > 0
             RETURNING *",
        )
        .bind(today)
        .bind(now)
        .bind(now)
        .bind(medication_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let medication = Medication::try_from(row)?;
                info!(
                    user_id,
                    medication_id,
                    pills_remaining = medication.pills_remaining,
                    "Dose recorded"
                );
                if medication.status == MedicationStatus::Completed && medication.pills_remaining == 0 {
                    info!(medication_id, "Medication course completed");
                }
                Ok(medication)
            }
            None => {
                // Either missing/not owned, or out of pills
                self.get(user_id, medication_id).await?;
                Err(HealthError::NoPillsRemaining)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_pool;

    async fn service() -> MedicationService {
        MedicationService::new(test_pool().await)
    }

    fn request(pills: i64) -> CreateMedicationRequest {
        CreateMedicationRequest {
            name: "Amoxicillin".into(),
            dosage: Some("500mg".into()),
            frequency: Some("3x daily".into()),
            instructions: None,
            pills_remaining: pills,
            status: None,
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            end_date: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[tokio::test]
    async fn test_last_pill_completes_course() {
        let service = service().await;
        let medication = service.create("u1", request(1)).await.unwrap();
        assert_eq!(medication.status, MedicationStatus::Active);

        let after = service.take_dose("u1", &medication.id, today()).await.unwrap();
        assert_eq!(after.pills_remaining, 0);
        assert_eq!(after.status, MedicationStatus::Completed);
        assert_eq!(after.end_date, Some(today()));
        assert!(after.last_taken_at.is_some());
    }

    #[tokio::test]
    async fn test_decrement_keeps_status() {
        let service = service().await;
        let medication = service.create("u1", request(5)).await.unwrap();

        let after = service.take_dose("u1", &medication.id, today()).await.unwrap();
        assert_eq!(after.pills_remaining, 4);
        assert_eq!(after.status, MedicationStatus::Active);
        assert!(after.end_date.is_none());
    }

    #[tokio::test]
    async fn test_paused_medication_stays_paused_at_zero() {
        let service = service().await;
        let mut req = request(1);
        req.status = Some(MedicationStatus::Paused);
        let medication = service.create("u1", req).await.unwrap();

        let after = service.take_dose("u1", &medication.id, today()).await.unwrap();
        assert_eq!(after.pills_remaining, 0);
        assert_eq!(after.status, MedicationStatus::Paused);
        assert!(after.end_date.is_none());
    }

    #[tokio::test]
    async fn test_no_pills_remaining() {
        let service = service().await;
        let medication = service.create("u1", request(0)).await.unwrap();

        let err = service
            .take_dose("u1", &medication.id, today())
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::NoPillsRemaining));
        assert_eq!(err.to_string(), "No pills remaining.");
        assert_eq!(
            service.get("u1", &medication.id).await.unwrap().pills_remaining,
            0
        );
    }

    #[tokio::test]
    async fn test_dose_on_foreign_medication() {
        let service = service().await;
        let medication = service.create("u1", request(3)).await.unwrap();

        assert!(matches!(
            service.take_dose("u2", &medication.id, today()).await,
            Err(HealthError::MedicationNotFound(_))
        ));
        assert_eq!(
            service.get("u1", &medication.id).await.unwrap().pills_remaining,
            3
        );
    }

    #[tokio::test]
    async fn test_concurrent_doses_never_overdraw() {
        let service = service().await;
        let medication = service.create("u1", request(3)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = service.clone();
            let id = medication.id.clone();
            handles.push(tokio::spawn(async move {
                service.take_dose("u1", &id, today()).await
            }));
        }

        let mut ok = 0;
        let mut empty = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(HealthError::NoPillsRemaining) => empty += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(empty, 2);

        let final_state = service.get("u1", &medication.id).await.unwrap();
        assert_eq!(final_state.pills_remaining, 0);
        assert_eq!(final_state.status, MedicationStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_edits_do_not_undo_doses() {
        let service = service().await;
        let medication = service.create("u1", request(100)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let service = service.clone();
            let id = medication.id.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    service.take_dose("u1", &id, today()).await.map(|_| 1)
                } else {
                    service
                        .update(
                            "u1",
                            &id,
                            UpdateMedicationRequest {
                                dosage: Some(format!("{}mg", i)),
                                ..Default::default()
                            },
                        )
                        .await
                        .map(|_| 0)
                }
            }));
        }

        let mut doses = 0;
        for handle in handles {
            doses += handle.await.unwrap().unwrap();
        }
        assert_eq!(doses, 10);
        assert_eq!(
            service.get("u1", &medication.id).await.unwrap().pills_remaining,
            90
        );
    }

    #[tokio::test]
    async fn test_update_validation_and_scope() {
        let service = service().await;
        let medication = service.create("u1", request(10)).await.unwrap();

        let blank = UpdateMedicationRequest {
            name: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(
            service.update("u1", &medication.id, blank).await,
            Err(HealthError::Validation(_))
        ));
        let negative = UpdateMedicationRequest {
            pills_remaining: Some(-1),
            ..Default::default()
        };
        assert!(service.update("u1", &medication.id, negative).await.is_err());
        assert!(matches!(
            service
                .update("u2", &medication.id, UpdateMedicationRequest::default())
                .await,
            Err(HealthError::MedicationNotFound(_))
        ));

        let renamed = service
            .update(
                "u1",
                &medication.id,
                UpdateMedicationRequest {
                    name: Some("  Ibuprofen ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Ibuprofen");
        assert_eq!(renamed.dosage.as_deref(), Some("500mg"));
        assert_eq!(renamed.pills_remaining, 10);
    }

    #[tokio::test]
    async fn test_crud() {
        let service = service().await;
        let medication = service.create("u1", request(10)).await.unwrap();

        let updated = service
            .update(
                "u1",
                &medication.id,
                UpdateMedicationRequest {
                    dosage: Some("250mg".into()),
                    status: Some(MedicationStatus::Paused),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.dosage.as_deref(), Some("250mg"));

        let paused = service
            .list(
                "u1",
                &MedicationListQuery {
                    status: Some(MedicationStatus::Paused),
                },
            )
            .await
            .unwrap();
        assert_eq!(paused.len(), 1);

        let active = service
            .list(
                "u1",
                &MedicationListQuery {
                    status: Some(MedicationStatus::Active),
                },
            )
            .await
            .unwrap();
        assert!(active.is_empty());

        service.delete("u1", &medication.id).await.unwrap();
        assert!(service.delete("u1", &medication.id).await.is_err());
    }

    #[tokio::test]
    async fn test_create_validation() {
        let service = service().await;
        let mut req = request(1);
        req.name = "  ".into();
        assert!(matches!(
            service.create("u1", req).await,
            Err(HealthError::Validation(_))
        ));
        assert!(service.create("u1", request(-1)).await.is_err());
    }
}
