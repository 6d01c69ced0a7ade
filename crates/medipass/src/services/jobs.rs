//! Analysis job queue, worker and stale-processing reaper
//!
//! Jobs are persisted in `analysis_jobs` keyed by `lab_report_id:content_hash`
//! and dispatched over an in-process channel. The table makes enqueue
//! idempotent and lets queued work survive a restart.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{HealthError, HealthResult};
use crate::models::{EnqueueOutcome, FileUploadedEvent};
use crate::services::analysis::AnalysisPipeline;
use crate::services::lab_report_service::LabReportService;

/// Producer side of the analysis queue
#[derive(Clone)]
pub struct AnalysisQueue {
    pool: SqlitePool,
    sender: mpsc::Sender<String>,
}

impl AnalysisQueue {
    /// Create a queue and the receiver the worker consumes
    pub fn channel(pool: SqlitePool, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { pool, sender }, receiver)
    }

    /// Persist and dispatch a job; the same idempotency key is only queued once
    pub async fn enqueue(&self, event: &FileUploadedEvent) -> HealthResult<EnqueueOutcome> {
        let key = event.idempotency_key();
        let now = Utc::now();

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO analysis_jobs (idempotency_key, lab_report_id, user_id, file_path, file_name,
                content_type, content_hash, status, attempts, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', 0, ?, ?)",
        )
        .bind(&key)
        .bind(&event.lab_report_id)
        .bind(&event.user_id)
        .bind(&event.file_path_in_bucket)
        .bind(&event.original_file_name)
        .bind(&event.content_type)
        .bind(&event.content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(idempotency_key = %key, "Analysis job already queued");
            return Ok(EnqueueOutcome::Duplicate);
        }

        // A full queue is refused rather than awaited so the caller never
        // stalls with a committed row and no dispatch
        if let Err(e) = self.sender.try_send(key.clone()) {
            warn!(idempotency_key = %key, error = %e, "Analysis queue unavailable, dropping job");
            sqlx::query("DELETE FROM analysis_jobs WHERE idempotency_key = ?")
                .bind(&key)
                .execute(&self.pool)
                .await?;
            return Err(HealthError::Queue(format!("Failed to dispatch job: {}", e)));
        }

        info!(
            idempotency_key = %key,
            lab_report_id = %event.lab_report_id,
            "Queued analysis job"
        );
        Ok(EnqueueOutcome::Queued)
    }

    /// Re-dispatch jobs left `queued` by a previous process
    ///
    /// Jobs found `running` were interrupted mid-analysis and are marked
    /// failed; the reaper takes care of their lab reports.
    pub async fn recover_pending(&self) -> HealthResult<usize> {
        let interrupted = sqlx::query(
            "UPDATE analysis_jobs SET status = 'failed', last_error = 'Interrupted by restart', updated_at = ?
             WHERE status = 'running'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted analysis jobs as failed");
        }

        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT idempotency_key FROM analysis_jobs WHERE status = 'queued' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let count = keys.len();
        for (key,) in keys {
            self.sender
                .send(key)
                .await
                .map_err(|e| HealthError::Queue(format!("Failed to dispatch job: {}", e)))?;
        }
        if count > 0 {
            info!(count, "Re-dispatched pending analysis jobs");
        }
        Ok(count)
    }
}

/// Consumer side: claims jobs and runs them through the pipeline
pub struct AnalysisWorker {
    pool: SqlitePool,
    pipeline: AnalysisPipeline,
    semaphore: Arc<Semaphore>,
}

impl AnalysisWorker {
    pub fn new(pool: SqlitePool, pipeline: AnalysisPipeline, concurrency: usize) -> Self {
        Self {
            pool,
            pipeline,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Process jobs until the channel closes or `shutdown` fires
    pub async fn run(self, mut receiver: mpsc::Receiver<String>, shutdown: CancellationToken) {
        info!(
            concurrency = self.semaphore.available_permits(),
            "Analysis worker started"
        );
        let worker = Arc::new(self);

        loop {
            let key = tokio::select! {
                _ = shutdown.cancelled() => break,
                key = receiver.recv() => match key {
                    Some(key) => key,
                    None => break,
                },
            };

            let permit = match worker.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = worker.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = worker.process(&key).await {
                    error!(idempotency_key = %key, error = %e, "Analysis job bookkeeping failed");
                }
            });
        }

        info!("Analysis worker stopped");
    }

    /// Run one job; returns `false` when the job was not claimable
    pub async fn process(&self, key: &str) -> HealthResult<bool> {
        let claimed: Option<(String,)> = sqlx::query_as(
            "UPDATE analysis_jobs SET status = 'running', attempts = attempts + 1, updated_at = ?
             WHERE idempotency_key = ? AND status = 'queued'
             RETURNING lab_report_id",
        )
        .bind(Utc::now())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some((lab_report_id,)) = claimed else {
            debug!(idempotency_key = key, "Skipping job that is not queued");
            return Ok(false);
        };

        let (status, last_error) = match self.pipeline.run(&lab_report_id).await {
            Ok(_) => ("done", None),
            Err(e) => {
                warn!(idempotency_key = key, lab_report_id = %lab_report_id, error = %e, "Analysis job failed");
                ("failed", Some(e.to_string()))
            }
        };

        sqlx::query(
            "UPDATE analysis_jobs SET status = ?, last_error = ?, updated_at = ? WHERE idempotency_key = ?",
        )
        .bind(status)
        .bind(last_error)
        .bind(Utc::now())
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }
}

/// Periodically fail lab reports stuck in `processing` past `deadline`, and
/// `uploading` reports that never got a job
pub async fn run_reaper(
    lab_reports: LabReportService,
    deadline: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let deadline = match chrono::Duration::from_std(deadline) {
        Ok(deadline) => deadline,
        Err(e) => {
            error!(error = %e, "Invalid processing deadline, reaper disabled");
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cutoff = Utc::now() - deadline;
        match lab_reports.fail_stale(cutoff).await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Failed lab reports stuck in processing"),
            Err(e) => error!(error = %e, "Stale lab report sweep failed"),
        }
        match lab_reports.fail_orphaned_uploads(cutoff).await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Failed lab reports never queued for analysis"),
            Err(e) => error!(error = %e, "Orphaned upload sweep failed"),
        }
    }
}
