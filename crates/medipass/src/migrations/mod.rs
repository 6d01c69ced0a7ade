//! Database migrations for health record tables

/// Migration SQL for health record tables
pub const MIGRATION_SQL: &str = r#"
-- documents: uploaded file metadata, one row per stored object
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    display_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'general',
    folder_path TEXT NOT NULL DEFAULT '/',
    tags TEXT NOT NULL DEFAULT '[]',
    notes TEXT,
    provider TEXT,
    document_date TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id);
CREATE INDEX IF NOT EXISTS idx_documents_user_category ON documents(user_id, category);
CREATE INDEX IF NOT EXISTS idx_documents_user_folder ON documents(user_id, folder_path);

-- lab_reports: AI analysis lifecycle of an uploaded lab file
CREATE TABLE IF NOT EXISTS lab_reports (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'uploading',
    summary TEXT,
    transcription TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    processing_started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_lab_reports_user ON lab_reports(user_id);
CREATE INDEX IF NOT EXISTS idx_lab_reports_status ON lab_reports(status);

-- analysis_jobs: idempotency ledger for queued analysis work
CREATE TABLE IF NOT EXISTS analysis_jobs (
    idempotency_key TEXT PRIMARY KEY,
    lab_report_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analysis_jobs_status ON analysis_jobs(status);
CREATE INDEX IF NOT EXISTS idx_analysis_jobs_report ON analysis_jobs(lab_report_id);

-- medications: prescriptions tracked by the user
CREATE TABLE IF NOT EXISTS medications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    dosage TEXT,
    frequency TEXT,
    instructions TEXT,
    pills_remaining INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    start_date TEXT NOT NULL,
    end_date TEXT,
    last_taken_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_medications_user ON medications(user_id);
CREATE INDEX IF NOT EXISTS idx_medications_user_status ON medications(user_id, status)
"#;

/// Run health record migration
pub async fn run_migration(pool: &sqlx::SqlitePool) -> Result<(), sqlx::Error> {
    for statement in MIGRATION_SQL.split(';') {
        let statement = statement.trim();
        if !statement.is_empty() {
            let result = sqlx::query(statement).execute(pool).await;
            if let Err(ref e) = result {
                // Ignore duplicate table/index errors
                let is_duplicate = e.to_string().contains("already exists");
                if !is_duplicate {
                    result?;
                }
            }
        }
    }
    tracing::debug!("Health record migrations applied");
    Ok(())
}
