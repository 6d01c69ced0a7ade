//! Document service - stores uploaded files and their metadata
//!
//! Every query is scoped to the acting user. Storage and row writes are
//! paired: a failed row insert removes the stored object again.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{HealthError, HealthResult};
use crate::models::{
    Document, DocumentListQuery, DocumentRow, DownloadLink, IncomingFile, PreviewLink,
    UpdateDocumentRequest, UploadBatchResponse, UploadFailure, UploadMetadata,
};
use crate::security::{next_storage_path, validate_upload};
use crate::services::storage::ObjectStorage;

pub struct DocumentService {
    pool: SqlitePool,
    storage: Arc<dyn ObjectStorage>,
}

impl DocumentService {
    pub fn new(pool: SqlitePool, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            pool,
            storage,
        }
    }

    /// Validate, store and record a single file
    pub async fn ingest(
        &self,
        user_id: &str,
        file: IncomingFile,
        metadata: &UploadMetadata,
        max_file_size: u64,
    ) -> HealthResult<Document> {
        let mime_type = validate_upload(&file, max_file_size)?;
        let file_path = next_storage_path(user_id, &file.file_name);

        self.storage.put(&file_path, &file.data, &mime_type).await?;

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            display_name: metadata
                .display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| file.file_name.clone()),
            file_name: file.file_name,
            file_path,
            file_size: file.size as i64,
            mime_type,
            category: metadata.category.unwrap_or_default(),
            folder_path: normalize_folder(metadata.folder_path.as_deref()),
            tags: normalize_tags(&metadata.tags),
            notes: metadata.notes.clone(),
            provider: metadata.provider.clone(),
            document_date: metadata.document_date,
            metadata: metadata.metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.insert(&document).await {
            warn!(
                user_id,
                storage_path = %document.file_path,
                error = %e,
                "Document insert failed, removing stored object"
            );
            if let Err(cleanup) = self.storage.delete(&document.file_path).await {
                warn!(storage_path = %document.file_path, error = %cleanup, "Compensating delete failed");
            }
            return Err(e);
        }

        info!(
            user_id,
            document_id = %document.id,
            size = document.file_size,
            "Stored document {}",
            document.file_name
        );
        Ok(document)
    }

    /// Ingest several files; one file failing does not affect the others
    pub async fn ingest_batch(
        &self,
        user_id: &str,
        files: Vec<IncomingFile>,
        metadata: &UploadMetadata,
        max_file_size: u64,
    ) -> UploadBatchResponse {
        let mut uploaded = Vec::new();
        let mut errors = Vec::new();

        for file in files {
            let file_name = file.file_name.clone();
            match self.ingest(user_id, file, metadata, max_file_size).await {
                Ok(document) => uploaded.push(document),
                Err(e) => {
                    warn!(user_id, file_name = %file_name, error = %e, "Upload rejected");
                    errors.push(UploadFailure {
                        file_name,
                        error: e.to_string(),
                    });
                }
            }
        }

        UploadBatchResponse::new(uploaded, errors)
    }

    async fn insert(&self, document: &Document) -> HealthResult<()> {
        sqlx::query(
            "INSERT INTO documents (id, user_id, file_name, display_name, file_path, file_size, mime_type,
                category, folder_path, tags, notes, provider, document_date, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.user_id)
        .bind(&document.file_name)
        .bind(&document.display_name)
        .bind(&document.file_path)
        .bind(document.file_size)
        .bind(document.mime_type.as_str())
        .bind(document.category.as_str())
        .bind(&document.folder_path)
        .bind(serde_json::to_string(&document.tags)?)
        .bind(&document.notes)
        .bind(&document.provider)
        .bind(document.document_date)
        .bind(serde_json::to_string(&document.metadata)?)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, user_id: &str, query: &DocumentListQuery) -> HealthResult<Vec<Document>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM documents WHERE user_id = ");
        qb.push_bind(user_id.to_string());

        if let Some(category) = query.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }

        if let Some(folder) = query.folder.as_deref().filter(|f| !f.is_empty()) {
            qb.push(" AND folder_path = ").push_bind(normalize_folder(Some(folder)));
        }

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(search));
            qb.push(" AND (");
            for (i, column) in ["display_name", "file_name", "notes", "provider"].iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(*column)
                    .push(" LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\'");
            }
            qb.push(")");
        }

        let tags = query.tag_list();
        if !tags.is_empty() {
            qb.push(" AND EXISTS (SELECT 1 FROM json_each(documents.tags) WHERE lower(json_each.value) IN (");
            let mut separated = qb.separated(", ");
            for tag in tags {
                separated.push_bind(tag);
            }
            separated.push_unseparated("))");
        }

        // Date bounds use the document date when known, else the upload day
        if let Some(start) = query.start_date {
            qb.push(" AND COALESCE(document_date, substr(created_at, 1, 10)) >= ")
                .push_bind(start);
        }
        if let Some(end) = query.end_date {
            qb.push(" AND COALESCE(document_date, substr(created_at, 1, 10)) <= ")
                .push_bind(end);
        }

        qb.push(" ORDER BY created_at DESC");

        let rows: Vec<DocumentRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Document::try_from).collect()
    }

    pub async fn get(&self, user_id: &str, document_id: &str) -> HealthResult<Document> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT * FROM documents WHERE id = ? AND user_id = ?")
                .bind(document_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| HealthError::DocumentNotFound(document_id.to_string()))?
            .try_into()
    }

    pub async fn update(
        &self,
        user_id: &str,
        document_id: &str,
        req: UpdateDocumentRequest,
    ) -> HealthResult<Document> {
        let mut document = self.get(user_id, document_id).await?;

        if let Some(display_name) = req.display_name.filter(|n| !n.trim().is_empty()) {
            document.display_name = display_name;
        }
        if let Some(category) = req.category {
            document.category = category;
        }
        if let Some(folder) = req.folder_path {
            document.folder_path = normalize_folder(Some(&folder));
        }
        if let Some(tags) = req.tags {
            document.tags = normalize_tags(&tags);
        }
        if req.notes.is_some() {
            document.notes = req.notes;
        }
        if req.provider.is_some() {
            document.provider = req.provider;
        }
        if req.document_date.is_some() {
            document.document_date = req.document_date;
        }
        if let Some(metadata) = req.metadata {
            document.metadata = metadata;
        }
        document.updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE documents SET display_name = ?, category = ?, folder_path = ?, tags = ?, notes = ?,
                provider = ?, document_date = ?, metadata = ?, updated_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&document.display_name)
        .bind(document.category.as_str())
        .bind(&document.folder_path)
        .bind(serde_json::to_string(&document.tags)?)
        .bind(&document.notes)
        .bind(&document.provider)
        .bind(document.document_date)
        .bind(serde_json::to_string(&document.metadata)?)
        .bind(document.updated_at)
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(HealthError::DocumentNotFound(document_id.to_string()));
        }
        Ok(document)
    }

    /// Remove the stored object and the row; storage failures are logged only
    pub async fn delete(&self, user_id: &str, document_id: &str) -> HealthResult<()> {
        let document = self.get(user_id, document_id).await?;

        if let Err(e) = self.storage.delete(&document.file_path).await {
            warn!(
                document_id,
                storage_path = %document.file_path,
                error = %e,
                "Failed to delete stored object, removing record anyway"
            );
        }

        sqlx::query("DELETE FROM documents WHERE id = ? AND user_id = ?")
            .bind(document_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        info!(user_id, document_id, "Deleted document");
        Ok(())
    }

    pub async fn download_link(
        &self,
        user_id: &str,
        document_id: &str,
        ttl_secs: u64,
    ) -> HealthResult<DownloadLink> {
        let document = self.get(user_id, document_id).await?;
        let download_url = self.storage.signed_url(&document.file_path, ttl_secs).await?;
        Ok(DownloadLink {
            download_url,
            file_name: document.file_name,
            expires_in: ttl_secs,
        })
    }

    pub async fn preview_link(
        &self,
        user_id: &str,
        document_id: &str,
        ttl_secs: u64,
    ) -> HealthResult<PreviewLink> {
        let document = self.get(user_id, document_id).await?;
        let preview_url = self.storage.signed_url(&document.file_path, ttl_secs).await?;
        Ok(PreviewLink {
            preview_url,
            file_type: document.mime_type,
            expires_in: ttl_secs,
        })
    }
}

fn normalize_folder(folder: Option<&str>) -> String {
    let trimmed = folder.unwrap_or("/").trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn normalize_tags(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentCategory;
    use crate::testing::{test_pool, MemoryStorage};
    use chrono::NaiveDate;

    const LIMIT: u64 = 1024;

    async fn service() -> (DocumentService, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let service = DocumentService::new(test_pool().await, storage.clone());
        (service, storage)
    }

    fn pdf(name: &str) -> IncomingFile {
        IncomingFile::new(name, "application/pdf", b"%PDF-1.4 test".to_vec())
    }

    #[test]
    fn test_normalize_folder() {
        assert_eq!(normalize_folder(None), "/");
        assert_eq!(normalize_folder(Some("")), "/");
        assert_eq!(normalize_folder(Some("labs/2024/")), "/labs/2024");
        assert_eq!(normalize_folder(Some("/labs")), "/labs");
    }

    #[tokio::test]
    async fn test_ingest_stores_object_and_row() {
        let (service, storage) = service().await;
        let metadata = UploadMetadata {
            category: Some(DocumentCategory::Lab),
            tags: vec!["blood".into(), " ".into()],
            ..Default::default()
        };

        let document = service.ingest("u1", pdf("cbc.pdf"), &metadata, LIMIT).await.unwrap();
        assert!(document.file_path.starts_with("u1/"));
        assert!(document.file_path.ends_with("_cbc.pdf"));
        assert_eq!(document.display_name, "cbc.pdf");
        assert_eq!(document.tags.len(), 1);
        assert!(storage.contains(&document.file_path));

        let fetched = service.get("u1", &document.id).await.unwrap();
        assert_eq!(fetched.category, DocumentCategory::Lab);
        assert!(fetched.has_tag("blood"));
    }

    #[tokio::test]
    async fn test_unknown_stored_category_is_an_error() {
        let (service, _storage) = service().await;
        let document = service
            .ingest("u1", pdf("cbc.pdf"), &UploadMetadata::default(), LIMIT)
            .await
            .unwrap();
        sqlx::query("UPDATE documents SET category = 'bogus' WHERE id = ?")
            .bind(&document.id)
            .execute(&service.pool)
            .await
            .unwrap();

        assert!(matches!(
            service.get("u1", &document.id).await,
            Err(HealthError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_file_never_reaches_storage() {
        let (service, storage) = service().await;
        let mut file = pdf("huge.pdf");
        file.size = LIMIT + 1;

        let err = service
            .ingest("u1", file, &UploadMetadata::default(), LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::FileTooLarge { .. }));
        assert_eq!(storage.put_count(), 0);
    }

    #[tokio::test]
    async fn test_disallowed_type_creates_no_record() {
        let (service, storage) = service().await;
        let file = IncomingFile::new("run.exe", "application/x-msdownload", vec![1u8; 8]);

        assert!(service
            .ingest("u1", file, &UploadMetadata::default(), LIMIT)
            .await
            .is_err());
        assert!(service
            .list("u1", &DocumentListQuery::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(storage.put_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_partial_success() {
        let (service, _storage) = service().await;
        let mut oversized = pdf("big.pdf");
        oversized.size = LIMIT * 2;
        let files = vec![pdf("a.pdf"), oversized, pdf("a.pdf")];

        let response = service
            .ingest_batch("u1", files, &UploadMetadata::default(), LIMIT)
            .await;
        assert!(response.success);
        assert_eq!(response.total_uploaded, 2);
        assert_eq!(response.total_errors, 1);
        assert_eq!(response.errors[0].file_name, "big.pdf");
        // Same name in one batch still gets distinct keys
        assert_ne!(response.uploaded[0].file_path, response.uploaded[1].file_path);
    }

    #[tokio::test]
    async fn test_documents_are_owner_scoped() {
        let (service, _storage) = service().await;
        let document = service
            .ingest("u1", pdf("a.pdf"), &UploadMetadata::default(), LIMIT)
            .await
            .unwrap();

        assert!(matches!(
            service.get("u2", &document.id).await,
            Err(HealthError::DocumentNotFound(_))
        ));
        assert!(service.delete("u2", &document.id).await.is_err());
        assert!(service
            .list("u2", &DocumentListQuery::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (service, _storage) = service().await;
        let lab = UploadMetadata {
            category: Some(DocumentCategory::Lab),
            tags: vec!["blood".into(), "2024".into()],
            provider: Some("City Clinic".into()),
            document_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let imaging = UploadMetadata {
            category: Some(DocumentCategory::Imaging),
            folder_path: Some("scans".into()),
            tags: vec!["Knee".into()],
            document_date: NaiveDate::from_ymd_opt(2023, 6, 1),
            ..Default::default()
        };
        service.ingest("u1", pdf("cbc.pdf"), &lab, LIMIT).await.unwrap();
        service.ingest("u1", pdf("mri.pdf"), &imaging, LIMIT).await.unwrap();

        let by_category = service
            .list(
                "u1",
                &DocumentListQuery {
                    category: Some(DocumentCategory::Imaging),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].file_name, "mri.pdf");

        let by_folder = service
            .list(
                "u1",
                &DocumentListQuery {
                    folder: Some("/scans".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_folder.len(), 1);

        let any_tag = service
            .list(
                "u1",
                &DocumentListQuery {
                    tags: Some("knee,blood".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(any_tag.len(), 2);

        let mixed_case = service
            .list(
                "u1",
                &DocumentListQuery {
                    tags: Some("KNEE".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(mixed_case.len(), 1);
        assert_eq!(mixed_case[0].file_name, "mri.pdf");

        let by_search = service
            .list(
                "u1",
                &DocumentListQuery {
                    search: Some("city".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_search.len(), 1);
        assert_eq!(by_search[0].file_name, "cbc.pdf");

        let by_date = service
            .list(
                "u1",
                &DocumentListQuery {
                    start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                    end_date: NaiveDate::from_ymd_opt(2024, 12, 31),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_date.len(), 1);
        assert_eq!(by_date[0].file_name, "cbc.pdf");
    }

    #[tokio::test]
    async fn test_update_keeps_storage_fields() {
        let (service, _storage) = service().await;
        let document = service
            .ingest("u1", pdf("a.pdf"), &UploadMetadata::default(), LIMIT)
            .await
            .unwrap();

        let updated = service
            .update(
                "u1",
                &document.id,
                UpdateDocumentRequest {
                    display_name: Some("Annual bloodwork".into()),
                    tags: Some(vec!["annual".into()]),
                    notes: Some("fasting".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Annual bloodwork");
        assert_eq!(updated.file_path, document.file_path);
        assert!(updated.has_tag("annual"));

        let fetched = service.get("u1", &document.id).await.unwrap();
        assert_eq!(fetched.notes.as_deref(), Some("fasting"));
    }

    #[tokio::test]
    async fn test_delete_survives_storage_failure() {
        let (service, storage) = service().await;
        let document = service
            .ingest("u1", pdf("a.pdf"), &UploadMetadata::default(), LIMIT)
            .await
            .unwrap();

        storage.fail_deletes(true);
        service.delete("u1", &document.id).await.unwrap();
        assert!(matches!(
            service.get("u1", &document.id).await,
            Err(HealthError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_links_use_signed_urls() {
        let (service, _storage) = service().await;
        let document = service
            .ingest("u1", pdf("a.pdf"), &UploadMetadata::default(), LIMIT)
            .await
            .unwrap();

        let download = service.download_link("u1", &document.id, 300).await.unwrap();
        assert_eq!(download.file_name, "a.pdf");
        assert_eq!(download.expires_in, 300);
        assert!(download.download_url.contains(&document.file_path));

        let preview = service.preview_link("u1", &document.id, 300).await.unwrap();
        assert_eq!(preview.file_type, "application/pdf");
    }
}
