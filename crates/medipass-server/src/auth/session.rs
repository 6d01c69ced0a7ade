//! Browser sessions created by logging in with an API key

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::service::{AuthService, User};

/// Session lifetime
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionService {
    pool: Arc<SqlitePool>,
}

impl SessionService {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Exchange a valid API key for a session
    pub async fn create_session(&self, api_key: &str) -> Result<(Session, User)> {
        let user = AuthService::new(self.pool.clone())
            .verify_api_key(api_key)
            .await?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
        };

        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(now)
            .bind(&user.id)
            .execute(self.pool.as_ref())
            .await?;

        Ok((session, user))
    }

    /// Resolve a session id to its user; expired sessions are removed
    pub async fn validate_session(&self, session_id: &str) -> Result<User> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT user_id, expires_at FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        let (user_id, expires_at) = row.ok_or_else(|| anyhow!("Session not found"))?;
        if Utc::now() > expires_at {
            self.delete_session(session_id).await?;
            return Err(anyhow!("Session expired"));
        }

        AuthService::new(self.pool.clone()).get_user(&user_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
