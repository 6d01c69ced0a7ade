//! Account and API key management

use anyhow::{anyhow, bail, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::api_key::{extract_key_prefix, generate_api_key, validate_key_format};

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// API key metadata; the key itself is only returned once
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub key_prefix: String,
    pub name: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: Option<String>,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: String,
    pub api_key: String,
    pub name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct KeyCandidate {
    id: String,
    user_id: String,
    key_hash: String,
    expires_at: Option<DateTime<Utc>>,
}

pub struct AuthService {
    pool: Arc<SqlitePool>,
}

impl AuthService {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Register a new user and issue a first API key
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let email = request.email.trim().to_lowercase();
        let display_name = request.display_name.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            bail!("A valid email is required");
        }
        if display_name.is_empty() {
            bail!("Display name is required");
        }

        let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(&email)
            .fetch_one(self.pool.as_ref())
            .await?;
        if existing > 0 {
            bail!("Email already registered");
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            display_name,
            created_at: Utc::now(),
            last_login_at: None,
            is_active: true,
        };

        sqlx::query(
            "INSERT INTO users (id, email, display_name, created_at, is_active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.created_at)
        .execute(self.pool.as_ref())
        .await?;

        let key = self
            .create_api_key(
                &user.id,
                CreateApiKeyRequest {
                    name: Some("Default Key".to_string()),
                    expires_in_days: None,
                },
            )
            .await?;

        Ok(RegisterResponse {
            user,
            api_key: key.api_key,
        })
    }

    /// Verify an API key and return the associated active user
    pub async fn verify_api_key(&self, api_key: &str) -> Result<User> {
        if !validate_key_format(api_key) {
            bail!("Invalid API key format");
        }
        let key_prefix =
            extract_key_prefix(api_key).ok_or_else(|| anyhow!("Invalid key prefix"))?;

        let candidates: Vec<KeyCandidate> = sqlx::query_as(
            r#"
            SELECT k.id, k.user_id, k.key_hash, k.expires_at
            FROM api_keys k
            JOIN users u ON k.user_id = u.id
            WHERE k.key_prefix = ? AND u.is_active = 1
            "#,
        )
        .bind(&key_prefix)
        .fetch_all(self.pool.as_ref())
        .await?;

        let now = Utc::now();
        for candidate in candidates {
            if candidate.expires_at.is_some_and(|exp| now > exp) {
                continue;
            }
            if verify_hash(api_key, &candidate.key_hash)? {
                sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(&candidate.id)
                    .execute(self.pool.as_ref())
                    .await?;
                return self.get_user(&candidate.user_id).await;
            }
        }

        Err(anyhow!("Invalid API key"))
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, display_name, created_at, last_login_at, is_active FROM users WHERE id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or_else(|| anyhow!("User not found"))
    }

    pub async fn create_api_key(
        &self,
        user_id: &str,
        request: CreateApiKeyRequest,
    ) -> Result<CreateApiKeyResponse> {
        let api_key = generate_api_key(user_id);
        let key_prefix =
            extract_key_prefix(&api_key).ok_or_else(|| anyhow!("Generated key has no prefix"))?;
        let key_hash = hash_key(&api_key)?;

        let key_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = request
            .expires_in_days
            .map(|days| now + chrono::Duration::days(days as i64));

        sqlx::query(
            r#"
            INSERT INTO api_keys (id, user_id, key_prefix, key_hash, name, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key_id)
        .bind(user_id)
        .bind(&key_prefix)
        .bind(&key_hash)
        .bind(&request.name)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(CreateApiKeyResponse {
            id: key_id,
            api_key,
            name: request.name,
            expires_at,
        })
    }

    pub async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, key_prefix, name, last_used_at, expires_at, created_at
            FROM api_keys
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(keys)
    }

    pub async fn revoke_api_key(&self, user_id: &str, key_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(key_id)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            bail!("API key not found");
        }
        Ok(())
    }
}

fn hash_key(key: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(key.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash key: {}", e))?;
    Ok(hash.to_string())
}

fn verify_hash(key: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("Invalid hash format: {}", e))?;
    Ok(Argon2::default()
        .verify_password(key.as_bytes(), &parsed)
        .is_ok())
}
