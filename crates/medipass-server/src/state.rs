//! Application state

use medipass::HealthState;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// SQLite pool shared with the health record services
    pub pool: Arc<SqlitePool>,

    /// Server configuration
    pub config: Config,

    /// Health record services behind the `/api` routes
    pub health: HealthState,
}
