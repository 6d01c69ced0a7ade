//! Authentication: users, API keys and browser sessions

pub mod api_key;
pub mod middleware;
pub mod migrations;
pub mod routes;
pub mod service;
pub mod session;

/// Name of the browser session cookie
pub const SESSION_COOKIE_NAME: &str = "medipass_session";
