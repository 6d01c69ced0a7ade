//! API key generation and parsing

use rand::Rng;

/// API key prefix
const KEY_PREFIX: &str = "mpk";

const RANDOM_LEN: usize = 32;

/// Generate a new API key
/// Format: mpk_<user_prefix>_<random_32chars>
pub fn generate_api_key(user_id: &str) -> String {
    // Alphanumeric only so `_` stays a separator
    let user_prefix: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .collect();

    let random_part: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(RANDOM_LEN)
        .map(char::from)
        .collect();

    format!("{}_{}_{}", KEY_PREFIX, user_prefix, random_part)
}

/// Lookup prefix: user prefix plus the first 8 random characters
pub fn extract_key_prefix(api_key: &str) -> Option<String> {
    let mut parts = api_key.splitn(3, '_');
    if parts.next()? != KEY_PREFIX {
        return None;
    }
    let user_prefix = parts.next()?;
    let random_part = parts.next()?;
    if !random_part.is_ascii() || random_part.len() < 8 {
        return None;
    }
    Some(format!("{}_{}", user_prefix, &random_part[..8]))
}

/// Validate API key format
pub fn validate_key_format(api_key: &str) -> bool {
    let parts: Vec<&str> = api_key.splitn(3, '_').collect();
    parts.len() == 3
        && parts[0] == KEY_PREFIX
        && parts[2].len() >= RANDOM_LEN
        && parts[2].chars().all(|c| c.is_ascii_alphanumeric())
}
