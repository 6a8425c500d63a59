use anyhow::anyhow;

use crate::db::Database;
use crate::errors::{SyncError, SyncResult};
use crate::models::Settings;
use crate::services::crypto;
use crate::services::state::AppState;

const SETTING_KEYS: &[&str] = &[
    "qb_client_id",
    "qb_client_secret",
    "qb_redirect_uri",
    "qb_environment",
    "tax_reserve_rate",
];

pub fn load_settings(db: &Database) -> Settings {
    let client_id = db.get_setting("qb_client_id").ok().flatten();
    let client_secret = db.get_setting("qb_client_secret").ok().flatten();
    let redirect_uri = db
        .get_setting("qb_redirect_uri")
        .ok()
        .flatten()
        .unwrap_or_else(|| "http://localhost:8080/callback".to_string());
    let environment = db
        .get_setting("qb_environment")
        .ok()
        .flatten()
        .unwrap_or_else(|| "sandbox".to_string());
    let tax_reserve_rate = db
        .get_setting("tax_reserve_rate")
        .ok()
        .flatten()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.25);
    Settings {
        client_id,
        client_secret,
        redirect_uri,
        environment,
        tax_reserve_rate,
    }
}

/// Persists one setting. The client secret is encrypted before it touches
/// the database file.
pub fn configure(state: &AppState, key: &str, value: &str) -> SyncResult<()> {
    if !SETTING_KEYS.contains(&key) {
        return Err(SyncError::Validation(format!(
            "unknown setting '{}'; expected one of {}",
            key,
            SETTING_KEYS.join(", ")
        )));
    }
    if key == "tax_reserve_rate" && value.parse::<f64>().is_err() {
        return Err(SyncError::Validation(
            "tax_reserve_rate must be a number".into(),
        ));
    }

    let stored = if key == "qb_client_secret" {
        crypto::encrypt_secret(value).map_err(SyncError::Internal)?
    } else {
        value.to_string()
    };

    let db = state.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
    db.set_setting(key, &stored)?;
    Ok(())
}
