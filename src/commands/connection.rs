use serde::Serialize;

use crate::errors::{SyncError, SyncResult};
use crate::services::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnect_required: bool,
    pub realm_id: Option<String>,
}

/// Returns the URL the user must visit to authorize the integration.
pub fn connect_url(state: &AppState) -> SyncResult<String> {
    Ok(state.token_manager()?.authorize_url())
}

/// Trades the authorization callback's code for a persisted credential.
pub async fn exchange(state: &AppState, code: &str, realm_id: &str) -> SyncResult<()> {
    let tokens = state.token_manager()?;
    let credential = tokens.exchange_code(code, realm_id).await?;
    tracing::info!(realm_id = %credential.realm_id, "QuickBooks connected");
    Ok(())
}

/// Connection health, with the reconnect case kept distinct from transient
/// failures so the caller can redirect to re-authorization.
pub async fn status(state: &AppState) -> SyncResult<ConnectionStatus> {
    let tokens = state.token_manager()?;
    match tokens.get_valid_credential().await {
        Ok(credential) => Ok(ConnectionStatus {
            connected: true,
            reconnect_required: false,
            realm_id: Some(credential.realm_id),
        }),
        Err(err) if err.reconnect_required() => Ok(ConnectionStatus {
            connected: false,
            reconnect_required: true,
            realm_id: None,
        }),
        Err(err @ SyncError::Validation(_)) => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "connection check failed");
            Ok(ConnectionStatus {
                connected: false,
                reconnect_required: false,
                realm_id: None,
            })
        }
    }
}
