use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use crate::db::Database;
use crate::errors::{SyncError, SyncResult};
use crate::models::{Credential, Settings};
use crate::services::crypto;
use crate::utils::now_rfc3339;

const AUTHORIZE_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
const TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
const SCOPE: &str = "com.intuit.quickbooks.accounting";

/// Access tokens within this window of expiry are treated as expired so a
/// request started now does not outlive its token mid-flight.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid,
    NeedsRefresh,
    RefreshExpired,
}

pub fn classify(credential: &Credential, now: DateTime<Utc>) -> CredentialState {
    if credential.expires_at - now > Duration::seconds(EXPIRY_SKEW_SECS) {
        CredentialState::Valid
    } else if credential.refresh_expires_at > now {
        CredentialState::NeedsRefresh
    } else {
        CredentialState::RefreshExpired
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(rename = "x_refresh_token_expires_in")]
    refresh_token_expires_in: i64,
}

/// Owns the single OAuth credential for the connected realm. Refresh is not
/// mutually exclusive: when two callers race, the loser re-reads the row the
/// winner persisted instead of failing outright.
pub struct TokenManager {
    db: Arc<Mutex<Database>>,
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenManager {
    pub fn new(db: Arc<Mutex<Database>>, settings: &Settings) -> SyncResult<Self> {
        let client_id = settings
            .client_id
            .clone()
            .ok_or_else(|| SyncError::Validation("client_id is not configured".into()))?;
        let client_secret = settings
            .client_secret
            .as_deref()
            .ok_or_else(|| SyncError::Validation("client_secret is not configured".into()))
            .and_then(|raw| crypto::reveal(raw).map_err(SyncError::Internal))?;
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()?;
        Ok(TokenManager {
            db,
            http,
            client_id,
            client_secret,
            redirect_uri: settings.redirect_uri.clone(),
        })
    }

    pub fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&response_type=code&scope={}&redirect_uri={}&state={}",
            AUTHORIZE_URL,
            self.client_id,
            SCOPE,
            self.redirect_uri,
            uuid::Uuid::new_v4()
        )
    }

    /// First connection: trade the authorization code for a token pair.
    pub async fn exchange_code(&self, code: &str, realm_id: &str) -> SyncResult<Credential> {
        if code.trim().is_empty() || realm_id.trim().is_empty() {
            return Err(SyncError::Validation(
                "authorization code and realm id are required".into(),
            ));
        }
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let token = self.request_token(&params).await?;
        let credential = self.credential_from_response(token, realm_id.to_string());
        self.persist(&credential)?;
        Ok(credential)
    }

    /// Returns a credential guaranteed to outlive the next request, refreshing
    /// or invalidating the stored row as needed.
    pub async fn get_valid_credential(&self) -> SyncResult<Credential> {
        let stored = self
            .load()?
            .ok_or_else(|| SyncError::Auth("QuickBooks is not connected".into()))?;

        match classify(&stored, Utc::now()) {
            CredentialState::Valid => Ok(stored),
            CredentialState::NeedsRefresh => self.refresh(stored).await,
            CredentialState::RefreshExpired => {
                self.delete()?;
                Err(SyncError::Auth(
                    "QuickBooks refresh token expired; reconnect required".into(),
                ))
            }
        }
    }

    async fn refresh(&self, stored: Credential) -> SyncResult<Credential> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", stored.refresh_token.as_str()),
        ];
        match self.request_token(&params).await {
            Ok(token) => {
                let credential = self.credential_from_response(token, stored.realm_id);
                self.persist(&credential)?;
                Ok(credential)
            }
            Err(err) => {
                // Refresh tokens rotate on use; a concurrent refresher may
                // have already replaced the row with a live credential.
                tracing::warn!(error = %err, "token refresh failed, re-reading stored credential");
                if let Some(current) = self.load()? {
                    if classify(&current, Utc::now()) == CredentialState::Valid {
                        return Ok(current);
                    }
                }
                Err(err)
            }
        }
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> SyncResult<TokenResponse> {
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("token endpoint {}: {}", status, body)));
        }
        Ok(response.json().await?)
    }

    fn credential_from_response(&self, token: TokenResponse, realm_id: String) -> Credential {
        let now = Utc::now();
        Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            realm_id,
            expires_at: now + Duration::seconds(token.expires_in),
            refresh_expires_at: now + Duration::seconds(token.refresh_token_expires_in),
        }
    }

    fn load(&self) -> SyncResult<Option<Credential>> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        let stored = db.get_credential()?;
        match stored {
            Some(mut credential) => {
                credential.access_token =
                    crypto::reveal(&credential.access_token).map_err(SyncError::Internal)?;
                credential.refresh_token =
                    crypto::reveal(&credential.refresh_token).map_err(SyncError::Internal)?;
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    fn persist(&self, credential: &Credential) -> SyncResult<()> {
        let mut sealed = credential.clone();
        sealed.access_token =
            crypto::encrypt_secret(&credential.access_token).map_err(SyncError::Internal)?;
        sealed.refresh_token =
            crypto::encrypt_secret(&credential.refresh_token).map_err(SyncError::Internal)?;
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        db.save_credential(&sealed, &now_rfc3339())?;
        Ok(())
    }

    fn delete(&self) -> SyncResult<()> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        db.delete_credential()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_in_secs: i64, refresh_in_secs: i64) -> Credential {
        let now = Utc::now();
        Credential {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            realm_id: "realm".to_string(),
            expires_at: now + Duration::seconds(expires_in_secs),
            refresh_expires_at: now + Duration::seconds(refresh_in_secs),
        }
    }

    #[test]
    fn fresh_credential_is_valid() {
        let cred = credential(3600, 86400);
        assert_eq!(classify(&cred, Utc::now()), CredentialState::Valid);
    }

    #[test]
    fn credential_inside_skew_window_needs_refresh() {
        let cred = credential(30, 86400);
        assert_eq!(classify(&cred, Utc::now()), CredentialState::NeedsRefresh);
    }

    #[test]
    fn exhausted_refresh_token_is_terminal() {
        let cred = credential(-100, -10);
        assert_eq!(classify(&cred, Utc::now()), CredentialState::RefreshExpired);
    }
}
