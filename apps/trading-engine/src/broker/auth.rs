//! OAuth2 token management for the broker session.
//!
//! The bridge asks for a valid token before authenticating; a token
//! within 5 minutes of expiry is treated as already expired and
//! refreshed proactively so an order never races a dying session.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::BrokerError;

/// Refresh when the token expires within this margin.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Broker OAuth credentials, from the `broker` config section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub account_id: String,
    /// Token refresh endpoint; empty disables refresh.
    #[serde(default)]
    pub token_url: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds until expiry; brokers commonly default to 30 days.
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    2_592_000
}

#[derive(Debug)]
struct TokenState {
    access_token: String,
    refresh_token: String,
    /// Unix seconds; 0 means expiry has never been learned.
    expires_at: i64,
}

/// Owns the access/refresh token pair and its expiry.
#[derive(Debug)]
pub struct TokenManager {
    credentials: Credentials,
    http: reqwest::Client,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Manager seeded from configured credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        let state = TokenState {
            access_token: credentials.access_token.clone(),
            refresh_token: credentials.refresh_token.clone(),
            expires_at: 0,
        };
        Self {
            credentials,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            state: Mutex::new(state),
        }
    }

    /// A token safe to authenticate with, refreshing when needed.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` when the refresh endpoint denies the
    /// refresh or no usable token exists.
    pub async fn valid_token(&self) -> Result<String, BrokerError> {
        let mut state = self.state.lock().await;

        if state.expires_at != 0 && Utc::now().timestamp() < state.expires_at - EXPIRY_MARGIN_SECS {
            return Ok(state.access_token.clone());
        }

        if !state.refresh_token.is_empty() && !self.credentials.token_url.is_empty() {
            return self.refresh(&mut state).await;
        }

        // Initial token with unknown expiry: use it and let the broker
        // tell us if it is stale.
        if state.expires_at == 0 && !state.access_token.is_empty() {
            warn!("token expiry unknown, using configured access token as-is");
            return Ok(state.access_token.clone());
        }

        Err(BrokerError::AuthenticationFailed(
            "no usable access token and refresh is not configured".to_string(),
        ))
    }

    async fn refresh(&self, state: &mut TokenState) -> Result<String, BrokerError> {
        let response = self
            .http
            .post(self.credentials.token_url.as_str())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BrokerError::AuthenticationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BrokerError::AuthenticationFailed(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::AuthenticationFailed(e.to_string()))?;

        state.access_token = refreshed.access_token;
        if let Some(new_refresh) = refreshed.refresh_token {
            state.refresh_token = new_refresh;
        }
        state.expires_at = Utc::now().timestamp() + refreshed.expires_in;
        info!(expires_in = refreshed.expires_in, "access token refreshed");

        Ok(state.access_token.clone())
    }

    /// Record an expiry learned out-of-band (e.g. from an auth response).
    pub async fn set_expiry(&self, expires_at: i64) {
        self.state.lock().await.expires_at = expires_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(access: &str, refresh: &str, url: &str) -> Credentials {
        Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            account_id: "1".to_string(),
            token_url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_expiry_uses_configured_token() {
        let manager = TokenManager::new(credentials("tok", "", ""));
        assert_eq!(manager.valid_token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let manager = TokenManager::new(credentials("tok", "refresh", "http://invalid"));
        manager.set_expiry(Utc::now().timestamp() + 3600).await;
        assert_eq!(manager.valid_token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_near_expiry_triggers_refresh_failure_surfaces() {
        let manager = TokenManager::new(credentials("tok", "refresh", "http://127.0.0.1:1/oauth"));
        // Expires within the 5-minute margin: refresh is attempted and
        // fails against the unreachable endpoint.
        manager.set_expiry(Utc::now().timestamp() + 60).await;
        assert!(matches!(
            manager.valid_token().await,
            Err(BrokerError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_no_token_no_refresh_fails() {
        let manager = TokenManager::new(credentials("", "", ""));
        assert!(matches!(
            manager.valid_token().await,
            Err(BrokerError::AuthenticationFailed(_))
        ));
    }
}
