//! Session authentication against Central.
//!
//! A token cached from an earlier run is verified first; only when it is
//! missing or rejected is a new session created with the configured
//! credentials.

use super::config::TokenCache;
use crate::error::{RemoteError, RemoteResult};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: Option<String>,
}

/// Holds the bearer token for one client.
pub struct SessionAuth {
    username: String,
    password: String,
    cache: Option<TokenCache>,
    token: RwLock<Option<String>>,
}

impl SessionAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>, cache: Option<TokenCache>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            cache,
            token: RwLock::new(None),
        }
    }

    /// Returns a usable token, logging in if needed.
    pub async fn token(&self, http: &Client, base_url: &str) -> RemoteResult<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut slot = self.token.write().await;
        // Another caller may have logged in while we waited for the lock.
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        let token = match self.cached_token(http, base_url).await {
            Some(token) => token,
            None => {
                let token = self.login(http, base_url).await?;
                if let Some(cache) = &self.cache
                    && let Err(e) = cache.write(&token)
                {
                    warn!("Could not cache session token: {}", e);
                }
                token
            }
        };
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Forgets the current token, in memory and in the cache.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
        if let Some(cache) = &self.cache
            && let Err(e) = cache.clear()
        {
            warn!("Could not clear token cache: {}", e);
        }
    }

    async fn cached_token(&self, http: &Client, base_url: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let token = cache.read()?;
        match verify_token(http, base_url, &token).await {
            Ok(()) => {
                debug!("Reusing cached session token from {:?}", cache.path());
                Some(token)
            }
            Err(e) => {
                debug!("Cached session token rejected: {}", e);
                None
            }
        }
    }

    async fn login(&self, http: &Client, base_url: &str) -> RemoteResult<String> {
        let url = format!("{base_url}sessions");
        let response = http
            .post(&url)
            .json(&serde_json::json!({
                "email": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Auth(format!(
                "login request failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let session: SessionResponse = response.json().await?;
        let token = session.token.ok_or_else(|| {
            RemoteError::Auth("login succeeded but the response carried no token".to_string())
        })?;
        info!("Created new Central session for {}", self.username);
        Ok(token)
    }
}

/// Checks with the server that `token` is still valid.
pub async fn verify_token(http: &Client, base_url: &str, token: &str) -> RemoteResult<()> {
    let response = http
        .get(format!("{base_url}users/current"))
        .bearer_auth(token)
        .send()
        .await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(RemoteError::Auth(format!(
            "token verification failed with status {}",
            status.as_u16()
        )))
    }
}
