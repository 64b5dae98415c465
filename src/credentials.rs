use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::oauth::OAuthClient;

/// Tokens expiring within this window are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Cached OAuth credential pair, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CredentialToken {
    /// A token without a recorded expiry is assumed valid until the API rejects it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| now + ChronoDuration::seconds(EXPIRY_SKEW_SECS) >= at)
            .unwrap_or(false)
    }
}

/// Reads the token cache. A missing file yields `None`; an unreadable or
/// corrupt one is logged and also yields `None` so a fresh token gets issued.
pub async fn load_token(path: &Path) -> Option<CredentialToken> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Could not read token file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("Ignoring malformed token file {}: {}", path.display(), e);
            None
        }
    }
}

pub async fn save_token(path: &Path, token: &CredentialToken) -> Result<()> {
    let json = serde_json::to_string_pretty(token)?;
    fs::write(path, json)
        .await
        .with_context(|| format!("failed to write token file {}", path.display()))?;
    debug!("Saved credentials to {}", path.display());
    Ok(())
}

/// Interactive (or otherwise out-of-band) acquisition of a brand new token.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, oauth: &OAuthClient) -> Result<CredentialToken>;
}

/// Supplies bearer tokens to the uploader.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;

    /// Forget the current token after the API rejected it.
    async fn invalidate(&self) -> Result<()>;
}

/// Token cache backed by a JSON file: loads the cached token, refreshes it when
/// expired, and falls back to the authorizer when neither works.
pub struct CachedCredentials {
    token_file: PathBuf,
    oauth: OAuthClient,
    authorizer: Box<dyn Authorizer>,
    current: Mutex<Option<CredentialToken>>,
}

impl CachedCredentials {
    pub fn new(token_file: PathBuf, oauth: OAuthClient, authorizer: Box<dyn Authorizer>) -> Self {
        Self {
            token_file,
            oauth,
            authorizer,
            current: Mutex::new(None),
        }
    }

    async fn refresh_or_authorize(&self, stale: Option<CredentialToken>) -> Result<CredentialToken> {
        if let Some(stale) = stale.filter(|t| t.refresh_token.is_some()) {
            match self.oauth.refresh(&stale).await {
                Ok(token) => {
                    info!("Refreshed expired access token");
                    return Ok(token);
                }
                Err(e) => warn!("Token refresh failed, re-authorizing: {:#}", e),
            }
        }
        info!("No usable credentials, starting authorization");
        self.authorizer.authorize(&self.oauth).await
    }
}

#[async_trait]
impl CredentialProvider for CachedCredentials {
    async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = load_token(&self.token_file).await;
        }

        if let Some(token) = current.as_ref() {
            if !token.is_expired(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.refresh_or_authorize(current.take()).await?;
        save_token(&self.token_file, &token).await?;
        let access = token.access_token.clone();
        *current = Some(token);
        Ok(access)
    }

    async fn invalidate(&self) -> Result<()> {
        self.current.lock().await.take();
        match fs::remove_file(&self.token_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err::<(), _>(e)
                .with_context(|| format!("failed to remove {}", self.token_file.display())),
        }
    }
}
