//! Authentication token cache.
//!
//! Tokens are cached in memory per platform and refreshed on demand when
//! within a fixed buffer of expiry. Refresh is at-most-once-concurrent per
//! platform: other callers block on the platform's slot until the refresh
//! lands.

use std::collections::HashMap;
use std::sync::Arc;

use adsync_types::EtlError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Refresh when the cached token expires within this window.
const EXPIRY_BUFFER_MINUTES: i64 = 5;

/// An access token with an optional expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    #[must_use]
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Whether the token expires within `buffer` from now. Tokens without
    /// expiry never need a refresh.
    #[must_use]
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expires_at.is_some_and(|at| at - Utc::now() <= buffer)
    }
}

/// Source of per-platform credentials (external collaborator contract).
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token for a platform.
    async fn get_token(&self, platform: &str) -> Result<Token, EtlError>;

    /// Force a refresh and return the new token.
    async fn refresh(&self, platform: &str) -> Result<Token, EtlError>;
}

/// Caching wrapper around any [`TokenProvider`].
pub struct CachedTokenProvider<P> {
    inner: P,
    buffer: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<Option<Token>>>>>,
}

impl<P: TokenProvider> CachedTokenProvider<P> {
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            buffer: Duration::minutes(EXPIRY_BUFFER_MINUTES),
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, platform: &str) -> Arc<Mutex<Option<Token>>> {
        self.slots
            .lock()
            .await
            .entry(platform.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl<P: TokenProvider> TokenProvider for CachedTokenProvider<P> {
    async fn get_token(&self, platform: &str) -> Result<Token, EtlError> {
        let slot = self.slot(platform).await;
        // Holding the slot across the fetch makes refresh
        // at-most-once-concurrent per platform.
        let mut guard = slot.lock().await;
        if let Some(token) = guard.as_ref() {
            if !token.expires_within(self.buffer) {
                return Ok(token.clone());
            }
            debug!(platform, "cached token near expiry, refreshing");
            let fresh = self.inner.refresh(platform).await?;
            *guard = Some(fresh.clone());
            return Ok(fresh);
        }
        debug!(platform, "no cached token, fetching");
        let fresh = self.inner.get_token(platform).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    async fn refresh(&self, platform: &str) -> Result<Token, EtlError> {
        let slot = self.slot(platform).await;
        let mut guard = slot.lock().await;
        let fresh = self.inner.refresh(platform).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Provider reading static secrets from `{PLATFORM}_ACCESS_TOKEN`
/// environment variables. Suits deployments where an external rotation job
/// owns token freshness.
#[derive(Default)]
pub struct EnvTokenProvider;

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn get_token(&self, platform: &str) -> Result<Token, EtlError> {
        let var = format!("{}_ACCESS_TOKEN", platform.to_ascii_uppercase());
        match std::env::var(&var) {
            Ok(secret) if !secret.is_empty() => Ok(Token::new(secret, None)),
            _ => Err(EtlError::auth(
                "TOKEN_MISSING",
                format!("no token for platform '{platform}' (set {var})"),
            )),
        }
    }

    async fn refresh(&self, platform: &str) -> Result<Token, EtlError> {
        self.get_token(platform).await
    }
}
