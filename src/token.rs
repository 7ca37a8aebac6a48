use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::info;

use crate::error::ApiError;
use crate::line::{LineClient, Token};

struct CachedToken {
    token: Token,
    fetched_at: Instant,
}

impl CachedToken {
    fn new(token: Token) -> Self {
        Self {
            token,
            fetched_at: Instant::now(),
        }
    }

    /// A token is stale once less than `margin` of its lifetime remains.
    /// The margin is capped at half the lifetime so a short-lived token is
    /// still reused for a while after each fetch. `expires_in == 0` means
    /// LINE gave no lifetime; such a token is only replaced after the API
    /// rejects it.
    fn is_stale(&self, now: Instant, margin: Duration) -> bool {
        if self.token.expires_in == 0 {
            return false;
        }
        let lifetime = Duration::from_secs(self.token.expires_in);
        let margin = margin.min(lifetime / 2);
        now.saturating_duration_since(self.fetched_at) + margin >= lifetime
    }
}

/// Holds the channel access token shared by every webhook request.
pub struct TokenStore {
    line: Arc<LineClient>,
    refresh_margin: Duration,
    current: RwLock<CachedToken>,
}

impl TokenStore {
    /// Perform the mandatory startup fetch.
    pub async fn initialize(line: Arc<LineClient>, refresh_margin: Duration) -> Result<Self, ApiError> {
        let token = line.fetch_access_token().await?;
        info!(
            "Fetched LINE access token (type {}, expires in {}s)",
            token.token_type, token.expires_in
        );
        Ok(Self {
            line,
            refresh_margin,
            current: RwLock::new(CachedToken::new(token)),
        })
    }

    /// The current token, re-fetched first if it is close to expiry.
    pub async fn current(&self) -> Result<Token, ApiError> {
        {
            let cached = self.current.read().await;
            if !cached.is_stale(Instant::now(), self.refresh_margin) {
                return Ok(cached.token.clone());
            }
        }

        let mut cached = self.current.write().await;
        // Another request may have refreshed while we waited for the lock.
        if !cached.is_stale(Instant::now(), self.refresh_margin) {
            return Ok(cached.token.clone());
        }
        info!("LINE access token is near expiry, refreshing");
        *cached = CachedToken::new(self.line.fetch_access_token().await?);
        Ok(cached.token.clone())
    }

    /// Replace `rejected` after the API refused it. If the held token has
    /// already moved on, that newer token is returned without another fetch.
    pub async fn invalidate(&self, rejected: &Token) -> Result<Token, ApiError> {
        let mut cached = self.current.write().await;
        if cached.token != *rejected {
            return Ok(cached.token.clone());
        }
        info!("LINE access token was rejected, refreshing");
        *cached = CachedToken::new(self.line.fetch_access_token().await?);
        Ok(cached.token.clone())
    }
}
