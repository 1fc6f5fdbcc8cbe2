//! Access token freshness.
//!
//! [`Credentials`] owns the process-wide [`CredentialState`] and refreshes it
//! through a [`TokenRefresher`] when it gets close to expiry. Successful
//! refreshes are written out through a [`CredentialStore`].

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Refresh once fewer than this many seconds of validity remain.
pub const REFRESH_THRESHOLD_SECS: i64 = 30 * 60;

/// Lifetime booked for every refreshed token, whatever the provider reports.
pub const REFRESHED_TOKEN_LIFETIME_SECS: i64 = 60 * 60;

/// Errors from the identity provider while exchanging a refresh token.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token refresh request failed: {0}")]
    Request(String),
    #[error("identity provider rejected token refresh ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed token refresh response: {0}")]
    Malformed(String),
}

/// Errors writing session state to durable storage. Always fatal.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("{}: could not write file: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Tokens issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialState {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    pub refresh_token: String,
}

impl CredentialState {
    /// Whether at most [`REFRESH_THRESHOLD_SECS`] of validity remain at `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry - now <= TimeDelta::seconds(REFRESH_THRESHOLD_SECS)
    }
}

impl fmt::Debug for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialState")
            .field("access_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Result of a refresh-token exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub id_token: String,
    pub refresh_token: String,
    /// Lifetime reported by the provider, in seconds.
    pub expires_in: i64,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Identity provider able to exchange a refresh token for new tokens.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant, AuthError>>;
}

/// Durable storage for credentials.
pub trait CredentialStore: Send + Sync {
    fn persist(&self, state: &CredentialState) -> Result<(), PersistError>;
}

/// Process-wide credential holder shared by every listener session.
pub struct Credentials {
    state: Mutex<CredentialState>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn CredentialStore>,
}

impl Credentials {
    pub fn new(
        initial: CredentialState,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            state: Mutex::new(initial),
            refresher,
            store,
        }
    }

    /// Return credentials valid at `now`, refreshing first if they are close to expiry.
    ///
    /// At most one refresh is attempted per call. A failed refresh is logged and
    /// the previous (possibly expired) tokens are returned; the caller goes on
    /// with them.
    ///
    /// # Errors
    /// Returns `PersistError` if refreshed tokens could not be written to storage.
    pub async fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<CredentialState, PersistError> {
        // Held across the exchange so concurrent callers never refresh twice.
        let mut state = self.state.lock().await;
        if !state.needs_refresh(now) {
            return Ok(state.clone());
        }

        debug!(expiry = %state.expiry, "Access token close to expiry, refreshing");
        match self.refresher.refresh(&state.refresh_token).await {
            Ok(grant) => {
                let refreshed = CredentialState {
                    access_token: grant.id_token,
                    refresh_token: grant.refresh_token,
                    expiry: now + TimeDelta::seconds(REFRESHED_TOKEN_LIFETIME_SECS),
                };
                self.store.persist(&refreshed)?;
                info!(expiry = %refreshed.expiry, "Access token refreshed");
                *state = refreshed;
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, continuing with stale token");
            }
        }

        Ok(state.clone())
    }

    /// Current credentials without any refresh.
    pub async fn current(&self) -> CredentialState {
        self.state.lock().await.clone()
    }
}
