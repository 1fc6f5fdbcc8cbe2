//! Firebase Secure Token client used to refresh access tokens.

use crate::credentials::{AuthError, TokenGrant, TokenRefresher};
use futures::future::BoxFuture;
use serde::Deserialize;

/// Google Secure Token endpoint for refresh-token exchanges.
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Refreshes Firebase ID tokens with the project's web API key.
#[derive(Clone)]
pub struct FirebaseAuth {
    http: reqwest::Client,
    api_key: String,
    token_url: String,
}

/// Response body of the Secure Token endpoint.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    /// Seconds, sent as a decimal string.
    expires_in: String,
}

impl TryFrom<RefreshResponse> for TokenGrant {
    type Error = AuthError;

    fn try_from(response: RefreshResponse) -> Result<Self, Self::Error> {
        let expires_in = response
            .expires_in
            .trim()
            .parse()
            .map_err(|_| AuthError::Malformed(format!("invalid expires_in: {}", response.expires_in)))?;
        Ok(TokenGrant {
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_in,
        })
    }
}

impl FirebaseAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_token_url(api_key, SECURE_TOKEN_URL)
    }

    /// Client talking to a non-default token endpoint (e.g. the auth emulator).
    pub fn with_token_url(api_key: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            token_url: token_url.into(),
        }
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        body.try_into()
    }
}

impl TokenRefresher for FirebaseAuth {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant, AuthError>> {
        Box::pin(self.exchange(refresh_token))
    }
}
