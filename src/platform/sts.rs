//! Security Token Service client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::error::ApiError;
use super::{ExchangedToken, TokenExchange};

/// Token exchange grant type (RFC 8693).
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Token type URN of an OAuth access token.
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Token type URN of an OpenID Connect ID token.
pub const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";

/// Default STS endpoint.
pub const DEFAULT_STS_URL: &str = "https://sts.googleapis.com";

#[derive(Debug, Deserialize)]
struct ExchangeTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

/// Client for the STS `v1/token` endpoint.
#[derive(Debug, Clone)]
pub struct StsClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl StsClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create STS HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl TokenExchange for StsClient {
    async fn exchange(
        &self,
        subject_token: &str,
        scope: &str,
        audience: &str,
    ) -> Result<ExchangedToken, ApiError> {
        let url = format!("{}/v1/token", self.base_url);
        let form = [
            ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE),
            ("audience", audience),
            ("scope", scope),
            ("requested_token_type", ACCESS_TOKEN_TYPE),
            ("subject_token", subject_token),
            ("subject_token_type", ID_TOKEN_TYPE),
        ];

        debug!(audience = %audience, scope = %scope, "Exchanging ID token");

        let response = self.http_client.post(&url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_sts_response(status.as_u16(), &body));
        }

        let body: ExchangeTokenResponse = response.json().await?;
        Ok(ExchangedToken {
            access_token: body.access_token,
            expires_in_secs: body.expires_in,
        })
    }
}
