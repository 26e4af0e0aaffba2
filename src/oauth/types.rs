//! Request and result types shared by all authentication flows.

use anyhow::{ensure, Result};
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Inbound token request.
///
/// Parameters keep their wire order and may repeat; lookups return the
/// first value.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationRequest {
    grant_type: String,
    parameters: Vec<(String, String)>,
    headers: HeaderMap,
}

impl AuthenticationRequest {
    /// Build a request from decoded form pairs and the HTTP headers it came with.
    pub fn new(parameters: Vec<(String, String)>, headers: HeaderMap) -> Self {
        let grant_type = parameters
            .iter()
            .find(|(name, _)| name == "grant_type")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        Self {
            grant_type,
            parameters,
            headers,
        }
    }

    pub fn grant_type(&self) -> &str {
        &self.grant_type
    }

    /// First value of parameter `name`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First value of parameter `name`, treating an empty value as absent.
    pub fn non_empty_parameter(&self, name: &str) -> Option<&str> {
        self.parameter(name).filter(|value| !value.is_empty())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// A client whose credentials were accepted by a flow.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    pub client_id: String,
    pub authentication_time: DateTime<Utc>,
    pub additional_claims: HashMap<String, String>,
}

/// Signed OIDC ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdToken {
    value: String,
    issue_time: DateTime<Utc>,
    expiry_time: DateTime<Utc>,
}

impl IdToken {
    pub fn new(
        value: impl Into<String>,
        issue_time: DateTime<Utc>,
        expiry_time: DateTime<Utc>,
    ) -> Result<Self> {
        ensure!(
            expiry_time > issue_time,
            "ID token expiry {} must be after issue time {}",
            expiry_time,
            issue_time
        );
        Ok(Self {
            value: value.into(),
            issue_time,
            expiry_time,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issue_time(&self) -> DateTime<Utc> {
        self.issue_time
    }

    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_time
    }

    pub fn lifetime(&self) -> Duration {
        self.expiry_time - self.issue_time
    }
}

/// Access token obtained by exchanging an ID token at the STS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsAccessToken {
    pub value: String,
    pub scope: String,
    pub issue_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
}

/// Access token generated for an impersonated service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountAccessToken {
    pub service_account: String,
    pub value: String,
    pub scope: String,
    pub issue_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
}

/// Downstream access token handed to the client alongside its ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessToken {
    Sts(StsAccessToken),
    ServiceAccount(ServiceAccountAccessToken),
}

impl AccessToken {
    pub fn value(&self) -> &str {
        match self {
            AccessToken::Sts(token) => &token.value,
            AccessToken::ServiceAccount(token) => &token.value,
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            AccessToken::Sts(token) => &token.scope,
            AccessToken::ServiceAccount(token) => &token.scope,
        }
    }

    pub fn issue_time(&self) -> DateTime<Utc> {
        match self {
            AccessToken::Sts(token) => token.issue_time,
            AccessToken::ServiceAccount(token) => token.issue_time,
        }
    }

    pub fn expiry_time(&self) -> DateTime<Utc> {
        match self {
            AccessToken::Sts(token) => token.expiry_time,
            AccessToken::ServiceAccount(token) => token.expiry_time,
        }
    }

    /// Validity in seconds, never negative.
    pub fn lifetime(&self) -> Duration {
        (self.expiry_time() - self.issue_time()).max(Duration::zero())
    }

    /// Short label used in audit logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessToken::Sts(_) => "sts",
            AccessToken::ServiceAccount(_) => "service_account",
        }
    }
}

/// Outcome of a successful flow run.
#[derive(Debug, Clone)]
pub struct Authentication {
    pub client: AuthenticatedClient,
    pub id_token: IdToken,
    pub access_token: Option<AccessToken>,
}
