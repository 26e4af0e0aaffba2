//! Issuer and workload identity pool configuration.

use chrono::Duration;

/// Default ID token lifetime in minutes.
pub const DEFAULT_TOKEN_VALIDITY_MINS: i64 = 5;

/// Longest accepted ID token lifetime in minutes.
pub const MAX_TOKEN_VALIDITY_MINS: i64 = 24 * 60;

/// ID token issuer settings.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Public issuer URL, reported as `iss`.
    pub issuer_url: String,
    /// Lifetime of issued ID tokens.
    pub token_lifetime: Duration,
}

impl IssuerConfig {
    pub fn new(issuer_url: impl Into<String>, token_lifetime: Duration) -> Self {
        Self {
            issuer_url: issuer_url.into().trim_end_matches('/').to_string(),
            token_lifetime,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.issuer_url.is_empty() {
            return Err("Token issuer URL must not be empty".to_string());
        }
        if !self.issuer_url.starts_with("https://") && !self.issuer_url.starts_with("http://") {
            return Err(format!(
                "Token issuer must be an http(s) URL: {}",
                self.issuer_url
            ));
        }
        if self.token_lifetime <= Duration::zero() {
            return Err("Token validity must be positive".to_string());
        }
        if self.token_lifetime > Duration::minutes(MAX_TOKEN_VALIDITY_MINS) {
            return Err(format!(
                "Token validity must not exceed {} minutes",
                MAX_TOKEN_VALIDITY_MINS
            ));
        }
        Ok(())
    }
}

/// Coordinates of the workload identity pool provider that trusts this issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub project_number: String,
    pub pool_id: String,
    pub provider_id: String,
}

impl PoolConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.project_number.is_empty() || !self.project_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!(
                "Workload identity project number must be numeric: '{}'",
                self.project_number
            ));
        }
        if self.pool_id.is_empty() {
            return Err("Workload identity pool ID must not be empty".to_string());
        }
        if self.provider_id.is_empty() {
            return Err("Workload identity provider ID must not be empty".to_string());
        }
        Ok(())
    }

    /// Provider resource name, used as the STS audience.
    pub fn audience(&self) -> String {
        format!(
            "//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
            self.project_number, self.pool_id, self.provider_id
        )
    }

    /// Audience the provider expects in ID tokens.
    pub fn expected_token_audience(&self) -> String {
        format!("https:{}", self.audience())
    }
}
