//! External collaborators: JWT signing, token exchange and impersonation.
//!
//! The token service never holds a signing key of its own in production and
//! never stores tokens. Everything that needs key material or a network call
//! to Google APIs sits behind the traits in this module, so flows can be
//! exercised against stubs.

pub mod error;
pub mod iam;
pub mod local;
pub mod sts;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub use error::ApiError;
pub use iam::{CredentialSource, IamCredentialsClient, MetadataClient, ServiceAccountSigner};
pub use local::LocalKeySigner;
pub use sts::StsClient;

/// Signs JWT payloads on behalf of a service identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign a JSON claim set and return the compact JWS.
    async fn sign_jwt(&self, payload: &serde_json::Value) -> Result<String, ApiError>;

    /// Public location of the key set that verifies signed tokens.
    fn jwks_url(&self) -> String;

    /// JWS `alg` of signed tokens. Google-managed service account keys are RS256.
    fn signing_algorithm(&self) -> String {
        "RS256".to_string()
    }
}

/// Access token returned by a token exchange.
#[derive(Debug, Clone)]
pub struct ExchangedToken {
    pub access_token: String,
    pub expires_in_secs: i64,
}

/// Exchanges a subject token for a scoped access token (RFC 8693).
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        subject_token: &str,
        scope: &str,
        audience: &str,
    ) -> Result<ExchangedToken, ApiError>;
}

/// Access token generated for an impersonated service account.
#[derive(Debug, Clone)]
pub struct GeneratedAccessToken {
    pub access_token: String,
    pub expire_time: DateTime<Utc>,
}

/// Generates short-lived credentials for a service account using a bearer
/// credential that is allowed to impersonate it.
#[async_trait]
pub trait Impersonation: Send + Sync {
    async fn generate_access_token(
        &self,
        service_account: &str,
        bearer_token: &str,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<GeneratedAccessToken, ApiError>;
}
