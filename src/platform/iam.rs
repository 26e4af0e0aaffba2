//! IAM Credentials API: JWT signing and service account impersonation.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ApiError;
use super::{GeneratedAccessToken, Impersonation, Signer};

/// Default IAM Credentials endpoint.
pub const DEFAULT_IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com";

/// Default metadata server endpoint.
pub const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal";

#[derive(Debug, Serialize)]
struct SignJwtRequest {
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignJwtResponse {
    signed_jwt: String,
}

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
    lifetime: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    expire_time: String,
}

/// Stateless client for the IAM Credentials REST API.
///
/// Each call takes the bearer token to authenticate with, so the same
/// client serves both the service's own identity and impersonation calls
/// made with exchanged tokens.
#[derive(Debug, Clone)]
pub struct IamCredentialsClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl IamCredentialsClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create IAM HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn resource_url(&self, service_account: &str, method: &str) -> Result<String, ApiError> {
        if !is_service_account_id(service_account) {
            return Err(ApiError::BadRequest(format!(
                "Invalid service account '{}'",
                service_account
            )));
        }
        Ok(format!(
            "{}/v1/projects/-/serviceAccounts/{}:{}",
            self.base_url, service_account, method
        ))
    }

    /// Sign a JWT with the Google-managed key of `service_account`.
    pub async fn sign_jwt(
        &self,
        service_account: &str,
        bearer_token: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ApiError> {
        let request = SignJwtRequest {
            payload: payload.to_string(),
        };

        let response = self
            .http_client
            .post(self.resource_url(service_account, "signJwt")?)
            .bearer_auth(bearer_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_iam_response(
                status.as_u16(),
                &body,
                "Signing JWT",
                service_account,
            ));
        }

        let body: SignJwtResponse = response.json().await?;
        Ok(body.signed_jwt)
    }
}

/// Service account email or numeric unique ID.
fn is_service_account_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_'))
}

#[async_trait]
impl Impersonation for IamCredentialsClient {
    async fn generate_access_token(
        &self,
        service_account: &str,
        bearer_token: &str,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<GeneratedAccessToken, ApiError> {
        let request = GenerateAccessTokenRequest {
            scope: scopes,
            lifetime: format!("{}s", lifetime.num_seconds()),
        };

        debug!(
            service_account = %service_account,
            lifetime = %request.lifetime,
            "Generating service account access token"
        );

        let response = self
            .http_client
            .post(self.resource_url(service_account, "generateAccessToken")?)
            .bearer_auth(bearer_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_iam_response(
                status.as_u16(),
                &body,
                "Generating access token",
                service_account,
            ));
        }

        let body: GenerateAccessTokenResponse = response.json().await?;
        let expire_time = DateTime::parse_from_rfc3339(&body.expire_time)
            .map_err(|e| ApiError::Api {
                status: status.as_u16(),
                message: format!("Invalid expireTime '{}': {}", body.expire_time, e),
            })?
            .with_timezone(&Utc);

        Ok(GeneratedAccessToken {
            access_token: body.access_token,
            expire_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
}

/// Client for the GCE / Cloud Run metadata server.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to create metadata HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let response = self
            .http_client
            .get(format!(
                "{}/computeMetadata/v1/instance/service-accounts/default/{}",
                self.base_url, path
            ))
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }
        Ok(response)
    }

    /// Email of the service account attached to the workload.
    pub async fn service_account_email(&self) -> Result<String, ApiError> {
        let email = self.get("email").await?.text().await?;
        Ok(email.trim().to_string())
    }

    /// Access token for the attached service account.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let token: MetadataTokenResponse = self.get("token").await?.json().await?;
        Ok(token.access_token)
    }
}

/// Where the service obtains the bearer token for its own API calls.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Ask the metadata server on every call.
    Metadata(MetadataClient),
    /// Fixed token handed in at startup (development).
    Static(String),
}

impl CredentialSource {
    pub async fn access_token(&self) -> Result<String, ApiError> {
        match self {
            CredentialSource::Metadata(client) => client.access_token().await,
            CredentialSource::Static(token) => Ok(token.clone()),
        }
    }
}

/// Signs JWTs with the Google-managed key of the service's own account.
#[derive(Debug, Clone)]
pub struct ServiceAccountSigner {
    client: IamCredentialsClient,
    service_account: String,
    credentials: CredentialSource,
}

impl ServiceAccountSigner {
    pub fn new(
        client: IamCredentialsClient,
        service_account: impl Into<String>,
        credentials: CredentialSource,
    ) -> Result<Self> {
        let service_account = service_account.into();
        if service_account.trim().is_empty() {
            return Err(anyhow!("Service account must not be empty"));
        }
        Ok(Self {
            client,
            service_account,
            credentials,
        })
    }

    pub fn service_account(&self) -> &str {
        &self.service_account
    }
}

#[async_trait]
impl Signer for ServiceAccountSigner {
    async fn sign_jwt(&self, payload: &serde_json::Value) -> Result<String, ApiError> {
        let bearer = self.credentials.access_token().await?;
        self.client
            .sign_jwt(&self.service_account, &bearer, payload)
            .await
    }

    fn jwks_url(&self) -> String {
        format!(
            "https://www.googleapis.com/service_accounts/v1/metadata/jwk/{}",
            self.service_account
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SA: &str = "token-service@project-1.iam.gserviceaccount.com";

    #[tokio::test]
    async fn test_sign_jwt() {
        let server = MockServer::start().await;
        let payload = serde_json::json!({"iss": "https://issuer.example.com", "iat": 1});

        Mock::given(method("POST"))
            .and(path(format!("/v1/projects/-/serviceAccounts/{}:signJwt", SA)))
            .and(header("authorization", "Bearer own-token"))
            .and(body_json(serde_json::json!({"payload": payload.to_string()})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keyId": "key-1",
                "signedJwt": "header.payload.signature"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let signer = ServiceAccountSigner::new(
            IamCredentialsClient::new(server.uri()).unwrap(),
            SA,
            CredentialSource::Static("own-token".to_string()),
        )
        .unwrap();

        let jwt = signer.sign_jwt(&payload).await.unwrap();
        assert_eq!(jwt, "header.payload.signature");
        assert_eq!(
            signer.jwks_url(),
            format!("https://www.googleapis.com/service_accounts/v1/metadata/jwk/{}", SA)
        );
        assert_eq!(signer.signing_algorithm(), "RS256");
    }

    #[tokio::test]
    async fn test_sign_jwt_access_denied() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/v1/projects/-/serviceAccounts/{}:signJwt", SA)))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "Permission 'iam.serviceAccounts.signJwt' denied", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let client = IamCredentialsClient::new(server.uri()).unwrap();
        let err = client
            .sign_jwt(SA, "own-token", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_generate_access_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/v1/projects/-/serviceAccounts/{}:generateAccessToken", SA)))
            .and(header("authorization", "Bearer sts-token"))
            .and(body_json(serde_json::json!({"scope": ["scope-1"], "lifetime": "300s"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "sa-token",
                "expireTime": "2030-01-01T00:05:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = IamCredentialsClient::new(server.uri()).unwrap();
        let token = client
            .generate_access_token(SA, "sts-token", &["scope-1".to_string()], Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(token.access_token, "sa-token");
        assert_eq!(token.expire_time.to_rfc3339(), "2030-01-01T00:05:00+00:00");
    }

    #[tokio::test]
    async fn test_generate_access_token_unauthenticated() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/v1/projects/-/serviceAccounts/{}:generateAccessToken", SA)))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"code": 401, "message": "Request had invalid authentication credentials."}
            })))
            .mount(&server)
            .await;

        let client = IamCredentialsClient::new(server.uri()).unwrap();
        let err = client
            .generate_access_token(SA, "expired", &["scope-1".to_string()], Duration::minutes(5))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::NotAuthenticated(_)));
    }

    #[tokio::test]
    async fn test_malformed_service_account_is_never_sent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = IamCredentialsClient::new(server.uri()).unwrap();
        for service_account in [
            "../../other/serviceAccounts/victim:signBlob?",
            "sa@project.iam.gserviceaccount.com/keys",
            "sa%40project",
            "",
        ] {
            let err = client
                .generate_access_token(
                    service_account,
                    "sts-token",
                    &["scope-1".to_string()],
                    Duration::minutes(5),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)), "{}", service_account);

            let err = client
                .sign_jwt(service_account, "own-token", &serde_json::json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)), "{}", service_account);
        }
    }

    #[test]
    fn test_service_account_ids() {
        assert!(is_service_account_id(SA));
        assert!(is_service_account_id("123456789012345678901"));
        assert!(!is_service_account_id("sa@project?x=1"));
        assert!(!is_service_account_id("sa:signBlob"));
    }

    #[tokio::test]
    async fn test_metadata_client() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/email"))
            .and(header("metadata-flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}\n", SA)))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
            .and(header("metadata-flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "metadata-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let client = MetadataClient::new(server.uri()).unwrap();
        assert_eq!(client.service_account_email().await.unwrap(), SA);

        let credentials = CredentialSource::Metadata(client);
        assert_eq!(credentials.access_token().await.unwrap(), "metadata-token");
    }

    #[test]
    fn test_empty_service_account_rejected() {
        let result = ServiceAccountSigner::new(
            IamCredentialsClient::new(DEFAULT_IAM_CREDENTIALS_URL).unwrap(),
            " ",
            CredentialSource::Static("token".to_string()),
        );
        assert!(result.is_err());
    }
}
