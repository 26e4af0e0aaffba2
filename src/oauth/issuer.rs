//! ID token issuer.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::config::IssuerConfig;
use super::types::{AuthenticatedClient, IdToken};
use crate::platform::Signer;

/// Claims set by the issuer; callers cannot override them.
const RESERVED_CLAIMS: [&str; 5] = ["iss", "aud", "iat", "exp", "jti"];

/// Claims for issued ID tokens.
#[derive(Debug, Serialize)]
struct IdTokenClaims {
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Issues ID tokens signed by an external [`Signer`].
pub struct IdTokenIssuer {
    issuer_id: String,
    audience: String,
    lifetime: Duration,
    signer: Arc<dyn Signer>,
}

impl IdTokenIssuer {
    pub fn new(config: &IssuerConfig, audience: impl Into<String>, signer: Arc<dyn Signer>) -> Result<Self> {
        config.validate().map_err(|e| anyhow!(e))?;

        Ok(Self {
            issuer_id: config.issuer_url.trim_end_matches('/').to_string(),
            audience: audience.into(),
            lifetime: config.token_lifetime,
            signer,
        })
    }

    /// Issuer identifier (`iss`).
    pub fn id(&self) -> &str {
        &self.issuer_id
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn jwks_url(&self) -> String {
        self.signer.jwks_url()
    }

    pub fn signing_algorithm(&self) -> String {
        self.signer.signing_algorithm()
    }

    /// Issue an ID token for `client` carrying `extra_claims`.
    ///
    /// Signer failures are returned with their [`crate::platform::ApiError`]
    /// intact so callers can downcast and classify them.
    pub async fn issue_id_token(
        &self,
        client: &AuthenticatedClient,
        mut extra_claims: serde_json::Map<String, serde_json::Value>,
    ) -> Result<IdToken> {
        let issue_time: DateTime<Utc> = Utc::now().trunc_subsecs(0);
        let expiry_time = issue_time
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| anyhow!("ID token lifetime of {} is out of range", self.lifetime))?;

        for reserved in RESERVED_CLAIMS {
            extra_claims.remove(reserved);
        }

        let claims = IdTokenClaims {
            iss: self.issuer_id.clone(),
            aud: self.audience.clone(),
            iat: issue_time.timestamp(),
            exp: expiry_time.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            extra: extra_claims,
        };
        let payload = serde_json::to_value(&claims).context("Failed to serialize ID token claims")?;

        let value = self.signer.sign_jwt(&payload).await?;

        debug!(
            client_id = %client.client_id,
            jti = %claims.jti,
            exp = claims.exp,
            "Signed ID token"
        );

        IdToken::new(value, issue_time, expiry_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ApiError, LocalKeySigner};
    use async_trait::async_trait;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use std::collections::HashMap;

    const SECRET: &str = "test-secret-key-that-is-long-enough";
    const AUDIENCE: &str = "https://iam.googleapis.com/projects/1/locations/global/workloadIdentityPools/p/providers/q";

    fn client() -> AuthenticatedClient {
        AuthenticatedClient {
            client_id: "spiffe://example.com/workload".to_string(),
            authentication_time: Utc::now(),
            additional_claims: HashMap::new(),
        }
    }

    fn issuer(signer: Arc<dyn Signer>) -> IdTokenIssuer {
        let config = IssuerConfig::new("https://issuer.example.com/", Duration::minutes(5));
        IdTokenIssuer::new(&config, AUDIENCE, signer).unwrap()
    }

    #[tokio::test]
    async fn test_issue_id_token_round_trip() {
        let signer = LocalKeySigner::from_key_data(SECRET, "HS256", "https://issuer.example.com/jwks").unwrap();
        let issuer = issuer(Arc::new(signer));

        let mut extra = serde_json::Map::new();
        extra.insert("amr".to_string(), serde_json::json!(["xlb-mtls-client-credentials"]));
        extra.insert("iss".to_string(), serde_json::json!("https://attacker.example.com"));

        let token = issuer.issue_id_token(&client(), extra).await.unwrap();
        assert_eq!(token.lifetime(), Duration::minutes(5));

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&["https://issuer.example.com"]);
        let decoded = decode::<serde_json::Value>(
            token.value(),
            &DecodingKey::from_secret(SECRET.as_bytes()),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims["iss"], "https://issuer.example.com");
        assert_eq!(decoded.claims["aud"], AUDIENCE);
        assert_eq!(decoded.claims["amr"][0], "xlb-mtls-client-credentials");
        assert_eq!(decoded.claims["iat"], token.issue_time().timestamp());
        assert_eq!(decoded.claims["exp"], token.expiry_time().timestamp());
        assert!(decoded.claims["jti"].as_str().is_some_and(|jti| !jti.is_empty()));
        assert_eq!(issuer.jwks_url(), "https://issuer.example.com/jwks");
    }

    #[tokio::test]
    async fn test_jti_is_unique() {
        let signer = LocalKeySigner::from_key_data(SECRET, "HS256", "").unwrap();
        let issuer = issuer(Arc::new(signer));

        let key = DecodingKey::from_secret(SECRET.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUDIENCE]);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let token = issuer.issue_id_token(&client(), serde_json::Map::new()).await.unwrap();
            let claims = decode::<serde_json::Value>(token.value(), &key, &validation).unwrap().claims;
            assert!(seen.insert(claims["jti"].as_str().unwrap().to_string()));
        }
    }

    struct DeniedSigner;

    #[async_trait]
    impl Signer for DeniedSigner {
        async fn sign_jwt(&self, _payload: &serde_json::Value) -> Result<String, ApiError> {
            Err(ApiError::AccessDenied("Access to service account 'sa' was denied".to_string()))
        }

        fn jwks_url(&self) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn test_signer_failure_is_downcastable() {
        let issuer = issuer(Arc::new(DeniedSigner));
        let err = issuer.issue_id_token(&client(), serde_json::Map::new()).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::AccessDenied(_))));
    }

    #[test]
    fn test_rejects_non_positive_lifetime() {
        let config = IssuerConfig::new("https://issuer.example.com", Duration::zero());
        assert!(IdTokenIssuer::new(&config, AUDIENCE, Arc::new(DeniedSigner)).is_err());
    }
}
