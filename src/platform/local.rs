//! Local key signer for development and tests.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::path::Path;

use super::error::ApiError;
use super::Signer;

/// Signs JWTs with a key read from disk instead of a service account.
pub struct LocalKeySigner {
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    key_id: Option<String>,
    jwks_url: String,
}

impl LocalKeySigner {
    /// Load the key at `path` for `algorithm` (e.g. "RS256").
    pub fn from_file(path: &Path, algorithm: &str, jwks_url: impl Into<String>) -> Result<Self> {
        let key_data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read signing key: {:?}", path))?;
        Self::from_key_data(&key_data, algorithm, jwks_url)
    }

    pub fn from_key_data(
        key_data: &str,
        algorithm: &str,
        jwks_url: impl Into<String>,
    ) -> Result<Self> {
        let algorithm: Algorithm = algorithm
            .trim()
            .parse()
            .map_err(|_| anyhow!("Unknown signing algorithm: {}", algorithm))?;
        let encoding_key = KeyFamily::of(algorithm)?.load(key_data.trim())?;

        Ok(Self {
            encoding_key,
            algorithm,
            key_id: None,
            jwks_url: jwks_url.into(),
        })
    }

    /// Set the `kid` header of signed tokens.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    async fn sign_jwt(&self, payload: &serde_json::Value) -> Result<String, ApiError> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();
        Ok(encode(&header, payload, &self.encoding_key)?)
    }

    fn jwks_url(&self) -> String {
        self.jwks_url.clone()
    }

    fn signing_algorithm(&self) -> String {
        format!("{:?}", self.algorithm)
    }
}

/// Kind of key material an algorithm signs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    Ec,
    SharedSecret,
}

impl KeyFamily {
    fn of(algorithm: Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Ok(KeyFamily::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Ok(KeyFamily::Ec),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(KeyFamily::SharedSecret),
            other => Err(anyhow!("Signing with {:?} is not supported", other)),
        }
    }

    fn load(self, key_data: &str) -> Result<EncodingKey> {
        match self {
            KeyFamily::Rsa => EncodingKey::from_rsa_pem(key_data.as_bytes())
                .context("Signing key is not a PEM encoded RSA private key"),
            KeyFamily::Ec => EncodingKey::from_ec_pem(key_data.as_bytes())
                .context("Signing key is not a PEM encoded EC private key"),
            KeyFamily::SharedSecret => {
                // Secret files may hold either base64 or the raw secret.
                let secret = STANDARD
                    .decode(key_data)
                    .unwrap_or_else(|_| key_data.as_bytes().to_vec());
                Ok(EncodingKey::from_secret(&secret))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn test_key_families() {
        assert_eq!(KeyFamily::of(Algorithm::RS256).unwrap(), KeyFamily::Rsa);
        assert_eq!(KeyFamily::of(Algorithm::PS512).unwrap(), KeyFamily::Rsa);
        assert_eq!(KeyFamily::of(Algorithm::ES256).unwrap(), KeyFamily::Ec);
        assert_eq!(KeyFamily::of(Algorithm::HS384).unwrap(), KeyFamily::SharedSecret);
        assert!(KeyFamily::of(Algorithm::EdDSA).is_err());
    }

    #[test]
    fn test_rejects_unknown_algorithm_and_non_pem_keys() {
        assert!(LocalKeySigner::from_key_data("secret", "none", "").is_err());
        assert!(LocalKeySigner::from_key_data("not-a-pem", "RS256", "").is_err());
        assert!(LocalKeySigner::from_key_data("not-a-pem", "ES256", "").is_err());
    }

    #[tokio::test]
    async fn test_base64_secret_is_decoded() {
        let signer = LocalKeySigner::from_key_data(
            &STANDARD.encode("test-secret-key-that-is-long-enough"),
            "HS512",
            "",
        )
        .unwrap();
        assert_eq!(signer.signing_algorithm(), "HS512");

        let token = signer
            .sign_jwt(&serde_json::json!({"exp": 4_102_444_800u64}))
            .await
            .unwrap();
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_aud = false;
        assert!(decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"test-secret-key-that-is-long-enough"),
            &validation,
        )
        .is_ok());
    }

    #[tokio::test]
    async fn test_sign_with_symmetric_key() {
        let signer = LocalKeySigner::from_key_data(
            "test-secret-key-that-is-long-enough",
            "HS256",
            "https://issuer.example.com/jwks",
        )
        .unwrap()
        .with_key_id("key-1");

        let payload = serde_json::json!({
            "iss": "https://issuer.example.com",
            "aud": "audience",
            "exp": 4_102_444_800u64,
        });
        let token = signer.sign_jwt(&payload).await.unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["audience"]);
        let decoded = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"test-secret-key-that-is-long-enough"),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.header.kid.as_deref(), Some("key-1"));
        assert_eq!(decoded.claims["iss"], "https://issuer.example.com");
        assert_eq!(signer.jwks_url(), "https://issuer.example.com/jwks");
    }
}
