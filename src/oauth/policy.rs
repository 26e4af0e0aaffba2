//! Client policy: from verified certificate attributes to an authenticated client.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;

use super::types::AuthenticatedClient;
use crate::mtls::MtlsClientAttributes;

/// Decides whether a client holding verified attributes is accepted, and
/// which claims it carries.
///
/// Deployments customize this to add allow-lists or enrich claims; an
/// error rejects the client.
#[async_trait]
pub trait ClientPolicy: Send + Sync {
    async fn authenticate_client(&self, attributes: &MtlsClientAttributes) -> Result<AuthenticatedClient>;
}

/// Accepts every verified certificate and copies its attributes into claims.
#[derive(Debug, Clone, Default)]
pub struct CertificateClientPolicy;

impl CertificateClientPolicy {
    pub fn claims(attributes: &MtlsClientAttributes) -> HashMap<String, String> {
        let value = |field: &Option<String>| field.clone().unwrap_or_default();

        HashMap::from([
            ("x5_spiffe".to_string(), value(&attributes.spiffe_id)),
            ("x5_dnssan".to_string(), value(&attributes.san_dns)),
            ("x5_urisan".to_string(), value(&attributes.san_uri)),
            ("x5_sha256".to_string(), value(&attributes.sha256_fingerprint)),
            ("x5_serial".to_string(), value(&attributes.serial_number)),
        ])
    }
}

#[async_trait]
impl ClientPolicy for CertificateClientPolicy {
    async fn authenticate_client(&self, attributes: &MtlsClientAttributes) -> Result<AuthenticatedClient> {
        Ok(AuthenticatedClient {
            client_id: attributes.client_id.clone(),
            authentication_time: Utc::now(),
            additional_claims: Self::claims(attributes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_certificate_policy_claims() {
        let attributes = MtlsClientAttributes {
            client_id: "spiffe://example.com/ns/default/sa/worker".to_string(),
            spiffe_id: Some("spiffe://example.com/ns/default/sa/worker".to_string()),
            san_dns: Some("worker.example.com".to_string()),
            san_uri: None,
            sha256_fingerprint: Some("abc123".to_string()),
            serial_number: None,
            not_before: None,
            not_after: None,
        };

        let client = CertificateClientPolicy
            .authenticate_client(&attributes)
            .await
            .unwrap();

        assert_eq!(client.client_id, "spiffe://example.com/ns/default/sa/worker");
        assert_eq!(client.additional_claims.len(), 5);
        assert_eq!(client.additional_claims["x5_dnssan"], "worker.example.com");
        assert_eq!(client.additional_claims["x5_urisan"], "");
        assert_eq!(client.additional_claims["x5_sha256"], "abc123");
        assert_eq!(client.additional_claims["x5_serial"], "");
    }
}
