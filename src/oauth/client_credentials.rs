//! OAuth client credentials grant.
//!
//! A run has three steps, each feeding the next:
//!
//! 1. authenticate the client (pluggable, see [`ClientAuthenticator`]),
//! 2. issue an ID token for it,
//! 3. if the request names a `scope`, exchange the ID token for an access
//!    token, and if it also names a `service_account`, impersonate that
//!    service account with the exchanged token.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::error::AuthenticationError;
use super::flow::AuthenticationFlow;
use super::issuer::IdTokenIssuer;
use super::pool::WorkloadIdentityPool;
use super::types::{AccessToken, AuthenticatedClient, Authentication, AuthenticationRequest, IdToken};
use crate::platform::Impersonation;

pub const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";

/// Identifies and authenticates the client of a client credentials request.
#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    /// Flow name; also reported in the `amr` claim.
    fn name(&self) -> &str;

    fn authentication_method(&self) -> &str;

    fn can_authenticate(&self, _request: &AuthenticationRequest) -> bool {
        true
    }

    async fn authenticate_client(&self, request: &AuthenticationRequest) -> Result<AuthenticatedClient>;
}

/// Client credentials flow parameterized by how clients authenticate.
pub struct ClientCredentialsFlow<A> {
    authenticator: A,
    issuer: Arc<IdTokenIssuer>,
    pool: Arc<WorkloadIdentityPool>,
    impersonation: Arc<dyn Impersonation>,
}

impl<A: ClientAuthenticator> ClientCredentialsFlow<A> {
    pub fn new(
        authenticator: A,
        issuer: Arc<IdTokenIssuer>,
        pool: Arc<WorkloadIdentityPool>,
        impersonation: Arc<dyn Impersonation>,
    ) -> Self {
        Self {
            authenticator,
            issuer,
            pool,
            impersonation,
        }
    }

    async fn issue_id_token(&self, client: &AuthenticatedClient) -> Result<IdToken> {
        // No `sub`: the token identifies a client, not an end user.
        let mut claims = serde_json::Map::new();
        claims.insert(
            "amr".to_string(),
            serde_json::json!([self.authenticator.name().to_lowercase()]),
        );
        claims.insert("client_id".to_string(), serde_json::json!(client.client_id));
        claims.insert(
            "client".to_string(),
            serde_json::to_value(&client.additional_claims)?,
        );

        self.issuer.issue_id_token(client, claims).await
    }

    async fn issue_access_token(
        &self,
        request: &AuthenticationRequest,
        id_token: &IdToken,
    ) -> Result<Option<AccessToken>> {
        let Some(scope) = request.non_empty_parameter("scope") else {
            return Ok(None);
        };

        let sts_token = self.pool.issue_access_token(id_token, scope).await?;

        let Some(service_account) = request.non_empty_parameter("service_account") else {
            return Ok(Some(AccessToken::Sts(sts_token)));
        };

        // Never outlive the ID token that authorized the exchange.
        let sa_token = self
            .pool
            .impersonate_service_account(service_account, &sts_token)
            .generate_access_token(
                self.impersonation.as_ref(),
                &[scope.to_string()],
                id_token.lifetime(),
            )
            .await?;

        Ok(Some(AccessToken::ServiceAccount(sa_token)))
    }
}

#[async_trait]
impl<A: ClientAuthenticator> AuthenticationFlow for ClientCredentialsFlow<A> {
    fn name(&self) -> &str {
        self.authenticator.name()
    }

    fn grant_type(&self) -> &str {
        GRANT_TYPE_CLIENT_CREDENTIALS
    }

    fn authentication_method(&self) -> &str {
        self.authenticator.authentication_method()
    }

    fn can_authenticate(&self, request: &AuthenticationRequest) -> bool {
        self.authenticator.can_authenticate(request)
    }

    async fn authenticate(
        &self,
        request: &AuthenticationRequest,
    ) -> Result<Authentication, AuthenticationError> {
        let client = self
            .authenticator
            .authenticate_client(request)
            .await
            .map_err(AuthenticationError::invalid_client)?;

        let id_token = self.issue_id_token(&client).await.map_err(|e| {
            AuthenticationError::token_issuance(
                format!("Issuing ID token for client '{}' failed", client.client_id),
                e,
            )
        })?;

        let access_token = self
            .issue_access_token(request, &id_token)
            .await
            .map_err(|e| {
                AuthenticationError::token_issuance(
                    format!("Issuing access token for client '{}' failed", client.client_id),
                    e,
                )
            })?;

        match &access_token {
            Some(token @ AccessToken::Sts(_)) => info!(
                client_id = %client.client_id,
                scope = %token.scope(),
                token_kind = token.kind(),
                "Issued ID token and STS access token for client"
            ),
            Some(token @ AccessToken::ServiceAccount(sa_token)) => info!(
                client_id = %client.client_id,
                scope = %token.scope(),
                service_account = %sa_token.service_account,
                token_kind = token.kind(),
                "Issued ID token and service account access token for client"
            ),
            None => info!(
                client_id = %client.client_id,
                token_kind = "id_token",
                "Issued ID token for client"
            ),
        }

        Ok(Authentication {
            client,
            id_token,
            access_token,
        })
    }
}
