//! Workload identity pool: ID token to access token exchange and impersonation.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::debug;

use super::config::PoolConfig;
use super::types::{IdToken, ServiceAccountAccessToken, StsAccessToken};
use crate::platform::{Impersonation, TokenExchange};

/// A workload identity pool provider that accepts this service's ID tokens.
pub struct WorkloadIdentityPool {
    config: PoolConfig,
    exchange: Arc<dyn TokenExchange>,
}

impl WorkloadIdentityPool {
    pub fn new(config: PoolConfig, exchange: Arc<dyn TokenExchange>) -> Self {
        Self { config, exchange }
    }

    /// Exchange `id_token` for a federated access token limited to `scope`.
    pub async fn issue_access_token(&self, id_token: &IdToken, scope: &str) -> Result<StsAccessToken> {
        let issue_time = Utc::now().trunc_subsecs(0);
        let exchanged = self
            .exchange
            .exchange(id_token.value(), scope, &self.config.audience())
            .await?;

        debug!(
            scope = %scope,
            expires_in = exchanged.expires_in_secs,
            "Exchanged ID token for STS access token"
        );

        let expiry_time = Duration::try_seconds(exchanged.expires_in_secs)
            .filter(|lifetime| *lifetime >= Duration::zero())
            .and_then(|lifetime| issue_time.checked_add_signed(lifetime))
            .ok_or_else(|| {
                anyhow!(
                    "Token exchange returned an invalid expires_in of {} seconds",
                    exchanged.expires_in_secs
                )
            })?;

        Ok(StsAccessToken {
            value: exchanged.access_token,
            scope: scope.to_string(),
            issue_time,
            expiry_time,
        })
    }

    /// Bind `token` as the bearer credential for calls against `service_account`.
    pub fn impersonate_service_account(
        &self,
        service_account: &str,
        token: &StsAccessToken,
    ) -> ServiceAccountHandle {
        ServiceAccountHandle {
            service_account: service_account.to_string(),
            bearer_token: token.value.clone(),
        }
    }
}

/// A service account reachable with a federated bearer token.
#[derive(Debug, Clone)]
pub struct ServiceAccountHandle {
    service_account: String,
    bearer_token: String,
}

impl ServiceAccountHandle {
    /// Generate an access token for the service account.
    pub async fn generate_access_token(
        &self,
        impersonation: &dyn Impersonation,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<ServiceAccountAccessToken> {
        let issue_time = Utc::now().trunc_subsecs(0);
        let generated = impersonation
            .generate_access_token(&self.service_account, &self.bearer_token, scopes, lifetime)
            .await
            .with_context(|| {
                format!(
                    "Generating access token for service account '{}' failed",
                    self.service_account
                )
            })?;

        Ok(ServiceAccountAccessToken {
            service_account: self.service_account.clone(),
            value: generated.access_token,
            scope: scopes.join(" "),
            issue_time,
            expiry_time: generated.expire_time,
        })
    }
}
