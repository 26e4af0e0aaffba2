//! Client credentials flow for clients authenticated by mTLS (RFC 8705).

use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::sync::Arc;

use super::extractor::{MtlsClientAttributes, MtlsError, XlbHeaderExtractor};
use crate::oauth::{
    AuthenticatedClient, AuthenticationRequest, ClientAuthenticator, ClientCredentialsFlow,
    ClientPolicy, IdTokenIssuer, WorkloadIdentityPool,
};
use crate::platform::Impersonation;

/// Name of the flow for certificates verified by an external load balancer.
pub const XLB_MTLS_FLOW_NAME: &str = "xlb-mtls-client-credentials";

/// Token endpoint authentication method for PKI mutual TLS.
pub const TLS_CLIENT_AUTH: &str = "tls_client_auth";

/// Somewhere verified client certificate attributes come from.
pub trait VerifiedAttributeSource: Send + Sync {
    fn name(&self) -> &str;

    fn can_authenticate(&self, headers: &HeaderMap) -> bool;

    fn verified_client_attributes(&self, headers: &HeaderMap) -> Result<MtlsClientAttributes, MtlsError>;
}

impl VerifiedAttributeSource for XlbHeaderExtractor {
    fn name(&self) -> &str {
        XLB_MTLS_FLOW_NAME
    }

    fn can_authenticate(&self, headers: &HeaderMap) -> bool {
        XlbHeaderExtractor::can_authenticate(self, headers)
    }

    fn verified_client_attributes(&self, headers: &HeaderMap) -> Result<MtlsClientAttributes, MtlsError> {
        XlbHeaderExtractor::verified_client_attributes(self, headers)
    }
}

/// Authenticates clients by their verified certificate attributes.
pub struct MtlsClientAuthenticator<S> {
    source: S,
    policy: Arc<dyn ClientPolicy>,
}

impl<S: VerifiedAttributeSource> MtlsClientAuthenticator<S> {
    pub fn new(source: S, policy: Arc<dyn ClientPolicy>) -> Self {
        Self { source, policy }
    }
}

#[async_trait]
impl<S: VerifiedAttributeSource> ClientAuthenticator for MtlsClientAuthenticator<S> {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn authentication_method(&self) -> &str {
        TLS_CLIENT_AUTH
    }

    fn can_authenticate(&self, request: &AuthenticationRequest) -> bool {
        self.source.can_authenticate(request.headers())
    }

    async fn authenticate_client(&self, request: &AuthenticationRequest) -> Result<AuthenticatedClient> {
        let attributes = self.source.verified_client_attributes(request.headers())?;
        self.policy.authenticate_client(&attributes).await
    }
}

/// Client credentials flow for certificates verified by a Google Cloud
/// external load balancer.
pub fn xlb_mtls_flow(
    extractor: XlbHeaderExtractor,
    policy: Arc<dyn ClientPolicy>,
    issuer: Arc<IdTokenIssuer>,
    pool: Arc<WorkloadIdentityPool>,
    impersonation: Arc<dyn Impersonation>,
) -> ClientCredentialsFlow<MtlsClientAuthenticator<XlbHeaderExtractor>> {
    ClientCredentialsFlow::new(
        MtlsClientAuthenticator::new(extractor, policy),
        issuer,
        pool,
        impersonation,
    )
}
