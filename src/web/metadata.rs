//! OIDC provider metadata ([OIDC.Discovery] section 3).

use axum::extract::State;
use axum::response::Redirect;
use axum::Json;
use serde::Serialize;

use super::server::AppState;
use crate::oauth::{FlowRegistry, IdTokenIssuer};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    pub fn new(issuer: &IdTokenIssuer, registry: &FlowRegistry) -> Self {
        let token_endpoint = format!("{}/token", issuer.id());

        Self {
            issuer: issuer.id().to_string(),
            // There is no interactive authorization endpoint.
            authorization_endpoint: token_endpoint.clone(),
            token_endpoint,
            jwks_uri: issuer.jwks_url(),
            response_types_supported: vec!["none".to_string()],
            grant_types_supported: registry.grant_types(),
            subject_types_supported: vec!["none".to_string()],
            id_token_signing_alg_values_supported: vec![issuer.signing_algorithm()],
            token_endpoint_auth_methods_supported: registry.authentication_methods(),
        }
    }
}

/// GET /.well-known/openid-configuration
pub async fn openid_configuration(State(state): State<AppState>) -> Json<ProviderMetadata> {
    Json(ProviderMetadata::new(&state.issuer, &state.registry))
}

/// GET /
pub async fn root(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&format!("{}/.well-known/openid-configuration", state.issuer.id()))
}
