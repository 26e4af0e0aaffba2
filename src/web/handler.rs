//! Token endpoint.
//!
//! Runs the selected flow and renders the outcome either as a standard OAuth
//! token response (RFC 6749) or, with `format=external_credential`, in the
//! executable-sourced credential format client libraries understand
//! (https://google.aip.dev/auth/4117).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

use super::server::AppState;
use crate::oauth::{Authentication, AuthenticationError, AuthenticationRequest};

pub const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
pub const BEARER: &str = "Bearer";

/// Token endpoint failure, classified for the client.
#[derive(Debug, thiserror::Error)]
pub enum TokenEndpointError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    InvalidClient(String),

    #[error("{0}")]
    TokenIssuance(String),

    #[error("{0}")]
    ServerError(String),
}

impl TokenEndpointError {
    pub fn status(&self) -> StatusCode {
        match self {
            TokenEndpointError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TokenEndpointError::InvalidClient(_) => StatusCode::FORBIDDEN,
            TokenEndpointError::TokenIssuance(_) => StatusCode::FORBIDDEN,
            TokenEndpointError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OAuth error code (RFC 6749 section 5.2).
    pub fn code(&self) -> &'static str {
        match self {
            TokenEndpointError::InvalidRequest(_) => "invalid_request",
            TokenEndpointError::InvalidClient(_) => "unauthorized_client",
            TokenEndpointError::TokenIssuance(_) => "access_denied",
            TokenEndpointError::ServerError(_) => "server_error",
        }
    }
}

impl From<AuthenticationError> for TokenEndpointError {
    fn from(e: AuthenticationError) -> Self {
        match e {
            AuthenticationError::InvalidClient(_) => TokenEndpointError::InvalidClient(e.to_string()),
            AuthenticationError::TokenIssuance { .. } => TokenEndpointError::TokenIssuance(e.to_string()),
        }
    }
}

/// Token response (RFC 6749 section 5.1) with an ID token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl From<&Authentication> for TokenResponse {
    fn from(authentication: &Authentication) -> Self {
        let id_token = authentication.id_token.value().to_string();
        match &authentication.access_token {
            Some(access_token) => Self {
                id_token,
                access_token: Some(access_token.value().to_string()),
                token_type: Some(BEARER.to_string()),
                expires_in: Some(access_token.lifetime().num_seconds()),
                scope: Some(access_token.scope().to_string()),
            },
            None => Self {
                id_token,
                access_token: None,
                token_type: None,
                expires_in: None,
                scope: None,
            },
        }
    }
}

/// Token error response (RFC 6749 section 5.2).
#[derive(Debug, Serialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl TokenErrorResponse {
    pub fn invalid_request(desc: &str) -> Self {
        Self {
            error: "invalid_request".to_string(),
            error_description: desc.to_string(),
        }
    }
}

impl From<&TokenEndpointError> for TokenErrorResponse {
    fn from(e: &TokenEndpointError) -> Self {
        Self {
            error: e.code().to_string(),
            error_description: e.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExternalCredentialResponse {
    pub success: bool,
    pub version: u32,
    pub id_token: String,
    pub token_type: String,
    /// ID token expiry, seconds since the Unix epoch.
    pub expiration_time: i64,
}

impl From<&Authentication> for ExternalCredentialResponse {
    fn from(authentication: &Authentication) -> Self {
        Self {
            success: true,
            version: 1,
            id_token: authentication.id_token.value().to_string(),
            token_type: ID_TOKEN_TYPE.to_string(),
            expiration_time: authentication.id_token.expiry_time().timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExternalCredentialErrorResponse {
    pub success: bool,
    pub version: u32,
    pub code: String,
    pub message: String,
}

impl From<&TokenEndpointError> for ExternalCredentialErrorResponse {
    fn from(e: &TokenEndpointError) -> Self {
        Self {
            success: false,
            version: 1,
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Response envelope requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    OAuth,
    ExternalCredential,
}

impl ResponseFormat {
    fn of(request: &AuthenticationRequest) -> Self {
        match request.parameter("format") {
            Some("external_credential") => ResponseFormat::ExternalCredential,
            _ => ResponseFormat::OAuth,
        }
    }

    fn render(self, result: Result<Authentication, TokenEndpointError>) -> Response {
        match (self, result) {
            (ResponseFormat::OAuth, Ok(authentication)) => {
                Json(TokenResponse::from(&authentication)).into_response()
            }
            (ResponseFormat::OAuth, Err(e)) => {
                (e.status(), Json(TokenErrorResponse::from(&e))).into_response()
            }
            (ResponseFormat::ExternalCredential, Ok(authentication)) => {
                Json(ExternalCredentialResponse::from(&authentication)).into_response()
            }
            (ResponseFormat::ExternalCredential, Err(e)) => {
                (e.status(), Json(ExternalCredentialErrorResponse::from(&e))).into_response()
            }
        }
    }
}

/// Parse a form-encoded body into ordered name/value pairs.
pub fn parse_form(body: &[u8]) -> Result<Vec<(String, String)>, TokenEndpointError> {
    serde_urlencoded::from_bytes(body)
        .map_err(|e| TokenEndpointError::InvalidRequest(format!("Malformed request body: {}", e)))
}

/// POST /token
pub async fn token(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let parameters = match parse_form(&body) {
        Ok(parameters) => parameters,
        Err(e) => {
            warn!(error = %e, "Rejected malformed token request");
            return ResponseFormat::OAuth.render(Err(e));
        }
    };

    let request = AuthenticationRequest::new(parameters, headers);
    let format = ResponseFormat::of(&request);
    format.render(handle_token_request(&state, &request).await)
}

/// Select and run the flow for `request`.
pub async fn handle_token_request(
    state: &AppState,
    request: &AuthenticationRequest,
) -> Result<Authentication, TokenEndpointError> {
    let grant_type = request.grant_type();
    if grant_type.is_empty() {
        return Err(TokenEndpointError::InvalidRequest(
            "A grant type is required".to_string(),
        ));
    }

    let Some(flow) = state.registry.select(request, &state.enabled_flows) else {
        warn!(
            grant_type = %grant_type,
            enabled_flows = ?state.enabled_flows,
            "No suitable flow found for grant type"
        );
        return Err(TokenEndpointError::InvalidRequest(format!(
            "No suitable flow found for grant type '{}'",
            grant_type
        )));
    };

    debug!(flow = %flow.name(), grant_type = %grant_type, "Running authentication flow");

    match AssertUnwindSafe(flow.authenticate(request)).catch_unwind().await {
        Ok(Ok(authentication)) => Ok(authentication),
        Ok(Err(e)) => {
            error!(
                flow = %flow.name(),
                error = %full_message(&e),
                "Authentication failed"
            );
            Err(e.into())
        }
        Err(panic) => {
            error!(
                flow = %flow.name(),
                panic = %panic_message(panic.as_ref()),
                "Authentication flow panicked"
            );
            Err(TokenEndpointError::ServerError(
                "The request could not be processed".to_string(),
            ))
        }
    }
}

/// Error message followed by the messages of all its causes.
fn full_message(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::{AccessToken, IdToken, StsAccessToken};
    use crate::oauth::AuthenticatedClient;
    use anyhow::anyhow;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn authentication(access_token: Option<AccessToken>) -> Authentication {
        let issued = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        Authentication {
            client: AuthenticatedClient {
                client_id: "client-1".to_string(),
                authentication_time: issued,
                additional_claims: HashMap::new(),
            },
            id_token: IdToken::new("id-token", issued, issued + Duration::minutes(5)).unwrap(),
            access_token,
        }
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (TokenEndpointError::InvalidRequest("x".into()), 400, "invalid_request"),
            (TokenEndpointError::InvalidClient("x".into()), 403, "unauthorized_client"),
            (TokenEndpointError::TokenIssuance("x".into()), 403, "access_denied"),
            (TokenEndpointError::ServerError("x".into()), 500, "server_error"),
        ];
        for (error, status, code) in cases {
            assert_eq!(error.status().as_u16(), status);
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn test_authentication_error_surfaces_top_level_message() {
        let e: TokenEndpointError = AuthenticationError::token_issuance(
            "Issuing ID token for client 'client-1' failed",
            anyhow!("signer unavailable"),
        )
        .into();
        assert!(matches!(e, TokenEndpointError::TokenIssuance(_)));
        assert_eq!(e.to_string(), "Issuing ID token for client 'client-1' failed");

        let e: TokenEndpointError = AuthenticationError::invalid_client(anyhow!("no certificate")).into();
        assert!(matches!(e, TokenEndpointError::InvalidClient(_)));
        assert_eq!(e.to_string(), "The client or its credentials are invalid");
    }

    #[test]
    fn test_full_message_includes_causes() {
        let e = AuthenticationError::token_issuance("outer", anyhow!("inner"));
        assert_eq!(full_message(&e), "outer: inner");
    }

    #[test]
    fn test_token_response_without_access_token() {
        let json = serde_json::to_value(TokenResponse::from(&authentication(None))).unwrap();
        assert_eq!(json, serde_json::json!({"id_token": "id-token"}));
    }

    #[test]
    fn test_token_response_with_access_token() {
        let issued = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let access_token = AccessToken::Sts(StsAccessToken {
            value: "sts-token".to_string(),
            scope: "scope-1".to_string(),
            issue_time: issued,
            expiry_time: issued + Duration::seconds(60),
        });

        let json = serde_json::to_value(TokenResponse::from(&authentication(Some(access_token)))).unwrap();
        assert_eq!(json["access_token"], "sts-token");
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["expires_in"], 60);
        assert_eq!(json["scope"], "scope-1");
    }

    #[test]
    fn test_external_credential_response() {
        let json = serde_json::to_value(ExternalCredentialResponse::from(&authentication(None))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "version": 1,
                "id_token": "id-token",
                "token_type": "urn:ietf:params:oauth:token-type:id_token",
                "expiration_time": 1_893_456_300i64
            })
        );
    }

    #[test]
    fn test_expiration_time_is_absolute_expiry() {
        let authentication = authentication(None);
        let response = ExternalCredentialResponse::from(&authentication);

        assert_eq!(response.expiration_time, authentication.id_token.expiry_time().timestamp());
        assert_ne!(response.expiration_time, authentication.id_token.lifetime().num_seconds());
    }

    #[test]
    fn test_parse_form_keeps_order_and_duplicates() {
        let pairs = parse_form(b"grant_type=client_credentials&scope=a+b&scope=c%2Fd").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("scope".to_string(), "a b".to_string()),
                ("scope".to_string(), "c/d".to_string()),
            ]
        );
    }
}
