//! Errors raised by Google API collaborators.

use serde::Deserialize;

/// Classified failure of an external API call.
///
/// Callers switch on the variant to decide whether a retry makes sense:
/// `NotAuthenticated` and `AccessDenied` point at configuration problems,
/// `Api` and `Transport` may be transient.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was rejected as malformed (HTTP 400).
    #[error("{0}")]
    BadRequest(String),

    /// The caller's credential was missing or invalid (HTTP 401).
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// The caller is not permitted to use the resource (HTTP 403).
    #[error("{0}")]
    AccessDenied(String),

    /// Any other unsuccessful response.
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A local signing key could not produce a signature.
    #[error("Signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Google API error body: `{"error": {"code": .., "message": .., "status": ..}}`.
#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetails {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2), used by the token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Extract the human-readable message from a Google API error body.
///
/// Falls back to the raw body when it doesn't have the expected shape.
pub fn google_error_message(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) => parsed
            .error
            .message
            .or(parsed.error.status)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.trim().to_string(),
    }
}

/// Extract the message from an OAuth-shaped error body.
pub fn oauth_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<OAuthErrorBody>(body).ok().map(|e| {
        format!(
            "Token exchange failed with code {}: {}",
            e.error,
            e.error_description.unwrap_or_default()
        )
    })
}

impl ApiError {
    /// Classify an unsuccessful IAM response.
    ///
    /// `resource` names the service account so that access-denied errors say
    /// which identity was refused.
    pub fn from_iam_response(status: u16, body: &str, operation: &str, resource: &str) -> Self {
        let message = google_error_message(body);
        match status {
            400 => ApiError::BadRequest(format!("{} failed: {}", operation, message)),
            401 => ApiError::NotAuthenticated(message),
            403 => ApiError::AccessDenied(format!(
                "Access to service account '{}' was denied",
                resource
            )),
            _ => ApiError::Api { status, message },
        }
    }

    /// Classify an unsuccessful token-exchange response.
    ///
    /// The STS endpoint reports errors in OAuth format rather than the
    /// general Google API format.
    pub fn from_sts_response(status: u16, body: &str) -> Self {
        let message = oauth_error_message(body).unwrap_or_else(|| google_error_message(body));
        match status {
            400 => ApiError::BadRequest(message),
            _ => ApiError::Api { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_error_message() {
        let body = r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(google_error_message(body), "Permission denied");

        assert_eq!(google_error_message("upstream timeout\n"), "upstream timeout");
    }

    #[test]
    fn test_oauth_error_message() {
        let body = r#"{"error":"invalid_grant","error_description":"The audience is invalid"}"#;
        assert_eq!(
            oauth_error_message(body).unwrap(),
            "Token exchange failed with code invalid_grant: The audience is invalid"
        );
        assert!(oauth_error_message("not json").is_none());
    }

    #[test]
    fn test_iam_classification() {
        let body = r#"{"error":{"code":403,"message":"denied"}}"#;
        let err = ApiError::from_iam_response(403, body, "Signing JWT", "sa@example.iam.gserviceaccount.com");
        assert!(matches!(err, ApiError::AccessDenied(_)));
        assert_eq!(
            err.to_string(),
            "Access to service account 'sa@example.iam.gserviceaccount.com' was denied"
        );

        assert!(matches!(
            ApiError::from_iam_response(401, body, "Signing JWT", "sa"),
            ApiError::NotAuthenticated(_)
        ));
        assert!(matches!(
            ApiError::from_iam_response(400, body, "Signing JWT", "sa"),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from_iam_response(503, body, "Signing JWT", "sa"),
            ApiError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn test_sts_classification() {
        let body = r#"{"error":"invalid_request","error_description":"bad scope"}"#;
        match ApiError::from_sts_response(400, body) {
            ApiError::BadRequest(message) => {
                assert_eq!(message, "Token exchange failed with code invalid_request: bad scope")
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            ApiError::from_sts_response(500, body),
            ApiError::Api { status: 500, .. }
        ));
    }
}
