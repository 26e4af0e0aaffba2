//! Failure kinds an authentication flow may surface.

/// The two ways a flow run can fail.
///
/// Every collaborator failure is folded into one of these before it leaves
/// the flow, so the token endpoint never needs to look at adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    /// The client or its credentials were rejected.
    #[error("The client or its credentials are invalid")]
    InvalidClient(#[source] anyhow::Error),

    /// The client was accepted but a token could not be issued.
    #[error("{message}")]
    TokenIssuance {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AuthenticationError {
    pub fn invalid_client(source: impl Into<anyhow::Error>) -> Self {
        AuthenticationError::InvalidClient(source.into())
    }

    pub fn token_issuance(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        AuthenticationError::TokenIssuance {
            message: message.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_display_hides_cause() {
        let err = AuthenticationError::invalid_client(anyhow!("Missing header X-Client-Cert-Present"));
        assert_eq!(err.to_string(), "The client or its credentials are invalid");

        let err = AuthenticationError::token_issuance(
            "Issuing ID token for client 'client-1' failed",
            anyhow!("Access to service account 'sa' was denied"),
        );
        assert_eq!(err.to_string(), "Issuing ID token for client 'client-1' failed");
        assert_eq!(
            format!("{:#}", anyhow::Error::new(err)),
            "Issuing ID token for client 'client-1' failed: Access to service account 'sa' was denied"
        );
    }
}
