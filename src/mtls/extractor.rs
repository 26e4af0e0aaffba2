//! Client certificate attributes forwarded by a TLS-terminating load balancer.
//!
//! The load balancer validates the certificate chain against a trusted CA
//! and forwards the result, plus selected certificate fields, as request
//! headers. Nothing here looks at the certificate itself: the headers are
//! trusted, so the service must not be reachable except through the load
//! balancer.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, FixedOffset};
use tracing::{error, info, warn};

use super::config::MtlsHeaderConfig;

/// Certificate attributes of an mTLS client.
///
/// Everything except `client_id` may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtlsClientAttributes {
    pub client_id: String,
    pub spiffe_id: Option<String>,
    pub san_dns: Option<String>,
    pub san_uri: Option<String>,
    pub sha256_fingerprint: Option<String>,
    pub serial_number: Option<String>,
    pub not_before: Option<DateTime<FixedOffset>>,
    pub not_after: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MtlsError {
    /// The request does not carry a verified client certificate.
    #[error("{0}")]
    Forbidden(String),

    #[error("The header '{header}' is malformed")]
    MalformedHeader {
        header: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Reads client certificate attributes from load balancer headers.
#[derive(Debug, Clone)]
pub struct XlbHeaderExtractor {
    config: MtlsHeaderConfig,
}

impl XlbHeaderExtractor {
    pub fn new(config: MtlsHeaderConfig) -> Self {
        Self { config }
    }

    /// Whether the load balancer reported a client certificate.
    pub fn can_authenticate(&self, headers: &HeaderMap) -> bool {
        let header = &self.config.cert_present_header;
        match header_value(headers, header) {
            None => {
                warn!(
                    header = %header,
                    "The mTLS present header is missing, verify that mTLS is enabled for the load balancer backend"
                );
                false
            }
            Some(value) if !value.eq_ignore_ascii_case("true") => {
                warn!(
                    header = %header,
                    value = %value,
                    "The request did not include a client certificate"
                );
                false
            }
            Some(_) => true,
        }
    }

    /// Attributes of a client certificate the load balancer verified.
    pub fn verified_client_attributes(&self, headers: &HeaderMap) -> Result<MtlsClientAttributes, MtlsError> {
        if !self.can_authenticate(headers) {
            return Err(MtlsError::Forbidden(
                "The request did not include a client certificate".to_string(),
            ));
        }

        let verified = header_value(headers, &self.config.cert_chain_verified_header)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));
        if !verified {
            error!(
                headers = %self.describe_headers(headers),
                error_header = ?header_value(headers, &self.config.cert_error_header),
                "The client certificate did not pass verification"
            );
            return Err(MtlsError::Forbidden(
                "The client certificate did not pass verification".to_string(),
            ));
        }

        info!(
            headers = %self.describe_headers(headers),
            "The client certificate was verified by the load balancer"
        );

        let client_id = header_value(headers, &self.config.client_id_header).ok_or_else(|| {
            MtlsError::Forbidden(format!(
                "The client presented a valid certificate, but the header '{}' does not contain a client ID",
                self.config.client_id_header
            ))
        })?;

        info!(client_id = %client_id, "Authenticated client using mTLS headers");

        Ok(MtlsClientAttributes {
            client_id,
            spiffe_id: header_value(headers, &self.config.cert_spiffe_id_header),
            san_dns: san_header(headers, &self.config.cert_dns_sans_header)?,
            san_uri: san_header(headers, &self.config.cert_uri_sans_header)?,
            sha256_fingerprint: header_value(headers, &self.config.cert_hash_header),
            serial_number: header_value(headers, &self.config.cert_serial_number_header),
            not_before: date_header(headers, &self.config.cert_not_before_header)?,
            not_after: date_header(headers, &self.config.cert_not_after_header)?,
        })
    }

    /// `name=value` pairs of every configured certificate header, for diagnostics.
    fn describe_headers(&self, headers: &HeaderMap) -> String {
        self.config
            .all_cert_headers()
            .iter()
            .map(|name| {
                format!(
                    "{}={}",
                    name.to_lowercase(),
                    header_value(headers, name).unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Non-empty header value; values that aren't visible ASCII count as absent.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Decode a base64, comma-separated SAN list and keep the first entry.
fn san_header(headers: &HeaderMap, name: &str) -> Result<Option<String>, MtlsError> {
    let Some(encoded) = header_value(headers, name) else {
        return Ok(None);
    };

    let malformed = |source: anyhow::Error| MtlsError::MalformedHeader {
        header: name.to_string(),
        source,
    };
    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| malformed(e.into()))?;
    let decoded = String::from_utf8(bytes).map_err(|e| malformed(e.into()))?;

    Ok(decoded
        .split(',')
        .next()
        .filter(|first| !first.is_empty())
        .map(str::to_string))
}

fn date_header(headers: &HeaderMap, name: &str) -> Result<Option<DateTime<FixedOffset>>, MtlsError> {
    header_value(headers, name)
        .map(|value| {
            DateTime::parse_from_rfc3339(&value).map_err(|e| MtlsError::MalformedHeader {
                header: name.to_string(),
                source: e.into(),
            })
        })
        .transpose()
}
