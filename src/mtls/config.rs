//! mTLS header configuration.

/// Names of the headers a TLS-terminating load balancer uses to forward
/// client certificate information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtlsHeaderConfig {
    /// Header that carries the OAuth client ID. Must be one of the
    /// SPIFFE, DNS SAN, URI SAN or hash headers.
    pub client_id_header: String,
    pub cert_present_header: String,
    pub cert_chain_verified_header: String,
    pub cert_error_header: String,
    pub cert_spiffe_id_header: String,
    pub cert_dns_sans_header: String,
    pub cert_uri_sans_header: String,
    pub cert_hash_header: String,
    pub cert_serial_number_header: String,
    pub cert_not_before_header: String,
    pub cert_not_after_header: String,
}

pub const DEFAULT_CERT_PRESENT_HEADER: &str = "X-Client-Cert-Present";
pub const DEFAULT_CERT_CHAIN_VERIFIED_HEADER: &str = "X-Client-Cert-Chain-Verified";
pub const DEFAULT_CERT_ERROR_HEADER: &str = "X-Client-Cert-Error";
pub const DEFAULT_CERT_SPIFFE_ID_HEADER: &str = "X-Client-Cert-Spiffe";
pub const DEFAULT_CERT_DNS_SANS_HEADER: &str = "X-Client-Cert-DNSName-SANs";
pub const DEFAULT_CERT_URI_SANS_HEADER: &str = "X-Client-Cert-URI-SANs";
pub const DEFAULT_CERT_HASH_HEADER: &str = "X-Client-Cert-Hash";
pub const DEFAULT_CERT_SERIAL_NUMBER_HEADER: &str = "X-Client-Cert-Serial-Number";
pub const DEFAULT_CERT_NOT_BEFORE_HEADER: &str = "X-Client-Cert-Valid-Not-Before";
pub const DEFAULT_CERT_NOT_AFTER_HEADER: &str = "X-Client-Cert-Valid-Not-After";

impl Default for MtlsHeaderConfig {
    fn default() -> Self {
        Self {
            client_id_header: DEFAULT_CERT_SPIFFE_ID_HEADER.to_string(),
            cert_present_header: DEFAULT_CERT_PRESENT_HEADER.to_string(),
            cert_chain_verified_header: DEFAULT_CERT_CHAIN_VERIFIED_HEADER.to_string(),
            cert_error_header: DEFAULT_CERT_ERROR_HEADER.to_string(),
            cert_spiffe_id_header: DEFAULT_CERT_SPIFFE_ID_HEADER.to_string(),
            cert_dns_sans_header: DEFAULT_CERT_DNS_SANS_HEADER.to_string(),
            cert_uri_sans_header: DEFAULT_CERT_URI_SANS_HEADER.to_string(),
            cert_hash_header: DEFAULT_CERT_HASH_HEADER.to_string(),
            cert_serial_number_header: DEFAULT_CERT_SERIAL_NUMBER_HEADER.to_string(),
            cert_not_before_header: DEFAULT_CERT_NOT_BEFORE_HEADER.to_string(),
            cert_not_after_header: DEFAULT_CERT_NOT_AFTER_HEADER.to_string(),
        }
    }
}

impl MtlsHeaderConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        for header in self.all_cert_headers() {
            if axum::http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(format!("Invalid mTLS header name: '{}'", header));
            }
        }

        let identity_headers = [
            &self.cert_spiffe_id_header,
            &self.cert_dns_sans_header,
            &self.cert_uri_sans_header,
            &self.cert_hash_header,
        ];
        if !identity_headers
            .iter()
            .any(|header| header.eq_ignore_ascii_case(&self.client_id_header))
        {
            return Err(format!(
                "Client ID header '{}' must be one of the SPIFFE, DNS SAN, URI SAN or hash headers",
                self.client_id_header
            ));
        }

        Ok(())
    }

    /// All certificate headers, in a stable order.
    pub fn all_cert_headers(&self) -> [&str; 10] {
        [
            self.cert_present_header.as_str(),
            self.cert_chain_verified_header.as_str(),
            self.cert_error_header.as_str(),
            self.cert_spiffe_id_header.as_str(),
            self.cert_dns_sans_header.as_str(),
            self.cert_uri_sans_header.as_str(),
            self.cert_hash_header.as_str(),
            self.cert_serial_number_header.as_str(),
            self.cert_not_before_header.as_str(),
            self.cert_not_after_header.as_str(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MtlsHeaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_id_header, "X-Client-Cert-Spiffe");
        assert_eq!(config.all_cert_headers().len(), 10);
    }

    #[test]
    fn test_client_id_header_must_be_identity_header() {
        let mut config = MtlsHeaderConfig::default();

        config.client_id_header = "x-client-cert-hash".to_string();
        assert!(config.validate().is_ok());

        config.client_id_header = DEFAULT_CERT_SERIAL_NUMBER_HEADER.to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_header_name() {
        let config = MtlsHeaderConfig {
            cert_error_header: "X Client Error".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
