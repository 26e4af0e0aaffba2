//! OAuth token issuance: flows, ID tokens and access tokens.

pub mod client_credentials;
pub mod config;
pub mod error;
pub mod flow;
pub mod issuer;
pub mod policy;
pub mod pool;
pub mod types;

pub use client_credentials::{ClientAuthenticator, ClientCredentialsFlow};
pub use config::{IssuerConfig, PoolConfig, DEFAULT_TOKEN_VALIDITY_MINS};
pub use error::AuthenticationError;
pub use flow::FlowRegistry;
pub use issuer::IdTokenIssuer;
pub use policy::{CertificateClientPolicy, ClientPolicy};
pub use pool::WorkloadIdentityPool;
pub use types::{AuthenticatedClient, Authentication, AuthenticationRequest};
