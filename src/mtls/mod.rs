//! mTLS client authentication.
//!
//! Authenticates clients by the certificate attributes a TLS-terminating
//! load balancer forwards after verifying the client's certificate chain.

pub mod config;
pub mod extractor;
pub mod flow;

pub use config::MtlsHeaderConfig;
pub use extractor::{MtlsClientAttributes, XlbHeaderExtractor};
pub use flow::xlb_mtls_flow;
