//! Zentinel Token Service
//!
//! Issues short-lived OIDC ID tokens, and optionally Google Cloud access
//! tokens, to workloads that authenticate with mutual TLS. Certificates are
//! verified by a TLS-terminating load balancer; signing, token exchange and
//! impersonation are delegated to Google Cloud APIs.

mod mtls;
mod oauth;
mod platform;
mod web;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use mtls::{xlb_mtls_flow, MtlsHeaderConfig, XlbHeaderExtractor};
use oauth::{
    CertificateClientPolicy, FlowRegistry, IdTokenIssuer, IssuerConfig, PoolConfig,
    WorkloadIdentityPool, DEFAULT_TOKEN_VALIDITY_MINS,
};
use platform::iam::{DEFAULT_IAM_CREDENTIALS_URL, DEFAULT_METADATA_URL};
use platform::sts::DEFAULT_STS_URL;
use platform::{
    CredentialSource, IamCredentialsClient, LocalKeySigner, MetadataClient, ServiceAccountSigner,
    Signer, StsClient,
};
use web::{create_router, AppState};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-token-service")]
#[command(about = "OIDC token service for mTLS-authenticated workloads")]
struct Args {
    /// Socket address to listen on (defaults to 0.0.0.0:$PORT, or port 8080)
    #[arg(long, env = "LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Enabled authentication flows (comma-separated)
    #[arg(long, env = "AUTH_FLOWS", default_value = "")]
    auth_flows: String,

    /// Public issuer URL of this service
    #[arg(long, env = "TOKEN_ISSUER")]
    token_issuer: String,

    /// ID token validity in minutes
    #[arg(long = "token-validity-mins", env = "TOKEN_VALIDITY", default_value_t = DEFAULT_TOKEN_VALIDITY_MINS)]
    token_validity_mins: i64,

    /// Project number of the workload identity pool
    #[arg(long, env = "WORKLOAD_IDENTITY_PROJECT_NUMBER")]
    workload_identity_project_number: Option<String>,

    /// Workload identity pool ID
    #[arg(long, env = "WORKLOAD_IDENTITY_POOL_ID")]
    workload_identity_pool_id: Option<String>,

    /// Workload identity pool provider ID
    #[arg(long, env = "WORKLOAD_IDENTITY_PROVIDER_ID")]
    workload_identity_provider_id: Option<String>,

    // Misspelled names used by earlier deployments.
    #[arg(long = "legacy-workload-idenity-project-number", env = "WORKLOAD_IDENITY_PROJECT_NUMBER", hide = true)]
    legacy_workload_identity_project_number: Option<String>,

    #[arg(long = "legacy-workload-idenity-pool-id", env = "WORKLOAD_IDENITY_POOL_ID", hide = true)]
    legacy_workload_identity_pool_id: Option<String>,

    #[arg(long = "legacy-workload-idenity-provider-id", env = "WORKLOAD_IDENITY_PROVIDER_ID", hide = true)]
    legacy_workload_identity_provider_id: Option<String>,

    /// Service account used to sign ID tokens (defaults to the attached service account)
    #[arg(long, env = "SERVICE_ACCOUNT")]
    service_account: Option<String>,

    /// Static access token for IAM calls (defaults to the metadata server)
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Sign ID tokens with a local key instead of a service account
    #[arg(long, env = "SIGNING_KEY_PATH")]
    signing_key_path: Option<PathBuf>,

    /// Algorithm of the local signing key
    #[arg(long, env = "SIGNING_ALGORITHM", default_value = "RS256")]
    signing_algorithm: String,

    /// JWKS URL published for the local signing key
    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    /// Key ID (`kid`) of the local signing key
    #[arg(long, env = "SIGNING_KEY_ID")]
    signing_key_id: Option<String>,

    /// Security Token Service base URL
    #[arg(long, env = "STS_URL", default_value = DEFAULT_STS_URL)]
    sts_url: String,

    /// IAM Credentials API base URL
    #[arg(long, env = "IAM_CREDENTIALS_URL", default_value = DEFAULT_IAM_CREDENTIALS_URL)]
    iam_credentials_url: String,

    /// Metadata server base URL
    #[arg(long, env = "METADATA_URL", default_value = DEFAULT_METADATA_URL)]
    metadata_url: String,

    /// Header that carries the client ID
    #[arg(long, env = "MTLS_HEADER_CLIENT_ID", default_value = mtls::config::DEFAULT_CERT_SPIFFE_ID_HEADER)]
    mtls_header_client_id: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_PRESENT", default_value = mtls::config::DEFAULT_CERT_PRESENT_HEADER)]
    mtls_header_cert_present: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_CHAIN_VERIFIED", default_value = mtls::config::DEFAULT_CERT_CHAIN_VERIFIED_HEADER)]
    mtls_header_cert_chain_verified: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_ERROR", default_value = mtls::config::DEFAULT_CERT_ERROR_HEADER)]
    mtls_header_cert_error: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_SPIFFE_ID", default_value = mtls::config::DEFAULT_CERT_SPIFFE_ID_HEADER)]
    mtls_header_cert_spiffe_id: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_DNSNAME_SANS", default_value = mtls::config::DEFAULT_CERT_DNS_SANS_HEADER)]
    mtls_header_cert_dns_sans: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_URI_SANS", default_value = mtls::config::DEFAULT_CERT_URI_SANS_HEADER)]
    mtls_header_cert_uri_sans: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_SHA256_FINGERPRINT", default_value = mtls::config::DEFAULT_CERT_HASH_HEADER)]
    mtls_header_cert_hash: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_SERIAL_NUMBER", default_value = mtls::config::DEFAULT_CERT_SERIAL_NUMBER_HEADER)]
    mtls_header_cert_serial_number: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_VALID_NOT_BEFORE", default_value = mtls::config::DEFAULT_CERT_NOT_BEFORE_HEADER)]
    mtls_header_cert_not_before: String,

    #[arg(long, env = "MTLS_HEADER_CLIENT_CERT_VALID_NOT_AFTER", default_value = mtls::config::DEFAULT_CERT_NOT_AFTER_HEADER)]
    mtls_header_cert_not_after: String,

    /// Enable verbose logging
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

/// How ID tokens get signed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SigningConfig {
    /// Google-managed key of a service account.
    ServiceAccount {
        service_account: Option<String>,
        access_token: Option<String>,
    },
    /// Local key file, for development.
    LocalKey {
        path: PathBuf,
        algorithm: String,
        jwks_url: String,
        key_id: Option<String>,
    },
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
struct RuntimeConfig {
    listen: SocketAddr,
    enabled_flows: HashSet<String>,
    issuer: IssuerConfig,
    pool: PoolConfig,
    mtls_headers: MtlsHeaderConfig,
    signing: SigningConfig,
    sts_url: String,
    iam_credentials_url: String,
    metadata_url: String,
}

impl RuntimeConfig {
    fn from_args(args: &Args, port: Option<&str>) -> Result<Self> {
        let listen = match (args.listen, port) {
            (Some(listen), _) => listen,
            (None, Some(port)) => {
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("Invalid PORT: '{}'", port))?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
            (None, None) => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let token_lifetime = chrono::Duration::try_minutes(args.token_validity_mins)
            .ok_or_else(|| anyhow!("Token validity out of range: {}", args.token_validity_mins))?;
        let issuer = IssuerConfig::new(args.token_issuer.trim(), token_lifetime);
        issuer.validate().map_err(|e| anyhow!(e))?;

        let pool = PoolConfig {
            project_number: setting(
                &args.workload_identity_project_number,
                &args.legacy_workload_identity_project_number,
                "WORKLOAD_IDENTITY_PROJECT_NUMBER",
            )?,
            pool_id: setting(
                &args.workload_identity_pool_id,
                &args.legacy_workload_identity_pool_id,
                "WORKLOAD_IDENTITY_POOL_ID",
            )?,
            provider_id: setting(
                &args.workload_identity_provider_id,
                &args.legacy_workload_identity_provider_id,
                "WORKLOAD_IDENTITY_PROVIDER_ID",
            )?,
        };
        pool.validate().map_err(|e| anyhow!(e))?;

        let mtls_headers = MtlsHeaderConfig {
            client_id_header: args.mtls_header_client_id.clone(),
            cert_present_header: args.mtls_header_cert_present.clone(),
            cert_chain_verified_header: args.mtls_header_cert_chain_verified.clone(),
            cert_error_header: args.mtls_header_cert_error.clone(),
            cert_spiffe_id_header: args.mtls_header_cert_spiffe_id.clone(),
            cert_dns_sans_header: args.mtls_header_cert_dns_sans.clone(),
            cert_uri_sans_header: args.mtls_header_cert_uri_sans.clone(),
            cert_hash_header: args.mtls_header_cert_hash.clone(),
            cert_serial_number_header: args.mtls_header_cert_serial_number.clone(),
            cert_not_before_header: args.mtls_header_cert_not_before.clone(),
            cert_not_after_header: args.mtls_header_cert_not_after.clone(),
        };
        mtls_headers.validate().map_err(|e| anyhow!(e))?;

        let signing = match &args.signing_key_path {
            Some(path) => SigningConfig::LocalKey {
                path: path.clone(),
                algorithm: args.signing_algorithm.to_uppercase(),
                jwks_url: args
                    .jwks_url
                    .clone()
                    .ok_or_else(|| anyhow!("--jwks-url is required with --signing-key-path"))?,
                key_id: non_empty(args.signing_key_id.as_deref()),
            },
            None => SigningConfig::ServiceAccount {
                service_account: non_empty(args.service_account.as_deref()),
                access_token: non_empty(args.access_token.as_deref()),
            },
        };

        Ok(Self {
            listen,
            enabled_flows: parse_flow_list(&args.auth_flows),
            issuer,
            pool,
            mtls_headers,
            signing,
            sts_url: args.sts_url.clone(),
            iam_credentials_url: args.iam_credentials_url.clone(),
            metadata_url: args.metadata_url.clone(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Value of a required setting, falling back to its legacy name.
fn setting(value: &Option<String>, legacy: &Option<String>, name: &str) -> Result<String> {
    non_empty(value.as_deref())
        .or_else(|| non_empty(legacy.as_deref()))
        .ok_or_else(|| anyhow!("{} is required", name))
}

/// Parse a comma-separated list of flow names.
fn parse_flow_list(flows: &str) -> HashSet<String> {
    flows
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

async fn create_signer(config: &RuntimeConfig) -> Result<Arc<dyn Signer>> {
    match &config.signing {
        SigningConfig::LocalKey {
            path,
            algorithm,
            jwks_url,
            key_id,
        } => {
            warn!(path = ?path, algorithm = %algorithm, "Signing ID tokens with a local key");
            let signer = LocalKeySigner::from_file(path, algorithm, jwks_url.clone())?;
            match key_id {
                Some(key_id) => Ok(Arc::new(signer.with_key_id(key_id.clone()))),
                None => Ok(Arc::new(signer)),
            }
        }
        SigningConfig::ServiceAccount {
            service_account,
            access_token,
        } => {
            let metadata = MetadataClient::new(config.metadata_url.clone())?;

            let service_account = match service_account {
                Some(service_account) => service_account.clone(),
                None => metadata
                    .service_account_email()
                    .await
                    .context("Failed to look up the attached service account, set SERVICE_ACCOUNT")?,
            };

            let credentials = match access_token {
                Some(token) => CredentialSource::Static(token.clone()),
                None => CredentialSource::Metadata(metadata),
            };

            let signer = ServiceAccountSigner::new(
                IamCredentialsClient::new(config.iam_credentials_url.clone())?,
                service_account,
                credentials,
            )?;
            info!(service_account = %signer.service_account(), "Signing ID tokens with service account");
            Ok(Arc::new(signer))
        }
    }
}

async fn build_state(config: &RuntimeConfig) -> Result<AppState> {
    let signer = create_signer(config).await?;
    let issuer = Arc::new(IdTokenIssuer::new(
        &config.issuer,
        config.pool.expected_token_audience(),
        signer,
    )?);
    info!(
        issuer = %issuer.id(),
        audience = %issuer.audience(),
        jwks_url = %issuer.jwks_url(),
        "ID token issuer ready"
    );

    let pool = Arc::new(WorkloadIdentityPool::new(
        config.pool.clone(),
        Arc::new(StsClient::new(config.sts_url.clone())?),
    ));
    let impersonation = Arc::new(IamCredentialsClient::new(config.iam_credentials_url.clone())?);

    let mut registry = FlowRegistry::new();
    registry.register(Arc::new(xlb_mtls_flow(
        XlbHeaderExtractor::new(config.mtls_headers.clone()),
        Arc::new(CertificateClientPolicy),
        issuer.clone(),
        pool,
        impersonation,
    )));

    let known: HashSet<&str> = registry.names().into_iter().collect();
    for name in &config.enabled_flows {
        if !known.contains(name.as_str()) {
            warn!(flow = %name, available = ?known, "Ignoring unknown authentication flow");
        }
    }

    Ok(AppState {
        registry: Arc::new(registry),
        enabled_flows: Arc::new(config.enabled_flows.clone()),
        issuer,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},tower_http={}",
            env!("CARGO_CRATE_NAME"),
            log_level,
            log_level
        ))
        .json()
        .init();

    info!("Starting Zentinel Token Service");

    // Build configuration
    let port = std::env::var("PORT").ok();
    let config = RuntimeConfig::from_args(&args, port.as_deref())?;

    info!(
        issuer = %config.issuer.issuer_url,
        token_validity_mins = config.issuer.token_lifetime.num_minutes(),
        audience = %config.pool.audience(),
        enabled_flows = ?config.enabled_flows,
        "Configuration loaded"
    );

    let state = build_state(&config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(addr = %config.listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
