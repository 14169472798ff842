//! Command-line interface
//!
//! Every operator setting is a flag with an environment fallback. The parsed
//! arguments are folded into one [`OperatorConfig`] before anything starts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use modelserve_admission::ServerConfig;
use modelserve_common::config::{
    DEFAULT_CREDENTIALS_SECRET, DEFAULT_LOADER_IMAGE, DEFAULT_MONITOR_SCRIPT_CONFIG_MAP,
    DEFAULT_RUNTIME_IMAGE, DEFAULT_SIDECAR_IMAGE, DEFAULT_SOURCE_BUCKET, DEFAULT_SOURCE_ENDPOINT,
    DEFAULT_TELEMETRY_CONFIG_MAP,
};
use modelserve_common::{GatewayConfig, OperatorConfig, RuntimeConfig, SigningSecret, SpecDefaults};

/// modelserve - Kubernetes operator serving ML models from ServeRequest resources
#[derive(Parser, Debug)]
#[command(name = "modelserve", version, about, long_about = None)]
pub struct Cli {
    /// OTLP gRPC endpoint for trace export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    /// Log human-readable text instead of JSON
    #[arg(long, env = "MODELSERVE_LOG_TEXT", global = true)]
    pub log_text: bool,

    /// Mode to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Operator subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ServeRequest controller
    ///
    /// Installs the CRD on startup, then watches ServeRequests cluster-wide
    /// and reconciles each into a Deployment, Service and Ingress.
    Controller(ConfigArgs),

    /// Serve the mutating and validating admission webhooks over TLS
    Webhook(WebhookArgs),

    /// Print the ServeRequest CRD manifest and exit
    Crd,

    /// Print the webhook registrations for this deployment and exit
    WebhookConfig(WebhookConfigArgs),
}

/// Settings shared by the controller and the webhook
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Default object store endpoint for model artifacts
    #[arg(long, env = "MODELSERVE_SOURCE_ENDPOINT", default_value = DEFAULT_SOURCE_ENDPOINT)]
    pub source_endpoint: String,

    /// Default object store bucket for model artifacts
    #[arg(long, env = "MODELSERVE_SOURCE_BUCKET", default_value = DEFAULT_SOURCE_BUCKET)]
    pub source_bucket: String,

    /// Default inference runtime image
    #[arg(long, env = "MODELSERVE_RUNTIME_IMAGE", default_value = DEFAULT_RUNTIME_IMAGE)]
    pub runtime_image: String,

    /// Image of the artifact download init container
    #[arg(long, env = "MODELSERVE_LOADER_IMAGE", default_value = DEFAULT_LOADER_IMAGE)]
    pub loader_image: String,

    /// Image of the telemetry sidecar
    #[arg(long, env = "MODELSERVE_SIDECAR_IMAGE", default_value = DEFAULT_SIDECAR_IMAGE)]
    pub sidecar_image: String,

    /// Secret holding object store credentials
    #[arg(long, env = "MODELSERVE_CREDENTIALS_SECRET", default_value = DEFAULT_CREDENTIALS_SECRET)]
    pub credentials_secret: String,

    /// ConfigMap holding the telemetry store connection string
    #[arg(long, env = "MODELSERVE_TELEMETRY_CONFIG_MAP", default_value = DEFAULT_TELEMETRY_CONFIG_MAP)]
    pub telemetry_config_map: String,

    /// ConfigMap holding the telemetry sidecar script
    #[arg(
        long,
        env = "MODELSERVE_MONITOR_SCRIPT_CONFIG_MAP",
        default_value = DEFAULT_MONITOR_SCRIPT_CONFIG_MAP
    )]
    pub monitor_script_config_map: String,

    /// Scheme of gateway URLs reported in status
    #[arg(long, env = "MODELSERVE_GATEWAY_SCHEME", default_value = "http")]
    pub gateway_scheme: String,

    /// Public host of the gateway
    #[arg(long, env = "MODELSERVE_GATEWAY_HOST", default_value = "localhost")]
    pub gateway_host: String,

    /// Ingress class of the gateway controller
    #[arg(long, env = "MODELSERVE_INGRESS_CLASS", default_value = "traefik")]
    pub ingress_class: String,

    /// Auth middleware chained ahead of prefix stripping (empty disables it)
    #[arg(long, env = "MODELSERVE_AUTH_MIDDLEWARE", default_value = "jwt-auth")]
    pub auth_middleware: String,

    /// Shared HMAC secret for admission tokens
    #[arg(long, env = "TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,

    /// Upper bound on one reconcile, in seconds
    #[arg(long, env = "MODELSERVE_RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout_secs: u64,

    /// ServeRequests reconciled in parallel
    #[arg(long, env = "MODELSERVE_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,
}

impl ConfigArgs {
    /// Fold the arguments into the operator configuration
    pub fn to_config(&self) -> OperatorConfig {
        let auth_middleware = Some(self.auth_middleware.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let token_secret = self
            .token_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(SigningSecret::new)
            .unwrap_or_default();

        OperatorConfig {
            defaults: SpecDefaults {
                source_endpoint: self.source_endpoint.clone(),
                source_bucket: self.source_bucket.clone(),
                image: self.runtime_image.clone(),
            },
            runtime: RuntimeConfig {
                loader_image: self.loader_image.clone(),
                sidecar_image: self.sidecar_image.clone(),
                credentials_secret: self.credentials_secret.clone(),
                telemetry_config_map: self.telemetry_config_map.clone(),
                monitor_script_config_map: self.monitor_script_config_map.clone(),
                ..Default::default()
            },
            gateway: GatewayConfig {
                scheme: self.gateway_scheme.clone(),
                host: self.gateway_host.clone(),
                ingress_class: self.ingress_class.clone(),
                auth_middleware,
            },
            token_secret,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            concurrency: self.concurrency.max(1),
        }
    }
}

/// Webhook server settings
#[derive(Args, Debug, Clone)]
pub struct WebhookArgs {
    /// Defaulting and token settings
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Address to listen on
    #[arg(long, env = "MODELSERVE_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub addr: SocketAddr,

    /// PEM certificate chain
    #[arg(long, env = "MODELSERVE_TLS_CERT", default_value = "/etc/webhook/certs/tls.crt")]
    pub tls_cert: PathBuf,

    /// PEM private key
    #[arg(long, env = "MODELSERVE_TLS_KEY", default_value = "/etc/webhook/certs/tls.key")]
    pub tls_key: PathBuf,
}

impl WebhookArgs {
    /// Listener settings for the admission server
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            cert_path: self.tls_cert.clone(),
            key_path: self.tls_key.clone(),
        }
    }
}

/// Where the API server reaches the webhook
#[derive(Args, Debug, Clone)]
pub struct WebhookConfigArgs {
    /// Service fronting the webhook server
    #[arg(long, default_value = "modelserve-webhook")]
    pub service: String,

    /// Namespace of that Service
    #[arg(long, default_value = "modelserve-system")]
    pub namespace: String,

    /// Service port
    #[arg(long, default_value_t = 443)]
    pub port: i32,

    /// PEM CA bundle the API server uses to verify the webhook
    #[arg(long)]
    pub ca_bundle: Option<PathBuf>,
}
