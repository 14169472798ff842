//! Operator configuration
//!
//! A single [`OperatorConfig`] is assembled once at startup (from CLI flags and
//! their environment fallbacks) and shared behind an `Arc` by the admission
//! webhook and the controller. Nothing else in the operator reads the process
//! environment.

use std::fmt;
use std::time::Duration;

/// Default object store endpoint for artifacts
pub const DEFAULT_SOURCE_ENDPOINT: &str = "minio:9000";
/// Default object store bucket for artifacts
pub const DEFAULT_SOURCE_BUCKET: &str = "inference-models";
/// Reference inference runtime image
pub const DEFAULT_RUNTIME_IMAGE: &str = "ghcr.io/ggerganov/llama.cpp:server";
/// Object store client image used by the artifact download init container
pub const DEFAULT_LOADER_IMAGE: &str = "minio/mc:latest";
/// Image running the telemetry sidecar
pub const DEFAULT_SIDECAR_IMAGE: &str = "python:3.9-slim";
/// Secret holding object store credentials
pub const DEFAULT_CREDENTIALS_SECRET: &str = "inference-secrets";
/// ConfigMap holding the telemetry store connection string
pub const DEFAULT_TELEMETRY_CONFIG_MAP: &str = "inference-config";
/// ConfigMap holding the telemetry sidecar script
pub const DEFAULT_MONITOR_SCRIPT_CONFIG_MAP: &str = "monitor-script";
/// Secret used when no token secret is configured. Never acceptable in production.
pub const INSECURE_DEFAULT_TOKEN_SECRET: &str = "modelserve-insecure-default-secret";

/// Values substituted for unset optional ServeRequest fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecDefaults {
    /// Object store endpoint
    pub source_endpoint: String,
    /// Object store bucket
    pub source_bucket: String,
    /// Inference runtime image
    pub image: String,
}

impl Default for SpecDefaults {
    fn default() -> Self {
        Self {
            source_endpoint: DEFAULT_SOURCE_ENDPOINT.to_string(),
            source_bucket: DEFAULT_SOURCE_BUCKET.to_string(),
            image: DEFAULT_RUNTIME_IMAGE.to_string(),
        }
    }
}

/// Fixed wiring of the runtime pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Image of the artifact download init container
    pub loader_image: String,
    /// Image of the telemetry sidecar
    pub sidecar_image: String,
    /// Secret with `MINIO_ACCESS_KEY` / `MINIO_SECRET_KEY`
    pub credentials_secret: String,
    /// ConfigMap with the `DATABASE_URL` key for the sidecar
    pub telemetry_config_map: String,
    /// ConfigMap mounted as the sidecar's script directory
    pub monitor_script_config_map: String,
    /// Port the inference runtime listens on
    pub port: i32,
    /// HTTP health path polled by readiness and liveness probes
    pub health_path: String,
    /// Size limit of the shared model volume
    pub model_volume_size: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loader_image: DEFAULT_LOADER_IMAGE.to_string(),
            sidecar_image: DEFAULT_SIDECAR_IMAGE.to_string(),
            credentials_secret: DEFAULT_CREDENTIALS_SECRET.to_string(),
            telemetry_config_map: DEFAULT_TELEMETRY_CONFIG_MAP.to_string(),
            monitor_script_config_map: DEFAULT_MONITOR_SCRIPT_CONFIG_MAP.to_string(),
            port: 8080,
            health_path: "/health".to_string(),
            model_volume_size: "10Gi".to_string(),
        }
    }
}

/// How ServeRequests are exposed through the cluster gateway
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// `http` or `https`
    pub scheme: String,
    /// Public host of the gateway
    pub host: String,
    /// Ingress class of the gateway controller
    pub ingress_class: String,
    /// Authentication middleware chained ahead of prefix stripping, if any
    pub auth_middleware: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            ingress_class: "traefik".to_string(),
            auth_middleware: Some("jwt-auth".to_string()),
        }
    }
}

impl GatewayConfig {
    /// URL under which the ServeRequest `name` is reachable
    pub fn url_for(&self, name: &str) -> String {
        format!("{}://{}/{}/", self.scheme, self.host, name)
    }
}

/// Shared HMAC secret for admission tokens. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    /// Wrap raw secret bytes
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// Raw secret bytes
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// True when the built-in insecure secret is in use
    pub fn is_insecure_default(&self) -> bool {
        self.0 == INSECURE_DEFAULT_TOKEN_SECRET.as_bytes()
    }
}

impl Default for SigningSecret {
    fn default() -> Self {
        Self::new(INSECURE_DEFAULT_TOKEN_SECRET)
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Immutable operator-wide configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Defaults applied to ServeRequest specs
    pub defaults: SpecDefaults,
    /// Runtime pod wiring
    pub runtime: RuntimeConfig,
    /// Gateway exposure
    pub gateway: GatewayConfig,
    /// Admission token secret
    pub token_secret: SigningSecret,
    /// Upper bound on a single reconcile invocation
    pub reconcile_timeout: Duration,
    /// Maximum number of ServeRequests reconciled in parallel
    pub concurrency: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            defaults: SpecDefaults::default(),
            runtime: RuntimeConfig::default(),
            gateway: GatewayConfig::default(),
            token_secret: SigningSecret::default(),
            reconcile_timeout: Duration::from_secs(30),
            concurrency: 4,
        }
    }
}
