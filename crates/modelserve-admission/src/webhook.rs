//! Admission webhook server for ServeRequests
//!
//! - `POST /mutate-serverequest` fills unset optional spec fields via JSON patch
//! - `POST /validate-serverequest` accepts or denies creates, updates and deletes
//! - `GET /healthz` liveness probe
//!
//! Handlers never read or write the API server; they only answer the review.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::Utc;
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::DynamicObject;
use kube::core::admission::{self, AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use modelserve_common::crd::{ServeRequest, ServeRequestSpec};
use modelserve_common::{OperatorConfig, SpecDefaults};

use crate::validate::{Operation, Validator};

/// Path of the defaulting hook
pub const MUTATE_PATH: &str = "/mutate-serverequest";
/// Path of the validating hook
pub const VALIDATE_PATH: &str = "/validate-serverequest";

/// Error type for running the webhook server
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Certificate or key could not be loaded
    #[error("failed to load TLS material from {cert} / {key}: {source}")]
    Tls {
        /// Certificate path
        cert: String,
        /// Private key path
        key: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The listener failed
    #[error("webhook server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Listener settings for the webhook server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Shared state for webhook handlers
#[derive(Debug)]
pub struct WebhookState {
    /// Validator holding the token secret
    pub validator: Validator,
    /// Defaults applied by the mutating hook
    pub defaults: SpecDefaults,
}

impl WebhookState {
    /// Build handler state from operator config
    pub fn new(config: &OperatorConfig) -> Self {
        Self {
            validator: Validator::new(&config.token_secret),
            defaults: config.defaults.clone(),
        }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate_handler))
        .route(VALIDATE_PATH, post(validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhook over TLS until the listener fails
pub async fn serve(server: ServerConfig, state: Arc<WebhookState>) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem_file(&server.cert_path, &server.key_path)
        .await
        .map_err(|source| WebhookError::Tls {
            cert: server.cert_path.display().to_string(),
            key: server.key_path.display().to_string(),
            source,
        })?;

    info!(addr = %server.addr, "admission webhook listening");
    axum_server::bind_rustls(server.addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(WebhookError::Serve)
}

/// Handle the defaulting hook
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutate(&state.defaults, &req).into_review())
}

/// Handle the validating hook
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate(&state.validator, &req).into_review())
}

fn mutate(defaults: &SpecDefaults, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    let Some(obj) = req.object.clone() else {
        return response;
    };
    let request: ServeRequest = match obj.try_parse() {
        Ok(r) => r,
        Err(e) => return response.deny(format!("malformed ServeRequest: {e}")),
    };

    let defaulted = request.spec.with_defaults(defaults);
    let ops = default_patch(&request.spec, &defaulted);
    if ops.is_empty() {
        return response;
    }

    debug!(uid = %req.uid, name = %req.name, patch_ops = ops.len(), "defaulting ServeRequest");
    match response.with_patch(json_patch::Patch(ops)) {
        Ok(patched) => patched,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "failed to serialize patch");
            AdmissionResponse::from(req).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// JSON patch turning `original` into `defaulted`, one `add` per changed field
fn default_patch(original: &ServeRequestSpec, defaulted: &ServeRequestSpec) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    let mut set = |field: &str, value: Value| {
        ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", field]),
            value,
        }));
    };

    if original.replicas != defaulted.replicas {
        set("replicas", defaulted.replicas.into());
    }
    if original.memory_limit_mb != defaulted.memory_limit_mb {
        set("memoryLimitMB", defaulted.memory_limit_mb.into());
    }
    if original.cpu_limit_millicores != defaulted.cpu_limit_millicores {
        set("cpuLimitMillicores", defaulted.cpu_limit_millicores.into());
    }
    if original.source_endpoint != defaulted.source_endpoint {
        set("sourceEndpoint", defaulted.source_endpoint.clone().into());
    }
    if original.source_bucket != defaulted.source_bucket {
        set("sourceBucket", defaulted.source_bucket.clone().into());
    }
    if original.image != defaulted.image {
        set("image", defaulted.image.clone().into());
    }
    ops
}

fn validate(validator: &Validator, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    let (operation, obj) = match req.operation {
        admission::Operation::Create => (Operation::Create, req.object.as_ref()),
        admission::Operation::Update => (Operation::Update, req.object.as_ref()),
        admission::Operation::Delete => (Operation::Delete, req.old_object.as_ref()),
        admission::Operation::Connect => return response,
    };
    let Some(obj) = obj.cloned() else {
        return response;
    };
    let request: ServeRequest = match obj.try_parse() {
        Ok(r) => r,
        Err(e) => return response.deny(format!("malformed ServeRequest: {e}")),
    };

    match validator.validate(operation, &request, Utc::now()) {
        Ok(()) => response,
        Err(e) => {
            warn!(uid = %req.uid, name = %req.name, ?operation, reason = %e, "denying ServeRequest");
            response.deny(e.to_string())
        }
    }
}
