//! ServeRequest CRD types
//!
//! A `ServeRequest` declares one inference workload: which model artifact to
//! fetch from the object store, which runtime image serves it, and how much
//! capacity to give it. The controller derives a Deployment, Service, Ingress
//! and strip-prefix ConfigMap from it and reports progress in `status`.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::SpecDefaults;

/// Replica count used when the spec leaves `replicas` unset
pub const DEFAULT_REPLICAS: i32 = 1;
/// Upper bound on `replicas`
pub const MAX_REPLICAS: i32 = 5;
/// Memory limit (MiB) used when the spec leaves `memoryLimitMB` unset
pub const DEFAULT_MEMORY_LIMIT_MB: i32 = 4096;
/// Upper bound on `memoryLimitMB`
pub const MAX_MEMORY_LIMIT_MB: i32 = 32768;
/// CPU limit (millicores) used when the spec leaves `cpuLimitMillicores` unset
pub const DEFAULT_CPU_LIMIT_MILLICORES: i32 = 2000;
/// Upper bound on `cpuLimitMillicores`
pub const MAX_CPU_LIMIT_MILLICORES: i32 = 16000;

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a ServeRequest
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServePhase {
    /// Accepted, no workload yet or workload not reporting ready replicas
    #[default]
    Pending,
    /// Workload created; its init container is fetching the model artifact
    Downloading,
    /// Workload reports at least one available replica
    Running,
    /// A child creation was rejected by the API server
    Failed,
}

impl std::fmt::Display for ServePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Running => write!(f, "Running"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Spec
// =============================================================================

/// Specification for a ServeRequest
///
/// Empty strings and zero values mean "unset"; the admission webhook fills them
/// via [`ServeRequestSpec::apply_defaults`] before the object is persisted.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "modelserve.dev",
    version = "v1alpha1",
    kind = "ServeRequest",
    plural = "serverequests",
    shortname = "sr",
    namespaced,
    status = "ServeRequestStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServeRequestSpec {
    /// Logical artifact name; the runtime loads `/models/<modelName>`
    #[serde(default)]
    pub model_name: String,

    /// Catalog identifier of the artifact
    #[serde(default)]
    pub model_uuid: String,

    /// Object path of the artifact inside the bucket
    #[serde(default)]
    pub source_path: String,

    /// Object store endpoint (`host:port`)
    #[serde(default)]
    pub source_endpoint: String,

    /// Object store bucket
    #[serde(default)]
    pub source_bucket: String,

    /// Inference runtime image
    #[serde(default)]
    pub image: String,

    /// Desired replica count
    #[serde(default)]
    pub replicas: i32,

    /// Extra runtime arguments, split on whitespace
    #[serde(default)]
    pub runtime_params: String,

    /// Memory limit in MiB
    #[serde(default, rename = "memoryLimitMB")]
    pub memory_limit_mb: i32,

    /// CPU limit in millicores
    #[serde(default)]
    pub cpu_limit_millicores: i32,
}

impl ServeRequestSpec {
    /// Fill every unset optional field from the built-in constants and `defaults`.
    ///
    /// Idempotent: applying it to an already defaulted spec changes nothing.
    pub fn apply_defaults(&mut self, defaults: &SpecDefaults) {
        if self.replicas == 0 {
            self.replicas = DEFAULT_REPLICAS;
        }
        if self.memory_limit_mb == 0 {
            self.memory_limit_mb = DEFAULT_MEMORY_LIMIT_MB;
        }
        if self.cpu_limit_millicores == 0 {
            self.cpu_limit_millicores = DEFAULT_CPU_LIMIT_MILLICORES;
        }
        fill_if_empty(&mut self.source_endpoint, &defaults.source_endpoint);
        fill_if_empty(&mut self.source_bucket, &defaults.source_bucket);
        fill_if_empty(&mut self.image, &defaults.image);
    }

    /// Return a defaulted copy of this spec
    pub fn with_defaults(&self, defaults: &SpecDefaults) -> Self {
        let mut spec = self.clone();
        spec.apply_defaults(defaults);
        spec
    }

    /// Runtime parameters split on whitespace, without shell interpretation
    pub fn runtime_param_tokens(&self) -> Vec<String> {
        self.runtime_params
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

fn fill_if_empty(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of a ServeRequest, written only by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServeRequestStatus {
    /// Current lifecycle phase; absent until the first reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ServePhase>,

    /// Available replicas last observed on the workload
    #[serde(default)]
    pub available_replicas: i32,

    /// Name of the Service fronting the workload
    #[serde(default)]
    pub service_name: String,

    /// Name of a running runtime pod
    #[serde(default)]
    pub pod_name: String,

    /// Externally reachable URL through the gateway
    #[serde(default)]
    pub gateway_url: String,

    /// First transition into Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Human-readable explanation of the current phase
    #[serde(default)]
    pub message: String,
}

impl ServeRequestStatus {
    /// Status with only `phase` and `message` set
    pub fn with_phase(phase: ServePhase, message: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Phase or the default (`Pending`) when unset
    pub fn phase_or_default(&self) -> ServePhase {
        self.phase.unwrap_or_default()
    }
}
