//! Status derivation from observed children
//!
//! Pure: given the previous status and what the cluster reports, compute the
//! next status. The reconciler persists the result only when it differs.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;

use modelserve_common::crd::{ServePhase, ServeRequestStatus};

/// Message written with the initial Pending phase
pub const MSG_INITIALIZING: &str = "Initializing model server";
/// Message written when the workload is created
pub const MSG_DOWNLOADING: &str = "Downloading model from object store";
/// Message written on the first Running transition
pub const MSG_RUNNING: &str = "Model server is running";
/// Message written while no replica is available
pub const MSG_WAITING: &str = "Waiting for pod to be ready";

/// What the reconciler observed during one pass
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Available replicas reported by the workload
    pub available_replicas: i32,
    /// Name of the Service fronting the workload
    pub service_name: String,
    /// Gateway URL for the ServeRequest
    pub gateway_url: String,
    /// Observation time
    pub now: DateTime<Utc>,
}

/// Available replicas reported by a Deployment's status
pub fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Compute the next status.
///
/// - At least one available replica moves the phase to Running; `startedAt`
///   is stamped on the first such transition and never rewritten.
/// - Otherwise the phase falls back to Pending, except that an in-progress
///   download or a recorded failure is left as is.
pub fn next_status(previous: &ServeRequestStatus, observed: &Observation) -> ServeRequestStatus {
    let mut next = previous.clone();
    next.available_replicas = observed.available_replicas;
    next.service_name = observed.service_name.clone();
    next.gateway_url = observed.gateway_url.clone();

    if observed.available_replicas > 0 {
        if next.phase != Some(ServePhase::Running) {
            next.phase = Some(ServePhase::Running);
            next.message = MSG_RUNNING.to_string();
            if next.started_at.is_none() {
                next.started_at = Some(observed.now);
            }
        }
    } else if !matches!(
        next.phase,
        Some(ServePhase::Downloading) | Some(ServePhase::Failed)
    ) {
        next.phase = Some(ServePhase::Pending);
        next.message = MSG_WAITING.to_string();
    }

    next
}

/// True when `next` enters Running relative to `previous`
pub fn entered_running(previous: &ServeRequestStatus, next: &ServeRequestStatus) -> bool {
    previous.phase != Some(ServePhase::Running) && next.phase == Some(ServePhase::Running)
}
