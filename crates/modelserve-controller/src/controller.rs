//! ServeRequest reconciliation controller
//!
//! Every invocation re-reads the ServeRequest and re-derives all decisions:
//! - phase unset → persist `Pending`
//! - run the ensure-exists [`PIPELINE`] (workload, endpoint, route)
//! - recompute status from the observed workload and persist it if changed
//!
//! Phase transitions: `Pending` → `Downloading` (workload created) →
//! `Running` (first available replica), or `Failed` when the API server
//! refuses the workload.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use modelserve_common::crd::{ServePhase, ServeRequest, ServeRequestStatus};
use modelserve_common::events::{EventPublisher, KubeEventPublisher, LifecycleEvent};
use modelserve_common::{Error, OperatorConfig, FIELD_MANAGER};

use crate::children::{build_children, ChildIdentity};
use crate::client::{ServeKubeClient, ServeKubeClientImpl};
use crate::pipeline::{Pipeline, StepOutcome, PIPELINE};
use crate::status::{self, Observation, MSG_INITIALIZING};

/// Re-check interval for a running ServeRequest
pub const RUNNING_REQUEUE: Duration = Duration::from_secs(300);
/// Re-check interval while waiting for readiness
pub const PENDING_REQUEUE: Duration = Duration::from_secs(30);

/// First retry delay after a transient error (seconds)
pub const RETRY_BASE_DELAY_SECS: u64 = 5;
/// First retry delay after a permanent error (seconds)
pub const PERMANENT_BASE_DELAY_SECS: u64 = 30;
/// Cap on retry delay (seconds)
pub const RETRY_MAX_DELAY_SECS: u64 = 300;

/// Failure counters untouched this long belong to objects that are gone
const RETRY_STATE_TTL: Duration = Duration::from_secs(2 * RETRY_MAX_DELAY_SECS);

struct RetryState {
    attempts: u32,
    last_failure: Instant,
}

/// Shared controller context
pub struct Context {
    /// Kubernetes access
    pub kube: Arc<dyn ServeKubeClient>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Consecutive failures per object UID, reset on success
    retries: DashMap<String, RetryState>,
}

impl Context {
    /// Create a context from explicit dependencies
    pub fn new(
        kube: Arc<dyn ServeKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            kube,
            events,
            config,
            retries: DashMap::new(),
        }
    }

    /// Create a context backed by the cluster
    pub fn from_client(client: Client, config: Arc<OperatorConfig>) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER));
        Self::new(Arc::new(ServeKubeClientImpl::new(client)), events, config)
    }

    /// Consecutive failures recorded for `key`
    pub fn retry_count(&self, key: &str) -> u32 {
        self.retries.get(key).map(|s| s.attempts).unwrap_or(0)
    }

    fn record_failure(&self, key: String) -> u32 {
        let now = Instant::now();
        self.retries
            .retain(|_, s| now.duration_since(s.last_failure) < RETRY_STATE_TTL);
        let mut state = self.retries.entry(key).or_insert(RetryState {
            attempts: 0,
            last_failure: now,
        });
        state.attempts = state.attempts.saturating_add(1);
        state.last_failure = now;
        state.attempts
    }

    fn clear_failures(&self, key: &str) {
        self.retries.remove(key);
    }
}

/// A recreated object gets a fresh UID and so a fresh backoff
fn retry_key(request: &ServeRequest) -> String {
    request.uid().unwrap_or_else(|| {
        format!(
            "{}/{}",
            request.namespace().unwrap_or_default(),
            request.name_any()
        )
    })
}

/// Retry delay for the `attempt`-th consecutive failure (1-based)
pub fn backoff_delay(attempt: u32, retryable: bool) -> Duration {
    let base = if retryable {
        RETRY_BASE_DELAY_SECS
    } else {
        PERMANENT_BASE_DELAY_SECS
    };
    let exp = attempt.saturating_sub(1).min(16);
    let secs = base
        .saturating_mul(2u64.saturating_pow(exp))
        .min(RETRY_MAX_DELAY_SECS);
    Duration::from_secs(secs)
}

/// Error policy: exponential backoff per ServeRequest.
pub fn error_policy(request: Arc<ServeRequest>, error: &Error, ctx: Arc<Context>) -> Action {
    let attempt = ctx.record_failure(retry_key(&request));
    let delay = backoff_delay(attempt, error.is_retryable());
    if error.is_conflict() {
        debug!(
            request = %request.name_any(),
            attempt,
            retry_in_secs = delay.as_secs(),
            "ServeRequest changed during reconcile, will retry"
        );
    } else {
        warn!(
            request = %request.name_any(),
            error = %error,
            attempt,
            retry_in_secs = delay.as_secs(),
            "ServeRequest reconcile failed, will retry"
        );
    }
    Action::requeue(delay)
}

/// Reconcile a ServeRequest, bounded by the configured timeout.
#[instrument(skip(request, ctx), fields(request = %request.name_any()))]
pub async fn reconcile(request: Arc<ServeRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = request.name_any();
    let namespace = request.namespace().ok_or_else(|| {
        Error::validation_for_field(&name, "metadata.namespace", "ServeRequest must be namespaced")
    })?;
    let deadline = ctx.config.reconcile_timeout;

    let result = match tokio::time::timeout(deadline, reconcile_once(&name, &namespace, &ctx)).await
    {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(&name, deadline.as_secs())),
    };

    if result.is_ok() {
        ctx.clear_failures(&retry_key(&request));
    }
    result
}

async fn reconcile_once(name: &str, namespace: &str, ctx: &Context) -> Result<Action, Error> {
    let Some(mut current) = ctx.kube.get_serve_request(name, namespace).await? else {
        debug!(request = %name, "ServeRequest no longer exists");
        return Ok(Action::await_change());
    };

    if current.status.as_ref().and_then(|s| s.phase).is_none() {
        info!(request = %name, "initializing ServeRequest");
        let mut status = current.status.clone().unwrap_or_default();
        status.phase = Some(ServePhase::Pending);
        status.message = MSG_INITIALIZING.to_string();
        current = ctx.kube.patch_serve_request_status(&current, &status).await?;
    }

    let identity = ChildIdentity::from_parent(&current)?;
    let spec = current.spec.with_defaults(&ctx.config.defaults);
    let children = build_children(&identity, &spec, &ctx.config)?;

    let mut pipeline = Pipeline::new(ctx, &identity, &children, current);
    for step in PIPELINE {
        match pipeline.run(step).await? {
            StepOutcome::Done => {}
            StepOutcome::Requeue(delay) => {
                debug!(request = %name, ?step, "step not converged");
                return Ok(Action::requeue(delay));
            }
            StepOutcome::Fatal(e) => return Err(e),
        }
    }

    let previous = pipeline.current.status.clone().unwrap_or_default();
    let available = pipeline
        .observed_workload
        .as_ref()
        .map(status::available_replicas)
        .unwrap_or(0);
    let observation = Observation {
        available_replicas: available,
        service_name: identity.name.clone(),
        gateway_url: ctx.config.gateway.url_for(&identity.name),
        now: Utc::now(),
    };
    let mut next = status::next_status(&previous, &observation);

    if available > 0 {
        next.pod_name = observed_pod_name(ctx, &identity, &previous).await;
    }

    let entered_running = status::entered_running(&previous, &next);
    pipeline.write_status(next).await?;

    if entered_running {
        info!(request = %name, available, "ServeRequest running");
        pipeline
            .publish(LifecycleEvent::ModelRunning {
                gateway_url: observation.gateway_url,
            })
            .await;
    }

    let phase = pipeline
        .current
        .status
        .as_ref()
        .map(ServeRequestStatus::phase_or_default)
        .unwrap_or_default();
    Ok(match phase {
        ServePhase::Running => Action::requeue(RUNNING_REQUEUE),
        _ => Action::requeue(PENDING_REQUEUE),
    })
}

/// Running pod name; keeps the last known name when the lookup fails
async fn observed_pod_name(
    ctx: &Context,
    identity: &ChildIdentity,
    previous: &ServeRequestStatus,
) -> String {
    match ctx
        .kube
        .running_pod_name(&identity.namespace, &identity.label_selector())
        .await
    {
        Ok(Some(pod)) => pod,
        Ok(None) => previous.pod_name.clone(),
        Err(e) => {
            warn!(request = %identity.name, error = %e, "failed to look up running pod");
            previous.pod_name.clone()
        }
    }
}
