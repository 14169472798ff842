//! Ordered ensure-exists steps for a ServeRequest's children
//!
//! Each step looks its child up by name and creates it when absent. Existing
//! children are never compared or patched. The reconciler runs the steps in
//! [`PIPELINE`] order and stops at the first one that is not `Done`.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, warn};

use modelserve_common::crd::{ServePhase, ServeRequest, ServeRequestStatus};
use modelserve_common::events::LifecycleEvent;
use modelserve_common::Error;

use crate::children::{ChildIdentity, ChildSet};
use crate::client::CreateOutcome;
use crate::controller::Context;
use crate::status::MSG_DOWNLOADING;

/// Delay before re-checking a freshly created workload
pub const WORKLOAD_CREATED_REQUEUE: Duration = Duration::from_secs(5);

/// One ensure-exists step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Runtime Deployment
    Workload,
    /// Service
    Endpoint,
    /// Strip-prefix ConfigMap, then Ingress
    Route,
}

/// Steps in execution order
pub const PIPELINE: [Step; 3] = [Step::Workload, Step::Endpoint, Step::Route];

/// Result of running one step
#[derive(Debug)]
pub enum StepOutcome {
    /// Child exists; continue with the next step
    Done,
    /// Child was just created; re-run the reconcile after the delay
    Requeue(Duration),
    /// Creation was refused; status already records the failure
    Fatal(Error),
}

/// State threaded through one pipeline run
pub struct Pipeline<'a> {
    ctx: &'a Context,
    identity: &'a ChildIdentity,
    children: &'a ChildSet,
    /// Latest persisted version of the parent
    pub current: ServeRequest,
    /// Workload as observed by the workload step
    pub observed_workload: Option<Deployment>,
}

impl<'a> Pipeline<'a> {
    /// Start a run for `current`
    pub fn new(
        ctx: &'a Context,
        identity: &'a ChildIdentity,
        children: &'a ChildSet,
        current: ServeRequest,
    ) -> Self {
        Self {
            ctx,
            identity,
            children,
            current,
            observed_workload: None,
        }
    }

    /// Run a single step.
    ///
    /// `Err` is a transient failure that leaves status untouched.
    pub async fn run(&mut self, step: Step) -> Result<StepOutcome, Error> {
        match step {
            Step::Workload => self.ensure_workload().await,
            Step::Endpoint => self.ensure_endpoint().await,
            Step::Route => self.ensure_route().await,
        }
    }

    async fn ensure_workload(&mut self) -> Result<StepOutcome, Error> {
        let (ctx, children, identity) = (self.ctx, self.children, self.identity);
        let (name, namespace) = (&identity.name, &identity.namespace);

        if let Some(existing) = ctx.kube.get_deployment(name, namespace).await? {
            debug!(request = %name, "workload exists");
            self.observed_workload = Some(existing);
            return Ok(StepOutcome::Done);
        }

        self.write_phase(ServePhase::Downloading, MSG_DOWNLOADING.to_string())
            .await?;

        match ctx.kube.create_deployment(&children.workload).await {
            Ok(CreateOutcome::Created) => {
                info!(request = %name, "created workload");
                self.publish(LifecycleEvent::WorkloadCreated).await;
                Ok(StepOutcome::Requeue(WORKLOAD_CREATED_REQUEUE))
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!(request = %name, "workload created concurrently");
                Ok(StepOutcome::Requeue(WORKLOAD_CREATED_REQUEUE))
            }
            Err(e) if e.is_rejection() => {
                let message = format!("Failed to create workload: {e}");
                warn!(request = %name, error = %e, "workload rejected");
                if let Err(write_err) = self.write_phase(ServePhase::Failed, message.clone()).await {
                    warn!(request = %name, error = %write_err, "failed to record workload failure");
                }
                self.publish(LifecycleEvent::WorkloadFailed { message })
                    .await;
                Ok(StepOutcome::Fatal(e))
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_endpoint(&mut self) -> Result<StepOutcome, Error> {
        let (ctx, children, identity) = (self.ctx, self.children, self.identity);
        let (name, namespace) = (&identity.name, &identity.namespace);
        if ctx.kube.get_service(name, namespace).await?.is_some() {
            return Ok(StepOutcome::Done);
        }
        if ctx.kube.create_service(&children.endpoint).await? == CreateOutcome::Created {
            info!(request = %name, "created service");
            self.publish(LifecycleEvent::EndpointCreated).await;
        }
        Ok(StepOutcome::Done)
    }

    async fn ensure_route(&mut self) -> Result<StepOutcome, Error> {
        let (ctx, children, identity) = (self.ctx, self.children, self.identity);
        let (name, namespace) = (&identity.name, &identity.namespace);

        if ctx.kube.get_config_map(name, namespace).await?.is_none() {
            ctx.kube.create_config_map(&children.strip_prefix).await?;
        }

        if ctx.kube.get_ingress(name, namespace).await?.is_some() {
            return Ok(StepOutcome::Done);
        }
        if ctx.kube.create_ingress(&children.route).await? == CreateOutcome::Created {
            info!(request = %name, "created route");
            self.publish(LifecycleEvent::RouteCreated).await;
        }
        Ok(StepOutcome::Done)
    }

    async fn write_phase(&mut self, phase: ServePhase, message: String) -> Result<(), Error> {
        let mut status = self.current.status.clone().unwrap_or_default();
        status.phase = Some(phase);
        status.message = message;
        self.write_status(status).await
    }

    /// Persist `status` unless it equals what is stored
    pub async fn write_status(&mut self, status: ServeRequestStatus) -> Result<(), Error> {
        if self.current.status.as_ref() == Some(&status) {
            return Ok(());
        }
        self.current = self
            .ctx
            .kube
            .patch_serve_request_status(&self.current, &status)
            .await?;
        Ok(())
    }

    /// Record `event` on the parent
    pub async fn publish(&self, event: LifecycleEvent) {
        self.ctx.events.publish(&self.current, event).await;
    }
}
