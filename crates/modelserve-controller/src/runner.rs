//! Controller runner: wires the ServeRequest reconciler into a kube Controller

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::{self, Action, Config as ControllerConfig};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error};

use modelserve_common::crd::ServeRequest;
use modelserve_common::{Error, OperatorConfig, APP_LABEL_KEY, APP_LABEL_VALUE};

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ReconcileResult =
    Result<(ObjectRef<ServeRequest>, Action), controller::Error<Error, watcher::Error>>;

/// Selector matching every child the controller creates
pub fn owned_selector() -> String {
    format!("{APP_LABEL_KEY}={APP_LABEL_VALUE}")
}

/// Watch ServeRequests cluster-wide and reconcile until shutdown.
///
/// Changes to labeled children re-enqueue their parent.
pub async fn run_controller(client: Client, config: Arc<OperatorConfig>) {
    let concurrency = config.concurrency;
    let ctx = Arc::new(Context::from_client(client.clone(), config));

    let requests: Api<ServeRequest> = Api::all(client.clone());
    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let selector = owned_selector();
    let owned = || watcher().labels(&selector);

    tracing::info!(concurrency, selector = %selector, "starting ServeRequest controller");

    Controller::new(requests, watcher())
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .owns(Api::<Ingress>::all(client.clone()), owned())
        .owns(Api::<ConfigMap>::all(client), owned())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result)
        .await;

    tracing::info!("ServeRequest controller stopped");
}

/// Failures are already logged with their backoff by [`error_policy`]
fn log_reconcile_result(result: ReconcileResult) -> std::future::Ready<()> {
    match result {
        Ok((request, action)) => debug!(
            request = %request.name,
            namespace = request.namespace.as_deref().unwrap_or_default(),
            ?action,
            "ServeRequest reconciled"
        ),
        Err(controller::Error::ReconcilerFailed(err, request)) => debug!(
            request = %request.name,
            namespace = request.namespace.as_deref().unwrap_or_default(),
            retryable = err.is_retryable(),
            rejected = err.is_rejection(),
            "ServeRequest reconcile failed"
        ),
        Err(controller::Error::ObjectNotFound(request)) => debug!(
            request = %request.name,
            "ServeRequest deleted before it was reconciled"
        ),
        Err(e) => error!(error = %e, "ServeRequest controller error"),
    }
    std::future::ready(())
}
