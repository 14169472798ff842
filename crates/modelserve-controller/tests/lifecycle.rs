//! ServeRequest lifecycle against an in-memory object store
//!
//! The fake store keeps objects by (namespace, name), enforces
//! resourceVersion on status writes and refuses duplicate creates, which is
//! enough to drive the reconciler through full lifecycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use kube::runtime::controller::Action;
use kube::ResourceExt;

use modelserve_common::crd::{ServePhase, ServeRequest, ServeRequestSpec, ServeRequestStatus};
use modelserve_common::events::{EventPublisher, LifecycleEvent};
use modelserve_common::{Error, OperatorConfig, APP_LABEL_KEY, OWNER_LABEL_KEY};
use modelserve_controller::{error_policy, reconcile, Context, CreateOutcome, ServeKubeClient};

const NAMESPACE: &str = "models";
const NAME: &str = "demo";

type Key = (String, String);

fn key(name: &str, namespace: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn key_of(meta: &ObjectMeta) -> Key {
    key(
        meta.name.as_deref().unwrap_or_default(),
        meta.namespace.as_deref().unwrap_or_default(),
    )
}

fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
struct Store {
    requests: HashMap<Key, ServeRequest>,
    deployments: HashMap<Key, Deployment>,
    services: HashMap<Key, Service>,
    config_maps: HashMap<Key, ConfigMap>,
    ingresses: HashMap<Key, Ingress>,
    running_pods: HashMap<Key, String>,
    creates: usize,
    status_writes: usize,
    phases: Vec<ServePhase>,
    reject_workloads: bool,
    read_delay: Option<Duration>,
}

#[derive(Default, Clone)]
struct FakeCluster {
    store: Arc<Mutex<Store>>,
}

impl FakeCluster {
    fn with(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store lock poisoned")
    }

    fn submit(&self, spec: ServeRequestSpec) {
        let mut request = ServeRequest::new(NAME, spec);
        request.metadata.namespace = Some(NAMESPACE.to_string());
        request.metadata.uid = Some("3f6b9a2e-uid".to_string());
        request.metadata.resource_version = Some("1".to_string());
        self.with().requests.insert(key(NAME, NAMESPACE), request);
    }

    fn request(&self) -> ServeRequest {
        self.with().requests[&key(NAME, NAMESPACE)].clone()
    }

    fn status(&self) -> ServeRequestStatus {
        self.request().status.unwrap_or_default()
    }

    /// Simulate the Deployment controller reporting availability
    fn set_available(&self, available: i32) {
        let mut store = self.with();
        let k = key(NAME, NAMESPACE);
        if let Some(deployment) = store.deployments.get_mut(&k) {
            deployment.status = Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            });
        }
        if available > 0 {
            store.running_pods.insert(k, format!("{NAME}-5d8f7-x2k9q"));
        } else {
            store.running_pods.remove(&k);
        }
    }

    fn creates(&self) -> usize {
        self.with().creates
    }

    fn status_writes(&self) -> usize {
        self.with().status_writes
    }

    fn phases(&self) -> Vec<ServePhase> {
        self.with().phases.clone()
    }
}

fn insert_new<K: Clone>(
    map: &mut HashMap<Key, K>,
    creates: &mut usize,
    meta: &ObjectMeta,
    obj: &K,
) -> CreateOutcome {
    let k = key_of(meta);
    if map.contains_key(&k) {
        return CreateOutcome::AlreadyExists;
    }
    map.insert(k, obj.clone());
    *creates += 1;
    CreateOutcome::Created
}

#[async_trait]
impl ServeKubeClient for FakeCluster {
    async fn get_serve_request(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServeRequest>, Error> {
        let delay = self.with().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.with().requests.get(&key(name, namespace)).cloned())
    }

    async fn patch_serve_request_status(
        &self,
        current: &ServeRequest,
        status: &ServeRequestStatus,
    ) -> Result<ServeRequest, Error> {
        let mut store = self.with();
        let k = key(&current.name_any(), &current.namespace().unwrap_or_default());
        let Some(stored) = store.requests.get_mut(&k) else {
            return Err(api_error(404, "NotFound", "serverequest not found"));
        };
        if stored.resource_version() != current.resource_version() {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }
        let next_version = stored
            .resource_version()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        stored.metadata.resource_version = Some(next_version.to_string());
        stored.status = Some(status.clone());
        let updated = stored.clone();

        store.status_writes += 1;
        if let Some(phase) = status.phase {
            if store.phases.last() != Some(&phase) {
                store.phases.push(phase);
            }
        }
        Ok(updated)
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.with().deployments.get(&key(name, namespace)).cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<CreateOutcome, Error> {
        let mut store = self.with();
        if store.reject_workloads {
            return Err(Error::rejected(
                "Deployment",
                deployment.name_any(),
                422,
                "spec.template.spec.containers[0].resources.limits: Invalid value",
            ));
        }
        let Store {
            deployments,
            creates,
            ..
        } = &mut *store;
        Ok(insert_new(deployments, creates, &deployment.metadata, deployment))
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        Ok(self.with().services.get(&key(name, namespace)).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
        let mut store = self.with();
        let Store {
            services, creates, ..
        } = &mut *store;
        Ok(insert_new(services, creates, &service.metadata, service))
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.with().config_maps.get(&key(name, namespace)).cloned())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<CreateOutcome, Error> {
        let mut store = self.with();
        let Store {
            config_maps,
            creates,
            ..
        } = &mut *store;
        Ok(insert_new(config_maps, creates, &config_map.metadata, config_map))
    }

    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Option<Ingress>, Error> {
        Ok(self.with().ingresses.get(&key(name, namespace)).cloned())
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome, Error> {
        let mut store = self.with();
        let Store {
            ingresses, creates, ..
        } = &mut *store;
        Ok(insert_new(ingresses, creates, &ingress.metadata, ingress))
    }

    async fn running_pod_name(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<String>, Error> {
        let owner = selector
            .split(',')
            .find_map(|pair| pair.strip_prefix(&format!("{OWNER_LABEL_KEY}=")))
            .unwrap_or_default()
            .to_string();
        Ok(self.with().running_pods.get(&key(&owner, namespace)).cloned())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    reasons: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    fn reasons(&self) -> Vec<String> {
        self.reasons.lock().expect("events lock poisoned").clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, _request: &ServeRequest, event: LifecycleEvent) {
        self.reasons
            .lock()
            .expect("events lock poisoned")
            .push(event.reason().to_string());
    }
}

struct Harness {
    cluster: FakeCluster,
    events: Arc<RecordingPublisher>,
    ctx: Arc<Context>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    fn with_config(config: OperatorConfig) -> Self {
        let cluster = FakeCluster::default();
        let events = Arc::new(RecordingPublisher::default());
        let ctx = Arc::new(Context::new(
            Arc::new(cluster.clone()),
            events.clone(),
            Arc::new(config),
        ));
        Self {
            cluster,
            events,
            ctx,
        }
    }

    async fn reconcile(&self) -> Result<Action, Error> {
        reconcile(Arc::new(self.cluster.request()), self.ctx.clone()).await
    }
}

fn demo_spec() -> ServeRequestSpec {
    ServeRequestSpec {
        model_name: "demo".to_string(),
        model_uuid: "u-1".to_string(),
        source_path: "models/demo.bin".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn fresh_request_reaches_running() {
    let h = Harness::new();
    h.cluster.submit(demo_spec());

    // First pass creates the workload and waits for it
    let action = h.reconcile().await.expect("first reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert_eq!(h.cluster.status().phase, Some(ServePhase::Downloading));
    assert_eq!(h.cluster.with().deployments.len(), 1);

    // Second pass fills in networking while the download runs
    let action = h.reconcile().await.expect("second reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    {
        let store = h.cluster.with();
        assert_eq!(store.services.len(), 1);
        assert_eq!(store.config_maps.len(), 1);
        assert_eq!(store.ingresses.len(), 1);
    }
    assert_eq!(h.cluster.status().phase, Some(ServePhase::Downloading));

    h.cluster.set_available(1);
    let action = h.reconcile().await.expect("third reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let status = h.cluster.status();
    assert_eq!(status.phase, Some(ServePhase::Running));
    assert_eq!(status.available_replicas, 1);
    assert_eq!(status.service_name, "demo");
    assert_eq!(status.gateway_url, "http://localhost/demo/");
    assert_eq!(status.pod_name, "demo-5d8f7-x2k9q");
    assert!(status.started_at.is_some());

    assert_eq!(
        h.cluster.phases(),
        vec![ServePhase::Pending, ServePhase::Downloading, ServePhase::Running]
    );

    let events = h.events.reasons();
    assert_eq!(events.first().map(String::as_str), Some("WorkloadCreated"));
    assert_eq!(events.last().map(String::as_str), Some("ModelRunning"));
}

#[tokio::test]
async fn defaults_reach_the_workload() {
    let h = Harness::new();
    h.cluster.submit(demo_spec());
    h.reconcile().await.expect("reconcile");

    let deployment = h.cluster.with().deployments[&key(NAME, NAMESPACE)].clone();
    let spec = deployment.spec.expect("deployment spec");
    assert_eq!(spec.replicas, Some(1));
    let pod = spec.template.spec.expect("pod spec");
    let runtime = pod
        .containers
        .iter()
        .find(|c| c.name == "llama-server")
        .expect("runtime container");
    assert_eq!(runtime.image.as_deref(), Some("ghcr.io/ggerganov/llama.cpp:server"));
    let limits = runtime
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .expect("limits");
    assert_eq!(limits["memory"].0, "4096Mi");
    assert_eq!(limits["cpu"].0, "2000m");
}

#[tokio::test]
async fn converged_request_is_left_alone() {
    let h = Harness::new();
    h.cluster.submit(demo_spec());
    h.reconcile().await.expect("create workload");
    h.reconcile().await.expect("create networking");
    h.cluster.set_available(1);
    h.reconcile().await.expect("observe running");

    let creates = h.cluster.creates();
    let writes = h.cluster.status_writes();
    let before = h.cluster.request();

    h.reconcile().await.expect("steady state");
    h.reconcile().await.expect("steady state again");

    assert_eq!(h.cluster.creates(), creates);
    assert_eq!(h.cluster.status_writes(), writes);
    assert_eq!(h.cluster.request().resource_version(), before.resource_version());
}

#[tokio::test]
async fn running_holds_while_replicas_stay_available() {
    let h = Harness::new();
    h.cluster.submit(demo_spec());
    h.reconcile().await.expect("create workload");
    h.reconcile().await.expect("create networking");
    h.cluster.set_available(1);
    h.reconcile().await.expect("observe running");
    let started_at = h.cluster.status().started_at;

    h.cluster.set_available(3);
    h.reconcile().await.expect("scale up");
    let status = h.cluster.status();
    assert_eq!(status.phase, Some(ServePhase::Running));
    assert_eq!(status.available_replicas, 3);
    assert_eq!(status.started_at, started_at);

    h.cluster.set_available(0);
    h.reconcile().await.expect("replicas lost");
    let status = h.cluster.status();
    assert_eq!(status.phase, Some(ServePhase::Pending));
    assert_eq!(status.available_replicas, 0);

    h.cluster.set_available(1);
    h.reconcile().await.expect("replicas back");
    let status = h.cluster.status();
    assert_eq!(status.phase, Some(ServePhase::Running));
    assert_eq!(status.started_at, started_at);
}

#[tokio::test]
async fn rejected_workload_marks_request_failed() {
    let h = Harness::new();
    h.cluster.with().reject_workloads = true;
    h.cluster.submit(demo_spec());

    let err = h.reconcile().await.expect_err("workload is rejected");
    assert!(err.is_rejection());
    assert!(!err.is_retryable());

    let status = h.cluster.status();
    assert_eq!(status.phase, Some(ServePhase::Failed));
    assert!(status.message.starts_with("Failed to create workload:"));
    assert_eq!(h.cluster.creates(), 0);
    assert!(h.events.reasons().contains(&"WorkloadFailed".to_string()));

    // Once the cause is fixed the next pass recreates the workload
    h.cluster.with().reject_workloads = false;
    h.reconcile().await.expect("retry creates workload");
    assert_eq!(h.cluster.status().phase, Some(ServePhase::Downloading));
}

#[tokio::test]
async fn every_child_is_owned_by_the_request() {
    let h = Harness::new();
    h.cluster.submit(demo_spec());
    h.reconcile().await.expect("create workload");
    h.reconcile().await.expect("create networking");

    let uid = h.cluster.request().uid().expect("uid");
    let store = h.cluster.with();
    let k = key(NAME, NAMESPACE);
    let metas = [
        &store.deployments[&k].metadata,
        &store.services[&k].metadata,
        &store.config_maps[&k].metadata,
        &store.ingresses[&k].metadata,
    ];
    for meta in metas {
        let owners = meta.owner_references.as_ref().expect("owner references");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, uid);
        assert_eq!(owners[0].kind, "ServeRequest");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(owners[0].block_owner_deletion, Some(true));

        let labels = meta.labels.clone().unwrap_or_default();
        assert_eq!(labels.get(OWNER_LABEL_KEY).map(String::as_str), Some(NAME));
        assert_eq!(labels.get(APP_LABEL_KEY).map(String::as_str), Some("model-serve"));
    }
}

#[tokio::test]
async fn deleted_request_is_a_no_op() {
    let h = Harness::new();
    h.cluster.submit(demo_spec());
    let request = h.cluster.request();
    h.cluster.with().requests.clear();

    let action = reconcile(Arc::new(request), h.ctx.clone())
        .await
        .expect("reconcile");
    assert_eq!(action, Action::await_change());
    assert_eq!(h.cluster.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_api_server_times_out_as_transient() {
    let h = Harness::with_config(OperatorConfig {
        reconcile_timeout: Duration::from_secs(1),
        ..Default::default()
    });
    h.cluster.submit(demo_spec());
    h.cluster.with().read_delay = Some(Duration::from_secs(60));

    let request = Arc::new(h.cluster.request());
    let err = reconcile(request.clone(), h.ctx.clone())
        .await
        .expect_err("reconcile should time out");
    assert!(matches!(err, Error::Timeout { seconds: 1, .. }));
    assert!(err.is_retryable());
    assert_eq!(
        error_policy(request, &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(5))
    );

    // Nothing was written before the deadline
    assert_eq!(h.cluster.status_writes(), 0);
    assert_eq!(h.cluster.creates(), 0);
}
