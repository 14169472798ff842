//! Kubernetes access for the ServeRequest controller
//!
//! All reads and writes go through [`ServeKubeClient`] so reconcile logic can
//! be exercised against mocks or an in-memory store.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

#[cfg(test)]
use mockall::automock;

use modelserve_common::crd::{ServeRequest, ServeRequestStatus};
use modelserve_common::Error;

/// Result of an ensure-exists create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// A concurrent writer created it first
    AlreadyExists,
}

/// Trait abstracting Kubernetes operations used by the reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServeKubeClient: Send + Sync {
    /// Fetch a ServeRequest; `None` when it no longer exists
    async fn get_serve_request(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServeRequest>, Error>;

    /// Write `status` on `current`, conditional on its resourceVersion.
    ///
    /// Returns the updated object so later writes in the same reconcile use
    /// the new resourceVersion.
    async fn patch_serve_request_status(
        &self,
        current: &ServeRequest,
        status: &ServeRequestStatus,
    ) -> Result<ServeRequest, Error>;

    /// Fetch a Deployment
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<CreateOutcome, Error>;

    /// Fetch a Service
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error>;

    /// Fetch a ConfigMap
    async fn get_config_map(&self, name: &str, namespace: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Create a ConfigMap
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<CreateOutcome, Error>;

    /// Fetch an Ingress
    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Option<Ingress>, Error>;

    /// Create an Ingress
    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome, Error>;

    /// Name of the first pod in phase Running matching `selector`
    async fn running_pod_name(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<String>, Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct ServeKubeClientImpl {
    client: Client,
}

impl ServeKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create<K>(&self, obj: &K) -> Result<CreateOutcome, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        K::DynamicType: Default,
    {
        let namespace = obj.namespace().ok_or_else(|| {
            Error::internal_with_context(
                format!("{} {} has no namespace", K::kind(&Default::default()), obj.name_any()),
                "client",
            )
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let result = api.create(&PostParams::default(), obj).await;
        create_outcome(&K::kind(&Default::default()), &obj.name_any(), result)
    }
}

/// Classify the result of a create call.
///
/// 409 is a lost race, not an error. Other 4xx responses (except throttling)
/// mean the API server will keep refusing this object as specified.
pub(crate) fn create_outcome<K>(
    kind: &str,
    name: &str,
    result: Result<K, kube::Error>,
) -> Result<CreateOutcome, Error> {
    match result {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
        Err(kube::Error::Api(ae)) if (400..500).contains(&ae.code) && ae.code != 429 => {
            Err(Error::rejected(kind, name, ae.code, ae.message))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ServeKubeClient for ServeKubeClientImpl {
    async fn get_serve_request(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServeRequest>, Error> {
        self.get_opt(name, namespace).await
    }

    async fn patch_serve_request_status(
        &self,
        current: &ServeRequest,
        status: &ServeRequestStatus,
    ) -> Result<ServeRequest, Error> {
        let namespace = current
            .namespace()
            .ok_or_else(|| Error::internal_with_context("ServeRequest has no namespace", "client"))?;
        let api: Api<ServeRequest> = Api::namespaced(self.client.clone(), &namespace);
        // resourceVersion turns the merge patch into a compare-and-swap
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "status": status,
        });
        let updated = api
            .patch_status(
                &current.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get_opt(name, namespace).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<CreateOutcome, Error> {
        self.create(deployment).await
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        self.get_opt(name, namespace).await
    }

    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
        self.create(service).await
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        self.get_opt(name, namespace).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<CreateOutcome, Error> {
        self.create(config_map).await
    }

    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Option<Ingress>, Error> {
        self.get_opt(name, namespace).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome, Error> {
        self.create(ingress).await
    }

    async fn running_pod_name(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<String>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods
            .items
            .into_iter()
            .find(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Running")
            })
            .map(|pod| pod.name_any()))
    }
}
